use crate::db::text_cell;
use crate::ipc::handlers::advisors::advisor_exists;
use crate::ipc::handlers::setup::pipeline_settings;
use crate::ipc::helpers::{
    db_err, get_optional_str, get_required_email, get_required_non_empty, get_required_str,
    normalize_email, now_rfc3339, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::stage::{self, CanonicalStage};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

/// Narrow student row: only what the pipeline view needs plus contact fields.
#[derive(Debug, Clone)]
pub(crate) struct StudentRow {
    pub id: String,
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub target_university: Option<String>,
    pub stage: Option<String>,
    pub advisor_email: Option<String>,
    pub updated_at: Option<String>,
}

const STUDENT_COLUMNS: &str =
    "id, full_name, email, phone, target_university, stage, advisor_email, updated_at";

// Cells are read leniently: a wrong-typed legacy value reads as missing.
fn map_student(r: &rusqlite::Row<'_>) -> rusqlite::Result<StudentRow> {
    Ok(StudentRow {
        id: text_cell(r, 0)?.unwrap_or_default(),
        full_name: text_cell(r, 1)?.unwrap_or_default(),
        email: text_cell(r, 2)?.unwrap_or_default(),
        phone: text_cell(r, 3)?,
        target_university: text_cell(r, 4)?,
        stage: text_cell(r, 5)?,
        advisor_email: text_cell(r, 6)?,
        updated_at: text_cell(r, 7)?,
    })
}

pub(crate) fn list_students(
    conn: &Connection,
    advisor_email: Option<&str>,
) -> Result<Vec<StudentRow>, HandlerErr> {
    let rows = match advisor_email {
        Some(a) => {
            let sql = format!(
                "SELECT {STUDENT_COLUMNS} FROM students WHERE advisor_email = ? ORDER BY full_name"
            );
            let mut stmt = conn.prepare(&sql).map_err(db_err("db_query_failed"))?;
            let rows = stmt
                .query_map([a], map_student)
                .and_then(|it| it.collect::<Result<Vec<_>, _>>());
            rows
        }
        None => {
            let sql = format!("SELECT {STUDENT_COLUMNS} FROM students ORDER BY full_name");
            let mut stmt = conn.prepare(&sql).map_err(db_err("db_query_failed"))?;
            let rows = stmt
                .query_map([], map_student)
                .and_then(|it| it.collect::<Result<Vec<_>, _>>());
            rows
        }
    };
    rows.map_err(db_err("db_query_failed"))
}

fn get_student(conn: &Connection, student_id: &str) -> Result<StudentRow, HandlerErr> {
    let sql = format!("SELECT {STUDENT_COLUMNS} FROM students WHERE id = ?");
    conn.query_row(&sql, [student_id], map_student)
        .optional()
        .map_err(db_err("db_query_failed"))?
        .ok_or_else(|| HandlerErr::new("not_found", "student not found"))
}

fn email_taken(conn: &Connection, email: &str, except_id: Option<&str>) -> Result<bool, HandlerErr> {
    let found: Option<String> = conn
        .query_row("SELECT id FROM students WHERE email = ?", [email], |r| r.get(0))
        .optional()
        .map_err(db_err("db_query_failed"))?;
    Ok(match found {
        Some(id) => except_id != Some(id.as_str()),
        None => false,
    })
}

fn student_json(row: &StudentRow, warn_unmapped: bool) -> Value {
    let n = stage::normalize_detailed(row.stage.as_deref());
    if !n.recognized && warn_unmapped {
        tracing::warn!(
            student_id = %row.id,
            label = row.stage.as_deref().unwrap_or(""),
            "unmapped stage label, showing first stage"
        );
    }
    json!({
        "id": row.id,
        "fullName": row.full_name,
        "email": row.email,
        "phone": row.phone,
        "targetUniversity": row.target_university,
        "advisorEmail": row.advisor_email,
        "stageLabel": row.stage,
        "stage": n.stage,
        "stageName": n.stage.label(),
        "stageRecognized": n.recognized,
        "progress": stage::progress(n.stage),
        "updatedAt": row.updated_at,
    })
}

/// Resolves an incoming stage to the label that gets stored. A canonical key
/// (`visa_waiting`) is written as its label; anything else is kept verbatim.
fn stage_for_write(conn: &Connection, raw: Option<String>) -> Result<Option<String>, HandlerErr> {
    let Some(raw) = raw.filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    if let Some(s) = CanonicalStage::from_key(&raw) {
        return Ok(Some(s.label().to_string()));
    }
    let settings = pipeline_settings(conn).map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    if settings.reject_unknown_stage_on_write && !stage::normalize_detailed(Some(&raw)).recognized {
        return Err(HandlerErr::bad_params("unknown stage label").with_details(json!({ "stage": raw })));
    }
    Ok(Some(raw))
}

fn optional_advisor(conn: &Connection, params: &Value) -> Result<Option<String>, HandlerErr> {
    let Some(raw) = get_optional_str(params, "advisorEmail")?.filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    let email = normalize_email(&raw)?;
    if !advisor_exists(conn, &email)? {
        return Err(HandlerErr::new("not_found", "advisor not found")
            .with_details(json!({ "advisorEmail": email })));
    }
    Ok(Some(email))
}

fn students_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let advisor = match get_optional_str(params, "advisorEmail")? {
        Some(a) if !a.is_empty() => Some(normalize_email(&a)?),
        _ => None,
    };
    let warn = pipeline_settings(conn)
        .map(|s| s.warn_on_unmapped_labels)
        .unwrap_or(true);
    let rows = list_students(conn, advisor.as_deref())?;
    let students: Vec<Value> = rows.iter().map(|r| student_json(r, warn)).collect();
    Ok(json!({ "students": students }))
}

fn students_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let full_name = get_required_non_empty(params, "fullName")?;
    let email = get_required_email(params, "email")?;
    let phone = get_optional_str(params, "phone")?;
    let target_university = get_optional_str(params, "targetUniversity")?;
    let stage_label = stage_for_write(conn, get_optional_str(params, "stage")?)?;
    let advisor_email = optional_advisor(conn, params)?;

    if email_taken(conn, &email, None)? {
        return Err(HandlerErr::new("conflict", "student email already exists")
            .with_details(json!({ "email": email })));
    }

    let student_id = Uuid::new_v4().to_string();
    let now = now_rfc3339();
    conn.execute(
        "INSERT INTO students(id, full_name, email, phone, target_university, stage, advisor_email, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &full_name,
            &email,
            &phone,
            &target_university,
            &stage_label,
            &advisor_email,
            &now,
            &now,
        ),
    )
    .map_err(|e| {
        HandlerErr::new("db_insert_failed", e.to_string()).with_details(json!({ "table": "students" }))
    })?;
    Ok(json!({ "studentId": student_id }))
}

fn students_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };
    let patch_v = &params["patch"];
    let mut row = get_student(conn, &student_id)?;

    for k in patch.keys() {
        match k.as_str() {
            "fullName" => row.full_name = get_required_non_empty(patch_v, k)?,
            "email" => {
                let email = get_required_email(patch_v, k)?;
                if email_taken(conn, &email, Some(&student_id))? {
                    return Err(HandlerErr::new("conflict", "student email already exists")
                        .with_details(json!({ "email": email })));
                }
                row.email = email;
            }
            "phone" => row.phone = get_optional_str(patch_v, k)?,
            "targetUniversity" => row.target_university = get_optional_str(patch_v, k)?,
            "stage" => row.stage = stage_for_write(conn, get_optional_str(patch_v, k)?)?,
            _ => return Err(HandlerErr::bad_params(format!("unknown student field: {}", k))),
        }
    }

    conn.execute(
        "UPDATE students
         SET full_name = ?, email = ?, phone = ?, target_university = ?, stage = ?, updated_at = ?
         WHERE id = ?",
        (
            &row.full_name,
            &row.email,
            &row.phone,
            &row.target_university,
            &row.stage,
            now_rfc3339(),
            &student_id,
        ),
    )
    .map_err(|e| {
        HandlerErr::new("db_update_failed", e.to_string()).with_details(json!({ "table": "students" }))
    })?;
    Ok(json!({ "ok": true }))
}

fn students_assign_advisor(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    get_student(conn, &student_id)?;
    let advisor_email = optional_advisor(conn, params)?;
    conn.execute(
        "UPDATE students SET advisor_email = ?, updated_at = ? WHERE id = ?",
        (&advisor_email, now_rfc3339(), &student_id),
    )
    .map_err(db_err("db_update_failed"))?;
    Ok(json!({ "ok": true, "advisorEmail": advisor_email }))
}

fn students_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let deleted = conn
        .execute("DELETE FROM students WHERE id = ?", [&student_id])
        .map_err(db_err("db_update_failed"))?;
    if deleted == 0 {
        return Err(HandlerErr::new("not_found", "student not found"));
    }
    Ok(json!({ "ok": true }))
}

fn students_pipeline(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let row = get_student(conn, &student_id)?;
    let current = stage::normalize(row.stage.as_deref());
    Ok(json!({
        "studentId": row.id,
        "stageLabel": row.stage,
        "stage": current,
        "stageName": current.label(),
        "progress": stage::progress(current),
        "steps": stage::pipeline(current),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(with_db(state, req, students_list)),
        "students.create" => Some(with_db(state, req, students_create)),
        "students.update" => Some(with_db(state, req, students_update)),
        "students.assignAdvisor" => Some(with_db(state, req, students_assign_advisor)),
        "students.delete" => Some(with_db(state, req, students_delete)),
        "students.pipeline" => Some(with_db(state, req, students_pipeline)),
        _ => None,
    }
}
