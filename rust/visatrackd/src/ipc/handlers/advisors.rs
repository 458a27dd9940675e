use crate::ipc::helpers::{
    db_err, get_required_email, get_required_non_empty, now_rfc3339, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

pub(crate) fn advisor_exists(conn: &Connection, email: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM advisors WHERE email = ?", [email], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(db_err("db_query_failed"))
}

fn advisors_list(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    // Student counts let the admin page balance assignments.
    let mut stmt = conn
        .prepare(
            "SELECT
               a.id,
               a.full_name,
               a.email,
               (SELECT COUNT(*) FROM students s WHERE s.advisor_email = a.email) AS student_count
             FROM advisors a
             ORDER BY a.full_name",
        )
        .map_err(db_err("db_query_failed"))?;
    let advisors = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let full_name: String = row.get(1)?;
            let email: String = row.get(2)?;
            let student_count: i64 = row.get(3)?;
            Ok(json!({
                "id": id,
                "fullName": full_name,
                "email": email,
                "studentCount": student_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed"))?;
    Ok(json!({ "advisors": advisors }))
}

fn advisors_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let full_name = get_required_non_empty(params, "fullName")?;
    let email = get_required_email(params, "email")?;
    if advisor_exists(conn, &email)? {
        return Err(HandlerErr::new("conflict", "advisor email already exists")
            .with_details(json!({ "email": email })));
    }
    let advisor_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO advisors(id, full_name, email, created_at) VALUES(?, ?, ?, ?)",
        (&advisor_id, &full_name, &email, now_rfc3339()),
    )
    .map_err(|e| {
        HandlerErr::new("db_insert_failed", e.to_string()).with_details(json!({ "table": "advisors" }))
    })?;
    Ok(json!({ "advisorId": advisor_id, "email": email }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "advisors.list" => Some(with_db(state, req, advisors_list)),
        "advisors.create" => Some(with_db(state, req, advisors_create)),
        _ => None,
    }
}
