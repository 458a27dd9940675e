mod test_support;

use serde_json::json;
use test_support::{error_code, request, request_ok, spawn_sidecar, temp_dir};

fn student_by_email<'a>(list: &'a serde_json::Value, email: &str) -> &'a serde_json::Value {
    list.get("students")
        .and_then(|v| v.as_array())
        .and_then(|a| {
            a.iter()
                .find(|s| s.get("email").and_then(|v| v.as_str()) == Some(email))
        })
        .expect("student in list")
}

#[test]
fn student_stage_labels_render_as_pipeline() {
    let workspace = temp_dir("visatrack-students-pipeline");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "advisors.create",
        json!({ "fullName": "Mehmet Demir", "email": "Mehmet@Advisor.example" }),
    );

    let accepted = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({
            "fullName": "Ayşe Yılmaz",
            "email": "ayse@student.example",
            "stage": "Kabul",
            "advisorEmail": "mehmet@advisor.example"
        }),
    );
    let accepted_id = accepted
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.create",
        json!({ "fullName": "Can Öz", "email": "can@student.example", "stage": "visa_waiting" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.create",
        json!({ "fullName": "Deniz Ak", "email": "deniz@student.example" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "students.create",
        json!({ "fullName": "Ece Kaya", "email": "ece@student.example", "stage": "Vize Reddi" }),
    );

    let list = request_ok(&mut stdin, &mut reader, "7", "students.list", json!({}));
    let ayse = student_by_email(&list, "ayse@student.example");
    assert_eq!(ayse.get("stageLabel").and_then(|v| v.as_str()), Some("Kabul"));
    assert_eq!(ayse.get("stage").and_then(|v| v.as_str()), Some("accepted"));
    assert_eq!(ayse.get("progress").and_then(|v| v.as_u64()), Some(40));
    let can = student_by_email(&list, "can@student.example");
    // Canonical keys are stored as their label.
    assert_eq!(can.get("stageLabel").and_then(|v| v.as_str()), Some("Vize Bekleme Aşaması"));
    assert_eq!(can.get("progress").and_then(|v| v.as_u64()), Some(80));
    let deniz = student_by_email(&list, "deniz@student.example");
    assert!(deniz.get("stageLabel").map(|v| v.is_null()).unwrap_or(false));
    assert_eq!(deniz.get("stage").and_then(|v| v.as_str()), Some("preparation"));
    let ece = student_by_email(&list, "ece@student.example");
    assert_eq!(ece.get("stage").and_then(|v| v.as_str()), Some("preparation"));
    assert_eq!(ece.get("stageRecognized").and_then(|v| v.as_bool()), Some(false));

    let pipeline = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "students.pipeline",
        json!({ "studentId": accepted_id }),
    );
    let steps = pipeline.get("steps").and_then(|v| v.as_array()).expect("steps");
    let statuses: Vec<&str> = steps
        .iter()
        .map(|s| s.get("status").and_then(|v| v.as_str()).expect("status"))
        .collect();
    assert_eq!(
        statuses,
        vec![
            "completed", "completed", "completed", "current", "pending", "pending", "pending",
            "pending", "pending", "pending"
        ]
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "students.update",
        json!({ "studentId": accepted_id, "patch": { "stage": "BİTEN" } }),
    );
    let done = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "students.pipeline",
        json!({ "studentId": accepted_id }),
    );
    assert_eq!(done.get("progress").and_then(|v| v.as_u64()), Some(100));
    assert_eq!(
        done.pointer("/steps/9/status").and_then(|v| v.as_str()),
        Some("current")
    );

    let summary = request_ok(&mut stdin, &mut reader, "11", "pipeline.summary", json!({}));
    assert_eq!(summary.get("total").and_then(|v| v.as_u64()), Some(4));
    assert_eq!(summary.get("unmapped").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(summary.pointer("/stages/0/count").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(summary.pointer("/stages/7/count").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(summary.pointer("/stages/9/count").and_then(|v| v.as_u64()), Some(1));

    let mine = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "students.list",
        json!({ "advisorEmail": "mehmet@advisor.example" }),
    );
    assert_eq!(
        mine.get("students").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(1)
    );
    let advisors = request_ok(&mut stdin, &mut reader, "13", "advisors.list", json!({}));
    assert_eq!(
        advisors.pointer("/advisors/0/studentCount").and_then(|v| v.as_i64()),
        Some(1)
    );
}

#[test]
fn student_writes_validate_and_report_conflicts() {
    let workspace = temp_dir("visatrack-students-validation");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({ "fullName": "Ayşe Yılmaz", "email": "ayse@student.example" }),
    );
    let student_id = created
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();

    let dup = request(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "fullName": "Other", "email": "AYSE@student.example" }),
    );
    assert_eq!(error_code(&dup), Some("conflict"));

    let no_advisor = request(
        &mut stdin,
        &mut reader,
        "4",
        "students.assignAdvisor",
        json!({ "studentId": student_id, "advisorEmail": "ghost@advisor.example" }),
    );
    assert_eq!(error_code(&no_advisor), Some("not_found"));

    let bad_field = request(
        &mut stdin,
        &mut reader,
        "5",
        "students.update",
        json!({ "studentId": student_id, "patch": { "visaNumber": "X" } }),
    );
    assert_eq!(error_code(&bad_field), Some("bad_params"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "setup.update",
        json!({ "section": "pipeline", "patch": { "rejectUnknownStageOnWrite": true } }),
    );
    let rejected = request(
        &mut stdin,
        &mut reader,
        "7",
        "students.update",
        json!({ "studentId": student_id, "patch": { "stage": "Vize Reddi" } }),
    );
    assert_eq!(error_code(&rejected), Some("bad_params"));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "students.update",
        json!({ "studentId": student_id, "patch": { "stage": "biten" } }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "students.delete",
        json!({ "studentId": student_id }),
    );
    let gone = request(
        &mut stdin,
        &mut reader,
        "10",
        "students.pipeline",
        json!({ "studentId": student_id }),
    );
    assert_eq!(error_code(&gone), Some("not_found"));
}
