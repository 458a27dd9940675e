mod test_support;

use serde_json::json;
use test_support::{error_code, request, request_ok, spawn_sidecar, temp_dir};

#[test]
fn setup_defaults_and_patches_persist() {
    let workspace = temp_dir("visatrack-setup-defaults");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let defaults = request_ok(&mut stdin, &mut reader, "2", "setup.get", json!({}));
    assert_eq!(
        defaults.pointer("/messaging/previewMaxChars").and_then(|v| v.as_i64()),
        Some(120)
    );
    assert_eq!(
        defaults.pointer("/messaging/defaultSubject").and_then(|v| v.as_str()),
        Some("Genel")
    );
    assert_eq!(
        defaults.pointer("/pipeline/warnOnUnmappedLabels").and_then(|v| v.as_bool()),
        Some(true)
    );
    assert_eq!(
        defaults
            .pointer("/pipeline/rejectUnknownStageOnWrite")
            .and_then(|v| v.as_bool()),
        Some(false)
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "setup.update",
        json!({
            "section": "messaging",
            "patch": { "defaultSubject": "Danışmanlık", "ownMessagesMarkRead": false }
        }),
    );

    let out_of_range = request(
        &mut stdin,
        &mut reader,
        "4",
        "setup.update",
        json!({ "section": "messaging", "patch": { "previewMaxChars": 5 } }),
    );
    assert_eq!(error_code(&out_of_range), Some("bad_params"));
    let unknown_field = request(
        &mut stdin,
        &mut reader,
        "5",
        "setup.update",
        json!({ "section": "pipeline", "patch": { "colour": "red" } }),
    );
    assert_eq!(error_code(&unknown_field), Some("bad_params"));
    let unknown_section = request(
        &mut stdin,
        &mut reader,
        "6",
        "setup.update",
        json!({ "section": "printer", "patch": {} }),
    );
    assert_eq!(error_code(&unknown_section), Some("bad_params"));
    drop(stdin);

    // Settings survive a restart of the sidecar.
    let (_child2, mut stdin2, mut reader2) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin2,
        &mut reader2,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let setup = request_ok(&mut stdin2, &mut reader2, "2", "setup.get", json!({}));
    assert_eq!(
        setup.pointer("/messaging/defaultSubject").and_then(|v| v.as_str()),
        Some("Danışmanlık")
    );
    assert_eq!(
        setup.pointer("/messaging/ownMessagesMarkRead").and_then(|v| v.as_bool()),
        Some(false)
    );
    assert_eq!(
        setup.pointer("/messaging/previewMaxChars").and_then(|v| v.as_i64()),
        Some(120)
    );
}

#[test]
fn one_malformed_stored_value_keeps_the_rest() {
    let workspace = temp_dir("visatrack-setup-partial");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    {
        let conn = rusqlite::Connection::open(workspace.join("visatrack.sqlite3")).expect("open db");
        conn.execute(
            "INSERT INTO settings(key, value_json) VALUES('setup.messaging', ?)",
            [r#"{"previewMaxChars": 3, "defaultSubject": "Vize", "ownMessagesMarkRead": "no"}"#],
        )
        .expect("insert stored settings");
    }

    let setup = request_ok(&mut stdin, &mut reader, "2", "setup.get", json!({}));
    assert_eq!(
        setup.pointer("/messaging/defaultSubject").and_then(|v| v.as_str()),
        Some("Vize")
    );
    assert_eq!(
        setup.pointer("/messaging/previewMaxChars").and_then(|v| v.as_i64()),
        Some(120)
    );
    assert_eq!(
        setup.pointer("/messaging/ownMessagesMarkRead").and_then(|v| v.as_bool()),
        Some(true)
    );
}
