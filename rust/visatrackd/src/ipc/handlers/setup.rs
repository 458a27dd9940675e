use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Messaging,
    Pipeline,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "messaging" => Some(Self::Messaging),
            "pipeline" => Some(Self::Pipeline),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Messaging => "setup.messaging",
            Self::Pipeline => "setup.pipeline",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Messaging => json!({
            "previewMaxChars": 120,
            "defaultSubject": "Genel",
            "ownMessagesMarkRead": true
        }),
        SetupSection::Pipeline => json!({
            "warnOnUnmappedLabels": true,
            "rejectUnknownStageOnWrite": false
        }),
    }
}

#[derive(Debug, Clone)]
pub struct MessagingSettings {
    pub preview_max_chars: usize,
    pub default_subject: String,
    pub own_messages_mark_read: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub warn_on_unmapped_labels: bool,
    pub reject_unknown_stage_on_write: bool,
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.chars().count() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Messaging => match k.as_str() {
                "previewMaxChars" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 20, 500)?));
                }
                "defaultSubject" => {
                    let s = parse_string_max(v, k, 80)?;
                    if s.is_empty() {
                        return Err("defaultSubject must not be empty".into());
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                "ownMessagesMarkRead" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown messaging field: {}", k)),
            },
            SetupSection::Pipeline => match k.as_str() {
                "warnOnUnmappedLabels" | "rejectUnknownStageOnWrite" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown pipeline field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort, key by key: one malformed stored value keeps its default.
            for (k, v) in saved_obj {
                let mut single = Map::new();
                single.insert(k.clone(), v.clone());
                if let Err(e) = merge_section_patch(section, &mut current, &single) {
                    tracing::warn!(key = section.key(), field = %k, error = %e, "ignoring stored setup value");
                }
            }
        }
    }
    Ok(current)
}

pub fn messaging_settings(conn: &rusqlite::Connection) -> anyhow::Result<MessagingSettings> {
    let v = load_section(conn, SetupSection::Messaging)?;
    Ok(MessagingSettings {
        preview_max_chars: v
            .get("previewMaxChars")
            .and_then(|x| x.as_u64())
            .unwrap_or(120) as usize,
        default_subject: v
            .get("defaultSubject")
            .and_then(|x| x.as_str())
            .unwrap_or("Genel")
            .to_string(),
        own_messages_mark_read: v
            .get("ownMessagesMarkRead")
            .and_then(|x| x.as_bool())
            .unwrap_or(true),
    })
}

pub fn pipeline_settings(conn: &rusqlite::Connection) -> anyhow::Result<PipelineSettings> {
    let v = load_section(conn, SetupSection::Pipeline)?;
    Ok(PipelineSettings {
        warn_on_unmapped_labels: v
            .get("warnOnUnmappedLabels")
            .and_then(|x| x.as_bool())
            .unwrap_or(true),
        reject_unknown_stage_on_write: v
            .get("rejectUnknownStageOnWrite")
            .and_then(|x| x.as_bool())
            .unwrap_or(false),
    })
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let messaging = match load_section(conn, SetupSection::Messaging) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let pipeline = match load_section(conn, SetupSection::Pipeline) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(
        &req.id,
        json!({
            "messaging": messaging,
            "pipeline": pipeline
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::info!(section = section_raw, "setup updated");
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
