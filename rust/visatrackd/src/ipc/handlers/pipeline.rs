use crate::ipc::error::{err, ok};
use crate::ipc::handlers::students::list_students;
use crate::ipc::helpers::{get_optional_str, normalize_email, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::stage::{self, CanonicalStage};
use rusqlite::Connection;
use serde_json::{json, Value};

fn handle_pipeline_stages(req: &Request) -> Value {
    let stages: Vec<Value> = CanonicalStage::ALL
        .iter()
        .map(|s| {
            let aliases: Vec<&str> = stage::known_labels()
                .filter(|(label, mapped)| mapped == s && *label != s.label())
                .map(|(label, _)| label)
                .collect();
            json!({
                "stage": s,
                "label": s.label(),
                "ordinal": s.ordinal(),
                "progress": stage::progress(*s),
                "aliases": aliases,
            })
        })
        .collect();
    ok(&req.id, json!({ "stages": stages }))
}

fn handle_pipeline_normalize(req: &Request) -> Value {
    // Label is passed through untrimmed: matching is exact.
    let label = match req.params.get("label") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.as_str()),
        Some(_) => return err(&req.id, "bad_params", "label must be string or null", None),
    };
    let n = stage::normalize_detailed(label);
    ok(
        &req.id,
        json!({
            "stage": n.stage,
            "stageName": n.stage.label(),
            "recognized": n.recognized,
            "progress": stage::progress(n.stage),
        }),
    )
}

fn pipeline_summary(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let advisor = match get_optional_str(params, "advisorEmail")? {
        Some(a) if !a.is_empty() => Some(normalize_email(&a)?),
        _ => None,
    };
    let rows = list_students(conn, advisor.as_deref())?;
    let summary = stage::summarize(rows.iter().map(|r| r.stage.as_deref()));
    if summary.unmapped > 0 {
        tracing::warn!(unmapped = summary.unmapped, "cohort has unmapped stage labels");
    }
    Ok(json!({
        "total": summary.total,
        "unmapped": summary.unmapped,
        "averageProgress": summary.average_progress,
        "stages": summary.stages,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "pipeline.stages" => Some(handle_pipeline_stages(req)),
        "pipeline.normalize" => Some(handle_pipeline_normalize(req)),
        "pipeline.summary" => Some(with_db(state, req, pipeline_summary)),
        _ => None,
    }
}
