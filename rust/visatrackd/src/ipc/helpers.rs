use chrono::{SecondsFormat, Utc};
use rusqlite::Connection;
use serde_json::Value;

use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn db_err(code: &'static str) -> impl Fn(rusqlite::Error) -> HandlerErr {
    move |e| HandlerErr::new(code, e.to_string())
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_required_non_empty(params: &Value, key: &str) -> Result<String, HandlerErr> {
    let s = get_required_str(params, key)?;
    if s.is_empty() {
        return Err(HandlerErr::bad_params(format!("{} must not be empty", key)));
    }
    Ok(s)
}

/// Absent and JSON null both read as `None`; any other non-string is rejected.
pub fn get_optional_str(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(_) => Err(HandlerErr::bad_params(format!(
            "{} must be string or null",
            key
        ))),
    }
}

/// Emails are the participant identity; compare them case-insensitively.
pub fn normalize_email(raw: &str) -> Result<String, HandlerErr> {
    let e = raw.trim().to_ascii_lowercase();
    if e.is_empty() || !e.contains('@') {
        return Err(HandlerErr::bad_params(format!("invalid email: {}", raw)));
    }
    Ok(e)
}

pub fn get_required_email(params: &Value, key: &str) -> Result<String, HandlerErr> {
    normalize_email(&get_required_str(params, key)?)
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Runs `f` against the open workspace, wrapping the result in the envelope.
pub fn with_db<F>(state: &mut AppState, req: &Request, f: F) -> Value
where
    F: FnOnce(&Connection, &Value) -> Result<Value, HandlerErr>,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => crate::ipc::error::ok(&req.id, result),
        Err(error) => {
            tracing::debug!(method = %req.method, code = error.code, "request failed");
            error.response(&req.id)
        }
    }
}
