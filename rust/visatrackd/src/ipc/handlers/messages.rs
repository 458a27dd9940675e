use crate::db;
use crate::ipc::handlers::setup::{messaging_settings, MessagingSettings};
use crate::ipc::helpers::{
    db_err, get_optional_str, get_required_email, get_required_non_empty, get_required_str,
    now_rfc3339, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::tickets::{parse_timestamp, Inbox, InboxEvent, Message, Role, Ticket, TicketKey};
use chrono::{SecondsFormat, SubsecRound};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

fn load_settings(conn: &Connection) -> Result<MessagingSettings, HandlerErr> {
    messaging_settings(conn).map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}

fn load_inbox(conn: &Connection, viewer: &str, settings: &MessagingSettings) -> Result<Inbox, HandlerErr> {
    let rows = db::messages_for_viewer(conn, viewer)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let total = rows.len();
    let messages: Vec<Message> = rows
        .into_iter()
        .filter_map(|row| {
            let id = row.id.clone();
            let parsed = Message::from_row(row);
            if parsed.is_none() {
                tracing::warn!(message_id = ?id, viewer, "dropping malformed message row");
            }
            parsed
        })
        .collect();
    tracing::debug!(viewer, total, valid = messages.len(), "inbox loaded");
    Ok(Inbox::new(viewer, messages).own_messages_mark_read(settings.own_messages_mark_read))
}

fn excerpt(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars).collect();
    out.push('…');
    out
}

fn ticket_json(t: &Ticket, settings: &MessagingSettings) -> Value {
    json!({
        "id": t.id,
        "subject": t.subject,
        "participants": t.participants,
        "counterpart": t.counterpart,
        "preview": excerpt(&t.preview, settings.preview_max_chars),
        "lastActivity": t.last_activity.to_rfc3339_opts(SecondsFormat::Millis, true),
        "isRead": t.is_read,
        "messageCount": t.messages.len(),
        "messages": t.messages,
    })
}

fn participant_exists(conn: &Connection, email: &str, role: Option<Role>) -> Result<bool, HandlerErr> {
    let sql = match role {
        Some(Role::Student) => "SELECT 1 FROM students WHERE lower(email) = ?1",
        Some(Role::Advisor) => "SELECT 1 FROM advisors WHERE lower(email) = ?1",
        None => {
            "SELECT 1 FROM students WHERE lower(email) = ?1
             UNION ALL SELECT 1 FROM advisors WHERE lower(email) = ?1"
        }
    };
    conn.query_row(sql, [email], |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
        .map_err(db_err("db_query_failed"))
}

fn message_exists(conn: &Connection, id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM messages WHERE id = ?", [id], |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
        .map_err(db_err("db_query_failed"))
}

/// Shared path for `messages.send` and `tickets.create`.
fn send(conn: &Connection, params: &Value, explicit_ticket: bool) -> Result<Value, HandlerErr> {
    let settings = load_settings(conn)?;
    let sender = get_required_email(params, "senderEmail")?;
    let receiver = get_required_email(params, "receiverEmail")?;
    let role_raw = get_required_str(params, "senderRole")?;
    let Some(sender_role) = Role::parse(&role_raw) else {
        return Err(HandlerErr::bad_params("senderRole must be student or advisor"));
    };
    let content = get_required_non_empty(params, "content")?;
    let subject = match get_optional_str(params, "subject")? {
        Some(s) if !s.is_empty() => s,
        _ if explicit_ticket => settings.default_subject.clone(),
        _ => String::new(),
    };
    let reply_to = get_optional_str(params, "replyTo")?.filter(|s| !s.is_empty());
    let created_at = match get_optional_str(params, "createdAt")? {
        Some(raw) => parse_timestamp(&raw)
            .ok_or_else(|| HandlerErr::bad_params("createdAt must be an RFC 3339 timestamp"))?,
        None => chrono::Utc::now(),
    }
    .trunc_subsecs(3);

    if !participant_exists(conn, &sender, Some(sender_role))? {
        return Err(HandlerErr::new("not_found", "sender not found")
            .with_details(json!({ "senderEmail": sender, "senderRole": sender_role.as_str() })));
    }
    if !participant_exists(conn, &receiver, None)? {
        return Err(HandlerErr::new("not_found", "receiver not found")
            .with_details(json!({ "receiverEmail": receiver })));
    }
    if let Some(r) = reply_to.as_deref() {
        if !message_exists(conn, r)? {
            return Err(HandlerErr::new("not_found", "replyTo message not found"));
        }
    }

    let inbox = load_inbox(conn, &sender, &settings)?;
    let key = TicketKey::new(&subject, &sender, &receiver);
    if explicit_ticket && inbox.tickets.iter().any(|t| t.key() == key) {
        return Err(HandlerErr::new("conflict", "ticket already exists")
            .with_details(json!({ "subject": subject })));
    }

    let message = Message {
        id: Uuid::new_v4().to_string(),
        sender: sender.clone(),
        receiver,
        sender_role,
        content,
        subject,
        reply_to,
        created_at,
        is_read: false,
    };
    // Null subject on the wire stays NULL in the store.
    let stored_subject = if message.subject.is_empty() {
        None
    } else {
        Some(message.subject.as_str())
    };
    conn.execute(
        "INSERT INTO messages(id, sender_email, receiver_email, sender_role, subject, content, reply_to, created_at, is_read)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, 0)",
        (
            &message.id,
            &message.sender,
            &message.receiver,
            message.sender_role.as_str(),
            stored_subject,
            &message.content,
            &message.reply_to,
            message.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        ),
    )
    .map_err(|e| {
        HandlerErr::new("db_insert_failed", e.to_string()).with_details(json!({ "table": "messages" }))
    })?;
    tracing::debug!(message_id = %message.id, sender = %message.sender, "message stored");

    let message_id = message.id.clone();
    let inbox = inbox.reduce(InboxEvent::Append(message));
    let ticket = inbox
        .tickets
        .iter()
        .find(|t| t.key() == key)
        .map(|t| ticket_json(t, &settings));
    Ok(json!({
        "messageId": message_id,
        "ticketId": ticket.as_ref().and_then(|t| t.get("id")).cloned(),
        "ticket": ticket,
        "unreadCount": inbox.unread_count,
    }))
}

fn messages_send(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    send(conn, params, false)
}

fn tickets_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    send(conn, params, true)
}

fn tickets_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let viewer = get_required_email(params, "viewerEmail")?;
    let settings = load_settings(conn)?;
    let inbox = load_inbox(conn, &viewer, &settings)?;
    let tickets: Vec<Value> = inbox
        .tickets
        .iter()
        .map(|t| ticket_json(t, &settings))
        .collect();
    Ok(json!({
        "tickets": tickets,
        "unreadCount": inbox.unread_count,
    }))
}

fn tickets_open(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let viewer = get_required_email(params, "viewerEmail")?;
    let ticket_id = get_required_str(params, "ticketId")?;
    let settings = load_settings(conn)?;
    let inbox = load_inbox(conn, &viewer, &settings)?;

    let Some(ticket) = inbox.ticket(&ticket_id) else {
        // Stale ids from an old list are tolerated.
        return Ok(json!({
            "opened": false,
            "ticketId": ticket_id,
            "unreadCount": inbox.unread_count,
        }));
    };
    let inbound_unread: Vec<String> = ticket
        .messages
        .iter()
        .filter(|m| m.receiver == viewer && !m.is_read)
        .map(|m| m.id.clone())
        .collect();
    let marked = db::mark_messages_read(conn, &viewer, &inbound_unread)
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;

    let inbox = inbox.reduce(InboxEvent::Select(ticket_id.clone()));
    Ok(json!({
        "opened": true,
        "ticketId": ticket_id,
        "markedMessages": marked,
        "selected": inbox.selected,
        "unreadCount": inbox.unread_count,
    }))
}

fn tickets_unread_count(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let viewer = get_required_email(params, "viewerEmail")?;
    let settings = load_settings(conn)?;
    let inbox = load_inbox(conn, &viewer, &settings)?;
    Ok(json!({ "unreadCount": inbox.unread_count, "checkedAt": now_rfc3339() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "messages.send" => Some(with_db(state, req, messages_send)),
        "tickets.create" => Some(with_db(state, req, tickets_create)),
        "tickets.list" => Some(with_db(state, req, tickets_list)),
        "tickets.open" => Some(with_db(state, req, tickets_open)),
        "tickets.unreadCount" => Some(with_db(state, req, tickets_unread_count)),
        _ => None,
    }
}
