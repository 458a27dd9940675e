use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    Student,
    Advisor,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "student" => Some(Self::Student),
            "advisor" => Some(Self::Advisor),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Advisor => "advisor",
        }
    }
}

/// Message row as it comes out of the store, before validation.
#[derive(Debug, Clone, Default)]
pub struct MessageRow {
    pub id: Option<String>,
    pub sender_email: Option<String>,
    pub receiver_email: Option<String>,
    pub sender_role: Option<String>,
    pub content: Option<String>,
    pub subject: Option<String>,
    pub reply_to: Option<String>,
    pub created_at: Option<String>,
    pub is_read: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub sender: String,
    pub receiver: String,
    pub sender_role: Role,
    pub content: String,
    pub subject: String,
    pub reply_to: Option<String>,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
}

fn non_blank(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Accepts RFC 3339 and SQLite's `CURRENT_TIMESTAMP` layout (UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let t = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(t, fmt) {
            return Some(naive.and_utc());
        }
    }
    None
}

impl Message {
    /// `None` when sender, receiver, role or timestamp is unusable.
    /// Participant emails are case-folded so legacy rows join their tickets.
    pub fn from_row(row: MessageRow) -> Option<Message> {
        let sender = non_blank(row.sender_email)?.to_lowercase();
        let receiver = non_blank(row.receiver_email)?.to_lowercase();
        let sender_role = Role::parse(row.sender_role.as_deref()?)?;
        let created_at = parse_timestamp(row.created_at.as_deref()?)?;
        Some(Message {
            id: row.id.unwrap_or_default(),
            sender,
            receiver,
            sender_role,
            content: row.content.unwrap_or_default(),
            // Null subject groups under the empty-string key.
            subject: row.subject.unwrap_or_default(),
            reply_to: non_blank(row.reply_to),
            created_at,
            is_read: row.is_read.unwrap_or(false),
        })
    }

    pub fn key(&self) -> TicketKey {
        TicketKey::new(&self.subject, &self.sender, &self.receiver)
    }
}

/// Subject plus the unordered pair of participants.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TicketKey {
    pub subject: String,
    pub participants: (String, String),
}

impl TicketKey {
    pub fn new(subject: &str, a: &str, b: &str) -> Self {
        let participants = if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        };
        Self {
            subject: subject.to_string(),
            participants,
        }
    }
}

pub fn ticket_id_for(key: &TicketKey) -> String {
    let name = format!(
        "{}\u{1f}{}\u{1f}{}",
        key.participants.0, key.participants.1, key.subject
    );
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: String,
    pub subject: String,
    pub participants: [String; 2],
    pub counterpart: String,
    pub messages: Vec<Message>,
    pub preview: String,
    pub last_activity: DateTime<Utc>,
    pub is_read: bool,
}

impl Ticket {
    pub fn key(&self) -> TicketKey {
        TicketKey::new(&self.subject, &self.participants[0], &self.participants[1])
    }

    fn from_partition(key: TicketKey, mut messages: Vec<Message>, viewer: &str) -> Option<Ticket> {
        messages.sort_by_key(|m| m.created_at);
        let latest = messages.last()?;
        let preview = latest.content.clone();
        let last_activity = latest.created_at;
        let is_read = latest.sender == viewer || latest.is_read;
        let id = ticket_id_for(&key);
        let (a, b) = key.participants;
        let counterpart = if a == viewer { b.clone() } else { a.clone() };
        Some(Ticket {
            id,
            subject: key.subject,
            participants: [a, b],
            counterpart,
            messages,
            preview,
            last_activity,
            is_read,
        })
    }
}

fn sort_tickets(tickets: &mut [Ticket]) {
    tickets.sort_by(|a, b| {
        b.last_activity
            .cmp(&a.last_activity)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Groups a viewer's messages into conversations, most recent first.
pub fn group_into_tickets<I>(messages: I, viewer: &str) -> Vec<Ticket>
where
    I: IntoIterator<Item = Message>,
{
    let mut parts: BTreeMap<TicketKey, Vec<Message>> = BTreeMap::new();
    for m in messages {
        parts.entry(m.key()).or_default().push(m);
    }
    let mut tickets: Vec<Ticket> = parts
        .into_iter()
        .filter_map(|(key, msgs)| Ticket::from_partition(key, msgs, viewer))
        .collect();
    sort_tickets(&mut tickets);
    tickets
}

/// Marks one ticket read. Unknown ids leave the set untouched.
pub fn select_ticket(tickets: Vec<Ticket>, ticket_id: &str) -> Vec<Ticket> {
    tickets
        .into_iter()
        .map(|mut t| {
            if t.id == ticket_id {
                t.is_read = true;
            }
            t
        })
        .collect()
}

/// Inserts `message` at its timestamp position. Messages for another key are
/// ignored. `own_marks_read` controls whether the viewer's own message that
/// becomes the latest flips the ticket back to read.
pub fn append_message(
    ticket: &Ticket,
    message: Message,
    viewer: &str,
    own_marks_read: bool,
) -> Ticket {
    if message.key() != ticket.key() {
        return ticket.clone();
    }
    let mut out = ticket.clone();
    let inbound = message.sender != viewer;
    let pos = out
        .messages
        .partition_point(|m| m.created_at <= message.created_at);
    out.messages.insert(pos, message);
    let is_latest = pos + 1 == out.messages.len();
    if let Some(latest) = out.messages.last() {
        out.preview = latest.content.clone();
        out.last_activity = latest.created_at;
    }
    if inbound {
        out.is_read = false;
    } else if own_marks_read && is_latest {
        out.is_read = true;
    }
    out
}

pub fn unread_count(tickets: &[Ticket]) -> usize {
    tickets.iter().filter(|t| !t.is_read).count()
}

#[derive(Debug, Clone)]
pub enum InboxEvent {
    Select(String),
    Append(Message),
}

/// A viewer's conversations plus the selected ticket. Updated only through
/// `reduce`, which consumes the old state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Inbox {
    pub viewer: String,
    pub tickets: Vec<Ticket>,
    pub selected: Option<String>,
    pub unread_count: usize,
    #[serde(skip)]
    own_messages_mark_read: bool,
}

impl Inbox {
    pub fn new<I>(viewer: &str, messages: I) -> Self
    where
        I: IntoIterator<Item = Message>,
    {
        let tickets = group_into_tickets(messages, viewer);
        let unread_count = unread_count(&tickets);
        Self {
            viewer: viewer.to_string(),
            tickets,
            selected: None,
            unread_count,
            own_messages_mark_read: true,
        }
    }

    pub fn own_messages_mark_read(mut self, v: bool) -> Self {
        self.own_messages_mark_read = v;
        self
    }

    pub fn ticket(&self, id: &str) -> Option<&Ticket> {
        self.tickets.iter().find(|t| t.id == id)
    }

    pub fn reduce(self, event: InboxEvent) -> Inbox {
        let Inbox {
            viewer,
            tickets,
            selected,
            own_messages_mark_read,
            ..
        } = self;
        let (tickets, selected) = match event {
            InboxEvent::Select(id) => {
                if tickets.iter().any(|t| t.id == id) {
                    (select_ticket(tickets, &id), Some(id))
                } else {
                    (tickets, selected)
                }
            }
            InboxEvent::Append(message) => {
                let key = message.key();
                let mut tickets = tickets;
                match tickets.iter().position(|t| t.key() == key) {
                    Some(i) => {
                        tickets[i] = append_message(
                            &tickets[i],
                            message,
                            &viewer,
                            own_messages_mark_read,
                        );
                    }
                    None => {
                        if let Some(t) = Ticket::from_partition(key, vec![message], &viewer) {
                            tickets.push(t);
                        }
                    }
                }
                sort_tickets(&mut tickets);
                (tickets, selected)
            }
        };
        let unread_count = unread_count(&tickets);
        Inbox {
            viewer,
            tickets,
            selected,
            unread_count,
            own_messages_mark_read,
        }
    }
}
