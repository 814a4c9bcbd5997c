use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Positive ticket number as used in the tracker's URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TicketId(u32);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TicketIdError {
    #[error("ticket id must be a positive integer, got {0:?}")]
    NotANumber(String),
    #[error("ticket id must be greater than zero")]
    Zero,
}

impl TicketId {
    pub fn new(id: u32) -> Option<Self> {
        (id > 0).then_some(Self(id))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl FromStr for TicketId {
    type Err = TicketIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let n: u32 = s
            .trim()
            .parse()
            .map_err(|_| TicketIdError::NotANumber(s.to_string()))?;
        Self::new(n).ok_or(TicketIdError::Zero)
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A ticket exactly as the tracker returned it, journals and attachment
/// metadata included. Only the attachment lists are ever looked at.
#[derive(Debug, Clone, PartialEq)]
pub struct IssueDocument(Value);

impl IssueDocument {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Two-space indented JSON with keys in sorted order.
    pub fn to_pretty_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self.as_value())
    }

    /// Attachment records of the issue itself followed by those hanging off
    /// each journal entry, in document order.
    pub fn attachments(&self) -> Vec<Result<AttachmentRef, InvalidAttachment>> {
        let Some(issue) = self.0.get("issue") else {
            return Vec::new();
        };

        let own = issue
            .get("attachments")
            .and_then(Value::as_array)
            .into_iter()
            .flatten();

        let from_journals = issue
            .get("journals")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|journal| journal.get("attachments").and_then(Value::as_array))
            .flatten();

        own.chain(from_journals).map(AttachmentRef::from_value).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    pub id: Option<u64>,
    pub filename: String,
    pub content_url: Option<String>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid attachment metadata: {0}")]
pub struct InvalidAttachment(pub String);

impl AttachmentRef {
    pub fn from_value(value: &Value) -> Result<Self, InvalidAttachment> {
        let id = value.get("id").and_then(Value::as_u64);
        let content_url = value
            .get("content_url")
            .and_then(Value::as_str)
            .filter(|u| !u.trim().is_empty())
            .map(String::from);

        if id.is_none() && content_url.is_none() {
            return Err(InvalidAttachment(value.to_string()));
        }

        let filename = value
            .get("filename")
            .and_then(Value::as_str)
            .filter(|f| !f.trim().is_empty())
            .map(String::from)
            .or_else(|| id.map(|id| format!("attachment_{id}")))
            .or_else(|| {
                content_url
                    .as_deref()
                    .and_then(|u| u.rsplit('/').next())
                    .filter(|s| !s.is_empty())
                    .map(String::from)
            })
            .ok_or_else(|| InvalidAttachment(value.to_string()))?;

        Ok(Self {
            id,
            filename,
            content_url,
        })
    }
}
