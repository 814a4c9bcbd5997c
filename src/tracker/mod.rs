pub mod redmine;

use async_trait::async_trait;
use std::io::Write;
use thiserror::Error;

use crate::model::issue::{AttachmentRef, IssueDocument, TicketId};

/// How a tracker call failed. `Unauthorized` and `Network` describe the
/// whole session, the rest describe a single resource.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("not found (HTTP 404)")]
    NotFound,
    #[error("API key rejected (HTTP {0})")]
    Unauthorized(u16),
    #[error("network error: {0}")]
    Network(String),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("unexpected HTTP status {0}")]
    Unexpected(u16),
    #[error("local write failed: {0}")]
    Io(String),
}

/// Maps a response status to the error taxonomy. 2xx is `Ok`.
pub fn classify_status(status: u16) -> Result<(), ClientError> {
    match status {
        200..=299 => Ok(()),
        404 => Err(ClientError::NotFound),
        401 | 403 => Err(ClientError::Unauthorized(status)),
        other => Err(ClientError::Unexpected(other)),
    }
}

#[async_trait]
pub trait Tracker: Send + Sync {
    fn name(&self) -> &str;

    /// Cheap authenticated request used to fail fast before a batch.
    async fn check_connection(&self) -> Result<(), ClientError>;

    async fn fetch_issue(&self, id: TicketId) -> Result<IssueDocument, ClientError>;

    /// Streams the attachment body into `sink`, returning the byte count.
    async fn download_attachment(
        &self,
        attachment: &AttachmentRef,
        sink: &mut (dyn Write + Send),
    ) -> Result<u64, ClientError>;
}
