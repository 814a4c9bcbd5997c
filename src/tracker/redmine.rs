use async_trait::async_trait;
use reqwest::Url;
use std::io::Write;
use std::time::Duration;
use tracing::debug;

use super::{classify_status, ClientError, Tracker};
use crate::model::issue::{AttachmentRef, IssueDocument, TicketId};

const API_KEY_HEADER: &str = "X-Redmine-API-Key";
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct RedmineClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl RedmineClient {
    pub fn new(base_url: &str, api_key: String) -> Self {
        Self::with_client(base_url, api_key, reqwest::Client::new())
    }

    pub fn with_client(base_url: &str, api_key: String, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        }
    }

    pub fn issue_url(&self, id: TicketId) -> String {
        format!("{}/issues/{id}.json", self.base_url)
    }

    /// `content_url` when the tracker supplied one, otherwise the standard
    /// download route built from the attachment id.
    pub fn attachment_url(&self, attachment: &AttachmentRef) -> Option<String> {
        attachment.content_url.clone().or_else(|| {
            attachment.id.map(|id| {
                format!(
                    "{}/attachments/download/{id}/{}",
                    self.base_url,
                    urlencoding::encode(&attachment.filename)
                )
            })
        })
    }

    /// The API key only goes to the configured server, never to another
    /// scheme, host or port named in a `content_url`.
    pub fn sends_key_to(&self, url: &Url) -> bool {
        Url::parse(&self.base_url)
            .map(|base| base.origin() == url.origin())
            .unwrap_or(false)
    }

    async fn get(
        &self,
        url: &str,
        query: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<reqwest::Response, ClientError> {
        let url = Url::parse(url).map_err(|e| ClientError::Network(format!("{url}: {e}")))?;
        let with_key = self.sends_key_to(&url);
        debug!(%url, with_key, "GET");

        let mut req = self
            .client
            .get(url)
            .query(query)
            .header("Accept", "application/json")
            .timeout(timeout);
        if with_key {
            req = req.header(API_KEY_HEADER, &self.api_key);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;

        classify_status(resp.status().as_u16())?;
        Ok(resp)
    }
}

#[async_trait]
impl Tracker for RedmineClient {
    fn name(&self) -> &str {
        "Redmine"
    }

    async fn check_connection(&self) -> Result<(), ClientError> {
        let url = format!("{}/projects.json", self.base_url);
        self.get(&url, &[("limit", "1")], PROBE_TIMEOUT).await?;
        Ok(())
    }

    async fn fetch_issue(&self, id: TicketId) -> Result<IssueDocument, ClientError> {
        let url = self.issue_url(id);
        let resp = self
            .get(&url, &[("include", "journals,attachments")], FETCH_TIMEOUT)
            .await?;

        let body = resp
            .bytes()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;
        let value: serde_json::Value =
            serde_json::from_slice(&body).map_err(|e| ClientError::Malformed(e.to_string()))?;
        if !value.is_object() {
            return Err(ClientError::Malformed("expected a JSON object".into()));
        }

        Ok(IssueDocument::new(value))
    }

    async fn download_attachment(
        &self,
        attachment: &AttachmentRef,
        sink: &mut (dyn Write + Send),
    ) -> Result<u64, ClientError> {
        let url = self.attachment_url(attachment).ok_or_else(|| {
            ClientError::Malformed(format!("no download location for {}", attachment.filename))
        })?;
        let mut resp = self.get(&url, &[], DOWNLOAD_TIMEOUT).await?;

        let mut written = 0u64;
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?
        {
            sink.write_all(&chunk).map_err(|e| ClientError::Io(e.to_string()))?;
            written += chunk.len() as u64;
        }
        Ok(written)
    }
}
