use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::issue::{AttachmentRef, IssueDocument, TicketId};
use crate::model::outcome::{AttachmentOutcome, AttachmentReport};
use crate::tracker::Tracker;
use crate::util::fs::{commit, temp_beside, write_atomic};

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to create directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize issue {id}: {source}")]
    Serialize {
        id: TicketId,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved(PathBuf),
    SkippedExisting(PathBuf),
}

/// On-disk layout for fetched tickets:
/// `<root>/issues/<id>.json` and `<root>/attachments/<id>/<filename>`.
pub struct ArtifactStore {
    issues_dir: PathBuf,
    attachments_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        let output_dir = output_dir.into();
        Self {
            issues_dir: output_dir.join("issues"),
            attachments_dir: output_dir.join("attachments"),
        }
    }

    pub fn issues_dir(&self) -> &Path {
        &self.issues_dir
    }

    pub fn attachments_dir(&self) -> &Path {
        &self.attachments_dir
    }

    /// Creates the issues directory. The attachments tree is created lazily,
    /// per ticket, on the first download.
    pub fn prepare(&self) -> Result<(), PersistError> {
        create_dir(&self.issues_dir)
    }

    pub fn issue_path(&self, id: TicketId) -> PathBuf {
        self.issues_dir.join(format!("{id}.json"))
    }

    pub fn attachment_dir(&self, id: TicketId) -> PathBuf {
        self.attachments_dir.join(id.to_string())
    }

    /// `None` when the tracker-supplied name has no usable final component.
    pub fn attachment_path(&self, id: TicketId, filename: &str) -> Option<PathBuf> {
        let name = Path::new(filename).file_name()?;
        Some(self.attachment_dir(id).join(name))
    }

    pub fn save_issue(
        &self,
        id: TicketId,
        doc: &IssueDocument,
        skip_existing: bool,
    ) -> Result<SaveOutcome, PersistError> {
        let path = self.issue_path(id);
        if skip_existing && path.is_file() {
            return Ok(SaveOutcome::SkippedExisting(path));
        }

        let json = doc
            .to_pretty_json()
            .map_err(|source| PersistError::Serialize { id, source })?;
        write_atomic(&path, json.as_bytes()).map_err(|source| PersistError::Write {
            path: path.clone(),
            source,
        })?;
        Ok(SaveOutcome::Saved(path))
    }

    /// Downloads every attachment the document lists, one at a time. A file
    /// already on disk is never fetched again, so the first of two
    /// same-named attachments wins. Failures are reported, never raised.
    pub async fn download_attachments(
        &self,
        tracker: &dyn Tracker,
        id: TicketId,
        doc: &IssueDocument,
    ) -> Vec<AttachmentReport> {
        let mut reports = Vec::new();

        for entry in doc.attachments() {
            let attachment = match entry {
                Ok(a) => a,
                Err(e) => {
                    warn!(ticket = %id, "{e}");
                    reports.push(AttachmentReport::new(
                        "<unknown>",
                        AttachmentOutcome::DownloadFailed(e.to_string()),
                    ));
                    continue;
                }
            };

            let filename = attachment.filename.as_str();
            let Some(path) = self.attachment_path(id, filename) else {
                warn!(ticket = %id, filename, "unusable attachment filename");
                reports.push(AttachmentReport::new(
                    attachment.filename,
                    AttachmentOutcome::DownloadFailed("unusable filename".into()),
                ));
                continue;
            };

            if path.exists() {
                debug!(ticket = %id, filename, "attachment already present, skipping");
                reports.push(AttachmentReport::new(
                    attachment.filename,
                    AttachmentOutcome::SkippedExisting,
                ));
                continue;
            }

            let outcome = match self.fetch_to(tracker, &attachment, &path).await {
                Ok(size) => {
                    info!(ticket = %id, filename, bytes = size, "attachment downloaded");
                    AttachmentOutcome::Downloaded
                }
                Err(reason) => {
                    warn!(ticket = %id, filename, "attachment download failed: {reason}");
                    AttachmentOutcome::DownloadFailed(reason)
                }
            };
            reports.push(AttachmentReport::new(attachment.filename, outcome));
        }

        reports
    }

    async fn fetch_to(
        &self,
        tracker: &dyn Tracker,
        attachment: &AttachmentRef,
        path: &Path,
    ) -> Result<u64, String> {
        if let Some(parent) = path.parent() {
            create_dir(parent).map_err(|e| e.to_string())?;
        }
        let write_failed = |e: std::io::Error| format!("failed to write {}: {e}", path.display());

        let mut tmp = temp_beside(path).map_err(write_failed)?;
        let size = tracker
            .download_attachment(attachment, tmp.as_file_mut())
            .await
            .map_err(|e| e.to_string())?;
        commit(tmp, path).map_err(write_failed)?;
        Ok(size)
    }
}

fn create_dir(path: &Path) -> Result<(), PersistError> {
    std::fs::create_dir_all(path).map_err(|source| PersistError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::io::Write;
    use std::sync::Mutex;

    use crate::tracker::ClientError;

    /// Serves attachment bodies by filename and remembers what was asked for.
    struct FileServer {
        files: HashMap<String, Result<Vec<u8>, ClientError>>,
        requested: Mutex<Vec<String>>,
    }

    impl FileServer {
        fn new(files: &[(&str, Result<&[u8], ClientError>)]) -> Self {
            Self {
                files: files
                    .iter()
                    .map(|(name, r)| (name.to_string(), r.clone().map(|b| b.to_vec())))
                    .collect(),
                requested: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Tracker for FileServer {
        fn name(&self) -> &str {
            "files"
        }

        async fn check_connection(&self) -> Result<(), ClientError> {
            Ok(())
        }

        async fn fetch_issue(&self, _id: TicketId) -> Result<IssueDocument, ClientError> {
            Err(ClientError::NotFound)
        }

        async fn download_attachment(
            &self,
            a: &AttachmentRef,
            sink: &mut (dyn Write + Send),
        ) -> Result<u64, ClientError> {
            self.requested.lock().unwrap().push(a.filename.clone());
            let body = self
                .files
                .get(&a.filename)
                .cloned()
                .unwrap_or(Err(ClientError::NotFound))?;
            sink.write_all(&body).unwrap();
            Ok(body.len() as u64)
        }
    }

    fn id(n: u32) -> TicketId {
        TicketId::new(n).unwrap()
    }

    fn doc_with(attachments: serde_json::Value) -> IssueDocument {
        IssueDocument::new(json!({"issue": {"id": 1, "attachments": attachments}}))
    }

    #[test]
    fn save_issue_writes_pretty_json() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.prepare().unwrap();

        let doc = IssueDocument::new(json!({"issue": {"subject": "件名", "id": 5}}));
        let outcome = store.save_issue(id(5), &doc, false).unwrap();

        let path = dir.path().join("issues").join("5.json");
        assert_eq!(outcome, SaveOutcome::Saved(path.clone()));
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, doc.to_pretty_json().unwrap());
        assert!(written.contains("件名"));
    }

    #[test]
    fn save_issue_respects_skip_existing() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.prepare().unwrap();
        let path = store.issue_path(id(5));
        std::fs::write(&path, "previous run").unwrap();

        let doc = IssueDocument::new(json!({"issue": {"id": 5}}));
        let outcome = store.save_issue(id(5), &doc, true).unwrap();
        assert_eq!(outcome, SaveOutcome::SkippedExisting(path.clone()));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "previous run");

        let outcome = store.save_issue(id(5), &doc, false).unwrap();
        assert_eq!(outcome, SaveOutcome::Saved(path.clone()));
        assert_ne!(std::fs::read_to_string(&path).unwrap(), "previous run");
    }

    #[test]
    fn save_issue_without_prepare_is_a_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let doc = IssueDocument::new(json!({"issue": {"id": 5}}));
        let err = store.save_issue(id(5), &doc, false).unwrap_err();
        assert!(matches!(err, PersistError::Write { .. }));
    }

    #[test]
    fn prepare_fails_when_output_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("out");
        std::fs::write(&file, "").unwrap();
        let store = ArtifactStore::new(&file);
        assert!(matches!(store.prepare(), Err(PersistError::CreateDir { .. })));
    }

    #[test]
    fn attachment_path_strips_directories() {
        let store = ArtifactStore::new("/data");
        assert_eq!(
            store.attachment_path(id(3), "../../etc/passwd"),
            Some(PathBuf::from("/data/attachments/3/passwd"))
        );
        assert_eq!(store.attachment_path(id(3), ".."), None);
    }

    #[tokio::test]
    async fn downloads_attachments_and_reports_failures() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let server = FileServer::new(&[
            ("a.png", Ok(b"png".as_slice())),
            ("c.txt", Ok(b"text".as_slice())),
            ("b.zip", Err(ClientError::Unexpected(500))),
        ]);
        let doc = doc_with(json!([
            {"id": 1, "filename": "a.png"},
            {"id": 2, "filename": "b.zip"},
            {"id": 3, "filename": "c.txt"},
        ]));

        let reports = store.download_attachments(&server, id(7), &doc).await;

        let outcomes: Vec<_> = reports.iter().map(|r| r.outcome.clone()).collect();
        assert_eq!(
            outcomes,
            vec![
                AttachmentOutcome::Downloaded,
                AttachmentOutcome::DownloadFailed("unexpected HTTP status 500".into()),
                AttachmentOutcome::Downloaded,
            ]
        );
        let ticket_dir = dir.path().join("attachments").join("7");
        assert_eq!(std::fs::read(ticket_dir.join("a.png")).unwrap(), b"png");
        assert_eq!(std::fs::read(ticket_dir.join("c.txt")).unwrap(), b"text");
        assert!(!ticket_dir.join("b.zip").exists());
        assert_eq!(std::fs::read_dir(&ticket_dir).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn existing_attachment_is_not_refetched_and_first_name_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let server = FileServer::new(&[("dup.txt", Ok(b"first".as_slice()))]);
        let doc = doc_with(json!([
            {"id": 1, "filename": "dup.txt"},
            {"id": 2, "filename": "dup.txt"},
        ]));

        let reports = store.download_attachments(&server, id(8), &doc).await;

        assert_eq!(reports[0].outcome, AttachmentOutcome::Downloaded);
        assert_eq!(reports[1].outcome, AttachmentOutcome::SkippedExisting);
        assert_eq!(server.requested.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_metadata_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let server = FileServer::new(&[("ok.txt", Ok(b"ok".as_slice()))]);
        let doc = doc_with(json!([
            {"filename": "nameless-and-idless"},
            {"id": 2, "filename": "ok.txt"},
        ]));

        let reports = store.download_attachments(&server, id(9), &doc).await;

        assert!(reports[0].is_failure());
        assert_eq!(reports[1].outcome, AttachmentOutcome::Downloaded);
    }

    #[tokio::test]
    async fn no_attachments_creates_no_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let server = FileServer::new(&[]);

        let reports = store
            .download_attachments(&server, id(10), &doc_with(json!([])))
            .await;

        assert!(reports.is_empty());
        assert!(!store.attachments_dir().exists());
    }
}
