//! # Cloud sync
//!
//! Whole-artifact backup and restore of a user's notes and index files to a
//! per-user document store. There is no delta sync: backup uploads every
//! artifact that exists locally, restore downloads every artifact and
//! overwrites the local copy.
//!
//! ## Document layout
//! ```text
//! users/<uid>/notes/notes_txt           {"text": "...", "timestamp": "..."}
//! users/<uid>/vectorstore/index.bin     {"content_b64": "...", "timestamp": "..."}
//! users/<uid>/vectorstore/index.yaml    {"content_b64": "...", "timestamp": "..."}
//! ```
//!
//! Restore reports each artifact on its own; a failure restoring the notes
//! does not stop the index files from being attempted, and vice versa.

use std::fmt;
use std::fs;
use std::path::PathBuf;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::CloudConfig;
use crate::error::{Error, Result};
use crate::notebook::NoteStore;
use crate::session::UserSession;
use crate::vector_store::{INDEX_FILES, write_atomically};

/// Key/value store of JSON documents addressed by slash-separated paths.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn put(&self, path: &str, document: &Value) -> Result<()>;

    /// `Ok(None)` when no document exists at `path`.
    async fn get(&self, path: &str) -> Result<Option<Value>>;
}

/// Build the store described by `config`.
///
/// # Errors
/// [`Error::Config`] unless exactly one of `base_url` or `local_dir` is set.
pub fn store_from_config(config: &CloudConfig) -> Result<Box<dyn DocumentStore>> {
    match (&config.base_url, &config.local_dir) {
        (Some(url), None) => Ok(Box::new(HttpDocumentStore::new(
            url.clone(),
            config.token.clone(),
        ))),
        (None, Some(dir)) => Ok(Box::new(LocalDocumentStore::new(dir.clone()))),
        _ => Err(Error::Config(
            "cloud needs exactly one of base_url or local_dir".to_string(),
        )),
    }
}

/// Documents stored as `<root>/<path>.json`.
pub struct LocalDocumentStore {
    root: PathBuf,
}

impl LocalDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn file_for(&self, path: &str) -> PathBuf {
        let mut file = self.root.clone();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            file.push(segment);
        }
        let extension = match file.extension() {
            Some(ext) => format!("{}.json", ext.to_string_lossy()),
            None => "json".to_string(),
        };
        file.set_extension(extension);
        file
    }
}

#[async_trait]
impl DocumentStore for LocalDocumentStore {
    async fn put(&self, path: &str, document: &Value) -> Result<()> {
        let file = self.file_for(path);
        if let Some(dir) = file.parent() {
            fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
        }
        let bytes = serde_json::to_vec_pretty(document)?;
        write_atomically(&file, &bytes)
    }

    async fn get(&self, path: &str) -> Result<Option<Value>> {
        let file = self.file_for(path);
        match fs::read(&file) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(&file, e)),
        }
    }
}

/// REST document store: `PUT`/`GET {base_url}/{path}` with JSON bodies.
pub struct HttpDocumentStore {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpDocumentStore {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
    async fn put(&self, path: &str, document: &Value) -> Result<()> {
        let request = self.client.put(self.url(path)).json(document);
        self.authorize(request).send().await?.error_for_status()?;
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<Value>> {
        let response = self.authorize(self.client.get(self.url(path))).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let document = response.error_for_status()?.json::<Value>().await?;
        Ok(Some(document))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotesDocument {
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexFileDocument {
    pub content_b64: String,
    pub timestamp: DateTime<Utc>,
}

pub fn notes_document_path(uid: &str) -> String {
    format!("users/{uid}/notes/notes_txt")
}

pub fn index_document_path(uid: &str, file: &str) -> String {
    format!("users/{uid}/vectorstore/{file}")
}

/// What a backup uploaded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackupReport {
    pub notes: bool,
    pub index_files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RestoreOutcome {
    Restored,
    /// Nothing stored remotely for this artifact.
    Missing,
    Failed(String),
}

impl fmt::Display for RestoreOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestoreOutcome::Restored => write!(f, "restored"),
            RestoreOutcome::Missing => write!(f, "not found in backup"),
            RestoreOutcome::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RestoreReport {
    pub notes: RestoreOutcome,
    pub index_files: Vec<(String, RestoreOutcome)>,
}

impl RestoreReport {
    /// True when every artifact was restored.
    pub fn is_complete(&self) -> bool {
        self.notes == RestoreOutcome::Restored
            && self
                .index_files
                .iter()
                .all(|(_, outcome)| *outcome == RestoreOutcome::Restored)
    }
}

pub struct CloudSync<'a> {
    store: &'a dyn DocumentStore,
    session: &'a UserSession,
}

impl<'a> CloudSync<'a> {
    pub fn new(store: &'a dyn DocumentStore, session: &'a UserSession) -> Self {
        Self { store, session }
    }

    /// Upload the notes and both index files, skipping any that do not exist.
    ///
    /// # Errors
    /// The first read or upload failure aborts the backup.
    pub async fn backup(&self) -> Result<BackupReport> {
        let uid = &self.session.uid;
        let mut report = BackupReport::default();

        if self.session.notes_path.is_file() {
            let text = NoteStore::new(&self.session.notes_path).load()?;
            let document = NotesDocument {
                text,
                timestamp: Utc::now(),
            };
            self.store
                .put(&notes_document_path(uid), &serde_json::to_value(&document)?)
                .await?;
            report.notes = true;
            debug!("Uploaded notes for {uid}");
        }

        for file in INDEX_FILES {
            let path = self.session.index_dir.join(file);
            if !path.is_file() {
                continue;
            }
            let bytes = fs::read(&path).map_err(|e| Error::io(&path, e))?;
            let document = IndexFileDocument {
                content_b64: STANDARD.encode(bytes),
                timestamp: Utc::now(),
            };
            self.store
                .put(
                    &index_document_path(uid, file),
                    &serde_json::to_value(&document)?,
                )
                .await?;
            report.index_files.push(file.to_string());
            debug!("Uploaded {file} for {uid}");
        }

        info!(
            "Backup for {uid}: notes={}, index files={:?}",
            report.notes, report.index_files
        );
        Ok(report)
    }

    /// Download every artifact and overwrite the local copies.
    pub async fn restore(&self) -> RestoreReport {
        let notes = outcome(self.restore_notes().await);
        if let RestoreOutcome::Failed(reason) = &notes {
            warn!("Restoring notes failed: {reason}");
        }

        let mut index_files = Vec::with_capacity(INDEX_FILES.len());
        for file in INDEX_FILES {
            let result = outcome(self.restore_index_file(file).await);
            if let RestoreOutcome::Failed(reason) = &result {
                warn!("Restoring {file} failed: {reason}");
            }
            index_files.push((file.to_string(), result));
        }

        info!("Restore for {}: notes {}", self.session.uid, notes);
        RestoreReport { notes, index_files }
    }

    async fn restore_notes(&self) -> Result<bool> {
        let Some(value) = self.store.get(&notes_document_path(&self.session.uid)).await? else {
            return Ok(false);
        };
        let document: NotesDocument = serde_json::from_value(value)?;
        NoteStore::new(&self.session.notes_path).save(&document.text)?;
        Ok(true)
    }

    async fn restore_index_file(&self, file: &str) -> Result<bool> {
        let Some(value) = self
            .store
            .get(&index_document_path(&self.session.uid, file))
            .await?
        else {
            return Ok(false);
        };
        let document: IndexFileDocument = serde_json::from_value(value)?;
        let bytes = STANDARD
            .decode(document.content_b64.as_bytes())
            .map_err(|e| Error::Cloud(format!("{file} is not valid base64: {e}")))?;

        let dir = &self.session.index_dir;
        fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
        write_atomically(&dir.join(file), &bytes)?;
        Ok(true)
    }
}

fn outcome(result: Result<bool>) -> RestoreOutcome {
    match result {
        Ok(true) => RestoreOutcome::Restored,
        Ok(false) => RestoreOutcome::Missing,
        Err(e) => RestoreOutcome::Failed(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::Chunker;
    use crate::embeddings::HashingEmbedder;
    use crate::notebook::Notebook;
    use crate::vector_store::{VECTORS_FILE, VectorIndex};
    use httpmock::prelude::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn notebook(root: &std::path::Path) -> Notebook {
        Notebook::new(
            UserSession::new(root, "backup-user").unwrap(),
            Chunker::new(2000, 300).unwrap(),
            Arc::new(HashingEmbedder::new(32)),
            Duration::from_secs(30),
        )
    }

    #[tokio::test]
    async fn test_backup_then_restore_on_another_machine() {
        let remote = tempfile::tempdir().unwrap();
        let store = LocalDocumentStore::new(remote.path());

        let laptop = tempfile::tempdir().unwrap();
        let source = notebook(laptop.path());
        source.save_notes("Use SCPs to restrict member accounts.").unwrap();

        let report = CloudSync::new(&store, source.session()).backup().await.unwrap();
        assert!(report.notes);
        assert_eq!(report.index_files.len(), 2);

        let desktop = tempfile::tempdir().unwrap();
        let target = notebook(desktop.path());
        let restored = CloudSync::new(&store, target.session()).restore().await;
        assert!(restored.is_complete());

        assert_eq!(
            target.load_notes().unwrap(),
            "Use SCPs to restrict member accounts."
        );
        let index = VectorIndex::load(&target.session().index_dir, 32).unwrap();
        assert_eq!(index.len(), 1);
        assert!(!target.is_stale().unwrap());
    }

    #[tokio::test]
    async fn test_backup_skips_missing_artifacts() {
        let remote = tempfile::tempdir().unwrap();
        let store = LocalDocumentStore::new(remote.path());
        let local = tempfile::tempdir().unwrap();
        let session = UserSession::new(local.path(), "nobody").unwrap();

        let report = CloudSync::new(&store, &session).backup().await.unwrap();
        assert_eq!(report, BackupReport::default());
    }

    #[tokio::test]
    async fn test_restore_reports_each_artifact_independently() {
        let remote = tempfile::tempdir().unwrap();
        let store = LocalDocumentStore::new(remote.path());
        let local = tempfile::tempdir().unwrap();
        let session = UserSession::new(local.path(), "u1").unwrap();

        store
            .put(&notes_document_path("u1"), &json!({ "unexpected": true }))
            .await
            .unwrap();
        store
            .put(
                &index_document_path("u1", VECTORS_FILE),
                &serde_json::to_value(IndexFileDocument {
                    content_b64: STANDARD.encode(b"vector bytes"),
                    timestamp: Utc::now(),
                })
                .unwrap(),
            )
            .await
            .unwrap();

        let report = CloudSync::new(&store, &session).restore().await;
        assert!(matches!(report.notes, RestoreOutcome::Failed(_)));
        assert_eq!(report.index_files[0].1, RestoreOutcome::Restored);
        assert_eq!(report.index_files[1].1, RestoreOutcome::Missing);
        assert!(!report.is_complete());
        assert_eq!(
            fs::read(session.index_dir.join(VECTORS_FILE)).unwrap(),
            b"vector bytes"
        );
    }

    #[test]
    fn test_local_store_paths_keep_file_extensions() {
        let store = LocalDocumentStore::new("/remote");
        assert_eq!(
            store.file_for("users/a/vectorstore/index.bin"),
            PathBuf::from("/remote/users/a/vectorstore/index.bin.json")
        );
        assert_eq!(
            store.file_for("users/a/notes/notes_txt"),
            PathBuf::from("/remote/users/a/notes/notes_txt.json")
        );
    }

    #[tokio::test]
    async fn test_http_store_get_and_put() {
        let server = MockServer::start_async().await;
        let found = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/users/a/notes/notes_txt")
                    .header("authorization", "Bearer secret");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(json!({ "text": "hi", "timestamp": "2024-01-01T00:00:00Z" }));
            })
            .await;
        let missing = server
            .mock_async(|when, then| {
                when.method(GET).path("/users/a/vectorstore/index.bin");
                then.status(404);
            })
            .await;
        let upload = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/users/a/vectorstore/index.yaml")
                    .header("authorization", "Bearer secret");
                then.status(200);
            })
            .await;

        let store = HttpDocumentStore::new(server.base_url(), Some("secret".to_string()));

        let doc = store.get("users/a/notes/notes_txt").await.unwrap().unwrap();
        let notes: NotesDocument = serde_json::from_value(doc).unwrap();
        assert_eq!(notes.text, "hi");
        assert!(store.get("users/a/vectorstore/index.bin").await.unwrap().is_none());
        store
            .put("users/a/vectorstore/index.yaml", &json!({ "content_b64": "" }))
            .await
            .unwrap();

        found.assert_async().await;
        missing.assert_async().await;
        upload.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_store_server_error_is_reported() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET);
                then.status(500);
            })
            .await;
        let store = HttpDocumentStore::new(server.base_url(), None);
        assert!(matches!(
            store.get("users/a/notes/notes_txt").await,
            Err(Error::Http(_))
        ));
    }

    #[test]
    fn test_store_from_config_requires_one_target() {
        assert!(store_from_config(&CloudConfig::default()).is_err());
        let local = CloudConfig {
            local_dir: Some(PathBuf::from("/tmp/backup")),
            ..CloudConfig::default()
        };
        assert!(store_from_config(&local).is_ok());
    }
}
