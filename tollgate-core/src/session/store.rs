//! Conversation snapshot stores

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use crate::error::{Result, TollgateError};
use crate::llm::Message;

/// Loads and saves a session's full message list
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Messages saved for `session_id`; empty if none were saved
    async fn load(&self, session_id: &str) -> Result<Vec<Message>>;

    /// Replace the saved messages for `session_id`
    async fn save(&self, session_id: &str, messages: &[Message]) -> Result<()>;
}

/// Process-local store
#[derive(Debug, Default)]
pub struct InMemoryStore {
    sessions: RwLock<HashMap<String, Vec<Message>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn load(&self, session_id: &str) -> Result<Vec<Message>> {
        Ok(self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save(&self, session_id: &str, messages: &[Message]) -> Result<()> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id.to_string(), messages.to_vec());
        Ok(())
    }
}

/// One pretty-printed JSON file per session in a directory
#[derive(Debug, Clone)]
pub struct FileStore {
    directory: PathBuf,
}

impl FileStore {
    /// The directory is created on first save
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn file_path(&self, session_id: &str) -> Result<PathBuf> {
        session_file(&self.directory, session_id)
    }
}

/// `<directory>/<session_id>.json`, refusing ids that could leave the directory
pub(super) fn session_file(directory: &Path, session_id: &str) -> Result<PathBuf> {
    let valid = !session_id.is_empty()
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !session_id.starts_with('.');
    if !valid {
        return Err(TollgateError::Persistence(format!(
            "Invalid session id: {session_id:?}"
        )));
    }
    Ok(directory.join(format!("{session_id}.json")))
}

pub(super) fn persistence(e: impl std::fmt::Display) -> TollgateError {
    TollgateError::Persistence(e.to_string())
}

#[async_trait]
impl MessageStore for FileStore {
    async fn load(&self, session_id: &str) -> Result<Vec<Message>> {
        let path = self.file_path(session_id)?;
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(persistence(e)),
        };
        serde_json::from_str(&raw).map_err(persistence)
    }

    async fn save(&self, session_id: &str, messages: &[Message]) -> Result<()> {
        let path = self.file_path(session_id)?;
        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(persistence)?;
        let json = serde_json::to_string_pretty(messages).map_err(persistence)?;
        tokio::fs::write(&path, json).await.map_err(persistence)?;
        tracing::debug!(session = %session_id, messages = messages.len(), "Saved session");
        Ok(())
    }
}
