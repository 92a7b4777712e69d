//! File-backed session repository

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::repository::{
    AgentRecord, MessageRecord, SessionRecord, SessionRepository, duplicate_agent,
    duplicate_message, duplicate_session, missing_agent, missing_message, missing_session, page,
};
use super::store::{persistence, session_file};
use crate::error::{Result, TollgateError};

/// Everything recorded for one session
#[derive(Debug, Serialize, Deserialize)]
struct SessionDocument {
    session: SessionRecord,
    #[serde(default)]
    agents: BTreeMap<String, AgentRecord>,
    /// Keyed by agent id, in insertion order
    #[serde(default)]
    messages: BTreeMap<String, Vec<MessageRecord>>,
}

impl SessionDocument {
    fn new(session: SessionRecord) -> Self {
        Self {
            session,
            agents: BTreeMap::new(),
            messages: BTreeMap::new(),
        }
    }

    fn agent_messages(&mut self, agent_id: &str) -> Result<&mut Vec<MessageRecord>> {
        if !self.agents.contains_key(agent_id) {
            return Err(missing_agent(&self.session.session_id, agent_id));
        }
        Ok(self.messages.entry(agent_id.to_string()).or_default())
    }
}

/// Repository keeping one pretty-printed JSON document per session.
///
/// Writes are read-modify-write cycles serialized within the process; two
/// processes sharing a directory can still lose each other's updates.
#[derive(Debug)]
pub struct FileRepository {
    directory: PathBuf,
    writes: Mutex<()>,
}

impl FileRepository {
    /// The directory is created on first write
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            writes: Mutex::new(()),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    async fn read(&self, session_id: &str) -> Result<Option<SessionDocument>> {
        let path = session_file(&self.directory, session_id)?;
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(persistence(e)),
        };
        serde_json::from_str(&raw).map(Some).map_err(|e| {
            TollgateError::Session(format!("Session {session_id} is unreadable: {e}"))
        })
    }

    async fn write(&self, document: &SessionDocument) -> Result<()> {
        let path = session_file(&self.directory, &document.session.session_id)?;
        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(persistence)?;
        let json = serde_json::to_string_pretty(document).map_err(persistence)?;
        tokio::fs::write(&path, json).await.map_err(persistence)?;
        tracing::debug!(session = %document.session.session_id, "Wrote session document");
        Ok(())
    }

    /// Apply `f` to an existing session's document and write it back
    async fn modify(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut SessionDocument) -> Result<()> + Send,
    ) -> Result<()> {
        let _guard = self.writes.lock().await;
        let mut document = self
            .read(session_id)
            .await?
            .ok_or_else(|| missing_session(session_id))?;
        f(&mut document)?;
        self.write(&document).await
    }
}

#[async_trait]
impl SessionRepository for FileRepository {
    async fn create_session(&self, session: SessionRecord) -> Result<()> {
        let _guard = self.writes.lock().await;
        if self.read(&session.session_id).await?.is_some() {
            return Err(duplicate_session(&session.session_id));
        }
        self.write(&SessionDocument::new(session)).await
    }

    async fn read_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        Ok(self.read(session_id).await?.map(|document| document.session))
    }

    async fn create_agent(&self, agent: AgentRecord) -> Result<()> {
        let session_id = agent.session_id.clone();
        self.modify(&session_id, |document| {
            if document.agents.contains_key(&agent.agent_id) {
                return Err(duplicate_agent(&agent.session_id, &agent.agent_id));
            }
            document.agents.insert(agent.agent_id.clone(), agent);
            Ok(())
        })
        .await
    }

    async fn read_agent(&self, session_id: &str, agent_id: &str) -> Result<Option<AgentRecord>> {
        Ok(self
            .read(session_id)
            .await?
            .and_then(|mut document| document.agents.remove(agent_id)))
    }

    async fn update_agent(&self, mut agent: AgentRecord) -> Result<()> {
        let session_id = agent.session_id.clone();
        self.modify(&session_id, |document| {
            let Some(slot) = document.agents.get_mut(&agent.agent_id) else {
                return Err(missing_agent(&agent.session_id, &agent.agent_id));
            };
            agent.updated_at = Utc::now();
            *slot = agent;
            Ok(())
        })
        .await
    }

    async fn create_message(&self, message: MessageRecord) -> Result<()> {
        let session_id = message.session_id.clone();
        self.modify(&session_id, |document| {
            let messages = document.agent_messages(&message.agent_id)?;
            if messages.iter().any(|m| m.message_id == message.message_id) {
                return Err(duplicate_message(
                    &message.session_id,
                    &message.agent_id,
                    &message.message_id,
                ));
            }
            messages.push(message);
            Ok(())
        })
        .await
    }

    async fn read_message(
        &self,
        session_id: &str,
        agent_id: &str,
        message_id: &str,
    ) -> Result<Option<MessageRecord>> {
        Ok(self.read(session_id).await?.and_then(|mut document| {
            document
                .messages
                .remove(agent_id)?
                .into_iter()
                .find(|m| m.message_id == message_id)
        }))
    }

    async fn update_message(&self, message: MessageRecord) -> Result<()> {
        let session_id = message.session_id.clone();
        self.modify(&session_id, |document| {
            let slot = document
                .agent_messages(&message.agent_id)?
                .iter_mut()
                .find(|m| m.message_id == message.message_id)
                .ok_or_else(|| missing_message(&message.session_id, &message.message_id))?;
            *slot = message;
            Ok(())
        })
        .await
    }

    async fn list_messages(
        &self,
        session_id: &str,
        agent_id: &str,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<MessageRecord>> {
        let messages = self
            .read(session_id)
            .await?
            .and_then(|mut document| document.messages.remove(agent_id))
            .unwrap_or_default();
        Ok(page(messages, limit, offset))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::llm::Message;

    async fn seeded() -> (TempDir, FileRepository) {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileRepository::new(dir.path().join("sessions"));
        repo.create_session(SessionRecord::new("s1")).await.unwrap();
        repo.create_agent(AgentRecord::new("s1", "a1")).await.unwrap();
        (dir, repo)
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let (dir, repo) = seeded().await;
        repo.update_agent(AgentRecord::new("s1", "a1").with_metadata("role", json!("critic")))
            .await
            .unwrap();
        let first = MessageRecord::new("s1", "a1", Message::user("hello"));
        let first_id = first.message_id.clone();
        repo.create_message(first).await.unwrap();
        repo.create_message(MessageRecord::new("s1", "a1", Message::assistant("hi")))
            .await
            .unwrap();
        assert!(dir.path().join("sessions").join("s1.json").exists());

        let reopened = FileRepository::new(dir.path().join("sessions"));
        assert_eq!(
            reopened.read_session("s1").await.unwrap().unwrap().session_id,
            "s1"
        );
        let agent = reopened.read_agent("s1", "a1").await.unwrap().unwrap();
        assert_eq!(agent.metadata["role"], "critic");

        let texts: Vec<_> = reopened
            .list_messages("s1", "a1", None, 0)
            .await
            .unwrap()
            .iter()
            .map(|m| m.message.text())
            .collect();
        assert_eq!(texts, vec!["hello", "hi"]);
        let page = reopened.list_messages("s1", "a1", Some(1), 1).await.unwrap();
        assert_eq!(page[0].message.text(), "hi");

        let mut record = reopened
            .read_message("s1", "a1", &first_id)
            .await
            .unwrap()
            .unwrap();
        record.message = Message::user("edited");
        reopened.update_message(record).await.unwrap();
        let reread = repo.read_message("s1", "a1", &first_id).await.unwrap().unwrap();
        assert_eq!(reread.message.text(), "edited");
    }

    #[tokio::test]
    async fn test_duplicates_and_missing_records() {
        let (_dir, repo) = seeded().await;

        let err = repo.create_session(SessionRecord::new("s1")).await.unwrap_err();
        assert_eq!(err.to_string(), "Session error: Session s1 already exists");
        let err = repo.create_agent(AgentRecord::new("s1", "a1")).await.unwrap_err();
        assert!(err.to_string().contains("Agent a1 already exists in session s1"));

        let err = repo.create_agent(AgentRecord::new("s9", "a1")).await.unwrap_err();
        assert!(err.to_string().contains("Session s9 does not exist"));
        let err = repo.update_agent(AgentRecord::new("s1", "ghost")).await.unwrap_err();
        assert!(matches!(err, TollgateError::Session(_)));
        let err = repo
            .create_message(MessageRecord::new("s1", "ghost", Message::user("x")))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Agent ghost does not exist"));

        let record = MessageRecord::new("s1", "a1", Message::user("once"));
        repo.create_message(record.clone()).await.unwrap();
        let err = repo.create_message(record).await.unwrap_err();
        assert!(err.to_string().contains("already exists"));

        let stray = MessageRecord::new("s1", "a1", Message::user("never stored"));
        assert!(matches!(
            repo.update_message(stray).await,
            Err(TollgateError::Session(_))
        ));

        assert!(repo.read_session("s9").await.unwrap().is_none());
        assert!(repo.read_agent("s1", "ghost").await.unwrap().is_none());
        assert!(repo.list_messages("s9", "a1", None, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_document_is_session_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.json"), "not json").unwrap();
        let repo = FileRepository::new(dir.path());

        assert!(matches!(
            repo.read_session("broken").await,
            Err(TollgateError::Session(_))
        ));
        assert!(matches!(
            repo.read_session("../escape").await,
            Err(TollgateError::Persistence(_))
        ));
    }
}
