//! Record-level session repository

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Result, TollgateError};
use crate::llm::Message;

/// A conversation session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Session with a generated id
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }
}

/// An agent taking part in a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub session_id: String,
    pub agent_id: String,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentRecord {
    pub fn new(session_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            agent_id: agent_id.into(),
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// One message written by an agent in a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub session_id: String,
    pub agent_id: String,
    pub message_id: String,
    pub message: Message,
    pub created_at: DateTime<Utc>,
}

impl MessageRecord {
    pub fn new(session_id: impl Into<String>, agent_id: impl Into<String>, message: Message) -> Self {
        Self {
            session_id: session_id.into(),
            agent_id: agent_id.into(),
            message_id: Uuid::new_v4().to_string(),
            message,
            created_at: Utc::now(),
        }
    }
}

/// Storage for sessions, agents and messages.
///
/// Creating a record that exists, or updating one that does not, is a
/// [`TollgateError::Session`]. Reads of missing records return `None`.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create_session(&self, session: SessionRecord) -> Result<()>;

    async fn read_session(&self, session_id: &str) -> Result<Option<SessionRecord>>;

    async fn create_agent(&self, agent: AgentRecord) -> Result<()>;

    async fn read_agent(&self, session_id: &str, agent_id: &str) -> Result<Option<AgentRecord>>;

    async fn update_agent(&self, agent: AgentRecord) -> Result<()>;

    async fn create_message(&self, message: MessageRecord) -> Result<()>;

    async fn read_message(
        &self,
        session_id: &str,
        agent_id: &str,
        message_id: &str,
    ) -> Result<Option<MessageRecord>>;

    async fn update_message(&self, message: MessageRecord) -> Result<()>;

    /// Messages in creation order, skipping `offset` and returning at most
    /// `limit` when given
    async fn list_messages(
        &self,
        session_id: &str,
        agent_id: &str,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<MessageRecord>>;
}

#[derive(Debug)]
struct SessionEntry {
    session: SessionRecord,
    agents: HashMap<String, AgentEntry>,
}

#[derive(Debug)]
struct AgentEntry {
    record: AgentRecord,
    /// Insertion order
    messages: Vec<MessageRecord>,
}

/// Process-local repository
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_agent<T>(
        &self,
        session_id: &str,
        agent_id: &str,
        f: impl FnOnce(&mut AgentEntry) -> Result<T>,
    ) -> Result<T> {
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| missing_session(session_id))?;
        let agent = session
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| missing_agent(session_id, agent_id))?;
        f(agent)
    }
}

pub(super) fn missing_session(session_id: &str) -> TollgateError {
    TollgateError::Session(format!("Session {session_id} does not exist"))
}

pub(super) fn duplicate_session(session_id: &str) -> TollgateError {
    TollgateError::Session(format!("Session {session_id} already exists"))
}

pub(super) fn missing_agent(session_id: &str, agent_id: &str) -> TollgateError {
    TollgateError::Session(format!(
        "Agent {agent_id} does not exist in session {session_id}"
    ))
}

pub(super) fn duplicate_agent(session_id: &str, agent_id: &str) -> TollgateError {
    TollgateError::Session(format!(
        "Agent {agent_id} already exists in session {session_id}"
    ))
}

pub(super) fn duplicate_message(
    session_id: &str,
    agent_id: &str,
    message_id: &str,
) -> TollgateError {
    TollgateError::Session(format!(
        "Message {message_id} already exists in agent {agent_id} in session {session_id}"
    ))
}

pub(super) fn missing_message(session_id: &str, message_id: &str) -> TollgateError {
    TollgateError::Session(format!(
        "Message {message_id} does not exist in session {session_id}"
    ))
}

/// Messages ordered by creation time, then paged
pub(super) fn page(
    mut messages: Vec<MessageRecord>,
    limit: Option<usize>,
    offset: usize,
) -> Vec<MessageRecord> {
    // Stable, so equal timestamps keep insertion order
    messages.sort_by_key(|m| m.created_at);
    messages
        .into_iter()
        .skip(offset)
        .take(limit.unwrap_or(usize::MAX))
        .collect()
}

#[async_trait]
impl SessionRepository for InMemoryRepository {
    async fn create_session(&self, session: SessionRecord) -> Result<()> {
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if sessions.contains_key(&session.session_id) {
            return Err(duplicate_session(&session.session_id));
        }
        sessions.insert(
            session.session_id.clone(),
            SessionEntry {
                session,
                agents: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn read_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        Ok(self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .map(|entry| entry.session.clone()))
    }

    async fn create_agent(&self, agent: AgentRecord) -> Result<()> {
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let session = sessions
            .get_mut(&agent.session_id)
            .ok_or_else(|| missing_session(&agent.session_id))?;
        if session.agents.contains_key(&agent.agent_id) {
            return Err(duplicate_agent(&agent.session_id, &agent.agent_id));
        }
        session.agents.insert(
            agent.agent_id.clone(),
            AgentEntry {
                record: agent,
                messages: Vec::new(),
            },
        );
        Ok(())
    }

    async fn read_agent(&self, session_id: &str, agent_id: &str) -> Result<Option<AgentRecord>> {
        Ok(self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .and_then(|entry| entry.agents.get(agent_id))
            .map(|agent| agent.record.clone()))
    }

    async fn update_agent(&self, mut agent: AgentRecord) -> Result<()> {
        let (session_id, agent_id) = (agent.session_id.clone(), agent.agent_id.clone());
        self.with_agent(&session_id, &agent_id, |entry| {
            agent.updated_at = Utc::now();
            entry.record = agent;
            Ok(())
        })
    }

    async fn create_message(&self, message: MessageRecord) -> Result<()> {
        let (session_id, agent_id) = (message.session_id.clone(), message.agent_id.clone());
        self.with_agent(&session_id, &agent_id, |entry| {
            if entry
                .messages
                .iter()
                .any(|m| m.message_id == message.message_id)
            {
                return Err(duplicate_message(
                    &session_id,
                    &agent_id,
                    &message.message_id,
                ));
            }
            entry.messages.push(message);
            Ok(())
        })
    }

    async fn read_message(
        &self,
        session_id: &str,
        agent_id: &str,
        message_id: &str,
    ) -> Result<Option<MessageRecord>> {
        Ok(self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .and_then(|entry| entry.agents.get(agent_id))
            .and_then(|agent| agent.messages.iter().find(|m| m.message_id == message_id))
            .cloned())
    }

    async fn update_message(&self, message: MessageRecord) -> Result<()> {
        let (session_id, agent_id) = (message.session_id.clone(), message.agent_id.clone());
        self.with_agent(&session_id, &agent_id, |entry| {
            let slot = entry
                .messages
                .iter_mut()
                .find(|m| m.message_id == message.message_id)
                .ok_or_else(|| missing_message(&session_id, &message.message_id))?;
            *slot = message;
            Ok(())
        })
    }

    async fn list_messages(
        &self,
        session_id: &str,
        agent_id: &str,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<MessageRecord>> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        let Some(agent) = sessions
            .get(session_id)
            .and_then(|entry| entry.agents.get(agent_id))
        else {
            return Ok(Vec::new());
        };

        Ok(page(agent.messages.clone(), limit, offset))
    }
}
