//! Conversation persistence
//!
//! Two layers:
//! - [`MessageStore`]: whole-conversation snapshots keyed by session id,
//!   loaded when an agent is built and saved after every successful turn.
//! - [`SessionRepository`]: record-level storage for sessions, the agents
//!   taking part in them, and their individual messages, kept in memory or
//!   as one JSON document per session.

mod file_repository;
mod repository;
mod store;

pub use file_repository::FileRepository;
pub use repository::{AgentRecord, InMemoryRepository, MessageRecord, SessionRecord, SessionRepository};
pub use store::{FileStore, InMemoryStore, MessageStore};
