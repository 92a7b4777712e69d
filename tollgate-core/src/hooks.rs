//! Hook bus for agent events
//!
//! Listeners are plain callbacks keyed by [`EventKind`]. Emission is
//! synchronous and fire-and-forget: a panicking listener is caught and
//! logged, and never reaches the agent loop. Containment relies on panics
//! unwinding, so the workspace profiles keep the default panic strategy.
//!
//! # Example
//!
//! ```rust,ignore
//! use tollgate_core::hooks::{HookRegistry, LoggingHook};
//! use tollgate_core::events::EventKind;
//!
//! let hooks = HookRegistry::new();
//! hooks.add_provider(&LoggingHook);
//! let id = hooks.add_callback(EventKind::AfterToolCall, |event| {
//!     println!("{}", event.event_type());
//! });
//! hooks.remove_callback(id);
//! ```

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};

use uuid::Uuid;

use crate::events::{AgentEvent, EventKind};

type Callback = Arc<dyn Fn(&AgentEvent) + Send + Sync>;

/// Handle returned by [`HookRegistry::add_callback`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(Uuid);

struct Listener {
    id: CallbackId,
    /// `None` listens to every kind
    kind: Option<EventKind>,
    callback: Callback,
}

/// Something that installs a group of listeners at once
pub trait HookProvider: Send + Sync {
    fn register_hooks(&self, registry: &HookRegistry);
}

/// Registry of event listeners
#[derive(Default)]
pub struct HookRegistry {
    listeners: RwLock<Vec<Listener>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen to one kind of event
    pub fn add_callback<F>(&self, kind: EventKind, callback: F) -> CallbackId
    where
        F: Fn(&AgentEvent) + Send + Sync + 'static,
    {
        self.insert(Some(kind), Arc::new(callback))
    }

    /// Listen to every event
    pub fn add_listener<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&AgentEvent) + Send + Sync + 'static,
    {
        self.insert(None, Arc::new(callback))
    }

    pub fn add_provider(&self, provider: &dyn HookProvider) {
        provider.register_hooks(self);
    }

    /// Returns false if no listener had this id
    pub fn remove_callback(&self, id: CallbackId) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every matching listener in registration order
    pub fn emit(&self, event: &AgentEvent) {
        let kind = event.kind();
        // Snapshot so listeners may add or remove callbacks while running
        let matching: Vec<Callback> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|l| l.kind.is_none_or(|k| k == kind))
            .map(|l| l.callback.clone())
            .collect();

        for callback in matching {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                tracing::warn!(event = event.event_type(), "Hook listener panicked");
            }
        }
    }

    fn insert(&self, kind: Option<EventKind>, callback: Callback) -> CallbackId {
        let id = CallbackId(Uuid::new_v4());
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Listener { id, kind, callback });
        id
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}

/// Logs every agent event through `tracing`
pub struct LoggingHook;

impl HookProvider for LoggingHook {
    fn register_hooks(&self, registry: &HookRegistry) {
        registry.add_listener(log_event);
    }
}

fn log_event(event: &AgentEvent) {
    match event {
        AgentEvent::InvocationStarted {
            invocation_id,
            agent_name,
            prompt,
            ..
        } => tracing::info!(
            invocation = %invocation_id,
            agent = %agent_name,
            prompt_length = prompt.len(),
            "Invocation started"
        ),
        AgentEvent::InvocationCompleted {
            invocation_id,
            stop_reason,
            error,
            duration_ms,
            ..
        } => match error {
            Some(error) => tracing::info!(
                invocation = %invocation_id,
                error = %error,
                duration_ms,
                "Invocation failed"
            ),
            None => tracing::info!(
                invocation = %invocation_id,
                stop_reason = ?stop_reason,
                duration_ms,
                "Invocation completed"
            ),
        },
        AgentEvent::AfterToolCall {
            invocation_id,
            tool_name,
            success,
            duration_ms,
            ..
        } => tracing::info!(
            invocation = %invocation_id,
            tool = %tool_name,
            success,
            duration_ms,
            "Tool call finished"
        ),
        AgentEvent::Interrupted {
            invocation_id,
            reason,
            ..
        } => tracing::info!(invocation = %invocation_id, reason = %reason, "Invocation interrupted"),
        other => tracing::debug!(
            invocation = %other.invocation_id(),
            event = other.event_type(),
            "Agent event"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Mutex;

    fn delta(text: &str) -> AgentEvent {
        AgentEvent::TextDelta {
            invocation_id: "inv".to_string(),
            delta: text.to_string(),
            timestamp: Utc::now(),
        }
    }

    fn completed() -> AgentEvent {
        AgentEvent::InvocationCompleted {
            invocation_id: "inv".to_string(),
            stop_reason: None,
            error: None,
            duration_ms: 0,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_callbacks_keyed_by_kind() {
        let hooks = HookRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        hooks.add_callback(EventKind::TextDelta, move |event| {
            if let AgentEvent::TextDelta { delta, .. } = event {
                sink.lock().unwrap().push(delta.clone());
            }
        });

        hooks.emit(&delta("a"));
        hooks.emit(&completed());
        hooks.emit(&delta("b"));

        assert_eq!(*seen.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_remove_callback() {
        let hooks = HookRegistry::new();
        let count = Arc::new(Mutex::new(0));

        let c = count.clone();
        let id = hooks.add_listener(move |_| *c.lock().unwrap() += 1);
        hooks.emit(&completed());
        assert!(hooks.remove_callback(id));
        assert!(!hooks.remove_callback(id));
        hooks.emit(&completed());

        assert_eq!(*count.lock().unwrap(), 1);
        assert!(hooks.is_empty());
    }

    #[test]
    fn test_panicking_listener_is_contained() {
        let hooks = HookRegistry::new();
        let reached = Arc::new(Mutex::new(false));

        hooks.add_listener(|_| panic!("listener bug"));
        let r = reached.clone();
        hooks.add_listener(move |_| *r.lock().unwrap() = true);

        hooks.emit(&completed());
        assert!(*reached.lock().unwrap());
    }

    #[test]
    fn test_logging_provider_registers() {
        let hooks = HookRegistry::new();
        hooks.add_provider(&LoggingHook);
        assert_eq!(hooks.len(), 1);
        hooks.emit(&delta("quiet"));
    }
}
