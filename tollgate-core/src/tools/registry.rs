//! Tool Registry for tool registration and lookup
//!
//! The `ToolRegistry` provides:
//! - Tool registration with duplicate detection
//! - Lookup by name
//! - Tool definitions for model requests
//!
//! # Example
//!
//! ```rust,ignore
//! use tollgate_core::tools::{FnTool, ToolRegistry};
//!
//! let registry = ToolRegistry::new();
//! registry.register(Arc::new(FnTool::new("search", search)))?;
//!
//! let tool = registry.fetch("search").unwrap();
//! let defs = registry.definitions();
//! ```
//!
//! The registry is shared read-mostly between agents; registration takes a
//! short write lock and is expected during setup.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::tool::{Tool, ToolDefinition};
use crate::error::TollgateError;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Tool with this name already exists
    DuplicateTool(String),
    /// Tool not found
    NotFound(String),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::DuplicateTool(name) => {
                write!(f, "Tool '{}' is already registered", name)
            }
            RegistryError::NotFound(name) => {
                write!(f, "Unknown tool: {}", name)
            }
        }
    }
}

impl std::error::Error for RegistryError {}

impl From<RegistryError> for TollgateError {
    fn from(err: RegistryError) -> Self {
        TollgateError::Tool(err.to_string())
    }
}

/// Registry of callable tools, keyed by name
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<BTreeMap<String, Arc<dyn Tool>>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool
    ///
    /// Returns an error if a tool with the same name is already registered.
    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        let mut tools = self.tools.write().unwrap_or_else(PoisonError::into_inner);
        if tools.contains_key(&name) {
            return Err(RegistryError::DuplicateTool(name));
        }
        tools.insert(name, tool);
        Ok(())
    }

    /// Register multiple tools at once
    ///
    /// Stops at the first duplicate; tools before it stay registered.
    pub fn register_all(
        &self,
        tools: impl IntoIterator<Item = Arc<dyn Tool>>,
    ) -> Result<(), RegistryError> {
        for tool in tools {
            self.register(tool)?;
        }
        Ok(())
    }

    /// Unregister a tool by name
    pub fn unregister(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    /// Look up a tool by name
    pub fn fetch(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Look up a tool, failing with a tool error when it is unknown
    pub fn require(&self, name: &str) -> Result<Arc<dyn Tool>, RegistryError> {
        self.fetch(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Check if a tool is registered
    pub fn contains(&self, name: &str) -> bool {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Registered tool names, sorted
    pub fn names(&self) -> Vec<String> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Definitions for every registered tool, sorted by name
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|tool| tool.definition())
            .collect()
    }

    /// Get the number of registered tools
    pub fn len(&self) -> usize {
        self.tools.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
