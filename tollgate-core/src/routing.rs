//! Multi-Agent Routing
//!
//! Dispatch prompts across several named agents.
//!
//! - [`Router`]: picks one agent name for a prompt
//! - [`KeywordRouter`]: first matching keyword wins, else a default
//! - [`ScoringRouter`]: agent with the most matching keywords wins
//! - [`MultiAgent`]: routes one prompt to one agent, or broadcasts to all
//! - [`AgentGraph`]: passes output from node to node along edges

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::agent::Agent;
use crate::error::{Result, TollgateError};

/// Default bound on steps taken by an [`AgentGraph`] run
pub const DEFAULT_MAX_GRAPH_STEPS: usize = 16;

/// Anything that answers a prompt with text
#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(&self, prompt: &str) -> Result<String>;
}

#[async_trait]
impl Responder for Agent {
    async fn respond(&self, prompt: &str) -> Result<String> {
        self.call(prompt).await
    }
}

/// Chooses which named agent handles a prompt
pub trait Router: Send + Sync {
    /// Return one of `agents`
    fn route(&self, prompt: &str, agents: &[&str]) -> Result<String>;
}

fn no_route() -> TollgateError {
    TollgateError::Routing("No agent found for route".to_string())
}

/// Routes on the first keyword the prompt contains, ignoring case
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeywordRouter {
    routes: Vec<(String, String)>,
    default: Option<String>,
}

impl KeywordRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send prompts containing `keyword` to `agent`. Earlier routes win.
    pub fn route_to(mut self, keyword: impl Into<String>, agent: impl Into<String>) -> Self {
        self.routes.push((keyword.into().to_lowercase(), agent.into()));
        self
    }

    /// Agent used when no keyword matches
    pub fn with_default(mut self, agent: impl Into<String>) -> Self {
        self.default = Some(agent.into());
        self
    }
}

impl Router for KeywordRouter {
    fn route(&self, prompt: &str, agents: &[&str]) -> Result<String> {
        let prompt = prompt.to_lowercase();
        let target = self
            .routes
            .iter()
            .find(|(keyword, _)| prompt.contains(keyword.as_str()))
            .map(|(_, agent)| agent)
            .or(self.default.as_ref())
            .ok_or_else(no_route)?;

        if agents.contains(&target.as_str()) {
            Ok(target.clone())
        } else {
            Err(no_route())
        }
    }
}

/// Scores each agent by how many of its keywords the prompt contains.
///
/// Ties go to the agent listed first; agents without keywords score zero.
#[derive(Debug, Clone, Default)]
pub struct ScoringRouter {
    keywords: HashMap<String, Vec<String>>,
}

impl ScoringRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keywords<I, S>(mut self, agent: impl Into<String>, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords.insert(
            agent.into(),
            keywords
                .into_iter()
                .map(|k| k.into().to_lowercase())
                .collect(),
        );
        self
    }

    fn score(&self, prompt: &str, agent: &str) -> usize {
        self.keywords.get(agent).map_or(0, |keywords| {
            keywords
                .iter()
                .filter(|k| prompt.contains(k.as_str()))
                .count()
        })
    }
}

impl Router for ScoringRouter {
    fn route(&self, prompt: &str, agents: &[&str]) -> Result<String> {
        let prompt = prompt.to_lowercase();
        let mut best: Option<(&str, usize)> = None;
        for &agent in agents {
            let score = self.score(&prompt, agent);
            if best.is_none_or(|(_, top)| score > top) {
                best = Some((agent, score));
            }
        }
        best.map(|(agent, _)| agent.to_string())
            .ok_or_else(|| TollgateError::Routing("No agents configured".to_string()))
    }
}

/// A set of named agents behind one entry point
#[derive(Default)]
pub struct MultiAgent {
    agents: Vec<(String, Arc<dyn Responder>)>,
    router: Option<Arc<dyn Router>>,
}

impl fmt::Debug for MultiAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiAgent")
            .field("agents", &self.names())
            .field("routed", &self.router.is_some())
            .finish()
    }
}

impl MultiAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn agent(mut self, name: impl Into<String>, agent: Arc<dyn Responder>) -> Self {
        self.agents.push((name.into(), agent));
        self
    }

    pub fn router(mut self, router: Arc<dyn Router>) -> Self {
        self.router = Some(router);
        self
    }

    /// Agent names in registration order
    pub fn names(&self) -> Vec<&str> {
        self.agents.iter().map(|(name, _)| name.as_str()).collect()
    }

    fn lookup(&self, name: &str) -> Result<&Arc<dyn Responder>> {
        self.agents
            .iter()
            .find(|(candidate, _)| candidate == name)
            .map(|(_, agent)| agent)
            .ok_or_else(no_route)
    }

    /// Ask the routed agent, or the first agent when there is no router
    pub async fn call(&self, prompt: &str) -> Result<String> {
        let Some((first, _)) = self.agents.first() else {
            return Err(TollgateError::Routing("No agents configured".to_string()));
        };
        let target = match &self.router {
            Some(router) => router.route(prompt, &self.names())?,
            None => first.clone(),
        };
        debug!(agent = %target, "Routing prompt");
        self.lookup(&target)?.respond(prompt).await
    }

    /// Ask every agent in registration order; the first failure aborts
    pub async fn broadcast(&self, prompt: &str) -> Result<Vec<String>> {
        let mut answers = Vec::with_capacity(self.agents.len());
        for (_, agent) in &self.agents {
            answers.push(agent.respond(prompt).await?);
        }
        Ok(answers)
    }
}

/// How a graph node picks its successor
#[derive(Clone)]
pub enum Edge {
    /// Always continue to the named node
    To(String),
    /// Decide from the node's output; `None` ends the run
    Dynamic(Arc<dyn Fn(&str) -> Option<String> + Send + Sync>),
}

impl fmt::Debug for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Edge::To(node) => f.debug_tuple("To").field(node).finish(),
            Edge::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// Final output of a graph run and the nodes it passed through
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphOutcome {
    pub output: String,
    pub visited: Vec<String>,
}

/// Agents wired into a directed graph.
///
/// Each node's output becomes the next node's prompt. A router, when set,
/// replaces the edges: its pick is the next node, and a routing failure
/// ends the run.
pub struct AgentGraph {
    nodes: HashMap<String, Arc<dyn Responder>>,
    edges: HashMap<String, Edge>,
    router: Option<Arc<dyn Router>>,
    max_steps: usize,
}

impl Default for AgentGraph {
    fn default() -> Self {
        Self {
            nodes: HashMap::new(),
            edges: HashMap::new(),
            router: None,
            max_steps: DEFAULT_MAX_GRAPH_STEPS,
        }
    }
}

impl fmt::Debug for AgentGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentGraph")
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .field("edges", &self.edges)
            .field("max_steps", &self.max_steps)
            .finish()
    }
}

impl AgentGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(mut self, name: impl Into<String>, agent: Arc<dyn Responder>) -> Self {
        self.nodes.insert(name.into(), agent);
        self
    }

    pub fn edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.insert(from.into(), Edge::To(to.into()));
        self
    }

    pub fn dynamic_edge<F>(mut self, from: impl Into<String>, next: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.edges.insert(from.into(), Edge::Dynamic(Arc::new(next)));
        self
    }

    pub fn router(mut self, router: Arc<dyn Router>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    fn next_node(&self, current: &str, output: &str) -> Option<String> {
        if let Some(router) = &self.router {
            let names: Vec<&str> = self.nodes.keys().map(String::as_str).collect();
            return router.route(output, &names).ok();
        }
        match self.edges.get(current)? {
            Edge::To(next) => Some(next.clone()),
            Edge::Dynamic(next) => next(output),
        }
    }

    /// Run from `start` until a node has no successor
    pub async fn run(&self, start: &str, prompt: &str) -> Result<GraphOutcome> {
        if !self.nodes.contains_key(start) {
            return Err(TollgateError::Routing("Unknown start node".to_string()));
        }

        let mut current = start.to_string();
        let mut output = prompt.to_string();
        let mut visited = Vec::new();

        loop {
            if visited.len() == self.max_steps {
                return Err(TollgateError::Routing(format!(
                    "Graph exceeded {} steps",
                    self.max_steps
                )));
            }
            let agent = self.nodes.get(&current).ok_or_else(|| {
                TollgateError::Routing(format!("No agent for node {current}"))
            })?;
            debug!(node = %current, step = visited.len() + 1, "Running graph node");
            output = agent.respond(&output).await?;
            visited.push(current.clone());

            match self.next_node(&current, &output) {
                Some(next) => current = next,
                None => break,
            }
        }

        Ok(GraphOutcome { output, visited })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo(&'static str);

    #[async_trait]
    impl Responder for Echo {
        async fn respond(&self, prompt: &str) -> Result<String> {
            Ok(format!("{}: {}", self.0, prompt))
        }
    }

    struct Broken;

    #[async_trait]
    impl Responder for Broken {
        async fn respond(&self, _prompt: &str) -> Result<String> {
            Err(TollgateError::Provider("down".into()))
        }
    }

    fn pair() -> MultiAgent {
        MultiAgent::new()
            .agent("general", Arc::new(Echo("a1")))
            .agent("billing", Arc::new(Echo("a2")))
    }

    #[test]
    fn test_keyword_router() {
        let router = KeywordRouter::new()
            .route_to("Billing", "billing")
            .with_default("general");
        let agents = ["general", "billing"];

        assert_eq!(router.route("BILLING issue", &agents).unwrap(), "billing");
        assert_eq!(router.route("general", &agents).unwrap(), "general");
    }

    #[test]
    fn test_keyword_router_without_match() {
        let router = KeywordRouter::new().route_to("billing", "billing");
        let err = router.route("weather", &["billing"]).unwrap_err();
        assert!(matches!(err, TollgateError::Routing(ref m) if m == "No agent found for route"));

        let dangling = KeywordRouter::new().route_to("billing", "accounts");
        assert!(dangling.route("billing", &["billing"]).is_err());
    }

    #[test]
    fn test_scoring_router() {
        let router = ScoringRouter::new()
            .keywords("weather", ["rain", "sun", "forecast"])
            .keywords("sports", ["match", "score"]);
        let agents = ["sports", "weather"];

        assert_eq!(
            router.route("Rain forecast for the match", &agents).unwrap(),
            "weather"
        );
        assert_eq!(router.route("hello", &agents).unwrap(), "sports");
        assert!(router.route("hello", &[]).is_err());
    }

    #[tokio::test]
    async fn test_multi_agent_routing() {
        let multi = pair().router(Arc::new(
            KeywordRouter::new()
                .route_to("billing", "billing")
                .with_default("general"),
        ));
        assert_eq!(multi.call("billing question").await.unwrap(), "a2: billing question");
        assert_eq!(multi.call("hello").await.unwrap(), "a1: hello");
    }

    #[tokio::test]
    async fn test_multi_agent_defaults_to_first() {
        assert_eq!(pair().call("ping").await.unwrap(), "a1: ping");

        let err = MultiAgent::new().call("ping").await.unwrap_err();
        assert!(matches!(err, TollgateError::Routing(_)));
    }

    #[tokio::test]
    async fn test_multi_agent_broadcast() {
        assert_eq!(
            pair().broadcast("ping").await.unwrap(),
            vec!["a1: ping".to_string(), "a2: ping".to_string()]
        );

        let failing = pair().agent("broken", Arc::new(Broken));
        assert!(matches!(
            failing.broadcast("ping").await,
            Err(TollgateError::Provider(_))
        ));
    }

    #[tokio::test]
    async fn test_graph_follows_edges() {
        let graph = AgentGraph::new()
            .node("draft", Arc::new(Echo("draft")))
            .node("review", Arc::new(Echo("review")))
            .edge("draft", "review");

        let outcome = graph.run("draft", "essay").await.unwrap();
        assert_eq!(outcome.output, "review: draft: essay");
        assert_eq!(outcome.visited, ["draft", "review"]);
    }

    #[tokio::test]
    async fn test_graph_dynamic_edge_and_limits() {
        let graph = AgentGraph::new()
            .node("loop", Arc::new(Echo("x")))
            .dynamic_edge("loop", |output| {
                (output.matches("x:").count() < 3).then(|| "loop".to_string())
            });
        let outcome = graph.run("loop", "go").await.unwrap();
        assert_eq!(outcome.visited.len(), 3);

        let endless = AgentGraph::new()
            .node("a", Arc::new(Echo("a")))
            .edge("a", "a")
            .max_steps(4);
        let err = endless.run("a", "go").await.unwrap_err();
        assert!(matches!(err, TollgateError::Routing(ref m) if m.contains("4 steps")));

        let dangling = AgentGraph::new().node("a", Arc::new(Echo("a"))).edge("a", "b");
        let err = dangling.run("a", "go").await.unwrap_err();
        assert!(matches!(err, TollgateError::Routing(ref m) if m == "No agent for node b"));

        assert!(AgentGraph::new().run("missing", "go").await.is_err());
    }
}
