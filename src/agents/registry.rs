/// Agent registry using ArcSwap
///
/// Maps each agent kind to its implementation. The registry is constructed once at
/// startup and handed to the engine; reads are lock-free and registration swaps
/// the whole map atomically so in-flight lookups are never blocked.

use crate::agents::traits::Agent;
use crate::agents::types::AgentKind;
use crate::error::{EngineError, EngineResult};
use arc_swap::ArcSwap;
use serde::Serialize;
use std::{collections::HashMap, sync::Arc};

/// Lock-free lookup table from agent kind to agent instance
pub struct AgentRegistry {
    agents: ArcSwap<HashMap<AgentKind, Arc<dyn Agent>>>,
}

/// Catalogue entry exposed on the HTTP surface
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentDescriptor {
    pub kind: AgentKind,
    pub name: String,
    pub description: String,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: ArcSwap::new(Arc::new(HashMap::new())),
        }
    }

    /// Register an agent under its kind, replacing any previous instance
    pub fn register(&self, agent: Arc<dyn Agent>) {
        let kind = agent.kind();
        self.agents.rcu(|current| {
            let mut next = (**current).clone();
            next.insert(kind, Arc::clone(&agent));
            next
        });
        tracing::info!("🤖 Registered agent: {} ({})", agent.name(), kind);
    }

    pub fn get(&self, kind: AgentKind) -> Option<Arc<dyn Agent>> {
        self.agents.load().get(&kind).cloned()
    }

    /// Resolve a raw node kind tag to a registered agent
    pub fn resolve(&self, tag: &str) -> EngineResult<Arc<dyn Agent>> {
        let kind: AgentKind = tag.parse()?;
        self.get(kind)
            .ok_or_else(|| EngineError::UnknownAgentKind(tag.to_string()))
    }

    /// Registered agents ordered by kind
    pub fn list(&self) -> Vec<AgentDescriptor> {
        let agents = self.agents.load();
        let mut descriptors: Vec<AgentDescriptor> = agents
            .iter()
            .map(|(kind, agent)| AgentDescriptor {
                kind: *kind,
                name: agent.name().to_string(),
                description: agent.description().to_string(),
            })
            .collect();
        descriptors.sort_by_key(|d| d.kind);
        descriptors
    }

    pub fn len(&self) -> usize {
        self.agents.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.load().is_empty()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("kinds", &self.agents.load().keys().collect::<Vec<_>>())
            .finish()
    }
}
