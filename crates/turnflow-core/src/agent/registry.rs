//! Immutable name -> agent lookup table built once at start-up.

use std::collections::HashMap;
use std::sync::Arc;

use super::{Agent, BoxAgent};

/// Registered agents, in registration order.
///
/// Built with [`AgentRegistry::builder`] and then shared read-only as
/// `Arc<AgentRegistry>`.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    order: Vec<String>,
    agents: HashMap<String, Arc<BoxAgent>>,
}

impl AgentRegistry {
    pub fn builder() -> AgentRegistryBuilder {
        AgentRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<BoxAgent>> {
        self.agents.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    /// Agent names in registration order.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Collects agents before freezing them into an [`AgentRegistry`].
#[derive(Default)]
pub struct AgentRegistryBuilder {
    order: Vec<String>,
    agents: HashMap<String, Arc<BoxAgent>>,
}

impl AgentRegistryBuilder {
    /// Register `agent` under its own name. A later registration with the
    /// same name replaces the earlier one but keeps its position.
    pub fn register<T: Agent + 'static>(self, agent: T) -> Self {
        self.register_boxed(BoxAgent::new(agent))
    }

    pub fn register_boxed(mut self, agent: BoxAgent) -> Self {
        let name = agent.name().to_string();
        if self.agents.insert(name.clone(), Arc::new(agent)).is_some() {
            tracing::warn!(agent = %name, "agent registered twice, keeping the latest");
        } else {
            self.order.push(name);
        }
        self
    }

    pub fn build(self) -> AgentRegistry {
        AgentRegistry {
            order: self.order,
            agents: self.agents,
        }
    }
}
