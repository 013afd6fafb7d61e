//! BoxAgent -- object-safe dynamic dispatch wrapper for [`Agent`].
//!
//! 1. `AgentDyn` is an object-safe mirror of `Agent` with boxed futures
//! 2. Blanket-impl `AgentDyn` for all `T: Agent`
//! 3. `BoxAgent` wraps `Box<dyn AgentDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use turnflow_types::agent::{AgentInput, AgentOutput};

use super::{Agent, AgentError};

/// Object-safe version of [`Agent`] with boxed futures.
pub trait AgentDyn: Send + Sync {
    fn name(&self) -> &str;

    fn run_boxed<'a>(
        &'a self,
        input: AgentInput,
    ) -> Pin<Box<dyn Future<Output = Result<AgentOutput, AgentError>> + Send + 'a>>;
}

impl<T: Agent> AgentDyn for T {
    fn name(&self) -> &str {
        Agent::name(self)
    }

    fn run_boxed<'a>(
        &'a self,
        input: AgentInput,
    ) -> Pin<Box<dyn Future<Output = Result<AgentOutput, AgentError>> + Send + 'a>> {
        Box::pin(self.run(input))
    }
}

/// Type-erased agent stored in the registry.
pub struct BoxAgent {
    inner: Box<dyn AgentDyn>,
}

impl BoxAgent {
    pub fn new<T: Agent + 'static>(agent: T) -> Self {
        Self {
            inner: Box::new(agent),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn run(&self, input: AgentInput) -> Result<AgentOutput, AgentError> {
        self.inner.run_boxed(input).await
    }
}

impl std::fmt::Debug for BoxAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxAgent").field("name", &self.name()).finish()
    }
}
