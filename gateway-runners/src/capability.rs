//! In-process capability runner backed by a registry of handlers.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use gateway_primitives::ToolId;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::traits::{CapabilityInvocation, CapabilityRunner, RunnerError, RunnerResult};

/// Trait implemented by individual capability handlers.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Executes the capability for one invocation.
    async fn invoke(&self, invocation: CapabilityInvocation) -> RunnerResult<Value>;
}

#[async_trait]
impl<F, Fut> Capability for F
where
    F: Send + Sync + Fn(CapabilityInvocation) -> Fut,
    Fut: Future<Output = RunnerResult<Value>> + Send,
{
    async fn invoke(&self, invocation: CapabilityInvocation) -> RunnerResult<Value> {
        (self)(invocation).await
    }
}

/// Registry mapping capability ids to their handlers.
///
/// Populated at startup, then shared read-only behind an `Arc`.
#[derive(Default)]
pub struct CapabilityRegistry {
    handlers: HashMap<ToolId, Arc<dyn Capability>>,
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.handlers.keys().map(ToolId::as_str).collect();
        names.sort_unstable();
        f.debug_struct("CapabilityRegistry")
            .field("registered", &names)
            .finish()
    }
}

impl CapabilityRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for the capability id.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateCapability`] if the id is taken.
    pub fn register<C>(&mut self, id: ToolId, capability: C) -> Result<(), RegistryError>
    where
        C: Capability + 'static,
    {
        if self.handlers.contains_key(&id) {
            return Err(RegistryError::DuplicateCapability { id: id.to_string() });
        }
        self.handlers.insert(id, Arc::new(capability));
        Ok(())
    }

    /// Returns `true` when a handler is registered for the id.
    #[must_use]
    pub fn contains(&self, id: &ToolId) -> bool {
        self.handlers.contains_key(id)
    }

    /// Lists registered capability ids.
    #[must_use]
    pub fn ids(&self) -> Vec<&ToolId> {
        self.handlers.keys().collect()
    }
}

#[async_trait]
impl CapabilityRunner for CapabilityRegistry {
    async fn run(&self, invocation: CapabilityInvocation) -> RunnerResult<Value> {
        let Some(handler) = self.handlers.get(invocation.id()).cloned() else {
            return Err(
                RunnerError::new(format!("capability `{}` is not registered", invocation.id()))
                    .with_status(404)
                    .with_code("CAPABILITY_NOT_FOUND"),
            );
        };
        debug!(
            capability = %invocation.id(),
            trace_id = %invocation.trace_id(),
            "running capability"
        );
        handler.invoke(invocation).await
    }
}

/// Errors produced while populating a [`CapabilityRegistry`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Capability id collided with an existing registration.
    #[error("capability `{id}` is already registered")]
    DuplicateCapability {
        /// Offending id.
        id: String,
    },
    /// Capability id failed validation.
    #[error("invalid capability id `{id}`: {reason}")]
    InvalidId {
        /// Offending id.
        id: String,
        /// Validation failure.
        reason: String,
    },
}
