//! Explicit open/close lifecycle around a workflow runner.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use gateway_primitives::{WorkflowEvent, WorkflowId};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::traits::{RunnerError, RunnerResult, WorkflowHandle, WorkflowRunner, WorkflowStart};

/// Connection state of a [`WorkflowClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Constructed or closed; calls are refused.
    Closed,
    /// Connected; calls are forwarded to the runner.
    Open,
}

/// Process-wide workflow engine client with an explicit lifecycle.
///
/// The client is created once at startup, opened before the transport loop
/// starts serving, and closed on shutdown. Calls made while closed fail with a
/// 503 status so they normalize to a retryable error.
pub struct WorkflowClient {
    runner: Arc<dyn WorkflowRunner>,
    state: RwLock<ClientState>,
}

impl fmt::Debug for WorkflowClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowClient").finish_non_exhaustive()
    }
}

impl WorkflowClient {
    /// Wraps a runner; the client starts closed.
    #[must_use]
    pub fn new(runner: Arc<dyn WorkflowRunner>) -> Self {
        Self {
            runner,
            state: RwLock::new(ClientState::Closed),
        }
    }

    /// Returns the current state.
    pub async fn state(&self) -> ClientState {
        *self.state.read().await
    }

    /// Connects the underlying runner. Opening an open client is a no-op.
    ///
    /// # Errors
    ///
    /// Propagates any connection error from the runner; the client stays closed.
    pub async fn open(&self) -> RunnerResult<()> {
        let mut state = self.state.write().await;
        if *state == ClientState::Open {
            debug!("workflow client already open");
            return Ok(());
        }
        self.runner.connect().await?;
        *state = ClientState::Open;
        info!("workflow client opened");
        Ok(())
    }

    /// Disconnects the underlying runner. Closing a closed client is a no-op.
    ///
    /// # Errors
    ///
    /// Propagates any disconnect error from the runner; the client is marked
    /// closed regardless.
    pub async fn close(&self) -> RunnerResult<()> {
        let mut state = self.state.write().await;
        if *state == ClientState::Closed {
            return Ok(());
        }
        *state = ClientState::Closed;
        info!("workflow client closed");
        self.runner.disconnect().await
    }

    async fn ensure_open(&self) -> RunnerResult<()> {
        match *self.state.read().await {
            ClientState::Open => Ok(()),
            ClientState::Closed => Err(RunnerError::new("workflow client unavailable: not open")
                .with_status(503)
                .with_code("CLIENT_CLOSED")),
        }
    }
}

#[async_trait]
impl WorkflowRunner for WorkflowClient {
    async fn start(&self, request: WorkflowStart) -> RunnerResult<WorkflowHandle> {
        self.ensure_open().await?;
        self.runner.start(request).await
    }

    async fn history(&self, workflow_id: &WorkflowId) -> RunnerResult<Vec<WorkflowEvent>> {
        self.ensure_open().await?;
        self.runner.history(workflow_id).await
    }

    async fn terminate(&self, workflow_id: &WorkflowId, reason: &str) -> RunnerResult<()> {
        self.ensure_open().await?;
        self.runner.terminate(workflow_id, reason).await
    }
}
