//! Shared runner traits and data structures.

use std::fmt;

use async_trait::async_trait;
use gateway_primitives::{CallerContext, ToolId, TraceId, WorkflowEvent, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Result alias used by runner implementations.
pub type RunnerResult<T> = Result<T, RunnerError>;

/// Error code reported by a runner, either symbolic or numeric.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorCode {
    /// Numeric code (HTTP status, errno, ...).
    Number(i64),
    /// Symbolic code such as `ECONNRESET`.
    Text(String),
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(code) => write!(f, "{code}"),
            Self::Text(code) => f.write_str(code),
        }
    }
}

impl From<i64> for ErrorCode {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for ErrorCode {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for ErrorCode {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Failure reported by a capability or workflow runner.
///
/// Runners describe failures with whatever they know: a human-readable
/// message, optionally a structured status code and an error code. The kernel
/// turns these into a retry-relevant category before anything leaves the
/// gateway.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct RunnerError {
    message: String,
    status_code: Option<u16>,
    code: Option<ErrorCode>,
}

impl RunnerError {
    /// Creates an error with a message and no structured metadata.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: None,
            code: None,
        }
    }

    /// Attaches a structured status code.
    #[must_use]
    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    /// Attaches a runner-specific error code.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<ErrorCode>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Returns the human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the structured status code, if any.
    #[must_use]
    pub const fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    /// Returns the runner-specific error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&ErrorCode> {
        self.code.as_ref()
    }
}

/// Input handed to the capability runner for a synchronous call.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityInvocation {
    id: ToolId,
    args: Value,
    trace_id: TraceId,
    context: CallerContext,
}

impl CapabilityInvocation {
    /// Creates an invocation.
    #[must_use]
    pub fn new(id: ToolId, args: Value, trace_id: TraceId, context: CallerContext) -> Self {
        Self {
            id,
            args,
            trace_id,
            context,
        }
    }

    /// Returns the capability id.
    #[must_use]
    pub fn id(&self) -> &ToolId {
        &self.id
    }

    /// Returns the validated arguments.
    #[must_use]
    pub fn args(&self) -> &Value {
        &self.args
    }

    /// Returns the trace id for this call.
    #[must_use]
    pub fn trace_id(&self) -> &TraceId {
        &self.trace_id
    }

    /// Returns the resolved caller context.
    #[must_use]
    pub fn context(&self) -> &CallerContext {
        &self.context
    }
}

/// Trait implemented by synchronous capability runners.
#[async_trait]
pub trait CapabilityRunner: Send + Sync {
    /// Runs the capability to completion and returns its result payload.
    async fn run(&self, invocation: CapabilityInvocation) -> RunnerResult<Value>;
}

/// Request to start a durable workflow execution.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStart {
    workflow_type: String,
    workflow_id: WorkflowId,
    args: Value,
    memo: Map<String, Value>,
}

impl WorkflowStart {
    /// Creates a start request.
    #[must_use]
    pub fn new(
        workflow_type: impl Into<String>,
        workflow_id: WorkflowId,
        args: Value,
        memo: Map<String, Value>,
    ) -> Self {
        Self {
            workflow_type: workflow_type.into(),
            workflow_id,
            args,
            memo,
        }
    }

    /// Returns the engine workflow type.
    #[must_use]
    pub fn workflow_type(&self) -> &str {
        &self.workflow_type
    }

    /// Returns the execution id.
    #[must_use]
    pub fn workflow_id(&self) -> &WorkflowId {
        &self.workflow_id
    }

    /// Returns the workflow arguments.
    #[must_use]
    pub fn args(&self) -> &Value {
        &self.args
    }

    /// Returns the memo attached to the execution.
    #[must_use]
    pub fn memo(&self) -> &Map<String, Value> {
        &self.memo
    }
}

/// Acknowledgement returned once the engine accepted a start.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowHandle {
    workflow_id: WorkflowId,
    run_id: String,
}

impl WorkflowHandle {
    /// Creates a handle.
    #[must_use]
    pub fn new(workflow_id: WorkflowId, run_id: impl Into<String>) -> Self {
        Self {
            workflow_id,
            run_id: run_id.into(),
        }
    }

    /// Returns the execution id.
    #[must_use]
    pub fn workflow_id(&self) -> &WorkflowId {
        &self.workflow_id
    }

    /// Returns the engine run id.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

/// Trait implemented by durable workflow engines.
#[async_trait]
pub trait WorkflowRunner: Send + Sync {
    /// Establishes any connection the runner needs. Called by
    /// [`WorkflowClient::open`](crate::client::WorkflowClient::open).
    async fn connect(&self) -> RunnerResult<()> {
        Ok(())
    }

    /// Releases connection resources. Called by
    /// [`WorkflowClient::close`](crate::client::WorkflowClient::close).
    async fn disconnect(&self) -> RunnerResult<()> {
        Ok(())
    }

    /// Starts an execution and returns as soon as the engine acknowledges it.
    async fn start(&self, request: WorkflowStart) -> RunnerResult<WorkflowHandle>;

    /// Returns the ordered event history of an execution.
    async fn history(&self, workflow_id: &WorkflowId) -> RunnerResult<Vec<WorkflowEvent>>;

    /// Terminates an execution.
    async fn terminate(&self, workflow_id: &WorkflowId, reason: &str) -> RunnerResult<()>;
}
