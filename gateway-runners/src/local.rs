//! In-memory workflow engine used by the binary and by tests.

use std::collections::HashMap;

use async_trait::async_trait;
use gateway_primitives::{WorkflowEvent, WorkflowEventKind, WorkflowId};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::traits::{RunnerError, RunnerResult, WorkflowHandle, WorkflowRunner, WorkflowStart};

#[derive(Debug)]
struct Execution {
    workflow_type: String,
    run_id: String,
    memo: Map<String, Value>,
    events: Vec<WorkflowEvent>,
    terminated: Option<String>,
}

impl Execution {
    fn next_event_id(&self) -> u64 {
        self.events.last().map_or(1, |event| event.event_id() + 1)
    }
}

/// Workflow engine that keeps executions in process memory.
///
/// Activities are not executed; callers append history events with
/// [`LocalWorkflowEngine::append_event`] to simulate progress.
#[derive(Debug, Default)]
pub struct LocalWorkflowEngine {
    executions: Mutex<HashMap<WorkflowId, Execution>>,
    max_executions: Option<usize>,
}

impl LocalWorkflowEngine {
    /// Creates an engine without an execution quota.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps the number of executions the engine accepts.
    #[must_use]
    pub fn with_max_executions(mut self, max: usize) -> Self {
        self.max_executions = Some(max);
        self
    }

    /// Appends an event to an execution's history and returns its id.
    ///
    /// # Errors
    ///
    /// Returns a 404 error when the execution is unknown.
    pub async fn append_event(
        &self,
        workflow_id: &WorkflowId,
        kind: WorkflowEventKind,
    ) -> RunnerResult<u64> {
        let mut executions = self.executions.lock().await;
        let execution = executions
            .get_mut(workflow_id)
            .ok_or_else(|| not_found(workflow_id))?;
        let event_id = execution.next_event_id();
        execution.events.push(WorkflowEvent::new(event_id, kind));
        Ok(event_id)
    }

    /// Returns the memo stored with an execution.
    pub async fn memo(&self, workflow_id: &WorkflowId) -> Option<Map<String, Value>> {
        let executions = self.executions.lock().await;
        executions.get(workflow_id).map(|execution| execution.memo.clone())
    }

    /// Returns the workflow type an execution was started with.
    pub async fn workflow_type(&self, workflow_id: &WorkflowId) -> Option<String> {
        let executions = self.executions.lock().await;
        executions
            .get(workflow_id)
            .map(|execution| execution.workflow_type.clone())
    }

    /// Returns the termination reason, if the execution was terminated.
    pub async fn termination_reason(&self, workflow_id: &WorkflowId) -> Option<String> {
        let executions = self.executions.lock().await;
        executions
            .get(workflow_id)
            .and_then(|execution| execution.terminated.clone())
    }

    /// Number of executions known to the engine.
    pub async fn len(&self) -> usize {
        self.executions.lock().await.len()
    }

    /// Returns `true` when no execution was started yet.
    pub async fn is_empty(&self) -> bool {
        self.executions.lock().await.is_empty()
    }
}

fn not_found(workflow_id: &WorkflowId) -> RunnerError {
    RunnerError::new(format!("workflow `{workflow_id}` not found"))
        .with_status(404)
        .with_code("WORKFLOW_NOT_FOUND")
}

#[async_trait]
impl WorkflowRunner for LocalWorkflowEngine {
    async fn start(&self, request: WorkflowStart) -> RunnerResult<WorkflowHandle> {
        let mut executions = self.executions.lock().await;
        if executions.contains_key(request.workflow_id()) {
            return Err(RunnerError::new(format!(
                "workflow `{}` already started",
                request.workflow_id()
            ))
            .with_status(409)
            .with_code("WORKFLOW_ALREADY_STARTED"));
        }
        if let Some(max) = self.max_executions
            && executions.len() >= max
        {
            return Err(RunnerError::new("workflow execution quota exhausted")
                .with_status(429)
                .with_code("RESOURCE_EXHAUSTED"));
        }

        let run_id = Uuid::new_v4().to_string();
        info!(
            workflow_id = %request.workflow_id(),
            workflow_type = request.workflow_type(),
            %run_id,
            "workflow started"
        );
        executions.insert(
            request.workflow_id().clone(),
            Execution {
                workflow_type: request.workflow_type().to_owned(),
                run_id: run_id.clone(),
                memo: request.memo().clone(),
                events: Vec::new(),
                terminated: None,
            },
        );
        Ok(WorkflowHandle::new(request.workflow_id().clone(), run_id))
    }

    async fn history(&self, workflow_id: &WorkflowId) -> RunnerResult<Vec<WorkflowEvent>> {
        let executions = self.executions.lock().await;
        let execution = executions
            .get(workflow_id)
            .ok_or_else(|| not_found(workflow_id))?;
        debug!(
            %workflow_id,
            run_id = %execution.run_id,
            events = execution.events.len(),
            "history read"
        );
        Ok(execution.events.clone())
    }

    async fn terminate(&self, workflow_id: &WorkflowId, reason: &str) -> RunnerResult<()> {
        let mut executions = self.executions.lock().await;
        let execution = executions
            .get_mut(workflow_id)
            .ok_or_else(|| not_found(workflow_id))?;
        if execution.terminated.is_none() {
            execution.terminated = Some(reason.to_owned());
            info!(%workflow_id, reason, "workflow terminated");
        }
        Ok(())
    }
}
