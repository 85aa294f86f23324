//! Step-level progress projected from a workflow's event history.

use std::collections::BTreeMap;

use gateway_primitives::{WorkflowEvent, WorkflowEventKind};
use serde::Serialize;
use serde_json::Value;

/// Activity type that marks capability execution steps.
pub const DEFAULT_CAPABILITY_ACTIVITY: &str = "executeCapability";

/// Placeholder used when a scheduled step carries no capability id.
pub const UNKNOWN_CAPABILITY: &str = "unknown";

/// Status of one scheduled step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Scheduled but not yet picked up.
    Pending,
    /// Picked up by a worker.
    Running,
    /// Finished successfully. Terminal.
    Completed,
    /// Failed, timed out or was canceled. Terminal.
    Failed,
}

impl StepStatus {
    /// Returns `true` once the step can no longer change.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Progress of a single capability step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepProgress {
    seq: u64,
    activity_id: String,
    cap_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    node_id: Option<String>,
    status: StepStatus,
}

impl StepProgress {
    /// Scheduling event id; the step's stable identity.
    #[must_use]
    pub const fn seq(&self) -> u64 {
        self.seq
    }

    /// Activity id assigned by the engine.
    #[must_use]
    pub fn activity_id(&self) -> &str {
        &self.activity_id
    }

    /// Capability executed by the step.
    #[must_use]
    pub fn cap_id(&self) -> &str {
        &self.cap_id
    }

    /// Graph node the step belongs to, if the payload named one.
    #[must_use]
    pub fn node_id(&self) -> Option<&str> {
        self.node_id.as_deref()
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> StepStatus {
        self.status
    }
}

/// Projection result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    steps: Vec<StepProgress>,
}

impl Progress {
    /// Steps sorted by scheduling sequence id.
    #[must_use]
    pub fn steps(&self) -> &[StepProgress] {
        &self.steps
    }
}

/// Replays event histories into step progress.
#[derive(Debug, Clone)]
pub struct ProgressProjector {
    activity_type: String,
}

impl Default for ProgressProjector {
    fn default() -> Self {
        Self::new(DEFAULT_CAPABILITY_ACTIVITY)
    }
}

impl ProgressProjector {
    /// Creates a projector tracking the given activity type.
    #[must_use]
    pub fn new(activity_type: impl Into<String>) -> Self {
        Self {
            activity_type: activity_type.into(),
        }
    }

    /// Activity type that creates steps.
    #[must_use]
    pub fn activity_type(&self) -> &str {
        &self.activity_type
    }

    /// Folds the events into per-step progress.
    ///
    /// Pure: the same slice always yields the same projection.
    #[must_use]
    pub fn project(&self, events: &[WorkflowEvent]) -> Progress {
        let mut steps: BTreeMap<u64, StepProgress> = BTreeMap::new();

        for event in events {
            match event.kind() {
                WorkflowEventKind::Scheduled {
                    activity_id,
                    activity_type,
                    input,
                } => {
                    if activity_type != &self.activity_type {
                        continue;
                    }
                    let payload = step_payload(input);
                    steps.entry(event.event_id()).or_insert_with(|| StepProgress {
                        seq: event.event_id(),
                        activity_id: activity_id.clone(),
                        cap_id: payload
                            .and_then(|p| p.get("capId"))
                            .and_then(Value::as_str)
                            .unwrap_or(UNKNOWN_CAPABILITY)
                            .to_owned(),
                        node_id: payload
                            .and_then(|p| p.pointer("/correlation/nodeId"))
                            .and_then(Value::as_str)
                            .map(str::to_owned),
                        status: StepStatus::Pending,
                    });
                }
                kind => {
                    let Some(next) = transition(kind) else {
                        continue;
                    };
                    let Some(step) = kind
                        .scheduled_event_id()
                        .and_then(|seq| steps.get_mut(&seq))
                    else {
                        continue;
                    };
                    if !step.status.is_terminal() {
                        step.status = next;
                    }
                }
            }
        }

        Progress {
            steps: steps.into_values().collect(),
        }
    }
}

fn transition(kind: &WorkflowEventKind) -> Option<StepStatus> {
    match kind {
        WorkflowEventKind::Started { .. } => Some(StepStatus::Running),
        WorkflowEventKind::Completed { .. } => Some(StepStatus::Completed),
        WorkflowEventKind::Failed { .. }
        | WorkflowEventKind::TimedOut { .. }
        | WorkflowEventKind::Canceled { .. } => Some(StepStatus::Failed),
        WorkflowEventKind::Scheduled { .. } | WorkflowEventKind::Other => None,
    }
}

// Activity inputs are argument lists; the payload is the first element.
fn step_payload(input: &Value) -> Option<&Value> {
    match input {
        Value::Array(items) => items.first(),
        Value::Null => None,
        other => Some(other),
    }
}

/// Projects with the default capability activity type.
#[must_use]
pub fn project(events: &[WorkflowEvent]) -> Progress {
    ProgressProjector::default().project(events)
}
