//! Workflow history entries emitted by the workflow engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry in the append-only history of a background execution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowEvent {
    event_id: u64,
    #[serde(flatten)]
    kind: WorkflowEventKind,
}

/// Typed payload of a [`WorkflowEvent`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum WorkflowEventKind {
    /// A unit of work was scheduled.
    Scheduled {
        /// Engine-assigned activity identifier.
        activity_id: String,
        /// Activity type name.
        activity_type: String,
        /// Activity input payload.
        #[serde(default)]
        input: Value,
    },
    /// A worker picked up the scheduled activity.
    Started {
        /// Sequence id of the scheduling event.
        scheduled_event_id: u64,
    },
    /// The activity finished successfully.
    Completed {
        /// Sequence id of the scheduling event.
        scheduled_event_id: u64,
    },
    /// The activity failed.
    Failed {
        /// Sequence id of the scheduling event.
        scheduled_event_id: u64,
    },
    /// The activity exceeded its timeout.
    TimedOut {
        /// Sequence id of the scheduling event.
        scheduled_event_id: u64,
    },
    /// The activity was canceled.
    Canceled {
        /// Sequence id of the scheduling event.
        scheduled_event_id: u64,
    },
    /// Any history entry the gateway does not interpret.
    #[serde(other)]
    Other,
}

impl WorkflowEventKind {
    /// Returns the scheduling sequence id referenced by a non-scheduling event.
    #[must_use]
    pub const fn scheduled_event_id(&self) -> Option<u64> {
        match self {
            Self::Started { scheduled_event_id }
            | Self::Completed { scheduled_event_id }
            | Self::Failed { scheduled_event_id }
            | Self::TimedOut { scheduled_event_id }
            | Self::Canceled { scheduled_event_id } => Some(*scheduled_event_id),
            Self::Scheduled { .. } | Self::Other => None,
        }
    }
}

impl WorkflowEvent {
    /// Creates an event with the supplied sequence id.
    #[must_use]
    pub const fn new(event_id: u64, kind: WorkflowEventKind) -> Self {
        Self { event_id, kind }
    }

    /// Convenience constructor for scheduling events.
    #[must_use]
    pub fn scheduled(
        event_id: u64,
        activity_id: impl Into<String>,
        activity_type: impl Into<String>,
        input: Value,
    ) -> Self {
        Self::new(
            event_id,
            WorkflowEventKind::Scheduled {
                activity_id: activity_id.into(),
                activity_type: activity_type.into(),
                input,
            },
        )
    }

    /// Returns the monotonically increasing sequence id.
    #[must_use]
    pub const fn event_id(&self) -> u64 {
        self.event_id
    }

    /// Returns the event payload.
    #[must_use]
    pub const fn kind(&self) -> &WorkflowEventKind {
        &self.kind
    }
}
