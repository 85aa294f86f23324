//! Classification-based approval gating.

use gateway_primitives::{DataClassification, ToolDescriptor};
use tracing::debug;

/// Returns `true` when the tool must not run without prior human approval.
#[must_use]
pub fn requires_approval(descriptor: &ToolDescriptor) -> bool {
    descriptor.data_classification() == DataClassification::Restricted
}

/// Outcome of the approval gate for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    /// The call may proceed to a runner.
    Proceed,
    /// The call is held until a human approves it.
    ApprovalRequired {
        /// Classification that triggered the hold.
        data_classification: DataClassification,
    },
}

impl ApprovalDecision {
    /// Returns true when the call may proceed.
    #[must_use]
    pub const fn is_proceed(self) -> bool {
        matches!(self, Self::Proceed)
    }
}

/// Gate consulted after validation and before any runner invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApprovalGate;

impl ApprovalGate {
    /// Evaluates the gate for a descriptor.
    #[must_use]
    pub fn evaluate(self, descriptor: &ToolDescriptor) -> ApprovalDecision {
        if requires_approval(descriptor) {
            debug!(tool = %descriptor.id(), "tool held for approval");
            ApprovalDecision::ApprovalRequired {
                data_classification: descriptor.data_classification(),
            }
        } else {
            ApprovalDecision::Proceed
        }
    }
}
