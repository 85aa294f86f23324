//! Call pipeline of the tool gateway.
//!
//! [`router::DispatchRouter`] admits each call (catalog lookup, envelope
//! verification, schema validation, approval gate) and dispatches it to the
//! capability or workflow runner. Runner failures pass through
//! [`normalize::normalize`]; workflow histories are replayed by
//! [`progress::ProgressProjector`]; [`transport::TransportLoop`] serves the
//! whole thing over newline-delimited JSON.

#![warn(missing_docs, clippy::pedantic)]

pub mod normalize;
pub mod progress;
pub mod result;
pub mod router;
pub mod transport;
pub mod usage;

pub use normalize::{normalize, ErrorCategory, ErrorMap, ErrorMaps, NormalizedError};
pub use progress::{
    project, Progress, ProgressProjector, StepProgress, StepStatus, DEFAULT_CAPABILITY_ACTIVITY,
};
pub use result::{GatewayErrorCode, StructuredContent, ToolCallResult};
pub use router::{
    CallDefaults, DispatchRouter, DispatchRouterBuilder, RequestMeta, ToolCallRequest,
    DEFAULT_STATUS_BASE_URL, RUNNER_PANICKED,
};
pub use transport::{ServeSummary, TransportError, TransportLoop, TransportResult};
pub use usage::{UsageEntry, UsageLedger, UsageOutcome};
