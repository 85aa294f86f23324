//! Core shared types for the tool invocation gateway.

#![warn(missing_docs, clippy::pedantic)]

mod context;
mod error;
mod events;
mod ids;
mod manifest;

/// Identity and authorization metadata attached to a single call.
pub use context::CallerContext;
/// Error type and result alias shared across the gateway.
pub use error::{Error, Result};
/// Append-only workflow history entries.
pub use events::{WorkflowEvent, WorkflowEventKind};
/// Identifiers used for tracing and durable executions.
pub use ids::{ToolId, TraceId, WorkflowId};
/// Tool catalog descriptors loaded from the manifest.
pub use manifest::{
    DataClassification, ToolDescriptor, ToolDescriptorBuilder, ToolKind, ToolManifest,
};
