//! Runner collaborators the gateway dispatches to.
//!
//! The contracts live in [`traits`]. [`capability`] provides an in-process
//! capability runner, [`client`] wraps any workflow runner in an explicit
//! open/close lifecycle, and [`local`] is an in-memory workflow engine for local
//! runs and tests.

#![warn(missing_docs, clippy::pedantic)]

pub mod capability;
pub mod client;
pub mod local;
pub mod traits;

pub use capability::{Capability, CapabilityRegistry, RegistryError};
pub use client::{ClientState, WorkflowClient};
pub use local::LocalWorkflowEngine;
pub use traits::{
    CapabilityInvocation, CapabilityRunner, ErrorCode, RunnerError, RunnerResult, WorkflowHandle,
    WorkflowRunner, WorkflowStart,
};
