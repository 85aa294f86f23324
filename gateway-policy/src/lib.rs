//! Admission checks applied to every tool call before it reaches a runner.
//!
//! [`envelope`] verifies caller-supplied signed contexts and [`approval`] decides
//! whether a tool's data classification demands human sign-off first.

#![warn(missing_docs, clippy::pedantic)]

pub mod approval;
pub mod envelope;

pub use approval::{requires_approval, ApprovalDecision, ApprovalGate};
pub use envelope::{
    sign, verify, AuthError, AuthResult, CallEnvelope, EnvelopeAuthenticator, EnvelopeMode,
    SigningSecret,
};
