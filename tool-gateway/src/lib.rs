//! Tool invocation gateway.
//!
//! Bundles the gateway crates and wires them together from a
//! [`GatewayConfig`]. The `tool-gateway` binary serves the result over stdio.

#![warn(missing_docs, clippy::pedantic)]

use std::sync::Arc;

use gateway_config::GatewayConfig;
use gateway_kernel::{CallDefaults, DispatchRouter, ProgressProjector, UsageLedger};
use gateway_primitives::{ToolId, ToolManifest};
use gateway_runners::{
    CapabilityInvocation, CapabilityRegistry, CapabilityRunner, RegistryError, WorkflowRunner,
};
use gateway_tools::{CatalogResult, ToolCatalog};

/// Shared primitives.
pub use gateway_primitives as primitives;

/// Tool catalog and argument validation.
pub use gateway_tools as tools;

/// Envelope authentication and approval gate.
pub use gateway_policy as policy;

/// Runner contracts and local runners.
pub use gateway_runners as runners;

/// Dispatch router, normalizer, projector and transport.
pub use gateway_kernel as kernel;

/// Environment configuration.
pub use gateway_config as config;

/// Logging setup.
pub use gateway_telemetry as telemetry;

/// Id of the built-in capability that returns its arguments.
pub const ECHO_CAPABILITY: &str = "gateway.echo";

/// Registers the capabilities compiled into the binary.
///
/// # Errors
///
/// Returns [`RegistryError`] if a built-in id is invalid or registered twice.
pub fn builtin_capabilities() -> Result<CapabilityRegistry, RegistryError> {
    let mut registry = CapabilityRegistry::new();
    let echo = ToolId::new(ECHO_CAPABILITY).map_err(|err| RegistryError::InvalidId {
        id: ECHO_CAPABILITY.to_owned(),
        reason: err.to_string(),
    })?;
    registry.register(echo, |invocation: CapabilityInvocation| async move {
        Ok(invocation.args().clone())
    })?;
    Ok(registry)
}

/// Caller defaults derived from configuration.
#[must_use]
pub fn call_defaults(config: &GatewayConfig) -> CallDefaults {
    let defaults = CallDefaults::new(
        config.default_initiator(),
        config.default_token_ref(),
        config.app_id(),
        config.environment(),
    )
    .with_roles(config.default_roles().iter().cloned());
    match config.cost_center() {
        Some(cost_center) => defaults.with_cost_center(cost_center),
        None => defaults,
    }
}

/// Builds the dispatch router from configuration, manifest and runners.
///
/// # Errors
///
/// Returns [`gateway_tools::CatalogError`] when an argument schema fails to
/// compile.
pub fn build_router(
    config: &GatewayConfig,
    manifest: ToolManifest,
    capabilities: Arc<dyn CapabilityRunner>,
    workflows: Arc<dyn WorkflowRunner>,
) -> CatalogResult<DispatchRouter> {
    let catalog = Arc::new(ToolCatalog::from_manifest(manifest)?);
    let mut builder = DispatchRouter::builder(catalog, capabilities, workflows)
        .authenticator(config.authenticator())
        .defaults(call_defaults(config))
        .status_base_url(config.status_base_url())
        .projector(ProgressProjector::new(config.capability_activity()));
    if config.usage_ledger() {
        builder = builder.ledger(Arc::new(UsageLedger::new()));
    }
    Ok(builder.build())
}
