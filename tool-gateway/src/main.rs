use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{self, BufReader};
use tool_gateway::config::GatewayConfig;
use tool_gateway::kernel::TransportLoop;
use tool_gateway::runners::{LocalWorkflowEngine, WorkflowClient};
use tool_gateway::{build_router, builtin_capabilities, telemetry};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = GatewayConfig::from_env().context("failed to load configuration")?;
    telemetry::init(config.log_filter()).context("failed to initialize logging")?;

    let manifest = config.load_manifest()?;
    info!(
        tools = manifest.tools().len(),
        require_envelope = config.require_envelope(),
        "starting tool gateway"
    );

    let client = Arc::new(WorkflowClient::new(Arc::new(LocalWorkflowEngine::new())));
    client.open().await.context("failed to open workflow client")?;

    let router = build_router(
        &config,
        manifest,
        Arc::new(builtin_capabilities()?),
        client.clone(),
    )
    .context("failed to build dispatch router")?;

    let served = TransportLoop::new(Arc::new(router))
        .serve(BufReader::new(io::stdin()), io::stdout())
        .await;

    client.close().await.context("failed to close workflow client")?;
    let summary = served.context("transport loop failed")?;
    info!(
        responses = summary.responses,
        parse_errors = summary.parse_errors,
        "tool gateway stopped"
    );
    Ok(())
}
