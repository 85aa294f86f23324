//! Tool call dispatch pipeline.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use gateway_policy::{ApprovalDecision, ApprovalGate, CallEnvelope, EnvelopeAuthenticator};
use gateway_primitives::{CallerContext, ToolDescriptor, ToolKind, TraceId, WorkflowId};
use gateway_runners::{
    CapabilityInvocation, CapabilityRunner, RunnerError, RunnerResult, WorkflowRunner,
    WorkflowStart,
};
use gateway_tools::{CatalogError, ToolCatalog};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, error, info, warn};

use crate::normalize::{ErrorMaps, NormalizedError, normalize};
use crate::progress::{Progress, ProgressProjector};
use crate::result::{GatewayErrorCode, ToolCallResult};
use crate::usage::{UsageEntry, UsageLedger, UsageOutcome};

/// Default base of workflow status URLs.
pub const DEFAULT_STATUS_BASE_URL: &str = "/workflows";

/// Error code attached when a runner panics instead of returning an error.
pub const RUNNER_PANICKED: &str = "RUNNER_PANICKED";

/// Incoming `tools/call` request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolCallRequest {
    name: String,
    #[serde(default = "empty_arguments")]
    arguments: Value,
    #[serde(default, alias = "_meta")]
    meta: Option<RequestMeta>,
}

/// Optional request metadata.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RequestMeta {
    #[serde(default)]
    envelope: Option<CallEnvelope>,
}

fn empty_arguments() -> Value {
    Value::Object(Map::new())
}

impl ToolCallRequest {
    /// Creates a request without an envelope.
    #[must_use]
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
            meta: None,
        }
    }

    /// Attaches a signed caller envelope.
    #[must_use]
    pub fn with_envelope(mut self, envelope: CallEnvelope) -> Self {
        self.meta = Some(RequestMeta {
            envelope: Some(envelope),
        });
        self
    }

    /// Requested tool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Caller-supplied arguments.
    #[must_use]
    pub fn arguments(&self) -> &Value {
        &self.arguments
    }

    /// Attached envelope, if any.
    #[must_use]
    pub fn envelope(&self) -> Option<&CallEnvelope> {
        self.meta.as_ref().and_then(|meta| meta.envelope.as_ref())
    }
}

/// Caller context fields used when a request carries no envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallDefaults {
    initiator_id: String,
    roles: Vec<String>,
    token_ref: String,
    app_id: String,
    environment: String,
    cost_center: Option<String>,
}

impl Default for CallDefaults {
    fn default() -> Self {
        Self::new("gateway", "none", "tool-gateway", "development")
    }
}

impl CallDefaults {
    /// Creates defaults with no roles and no cost center.
    #[must_use]
    pub fn new(
        initiator_id: impl Into<String>,
        token_ref: impl Into<String>,
        app_id: impl Into<String>,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            initiator_id: initiator_id.into(),
            roles: Vec::new(),
            token_ref: token_ref.into(),
            app_id: app_id.into(),
            environment: environment.into(),
            cost_center: None,
        }
    }

    /// Sets the default roles.
    #[must_use]
    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the default cost center.
    #[must_use]
    pub fn with_cost_center(mut self, cost_center: impl Into<String>) -> Self {
        self.cost_center = Some(cost_center.into());
        self
    }

    fn context(&self, trace_id: TraceId) -> CallerContext {
        let context = CallerContext::new(
            self.initiator_id.clone(),
            self.token_ref.clone(),
            self.app_id.clone(),
            self.environment.clone(),
            trace_id,
        )
        .with_roles(self.roles.iter().cloned());
        match &self.cost_center {
            Some(cost_center) => context.with_cost_center(cost_center.clone()),
            None => context,
        }
    }
}

/// Admits, validates and dispatches tool calls to the runner collaborators.
pub struct DispatchRouter {
    catalog: Arc<ToolCatalog>,
    authenticator: EnvelopeAuthenticator,
    approval: ApprovalGate,
    capabilities: Arc<dyn CapabilityRunner>,
    workflows: Arc<dyn WorkflowRunner>,
    error_maps: ErrorMaps,
    defaults: CallDefaults,
    status_base_url: String,
    projector: ProgressProjector,
    ledger: Option<Arc<UsageLedger>>,
}

impl fmt::Debug for DispatchRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchRouter")
            .field("catalog", &self.catalog)
            .field("envelope_mode", &self.authenticator.mode())
            .field("error_maps", &self.error_maps)
            .field("status_base_url", &self.status_base_url)
            .field("ledger_configured", &self.ledger.is_some())
            .finish_non_exhaustive()
    }
}

impl DispatchRouter {
    /// Starts building a router over the catalog and runners.
    #[must_use]
    pub fn builder(
        catalog: Arc<ToolCatalog>,
        capabilities: Arc<dyn CapabilityRunner>,
        workflows: Arc<dyn WorkflowRunner>,
    ) -> DispatchRouterBuilder {
        DispatchRouterBuilder {
            catalog,
            capabilities,
            workflows,
            authenticator: EnvelopeAuthenticator::default(),
            error_maps: ErrorMaps::default(),
            defaults: CallDefaults::default(),
            status_base_url: DEFAULT_STATUS_BASE_URL.to_owned(),
            projector: ProgressProjector::default(),
            ledger: None,
        }
    }

    /// Lists every tool in manifest order.
    #[must_use]
    pub fn list_tools(&self) -> &[ToolDescriptor] {
        self.catalog.list()
    }

    /// Returns the usage ledger, if one is configured.
    #[must_use]
    pub fn ledger(&self) -> Option<&Arc<UsageLedger>> {
        self.ledger.as_ref()
    }

    /// Returns per-budget-key totals, or `None` without a ledger.
    pub async fn usage_report(&self) -> Option<Vec<UsageEntry>> {
        match &self.ledger {
            Some(ledger) => Some(ledger.report().await),
            None => None,
        }
    }

    /// Runs one call through admission and dispatch.
    ///
    /// Never fails: every rejection and runner error is folded into a
    /// [`ToolCallResult`] with `isError` set.
    pub async fn call_tool(&self, request: ToolCallRequest) -> ToolCallResult {
        let gateway_trace = TraceId::generate();
        let name = request.name();

        let Some(descriptor) = self.catalog.get(name) else {
            warn!(trace_id = %gateway_trace, tool = name, "unknown tool");
            return ToolCallResult::rejected(&gateway_trace, GatewayErrorCode::UnknownTool, name);
        };

        let context = match self.authenticator.authenticate(request.envelope()) {
            Ok(Some(context)) => context,
            Ok(None) => self.defaults.context(gateway_trace.clone()),
            Err(err) => {
                warn!(trace_id = %gateway_trace, tool = name, error = %err, "call rejected");
                return ToolCallResult::unauthorized(&gateway_trace, name, err.to_string());
            }
        };
        let trace_id = context.trace_id().clone();

        if let Err(err) = self.catalog.validate(name, request.arguments()) {
            let details = match err {
                CatalogError::SchemaInvalid { details, .. } => details,
                other => vec![other.to_string()],
            };
            warn!(%trace_id, tool = name, violations = details.len(), "arguments rejected");
            return ToolCallResult::schema_invalid(&trace_id, name, details);
        }

        if let ApprovalDecision::ApprovalRequired {
            data_classification,
        } = self.approval.evaluate(descriptor)
        {
            warn!(%trace_id, tool = name, %data_classification, "approval required");
            return ToolCallResult::approval_required(&trace_id, name, data_classification);
        }

        debug!(%trace_id, tool = name, kind = ?descriptor.kind(), "dispatching");
        let budget_key = context.budget_key().to_owned();
        let (result, outcome) = match descriptor.kind() {
            ToolKind::Capability => self.run_capability(descriptor, &request, context).await,
            ToolKind::Workflow => self.start_workflow(descriptor, &request, &context).await,
        };

        if let Some(ledger) = &self.ledger {
            ledger.record(&budget_key, outcome).await;
        }
        result
    }

    async fn run_capability(
        &self,
        descriptor: &ToolDescriptor,
        request: &ToolCallRequest,
        context: CallerContext,
    ) -> (ToolCallResult, UsageOutcome) {
        let trace_id = context.trace_id().clone();
        let invocation = CapabilityInvocation::new(
            descriptor.id().clone(),
            request.arguments().clone(),
            trace_id.clone(),
            context,
        );
        let run = self.capabilities.run(invocation);
        match catch_runner_panic("capability", &trace_id, run).await {
            Ok(output) => (
                ToolCallResult::capability_output(&trace_id, output),
                UsageOutcome::Succeeded,
            ),
            Err(err) => (
                self.runner_failure(descriptor, &trace_id, &err),
                UsageOutcome::Failed,
            ),
        }
    }

    async fn start_workflow(
        &self,
        descriptor: &ToolDescriptor,
        request: &ToolCallRequest,
        context: &CallerContext,
    ) -> (ToolCallResult, UsageOutcome) {
        let trace_id = context.trace_id();
        let workflow_id = WorkflowId::derive(descriptor.id(), trace_id);
        let start = WorkflowStart::new(
            descriptor.workflow_type(),
            workflow_id.clone(),
            request.arguments().clone(),
            memo(descriptor, context),
        );

        let started = self.workflows.start(start);
        match catch_runner_panic("workflow start", trace_id, started).await {
            Ok(handle) => {
                info!(
                    %trace_id,
                    tool = %descriptor.id(),
                    workflow_id = %handle.workflow_id(),
                    run_id = handle.run_id(),
                    "workflow start acknowledged"
                );
                (
                    ToolCallResult::workflow_started(
                        trace_id,
                        handle.workflow_id(),
                        self.status_url(handle.workflow_id()),
                        handle.run_id().to_owned(),
                    ),
                    UsageOutcome::WorkflowStarted,
                )
            }
            Err(err) => (
                self.runner_failure(descriptor, trace_id, &err),
                UsageOutcome::Failed,
            ),
        }
    }

    fn runner_failure(
        &self,
        descriptor: &ToolDescriptor,
        trace_id: &TraceId,
        error: &RunnerError,
    ) -> ToolCallResult {
        let normalized = normalize(error, self.error_maps.get(descriptor.id()));
        warn!(
            %trace_id,
            tool = %descriptor.id(),
            category = %normalized.category(),
            retryable = normalized.retryable(),
            error = %error,
            "runner failed"
        );
        ToolCallResult::runner_failure(trace_id, &normalized)
    }

    fn status_url(&self, workflow_id: &WorkflowId) -> String {
        format!(
            "{}/{}",
            self.status_base_url.trim_end_matches('/'),
            workflow_id
        )
    }

    /// Reads the execution history and projects step progress.
    ///
    /// # Errors
    ///
    /// Returns the normalized engine error when the history cannot be read.
    pub async fn workflow_progress(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Progress, NormalizedError> {
        let events = self.workflows.history(workflow_id).await.map_err(|err| {
            let normalized = normalize(&err, None);
            warn!(%workflow_id, category = %normalized.category(), "history read failed");
            normalized
        })?;
        Ok(self.projector.project(&events))
    }

    /// Terminates a workflow execution.
    ///
    /// # Errors
    ///
    /// Returns the normalized engine error when termination fails.
    pub async fn cancel_workflow(
        &self,
        workflow_id: &WorkflowId,
        reason: &str,
    ) -> Result<(), NormalizedError> {
        self.workflows
            .terminate(workflow_id, reason)
            .await
            .map_err(|err| {
                let normalized = normalize(&err, None);
                warn!(%workflow_id, category = %normalized.category(), "cancel failed");
                normalized
            })?;
        info!(%workflow_id, reason, "workflow canceled");
        Ok(())
    }
}

fn memo(descriptor: &ToolDescriptor, context: &CallerContext) -> Map<String, Value> {
    let mut memo = Map::new();
    memo.insert("trace_id".into(), json!(context.trace_id().as_str()));
    memo.insert("tool_id".into(), json!(descriptor.id().as_str()));
    memo.insert("initiator_id".into(), json!(context.initiator_id()));
    memo.insert("app_id".into(), json!(context.app_id()));
    memo.insert("environment".into(), json!(context.environment()));
    if let Some(cost_center) = context.cost_center() {
        memo.insert("cost_center".into(), json!(cost_center));
    }
    memo
}

/// Builder for [`DispatchRouter`].
pub struct DispatchRouterBuilder {
    catalog: Arc<ToolCatalog>,
    capabilities: Arc<dyn CapabilityRunner>,
    workflows: Arc<dyn WorkflowRunner>,
    authenticator: EnvelopeAuthenticator,
    error_maps: ErrorMaps,
    defaults: CallDefaults,
    status_base_url: String,
    projector: ProgressProjector,
    ledger: Option<Arc<UsageLedger>>,
}

impl fmt::Debug for DispatchRouterBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchRouterBuilder")
            .field("catalog", &self.catalog)
            .finish_non_exhaustive()
    }
}

impl DispatchRouterBuilder {
    /// Sets the envelope authenticator.
    #[must_use]
    pub fn authenticator(mut self, authenticator: EnvelopeAuthenticator) -> Self {
        self.authenticator = authenticator;
        self
    }

    /// Sets the per-tool error maps.
    #[must_use]
    pub fn error_maps(mut self, error_maps: ErrorMaps) -> Self {
        self.error_maps = error_maps;
        self
    }

    /// Sets the caller context defaults.
    #[must_use]
    pub fn defaults(mut self, defaults: CallDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Sets the base of workflow status URLs.
    #[must_use]
    pub fn status_base_url(mut self, base: impl Into<String>) -> Self {
        self.status_base_url = base.into();
        self
    }

    /// Sets the progress projector.
    #[must_use]
    pub fn projector(mut self, projector: ProgressProjector) -> Self {
        self.projector = projector;
        self
    }

    /// Enables usage recording.
    #[must_use]
    pub fn ledger(mut self, ledger: Arc<UsageLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Finishes the router.
    #[must_use]
    pub fn build(self) -> DispatchRouter {
        DispatchRouter {
            catalog: self.catalog,
            authenticator: self.authenticator,
            approval: ApprovalGate,
            capabilities: self.capabilities,
            workflows: self.workflows,
            error_maps: self.error_maps,
            defaults: self.defaults,
            status_base_url: self.status_base_url,
            projector: self.projector,
            ledger: self.ledger,
        }
    }
}

/// Converts a panic inside a runner future into a [`RunnerError`].
async fn catch_runner_panic<T, F>(what: &str, trace_id: &TraceId, future: F) -> RunnerResult<T>
where
    F: Future<Output = RunnerResult<T>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let detail = payload
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
                .unwrap_or("non-string panic payload");
            error!(%trace_id, panic = detail, "{what} panicked");
            Err(RunnerError::new(format!("{what} panicked")).with_code(RUNNER_PANICKED))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use async_trait::async_trait;
    use gateway_policy::{EnvelopeMode, SigningSecret, sign};
    use gateway_primitives::{
        DataClassification, ToolId, ToolManifest, WorkflowEvent, WorkflowEventKind,
    };
    use gateway_runners::{LocalWorkflowEngine, RunnerResult, WorkflowHandle};

    use crate::normalize::ErrorCategory;
    use crate::progress::StepStatus;

    #[derive(Default)]
    struct RecordingCapabilities {
        calls: Mutex<Vec<CapabilityInvocation>>,
        failure: Option<RunnerError>,
    }

    impl RecordingCapabilities {
        fn failing(error: RunnerError) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                failure: Some(error),
            }
        }

        fn count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CapabilityRunner for RecordingCapabilities {
        async fn run(&self, invocation: CapabilityInvocation) -> RunnerResult<Value> {
            let args = invocation.args().clone();
            self.calls.lock().unwrap().push(invocation);
            match &self.failure {
                Some(err) => Err(err.clone()),
                None => Ok(json!({"echo": args})),
            }
        }
    }

    #[derive(Default)]
    struct RecordingWorkflows {
        starts: Mutex<Vec<WorkflowStart>>,
    }

    #[async_trait]
    impl WorkflowRunner for RecordingWorkflows {
        async fn start(&self, request: WorkflowStart) -> RunnerResult<WorkflowHandle> {
            let handle = WorkflowHandle::new(request.workflow_id().clone(), "run-1");
            self.starts.lock().unwrap().push(request);
            Ok(handle)
        }

        async fn history(&self, _workflow_id: &WorkflowId) -> RunnerResult<Vec<WorkflowEvent>> {
            Ok(Vec::new())
        }

        async fn terminate(&self, _workflow_id: &WorkflowId, _reason: &str) -> RunnerResult<()> {
            Ok(())
        }
    }

    fn catalog() -> Arc<ToolCatalog> {
        let manifest = ToolManifest::from_json_str(
            r#"{"tools": [
                {"id": "echo", "kind": "CAPABILITY", "dataClassification": "PUBLIC",
                 "argumentSchema": {"type": "object", "required": ["text"],
                                    "properties": {"text": {"type": "string"}}}},
                {"id": "report", "kind": "WORKFLOW", "workflowType": "ReportWorkflow"},
                {"id": "wipe", "kind": "CAPABILITY", "dataClassification": "RESTRICTED"},
                {"id": "archive", "kind": "WORKFLOW", "dataClassification": "RESTRICTED"}
            ]}"#,
        )
        .unwrap();
        Arc::new(ToolCatalog::from_manifest(manifest).unwrap())
    }

    fn secret() -> SigningSecret {
        SigningSecret::new("s3cret").unwrap()
    }

    fn router(
        capabilities: Arc<RecordingCapabilities>,
        workflows: Arc<RecordingWorkflows>,
    ) -> DispatchRouterBuilder {
        DispatchRouter::builder(catalog(), capabilities, workflows)
    }

    fn signed(trace: &str) -> CallEnvelope {
        let context = CallerContext::new(
            "alice",
            "tok-1",
            "portal",
            "prod",
            TraceId::new(trace).unwrap(),
        )
        .with_cost_center("cc-7");
        sign(&context, &secret()).unwrap()
    }

    #[tokio::test]
    async fn unknown_tools_are_rejected() {
        let capabilities = Arc::new(RecordingCapabilities::default());
        let router = router(capabilities.clone(), Arc::default()).build();
        for name in ["nope", "", "echo2"] {
            let result = router.call_tool(ToolCallRequest::new(name, json!({}))).await;
            assert!(result.is_error());
            assert_eq!(result.error(), Some("UNKNOWN_TOOL"));
            assert!(!result.trace_id().is_empty());
        }
        assert_eq!(capabilities.count(), 0);
    }

    #[tokio::test]
    async fn capability_success_wraps_result() {
        let capabilities = Arc::new(RecordingCapabilities::default());
        let router = router(capabilities.clone(), Arc::default()).build();
        let result = router
            .call_tool(ToolCallRequest::new("echo", json!({"text": "hi"})))
            .await;

        assert!(!result.is_error());
        let content = result.structured_content();
        assert_eq!(content.result, Some(json!({"echo": {"text": "hi"}})));
        let calls = capabilities.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].context().initiator_id(), "gateway");
        assert_eq!(calls[0].trace_id().as_str(), result.trace_id());
    }

    #[tokio::test]
    async fn schema_violations_never_reach_runner() {
        let capabilities = Arc::new(RecordingCapabilities::default());
        let router = router(capabilities.clone(), Arc::default()).build();
        let result = router
            .call_tool(ToolCallRequest::new("echo", json!({"text": 5})))
            .await;

        assert!(result.is_error());
        assert_eq!(result.error(), Some("SCHEMA_INVALID"));
        assert!(!result.structured_content().details.as_ref().unwrap().is_empty());
        assert_eq!(capabilities.count(), 0);
    }

    #[tokio::test]
    async fn restricted_tools_never_invoke_runners() {
        let capabilities = Arc::new(RecordingCapabilities::default());
        let workflows = Arc::new(RecordingWorkflows::default());
        let router = router(capabilities.clone(), workflows.clone()).build();

        for name in ["wipe", "archive"] {
            let result = router.call_tool(ToolCallRequest::new(name, json!({}))).await;
            assert!(result.is_error());
            assert_eq!(result.error(), Some("APPROVAL_REQUIRED"));
            assert_eq!(
                result.structured_content().data_classification,
                Some(DataClassification::Restricted)
            );
        }
        assert_eq!(capabilities.count(), 0);
        assert!(workflows.starts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn required_envelope_missing_is_unauthorized() {
        let capabilities = Arc::new(RecordingCapabilities::default());
        let router = router(capabilities.clone(), Arc::default())
            .authenticator(EnvelopeAuthenticator::new(
                EnvelopeMode::Required,
                vec![secret()],
            ))
            .build();

        let result = router
            .call_tool(ToolCallRequest::new("echo", json!({"text": "hi"})))
            .await;
        assert!(result.is_error());
        assert_eq!(result.error(), Some("UNAUTHORIZED"));
        assert!(TraceId::new(result.trace_id()).is_ok());
        assert_eq!(capabilities.count(), 0);
    }

    #[tokio::test]
    async fn tampered_envelope_is_rejected_even_when_optional() {
        let capabilities = Arc::new(RecordingCapabilities::default());
        let router = router(capabilities.clone(), Arc::default())
            .authenticator(EnvelopeAuthenticator::new(
                EnvelopeMode::Optional,
                vec![secret()],
            ))
            .build();

        let envelope = signed("trace-X");
        let mut context = envelope.context().clone();
        context["initiatorId"] = json!("mallory");
        let tampered = CallEnvelope::new(context, envelope.signature());

        let result = router
            .call_tool(ToolCallRequest::new("echo", json!({"text": "hi"})).with_envelope(tampered))
            .await;
        assert_eq!(result.error(), Some("UNAUTHORIZED"));
        assert_ne!(result.trace_id(), "trace-X");
        assert_eq!(capabilities.count(), 0);
    }

    #[tokio::test]
    async fn verified_envelope_trace_is_echoed() {
        let capabilities = Arc::new(RecordingCapabilities::default());
        let router = router(capabilities.clone(), Arc::default())
            .authenticator(EnvelopeAuthenticator::new(
                EnvelopeMode::Required,
                vec![secret()],
            ))
            .build();

        let result = router
            .call_tool(
                ToolCallRequest::new("echo", json!({"text": "hi"}))
                    .with_envelope(signed("trace-X")),
            )
            .await;
        assert!(!result.is_error());
        assert_eq!(result.trace_id(), "trace-X");
        let calls = capabilities.calls.lock().unwrap();
        assert_eq!(calls[0].context().initiator_id(), "alice");
    }

    #[tokio::test]
    async fn runner_errors_are_normalized() {
        let capabilities = Arc::new(RecordingCapabilities::failing(
            RunnerError::new("too many requests").with_status(429),
        ));
        let router = router(capabilities, Arc::default()).build();
        let result = router
            .call_tool(ToolCallRequest::new("echo", json!({"text": "hi"})))
            .await;

        assert!(result.is_error());
        let content = result.structured_content();
        assert_eq!(content.error.as_deref(), Some("too many requests"));
        assert_eq!(content.category, Some(ErrorCategory::RateLimit));
        assert_eq!(content.retryable, Some(true));
    }

    struct PanickingRunner;

    #[async_trait]
    impl CapabilityRunner for PanickingRunner {
        async fn run(&self, invocation: CapabilityInvocation) -> RunnerResult<Value> {
            if invocation.args().get("boom").is_some() {
                panic!("capability bug");
            }
            Ok(invocation.args().clone())
        }
    }

    #[async_trait]
    impl WorkflowRunner for PanickingRunner {
        async fn start(&self, _request: WorkflowStart) -> RunnerResult<WorkflowHandle> {
            panic!("engine bug");
        }

        async fn history(&self, _workflow_id: &WorkflowId) -> RunnerResult<Vec<WorkflowEvent>> {
            Ok(Vec::new())
        }

        async fn terminate(&self, _workflow_id: &WorkflowId, _reason: &str) -> RunnerResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn panicking_runners_become_fatal_errors() {
        let runner = Arc::new(PanickingRunner);
        let router = DispatchRouter::builder(catalog(), runner.clone(), runner).build();

        let result = router
            .call_tool(ToolCallRequest::new("echo", json!({"text": "hi", "boom": 1})))
            .await;
        assert!(result.is_error());
        let content = result.structured_content();
        assert_eq!(content.error.as_deref(), Some("capability panicked"));
        assert_eq!(content.category, Some(ErrorCategory::Fatal));
        assert_eq!(content.retryable, Some(false));
        assert_eq!(
            content.original_code,
            Some(gateway_runners::ErrorCode::from(RUNNER_PANICKED))
        );

        let started = router
            .call_tool(ToolCallRequest::new("report", json!({})))
            .await;
        assert!(started.is_error());
        assert_eq!(
            started.structured_content().error.as_deref(),
            Some("workflow start panicked")
        );

        let next = router
            .call_tool(ToolCallRequest::new("echo", json!({"text": "again"})))
            .await;
        assert!(!next.is_error());
        assert_eq!(next.structured_content().result, Some(json!({"text": "again"})));
    }

    #[tokio::test]
    async fn registered_error_map_is_consulted() {
        let capabilities = Arc::new(RecordingCapabilities::failing(
            RunnerError::new("disk quota").with_code("EQUOTA"),
        ));
        let maps = ErrorMaps::new().with(ToolId::new("echo").unwrap(), |_: &RunnerError| {
            Some(ErrorCategory::RateLimit)
        });
        let router = router(capabilities, Arc::default()).error_maps(maps).build();
        let result = router
            .call_tool(ToolCallRequest::new("echo", json!({"text": "hi"})))
            .await;
        assert_eq!(
            result.structured_content().category,
            Some(ErrorCategory::RateLimit)
        );
    }

    #[tokio::test]
    async fn workflow_start_returns_immediately_with_status_url() {
        let workflows = Arc::new(RecordingWorkflows::default());
        let router = router(Arc::default(), workflows.clone())
            .defaults(CallDefaults::default().with_cost_center("ops"))
            .status_base_url("https://gw.example/status/")
            .build();

        let result = router
            .call_tool(ToolCallRequest::new("report", json!({"month": 3})))
            .await;
        assert!(!result.is_error());

        let content = result.structured_content();
        let workflow_id = content.workflow_id.clone().unwrap();
        let trace = TraceId::new(result.trace_id()).unwrap();
        assert_eq!(
            workflow_id,
            WorkflowId::derive(&ToolId::new("report").unwrap(), &trace).to_string()
        );
        assert_eq!(
            content.status_url.as_deref(),
            Some(format!("https://gw.example/status/{workflow_id}").as_str())
        );
        assert_eq!(content.run_id.as_deref(), Some("run-1"));

        let starts = workflows.starts.lock().unwrap();
        assert_eq!(starts[0].workflow_type(), "ReportWorkflow");
        assert_eq!(starts[0].memo()["tool_id"], json!("report"));
        assert_eq!(starts[0].memo()["cost_center"], json!("ops"));
        assert_eq!(starts[0].memo()["trace_id"], json!(result.trace_id()));
    }

    #[tokio::test]
    async fn duplicate_workflow_start_is_a_normal_error() {
        let engine = Arc::new(LocalWorkflowEngine::new());
        let router = DispatchRouter::builder(
            catalog(),
            Arc::new(RecordingCapabilities::default()),
            engine.clone(),
        )
        .authenticator(EnvelopeAuthenticator::new(
            EnvelopeMode::Optional,
            vec![secret()],
        ))
        .build();

        let call = || ToolCallRequest::new("report", json!({})).with_envelope(signed("trace-dup"));
        assert!(!router.call_tool(call()).await.is_error());

        let second = router.call_tool(call()).await;
        assert!(second.is_error());
        assert_eq!(second.structured_content().category, Some(ErrorCategory::Fatal));
        assert_eq!(engine.len().await, 1);
    }

    #[tokio::test]
    async fn progress_and_cancel_go_through_the_engine() {
        let engine = Arc::new(LocalWorkflowEngine::new());
        let router = DispatchRouter::builder(
            catalog(),
            Arc::new(RecordingCapabilities::default()),
            engine.clone(),
        )
        .build();

        let result = router.call_tool(ToolCallRequest::new("report", json!({}))).await;
        let workflow_id =
            WorkflowId::from_raw(result.structured_content().workflow_id.clone().unwrap());

        let scheduled = engine
            .append_event(
                &workflow_id,
                WorkflowEventKind::Scheduled {
                    activity_id: "a-1".into(),
                    activity_type: "executeCapability".into(),
                    input: json!({"capId": "cap.one"}),
                },
            )
            .await
            .unwrap();
        engine
            .append_event(
                &workflow_id,
                WorkflowEventKind::Started {
                    scheduled_event_id: scheduled,
                },
            )
            .await
            .unwrap();

        let progress = router.workflow_progress(&workflow_id).await.unwrap();
        assert_eq!(progress.steps().len(), 1);
        assert_eq!(progress.steps()[0].status(), StepStatus::Running);

        router.cancel_workflow(&workflow_id, "user request").await.unwrap();
        assert_eq!(
            engine.termination_reason(&workflow_id).await.as_deref(),
            Some("user request")
        );

        let missing = router
            .workflow_progress(&WorkflowId::from_raw("missing"))
            .await
            .unwrap_err();
        assert_eq!(missing.category(), ErrorCategory::Fatal);
    }

    #[tokio::test]
    async fn ledger_records_by_budget_key() {
        let ledger = Arc::new(UsageLedger::new());
        let router = router(Arc::default(), Arc::default())
            .authenticator(EnvelopeAuthenticator::new(
                EnvelopeMode::Optional,
                vec![secret()],
            ))
            .ledger(ledger.clone())
            .build();

        router
            .call_tool(ToolCallRequest::new("echo", json!({"text": "a"})))
            .await;
        router
            .call_tool(
                ToolCallRequest::new("echo", json!({"text": "b"})).with_envelope(signed("t-1")),
            )
            .await;
        router.call_tool(ToolCallRequest::new("nope", json!({}))).await;

        let report = router.usage_report().await.unwrap();
        let keys: Vec<_> = report.iter().map(|entry| entry.budget_key.as_str()).collect();
        assert_eq!(keys, vec!["cc-7", "tool-gateway"]);
        assert!(report.iter().all(|entry| entry.calls == 1));
    }

    #[test]
    fn request_accepts_underscore_meta() {
        let envelope = signed("trace-m");
        let raw = json!({
            "name": "echo",
            "_meta": {"envelope": envelope}
        });
        let request: ToolCallRequest = serde_json::from_value(raw).unwrap();
        assert_eq!(request.arguments(), &json!({}));
        assert_eq!(request.envelope(), Some(&envelope));
    }
}
