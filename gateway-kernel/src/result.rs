//! Result shapes returned to transport clients.

use std::fmt;

use gateway_primitives::{DataClassification, TraceId, WorkflowId};
use gateway_runners::ErrorCode;
use serde::Serialize;
use serde_json::Value;

use crate::normalize::{ErrorCategory, NormalizedError};

/// Errors the gateway resolves locally, before any runner is involved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayErrorCode {
    /// Tool name not present in the manifest.
    UnknownTool,
    /// Envelope missing or failed verification.
    Unauthorized,
    /// Tool requires human approval.
    ApprovalRequired,
    /// Arguments failed schema validation.
    SchemaInvalid,
}

impl GatewayErrorCode {
    /// Wire name of the code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnknownTool => "UNKNOWN_TOOL",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::ApprovalRequired => "APPROVAL_REQUIRED",
            Self::SchemaInvalid => "SCHEMA_INVALID",
        }
    }
}

impl fmt::Display for GatewayErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured payload of a [`ToolCallResult`]. Absent fields are omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StructuredContent {
    /// Trace id of the call; always present.
    pub trace_id: String,
    /// Capability output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Started workflow execution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    /// Where the caller can poll the execution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_url: Option<String>,
    /// Engine run id of the started execution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// Gateway code or normalized runner message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Normalized category of a runner failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<ErrorCategory>,
    /// Whether a runner failure may be retried.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    /// Runner error code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_code: Option<ErrorCode>,
    /// Why a runner failure is not retryable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub non_retryable_reason: Option<String>,
    /// Schema violations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<String>>,
    /// Classification that triggered an approval hold.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_classification: Option<DataClassification>,
    /// Tool the error refers to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// Human-readable reason for a gateway-level rejection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl StructuredContent {
    fn traced(trace_id: &TraceId) -> Self {
        Self {
            trace_id: trace_id.to_string(),
            ..Self::default()
        }
    }
}

/// Text block mirroring the structured content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextContent {
    #[serde(rename = "type")]
    kind: &'static str,
    text: String,
}

/// Outcome of one `tools/call` request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    is_error: bool,
    content: Vec<TextContent>,
    structured_content: StructuredContent,
}

impl ToolCallResult {
    fn from_content(is_error: bool, structured_content: StructuredContent) -> Self {
        let text = serde_json::to_string(&structured_content).unwrap_or_default();
        Self {
            is_error,
            content: vec![TextContent { kind: "text", text }],
            structured_content,
        }
    }

    /// Successful capability call.
    #[must_use]
    pub fn capability_output(trace_id: &TraceId, result: Value) -> Self {
        Self::from_content(
            false,
            StructuredContent {
                result: Some(result),
                ..StructuredContent::traced(trace_id)
            },
        )
    }

    /// Acknowledged workflow start.
    #[must_use]
    pub fn workflow_started(
        trace_id: &TraceId,
        workflow_id: &WorkflowId,
        status_url: String,
        run_id: String,
    ) -> Self {
        Self::from_content(
            false,
            StructuredContent {
                workflow_id: Some(workflow_id.to_string()),
                status_url: Some(status_url),
                run_id: Some(run_id),
                ..StructuredContent::traced(trace_id)
            },
        )
    }

    /// Call rejected by the gateway itself.
    #[must_use]
    pub fn rejected(trace_id: &TraceId, code: GatewayErrorCode, tool: &str) -> Self {
        Self::from_content(
            true,
            StructuredContent {
                error: Some(code.as_str().to_owned()),
                tool: Some(tool.to_owned()),
                ..StructuredContent::traced(trace_id)
            },
        )
    }

    /// Call rejected because authentication failed.
    #[must_use]
    pub fn unauthorized(trace_id: &TraceId, tool: &str, reason: String) -> Self {
        let mut result = Self::rejected(trace_id, GatewayErrorCode::Unauthorized, tool);
        result.structured_content.reason = Some(reason);
        result.refresh_text();
        result
    }

    /// Arguments failed schema validation.
    #[must_use]
    pub fn schema_invalid(trace_id: &TraceId, tool: &str, details: Vec<String>) -> Self {
        let mut result = Self::rejected(trace_id, GatewayErrorCode::SchemaInvalid, tool);
        result.structured_content.details = Some(details);
        result.refresh_text();
        result
    }

    /// Call held for human approval.
    #[must_use]
    pub fn approval_required(
        trace_id: &TraceId,
        tool: &str,
        data_classification: DataClassification,
    ) -> Self {
        let mut result = Self::rejected(trace_id, GatewayErrorCode::ApprovalRequired, tool);
        result.structured_content.data_classification = Some(data_classification);
        result.refresh_text();
        result
    }

    /// Runner failure after normalization.
    #[must_use]
    pub fn runner_failure(trace_id: &TraceId, error: &NormalizedError) -> Self {
        Self::from_content(
            true,
            StructuredContent {
                error: Some(error.message().to_owned()),
                category: Some(error.category()),
                retryable: Some(error.retryable()),
                original_code: error.original_code().cloned(),
                non_retryable_reason: error.non_retryable_reason().map(str::to_owned),
                ..StructuredContent::traced(trace_id)
            },
        )
    }

    fn refresh_text(&mut self) {
        let text = serde_json::to_string(&self.structured_content).unwrap_or_default();
        self.content = vec![TextContent { kind: "text", text }];
    }

    /// Returns `true` for failures.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.is_error
    }

    /// Returns the structured payload.
    #[must_use]
    pub fn structured_content(&self) -> &StructuredContent {
        &self.structured_content
    }

    /// Returns the trace id carried by the result.
    #[must_use]
    pub fn trace_id(&self) -> &str {
        &self.structured_content.trace_id
    }

    /// Returns the `error` field of a failure.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.structured_content.error.as_deref()
    }
}
