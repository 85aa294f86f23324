//! Newline-delimited JSON transport loop.
//!
//! One request per input line, exactly one compact JSON response per line on
//! the output stream. Requests are processed strictly in order; the loop only
//! returns on end of input or an I/O failure.

use std::sync::Arc;

use gateway_primitives::{TraceId, WorkflowId};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::result::ToolCallResult;
use crate::router::{DispatchRouter, ToolCallRequest};

/// JSON-RPC style code for unparseable lines.
pub const PARSE_ERROR: i64 = -32700;
/// Code for unknown methods.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Code for requests missing required parameters.
pub const INVALID_PARAMS: i64 = -32602;

/// Result alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Failures that end the transport loop.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Reading input or writing output failed.
    #[error("transport i/o failed: {0}")]
    Io(#[from] std::io::Error),
    /// A response could not be encoded.
    #[error("failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Counters reported when the loop ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServeSummary {
    /// Lines answered with a response.
    pub responses: u64,
    /// Lines that were not valid JSON.
    pub parse_errors: u64,
}

#[derive(Debug, Deserialize)]
struct WorkflowParams {
    #[serde(alias = "workflowId")]
    workflow_id: String,
    #[serde(default)]
    reason: Option<String>,
}

/// Serves requests from a line reader to a writer through the router.
#[derive(Debug, Clone)]
pub struct TransportLoop {
    router: Arc<DispatchRouter>,
}

impl TransportLoop {
    /// Creates a loop over the router.
    #[must_use]
    pub fn new(router: Arc<DispatchRouter>) -> Self {
        Self { router }
    }

    /// Reads requests until end of input, answering each one in order.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the streams fail; malformed requests
    /// are answered and never end the loop.
    pub async fn serve<R, W>(
        &self,
        mut reader: R,
        mut writer: W,
    ) -> TransportResult<ServeSummary>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = Vec::new();
        let mut summary = ServeSummary::default();
        info!("transport loop started");

        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }
            // Raw bytes: invalid UTF-8 is a parse error for this line only.
            let line = buf.trim_ascii();
            if line.is_empty() {
                continue;
            }

            let response = match serde_json::from_slice::<Value>(line) {
                Ok(request) => self.handle(request).await,
                Err(err) => {
                    warn!(error = %err, "unparseable request line");
                    summary.parse_errors += 1;
                    error_response(None, PARSE_ERROR, &format!("parse error: {err}"))
                }
            };

            let mut bytes = serde_json::to_vec(&response)?;
            bytes.push(b'\n');
            writer.write_all(&bytes).await?;
            writer.flush().await?;
            summary.responses += 1;
        }

        info!(
            responses = summary.responses,
            parse_errors = summary.parse_errors,
            "transport loop finished"
        );
        Ok(summary)
    }

    /// Handles one decoded request and returns its response object.
    pub async fn handle(&self, request: Value) -> Value {
        let id = request.get("id").cloned();
        let Some(method) = request.get("method").and_then(Value::as_str) else {
            return error_response(id, INVALID_PARAMS, "request is missing `method`");
        };
        // Parameters may be nested under `params` or sit beside `method`.
        let params = match request.get("params") {
            Some(params) if params.is_object() => params.clone(),
            _ => request.clone(),
        };
        debug!(method, "request received");

        match method {
            "tools/list" => with_id(id, json!({ "tools": self.router.list_tools() })),
            "tools/call" => match serde_json::from_value::<ToolCallRequest>(params) {
                Ok(call) => with_id(id, to_value(&self.router.call_tool(call).await)),
                Err(err) => invalid_params(id, method, &err),
            },
            "workflows/progress" => match serde_json::from_value::<WorkflowParams>(params) {
                Ok(params) => with_id(id, self.progress(params).await),
                Err(err) => invalid_params(id, method, &err),
            },
            "workflows/cancel" => match serde_json::from_value::<WorkflowParams>(params) {
                Ok(params) => with_id(id, self.cancel(params).await),
                Err(err) => invalid_params(id, method, &err),
            },
            "usage/report" => {
                let report = self.router.usage_report().await;
                with_id(
                    id,
                    json!({
                        "enabled": report.is_some(),
                        "entries": report.unwrap_or_default(),
                    }),
                )
            }
            other => error_response(id, METHOD_NOT_FOUND, &format!("method not found: {other}")),
        }
    }

    async fn progress(&self, params: WorkflowParams) -> Value {
        let workflow_id = WorkflowId::from_raw(params.workflow_id);
        match self.router.workflow_progress(&workflow_id).await {
            Ok(progress) => json!({ "workflow_id": workflow_id, "steps": progress.steps() }),
            Err(err) => to_value(&ToolCallResult::runner_failure(&TraceId::generate(), &err)),
        }
    }

    async fn cancel(&self, params: WorkflowParams) -> Value {
        let workflow_id = WorkflowId::from_raw(params.workflow_id);
        let reason = params.reason.as_deref().unwrap_or("canceled by caller");
        match self.router.cancel_workflow(&workflow_id, reason).await {
            Ok(()) => json!({ "workflow_id": workflow_id, "canceled": true }),
            Err(err) => to_value(&ToolCallResult::runner_failure(&TraceId::generate(), &err)),
        }
    }
}

fn to_value(result: &ToolCallResult) -> Value {
    serde_json::to_value(result).unwrap_or_else(|err| {
        warn!(error = %err, "failed to encode tool result");
        json!({ "isError": true, "structuredContent": { "error": "ENCODING_FAILED" } })
    })
}

fn with_id(id: Option<Value>, body: Value) -> Value {
    match (id, body) {
        (Some(id), Value::Object(mut map)) => {
            map.insert("id".into(), id);
            Value::Object(map)
        }
        (_, body) => body,
    }
}

fn invalid_params(id: Option<Value>, method: &str, err: &serde_json::Error) -> Value {
    error_response(id, INVALID_PARAMS, &format!("invalid {method} params: {err}"))
}

fn error_response(id: Option<Value>, code: i64, message: &str) -> Value {
    let mut body = Map::new();
    body.insert("error".into(), json!({ "code": code, "message": message }));
    with_id(id, Value::Object(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    use gateway_primitives::ToolManifest;
    use gateway_runners::{CapabilityRegistry, LocalWorkflowEngine};
    use gateway_tools::ToolCatalog;

    fn transport() -> TransportLoop {
        let manifest = ToolManifest::from_json_str(
            r#"{"tools": [
                {"id": "echo", "kind": "CAPABILITY", "dataClassification": "PUBLIC"},
                {"id": "report", "kind": "WORKFLOW"}
            ]}"#,
        )
        .unwrap();
        let catalog = Arc::new(ToolCatalog::from_manifest(manifest).unwrap());
        let mut registry = CapabilityRegistry::new();
        registry
            .register(
                gateway_primitives::ToolId::new("echo").unwrap(),
                |inv: gateway_runners::CapabilityInvocation| async move { Ok(inv.args().clone()) },
            )
            .unwrap();
        let router = DispatchRouter::builder(
            catalog,
            Arc::new(registry),
            Arc::new(LocalWorkflowEngine::new()),
        )
        .build();
        TransportLoop::new(Arc::new(router))
    }

    async fn run(input: &str) -> (Vec<Value>, ServeSummary) {
        let mut output = Vec::new();
        let summary = transport()
            .serve(input.as_bytes(), &mut output)
            .await
            .unwrap();
        let text = String::from_utf8(output).unwrap();
        let responses = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        (responses, summary)
    }

    #[tokio::test]
    async fn parse_errors_do_not_stop_the_loop() {
        let (responses, summary) = run(concat!(
            "{not json\n",
            "\n",
            "{\"id\": 2, \"method\": \"tools/list\"}\n",
        ))
        .await;

        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["error"]["code"], json!(PARSE_ERROR));
        assert_eq!(responses[1]["id"], json!(2));
        assert_eq!(responses[1]["tools"].as_array().unwrap().len(), 2);
        assert_eq!(summary.parse_errors, 1);
        assert_eq!(summary.responses, 2);
    }

    #[tokio::test]
    async fn invalid_utf8_line_gets_parse_error() {
        let mut input = b"{\"id\": 1, \"method\": \"tools/list\"}\n".to_vec();
        input.extend_from_slice(b"\xff\xfe\n");
        input.extend_from_slice(b"{\"id\": 3, \"method\": \"tools/list\"}\n");

        let mut output = Vec::new();
        let summary = transport()
            .serve(input.as_slice(), &mut output)
            .await
            .unwrap();
        let responses: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0]["id"], json!(1));
        assert_eq!(responses[1]["error"]["code"], json!(PARSE_ERROR));
        assert_eq!(responses[2]["id"], json!(3));
        assert_eq!(summary.parse_errors, 1);
    }

    #[tokio::test]
    async fn final_line_without_newline_is_served() {
        let (responses, summary) = run("{\"id\": 7, \"method\": \"tools/list\"}").await;
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["id"], json!(7));
        assert_eq!(summary.responses, 1);
    }

    #[tokio::test]
    async fn responses_follow_request_order() {
        let (responses, _) = run(concat!(
            "{\"id\": \"a\", \"method\": \"tools/call\", \"name\": \"echo\", \"arguments\": {\"n\": 1}}\n",
            "{\"id\": \"b\", \"method\": \"tools/call\", \"params\": {\"name\": \"missing\"}}\n",
            "{\"id\": \"c\", \"method\": \"nope\"}\n",
        ))
        .await;

        let ids: Vec<_> = responses.iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![json!("a"), json!("b"), json!("c")]);
        assert_eq!(responses[0]["structuredContent"]["result"], json!({"n": 1}));
        assert_eq!(responses[1]["structuredContent"]["error"], json!("UNKNOWN_TOOL"));
        assert_eq!(responses[2]["error"]["code"], json!(METHOD_NOT_FOUND));
    }

    #[tokio::test]
    async fn missing_fields_are_invalid_params() {
        let (responses, _) = run(concat!(
            "{\"id\": 1, \"method\": \"tools/call\"}\n",
            "{\"id\": 2}\n",
            "{\"id\": 3, \"method\": \"workflows/progress\"}\n",
        ))
        .await;
        for response in &responses {
            assert_eq!(response["error"]["code"], json!(INVALID_PARAMS));
        }
    }

    #[tokio::test]
    async fn workflow_methods_round_trip() {
        let transport = transport();
        let started = transport
            .handle(json!({"method": "tools/call", "name": "report", "arguments": {}}))
            .await;
        let workflow_id = started["structuredContent"]["workflow_id"].clone();
        assert!(workflow_id.is_string());

        let progress = transport
            .handle(json!({"method": "workflows/progress", "workflow_id": workflow_id}))
            .await;
        assert_eq!(progress["steps"], json!([]));

        let canceled = transport
            .handle(json!({"method": "workflows/cancel", "params": {"workflowId": workflow_id}}))
            .await;
        assert_eq!(canceled["canceled"], json!(true));

        let unknown = transport
            .handle(json!({"method": "workflows/progress", "workflow_id": "nope"}))
            .await;
        assert_eq!(unknown["isError"], json!(true));
        assert_eq!(unknown["structuredContent"]["category"], json!("FATAL"));
    }

    #[tokio::test]
    async fn usage_report_without_ledger_is_disabled() {
        let response = transport().handle(json!({"method": "usage/report"})).await;
        assert_eq!(response, json!({"enabled": false, "entries": []}));
    }

    #[tokio::test]
    async fn each_response_is_one_line() {
        let mut output = Vec::new();
        transport()
            .serve(
                "{\"method\":\"tools/call\",\"name\":\"echo\",\"arguments\":{\"text\":\"a\\nb\"}}\n"
                    .as_bytes(),
                &mut output,
            )
            .await
            .unwrap();
        let text = String::from_utf8(output).unwrap();
        assert_eq!(text.matches('\n').count(), 1);
        assert!(text.ends_with('\n'));
    }
}
