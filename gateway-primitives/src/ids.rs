//! Identifier types for tools, traces, and workflow executions.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

const MAX_TOOL_ID_LEN: usize = 128;
const MAX_TRACE_ID_LEN: usize = 256;

/// Namespace for deterministic workflow execution ids.
const WORKFLOW_NAMESPACE: Uuid = Uuid::from_u128(0x6f2c_91d4_3b7a_4e0f_9a51_c2d8_e4b7_1a36);

/// Unique identifier of a tool in the manifest.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ToolId(String);

impl ToolId {
    /// Creates a new tool identifier after validating its format.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidToolId`] if the identifier is empty, too long, or
    /// contains characters outside `[A-Za-z0-9._/-]`.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        validate_tool_id(&id)?;
        Ok(Self(id))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ToolId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ToolId> for String {
    fn from(value: ToolId) -> Self {
        value.0
    }
}

impl Display for ToolId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn validate_tool_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::InvalidToolId {
            id: String::new(),
            reason: "identifier cannot be empty".into(),
        });
    }

    if id.len() > MAX_TOOL_ID_LEN {
        return Err(Error::InvalidToolId {
            id: id.into(),
            reason: format!("identifier length must be <= {MAX_TOOL_ID_LEN}"),
        });
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
    {
        return Err(Error::InvalidToolId {
            id: id.into(),
            reason: "identifier must contain alphanumeric, dash, underscore, dot, or slash".into(),
        });
    }

    Ok(())
}

/// Correlation identifier carried by every call result.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TraceId(String);

impl TraceId {
    /// Generates a fresh gateway-side trace identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wraps a caller-supplied trace identifier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTraceId`] when the value is blank or too long.
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(Error::InvalidTraceId {
                reason: "trace id cannot be empty".into(),
            });
        }
        if value.len() > MAX_TRACE_ID_LEN {
            return Err(Error::InvalidTraceId {
                reason: format!("trace id length must be <= {MAX_TRACE_ID_LEN}"),
            });
        }
        Ok(Self(value))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TraceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TraceId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<TraceId> for String {
    fn from(value: TraceId) -> Self {
        value.0
    }
}

impl FromStr for TraceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// Identifier of a durable workflow execution.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(String);

impl WorkflowId {
    /// Derives the execution id for a tool call.
    ///
    /// The same tool and trace always yield the same id, so a redelivered call
    /// collides with the original execution at the engine instead of starting a
    /// second one.
    #[must_use]
    pub fn derive(tool: &ToolId, trace: &TraceId) -> Self {
        let mut name = Vec::with_capacity(tool.as_str().len() + trace.as_str().len() + 1);
        name.extend_from_slice(tool.as_str().as_bytes());
        name.push(0);
        name.extend_from_slice(trace.as_str().as_bytes());
        let digest = Uuid::new_v5(&WORKFLOW_NAMESPACE, &name);
        Self(format!("{tool}-{digest}"))
    }

    /// Wraps an existing execution identifier.
    #[must_use]
    pub fn from_raw(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for WorkflowId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
