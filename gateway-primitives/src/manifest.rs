//! Tool descriptors and the manifest they are loaded from.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::ids::ToolId;

const MAX_DESCRIPTION_LEN: usize = 4096;

/// How a tool executes once a call is admitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolKind {
    /// Synchronous request/response execution through the capability runner.
    Capability,
    /// Durable background execution started on the workflow engine.
    Workflow,
}

/// Sensitivity tier of the data a tool touches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataClassification {
    /// Safe for anyone.
    Public,
    /// Internal to the organization.
    #[default]
    Internal,
    /// Limited distribution.
    Confidential,
    /// Requires human approval before any execution.
    Restricted,
}

impl DataClassification {
    /// Returns the wire label of the classification.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Public => "PUBLIC",
            Self::Internal => "INTERNAL",
            Self::Confidential => "CONFIDENTIAL",
            Self::Restricted => "RESTRICTED",
        }
    }
}

impl fmt::Display for DataClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable description of a callable tool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    id: ToolId,
    kind: ToolKind,
    #[serde(default = "empty_object_schema")]
    argument_schema: Value,
    #[serde(default)]
    data_classification: DataClassification,
    #[serde(default)]
    description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    workflow_type: Option<String>,
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object" })
}

impl ToolDescriptor {
    /// Starts building a descriptor for the supplied id and kind.
    #[must_use]
    pub fn builder(id: ToolId, kind: ToolKind) -> ToolDescriptorBuilder {
        ToolDescriptorBuilder {
            id,
            kind,
            argument_schema: None,
            data_classification: DataClassification::default(),
            description: None,
            workflow_type: None,
        }
    }

    /// Returns the tool identifier.
    #[must_use]
    pub fn id(&self) -> &ToolId {
        &self.id
    }

    /// Returns the execution kind.
    #[must_use]
    pub const fn kind(&self) -> ToolKind {
        self.kind
    }

    /// Returns the JSON Schema that arguments must satisfy.
    #[must_use]
    pub fn argument_schema(&self) -> &Value {
        &self.argument_schema
    }

    /// Returns the data classification tier.
    #[must_use]
    pub const fn data_classification(&self) -> DataClassification {
        self.data_classification
    }

    /// Returns the human-readable description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the engine workflow type, defaulting to the tool id.
    #[must_use]
    pub fn workflow_type(&self) -> &str {
        self.workflow_type
            .as_deref()
            .unwrap_or_else(|| self.id.as_str())
    }

    fn check(&self) -> Result<()> {
        if !self.argument_schema.is_object() && !self.argument_schema.is_boolean() {
            return Err(Error::InvalidDescriptor {
                reason: format!("tool `{}` argument schema must be an object", self.id),
            });
        }
        if self.description.len() > MAX_DESCRIPTION_LEN {
            return Err(Error::InvalidDescriptor {
                reason: format!(
                    "tool `{}` description length must be <= {MAX_DESCRIPTION_LEN}",
                    self.id
                ),
            });
        }
        if let Some(workflow_type) = &self.workflow_type {
            if self.kind != ToolKind::Workflow {
                return Err(Error::InvalidDescriptor {
                    reason: format!(
                        "tool `{}` declares a workflow type but is not a workflow",
                        self.id
                    ),
                });
            }
            if workflow_type.trim().is_empty() {
                return Err(Error::InvalidDescriptor {
                    reason: format!("tool `{}` workflow type cannot be empty", self.id),
                });
            }
        }
        Ok(())
    }
}

/// Builder for [`ToolDescriptor`].
#[derive(Debug)]
pub struct ToolDescriptorBuilder {
    id: ToolId,
    kind: ToolKind,
    argument_schema: Option<Value>,
    data_classification: DataClassification,
    description: Option<String>,
    workflow_type: Option<String>,
}

impl ToolDescriptorBuilder {
    /// Sets the argument schema.
    #[must_use]
    pub fn argument_schema(mut self, schema: Value) -> Self {
        self.argument_schema = Some(schema);
        self
    }

    /// Sets the data classification.
    #[must_use]
    pub fn data_classification(mut self, classification: DataClassification) -> Self {
        self.data_classification = classification;
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the engine workflow type for workflow tools.
    #[must_use]
    pub fn workflow_type(mut self, workflow_type: impl Into<String>) -> Self {
        self.workflow_type = Some(workflow_type.into());
        self
    }

    /// Finalises the descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDescriptor`] when the schema is not a JSON object,
    /// the description is oversized, or a workflow type is set on a capability.
    pub fn build(self) -> Result<ToolDescriptor> {
        let descriptor = ToolDescriptor {
            id: self.id,
            kind: self.kind,
            argument_schema: self.argument_schema.unwrap_or_else(empty_object_schema),
            data_classification: self.data_classification,
            description: self.description.unwrap_or_default(),
            workflow_type: self.workflow_type,
        };
        descriptor.check()?;
        Ok(descriptor)
    }
}

/// Static catalog document listing every tool the gateway exposes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolManifest {
    tools: Vec<ToolDescriptor>,
}

impl ToolManifest {
    /// Creates a manifest from descriptors, rejecting duplicate ids.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateTool`] when two descriptors share an id, or
    /// [`Error::InvalidDescriptor`] when a descriptor fails validation.
    pub fn new(tools: Vec<ToolDescriptor>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(tools.len());
        for tool in &tools {
            tool.check()?;
            if !seen.insert(tool.id().as_str()) {
                return Err(Error::DuplicateTool {
                    id: tool.id().to_string(),
                });
            }
        }
        Ok(Self { tools })
    }

    /// Parses a manifest from its JSON representation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Manifest`] when the document is malformed, plus any
    /// error produced by [`ToolManifest::new`].
    pub fn from_json_str(document: &str) -> Result<Self> {
        let raw: Self = serde_json::from_str(document)?;
        Self::new(raw.tools)
    }

    /// Returns the descriptors in declaration order.
    #[must_use]
    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    /// Consumes the manifest, yielding its descriptors.
    #[must_use]
    pub fn into_tools(self) -> Vec<ToolDescriptor> {
        self.tools
    }
}
