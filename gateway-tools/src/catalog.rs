//! Read-only tool catalog with compiled argument validators.

use std::collections::HashMap;
use std::fmt;

use gateway_primitives::{ToolDescriptor, ToolManifest};
use jsonschema::{Draft, Validator};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Result alias for catalog operations.
pub type CatalogResult<T> = Result<T, CatalogError>;

struct CatalogEntry {
    index: usize,
    validator: Validator,
}

/// Immutable catalog of tool descriptors keyed by id.
pub struct ToolCatalog {
    tools: Vec<ToolDescriptor>,
    index: HashMap<String, CatalogEntry>,
}

impl fmt::Debug for ToolCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.tools.iter().map(|tool| tool.id().as_str()).collect();
        f.debug_struct("ToolCatalog")
            .field("registered", &names)
            .finish()
    }
}

impl ToolCatalog {
    /// Builds the catalog, compiling every argument schema.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::InvalidSchema`] when a descriptor's schema does
    /// not compile.
    pub fn from_manifest(manifest: ToolManifest) -> CatalogResult<Self> {
        let tools = manifest.into_tools();
        let mut index = HashMap::with_capacity(tools.len());

        for (position, tool) in tools.iter().enumerate() {
            let validator = compile_schema(tool.argument_schema()).map_err(|reason| {
                CatalogError::InvalidSchema {
                    tool: tool.id().to_string(),
                    reason,
                }
            })?;
            index.insert(
                tool.id().to_string(),
                CatalogEntry {
                    index: position,
                    validator,
                },
            );
        }

        debug!(tools = tools.len(), "tool catalog loaded");
        Ok(Self { tools, index })
    }

    /// Lists every descriptor in manifest order.
    #[must_use]
    pub fn list(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    /// Returns the descriptor for the supplied tool name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index.get(name).map(|entry| &self.tools[entry.index])
    }

    /// Returns the number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns `true` when the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Validates call arguments against the tool's declared schema.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::UnknownTool`] when the tool is not registered and
    /// [`CatalogError::SchemaInvalid`] with every violation when the arguments
    /// do not satisfy the schema.
    pub fn validate(&self, name: &str, arguments: &Value) -> CatalogResult<()> {
        let entry = self.index.get(name).ok_or_else(|| CatalogError::UnknownTool {
            name: name.to_owned(),
        })?;

        if !arguments.is_object() {
            return Err(CatalogError::SchemaInvalid {
                tool: name.to_owned(),
                details: vec!["arguments must be a JSON object".to_owned()],
            });
        }

        let details: Vec<String> = entry
            .validator
            .iter_errors(arguments)
            .map(|err| err.to_string())
            .collect();

        if details.is_empty() {
            Ok(())
        } else {
            Err(CatalogError::SchemaInvalid {
                tool: name.to_owned(),
                details,
            })
        }
    }
}

fn compile_schema(schema: &Value) -> Result<Validator, String> {
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .map_err(|err| format!("invalid schema: {err}"))
}

/// Errors produced by catalog construction and validation.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Requested tool does not exist.
    #[error("tool `{name}` is not registered")]
    UnknownTool {
        /// Name supplied by the caller.
        name: String,
    },

    /// Arguments failed schema validation.
    #[error("arguments for `{tool}` failed validation: {}", details.join("; "))]
    SchemaInvalid {
        /// Tool whose schema rejected the arguments.
        tool: String,
        /// One entry per schema violation.
        details: Vec<String>,
    },

    /// A descriptor carried a schema that could not be compiled.
    #[error("tool `{tool}` has an invalid argument schema: {reason}")]
    InvalidSchema {
        /// Offending tool id.
        tool: String,
        /// Compiler error message.
        reason: String,
    },
}
