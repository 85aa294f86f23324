//! Tool catalog lookup and argument validation.
//!
//! The catalog is built once from a [`ToolManifest`](gateway_primitives::ToolManifest)
//! and is read-only afterwards. Argument schemas are compiled at load time so a
//! malformed schema is a startup failure rather than a per-call surprise.

#![warn(missing_docs, clippy::pedantic)]

pub mod catalog;

pub use catalog::{CatalogError, CatalogResult, ToolCatalog};
