//! Caller identity carried alongside each tool call.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::ids::TraceId;
use crate::manifest::DataClassification;

/// Identity, authorization, and observability metadata for one call.
///
/// Produced either from the gateway's configured defaults or extracted from a
/// verified call envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallerContext {
    initiator_id: String,
    #[serde(default)]
    roles: BTreeSet<String>,
    token_ref: String,
    app_id: String,
    environment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cost_center: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data_classification: Option<DataClassification>,
    trace_id: TraceId,
}

impl CallerContext {
    /// Creates a context with the required fields and no roles.
    #[must_use]
    pub fn new(
        initiator_id: impl Into<String>,
        token_ref: impl Into<String>,
        app_id: impl Into<String>,
        environment: impl Into<String>,
        trace_id: TraceId,
    ) -> Self {
        Self {
            initiator_id: initiator_id.into(),
            roles: BTreeSet::new(),
            token_ref: token_ref.into(),
            app_id: app_id.into(),
            environment: environment.into(),
            cost_center: None,
            data_classification: None,
            trace_id,
        }
    }

    /// Adds roles, ignoring empty or whitespace-only entries.
    #[must_use]
    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for role in roles {
            let role = role.into();
            if !role.trim().is_empty() {
                self.roles.insert(role);
            }
        }
        self
    }

    /// Sets the cost center used for budget attribution.
    #[must_use]
    pub fn with_cost_center(mut self, cost_center: impl Into<String>) -> Self {
        self.cost_center = Some(cost_center.into());
        self
    }

    /// Returns the initiator identity.
    #[must_use]
    pub fn initiator_id(&self) -> &str {
        &self.initiator_id
    }

    /// Returns the granted roles.
    #[must_use]
    pub fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    /// Returns the opaque token reference.
    #[must_use]
    pub fn token_ref(&self) -> &str {
        &self.token_ref
    }

    /// Returns the calling application id.
    #[must_use]
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Returns the deployment environment label.
    #[must_use]
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Returns the optional cost center.
    #[must_use]
    pub fn cost_center(&self) -> Option<&str> {
        self.cost_center.as_deref()
    }

    /// Returns the optional data classification.
    #[must_use]
    pub const fn data_classification(&self) -> Option<DataClassification> {
        self.data_classification
    }

    /// Returns the trace id.
    #[must_use]
    pub fn trace_id(&self) -> &TraceId {
        &self.trace_id
    }

    /// Returns the key usage is attributed to: the cost center when present,
    /// otherwise the app id.
    #[must_use]
    pub fn budget_key(&self) -> &str {
        self.cost_center.as_deref().unwrap_or(&self.app_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> CallerContext {
        CallerContext::new("alice", "tok-1", "app", "prod", TraceId::new("t-1").unwrap())
    }

    #[test]
    fn optional_fields_are_omitted() {
        let value = serde_json::to_value(context()).unwrap();
        assert_eq!(value["initiatorId"], "alice");
        assert_eq!(value["traceId"], "t-1");
        assert!(value.get("costCenter").is_none());
        assert!(value.get("dataClassification").is_none());
    }

    #[test]
    fn roles_skip_blank_entries() {
        let ctx = context().with_roles(["admin", " ", "reader", "admin"]);
        assert_eq!(ctx.roles().len(), 2);
    }

    #[test]
    fn wire_form_decodes_and_validates_trace() {
        let ctx: CallerContext = serde_json::from_value(serde_json::json!({
            "initiatorId": "alice", "tokenRef": "tok-1", "appId": "app",
            "environment": "prod", "traceId": "t-9", "dataClassification": "CONFIDENTIAL"
        }))
        .unwrap();
        assert_eq!(ctx.trace_id().as_str(), "t-9");
        assert_eq!(
            ctx.data_classification(),
            Some(DataClassification::Confidential)
        );

        let oversized = serde_json::from_value::<CallerContext>(serde_json::json!({
            "initiatorId": "alice", "tokenRef": "tok-1", "appId": "app",
            "environment": "prod", "traceId": "x".repeat(1024)
        }));
        assert!(oversized.is_err());
    }

    #[test]
    fn budget_key_prefers_cost_center() {
        assert_eq!(context().budget_key(), "app");
        assert_eq!(context().with_cost_center("cc-42").budget_key(), "cc-42");
    }
}
