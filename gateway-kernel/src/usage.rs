//! In-memory usage ledger keyed by budget key.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::trace;

/// How a dispatched call ended, from the ledger's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageOutcome {
    /// Capability returned a result.
    Succeeded,
    /// Workflow start was acknowledged.
    WorkflowStarted,
    /// Runner reported a failure.
    Failed,
}

#[derive(Debug, Default)]
struct Totals {
    calls: u64,
    failures: u64,
    workflows_started: u64,
}

/// Snapshot of one budget key's totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageEntry {
    /// Cost center, or app id when no cost center was supplied.
    pub budget_key: String,
    /// Calls that reached a runner.
    pub calls: u64,
    /// Calls whose runner failed.
    pub failures: u64,
    /// Workflow starts acknowledged by the engine.
    pub workflows_started: u64,
}

/// Per-budget-key call counters.
///
/// Each key has its own lock so concurrent recordings for one key never lose
/// updates while different keys proceed independently.
#[derive(Debug, Default)]
pub struct UsageLedger {
    keys: Mutex<HashMap<String, Arc<Mutex<Totals>>>>,
}

impl UsageLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, budget_key: &str) -> Arc<Mutex<Totals>> {
        let mut keys = self.keys.lock().await;
        Arc::clone(keys.entry(budget_key.to_owned()).or_default())
    }

    /// Records one dispatched call.
    pub async fn record(&self, budget_key: &str, outcome: UsageOutcome) {
        let slot = self.slot(budget_key).await;
        let mut totals = slot.lock().await;
        totals.calls += 1;
        match outcome {
            UsageOutcome::Succeeded => {}
            UsageOutcome::WorkflowStarted => totals.workflows_started += 1,
            UsageOutcome::Failed => totals.failures += 1,
        }
        trace!(budget_key, calls = totals.calls, "usage recorded");
    }

    /// Returns totals for every key, sorted by key.
    pub async fn report(&self) -> Vec<UsageEntry> {
        let slots: Vec<(String, Arc<Mutex<Totals>>)> = {
            let keys = self.keys.lock().await;
            keys.iter()
                .map(|(key, slot)| (key.clone(), Arc::clone(slot)))
                .collect()
        };

        let mut entries = Vec::with_capacity(slots.len());
        for (budget_key, slot) in slots {
            let totals = slot.lock().await;
            entries.push(UsageEntry {
                budget_key,
                calls: totals.calls,
                failures: totals.failures,
                workflows_started: totals.workflows_started,
            });
        }
        entries.sort_by(|a, b| a.budget_key.cmp(&b.budget_key));
        entries
    }
}
