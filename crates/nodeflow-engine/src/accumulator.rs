use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{DateTime, Utc};

use nodeflow_core::types::{AbortReason, NodeResult, RunId, RunResponse, RunStatus};

/// Collects node results and run totals while a run is in flight.
#[derive(Debug)]
pub struct RunAccumulator {
    run_id: RunId,
    results: BTreeMap<String, NodeResult>,
    execution_order: Vec<String>,
    total_cost: f64,
    total_usage_units: u64,
    failed: bool,
    start_time: DateTime<Utc>,
    started: Instant,
}

impl RunAccumulator {
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            results: BTreeMap::new(),
            execution_order: Vec::new(),
            total_cost: 0.0,
            total_usage_units: 0,
            failed: false,
            start_time: Utc::now(),
            started: Instant::now(),
        }
    }

    /// Note that a node was dispatched.
    pub fn dispatched(&mut self, node_id: &str) {
        self.execution_order.push(node_id.to_string());
    }

    /// Record a finished dispatch. Cost and usage count toward run totals;
    /// a later result for the same id replaces the earlier one.
    pub fn record(&mut self, result: NodeResult) {
        if let Some(cost) = result.cost {
            self.total_cost += cost;
        }
        if let Some(usage) = result.usage {
            self.total_usage_units += usage.total_units;
        }
        self.results.insert(result.node_id.clone(), result);
    }

    /// Record a derived copy (`x-iter-N`, `p-branch-N`) without double-counting totals.
    pub fn record_derived(&mut self, result: NodeResult) {
        self.results.insert(result.node_id.clone(), result);
    }

    /// Mark the run as failed.
    pub fn fail(&mut self) {
        self.failed = true;
    }

    pub fn has_failed(&self) -> bool {
        self.failed
    }

    pub fn result(&self, node_id: &str) -> Option<&NodeResult> {
        self.results.get(node_id)
    }

    pub fn dispatch_count(&self) -> usize {
        self.execution_order.len()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn finish(
        self,
        skipped_node_ids: Vec<String>,
        abort_reason: Option<AbortReason>,
    ) -> RunResponse {
        let status = if self.failed || abort_reason.is_some() {
            RunStatus::Error
        } else {
            RunStatus::Success
        };
        let total_latency_ms = self.elapsed_ms();

        RunResponse {
            run_id: self.run_id,
            status,
            node_results: self.results,
            total_cost: self.total_cost,
            total_usage_units: self.total_usage_units,
            total_latency_ms,
            start_time: self.start_time,
            end_time: Utc::now(),
            skipped_node_ids,
            execution_order: self.execution_order,
            abort_reason,
        }
    }
}
