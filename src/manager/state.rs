//! Per-flow mutable state tracked between ingestion and reconciliation (§4.2).

use std::sync::Arc;
use std::time::Instant;

use crate::metrics::{AppMetricSet, TransportMetricSet};
use crate::records::{AppBiflowRecord, TransportBiflowRecord};

/// Transport flow state held in the transport flow table.
///
/// `dirty` marks a flow that has been touched since ingestion last looked at it. `metric_set` is
/// bound at most once, by a successful reconciliation, and read thereafter: while it is `None`,
/// ingestion only updates the raw record and leaves the reconciler to bind it; once bound, ingestion
/// emits directly, since reconciling the same state again is a no-op. `opened`/`terminated`/
/// `latency_set` track which one-shot observations have already fired. `bytes_sent`/`bytes_received`
/// hold the cumulative totals already folded into the byte counters, so a re-delivered record with
/// the same (or smaller) totals contributes nothing further.
#[derive(Clone)]
pub struct TransportFlowState {
    pub record: TransportBiflowRecord,
    pub dirty: bool,
    pub first_seen: Instant,
    pub last_touched: Instant,
    pub metric_set: Option<Arc<TransportMetricSet>>,
    pub opened: bool,
    pub terminated: bool,
    pub latency_set: bool,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl TransportFlowState {
    pub fn new(record: TransportBiflowRecord) -> Self {
        let now = Instant::now();
        TransportFlowState {
            record,
            dirty: true,
            first_seen: now,
            last_touched: now,
            metric_set: None,
            opened: false,
            terminated: false,
            latency_set: false,
            bytes_sent: 0,
            bytes_received: 0,
        }
    }

    /// Merges a newer record revision into this state. Always marks the flow dirty and refreshes
    /// `last_touched`; `first_seen`, the bound metric-set, and every counter above are left alone, so
    /// a flow's lifetime bookkeeping survives across any number of merges.
    pub fn merge(&mut self, record: TransportBiflowRecord) {
        self.record = record;
        self.dirty = true;
        self.last_touched = Instant::now();
    }
}

/// Application flow state held in the application flow table.
///
/// Mirrors [`TransportFlowState`]'s bind-once `metric_set` and one-shot `terminated` flag; there is
/// no byte/latency bookkeeping here since the request counter only ever fires once, on completion.
#[derive(Clone)]
pub struct AppFlowState {
    pub record: AppBiflowRecord,
    pub dirty: bool,
    pub last_touched: Instant,
    pub metric_set: Option<Arc<AppMetricSet>>,
    pub terminated: bool,
}

impl AppFlowState {
    pub fn new(record: AppBiflowRecord) -> Self {
        AppFlowState {
            record,
            dirty: true,
            last_touched: Instant::now(),
            metric_set: None,
            terminated: false,
        }
    }

    pub fn merge(&mut self, record: AppBiflowRecord) {
        self.record = record;
        self.dirty = true;
        self.last_touched = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(id: &str) -> TransportBiflowRecord {
        TransportBiflowRecord {
            id: id.to_string(),
            parent: None,
            connector_id: None,
            source_host: None,
            start_time: None,
            end_time: None,
            octets: None,
            octets_reverse: None,
            latency: None,
            latency_reverse: None,
        }
    }

    #[test]
    fn new_state_starts_dirty_unopened_and_unbound() {
        let state = TransportFlowState::new(transport("t1"));
        assert!(state.dirty);
        assert!(!state.opened);
        assert!(!state.terminated);
        assert!(state.metric_set.is_none());
        assert_eq!(state.bytes_sent, 0);
        assert_eq!(state.bytes_received, 0);
    }

    #[test]
    fn merge_keeps_dirty_and_replaces_record_without_touching_counters() {
        let mut state = TransportFlowState::new(transport("t1"));
        state.dirty = false;
        state.opened = true;
        state.bytes_sent = 100;
        state.merge(transport("t1"));
        assert!(state.dirty);
        assert!(state.opened);
        assert_eq!(state.bytes_sent, 100);
    }
}
