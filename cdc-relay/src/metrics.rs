use std::sync::Arc;
use std::sync::Once;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{Unit, counter, describe_counter, describe_gauge};

static REGISTER_METRICS: Once = Once::new();

pub const CDC_RELAY_PARTITIONS_TOTAL: &str = "cdc_relay_partitions_total";
pub const CDC_RELAY_EVENTS_PUBLISHED_TOTAL: &str = "cdc_relay_events_published_total";
pub const CDC_RELAY_EVENTS_DROPPED_TOTAL: &str = "cdc_relay_events_dropped_total";
pub const CDC_RELAY_SNAPSHOT_MARKERS_TOTAL: &str = "cdc_relay_snapshot_markers_total";
pub const CDC_RELAY_CHECKPOINT_WRITES_TOTAL: &str = "cdc_relay_checkpoint_writes_total";
pub const CDC_RELAY_CHECKPOINT_FAILURES_TOTAL: &str = "cdc_relay_checkpoint_failures_total";
pub const CDC_RELAY_TRANSPORT_RECONNECTS_TOTAL: &str = "cdc_relay_transport_reconnects_total";
pub const KIND_LABEL: &str = "kind";
pub const FULL: &str = "full";
pub const PARTIAL: &str = "partial";

/// Register metrics emitted by the relay.
///
/// Safe to call multiple times, the descriptions are registered only once.
pub(crate) fn register_metrics() {
    REGISTER_METRICS.call_once(|| {
        describe_gauge!(
            CDC_RELAY_PARTITIONS_TOTAL,
            Unit::Count,
            "Number of partitions relayed by the current run"
        );

        describe_counter!(
            CDC_RELAY_EVENTS_PUBLISHED_TOTAL,
            Unit::Count,
            "Events handed to the downstream queue"
        );

        describe_counter!(
            CDC_RELAY_EVENTS_DROPPED_TOTAL,
            Unit::Count,
            "Events dropped because the downstream queue was full"
        );

        describe_counter!(
            CDC_RELAY_SNAPSHOT_MARKERS_TOTAL,
            Unit::Count,
            "Snapshot markers applied to the stream state"
        );

        describe_counter!(
            CDC_RELAY_CHECKPOINT_WRITES_TOTAL,
            Unit::Count,
            "Successful checkpoint writes by kind"
        );

        describe_counter!(
            CDC_RELAY_CHECKPOINT_FAILURES_TOTAL,
            Unit::Count,
            "Failed checkpoint writes by kind"
        );

        describe_counter!(
            CDC_RELAY_TRANSPORT_RECONNECTS_TOTAL,
            Unit::Count,
            "Times the partition streams were reopened after a transport failure"
        );
    });
}

#[derive(Debug, Default)]
struct Counters {
    events_published: AtomicU64,
    events_dropped: AtomicU64,
    snapshot_markers: AtomicU64,
    full_checkpoints: AtomicU64,
    partial_checkpoints: AtomicU64,
    checkpoint_failures: AtomicU64,
    transport_reconnects: AtomicU64,
}

/// Counters of a relay run, mirrored to the global `metrics` recorder.
///
/// Non-fatal conditions like dropped events and failed checkpoint writes are only observable
/// through these counters and the logs.
#[derive(Debug, Clone, Default)]
pub struct RelayStats {
    counters: Arc<Counters>,
}

impl RelayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events_published(&self) -> u64 {
        self.counters.events_published.load(Ordering::Relaxed)
    }

    pub fn events_dropped(&self) -> u64 {
        self.counters.events_dropped.load(Ordering::Relaxed)
    }

    pub fn snapshot_markers(&self) -> u64 {
        self.counters.snapshot_markers.load(Ordering::Relaxed)
    }

    pub fn full_checkpoints(&self) -> u64 {
        self.counters.full_checkpoints.load(Ordering::Relaxed)
    }

    pub fn partial_checkpoints(&self) -> u64 {
        self.counters.partial_checkpoints.load(Ordering::Relaxed)
    }

    pub fn checkpoint_failures(&self) -> u64 {
        self.counters.checkpoint_failures.load(Ordering::Relaxed)
    }

    pub fn transport_reconnects(&self) -> u64 {
        self.counters.transport_reconnects.load(Ordering::Relaxed)
    }

    pub(crate) fn record_published(&self) {
        self.counters.events_published.fetch_add(1, Ordering::Relaxed);
        counter!(CDC_RELAY_EVENTS_PUBLISHED_TOTAL).increment(1);
    }

    pub(crate) fn record_dropped(&self) {
        self.counters.events_dropped.fetch_add(1, Ordering::Relaxed);
        counter!(CDC_RELAY_EVENTS_DROPPED_TOTAL).increment(1);
    }

    pub(crate) fn record_snapshot_marker(&self) {
        self.counters.snapshot_markers.fetch_add(1, Ordering::Relaxed);
        counter!(CDC_RELAY_SNAPSHOT_MARKERS_TOTAL).increment(1);
    }

    pub(crate) fn record_checkpoint(&self, full: bool) {
        let (kind, local) = if full {
            (FULL, &self.counters.full_checkpoints)
        } else {
            (PARTIAL, &self.counters.partial_checkpoints)
        };
        local.fetch_add(1, Ordering::Relaxed);
        counter!(CDC_RELAY_CHECKPOINT_WRITES_TOTAL, KIND_LABEL => kind).increment(1);
    }

    pub(crate) fn record_checkpoint_failure(&self, full: bool) {
        let kind = if full { FULL } else { PARTIAL };
        self.counters
            .checkpoint_failures
            .fetch_add(1, Ordering::Relaxed);
        counter!(CDC_RELAY_CHECKPOINT_FAILURES_TOTAL, KIND_LABEL => kind).increment(1);
    }

    pub(crate) fn record_reconnect(&self) {
        self.counters
            .transport_reconnects
            .fetch_add(1, Ordering::Relaxed);
        counter!(CDC_RELAY_TRANSPORT_RECONNECTS_TOTAL).increment(1);
    }
}
