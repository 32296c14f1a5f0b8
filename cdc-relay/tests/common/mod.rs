#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use cdc_relay::destination::queue::EventQueueRx;
use cdc_relay::error::RelayResult;
use cdc_relay::relay::{Relay, RelayOutcome, RelayPhase};
use cdc_relay::replication::client::ClusterClient;
use cdc_relay::store::CheckpointStore;
use cdc_relay::types::StreamEvent;
use cdc_relay_config::shared::{RelayConfig, RunMode};
use rand::random;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

pub fn test_config(mode: RunMode) -> RelayConfig {
    RelayConfig {
        stream_name: format!("cdc-relay(test-{})", random::<u32>()),
        mode,
        bootstrap_timeout_ms: 500,
        queue_capacity: 64,
        ..RelayConfig::default()
    }
}

/// Spawns `relay.run()` and returns its handle together with a phase receiver.
pub fn spawn_run<C, S>(
    mut relay: Relay<C, S>,
) -> (JoinHandle<RelayResult<RelayOutcome>>, watch::Receiver<RelayPhase>)
where
    C: ClusterClient + Send + Sync + 'static,
    S: CheckpointStore + Clone + Send + Sync + 'static,
{
    let phase_rx = relay.phase_rx();
    let handle = tokio::spawn(async move { relay.run().await });

    (handle, phase_rx)
}

pub async fn wait_for(notify: Arc<Notify>) {
    tokio::time::timeout(WAIT_TIMEOUT, notify.notified())
        .await
        .expect("timed out waiting for notification");
}

pub async fn wait_for_phase(phase_rx: &mut watch::Receiver<RelayPhase>, phase: RelayPhase) {
    tokio::time::timeout(WAIT_TIMEOUT, phase_rx.wait_for(|current| *current == phase))
        .await
        .expect("timed out waiting for relay phase")
        .expect("relay dropped its phase sender");
}

/// Polls `condition` until it holds.
pub async fn wait_until<F>(condition: F)
where
    F: Fn() -> bool,
{
    tokio::time::timeout(WAIT_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for condition");
}

pub async fn next_event(queue_rx: &mut EventQueueRx) -> StreamEvent {
    tokio::time::timeout(WAIT_TIMEOUT, queue_rx.recv())
        .await
        .expect("timed out waiting for downstream event")
        .expect("event queue closed")
}
