use std::{collections::HashSet, future::Future, sync::Arc, time::Duration, time::SystemTime};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{
        snapshot_store::{ScoreSink, SnapshotStore},
        storage::StorageError,
    },
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;
/// Coalesce bursts of accepted broadcasts into one write per session.
const WRITE_DEBOUNCE: Duration = Duration::from_millis(250);

/// Storage backends produced by one connection attempt.
pub type StorageBackends = (Arc<dyn SnapshotStore>, Arc<dyn ScoreSink>);

/// Connect to the storage backend and keep the shared state in degraded mode
/// while it is unavailable. Persistence failures never crash the server; they
/// flip the visible degraded flag and the hubs keep running in memory.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<StorageBackends, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;

    loop {
        match connect().await {
            Ok((store, sink)) => {
                state.install_storage(store.clone(), sink).await;
                info!("snapshot storage ready; leaving degraded mode");
                delay = INITIAL_DELAY;

                loop {
                    match store.health_check().await {
                        Ok(()) => {
                            if state.is_degraded().await {
                                info!("snapshot storage healthy again; leaving degraded mode");
                                state.update_degraded(false).await;
                            }
                            sleep(HEALTH_POLL_INTERVAL).await;
                        }
                        Err(_) => {
                            let mut attempt = 0;
                            let mut reconnect_delay = INITIAL_DELAY;
                            let mut reconnected = false;

                            while attempt < MAX_RECONNECT_ATTEMPTS {
                                match store.try_reconnect().await {
                                    Ok(()) => {
                                        info!(
                                            "snapshot storage reconnection succeeded after health check failure"
                                        );
                                        reconnected = true;
                                        break;
                                    }
                                    Err(reconnect_err) => {
                                        if attempt == 0 {
                                            warn!(
                                                attempt, error = %reconnect_err,
                                                "snapshot storage reconnect failed; entering degraded mode"
                                            );
                                            state.update_degraded(true).await;
                                        } else {
                                            warn!(attempt, error = %reconnect_err, "snapshot storage reconnect attempt failed");
                                        };
                                        attempt += 1;
                                        sleep(reconnect_delay).await;
                                        reconnect_delay = (reconnect_delay * 2).min(MAX_DELAY);
                                    }
                                }
                            }

                            if reconnected {
                                state.update_degraded(false).await;
                                sleep(HEALTH_POLL_INTERVAL).await;
                                continue;
                            } else {
                                warn!(
                                    "exhausted snapshot storage reconnect attempts; dropping backend and retrying from scratch"
                                );
                                state.clear_storage().await;
                                break;
                            }
                        }
                    }
                }

                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
            Err(err) => {
                warn!(error = %err, "snapshot storage connection attempt failed");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    }
}

/// Relay degraded-mode flips to every connected client and viewer stream, so
/// persistence trouble is a visible indicator instead of a silent log line.
pub async fn run_degraded_notifier(state: SharedState) {
    let mut watcher = state.degraded_watcher();

    while watcher.changed().await.is_ok() {
        let degraded = *watcher.borrow_and_update();
        for entry in state.hubs().iter() {
            entry
                .value()
                .broadcast_all(&crate::dto::ws::ServerMessage::SystemStatus { degraded });
        }
    }
}

/// Drain dirty-session signals and persist each flagged session's snapshot,
/// debounced so command bursts cost one write. Runs for the life of the
/// process; with no store installed the signals are dropped after a warning
/// (in-memory-only operation).
pub async fn run_writer(state: SharedState) {
    let Some(mut dirty_rx) = state.take_dirty_receiver().await else {
        warn!("snapshot writer already running; refusing to start twice");
        return;
    };

    while let Some(first) = dirty_rx.recv().await {
        let mut pending: HashSet<String> = HashSet::from([first]);

        // Collect everything else that gets flagged during the debounce window.
        sleep(WRITE_DEBOUNCE).await;
        while let Ok(competition_id) = dirty_rx.try_recv() {
            pending.insert(competition_id);
        }

        let Some(store) = state.snapshot_store().await else {
            warn!(
                sessions = pending.len(),
                "durable store unavailable; session snapshots kept in memory only"
            );
            continue;
        };

        for competition_id in pending {
            let Some(hub) = state.hub(&competition_id) else {
                continue;
            };
            let record = hub.snapshot_record(SystemTime::now()).await;
            if let Err(err) = store.save(record).await {
                warn!(
                    competition_id,
                    error = %err,
                    "failed to persist session snapshot; entering degraded mode"
                );
                state.update_degraded(true).await;
            }
        }
    }
}
