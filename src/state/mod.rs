pub mod hub;
pub mod registry;
pub mod scores;
pub mod session;
mod sse;
pub mod state_machine;
pub mod transitions;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, mpsc, watch};

use crate::{
    config::AppConfig,
    dao::snapshot_store::{ScoreSink, SnapshotStore},
    error::ServiceError,
};

pub use self::hub::SessionHub;
pub use self::sse::SseHub;
pub use self::state_machine::{AbortError, ApplyError, PhaseSnapshot, Plan, PlanError, PlanId};

/// Shared handle to the central application state.
pub type SharedState = Arc<AppState>;

/// Central application state: runtime configuration, the per-competition
/// session hubs, and the (optional) durable storage backends.
pub struct AppState {
    config: AppConfig,
    hubs: DashMap<String, Arc<SessionHub>>,
    snapshot_store: RwLock<Option<Arc<dyn SnapshotStore>>>,
    score_sink: RwLock<Option<Arc<dyn ScoreSink>>>,
    degraded: watch::Sender<bool>,
    dirty_tx: mpsc::UnboundedSender<String>,
    dirty_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        let (dirty_tx, dirty_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            config,
            hubs: DashMap::new(),
            snapshot_store: RwLock::new(None),
            score_sink: RwLock::new(None),
            degraded: degraded_tx,
            dirty_tx,
            dirty_rx: Mutex::new(Some(dirty_rx)),
        })
    }

    /// Immutable runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Sender that session hubs use to flag dirty durable state.
    pub fn dirty_sender(&self) -> mpsc::UnboundedSender<String> {
        self.dirty_tx.clone()
    }

    /// Hand the dirty-session receiver to the snapshot supervisor. Yields
    /// `None` on any call after the first.
    pub async fn take_dirty_receiver(&self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.dirty_rx.lock().await.take()
    }

    /// Registry of live session hubs keyed by competition id.
    pub fn hubs(&self) -> &DashMap<String, Arc<SessionHub>> {
        &self.hubs
    }

    /// Look up the hub coordinating a competition, if one is in memory.
    pub fn hub(&self, competition_id: &str) -> Option<Arc<SessionHub>> {
        self.hubs.get(competition_id).map(|entry| entry.clone())
    }

    /// Obtain a handle to the current snapshot store, if one is installed.
    pub async fn snapshot_store(&self) -> Option<Arc<dyn SnapshotStore>> {
        let guard = self.snapshot_store.read().await;
        guard.as_ref().cloned()
    }

    /// Obtain a handle to the current score sink, if one is installed.
    pub async fn score_sink(&self) -> Option<Arc<dyn ScoreSink>> {
        let guard = self.score_sink.read().await;
        guard.as_ref().cloned()
    }

    /// Snapshot store or the degraded-mode error.
    pub async fn require_snapshot_store(&self) -> Result<Arc<dyn SnapshotStore>, ServiceError> {
        self.snapshot_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install storage backends and leave degraded mode.
    pub async fn install_storage(&self, store: Arc<dyn SnapshotStore>, sink: Arc<dyn ScoreSink>) {
        {
            let mut guard = self.snapshot_store.write().await;
            *guard = Some(store);
        }
        {
            let mut guard = self.score_sink.write().await;
            *guard = Some(sink);
        }
        self.update_degraded(false).await;
    }

    /// Remove the storage backends and enter degraded (in-memory only) mode.
    pub async fn clear_storage(&self) {
        {
            let mut guard = self.snapshot_store.write().await;
            guard.take();
        }
        {
            let mut guard = self.score_sink.write().await;
            guard.take();
        }
        self.update_degraded(true).await;
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        let guard = self.snapshot_store.read().await;
        guard.is_none()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub async fn update_degraded(&self, value: bool) {
        if self.is_degraded().await == value {
            return;
        }

        let _ = self.degraded.send(value);
    }
}
