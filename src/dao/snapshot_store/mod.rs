pub mod file;

use futures::future::BoxFuture;

use crate::dao::models::{ScoreRecord, SnapshotRecord};
use crate::dao::storage::StorageResult;

/// Abstraction over the durable store holding per-competition session
/// snapshots. One record per competition; the server adopts a stored record
/// only at bootstrap and overwrites it after every accepted mutation.
pub trait SnapshotStore: Send + Sync {
    /// Load the stored snapshot for a competition, if any.
    fn load(&self, competition_id: String) -> BoxFuture<'static, StorageResult<Option<SnapshotRecord>>>;
    /// Persist (overwrite) the snapshot for its competition.
    fn save(&self, record: SnapshotRecord) -> BoxFuture<'static, StorageResult<()>>;
    /// Drop the stored snapshot for a competition.
    fn delete(&self, competition_id: String) -> BoxFuture<'static, StorageResult<()>>;
    /// Cheap probe that the backend is usable.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Attempt to re-establish a failed backend.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}

/// Sink receiving finalized score submissions for the external reporting
/// collaborator; append-only from this component's point of view.
pub trait ScoreSink: Send + Sync {
    /// Append a batch of frozen scores.
    fn append(&self, records: Vec<ScoreRecord>) -> BoxFuture<'static, StorageResult<()>>;
}
