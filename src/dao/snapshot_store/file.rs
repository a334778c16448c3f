use std::{io::ErrorKind, path::PathBuf, sync::Arc};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::{fs, io::AsyncWriteExt};

use crate::dao::{
    models::{SNAPSHOT_SCHEMA_VERSION, ScoreRecord, SnapshotRecord},
    snapshot_store::{ScoreSink, SnapshotStore},
    storage::{StorageError, StorageResult},
};

/// File-backed durable store: one JSON snapshot file per competition plus an
/// append-only JSON-lines score log, all under a single data directory.
/// Snapshot writes go through a temp file and an atomic rename so a crash
/// mid-write never truncates the last good record.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) the data directory.
    pub async fn connect(dir: PathBuf) -> StorageResult<Arc<Self>> {
        fs::create_dir_all(&dir).await.map_err(|err| {
            StorageError::unavailable(format!("creating data directory {}", dir.display()), err)
        })?;
        Ok(Arc::new(Self { dir }))
    }

    fn snapshot_path(&self, competition_id: &str) -> PathBuf {
        self.dir
            .join(format!("snapshot-{}.json", sanitize(competition_id)))
    }

    fn score_log_path(&self, competition_id: &str) -> PathBuf {
        self.dir
            .join(format!("scores-{}.jsonl", sanitize(competition_id)))
    }
}

impl SnapshotStore for FileStore {
    fn load(
        &self,
        competition_id: String,
    ) -> BoxFuture<'static, StorageResult<Option<SnapshotRecord>>> {
        let path = self.snapshot_path(&competition_id);
        async move {
            let contents = match fs::read_to_string(&path).await {
                Ok(contents) => contents,
                Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
                Err(err) => {
                    return Err(StorageError::unavailable(
                        format!("reading snapshot {}", path.display()),
                        err,
                    ));
                }
            };

            let record: SnapshotRecord = serde_json::from_str(&contents).map_err(|err| {
                StorageError::corrupted(format!("snapshot {} unparseable: {err}", path.display()))
            })?;

            if record.schema_version != SNAPSHOT_SCHEMA_VERSION {
                return Err(StorageError::corrupted(format!(
                    "snapshot {} has schema version {} (supported: {SNAPSHOT_SCHEMA_VERSION})",
                    path.display(),
                    record.schema_version
                )));
            }

            Ok(Some(record))
        }
        .boxed()
    }

    fn save(&self, record: SnapshotRecord) -> BoxFuture<'static, StorageResult<()>> {
        let path = self.snapshot_path(&record.competition_id);
        async move {
            let payload = serde_json::to_vec_pretty(&record).map_err(|err| {
                StorageError::corrupted(format!("snapshot not serializable: {err}"))
            })?;

            let temp_path = path.with_extension("json.tmp");
            fs::write(&temp_path, &payload).await.map_err(|err| {
                StorageError::unavailable(format!("writing {}", temp_path.display()), err)
            })?;
            fs::rename(&temp_path, &path).await.map_err(|err| {
                StorageError::unavailable(format!("replacing {}", path.display()), err)
            })?;

            Ok(())
        }
        .boxed()
    }

    fn delete(&self, competition_id: String) -> BoxFuture<'static, StorageResult<()>> {
        let path = self.snapshot_path(&competition_id);
        async move {
            match fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
                Err(err) => Err(StorageError::unavailable(
                    format!("deleting {}", path.display()),
                    err,
                )),
            }
        }
        .boxed()
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let dir = self.dir.clone();
        async move {
            let metadata = fs::metadata(&dir).await.map_err(|err| {
                StorageError::unavailable(format!("probing {}", dir.display()), err)
            })?;
            if !metadata.is_dir() {
                return Err(StorageError::corrupted(format!(
                    "{} is not a directory",
                    dir.display()
                )));
            }
            Ok(())
        }
        .boxed()
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let dir = self.dir.clone();
        async move {
            fs::create_dir_all(&dir).await.map_err(|err| {
                StorageError::unavailable(format!("recreating {}", dir.display()), err)
            })
        }
        .boxed()
    }
}

impl ScoreSink for FileStore {
    fn append(&self, records: Vec<ScoreRecord>) -> BoxFuture<'static, StorageResult<()>> {
        if records.is_empty() {
            return async { Ok(()) }.boxed();
        }

        let path = self.score_log_path(&records[0].competition_id);
        async move {
            let mut buffer = Vec::new();
            for record in &records {
                let line = serde_json::to_vec(record).map_err(|err| {
                    StorageError::corrupted(format!("score record not serializable: {err}"))
                })?;
                buffer.extend_from_slice(&line);
                buffer.push(b'\n');
            }

            let mut log = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .map_err(|err| {
                    StorageError::unavailable(format!("opening {}", path.display()), err)
                })?;
            log.write_all(&buffer).await.map_err(|err| {
                StorageError::unavailable(format!("appending to {}", path.display()), err)
            })?;
            log.flush().await.map_err(|err| {
                StorageError::unavailable(format!("flushing {}", path.display()), err)
            })?;

            Ok(())
        }
        .boxed()
    }
}

/// Keep competition ids filesystem-safe without losing uniqueness for the
/// identifiers the management platform actually emits.
fn sanitize(competition_id: &str) -> String {
    competition_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use time::macros::date;
    use uuid::Uuid;

    use super::*;
    use crate::state::{
        session::{CompetitionSession, RoutineSeed},
        state_machine::SessionPhase,
    };

    fn temp_store_dir() -> PathBuf {
        std::env::temp_dir().join(format!("compsync-live-test-{}", Uuid::new_v4()))
    }

    fn sample_record(competition_id: &str) -> SnapshotRecord {
        let seeds = vec![RoutineSeed {
            id: Uuid::new_v4(),
            title: "Opening Number".into(),
            studio_name: "Starlight Dance Co".into(),
            duration_ms: 180_000,
        }];
        let session =
            CompetitionSession::new(competition_id.into(), date!(2026 - 08 - 07), seeds);
        SnapshotRecord::capture(SessionPhase::NotStarted, &session, SystemTime::now())
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = temp_store_dir();
        let store = FileStore::connect(dir.clone()).await.unwrap();

        store.save(sample_record("comp-1")).await.unwrap();
        let loaded = store.load("comp-1".into()).await.unwrap().unwrap();
        assert_eq!(loaded.competition_id, "comp-1");
        assert_eq!(loaded.competition_day, "2026-08-07");

        let _ = fs::remove_dir_all(dir).await;
    }

    #[tokio::test]
    async fn load_missing_is_none() {
        let dir = temp_store_dir();
        let store = FileStore::connect(dir.clone()).await.unwrap();

        assert!(store.load("nobody".into()).await.unwrap().is_none());

        let _ = fs::remove_dir_all(dir).await;
    }

    #[tokio::test]
    async fn unsupported_schema_version_is_rejected() {
        let dir = temp_store_dir();
        let store = FileStore::connect(dir.clone()).await.unwrap();

        let mut record = sample_record("comp-2");
        record.schema_version = SNAPSHOT_SCHEMA_VERSION + 1;
        // Bypass `save` so the raw file carries the future version.
        let path = dir.join("snapshot-comp-2.json");
        fs::write(&path, serde_json::to_vec(&record).unwrap())
            .await
            .unwrap();

        assert!(matches!(
            store.load("comp-2".into()).await,
            Err(StorageError::Corrupted { .. })
        ));

        let _ = fs::remove_dir_all(dir).await;
    }

    #[tokio::test]
    async fn score_log_appends_one_line_per_record() {
        let dir = temp_store_dir();
        let store = FileStore::connect(dir.clone()).await.unwrap();

        let record = ScoreRecord {
            competition_id: "comp-3".into(),
            routine_id: Uuid::new_v4(),
            judge_id: "judge-1".into(),
            judge_name: "Dana".into(),
            score: 88.0,
            notes: None,
            submitted_at_unix_ms: 0,
        };
        store.append(vec![record.clone()]).await.unwrap();
        store.append(vec![record]).await.unwrap();

        let contents = fs::read_to_string(dir.join("scores-comp-3.jsonl"))
            .await
            .unwrap();
        assert_eq!(contents.lines().count(), 2);

        let _ = fs::remove_dir_all(dir).await;
    }

    #[tokio::test]
    async fn ids_with_path_characters_are_sanitized() {
        let dir = temp_store_dir();
        let store = FileStore::connect(dir.clone()).await.unwrap();

        store.save(sample_record("../evil/comp")).await.unwrap();
        assert!(store.load("../evil/comp".into()).await.unwrap().is_some());
        // The record landed inside the data directory, not outside it.
        assert!(
            fs::metadata(dir.join("snapshot-___evil_comp.json"))
                .await
                .is_ok()
        );

        let _ = fs::remove_dir_all(dir).await;
    }
}
