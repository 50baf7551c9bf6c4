// Checkpointing - durable, versioned run state with compare-and-swap
use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::error::EngineError;
use crate::models::{Run, VersionedRun};

/// Durable key/value persistence of run state. Append-only versioned rows:
/// a write with a stale expected version loses the race and reports a
/// conflict instead of clobbering the newer state.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Latest checkpoint for a run.
    async fn get(&self, run_id: &str) -> Result<Option<VersionedRun>, EngineError>;

    /// Persist `run` as version `expected + 1`, failing with
    /// `EngineError::Conflict` if `expected` is not the latest version.
    /// `expected = 0` creates the first checkpoint. Returns the new version.
    async fn put_if_version(&self, expected: i32, run: &Run) -> Result<i32, EngineError>;

    /// Latest checkpoint for a period key, only if that run is non-terminal.
    async fn find_active_by_period_key(
        &self,
        period_key: &str,
    ) -> Result<Option<VersionedRun>, EngineError>;
}

/// Postgres-backed store. One JSONB row per (run_id, version); the primary
/// key on that pair is what makes `put_if_version` atomic.
pub struct PgCheckpointStore {
    pool: PgPool,
}

impl PgCheckpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Setup checkpoint table.
    pub async fn setup(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS run_checkpoints (
                run_id VARCHAR(255) NOT NULL,
                period_key VARCHAR(512) NOT NULL,
                version INTEGER NOT NULL,
                state JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (run_id, version)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_run_checkpoints_period_key
            ON run_checkpoints(period_key)
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("run checkpoint table ready");
        Ok(())
    }

    async fn load_latest(&self, run_id: &str) -> Result<Option<VersionedRun>, EngineError> {
        let row: Option<(serde_json::Value, i32)> = sqlx::query_as(
            r#"
            SELECT state, version
            FROM run_checkpoints
            WHERE run_id = $1
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((state, version)) => {
                let run: Run = serde_json::from_value(state)?;
                Ok(Some(VersionedRun { run, version }))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    async fn get(&self, run_id: &str) -> Result<Option<VersionedRun>, EngineError> {
        self.load_latest(run_id).await
    }

    async fn put_if_version(&self, expected: i32, run: &Run) -> Result<i32, EngineError> {
        let version = expected + 1;
        let state = serde_json::to_value(run)?;

        let result = sqlx::query(
            r#"
            INSERT INTO run_checkpoints (run_id, period_key, version, state, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&run.run_id)
        .bind(&run.period_key)
        .bind(version)
        .bind(state)
        .bind(Utc::now())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!(run_id = %run.run_id, version, stage = %run.stage, "💾 checkpoint saved");
                Ok(version)
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(EngineError::Conflict(run.run_id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_active_by_period_key(
        &self,
        period_key: &str,
    ) -> Result<Option<VersionedRun>, EngineError> {
        let row: Option<(serde_json::Value, i32)> = sqlx::query_as(
            r#"
            SELECT state, version
            FROM run_checkpoints
            WHERE period_key = $1
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .bind(period_key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((state, version)) => {
                let run: Run = serde_json::from_value(state)?;
                if run.is_active() {
                    Ok(Some(VersionedRun { run, version }))
                } else {
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }
}

/// In-memory store with the same CAS semantics. Used by tests and useful for
/// running the engine without Postgres.
#[derive(Default)]
pub struct MemoryStore {
    runs: Mutex<HashMap<String, Vec<(i32, Run)>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of checkpoints written for a run. Test hook.
    pub fn version_count(&self, run_id: &str) -> usize {
        self.runs
            .lock()
            .unwrap()
            .get(run_id)
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn get(&self, run_id: &str) -> Result<Option<VersionedRun>, EngineError> {
        let runs = self.runs.lock().unwrap();
        Ok(runs.get(run_id).and_then(|versions| {
            versions.last().map(|(version, run)| VersionedRun {
                run: run.clone(),
                version: *version,
            })
        }))
    }

    async fn put_if_version(&self, expected: i32, run: &Run) -> Result<i32, EngineError> {
        let mut runs = self.runs.lock().unwrap();
        let versions = runs.entry(run.run_id.clone()).or_default();
        let latest = versions.last().map(|(v, _)| *v).unwrap_or(0);
        if latest != expected {
            return Err(EngineError::Conflict(run.run_id.clone()));
        }
        let version = expected + 1;
        versions.push((version, run.clone()));
        Ok(version)
    }

    async fn find_active_by_period_key(
        &self,
        period_key: &str,
    ) -> Result<Option<VersionedRun>, EngineError> {
        let runs = self.runs.lock().unwrap();
        for versions in runs.values() {
            if let Some((version, run)) = versions.last() {
                if run.period_key == period_key && run.is_active() {
                    return Ok(Some(VersionedRun {
                        run: run.clone(),
                        version: *version,
                    }));
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RunKind, RunStage};

    fn sample_run(id: &str) -> Run {
        Run::new(
            id.to_string(),
            RunKind::Weekly,
            "2026-W04".to_string(),
            vec![],
        )
    }

    #[tokio::test]
    async fn stale_writer_gets_conflict() {
        let store = MemoryStore::new();
        let run = sample_run("weekly-2026-W04");

        let v1 = store.put_if_version(0, &run).await.unwrap();
        assert_eq!(v1, 1);

        let mut advanced = run.clone();
        advanced.set_stage(RunStage::Deduplicating);
        store.put_if_version(1, &advanced).await.unwrap();

        // A second writer holding version 1 must not clobber version 2.
        let err = store.put_if_version(1, &run).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));

        let latest = store.get("weekly-2026-W04").await.unwrap().unwrap();
        assert_eq!(latest.version, 2);
        assert_eq!(latest.run.stage, RunStage::Deduplicating);
    }

    #[tokio::test]
    async fn terminal_runs_are_not_active() {
        let store = MemoryStore::new();
        let mut run = sample_run("weekly-2026-W05");
        run.period_key = "2026-W05".to_string();
        store.put_if_version(0, &run).await.unwrap();

        assert!(store
            .find_active_by_period_key("2026-W05")
            .await
            .unwrap()
            .is_some());

        run.set_stage(RunStage::Completed);
        store.put_if_version(1, &run).await.unwrap();

        assert!(store
            .find_active_by_period_key("2026-W05")
            .await
            .unwrap()
            .is_none());
    }
}
