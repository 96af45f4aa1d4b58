//! Persistent knowledge store
//!
//! Three record kinds live in one embedded SQLite database:
//! - metrics: append-only measurements
//! - patterns: deduplicated `(kind, payload)` observations, upserted in place
//! - predictions: appended, later updated on their resolution fields only
//!
//! A single long-lived connection sits behind a mutex so every writer is
//! serialized, and each logical write runs in its own transaction. The
//! read-modify-write pattern upsert therefore cannot lose updates.

mod schema;

use crate::error::StoreError;
use crate::models::{Metric, Pattern, Prediction};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

pub use schema::CURRENT_SCHEMA_VERSION as SCHEMA_VERSION;

/// Row counts per table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCounts {
    pub metrics: u64,
    pub patterns: u64,
    pub predictions: u64,
}

/// Result of a WAL checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointStats {
    /// Non-zero when the checkpoint could not complete
    pub busy: i64,
    pub log_frames: i64,
    pub checkpointed_frames: i64,
}

/// SQLite-backed metrics/patterns/predictions store
pub struct KnowledgeStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for KnowledgeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeStore").finish_non_exhaustive()
    }
}

impl KnowledgeStore {
    /// Open (or create) the database at `path` in WAL mode
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        schema::apply_schema(&conn)?;
        debug!(path = %path.display(), "Opened knowledge store");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Private in-memory database
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        schema::apply_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    pub fn schema_version(&self) -> Result<Option<u32>, StoreError> {
        let conn = self.lock()?;
        Ok(schema::read_schema_version(&conn)?)
    }

    // ── metrics ────────────────────────────────────────────────────────

    /// Append a metric, returning its row id
    pub fn insert_metric(&self, metric: &Metric) -> Result<i64, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO metrics (name, value, timestamp, context) VALUES (?1, ?2, ?3, ?4)",
            params![
                metric.name,
                metric.value,
                metric.timestamp.timestamp_millis(),
                metric.context
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
    }

    /// Most recent metrics with this name, newest first
    pub fn recent_metrics(&self, name: &str, limit: usize) -> Result<Vec<Metric>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT name, value, timestamp, context FROM metrics \
             WHERE name = ?1 ORDER BY timestamp DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![name, limit as i64], row_to_metric)?;
        let mut metrics = Vec::new();
        for row in rows {
            metrics.push(row?);
        }
        Ok(metrics)
    }

    /// Delete metrics recorded before `cutoff`, returning how many went
    pub fn prune_metrics_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM metrics WHERE timestamp < ?1",
            params![cutoff.timestamp_millis()],
        )?;
        tx.commit()?;
        Ok(removed)
    }

    // ── patterns ───────────────────────────────────────────────────────

    /// Record one observation of `(kind, payload)`
    ///
    /// The first observation inserts a row with frequency 1. Later
    /// observations of the identical payload bump the frequency and fold the
    /// outcome into the success rate weighted by occurrence.
    pub fn upsert_pattern(
        &self,
        kind: &str,
        payload: &serde_json::Value,
        success: bool,
    ) -> Result<Pattern, StoreError> {
        let payload_text = canonical_json(payload)?;
        let now = Utc::now().timestamp_millis();
        let hit = if success { 1.0 } else { 0.0 };

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let existing: Option<(i64, i64, f64)> = tx
            .query_row(
                "SELECT id, frequency, success_rate FROM patterns WHERE kind = ?1 AND payload = ?2",
                params![kind, payload_text],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        match existing {
            Some((id, frequency, rate)) => {
                let new_frequency = frequency + 1;
                let new_rate =
                    ((rate * frequency as f64 + hit) / new_frequency as f64).clamp(0.0, 1.0);
                tx.execute(
                    "UPDATE patterns SET frequency = ?1, success_rate = ?2, last_seen = ?3 WHERE id = ?4",
                    params![new_frequency, new_rate, now, id],
                )?;
            }
            None => {
                tx.execute(
                    "INSERT INTO patterns (kind, payload, frequency, success_rate, last_seen, created_at) \
                     VALUES (?1, ?2, 1, ?3, ?4, ?4)",
                    params![kind, payload_text, hit, now],
                )?;
            }
        }

        let pattern = tx.query_row(
            "SELECT id, kind, payload, frequency, success_rate, last_seen, created_at \
             FROM patterns WHERE kind = ?1 AND payload = ?2",
            params![kind, payload_text],
            row_to_pattern,
        )?;
        tx.commit()?;
        Ok(pattern)
    }

    /// Look up a pattern by exact identity
    pub fn pattern(
        &self,
        kind: &str,
        payload: &serde_json::Value,
    ) -> Result<Option<Pattern>, StoreError> {
        let payload_text = canonical_json(payload)?;
        let conn = self.lock()?;
        let pattern = conn
            .query_row(
                "SELECT id, kind, payload, frequency, success_rate, last_seen, created_at \
                 FROM patterns WHERE kind = ?1 AND payload = ?2",
                params![kind, payload_text],
                row_to_pattern,
            )
            .optional()?;
        Ok(pattern)
    }

    /// All patterns, optionally of one kind, most frequent first
    pub fn patterns(&self, kind: Option<&str>) -> Result<Vec<Pattern>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, kind, payload, frequency, success_rate, last_seen, created_at \
             FROM patterns WHERE ?1 IS NULL OR kind = ?1 ORDER BY frequency DESC, id ASC",
        )?;
        let rows = stmt.query_map(params![kind], row_to_pattern)?;
        let mut patterns = Vec::new();
        for row in rows {
            patterns.push(row?);
        }
        Ok(patterns)
    }

    // ── predictions ────────────────────────────────────────────────────

    /// Append a prediction, returning its row id
    pub fn insert_prediction(&self, prediction: &Prediction) -> Result<i64, StoreError> {
        let payload_text = canonical_json(&prediction.payload)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO predictions (kind, payload, confidence, outcome, accuracy, created_at, resolved_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                prediction.kind,
                payload_text,
                prediction.confidence,
                prediction.outcome,
                prediction.accuracy,
                prediction.created_at.timestamp_millis(),
                prediction.resolved_at.map(|t| t.timestamp_millis()),
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
    }

    /// Fill in the resolution fields of a stored prediction
    pub fn resolve_prediction(
        &self,
        id: i64,
        outcome: &str,
        accuracy: Option<f64>,
    ) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let updated = tx.execute(
            "UPDATE predictions SET outcome = ?1, accuracy = ?2, resolved_at = ?3 WHERE id = ?4",
            params![
                outcome,
                accuracy.map(|a| a.clamp(0.0, 1.0)),
                Utc::now().timestamp_millis(),
                id
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("prediction {id}")));
        }
        tx.commit()?;
        Ok(())
    }

    /// Predictions still awaiting resolution, oldest first
    pub fn unresolved_predictions(&self) -> Result<Vec<Prediction>, StoreError> {
        self.query_predictions(
            "SELECT id, kind, payload, confidence, outcome, accuracy, created_at, resolved_at \
             FROM predictions WHERE resolved_at IS NULL ORDER BY created_at ASC, id ASC",
            params![],
        )
    }

    /// Latest predictions, newest first
    pub fn recent_predictions(&self, limit: usize) -> Result<Vec<Prediction>, StoreError> {
        self.query_predictions(
            "SELECT id, kind, payload, confidence, outcome, accuracy, created_at, resolved_at \
             FROM predictions ORDER BY created_at DESC, id DESC LIMIT ?1",
            params![limit as i64],
        )
    }

    fn query_predictions(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<Prediction>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, row_to_prediction)?;
        let mut predictions = Vec::new();
        for row in rows {
            predictions.push(row?);
        }
        Ok(predictions)
    }

    // ── maintenance ────────────────────────────────────────────────────

    /// Refresh planner statistics and compact the file
    pub fn optimize(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute_batch("PRAGMA optimize; ANALYZE; VACUUM;")?;
        Ok(())
    }

    /// Fold the write-ahead log back into the main file and truncate it
    pub fn checkpoint_wal(&self) -> Result<CheckpointStats, StoreError> {
        let conn = self.lock()?;
        let stats = conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |row| {
            Ok(CheckpointStats {
                busy: row.get(0)?,
                log_frames: row.get(1)?,
                checkpointed_frames: row.get(2)?,
            })
        })?;
        Ok(stats)
    }

    pub fn counts(&self) -> Result<StoreCounts, StoreError> {
        let conn = self.lock()?;
        let count = |table: &str| -> Result<u64, StoreError> {
            let n: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
            Ok(n.max(0) as u64)
        };
        Ok(StoreCounts {
            metrics: count("metrics")?,
            patterns: count("patterns")?,
            predictions: count("predictions")?,
        })
    }
}

/// Serialize with object keys sorted so identical payloads compare equal
pub fn canonical_json(value: &serde_json::Value) -> Result<String, StoreError> {
    Ok(serde_json::to_string(&sorted(value))?)
}

fn sorted(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut entries: Vec<(&String, &serde_json::Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            serde_json::Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), sorted(v)))
                    .collect(),
            )
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(sorted).collect())
        }
        other => other.clone(),
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn parse_payload(row: &Row<'_>, idx: usize) -> rusqlite::Result<serde_json::Value> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn row_to_metric(row: &Row<'_>) -> rusqlite::Result<Metric> {
    Ok(Metric {
        name: row.get(0)?,
        value: row.get(1)?,
        timestamp: from_millis(row.get(2)?),
        context: row.get(3)?,
    })
}

fn row_to_pattern(row: &Row<'_>) -> rusqlite::Result<Pattern> {
    let frequency: i64 = row.get(3)?;
    Ok(Pattern {
        id: row.get(0)?,
        kind: row.get(1)?,
        payload: parse_payload(row, 2)?,
        frequency: frequency.max(0) as u64,
        success_rate: row.get(4)?,
        last_seen: from_millis(row.get(5)?),
        created_at: from_millis(row.get(6)?),
    })
}

fn row_to_prediction(row: &Row<'_>) -> rusqlite::Result<Prediction> {
    let resolved_at: Option<i64> = row.get(7)?;
    Ok(Prediction {
        id: Some(row.get(0)?),
        kind: row.get(1)?,
        payload: parse_payload(row, 2)?,
        confidence: row.get(3)?,
        outcome: row.get(4)?,
        accuracy: row.get(5)?,
        created_at: from_millis(row.get(6)?),
        resolved_at: resolved_at.map(from_millis),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> KnowledgeStore {
        KnowledgeStore::open_in_memory().unwrap()
    }

    #[test]
    fn test_metrics_append_and_read_back() {
        let store = store();
        store
            .insert_metric(&Metric::new("cpu_percent", 12.5))
            .unwrap();
        store
            .insert_metric(&Metric::new("cpu_percent", 40.0).with_context("spike"))
            .unwrap();
        store
            .insert_metric(&Metric::new("memory_percent", 60.0))
            .unwrap();

        let cpu = store.recent_metrics("cpu_percent", 10).unwrap();
        assert_eq!(cpu.len(), 2);
        assert!(cpu.iter().any(|m| m.context.as_deref() == Some("spike")));
        assert_eq!(store.counts().unwrap().metrics, 3);
    }

    #[test]
    fn test_prune_metrics_before_cutoff() {
        let store = store();
        let mut old = Metric::new("health_score", 90.0);
        old.timestamp = Utc::now() - chrono::Duration::days(40);
        store.insert_metric(&old).unwrap();
        store
            .insert_metric(&Metric::new("health_score", 95.0))
            .unwrap();

        let removed = store
            .prune_metrics_before(Utc::now() - chrono::Duration::days(30))
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.recent_metrics("health_score", 10).unwrap().len(), 1);
    }

    #[test]
    fn test_pattern_upsert_keeps_single_row() {
        let store = store();
        let payload = json!({"task": "health_check"});

        let first = store.upsert_pattern("task_outcome", &payload, true).unwrap();
        assert_eq!(first.frequency, 1);
        assert_eq!(first.success_rate, 1.0);

        let second = store.upsert_pattern("task_outcome", &payload, true).unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.frequency, 2);
        assert_eq!(store.patterns(Some("task_outcome")).unwrap().len(), 1);
    }

    #[test]
    fn test_pattern_success_rate_weighted_by_frequency() {
        let store = store();
        let payload = json!({"action": "temp_cleanup"});

        store.upsert_pattern("auto_repair", &payload, true).unwrap();
        store.upsert_pattern("auto_repair", &payload, false).unwrap();
        store.upsert_pattern("auto_repair", &payload, false).unwrap();
        let pattern = store.upsert_pattern("auto_repair", &payload, true).unwrap();

        assert_eq!(pattern.frequency, 4);
        assert!((pattern.success_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_first_failure_starts_at_zero_rate() {
        let store = store();
        let pattern = store
            .upsert_pattern("task_outcome", &json!({"task": "x"}), false)
            .unwrap();
        assert_eq!(pattern.success_rate, 0.0);
    }

    #[test]
    fn test_pattern_identity_ignores_key_order() {
        let store = store();
        let a: serde_json::Value = serde_json::from_str(r#"{"a": 1, "b": 2}"#).unwrap();
        let b: serde_json::Value = serde_json::from_str(r#"{"b": 2, "a": 1}"#).unwrap();

        store.upsert_pattern("k", &a, true).unwrap();
        let pattern = store.upsert_pattern("k", &b, true).unwrap();
        assert_eq!(pattern.frequency, 2);
        assert!(store.pattern("k", &a).unwrap().is_some());
    }

    #[test]
    fn test_different_kind_is_different_pattern() {
        let store = store();
        let payload = json!({"task": "x"});
        store.upsert_pattern("one", &payload, true).unwrap();
        store.upsert_pattern("two", &payload, true).unwrap();
        assert_eq!(store.patterns(None).unwrap().len(), 2);
    }

    #[test]
    fn test_prediction_append_then_resolve() {
        let store = store();
        let prediction = Prediction::new("high_memory_usage", json!({"value": 90.0}), 0.9);
        let id = store.insert_prediction(&prediction).unwrap();

        let pending = store.unresolved_predictions().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, Some(id));

        store.resolve_prediction(id, "confirmed", Some(0.8)).unwrap();
        assert!(store.unresolved_predictions().unwrap().is_empty());

        let resolved = &store.recent_predictions(1).unwrap()[0];
        assert_eq!(resolved.outcome.as_deref(), Some("confirmed"));
        assert_eq!(resolved.accuracy, Some(0.8));
        assert_eq!(resolved.kind, "high_memory_usage");
        assert_eq!(resolved.confidence, 0.9);
        assert!(resolved.is_resolved());
    }

    #[test]
    fn test_resolve_unknown_prediction() {
        let store = store();
        let err = store.resolve_prediction(42, "confirmed", None).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_maintenance_on_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = KnowledgeStore::open(&dir.path().join("nested").join("k.db")).unwrap();
        store
            .insert_metric(&Metric::new("cpu_percent", 1.0))
            .unwrap();

        store.optimize().unwrap();
        let stats = store.checkpoint_wal().unwrap();
        assert_eq!(stats.busy, 0);
        assert_eq!(store.schema_version().unwrap(), Some(SCHEMA_VERSION));
    }
}
