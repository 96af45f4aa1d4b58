//! SQLite DDL for the knowledge store.

use rusqlite::Connection;

/// Bumped whenever the DDL below changes shape.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Complete DDL; every statement is idempotent.
pub(crate) const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Append-only measurements.
CREATE TABLE IF NOT EXISTS metrics (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    name      TEXT NOT NULL,
    value     REAL NOT NULL,
    timestamp INTEGER NOT NULL,   -- epoch millis
    context   TEXT
);

CREATE INDEX IF NOT EXISTS idx_metrics_name_ts ON metrics(name, timestamp);
CREATE INDEX IF NOT EXISTS idx_metrics_ts      ON metrics(timestamp);

-- Upserted by exact (kind, payload).
CREATE TABLE IF NOT EXISTS patterns (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    kind         TEXT NOT NULL,
    payload      TEXT NOT NULL,   -- canonical JSON
    frequency    INTEGER NOT NULL DEFAULT 1,
    success_rate REAL NOT NULL DEFAULT 0,
    last_seen    INTEGER NOT NULL,
    created_at   INTEGER NOT NULL,
    UNIQUE (kind, payload)
);

-- Appended, later updated on the resolution columns only.
CREATE TABLE IF NOT EXISTS predictions (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    kind        TEXT NOT NULL,
    payload     TEXT NOT NULL,
    confidence  REAL NOT NULL,
    outcome     TEXT,
    accuracy    REAL,
    created_at  INTEGER NOT NULL,
    resolved_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_predictions_unresolved ON predictions(resolved_at);
"#;

/// Apply the schema and seed the version row.
pub(crate) fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', ?1)",
        rusqlite::params![CURRENT_SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}

/// Read the recorded schema version, if any.
pub(crate) fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<u32>> {
    use rusqlite::OptionalExtension;

    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM schema_meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value.and_then(|v| v.parse().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
        apply_schema(&conn).unwrap();
        assert_eq!(
            read_schema_version(&conn).unwrap(),
            Some(CURRENT_SCHEMA_VERSION)
        );
    }

    #[test]
    fn test_pattern_identity_is_unique() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
        let insert = "INSERT INTO patterns (kind, payload, last_seen, created_at) VALUES ('k', '{}', 0, 0)";
        conn.execute(insert, []).unwrap();
        assert!(conn.execute(insert, []).is_err());
    }
}
