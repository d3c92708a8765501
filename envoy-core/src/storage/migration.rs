// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Database Schema Migration Framework
//!
//! Versioned schema migrations with transactional safety. The runner tracks
//! applied versions in a `schema_version` table and runs pending migrations
//! in order within a single transaction.

use rusqlite::Connection;
use tracing::info;

use super::StoreError;

/// A single schema migration step.
pub struct Migration {
    /// Monotonically increasing version number (starting at 1).
    pub version: u32,
    pub name: &'static str,
    pub sql: &'static str,
}

/// Runs schema migrations against a database connection.
pub struct MigrationRunner;

impl MigrationRunner {
    /// Runs all pending migrations in one transaction. If any migration
    /// fails, all changes are rolled back.
    pub fn run(conn: &mut Connection, migrations: &[Migration]) -> Result<(), StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            );",
        )?;

        let current_version = Self::current_version(conn)?;
        let pending: Vec<&Migration> = migrations
            .iter()
            .filter(|m| m.version > current_version)
            .collect();

        if pending.is_empty() {
            return Ok(());
        }

        for window in pending.windows(2) {
            if window[0].version >= window[1].version {
                return Err(StoreError::Migration(format!(
                    "Migrations are not in order: v{} before v{}",
                    window[0].version, window[1].version
                )));
            }
        }

        let tx = conn.transaction()?;
        for migration in &pending {
            tx.execute_batch(migration.sql).map_err(|e| {
                StoreError::Migration(format!(
                    "Migration v{} '{}' failed: {}",
                    migration.version, migration.name, e
                ))
            })?;
            tx.execute(
                "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![migration.version, crate::clock::unix_now()],
            )?;
            info!("Applied migration v{} '{}'", migration.version, migration.name);
        }
        tx.commit()?;
        Ok(())
    }

    /// Returns the current schema version, or 0 if no migrations have been applied.
    pub fn current_version(conn: &Connection) -> Result<u32, StoreError> {
        let table_exists: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
            [],
            |row| row.get(0),
        )?;

        if !table_exists {
            return Ok(0);
        }

        let version: Option<u32> =
            conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
        Ok(version.unwrap_or(0))
    }
}

/// All registered migrations in version order.
pub fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        name: "accounts_and_sessions",
        sql: MIGRATION_V1_ACCOUNTS_AND_SESSIONS,
    }]
}

const MIGRATION_V1_ACCOUNTS_AND_SESSIONS: &str = r#"
CREATE TABLE accounts (
    as_identifier TEXT NOT NULL UNIQUE,
    "offset" INTEGER NOT NULL DEFAULT 0,
    olm_account BLOB NOT NULL
);

CREATE TABLE sessions (
    as_identifier TEXT NOT NULL,
    with_identifier TEXT NOT NULL,
    olm_session BLOB NOT NULL,
    UNIQUE (as_identifier, with_identifier)
);
"#;
