// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Legacy Layout Import
//!
//! Older installs kept one pickle file per account and session:
//!
//! ```text
//! <legacy_dir>/<as_identifier>/account.pickle
//! <legacy_dir>/<as_identifier>/offset
//! <legacy_dir>/<as_identifier>/sessions/<with_identifier>.pickle
//! ```
//!
//! The import runs once: rows are inserted if absent and the directory is
//! renamed to `<legacy_dir>.migrated` afterwards, or `<legacy_dir>.migrated.N`
//! when that name is taken.

use rusqlite::params;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::accounts::to_sql_offset;
use super::{SessionStore, StoreError};

const ACCOUNT_FILE: &str = "account.pickle";
const OFFSET_FILE: &str = "offset";
const SESSIONS_DIR: &str = "sessions";
const PICKLE_EXTENSION: &str = "pickle";

/// Path the legacy directory is moved to once imported. Existing targets
/// from earlier imports are kept; a numbered suffix is used instead.
fn migrated_path(dir: &Path) -> PathBuf {
    let base = dir.file_name().unwrap_or_default().to_os_string();
    let mut suffix = 0u32;
    loop {
        let mut name = base.clone();
        name.push(".migrated");
        if suffix > 0 {
            name.push(format!(".{}", suffix));
        }
        let candidate = dir.with_file_name(name);
        if !candidate.exists() {
            return candidate;
        }
        suffix += 1;
    }
}

impl SessionStore {
    /// Imports a legacy layout if present. Returns the number of accounts
    /// imported; 0 when there was nothing to do.
    pub fn import_legacy(&self, dir: &Path) -> Result<usize, StoreError> {
        if !dir.is_dir() {
            return Ok(0);
        }

        let mut imported = 0;
        {
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;

            for entry in fs::read_dir(dir)? {
                let account_dir = entry?.path();
                let account_file = account_dir.join(ACCOUNT_FILE);
                if !account_file.is_file() {
                    continue;
                }
                let Some(as_identifier) = file_name(&account_dir) else {
                    warn!("Skipping legacy account with non UTF-8 name: {:?}", account_dir);
                    continue;
                };

                let offset = read_offset(&account_dir.join(OFFSET_FILE))?;
                tx.execute(
                    "INSERT OR IGNORE INTO accounts (as_identifier, \"offset\", olm_account)
                     VALUES (?1, ?2, ?3)",
                    params![as_identifier, to_sql_offset(offset)?, fs::read(&account_file)?],
                )?;

                let sessions_dir = account_dir.join(SESSIONS_DIR);
                if sessions_dir.is_dir() {
                    for session in fs::read_dir(&sessions_dir)? {
                        let path = session?.path();
                        if path.extension().and_then(|e| e.to_str()) != Some(PICKLE_EXTENSION) {
                            continue;
                        }
                        let Some(with_identifier) = path.file_stem().and_then(|s| s.to_str()) else {
                            continue;
                        };
                        tx.execute(
                            "INSERT OR IGNORE INTO sessions (as_identifier, with_identifier, olm_session)
                             VALUES (?1, ?2, ?3)",
                            params![as_identifier, with_identifier, fs::read(&path)?],
                        )?;
                    }
                }
                imported += 1;
            }

            tx.commit()?;
        }

        let target = migrated_path(dir);
        fs::rename(dir, &target)?;
        info!("Imported {} legacy accounts from {:?} (moved to {:?})", imported, dir, target);
        Ok(imported)
    }
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
}

fn read_offset(path: &Path) -> Result<u64, StoreError> {
    if !path.is_file() {
        return Ok(0);
    }
    let text = fs::read_to_string(path)?;
    text.trim()
        .parse()
        .map_err(|e| StoreError::Migration(format!("invalid legacy offset in {:?}: {}", path, e)))
}
