// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Persistent session backend backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `sessions`: session_id → serialized `SessionRecord` (JSON bytes)
//!
//! Every mutation is a single write transaction. redb serializes writers, so
//! a rotation (remove old id + insert new id) commits or rolls back as one
//! unit and readers never see both ids live.

use std::path::Path;

use chrono::{DateTime, TimeDelta, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use super::{SessionBackend, SessionRecord, StoreError, StoreResult};

/// session_id → serialized SessionRecord (JSON bytes).
const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");

/// Embedded ACID session database.
pub struct DurableBackend {
    db: Database,
}

impl std::fmt::Debug for DurableBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableBackend").finish_non_exhaustive()
    }
}

fn backend_error(err: impl std::fmt::Display) -> StoreError {
    StoreError::Unavailable(format!("redb: {err}"))
}

fn encode(record: &SessionRecord) -> StoreResult<Vec<u8>> {
    serde_json::to_vec(record).map_err(|e| StoreError::Unavailable(format!("encode: {e}")))
}

fn decode(bytes: &[u8]) -> StoreResult<SessionRecord> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Unavailable(format!("decode: {e}")))
}

impl DurableBackend {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(backend_error)?;
        }
        let db = Database::create(path).map_err(backend_error)?;

        // Pre-create the table so read transactions never fail on a fresh file.
        let write_txn = db.begin_write().map_err(backend_error)?;
        {
            let _ = write_txn.open_table(SESSIONS).map_err(backend_error)?;
        }
        write_txn.commit().map_err(backend_error)?;

        Ok(Self { db })
    }
}

impl SessionBackend for DurableBackend {
    fn create(&self, record: SessionRecord) -> StoreResult<()> {
        let bytes = encode(&record)?;
        let write_txn = self.db.begin_write().map_err(backend_error)?;
        {
            let mut table = write_txn.open_table(SESSIONS).map_err(backend_error)?;
            table
                .insert(record.session_id.as_str(), bytes.as_slice())
                .map_err(backend_error)?;
        }
        write_txn.commit().map_err(backend_error)?;
        Ok(())
    }

    fn lookup(&self, session_id: &str, now: DateTime<Utc>) -> StoreResult<Option<SessionRecord>> {
        let read_txn = self.db.begin_read().map_err(backend_error)?;
        let table = read_txn.open_table(SESSIONS).map_err(backend_error)?;
        match table.get(session_id).map_err(backend_error)? {
            Some(value) => {
                let record = decode(value.value())?;
                Ok(record.is_live(now).then_some(record))
            }
            None => Ok(None),
        }
    }

    fn rotate(
        &self,
        session_id: &str,
        new_id: String,
        now: DateTime<Utc>,
        ttl: TimeDelta,
    ) -> StoreResult<Option<SessionRecord>> {
        let write_txn = self.db.begin_write().map_err(backend_error)?;
        let rotated = {
            let mut table = write_txn.open_table(SESSIONS).map_err(backend_error)?;

            // Copy the current value out before mutating the table.
            let current = match table.get(session_id).map_err(backend_error)? {
                Some(value) => Some(decode(value.value())?),
                None => None,
            };

            match current {
                Some(record) if record.is_live(now) => {
                    let next = record.successor(new_id, now, ttl);
                    let bytes = encode(&next)?;
                    table.remove(session_id).map_err(backend_error)?;
                    table
                        .insert(next.session_id.as_str(), bytes.as_slice())
                        .map_err(backend_error)?;
                    Some(next)
                }
                Some(_) => {
                    table.remove(session_id).map_err(backend_error)?;
                    None
                }
                None => None,
            }
        };
        write_txn.commit().map_err(backend_error)?;
        Ok(rotated)
    }

    fn revoke(&self, session_id: &str) -> StoreResult<()> {
        let write_txn = self.db.begin_write().map_err(backend_error)?;
        {
            let mut table = write_txn.open_table(SESSIONS).map_err(backend_error)?;
            table.remove(session_id).map_err(backend_error)?;
        }
        write_txn.commit().map_err(backend_error)?;
        Ok(())
    }

    fn sweep_expired(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let write_txn = self.db.begin_write().map_err(backend_error)?;
        let removed = {
            let mut table = write_txn.open_table(SESSIONS).map_err(backend_error)?;

            let mut expired = Vec::new();
            for entry in table.iter().map_err(backend_error)? {
                let (key, value) = entry.map_err(backend_error)?;
                // Undecodable records can never resolve; reclaim them too.
                let live = decode(value.value())
                    .map(|record| record.is_live(now))
                    .unwrap_or(false);
                if !live {
                    expired.push(key.value().to_string());
                }
            }

            for key in &expired {
                table.remove(key.as_str()).map_err(backend_error)?;
            }
            expired.len()
        };
        write_txn.commit().map_err(backend_error)?;
        Ok(removed)
    }
}
