// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-process session backend.
//!
//! Used when no `DATA_DIR` is configured and in tests. Sessions are lost on
//! restart, which logs every user out.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, TimeDelta, Utc};

use super::{SessionBackend, SessionRecord, StoreError, StoreResult};

#[derive(Debug, Default)]
pub struct MemoryBackend {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, live or not.
    pub fn len(&self) -> usize {
        self.read().map(|sessions| sessions.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, HashMap<String, SessionRecord>>> {
        self.sessions
            .read()
            .map_err(|_| StoreError::Unavailable("session map lock poisoned".to_string()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, HashMap<String, SessionRecord>>> {
        self.sessions
            .write()
            .map_err(|_| StoreError::Unavailable("session map lock poisoned".to_string()))
    }
}

impl SessionBackend for MemoryBackend {
    fn create(&self, record: SessionRecord) -> StoreResult<()> {
        self.write()?.insert(record.session_id.clone(), record);
        Ok(())
    }

    fn lookup(&self, session_id: &str, now: DateTime<Utc>) -> StoreResult<Option<SessionRecord>> {
        Ok(self
            .read()?
            .get(session_id)
            .filter(|record| record.is_live(now))
            .cloned())
    }

    fn rotate(
        &self,
        session_id: &str,
        new_id: String,
        now: DateTime<Utc>,
        ttl: TimeDelta,
    ) -> StoreResult<Option<SessionRecord>> {
        // The write guard spans the whole read-modify-write.
        let mut sessions = self.write()?;
        let Some(current) = sessions.remove(session_id) else {
            return Ok(None);
        };
        if !current.is_live(now) {
            return Ok(None);
        }

        let next = current.successor(new_id, now, ttl);
        sessions.insert(next.session_id.clone(), next.clone());
        Ok(Some(next))
    }

    fn revoke(&self, session_id: &str) -> StoreResult<()> {
        self.write()?.remove(session_id);
        Ok(())
    }

    fn sweep_expired(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let mut sessions = self.write()?;
        let before = sessions.len();
        sessions.retain(|_, record| record.is_live(now));
        Ok(before - sessions.len())
    }
}
