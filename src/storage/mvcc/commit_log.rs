// Copyright 2025 Stoolap Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Commit persistence hook
//!
//! The manager writes a [`CommitRecord`] before it marks any row action
//! committed. A failed write leaves the transaction untouched.

use parking_lot::Mutex;

use super::session::SessionId;
use crate::core::Result;

/// Rows changed by one committed transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    pub session: SessionId,
    pub commit_ts: i64,
    /// (table id, row id) of committed inserts
    pub inserted: Vec<(u64, i64)>,
    /// (table id, row id) of committed deletes
    pub deleted: Vec<(u64, i64)>,
}

/// Durable record of transaction outcomes
pub trait CommitLog: Send + Sync {
    fn log_commit(&self, record: &CommitRecord) -> Result<()>;

    fn log_rollback(&self, session: SessionId) -> Result<()>;
}

/// Discards everything
#[derive(Debug, Default)]
pub struct NoopCommitLog;

impl CommitLog for NoopCommitLog {
    fn log_commit(&self, _record: &CommitRecord) -> Result<()> {
        Ok(())
    }

    fn log_rollback(&self, _session: SessionId) -> Result<()> {
        Ok(())
    }
}

/// Keeps records in memory, for tests and diagnostics
#[derive(Debug, Default)]
pub struct MemoryCommitLog {
    commits: Mutex<Vec<CommitRecord>>,
    rollbacks: Mutex<Vec<SessionId>>,
}

impl MemoryCommitLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commits(&self) -> Vec<CommitRecord> {
        self.commits.lock().clone()
    }

    pub fn rollbacks(&self) -> Vec<SessionId> {
        self.rollbacks.lock().clone()
    }
}

impl CommitLog for MemoryCommitLog {
    fn log_commit(&self, record: &CommitRecord) -> Result<()> {
        self.commits.lock().push(record.clone());
        Ok(())
    }

    fn log_rollback(&self, session: SessionId) -> Result<()> {
        self.rollbacks.lock().push(session);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_commit_log_records() {
        let log = MemoryCommitLog::new();
        let record = CommitRecord {
            session: 1,
            commit_ts: 7,
            inserted: vec![(1, 10)],
            deleted: vec![],
        };
        log.log_commit(&record).unwrap();
        log.log_rollback(2).unwrap();
        assert_eq!(log.commits(), vec![record]);
        assert_eq!(log.rollbacks(), vec![2]);
        assert!(NoopCommitLog.log_commit(&log.commits()[0]).is_ok());
    }
}
