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

//! Per-session transaction state

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use super::latch::CountUpDownLatch;
use super::row_action::{ReadContext, RowAction};
use crate::common::FxSet;
use crate::core::IsolationLevel;

/// Session identity, unique for the life of a transaction manager
pub type SessionId = u64;

/// What a statement needs from the catalog lock
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatementProfile {
    /// Statement changes the catalog and must run alone
    pub changes_catalog: bool,
}

impl StatementProfile {
    /// Data statement: runs concurrently unless the catalog is locked
    pub const DML: StatementProfile = StatementProfile {
        changes_catalog: false,
    };

    /// Catalog statement: waits for other transactions and locks everyone else out
    pub const DDL: StatementProfile = StatementProfile {
        changes_catalog: true,
    };
}

/// Named rollback point inside a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Savepoint {
    pub name: String,
    /// Length of the row-action list when the savepoint was taken
    pub index: usize,
    pub timestamp: i64,
}

#[derive(Debug)]
pub(crate) struct SessionTx {
    pub isolation: IsolationLevel,
    pub in_transaction: bool,
    pub transaction_ts: i64,
    pub action_ts: i64,
    /// Length of the row-action list when the current statement started
    pub action_index: usize,
    pub row_actions: Vec<Arc<RowAction>>,
    /// Sessions found racing on rows this session reads or commits
    pub temp_set: FxSet<SessionId>,
    /// The current statement must be retried after waiting
    pub redo: bool,
    /// The transaction lost a conflict and may only roll back
    pub abort_transaction: bool,
    /// Session whose wait would have closed a cycle
    pub deadlock: Option<SessionId>,
    pub prepared: bool,
    pub savepoints: Vec<Savepoint>,
    pub statement: Option<StatementProfile>,
}

impl SessionTx {
    fn new(isolation: IsolationLevel) -> Self {
        Self {
            isolation,
            in_transaction: false,
            transaction_ts: 0,
            action_ts: 0,
            action_index: 0,
            row_actions: Vec::new(),
            temp_set: FxSet::default(),
            redo: false,
            abort_transaction: false,
            deadlock: None,
            prepared: false,
            savepoints: Vec::new(),
            statement: None,
        }
    }

    pub fn read_context(&self, session: SessionId) -> ReadContext {
        ReadContext {
            session,
            isolation: self.isolation,
            action_ts: self.action_ts,
            transaction_ts: self.transaction_ts,
        }
    }

    /// Clears everything tied to the ended transaction
    pub fn reset(&mut self) {
        self.in_transaction = false;
        self.action_index = 0;
        self.row_actions.clear();
        self.temp_set.clear();
        self.redo = false;
        self.abort_transaction = false;
        self.deadlock = None;
        self.prepared = false;
        self.savepoints.clear();
        self.statement = None;
    }
}

/// A session registered with a [`TransactionManager`](super::TransactionManager)
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    latch: CountUpDownLatch,
    tx: Mutex<SessionTx>,
}

impl Session {
    pub(crate) fn new(id: SessionId, isolation: IsolationLevel) -> Self {
        Self {
            id,
            latch: CountUpDownLatch::new(),
            tx: Mutex::new(SessionTx::new(isolation)),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Latch the session parks on while waiting for other sessions
    pub fn latch(&self) -> &CountUpDownLatch {
        &self.latch
    }

    pub(crate) fn tx(&self) -> MutexGuard<'_, SessionTx> {
        self.tx.lock()
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.tx.lock().isolation
    }

    pub fn in_transaction(&self) -> bool {
        self.tx.lock().in_transaction
    }

    pub fn transaction_timestamp(&self) -> i64 {
        self.tx.lock().transaction_ts
    }

    pub fn action_timestamp(&self) -> i64 {
        self.tx.lock().action_ts
    }

    /// Number of row actions recorded in the current transaction
    pub fn action_count(&self) -> usize {
        self.tx.lock().row_actions.len()
    }

    /// The current statement has to be retried
    pub fn is_redo(&self) -> bool {
        self.tx.lock().redo
    }

    /// The transaction lost a conflict and can only be rolled back
    pub fn is_abort_requested(&self) -> bool {
        self.tx.lock().abort_transaction
    }

    /// Profile of the statement being run or waited for
    pub fn current_statement(&self) -> Option<StatementProfile> {
        self.tx.lock().statement
    }

    /// Names of the savepoints, oldest first
    pub fn savepoint_names(&self) -> Vec<String> {
        self.tx.lock().savepoints.iter().map(|s| s.name.clone()).collect()
    }

    pub(crate) fn read_context(&self) -> ReadContext {
        self.tx.lock().read_context(self.id)
    }
}
