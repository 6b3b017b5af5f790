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

//! MVCC transaction manager
//!
//! The manager owns the global clock, the registry of sessions, and the
//! row-action map (row id to the change log of that row). All transitions
//! that touch more than one session (begin, commit, rollback, conflict
//! resolution, catalog locking) run under one mutex, `core`.
//!
//! Lock order is core, then session state, then row action, then store.
//! Reads only take the reader's own session lock and the row lock.
//!
//! Contention is reported as [`ActionOutcome`], never as an error. The
//! statement runner in [`super::statement`] turns an abandoned conflict
//! into a serialization failure.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::commit_log::{CommitLog, CommitRecord, NoopCommitLog};
use super::row_action::{
    ActionType, DeleteOutcome, MergeOutcome, ReadMode, RollbackType, RowAction, Visibility,
};
use super::session::{Savepoint, Session, SessionId, SessionTx, StatementProfile};
use super::store::RowStore;
use super::timestamp::GlobalClock;
use super::wait_graph::WaitGraph;
use crate::common::{new_concurrent_int64_map, ConcurrentInt64Map, FxBuildHasher, FxSet};
use crate::core::{Error, IsolationLevel, Result};
use crate::storage::config::TransactionConfig;

/// Result of a row action or statement start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Change registered, continue
    Proceed,
    /// Statement was rolled back; wait on the session latch, then retry it
    Redo,
    /// Statement was rolled back and may not be retried
    Abort,
    /// Nothing to register: the session already deleted the row, or the
    /// row is gone for everyone
    Unchanged,
}

/// How [`TransactionManager::reset_session`] ends another session's work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    /// Roll back the open transaction; a waiting session is marked for
    /// abort and woken instead
    Rollback,
    /// Roll back and forget the session; skipped while it is waiting
    Close,
}

struct CommittedTransaction {
    commit_ts: i64,
    actions: Vec<Arc<RowAction>>,
}

#[derive(Default)]
struct ManagerCore {
    /// Start timestamps of live transactions, oldest first
    live_timestamps: VecDeque<i64>,
    /// Committed transactions waiting until no live transaction predates them
    committed: VecDeque<CommittedTransaction>,
    wait_graph: WaitGraph,
    locked_mode: bool,
    catalog_session: Option<SessionId>,
}

impl ManagerCore {
    fn first_live_timestamp(&self) -> i64 {
        self.live_timestamps.front().copied().unwrap_or(i64::MAX)
    }

    fn remove_live(&mut self, ts: i64) {
        if let Some(index) = self.live_timestamps.iter().position(|t| *t == ts) {
            self.live_timestamps.remove(index);
        }
    }
}

/// MVCC transaction manager
pub struct TransactionManager {
    config: TransactionConfig,
    clock: GlobalClock,
    core: Mutex<ManagerCore>,
    sessions: DashMap<SessionId, Arc<Session>, FxBuildHasher>,
    row_actions: ConcurrentInt64Map<Arc<RowAction>>,
    next_session_id: AtomicU64,
    next_row_id: AtomicI64,
    commit_log: Arc<dyn CommitLog>,
}

impl TransactionManager {
    pub fn new(config: TransactionConfig) -> Self {
        Self::with_commit_log(config, Arc::new(NoopCommitLog))
    }

    pub fn with_commit_log(config: TransactionConfig, commit_log: Arc<dyn CommitLog>) -> Self {
        Self {
            clock: GlobalClock::new(config.initial_timestamp),
            config,
            core: Mutex::new(ManagerCore::default()),
            sessions: DashMap::with_hasher(FxBuildHasher::default()),
            row_actions: new_concurrent_int64_map(),
            next_session_id: AtomicU64::new(0),
            next_row_id: AtomicI64::new(0),
            commit_log,
        }
    }

    pub fn config(&self) -> &TransactionConfig {
        &self.config
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Registers a session with the configured default isolation level
    pub fn open_session(&self) -> Arc<Session> {
        self.register_session(self.config.default_isolation)
    }

    pub fn register_session(&self, isolation: IsolationLevel) -> Arc<Session> {
        let id = self.next_session_id.fetch_add(1, Ordering::AcqRel) + 1;
        let session = Arc::new(Session::new(id, isolation));
        self.sessions.insert(id, Arc::clone(&session));
        debug!(session = id, %isolation, "session registered");
        session
    }

    pub fn session(&self, id: SessionId) -> Result<Arc<Session>> {
        self.sessions
            .get(&id)
            .map(|s| Arc::clone(s.value()))
            .ok_or(Error::SessionNotFound(id))
    }

    /// Rolls back any open transaction and forgets the session
    pub fn close_session(&self, session: &Session) -> Result<()> {
        let result = self.rollback(session);
        self.sessions.remove(&session.id());
        debug!(session = session.id(), "session closed");
        result
    }

    /// Changes the isolation level; only allowed between transactions
    pub fn set_isolation(&self, session: &Session, isolation: IsolationLevel) -> Result<()> {
        let mut tx = session.tx();
        if tx.in_transaction {
            return Err(Error::invalid_argument(
                "isolation level cannot change inside a transaction",
            ));
        }
        tx.isolation = isolation;
        Ok(())
    }

    pub fn allocate_row_id(&self) -> i64 {
        self.next_row_id.fetch_add(1, Ordering::AcqRel) + 1
    }

    // =========================================================================
    // Transaction and statement boundaries
    // =========================================================================

    /// Starts a transaction unless one is active. Returns the transaction
    /// timestamp.
    pub fn begin_transaction(&self, session: &Session) -> i64 {
        let mut core = self.core.lock();
        let mut tx = session.tx();
        self.start_transaction(&mut core, session.id(), &mut tx, None)
    }

    fn start_transaction(
        &self,
        core: &mut ManagerCore,
        id: SessionId,
        tx: &mut SessionTx,
        ts: Option<i64>,
    ) -> i64 {
        if tx.in_transaction {
            return tx.transaction_ts;
        }
        let ts = ts.unwrap_or_else(|| self.clock.next());
        tx.in_transaction = true;
        tx.transaction_ts = ts;
        tx.action_ts = ts;
        tx.action_index = 0;
        core.live_timestamps.push_back(ts);
        debug!(session = id, ts, isolation = %tx.isolation, "transaction begin");
        ts
    }

    /// Starts a statement.
    ///
    /// Stamps a new action timestamp, starting a transaction when none is
    /// active. Returns `Redo` when the session must first wait for the
    /// catalog lock (wait on the latch, then call again), and `Abort` when
    /// the transaction was marked for abort by a conflicting commit.
    pub fn begin_action(&self, session: &Session, profile: StatementProfile) -> Result<ActionOutcome> {
        let mut core = self.core.lock();
        let id = session.id();
        {
            let mut tx = session.tx();
            if tx.abort_transaction {
                return Ok(ActionOutcome::Abort);
            }
            tx.statement = Some(profile);
        }
        if self.begin_action_tpl(&mut core, session, profile)? {
            return Ok(ActionOutcome::Redo);
        }
        let mut tx = session.tx();
        if tx.in_transaction {
            tx.action_ts = self.clock.next();
        } else {
            self.start_transaction(&mut core, id, &mut tx, None);
        }
        tx.action_index = tx.row_actions.len();
        tx.redo = false;
        trace!(session = id, ts = tx.action_ts, "statement begin");
        Ok(ActionOutcome::Proceed)
    }

    /// Re-stamps the statement after a redo wait
    pub fn begin_action_resume(&self, session: &Session) {
        let mut core = self.core.lock();
        let mut tx = session.tx();
        let ts = self.clock.next();
        tx.action_ts = ts;
        if !tx.in_transaction {
            self.start_transaction(&mut core, session.id(), &mut tx, Some(ts));
        }
        tx.action_index = tx.row_actions.len();
        tx.redo = false;
        trace!(session = session.id(), ts, "statement resumed");
    }

    pub fn end_action(&self, session: &Session) {
        let mut tx = session.tx();
        tx.statement = None;
        tx.redo = false;
    }

    // =========================================================================
    // Row actions
    // =========================================================================

    /// Registers a freshly stored row as inserted by the session
    pub fn add_insert_action(
        &self,
        session: &Session,
        store: Arc<dyn RowStore>,
        row_id: i64,
    ) -> Result<ActionOutcome> {
        let mut tx = session.tx();
        if !tx.in_transaction {
            return Err(Error::TransactionNotStarted);
        }
        let action = Arc::new(RowAction::new_insert(row_id, store, session.id(), tx.action_ts));
        self.row_actions.insert(row_id, Arc::clone(&action));
        tx.row_actions.push(action);
        trace!(session = session.id(), row = row_id, "insert registered");
        Ok(ActionOutcome::Proceed)
    }

    /// Registers a delete of the row by the session.
    ///
    /// On a conflict with another session the current statement is rolled
    /// back. Snapshot isolation levels get `Abort`. Other levels get `Redo`,
    /// after a wait edge to the blocking session was registered unless the
    /// blocking change is already committed. A wait that would close a cycle
    /// is refused with `Abort`. A row the session already deleted, or that
    /// is gone, yields `Unchanged`.
    pub fn add_delete_action(
        &self,
        session: &Session,
        store: Arc<dyn RowStore>,
        row_id: i64,
    ) -> Result<ActionOutcome> {
        let mut core = self.core.lock();
        let mut tx = session.tx();
        if !tx.in_transaction {
            return Err(Error::TransactionNotStarted);
        }
        let existing = self.row_actions.get(&row_id).map(|a| Arc::clone(a.value()));
        let action = match existing {
            Some(action) => action,
            None => {
                if !store.contains_row(row_id) {
                    return Err(Error::RowNotFound(row_id));
                }
                let action = Arc::new(RowAction::new(row_id, store));
                self.row_actions.insert(row_id, Arc::clone(&action));
                action
            }
        };
        match action.add_delete(session.id(), tx.action_ts) {
            DeleteOutcome::Added => {
                tx.row_actions.push(action);
                trace!(session = session.id(), row = row_id, "delete registered");
                Ok(ActionOutcome::Proceed)
            }
            DeleteOutcome::AlreadyDeleted | DeleteOutcome::Gone => Ok(ActionOutcome::Unchanged),
            DeleteOutcome::Conflict { other, committed } => {
                Ok(self.resolve_conflict(&mut core, session, &mut tx, row_id, other, committed))
            }
        }
    }

    fn resolve_conflict(
        &self,
        core: &mut ManagerCore,
        session: &Session,
        tx: &mut SessionTx,
        row_id: i64,
        other: SessionId,
        committed: bool,
    ) -> ActionOutcome {
        let id = session.id();
        let from = tx.action_index;
        let ts = tx.action_ts;
        self.rollback_partial_locked(id, tx, from, ts);
        tx.temp_set.clear();

        if tx.isolation.is_snapshot() {
            tx.redo = false;
            tx.abort_transaction = self.config.conflict_rollback;
            debug!(session = id, other, row = row_id, "conflict under snapshot isolation");
            return ActionOutcome::Abort;
        }
        if committed || !self.sessions.contains_key(&other) {
            tx.redo = true;
            debug!(session = id, other, row = row_id, "conflict with committed change, redo");
            return ActionOutcome::Redo;
        }
        if core.wait_graph.would_deadlock(id, other) {
            tx.redo = false;
            tx.abort_transaction = self.config.conflict_rollback;
            tx.deadlock = Some(other);
            warn!(session = id, blocker = other, row = row_id, "wait refused, deadlock");
            return ActionOutcome::Abort;
        }
        if core.wait_graph.add_edge(id, other) {
            session.latch().count_up();
        }
        tx.redo = true;
        debug!(session = id, other, row = row_id, "conflict, waiting for other session");
        ActionOutcome::Redo
    }

    /// Whether the row exists for the session.
    ///
    /// Rows without a row action are plain committed rows. In `Dup` mode a
    /// writer the answer depends on is remembered in the session's temp set.
    pub fn can_read(&self, session: &Session, row_id: i64, mode: ReadMode) -> Visibility {
        let Some(action) = self.row_actions.get(&row_id).map(|a| Arc::clone(a.value())) else {
            return Visibility {
                visible: true,
                conflict: None,
            };
        };
        let reader = session.read_context();
        let visibility = action.can_read(&reader, mode);
        if let Some(other) = visibility.conflict {
            session.tx().temp_set.insert(other);
        }
        visibility
    }

    /// Resolves a conflict a store found on its own, such as a duplicate
    /// key held by `holder`'s change on `row_id`
    pub fn conflict_outcome(
        &self,
        session: &Session,
        row_id: i64,
        holder: SessionId,
    ) -> Result<ActionOutcome> {
        let mut core = self.core.lock();
        let mut tx = session.tx();
        if !tx.in_transaction {
            return Err(Error::TransactionNotStarted);
        }
        let pending = self
            .row_actions
            .get(&row_id)
            .map(|a| a.value().pending_sessions().contains(&holder))
            .unwrap_or(false);
        Ok(self.resolve_conflict(&mut core, session, &mut tx, row_id, holder, !pending))
    }

    // =========================================================================
    // Commit
    // =========================================================================

    /// Commits the session's transaction.
    ///
    /// Returns false without changing anything when the transaction was
    /// marked for abort or a row action cannot commit; the caller must then
    /// roll back. Committing without an active transaction is a no-op.
    pub fn commit(&self, session: &Session) -> Result<bool> {
        let mut core = self.core.lock();
        let mut tx = session.tx();
        let id = session.id();
        if !tx.in_transaction {
            return Ok(true);
        }
        if tx.abort_transaction {
            debug!(session = id, "commit refused, transaction marked for abort");
            return Ok(false);
        }
        let Some(mut racing) = self.check_commit(id, &tx) else {
            debug!(session = id, "commit conflict");
            return Ok(false);
        };

        let commit_ts = self.clock.next();
        let actions = std::mem::take(&mut tx.row_actions);
        let unique = unique_actions(&actions);
        let mut record = CommitRecord {
            session: id,
            commit_ts,
            inserted: Vec::new(),
            deleted: Vec::new(),
        };
        for action in &unique {
            let key = (action.store().table_id(), action.row_id());
            match action.pending_type(id) {
                ActionType::Insert => record.inserted.push(key),
                ActionType::Delete => record.deleted.push(key),
                _ => {}
            }
        }
        if let Err(e) = self.commit_log.log_commit(&record) {
            tx.row_actions = actions;
            return Err(e);
        }

        for action in &unique {
            let delta = action.commit(id, commit_ts).lob_delta();
            if delta != 0 {
                action.store().adjust_lob_usage(action.row_id(), delta);
            }
        }
        racing.extend(tx.temp_set.drain());
        racing.remove(&id);
        for other in racing {
            if let Some(other) = self.sessions.get(&other) {
                other.tx().abort_transaction = true;
                debug!(session = id, other = other.id(), "racing transaction marked for abort");
            }
        }

        let tx_ts = tx.transaction_ts;
        tx.reset();
        tx.action_ts = commit_ts;
        core.remove_live(tx_ts);
        if core.first_live_timestamp() > commit_ts {
            self.merge_actions(&unique, commit_ts);
        } else if !unique.is_empty() {
            core.committed.push_back(CommittedTransaction {
                commit_ts,
                actions: unique,
            });
        }
        self.merge_expired(&mut core);
        self.end_transaction_tpl(&mut core, id);
        drop(tx);
        self.count_down_latches(&mut core, session);
        debug!(session = id, ts = commit_ts, rows = actions.len(), "transaction committed");
        Ok(true)
    }

    /// First phase of a two-phase commit.
    ///
    /// Validates like [`commit`](Self::commit) and marks the session's
    /// entries prepared, so other sessions' commits on the same rows fail
    /// until this one commits or rolls back.
    pub fn prepare_commit(&self, session: &Session) -> Result<bool> {
        let _core = self.core.lock();
        let mut tx = session.tx();
        let id = session.id();
        if !tx.in_transaction {
            return Err(Error::TransactionNotStarted);
        }
        if tx.abort_transaction {
            return Ok(false);
        }
        let Some(mut racing) = self.check_commit(id, &tx) else {
            return Ok(false);
        };
        tx.action_ts = self.clock.next();
        for action in &tx.row_actions {
            action.prepare_commit(id);
        }
        racing.extend(tx.temp_set.drain());
        racing.remove(&id);
        for other in racing {
            if let Some(other) = self.sessions.get(&other) {
                other.tx().abort_transaction = true;
            }
        }
        tx.prepared = true;
        debug!(session = id, ts = tx.action_ts, "transaction prepared");
        Ok(true)
    }

    fn check_commit(&self, id: SessionId, tx: &SessionTx) -> Option<FxSet<SessionId>> {
        let mut racing = FxSet::default();
        tx.row_actions
            .iter()
            .all(|a| a.can_commit(id, tx.isolation, tx.transaction_ts, &mut racing))
            .then_some(racing)
    }

    // =========================================================================
    // Rollback and savepoints
    // =========================================================================

    /// Rolls back the whole transaction. Also clears any wait the session
    /// was registered for.
    pub fn rollback(&self, session: &Session) -> Result<()> {
        let mut core = self.core.lock();
        let was_open = self.rollback_locked(&mut core, session);
        drop(core);
        if was_open {
            self.commit_log.log_rollback(session.id())
        } else {
            Ok(())
        }
    }

    /// Rollback under the core lock. Returns true when a transaction was open.
    fn rollback_locked(&self, core: &mut ManagerCore, session: &Session) -> bool {
        let mut tx = session.tx();
        let id = session.id();
        if !tx.in_transaction {
            tx.reset();
            drop(tx);
            self.end_transaction_tpl(core, id);
            self.count_down_latches(core, session);
            return false;
        }
        let tx_ts = tx.transaction_ts;
        let undone = tx.row_actions.len();
        self.rollback_partial_locked(id, &mut tx, 0, tx_ts);
        tx.reset();
        tx.action_ts = self.clock.next();
        core.remove_live(tx_ts);
        self.merge_expired(core);
        self.end_transaction_tpl(core, id);
        drop(tx);
        self.count_down_latches(core, session);
        debug!(session = id, rows = undone, "transaction rolled back");
        true
    }

    /// Rolls back the current statement only
    pub fn rollback_action(&self, session: &Session) {
        let _core = self.core.lock();
        let mut tx = session.tx();
        let from = tx.action_index;
        let ts = tx.action_ts;
        self.rollback_partial_locked(session.id(), &mut tx, from, ts);
    }

    /// Undoes the session's row actions from `start` on, in reverse order,
    /// reverting entries made at or after `ts`
    fn rollback_partial_locked(&self, id: SessionId, tx: &mut SessionTx, start: usize, ts: i64) {
        if start >= tx.row_actions.len() {
            return;
        }
        let undone = tx.row_actions.split_off(start);
        for action in undone.iter().rev() {
            let Some(kind) = action.rollback(id, ts) else {
                continue;
            };
            action.store().rollback_row(action.row_id(), kind);
            if kind == RollbackType::DeleteFinal || action.is_empty() {
                self.row_actions
                    .remove_if(&action.row_id(), |_, v| Arc::ptr_eq(v, action));
            }
        }
        trace!(session = id, from = start, ts, rows = undone.len(), "row actions rolled back");
    }

    /// Marks a rollback point. Re-using a name replaces the old savepoint.
    pub fn savepoint(&self, session: &Session, name: &str) -> Result<()> {
        let _core = self.core.lock();
        let mut tx = session.tx();
        if !tx.in_transaction {
            return Err(Error::TransactionNotStarted);
        }
        tx.savepoints.retain(|s| s.name != name);
        let ts = self.clock.next();
        let index = tx.row_actions.len();
        tx.savepoints.push(Savepoint {
            name: name.to_string(),
            index,
            timestamp: ts,
        });
        tx.action_ts = ts;
        tx.action_index = index;
        trace!(session = session.id(), name, ts, "savepoint");
        Ok(())
    }

    /// Undoes everything after the savepoint and discards later savepoints.
    /// The savepoint itself stays.
    pub fn rollback_savepoint(&self, session: &Session, name: &str) -> Result<()> {
        let _core = self.core.lock();
        let mut tx = session.tx();
        let position = tx
            .savepoints
            .iter()
            .rposition(|s| s.name == name)
            .ok_or_else(|| Error::SavepointNotFound(name.to_string()))?;
        tx.savepoints.truncate(position + 1);
        let Savepoint { index, timestamp, .. } = tx.savepoints[position].clone();
        self.rollback_partial_locked(session.id(), &mut tx, index, timestamp);
        tx.action_index = tx.action_index.min(tx.row_actions.len());
        debug!(session = session.id(), name, "rolled back to savepoint");
        Ok(())
    }

    /// Forgets the savepoint and every later one
    pub fn release_savepoint(&self, session: &Session, name: &str) -> Result<()> {
        let mut tx = session.tx();
        let position = tx
            .savepoints
            .iter()
            .rposition(|s| s.name == name)
            .ok_or_else(|| Error::SavepointNotFound(name.to_string()))?;
        tx.savepoints.truncate(position);
        Ok(())
    }

    // =========================================================================
    // Waits and catalog locking
    // =========================================================================

    /// Cancels the session's latch wait. Returns false when it was not waiting.
    pub fn interrupt(&self, id: SessionId) -> Result<bool> {
        let session = self.session(id)?;
        let interrupted = session.latch().interrupt();
        if interrupted {
            warn!(session = id, "latch wait interrupted");
        }
        Ok(interrupted)
    }

    /// Ends the work of session `target` on behalf of `requester`.
    ///
    /// A session blocked on its latch is marked for abort and woken; it rolls
    /// itself back when the wait returns. Otherwise the open transaction is
    /// rolled back here, and `Close` also forgets the session. Returns false
    /// when nothing was done: the requester is the target, or `Close` found
    /// the target waiting.
    pub fn reset_session(
        &self,
        requester: SessionId,
        target: SessionId,
        mode: ResetMode,
    ) -> Result<bool> {
        if requester == target {
            return Ok(false);
        }
        let session = self.session(target)?;
        let mut core = self.core.lock();
        let waiting = session.latch().count() > 0;
        match (mode, waiting) {
            (ResetMode::Rollback, true) => {
                session.tx().abort_transaction = true;
                core.wait_graph.clear_waits(target);
                session.latch().set_count(0);
                warn!(session = target, requester, "waiting transaction marked for abort");
                Ok(true)
            }
            (ResetMode::Close, true) => Ok(false),
            (mode, false) => {
                let was_open = self.rollback_locked(&mut core, &session);
                drop(core);
                if mode == ResetMode::Close {
                    self.sessions.remove(&target);
                    debug!(session = target, requester, "session closed by another session");
                }
                if was_open {
                    self.commit_log.log_rollback(target)?;
                }
                Ok(true)
            }
        }
    }

    /// Wakes every session waiting for this one
    fn count_down_latches(&self, core: &mut ManagerCore, session: &Session) {
        for waiter in core.wait_graph.release(session.id()) {
            if let Some(waiter) = self.sessions.get(&waiter) {
                waiter.latch().count_down();
            }
        }
        core.wait_graph.clear_waits(session.id());
        session.latch().set_count(0);
    }

    /// Decides whether the statement must wait for the catalog lock.
    ///
    /// A catalog statement takes the lock when it is free and waits for
    /// every other open transaction. Any statement of another session waits
    /// while the lock is held, unless the lock holder is itself waiting for
    /// that session.
    fn begin_action_tpl(
        &self,
        core: &mut ManagerCore,
        session: &Session,
        profile: StatementProfile,
    ) -> Result<bool> {
        let id = session.id();
        if core.catalog_session == Some(id) {
            return Ok(false);
        }
        if profile.changes_catalog && core.catalog_session.is_none() {
            let mut others: Vec<SessionId> = self
                .sessions
                .iter()
                .filter(|s| s.id() != id && s.in_transaction())
                .map(|s| s.id())
                .collect();
            others.sort_unstable();
            for other in &others {
                if core.wait_graph.would_deadlock(id, *other) {
                    return Err(Error::Deadlock {
                        session: id,
                        blocker: *other,
                    });
                }
            }
            core.catalog_session = Some(id);
            core.locked_mode = true;
            for other in &others {
                if core.wait_graph.add_edge(id, *other) {
                    session.latch().count_up();
                }
            }
            debug!(session = id, waiting_for = others.len(), "catalog lock acquired");
            return Ok(!others.is_empty());
        }
        let Some(holder) = core.catalog_session.filter(|_| core.locked_mode) else {
            return Ok(false);
        };
        if core.wait_graph.holders_of(holder).contains(&id) {
            return Ok(false);
        }
        if core.wait_graph.add_edge(id, holder) {
            session.latch().count_up();
        }
        trace!(session = id, holder, "waiting for catalog lock");
        Ok(true)
    }

    /// Passes the catalog lock to the first waiting catalog statement, or
    /// releases it. Other waiters are queued behind the new holder.
    fn end_transaction_tpl(&self, core: &mut ManagerCore, id: SessionId) {
        if core.catalog_session != Some(id) {
            return;
        }
        let waiters = core.wait_graph.waiters_of(id).to_vec();
        let next = waiters.iter().copied().find(|w| {
            self.sessions
                .get(w)
                .and_then(|s| s.current_statement())
                .is_some_and(|p| p.changes_catalog)
        });
        match next {
            None => {
                core.catalog_session = None;
                core.locked_mode = false;
                debug!(session = id, "catalog lock released");
            }
            Some(next) => {
                for waiter in waiters.into_iter().filter(|w| *w != next) {
                    if core.wait_graph.add_edge(waiter, next) {
                        if let Some(waiter) = self.sessions.get(&waiter) {
                            waiter.latch().count_up();
                        }
                    }
                }
                core.catalog_session = Some(next);
                debug!(session = id, next, "catalog lock handed over");
            }
        }
    }

    // =========================================================================
    // Merge
    // =========================================================================

    /// Merges queued commits no live transaction can still need
    fn merge_expired(&self, core: &mut ManagerCore) {
        let first_live = core.first_live_timestamp();
        while core
            .committed
            .front()
            .is_some_and(|c| c.commit_ts < first_live)
        {
            if let Some(committed) = core.committed.pop_front() {
                trace!(ts = committed.commit_ts, rows = committed.actions.len(), "merging committed transaction");
                self.merge_actions(&committed.actions, committed.commit_ts);
            }
        }
    }

    /// Folds committed entries into the rows. Rows left without entries
    /// leave the row-action map; deleted rows leave the store as well.
    fn merge_actions(&self, actions: &[Arc<RowAction>], ts: i64) {
        for action in actions {
            match action.merge_to_timestamp(ts) {
                MergeOutcome::Retained => {}
                MergeOutcome::Empty => {
                    self.row_actions
                        .remove_if(&action.row_id(), |_, v| Arc::ptr_eq(v, action));
                }
                MergeOutcome::DeleteFinal => {
                    action.store().delete_final(action.row_id());
                    self.row_actions
                        .remove_if(&action.row_id(), |_, v| Arc::ptr_eq(v, action));
                }
            }
        }
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    /// Last timestamp issued by the clock
    pub fn global_change_timestamp(&self) -> i64 {
        self.clock.current()
    }

    /// Start timestamp of the oldest live transaction, `i64::MAX` when none
    pub fn first_live_transaction_timestamp(&self) -> i64 {
        self.core.lock().first_live_timestamp()
    }

    pub fn live_transaction_count(&self) -> usize {
        self.core.lock().live_timestamps.len()
    }

    /// Committed transactions not merged yet
    pub fn committed_queue_len(&self) -> usize {
        self.core.lock().committed.len()
    }

    pub fn row_action_count(&self) -> usize {
        self.row_actions.len()
    }

    pub fn row_action(&self, row_id: i64) -> Option<Arc<RowAction>> {
        self.row_actions.get(&row_id).map(|a| Arc::clone(a.value()))
    }

    /// Row actions with recorded changes, oldest first
    pub fn row_action_list(&self) -> Vec<Arc<RowAction>> {
        let mut list: Vec<(i64, Arc<RowAction>)> = self
            .row_actions
            .iter()
            .filter_map(|entry| {
                let action = entry.value();
                action
                    .earliest_timestamp()
                    .map(|ts| (ts, Arc::clone(action)))
            })
            .collect();
        list.sort_by_key(|(ts, action)| (*ts, action.row_id()));
        list.into_iter().map(|(_, action)| action).collect()
    }

    /// Sessions with an open transaction, by id
    pub fn transaction_sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|s| s.in_transaction())
            .map(|s| s.id())
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Whether a catalog statement holds the exclusive lock
    pub fn is_locked_mode(&self) -> bool {
        self.core.lock().locked_mode
    }

    /// Drops every row action, queued commit and wait. Blocked sessions are
    /// interrupted.
    pub fn shutdown(&self) {
        let mut core = self.core.lock();
        core.committed.clear();
        core.live_timestamps.clear();
        core.wait_graph.clear();
        core.locked_mode = false;
        core.catalog_session = None;
        for session in self.sessions.iter() {
            session.latch().interrupt();
            session.tx().reset();
        }
        self.row_actions.clear();
        debug!("transaction manager shut down");
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("config", &self.config)
            .field("timestamp", &self.clock.current())
            .field("sessions", &self.sessions.len())
            .field("row_actions", &self.row_actions.len())
            .finish()
    }
}

/// Each row action once, in first-seen order
fn unique_actions(actions: &[Arc<RowAction>]) -> Vec<Arc<RowAction>> {
    let mut seen = FxSet::default();
    actions
        .iter()
        .filter(|a| seen.insert(Arc::as_ptr(a)))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::mvcc::store::MemoryRowStore;

    fn manager() -> TransactionManager {
        TransactionManager::new(TransactionConfig::default())
    }

    fn loaded_store(manager: &TransactionManager, rows: i64) -> Arc<MemoryRowStore> {
        let store = Arc::new(MemoryRowStore::new(1, "t"));
        for i in 0..rows {
            store.load_row(manager, vec![crate::core::Value::from(i)]);
        }
        store
    }

    #[test]
    fn test_begin_transaction_is_idempotent() {
        let tm = manager();
        let s = tm.open_session();
        let ts = tm.begin_transaction(&s);
        assert_eq!(ts, 1);
        assert_eq!(tm.begin_transaction(&s), ts);
        assert_eq!(tm.live_transaction_count(), 1);
        assert_eq!(tm.first_live_transaction_timestamp(), 1);
        assert!(tm.commit(&s).unwrap());
        assert_eq!(tm.live_transaction_count(), 0);
        assert_eq!(tm.first_live_transaction_timestamp(), i64::MAX);
    }

    #[test]
    fn test_insert_then_rollback_removes_row() {
        let tm = manager();
        let store = loaded_store(&tm, 0);
        let s = tm.open_session();
        tm.begin_action(&s, StatementProfile::DML).unwrap();
        let row = store.insert_row(&tm, &s, vec![crate::core::Value::from(1)]).unwrap();
        assert!(matches!(row, crate::storage::mvcc::statement::Attempt::Done(_)));
        assert_eq!(tm.row_action_count(), 1);
        tm.rollback(&s).unwrap();
        assert_eq!(tm.row_action_count(), 0);
        assert_eq!(store.row_count(), 0);
    }

    #[test]
    fn test_commit_without_concurrent_reader_merges_immediately() {
        let tm = manager();
        let store = loaded_store(&tm, 2);
        let s = tm.open_session();
        tm.begin_action(&s, StatementProfile::DML).unwrap();
        let store_dyn: Arc<dyn RowStore> = store.clone();
        assert_eq!(tm.add_delete_action(&s, store_dyn, 1).unwrap(), ActionOutcome::Proceed);
        assert!(tm.commit(&s).unwrap());
        assert_eq!(tm.committed_queue_len(), 0);
        assert_eq!(tm.row_action_count(), 0);
        assert_eq!(store.row_count(), 1);
    }

    #[test]
    fn test_repeated_delete_registers_nothing() {
        let tm = manager();
        let store = loaded_store(&tm, 1);
        let s = tm.open_session();
        tm.begin_action(&s, StatementProfile::DML).unwrap();
        let store_dyn: Arc<dyn RowStore> = store.clone();
        assert_eq!(
            tm.add_delete_action(&s, Arc::clone(&store_dyn), 1),
            Ok(ActionOutcome::Proceed)
        );
        assert_eq!(tm.add_delete_action(&s, store_dyn, 1), Ok(ActionOutcome::Unchanged));
        assert_eq!(s.action_count(), 1);
        tm.rollback(&s).unwrap();
    }

    #[test]
    fn test_commit_is_queued_while_older_transaction_lives() {
        let tm = manager();
        let store = loaded_store(&tm, 1);
        let reader = tm.open_session();
        tm.begin_transaction(&reader);
        let writer = tm.open_session();
        tm.begin_action(&writer, StatementProfile::DML).unwrap();
        let store_dyn: Arc<dyn RowStore> = store.clone();
        tm.add_delete_action(&writer, store_dyn, 1).unwrap();
        assert!(tm.commit(&writer).unwrap());
        assert_eq!(tm.committed_queue_len(), 1);
        assert_eq!(store.row_count(), 1);

        tm.commit(&reader).unwrap();
        assert_eq!(tm.committed_queue_len(), 0);
        assert_eq!(store.row_count(), 0);
    }

    #[test]
    fn test_delete_of_unknown_row() {
        let tm = manager();
        let store: Arc<dyn RowStore> = Arc::new(MemoryRowStore::new(1, "t"));
        let s = tm.open_session();
        assert_eq!(
            tm.add_delete_action(&s, Arc::clone(&store), 5),
            Err(Error::TransactionNotStarted)
        );
        tm.begin_transaction(&s);
        assert_eq!(tm.add_delete_action(&s, store, 5), Err(Error::RowNotFound(5)));
    }

    #[test]
    fn test_set_isolation_outside_transaction_only() {
        let tm = manager();
        let s = tm.open_session();
        tm.set_isolation(&s, IsolationLevel::Serializable).unwrap();
        assert_eq!(s.isolation(), IsolationLevel::Serializable);
        tm.begin_transaction(&s);
        assert!(tm.set_isolation(&s, IsolationLevel::ReadCommitted).is_err());
    }

    #[test]
    fn test_savepoint_requires_transaction() {
        let tm = manager();
        let s = tm.open_session();
        assert_eq!(tm.savepoint(&s, "a"), Err(Error::TransactionNotStarted));
        assert_eq!(
            tm.rollback_savepoint(&s, "a"),
            Err(Error::SavepointNotFound("a".to_string()))
        );
    }

    #[test]
    fn test_unique_actions() {
        let store: Arc<dyn RowStore> = Arc::new(MemoryRowStore::new(1, "t"));
        let a = Arc::new(RowAction::new(1, Arc::clone(&store)));
        let b = Arc::new(RowAction::new(2, store));
        let list = vec![Arc::clone(&a), Arc::clone(&b), Arc::clone(&a)];
        assert_eq!(unique_actions(&list).len(), 2);
    }
}
