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

//! Row actions
//!
//! A [`RowAction`] is the per-row change log: one entry per insert or delete,
//! each owned by a session and stamped with the timestamp of the statement
//! that made it. An entry is uncommitted while its commit timestamp is 0.
//!
//! At most one session may hold an uncommitted entry on a row. A second
//! writer gets [`DeleteOutcome::Conflict`] and the transaction manager
//! decides whether it waits and retries or aborts.
//!
//! Once every live transaction started after an entry was committed, the
//! entry is merged away. A row whose merged state is "deleted" becomes
//! `DeleteFinal` and is removed from its store.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;

use super::session::SessionId;
use super::store::RowStore;
use crate::common::FxSet;
use crate::core::IsolationLevel;

/// Summary of the changes recorded on a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionType {
    /// No change recorded
    None,
    /// Row was inserted
    Insert,
    /// Row was deleted
    Delete,
    /// Row was inserted and deleted
    InsertDelete,
    /// Row is gone for every possible reader
    DeleteFinal,
}

impl ActionType {
    fn of(inserted: bool, deleted: bool) -> Self {
        match (inserted, deleted) {
            (true, true) => ActionType::InsertDelete,
            (true, false) => ActionType::Insert,
            (false, true) => ActionType::Delete,
            (false, false) => ActionType::None,
        }
    }

    /// Change in large-object references caused by committing this action
    pub fn lob_delta(&self) -> i32 {
        match self {
            ActionType::Insert => 1,
            ActionType::Delete => -1,
            _ => 0,
        }
    }
}

/// How a read is checked against pending changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Plain read: visibility only
    Read,
    /// Duplicate check for a unique key: pending or too-new writers conflict
    Dup,
}

/// What the store must do after a session's entries were rolled back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackType {
    /// Row keeps existing, only a delete was undone
    NoOp,
    /// The row's insert was undone, the row must be removed
    DeleteFinal,
}

/// Result of registering a delete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Entry added
    Added,
    /// The session already deleted the row; nothing added
    AlreadyDeleted,
    /// The row no longer exists for anyone; nothing added
    Gone,
    /// Another session has an uncommitted change, or committed a delete
    Conflict { other: SessionId, committed: bool },
}

/// Result of merging committed entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Newer entries remain
    Retained,
    /// No entries remain, the row is a plain committed row
    Empty,
    /// The row is deleted for every reader
    DeleteFinal,
}

/// Session state a visibility check needs
#[derive(Debug, Clone, Copy)]
pub struct ReadContext {
    pub session: SessionId,
    pub isolation: IsolationLevel,
    pub action_ts: i64,
    pub transaction_ts: i64,
}

impl ReadContext {
    /// Newest commit timestamp the session may see
    pub fn threshold(&self) -> i64 {
        match self.isolation {
            IsolationLevel::ReadUncommitted => i64::MAX,
            IsolationLevel::ReadCommitted => self.action_ts,
            IsolationLevel::RepeatableRead | IsolationLevel::Serializable => self.transaction_ts,
        }
    }
}

/// Outcome of [`RowAction::can_read`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Visibility {
    /// Row exists for the reader
    pub visible: bool,
    /// Writer the reader must wait for (`ReadMode::Dup` only)
    pub conflict: Option<SessionId>,
}

#[derive(Debug, Clone)]
struct ActionEntry {
    session: SessionId,
    kind: ActionType,
    action_ts: i64,
    commit_ts: i64,
    rolled_back: bool,
    prepared: bool,
}

impl ActionEntry {
    fn is_pending(&self) -> bool {
        self.commit_ts == 0
    }

    fn is_committed_delete(&self) -> bool {
        self.kind == ActionType::Delete && self.commit_ts != 0
    }
}

#[derive(Debug, Default)]
struct RowActionState {
    entries: SmallVec<[ActionEntry; 2]>,
    deleted_final: bool,
}

impl RowActionState {
    fn live(&self) -> impl Iterator<Item = &ActionEntry> {
        self.entries.iter().filter(|e| !e.rolled_back)
    }
}

/// Change log of one row
pub struct RowAction {
    row_id: i64,
    store: Arc<dyn RowStore>,
    state: Mutex<RowActionState>,
}

impl RowAction {
    /// Tracks a row that existed before any recorded change
    pub fn new(row_id: i64, store: Arc<dyn RowStore>) -> Self {
        Self {
            row_id,
            store,
            state: Mutex::new(RowActionState::default()),
        }
    }

    /// Tracks a row inserted by `session`
    pub fn new_insert(row_id: i64, store: Arc<dyn RowStore>, session: SessionId, action_ts: i64) -> Self {
        let action = Self::new(row_id, store);
        action.state.lock().entries.push(ActionEntry {
            session,
            kind: ActionType::Insert,
            action_ts,
            commit_ts: 0,
            rolled_back: false,
            prepared: false,
        });
        action
    }

    pub fn row_id(&self) -> i64 {
        self.row_id
    }

    pub fn store(&self) -> &Arc<dyn RowStore> {
        &self.store
    }

    /// Summary of every live entry
    pub fn action_type(&self) -> ActionType {
        let state = self.state.lock();
        if state.deleted_final {
            return ActionType::DeleteFinal;
        }
        let inserted = state.live().any(|e| e.kind == ActionType::Insert);
        let deleted = state.live().any(|e| e.kind == ActionType::Delete);
        ActionType::of(inserted, deleted)
    }

    /// Uncommitted changes of `session`
    pub fn pending_type(&self, session: SessionId) -> ActionType {
        let state = self.state.lock();
        let mut inserted = false;
        let mut deleted = false;
        for e in state.live().filter(|e| e.session == session && e.is_pending()) {
            inserted |= e.kind == ActionType::Insert;
            deleted |= e.kind == ActionType::Delete;
        }
        ActionType::of(inserted, deleted)
    }

    /// Commit timestamp of the session's most recent committed entry
    pub fn commit_timestamp(&self, session: SessionId) -> Option<i64> {
        self.state
            .lock()
            .live()
            .filter(|e| e.session == session && !e.is_pending())
            .map(|e| e.commit_ts)
            .max()
    }

    /// Oldest timestamp recorded on the row, pending entries by action time
    pub fn earliest_timestamp(&self) -> Option<i64> {
        self.state
            .lock()
            .live()
            .map(|e| if e.is_pending() { e.action_ts } else { e.commit_ts })
            .min()
    }

    pub fn is_empty(&self) -> bool {
        let state = self.state.lock();
        !state.deleted_final && state.live().next().is_none()
    }

    pub fn is_deleted_final(&self) -> bool {
        self.state.lock().deleted_final
    }

    /// Sessions holding an uncommitted entry
    pub fn pending_sessions(&self) -> SmallVec<[SessionId; 2]> {
        let state = self.state.lock();
        let mut sessions = SmallVec::new();
        for e in state.live().filter(|e| e.is_pending()) {
            if !sessions.contains(&e.session) {
                sessions.push(e.session);
            }
        }
        sessions
    }

    /// Registers a delete by `session` at `action_ts`
    pub fn add_delete(&self, session: SessionId, action_ts: i64) -> DeleteOutcome {
        let mut state = self.state.lock();
        if state.deleted_final {
            return DeleteOutcome::Gone;
        }
        for e in state.live() {
            if e.is_committed_delete() {
                return if e.session == session {
                    DeleteOutcome::AlreadyDeleted
                } else {
                    DeleteOutcome::Conflict {
                        other: e.session,
                        committed: true,
                    }
                };
            }
            if !e.is_pending() {
                continue;
            }
            if e.session != session {
                return DeleteOutcome::Conflict {
                    other: e.session,
                    committed: false,
                };
            }
            if e.kind == ActionType::Delete {
                return DeleteOutcome::AlreadyDeleted;
            }
        }
        state.entries.push(ActionEntry {
            session,
            kind: ActionType::Delete,
            action_ts,
            commit_ts: 0,
            rolled_back: false,
            prepared: false,
        });
        DeleteOutcome::Added
    }

    /// Whether the row exists for the reader, and in `Dup` mode which
    /// writer makes the answer uncertain
    pub fn can_read(&self, reader: &ReadContext, mode: ReadMode) -> Visibility {
        let state = self.state.lock();
        if state.deleted_final {
            return Visibility {
                visible: false,
                conflict: None,
            };
        }
        let threshold = reader.threshold();
        let mut has_insert = false;
        let mut insert_seen = false;
        let mut delete_seen = false;
        let mut conflict = None;
        for e in state.live() {
            let mine = e.session == reader.session;
            let seen = mine
                || (!e.is_pending() && e.commit_ts <= threshold)
                || (e.is_pending() && reader.isolation == IsolationLevel::ReadUncommitted);
            match e.kind {
                ActionType::Insert => {
                    has_insert = true;
                    insert_seen |= seen;
                }
                ActionType::Delete => delete_seen |= seen,
                _ => {}
            }
            if mode == ReadMode::Dup && !mine {
                let too_new = e.kind == ActionType::Insert && e.commit_ts > threshold;
                if e.is_pending() || too_new {
                    conflict = Some(e.session);
                }
            }
        }
        Visibility {
            visible: (!has_insert || insert_seen) && !delete_seen,
            conflict,
        }
    }

    /// Checks that committing the session's entries cannot lose an update.
    ///
    /// Sessions with uncommitted entries on the row are added to `racing`.
    /// Fails when another session prepared a commit on the row, or when the
    /// session deleted the row and another session committed a change newer
    /// than what the session could see.
    pub fn can_commit(
        &self,
        session: SessionId,
        isolation: IsolationLevel,
        transaction_ts: i64,
        racing: &mut FxSet<SessionId>,
    ) -> bool {
        let state = self.state.lock();
        let mut threshold = transaction_ts;
        if isolation == IsolationLevel::ReadCommitted {
            for e in state.live() {
                if e.session == session && e.kind == ActionType::Delete && e.is_pending() {
                    threshold = threshold.max(e.action_ts);
                }
            }
        }
        let mut has_delete = false;
        let mut newest_other = 0;
        for e in state.live() {
            if e.session == session {
                has_delete |= e.kind == ActionType::Delete && e.is_pending();
                continue;
            }
            if e.prepared {
                return false;
            }
            if e.is_pending() {
                racing.insert(e.session);
            } else {
                newest_other = newest_other.max(e.commit_ts);
            }
        }
        !(has_delete && newest_other > threshold)
    }

    /// Marks the session's uncommitted entries prepared
    pub fn prepare_commit(&self, session: SessionId) {
        let mut state = self.state.lock();
        for e in state.entries.iter_mut() {
            if e.session == session && e.is_pending() && !e.rolled_back {
                e.prepared = true;
            }
        }
    }

    /// Stamps the session's uncommitted entries with `commit_ts` and
    /// returns what was committed
    pub fn commit(&self, session: SessionId, commit_ts: i64) -> ActionType {
        let mut state = self.state.lock();
        let mut inserted = false;
        let mut deleted = false;
        for e in state.entries.iter_mut() {
            if e.session != session || !e.is_pending() || e.rolled_back {
                continue;
            }
            e.commit_ts = commit_ts;
            e.prepared = false;
            inserted |= e.kind == ActionType::Insert;
            deleted |= e.kind == ActionType::Delete;
        }
        ActionType::of(inserted, deleted)
    }

    /// Undoes the session's uncommitted entries made at or after `from_ts`.
    ///
    /// Returns None when nothing was undone.
    pub fn rollback(&self, session: SessionId, from_ts: i64) -> Option<RollbackType> {
        let mut state = self.state.lock();
        let mut undone = false;
        let mut undone_insert = false;
        for e in state.entries.iter_mut() {
            if e.session == session && e.is_pending() && !e.rolled_back && e.action_ts >= from_ts {
                e.rolled_back = true;
                undone = true;
                undone_insert |= e.kind == ActionType::Insert;
            }
        }
        if !undone {
            return None;
        }
        state.entries.retain(|e| !e.rolled_back);
        if undone_insert {
            state.entries.clear();
            state.deleted_final = true;
            Some(RollbackType::DeleteFinal)
        } else {
            Some(RollbackType::NoOp)
        }
    }

    /// Folds entries committed at or before `ts` into the row's base state
    pub fn merge_to_timestamp(&self, ts: i64) -> MergeOutcome {
        let mut state = self.state.lock();
        if state.deleted_final {
            return MergeOutcome::DeleteFinal;
        }
        let deleted = state
            .live()
            .any(|e| e.is_committed_delete() && e.commit_ts <= ts);
        if deleted {
            state.entries.clear();
            state.deleted_final = true;
            return MergeOutcome::DeleteFinal;
        }
        state.entries.retain(|e| e.is_pending() || e.commit_ts > ts);
        if state.entries.is_empty() {
            MergeOutcome::Empty
        } else {
            MergeOutcome::Retained
        }
    }
}

impl fmt::Debug for RowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RowAction")
            .field("row_id", &self.row_id)
            .field("table", &self.store.name())
            .field("entries", &state.entries)
            .field("deleted_final", &state.deleted_final)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::mvcc::store::MemoryRowStore;

    fn store() -> Arc<dyn RowStore> {
        Arc::new(MemoryRowStore::new(1, "t"))
    }

    fn reader(session: SessionId, isolation: IsolationLevel, ts: i64) -> ReadContext {
        ReadContext {
            session,
            isolation,
            action_ts: ts,
            transaction_ts: ts,
        }
    }

    #[test]
    fn test_insert_visibility_by_isolation() {
        let action = RowAction::new_insert(1, store(), 1, 10);
        let own = reader(1, IsolationLevel::ReadCommitted, 10);
        assert!(action.can_read(&own, ReadMode::Read).visible);

        let other = reader(2, IsolationLevel::ReadCommitted, 11);
        assert!(!action.can_read(&other, ReadMode::Read).visible);
        let dirty = reader(2, IsolationLevel::ReadUncommitted, 11);
        assert!(action.can_read(&dirty, ReadMode::Read).visible);

        let dup = action.can_read(&other, ReadMode::Dup);
        assert_eq!(dup.conflict, Some(1));

        assert_eq!(action.commit(1, 12), ActionType::Insert);
        assert!(!action.can_read(&other, ReadMode::Read).visible);
        let later = reader(2, IsolationLevel::ReadCommitted, 13);
        assert!(action.can_read(&later, ReadMode::Read).visible);
        assert_eq!(action.commit_timestamp(1), Some(12));
    }

    #[test]
    fn test_second_writer_conflicts() {
        let action = RowAction::new(1, store());
        assert_eq!(action.add_delete(1, 10), DeleteOutcome::Added);
        assert_eq!(action.add_delete(1, 11), DeleteOutcome::AlreadyDeleted);
        assert_eq!(
            action.add_delete(2, 11),
            DeleteOutcome::Conflict {
                other: 1,
                committed: false
            }
        );
        action.commit(1, 12);
        assert_eq!(
            action.add_delete(2, 13),
            DeleteOutcome::Conflict {
                other: 1,
                committed: true
            }
        );
        assert_eq!(action.pending_sessions().len(), 0);
    }

    #[test]
    fn test_can_commit_detects_newer_committed_change() {
        let action = RowAction::new(1, store());
        action.add_delete(1, 10);
        let mut racing = FxSet::default();
        assert!(action.can_commit(1, IsolationLevel::RepeatableRead, 10, &mut racing));

        action.prepare_commit(1);
        assert!(!action.can_commit(2, IsolationLevel::ReadCommitted, 9, &mut racing));
    }

    #[test]
    fn test_rollback_insert_is_delete_final() {
        let action = RowAction::new_insert(1, store(), 1, 10);
        action.add_delete(1, 11);
        assert_eq!(action.action_type(), ActionType::InsertDelete);

        assert_eq!(action.rollback(1, 11), Some(RollbackType::NoOp));
        assert_eq!(action.action_type(), ActionType::Insert);
        assert_eq!(action.rollback(1, 11), None);

        assert_eq!(action.rollback(1, 10), Some(RollbackType::DeleteFinal));
        assert!(action.is_deleted_final());
        assert_eq!(action.add_delete(2, 12), DeleteOutcome::Gone);
    }

    #[test]
    fn test_merge_to_timestamp() {
        let action = RowAction::new_insert(1, store(), 1, 10);
        action.commit(1, 11);
        assert_eq!(action.merge_to_timestamp(10), MergeOutcome::Retained);
        assert_eq!(action.merge_to_timestamp(11), MergeOutcome::Empty);
        assert!(action.is_empty());

        let deleted = RowAction::new(2, store());
        deleted.add_delete(1, 12);
        deleted.commit(1, 13);
        assert_eq!(deleted.merge_to_timestamp(13), MergeOutcome::DeleteFinal);
        assert_eq!(deleted.action_type(), ActionType::DeleteFinal);
    }

    #[test]
    fn test_lob_delta() {
        assert_eq!(ActionType::Insert.lob_delta(), 1);
        assert_eq!(ActionType::Delete.lob_delta(), -1);
        assert_eq!(ActionType::InsertDelete.lob_delta(), 0);
    }
}
