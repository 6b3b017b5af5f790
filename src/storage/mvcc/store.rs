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

//! Row stores the transaction manager reverts and finalizes rows in
//!
//! The manager never reads row contents. It only tells the store when a
//! row's insert was rolled back, when a committed delete became final, and
//! how the row's large-object references changed. Stores call back into
//! the manager for visibility and to register their changes, and must not
//! hold their own locks while doing so.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use smallvec::SmallVec;
use tracing::trace;

use super::manager::{ActionOutcome, TransactionManager};
use super::row_action::{ReadMode, RollbackType};
use super::session::Session;
use super::statement::Attempt;
use crate::common::KeyMap;
use crate::core::{Error, Result, Value};
use crate::executor::Row;

/// Physical row storage driven by the transaction manager
pub trait RowStore: Send + Sync + fmt::Debug {
    fn table_id(&self) -> u64;

    fn name(&self) -> &str;

    /// Whether the row is physically present
    fn contains_row(&self, row_id: i64) -> bool;

    /// Called after a session's changes on the row were undone
    fn rollback_row(&self, row_id: i64, rollback: RollbackType);

    /// Called once a committed delete is visible to every session
    fn delete_final(&self, row_id: i64);

    /// Called at commit with +1 per committed insert and -1 per committed delete
    fn adjust_lob_usage(&self, row_id: i64, delta: i32);
}

/// Unique key column values, in key order
type KeyValues = SmallVec<[Value; 4]>;

#[derive(Debug)]
struct UniqueKey {
    name: String,
    columns: Vec<usize>,
}

/// In-memory row store with an optional unique key
#[derive(Debug)]
pub struct MemoryRowStore {
    table_id: u64,
    name: String,
    rows: RwLock<BTreeMap<i64, Row>>,
    unique: Option<UniqueKey>,
    keys: RwLock<KeyMap<KeyValues, SmallVec<[i64; 2]>>>,
    lob_usage: AtomicI64,
}

impl MemoryRowStore {
    pub fn new(table_id: u64, name: impl Into<String>) -> Self {
        Self {
            table_id,
            name: name.into(),
            rows: RwLock::new(BTreeMap::new()),
            unique: None,
            keys: RwLock::new(KeyMap::default()),
            lob_usage: AtomicI64::new(0),
        }
    }

    /// Enforces uniqueness of `columns` among visible rows. Keys with a
    /// NULL part never collide.
    pub fn with_unique_key(mut self, name: impl Into<String>, columns: &[usize]) -> Self {
        self.unique = Some(UniqueKey {
            name: name.into(),
            columns: columns.to_vec(),
        });
        self
    }

    /// Physically stored rows, including versions some sessions cannot see
    pub fn row_count(&self) -> usize {
        self.rows.read().len()
    }

    /// Net large-object references of committed rows
    pub fn lob_usage(&self) -> i64 {
        self.lob_usage.load(Ordering::Acquire)
    }

    pub fn row(&self, row_id: i64) -> Option<Row> {
        self.rows.read().get(&row_id).cloned()
    }

    /// Stores a committed row without a row action, for bulk loading
    pub fn load_row(&self, manager: &TransactionManager, values: Vec<Value>) -> i64 {
        let row_id = manager.allocate_row_id();
        if let Some(key) = self.unique_key(&values) {
            self.keys.write().entry(key).or_default().push(row_id);
        }
        self.rows.write().insert(row_id, Row::from(values));
        row_id
    }

    fn unique_key(&self, values: &[Value]) -> Option<KeyValues> {
        let unique = self.unique.as_ref()?;
        unique
            .columns
            .iter()
            .map(|column| values.get(*column).filter(|v| !v.is_null()).cloned())
            .collect()
    }

    fn remove_row(&self, row_id: i64) {
        let Some(row) = self.rows.write().remove(&row_id) else {
            return;
        };
        if let Some(key) = self.unique_key(&row) {
            let mut keys = self.keys.write();
            if let Some(ids) = keys.get_mut(&key) {
                ids.retain(|id| *id != row_id);
                if ids.is_empty() {
                    keys.remove(&key);
                }
            }
        }
        trace!(table = %self.name, row = row_id, "row removed");
    }

    /// Inserts a row for `session`.
    ///
    /// The row is stored and registered first, then checked against other
    /// rows with the same unique key. A pending or too-new writer of such a
    /// row makes the statement redo or abort, a visible one is a unique
    /// constraint violation. Either way the caller rolls the statement back,
    /// which removes the new row again.
    pub fn insert_row(
        self: &Arc<Self>,
        manager: &TransactionManager,
        session: &Session,
        values: Vec<Value>,
    ) -> Result<Attempt<i64>> {
        let key = self.unique_key(&values);
        let row_id = manager.allocate_row_id();
        self.rows.write().insert(row_id, Row::from(values));
        if let Some(key) = &key {
            self.keys.write().entry(key.clone()).or_default().push(row_id);
        }
        let store: Arc<dyn RowStore> = Arc::clone(self) as Arc<dyn RowStore>;
        if manager.add_insert_action(session, store, row_id)? != ActionOutcome::Proceed {
            return Err(Error::internal("insert action was not accepted"));
        }

        let (Some(key), Some(unique)) = (key, self.unique.as_ref()) else {
            return Ok(Attempt::Done(row_id));
        };
        let others: SmallVec<[i64; 2]> = self
            .keys
            .read()
            .get(&key)
            .map(|ids| ids.iter().copied().filter(|id| *id != row_id).collect())
            .unwrap_or_default();
        for other in others {
            let visibility = manager.can_read(session, other, ReadMode::Dup);
            if let Some(holder) = visibility.conflict {
                match manager.conflict_outcome(session, other, holder)? {
                    ActionOutcome::Proceed | ActionOutcome::Unchanged => {}
                    ActionOutcome::Redo => return Ok(Attempt::Redo),
                    ActionOutcome::Abort => return Ok(Attempt::Abort),
                }
            }
            if visibility.visible && self.contains_row(other) {
                let shown: Vec<String> = key.iter().map(Value::to_string).collect();
                return Err(Error::unique_constraint(&unique.name, shown.join(", ")));
            }
        }
        Ok(Attempt::Done(row_id))
    }

    /// Deletes the rows visible to `session` that match `filter` and
    /// returns how many deletes were registered
    pub fn delete_where<F>(
        self: &Arc<Self>,
        manager: &TransactionManager,
        session: &Session,
        mut filter: F,
    ) -> Result<Attempt<usize>>
    where
        F: FnMut(&[Value]) -> bool,
    {
        let candidates: Vec<(i64, Row)> = self
            .rows
            .read()
            .iter()
            .map(|(id, row)| (*id, Arc::clone(row)))
            .collect();
        let mut deleted = 0;
        for (row_id, row) in candidates {
            if !manager.can_read(session, row_id, ReadMode::Read).visible || !filter(&row) {
                continue;
            }
            let store: Arc<dyn RowStore> = Arc::clone(self) as Arc<dyn RowStore>;
            match manager.add_delete_action(session, store, row_id) {
                Ok(ActionOutcome::Proceed) => deleted += 1,
                // deleted or removed by another path since it was read
                Ok(ActionOutcome::Unchanged) => continue,
                Ok(ActionOutcome::Redo) => return Ok(Attempt::Redo),
                Ok(ActionOutcome::Abort) => return Ok(Attempt::Abort),
                // removed by a rollback since it was read
                Err(Error::RowNotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(Attempt::Done(deleted))
    }

    /// Rows visible to `session`, in row id order
    pub fn visible_rows(&self, manager: &TransactionManager, session: &Session) -> Vec<Row> {
        let candidates: Vec<(i64, Row)> = self
            .rows
            .read()
            .iter()
            .map(|(id, row)| (*id, Arc::clone(row)))
            .collect();
        candidates
            .into_iter()
            .filter(|(id, _)| {
                manager.can_read(session, *id, ReadMode::Read).visible && self.contains_row(*id)
            })
            .map(|(_, row)| row)
            .collect()
    }
}

impl RowStore for MemoryRowStore {
    fn table_id(&self) -> u64 {
        self.table_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn contains_row(&self, row_id: i64) -> bool {
        self.rows.read().contains_key(&row_id)
    }

    fn rollback_row(&self, row_id: i64, rollback: RollbackType) {
        if rollback == RollbackType::DeleteFinal {
            self.remove_row(row_id);
        }
    }

    fn delete_final(&self, row_id: i64) {
        self.remove_row(row_id);
    }

    fn adjust_lob_usage(&self, _row_id: i64, delta: i32) {
        self.lob_usage.fetch_add(i64::from(delta), Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_key_skips_nulls() {
        let store = MemoryRowStore::new(1, "t").with_unique_key("t_pk", &[0, 1]);
        assert_eq!(
            store.unique_key(&[Value::from(1), Value::text("x")]).as_deref(),
            Some(&[Value::from(1), Value::text("x")][..])
        );
        assert_eq!(store.unique_key(&[Value::from(1), Value::Null]), None);
        assert_eq!(MemoryRowStore::new(2, "u").unique_key(&[Value::from(1)]), None);
    }

    #[test]
    fn test_unique_key_keeps_parts_apart() {
        let store = MemoryRowStore::new(1, "t").with_unique_key("t_pk", &[0, 1]);
        let first = store.unique_key(&[Value::text("a'\u{1f}'b"), Value::text("c")]);
        let second = store.unique_key(&[Value::text("a"), Value::text("b'\u{1f}'c")]);
        assert!(first.is_some());
        assert_ne!(first, second);
    }

    fn single(id: i64) -> KeyValues {
        std::iter::once(Value::from(id)).collect()
    }

    #[test]
    fn test_rollback_and_delete_final_remove_rows() {
        let store = MemoryRowStore::new(1, "t").with_unique_key("t_pk", &[0]);
        for id in 1..=3 {
            store.rows.write().insert(id, Row::from(vec![Value::from(id)]));
            store.keys.write().entry(single(id)).or_default().push(id);
        }
        store.rollback_row(1, RollbackType::NoOp);
        assert!(store.contains_row(1));
        store.rollback_row(1, RollbackType::DeleteFinal);
        store.delete_final(2);
        assert_eq!(store.row_count(), 1);
        assert!(store.keys.read().get(&single(1)).is_none());
        assert!(store.keys.read().get(&single(3)).is_some());
    }

    #[test]
    fn test_lob_usage() {
        let store = MemoryRowStore::new(1, "t");
        store.adjust_lob_usage(1, 1);
        store.adjust_lob_usage(2, 1);
        store.adjust_lob_usage(1, -1);
        assert_eq!(store.lob_usage(), 1);
    }
}
