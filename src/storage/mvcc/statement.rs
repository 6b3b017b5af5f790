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

//! Statement runner
//!
//! Owns the retry policy for conflicts: a statement that comes back with
//! `Redo` waits on the session latch and runs again from the start, one
//! that comes back with `Abort` is rolled back and reported as a
//! serialization failure.

use tracing::{debug, warn};

use super::manager::{ActionOutcome, TransactionManager};
use super::session::{Session, StatementProfile};
use crate::core::{Error, Result};

/// Result of one attempt at running a statement body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt<T> {
    Done(T),
    /// A row action asked for a retry after waiting
    Redo,
    /// A row action refused to wait
    Abort,
}

impl<T> Attempt<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, Attempt::Done(_))
    }
}

impl TransactionManager {
    /// Runs `body` as one statement of the session's transaction,
    /// starting a transaction when none is active.
    ///
    /// `body` must route every row change through the manager and return
    /// `Redo`/`Abort` when one of them does. An error from `body` rolls
    /// back the statement only. A failed or interrupted wait rolls back the
    /// whole transaction.
    pub fn execute_statement<T, F>(
        &self,
        session: &Session,
        profile: StatementProfile,
        mut body: F,
    ) -> Result<T>
    where
        F: FnMut(&Session) -> Result<Attempt<T>>,
    {
        loop {
            let outcome = match self.begin_action(session, profile) {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.rollback(session)?;
                    return Err(e);
                }
            };
            match outcome {
                ActionOutcome::Proceed | ActionOutcome::Unchanged => break,
                ActionOutcome::Redo => self.wait_for_latch(session)?,
                ActionOutcome::Abort => return Err(self.abandon(session)),
            }
        }

        let mut redo_attempts = 0u32;
        loop {
            let attempt = match body(session) {
                Ok(attempt) => attempt,
                Err(e) => {
                    self.rollback_action(session);
                    self.end_action(session);
                    return Err(e);
                }
            };
            match attempt {
                Attempt::Done(value) => {
                    self.end_action(session);
                    return Ok(value);
                }
                Attempt::Redo => {
                    redo_attempts += 1;
                    if let Some(max) = self.config().max_redo_attempts {
                        if redo_attempts > max {
                            warn!(session = session.id(), attempts = max, "redo attempts exhausted");
                            self.rollback(session)?;
                            return Err(Error::serialization_failure(format!(
                                "statement retried {} times",
                                max
                            )));
                        }
                    }
                    self.wait_for_latch(session)?;
                    self.begin_action_resume(session);
                }
                Attempt::Abort => return Err(self.abandon(session)),
            }
        }
    }

    /// Waits out the session latch. A wait that fails, or that ends with the
    /// transaction marked for abort by another session, rolls it back.
    fn wait_for_latch(&self, session: &Session) -> Result<()> {
        let waited = session
            .latch()
            .await_zero(self.config().lock_wait_timeout)
            .and_then(|()| {
                if session.is_abort_requested() {
                    Err(Error::TransactionAborted)
                } else {
                    Ok(())
                }
            });
        if let Err(e) = waited {
            debug!(session = session.id(), error = %e, "wait failed, rolling back");
            self.rollback(session)?;
            return Err(e);
        }
        Ok(())
    }

    /// Rolls back after an `Abort`: the whole transaction when it was
    /// marked for abort, otherwise only the statement
    fn abandon(&self, session: &Session) -> Error {
        let (abort_transaction, deadlock) = {
            let mut tx = session.tx();
            (tx.abort_transaction, tx.deadlock.take())
        };
        if abort_transaction {
            if let Err(e) = self.rollback(session) {
                return e;
            }
        } else {
            self.rollback_action(session);
            self.end_action(session);
        }
        match deadlock {
            Some(blocker) => Error::Deadlock {
                session: session.id(),
                blocker,
            },
            None => Error::serialization_failure("transaction conflict"),
        }
    }
}
