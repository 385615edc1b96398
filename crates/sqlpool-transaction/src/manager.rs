//! Per-connection transaction manager.
//!
//! A [`TransactionManager`] owns a database session and the stack of
//! transaction frames open on it. The bottom frame is a real transaction;
//! every frame above it is a savepoint. Records registered in a savepoint that
//! is committed move to the parent frame, so their commit callbacks run only
//! when the real transaction commits.
//!
//! Some databases silently release every savepoint when a schema-altering
//! statement runs inside a transaction. The manager does not detect this;
//! releasing or rolling back to such a savepoint afterwards fails in the
//! driver and the error is returned to the caller.

use crate::driver::TransactionDriver;
use crate::error::{Result, TransactionBodyError, TransactionError};
use crate::record::{self, RecordRef};
use crate::state::{FrameKind, TransactionFrame, TransactionKind, TransactionOptions};

/// Nested transaction state for one database session.
///
/// # Example
///
/// ```rust,ignore
/// use sqlpool_transaction::{TransactionManager, TransactionOptions, TransactionError};
///
/// let mut tx = TransactionManager::new(session);
/// tx.transaction(TransactionOptions::new(), |tx| {
///     tx.driver_mut().execute("INSERT INTO users VALUES (1)")?;
///
///     // Runs inside a savepoint; the rollback only undoes the second insert.
///     tx.transaction(TransactionOptions::new().requires_new(), |tx| {
///         tx.driver_mut().execute("INSERT INTO users VALUES (2)")?;
///         Err::<(), _>(TransactionError::Rollback)
///     })?;
///     Ok::<_, TransactionError>(())
/// })?;
/// ```
pub struct TransactionManager<D> {
    driver: D,
    stack: Vec<TransactionFrame>,
}

impl<D: TransactionDriver> TransactionManager<D> {
    /// Create a manager with no open transaction.
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            stack: Vec::new(),
        }
    }

    /// Get the underlying session.
    #[must_use]
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Get the underlying session mutably, e.g. to run statements.
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Consume the manager and return the session.
    ///
    /// Open frames are dropped without issuing any statement.
    pub fn into_driver(self) -> D {
        self.driver
    }

    /// Number of transactions still open.
    ///
    /// A frame whose commit or rollback has been decided no longer counts,
    /// even before the driver has finished the statement.
    #[must_use]
    pub fn open_transactions(&self) -> usize {
        match self.stack.last() {
            Some(top) if top.finishing => self.stack.len() - 1,
            _ => self.stack.len(),
        }
    }

    /// Kind of the innermost open frame.
    #[must_use]
    pub fn current_kind(&self) -> TransactionKind {
        self.live_frames()
            .last()
            .map_or(TransactionKind::Closed, TransactionFrame::transaction_kind)
    }

    /// Whether a `transaction` call without `requires_new` would join the
    /// innermost frame instead of opening a new one.
    #[must_use]
    pub fn is_joinable(&self) -> bool {
        self.live_frames().last().is_some_and(|frame| frame.joinable)
    }

    /// Name of the innermost savepoint, if the innermost frame is one.
    #[must_use]
    pub fn current_savepoint_name(&self) -> Option<&str> {
        match &self.live_frames().last()?.kind {
            FrameKind::Savepoint(name) => Some(name.as_str()),
            FrameKind::Real => None,
        }
    }

    /// Open a new frame: a real transaction when none is open, a savepoint
    /// otherwise.
    ///
    /// Isolation levels can only be set on the real transaction.
    pub fn begin_transaction(&mut self, options: TransactionOptions) -> Result<()> {
        self.rollback_finishing();

        if self.stack.is_empty() {
            match options.isolation {
                Some(level) => {
                    if !self.driver.supports_transaction_isolation() {
                        return Err(TransactionError::IsolationUnsupported);
                    }
                    self.driver
                        .begin_isolated_db_transaction(level)
                        .map_err(TransactionError::Driver)?;
                }
                None => self
                    .driver
                    .begin_db_transaction()
                    .map_err(TransactionError::Driver)?,
            }
            tracing::debug!(isolation = ?options.isolation, "began transaction");
            self.stack.push(TransactionFrame::real(options.joinable));
        } else {
            if options.isolation.is_some() {
                return Err(TransactionError::IsolationInNestedTransaction);
            }
            let name = format!("savepoint_{}", self.stack.len());
            self.driver
                .create_savepoint(&name)
                .map_err(TransactionError::Driver)?;
            tracing::debug!(savepoint = %name, depth = self.stack.len() + 1, "created savepoint");
            self.stack
                .push(TransactionFrame::savepoint(name, options.joinable));
        }
        Ok(())
    }

    /// Commit the innermost frame.
    ///
    /// Committing the real transaction notifies every record registered in it
    /// (including records carried up from released savepoints). Committing a
    /// savepoint defers its records to the parent frame. With no open
    /// transaction this does nothing.
    ///
    /// If the driver fails, the frame stays on the stack marked as finishing
    /// and the error is returned. Roll it back next; otherwise the following
    /// `begin_transaction` rolls it back first.
    pub fn commit_transaction(&mut self) -> Result<()> {
        let Some(frame) = self.stack.last_mut() else {
            tracing::debug!("commit ignored: no open transaction");
            return Ok(());
        };
        frame.finishing = true;
        let kind = frame.kind.clone();

        match kind {
            FrameKind::Real => {
                self.driver
                    .commit_db_transaction()
                    .map_err(TransactionError::Driver)?;
                if let Some(frame) = self.stack.pop() {
                    tracing::debug!(records = frame.records.len(), "committed transaction");
                    record::notify_committed(frame.records);
                }
            }
            FrameKind::Savepoint(name) => {
                self.driver
                    .release_savepoint(&name)
                    .map_err(TransactionError::Driver)?;
                if let Some(frame) = self.stack.pop() {
                    tracing::debug!(savepoint = %name, "released savepoint");
                    if let Some(parent) = self.stack.last_mut() {
                        parent.records.extend(frame.records);
                    }
                }
            }
        }
        Ok(())
    }

    /// Roll back the innermost frame.
    ///
    /// The frame is popped and its records are notified even if the driver
    /// fails; the driver error is then returned. With no open transaction this
    /// does nothing.
    pub fn rollback_transaction(&mut self) -> Result<()> {
        let Some(frame) = self.stack.last_mut() else {
            tracing::debug!("rollback ignored: no open transaction");
            return Ok(());
        };
        frame.finishing = true;
        let kind = frame.kind.clone();

        let result = match &kind {
            FrameKind::Real => self.driver.rollback_db_transaction(),
            FrameKind::Savepoint(name) => self.driver.rollback_to_savepoint(name),
        };

        if let Some(frame) = self.stack.pop() {
            let full_rollback = kind == FrameKind::Real;
            tracing::debug!(
                full_rollback = full_rollback,
                records = frame.records.len(),
                "rolled back transaction frame"
            );
            record::notify_rolled_back(frame.records, full_rollback);
        }
        result.map_err(TransactionError::Driver)
    }

    /// Register a record with the innermost frame.
    ///
    /// Outside a transaction there is nothing to notify about and the record
    /// is dropped.
    pub fn add_record(&mut self, record: RecordRef) {
        let live = self.open_transactions();
        match self.stack[..live].last_mut() {
            Some(frame) => frame.records.push(record),
            None => tracing::debug!("record ignored: no open transaction"),
        }
    }

    /// Run `body` inside a transaction.
    ///
    /// Without `requires_new`, a joinable open frame is reused and no
    /// statement is issued. Otherwise a new frame is opened, `body` runs, and
    /// the frame is committed when `body` succeeds or rolled back when it
    /// fails. A [`TransactionError::Rollback`] from `body` is swallowed and
    /// reported as `Ok(None)`; any other error is returned after the rollback.
    pub fn transaction<T, E, F>(
        &mut self,
        options: TransactionOptions,
        body: F,
    ) -> std::result::Result<Option<T>, E>
    where
        F: FnOnce(&mut Self) -> std::result::Result<T, E>,
        E: TransactionBodyError,
    {
        if !options.requires_new && self.is_joinable() {
            if options.isolation.is_some() {
                return Err(TransactionError::IsolationWhenJoining.into());
            }
            return match body(self) {
                Ok(value) => Ok(Some(value)),
                Err(err) if err.is_rollback() => {
                    tracing::debug!("rollback signal inside a joined transaction; nothing rolled back");
                    Ok(None)
                }
                Err(err) => Err(err),
            };
        }
        self.within_new_transaction(options, body)
    }

    fn within_new_transaction<T, E, F>(
        &mut self,
        options: TransactionOptions,
        body: F,
    ) -> std::result::Result<Option<T>, E>
    where
        F: FnOnce(&mut Self) -> std::result::Result<T, E>,
        E: TransactionBodyError,
    {
        self.begin_transaction(options)?;
        let depth = self.stack.len();

        let outcome = body(self);

        if self.stack.len() < depth {
            tracing::warn!(depth = depth, "transaction body finished its own frame");
            return match outcome {
                Ok(value) => Ok(Some(value)),
                Err(err) if err.is_rollback() => Ok(None),
                Err(err) => Err(err),
            };
        }
        self.unwind_to(depth);

        match outcome {
            Ok(value) => match self.commit_transaction() {
                Ok(()) => Ok(Some(value)),
                Err(commit_err) => {
                    if let Err(e) = self.rollback_transaction() {
                        tracing::warn!(error = %e, "rollback after failed commit also failed");
                    }
                    Err(commit_err.into())
                }
            },
            Err(err) => match self.rollback_transaction() {
                Ok(()) if err.is_rollback() => Ok(None),
                Ok(()) => Err(err),
                Err(rollback_err) if err.is_rollback() => Err(rollback_err.into()),
                Err(rollback_err) => {
                    tracing::warn!(error = %rollback_err, "rollback after failed transaction body failed");
                    Err(err)
                }
            },
        }
    }

    /// Roll back frames a body opened and left open.
    fn unwind_to(&mut self, depth: usize) {
        while self.stack.len() > depth {
            tracing::warn!(
                open = self.stack.len(),
                expected = depth,
                "rolling back transaction frame left open by its body"
            );
            if let Err(e) = self.rollback_transaction() {
                tracing::warn!(error = %e, "failed to roll back abandoned frame");
            }
        }
    }

    /// Roll back frames whose commit failed and which were never rolled back.
    fn rollback_finishing(&mut self) {
        while self.stack.last().is_some_and(|frame| frame.finishing) {
            tracing::warn!(
                depth = self.stack.len(),
                "rolling back transaction frame whose commit failed"
            );
            if let Err(e) = self.rollback_transaction() {
                tracing::warn!(error = %e, "rollback of frame whose commit failed also failed");
            }
        }
    }

    fn live_frames(&self) -> &[TransactionFrame] {
        let live = self.open_transactions();
        &self.stack[..live]
    }
}

impl<D> std::fmt::Debug for TransactionManager<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("stack", &self.stack)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use proptest::prelude::*;

    use super::*;
    use crate::error::BoxError;
    use crate::isolation::IsolationLevel;
    use crate::record::TransactionRecord;

    #[derive(Default)]
    struct ScriptedDriver {
        statements: Vec<String>,
        isolation: bool,
        fail_on: Option<&'static str>,
    }

    impl TransactionDriver for ScriptedDriver {
        fn execute(&mut self, sql: &str) -> std::result::Result<(), BoxError> {
            if self.fail_on.is_some_and(|prefix| sql.starts_with(prefix)) {
                return Err(format!("{sql} failed").into());
            }
            self.statements.push(sql.to_string());
            Ok(())
        }

        fn supports_transaction_isolation(&self) -> bool {
            self.isolation
        }
    }

    #[derive(Default)]
    struct Recorder {
        committed: AtomicUsize,
        events: Mutex<Vec<bool>>,
    }

    impl Recorder {
        fn commits(&self) -> usize {
            self.committed.load(Ordering::SeqCst)
        }

        fn rollbacks(&self) -> Vec<bool> {
            self.events.lock().unwrap().clone()
        }
    }

    impl TransactionRecord for Recorder {
        fn committed(&self) -> std::result::Result<(), BoxError> {
            self.committed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn rolled_back(&self, full_rollback: bool) -> std::result::Result<(), BoxError> {
            self.events.lock().unwrap().push(full_rollback);
            Ok(())
        }
    }

    fn manager() -> TransactionManager<ScriptedDriver> {
        TransactionManager::new(ScriptedDriver::default())
    }

    #[test]
    fn test_closed_commit_and_rollback_are_noops() {
        let mut tx = manager();
        tx.commit_transaction().unwrap();
        tx.rollback_transaction().unwrap();
        assert_eq!(tx.open_transactions(), 0);
        assert!(tx.driver().statements.is_empty());
    }

    #[test]
    fn test_begin_real_then_savepoints() {
        let mut tx = manager();
        tx.begin_transaction(TransactionOptions::new()).unwrap();
        assert_eq!(tx.current_kind(), TransactionKind::Real);
        tx.begin_transaction(TransactionOptions::new()).unwrap();
        tx.begin_transaction(TransactionOptions::new()).unwrap();
        assert_eq!(tx.current_kind(), TransactionKind::Savepoint);
        assert_eq!(tx.current_savepoint_name(), Some("savepoint_2"));
        assert_eq!(tx.open_transactions(), 3);
        assert_eq!(
            tx.driver().statements,
            ["BEGIN", "SAVEPOINT savepoint_1", "SAVEPOINT savepoint_2"]
        );
    }

    #[test]
    fn test_begin_begin_commit_rollback() {
        let mut tx = manager();
        let record = Arc::new(Recorder::default());

        tx.begin_transaction(TransactionOptions::new()).unwrap();
        tx.begin_transaction(TransactionOptions::new()).unwrap();
        tx.add_record(record.clone());

        tx.commit_transaction().unwrap();
        assert_eq!(record.commits(), 0);
        assert!(record.rollbacks().is_empty());
        assert_eq!(tx.current_kind(), TransactionKind::Real);

        tx.rollback_transaction().unwrap();
        assert_eq!(record.rollbacks(), [true]);
        assert_eq!(tx.current_kind(), TransactionKind::Closed);
        assert_eq!(
            tx.driver().statements,
            [
                "BEGIN",
                "SAVEPOINT savepoint_1",
                "RELEASE SAVEPOINT savepoint_1",
                "ROLLBACK"
            ]
        );
    }

    #[test]
    fn test_savepoint_records_deferred_until_real_commit() {
        let mut tx = manager();
        let record = Arc::new(Recorder::default());

        tx.begin_transaction(TransactionOptions::new()).unwrap();
        tx.begin_transaction(TransactionOptions::new()).unwrap();
        tx.add_record(record.clone());
        tx.commit_transaction().unwrap();
        assert_eq!(record.commits(), 0);

        tx.commit_transaction().unwrap();
        assert_eq!(record.commits(), 1);
    }

    #[test]
    fn test_savepoint_rollback_is_partial() {
        let mut tx = manager();
        let record = Arc::new(Recorder::default());

        tx.begin_transaction(TransactionOptions::new()).unwrap();
        tx.begin_transaction(TransactionOptions::new()).unwrap();
        tx.add_record(record.clone());
        tx.rollback_transaction().unwrap();

        assert_eq!(record.rollbacks(), [false]);
        tx.commit_transaction().unwrap();
        assert_eq!(record.commits(), 0);
        assert_eq!(tx.driver().statements.last().unwrap(), "COMMIT");
    }

    #[test]
    fn test_duplicate_registration_notified_once() {
        let mut tx = manager();
        let record = Arc::new(Recorder::default());

        tx.begin_transaction(TransactionOptions::new()).unwrap();
        tx.add_record(record.clone());
        tx.add_record(record.clone());
        tx.commit_transaction().unwrap();

        assert_eq!(record.commits(), 1);
    }

    #[test]
    fn test_isolation_rules() {
        let mut tx = manager();
        let err = tx
            .begin_transaction(TransactionOptions::new().isolation(IsolationLevel::Serializable))
            .unwrap_err();
        assert!(matches!(err, TransactionError::IsolationUnsupported));

        tx.driver_mut().isolation = true;
        tx.begin_transaction(TransactionOptions::new().isolation(IsolationLevel::Serializable))
            .unwrap();
        let err = tx
            .begin_transaction(TransactionOptions::new().isolation(IsolationLevel::Serializable))
            .unwrap_err();
        assert!(matches!(err, TransactionError::IsolationInNestedTransaction));
        assert_eq!(tx.open_transactions(), 1);
    }

    #[test]
    fn test_transaction_joins_open_frame() {
        let mut tx = manager();
        let result: std::result::Result<_, TransactionError> =
            tx.transaction(TransactionOptions::new(), |tx| {
                tx.transaction(TransactionOptions::new(), |tx| {
                    assert_eq!(tx.open_transactions(), 1);
                    Ok(7)
                })
            });
        assert_eq!(result.unwrap(), Some(Some(7)));
        assert_eq!(tx.driver().statements, ["BEGIN", "COMMIT"]);
    }

    #[test]
    fn test_isolation_when_joining_is_error() {
        let mut tx = manager();
        tx.driver_mut().isolation = true;
        let result: std::result::Result<_, TransactionError> =
            tx.transaction(TransactionOptions::new(), |tx| {
                tx.transaction(
                    TransactionOptions::new().isolation(IsolationLevel::ReadCommitted),
                    |_| Ok(()),
                )
            });
        assert!(matches!(
            result,
            Err(TransactionError::IsolationWhenJoining)
        ));
        assert_eq!(tx.driver().statements, ["BEGIN", "ROLLBACK"]);
    }

    #[test]
    fn test_requires_new_rollback_signal_is_swallowed() {
        let mut tx = manager();
        let outer: std::result::Result<_, TransactionError> =
            tx.transaction(TransactionOptions::new(), |tx| {
                let inner = tx.transaction(TransactionOptions::new().requires_new(), |_| {
                    Err::<(), _>(TransactionError::Rollback)
                })?;
                assert_eq!(inner, None);
                Ok("done")
            });
        assert_eq!(outer.unwrap(), Some("done"));
        assert_eq!(
            tx.driver().statements,
            [
                "BEGIN",
                "SAVEPOINT savepoint_1",
                "ROLLBACK TO SAVEPOINT savepoint_1",
                "COMMIT"
            ]
        );
    }

    #[test]
    fn test_non_joinable_frame_forces_savepoint() {
        let mut tx = manager();
        let result: std::result::Result<_, TransactionError> =
            tx.transaction(TransactionOptions::new().joinable(false), |tx| {
                tx.transaction(TransactionOptions::new(), |tx| Ok(tx.open_transactions()))
            });
        assert_eq!(result.unwrap(), Some(Some(2)));
    }

    #[test]
    fn test_body_error_rolls_back_and_propagates() {
        let mut tx = manager();
        let record = Arc::new(Recorder::default());
        let result: std::result::Result<Option<()>, TransactionError> =
            tx.transaction(TransactionOptions::new(), |tx| {
                tx.add_record(record.clone());
                Err(TransactionError::driver("constraint violated"))
            });
        assert!(matches!(result, Err(TransactionError::Driver(_))));
        assert_eq!(record.rollbacks(), [true]);
        assert_eq!(tx.open_transactions(), 0);
    }

    #[test]
    fn test_failed_commit_rolls_back_same_frame() {
        let mut tx = manager();
        tx.driver_mut().fail_on = Some("COMMIT");
        let record = Arc::new(Recorder::default());
        let result: std::result::Result<Option<()>, TransactionError> =
            tx.transaction(TransactionOptions::new(), |tx| {
                tx.add_record(record.clone());
                Ok(())
            });
        assert!(matches!(result, Err(TransactionError::Driver(_))));
        assert_eq!(record.commits(), 0);
        assert_eq!(record.rollbacks(), [true]);
        assert_eq!(tx.open_transactions(), 0);
        assert_eq!(tx.driver().statements, ["BEGIN", "ROLLBACK"]);
    }

    #[test]
    fn test_finishing_frame_not_counted() {
        let mut tx = manager();
        tx.driver_mut().fail_on = Some("COMMIT");
        tx.begin_transaction(TransactionOptions::new()).unwrap();
        assert!(tx.commit_transaction().is_err());
        assert_eq!(tx.open_transactions(), 0);
        assert_eq!(tx.current_kind(), TransactionKind::Closed);

        tx.driver_mut().fail_on = None;
        tx.begin_transaction(TransactionOptions::new()).unwrap();
        assert_eq!(tx.current_kind(), TransactionKind::Real);
        assert_eq!(tx.open_transactions(), 1);
    }

    #[test]
    fn test_begin_after_failed_commit_rolls_back_leftover_frame() {
        let mut tx = manager();
        let record = Arc::new(Recorder::default());
        tx.driver_mut().fail_on = Some("COMMIT");

        tx.begin_transaction(TransactionOptions::new()).unwrap();
        tx.add_record(record.clone());
        assert!(tx.commit_transaction().is_err());
        assert_eq!(tx.open_transactions(), 0);

        // Records added while only the failed frame remains are not kept.
        let late = Arc::new(Recorder::default());
        tx.add_record(late.clone());

        tx.driver_mut().fail_on = None;
        tx.begin_transaction(TransactionOptions::new()).unwrap();
        assert_eq!(record.rollbacks(), [true]);
        assert_eq!(record.commits(), 0);

        tx.commit_transaction().unwrap();
        assert_eq!(record.commits(), 0);
        assert_eq!(record.rollbacks(), [true]);
        assert_eq!(late.commits(), 0);
        assert!(late.rollbacks().is_empty());
        assert_eq!(tx.driver().statements, ["BEGIN", "ROLLBACK", "BEGIN", "COMMIT"]);
    }

    #[test]
    fn test_begin_after_failed_release_rolls_back_to_savepoint() {
        let mut tx = manager();
        let record = Arc::new(Recorder::default());

        tx.begin_transaction(TransactionOptions::new()).unwrap();
        tx.begin_transaction(TransactionOptions::new()).unwrap();
        tx.add_record(record.clone());
        tx.driver_mut().fail_on = Some("RELEASE");
        assert!(tx.commit_transaction().is_err());
        assert_eq!(tx.open_transactions(), 1);

        tx.begin_transaction(TransactionOptions::new()).unwrap();
        assert_eq!(record.rollbacks(), [false]);
        assert_eq!(tx.open_transactions(), 2);
        assert_eq!(
            tx.driver().statements,
            [
                "BEGIN",
                "SAVEPOINT savepoint_1",
                "ROLLBACK TO SAVEPOINT savepoint_1",
                "SAVEPOINT savepoint_1"
            ]
        );
    }

    #[test]
    fn test_frames_left_open_by_body_are_rolled_back() {
        let mut tx = manager();
        let result: std::result::Result<_, TransactionError> =
            tx.transaction(TransactionOptions::new(), |tx| {
                tx.begin_transaction(TransactionOptions::new())?;
                Ok(())
            });
        assert_eq!(result.unwrap(), Some(()));
        assert_eq!(
            tx.driver().statements,
            [
                "BEGIN",
                "SAVEPOINT savepoint_1",
                "ROLLBACK TO SAVEPOINT savepoint_1",
                "COMMIT"
            ]
        );
    }

    proptest! {
        #[test]
        fn prop_depth_tracks_begins(n in 0usize..16, rollback_mask in any::<u16>()) {
            let mut tx = manager();
            for _ in 0..n {
                tx.begin_transaction(TransactionOptions::new()).unwrap();
            }
            prop_assert_eq!(tx.open_transactions(), n);
            for i in 0..n {
                if rollback_mask & (1 << i) != 0 {
                    tx.rollback_transaction().unwrap();
                } else {
                    tx.commit_transaction().unwrap();
                }
                prop_assert_eq!(tx.open_transactions(), n - i - 1);
            }
            prop_assert_eq!(tx.current_kind(), TransactionKind::Closed);
        }
    }
}
