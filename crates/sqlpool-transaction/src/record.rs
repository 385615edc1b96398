//! Records notified when the transaction they took part in finishes.

use std::sync::Arc;

use crate::error::BoxError;

/// A domain object that wants to hear how its transaction ended.
///
/// Records are registered with
/// [`TransactionManager::add_record`](crate::TransactionManager::add_record)
/// and notified at most once per commit or rollback, however many times they
/// were registered.
pub trait TransactionRecord: Send + Sync {
    /// The outermost real transaction committed.
    fn committed(&self) -> Result<(), BoxError>;

    /// The frame the record was registered in was rolled back.
    ///
    /// `full_rollback` is `true` when the real transaction was rolled back
    /// and `false` when only a savepoint was.
    fn rolled_back(&self, full_rollback: bool) -> Result<(), BoxError>;
}

/// Shared handle to a registered record.
pub type RecordRef = Arc<dyn TransactionRecord>;

/// Drop repeated registrations of the same record, keeping first-seen order.
pub(crate) fn unique(records: impl IntoIterator<Item = RecordRef>) -> Vec<RecordRef> {
    let mut seen: Vec<RecordRef> = Vec::new();
    for record in records {
        if !seen
            .iter()
            .any(|existing| std::ptr::addr_eq(Arc::as_ptr(existing), Arc::as_ptr(&record)))
        {
            seen.push(record);
        }
    }
    seen
}

pub(crate) fn notify_committed(records: impl IntoIterator<Item = RecordRef>) {
    for record in unique(records) {
        if let Err(e) = record.committed() {
            tracing::error!(error = %e, "record commit callback failed");
        }
    }
}

pub(crate) fn notify_rolled_back(records: impl IntoIterator<Item = RecordRef>, full_rollback: bool) {
    for record in unique(records) {
        if let Err(e) = record.rolled_back(full_rollback) {
            tracing::error!(
                error = %e,
                full_rollback = full_rollback,
                "record rollback callback failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct Counter {
        commits: AtomicUsize,
        failing: bool,
    }

    impl TransactionRecord for Counter {
        fn committed(&self) -> Result<(), BoxError> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            if self.failing {
                return Err("callback exploded".into());
            }
            Ok(())
        }

        fn rolled_back(&self, _full_rollback: bool) -> Result<(), BoxError> {
            Ok(())
        }
    }

    #[test]
    fn test_unique_by_identity() {
        let a: RecordRef = Arc::new(Counter::default());
        let b: RecordRef = Arc::new(Counter::default());
        let records = vec![a.clone(), b.clone(), a.clone(), b, a];
        assert_eq!(unique(records).len(), 2);
    }

    #[test]
    fn test_failing_callback_does_not_stop_others() {
        let bad = Arc::new(Counter {
            failing: true,
            ..Counter::default()
        });
        let good = Arc::new(Counter::default());
        let records = vec![bad.clone() as RecordRef, good.clone() as RecordRef];

        notify_committed(records);

        assert_eq!(bad.commits.load(Ordering::SeqCst), 1);
        assert_eq!(good.commits.load(Ordering::SeqCst), 1);
    }
}
