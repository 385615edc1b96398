//! Transaction tests on pooled connections.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use proptest::prelude::*;
use sqlpool::{
    IsolationLevel, OwnerId, Pool, PoolConfig, PoolError, RecordRef, TransactionDriver,
    TransactionError, TransactionKind, TransactionManager, TransactionOptions,
};
use sqlpool_testing::{MockAdapter, MockFactory, RecordingRecord, init_tracing};

fn pool() -> (Pool<MockAdapter>, MockFactory) {
    init_tracing();
    let factory = MockFactory::new();
    let pool = Pool::new(PoolConfig::new().pool_size(2), factory.clone()).unwrap();
    (pool, factory)
}

fn record(tx: &mut TransactionManager<MockAdapter>, record: &Arc<RecordingRecord>) {
    tx.add_record(Arc::clone(record) as RecordRef);
}

#[test]
fn test_begin_begin_commit_rollback() {
    let (pool, factory) = pool();
    let conn = pool.checkout().unwrap();
    let rec = RecordingRecord::new();

    {
        let mut tx = conn.session();
        tx.begin_transaction(TransactionOptions::new()).unwrap();
        tx.begin_transaction(TransactionOptions::new()).unwrap();
        assert_eq!(tx.current_kind(), TransactionKind::Savepoint);
        record(&mut tx, &rec);

        tx.commit_transaction().unwrap();
        assert_eq!(rec.commits(), 0);
        assert!(rec.rollbacks().is_empty());
        assert_eq!(tx.current_kind(), TransactionKind::Real);

        tx.rollback_transaction().unwrap();
        assert_eq!(tx.current_kind(), TransactionKind::Closed);
        assert_eq!(tx.open_transactions(), 0);
    }

    assert_eq!(rec.rollbacks(), vec![true]);
    assert_eq!(rec.commits(), 0);
    assert_eq!(
        factory.session(0).unwrap().statements(),
        vec![
            "BEGIN",
            "SAVEPOINT savepoint_1",
            "RELEASE SAVEPOINT savepoint_1",
            "ROLLBACK",
        ]
    );
    pool.checkin(&conn);
}

#[test]
fn test_savepoint_records_commit_with_real_transaction() {
    let (pool, _factory) = pool();
    let conn = pool.checkout().unwrap();
    let outer = RecordingRecord::new();
    let inner = RecordingRecord::new();

    conn.transaction(TransactionOptions::new(), |tx| {
        record(tx, &outer);
        tx.transaction(TransactionOptions::new().requires_new(), |tx| {
            record(tx, &inner);
            Ok::<_, TransactionError>(())
        })?;
        assert_eq!(inner.commits(), 0);
        Ok::<_, TransactionError>(())
    })
    .unwrap();

    assert_eq!(outer.commits(), 1);
    assert_eq!(inner.commits(), 1);
    assert_eq!(conn.open_transactions(), 0);
}

#[test]
fn test_duplicate_record_notified_once() {
    let (pool, _factory) = pool();
    let conn = pool.checkout().unwrap();
    let rec = RecordingRecord::new();

    conn.transaction(TransactionOptions::new(), |tx| {
        record(tx, &rec);
        record(tx, &rec);
        Ok::<_, TransactionError>(())
    })
    .unwrap();
    assert_eq!(rec.commits(), 1);

    let rec = RecordingRecord::new();
    let result = conn.transaction(TransactionOptions::new(), |tx| {
        record(tx, &rec);
        record(tx, &rec);
        Err::<(), _>(TransactionError::Rollback)
    });
    assert!(result.unwrap().is_none());
    assert_eq!(rec.rollbacks(), vec![true]);
}

#[test]
fn test_failing_record_does_not_block_siblings() {
    let (pool, _factory) = pool();
    let conn = pool.checkout().unwrap();
    let bad = RecordingRecord::failing();
    let good = RecordingRecord::new();

    conn.transaction(TransactionOptions::new(), |tx| {
        record(tx, &bad);
        record(tx, &good);
        Ok::<_, TransactionError>(())
    })
    .unwrap();

    assert_eq!(bad.commits(), 1);
    assert_eq!(good.commits(), 1);
}

#[test]
fn test_nested_rollback_only_undoes_savepoint() {
    let (pool, factory) = pool();
    let conn = pool.checkout().unwrap();
    let inner = RecordingRecord::new();

    let value = conn
        .transaction(TransactionOptions::new(), |tx| {
            tx.driver_mut()
                .execute("INSERT INTO users VALUES (1)")
                .map_err(PoolError::Driver)?;
            let nested = tx.transaction(TransactionOptions::new().requires_new(), |tx| {
                record(tx, &inner);
                tx.driver_mut()
                    .execute("INSERT INTO users VALUES (2)")
                    .map_err(PoolError::Driver)?;
                Err::<(), _>(PoolError::from(TransactionError::Rollback))
            })?;
            assert!(nested.is_none());
            Ok::<_, PoolError>(42)
        })
        .unwrap();

    assert_eq!(value, Some(42));
    assert_eq!(inner.rollbacks(), vec![false]);
    assert_eq!(
        factory.session(0).unwrap().statements(),
        vec![
            "BEGIN",
            "INSERT INTO users VALUES (1)",
            "SAVEPOINT savepoint_1",
            "INSERT INTO users VALUES (2)",
            "ROLLBACK TO SAVEPOINT savepoint_1",
            "COMMIT",
        ]
    );
}

#[test]
fn test_joined_transaction_issues_no_statements() {
    let (pool, factory) = pool();
    let conn = pool.checkout().unwrap();

    conn.transaction(TransactionOptions::new(), |tx| {
        tx.transaction(TransactionOptions::new(), |tx| {
            assert_eq!(tx.open_transactions(), 1);
            Ok::<_, TransactionError>(())
        })?;
        Ok::<_, TransactionError>(())
    })
    .unwrap();

    assert_eq!(
        factory.session(0).unwrap().statements(),
        vec!["BEGIN", "COMMIT"]
    );
}

#[test]
fn test_isolation_levels() {
    let (pool, factory) = pool();
    let conn = pool.checkout().unwrap();

    conn.transaction(
        TransactionOptions::new().isolation(IsolationLevel::Serializable),
        |tx| {
            let nested = tx.begin_transaction(
                TransactionOptions::new().isolation(IsolationLevel::ReadCommitted),
            );
            assert!(matches!(
                nested,
                Err(TransactionError::IsolationInNestedTransaction)
            ));

            let joined = tx.transaction(
                TransactionOptions::new().isolation(IsolationLevel::ReadCommitted),
                |_tx| Ok::<_, TransactionError>(()),
            );
            assert!(matches!(joined, Err(TransactionError::IsolationWhenJoining)));
            Ok::<_, TransactionError>(())
        },
    )
    .unwrap();

    let statements = factory.session(0).unwrap().statements();
    assert_eq!(statements.first().map(String::as_str), Some("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE"));
    assert_eq!(statements.last().map(String::as_str), Some("COMMIT"));

    factory.session(0).unwrap().set_supports_isolation(false);
    let unsupported = conn.transaction(
        TransactionOptions::new().isolation(IsolationLevel::Serializable),
        |_tx| Ok::<_, TransactionError>(()),
    );
    assert!(matches!(unsupported, Err(TransactionError::IsolationUnsupported)));
    assert_eq!(conn.open_transactions(), 0);
}

#[test]
fn test_commit_failure_propagates_and_rolls_back() {
    let (pool, factory) = pool();
    let conn = pool.checkout().unwrap();
    let rec = RecordingRecord::new();
    factory.session(0).unwrap().fail_on("COMMIT");

    let err = conn
        .transaction(TransactionOptions::new(), |tx| {
            record(tx, &rec);
            Ok::<_, TransactionError>(())
        })
        .unwrap_err();

    assert!(matches!(err, TransactionError::Driver(_)));
    assert_eq!(rec.commits(), 0);
    assert_eq!(rec.rollbacks(), vec![true]);
    assert_eq!(conn.open_transactions(), 0);
}

#[test]
fn test_failed_commit_frame_rolled_back_before_next_begin() {
    let (pool, factory) = pool();
    let conn = pool.checkout().unwrap();
    let session = factory.session(0).unwrap();
    let rec = RecordingRecord::new();

    {
        let mut tx = conn.session();
        session.fail_on("COMMIT");
        tx.begin_transaction(TransactionOptions::new()).unwrap();
        record(&mut tx, &rec);
        assert!(tx.commit_transaction().is_err());
        assert_eq!(tx.open_transactions(), 0);

        session.clear_failures();
        tx.begin_transaction(TransactionOptions::new()).unwrap();
        tx.commit_transaction().unwrap();
    }

    assert_eq!(rec.commits(), 0);
    assert_eq!(rec.rollbacks(), vec![true]);
    assert_eq!(session.statements(), vec!["BEGIN", "ROLLBACK", "BEGIN", "COMMIT"]);
    pool.checkin(&conn);
}

#[test]
fn test_transaction_through_owner_lease() {
    let (pool, factory) = pool();
    let owner = OwnerId::new(21);

    pool.with_connection(owner, |conn| {
        conn.transaction(TransactionOptions::new(), |tx| {
            tx.driver_mut()
                .execute("UPDATE accounts SET balance = 0")
                .map_err(PoolError::Driver)
        })?;
        Ok::<_, PoolError>(())
    })
    .unwrap();

    assert!(!pool.is_active_connection(owner));
    assert_eq!(
        factory.session(0).unwrap().statements(),
        vec!["BEGIN", "UPDATE accounts SET balance = 0", "COMMIT"]
    );
}

proptest! {
    #[test]
    fn prop_savepoint_records_notified_exactly_once(depth in 1usize..6, commit_real in any::<bool>()) {
        let mut tx = TransactionManager::new(MockAdapter::new());
        let records: Vec<_> = (0..depth).map(|_| RecordingRecord::new()).collect();

        for rec in &records {
            tx.begin_transaction(TransactionOptions::new()).unwrap();
            record(&mut tx, rec);
        }
        prop_assert_eq!(tx.open_transactions(), depth);

        for _ in 1..depth {
            tx.commit_transaction().unwrap();
        }
        for rec in &records {
            prop_assert_eq!(rec.commits(), 0);
            prop_assert!(rec.rollbacks().is_empty());
        }

        if commit_real {
            tx.commit_transaction().unwrap();
        } else {
            tx.rollback_transaction().unwrap();
        }
        prop_assert_eq!(tx.open_transactions(), 0);

        for rec in &records {
            if commit_real {
                prop_assert_eq!(rec.commits(), 1);
                prop_assert!(rec.rollbacks().is_empty());
            } else {
                prop_assert_eq!(rec.commits(), 0);
                prop_assert_eq!(rec.rollbacks(), vec![true]);
            }
        }
    }
}
