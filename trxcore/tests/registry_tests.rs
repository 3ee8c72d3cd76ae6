//! TransactionRegistry: leases, lifecycle, expiry and destruction

#[path = "testutils/mod.rs"]
mod testutils;

use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use testutils::fixture::{Fixture, COORDINATOR};
use trxcore::storage::{ActionExecutor, Collection, ScriptExecutor};
use trxcore::wal::MarkerKind;
use trxcore::{
    AccessMode, DestroyOutcome, DestroyReason, LifeCycle, RegistryError, TransactionError,
    TransactionHints, TransactionId, TransactionProxy, TransactionStatus, WalError, WalManager,
};

#[test]
fn test_ids_carry_registry_coordinator() {
    let fixture = Fixture::new();
    let id = fixture.registry.insert(fixture.state(), None).unwrap();
    assert_eq!(id.coordinator(), COORDINATOR);
    assert_eq!(fixture.registry.registry_id(), COORDINATOR);
    assert_eq!(id.identifier() % 4, 0);

    let lease = fixture.registry.open(id, Some("_system")).unwrap();
    assert_eq!(lease.id(), id);
    assert_eq!(lease.database(), "_system");
}

#[test]
fn test_open_twice_fails_until_closed() {
    let fixture = Fixture::new();
    let id = fixture.registry.insert(fixture.state(), None).unwrap();

    let lease = fixture.registry.open(id, None).unwrap();
    assert!(matches!(
        fixture.registry.open(id, None),
        Err(RegistryError::AlreadyOpen(_))
    ));
    fixture.registry.close(lease, None, LifeCycle::Live).unwrap();

    let lease = fixture.registry.open(id, None).unwrap();
    lease.release(None).unwrap();
}

#[test]
fn test_unknown_ids_and_databases() {
    let fixture = Fixture::new();
    let id = fixture.registry.insert(fixture.state(), None).unwrap();

    assert!(matches!(
        fixture.registry.open(TransactionId::new(COORDINATOR, 9996), None),
        Err(RegistryError::NotFound(_))
    ));
    assert!(matches!(
        fixture.registry.open(id, Some("other")),
        Err(RegistryError::NotFound(_))
    ));
    assert!(matches!(
        fixture.registry.destroy("other", id, DestroyReason::Requested),
        Err(RegistryError::NotFound(_))
    ));
}

#[test]
fn test_terminal_states_are_sticky() {
    let fixture = Fixture::new();
    let users = fixture.collection("users");
    let id = fixture
        .registry
        .insert(fixture.running(&[&users], AccessMode::Write), None)
        .unwrap();

    fixture.registry.open(id, None).unwrap().commit(None).unwrap();

    assert!(matches!(
        fixture.registry.open(id, None),
        Err(RegistryError::AlreadyCommitted(_))
    ));
    let info = fixture.registry.info(None, id).unwrap();
    assert_eq!(info.status, LifeCycle::Committed);
    assert!(!info.open);

    let aborted = fixture.registry.insert(fixture.state(), None).unwrap();
    fixture.registry.open(aborted, None).unwrap().abort(None).unwrap();
    assert!(matches!(
        fixture.registry.open(aborted, None),
        Err(RegistryError::AlreadyAborted(_))
    ));
}

#[test]
fn test_expiry_scenario() {
    let fixture = Fixture::new();
    let t0 = Duration::from_secs(1000);
    fixture.clock.set(t0);
    let id = fixture
        .registry
        .insert(fixture.state(), Some(Duration::from_secs(600)))
        .unwrap();

    fixture.clock.set(t0 + Duration::from_secs(1));
    let lease = fixture.registry.open(id, None).unwrap();
    fixture.registry.close_abort(lease, None).unwrap();
    let info = fixture.registry.info(None, id).unwrap();
    assert_eq!(info.expires_in, 600.0);

    fixture.clock.set(t0 + Duration::from_secs(600));
    assert_eq!(fixture.registry.expire_transactions(), 0);
    assert!(fixture.registry.contains("_system", id));

    fixture.clock.set(t0 + Duration::from_secs(602));
    assert_eq!(fixture.registry.expire_transactions(), 1);
    assert!(!fixture.registry.contains("_system", id));
}

#[test]
fn test_close_can_replace_ttl() {
    let fixture = Fixture::new();
    let id = fixture.registry.insert(fixture.state(), None).unwrap();
    let lease = fixture.registry.open(id, None).unwrap();
    lease.release(Some(Duration::from_secs(5))).unwrap();

    let info = fixture.registry.info(None, id).unwrap();
    assert_eq!(info.ttl, 5.0);
    fixture.clock.advance(Duration::from_secs(6));
    assert_eq!(fixture.registry.expire_transactions(), 1);
}

#[test]
fn test_expiry_never_removes_open_transactions() {
    let fixture = Fixture::new();
    let id = fixture
        .registry
        .insert(fixture.state(), Some(Duration::from_secs(1)))
        .unwrap();
    let lease = fixture.registry.open(id, None).unwrap();

    fixture.clock.advance(Duration::from_secs(60));
    assert_eq!(fixture.registry.expire_transactions(), 0);
    assert!(fixture.registry.contains("_system", id));

    lease.release(None).unwrap();
    fixture.clock.advance(Duration::from_secs(2));
    assert_eq!(fixture.registry.expire_transactions(), 1);
}

#[test]
fn test_transaction_spans_requests() {
    let fixture = Fixture::new();
    let users = fixture.collection("users");
    let executor = ScriptExecutor::new(fixture.collections.clone());

    let id = fixture
        .registry
        .insert(fixture.running(&[&users], AccessMode::Write), None)
        .unwrap();

    {
        let mut lease = fixture.registry.open(id, None).unwrap();
        executor
            .execute(
                &mut lease,
                &json!([{ "op": "insert", "collection": "users", "key": "a", "value": 1 }]),
            )
            .unwrap();
    }
    {
        let mut lease = fixture.registry.open(id, None).unwrap();
        executor
            .execute(
                &mut lease,
                &json!({ "op": "insert", "collection": "users", "key": "b", "value": 2 }),
            )
            .unwrap();
        lease.release(None).unwrap();
    }

    fixture.registry.open(id, None).unwrap().commit(None).unwrap();
    assert_eq!(users.keys(), vec!["a".to_string(), "b".to_string()]);
    assert_eq!(fixture.wal.count(MarkerKind::BeginTransaction), 1);
    assert_eq!(fixture.wal.count(MarkerKind::CommitTransaction), 1);
}

#[test]
fn test_failed_commit_records_abort() {
    let fixture = Fixture::new();
    let users = fixture.collection("users");
    let mut state = fixture.running(&[&users], AccessMode::Write);
    let op = users
        .insert("k", json!(1), fixture.wal.next_sequence())
        .unwrap();
    state.add_operation(Box::new(op), false).unwrap();
    let id = fixture.registry.insert(state, None).unwrap();

    fixture
        .wal
        .fail_on(MarkerKind::CommitTransaction, WalError::NoSpace);
    let err = fixture.registry.open(id, None).unwrap().commit(None).unwrap_err();

    assert!(matches!(
        err,
        RegistryError::Transaction(TransactionError::Wal(WalError::NoSpace))
    ));
    assert_eq!(
        fixture.registry.info(None, id).unwrap().status,
        LifeCycle::Aborted
    );
    assert!(users.is_empty());
}

#[test]
fn test_destroy_open_transaction_is_deferred() {
    let fixture = Fixture::new();
    let users = fixture.collection("users");
    let id = fixture
        .registry
        .insert(fixture.running(&[&users], AccessMode::Write), None)
        .unwrap();

    let mut lease = fixture.registry.open(id, None).unwrap();
    let op = users
        .insert("k", json!(1), fixture.wal.next_sequence())
        .unwrap();
    lease.add_operation(Box::new(op), false).unwrap();

    assert_eq!(
        fixture
            .registry
            .destroy("_system", id, DestroyReason::Requested)
            .unwrap(),
        DestroyOutcome::Deferred
    );
    assert!(lease.is_killed());
    let info = fixture.registry.info(None, id).unwrap();
    assert!(info.open);
    assert!(info.pending_destroy);

    // the holder observes the kill
    let op = users
        .insert("k2", json!(2), fixture.wal.next_sequence())
        .unwrap();
    assert!(matches!(
        lease.add_operation(Box::new(op), false),
        Err(TransactionError::Killed)
    ));

    drop(lease);
    assert!(!fixture.registry.contains("_system", id));
    assert!(users.is_empty());
    assert_eq!(fixture.wal.running(), 0);
}

#[test]
fn test_destroy_all_aborts_running() {
    let fixture = Fixture::new();
    let users = fixture.collection("users");
    let mut state = fixture.running(&[&users], AccessMode::Write);
    let op = users
        .insert("k", json!(1), fixture.wal.next_sequence())
        .unwrap();
    state.add_operation(Box::new(op), false).unwrap();

    fixture.registry.insert(state, None).unwrap();
    fixture.registry.insert(fixture.state(), None).unwrap();
    let done = fixture.registry.insert(fixture.state(), None).unwrap();
    fixture.registry.open(done, None).unwrap().abort(None).unwrap();
    assert_eq!(fixture.registry.number_registered(), 3);

    assert_eq!(fixture.registry.destroy_all(), 3);
    assert_eq!(fixture.registry.number_registered(), 0);
    assert!(fixture.registry.snapshot().is_empty());
    assert!(users.is_empty());
    assert_eq!(users.lock_holders(), (0, false));
}

#[test]
fn test_dropping_registry_destroys_entries() {
    let fixture = Fixture::new();
    let users = fixture.collection("users");
    let mut state = fixture.running(&[&users], AccessMode::Write);
    let op = users
        .insert("k", json!(1), fixture.wal.next_sequence())
        .unwrap();
    state.add_operation(Box::new(op), false).unwrap();
    fixture.registry.insert(state, None).unwrap();

    let Fixture { registry, wal, .. } = fixture;
    drop(registry);
    assert!(users.is_empty());
    assert_eq!(wal.count(MarkerKind::AbortTransaction), 1);
}

#[test]
fn test_one_lease_under_contention() {
    let fixture = Fixture::new();
    let id = fixture.registry.insert(fixture.state(), None).unwrap();
    let holders = AtomicUsize::new(0);
    let opened = AtomicUsize::new(0);
    let conflicts = AtomicUsize::new(0);

    thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| match fixture.registry.open(id, None) {
                Ok(lease) => {
                    assert_eq!(holders.fetch_add(1, Ordering::SeqCst), 0);
                    opened.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(5));
                    holders.fetch_sub(1, Ordering::SeqCst);
                    lease.release(None).unwrap();
                }
                Err(RegistryError::AlreadyOpen(_)) => {
                    conflicts.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => panic!("unexpected error: {e}"),
            });
        }
    });

    assert!(opened.load(Ordering::SeqCst) >= 1);
    assert_eq!(
        opened.load(Ordering::SeqCst) + conflicts.load(Ordering::SeqCst),
        8
    );
    assert!(!fixture.registry.info(None, id).unwrap().open);
}

#[test]
fn test_proxy_piggybacks_on_parent() {
    let fixture = Fixture::new();
    let users = fixture.collection("users");
    let lookup = fixture.collection("lookup");
    let id = fixture
        .registry
        .insert(fixture.running(&[&users], AccessMode::Write), None)
        .unwrap();

    {
        let mut proxy = TransactionProxy::new(
            &fixture.registry,
            &fixture.database,
            id,
            users.id(),
            AccessMode::Write,
        )
        .unwrap();
        assert!(proxy.is_embedded());
        assert_eq!(proxy.level(), 1);
        assert!(fixture.registry.info(None, id).unwrap().open);

        proxy.begin(TransactionHints::none()).unwrap();
        let op = users
            .insert("p", json!(1), fixture.wal.next_sequence())
            .unwrap();
        proxy.add_operation(Box::new(op), false).unwrap();
        proxy.finish(true).unwrap();
    }

    let info = fixture.registry.info(None, id).unwrap();
    assert!(!info.open);
    assert_eq!(info.status, LifeCycle::Live);
    // nested commit leaves the parent running
    assert_eq!(fixture.wal.count(MarkerKind::CommitTransaction), 0);

    // nested levels may read but not write unregistered collections
    let reader = TransactionProxy::new(
        &fixture.registry,
        &fixture.database,
        id,
        lookup.id(),
        AccessMode::Read,
    )
    .unwrap();
    reader.finish(true).unwrap();
    assert!(matches!(
        TransactionProxy::new(
            &fixture.registry,
            &fixture.database,
            id,
            lookup.id(),
            AccessMode::Write,
        ),
        Err(RegistryError::Transaction(
            TransactionError::UnregisteredCollectionAccess { .. }
        ))
    ));

    let lease = fixture.registry.open(id, None).unwrap();
    assert_eq!(lease.nesting_level(), 0);
    assert_eq!(lease.status(), TransactionStatus::Running);
    lease.commit(None).unwrap();
    assert_eq!(users.get("p"), Some(json!(1)));
}

#[test]
fn test_standalone_proxy() {
    let fixture = Fixture::new();
    let users = fixture.collection("users");

    let mut proxy = TransactionProxy::new(
        &fixture.registry,
        &fixture.database,
        TransactionId::ZERO,
        users.id(),
        AccessMode::Write,
    )
    .unwrap();
    assert!(!proxy.is_embedded());
    assert_eq!(proxy.level(), 0);
    proxy.begin(TransactionHints::none()).unwrap();
    let op = users
        .insert("s", json!(1), fixture.wal.next_sequence())
        .unwrap();
    proxy.add_operation(Box::new(op), false).unwrap();
    proxy.finish(true).unwrap();

    assert_eq!(users.get("s"), Some(json!(1)));
    assert_eq!(fixture.registry.number_registered(), 0);
    assert_eq!(fixture.wal.count(MarkerKind::CommitTransaction), 1);
}

#[test]
fn test_dropped_proxy_aborts() {
    let fixture = Fixture::new();
    let users = fixture.collection("users");
    {
        let mut proxy = TransactionProxy::new(
            &fixture.registry,
            &fixture.database,
            TransactionId::ZERO,
            users.id(),
            AccessMode::Write,
        )
        .unwrap();
        proxy.begin(TransactionHints::none()).unwrap();
        let op = users
            .insert("s", json!(1), fixture.wal.next_sequence())
            .unwrap();
        proxy.add_operation(Box::new(op), false).unwrap();
    }
    assert!(users.is_empty());
    assert_eq!(fixture.wal.count(MarkerKind::AbortTransaction), 1);
}
