//! Тесты для точек сохранения

use crate::common::test_utils::{begin_session, test_manager, TestTable};
use crate::common::{Error, IsolationLevel};
use crate::core::{ActionType, ReadMode};

#[test]
fn test_rollback_to_savepoint_undoes_later_steps() {
    let tm = test_manager();
    let table = TestTable::persistent(20);
    let mut session = begin_session(&tm, IsolationLevel::ReadCommitted);

    let kept = table.insert(&tm, &mut session, b"kept");
    tm.savepoint(&mut session, "sp").unwrap();
    let lost = table.insert(&tm, &mut session, b"lost");
    table.delete(&tm, &mut session, &kept);

    let kept_action = tm.ledger().pending_action(kept.id).unwrap();
    assert_eq!(tm.ledger().action_type(kept_action), Some(ActionType::InsertDelete));

    tm.rollback_to_savepoint(&mut session, "sp").unwrap();

    assert_eq!(tm.ledger().action_type(kept_action), Some(ActionType::Insert));
    assert!(tm.can_read(&session, kept.id, ReadMode::Read));
    assert!(!table.memory.contains(lost.id.position));
    assert_eq!(session.row_action_list().len(), 1);
    assert_eq!(session.savepoints().len(), 1);
    assert_eq!(tm.get_statistics().savepoint_rollbacks, 1);

    assert!(tm.commit_transaction(&mut session).unwrap());
    let observer = tm.create_session();
    assert!(tm.can_read(&observer, kept.id, ReadMode::Read));
}

#[test]
fn test_savepoint_timestamp_orders_later_steps() {
    let tm = test_manager();
    let mut session = begin_session(&tm, IsolationLevel::ReadCommitted);
    let start = session.transaction_timestamp();

    tm.savepoint(&mut session, "a").unwrap();
    let savepoint = session.savepoints()[0].clone();
    assert!(savepoint.timestamp > start);
    assert_eq!(session.action_timestamp(), savepoint.timestamp);
    assert_eq!(savepoint.action_index, 0);
}

#[test]
fn test_nested_savepoints() {
    let tm = test_manager();
    let table = TestTable::persistent(20);
    let mut session = begin_session(&tm, IsolationLevel::ReadCommitted);

    tm.savepoint(&mut session, "outer").unwrap();
    let first = table.insert(&tm, &mut session, b"first");
    tm.savepoint(&mut session, "inner").unwrap();
    let second = table.insert(&tm, &mut session, b"second");

    tm.rollback_to_savepoint(&mut session, "inner").unwrap();
    assert!(table.memory.contains(first.id.position));
    assert!(!table.memory.contains(second.id.position));
    assert_eq!(session.savepoints().len(), 2);

    tm.rollback_savepoint(&mut session, 0).unwrap();
    assert!(!table.memory.contains(first.id.position));
    assert!(session.row_action_list().is_empty());
    assert_eq!(session.savepoints().len(), 1);
    assert!(session.is_transaction());
}

#[test]
fn test_redeclared_savepoint_replaces_old_one() {
    let tm = test_manager();
    let table = TestTable::persistent(20);
    let mut session = begin_session(&tm, IsolationLevel::ReadCommitted);

    tm.savepoint(&mut session, "sp").unwrap();
    let first = table.insert(&tm, &mut session, b"first");
    tm.savepoint(&mut session, "sp").unwrap();
    let second = table.insert(&tm, &mut session, b"second");
    assert_eq!(session.savepoints().len(), 1);

    tm.rollback_to_savepoint(&mut session, "sp").unwrap();
    assert!(table.memory.contains(first.id.position));
    assert!(!table.memory.contains(second.id.position));
}

#[test]
fn test_release_savepoint() {
    let tm = test_manager();
    let mut session = begin_session(&tm, IsolationLevel::ReadCommitted);

    tm.savepoint(&mut session, "a").unwrap();
    tm.savepoint(&mut session, "b").unwrap();
    tm.release_savepoint(&mut session, "a").unwrap();
    assert!(session.savepoints().is_empty());

    assert!(matches!(
        tm.rollback_to_savepoint(&mut session, "b"),
        Err(Error::Transaction { .. })
    ));
    assert!(matches!(
        tm.rollback_savepoint(&mut session, 3),
        Err(Error::Transaction { .. })
    ));
}

#[test]
fn test_savepoint_starts_transaction() {
    let tm = test_manager();
    let mut session = tm.create_session();

    tm.savepoint(&mut session, "sp").unwrap();
    assert!(session.is_transaction());
    assert_eq!(tm.live_transaction_count(), 1);
    tm.rollback(&mut session).unwrap();
    assert!(session.savepoints().is_empty());
}
