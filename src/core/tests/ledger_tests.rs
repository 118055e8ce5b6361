//! Тесты для журнала действий над строками

use crate::common::{Error, PersistenceScope, RowId, SessionId, TableId, TableRef, Timestamp};
use crate::core::{
    ActionState, ActionType, Ledger, MemoryStore, PersistentStore, ReadMode, Row,
};
use std::sync::Arc;

const A: SessionId = SessionId(1);
const B: SessionId = SessionId(2);

struct Fixture {
    ledger: Ledger,
    table: TableRef,
    memory: Arc<MemoryStore>,
    store: Arc<dyn PersistentStore>,
}

impl Fixture {
    fn new() -> Self {
        Self::with_table(TableRef::persistent(TableId(20)))
    }

    fn with_table(table: TableRef) -> Self {
        let memory = Arc::new(MemoryStore::new(table.id));
        let store: Arc<dyn PersistentStore> = memory.clone();
        Self {
            ledger: Ledger::new(),
            table,
            memory,
            store,
        }
    }

    /// Строка, вставленная сессией `A` и слитая с меткой `ts`
    fn merged_row(&self, ts: u64) -> Row {
        let row = self.memory.allocate(vec![ts as u8]);
        self.store.index_row(A, &row).unwrap();
        let id = self
            .ledger
            .create_insert_action(A, Timestamp(ts - 1), self.table, self.store.clone(), row.id)
            .unwrap();
        self.ledger.commit(id, A, Timestamp(ts));
        self.ledger.merge_transaction(&[id], 0, 1, Timestamp(ts));
        row
    }

    /// Зафиксированное и слитое удаление строки
    fn delete_final(&self, row: &Row, session: SessionId, ts: u64) -> crate::common::ActionId {
        let id = self
            .ledger
            .add_delete_action_to_row(
                session,
                Timestamp(ts),
                self.table,
                self.store.clone(),
                row.id,
                None,
            )
            .unwrap();
        self.ledger.commit(id, session, Timestamp(ts + 1));
        self.ledger.merge_transaction(&[id], 0, 1, Timestamp(ts + 1));
        id
    }
}

#[test]
fn test_merge_detaches_and_sets_baseline() {
    let fx = Fixture::new();
    let row = fx.merged_row(5);

    let slot = fx.ledger.row_slot(row.id).unwrap();
    assert_eq!(slot.action, None);
    assert_eq!(slot.baseline, Timestamp(5));
    assert!(fx.ledger.can_read(B, row.id, Timestamp(1), ReadMode::Read));
}

#[test]
fn test_finalise_rows_is_idempotent() {
    let fx = Fixture::new();
    let row = fx.merged_row(5);
    let id = fx.delete_final(&row, B, 7);

    assert_eq!(fx.ledger.action_type(id), Some(ActionType::DeleteFinal));
    assert_eq!(fx.ledger.finalise_rows(B, &[id], 0, 1).unwrap(), 1);
    assert_eq!(fx.ledger.is_delete_complete(id), Some(true));
    assert!(!fx.memory.contains(row.id.position));
    assert!(fx.ledger.row_slot(row.id).is_none());

    // повторный вызов не трогает хранилище
    fx.memory.fail_on(row.id.position);
    assert_eq!(fx.ledger.finalise_rows(B, &[id], 0, 1).unwrap(), 0);
}

#[test]
fn test_finalise_skips_evicted_row() {
    let fx = Fixture::new();
    let row = fx.merged_row(5);
    let id = fx.delete_final(&row, B, 7);

    fx.memory.evict(row.id.position);
    assert_eq!(fx.ledger.finalise_rows(B, &[id], 0, 1).unwrap(), 1);
    assert_eq!(fx.ledger.is_delete_complete(id), Some(true));
}

#[test]
fn test_finalise_continues_after_store_error() {
    let fx = Fixture::new();
    let first = fx.merged_row(5);
    let second = fx.merged_row(6);
    let first_id = fx.delete_final(&first, B, 8);
    let second_id = fx.delete_final(&second, B, 10);

    fx.memory.fail_on(first.id.position);
    let result = fx.ledger.finalise_rows(B, &[first_id, second_id], 0, 2);

    assert!(matches!(result, Err(Error::Storage { .. })));
    assert!(fx.memory.contains(first.id.position));
    assert!(!fx.memory.contains(second.id.position));
    assert_eq!(fx.ledger.is_delete_complete(first_id), Some(false));
    assert_eq!(fx.ledger.is_delete_complete(second_id), Some(true));

    // строка с ошибкой остается удаленной для читателей
    assert_eq!(fx.ledger.pending_action(first.id), Some(first_id));
    assert!(!fx.ledger.can_read(A, first.id, Timestamp::INFINITE, ReadMode::Read));
    assert_eq!(fx.ledger.unfinalised_count(), 1);
    assert_eq!(fx.ledger.reclaim(&[first_id]), 0);
}

#[test]
fn test_retry_finalise_after_store_recovers() {
    let fx = Fixture::new();
    let row = fx.merged_row(5);
    let id = fx.delete_final(&row, B, 7);

    fx.memory.fail_on(row.id.position);
    assert!(fx.ledger.finalise_rows(B, &[id], 0, 1).is_err());
    assert!(matches!(fx.ledger.retry_finalise(B), Err(Error::Storage { .. })));
    assert_eq!(fx.ledger.unfinalised_count(), 1);
    assert!(fx.ledger.contains_action(id));

    fx.memory.recover(row.id.position);
    assert_eq!(fx.ledger.retry_finalise(B).unwrap(), 1);
    assert_eq!(fx.ledger.unfinalised_count(), 0);
    assert!(!fx.memory.contains(row.id.position));
    assert!(fx.ledger.row_slot(row.id).is_none());
    assert!(!fx.ledger.contains_action(id));
    assert_eq!(fx.ledger.retry_finalise(B).unwrap(), 0);
}

#[test]
fn test_finalise_respects_range() {
    let fx = Fixture::new();
    let first = fx.merged_row(5);
    let second = fx.merged_row(6);
    let ids = [fx.delete_final(&first, B, 8), fx.delete_final(&second, B, 10)];

    assert_eq!(fx.ledger.finalise_rows(B, &ids, 1, 2).unwrap(), 1);
    assert!(fx.memory.contains(first.id.position));
    assert!(!fx.memory.contains(second.id.position));
}

#[test]
fn test_second_writer_gets_conflict() {
    let fx = Fixture::new();
    let row = fx.memory.allocate(vec![1]);
    fx.ledger
        .create_insert_action(A, Timestamp(3), fx.table, fx.store.clone(), row.id)
        .unwrap();

    let err = fx
        .ledger
        .add_delete_action_to_row(B, Timestamp(4), fx.table, fx.store.clone(), row.id, None)
        .unwrap_err();
    assert!(matches!(err, Error::WriteConflict { holder: 1, .. }));
}

#[test]
fn test_insert_without_pending_action() {
    let fx = Fixture::new();
    let row = fx.memory.allocate(vec![1]);

    assert!(matches!(
        fx.ledger.insert_action_for(A, row.id),
        Err(Error::ProtocolViolation { .. })
    ));

    fx.ledger
        .create_insert_action(A, Timestamp(3), fx.table, fx.store.clone(), row.id)
        .unwrap();
    assert!(matches!(
        fx.ledger.insert_action_for(B, row.id),
        Err(Error::ProtocolViolation { .. })
    ));
    assert!(fx.ledger.insert_action_for(A, row.id).is_ok());
}

#[test]
fn test_rollback_of_insert_releases_row() {
    let fx = Fixture::new();
    let row = fx.memory.allocate(vec![1]);
    let id = fx
        .ledger
        .create_insert_action(A, Timestamp(3), fx.table, fx.store.clone(), row.id)
        .unwrap();

    let outcome = fx.ledger.rollback_action(id, A, Timestamp(3)).unwrap();
    assert_eq!(outcome.undone, ActionType::Insert);
    assert!(outcome.apply_to_store);
    assert_eq!(fx.ledger.action_state(id), Some(ActionState::RolledBack));

    // повторный откат того же действия ничего не делает
    assert!(fx.ledger.rollback_action(id, A, Timestamp(3)).is_none());

    fx.ledger.release_rolled_back(id);
    assert!(!fx.ledger.contains_action(id));
    assert!(fx.ledger.row_slot(row.id).is_none());
}

#[test]
fn test_reclaim_only_terminal_actions() {
    let fx = Fixture::new();
    let row = fx.memory.allocate(vec![1]);
    let id = fx
        .ledger
        .create_insert_action(A, Timestamp(3), fx.table, fx.store.clone(), row.id)
        .unwrap();

    assert_eq!(fx.ledger.reclaim(&[id]), 0);

    fx.ledger.commit(id, A, Timestamp(4));
    assert_eq!(fx.ledger.reclaim(&[id]), 0);

    fx.ledger.merge_transaction(&[id], 0, 1, Timestamp(4));
    assert_eq!(fx.ledger.reclaim(&[id]), 1);
    assert_eq!(fx.ledger.action_count(), 0);
}

#[test]
fn test_partial_merge_keeps_later_commits() {
    let fx = Fixture::new();
    let row = fx.memory.allocate(vec![1]);
    let id = fx
        .ledger
        .create_insert_action(A, Timestamp(3), fx.table, fx.store.clone(), row.id)
        .unwrap();
    fx.ledger.commit(id, A, Timestamp(4));

    fx.ledger.merge_transaction(&[id], 0, 1, Timestamp(2));
    assert_eq!(fx.ledger.pending_action(row.id), Some(id));
    assert!(!fx.ledger.can_read(B, row.id, Timestamp(4), ReadMode::Read));
    assert!(fx.ledger.can_read(B, row.id, Timestamp(5), ReadMode::Read));
}

#[test]
fn test_temp_rows_always_readable() {
    let fx = Fixture::with_table(TableRef::temp(TableId(30), PersistenceScope::Session));
    let row = fx.memory.allocate(vec![1]);
    fx.ledger
        .create_insert_action(A, Timestamp(3), fx.table, fx.store.clone(), row.id)
        .unwrap();

    assert!(fx.ledger.can_read(B, row.id, Timestamp(1), ReadMode::Read));
}

#[test]
fn test_rows_without_actions_are_readable() {
    let fx = Fixture::new();
    let unknown = RowId::new(TableId(20), 999);
    assert!(fx.ledger.can_read(A, unknown, Timestamp(1), ReadMode::Read));
    assert!(fx.ledger.pending_action(unknown).is_none());
}
