//! Интеграционные тесты транзакций
//!
//! Сценарии проходят через публичный интерфейс менеджера: сессии, операторы,
//! фиксацию, откат и точки сохранения.

use super::common::*;
use rustdb_txn::common::{Error, IsolationLevel, Result, TransactionModel};
use rustdb_txn::core::{LogRecordType, MemoryTransactionLog, Statement};
use std::sync::Arc;

/// Читатель REPEATABLE READ видит снимок на момент начала транзакции
pub fn test_repeatable_read_snapshot() -> Result<()> {
    let tm = manager(TransactionModel::MvLocks)?;
    let table = IntegrationTable::new(20);

    let mut setup = open_session(&tm, IsolationLevel::ReadCommitted)?;
    let rows: Vec<_> = (0..3u8)
        .map(|i| table.insert(&tm, &mut setup, &[i]))
        .collect::<Result<_>>()?;
    assert!(tm.commit_transaction(&mut setup)?);

    let mut reader = open_session(&tm, IsolationLevel::RepeatableRead)?;
    assert_eq!(table.visible_rows(&tm, &reader), 3);

    let mut writer = open_session(&tm, IsolationLevel::ReadCommitted)?;
    table.delete(&tm, &mut writer, &rows[0])?;
    table.insert(&tm, &mut writer, b"late")?;
    assert!(tm.commit_transaction(&mut writer)?);
    assert_eq!(tm.committed_queue_len(), 1);

    // снимок читателя не меняется и в следующем операторе
    let visible = tm.execute(&mut reader, Statement::query(&[table.id()]), |tm, s| {
        Ok(table.visible_rows(tm, s))
    })?;
    assert_eq!(visible, 3);

    assert!(tm.commit_transaction(&mut reader)?);
    assert_eq!(tm.committed_queue_len(), 0);
    assert!(!table.memory.contains(rows[0].id.position));

    let observer = tm.create_session();
    assert_eq!(table.visible_rows(&tm, &observer), 3);
    assert_eq!(tm.ledger().action_count(), 0);
    Ok(())
}

/// Обновление как удаление и вставка; откат возвращает старую версию
pub fn test_update_and_rollback() -> Result<()> {
    let tm = manager(TransactionModel::MvLocks)?;
    let table = IntegrationTable::new(20);

    let mut setup = open_session(&tm, IsolationLevel::ReadCommitted)?;
    let original = table.insert(&tm, &mut setup, b"v1")?;
    tm.commit_transaction(&mut setup)?;

    let mut session = open_session(&tm, IsolationLevel::ReadCommitted)?;
    tm.add_delete_action(&mut session, table.table, &table.store, &original, Some(&[1]))?;
    let updated = table.insert(&tm, &mut session, b"v2")?;
    assert_eq!(table.visible_rows(&tm, &session), 1);
    assert_eq!(table.visible_rows(&tm, &setup), 1);

    tm.rollback(&mut session)?;
    assert!(!table.memory.contains(updated.id.position));
    assert!(table.memory.is_indexed(original.id.position));
    assert_eq!(table.visible_rows(&tm, &session), 1);
    Ok(())
}

/// Точки сохранения через публичный интерфейс
pub fn test_savepoint_workflow() -> Result<()> {
    let tm = manager(TransactionModel::MvLocks)?;
    let table = IntegrationTable::new(20);
    let mut session = tm.create_session();
    let statement = Statement::update(&[table.id()]);

    tm.execute(&mut session, statement.clone(), |tm, s| {
        table.insert(tm, s, b"before")
    })?;
    tm.savepoint(&mut session, "checkpoint")?;
    tm.execute(&mut session, statement, |tm, s| table.insert(tm, s, b"after"))?;
    assert_eq!(table.memory.len(), 2);

    tm.rollback_to_savepoint(&mut session, "checkpoint")?;
    assert_eq!(table.memory.len(), 1);
    tm.release_savepoint(&mut session, "checkpoint")?;
    assert!(matches!(
        tm.rollback_to_savepoint(&mut session, "checkpoint"),
        Err(Error::Transaction { .. })
    ));

    assert!(tm.commit_transaction(&mut session)?);
    tm.close_session(&mut session)?;
    assert_eq!(table.memory.indexed_positions().len(), 1);
    Ok(())
}

/// Классическое блокирование без версий строк
pub fn test_locks_model_cycle() -> Result<()> {
    let tm = manager(TransactionModel::Locks)?;
    let table = IntegrationTable::new(20);

    let mut session = open_session(&tm, IsolationLevel::Serializable)?;
    let row = table.insert(&tm, &mut session, b"row")?;
    tm.commit_transaction(&mut session)?;

    tm.begin_transaction(&mut session)?;
    table.delete(&tm, &mut session, &row)?;
    assert!(!table.memory.is_indexed(row.id.position));
    assert!(tm.commit_transaction(&mut session)?);
    assert!(!table.memory.contains(row.id.position));
    Ok(())
}

/// Журнал получает записи о фиксациях и откатах
pub fn test_transaction_log() -> Result<()> {
    let log = Arc::new(MemoryTransactionLog::new());
    let mut tm = manager(TransactionModel::MvLocks)?;
    tm.set_log(log.clone());
    let table = IntegrationTable::new(20);

    for commit in [true, false, true] {
        let mut session = open_session(&tm, IsolationLevel::ReadCommitted)?;
        table.insert(&tm, &mut session, b"logged")?;
        if commit {
            tm.commit_transaction(&mut session)?;
        } else {
            tm.rollback(&mut session)?;
        }
        tm.close_session(&mut session)?;
    }

    assert_eq!(log.records_of(LogRecordType::TransactionCommit).len(), 2);
    assert_eq!(log.records_of(LogRecordType::TransactionAbort).len(), 1);

    let records = log.records();
    assert!(records
        .windows(2)
        .all(|pair| pair[0].timestamp < pair[1].timestamp));
    Ok(())
}
