//! Stress тесты
//!
//! Эти тесты проверяют поведение менеджера транзакций под нагрузкой
//! из нескольких потоков.

use super::common::*;
use rustdb_txn::common::{IsolationLevel, Result, TransactionModel};
use rustdb_txn::workload::{run_workload, WorkloadConfig};

/// Проверяет, что после нагрузки не осталось незавершенного учета
fn check_quiescent(tm: &rustdb_txn::TransactionManager) {
    assert_eq!(tm.live_transaction_count(), 0);
    assert_eq!(tm.committed_queue_len(), 0);
    assert_eq!(tm.ledger().action_count(), 0);
    assert_eq!(tm.ledger().unfinalised_count(), 0);
}

/// Stress тест смешанной нагрузки на одну таблицу
pub fn stress_test_single_table() -> Result<()> {
    let tm = manager(TransactionModel::MvLocks)?;
    let config = WorkloadConfig {
        sessions: 6,
        transactions_per_session: 30,
        operations_per_transaction: 3,
        tables: 1,
        isolation_level: IsolationLevel::ReadCommitted,
    };

    let (report, stats) = run_workload(&tm, &config)?;
    assert_eq!(report.committed + report.aborted, 180);
    assert_eq!(stats.committed_transactions, report.committed);
    check_quiescent(&tm);
    Ok(())
}

/// Stress тест с несколькими таблицами: возможны взаимоблокировки
pub fn stress_test_multiple_tables() -> Result<()> {
    let tm = manager(TransactionModel::MvLocks)?;
    let config = WorkloadConfig {
        sessions: 8,
        transactions_per_session: 25,
        operations_per_transaction: 4,
        tables: 3,
        isolation_level: IsolationLevel::RepeatableRead,
    };

    let (report, stats) = run_workload(&tm, &config)?;
    assert_eq!(report.committed + report.aborted, 200);
    assert!(report.committed > 0);
    assert_eq!(
        stats.total_transactions,
        stats.committed_transactions + stats.rolled_back_transactions
    );
    check_quiescent(&tm);
    Ok(())
}

/// Stress тест модели без версий строк
pub fn stress_test_locks_model() -> Result<()> {
    let tm = manager(TransactionModel::Locks)?;
    let config = WorkloadConfig {
        sessions: 4,
        transactions_per_session: 20,
        operations_per_transaction: 3,
        tables: 2,
        isolation_level: IsolationLevel::Serializable,
    };

    let (report, _) = run_workload(&tm, &config)?;
    assert_eq!(report.committed + report.aborted, 80);
    check_quiescent(&tm);
    Ok(())
}
