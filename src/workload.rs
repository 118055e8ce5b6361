//! Нагрузочный сценарий для менеджера транзакций
//!
//! Несколько сессий в отдельных потоках выполняют случайные вставки, удаления
//! и обновления строк в наборе таблиц, хранящихся в памяти.

use crate::common::{Error, IsolationLevel, Result, RowId, TableId, TableRef};
use crate::core::{
    MemoryStore, PersistentStore, ReadMode, Session, Statement, TransactionManager,
    TransactionManagerStats,
};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn};

/// Параметры нагрузки
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadConfig {
    pub sessions: usize,
    pub transactions_per_session: usize,
    pub operations_per_transaction: usize,
    pub tables: usize,
    pub isolation_level: IsolationLevel,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            sessions: 4,
            transactions_per_session: 100,
            operations_per_transaction: 4,
            tables: 2,
            isolation_level: IsolationLevel::ReadCommitted,
        }
    }
}

/// Итоги прогона
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkloadReport {
    pub committed: u64,
    pub aborted: u64,
    pub inserted: u64,
    pub deleted: u64,
    pub visible_rows: usize,
    pub elapsed_ms: u128,
}

#[derive(Debug, Default)]
struct Counters {
    committed: AtomicU64,
    aborted: AtomicU64,
    inserted: AtomicU64,
    deleted: AtomicU64,
}

#[derive(Debug, Clone)]
struct WorkloadTable {
    table: TableRef,
    memory: Arc<MemoryStore>,
    store: Arc<dyn PersistentStore>,
}

impl WorkloadTable {
    fn new(id: TableId) -> Self {
        let memory = Arc::new(MemoryStore::new(id));
        let store: Arc<dyn PersistentStore> = memory.clone();
        Self {
            table: TableRef::persistent(id),
            memory,
            store,
        }
    }
}

/// Запускает нагрузку и возвращает итоги вместе со статистикой менеджера
pub fn run_workload(
    tm: &TransactionManager,
    config: &WorkloadConfig,
) -> Result<(WorkloadReport, TransactionManagerStats)> {
    if config.sessions == 0 || config.tables == 0 {
        return Err(Error::configuration(
            "Workload needs at least one session and one table",
        ));
    }

    let tables: Vec<WorkloadTable> = (0..config.tables)
        .map(|i| WorkloadTable::new(TableId(TableId::FIRST_USER_TABLE + i as u32)))
        .collect();
    let counters = Counters::default();
    let started = Instant::now();

    info!(
        sessions = config.sessions,
        tables = config.tables,
        "Starting workload"
    );

    crossbeam::scope(|scope| {
        for worker in 0..config.sessions {
            let tables = &tables;
            let counters = &counters;
            scope.spawn(move |_| {
                let span = info_span!("worker", worker);
                let _entered = span.enter();
                run_session(tm, config, tables, counters);
            });
        }
    })
    .map_err(|_| Error::internal("Workload worker panicked"))?;

    let mut observer = tm.create_session();
    let visible_rows: usize = tables
        .iter()
        .map(|t| {
            t.memory
                .indexed_positions()
                .into_iter()
                .filter(|pos| {
                    tm.can_read(
                        &observer,
                        RowId::new(t.table.id, *pos),
                        ReadMode::Read,
                    )
                })
                .count()
        })
        .sum();
    tm.close_session(&mut observer)?;

    let report = WorkloadReport {
        committed: counters.committed.load(Ordering::SeqCst),
        aborted: counters.aborted.load(Ordering::SeqCst),
        inserted: counters.inserted.load(Ordering::SeqCst),
        deleted: counters.deleted.load(Ordering::SeqCst),
        visible_rows,
        elapsed_ms: started.elapsed().as_millis(),
    };
    info!(
        committed = report.committed,
        aborted = report.aborted,
        "Workload finished"
    );
    Ok((report, tm.get_statistics()))
}

fn run_session(
    tm: &TransactionManager,
    config: &WorkloadConfig,
    tables: &[WorkloadTable],
    counters: &Counters,
) {
    let mut session = tm.create_session();
    if let Err(e) = tm.set_isolation_level(&mut session, config.isolation_level) {
        warn!("Cannot set isolation level: {}", e);
    }

    for _ in 0..config.transactions_per_session {
        match run_transaction(tm, config, tables, &mut session, counters) {
            Ok(true) => {
                counters.committed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(false) => {
                counters.aborted.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = tm.rollback(&mut session) {
                    warn!("Rollback of {} failed: {}", session.id(), e);
                }
            }
            Err(e) => {
                debug!("Transaction of {} failed: {}", session.id(), e);
                counters.aborted.fetch_add(1, Ordering::Relaxed);
                if session.is_transaction() {
                    if let Err(e) = tm.rollback(&mut session) {
                        warn!("Rollback of {} failed: {}", session.id(), e);
                    }
                }
            }
        }
    }

    if let Err(e) = tm.close_session(&mut session) {
        warn!("Closing {} failed: {}", session.id(), e);
    }
}

fn run_transaction(
    tm: &TransactionManager,
    config: &WorkloadConfig,
    tables: &[WorkloadTable],
    session: &mut Session,
    counters: &Counters,
) -> Result<bool> {
    for _ in 0..config.operations_per_transaction {
        let table = &tables[rand::random_range(0..tables.len())];
        let statement = Statement::update(&[table.table.id]);
        let operation = rand::random_range(0..3u8);

        tm.execute(session, statement, |tm, session| match operation {
            0 => insert(tm, session, table, counters),
            1 => delete(tm, session, table, counters),
            _ => {
                if delete(tm, session, table, counters)? {
                    insert(tm, session, table, counters)?;
                }
                Ok(true)
            }
        })?;

        // короткая пауза, чтобы транзакции пересекались
        std::thread::sleep(Duration::from_micros(rand::random_range(0..200)));
    }
    tm.commit_transaction(session)
}

fn insert(
    tm: &TransactionManager,
    session: &mut Session,
    table: &WorkloadTable,
    counters: &Counters,
) -> Result<bool> {
    let payload = rand::random_range(0..u64::MAX).to_le_bytes().to_vec();
    let row = table.memory.allocate(payload);
    tm.insert_row(session, table.table, &table.store, &row)?;
    counters.inserted.fetch_add(1, Ordering::Relaxed);
    Ok(true)
}

fn delete(
    tm: &TransactionManager,
    session: &mut Session,
    table: &WorkloadTable,
    counters: &Counters,
) -> Result<bool> {
    let candidates: Vec<u64> = table
        .memory
        .indexed_positions()
        .into_iter()
        .filter(|pos| {
            tm.can_read(
                session,
                RowId::new(table.table.id, *pos),
                ReadMode::Read,
            )
        })
        .collect();
    if candidates.is_empty() {
        return Ok(false);
    }

    let position = candidates[rand::random_range(0..candidates.len())];
    let Some(row) = table.store.get(position, false)? else {
        return Ok(false);
    };
    tm.add_delete_action(session, table.table, &table.store, &row, None)?;
    counters.deleted.fetch_add(1, Ordering::Relaxed);
    Ok(true)
}
