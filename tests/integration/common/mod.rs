//! Общие утилиты для интеграционных тестов

use rustdb_txn::common::{
    IsolationLevel, Result, TableId, TableRef, TransactionConfig, TransactionModel,
};
use rustdb_txn::core::{MemoryStore, PersistentStore, Row, Session, TransactionManager};
use std::sync::Arc;

/// Таблица интеграционного теста с хранилищем в памяти
#[derive(Debug, Clone)]
pub struct IntegrationTable {
    pub table: TableRef,
    pub memory: Arc<MemoryStore>,
    pub store: Arc<dyn PersistentStore>,
}

impl IntegrationTable {
    pub fn new(id: u32) -> Self {
        let table = TableRef::persistent(TableId(id));
        let memory = Arc::new(MemoryStore::new(table.id));
        let store: Arc<dyn PersistentStore> = memory.clone();
        Self {
            table,
            memory,
            store,
        }
    }

    pub fn id(&self) -> TableId {
        self.table.id
    }

    /// Вставляет строку в текущей транзакции сессии
    pub fn insert(&self, tm: &TransactionManager, session: &mut Session, data: &[u8]) -> Result<Row> {
        let row = self.memory.allocate(data.to_vec());
        tm.insert_row(session, self.table, &self.store, &row)?;
        Ok(row)
    }

    /// Удаляет строку в текущей транзакции сессии
    pub fn delete(&self, tm: &TransactionManager, session: &mut Session, row: &Row) -> Result<()> {
        tm.add_delete_action(session, self.table, &self.store, row, None)?;
        Ok(())
    }

    /// Строки, видимые сессии
    pub fn visible_rows(&self, tm: &TransactionManager, session: &Session) -> usize {
        self.memory
            .indexed_positions()
            .into_iter()
            .filter(|pos| {
                tm.can_read(
                    session,
                    rustdb_txn::RowId::new(self.id(), *pos),
                    rustdb_txn::ReadMode::Read,
                )
            })
            .count()
    }
}

/// Менеджер транзакций для интеграционных тестов
pub fn manager(model: TransactionModel) -> Result<TransactionManager> {
    let _ = env_logger::builder().is_test(true).try_init();
    TransactionManager::with_config(TransactionConfig {
        transaction_model: model,
        lock_timeout_ms: 5_000,
        ..TransactionConfig::default()
    })
}

/// Сессия с открытой транзакцией
pub fn open_session(tm: &TransactionManager, level: IsolationLevel) -> Result<Session> {
    let mut session = tm.create_session();
    tm.set_isolation_level(&mut session, level)?;
    tm.begin_transaction(&mut session)?;
    Ok(session)
}
