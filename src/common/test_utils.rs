//! Общие утилиты для тестирования

use crate::common::{IsolationLevel, PersistenceScope, TableId, TableRef, TransactionConfig};
use crate::core::{MemoryStore, PersistentStore, Row, Session, TransactionManager};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Включает вывод журнала в тестах (`RUST_LOG=debug cargo test`)
pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Генератор тестовых данных
#[derive(Debug, Default)]
pub struct TestDataGenerator {
    counter: AtomicU64,
}

impl TestDataGenerator {
    /// Создаёт новый генератор
    pub fn new() -> Self {
        Self::default()
    }

    /// Генерирует уникальный ID
    pub fn next_id(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Генерирует содержимое строки таблицы
    pub fn row_payload(&self) -> Vec<u8> {
        self.next_id().to_le_bytes().to_vec()
    }
}

/// Таблица с хранилищем в памяти
#[derive(Debug, Clone)]
pub struct TestTable {
    pub table: TableRef,
    pub memory: Arc<MemoryStore>,
    pub store: Arc<dyn PersistentStore>,
}

impl TestTable {
    pub fn persistent(id: u32) -> Self {
        Self::with_ref(TableRef::persistent(TableId(id)))
    }

    pub fn temp(id: u32, scope: PersistenceScope) -> Self {
        Self::with_ref(TableRef::temp(TableId(id), scope))
    }

    fn with_ref(table: TableRef) -> Self {
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

    /// Вставляет строку в транзакции сессии
    pub fn insert(&self, tm: &TransactionManager, session: &mut Session, data: &[u8]) -> Row {
        let row = self.memory.allocate(data.to_vec());
        tm.insert_row(session, self.table, &self.store, &row)
            .expect("insert row");
        row
    }

    /// Удаляет строку в транзакции сессии
    pub fn delete(&self, tm: &TransactionManager, session: &mut Session, row: &Row) {
        tm.add_delete_action(session, self.table, &self.store, row, None)
            .expect("delete row");
    }

    /// Вставляет и сразу фиксирует строку отдельной сессией
    pub fn insert_committed(&self, tm: &TransactionManager, data: &[u8]) -> Row {
        let mut session = tm.create_session();
        tm.begin_transaction(&mut session).expect("begin");
        let row = self.insert(tm, &mut session, data);
        assert!(tm.commit_transaction(&mut session).expect("commit"));
        tm.close_session(&mut session).expect("close");
        row
    }
}

/// Менеджер в модели MVLOCKS с коротким таймаутом ожидания
pub fn test_manager() -> TransactionManager {
    init_test_logging();
    let config = TransactionConfig {
        lock_timeout_ms: 2_000,
        ..TransactionConfig::default()
    };
    TransactionManager::with_config(config).expect("valid config")
}

/// Сессия в транзакции с заданным уровнем изоляции
pub fn begin_session(tm: &TransactionManager, level: IsolationLevel) -> Session {
    let mut session = tm.create_session();
    tm.set_isolation_level(&mut session, level)
        .expect("isolation level");
    tm.begin_transaction(&mut session).expect("begin");
    session
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_generator() {
        let generator = TestDataGenerator::new();
        assert_eq!(generator.next_id(), 1);
        assert_eq!(generator.next_id(), 2);
        assert_eq!(generator.row_payload().len(), 8);
    }

    #[test]
    fn test_insert_committed_is_visible() {
        let tm = test_manager();
        let table = TestTable::persistent(20);
        let row = table.insert_committed(&tm, b"abc");

        let session = tm.create_session();
        assert!(tm.can_read(&session, row.id, crate::core::ReadMode::Read));
        assert!(table.memory.is_indexed(row.id.position));
    }
}
