//! Контракт хранилища строк и его реализация в памяти
//!
//! Ядро транзакций не знает формата строк; ему нужны только операции индексации,
//! удаления и отката строки. Хранилище обязано вернуть `None` для строки,
//! страница которой уже вытеснена; ядро считает такую строку финализированной.

use crate::common::{Error, Result, RowId, SessionId, TableId, TransactionModel};
use crate::core::row_action::ActionType;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Строка, возвращаемая хранилищем
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub id: RowId,
    pub data: Vec<u8>,
}

/// Хранилище строк одной таблицы
pub trait PersistentStore: Send + Sync + fmt::Debug {
    /// Таблица, строки которой хранятся
    fn table(&self) -> TableId;

    /// Строка по позиции; `include_deleted` возвращает и удаленные из индексов
    fn get(&self, position: u64, include_deleted: bool) -> Result<Option<Row>>;

    /// Включает строку в индексы
    fn index_row(&self, session: SessionId, row: &Row) -> Result<()>;

    /// Исключает строку из индексов
    fn delete(&self, session: SessionId, row: &Row) -> Result<()>;

    /// Физически освобождает место строки
    fn remove(&self, row: &Row) -> Result<()>;

    /// Отменяет действие над строкой; `action` — результат слияния отката
    fn rollback_row(
        &self,
        session: SessionId,
        row: &Row,
        action: ActionType,
        model: TransactionModel,
    ) -> Result<()>;
}

#[derive(Debug, Clone)]
struct StoredRow {
    data: Vec<u8>,
    indexed: bool,
    deleted: bool,
}

/// Хранилище строк в памяти.
///
/// Поддерживает имитацию вытеснения страниц и ошибок ввода-вывода
/// для проверки устойчивости журнала действий.
#[derive(Debug)]
pub struct MemoryStore {
    table: TableId,
    rows: DashMap<u64, StoredRow>,
    next_position: AtomicU64,
    evicted: Mutex<HashSet<u64>>,
    failing: Mutex<HashSet<u64>>,
}

impl MemoryStore {
    pub fn new(table: TableId) -> Self {
        Self {
            table,
            rows: DashMap::new(),
            next_position: AtomicU64::new(1),
            evicted: Mutex::new(HashSet::new()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    /// Размещает новую строку; в индексы она попадает через `index_row`
    pub fn allocate(&self, data: Vec<u8>) -> Row {
        let position = self.next_position.fetch_add(1, Ordering::SeqCst);
        self.rows.insert(
            position,
            StoredRow {
                data: data.clone(),
                indexed: false,
                deleted: false,
            },
        );
        Row {
            id: RowId::new(self.table, position),
            data,
        }
    }

    /// Позиции строк, находящихся в индексах
    pub fn indexed_positions(&self) -> Vec<u64> {
        let mut positions: Vec<u64> = self
            .rows
            .iter()
            .filter(|entry| entry.indexed && !entry.deleted)
            .map(|entry| *entry.key())
            .collect();
        positions.sort_unstable();
        positions
    }

    /// Есть ли место строки в хранилище (в том числе удаленной из индексов)
    pub fn contains(&self, position: u64) -> bool {
        self.rows.contains_key(&position)
    }

    pub fn is_indexed(&self, position: u64) -> bool {
        self.rows
            .get(&position)
            .map(|row| row.indexed && !row.deleted)
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Имитирует вытеснение страницы: `get` начнет возвращать `None`
    pub fn evict(&self, position: u64) {
        self.evicted.lock().insert(position);
    }

    /// Имитирует ошибку ввода-вывода при изменении строки
    pub fn fail_on(&self, position: u64) {
        self.failing.lock().insert(position);
    }

    /// Снимает имитацию ошибки ввода-вывода
    pub fn recover(&self, position: u64) {
        self.failing.lock().remove(&position);
    }

    fn check_io(&self, position: u64) -> Result<()> {
        if self.failing.lock().contains(&position) {
            return Err(Error::storage(format!(
                "data file write failed for row {} of table {}",
                position, self.table
            )));
        }
        Ok(())
    }

    fn with_row<F>(&self, row: &Row, f: F) -> Result<()>
    where
        F: FnOnce(&mut StoredRow),
    {
        self.check_io(row.id.position)?;
        match self.rows.get_mut(&row.id.position) {
            Some(mut stored) => {
                f(&mut stored);
                Ok(())
            }
            None => Err(Error::storage(format!("{} is not in the store", row.id))),
        }
    }
}

impl PersistentStore for MemoryStore {
    fn table(&self) -> TableId {
        self.table
    }

    fn get(&self, position: u64, include_deleted: bool) -> Result<Option<Row>> {
        if self.evicted.lock().contains(&position) {
            return Ok(None);
        }
        Ok(self.rows.get(&position).and_then(|stored| {
            if stored.deleted && !include_deleted {
                None
            } else {
                Some(Row {
                    id: RowId::new(self.table, position),
                    data: stored.data.clone(),
                })
            }
        }))
    }

    fn index_row(&self, _session: SessionId, row: &Row) -> Result<()> {
        self.with_row(row, |stored| {
            stored.indexed = true;
            stored.deleted = false;
        })
    }

    fn delete(&self, _session: SessionId, row: &Row) -> Result<()> {
        self.with_row(row, |stored| {
            stored.indexed = false;
            stored.deleted = true;
        })
    }

    fn remove(&self, row: &Row) -> Result<()> {
        self.check_io(row.id.position)?;
        self.rows.remove(&row.id.position);
        Ok(())
    }

    fn rollback_row(
        &self,
        session: SessionId,
        row: &Row,
        action: ActionType,
        model: TransactionModel,
    ) -> Result<()> {
        match action {
            ActionType::Delete => {
                // удаление уже исключило строку из индексов: без версий строк
                // или во временной таблице
                let applied = self
                    .rows
                    .get(&row.id.position)
                    .map(|stored| stored.deleted)
                    .unwrap_or(false);
                if model == TransactionModel::Locks || applied {
                    self.index_row(session, row)?;
                }
            }
            ActionType::Insert => {
                self.delete(session, row)?;
                self.remove(row)?;
            }
            ActionType::InsertDelete => {
                if model == TransactionModel::Locks {
                    self.remove(row)?;
                } else {
                    self.delete(session, row)?;
                    self.remove(row)?;
                }
            }
            ActionType::None | ActionType::DeleteFinal => {}
        }
        Ok(())
    }
}
