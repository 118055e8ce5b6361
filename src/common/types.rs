//! Базовые типы ядра транзакций rustdb

use serde::{Deserialize, Serialize};
use std::fmt;

/// Логическая метка времени (глобальный монотонный счетчик)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Нулевая метка: "еще не назначена"
    pub const ZERO: Timestamp = Timestamp(0);
    /// Бесконечность: нет ни одной живой транзакции
    pub const INFINITE: Timestamp = Timestamp(u64::MAX);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn is_infinite(&self) -> bool {
        *self == Self::INFINITE
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_infinite() {
            write!(f, "TS∞")
        } else {
            write!(f, "TS{}", self.0)
        }
    }
}

/// Идентификатор сессии
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl SessionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

/// Идентификатор таблицы
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableId(pub u32);

impl TableId {
    /// Псевдо-таблица каталога: на ней держатся блокировки DDL и read-only сессий
    pub const CATALOG: TableId = TableId(0);
    /// Граница системной схемы: таблицы с меньшим номером не блокируются
    pub const FIRST_USER_TABLE: u32 = 16;

    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Таблицы системной схемы не участвуют в табличных блокировках
    pub fn is_system(&self) -> bool {
        *self != Self::CATALOG && self.0 < Self::FIRST_USER_TABLE
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::CATALOG {
            write!(f, "CATALOG")
        } else {
            write!(f, "T{}", self.0)
        }
    }
}

/// Идентичность строки: таблица и позиция в хранилище
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowId {
    pub table: TableId,
    pub position: u64,
}

impl RowId {
    pub fn new(table: TableId, position: u64) -> Self {
        Self { table, position }
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Row({}:{})", self.table.0, self.position)
    }
}

/// Стабильный идентификатор действия в арене журнала
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionId(pub u64);

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "A{}", self.0)
    }
}

/// Тип таблицы
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableType {
    /// Обычная (долговечная) таблица
    Persistent,
    /// Временная таблица, не попадающая в журнал
    Temp,
}

/// Область жизни данных таблицы
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PersistenceScope {
    /// Данные живут до удаления
    Full,
    /// Данные живут до конца сессии
    Session,
    /// Данные живут до конца транзакции
    Transaction,
    /// Данные живут до конца вызова процедуры
    Routine,
}

/// Описание таблицы, достаточное для ядра транзакций
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableRef {
    pub id: TableId,
    pub table_type: TableType,
    pub persistence_scope: PersistenceScope,
}

impl TableRef {
    /// Обычная таблица
    pub fn persistent(id: TableId) -> Self {
        Self {
            id,
            table_type: TableType::Persistent,
            persistence_scope: PersistenceScope::Full,
        }
    }

    /// Временная таблица с заданной областью жизни
    pub fn temp(id: TableId, scope: PersistenceScope) -> Self {
        Self {
            id,
            table_type: TableType::Temp,
            persistence_scope: scope,
        }
    }

    pub fn is_temp(&self) -> bool {
        self.table_type == TableType::Temp
    }

    pub fn is_routine_scoped(&self) -> bool {
        self.persistence_scope == PersistenceScope::Routine
    }
}

/// Уровень изоляции транзакции
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IsolationLevel {
    /// Чтение незафиксированных данных
    ReadUncommitted,
    /// Чтение зафиксированных данных
    ReadCommitted,
    /// Повторяемое чтение
    RepeatableRead,
    /// Сериализуемость
    Serializable,
}

impl IsolationLevel {
    /// Держит ли уровень читающие блокировки до конца транзакции
    pub fn holds_read_locks(&self) -> bool {
        matches!(self, Self::RepeatableRead | Self::Serializable)
    }
}

/// Протокол управления конкурентностью, выбираемый при настройке движка
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionModel {
    /// Классическое двухфазное блокирование без версий строк
    Locks,
    /// Версии строк + табличные блокировки писателей (MV2PL)
    MvLocks,
    /// Полный MVCC с построчными конфликтами
    Mvcc,
}

impl TransactionModel {
    /// Видят ли читатели версии строк
    pub fn is_mv_rows(&self) -> bool {
        !matches!(self, Self::Locks)
    }
}

impl fmt::Display for TransactionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Locks => "LOCKS",
            Self::MvLocks => "MVLOCKS",
            Self::Mvcc => "MVCC",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_ordering() {
        assert!(Timestamp::new(1) < Timestamp::new(2));
        assert!(Timestamp::new(u64::MAX - 1) < Timestamp::INFINITE);
        assert_eq!(Timestamp::INFINITE.to_string(), "TS∞");
        assert_eq!(Timestamp::new(7).to_string(), "TS7");
    }

    #[test]
    fn test_system_tables() {
        assert!(!TableId::CATALOG.is_system());
        assert!(TableId::new(3).is_system());
        assert!(!TableId::new(TableId::FIRST_USER_TABLE).is_system());
    }

    #[test]
    fn test_table_ref() {
        let table = TableRef::temp(TableId::new(20), PersistenceScope::Routine);
        assert!(table.is_temp());
        assert!(table.is_routine_scoped());

        let table = TableRef::persistent(TableId::new(21));
        assert!(!table.is_temp());
        assert!(!table.is_routine_scoped());
    }

    #[test]
    fn test_isolation_read_locks() {
        assert!(!IsolationLevel::ReadCommitted.holds_read_locks());
        assert!(IsolationLevel::Serializable.holds_read_locks());
    }
}
