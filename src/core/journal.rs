//! Запись транзакционных событий в журнал
//!
//! Менеджер транзакций сообщает журналу о фиксации и откате. Формат и
//! долговечность записи определяет реализация.

use crate::common::{Error, Result, SessionId, Timestamp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Тип записи журнала
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogRecordType {
    /// Подтверждение транзакции
    TransactionCommit,
    /// Отмена транзакции
    TransactionAbort,
}

/// Запись журнала
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub record_type: LogRecordType,
    pub session: SessionId,
    pub timestamp: Timestamp,
    /// Число действий в зафиксированной транзакции
    pub action_count: usize,
}

/// Приемник транзакционных событий
pub trait TransactionLog: Send + Sync + fmt::Debug {
    /// Фиксация транзакции с меткой `commit_timestamp`
    fn write_commit(
        &self,
        session: SessionId,
        commit_timestamp: Timestamp,
        action_count: usize,
    ) -> Result<()>;

    /// Откат транзакции
    fn write_rollback(&self, session: SessionId, timestamp: Timestamp) -> Result<()>;
}

/// Журнал в памяти
#[derive(Debug, Default)]
pub struct MemoryTransactionLog {
    records: Mutex<Vec<LogRecord>>,
    fail_writes: AtomicBool,
}

impl MemoryTransactionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    /// Записи одного типа
    pub fn records_of(&self, record_type: LogRecordType) -> Vec<LogRecord> {
        self.records
            .lock()
            .iter()
            .filter(|record| record.record_type == record_type)
            .cloned()
            .collect()
    }

    /// Имитирует отказ устройства журнала
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Записи в виде JSON-строк
    pub fn to_json_lines(&self) -> Result<String> {
        let mut out = String::new();
        for record in self.records.lock().iter() {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }
        Ok(out)
    }

    fn append(&self, record: LogRecord) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::storage(format!(
                "log write failed for {:?} of {}",
                record.record_type, record.session
            )));
        }
        self.records.lock().push(record);
        Ok(())
    }
}

impl TransactionLog for MemoryTransactionLog {
    fn write_commit(
        &self,
        session: SessionId,
        commit_timestamp: Timestamp,
        action_count: usize,
    ) -> Result<()> {
        self.append(LogRecord {
            record_type: LogRecordType::TransactionCommit,
            session,
            timestamp: commit_timestamp,
            action_count,
        })
    }

    fn write_rollback(&self, session: SessionId, timestamp: Timestamp) -> Result<()> {
        self.append(LogRecord {
            record_type: LogRecordType::TransactionAbort,
            session,
            timestamp,
            action_count: 0,
        })
    }
}
