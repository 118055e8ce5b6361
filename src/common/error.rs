//! Обработка ошибок для ядра транзакций rustdb

use thiserror::Error;

/// Основной тип ошибки ядра транзакций
#[derive(Error, Debug)]
pub enum Error {
    /// Ошибка I/O операций
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Ошибка сериализации/десериализации
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Ошибка разбора TOML конфигурации
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Ошибка записи TOML конфигурации
    #[error("Configuration write error: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    /// Нарушение протокола вызывающим слоем (внутренняя несогласованность)
    #[error("Protocol violation: {message}")]
    ProtocolViolation { message: String },

    /// Строка уже изменена другой незафиксированной транзакцией
    #[error("Write conflict on {row}: pending change of session {holder}")]
    WriteConflict { row: String, holder: u64 },

    /// Ошибка хранилища строк (файл данных)
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// Ошибка транзакции
    #[error("Transaction error: {message}")]
    Transaction { message: String },

    /// Транзакция отменена и должна быть откачена
    #[error("Transaction aborted: {message}")]
    TransactionAborted { message: String },

    /// Истекло время ожидания табличных блокировок
    #[error("Lock wait timeout: {message}")]
    LockTimeout { message: String },

    /// Ошибка конфигурации
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Неподдерживаемая операция
    #[error("Unsupported operation: {operation}")]
    Unsupported { operation: String },

    /// Внутренняя ошибка
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Тип результата для ядра транзакций
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Создает ошибку нарушения протокола
    pub fn protocol_violation(message: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            message: message.into(),
        }
    }

    /// Создает ошибку конфликта записи
    pub fn write_conflict(row: impl Into<String>, holder: u64) -> Self {
        Self::WriteConflict {
            row: row.into(),
            holder,
        }
    }

    /// Создает ошибку хранилища
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Создает ошибку транзакции
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    /// Создает ошибку отмененной транзакции
    pub fn transaction_aborted(message: impl Into<String>) -> Self {
        Self::TransactionAborted {
            message: message.into(),
        }
    }

    /// Создает ошибку таймаута ожидания блокировки
    pub fn lock_timeout(message: impl Into<String>) -> Self {
        Self::LockTimeout {
            message: message.into(),
        }
    }

    /// Создает ошибку конфигурации
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Создает ошибку неподдерживаемой операции
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    /// Создает внутреннюю ошибку
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Ошибка означает, что сессия должна откатить транзакцию
    pub fn requires_rollback(&self) -> bool {
        matches!(
            self,
            Self::WriteConflict { .. } | Self::TransactionAborted { .. } | Self::LockTimeout { .. }
        )
    }
}
