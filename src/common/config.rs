//! Конфигурация ядра транзакций rustdb
//!
//! Предоставляет структуры конфигурации менеджера транзакций и логирования

use crate::common::error::{Error, Result};
use crate::common::types::{IsolationLevel, TransactionModel};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Конфигурация менеджера транзакций
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Протокол управления конкурентностью
    pub transaction_model: TransactionModel,
    /// Уровень изоляции новых сессий
    pub default_isolation_level: IsolationLevel,
    /// Таймаут ожидания табличных блокировок (в миллисекундах)
    pub lock_timeout_ms: u64,
    /// Сколько раз повторять действие при активном барьере
    pub max_redo_attempts: u32,
    /// Максимальное количество одновременных транзакций
    pub max_concurrent_transactions: usize,
    /// Длина очереди зафиксированных транзакций, после которой пишется предупреждение
    pub committed_queue_warning: usize,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            transaction_model: TransactionModel::MvLocks,
            default_isolation_level: IsolationLevel::ReadCommitted,
            lock_timeout_ms: 30000, // 30 секунд
            max_redo_attempts: 16,
            max_concurrent_transactions: 1000,
            committed_queue_warning: 64,
        }
    }
}

/// Конфигурация логирования
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Уровень логирования (фильтр в формате EnvFilter)
    pub level: String,
    /// Выводить логи в формате с целями модулей
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            with_target: false,
        }
    }
}

/// Полный файл настроек: секции `[transaction]` и `[logging]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub transaction: TransactionConfig,
    pub logging: LoggingConfig,
}

impl TransactionConfig {
    /// Таймаут ожидания блокировок
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Загружает конфигурацию из переменных окружения
    pub fn from_env() -> Result<Self> {
        let mut config = TransactionConfig::default();

        if let Ok(model) = std::env::var("RUSTDB_TXN_MODEL") {
            config.transaction_model = parse_model(&model)?;
        }

        if let Ok(timeout) = std::env::var("RUSTDB_TXN_LOCK_TIMEOUT_MS") {
            config.lock_timeout_ms = timeout
                .parse()
                .map_err(|_| Error::configuration(format!("Invalid lock timeout: {}", timeout)))?;
        }

        if let Ok(attempts) = std::env::var("RUSTDB_TXN_MAX_REDO") {
            config.max_redo_attempts = attempts
                .parse()
                .map_err(|_| Error::configuration(format!("Invalid redo limit: {}", attempts)))?;
        }

        if let Ok(max) = std::env::var("RUSTDB_TXN_MAX_TRANSACTIONS") {
            config.max_concurrent_transactions = max.parse().map_err(|_| {
                Error::configuration(format!("Invalid transaction limit: {}", max))
            })?;
        }

        Ok(config)
    }

    /// Объединяет конфигурацию с другой
    pub fn merge(mut self, other: Self) -> Self {
        let defaults = Self::default();

        if other.transaction_model != defaults.transaction_model {
            self.transaction_model = other.transaction_model;
        }
        if other.default_isolation_level != defaults.default_isolation_level {
            self.default_isolation_level = other.default_isolation_level;
        }
        if other.lock_timeout_ms != defaults.lock_timeout_ms {
            self.lock_timeout_ms = other.lock_timeout_ms;
        }
        if other.max_redo_attempts != defaults.max_redo_attempts {
            self.max_redo_attempts = other.max_redo_attempts;
        }
        if other.max_concurrent_transactions != defaults.max_concurrent_transactions {
            self.max_concurrent_transactions = other.max_concurrent_transactions;
        }
        if other.committed_queue_warning != defaults.committed_queue_warning {
            self.committed_queue_warning = other.committed_queue_warning;
        }

        self
    }

    /// Валидирует конфигурацию
    pub fn validate(&self) -> Result<()> {
        if self.transaction_model == TransactionModel::Mvcc {
            return Err(Error::configuration(
                "MVCC model requires row-level conflict handling; use LOCKS or MVLOCKS",
            ));
        }

        if self.max_concurrent_transactions == 0 {
            return Err(Error::configuration(
                "Max concurrent transactions must be greater than 0",
            ));
        }

        if self.max_redo_attempts == 0 {
            return Err(Error::configuration("Max redo attempts must be greater than 0"));
        }

        if self.lock_timeout_ms == 0 {
            return Err(Error::configuration("Lock timeout must be greater than 0"));
        }

        Ok(())
    }
}

impl EngineConfig {
    /// Загружает конфигурацию из TOML файла
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Сохраняет конфигурацию в TOML файл
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Валидирует конфигурацию
    pub fn validate(&self) -> Result<()> {
        self.transaction.validate()
    }
}

fn parse_model(value: &str) -> Result<TransactionModel> {
    match value.to_ascii_uppercase().as_str() {
        "LOCKS" => Ok(TransactionModel::Locks),
        "MVLOCKS" => Ok(TransactionModel::MvLocks),
        "MVCC" => Ok(TransactionModel::Mvcc),
        other => Err(Error::configuration(format!(
            "Unknown transaction model: {}",
            other
        ))),
    }
}
