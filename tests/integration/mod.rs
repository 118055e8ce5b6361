//! Интеграционные тесты для rustdb-txn
//!
//! Этот модуль содержит сценарии, которые проверяют работу менеджера
//! транзакций через публичный интерфейс крейта.

pub mod common;
pub mod stress_tests;
pub mod transaction_tests;

// Re-export common utilities
pub use common::*;
