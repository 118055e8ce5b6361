//! rustdb-txn - ядро управления транзакциями MV2PL для rustdb
//!
//! Модуль предоставляет менеджер транзакций с версиями строк для читателей и
//! двухфазными табличными блокировками для писателей, журнал действий над
//! строками, отложенное слияние зафиксированных изменений и откат к точкам
//! сохранения.

pub mod cli;
pub mod common;
pub mod core;
pub mod workload;

pub use common::error::{Error, Result};
pub use common::types::*;
pub use core::{ReadMode, Session, Statement, TransactionManager};

/// Версия библиотеки
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
