//! Общие типы и утилиты для rustdb

pub mod config;
pub mod error;
pub mod types;

#[cfg(test)]
pub mod test_utils;

pub use config::*;
pub use error::{Error, Result};
pub use types::*;
