//! Тесты для модулей ядра rustdb

pub mod ledger_tests;
pub mod savepoint_tests;
