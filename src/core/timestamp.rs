//! Источник глобальных меток времени
//!
//! Единый монотонный счетчик задает полный порядок всех границ транзакций и действий.
//! Инкремент атомарный: порядок важен только относительно переходов состояния,
//! выполняемых под транзакционной блокировкой.

use crate::common::Timestamp;
use std::sync::atomic::{AtomicU64, Ordering};

/// Источник меток времени
#[derive(Debug, Default)]
pub struct TimestampSource {
    counter: AtomicU64,
}

impl TimestampSource {
    /// Создает счетчик, начинающий с нуля (первая выданная метка равна 1)
    pub fn new() -> Self {
        Self::starting_at(Timestamp::ZERO)
    }

    /// Создает счетчик с заданным текущим значением
    pub fn starting_at(current: Timestamp) -> Self {
        Self {
            counter: AtomicU64::new(current.value()),
        }
    }

    /// Выдает следующую метку; два вызова никогда не вернут одно значение
    pub fn next(&self) -> Timestamp {
        Timestamp(self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Последняя выданная метка
    pub fn current(&self) -> Timestamp {
        Timestamp(self.counter.load(Ordering::SeqCst))
    }

    /// Переустанавливает счетчик (при открытии базы данных)
    pub fn set(&self, timestamp: Timestamp) {
        self.counter.store(timestamp.value(), Ordering::SeqCst);
    }
}
