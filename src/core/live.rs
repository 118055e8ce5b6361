//! Реестр живых транзакций
//!
//! Хранит метки начала всех открытых транзакций в порядке их начала.
//! Минимальная метка — самая старая точка, которую еще может видеть читатель.

use crate::common::Timestamp;
use std::collections::VecDeque;

/// Упорядоченный реестр меток начала открытых транзакций
#[derive(Debug, Default)]
pub struct LiveTransactions {
    timestamps: VecDeque<Timestamp>,
}

impl LiveTransactions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Регистрирует начало транзакции.
    ///
    /// Метки выдаются под транзакционной блокировкой, поэтому добавление в конец
    /// сохраняет сортировку по возрастанию.
    pub fn begin(&mut self, timestamp: Timestamp) {
        debug_assert!(
            self.timestamps.back().map_or(true, |last| *last < timestamp),
            "live transaction timestamps must be appended in ascending order"
        );
        self.timestamps.push_back(timestamp);
    }

    /// Удаляет метку конкретной транзакции (не обязательно из головы).
    /// Возвращает `false`, если транзакция уже была удалена.
    pub fn remove(&mut self, timestamp: Timestamp) -> bool {
        match self.timestamps.iter().position(|ts| *ts == timestamp) {
            Some(index) => {
                self.timestamps.remove(index);
                true
            }
            None => false,
        }
    }

    /// Метка самой старой живой транзакции или `Timestamp::INFINITE`
    pub fn first(&self) -> Timestamp {
        self.timestamps
            .front()
            .copied()
            .unwrap_or(Timestamp::INFINITE)
    }

    pub fn contains(&self, timestamp: Timestamp) -> bool {
        self.timestamps.contains(&timestamp)
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}
