//! Очередь зафиксированных, но еще не слитых транзакций
//!
//! Пакеты действий добавляются в порядке меток фиксации и извлекаются из головы,
//! когда метка фиксации становится меньше метки самой старой живой транзакции.
//! У очереди собственная блокировка, отдельная от транзакционной.

use crate::common::{ActionId, Timestamp};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Пакет действий одной зафиксированной транзакции
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedBatch {
    /// Метка фиксации транзакции
    pub commit_timestamp: Timestamp,
    /// Копия списка действий сессии на момент фиксации
    pub actions: Vec<ActionId>,
}

/// Очередь зафиксированных транзакций
#[derive(Debug, Default)]
pub struct CommittedQueue {
    batches: Mutex<VecDeque<CommittedBatch>>,
}

impl CommittedQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Добавляет пакет в конец очереди, возвращает новую длину очереди
    pub fn push(&self, commit_timestamp: Timestamp, actions: Vec<ActionId>) -> usize {
        let mut batches = self.batches.lock();
        debug_assert!(
            batches
                .back()
                .map_or(true, |last| last.commit_timestamp < commit_timestamp),
            "committed batches must be queued in commit order"
        );
        batches.push_back(CommittedBatch {
            commit_timestamp,
            actions,
        });
        batches.len()
    }

    /// Извлекает голову очереди, если ее метка фиксации меньше `oldest_live`
    pub fn pop_expired(&self, oldest_live: Timestamp) -> Option<CommittedBatch> {
        let mut batches = self.batches.lock();
        match batches.front() {
            Some(head) if head.commit_timestamp < oldest_live => batches.pop_front(),
            _ => None,
        }
    }

    /// Метка фиксации головы очереди
    pub fn peek_timestamp(&self) -> Option<Timestamp> {
        self.batches.lock().front().map(|batch| batch.commit_timestamp)
    }

    pub fn len(&self) -> usize {
        self.batches.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.lock().is_empty()
    }
}
