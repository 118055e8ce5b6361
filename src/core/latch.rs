//! Счетчик-защелка ожидания допуска к действию
//!
//! Значение счетчика равно числу сессий, которых ждет владелец защелки.
//! Ожидание всегда выполняется вне транзакционной блокировки.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Защелка с обратным отсчетом
#[derive(Debug, Default)]
pub struct CountDownLatch {
    count: Mutex<usize>,
    released: Condvar,
}

impl CountDownLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Устанавливает счетчик; нулевое значение будит ожидающих
    pub fn set_count(&self, count: usize) {
        let mut current = self.count.lock();
        *current = count;
        if count == 0 {
            self.released.notify_all();
        }
    }

    /// Уменьшает счетчик на единицу
    pub fn count_down(&self) {
        let mut current = self.count.lock();
        if *current > 0 {
            *current -= 1;
            if *current == 0 {
                self.released.notify_all();
            }
        }
    }

    pub fn count(&self) -> usize {
        *self.count.lock()
    }

    /// Ждет обнуления счетчика не дольше `timeout`; `false` при таймауте
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut current = self.count.lock();
        while *current > 0 {
            if self.released.wait_until(&mut current, deadline).timed_out() {
                return *current == 0;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_open_latch_does_not_block() {
        let latch = CountDownLatch::new();
        assert!(latch.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn test_wait_times_out() {
        let latch = CountDownLatch::new();
        latch.set_count(1);
        assert!(!latch.wait_timeout(Duration::from_millis(20)));
        assert_eq!(latch.count(), 1);
    }

    #[test]
    fn test_release_from_other_thread() {
        let latch = Arc::new(CountDownLatch::new());
        latch.set_count(2);

        let releaser = {
            let latch = Arc::clone(&latch);
            thread::spawn(move || {
                latch.count_down();
                latch.count_down();
            })
        };

        assert!(latch.wait_timeout(Duration::from_secs(5)));
        releaser.join().unwrap();
        assert_eq!(latch.count(), 0);
    }
}
