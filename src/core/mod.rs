//! Ядро транзакций rustdb

pub mod committed;
pub mod journal;
pub mod latch;
pub mod ledger;
pub mod live;
pub mod lock;
pub mod row_action;
pub mod session;
pub mod store;
pub mod timestamp;
pub mod transaction;

// Переэкспортируем основные типы
pub use committed::{CommittedBatch, CommittedQueue};
pub use journal::{LogRecord, LogRecordType, MemoryTransactionLog, TransactionLog};
pub use latch::CountDownLatch;
pub use ledger::{Ledger, RollbackOutcome, RowSlot};
pub use live::LiveTransactions;
pub use lock::{
    ActionAdmission, LockCoordinator, LockCoordinatorStats, LockMode, Statement, WaitForGraph,
};
pub use row_action::{
    ActionState, ActionStep, ActionType, MergeOutcome, ReadMode, RowAction, StepKind,
};
pub use session::{Savepoint, Session, SessionHandle, SessionState, SessionStatus};
pub use store::{MemoryStore, PersistentStore, Row};
pub use timestamp::TimestampSource;
pub use transaction::{TransactionManager, TransactionManagerStats};

#[cfg(test)]
pub mod tests;
