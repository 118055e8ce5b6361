//! Состояние сессии, с которым работает менеджер транзакций
//!
//! `Session` принадлежит потоку клиента. Общая часть (`SessionHandle`) доступна
//! другим потокам: через нее координатор блокировок выставляет флаги отмены
//! и повтора и открывает защелку ожидания.

use crate::common::{ActionId, Error, IsolationLevel, Result, SessionId, Timestamp};
use crate::core::latch::CountDownLatch;
use crate::core::lock::Statement;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Кооперативный статус сессии
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Сессия работает в обычном режиме
    Active,
    /// Транзакцию нужно откатить при следующей проверке
    AbortRequested,
    /// Действие нужно повторить после снятия барьера
    RedoRequested,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::AbortRequested,
            2 => Self::RedoRequested,
            _ => Self::Active,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Active => 0,
            Self::AbortRequested => 1,
            Self::RedoRequested => 2,
        }
    }
}

/// Атомарный статус сессии.
///
/// Точки проверки: вход в `commit_transaction`, результат `begin_action`,
/// после ожидания защелки, `begin_action_resume`. Сбрасывается в `rollback`.
#[derive(Debug, Default)]
pub struct SessionStatus(AtomicU8);

impl SessionStatus {
    pub fn get(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Запрос на откат; перекрывает запрос повтора
    pub fn request_abort(&self) {
        self.0
            .store(SessionState::AbortRequested.as_u8(), Ordering::Release);
    }

    /// Запрос на повтор; не перекрывает уже запрошенный откат
    pub fn request_redo(&self) {
        let _ = self.0.compare_exchange(
            SessionState::Active.as_u8(),
            SessionState::RedoRequested.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Снимает запрос повтора, возвращает `true`, если он был выставлен
    pub fn take_redo(&self) -> bool {
        self.0
            .compare_exchange(
                SessionState::RedoRequested.as_u8(),
                SessionState::Active.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn clear(&self) {
        self.0.store(SessionState::Active.as_u8(), Ordering::Release);
    }

    pub fn is_abort_requested(&self) -> bool {
        self.get() == SessionState::AbortRequested
    }
}

/// Часть сессии, разделяемая с другими потоками
#[derive(Debug)]
pub struct SessionHandle {
    id: SessionId,
    status: SessionStatus,
    latch: CountDownLatch,
}

impl SessionHandle {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            status: SessionStatus::default(),
            latch: CountDownLatch::new(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    pub fn latch(&self) -> &CountDownLatch {
        &self.latch
    }
}

/// Точка сохранения внутри транзакции
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Savepoint {
    pub name: String,
    /// Длина списка действий на момент объявления
    pub action_index: usize,
    /// Метка, начиная с которой шаги откатываются
    pub timestamp: Timestamp,
}

/// Сессия клиента
#[derive(Debug)]
pub struct Session {
    handle: Arc<SessionHandle>,
    pub(crate) isolation_level: IsolationLevel,
    pub(crate) read_only: bool,
    pub(crate) is_transaction: bool,
    pub(crate) transaction_timestamp: Timestamp,
    pub(crate) transaction_end_timestamp: Timestamp,
    pub(crate) action_timestamp: Timestamp,
    pub(crate) action_start_timestamp: Timestamp,
    pub(crate) action_index: usize,
    pub(crate) row_action_list: Vec<ActionId>,
    pub(crate) savepoints: Vec<Savepoint>,
    pub(crate) current_statement: Option<Statement>,
}

impl Session {
    pub fn new(id: SessionId, isolation_level: IsolationLevel) -> Self {
        Self {
            handle: Arc::new(SessionHandle::new(id)),
            isolation_level,
            read_only: false,
            is_transaction: false,
            transaction_timestamp: Timestamp::ZERO,
            transaction_end_timestamp: Timestamp::ZERO,
            action_timestamp: Timestamp::ZERO,
            action_start_timestamp: Timestamp::ZERO,
            action_index: 0,
            row_action_list: Vec::new(),
            savepoints: Vec::new(),
            current_statement: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.handle.id()
    }

    pub fn handle(&self) -> &Arc<SessionHandle> {
        &self.handle
    }

    pub fn status(&self) -> SessionState {
        self.handle.status().get()
    }

    pub fn is_abort_requested(&self) -> bool {
        self.handle.status().is_abort_requested()
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    /// Меняет уровень изоляции; внутри транзакции запрещено
    pub fn set_isolation_level(&mut self, level: IsolationLevel) -> Result<()> {
        if self.is_transaction {
            return Err(Error::transaction(
                "Isolation level cannot change inside a transaction",
            ));
        }
        self.isolation_level = level;
        Ok(())
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Переключает режим только-чтение; внутри транзакции запрещено
    pub fn set_read_only(&mut self, read_only: bool) -> Result<()> {
        if self.is_transaction {
            return Err(Error::transaction(
                "Read-only mode cannot change inside a transaction",
            ));
        }
        self.read_only = read_only;
        Ok(())
    }

    pub fn is_transaction(&self) -> bool {
        self.is_transaction
    }

    pub fn transaction_timestamp(&self) -> Timestamp {
        self.transaction_timestamp
    }

    pub fn transaction_end_timestamp(&self) -> Timestamp {
        self.transaction_end_timestamp
    }

    pub fn action_timestamp(&self) -> Timestamp {
        self.action_timestamp
    }

    pub fn action_start_timestamp(&self) -> Timestamp {
        self.action_start_timestamp
    }

    pub fn row_action_list(&self) -> &[ActionId] {
        &self.row_action_list
    }

    pub fn savepoints(&self) -> &[Savepoint] {
        &self.savepoints
    }

    pub fn current_statement(&self) -> Option<&Statement> {
        self.current_statement.as_ref()
    }

    /// Индекс точки сохранения по имени
    pub fn savepoint_index(&self, name: &str) -> Option<usize> {
        self.savepoints.iter().position(|sp| sp.name == name)
    }

    /// Удаляет точку сохранения и все объявленные после нее
    pub fn release_savepoint(&mut self, name: &str) -> Result<()> {
        let index = self
            .savepoint_index(name)
            .ok_or_else(|| Error::transaction(format!("Savepoint {} not found", name)))?;
        self.savepoints.truncate(index);
        Ok(())
    }

    /// Ждет, пока координатор не откроет защелку допуска к действию
    pub fn await_admission(&self, timeout: Duration) -> Result<()> {
        if self.handle.latch().wait_timeout(timeout) {
            Ok(())
        } else {
            Err(Error::lock_timeout(format!(
                "session {} waited more than {:?} for table locks",
                self.id(),
                timeout
            )))
        }
    }

    /// Сбрасывает поля, относящиеся к транзакции
    pub(crate) fn reset_transaction_state(&mut self) {
        self.is_transaction = false;
        self.action_index = 0;
        self.row_action_list.clear();
        self.savepoints.clear();
        self.current_statement = None;
    }
}
