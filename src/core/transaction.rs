//! Менеджер транзакций для rustdb
//!
//! Реализует протокол MV2PL: читатели видят версии строк по меткам времени,
//! писатели сериализуются табличными блокировками. Зафиксированные изменения
//! сливаются с базовым состоянием строк сразу, если ни одна более старая
//! транзакция не может их не видеть, иначе пакет действий ставится в очередь
//! и сливается, когда завершится последняя такая транзакция.
//!
//! Порядок блокировок: транзакционная блокировка, затем блокировка очереди.
//! Ожидание допуска к действию выполняется только вне транзакционной блокировки.

use crate::common::{
    ActionId, Error, IsolationLevel, Result, RowId, SessionId, TableId, TableRef, Timestamp,
    TransactionConfig, TransactionModel,
};
use crate::core::committed::CommittedQueue;
use crate::core::ledger::Ledger;
use crate::core::live::LiveTransactions;
use crate::core::lock::{ActionAdmission, LockCoordinator, LockCoordinatorStats, Statement};
use crate::core::journal::TransactionLog;
use crate::core::row_action::{ActionType, ReadMode};
use crate::core::session::{Savepoint, Session};
use crate::core::store::{PersistentStore, Row};
use crate::core::timestamp::TimestampSource;
use log::{debug, error, info, warn};
use parking_lot::{Mutex, ReentrantMutex};
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Статистика менеджера транзакций
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionManagerStats {
    /// Общее количество начатых транзакций
    pub total_transactions: u64,
    /// Количество активных транзакций
    pub active_transactions: u64,
    /// Количество зафиксированных транзакций
    pub committed_transactions: u64,
    /// Количество откаченных транзакций
    pub rolled_back_transactions: u64,
    /// Фиксации, слитые сразу
    pub merged_immediately: u64,
    /// Фиксации, поставленные в очередь
    pub queued_transactions: u64,
    /// Пакеты, извлеченные из очереди и слитые
    pub drained_transactions: u64,
    /// Текущая длина очереди зафиксированных транзакций
    pub committed_queue_length: u64,
    pub aborts_requested: u64,
    pub redo_requested: u64,
    pub write_conflicts: u64,
    /// Откаты операторов
    pub statement_rollbacks: u64,
    /// Откаты к точкам сохранения
    pub savepoint_rollbacks: u64,
    /// Ошибки хранилища при слиянии и откате
    pub storage_errors: u64,
    /// Статистика координатора блокировок
    pub locks: LockCoordinatorStats,
}

#[derive(Debug)]
struct TransactionState {
    live: LiveTransactions,
    locks: LockCoordinator,
    lob_session: Option<SessionId>,
}

/// Менеджер транзакций
///
/// Отвечает за жизненный цикл транзакций, журнал действий над строками,
/// слияние зафиксированных изменений и координацию табличных блокировок.
#[derive(Debug)]
pub struct TransactionManager {
    /// Конфигурация менеджера
    config: TransactionConfig,
    /// Глобальный счетчик меток
    timestamps: TimestampSource,
    /// Журнал действий над строками
    ledger: Ledger,
    /// Зафиксированные, но не слитые транзакции
    committed: CommittedQueue,
    /// Транзакционная блокировка и защищаемое ею состояние
    state: ReentrantMutex<RefCell<TransactionState>>,
    /// Барьер перезагрузки: новые действия получают запрос на повтор
    has_expired: AtomicBool,
    next_session_id: AtomicU64,
    transaction_count: AtomicUsize,
    /// Журнал фиксаций и откатов
    log: Option<Arc<dyn TransactionLog>>,
    stats: Mutex<TransactionManagerStats>,
}

impl TransactionManager {
    /// Создает менеджер с конфигурацией по умолчанию
    pub fn new() -> Result<Self> {
        Self::with_config(TransactionConfig::default())
    }

    /// Создает менеджер с заданной конфигурацией
    pub fn with_config(config: TransactionConfig) -> Result<Self> {
        config.validate()?;
        info!(
            "Transaction manager started: model {}, isolation {:?}",
            config.transaction_model, config.default_isolation_level
        );

        Ok(Self {
            state: ReentrantMutex::new(RefCell::new(TransactionState {
                live: LiveTransactions::new(),
                locks: LockCoordinator::new(config.transaction_model),
                lob_session: None,
            })),
            config,
            timestamps: TimestampSource::new(),
            ledger: Ledger::new(),
            committed: CommittedQueue::new(),
            has_expired: AtomicBool::new(false),
            next_session_id: AtomicU64::new(1),
            transaction_count: AtomicUsize::new(0),
            log: None,
            stats: Mutex::new(TransactionManagerStats::default()),
        })
    }

    /// Устанавливает журнал фиксаций и откатов
    pub fn set_log(&mut self, log: Arc<dyn TransactionLog>) {
        self.log = Some(log);
    }

    pub fn get_config(&self) -> &TransactionConfig {
        &self.config
    }

    pub fn transaction_model(&self) -> TransactionModel {
        self.config.transaction_model
    }

    /// Видят ли читатели версии строк
    pub fn is_mv_rows(&self) -> bool {
        self.config.transaction_model.is_mv_rows()
    }

    /// Снимок статистики
    pub fn get_statistics(&self) -> TransactionManagerStats {
        let locks = self.inspect_locks(|locks| locks.get_statistics());
        let mut stats = self.stats.lock().clone();
        stats.active_transactions = self.transaction_count.load(Ordering::SeqCst) as u64;
        stats.committed_queue_length = self.committed.len() as u64;
        stats.locks = locks;
        stats
    }

    fn record<F>(&self, update: F)
    where
        F: FnOnce(&mut TransactionManagerStats),
    {
        update(&mut self.stats.lock());
    }

    // ---------------------------------------------------------------
    // Метки времени

    pub fn get_global_change_timestamp(&self) -> Timestamp {
        self.timestamps.current()
    }

    /// Устанавливает глобальную метку, например при открытии базы
    pub fn set_global_change_timestamp(&self, timestamp: Timestamp) {
        self.timestamps.set(timestamp);
    }

    // ---------------------------------------------------------------
    // Сессии

    /// Создает сессию с уровнем изоляции по умолчанию
    pub fn create_session(&self) -> Session {
        let id = SessionId(self.next_session_id.fetch_add(1, Ordering::SeqCst));
        let session = Session::new(id, self.config.default_isolation_level);
        self.register_session(&session);
        debug!("Created session {}", id);
        session
    }

    fn register_session(&self, session: &Session) {
        let guard = self.state.lock();
        guard.borrow_mut().locks.register(
            Arc::clone(session.handle()),
            session.is_read_only(),
            session.isolation_level(),
        );
    }

    /// Меняет уровень изоляции сессии вне транзакции
    pub fn set_isolation_level(
        &self,
        session: &mut Session,
        level: IsolationLevel,
    ) -> Result<()> {
        session.set_isolation_level(level)?;
        self.register_session(session);
        Ok(())
    }

    /// Переключает режим только-чтение вне транзакции
    pub fn set_read_only(&self, session: &mut Session, read_only: bool) -> Result<()> {
        session.set_read_only(read_only)?;
        self.register_session(session);
        Ok(())
    }

    /// Закрывает сессию, откатывая незавершенную транзакцию
    pub fn close_session(&self, session: &mut Session) -> Result<()> {
        let result = if session.is_transaction() || !session.row_action_list().is_empty() {
            self.rollback(session)
        } else {
            Ok(())
        };

        let guard = self.state.lock();
        {
            let mut state = guard.borrow_mut();
            state.locks.unregister(session.id());
            if state.lob_session == Some(session.id()) {
                state.lob_session = None;
            }
        }
        debug!("Closed session {}", session.id());
        result
    }

    /// Назначает системную сессию, фиксации которой сливаются сразу
    pub fn set_lob_session(&self, session: Option<SessionId>) {
        let guard = self.state.lock();
        guard.borrow_mut().lob_session = session;
    }

    /// Включает или снимает барьер перезагрузки
    pub fn set_expired(&self, expired: bool) {
        self.has_expired.store(expired, Ordering::SeqCst);
        if expired {
            warn!("Transaction manager expired: new actions will be redone");
        }
    }

    pub fn has_expired(&self) -> bool {
        self.has_expired.load(Ordering::SeqCst)
    }

    /// Запрашивает откат транзакции другой сессии.
    ///
    /// Сессия обнаружит запрос в ближайшей точке проверки; ожидающая сессия
    /// просыпается сразу.
    pub fn abort_session(&self, target: SessionId) {
        let guard = self.state.lock();
        guard.borrow_mut().locks.abort_session(target);
        self.record(|stats| stats.aborts_requested += 1);
        info!("Abort requested for session {}", target);
    }

    // ---------------------------------------------------------------
    // Начало транзакций и действий

    fn begin_transaction_common(&self, session: &mut Session) -> Result<()> {
        let guard = self.state.lock();
        if self.transaction_count.load(Ordering::SeqCst) >= self.config.max_concurrent_transactions
        {
            return Err(Error::transaction(
                "Maximum number of concurrent transactions reached",
            ));
        }

        let timestamp = self.timestamps.next();
        session.action_timestamp = timestamp;
        session.action_start_timestamp = timestamp;
        session.transaction_timestamp = timestamp;
        session.is_transaction = true;
        session.action_index = session.row_action_list.len();
        self.transaction_count.fetch_add(1, Ordering::SeqCst);

        {
            let mut state = guard.borrow_mut();
            state.live.begin(timestamp);
            state.locks.set_in_transaction(session.id(), true);
        }

        self.record(|stats| stats.total_transactions += 1);
        debug!("{} began transaction at {}", session.id(), timestamp);
        Ok(())
    }

    /// Начинает транзакцию, если она еще не начата
    pub fn begin_transaction(&self, session: &mut Session) -> Result<()> {
        let _guard = self.state.lock();
        if !session.is_transaction() {
            self.begin_transaction_common(session)?;
        }
        Ok(())
    }

    /// Запрашивает допуск оператора к таблицам.
    ///
    /// При `Wait` сессия должна дождаться защелки вне блокировки и затем
    /// вызвать `begin_action_resume`.
    pub fn begin_action(&self, session: &mut Session, statement: Statement) -> ActionAdmission {
        let guard = self.state.lock();

        if session.is_abort_requested() {
            return ActionAdmission::Abort;
        }
        if self.has_expired.load(Ordering::SeqCst) {
            session.handle().status().request_redo();
            self.record(|stats| stats.redo_requested += 1);
            return ActionAdmission::Redo;
        }

        let admission = guard
            .borrow_mut()
            .locks
            .begin_action(session.id(), statement.clone());
        session.current_statement = Some(statement);

        if admission == ActionAdmission::Abort {
            self.record(|stats| stats.aborts_requested += 1);
        }
        admission
    }

    /// Продолжает действие после допуска: новая метка действия или неявное
    /// начало транзакции
    pub fn begin_action_resume(&self, session: &mut Session) -> Result<()> {
        if session.is_abort_requested() {
            return Err(Error::transaction_aborted(format!(
                "Transaction of session {} was aborted",
                session.id()
            )));
        }

        let _guard = self.state.lock();
        if session.is_transaction() {
            let timestamp = self.timestamps.next();
            session.action_timestamp = timestamp;
            session.action_start_timestamp = timestamp;
        } else {
            self.begin_transaction_common(session)?;
        }
        session.action_index = session.row_action_list.len();
        Ok(())
    }

    /// Завершает оператор: отпускает блокировки чтения уровней ниже REPEATABLE READ
    pub fn complete_actions(&self, session: &mut Session) {
        let guard = self.state.lock();
        guard.borrow_mut().locks.end_action(session.id());
        session.current_statement = None;
    }

    // ---------------------------------------------------------------
    // Действия над строками

    /// Регистрирует вставку новой строки до ее индексации
    pub fn create_insert_action(
        &self,
        session: &Session,
        table: TableRef,
        store: &Arc<dyn PersistentStore>,
        row: &Row,
    ) -> Result<ActionId> {
        let _guard = self.state.lock();
        self.ledger.create_insert_action(
            session.id(),
            session.action_timestamp,
            table,
            Arc::clone(store),
            row.id,
        )
    }

    /// Индексирует вставленную строку и добавляет действие в список сессии
    pub fn add_insert_action(
        &self,
        session: &mut Session,
        table: TableRef,
        store: &Arc<dyn PersistentStore>,
        row: &Row,
        _changed_columns: Option<&[usize]>,
    ) -> Result<()> {
        let _guard = self.state.lock();
        let id = self.ledger.insert_action_for(session.id(), row.id)?;

        if table.is_routine_scoped() {
            let indexed = store.index_row(session.id(), row);
            self.ledger.detach(row.id, id);
            self.ledger.discard(id);
            return indexed;
        }

        session.row_action_list.push(id);
        store.index_row(session.id(), row)
    }

    /// Вставка строки целиком: регистрация действия и индексация
    pub fn insert_row(
        &self,
        session: &mut Session,
        table: TableRef,
        store: &Arc<dyn PersistentStore>,
        row: &Row,
    ) -> Result<ActionId> {
        let _guard = self.state.lock();
        let id = self.create_insert_action(session, table, store, row)?;
        self.add_insert_action(session, table, store, row, None)?;
        Ok(id)
    }

    /// Регистрирует удаление строки (или удаляющую часть обновления).
    ///
    /// Конфликт с незафиксированным изменением другой сессии выставляет запрос
    /// на откат текущей транзакции.
    pub fn add_delete_action(
        &self,
        session: &mut Session,
        table: TableRef,
        store: &Arc<dyn PersistentStore>,
        row: &Row,
        changed_columns: Option<&[usize]>,
    ) -> Result<ActionId> {
        let _guard = self.state.lock();
        let id = match self.ledger.add_delete_action_to_row(
            session.id(),
            session.action_timestamp,
            table,
            Arc::clone(store),
            row.id,
            changed_columns.map(Arc::from),
        ) {
            Ok(id) => id,
            Err(e) => {
                if matches!(e, Error::WriteConflict { .. }) {
                    session.handle().status().request_abort();
                    self.record(|stats| {
                        stats.write_conflicts += 1;
                        stats.aborts_requested += 1;
                    });
                    debug!("{} write conflict: {}", session.id(), e);
                }
                return Err(e);
            }
        };

        let routine_temp = table.is_temp() && table.is_routine_scoped();
        if !routine_temp {
            session.row_action_list.push(id);
        }

        let applied = if table.is_temp() || self.config.transaction_model == TransactionModel::Locks
        {
            store.delete(session.id(), row)
        } else {
            Ok(())
        };

        if table.is_temp() {
            self.ledger.detach(row.id, id);
            if routine_temp {
                self.ledger.discard(id);
            }
        }

        applied.map(|_| id)
    }

    /// Видна ли строка сессии; транзакционную блокировку не берет
    pub fn can_read(&self, session: &Session, row: RowId, mode: ReadMode) -> bool {
        self.ledger
            .can_read(session.id(), row, self.read_threshold(session), mode)
    }

    /// Порог видимости зафиксированных шагов для сессии
    fn read_threshold(&self, session: &Session) -> Timestamp {
        if !self.is_mv_rows() {
            return Timestamp::INFINITE;
        }
        if !session.is_transaction() {
            return Timestamp(self.timestamps.current().value().saturating_add(1));
        }
        match session.isolation_level() {
            IsolationLevel::ReadUncommitted => Timestamp::INFINITE,
            IsolationLevel::ReadCommitted => session.action_timestamp(),
            IsolationLevel::RepeatableRead | IsolationLevel::Serializable => {
                session.transaction_timestamp()
            }
        }
    }

    // ---------------------------------------------------------------
    // Фиксация

    /// Помечает действия сессии подготовленными к фиксации
    pub fn prepare_commit_actions(&self, session: &mut Session) -> bool {
        let _guard = self.state.lock();
        session.action_timestamp = self.timestamps.next();
        for id in &session.row_action_list {
            self.ledger.prepare_commit(*id, session.id());
        }
        true
    }

    /// Фиксирует транзакцию.
    ///
    /// Возвращает `Ok(false)` без побочных эффектов, если запрошен откат.
    /// Ошибка хранилища при слиянии не отменяет фиксацию: учет завершается
    /// для всех строк, и возвращается первая ошибка.
    pub fn commit_transaction(&self, session: &mut Session) -> Result<bool> {
        if session.is_abort_requested() {
            debug!("{} commit refused: abort requested", session.id());
            return Ok(false);
        }

        let guard = self.state.lock();
        let session_id = session.id();
        let mut first_error = None;

        let commit_timestamp = self.timestamps.next();
        session.action_timestamp = commit_timestamp;
        session.transaction_end_timestamp = commit_timestamp;

        note(&mut first_error, self.end_transaction(session));

        for id in &session.row_action_list {
            self.ledger.commit(*id, session_id, commit_timestamp);
        }

        if let Some(log) = &self.log {
            note(
                &mut first_error,
                log.write_commit(session_id, commit_timestamp, session.row_action_list.len()),
            );
        }

        let (first_live, is_lob_session) = {
            let state = guard.borrow();
            (state.live.first(), state.lob_session == Some(session_id))
        };

        let actions = std::mem::take(&mut session.row_action_list);
        if is_lob_session || first_live > commit_timestamp {
            note(
                &mut first_error,
                self.merge_and_finalise(session_id, &actions, commit_timestamp),
            );
            self.record(|stats| stats.merged_immediately += 1);
        } else if !actions.is_empty() {
            let queued = self.committed.push(commit_timestamp, actions);
            self.record(|stats| stats.queued_transactions += 1);
            if queued > self.config.committed_queue_warning {
                warn!(
                    "Committed transaction queue holds {} batches, oldest live transaction is {}",
                    queued, first_live
                );
            }
        }

        session.reset_transaction_state();
        guard.borrow_mut().locks.end_transaction(session_id);
        self.record(|stats| stats.committed_transactions += 1);
        debug!("{} committed at {}", session_id, commit_timestamp);

        match first_error {
            Some(e) => Err(e),
            None => Ok(true),
        }
    }

    /// Снимает сессию с реестра живых транзакций и сливает устаревшие пакеты
    fn end_transaction(&self, session: &Session) -> Result<()> {
        let guard = self.state.lock();
        let removed = guard
            .borrow_mut()
            .live
            .remove(session.transaction_timestamp());
        if !removed {
            return Ok(());
        }
        self.transaction_count.fetch_sub(1, Ordering::SeqCst);
        self.merge_expired_transactions(session.id())
    }

    /// Сливает пакеты очереди, которые не видит ни одна живая транзакция
    pub fn merge_expired_transactions(&self, session: SessionId) -> Result<()> {
        let guard = self.state.lock();
        let oldest_live = guard.borrow().live.first();
        let mut first_error = None;
        let mut drained = 0;

        while let Some(batch) = self.committed.pop_expired(oldest_live) {
            note(
                &mut first_error,
                self.merge_and_finalise(session, &batch.actions, batch.commit_timestamp),
            );
            drained += 1;
        }

        if self.ledger.unfinalised_count() > 0 {
            let retried = self.ledger.retry_finalise(session);
            if retried.is_err() {
                self.record(|stats| stats.storage_errors += 1);
            }
            note(&mut first_error, retried.map(|_| ()));
        }

        if drained > 0 {
            self.record(|stats| stats.drained_transactions += drained);
            debug!("Merged {} committed transactions before {}", drained, oldest_live);
        }
        first_error.map_or(Ok(()), Err)
    }

    fn merge_and_finalise(
        &self,
        session: SessionId,
        actions: &[ActionId],
        commit_timestamp: Timestamp,
    ) -> Result<()> {
        self.ledger
            .merge_transaction(actions, 0, actions.len(), commit_timestamp);
        let finalised = self.ledger.finalise_rows(session, actions, 0, actions.len());
        self.ledger.reclaim(actions);
        if finalised.is_err() {
            self.record(|stats| stats.storage_errors += 1);
        }
        finalised.map(|_| ())
    }

    // ---------------------------------------------------------------
    // Откат

    /// Откатывает транзакцию целиком и снимает флаг отмены
    pub fn rollback(&self, session: &mut Session) -> Result<()> {
        let guard = self.state.lock();
        let session_id = session.id();
        let was_transaction = session.is_transaction();
        let mut first_error = None;

        session.handle().status().clear();
        let timestamp = self.timestamps.next();
        session.action_timestamp = timestamp;
        session.transaction_end_timestamp = timestamp;

        let start_timestamp = session.transaction_timestamp();
        note(
            &mut first_error,
            self.rollback_partial(session, 0, start_timestamp),
        );
        note(&mut first_error, self.end_transaction(session));

        if was_transaction {
            if let Some(log) = &self.log {
                note(&mut first_error, log.write_rollback(session_id, timestamp));
            }
        }

        session.reset_transaction_state();
        guard.borrow_mut().locks.end_transaction(session_id);

        if was_transaction {
            self.record(|stats| stats.rolled_back_transactions += 1);
            debug!("{} rolled back at {}", session_id, timestamp);
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Объявляет точку сохранения; одноименная точка объявляется заново
    pub fn savepoint(&self, session: &mut Session, name: &str) -> Result<()> {
        let _guard = self.state.lock();
        if !session.is_transaction() {
            self.begin_transaction_common(session)?;
        }
        if let Some(index) = session.savepoint_index(name) {
            session.savepoints.truncate(index);
        }

        // последующие шаги получают метку не меньше метки точки
        let timestamp = self.timestamps.next();
        session.action_timestamp = timestamp;
        session.action_start_timestamp = timestamp;
        session.savepoints.push(Savepoint {
            name: name.to_string(),
            action_index: session.row_action_list.len(),
            timestamp,
        });
        Ok(())
    }

    /// Удаляет точку сохранения и все объявленные после нее
    pub fn release_savepoint(&self, session: &mut Session, name: &str) -> Result<()> {
        session.release_savepoint(name)
    }

    /// Откатывает изменения после точки сохранения с номером `index`;
    /// сама точка остается
    pub fn rollback_savepoint(&self, session: &mut Session, index: usize) -> Result<()> {
        let savepoint = session.savepoints().get(index).cloned().ok_or_else(|| {
            Error::transaction(format!("Savepoint #{} not found in {}", index, session.id()))
        })?;
        session.savepoints.truncate(index + 1);

        self.record(|stats| stats.savepoint_rollbacks += 1);
        self.rollback_partial(session, savepoint.action_index, savepoint.timestamp)
    }

    /// Откат к точке сохранения по имени
    pub fn rollback_to_savepoint(&self, session: &mut Session, name: &str) -> Result<()> {
        let index = session
            .savepoint_index(name)
            .ok_or_else(|| Error::transaction(format!("Savepoint {} not found", name)))?;
        self.rollback_savepoint(session, index)
    }

    /// Откатывает изменения текущего оператора
    pub fn rollback_action(&self, session: &mut Session) -> Result<()> {
        let start = session.action_index;
        let timestamp = session.action_start_timestamp();
        let result = self.rollback_partial(session, start, timestamp);
        self.complete_actions(session);
        self.record(|stats| stats.statement_rollbacks += 1);
        result
    }

    /// Откатывает действия списка с позиции `start` до конца, начиная с конца.
    ///
    /// Отменяются шаги с меткой действия не меньше `timestamp`. Список сессии
    /// усекается до `start`. Строку, вытесненную из хранилища, не трогаем,
    /// но шаги в журнале все равно отменяются.
    pub fn rollback_partial(
        &self,
        session: &mut Session,
        start: usize,
        timestamp: Timestamp,
    ) -> Result<()> {
        let limit = session.row_action_list.len();
        if start >= limit {
            return Ok(());
        }

        let session_id = session.id();
        let model = self.config.transaction_model;
        let mut first_error = None;

        for index in (start..limit).rev() {
            let id = session.row_action_list[index];
            match self.ledger.action_type(id) {
                None | Some(ActionType::None) | Some(ActionType::DeleteFinal) => continue,
                Some(_) => {}
            }
            let Some((row_id, store)) = self.ledger.target(id) else {
                continue;
            };

            let row = match store.get(row_id.position, true) {
                Ok(row) => row,
                Err(e) => {
                    error!("Failed to read {} during rollback: {}", row_id, e);
                    note::<()>(&mut first_error, Err(e));
                    None
                }
            };

            let _guard = self.state.lock();
            let Some(outcome) = self.ledger.rollback_action(id, session_id, timestamp) else {
                continue;
            };
            if outcome.apply_to_store {
                if let Some(row) = &row {
                    if let Err(e) = store.rollback_row(session_id, row, outcome.undone, model) {
                        error!("Failed to roll back {}: {}", row_id, e);
                        note::<()>(&mut first_error, Err(e));
                    }
                }
            }
            self.ledger.release_rolled_back(id);
        }

        session.row_action_list.truncate(start);
        if first_error.is_some() {
            self.record(|stats| stats.storage_errors += 1);
        }
        first_error.map_or(Ok(()), Err)
    }

    // ---------------------------------------------------------------
    // Выполнение операторов

    /// Выполняет оператор целиком: допуск, ожидание блокировок, повтор при
    /// барьере, откат оператора при ошибке.
    ///
    /// Ошибки, требующие отката транзакции, откатывают ее целиком.
    pub fn execute<T, F>(&self, session: &mut Session, statement: Statement, action: F) -> Result<T>
    where
        F: FnOnce(&Self, &mut Session) -> Result<T>,
    {
        let mut attempts = 0u32;
        loop {
            match self.begin_action(session, statement.clone()) {
                ActionAdmission::Proceed => break,
                ActionAdmission::Wait { holders } => {
                    debug!("{} waits for {} sessions", session.id(), holders);
                    if let Err(e) = session.await_admission(self.config.lock_timeout()) {
                        warn!("{}", e);
                        self.rollback(session)?;
                        return Err(e);
                    }
                    break;
                }
                ActionAdmission::Redo => {
                    session.handle().status().take_redo();
                    attempts += 1;
                    if attempts >= self.config.max_redo_attempts {
                        return Err(Error::transaction(format!(
                            "Session {} gave up after {} redo attempts",
                            session.id(),
                            attempts
                        )));
                    }
                    thread::sleep(Duration::from_millis(1 << attempts.min(6)));
                }
                ActionAdmission::Abort => break,
            }
        }

        if session.is_abort_requested() {
            self.rollback(session)?;
            return Err(Error::transaction_aborted(format!(
                "Transaction of session {} was aborted to avoid a deadlock",
                session.id()
            )));
        }

        self.begin_action_resume(session)?;
        match action(self, session) {
            Ok(value) => {
                self.complete_actions(session);
                Ok(value)
            }
            Err(e) => {
                if e.requires_rollback() || session.is_abort_requested() {
                    self.rollback(session)?;
                } else {
                    self.rollback_action(session)?;
                }
                Err(e)
            }
        }
    }

    // ---------------------------------------------------------------
    // Наблюдение

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn live_transaction_count(&self) -> usize {
        self.transaction_count.load(Ordering::SeqCst)
    }

    /// Метка самой старой живой транзакции или `Timestamp::INFINITE`
    pub fn first_live_transaction_timestamp(&self) -> Timestamp {
        let guard = self.state.lock();
        let first = guard.borrow().live.first();
        drop(guard);
        first
    }

    pub fn committed_queue_len(&self) -> usize {
        self.committed.len()
    }

    pub fn write_lock_holder(&self, table: TableId) -> Option<SessionId> {
        self.inspect_locks(|locks| locks.write_lock_holder(table))
    }

    pub fn read_lock_holders(&self, table: TableId) -> Vec<SessionId> {
        self.inspect_locks(|locks| locks.read_lock_holders(table))
    }

    pub fn is_waiting(&self, session: SessionId) -> bool {
        self.inspect_locks(|locks| locks.is_waiting(session))
    }

    /// Доступ к координатору блокировок только для чтения
    pub fn inspect_locks<R, F>(&self, inspect: F) -> R
    where
        F: FnOnce(&LockCoordinator) -> R,
    {
        let guard = self.state.lock();
        let state = guard.borrow();
        inspect(&state.locks)
    }
}

/// Запоминает первую ошибку
fn note<T>(first_error: &mut Option<Error>, result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            if first_error.is_none() {
                *first_error = Some(e);
            }
            None
        }
    }
}
