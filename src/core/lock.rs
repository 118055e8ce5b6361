//! Координатор табличных блокировок для rustdb
//!
//! Реализует двухфазное блокирование таблиц поверх версий строк (MVLOCKS):
//! писатели берут блокировки записи на изменяемые таблицы, читатели с
//! REPEATABLE READ и выше удерживают блокировки чтения до конца транзакции.
//! Сессия, которой нужна занятая таблица, получает набор держателей и ждет на
//! своей защелке. Ожидание, которое замкнуло бы цикл в графе ожидания, не
//! регистрируется: сессии выставляется запрос на откат.
//!
//! Все методы вызываются под транзакционной блокировкой менеджера.

use crate::common::{IsolationLevel, SessionId, TableId, TransactionModel};
use crate::core::session::SessionHandle;
use indexmap::{IndexMap, IndexSet};
use log::debug;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Режим блокировки
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockMode {
    /// Разделяемая блокировка (Shared) - для чтения
    Shared,
    /// Исключительная блокировка (Exclusive) - для записи
    Exclusive,
}

impl LockMode {
    /// Проверяет совместимость режимов блокировки
    pub fn is_compatible(&self, other: &LockMode) -> bool {
        matches!((self, other), (LockMode::Shared, LockMode::Shared))
    }
}

/// Таблицы, которые затрагивает оператор
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Statement {
    pub read_tables: Vec<TableId>,
    pub write_tables: Vec<TableId>,
    /// Оператор меняет каталог (DDL)
    pub catalog_change: bool,
}

impl Statement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Запрос на чтение таблиц
    pub fn query(tables: &[TableId]) -> Self {
        Self::new().reads(tables)
    }

    /// Изменение таблиц
    pub fn update(tables: &[TableId]) -> Self {
        Self::new().writes(tables)
    }

    /// Изменение каталога
    pub fn ddl() -> Self {
        Self {
            catalog_change: true,
            ..Self::default()
        }
    }

    pub fn reads(mut self, tables: &[TableId]) -> Self {
        self.read_tables.extend_from_slice(tables);
        self
    }

    pub fn writes(mut self, tables: &[TableId]) -> Self {
        self.write_tables.extend_from_slice(tables);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.read_tables.is_empty() && self.write_tables.is_empty() && !self.catalog_change
    }
}

/// Решение о допуске действия
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionAdmission {
    /// Блокировки получены, можно выполнять
    Proceed,
    /// Нужно дождаться `holders` сессий на защелке
    Wait { holders: usize },
    /// Действие нужно повторить (барьер перезагрузки)
    Redo,
    /// Ожидание привело бы к взаимоблокировке, транзакцию нужно откатить
    Abort,
}

/// Граф ожидания для обнаружения дедлоков
#[derive(Debug, Default)]
pub struct WaitForGraph {
    /// Рёбра графа: сессия -> сессии, которых она ждет
    edges: HashMap<SessionId, IndexSet<SessionId>>,
    /// Обратные рёбра: сессия -> сессии, которые ждут ее
    waiters: HashMap<SessionId, IndexSet<SessionId>>,
}

impl WaitForGraph {
    /// Добавляет рёбра `session -> holder` для каждого держателя
    pub fn add_edges(&mut self, session: SessionId, holders: &IndexSet<SessionId>) {
        for holder in holders {
            self.edges.entry(session).or_default().insert(*holder);
            self.waiters.entry(*holder).or_default().insert(session);
        }
    }

    /// Удаляет все исходящие рёбра сессии
    pub fn clear_waits(&mut self, session: SessionId) {
        if let Some(holders) = self.edges.remove(&session) {
            for holder in holders {
                if let Some(waiters) = self.waiters.get_mut(&holder) {
                    waiters.shift_remove(&session);
                    if waiters.is_empty() {
                        self.waiters.remove(&holder);
                    }
                }
            }
        }
    }

    /// Удаляет все рёбра, связанные с сессией
    pub fn remove_session(&mut self, session: SessionId) {
        self.clear_waits(session);
        for waiter in self.take_waiters(session) {
            debug!("{} no longer waits for removed {}", waiter, session);
        }
    }

    /// Снимает рёбра `waiter -> holder`, возвращает ждавших в порядке ожидания
    pub fn take_waiters(&mut self, holder: SessionId) -> Vec<SessionId> {
        let waiters: Vec<SessionId> = self
            .waiters
            .remove(&holder)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();
        for waiter in &waiters {
            if let Some(holders) = self.edges.get_mut(waiter) {
                holders.shift_remove(&holder);
                if holders.is_empty() {
                    self.edges.remove(waiter);
                }
            }
        }
        waiters
    }

    /// Число сессий, которых ждет `session`
    pub fn waiting_count(&self, session: SessionId) -> usize {
        self.edges.get(&session).map_or(0, |holders| holders.len())
    }

    pub fn is_waiting(&self, session: SessionId) -> bool {
        self.waiting_count(session) > 0
    }

    /// Сессии, которые ждут `holder`
    pub fn waiters_of(&self, holder: SessionId) -> Vec<SessionId> {
        self.waiters
            .get(&holder)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Замкнет ли ожидание `session` на `holders` цикл.
    ///
    /// Цикл есть, если один из держателей (прямо или транзитивно) ждет `session`.
    pub fn would_deadlock(&self, session: SessionId, holders: &IndexSet<SessionId>) -> bool {
        let mut visited = HashSet::new();
        let mut stack: Vec<SessionId> = holders.iter().copied().collect();
        while let Some(current) = stack.pop() {
            if current == session {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(next) = self.edges.get(&current) {
                stack.extend(next.iter().copied());
            }
        }
        false
    }

    /// Обнаруживает циклы в графе (дедлоки)
    pub fn detect_deadlock(&self) -> Option<Vec<SessionId>> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for &session in self.edges.keys() {
            if !visited.contains(&session) {
                if let Some(cycle) =
                    self.dfs_detect_cycle(session, &mut visited, &mut rec_stack, &mut path)
                {
                    return Some(cycle);
                }
            }
        }

        None
    }

    /// Поиск в глубину для обнаружения циклов
    fn dfs_detect_cycle(
        &self,
        session: SessionId,
        visited: &mut HashSet<SessionId>,
        rec_stack: &mut HashSet<SessionId>,
        path: &mut Vec<SessionId>,
    ) -> Option<Vec<SessionId>> {
        visited.insert(session);
        rec_stack.insert(session);
        path.push(session);

        if let Some(neighbors) = self.edges.get(&session) {
            for &neighbor in neighbors {
                if !visited.contains(&neighbor) {
                    if let Some(cycle) = self.dfs_detect_cycle(neighbor, visited, rec_stack, path) {
                        return Some(cycle);
                    }
                } else if rec_stack.contains(&neighbor) {
                    let start = path.iter().position(|&s| s == neighbor).unwrap_or(0);
                    return Some(path[start..].to_vec());
                }
            }
        }

        path.pop();
        rec_stack.remove(&session);
        None
    }
}

/// Статистика координатора
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockCoordinatorStats {
    /// Запросы допуска
    pub admission_requests: u64,
    /// Допуски без ожидания
    pub immediate_grants: u64,
    /// Зарегистрированные ожидания
    pub waits: u64,
    /// Ожидания, отклоненные из-за цикла
    pub deadlocks_avoided: u64,
    /// Повторные допуски после освобождения блокировок
    pub readmissions: u64,
}

#[derive(Debug)]
struct SessionEntry {
    handle: Arc<SessionHandle>,
    read_only: bool,
    isolation: IsolationLevel,
    in_transaction: bool,
    statement: Option<Statement>,
}

/// Координатор блокировок и ожиданий
#[derive(Debug)]
pub struct LockCoordinator {
    model: TransactionModel,
    write_locks: HashMap<TableId, SessionId>,
    read_locks: HashMap<TableId, IndexSet<SessionId>>,
    graph: WaitForGraph,
    sessions: IndexMap<SessionId, SessionEntry>,
    stats: LockCoordinatorStats,
}

impl LockCoordinator {
    pub fn new(model: TransactionModel) -> Self {
        Self {
            model,
            write_locks: HashMap::new(),
            read_locks: HashMap::new(),
            graph: WaitForGraph::default(),
            sessions: IndexMap::new(),
            stats: LockCoordinatorStats::default(),
        }
    }

    /// Регистрирует сессию или обновляет ее режимы
    pub fn register(&mut self, handle: Arc<SessionHandle>, read_only: bool, isolation: IsolationLevel) {
        let id = handle.id();
        match self.sessions.get_mut(&id) {
            Some(entry) => {
                entry.read_only = read_only;
                entry.isolation = isolation;
            }
            None => {
                self.sessions.insert(
                    id,
                    SessionEntry {
                        handle,
                        read_only,
                        isolation,
                        in_transaction: false,
                        statement: None,
                    },
                );
            }
        }
    }

    /// Убирает сессию: освобождает блокировки и допускает ждавших ее
    pub fn unregister(&mut self, session: SessionId) {
        self.end_transaction(session);
        self.graph.remove_session(session);
        self.sessions.shift_remove(&session);
    }

    pub fn set_in_transaction(&mut self, session: SessionId, in_transaction: bool) {
        if let Some(entry) = self.sessions.get_mut(&session) {
            entry.in_transaction = in_transaction;
        }
    }

    /// Решает, может ли сессия начать оператор
    pub fn begin_action(&mut self, session: SessionId, statement: Statement) -> ActionAdmission {
        self.stats.admission_requests += 1;
        let Some(entry) = self.sessions.get_mut(&session) else {
            return ActionAdmission::Proceed;
        };
        entry.statement = Some(statement.clone());
        entry.handle.latch().set_count(0);

        self.admit(session, &statement)
    }

    fn admit(&mut self, session: SessionId, statement: &Statement) -> ActionAdmission {
        match self.waited_sessions(session, statement) {
            None => {
                self.stats.deadlocks_avoided += 1;
                if let Some(entry) = self.sessions.get(&session) {
                    entry.handle.status().request_abort();
                    entry.handle.latch().set_count(0);
                }
                debug!("{} would deadlock, abort requested", session);
                ActionAdmission::Abort
            }
            Some(holders) if holders.is_empty() => {
                self.stats.immediate_grants += 1;
                self.lock_tables(session, statement);
                if let Some(entry) = self.sessions.get(&session) {
                    entry.handle.latch().set_count(0);
                }
                ActionAdmission::Proceed
            }
            Some(holders) => {
                self.stats.waits += 1;
                self.graph.add_edges(session, &holders);
                debug_assert!(self.graph.detect_deadlock().is_none());
                if let Some(entry) = self.sessions.get(&session) {
                    entry.handle.latch().set_count(holders.len());
                }
                debug!("{} waits for {:?}", session, holders);
                ActionAdmission::Wait {
                    holders: holders.len(),
                }
            }
        }
    }

    /// Таблицы, на которые сессия берет блокировки чтения
    fn effective_read_tables(&self, session: SessionId, statement: &Statement) -> Vec<TableId> {
        let read_only = self
            .sessions
            .get(&session)
            .map(|entry| entry.read_only)
            .unwrap_or(false);
        if read_only && self.model == TransactionModel::MvLocks {
            if statement.read_tables.is_empty() {
                Vec::new()
            } else {
                vec![TableId::CATALOG]
            }
        } else {
            statement
                .read_tables
                .iter()
                .copied()
                .filter(|table| !table.is_system())
                .collect()
        }
    }

    fn effective_write_tables(&self, statement: &Statement) -> Vec<TableId> {
        let mut tables: Vec<TableId> = statement
            .write_tables
            .iter()
            .copied()
            .filter(|table| !table.is_system())
            .collect();
        if statement.catalog_change && !tables.contains(&TableId::CATALOG) {
            tables.push(TableId::CATALOG);
        }
        tables
    }

    /// Держатели блокировок, мешающих оператору; `None` при взаимоблокировке
    fn waited_sessions(&self, session: SessionId, statement: &Statement) -> Option<IndexSet<SessionId>> {
        let mut holders = IndexSet::new();

        if statement.catalog_change {
            holders.extend(
                self.sessions
                    .iter()
                    .filter(|(id, entry)| **id != session && entry.in_transaction)
                    .map(|(id, _)| *id),
            );
        }

        for table in self.effective_write_tables(statement) {
            if let Some(holder) = self.write_locks.get(&table) {
                if *holder != session {
                    holders.insert(*holder);
                }
            }
            if let Some(readers) = self.read_locks.get(&table) {
                holders.extend(readers.iter().copied().filter(|reader| *reader != session));
            }
        }

        for table in self.effective_read_tables(session, statement) {
            if let Some(holder) = self.write_locks.get(&table) {
                if *holder != session {
                    holders.insert(*holder);
                }
            }
        }

        if holders.is_empty() {
            return Some(holders);
        }
        if self.graph.would_deadlock(session, &holders) {
            return None;
        }
        Some(holders)
    }

    fn lock_tables(&mut self, session: SessionId, statement: &Statement) {
        for table in self.effective_write_tables(statement) {
            self.write_locks.insert(table, session);
        }
        for table in self.effective_read_tables(session, statement) {
            self.read_locks.entry(table).or_default().insert(session);
        }
    }

    fn unlock_tables(&mut self, session: SessionId) {
        self.write_locks.retain(|_, holder| *holder != session);
        self.read_locks.retain(|_, readers| {
            readers.shift_remove(&session);
            !readers.is_empty()
        });
    }

    /// Конец оператора: READ COMMITTED и ниже отпускают блокировки чтения
    pub fn end_action(&mut self, session: SessionId) {
        let Some(entry) = self.sessions.get_mut(&session) else {
            return;
        };
        let statement = entry.statement.take();
        if entry.isolation.holds_read_locks() {
            return;
        }
        let Some(statement) = statement else {
            return;
        };

        let mut released = false;
        for table in self.effective_read_tables(session, &statement) {
            if let Some(readers) = self.read_locks.get_mut(&table) {
                released |= readers.shift_remove(&session);
                if readers.is_empty() {
                    self.read_locks.remove(&table);
                }
            }
        }
        if released {
            self.readmit_waiters(session);
        }
    }

    /// Конец транзакции: снимает все блокировки и допускает ждавших
    pub fn end_transaction(&mut self, session: SessionId) {
        self.unlock_tables(session);
        self.graph.clear_waits(session);
        if let Some(entry) = self.sessions.get_mut(&session) {
            entry.in_transaction = false;
            entry.statement = None;
        }
        self.readmit_waiters(session);
    }

    /// Пересчитывает ожидания сессий, ждавших `holder`
    fn readmit_waiters(&mut self, holder: SessionId) {
        for waiter in self.graph.take_waiters(holder) {
            let Some(entry) = self.sessions.get(&waiter) else {
                continue;
            };
            let handle = Arc::clone(&entry.handle);
            let statement = entry.statement.clone();

            if handle.status().is_abort_requested() {
                self.graph.clear_waits(waiter);
                handle.latch().set_count(0);
                continue;
            }
            let remaining = self.graph.waiting_count(waiter);
            if remaining > 0 {
                handle.latch().set_count(remaining);
                continue;
            }

            self.stats.readmissions += 1;
            match statement {
                Some(statement) => {
                    self.admit(waiter, &statement);
                }
                None => handle.latch().set_count(0),
            }
        }
    }

    /// Запрос на откат от другой сессии; ожидающая сессия просыпается
    pub fn abort_session(&mut self, session: SessionId) {
        let Some(entry) = self.sessions.get(&session) else {
            return;
        };
        entry.handle.status().request_abort();
        entry.handle.latch().set_count(0);
        self.graph.clear_waits(session);
    }

    pub fn write_lock_holder(&self, table: TableId) -> Option<SessionId> {
        self.write_locks.get(&table).copied()
    }

    pub fn read_lock_holders(&self, table: TableId) -> Vec<SessionId> {
        self.read_locks
            .get(&table)
            .map(|readers| readers.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Блокировки сессии с их режимами
    pub fn table_locks(&self, session: SessionId) -> Vec<(TableId, LockMode)> {
        let mut locks: Vec<(TableId, LockMode)> = self
            .write_locks
            .iter()
            .filter(|(_, holder)| **holder == session)
            .map(|(table, _)| (*table, LockMode::Exclusive))
            .collect();
        locks.extend(
            self.read_locks
                .iter()
                .filter(|(_, readers)| readers.contains(&session))
                .map(|(table, _)| (*table, LockMode::Shared)),
        );
        locks.sort();
        locks
    }

    pub fn is_waiting(&self, session: SessionId) -> bool {
        self.graph.is_waiting(session)
    }

    pub fn waiters_of(&self, holder: SessionId) -> Vec<SessionId> {
        self.graph.waiters_of(holder)
    }

    pub fn graph(&self) -> &WaitForGraph {
        &self.graph
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn get_statistics(&self) -> LockCoordinatorStats {
        self.stats.clone()
    }
}
