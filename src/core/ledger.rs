//! Журнал действий над строками
//!
//! Действия живут в арене и адресуются `ActionId`. Для каждой строки хранится
//! слот с идентификатором ожидающего действия и базовой меткой последнего слияния.
//!
//! Изменения выполняются только под транзакционной блокировкой менеджера.
//! Чтение (`can_read`) блокировку не берет: идентификатор копируется из слота,
//! ссылка на слот отпускается, и только затем читается само действие.

use crate::common::{ActionId, Error, Result, RowId, SessionId, TableRef, Timestamp};
use crate::core::row_action::{ActionState, ActionType, MergeOutcome, ReadMode, RowAction};
use crate::core::store::{PersistentStore, Row};
use dashmap::{DashMap, DashSet};
use log::{debug, error};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Слот строки
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowSlot {
    /// Ожидающее действие над строкой
    pub action: Option<ActionId>,
    /// Метка последнего слияния
    pub baseline: Timestamp,
}

/// Итог отката одного действия
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollbackOutcome {
    /// Тип отмененного изменения для `rollback_row`
    pub undone: ActionType,
    /// Строку нужно вернуть хранилищу через `rollback_row`
    pub apply_to_store: bool,
}

/// Журнал действий
#[derive(Debug)]
pub struct Ledger {
    actions: DashMap<ActionId, RowAction>,
    rows: DashMap<RowId, RowSlot>,
    /// Удаления, которые хранилище не смогло выполнить
    unfinalised: DashSet<ActionId>,
    next_id: AtomicU64,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    pub fn new() -> Self {
        Self {
            actions: DashMap::new(),
            rows: DashMap::new(),
            unfinalised: DashSet::new(),
            next_id: AtomicU64::new(1),
        }
    }

    fn allocate_id(&self) -> ActionId {
        ActionId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Ожидающее действие строки
    pub fn pending_action(&self, row: RowId) -> Option<ActionId> {
        self.rows.get(&row).and_then(|slot| slot.action)
    }

    /// Слот строки
    pub fn row_slot(&self, row: RowId) -> Option<RowSlot> {
        self.rows.get(&row).map(|slot| *slot)
    }

    pub fn action_type(&self, id: ActionId) -> Option<ActionType> {
        self.actions.get(&id).map(|action| action.action_type())
    }

    pub fn action_state(&self, id: ActionId) -> Option<ActionState> {
        self.actions.get(&id).map(|action| action.state())
    }

    pub fn is_delete_complete(&self, id: ActionId) -> Option<bool> {
        self.actions.get(&id).map(|action| action.is_delete_complete())
    }

    pub fn contains_action(&self, id: ActionId) -> bool {
        self.actions.contains_key(&id)
    }

    /// Число действий в арене
    pub fn action_count(&self) -> usize {
        self.actions.len()
    }

    /// Число удалений, ожидающих повторного физического удаления
    pub fn unfinalised_count(&self) -> usize {
        self.unfinalised.len()
    }

    /// Строка и хранилище действия
    pub fn target(&self, id: ActionId) -> Option<(RowId, Arc<dyn PersistentStore>)> {
        self.actions
            .get(&id)
            .map(|action| (action.row(), Arc::clone(action.store())))
    }

    /// Регистрирует незафиксированную вставку новой строки
    pub(crate) fn create_insert_action(
        &self,
        session: SessionId,
        timestamp: Timestamp,
        table: TableRef,
        store: Arc<dyn PersistentStore>,
        row: RowId,
    ) -> Result<ActionId> {
        if let Some(existing) = self.pending_action(row) {
            return Err(Error::protocol_violation(format!(
                "{} already has pending action {}",
                row, existing
            )));
        }

        let id = self.allocate_id();
        self.actions.insert(
            id,
            RowAction::new_insert(id, session, timestamp, table, store, row),
        );
        let mut slot = self.rows.entry(row).or_insert(RowSlot {
            action: None,
            baseline: Timestamp::ZERO,
        });
        slot.action = Some(id);
        Ok(id)
    }

    /// Добавляет шаг удаления к действию строки, создавая действие при необходимости
    pub(crate) fn add_delete_action_to_row(
        &self,
        session: SessionId,
        timestamp: Timestamp,
        table: TableRef,
        store: Arc<dyn PersistentStore>,
        row: RowId,
        changed_columns: Option<Arc<[usize]>>,
    ) -> Result<ActionId> {
        let id = match self.pending_action(row) {
            Some(id) => id,
            None => {
                let id = self.allocate_id();
                self.actions
                    .insert(id, RowAction::new_empty(id, table, store, row));
                self.rows
                    .entry(row)
                    .or_insert(RowSlot {
                        action: None,
                        baseline: Timestamp::ZERO,
                    })
                    .action = Some(id);
                id
            }
        };

        let mut action = self.actions.get_mut(&id).ok_or_else(|| {
            Error::internal(format!("{} points to missing action {}", row, id))
        })?;
        action.add_delete(session, timestamp, changed_columns)?;
        Ok(id)
    }

    /// Проверяет, что у строки есть незафиксированная вставка данной сессии
    pub(crate) fn insert_action_for(&self, session: SessionId, row: RowId) -> Result<ActionId> {
        let id = self
            .pending_action(row)
            .ok_or_else(|| Error::protocol_violation(format!("null insert action for {}", row)))?;
        let has_insert = self
            .actions
            .get(&id)
            .map(|action| action.has_pending_insert(session))
            .unwrap_or(false);
        if !has_insert {
            return Err(Error::protocol_violation(format!(
                "{} has no pending insert by {}",
                row, session
            )));
        }
        Ok(id)
    }

    /// Отсоединяет действие от строки, не трогая само действие
    pub(crate) fn detach(&self, row: RowId, id: ActionId) {
        if let Some(mut slot) = self.rows.get_mut(&row) {
            if slot.action == Some(id) {
                slot.action = None;
            }
        }
    }

    /// Удаляет действие из арены
    pub(crate) fn discard(&self, id: ActionId) {
        self.actions.remove(&id);
    }

    pub(crate) fn prepare_commit(&self, id: ActionId, session: SessionId) {
        if let Some(mut action) = self.actions.get_mut(&id) {
            action.prepare_commit(session);
        }
    }

    pub(crate) fn commit(&self, id: ActionId, session: SessionId, timestamp: Timestamp) {
        if let Some(mut action) = self.actions.get_mut(&id) {
            action.commit(session, timestamp);
        }
    }

    /// Сливает шаги действий `actions[from..to]`, зафиксированные не позже `commit_timestamp`
    pub(crate) fn merge_transaction(
        &self,
        actions: &[ActionId],
        from: usize,
        to: usize,
        commit_timestamp: Timestamp,
    ) {
        for id in &actions[from..to] {
            let merged = self.actions.get_mut(id).map(|mut action| {
                (action.merge_to_timestamp(commit_timestamp), action.row())
            });
            if let Some((MergeOutcome::Detached, row)) = merged {
                if let Some(mut slot) = self.rows.get_mut(&row) {
                    if slot.action == Some(*id) {
                        slot.action = None;
                        slot.baseline = commit_timestamp;
                    }
                }
            }
        }
    }

    /// Физически удаляет строки действий в состоянии `DeleteFinal`.
    ///
    /// Повторный вызов для уже удаленной строки ничего не делает. Ошибка
    /// хранилища не прерывает обход; возвращается первая из них. Строка с
    /// ошибкой остается привязанной к действию `DeleteFinal` и невидимой,
    /// удаление повторяет `retry_finalise`.
    pub(crate) fn finalise_rows(
        &self,
        session: SessionId,
        actions: &[ActionId],
        from: usize,
        to: usize,
    ) -> Result<usize> {
        let mut first_error = None;
        let mut finalised = 0;

        for id in &actions[from..to] {
            let target = self.actions.get(id).and_then(|action| {
                let pending = action.action_type() == ActionType::DeleteFinal
                    && !action.is_delete_complete();
                pending.then(|| (action.row(), Arc::clone(action.store())))
            });
            let Some((row_id, store)) = target else {
                continue;
            };

            if let Err(e) = remove_row(session, store.as_ref(), row_id) {
                error!("Failed to finalise {}: {}", row_id, e);
                self.unfinalised.insert(*id);
                first_error.get_or_insert(e);
                continue;
            }

            let completed = self
                .actions
                .get_mut(id)
                .map(|mut action| action.mark_delete_complete())
                .unwrap_or(false);
            if !completed {
                continue;
            }
            self.unfinalised.remove(id);
            self.rows
                .remove_if(&row_id, |_, slot| slot.action.map_or(true, |action| action == *id));
            finalised += 1;
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(finalised),
        }
    }

    /// Повторяет физическое удаление строк, на которых ранее упало хранилище
    pub(crate) fn retry_finalise(&self, session: SessionId) -> Result<usize> {
        if self.unfinalised.is_empty() {
            return Ok(0);
        }
        let pending: Vec<ActionId> = self.unfinalised.iter().map(|id| *id.key()).collect();
        let finalised = self.finalise_rows(session, &pending, 0, pending.len());
        self.reclaim(&pending);
        if let Ok(count) = finalised {
            debug!("Finalised {} previously failed deletes", count);
        }
        finalised
    }

    /// Освобождает в арене действия, которые больше не нужны ни строке, ни сессии
    pub(crate) fn reclaim(&self, actions: &[ActionId]) -> usize {
        let mut reclaimed = 0;
        for id in actions {
            let terminal = self.actions.get(id).map(|action| {
                let attached = self
                    .rows
                    .get(&action.row())
                    .map(|slot| slot.action == Some(*id))
                    .unwrap_or(false);
                match action.action_type() {
                    ActionType::DeleteFinal => action.is_delete_complete(),
                    ActionType::None => !attached,
                    _ => false,
                }
            });
            if terminal == Some(true) && self.actions.remove(id).is_some() {
                reclaimed += 1;
            }
        }
        if reclaimed > 0 {
            debug!("Reclaimed {} row actions", reclaimed);
        }
        reclaimed
    }

    /// Откатывает шаги сессии с меткой не меньше `timestamp`.
    ///
    /// `None`, если действия нет или его тип `None`/`DeleteFinal`.
    pub(crate) fn rollback_action(
        &self,
        id: ActionId,
        session: SessionId,
        timestamp: Timestamp,
    ) -> Option<RollbackOutcome> {
        let mut action = self.actions.get_mut(&id)?;
        if matches!(action.action_type(), ActionType::None | ActionType::DeleteFinal) {
            return None;
        }

        action.rollback(session, timestamp);
        let undone = action.merge_rollback(session, timestamp);
        let apply_to_store = match action.action_type() {
            ActionType::DeleteFinal => action.mark_delete_complete(),
            _ => true,
        };
        Some(RollbackOutcome {
            undone,
            apply_to_store,
        })
    }

    /// Отсоединяет действие, полностью отмененное откатом
    pub(crate) fn release_rolled_back(&self, id: ActionId) {
        let released = self.actions.get(&id).and_then(|action| {
            let terminal = action.state() == ActionState::RolledBack;
            terminal.then(|| (action.row(), action.action_type()))
        });
        let Some((row, action_type)) = released else {
            return;
        };
        match action_type {
            ActionType::DeleteFinal => {
                self.rows.remove_if(&row, |_, slot| slot.action == Some(id));
            }
            _ => self.detach(row, id),
        }
        self.actions.remove(&id);
    }

    /// Проверка видимости строки без транзакционной блокировки
    pub fn can_read(
        &self,
        session: SessionId,
        row: RowId,
        threshold: Timestamp,
        mode: ReadMode,
    ) -> bool {
        let Some(id) = self.pending_action(row) else {
            return true;
        };
        match self.actions.get(&id) {
            Some(action) => {
                if action.table().is_temp() {
                    return true;
                }
                action.can_read(session, threshold, mode)
            }
            None => true,
        }
    }
}

fn remove_row(session: SessionId, store: &dyn PersistentStore, row_id: RowId) -> Result<()> {
    let row: Option<Row> = store.get(row_id.position, true)?;
    match row {
        Some(row) => {
            store.delete(session, &row)?;
            store.remove(&row)
        }
        None => Ok(()),
    }
}
