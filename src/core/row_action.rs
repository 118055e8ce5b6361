//! Действие над строкой: ожидающие изменения одной строки
//!
//! Действие хранит упорядоченный список шагов (вставка или удаление) разных
//! сессий. Незафиксированные шаги в любой момент принадлежат не более чем одной
//! сессии. Зафиксированные шаги остаются в списке до слияния, пока их могут
//! видеть более старые транзакции.

use crate::common::{ActionId, Error, Result, RowId, SessionId, TableRef, Timestamp};
use crate::core::store::PersistentStore;
use std::fmt;
use std::sync::Arc;

/// Итоговый тип действия над строкой
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionType {
    /// Шагов нет, строка в базовом состоянии
    None,
    /// Строка вставлена
    Insert,
    /// Строка удалена (или удалена частью обновления)
    Delete,
    /// Строка вставлена и удалена одной транзакцией
    InsertDelete,
    /// Удаление слито, строку нужно физически убрать из хранилища
    DeleteFinal,
}

impl ActionType {
    fn from_steps(has_insert: bool, has_delete: bool) -> Self {
        match (has_insert, has_delete) {
            (true, true) => ActionType::InsertDelete,
            (true, false) => ActionType::Insert,
            (false, true) => ActionType::Delete,
            (false, false) => ActionType::None,
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionType::None => "NONE",
            ActionType::Insert => "INSERT",
            ActionType::Delete => "DELETE",
            ActionType::InsertDelete => "INSERT_DELETE",
            ActionType::DeleteFinal => "DELETE_FINAL",
        };
        write!(f, "{}", name)
    }
}

/// Жизненный цикл действия
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionState {
    /// Есть незафиксированные шаги
    Pending,
    /// Незафиксированные шаги подготовлены к фиксации
    Prepared,
    /// Все шаги зафиксированы, слияние отложено
    CommittedPendingMerge,
    /// Все шаги слиты с базовым состоянием строки
    Merged,
    /// Все шаги откачены
    RolledBack,
}

/// Режим проверки видимости
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Обычное чтение
    Read,
    /// Проверка уникальности: чужая незафиксированная вставка считается видимой
    Duplicate,
    /// Проверка ссылки: чужое незафиксированное удаление считается выполненным
    Reference,
}

/// Вид шага
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Insert,
    Delete,
}

/// Шаг действия, выполненный одной сессией
#[derive(Debug, Clone)]
pub struct ActionStep {
    pub session: SessionId,
    pub kind: StepKind,
    pub action_timestamp: Timestamp,
    /// `None`, пока шаг не зафиксирован
    pub commit_timestamp: Option<Timestamp>,
    pub prepared: bool,
    pub rolled_back: bool,
    /// Измененные столбцы, если удаление входит в обновление
    pub changed_columns: Option<Arc<[usize]>>,
}

impl ActionStep {
    fn new(
        session: SessionId,
        kind: StepKind,
        action_timestamp: Timestamp,
        changed_columns: Option<Arc<[usize]>>,
    ) -> Self {
        Self {
            session,
            kind,
            action_timestamp,
            commit_timestamp: None,
            prepared: false,
            rolled_back: false,
            changed_columns,
        }
    }

    fn is_live(&self) -> bool {
        !self.rolled_back
    }

    fn is_uncommitted(&self) -> bool {
        self.commit_timestamp.is_none() && !self.rolled_back
    }
}

/// Результат слияния действия
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Остались шаги, которые еще нельзя слить
    Retained,
    /// Шагов не осталось, действие отсоединяется от строки
    Detached,
    /// Слито удаление, строку нужно финализировать
    DeleteFinal,
}

/// Действие над строкой
#[derive(Debug, Clone)]
pub struct RowAction {
    id: ActionId,
    row: RowId,
    table: TableRef,
    store: Arc<dyn PersistentStore>,
    steps: Vec<ActionStep>,
    finalised: bool,
    delete_complete: bool,
    state: ActionState,
}

impl RowAction {
    /// Действие с незафиксированной вставкой
    pub fn new_insert(
        id: ActionId,
        session: SessionId,
        timestamp: Timestamp,
        table: TableRef,
        store: Arc<dyn PersistentStore>,
        row: RowId,
    ) -> Self {
        Self {
            id,
            row,
            table,
            store,
            steps: vec![ActionStep::new(session, StepKind::Insert, timestamp, None)],
            finalised: false,
            delete_complete: false,
            state: ActionState::Pending,
        }
    }

    /// Действие без шагов для строки в базовом состоянии
    pub fn new_empty(
        id: ActionId,
        table: TableRef,
        store: Arc<dyn PersistentStore>,
        row: RowId,
    ) -> Self {
        Self {
            id,
            row,
            table,
            store,
            steps: Vec::new(),
            finalised: false,
            delete_complete: false,
            state: ActionState::Merged,
        }
    }

    pub fn id(&self) -> ActionId {
        self.id
    }

    pub fn row(&self) -> RowId {
        self.row
    }

    pub fn table(&self) -> TableRef {
        self.table
    }

    pub fn store(&self) -> &Arc<dyn PersistentStore> {
        &self.store
    }

    pub fn steps(&self) -> &[ActionStep] {
        &self.steps
    }

    pub fn state(&self) -> ActionState {
        self.state
    }

    pub fn is_delete_complete(&self) -> bool {
        self.delete_complete
    }

    /// Отмечает физическое удаление; `false`, если оно уже было выполнено
    pub fn mark_delete_complete(&mut self) -> bool {
        if self.delete_complete {
            return false;
        }
        self.delete_complete = true;
        true
    }

    /// Итоговый тип по живым шагам
    pub fn action_type(&self) -> ActionType {
        if self.finalised {
            return ActionType::DeleteFinal;
        }
        let live = self.steps.iter().filter(|step| step.is_live());
        let (mut has_insert, mut has_delete) = (false, false);
        for step in live {
            match step.kind {
                StepKind::Insert => has_insert = true,
                StepKind::Delete => has_delete = true,
            }
        }
        ActionType::from_steps(has_insert, has_delete)
    }

    /// Является ли удаление частью обновления
    pub fn is_update(&self) -> bool {
        self.steps
            .iter()
            .any(|step| step.is_live() && step.kind == StepKind::Delete && step.changed_columns.is_some())
    }

    /// Сессия с незафиксированными шагами на строке
    pub fn pending_session(&self) -> Option<SessionId> {
        self.steps
            .iter()
            .find(|step| step.is_uncommitted())
            .map(|step| step.session)
    }

    /// Есть ли незафиксированная вставка данной сессии
    pub fn has_pending_insert(&self, session: SessionId) -> bool {
        self.steps
            .iter()
            .any(|step| step.is_uncommitted() && step.session == session && step.kind == StepKind::Insert)
    }

    /// Добавляет шаг удаления.
    ///
    /// Чужой незафиксированный шаг или чужое зафиксированное удаление дают
    /// конфликт записи; повторное удаление своей сессией нарушает протокол.
    pub fn add_delete(
        &mut self,
        session: SessionId,
        timestamp: Timestamp,
        changed_columns: Option<Arc<[usize]>>,
    ) -> Result<()> {
        if self.finalised {
            return Err(Error::protocol_violation(format!(
                "{} is already deleted",
                self.row
            )));
        }
        if let Some(holder) = self.pending_session() {
            if holder != session {
                return Err(Error::write_conflict(self.row.to_string(), holder.value()));
            }
        }
        if let Some(step) = self
            .steps
            .iter()
            .find(|step| step.is_live() && step.kind == StepKind::Delete)
        {
            if step.session == session && step.commit_timestamp.is_none() {
                return Err(Error::protocol_violation(format!(
                    "{} is already deleted by {}",
                    self.row, session
                )));
            }
            return Err(Error::write_conflict(self.row.to_string(), step.session.value()));
        }

        self.steps.push(ActionStep::new(
            session,
            StepKind::Delete,
            timestamp,
            changed_columns,
        ));
        self.state = ActionState::Pending;
        Ok(())
    }

    /// Помечает незафиксированные шаги сессии подготовленными
    pub fn prepare_commit(&mut self, session: SessionId) {
        let mut prepared = false;
        for step in self
            .steps
            .iter_mut()
            .filter(|step| step.session == session && step.is_uncommitted())
        {
            step.prepared = true;
            prepared = true;
        }
        if prepared {
            self.state = ActionState::Prepared;
        }
    }

    /// Фиксирует шаги сессии меткой `timestamp`, возвращает итоговый тип
    pub fn commit(&mut self, session: SessionId, timestamp: Timestamp) -> ActionType {
        for step in self
            .steps
            .iter_mut()
            .filter(|step| step.session == session && step.is_uncommitted())
        {
            step.commit_timestamp = Some(timestamp);
            step.prepared = false;
        }
        self.refresh_state();
        self.action_type()
    }

    /// Помечает откаченными шаги сессии с меткой действия не меньше `timestamp`
    pub fn rollback(&mut self, session: SessionId, timestamp: Timestamp) {
        for step in self.steps.iter_mut().filter(|step| {
            step.session == session && step.is_uncommitted() && step.action_timestamp >= timestamp
        }) {
            step.rolled_back = true;
            step.prepared = false;
        }
    }

    /// Убирает откаченные шаги сессии, возвращает тип отмененного изменения.
    ///
    /// Если после отката шагов не осталось и откатывалась вставка, действие
    /// переходит в `DeleteFinal`: строку нужно убрать из хранилища.
    pub fn merge_rollback(&mut self, session: SessionId, timestamp: Timestamp) -> ActionType {
        let (mut has_insert, mut has_delete) = (false, false);
        self.steps.retain(|step| {
            let undone = step.rolled_back && step.session == session && step.action_timestamp >= timestamp;
            if undone {
                match step.kind {
                    StepKind::Insert => has_insert = true,
                    StepKind::Delete => has_delete = true,
                }
            }
            !undone
        });

        let undone = ActionType::from_steps(has_insert, has_delete);
        if self.steps.is_empty() {
            if has_insert {
                self.finalised = true;
            }
            self.state = ActionState::RolledBack;
        } else {
            self.refresh_state();
        }
        undone
    }

    /// Сливает шаги, зафиксированные не позже `timestamp`
    pub fn merge_to_timestamp(&mut self, timestamp: Timestamp) -> MergeOutcome {
        if self.finalised || self.steps.is_empty() {
            return MergeOutcome::Retained;
        }

        let mut merged_delete = false;
        self.steps.retain(|step| match step.commit_timestamp {
            Some(committed) if !step.rolled_back && committed <= timestamp => {
                if step.kind == StepKind::Delete {
                    merged_delete = true;
                }
                false
            }
            _ => true,
        });

        if merged_delete {
            self.finalised = true;
            self.steps.clear();
            self.state = ActionState::Merged;
            return MergeOutcome::DeleteFinal;
        }
        if self.steps.is_empty() {
            self.state = ActionState::Merged;
            return MergeOutcome::Detached;
        }
        MergeOutcome::Retained
    }

    /// Видна ли строка сессии при пороге видимости `threshold`.
    ///
    /// Зафиксированные шаги видны, если метка фиксации меньше порога; свои
    /// шаги видны всегда.
    pub fn can_read(&self, session: SessionId, threshold: Timestamp, mode: ReadMode) -> bool {
        if self.finalised {
            return false;
        }
        if self.steps.is_empty() {
            return true;
        }

        let mut visible = ActionType::None;
        for step in &self.steps {
            if step.rolled_back {
                if step.kind == StepKind::Insert {
                    visible = ActionType::Delete;
                }
                continue;
            }
            if step.session == session {
                visible = step_type(step.kind);
                continue;
            }
            match step.commit_timestamp {
                None => {
                    visible = match (step.kind, mode) {
                        (StepKind::Insert, ReadMode::Duplicate) => ActionType::Insert,
                        (StepKind::Insert, _) => ActionType::Delete,
                        (StepKind::Delete, ReadMode::Reference) => ActionType::Delete,
                        (StepKind::Delete, _) => continue,
                    };
                    break;
                }
                Some(committed) if committed < threshold => {
                    visible = step_type(step.kind);
                }
                Some(_) => {
                    if step.kind == StepKind::Insert {
                        visible = ActionType::Delete;
                    }
                }
            }
        }

        matches!(visible, ActionType::None | ActionType::Insert)
    }

    fn refresh_state(&mut self) {
        self.state = if self.steps.iter().any(|step| step.is_uncommitted() && step.prepared) {
            ActionState::Prepared
        } else if self.steps.iter().any(|step| step.is_uncommitted()) {
            ActionState::Pending
        } else {
            ActionState::CommittedPendingMerge
        };
    }
}

fn step_type(kind: StepKind) -> ActionType {
    match kind {
        StepKind::Insert => ActionType::Insert,
        StepKind::Delete => ActionType::Delete,
    }
}
