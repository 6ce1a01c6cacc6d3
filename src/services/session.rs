use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use parking_lot::Mutex;
use uuid::Uuid;
use tracing::{debug, info};
use crate::error::AppError;
use crate::models::{DuplicateAction, ImportStats, StagedRow, WorkbookAnalysis};
use crate::services::duplicate_resolver::{build_preview, CatalogSnapshot};
use crate::services::excel::DecodedWorkbook;
use crate::services::orchestrator::{CommitJournal, CommitPlan, CommitState};
use crate::services::preview_store::PreviewStore;
use crate::services::progress::EventHub;

pub type SharedSession = Arc<Mutex<ImportSession>>;

/// One uploaded file, the sheet picked from it, the staged rows and at most
/// one commit.
pub struct ImportSession {
    pub id: Uuid,
    file_name: Option<String>,
    workbook: Option<DecodedWorkbook>,
    analysis: Option<WorkbookAnalysis>,
    selected_sheet: Option<String>,
    store: Option<PreviewStore>,
    state: CommitState,
    journal: Option<Arc<Mutex<CommitJournal>>>,
    hub: Arc<EventHub>,
    last_active: Instant,
}

impl ImportSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            file_name: None,
            workbook: None,
            analysis: None,
            selected_sheet: None,
            store: None,
            state: CommitState::Idle,
            journal: None,
            hub: Arc::new(EventHub::default()),
            last_active: Instant::now(),
        }
    }

    pub fn from_upload(file_name: String, workbook: DecodedWorkbook, analysis: WorkbookAnalysis) -> Self {
        Self {
            file_name: Some(file_name),
            workbook: Some(workbook),
            analysis: Some(analysis),
            ..Self::new()
        }
    }

    pub fn state(&self) -> &CommitState {
        &self.state
    }

    pub fn hub(&self) -> Arc<EventHub> {
        self.hub.clone()
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    pub fn selected_sheet(&self) -> Option<&str> {
        self.selected_sheet.as_deref()
    }

    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    /// Builds the staged preview for a sheet. Without an explicit name the
    /// auto-selected sheet is used, then the first valid one.
    pub fn select_sheet(&mut self, requested: Option<&str>, snapshot: CatalogSnapshot) -> Result<&PreviewStore, AppError> {
        self.ensure_editable()?;
        let workbook = self
            .workbook
            .as_ref()
            .ok_or_else(|| AppError::InvalidInput("no file has been uploaded in this session".to_string()))?;

        let fallback = self.analysis.as_ref().and_then(|analysis| {
            analysis
                .selected_sheet
                .clone()
                .or_else(|| analysis.valid_sheets.first().cloned())
        });
        let sheet_name = requested
            .map(str::to_string)
            .or(fallback)
            .ok_or_else(|| AppError::SchemaError("the workbook has no valid sheet".to_string()))?;

        let sheet = workbook
            .sheet(&sheet_name)
            .ok_or_else(|| AppError::NotFound(format!("sheet '{}'", sheet_name)))?;
        let preview = build_preview(sheet, &snapshot)?;

        info!(
            "Session {}: sheet '{}' staged with {} rows ({} duplicates)",
            self.id, sheet_name, preview.summary.total_rows, preview.summary.duplicates_found
        );
        self.selected_sheet = Some(sheet_name);
        self.state = CommitState::AwaitingCommit;
        Ok(self.store.insert(PreviewStore::new(preview, snapshot)))
    }

    pub fn store(&self) -> Result<&PreviewStore, AppError> {
        self.store
            .as_ref()
            .ok_or_else(|| AppError::NotFound("no preview has been built in this session".to_string()))
    }

    pub fn store_mut(&mut self) -> Result<&mut PreviewStore, AppError> {
        self.ensure_editable()?;
        self.store
            .as_mut()
            .ok_or_else(|| AppError::NotFound("no preview has been built in this session".to_string()))
    }

    fn ensure_editable(&self) -> Result<(), AppError> {
        match &self.state {
            CommitState::Idle | CommitState::AwaitingCommit => Ok(()),
            CommitState::Committing { .. } => Err(AppError::ConcurrentCommitError),
            CommitState::Completed { .. } | CommitState::Failed { .. } => Err(AppError::InvalidInput(
                "this session has already been committed; upload a new file".to_string(),
            )),
        }
    }

    /// Admits a commit. A fresh one needs rows (given, or the staged ones);
    /// a token naming the session's finished commit re-runs it against its journal.
    pub fn begin_commit(
        &mut self,
        rows: Option<Vec<StagedRow>>,
        action: DuplicateAction,
        resume_token: Option<Uuid>,
    ) -> Result<CommitPlan, AppError> {
        if let CommitState::Committing { .. } = self.state {
            return Err(AppError::ConcurrentCommitError);
        }

        if let Some(requested) = resume_token {
            let journal = self
                .journal
                .clone()
                .filter(|journal| journal.lock().token == requested)
                .ok_or_else(|| AppError::InvalidInput(format!("unknown resume token {}", requested)))?;

            info!(
                "Session {}: re-running commit {} ({} rows already applied)",
                self.id,
                requested,
                journal.lock().applied()
            );
            self.state = CommitState::Committing { token: requested };
            self.hub.restart();
            return Ok(CommitPlan {
                token: requested,
                journal,
                hub: self.hub.clone(),
                resumed: true,
            });
        }

        self.ensure_editable()?;
        let rows = match rows {
            Some(rows) => rows,
            None => self.store()?.rows_for_commit(),
        };

        let token = Uuid::new_v4();
        let journal = Arc::new(Mutex::new(CommitJournal::new(token, rows, action)?));
        self.journal = Some(journal.clone());
        self.state = CommitState::Committing { token };
        self.hub.reset();
        self.touch();

        Ok(CommitPlan {
            token,
            journal,
            hub: self.hub.clone(),
            resumed: false,
        })
    }

    pub fn complete_commit(&mut self, token: Uuid, stats: ImportStats) {
        debug!("Session {}: commit {} completed", self.id, token);
        self.state = CommitState::Completed { token, stats };
        self.touch();
    }

    pub fn fail_commit(&mut self, token: Uuid, reason: String) {
        debug!("Session {}: commit {} failed: {}", self.id, token, reason);
        self.state = CommitState::Failed { token, reason };
        self.touch();
    }

    fn is_detached(&self) -> bool {
        !matches!(self.state, CommitState::Committing { .. }) && !self.hub.has_subscribers()
    }
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<Uuid, SharedSession>>,
}

impl SessionRegistry {
    pub fn insert(&self, session: ImportSession) -> SharedSession {
        let id = session.id;
        let shared = Arc::new(Mutex::new(session));
        self.sessions.lock().insert(id, shared.clone());
        info!("Session {} created", id);
        shared
    }

    pub fn get(&self, id: Uuid) -> Result<SharedSession, AppError> {
        let session = self
            .sessions
            .lock()
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("session {}", id)))?;
        session.lock().touch();
        Ok(session)
    }

    pub fn get_or_create(&self, id: Option<Uuid>) -> SharedSession {
        id.and_then(|id| self.get(id).ok())
            .unwrap_or_else(|| self.insert(ImportSession::new()))
    }

    /// A new upload replaces the session it names, unless that one is committing.
    pub fn replace(&self, id: Uuid) -> Result<(), AppError> {
        let mut sessions = self.sessions.lock();
        if let Some(existing) = sessions.get(&id) {
            if matches!(existing.lock().state(), CommitState::Committing { .. }) {
                return Err(AppError::ConcurrentCommitError);
            }
            sessions.remove(&id);
            info!("Session {} replaced by a new upload", id);
        }
        Ok(())
    }

    /// Called when a channel closes; the session goes once nothing needs it.
    pub fn release(&self, id: Uuid) {
        let mut sessions = self.sessions.lock();
        let detached = sessions
            .get(&id)
            .map(|session| session.lock().is_detached())
            .unwrap_or(false);
        if detached {
            sessions.remove(&id);
            info!("Session {} closed", id);
        }
    }

    pub fn reap_idle(&self, ttl: Duration) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, session| {
            let session = session.lock();
            !(session.is_detached() && session.last_active.elapsed() > ttl)
        });
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }
}
