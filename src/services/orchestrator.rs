use std::collections::HashMap;
use std::sync::Arc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;
use tracing::{debug, error, info, warn};
use crate::error::AppError;
use crate::models::{
    DuplicateAction, EntryFields, EntryUpdate, ImportStats, ProgressEvent, RowStatus, StagedRow,
};
use crate::services::catalog::CatalogStore;
use crate::services::excel::utils::{parse_price, parse_quantity};
use crate::services::progress::EventHub;
use crate::services::session::SharedSession;

/// Lifecycle of the single commit a session may carry.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitState {
    Idle,
    AwaitingCommit,
    Committing { token: Uuid },
    Completed { token: Uuid, stats: ImportStats },
    Failed { token: Uuid, reason: String },
}

impl CommitState {
    pub fn token(&self) -> Option<Uuid> {
        match self {
            CommitState::Committing { token }
            | CommitState::Completed { token, .. }
            | CommitState::Failed { token, .. } => Some(*token),
            CommitState::Idle | CommitState::AwaitingCommit => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CommitState::Idle => "idle",
            CommitState::AwaitingCommit => "awaiting_commit",
            CommitState::Committing { .. } => "committing",
            CommitState::Completed { .. } => "completed",
            CommitState::Failed { .. } => "failed",
        }
    }
}

/// What happened to one row. Recorded per `temp_id` so a re-run of the same
/// commit never applies a row twice.
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Created(i64),
    Updated(i64),
    Skipped,
    Failed(String),
}

impl RowOutcome {
    fn tally(&self, stats: &mut ImportStats, errors: &mut Vec<String>) {
        match self {
            RowOutcome::Created(_) => stats.created += 1,
            RowOutcome::Updated(_) => stats.updated += 1,
            RowOutcome::Skipped => stats.skipped += 1,
            RowOutcome::Failed(message) => {
                stats.errors_count += 1;
                errors.push(message.clone());
            }
        }
    }
}

#[derive(Debug)]
pub struct CommitJournal {
    pub token: Uuid,
    pub action: DuplicateAction,
    rows: Vec<StagedRow>,
    outcomes: HashMap<u32, RowOutcome>,
}

impl CommitJournal {
    /// Rows are ordered by `temp_id`; repeated ids are refused.
    pub fn new(token: Uuid, mut rows: Vec<StagedRow>, action: DuplicateAction) -> Result<Self, AppError> {
        if rows.is_empty() {
            return Err(AppError::InvalidInput("there are no rows to import".to_string()));
        }
        rows.sort_by_key(|row| row.temp_id);
        if let Some(pair) = rows.windows(2).find(|pair| pair[0].temp_id == pair[1].temp_id) {
            return Err(AppError::InvalidInput(format!(
                "temp_id {} appears more than once",
                pair[0].temp_id
            )));
        }
        Ok(Self {
            token,
            action,
            rows,
            outcomes: HashMap::new(),
        })
    }

    pub fn applied(&self) -> usize {
        self.outcomes.len()
    }
}

/// A commit that has been admitted by the session state machine.
pub struct CommitPlan {
    pub token: Uuid,
    pub journal: Arc<Mutex<CommitJournal>>,
    pub hub: Arc<EventHub>,
    pub resumed: bool,
}

#[derive(Clone)]
pub struct ImportOrchestrator {
    catalog: Arc<dyn CatalogStore>,
    batch_size: usize,
}

impl ImportOrchestrator {
    pub fn new(catalog: Arc<dyn CatalogStore>, batch_size: usize) -> Self {
        Self {
            catalog,
            batch_size: batch_size.max(1),
        }
    }

    /// Runs an admitted commit off the async runtime and settles the session
    /// state when it ends. Dropping the caller's connection does not stop it.
    pub fn spawn(&self, session: SharedSession, plan: CommitPlan) -> JoinHandle<()> {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            let token = plan.token;
            let hub = plan.hub.clone();
            let result = tokio::task::spawn_blocking(move || orchestrator.execute(&plan)).await;

            let mut session = session.lock();
            match result {
                Ok(stats) => session.complete_commit(token, stats),
                Err(e) => {
                    error!("Commit {} aborted: {}", token, e);
                    hub.emit(
                        ProgressEvent::error("failed", 0, format!("Import interrupted: {}", e))
                            .with_token(token),
                    );
                    session.fail_commit(token, e.to_string());
                }
            }
        })
    }

    /// Applies every row strictly in `temp_id` order, one at a time. Row-level
    /// failures are counted and the loop carries on.
    pub fn execute(&self, plan: &CommitPlan) -> ImportStats {
        let start = std::time::Instant::now();
        let (rows, action) = {
            let journal = plan.journal.lock();
            (journal.rows.clone(), journal.action)
        };
        let total = rows.len();
        let token = plan.token;

        info!(
            "Commit {} started: {} rows, action {:?}, resumed: {}",
            token, total, action, plan.resumed
        );
        plan.hub.emit(
            ProgressEvent::progress("start", 0, format!("Starting import of {} rows", total))
                .with_token(token),
        );

        let mut stats = ImportStats::default();
        let mut errors = Vec::new();

        for (idx, row) in rows.iter().enumerate() {
            let recorded = plan.journal.lock().outcomes.get(&row.temp_id).cloned();
            let outcome = match recorded {
                Some(outcome) => {
                    debug!("Row {} already applied, reusing outcome", row.temp_id);
                    outcome
                }
                None => {
                    let outcome = self.apply_row(row, action);
                    plan.journal.lock().outcomes.insert(row.temp_id, outcome.clone());
                    outcome
                }
            };
            outcome.tally(&mut stats, &mut errors);

            let processed = idx + 1;
            if processed % self.batch_size == 0 || processed == total {
                plan.hub.emit(
                    ProgressEvent::progress(
                        "processing",
                        percentage(processed, total),
                        format!("Processed {} of {} rows", processed, total),
                    )
                    .with_stats(stats)
                    .with_token(token),
                );
            }
        }

        info!(
            "Commit {} finished in {:?}: {} created, {} updated, {} skipped, {} errors",
            token,
            start.elapsed(),
            stats.created,
            stats.updated,
            stats.skipped,
            stats.errors_count
        );
        plan.hub.emit(
            ProgressEvent::complete(stats, errors, "Import completed").with_token(token),
        );
        stats
    }

    fn apply_row(&self, row: &StagedRow, action: DuplicateAction) -> RowOutcome {
        let outcome = match (row.status, action) {
            (RowStatus::Error, _) => Err(row_error(row)),
            (RowStatus::New, _) | (RowStatus::Duplicate, DuplicateAction::CreateNew) => self.create(row),
            (RowStatus::Duplicate, DuplicateAction::Skip) => self.skip_existing(row),
            (RowStatus::Duplicate, DuplicateAction::Update) => self.update_existing(row),
        };

        outcome.unwrap_or_else(|err| {
            warn!("{}", err);
            RowOutcome::Failed(row_message(row.temp_id, &err))
        })
    }

    fn create(&self, row: &StagedRow) -> Result<RowOutcome, AppError> {
        let (price, quantity) = coerce_values(row)?;
        let id = self.catalog.create(&EntryFields {
            name: row.name.trim().to_string(),
            description: row.description.trim().to_string(),
            price,
            quantity,
        })?;
        debug!("Row {} created as entry {}", row.temp_id, id);
        Ok(RowOutcome::Created(id))
    }

    /// The catalog entry a duplicate row points at, checked against the live
    /// catalog. A target deleted since classification is a row error.
    fn resolve_target(&self, row: &StagedRow) -> Result<i64, AppError> {
        // rows sent back by a client may have lost the reference; match by name again
        let existing_id = match row.existing_id {
            Some(id) => id,
            None => self
                .catalog
                .find_by_normalized_name(&row.name)?
                .map(|entry| entry.id)
                .ok_or_else(|| AppError::DuplicateTargetUnmatchedError {
                    temp_id: row.temp_id,
                    name: row.name.trim().to_string(),
                })?,
        };
        if self.catalog.find(existing_id)?.is_none() {
            return Err(AppError::DuplicateTargetMissingError {
                temp_id: row.temp_id,
                existing_id,
            });
        }
        Ok(existing_id)
    }

    fn skip_existing(&self, row: &StagedRow) -> Result<RowOutcome, AppError> {
        let existing_id = self.resolve_target(row)?;
        debug!("Row {} skipped, entry {} left as is", row.temp_id, existing_id);
        Ok(RowOutcome::Skipped)
    }

    fn update_existing(&self, row: &StagedRow) -> Result<RowOutcome, AppError> {
        let (price, quantity) = coerce_values(row)?;
        let existing_id = self.resolve_target(row)?;

        let update = EntryUpdate {
            description: row.description.trim().to_string(),
            price,
            quantity,
        };
        if !self.catalog.update(existing_id, &update)? {
            return Err(AppError::DuplicateTargetMissingError {
                temp_id: row.temp_id,
                existing_id,
            });
        }
        debug!("Row {} updated entry {}", row.temp_id, existing_id);
        Ok(RowOutcome::Updated(existing_id))
    }
}

fn percentage(processed: usize, total: usize) -> u8 {
    (processed * 100 / total.max(1)).min(100) as u8
}

fn coerce_values(row: &StagedRow) -> Result<(f64, i64), AppError> {
    let coercion = |reason| AppError::RowCoercionError {
        temp_id: row.temp_id,
        reason,
    };
    if row.name.trim().is_empty() {
        return Err(coercion("name is empty".to_string()));
    }
    let price = parse_price(row.price.as_ref()).map_err(coercion)?;
    let quantity = parse_quantity(row.quantity.as_ref()).map_err(coercion)?;
    Ok((price, quantity))
}

fn row_error(row: &StagedRow) -> AppError {
    let reason = if row.errors.is_empty() {
        "row was classified as invalid".to_string()
    } else {
        row.errors.join("; ")
    };
    AppError::RowCoercionError {
        temp_id: row.temp_id,
        reason,
    }
}

/// Row errors already name their row; anything else gets the row prefixed.
fn row_message(temp_id: u32, err: &AppError) -> String {
    match err {
        AppError::RowCoercionError { .. }
        | AppError::DuplicateTargetMissingError { .. }
        | AppError::DuplicateTargetUnmatchedError { .. } => err.to_string(),
        other => format!("Row {}: {}", temp_id, other),
    }
}
