use serde::Deserialize;
use crate::error::AppError;
use crate::models::{CellValue, PreviewSummary, StagedRow};
use crate::services::duplicate_resolver::{classify, summarize, CatalogSnapshot, Preview};
use crate::services::excel::utils::normalize_name;

/// Field values staged on the row under edit; absent fields stay as they are.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RowPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<CellValue>,
    pub quantity: Option<CellValue>,
}

#[derive(Debug, Clone)]
struct EditTransaction {
    temp_id: u32,
    before: StagedRow,
}

/// Editable staging area of one session. Counters are never stored: every
/// summary is recomputed from the rows currently staged.
#[derive(Debug, Clone)]
pub struct PreviewStore {
    original: Vec<StagedRow>,
    rows: Vec<StagedRow>,
    columns: Vec<String>,
    snapshot: CatalogSnapshot,
    editing: Option<EditTransaction>,
}

impl PreviewStore {
    pub fn new(preview: Preview, snapshot: CatalogSnapshot) -> Self {
        Self {
            original: preview.rows.clone(),
            rows: preview.rows,
            columns: preview.columns,
            snapshot,
            editing: None,
        }
    }

    pub fn rows(&self) -> &[StagedRow] {
        &self.rows
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn summary(&self) -> PreviewSummary {
        summarize(&self.rows)
    }

    pub fn editing(&self) -> Option<u32> {
        self.editing.as_ref().map(|tx| tx.temp_id)
    }

    fn position(&self, temp_id: u32) -> Result<usize, AppError> {
        self.rows
            .iter()
            .position(|row| row.temp_id == temp_id)
            .ok_or_else(|| AppError::NotFound(format!("row {} is not staged", temp_id)))
    }

    pub fn start_edit(&mut self, temp_id: u32) -> Result<&StagedRow, AppError> {
        let idx = self.position(temp_id)?;
        match self.editing() {
            Some(current) if current != temp_id => {
                return Err(AppError::InvalidInput(format!(
                    "row {} is already being edited",
                    current
                )));
            }
            Some(_) => {}
            None => {
                self.editing = Some(EditTransaction {
                    temp_id,
                    before: self.rows[idx].clone(),
                });
            }
        }
        Ok(&self.rows[idx])
    }

    pub fn update_edit(&mut self, patch: RowPatch) -> Result<&StagedRow, AppError> {
        let temp_id = self.require_edit()?;
        let idx = self.position(temp_id)?;
        let row = &mut self.rows[idx];

        if let Some(name) = patch.name {
            row.name = name;
        }
        if let Some(description) = patch.description {
            row.description = description;
        }
        if let Some(price) = patch.price {
            row.price = Some(price);
        }
        if let Some(quantity) = patch.quantity {
            row.quantity = Some(quantity);
        }
        Ok(&self.rows[idx])
    }

    pub fn cancel_edit(&mut self) -> Result<&StagedRow, AppError> {
        self.require_edit()?;
        let tx = self.editing.take().ok_or_else(|| AppError::Internal("edit vanished".into()))?;
        let idx = self.position(tx.temp_id)?;
        self.rows[idx] = tx.before;
        Ok(&self.rows[idx])
    }

    /// Keeps the edited values. The row is reclassified only when its name
    /// (the duplicate key) changed; other fixes wait for `reclassify_all`.
    pub fn save_edit(&mut self) -> Result<&StagedRow, AppError> {
        self.require_edit()?;
        let tx = self.editing.take().ok_or_else(|| AppError::Internal("edit vanished".into()))?;
        let idx = self.position(tx.temp_id)?;

        if normalize_name(&self.rows[idx].name) != normalize_name(&tx.before.name) {
            classify(&mut self.rows[idx], &self.snapshot);
            tracing::debug!("Row {} renamed, reclassified as {:?}", tx.temp_id, self.rows[idx].status);
        }
        Ok(&self.rows[idx])
    }

    pub fn delete_row(&mut self, temp_id: u32) -> Result<StagedRow, AppError> {
        let idx = self.position(temp_id)?;
        if self.editing() == Some(temp_id) {
            self.editing = None;
        }
        Ok(self.rows.remove(idx))
    }

    pub fn reclassify_all(&mut self) -> Result<PreviewSummary, AppError> {
        if let Some(temp_id) = self.editing() {
            return Err(AppError::InvalidInput(format!(
                "finish editing row {} first",
                temp_id
            )));
        }
        for row in &mut self.rows {
            classify(row, &self.snapshot);
        }
        Ok(self.summary())
    }

    pub fn reset_to_original(&mut self) {
        self.rows = self.original.clone();
        self.editing = None;
    }

    /// Rows as they stand for a commit; an unsaved edit is not included.
    pub fn rows_for_commit(&self) -> Vec<StagedRow> {
        let mut rows = self.rows.clone();
        if let Some(tx) = &self.editing {
            if let Some(row) = rows.iter_mut().find(|row| row.temp_id == tx.temp_id) {
                *row = tx.before.clone();
            }
        }
        rows
    }

    fn require_edit(&self) -> Result<u32, AppError> {
        self.editing()
            .ok_or_else(|| AppError::InvalidInput("no row is being edited".to_string()))
    }
}
