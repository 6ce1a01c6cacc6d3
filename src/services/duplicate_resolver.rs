use std::collections::HashMap;
use crate::error::AppError;
use crate::models::{CatalogEntry, PreviewSummary, RowStatus, StagedRow};
use crate::services::excel::analyzer::schema_errors;
use crate::services::excel::DecodedSheet;
use crate::services::excel::utils::{cell_text, cell_value, normalize_name, parse_price, parse_quantity};

/// Point-in-time copy of the catalog used for classification. It may go stale
/// before commit; the orchestrator re-checks targets when it writes.
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    entries: Vec<CatalogEntry>,
    by_name: HashMap<String, usize>,
}

impl CatalogSnapshot {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        let mut by_name = HashMap::with_capacity(entries.len());
        for (idx, entry) in entries.iter().enumerate() {
            // first entry in catalog order wins when names collide
            by_name.entry(normalize_name(&entry.name)).or_insert(idx);
        }
        Self { entries, by_name }
    }

    pub fn lookup(&self, name: &str) -> Option<&CatalogEntry> {
        self.by_name
            .get(&normalize_name(name))
            .map(|idx| &self.entries[*idx])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Debug, Clone)]
pub struct Preview {
    pub rows: Vec<StagedRow>,
    pub columns: Vec<String>,
    pub summary: PreviewSummary,
}

pub fn build_preview(sheet: &DecodedSheet, snapshot: &CatalogSnapshot) -> Result<Preview, AppError> {
    let errors = schema_errors(sheet);
    if !errors.is_empty() {
        return Err(AppError::SchemaError(format!("{}: {}", sheet.name, errors.join("; "))));
    }

    let name_idx = sheet.column_index("name");
    let description_idx = sheet.column_index("description");
    let price_idx = sheet.column_index("price");
    let quantity_idx = sheet.column_index("quantity");

    let rows: Vec<StagedRow> = sheet
        .rows
        .iter()
        .enumerate()
        .map(|(idx, cells)| {
            let mut row = StagedRow {
                temp_id: idx as u32 + 1,
                name: cell_text(&sheet.cell(cells, name_idx)),
                description: cell_text(&sheet.cell(cells, description_idx)),
                price: cell_value(&sheet.cell(cells, price_idx)),
                quantity: cell_value(&sheet.cell(cells, quantity_idx)),
                status: RowStatus::New,
                existing_id: None,
                existing: None,
                errors: Vec::new(),
            };
            classify(&mut row, snapshot);
            row
        })
        .collect();

    let summary = summarize(&rows);
    tracing::info!(
        "Preview for sheet {}: {} rows, {} duplicates, {} new, {} errors (catalog: {} entries)",
        sheet.name,
        summary.total_rows,
        summary.duplicates_found,
        summary.new_products,
        summary.error_rows,
        snapshot.len()
    );

    Ok(Preview {
        rows,
        columns: sheet.columns(),
        summary,
    })
}

/// Sets status, catalog back-reference and row errors from the row's current
/// values. Value errors take precedence over a name match, but the match is kept.
pub fn classify(row: &mut StagedRow, snapshot: &CatalogSnapshot) {
    let mut errors = Vec::new();
    if row.name.trim().is_empty() {
        errors.push("name is empty".to_string());
    }
    if let Err(reason) = parse_price(row.price.as_ref()) {
        errors.push(reason);
    }
    if let Err(reason) = parse_quantity(row.quantity.as_ref()) {
        errors.push(reason);
    }

    let existing = if row.name.trim().is_empty() {
        None
    } else {
        snapshot.lookup(&row.name).cloned()
    };

    row.status = match (errors.is_empty(), existing.is_some()) {
        (false, _) => RowStatus::Error,
        (true, true) => RowStatus::Duplicate,
        (true, false) => RowStatus::New,
    };
    row.existing_id = existing.as_ref().map(|entry| entry.id);
    row.existing = existing;
    row.errors = errors;
}

pub fn summarize(rows: &[StagedRow]) -> PreviewSummary {
    let count = |status: RowStatus| rows.iter().filter(|row| row.status == status).count();
    let duplicates_found = count(RowStatus::Duplicate);

    PreviewSummary {
        total_rows: rows.len(),
        has_duplicates: duplicates_found > 0,
        duplicates_found,
        new_products: count(RowStatus::New),
        error_rows: count(RowStatus::Error),
    }
}

#[cfg(test)]
pub mod fixtures {
    use super::*;
    use calamine::Data;

    pub fn entry(id: i64, name: &str, price: f64, quantity: i64) -> CatalogEntry {
        CatalogEntry {
            id,
            name: name.to_string(),
            description: format!("{} (catalog)", name),
            price,
            quantity,
        }
    }

    /// Catalog holds Bolt; the sheet brings Bolt again, Nut and a bad Screw.
    pub fn bolt_nut_screw() -> (DecodedSheet, CatalogSnapshot) {
        let text = |s: &str| Data::String(s.to_string());
        let sheet = DecodedSheet {
            name: "Stock".into(),
            headers: vec!["Name".into(), "Description".into(), "Price".into(), "Quantity".into()],
            rows: vec![
                vec![text("Bolt"), text("M6 zinc"), Data::Float(6.0), Data::Float(10.0)],
                vec![text("Nut"), text("M6"), Data::Float(2.0), Data::Float(5.0)],
                vec![text("Screw"), text("wood"), text("abc"), Data::Float(3.0)],
            ],
        };
        (sheet, CatalogSnapshot::new(vec![entry(1, "Bolt", 5.0, 1)]))
    }
}
