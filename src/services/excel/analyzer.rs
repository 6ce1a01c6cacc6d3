use super::types::*;
use super::utils::*;
use std::collections::HashMap;
use smallvec::SmallVec;
use rayon::prelude::*;
use crate::error::AppError;
use crate::models::{SheetMetadata, WorkbookAnalysis, REQUIRED_COLUMNS};

const ACCEPTED_EXTENSIONS: [&str; 2] = ["xls", "xlsx"];

pub struct WorkbookAnalyzer {
    max_file_size: usize,
}

impl WorkbookAnalyzer {
    pub fn new(max_file_size: usize) -> Self {
        Self { max_file_size }
    }

    /// Fails fast on extension and size, before any byte is decoded.
    pub fn validate(&self, file_name: &str, size: usize) -> Result<(), AppError> {
        let extension = std::path::Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
            .unwrap_or_default();

        if !ACCEPTED_EXTENSIONS.contains(&extension.as_str()) {
            tracing::warn!("Rejected upload {}: unsupported extension", file_name);
            return Err(AppError::FormatError(format!(
                "'{}' must be an .xls or .xlsx file",
                file_name
            )));
        }

        if size > self.max_file_size {
            tracing::warn!("Rejected upload {}: {} bytes over limit", file_name, size);
            return Err(AppError::SizeLimitError {
                size,
                limit: self.max_file_size,
            });
        }

        Ok(())
    }

    pub fn analyze(&self, workbook: &DecodedWorkbook) -> WorkbookAnalysis {
        let start = std::time::Instant::now();

        let sheets: Vec<SheetMetadata> = workbook
            .sheets
            .par_iter()
            .map(analyze_sheet)
            .collect();

        let valid_sheets: Vec<String> = sheets
            .iter()
            .filter(|sheet| sheet.is_valid)
            .map(|sheet| sheet.name.clone())
            .collect();

        // A single valid sheet is selected for the operator
        let selected_sheet = match valid_sheets.as_slice() {
            [only] => Some(only.clone()),
            _ => None,
        };

        tracing::info!(
            "Analyzed {} sheets in {:?}, {} valid",
            sheets.len(),
            start.elapsed(),
            valid_sheets.len()
        );

        WorkbookAnalysis {
            total_sheets: sheets.len(),
            sheets,
            selected_sheet,
            valid_sheets,
        }
    }
}

/// Problems that make a sheet unusable for import.
pub fn schema_errors(sheet: &DecodedSheet) -> Vec<String> {
    let (_, repeated) = unique_column_names(&sheet.headers);
    let mut errors = Vec::new();

    let missing: SmallVec<[&str; 4]> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|column| sheet.column_index(column).is_none())
        .collect();

    if !missing.is_empty() {
        errors.push(format!("Missing required columns: {}", missing.join(", ")));
    }

    for column in repeated
        .iter()
        .filter(|column| REQUIRED_COLUMNS.contains(&column.as_str()))
    {
        errors.push(format!("Column '{}' appears more than once", column));
    }

    errors
}

pub fn analyze_sheet(sheet: &DecodedSheet) -> SheetMetadata {
    let errors = schema_errors(sheet);
    let warnings = if errors.is_empty() { row_warnings(sheet) } else { Vec::new() };

    SheetMetadata {
        name: sheet.name.clone(),
        rows: sheet.rows.len(),
        columns: sheet.columns(),
        is_valid: errors.is_empty(),
        errors,
        warnings,
    }
}

/// Non-blocking findings; the rows involved still reach the preview.
fn row_warnings(sheet: &DecodedSheet) -> Vec<String> {
    let name_idx = sheet.column_index("name");
    let price_idx = sheet.column_index("price");
    let quantity_idx = sheet.column_index("quantity");

    let mut bad_prices = 0;
    let mut bad_quantities = 0;
    let mut seen: HashMap<String, usize> = HashMap::new();

    for row in &sheet.rows {
        if parse_price(cell_value(&sheet.cell(row, price_idx)).as_ref()).is_err() {
            bad_prices += 1;
        }
        if parse_quantity(cell_value(&sheet.cell(row, quantity_idx)).as_ref()).is_err() {
            bad_quantities += 1;
        }
        let name = normalize_name(&cell_text(&sheet.cell(row, name_idx)));
        if !name.is_empty() {
            *seen.entry(name).or_default() += 1;
        }
    }

    let repeated_names = seen.values().filter(|count| **count > 1).count();

    let mut warnings = Vec::new();
    if bad_prices > 0 {
        warnings.push(format!("{} rows have an invalid price", bad_prices));
    }
    if bad_quantities > 0 {
        warnings.push(format!("{} rows have an invalid quantity", bad_quantities));
    }
    if repeated_names > 0 {
        warnings.push(format!("{} names appear more than once in the sheet", repeated_names));
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use calamine::Data;

    fn sheet(name: &str, headers: &[&str], rows: Vec<Vec<Data>>) -> DecodedSheet {
        DecodedSheet {
            name: name.to_string(),
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows,
        }
    }

    fn text(s: &str) -> Data {
        Data::String(s.to_string())
    }

    #[test]
    fn rejects_wrong_extension_before_size() {
        let analyzer = WorkbookAnalyzer::new(10);
        assert!(matches!(
            analyzer.validate("stock.csv", 1_000),
            Err(AppError::FormatError(_))
        ));
        assert!(analyzer.validate("Stock.XLSX", 10).is_ok());
        assert!(analyzer.validate("legacy.xls", 1).is_ok());
    }

    #[test]
    fn rejects_files_over_the_limit() {
        let analyzer = WorkbookAnalyzer::new(10 * 1024 * 1024);
        let result = analyzer.validate("stock.xlsx", 10 * 1024 * 1024 + 1);
        assert!(matches!(result, Err(AppError::SizeLimitError { .. })));
    }

    #[test]
    fn headers_match_case_insensitively() {
        let meta = analyze_sheet(&sheet("S", &["NAME", " Description", "Price ", "quantity"], vec![]));
        assert!(meta.is_valid);
        assert_eq!(meta.rows, 0);
        assert_eq!(meta.columns, vec!["name", "description", "price", "quantity"]);
    }

    #[test]
    fn missing_columns_are_listed() {
        let meta = analyze_sheet(&sheet("S", &["name", "price"], vec![vec![text("x"), Data::Float(1.0)]]));
        assert!(!meta.is_valid);
        assert_eq!(meta.errors, vec!["Missing required columns: description, quantity"]);
    }

    #[test]
    fn repeated_required_column_is_malformed() {
        let meta = analyze_sheet(&sheet(
            "S",
            &["name", "description", "price", "Price", "quantity"],
            vec![],
        ));
        assert!(!meta.is_valid);
        assert_eq!(meta.errors, vec!["Column 'price' appears more than once"]);
    }

    #[test]
    fn warnings_count_bad_values_and_repeats() {
        let rows = vec![
            vec![text("Bolt"), text("a"), Data::Float(1.0), Data::Float(2.0)],
            vec![text("bolt "), text("b"), text("abc"), Data::Float(2.0)],
            vec![text("Nut"), text("c"), Data::Float(1.0), Data::Float(2.5)],
        ];
        let meta = analyze_sheet(&sheet("S", &["name", "description", "price", "quantity"], rows));

        assert!(meta.is_valid);
        assert_eq!(
            meta.warnings,
            vec![
                "1 rows have an invalid price",
                "1 rows have an invalid quantity",
                "1 names appear more than once in the sheet",
            ]
        );
    }

    #[test]
    fn single_valid_sheet_is_selected() {
        let workbook = DecodedWorkbook {
            sheets: vec![
                sheet("Notes", &["text"], vec![]),
                sheet("Stock", &["name", "description", "price", "quantity"], vec![]),
            ],
        };
        let analysis = WorkbookAnalyzer::new(1024).analyze(&workbook);

        assert_eq!(analysis.total_sheets, 2);
        assert_eq!(analysis.selected_sheet.as_deref(), Some("Stock"));
        assert_eq!(analysis.valid_sheets, vec!["Stock"]);
        assert_eq!(analysis.sheets[0].name, "Notes");
    }
}
