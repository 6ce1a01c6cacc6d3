use calamine::Data;
use super::utils::{normalize_header, unique_column_names};

/// One worksheet as handed over by the decoder: the raw header row and the
/// non-blank data rows below it, in sheet order.
#[derive(Debug, Clone, Default)]
pub struct DecodedSheet {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Data>>,
}

impl DecodedSheet {
    pub fn columns(&self) -> Vec<String> {
        unique_column_names(&self.headers).0
    }

    /// Index of the first header that normalizes to `column`.
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|header| normalize_header(header) == column)
    }

    pub fn cell(&self, row: &[Data], column: Option<usize>) -> Data {
        column
            .and_then(|idx| row.get(idx).cloned())
            .unwrap_or(Data::Empty)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DecodedWorkbook {
    pub sheets: Vec<DecodedSheet>,
}

impl DecodedWorkbook {
    pub fn sheet(&self, name: &str) -> Option<&DecodedSheet> {
        self.sheets.iter().find(|sheet| sheet.name == name)
    }
}
