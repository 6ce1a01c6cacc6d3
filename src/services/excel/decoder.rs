use super::types::{DecodedSheet, DecodedWorkbook};
use super::utils::{cell_text, is_blank_row};
use std::io::Cursor;
use bytes::Bytes;
use calamine::{open_workbook_auto_from_rs, Data, Range, Reader};
use crate::error::AppError;

/// Opens an xls/xlsx payload and flattens every worksheet into header + rows.
pub fn decode_workbook(file_data: Bytes) -> Result<DecodedWorkbook, AppError> {
    let start = std::time::Instant::now();
    let cursor = Cursor::new(file_data);

    let mut workbook = open_workbook_auto_from_rs(cursor)
        .map_err(|e| {
            tracing::error!("Failed to open workbook: {}", e);
            AppError::FormatError(format!("Failed to open Excel file: {}", e))
        })?;

    let sheet_names: Vec<String> = workbook.sheet_names().to_vec();
    tracing::info!("Found {} sheets: {:?}", sheet_names.len(), sheet_names);

    let mut sheets = Vec::with_capacity(sheet_names.len());
    for sheet_name in &sheet_names {
        match workbook.worksheet_range(sheet_name) {
            Ok(range) => sheets.push(decode_range(sheet_name, &range)),
            Err(e) => {
                // Chart sheets and other non-grid sheets still show up, just empty
                tracing::warn!("Failed to read worksheet {}: {}", sheet_name, e);
                sheets.push(DecodedSheet {
                    name: sheet_name.clone(),
                    ..Default::default()
                });
            }
        }
    }

    tracing::info!("Workbook decoded in {:?}", start.elapsed());
    Ok(DecodedWorkbook { sheets })
}

pub fn decode_range(name: &str, range: &Range<Data>) -> DecodedSheet {
    let mut rows = range.rows();

    let headers = rows
        .next()
        .map(|row| row.iter().map(cell_text).collect::<Vec<_>>())
        .unwrap_or_default();

    let rows: Vec<Vec<Data>> = rows
        .filter(|row| !is_blank_row(row))
        .map(|row| row.to_vec())
        .collect();

    tracing::debug!("Sheet {}: {} columns, {} data rows", name, headers.len(), rows.len());

    DecodedSheet {
        name: name.to_string(),
        headers,
        rows,
    }
}
