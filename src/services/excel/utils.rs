use std::collections::HashSet;
use calamine::Data;
use once_cell::sync::Lazy;
use regex::Regex;
use crate::models::CellValue;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

/// Header cells are matched case-insensitively with inner whitespace folded to `_`.
pub fn normalize_header(raw: &str) -> String {
    WHITESPACE
        .replace_all(raw.trim(), "_")
        .to_lowercase()
}

/// The duplicate key: surrounding whitespace is ignored, case is folded.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Normalizes a header row, suffixing repeats so every column name is unique.
/// Returns the names plus the normalized names that appeared more than once.
pub fn unique_column_names(headers: &[String]) -> (Vec<String>, Vec<String>) {
    let mut existing_names = HashSet::new();
    let mut repeated = Vec::new();

    let names = headers
        .iter()
        .enumerate()
        .map(|(idx, raw)| {
            let base_name = match normalize_header(raw) {
                name if name.is_empty() => format!("unnamed_{}", idx + 1),
                name => name,
            };

            // If the name already exists, add a numeric suffix
            let mut cleaned = base_name.clone();
            let mut counter = 1;
            while !existing_names.insert(cleaned.clone()) {
                cleaned = format!("{}_{}", base_name, counter);
                counter += 1;
            }
            if counter > 1 && !repeated.contains(&base_name) {
                repeated.push(base_name);
            }
            cleaned
        })
        .collect();

    (names, repeated)
}

pub fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        other => other.to_string().trim().to_string(),
    }
}

pub fn cell_value(cell: &Data) -> Option<CellValue> {
    match cell {
        Data::Empty => None,
        Data::Int(i) => Some(CellValue::Number(*i as f64)),
        Data::Float(f) => Some(CellValue::Number(*f)),
        Data::String(s) if s.trim().is_empty() => None,
        Data::String(s) => Some(CellValue::Text(s.clone())),
        other => Some(CellValue::Text(other.to_string())),
    }
}

pub fn is_blank_row(row: &[Data]) -> bool {
    row.iter().all(|cell| match cell {
        Data::Empty => true,
        Data::String(s) => s.trim().is_empty(),
        _ => false,
    })
}

/// Price must be a finite, non-negative number. A decimal comma is accepted.
pub fn parse_price(value: Option<&CellValue>) -> Result<f64, String> {
    let price = match value {
        None => return Err("price is empty".to_string()),
        Some(CellValue::Number(n)) => *n,
        Some(CellValue::Text(s)) => s
            .trim()
            .replace(',', ".")
            .parse::<f64>()
            .map_err(|_| format!("price '{}' is not a number", s.trim()))?,
    };

    if !price.is_finite() {
        return Err("price is not a finite number".to_string());
    }
    if price < 0.0 {
        return Err(format!("price {} is negative", price));
    }
    Ok(price)
}

/// Quantity must be a non-negative whole number; `3.0` is accepted, `3.5` is not.
pub fn parse_quantity(value: Option<&CellValue>) -> Result<i64, String> {
    let quantity = match value {
        None => return Err("quantity is empty".to_string()),
        Some(CellValue::Number(n)) => *n,
        Some(CellValue::Text(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("quantity '{}' is not a number", s.trim()))?,
    };

    if !quantity.is_finite() || quantity.fract() != 0.0 {
        return Err(format!("quantity {} is not a whole number", quantity));
    }
    if quantity < 0.0 {
        return Err(format!("quantity {} is negative", quantity));
    }
    if quantity > i64::MAX as f64 {
        return Err("quantity is too large".to_string());
    }
    Ok(quantity as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_fold_case_and_whitespace() {
        assert_eq!(normalize_header("  Unit  Price "), "unit_price");
        assert_eq!(normalize_header("NAME"), "name");
    }

    #[test]
    fn names_ignore_case_and_surrounding_whitespace() {
        assert_eq!(normalize_name("Widget "), normalize_name("widget"));
        assert_ne!(normalize_name("Wid get"), normalize_name("widget"));
    }

    #[test]
    fn repeated_headers_are_suffixed_and_reported() {
        let headers = vec!["Name".to_string(), "Price".into(), "price".into(), "".into()];
        let (names, repeated) = unique_column_names(&headers);
        assert_eq!(names, vec!["name", "price", "price_1", "unnamed_4"]);
        assert_eq!(repeated, vec!["price"]);
    }

    #[test]
    fn price_accepts_decimal_comma_and_rejects_garbage() {
        assert_eq!(parse_price(Some(&CellValue::Text("12,5".into()))), Ok(12.5));
        assert_eq!(parse_price(Some(&CellValue::Number(0.0))), Ok(0.0));
        assert!(parse_price(Some(&CellValue::Text("abc".into()))).is_err());
        assert!(parse_price(Some(&CellValue::Number(-1.0))).is_err());
        assert!(parse_price(None).is_err());
    }

    #[test]
    fn quantity_must_be_whole() {
        assert_eq!(parse_quantity(Some(&CellValue::Number(3.0))), Ok(3));
        assert_eq!(parse_quantity(Some(&CellValue::Text(" 7 ".into()))), Ok(7));
        assert!(parse_quantity(Some(&CellValue::Number(3.5))).is_err());
        assert!(parse_quantity(Some(&CellValue::Number(-2.0))).is_err());
    }

    #[test]
    fn cells_convert_to_raw_values() {
        assert_eq!(cell_value(&Data::Int(4)), Some(CellValue::Number(4.0)));
        assert_eq!(cell_value(&Data::String("  ".into())), None);
        assert_eq!(cell_value(&Data::Empty), None);
        assert_eq!(cell_text(&Data::String(" Bolt ".into())), "Bolt");
        assert!(is_blank_row(&[Data::Empty, Data::String(" ".into())]));
        assert!(!is_blank_row(&[Data::Empty, Data::Float(1.0)]));
    }
}
