pub mod analyzer;
pub mod decoder;
pub mod types;
pub mod utils;

pub use analyzer::WorkbookAnalyzer;
pub use types::{DecodedSheet, DecodedWorkbook};
