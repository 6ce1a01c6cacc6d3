use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Columns every importable sheet must carry, in normalized form.
pub const REQUIRED_COLUMNS: [&str; 4] = ["name", "description", "price", "quantity"];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetMetadata {
    pub name: String,
    pub rows: usize,
    pub columns: Vec<String>,
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkbookAnalysis {
    pub sheets: Vec<SheetMetadata>,
    pub total_sheets: usize,
    pub selected_sheet: Option<String>,
    pub valid_sheets: Vec<String>,
}

/// A raw price or quantity cell, kept as the operator typed it so that an
/// unparseable value can be shown and fixed in the preview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    New,
    Duplicate,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedRow {
    pub temp_id: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub price: Option<CellValue>,
    #[serde(default)]
    pub quantity: Option<CellValue>,
    pub status: RowStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_id: Option<i64>,
    /// The catalog entry as it looked when the row was classified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing: Option<CatalogEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateAction {
    #[default]
    Skip,
    Update,
    CreateNew,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub price: f64,
    pub quantity: i64,
}

/// Field values for a brand-new catalog entry.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryFields {
    pub name: String,
    pub description: String,
    pub price: f64,
    pub quantity: i64,
}

/// Fields overwritten on an existing entry; the name is never touched.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryUpdate {
    pub description: String,
    pub price: f64,
    pub quantity: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewSummary {
    pub total_rows: usize,
    pub has_duplicates: bool,
    pub duplicates_found: usize,
    pub new_products: usize,
    pub error_rows: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportStats {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors_count: usize,
}

impl ImportStats {
    pub fn processed(&self) -> usize {
        self.created + self.updated + self.skipped + self.errors_count
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Progress,
    Complete,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    #[serde(flatten)]
    pub stats: ImportStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub step: String,
    pub progress: u8,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<EventData>,
    #[serde(rename = "resumeToken", default, skip_serializing_if = "Option::is_none")]
    pub resume_token: Option<Uuid>,
}

impl ProgressEvent {
    pub fn progress(step: &str, progress: u8, message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Progress,
            step: step.to_string(),
            progress,
            message: message.into(),
            data: None,
            resume_token: None,
        }
    }

    pub fn complete(stats: ImportStats, errors: Vec<String>, message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Complete,
            step: "complete".to_string(),
            progress: 100,
            message: message.into(),
            data: Some(EventData { stats, errors: Some(errors) }),
            resume_token: None,
        }
    }

    pub fn error(step: &str, progress: u8, message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Error,
            step: step.to_string(),
            progress,
            message: message.into(),
            data: None,
            resume_token: None,
        }
    }

    pub fn with_stats(mut self, stats: ImportStats) -> Self {
        self.data = Some(EventData { stats, errors: None });
        self
    }

    pub fn with_token(mut self, token: Uuid) -> Self {
        self.resume_token = Some(token);
        self
    }
}

/// Commands a client sends over the progress channel.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientCommand {
    StartUpload {
        #[serde(default)]
        rows: Option<Vec<StagedRow>>,
        #[serde(rename = "duplicateAction", alias = "duplicate_action", default)]
        duplicate_action: DuplicateAction,
        #[serde(rename = "resumeToken", alias = "resume_token", default)]
        resume_token: Option<Uuid>,
    },
    Resume {
        #[serde(rename = "resumeToken", alias = "resume_token")]
        resume_token: Uuid,
    },
    Ping,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn start_upload_command_parses_wire_shape() {
        let raw = json!({
            "action": "start_upload",
            "duplicateAction": "create_new",
            "rows": [{
                "temp_id": 1,
                "name": "Bolt",
                "description": "steel",
                "price": 6,
                "quantity": "10",
                "status": "duplicate",
                "existing_id": 3
            }]
        });

        match serde_json::from_value::<ClientCommand>(raw).unwrap() {
            ClientCommand::StartUpload { rows, duplicate_action, resume_token } => {
                let rows = rows.unwrap();
                assert_eq!(duplicate_action, DuplicateAction::CreateNew);
                assert!(resume_token.is_none());
                assert_eq!(rows[0].price, Some(CellValue::Number(6.0)));
                assert_eq!(rows[0].quantity, Some(CellValue::Text("10".into())));
                assert_eq!(rows[0].existing_id, Some(3));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn legacy_duplicate_action_key_and_default() {
        let legacy: ClientCommand =
            serde_json::from_value(json!({"action": "start_upload", "duplicate_action": "update"})).unwrap();
        assert!(matches!(
            legacy,
            ClientCommand::StartUpload { duplicate_action: DuplicateAction::Update, .. }
        ));

        let bare: ClientCommand = serde_json::from_value(json!({"action": "start_upload"})).unwrap();
        assert!(matches!(
            bare,
            ClientCommand::StartUpload { duplicate_action: DuplicateAction::Skip, rows: None, .. }
        ));
    }

    #[test]
    fn complete_event_serializes_flat_stats() {
        let stats = ImportStats { created: 1, updated: 1, skipped: 0, errors_count: 1 };
        let event = ProgressEvent::complete(stats, vec!["Row 3: bad price".into()], "done");
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["type"], "complete");
        assert_eq!(value["progress"], 100);
        assert_eq!(value["data"]["errorsCount"], 1);
        assert_eq!(value["data"]["created"], 1);
        assert_eq!(value["data"]["errors"][0], "Row 3: bad price");
        assert!(value.get("resumeToken").is_none());
    }
}
