use rusqlite::{params, Connection, OptionalExtension, Row};
use parking_lot::Mutex;
use crate::error::AppError;
use crate::models::{CatalogEntry, EntryFields, EntryUpdate};
use crate::services::excel::utils::normalize_name;
use tracing::{info, debug, error};

/// The inventory catalog as seen by the import pipeline. "Not found" is a
/// normal outcome everywhere: `find*` return `None`, `update` returns `false`.
pub trait CatalogStore: Send + Sync {
    fn create(&self, fields: &EntryFields) -> Result<i64, AppError>;
    fn update(&self, id: i64, fields: &EntryUpdate) -> Result<bool, AppError>;
    fn find(&self, id: i64) -> Result<Option<CatalogEntry>, AppError>;
    fn find_by_normalized_name(&self, name: &str) -> Result<Option<CatalogEntry>, AppError>;
    /// Every entry in catalog order (ascending id).
    fn entries(&self) -> Result<Vec<CatalogEntry>, AppError>;
}

pub struct SqliteCatalog {
    conn: Mutex<Connection>,
}

impl SqliteCatalog {
    pub fn open(path: &str) -> Result<Self, AppError> {
        info!("Opening catalog database at {}", path);
        let opened = if path == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(path)
        };
        let conn = opened.map_err(|e| {
            error!("Failed to open catalog database: {}", e);
            AppError::PersistenceError(e.to_string())
        })?;

        Self::from_connection(conn)
    }

    pub fn from_connection(conn: Connection) -> Result<Self, AppError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS products (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                description TEXT NOT NULL,
                price REAL NOT NULL,
                quantity INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )?;
        debug!("Catalog schema ready");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn map_entry(row: &Row<'_>) -> rusqlite::Result<CatalogEntry> {
        Ok(CatalogEntry {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            price: row.get(3)?,
            quantity: row.get(4)?,
        })
    }
}

impl CatalogStore for SqliteCatalog {
    fn create(&self, fields: &EntryFields) -> Result<i64, AppError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO products (name, description, price, quantity, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                fields.name,
                fields.description,
                fields.price,
                fields.quantity,
                chrono::Utc::now().to_rfc3339()
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!("Created catalog entry {} ({})", id, fields.name);
        Ok(id)
    }

    fn update(&self, id: i64, fields: &EntryUpdate) -> Result<bool, AppError> {
        let changed = self.conn.lock().execute(
            "UPDATE products SET description = ?1, price = ?2, quantity = ?3, updated_at = ?4
             WHERE id = ?5",
            params![
                fields.description,
                fields.price,
                fields.quantity,
                chrono::Utc::now().to_rfc3339(),
                id
            ],
        )?;
        debug!("Updated catalog entry {}: {} rows changed", id, changed);
        Ok(changed > 0)
    }

    fn find(&self, id: i64) -> Result<Option<CatalogEntry>, AppError> {
        let conn = self.conn.lock();
        let entry = conn
            .query_row(
                "SELECT id, name, description, price, quantity FROM products WHERE id = ?1",
                params![id],
                Self::map_entry,
            )
            .optional()?;
        Ok(entry)
    }

    fn find_by_normalized_name(&self, name: &str) -> Result<Option<CatalogEntry>, AppError> {
        // SQLite's lower()/trim() are ASCII-only, so matching happens here
        let key = normalize_name(name);
        Ok(self
            .entries()?
            .into_iter()
            .find(|entry| normalize_name(&entry.name) == key))
    }

    fn entries(&self) -> Result<Vec<CatalogEntry>, AppError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, description, price, quantity FROM products ORDER BY id",
        )?;
        let entries = stmt
            .query_map([], Self::map_entry)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

#[cfg(test)]
pub mod memory {
    use super::*;
    use std::collections::HashSet;

    /// Catalog double that lets tests mutate entries behind the pipeline's
    /// back and make writes fail for chosen names.
    #[derive(Default)]
    pub struct InMemoryCatalog {
        entries: Mutex<Vec<CatalogEntry>>,
        next_id: Mutex<i64>,
        failing_names: Mutex<HashSet<String>>,
        writes: Mutex<usize>,
    }

    impl InMemoryCatalog {
        pub fn with_entries(entries: Vec<CatalogEntry>) -> Self {
            let next_id = entries.iter().map(|e| e.id).max().unwrap_or(0);
            Self {
                entries: Mutex::new(entries),
                next_id: Mutex::new(next_id),
                ..Default::default()
            }
        }

        pub fn remove(&self, id: i64) {
            self.entries.lock().retain(|entry| entry.id != id);
        }

        pub fn fail_writes_for(&self, name: &str) {
            self.failing_names.lock().insert(normalize_name(name));
        }

        pub fn write_count(&self) -> usize {
            *self.writes.lock()
        }

        fn check_failure(&self, name: &str) -> Result<(), AppError> {
            if self.failing_names.lock().contains(&normalize_name(name)) {
                return Err(AppError::PersistenceError(format!("write rejected for '{}'", name)));
            }
            Ok(())
        }
    }

    impl CatalogStore for InMemoryCatalog {
        fn create(&self, fields: &EntryFields) -> Result<i64, AppError> {
            self.check_failure(&fields.name)?;
            let mut next_id = self.next_id.lock();
            *next_id += 1;
            self.entries.lock().push(CatalogEntry {
                id: *next_id,
                name: fields.name.clone(),
                description: fields.description.clone(),
                price: fields.price,
                quantity: fields.quantity,
            });
            *self.writes.lock() += 1;
            Ok(*next_id)
        }

        fn update(&self, id: i64, fields: &EntryUpdate) -> Result<bool, AppError> {
            let mut entries = self.entries.lock();
            let Some(entry) = entries.iter_mut().find(|entry| entry.id == id) else {
                return Ok(false);
            };
            self.check_failure(&entry.name)?;
            entry.description = fields.description.clone();
            entry.price = fields.price;
            entry.quantity = fields.quantity;
            *self.writes.lock() += 1;
            Ok(true)
        }

        fn find(&self, id: i64) -> Result<Option<CatalogEntry>, AppError> {
            Ok(self.entries.lock().iter().find(|entry| entry.id == id).cloned())
        }

        fn find_by_normalized_name(&self, name: &str) -> Result<Option<CatalogEntry>, AppError> {
            let key = normalize_name(name);
            Ok(self
                .entries
                .lock()
                .iter()
                .find(|entry| normalize_name(&entry.name) == key)
                .cloned())
        }

        fn entries(&self) -> Result<Vec<CatalogEntry>, AppError> {
            Ok(self.entries.lock().clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> SqliteCatalog {
        SqliteCatalog::open(":memory:").unwrap()
    }

    fn bolt() -> EntryFields {
        EntryFields {
            name: "Bolt".into(),
            description: "M6 steel".into(),
            price: 5.0,
            quantity: 100,
        }
    }

    #[test]
    fn create_then_find() {
        let catalog = catalog();
        let id = catalog.create(&bolt()).unwrap();

        let entry = catalog.find(id).unwrap().unwrap();
        assert_eq!(entry.name, "Bolt");
        assert_eq!(entry.quantity, 100);
        assert!(catalog.find(id + 1).unwrap().is_none());
    }

    #[test]
    fn update_keeps_name_and_reports_missing_ids() {
        let catalog = catalog();
        let id = catalog.create(&bolt()).unwrap();
        let update = EntryUpdate {
            description: "M6 zinc".into(),
            price: 6.0,
            quantity: 10,
        };

        assert!(catalog.update(id, &update).unwrap());
        assert!(!catalog.update(id + 42, &update).unwrap());

        let entry = catalog.find(id).unwrap().unwrap();
        assert_eq!(entry.name, "Bolt");
        assert_eq!(entry.price, 6.0);
        assert_eq!(entry.description, "M6 zinc");
    }

    #[test]
    fn name_lookup_is_normalized_and_takes_first_in_catalog_order() {
        let catalog = catalog();
        let first = catalog.create(&bolt()).unwrap();
        catalog
            .create(&EntryFields { name: "BOLT".into(), ..bolt() })
            .unwrap();

        let found = catalog.find_by_normalized_name("  bolt ").unwrap().unwrap();
        assert_eq!(found.id, first);
        assert!(catalog.find_by_normalized_name("washer").unwrap().is_none());
        assert_eq!(catalog.entries().unwrap().len(), 2);
    }
}
