//! Target table stores.
//!
//! The engine only needs four calls from a store, captured by [`TableStore`].
//! Two implementations ship with the crate: an in-memory store and a
//! directory-backed store writing one CSV data file plus a YAML schema sidecar
//! per table (`<root>/<db>/<table>.csv` and `<table>.schema.yaml`).

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    data::Value,
    error::{IngestError, IngestResult},
    schema::ColumnDescriptor,
};

/// A row the store refused, by position in the inserted batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedRow {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InsertReport {
    pub written: usize,
    pub rejected: Vec<RejectedRow>,
}

pub trait TableStore: Send + Sync {
    fn exists(&self, db: &str, table: &str) -> IngestResult<bool>;
    fn schema(&self, db: &str, table: &str) -> IngestResult<Vec<ColumnDescriptor>>;
    fn create(&self, db: &str, table: &str, columns: &[ColumnDescriptor]) -> IngestResult<()>;
    /// Inserts what it can; rows it refuses are reported, not raised.
    fn insert(&self, db: &str, table: &str, rows: &[Vec<Value>]) -> IngestResult<InsertReport>;
}

/// Width and nullability checks shared by the bundled stores.
fn check_row(columns: &[ColumnDescriptor], row: &[Value]) -> Result<(), String> {
    if row.len() != columns.len() {
        return Err(format!(
            "row has {} value(s) but the table has {} column(s)",
            row.len(),
            columns.len()
        ));
    }
    match columns
        .iter()
        .zip(row)
        .find(|(column, value)| !column.nullable && value.is_null())
    {
        Some((column, _)) => Err(format!("column '{}' does not accept null", column.name)),
        None => Ok(()),
    }
}

fn check_identifier(kind: &str, value: &str) -> IngestResult<()> {
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(IngestError::InvalidRequest(format!(
            "{kind} name '{value}' may only contain letters, digits, '_' and '-'"
        )))
    }
}

#[derive(Debug, Default)]
struct MemoryTable {
    columns: Vec<ColumnDescriptor>,
    rows: Vec<Vec<Value>>,
}

#[derive(Debug, Default)]
pub struct MemoryTableStore {
    tables: Mutex<BTreeMap<(String, String), MemoryTable>>,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(
        &self,
    ) -> IngestResult<std::sync::MutexGuard<'_, BTreeMap<(String, String), MemoryTable>>> {
        self.tables
            .lock()
            .map_err(|_| IngestError::Store("table store lock poisoned".to_string()))
    }

    /// Snapshot of a table's rows.
    pub fn rows(&self, db: &str, table: &str) -> IngestResult<Vec<Vec<Value>>> {
        let tables = self.lock()?;
        tables
            .get(&(db.to_string(), table.to_string()))
            .map(|t| t.rows.clone())
            .ok_or_else(|| missing(db, table))
    }
}

fn missing(db: &str, table: &str) -> IngestError {
    IngestError::TableMissing {
        db: db.to_string(),
        table: table.to_string(),
    }
}

impl TableStore for MemoryTableStore {
    fn exists(&self, db: &str, table: &str) -> IngestResult<bool> {
        Ok(self.lock()?.contains_key(&(db.to_string(), table.to_string())))
    }

    fn schema(&self, db: &str, table: &str) -> IngestResult<Vec<ColumnDescriptor>> {
        let tables = self.lock()?;
        tables
            .get(&(db.to_string(), table.to_string()))
            .map(|t| t.columns.clone())
            .ok_or_else(|| missing(db, table))
    }

    fn create(&self, db: &str, table: &str, columns: &[ColumnDescriptor]) -> IngestResult<()> {
        let mut tables = self.lock()?;
        let key = (db.to_string(), table.to_string());
        if tables.contains_key(&key) {
            return Err(IngestError::TableExists {
                db: db.to_string(),
                table: table.to_string(),
            });
        }
        tables.insert(
            key,
            MemoryTable {
                columns: columns.to_vec(),
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    fn insert(&self, db: &str, table: &str, rows: &[Vec<Value>]) -> IngestResult<InsertReport> {
        let mut tables = self.lock()?;
        let target = tables
            .get_mut(&(db.to_string(), table.to_string()))
            .ok_or_else(|| missing(db, table))?;
        let mut report = InsertReport::default();
        for (index, row) in rows.iter().enumerate() {
            match check_row(&target.columns, row) {
                Ok(()) => {
                    target.rows.push(row.clone());
                    report.written += 1;
                }
                Err(reason) => report.rejected.push(RejectedRow { index, reason }),
            }
        }
        Ok(report)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TableSchemaFile {
    columns: Vec<ColumnDescriptor>,
}

/// Directory-backed store; every table is a headed CSV file.
#[derive(Debug, Clone)]
pub struct CsvTableStore {
    root: PathBuf,
}

impl CsvTableStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn table_paths(&self, db: &str, table: &str) -> IngestResult<(PathBuf, PathBuf)> {
        check_identifier("database", db)?;
        check_identifier("table", table)?;
        let dir = self.root.join(db);
        Ok((
            dir.join(format!("{table}.csv")),
            dir.join(format!("{table}.schema.yaml")),
        ))
    }

    pub fn data_path(&self, db: &str, table: &str) -> IngestResult<PathBuf> {
        Ok(self.table_paths(db, table)?.0)
    }
}

fn store_err(path: &Path, err: impl std::fmt::Display) -> IngestError {
    IngestError::Store(format!("{}: {err}", path.display()))
}

impl TableStore for CsvTableStore {
    fn exists(&self, db: &str, table: &str) -> IngestResult<bool> {
        let (_, schema_path) = self.table_paths(db, table)?;
        Ok(schema_path.is_file())
    }

    fn schema(&self, db: &str, table: &str) -> IngestResult<Vec<ColumnDescriptor>> {
        let (_, schema_path) = self.table_paths(db, table)?;
        if !schema_path.is_file() {
            return Err(missing(db, table));
        }
        let file = File::open(&schema_path).map_err(|err| store_err(&schema_path, err))?;
        let parsed: TableSchemaFile = serde_yaml::from_reader(BufReader::new(file))
            .map_err(|err| store_err(&schema_path, err))?;
        Ok(parsed.columns)
    }

    fn create(&self, db: &str, table: &str, columns: &[ColumnDescriptor]) -> IngestResult<()> {
        let (data_path, schema_path) = self.table_paths(db, table)?;
        if schema_path.exists() {
            return Err(IngestError::TableExists {
                db: db.to_string(),
                table: table.to_string(),
            });
        }
        if let Some(dir) = schema_path.parent() {
            fs::create_dir_all(dir).map_err(|err| store_err(dir, err))?;
        }

        let mut writer = csv::Writer::from_path(&data_path).map_err(|err| store_err(&data_path, err))?;
        writer
            .write_record(columns.iter().map(|c| c.name.as_str()))
            .map_err(|err| store_err(&data_path, err))?;
        writer.flush().map_err(|err| store_err(&data_path, err))?;

        let file = File::create(&schema_path).map_err(|err| store_err(&schema_path, err))?;
        let sidecar = TableSchemaFile {
            columns: columns.to_vec(),
        };
        serde_yaml::to_writer(file, &sidecar).map_err(|err| store_err(&schema_path, err))?;
        debug!("Created table {db}.{table} at {:?}", data_path);
        Ok(())
    }

    fn insert(&self, db: &str, table: &str, rows: &[Vec<Value>]) -> IngestResult<InsertReport> {
        let columns = self.schema(db, table)?;
        let (data_path, _) = self.table_paths(db, table)?;
        let file = OpenOptions::new()
            .append(true)
            .open(&data_path)
            .map_err(|err| store_err(&data_path, err))?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);

        let mut report = InsertReport::default();
        for (index, row) in rows.iter().enumerate() {
            if let Err(reason) = check_row(&columns, row) {
                report.rejected.push(RejectedRow { index, reason });
                continue;
            }
            writer
                .write_record(row.iter().map(Value::as_display))
                .map_err(|err| store_err(&data_path, err))?;
            report.written += 1;
        }
        writer.flush().map_err(|err| store_err(&data_path, err))?;
        Ok(report)
    }
}
