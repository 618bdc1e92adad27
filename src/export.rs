//! Bulk export: discover every file's schema, merge them, resolve the target
//! table and stream converted rows into it.
//!
//! A job moves through `received → schemas-merged → table-resolved →
//! rows-writing` and ends `completed`, `aborted` or `cancelled`. Only request
//! validation surfaces as `Err`; everything that goes wrong after that is
//! reported inside the returned [`ExportOutcome`].

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use log::{debug, info, warn};
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    cancel::CancelToken,
    config::EngineConfig,
    error::{IngestError, IngestResult},
    mapper::{ColumnMapper, ColumnMapping, MatchOptions, Mismatch, RowConverter, RowError},
    merge::{Conflict, MergePolicy, MergedSchema, SourceAssignment, merge_schemas},
    reader::{self, ParseOptions, RowFault},
    schema::{ColumnDescriptor, FileSchema, infer_columns},
    source::{ByteSource, SourceFormat, TabularSource},
    store::TableStore,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    #[default]
    Create,
    Append,
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(Operation::Create),
            "append" => Ok(Operation::Append),
            other => Err(format!("unknown export operation '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportFile {
    pub id: String,
    #[serde(default)]
    pub sheet: Option<String>,
    #[serde(default)]
    pub force_delimited: bool,
}

impl ExportFile {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sheet: None,
            force_delimited: false,
        }
    }

    /// Parses `ID` or `ID:SHEET`. The sheet is whatever follows the last
    /// colon, provided it could be a sheet name; ids may contain colons.
    pub fn parse(spec: &str) -> Self {
        match spec.rsplit_once(':') {
            Some((id, sheet)) if !id.trim().is_empty() && is_sheet_name(sheet) => Self {
                sheet: Some(sheet.trim().to_string()),
                ..Self::new(id.trim())
            },
            Some((id, "")) if !id.trim().is_empty() => Self::new(id.trim()),
            _ => Self::new(spec.trim()),
        }
    }

    fn source(&self) -> TabularSource {
        TabularSource::new(self.id.clone()).with_sheet(self.sheet.clone())
    }
}

/// Characters a workbook refuses in sheet names.
const SHEET_NAME_FORBIDDEN: &[char] = &['/', '\\', '?', '*', '[', ']'];

fn is_sheet_name(value: &str) -> bool {
    !value.trim().is_empty() && !value.contains(SHEET_NAME_FORBIDDEN)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRequest {
    pub files: Vec<ExportFile>,
    pub database: String,
    pub table: String,
    #[serde(default)]
    pub operation: Operation,
    #[serde(default)]
    pub resolution: MergePolicy,
    #[serde(default = "default_max_row_errors")]
    pub max_row_errors: usize,
    #[serde(default)]
    pub stop_on_first_error: bool,
    #[serde(default)]
    pub strict_validation: bool,
}

fn default_max_row_errors() -> usize {
    100
}

impl ExportRequest {
    pub fn new(database: impl Into<String>, table: impl Into<String>, files: Vec<ExportFile>) -> Self {
        Self {
            files,
            database: database.into(),
            table: table.into(),
            operation: Operation::default(),
            resolution: MergePolicy::default(),
            max_row_errors: default_max_row_errors(),
            stop_on_first_error: false,
            strict_validation: false,
        }
    }

    pub fn validate(&self) -> IngestResult<()> {
        if self.database.trim().is_empty() {
            return Err(IngestError::InvalidRequest("database is required".into()));
        }
        if self.table.trim().is_empty() {
            return Err(IngestError::InvalidRequest("target table is required".into()));
        }
        if let Some(file) = self.files.iter().find(|f| f.id.trim().is_empty()) {
            return Err(IngestError::InvalidRequest(format!(
                "file entry with empty id (sheet: {:?})",
                file.sheet
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExportState {
    Received,
    SchemasMerged,
    TableResolved,
    RowsWriting,
    Completed,
    Aborted,
    Cancelled,
}

impl ExportState {
    pub fn as_str(self) -> &'static str {
        match self {
            ExportState::Received => "received",
            ExportState::SchemasMerged => "schemas-merged",
            ExportState::TableResolved => "table-resolved",
            ExportState::RowsWriting => "rows-writing",
            ExportState::Completed => "completed",
            ExportState::Aborted => "aborted",
            ExportState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExportState::Completed | ExportState::Aborted | ExportState::Cancelled
        )
    }
}

impl fmt::Display for ExportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// Schema discovered; rows not written (yet).
    Parsed,
    Written,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileResult {
    pub id: String,
    pub sheet: Option<String>,
    pub format: Option<SourceFormat>,
    pub status: FileStatus,
    pub columns: Vec<String>,
    pub rows_written: usize,
    pub rows_failed: usize,
    pub faults: usize,
    pub mismatches: Vec<Mismatch>,
    pub error: Option<String>,
}

impl FileResult {
    fn failed(file: &ExportFile, err: &IngestError) -> Self {
        Self {
            id: file.id.clone(),
            sheet: file.sheet.clone(),
            format: None,
            status: FileStatus::Failed,
            columns: Vec::new(),
            rows_written: 0,
            rows_failed: 0,
            faults: 0,
            mismatches: Vec::new(),
            error: Some(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportRowError {
    pub source_id: String,
    #[serde(flatten)]
    pub error: RowError,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportOutcome {
    pub job_id: Uuid,
    pub state: ExportState,
    pub abort_reason: Option<String>,
    pub rows_written: usize,
    pub rows_failed: usize,
    pub elapsed_ms: u64,
    pub files: Vec<FileResult>,
    pub mismatches: Vec<Mismatch>,
    pub conflicts: Vec<Conflict>,
    pub row_errors: Vec<ExportRowError>,
    pub table_columns: Vec<ColumnDescriptor>,
}

impl ExportOutcome {
    /// At least one row written, or nothing to do and nothing went wrong.
    pub fn success(&self) -> bool {
        self.rows_written > 0 || (self.row_errors.is_empty() && self.files.is_empty())
    }
}

/// A file whose schema was discovered and which will be written.
#[derive(Debug, Clone)]
struct Discovered {
    file: ExportFile,
    schema: FileSchema,
    format: SourceFormat,
    sheet: Option<String>,
}

/// Per-job bookkeeping, owned by the aggregating thread.
struct Job {
    outcome: ExportOutcome,
    started: Instant,
    max_row_errors: usize,
    stop_on_first_error: bool,
}

impl Job {
    fn new(request: &ExportRequest) -> Self {
        let outcome = ExportOutcome {
            job_id: Uuid::new_v4(),
            state: ExportState::Received,
            abort_reason: None,
            rows_written: 0,
            rows_failed: 0,
            elapsed_ms: 0,
            files: Vec::new(),
            mismatches: Vec::new(),
            conflicts: Vec::new(),
            row_errors: Vec::new(),
            table_columns: Vec::new(),
        };
        info!(
            "Export {} received: {} file(s) into {}.{} ({:?}, {})",
            outcome.job_id,
            request.files.len(),
            request.database,
            request.table,
            request.operation,
            request.resolution
        );
        Self {
            outcome,
            started: Instant::now(),
            max_row_errors: request.max_row_errors,
            stop_on_first_error: request.stop_on_first_error,
        }
    }

    fn transition(&mut self, next: ExportState) {
        info!(
            "Export {}: {} -> {}",
            self.outcome.job_id, self.outcome.state, next
        );
        self.outcome.state = next;
    }

    fn finish(mut self, state: ExportState, reason: Option<String>) -> ExportOutcome {
        if let Some(reason) = &reason {
            warn!("Export {} {}: {reason}", self.outcome.job_id, state);
        }
        self.transition(state);
        self.outcome.abort_reason = reason;
        self.outcome.elapsed_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            "Export {} finished: {} row(s) written, {} failed, {} row error(s)",
            self.outcome.job_id,
            self.outcome.rows_written,
            self.outcome.rows_failed,
            self.outcome.row_errors.len()
        );
        self.outcome
    }

    fn abort(self, reason: impl Into<String>) -> ExportOutcome {
        self.finish(ExportState::Aborted, Some(reason.into()))
    }

    fn cancel(self, err: &IngestError) -> ExportOutcome {
        self.finish(ExportState::Cancelled, Some(err.to_string()))
    }

    /// Records errors and reports whether the error budget is now exceeded.
    fn record_errors(&mut self, source_id: &str, errors: Vec<RowError>) -> Option<String> {
        self.outcome
            .row_errors
            .extend(errors.into_iter().map(|error| ExportRowError {
                source_id: source_id.to_string(),
                error,
            }));
        let total = self.outcome.row_errors.len();
        if self.stop_on_first_error && total > 0 {
            Some(format!("stopped on first row error in '{source_id}'"))
        } else if total > self.max_row_errors {
            Some(format!(
                "row error budget exceeded ({total} errors, max {})",
                self.max_row_errors
            ))
        } else {
            None
        }
    }
}

enum FileFlow {
    Continue,
    Halt(String),
    Cancelled(IngestError),
}

pub struct Exporter<'a> {
    bytes: &'a dyn ByteSource,
    store: &'a dyn TableStore,
    config: &'a EngineConfig,
    cancel: CancelToken,
}

impl<'a> Exporter<'a> {
    pub fn new(bytes: &'a dyn ByteSource, store: &'a dyn TableStore, config: &'a EngineConfig) -> Self {
        Self {
            bytes,
            store,
            config,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn run(&self, request: &ExportRequest) -> IngestResult<ExportOutcome> {
        request.validate()?;
        let mut job = Job::new(request);
        if request.files.is_empty() {
            info!("Export {} has no files; nothing to do", job.outcome.job_id);
            return Ok(job.finish(ExportState::Completed, None));
        }

        let mut parsed = Vec::new();
        for (file, result) in self.discover(&request.files)? {
            match result {
                Ok(discovered) => {
                    debug!(
                        "Discovered {} column(s) in '{}'",
                        discovered.schema.columns.len(),
                        file.id
                    );
                    let result_index = job.outcome.files.len();
                    job.outcome.files.push(FileResult {
                        id: file.id.clone(),
                        sheet: discovered.sheet.clone(),
                        format: Some(discovered.format),
                        status: FileStatus::Parsed,
                        columns: discovered.schema.columns.iter().map(|c| c.name.clone()).collect(),
                        rows_written: 0,
                        rows_failed: 0,
                        faults: 0,
                        mismatches: Vec::new(),
                        error: None,
                    });
                    parsed.push((result_index, discovered));
                }
                Err(err) if err.is_cancelled() => return Ok(job.cancel(&err)),
                Err(err) => {
                    warn!("Excluding '{}' from export: {err}", file.id);
                    job.outcome.files.push(FileResult::failed(&file, &err));
                }
            }
        }

        let schemas: Vec<FileSchema> = parsed.iter().map(|(_, d)| d.schema.clone()).collect();
        let merged = match merge_schemas(&schemas, request.resolution, self.config.max_edit_distance) {
            Ok(merged) => merged,
            Err(err) => return Ok(job.abort(err.to_string())),
        };
        job.outcome.conflicts = merged.conflicts.clone();
        job.transition(ExportState::SchemasMerged);
        if merged.requires_manual_resolution() {
            return Ok(job.abort(format!(
                "{} schema conflict(s) require manual resolution",
                merged.conflicts.len()
            )));
        }

        let (table_columns, live_mapping) = match self.resolve_table(request, &merged, &mut job) {
            Ok(resolved) => resolved,
            Err(reason) => return Ok(job.abort(reason)),
        };
        job.outcome.table_columns = table_columns.clone();
        job.transition(ExportState::TableResolved);

        job.transition(ExportState::RowsWriting);
        for ((result_index, discovered), assignment) in parsed.iter().zip(&merged.assignments) {
            if let Err(err) = self.cancel.check() {
                return Ok(job.cancel(&err));
            }
            let targets = route_to_table(&merged, assignment, live_mapping.as_ref(), &table_columns);
            match self.write_file(request, discovered, *result_index, &table_columns, &targets, &mut job) {
                FileFlow::Continue => {}
                FileFlow::Halt(reason) => return Ok(job.abort(reason)),
                FileFlow::Cancelled(err) => return Ok(job.cancel(&err)),
            }
        }
        Ok(job.finish(ExportState::Completed, None))
    }

    /// Schema discovery, up to `max_concurrent_files` files at a time. Results
    /// come back in request order.
    fn discover(
        &self,
        files: &[ExportFile],
    ) -> IngestResult<Vec<(ExportFile, IngestResult<Discovered>)>> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.config.max_concurrent_files.max(1))
            .build()
            .map_err(|err| IngestError::Config(format!("discovery pool: {err}")))?;
        let results = pool.install(|| {
            files
                .par_iter()
                .map(|file| (file.clone(), self.discover_file(file)))
                .collect::<Vec<_>>()
        });
        Ok(results)
    }

    fn discover_file(&self, file: &ExportFile) -> IngestResult<Discovered> {
        self.cancel.check()?;
        let options = ParseOptions {
            max_rows: Some(self.config.inference_sample_rows),
            force_delimited: file.force_delimited,
            ..ParseOptions::from_config(self.config)?
        };
        let (info, page) = reader::read_sample(self.bytes, &file.source(), &options)?;
        Ok(Discovered {
            file: file.clone(),
            schema: FileSchema {
                source_id: file.id.clone(),
                columns: infer_columns(&page.columns, &page.rows),
            },
            format: info.format,
            sheet: info.sheet,
        })
    }

    /// The table's columns, plus the merged-to-live mapping when appending to
    /// a table that already existed.
    fn resolve_table(
        &self,
        request: &ExportRequest,
        merged: &MergedSchema,
        job: &mut Job,
    ) -> Result<(Vec<ColumnDescriptor>, Option<ColumnMapping>), String> {
        let (db, table) = (request.database.as_str(), request.table.as_str());
        let exists = self.store.exists(db, table).map_err(|err| err.to_string())?;

        match (request.operation, exists) {
            (Operation::Create, true) => Err(IngestError::TableExists {
                db: db.to_string(),
                table: table.to_string(),
            }
            .to_string()),
            (Operation::Append, true) => {
                let live = self.store.schema(db, table).map_err(|err| err.to_string())?;
                let mapping = ColumnMapper::new(MatchOptions::from_config(self.config))
                    .map(&merged.columns, &live);
                job.outcome.mismatches = mapping.mismatches.clone();
                if request.strict_validation && !mapping.mismatches.is_empty() {
                    return Err(format!(
                        "strict validation failed with {} mismatch(es) against {db}.{table}",
                        mapping.mismatches.len()
                    ));
                }
                Ok((live, Some(mapping)))
            }
            (_, false) => {
                let columns = merged.table_columns();
                self.store
                    .create(db, table, &columns)
                    .map_err(|err| err.to_string())?;
                info!("Created table {db}.{table} with {} column(s)", columns.len());
                Ok((columns, None))
            }
        }
    }

    fn write_file(
        &self,
        request: &ExportRequest,
        discovered: &Discovered,
        result_index: usize,
        table_columns: &[ColumnDescriptor],
        targets: &[Option<String>],
        job: &mut Job,
    ) -> FileFlow {
        let id = discovered.file.id.as_str();

        let options = match ParseOptions::from_config(self.config) {
            Ok(options) => ParseOptions {
                force_delimited: discovered.file.force_delimited,
                ..options
            },
            Err(err) => return FileFlow::Halt(err.to_string()),
        };
        let opened = match reader::open(self.bytes, &discovered.file.source(), &options) {
            Ok(opened) => opened,
            Err(err) => {
                warn!("Skipping rows of '{id}': {err}");
                let entry = &mut job.outcome.files[result_index];
                entry.status = FileStatus::Failed;
                entry.error = Some(err.to_string());
                return FileFlow::Continue;
            }
        };

        let mapping = ColumnMapping::assigned(&discovered.schema.columns, table_columns, targets);
        let converter = RowConverter::new(&mapping, table_columns);
        job.outcome.files[result_index].mismatches = mapping.mismatches;

        let mut next_row = 0usize;
        for chunk in opened.into_chunks(options.chunk_size, self.cancel.clone()) {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) if err.is_cancelled() => return FileFlow::Cancelled(err),
                Err(err) => {
                    warn!("Stopped reading '{id}': {err}");
                    let entry = &mut job.outcome.files[result_index];
                    entry.status = FileStatus::Failed;
                    entry.error = Some(err.to_string());
                    return FileFlow::Continue;
                }
            };

            let mut clean = Vec::with_capacity(chunk.rows.len());
            let mut clean_rows = Vec::with_capacity(chunk.rows.len());
            let mut breach = None;

            for row in &chunk.rows {
                let row_index = next_row;
                next_row += 1;
                let converted = converter.convert(row_index, row);
                if converted.is_clean() {
                    clean.push(converted.values);
                    clean_rows.push(row_index);
                    continue;
                }
                job.outcome.rows_failed += 1;
                job.outcome.files[result_index].rows_failed += 1;
                breach = job.record_errors(id, converted.errors);
                if breach.is_some() {
                    break;
                }
            }
            if breach.is_none() {
                breach = self.record_faults(id, &chunk.faults, result_index, job);
            }

            if !clean.is_empty() {
                let report = match self.store.insert(&request.database, &request.table, &clean) {
                    Ok(report) => report,
                    Err(err) => return FileFlow::Halt(err.to_string()),
                };
                job.outcome.rows_written += report.written;
                job.outcome.files[result_index].rows_written += report.written;
                if !report.rejected.is_empty() {
                    job.outcome.rows_failed += report.rejected.len();
                    job.outcome.files[result_index].rows_failed += report.rejected.len();
                    let errors = report
                        .rejected
                        .into_iter()
                        .map(|rejected| RowError {
                            row_index: clean_rows.get(rejected.index).copied().unwrap_or_default(),
                            column: String::new(),
                            code: "store_rejected".to_string(),
                            raw_value: String::new(),
                            remediation: rejected.reason,
                        })
                        .collect();
                    let store_breach = job.record_errors(id, errors);
                    breach = breach.or(store_breach);
                }
            }
            debug!(
                "Export {}: '{id}' chunk {} done ({} row(s) processed)",
                job.outcome.job_id, chunk.index, chunk.progress.rows_processed
            );
            if let Some(reason) = breach {
                return FileFlow::Halt(reason);
            }
        }

        let entry = &mut job.outcome.files[result_index];
        entry.status = FileStatus::Written;
        info!(
            "Wrote {} row(s) from '{id}' ({} failed)",
            entry.rows_written, entry.rows_failed
        );
        FileFlow::Continue
    }

    fn record_faults(
        &self,
        id: &str,
        faults: &[RowFault],
        result_index: usize,
        job: &mut Job,
    ) -> Option<String> {
        if faults.is_empty() {
            return None;
        }
        job.outcome.rows_failed += faults.len();
        let entry = &mut job.outcome.files[result_index];
        entry.rows_failed += faults.len();
        entry.faults += faults.len();
        let errors = faults
            .iter()
            .map(|fault| RowError {
                row_index: fault.raw_index,
                column: String::new(),
                code: "undecodable_row".to_string(),
                raw_value: String::new(),
                remediation: format!("{}; check the input encoding", fault.message),
            })
            .collect();
        job.record_errors(id, errors)
    }
}

/// Table column for each of a file's columns: the merged column the merge
/// assigned it to, carried through `live` when appending to an existing table.
fn route_to_table(
    merged: &MergedSchema,
    assignment: &SourceAssignment,
    live: Option<&ColumnMapping>,
    table_columns: &[ColumnDescriptor],
) -> Vec<Option<String>> {
    let Some(live) = live else {
        return assignment.columns.clone();
    };
    assignment
        .columns
        .iter()
        .map(|name| {
            let name = name.as_deref()?;
            let merged_index = merged.columns.iter().position(|c| c.name == name)?;
            let table_index = live.target_for(merged_index)?;
            table_columns.get(table_index).map(|c| c.name.clone())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Value;
    use crate::source::MemoryByteSource;
    use crate::store::MemoryTableStore;

    fn orders(bad_every: usize, rows: usize) -> String {
        let mut text = String::from("order_id,amount\n");
        for i in 0..rows {
            if bad_every > 0 && i % bad_every == 0 {
                text.push_str(&format!("{i},lots\n"));
            } else {
                text.push_str(&format!("{i},{}.25\n", i + 1));
            }
        }
        text
    }

    #[test]
    fn request_needs_table_and_database() {
        let request = ExportRequest::new("", "t", vec![]);
        assert!(request.validate().is_err());
        let request = ExportRequest::new("db", " ", vec![]);
        assert!(request.validate().is_err());
    }

    #[test]
    fn file_specs_split_sheet_names() {
        assert_eq!(ExportFile::parse("book.xlsx:Q1").sheet.as_deref(), Some("Q1"));
        assert_eq!(ExportFile::parse("a.csv"), ExportFile::new("a.csv"));
    }

    #[test]
    fn file_specs_keep_colons_inside_ids() {
        assert_eq!(ExportFile::parse("s3:bucket/x.xlsx"), ExportFile::new("s3:bucket/x.xlsx"));
        assert_eq!(ExportFile::parse(r"C:\data\q1.csv"), ExportFile::new(r"C:\data\q1.csv"));

        let file = ExportFile::parse("s3:bucket/x.xlsx:Sales 2024");
        assert_eq!(file.id, "s3:bucket/x.xlsx");
        assert_eq!(file.sheet.as_deref(), Some("Sales 2024"));
        assert_eq!(ExportFile::parse("book.xlsx:"), ExportFile::new("book.xlsx"));
    }

    #[test]
    fn empty_request_completes_without_touching_the_store() {
        let bytes = MemoryByteSource::new();
        let store = MemoryTableStore::new();
        let config = EngineConfig::default();
        let request = ExportRequest::new("db", "orders", vec![]);

        let outcome = Exporter::new(&bytes, &store, &config).run(&request).unwrap();
        assert_eq!(outcome.state, ExportState::Completed);
        assert!(outcome.success());
        assert!(outcome.abort_reason.is_none());
        assert!(!store.exists("db", "orders").unwrap());
    }

    #[test]
    fn create_writes_all_clean_rows() {
        let bytes = MemoryByteSource::new().with("a.csv", orders(0, 20));
        let store = MemoryTableStore::new();
        let config = EngineConfig::default();
        let request = ExportRequest::new("db", "orders", vec![ExportFile::new("a.csv")]);

        let outcome = Exporter::new(&bytes, &store, &config).run(&request).unwrap();
        assert_eq!(outcome.state, ExportState::Completed);
        assert_eq!(outcome.rows_written, 20);
        assert!(outcome.success());
        assert_eq!(outcome.files[0].status, FileStatus::Written);

        let rows = store.rows("db", "orders").unwrap();
        assert_eq!(rows[0], vec![Value::Numeric(1.25), Value::Numeric(0.0)]);
    }

    #[test]
    fn unparsable_files_are_excluded_not_fatal() {
        let bytes = MemoryByteSource::new().with("a.csv", orders(0, 3));
        let store = MemoryTableStore::new();
        let config = EngineConfig::default();
        let request = ExportRequest::new(
            "db",
            "orders",
            vec![ExportFile::new("a.csv"), ExportFile::new("missing.csv")],
        );
        let outcome = Exporter::new(&bytes, &store, &config).run(&request).unwrap();
        assert_eq!(outcome.state, ExportState::Completed);
        assert_eq!(outcome.files[1].status, FileStatus::Failed);
        assert!(outcome.files[1].error.as_deref().unwrap().contains("not found"));
    }

    #[test]
    fn zero_parsed_files_abort() {
        let bytes = MemoryByteSource::new();
        let store = MemoryTableStore::new();
        let config = EngineConfig::default();
        let request = ExportRequest::new("db", "orders", vec![ExportFile::new("missing.csv")]);
        let outcome = Exporter::new(&bytes, &store, &config).run(&request).unwrap();
        assert_eq!(outcome.state, ExportState::Aborted);
        assert!(!outcome.success());
        assert!(!store.exists("db", "orders").unwrap());
    }

    #[test]
    fn create_against_existing_table_aborts() {
        let bytes = MemoryByteSource::new().with("a.csv", orders(0, 3));
        let store = MemoryTableStore::new();
        store.create("db", "orders", &[ColumnDescriptor::text("x")]).unwrap();
        let config = EngineConfig::default();
        let request = ExportRequest::new("db", "orders", vec![ExportFile::new("a.csv")]);
        let outcome = Exporter::new(&bytes, &store, &config).run(&request).unwrap();
        assert_eq!(outcome.state, ExportState::Aborted);
        assert_eq!(outcome.rows_written, 0);
    }

    #[test]
    fn cancelled_token_yields_cancelled_state() {
        let bytes = MemoryByteSource::new().with("a.csv", orders(0, 3));
        let store = MemoryTableStore::new();
        let config = EngineConfig::default();
        let cancel = CancelToken::new();
        cancel.cancel();
        let request = ExportRequest::new("db", "orders", vec![ExportFile::new("a.csv")]);
        let outcome = Exporter::new(&bytes, &store, &config)
            .with_cancel(cancel)
            .run(&request)
            .unwrap();
        assert_eq!(outcome.state, ExportState::Cancelled);
        assert_eq!(outcome.rows_written, 0);
    }

    #[test]
    fn stop_on_first_error_halts_immediately() {
        let bytes = MemoryByteSource::new().with("a.csv", orders(5, 20));
        let store = MemoryTableStore::new();
        let config = EngineConfig::default();
        let mut request = ExportRequest::new("db", "orders", vec![ExportFile::new("a.csv")]);
        request.stop_on_first_error = true;

        let outcome = Exporter::new(&bytes, &store, &config).run(&request).unwrap();
        assert_eq!(outcome.state, ExportState::Aborted);
        assert_eq!(outcome.row_errors.len(), 1);
        assert_eq!(outcome.row_errors[0].error.raw_value, "lots");
        assert_eq!(outcome.rows_written, 0);
    }
}
