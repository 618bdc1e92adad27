use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::{export::Operation, merge::MergePolicy};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Sniff, browse and reconcile tabular files into managed tables",
    long_about = None
)]
pub struct Cli {
    /// YAML engine configuration (defaults apply to anything it omits)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Detect the delimiter and header row of a delimited file
    Sniff(SniffArgs),
    /// Print a bounded window of rows from a source
    Browse(BrowseArgs),
    /// Stream a source as newline-delimited JSON frames
    Stream(StreamArgs),
    /// List the sheets of a spreadsheet source
    Sheets(SheetsArgs),
    /// Reconcile one or more sources and load them into a table
    Export(ExportArgs),
}

#[derive(Debug, Args)]
pub struct SniffArgs {
    /// File to inspect
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Bytes to sample from the start of the file
    #[arg(long, default_value_t = 64 * 1024)]
    pub sample_bytes: usize,
    /// Emit the dialect as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct SourceArgs {
    /// Directory treated as the object store
    #[arg(long)]
    pub root: PathBuf,
    /// Source identifier, relative to --root
    #[arg(long)]
    pub id: String,
    /// Sheet to read from a spreadsheet source (first sheet if omitted)
    #[arg(long)]
    pub sheet: Option<String>,
    /// Treat the source as delimited text regardless of extension
    #[arg(long = "force-delimited")]
    pub force_delimited: bool,
    /// Treat the first row as data and use synthetic column names
    #[arg(long = "no-headers", conflicts_with = "detect_headers")]
    pub no_headers: bool,
    /// Decide header presence from the first two rows
    #[arg(long = "detect-headers")]
    pub detect_headers: bool,
    /// Character encoding of the source (overrides the configuration)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct BrowseArgs {
    #[command(flatten)]
    pub source: SourceArgs,
    /// Rows to return
    #[arg(long = "max-rows")]
    pub max_rows: Option<usize>,
    /// Data rows to skip before the window
    #[arg(long, default_value_t = 0)]
    pub offset: usize,
    /// Emit the response as JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct StreamArgs {
    #[command(flatten)]
    pub source: SourceArgs,
    /// Stop after this many rows (unlimited if omitted)
    #[arg(long = "max-rows")]
    pub max_rows: Option<usize>,
    /// Data rows to skip before streaming starts
    #[arg(long, default_value_t = 0)]
    pub offset: usize,
    /// Rows per data frame
    #[arg(long = "chunk-size")]
    pub chunk_size: Option<usize>,
    /// Cancel the stream after this many seconds
    #[arg(long = "timeout-secs")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Args)]
pub struct SheetsArgs {
    /// Directory treated as the object store
    #[arg(long)]
    pub root: PathBuf,
    /// Source identifier, relative to --root
    #[arg(long)]
    pub id: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum OperationArg {
    Create,
    Append,
}

impl From<OperationArg> for Operation {
    fn from(value: OperationArg) -> Self {
        match value {
            OperationArg::Create => Operation::Create,
            OperationArg::Append => Operation::Append,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum ResolutionArg {
    Union,
    FirstFile,
    Manual,
}

impl From<ResolutionArg> for MergePolicy {
    fn from(value: ResolutionArg) -> Self {
        match value {
            ResolutionArg::Union => MergePolicy::Union,
            ResolutionArg::FirstFile => MergePolicy::FirstFile,
            ResolutionArg::Manual => MergePolicy::Manual,
        }
    }
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    /// Directory treated as the object store
    #[arg(long)]
    pub root: PathBuf,
    /// Directory holding the CSV table store
    #[arg(long)]
    pub store: PathBuf,
    /// Database (sub-directory of the store)
    #[arg(long, default_value = "default")]
    pub database: String,
    /// Target table name
    #[arg(long)]
    pub table: String,
    /// Source to load, as `ID` or `ID:SHEET` (repeatable)
    #[arg(short = 'f', long = "file", action = clap::ArgAction::Append, required = true)]
    pub files: Vec<String>,
    /// Treat every source as delimited text regardless of extension
    #[arg(long = "force-delimited")]
    pub force_delimited: bool,
    /// Create a new table or append to an existing one
    #[arg(long, value_enum, default_value = "create")]
    pub operation: OperationArg,
    /// How disagreeing file schemas are reconciled
    #[arg(long, value_enum, default_value = "union")]
    pub resolution: ResolutionArg,
    /// Row errors tolerated before the export aborts
    #[arg(long = "max-row-errors", default_value_t = 100)]
    pub max_row_errors: usize,
    /// Abort on the first row error
    #[arg(long = "stop-on-first-error")]
    pub stop_on_first_error: bool,
    /// Abort an append when the table schema does not match exactly
    #[arg(long)]
    pub strict: bool,
    /// Character encoding of the sources (overrides the configuration)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}
