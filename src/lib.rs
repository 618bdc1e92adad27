pub mod browse;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod export;
pub mod io_utils;
pub mod mapper;
pub mod merge;
pub mod names;
pub mod reader;
pub mod schema;
pub mod sniff;
pub mod source;
pub mod spreadsheet;
pub mod store;
pub mod table;

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;
use std::time::Duration;
use std::{env, sync::OnceLock};

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{LevelFilter, debug, info};

use crate::{
    browse::{BrowseRequest, StreamFrame},
    cancel::CancelToken,
    cli::{Cli, Commands, SourceArgs},
    config::EngineConfig,
    error::IngestError,
    export::{ExportFile, ExportRequest, ExportState, Exporter},
    io_utils::printable_delimiter,
    reader::ParseOptions,
    source::{FsByteSource, TabularSource},
    store::CsvTableStore,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("tabular_reconcile", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Commands::Sniff(args) => handle_sniff(&args),
        Commands::Browse(args) => handle_browse(&args, config),
        Commands::Stream(args) => handle_stream(&args, config),
        Commands::Sheets(args) => handle_sheets(&args, &config),
        Commands::Export(args) => handle_export(&args, config),
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => {
            let config = EngineConfig::load(path)
                .with_context(|| format!("Loading configuration from {path:?}"))?;
            debug!("Loaded configuration from {path:?}: {config:?}");
            Ok(config)
        }
        None => Ok(EngineConfig::default()),
    }
}

fn with_encoding(mut config: EngineConfig, encoding: Option<&str>) -> Result<EngineConfig> {
    if let Some(label) = encoding {
        config.encoding = label.to_string();
        config.validate().context("Applying --input-encoding")?;
    }
    Ok(config)
}

fn browse_request(source: &SourceArgs) -> BrowseRequest {
    BrowseRequest {
        id: source.id.clone(),
        sheet: source.sheet.clone(),
        assume_headers: Some(!source.no_headers),
        auto_detect_headers: source.detect_headers,
        force_delimited: source.force_delimited,
        ..BrowseRequest::default()
    }
}

fn handle_sniff(args: &cli::SniffArgs) -> Result<()> {
    let file = File::open(&args.input).with_context(|| format!("Opening {:?}", args.input))?;
    let mut sample = Vec::new();
    file.take(args.sample_bytes as u64)
        .read_to_end(&mut sample)
        .with_context(|| format!("Reading sample from {:?}", args.input))?;
    let dialect = sniff::sniff(&sample);
    info!(
        "Sniffed '{}' from {} byte(s)",
        args.input.display(),
        sample.len()
    );
    if args.json {
        println!("{}", serde_json::to_string_pretty(&dialect)?);
    } else {
        println!("delimiter: {}", printable_delimiter(dialect.delimiter));
        println!("headers: {}", dialect.has_headers);
    }
    Ok(())
}

fn handle_browse(args: &cli::BrowseArgs, config: EngineConfig) -> Result<()> {
    let config = with_encoding(config, args.source.input_encoding.as_deref())?;
    let bytes = FsByteSource::new(&args.source.root);
    let request = BrowseRequest {
        max_rows: args.max_rows,
        offset: args.offset,
        ..browse_request(&args.source)
    };
    let response = browse::browse(&bytes, &config, &request)
        .with_context(|| format!("Browsing '{}'", args.source.id))?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }
    table::print_table(&response.columns, &response.rows);
    info!(
        "Showing {} of {} row(s) from offset {}",
        response.rows_returned, response.total_rows, response.offset
    );
    for fault in &response.faults {
        info!("Row {} could not be read: {}", fault.raw_index, fault.message);
    }
    Ok(())
}

fn handle_stream(args: &cli::StreamArgs, config: EngineConfig) -> Result<()> {
    let config = with_encoding(config, args.source.input_encoding.as_deref())?;
    let bytes = FsByteSource::new(&args.source.root);
    let request = BrowseRequest {
        max_rows: args.max_rows,
        offset: args.offset,
        stream: true,
        chunk_size: args.chunk_size,
        ..browse_request(&args.source)
    };
    let cancel = match args.timeout_secs {
        Some(secs) => CancelToken::with_timeout(Duration::from_secs(secs)),
        None => CancelToken::new(),
    };

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut failed = None;
    browse::stream(&bytes, &config, &request, cancel, |frame| {
        if let StreamFrame::Error { code, message } = &frame {
            failed = Some(format!("{code}: {message}"));
        }
        let line = serde_json::to_string(&frame)
            .map_err(|err| IngestError::Io {
                id: "stdout".to_string(),
                source: io::Error::other(err),
            })?;
        writeln!(out, "{line}").map_err(|err| IngestError::io("stdout", err))
    })
    .with_context(|| format!("Streaming '{}'", args.source.id))?;
    out.flush().context("Flushing stdout")?;

    if let Some(reason) = failed {
        bail!("stream of '{}' failed ({reason})", args.source.id);
    }
    Ok(())
}

fn handle_sheets(args: &cli::SheetsArgs, config: &EngineConfig) -> Result<()> {
    let bytes = FsByteSource::new(&args.root);
    let options = ParseOptions::from_config(config)?;
    let opened = reader::open(&bytes, &TabularSource::new(args.id.clone()), &options)
        .with_context(|| format!("Opening '{}'", args.id))?;
    let sheets = &opened.info().sheets;
    if sheets.is_empty() {
        info!("'{}' is a delimited source and has no sheets", args.id);
    }
    for sheet in sheets {
        println!("{sheet}");
    }
    Ok(())
}

fn handle_export(args: &cli::ExportArgs, config: EngineConfig) -> Result<()> {
    let config = with_encoding(config, args.input_encoding.as_deref())?;
    let bytes = FsByteSource::new(&args.root);
    let store = CsvTableStore::new(&args.store);
    let files = args
        .files
        .iter()
        .map(|spec| ExportFile {
            force_delimited: args.force_delimited,
            ..ExportFile::parse(spec)
        })
        .collect();
    let request = ExportRequest {
        operation: args.operation.into(),
        resolution: args.resolution.into(),
        max_row_errors: args.max_row_errors,
        stop_on_first_error: args.stop_on_first_error,
        strict_validation: args.strict,
        ..ExportRequest::new(args.database.clone(), args.table.clone(), files)
    };

    let outcome = Exporter::new(&bytes, &store, &config)
        .run(&request)
        .with_context(|| format!("Exporting into {}.{}", args.database, args.table))?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if outcome.state != ExportState::Completed || !outcome.success() {
        bail!(
            "export {} {}: {}",
            outcome.job_id,
            outcome.state,
            outcome
                .abort_reason
                .as_deref()
                .unwrap_or("no rows were written")
        );
    }
    Ok(())
}
