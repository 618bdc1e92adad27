//! Caller-facing parse requests: validation, bounded responses and the
//! streaming frame protocol.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{
    cancel::CancelToken,
    config::EngineConfig,
    error::{IngestError, IngestResult},
    reader::{self, ParseOptions, Progress, RowFault},
    source::{ByteSource, SourceFormat, TabularSource},
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowseRequest {
    pub id: String,
    pub sheet: Option<String>,
    pub max_rows: Option<usize>,
    pub offset: usize,
    pub assume_headers: Option<bool>,
    pub auto_detect_headers: bool,
    pub force_delimited: bool,
    pub stream: bool,
    pub chunk_size: Option<usize>,
}

impl BrowseRequest {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Checks ranges and resolves defaults. Runs before any byte is fetched.
    pub fn validate(&self, config: &EngineConfig) -> IngestResult<(TabularSource, ParseOptions)> {
        if self.id.trim().is_empty() {
            return Err(IngestError::InvalidRequest("source id is required".into()));
        }
        if let Some(max_rows) = self.max_rows
            && !(1..=config.max_rows_limit).contains(&max_rows)
        {
            return Err(IngestError::InvalidRequest(format!(
                "max_rows must be between 1 and {} (got {max_rows})",
                config.max_rows_limit
            )));
        }
        if let Some(chunk_size) = self.chunk_size
            && !(1..=config.max_chunk_size).contains(&chunk_size)
        {
            return Err(IngestError::InvalidRequest(format!(
                "chunk_size must be between 1 and {} (got {chunk_size})",
                config.max_chunk_size
            )));
        }

        let max_rows = match (self.max_rows, self.stream) {
            (Some(rows), _) => Some(rows),
            (None, true) => None,
            (None, false) => Some(config.default_max_rows),
        };
        let options = ParseOptions {
            max_rows,
            offset: self.offset,
            assume_headers: self.assume_headers.unwrap_or(true),
            auto_detect_headers: self.auto_detect_headers,
            force_delimited: self.force_delimited,
            chunk_size: self.chunk_size.unwrap_or(config.default_chunk_size),
            ..ParseOptions::from_config(config)?
        };
        let source = TabularSource::new(self.id.trim()).with_sheet(self.sheet.clone());
        Ok((source, options))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrowseResponse {
    pub format: SourceFormat,
    pub sheet: Option<String>,
    pub sheets: Vec<String>,
    pub delimiter: Option<char>,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub total_rows: usize,
    pub rows_returned: usize,
    pub offset: usize,
    pub headers_used: bool,
    pub faults: Vec<RowFault>,
}

pub fn browse(
    byte_source: &dyn ByteSource,
    config: &EngineConfig,
    request: &BrowseRequest,
) -> IngestResult<BrowseResponse> {
    let (source, options) = request.validate(config)?;
    let (info, page) = reader::read_page(byte_source, &source, &options)?;
    info!(
        "Browsed '{}': {} of {} row(s) from offset {}",
        info.id,
        page.rows.len(),
        page.total_rows,
        page.offset
    );
    Ok(BrowseResponse {
        format: info.format,
        sheet: info.sheet,
        sheets: info.sheets,
        delimiter: info.delimiter,
        rows_returned: page.rows.len(),
        columns: page.columns,
        rows: page.rows,
        total_rows: page.total_rows,
        offset: page.offset,
        headers_used: page.has_headers,
        faults: page.faults,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum StreamFrame {
    Metadata {
        id: String,
        format: SourceFormat,
        sheet: Option<String>,
        sheets: Vec<String>,
        delimiter: Option<char>,
        byte_len: Option<u64>,
        chunk_size: usize,
    },
    Header {
        columns: Vec<String>,
    },
    Data {
        chunk: usize,
        rows: Vec<Vec<String>>,
        progress: Progress,
        faults: Vec<RowFault>,
    },
    Complete {
        rows_processed: usize,
        chunks: usize,
    },
    Error {
        code: String,
        message: String,
    },
}

impl StreamFrame {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamFrame::Complete { .. } | StreamFrame::Error { .. })
    }

    fn from_error(err: &IngestError) -> Self {
        StreamFrame::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Runs a streaming request, handing each frame to `sink` as it is produced.
///
/// Exactly one terminal frame is always delivered. Validation failures are
/// returned as `Err` without emitting anything; every later failure becomes an
/// error frame. `sink` returning an error stops the stream and drops the source.
pub fn stream<F>(
    byte_source: &dyn ByteSource,
    config: &EngineConfig,
    request: &BrowseRequest,
    cancel: CancelToken,
    mut sink: F,
) -> IngestResult<()>
where
    F: FnMut(StreamFrame) -> IngestResult<()>,
{
    let (source, options) = request.validate(config)?;
    let opened = match reader::open(byte_source, &source, &options) {
        Ok(opened) => opened,
        Err(err) => return sink(StreamFrame::from_error(&err)),
    };

    let info = opened.info().clone();
    sink(StreamFrame::Metadata {
        id: info.id.clone(),
        format: info.format,
        sheet: info.sheet.clone(),
        sheets: info.sheets.clone(),
        delimiter: info.delimiter,
        byte_len: info.byte_len,
        chunk_size: options.chunk_size,
    })?;
    if info.has_headers && !info.columns.is_empty() {
        sink(StreamFrame::Header {
            columns: info.columns.clone(),
        })?;
    }

    let mut chunks = 0usize;
    let mut rows_processed = 0usize;
    for chunk in opened.into_chunks(options.chunk_size, cancel) {
        match chunk {
            Ok(chunk) => {
                debug!(
                    "Streaming chunk {} of '{}' ({} row(s))",
                    chunk.index,
                    info.id,
                    chunk.rows.len()
                );
                chunks += 1;
                rows_processed = chunk.progress.rows_processed;
                sink(StreamFrame::Data {
                    chunk: chunk.index,
                    rows: chunk.rows,
                    progress: chunk.progress,
                    faults: chunk.faults,
                })?;
            }
            Err(err) => {
                info!("Stream of '{}' ended early: {err}", info.id);
                return sink(StreamFrame::from_error(&err));
            }
        }
    }
    info!(
        "Streamed {rows_processed} row(s) from '{}' in {chunks} chunk(s)",
        info.id
    );
    sink(StreamFrame::Complete {
        rows_processed,
        chunks,
    })
}
