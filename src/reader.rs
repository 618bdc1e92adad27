//! Bounded pages and streamed chunks over delimited text and spreadsheets.
//!
//! Both modes sit on the same primitive: a [`RowCursor`] that owns the raw
//! row source, resolves the header row once, normalizes every row to the
//! column count and applies the offset/limit window. [`OpenedSource::read_page`]
//! drains it into one [`ParsedPage`]; [`OpenedSource::into_chunks`] hands it to
//! a [`ChunkStream`] that flushes a chunk at a time.

use std::collections::VecDeque;
use std::io::Read;
use std::iter::FusedIterator;

use encoding_rs::{Encoding, UTF_8};
use log::{debug, warn};
use serde::Serialize;

use crate::{
    cancel::CancelToken,
    config::{DEFAULT_CHUNK_SIZE, EngineConfig},
    error::{IngestError, IngestResult},
    io_utils::{self, ByteStream},
    sniff,
    source::{ByteSource, SourceFormat, TabularSource},
    spreadsheet::Workbook,
};

#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Length of the data-row window; `None` reads to the end.
    pub max_rows: Option<usize>,
    /// Data rows skipped before the window starts.
    pub offset: usize,
    pub assume_headers: bool,
    /// Takes precedence over `assume_headers` when set.
    pub auto_detect_headers: bool,
    pub force_delimited: bool,
    pub chunk_size: usize,
    pub encoding: &'static Encoding,
    pub sniff_sample_bytes: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            max_rows: None,
            offset: 0,
            assume_headers: true,
            auto_detect_headers: false,
            force_delimited: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            encoding: UTF_8,
            sniff_sample_bytes: 64 * 1024,
        }
    }
}

impl ParseOptions {
    pub fn from_config(config: &EngineConfig) -> IngestResult<Self> {
        Ok(Self {
            chunk_size: config.default_chunk_size,
            encoding: config.input_encoding()?,
            sniff_sample_bytes: config.sniff_sample_bytes,
            ..Self::default()
        })
    }
}

/// A raw row that could not be decoded. Reported inline; reading continues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowFault {
    pub raw_index: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedPage {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// Raw rows seen in the whole source, header row included.
    pub total_rows: usize,
    pub offset: usize,
    pub has_headers: bool,
    pub faults: Vec<RowFault>,
}

/// What was learned about a source while opening it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceInfo {
    pub id: String,
    pub format: SourceFormat,
    pub delimiter: Option<char>,
    pub sheet: Option<String>,
    pub sheets: Vec<String>,
    pub byte_len: Option<u64>,
    pub columns: Vec<String>,
    pub has_headers: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    /// Data rows emitted so far, across all chunks.
    pub rows_processed: usize,
    /// Index of the last raw row consumed from the source.
    pub raw_row_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    pub index: usize,
    pub rows: Vec<Vec<String>>,
    pub faults: Vec<RowFault>,
    pub progress: Progress,
}

/// Raw rows straight from the tokenizer or the sheet, before any framing.
enum RowSource {
    Delimited {
        id: String,
        reader: csv::Reader<ByteStream>,
        record: csv::ByteRecord,
    },
    Sheet {
        rows: std::vec::IntoIter<Vec<String>>,
    },
}

impl RowSource {
    /// `Ok(None)` at end of input; `Err` only for failures that end the read.
    fn next_raw(&mut self) -> IngestResult<Option<Result<Vec<String>, String>>> {
        match self {
            RowSource::Delimited { id, reader, record } => match reader.read_byte_record(record) {
                Ok(true) => Ok(Some(io_utils::decode_record(record))),
                Ok(false) => Ok(None),
                Err(err) => match err.into_kind() {
                    csv::ErrorKind::Io(io) => Err(IngestError::io(id.as_str(), io)),
                    other => Ok(Some(Err(format!("{other:?}")))),
                },
            },
            RowSource::Sheet { rows } => Ok(rows.next().map(Ok)),
        }
    }
}

enum CursorItem {
    Row(Vec<String>),
    Fault(RowFault),
}

/// Shared row-iteration primitive behind both reading modes.
pub struct RowCursor {
    source: RowSource,
    columns: Vec<String>,
    has_headers: bool,
    /// Rows read ahead during header detection, replayed before the source.
    pending: VecDeque<(usize, Result<Vec<String>, String>)>,
    next_raw_index: usize,
    data_seen: usize,
    emitted: usize,
    offset: usize,
    limit: Option<usize>,
}

impl RowCursor {
    fn new(mut source: RowSource, options: &ParseOptions) -> IngestResult<Self> {
        let mut pending = VecDeque::new();
        let mut next_raw_index = 0usize;

        let lookahead = if options.auto_detect_headers { 2 } else { 1 };
        let mut decoded_seen = 0usize;
        while decoded_seen < lookahead {
            match source.next_raw()? {
                Some(row) => {
                    if row.is_ok() {
                        decoded_seen += 1;
                    }
                    pending.push_back((next_raw_index, row));
                    next_raw_index += 1;
                }
                None => break,
            }
        }

        let mut decoded = pending.iter().filter_map(|(_, row)| row.as_ref().ok());
        let first = decoded.next().cloned();
        let second = decoded.next().cloned();

        let has_headers = match (&first, options.auto_detect_headers) {
            (Some(first), true) => {
                let second = second.unwrap_or_default();
                sniff::detect_header(first.as_slice(), second.as_slice())
            }
            _ => options.assume_headers,
        };

        let columns = match first {
            Some(first) if has_headers => {
                if let Some(pos) = pending.iter().position(|(_, row)| row.is_ok()) {
                    pending.remove(pos);
                }
                first
            }
            Some(first) => synthetic_columns(first.len()),
            None => Vec::new(),
        };

        Ok(Self {
            source,
            columns,
            has_headers,
            pending,
            next_raw_index,
            data_seen: 0,
            emitted: 0,
            offset: options.offset,
            limit: options.max_rows,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_headers(&self) -> bool {
        self.has_headers
    }

    fn window_full(&self) -> bool {
        self.limit.is_some_and(|limit| self.emitted >= limit)
    }

    /// Raw rows consumed so far, header row included.
    pub fn raw_rows_read(&self) -> usize {
        self.next_raw_index - self.pending.len()
    }

    fn pull(&mut self) -> IngestResult<Option<(usize, Result<Vec<String>, String>)>> {
        if let Some(item) = self.pending.pop_front() {
            return Ok(Some(item));
        }
        let Some(row) = self.source.next_raw()? else {
            return Ok(None);
        };
        let index = self.next_raw_index;
        self.next_raw_index += 1;
        Ok(Some((index, row)))
    }

    /// Next row or fault inside the window; `None` when the window or the
    /// source is exhausted.
    fn next_item(&mut self) -> IngestResult<Option<CursorItem>> {
        loop {
            if self.window_full() {
                return Ok(None);
            }
            let Some((raw_index, row)) = self.pull()? else {
                return Ok(None);
            };
            match row {
                Err(message) => {
                    return Ok(Some(CursorItem::Fault(RowFault { raw_index, message })));
                }
                Ok(cells) => {
                    self.data_seen += 1;
                    if self.data_seen <= self.offset {
                        continue;
                    }
                    self.emitted += 1;
                    return Ok(Some(CursorItem::Row(normalize_width(cells, self.columns.len()))));
                }
            }
        }
    }

    /// Consumes the rest of the source, returning the final raw row count.
    fn count_remaining(&mut self) -> IngestResult<usize> {
        while self.pull()?.is_some() {}
        Ok(self.next_raw_index)
    }
}

fn synthetic_columns(width: usize) -> Vec<String> {
    (1..=width).map(|idx| format!("column_{idx}")).collect()
}

fn normalize_width(mut cells: Vec<String>, width: usize) -> Vec<String> {
    cells.resize(width, String::new());
    cells
}

/// A source whose format, dialect, sheet and header row have been resolved.
pub struct OpenedSource {
    info: SourceInfo,
    cursor: RowCursor,
}

/// Fetches `source` and prepares it for reading; no data rows are consumed
/// beyond the header lookahead.
pub fn open(
    byte_source: &dyn ByteSource,
    source: &TabularSource,
    options: &ParseOptions,
) -> IngestResult<OpenedSource> {
    let raw = byte_source.fetch(&source.id)?;
    let byte_len = match source.byte_len {
        Some(len) => Some(len),
        None => byte_source.size(&source.id).unwrap_or(None),
    };
    let (prefix, raw) = io_utils::sample_prefix(&source.id, raw, options.sniff_sample_bytes)?;
    let format = source.resolve_format(options.force_delimited, &prefix);

    let (row_source, delimiter, sheet, sheets) = match format {
        SourceFormat::Delimited => {
            if source.sheet.is_some() {
                warn!("Ignoring sheet selection for delimited source '{}'", source.id);
            }
            let decoded = io_utils::decoding_reader(raw, options.encoding);
            let (sample, decoded) =
                io_utils::sample_prefix(&source.id, decoded, options.sniff_sample_bytes)?;
            let delimiter = sniff::detect_delimiter(&sample);
            debug!(
                "Sniffed delimiter '{}' for '{}'",
                io_utils::printable_delimiter(delimiter),
                source.id
            );
            let row_source = RowSource::Delimited {
                id: source.id.clone(),
                reader: io_utils::open_delimited_reader(decoded, delimiter),
                record: csv::ByteRecord::new(),
            };
            (row_source, Some(delimiter as char), None, Vec::new())
        }
        SourceFormat::Spreadsheet => {
            let mut bytes = Vec::new();
            let mut raw = raw;
            raw.read_to_end(&mut bytes)
                .map_err(|err| IngestError::io(source.id.as_str(), err))?;
            let mut workbook = Workbook::from_bytes(&source.id, bytes)?;
            let sheet = workbook.select(source.sheet.as_deref())?;
            let rows = workbook.read_rows(&sheet)?;
            let sheets = workbook.sheet_names().to_vec();
            (
                RowSource::Sheet {
                    rows: rows.into_iter(),
                },
                None,
                Some(sheet),
                sheets,
            )
        }
    };

    let cursor = RowCursor::new(row_source, options)?;
    let info = SourceInfo {
        id: source.id.clone(),
        format,
        delimiter,
        sheet,
        sheets,
        byte_len,
        columns: cursor.columns().to_vec(),
        has_headers: cursor.has_headers(),
    };
    Ok(OpenedSource { info, cursor })
}

impl OpenedSource {
    pub fn info(&self) -> &SourceInfo {
        &self.info
    }

    /// Bounded mode: collects the window and keeps reading to learn the true
    /// total row count.
    pub fn read_page(self) -> IngestResult<ParsedPage> {
        self.collect_window(true)
    }

    /// Collects the window and stops there. `total_rows` only covers the raw
    /// rows consumed so far.
    pub fn read_sample(self) -> IngestResult<ParsedPage> {
        self.collect_window(false)
    }

    fn collect_window(mut self, count_all: bool) -> IngestResult<ParsedPage> {
        let mut rows = Vec::new();
        let mut faults = Vec::new();
        while let Some(item) = self.cursor.next_item()? {
            match item {
                CursorItem::Row(row) => rows.push(row),
                CursorItem::Fault(fault) => faults.push(fault),
            }
        }
        let total_rows = if count_all {
            self.cursor.count_remaining()?
        } else {
            self.cursor.raw_rows_read()
        };
        Ok(ParsedPage {
            columns: self.cursor.columns,
            rows,
            total_rows,
            offset: self.cursor.offset,
            has_headers: self.cursor.has_headers,
            faults,
        })
    }

    /// Streaming mode. The returned stream owns the source and drops it as soon
    /// as it finishes, fails or observes cancellation.
    pub fn into_chunks(self, chunk_size: usize, cancel: CancelToken) -> ChunkStream {
        ChunkStream {
            info: self.info,
            cursor: Some(self.cursor),
            chunk_size: chunk_size.max(1),
            cancel,
            next_index: 0,
            rows_processed: 0,
            deferred_error: None,
        }
    }
}

/// Ordered, finite, non-restartable sequence of chunks.
pub struct ChunkStream {
    info: SourceInfo,
    cursor: Option<RowCursor>,
    chunk_size: usize,
    cancel: CancelToken,
    next_index: usize,
    rows_processed: usize,
    deferred_error: Option<IngestError>,
}

impl ChunkStream {
    pub fn info(&self) -> &SourceInfo {
        &self.info
    }

    pub fn columns(&self) -> &[String] {
        &self.info.columns
    }

    fn release(&mut self) {
        if self.cursor.take().is_some() {
            debug!("Released source '{}'", self.info.id);
        }
    }
}

impl Iterator for ChunkStream {
    type Item = IngestResult<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(err) = self.deferred_error.take() {
            return Some(Err(err));
        }
        self.cursor.as_ref()?;
        if let Err(err) = self.cancel.check() {
            self.release();
            return Some(Err(err));
        }

        let mut rows = Vec::with_capacity(self.chunk_size.min(4_096));
        let mut faults = Vec::new();
        let mut exhausted = false;
        let mut raw_row_index = 0usize;

        if let Some(cursor) = self.cursor.as_mut() {
            while rows.len() < self.chunk_size {
                match cursor.next_item() {
                    Ok(Some(CursorItem::Row(row))) => rows.push(row),
                    Ok(Some(CursorItem::Fault(fault))) => faults.push(fault),
                    Ok(None) => {
                        exhausted = true;
                        break;
                    }
                    Err(err) => {
                        self.deferred_error = Some(err);
                        exhausted = true;
                        break;
                    }
                }
            }
            raw_row_index = cursor.raw_rows_read().saturating_sub(1);
        }

        if exhausted {
            self.release();
        }
        if rows.is_empty() && faults.is_empty() {
            return self.deferred_error.take().map(Err);
        }

        self.rows_processed += rows.len();
        let chunk = Chunk {
            index: self.next_index,
            rows,
            faults,
            progress: Progress {
                rows_processed: self.rows_processed,
                raw_row_index,
            },
        };
        self.next_index += 1;
        Some(Ok(chunk))
    }
}

impl FusedIterator for ChunkStream {}

/// Convenience wrapper: open and read one bounded page.
pub fn read_page(
    byte_source: &dyn ByteSource,
    source: &TabularSource,
    options: &ParseOptions,
) -> IngestResult<(SourceInfo, ParsedPage)> {
    let opened = open(byte_source, source, options)?;
    let info = opened.info().clone();
    Ok((info, opened.read_page()?))
}

/// Like [`read_page`], but never reads past the window.
pub fn read_sample(
    byte_source: &dyn ByteSource,
    source: &TabularSource,
    options: &ParseOptions,
) -> IngestResult<(SourceInfo, ParsedPage)> {
    let opened = open(byte_source, source, options)?;
    let info = opened.info().clone();
    Ok((info, opened.read_sample()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryByteSource;
    use proptest::prelude::*;

    fn twelve_rows() -> MemoryByteSource {
        let mut text = String::from("id,amount,active\n");
        for i in 1..=11 {
            text.push_str(&format!("{i},{}.50,{}\n", i * 10, i % 2 == 0));
        }
        MemoryByteSource::new().with("orders.csv", text)
    }

    #[test]
    fn sample_stops_at_the_window() {
        let source = twelve_rows();
        let options = ParseOptions {
            max_rows: Some(3),
            ..ParseOptions::default()
        };
        let tabular = TabularSource::new("orders.csv");
        let (_, sample) = read_sample(&source, &tabular, &options).unwrap();
        let (_, page) = read_page(&source, &tabular, &options).unwrap();

        assert_eq!(sample.rows, page.rows);
        assert_eq!(sample.total_rows, 4);
        assert_eq!(page.total_rows, 12);
    }

    #[test]
    fn window_scenario_returns_rows_seven_to_eleven() {
        let source = twelve_rows();
        let options = ParseOptions {
            max_rows: Some(5),
            offset: 5,
            ..ParseOptions::default()
        };
        let (_, page) = read_page(&source, &TabularSource::new("orders.csv"), &options).unwrap();
        assert_eq!(page.columns, vec!["id", "amount", "active"]);
        assert_eq!(page.rows.len(), 5);
        assert_eq!(page.rows[0][0], "6");
        assert_eq!(page.rows[4][0], "10");
        assert_eq!(page.total_rows, 12);
        assert_eq!(page.offset, 5);
    }

    #[test]
    fn short_and_long_rows_are_normalized() {
        let source = MemoryByteSource::new().with("ragged.csv", "a,b,c\n1\n1,2,3,4\n");
        let (_, page) =
            read_page(&source, &TabularSource::new("ragged.csv"), &ParseOptions::default()).unwrap();
        assert_eq!(page.rows, vec![vec!["1", "", ""], vec!["1", "2", "3"]]);
    }

    #[test]
    fn headerless_sources_get_synthetic_columns() {
        let source = MemoryByteSource::new().with("nums.csv", "1;2\n3;4\n");
        let options = ParseOptions {
            auto_detect_headers: true,
            ..ParseOptions::default()
        };
        let (info, page) = read_page(&source, &TabularSource::new("nums.csv"), &options).unwrap();
        assert_eq!(info.delimiter, Some(';'));
        assert!(!page.has_headers);
        assert_eq!(page.columns, vec!["column_1", "column_2"]);
        assert_eq!(page.rows.len(), 2);
        assert_eq!(page.total_rows, 2);
    }

    #[test]
    fn undecodable_rows_are_reported_inline() {
        let source = MemoryByteSource::new().with("bad.csv", b"name\nok\n\xFF\xFF\nfine\n".to_vec());
        let (_, page) =
            read_page(&source, &TabularSource::new("bad.csv"), &ParseOptions::default()).unwrap();
        assert_eq!(page.rows, vec![vec!["ok"], vec!["fine"]]);
        assert_eq!(page.faults.len(), 1);
        assert_eq!(page.faults[0].raw_index, 2);
        assert_eq!(page.total_rows, 4);
    }

    #[test]
    fn streaming_stops_after_cancellation() {
        let source = twelve_rows();
        let cancel = CancelToken::new();
        let mut stream = open(&source, &TabularSource::new("orders.csv"), &ParseOptions::default())
            .unwrap()
            .into_chunks(4, cancel.clone());

        let first = stream.next().unwrap().unwrap();
        assert_eq!(first.rows.len(), 4);
        assert_eq!(first.progress.rows_processed, 4);
        assert_eq!(first.progress.raw_row_index, 4);

        cancel.cancel();
        assert!(stream.next().unwrap().unwrap_err().is_cancelled());
        assert!(stream.next().is_none());
        assert!(stream.next().is_none());
    }

    #[test]
    fn empty_source_yields_no_chunks() {
        let source = MemoryByteSource::new().with("empty.csv", "");
        let mut stream = open(&source, &TabularSource::new("empty.csv"), &ParseOptions::default())
            .unwrap()
            .into_chunks(10, CancelToken::new());
        assert!(stream.columns().is_empty());
        assert!(stream.next().is_none());
    }

    fn generated_csv(rows: &[(u32, String)]) -> String {
        let mut text = String::from("id,label\n");
        for (id, label) in rows {
            text.push_str(&format!("{id},{label}\n"));
        }
        text
    }

    proptest! {
        #[test]
        fn streamed_chunks_concatenate_to_the_bounded_page(
            rows in prop::collection::vec((0u32..1000, "[a-z]{0,8}"), 0..60),
            offset in 0usize..20,
            limit in prop::option::of(1usize..40),
            chunk_size in 1usize..9,
        ) {
            let source = MemoryByteSource::new().with("gen.csv", generated_csv(&rows));
            let tabular = TabularSource::new("gen.csv");
            let options = ParseOptions { max_rows: limit, offset, ..ParseOptions::default() };

            let (_, page) = read_page(&source, &tabular, &options).unwrap();
            let streamed: Vec<Vec<String>> = open(&source, &tabular, &options)
                .unwrap()
                .into_chunks(chunk_size, CancelToken::new())
                .flat_map(|chunk| chunk.unwrap().rows)
                .collect();
            prop_assert_eq!(streamed, page.rows);
        }

        #[test]
        fn bounded_reads_are_idempotent(
            rows in prop::collection::vec((0u32..1000, "[a-z ]{0,8}"), 0..30),
            offset in 0usize..10,
        ) {
            let source = MemoryByteSource::new().with("gen.csv", generated_csv(&rows));
            let tabular = TabularSource::new("gen.csv");
            let options = ParseOptions { max_rows: Some(10), offset, ..ParseOptions::default() };
            let (_, first) = read_page(&source, &tabular, &options).unwrap();
            let (_, second) = read_page(&source, &tabular, &options).unwrap();
            prop_assert_eq!(first, second);
        }
    }
}
