//! Reader construction and text decoding for delimited sources.
//!
//! All delimited bytes pass through here on their way into the row primitive:
//!
//! - **Encoding**: labels resolve through `encoding_rs`, defaulting to UTF-8.
//!   Non-UTF-8 input is transcoded by `encoding_rs_io`; a leading BOM is
//!   stripped either way.
//! - **Sampling**: a prefix of the decoded stream is captured for the sniffer
//!   and stitched back in front of the remaining bytes so nothing is read twice.
//! - **Tokenizing**: the csv reader is always headerless and flexible; header
//!   handling and row width normalization belong to the reader module.

use std::io::{Cursor, Read};

use encoding_rs::{Encoding, UTF_8};
use encoding_rs_io::DecodeReaderBytesBuilder;

use crate::error::{IngestError, IngestResult};

pub type ByteStream = Box<dyn Read + Send>;

pub fn resolve_encoding(label: Option<&str>) -> IngestResult<&'static Encoding> {
    match label {
        Some(value) => Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| IngestError::UnknownEncoding(value.to_string())),
        None => Ok(UTF_8),
    }
}

/// Wraps `reader` so that it yields UTF-8 with any BOM removed.
///
/// UTF-8 input is passed through unvalidated; invalid sequences surface later
/// as per-row faults rather than being silently replaced.
pub fn decoding_reader(reader: ByteStream, encoding: &'static Encoding) -> ByteStream {
    let decoder = DecodeReaderBytesBuilder::new()
        .encoding(Some(encoding))
        .utf8_passthru(true)
        .bom_override(true)
        .strip_bom(true)
        .build(reader);
    Box::new(decoder)
}

/// Reads up to `limit` bytes for sniffing and returns them together with a
/// stream that replays the sample before continuing with the rest.
pub fn sample_prefix(
    id: &str,
    mut reader: ByteStream,
    limit: usize,
) -> IngestResult<(Vec<u8>, ByteStream)> {
    let mut sample = Vec::with_capacity(limit.min(64 * 1024));
    (&mut reader)
        .take(limit as u64)
        .read_to_end(&mut sample)
        .map_err(|err| IngestError::io(id, err))?;
    let replay: ByteStream = Box::new(Cursor::new(sample.clone()).chain(reader));
    Ok((sample, replay))
}

pub fn open_delimited_reader(reader: ByteStream, delimiter: u8) -> csv::Reader<ByteStream> {
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(false)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true);
    builder.from_reader(reader)
}

/// Decodes every field of `record` as UTF-8, naming the first offending field
/// on failure.
pub fn decode_record(record: &csv::ByteRecord) -> Result<Vec<String>, String> {
    record
        .iter()
        .enumerate()
        .map(|(idx, field)| {
            std::str::from_utf8(field)
                .map(str::to_string)
                .map_err(|err| format!("field {} is not valid text: {err}", idx + 1))
        })
        .collect()
}

pub fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        other => (other as char).to_string(),
    }
}
