//! Engine-wide tunables.
//!
//! Every field has a default so a YAML file only needs to name what it
//! overrides:
//!
//! ```yaml
//! max_concurrent_files: 8
//! encoding: windows-1252
//! ```

use std::{fs::File, io::BufReader, path::Path};

use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};

use crate::{
    error::{IngestError, IngestResult},
    io_utils,
};

pub const DEFAULT_MAX_ROWS: usize = 100;
pub const MAX_ROWS_LIMIT: usize = 10_000;
pub const DEFAULT_CHUNK_SIZE: usize = 1_000;
pub const MAX_CHUNK_SIZE: usize = 100_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub default_max_rows: usize,
    pub max_rows_limit: usize,
    pub default_chunk_size: usize,
    pub max_chunk_size: usize,
    /// Data rows sampled per file when discovering its schema during export.
    pub inference_sample_rows: usize,
    pub max_concurrent_files: usize,
    /// Encoding label understood by `encoding_rs` (e.g. `utf-8`, `windows-1252`).
    pub encoding: String,
    pub case_sensitive_matching: bool,
    pub max_edit_distance: usize,
    pub sniff_sample_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_max_rows: DEFAULT_MAX_ROWS,
            max_rows_limit: MAX_ROWS_LIMIT,
            default_chunk_size: DEFAULT_CHUNK_SIZE,
            max_chunk_size: MAX_CHUNK_SIZE,
            inference_sample_rows: 1_000,
            max_concurrent_files: 4,
            encoding: "utf-8".to_string(),
            case_sensitive_matching: false,
            max_edit_distance: 2,
            sniff_sample_bytes: 64 * 1024,
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> IngestResult<Self> {
        let file = File::open(path).map_err(|err| IngestError::io(path.display().to_string(), err))?;
        let config: EngineConfig = serde_yaml::from_reader(BufReader::new(file))
            .map_err(|err| IngestError::Config(format!("{}: {err}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> IngestResult<()> {
        let fail = |msg: &str| Err(IngestError::Config(msg.to_string()));
        if self.max_rows_limit == 0 || self.default_max_rows == 0 {
            return fail("row limits must be positive");
        }
        if self.default_max_rows > self.max_rows_limit {
            return fail("default_max_rows cannot exceed max_rows_limit");
        }
        if self.default_chunk_size == 0 || self.default_chunk_size > self.max_chunk_size {
            return fail("default_chunk_size must be within 1..=max_chunk_size");
        }
        if self.max_concurrent_files == 0 {
            return fail("max_concurrent_files must be at least 1");
        }
        if self.inference_sample_rows == 0 {
            return fail("inference_sample_rows must be at least 1");
        }
        if self.sniff_sample_bytes == 0 {
            return fail("sniff_sample_bytes must be positive");
        }
        self.input_encoding().map(|_| ())
    }

    pub fn input_encoding(&self) -> IngestResult<&'static Encoding> {
        io_utils::resolve_encoding(Some(&self.encoding))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let mut file = NamedTempFile::new().expect("temp file");
        writeln!(file, "max_concurrent_files: 8").unwrap();
        writeln!(file, "encoding: windows-1252").unwrap();

        let config = EngineConfig::load(file.path()).expect("load config");
        assert_eq!(config.max_concurrent_files, 8);
        assert_eq!(config.default_chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.input_encoding().unwrap().name(), "windows-1252");
    }

    #[test]
    fn rejects_zero_concurrency_and_bad_encoding() {
        let config = EngineConfig {
            max_concurrent_files: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            encoding: "klingon".to_string(),
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(IngestError::UnknownEncoding(_))
        ));
    }
}
