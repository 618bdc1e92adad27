//! Byte sources and the request-scoped description of a tabular blob.
//!
//! The object store is an external collaborator; this module only defines the
//! [`ByteSource`] contract plus two small implementations (a directory on disk
//! and an in-memory map) that the CLI and tests run against.

use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufReader, Cursor},
    path::{Component, Path, PathBuf},
    sync::{PoisonError, RwLock},
};

use serde::Serialize;

use crate::{
    error::{IngestError, IngestResult},
    io_utils::ByteStream,
};

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// Something that can hand out a fresh read stream for an identifier.
pub trait ByteSource: Send + Sync {
    fn fetch(&self, id: &str) -> IngestResult<ByteStream>;

    /// Size in bytes, when the backend knows it without reading.
    fn size(&self, _id: &str) -> IngestResult<Option<u64>> {
        Ok(None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    Delimited,
    Spreadsheet,
}

impl SourceFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "csv" | "tsv" | "txt" | "psv" | "tab" => Some(Self::Delimited),
            "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => Some(Self::Spreadsheet),
            _ => None,
        }
    }

    /// Container signatures used when the identifier has no usable extension.
    pub fn from_magic(prefix: &[u8]) -> Self {
        if prefix.starts_with(ZIP_MAGIC) || prefix.starts_with(OLE_MAGIC) {
            Self::Spreadsheet
        } else {
            Self::Delimited
        }
    }
}

/// An identified blob of tabular data prior to parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabularSource {
    pub id: String,
    pub byte_len: Option<u64>,
    pub format: Option<SourceFormat>,
    pub sheet: Option<String>,
}

impl TabularSource {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let format = Path::new(&id)
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(SourceFormat::from_extension);
        Self {
            id,
            byte_len: None,
            format,
            sheet: None,
        }
    }

    pub fn with_sheet(mut self, sheet: Option<String>) -> Self {
        self.sheet = sheet;
        self
    }

    pub fn with_byte_len(mut self, byte_len: Option<u64>) -> Self {
        self.byte_len = byte_len;
        self
    }

    /// Final format decision: `force_delimited` wins, then the declared
    /// extension, then the container signature in `prefix`.
    pub fn resolve_format(&self, force_delimited: bool, prefix: &[u8]) -> SourceFormat {
        if force_delimited {
            return SourceFormat::Delimited;
        }
        self.format.unwrap_or_else(|| SourceFormat::from_magic(prefix))
    }
}

/// Serves identifiers as relative paths beneath a root directory.
#[derive(Debug, Clone)]
pub struct FsByteSource {
    root: PathBuf,
}

impl FsByteSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, id: &str) -> IngestResult<PathBuf> {
        let relative = Path::new(id);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if id.trim().is_empty() || escapes {
            return Err(IngestError::InvalidRequest(format!(
                "source id '{id}' must be a relative path inside the source root"
            )));
        }
        Ok(self.root.join(relative))
    }
}

impl ByteSource for FsByteSource {
    fn fetch(&self, id: &str) -> IngestResult<ByteStream> {
        let path = self.resolve(id)?;
        let file = File::open(&path).map_err(|err| IngestError::io(id, err))?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn size(&self, id: &str) -> IngestResult<Option<u64>> {
        let path = self.resolve(id)?;
        let meta = std::fs::metadata(&path).map_err(|err| IngestError::io(id, err))?;
        Ok(Some(meta.len()))
    }
}

/// In-memory object store, mostly for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryByteSource {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryByteSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: impl Into<String>, bytes: impl Into<Vec<u8>>) -> IngestResult<()> {
        let mut objects = self
            .objects
            .write()
            .map_err(|_| IngestError::Store("byte source lock poisoned".to_string()))?;
        objects.insert(id.into(), bytes.into());
        Ok(())
    }

    /// Builder form of [`insert`](Self::insert). Owning `self` means no other
    /// thread can hold the lock.
    pub fn with(mut self, id: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.objects
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.into(), bytes.into());
        self
    }

    fn get(&self, id: &str) -> IngestResult<Vec<u8>> {
        let objects = self
            .objects
            .read()
            .map_err(|_| IngestError::Store("byte source lock poisoned".to_string()))?;
        objects
            .get(id)
            .cloned()
            .ok_or_else(|| IngestError::NotFound { id: id.to_string() })
    }
}

impl ByteSource for MemoryByteSource {
    fn fetch(&self, id: &str) -> IngestResult<ByteStream> {
        Ok(Box::new(Cursor::new(self.get(id)?)))
    }

    fn size(&self, id: &str) -> IngestResult<Option<u64>> {
        Ok(Some(self.get(id)?.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::tempdir;

    #[test]
    fn format_prefers_force_then_extension_then_magic() {
        let sheet = TabularSource::new("reports/q1.XLSX");
        assert_eq!(sheet.format, Some(SourceFormat::Spreadsheet));
        assert_eq!(sheet.resolve_format(true, b""), SourceFormat::Delimited);

        let unknown = TabularSource::new("blob-1234");
        assert_eq!(unknown.resolve_format(false, b"PK\x03\x04rest"), SourceFormat::Spreadsheet);
        assert_eq!(unknown.resolve_format(false, b"id,name\n"), SourceFormat::Delimited);
    }

    #[test]
    fn fs_source_reads_and_rejects_escapes() {
        let dir = tempdir().expect("temp dir");
        std::fs::write(dir.path().join("a.csv"), "x\n1\n").unwrap();
        let source = FsByteSource::new(dir.path());

        let mut text = String::new();
        source.fetch("a.csv").unwrap().read_to_string(&mut text).unwrap();
        assert_eq!(text, "x\n1\n");
        assert_eq!(source.size("a.csv").unwrap(), Some(4));

        assert!(matches!(source.fetch("missing.csv"), Err(IngestError::NotFound { .. })));
        assert!(matches!(source.fetch("../etc/passwd"), Err(IngestError::InvalidRequest(_))));
    }

    #[test]
    fn memory_source_reports_missing_ids() {
        let source = MemoryByteSource::new().with("a.csv", "id\n1\n");
        assert_eq!(source.size("a.csv").unwrap(), Some(5));
        assert!(matches!(source.fetch("b.csv"), Err(IngestError::NotFound { .. })));
    }

    #[test]
    fn insert_after_a_poisoned_lock_is_an_error() {
        let source = std::sync::Arc::new(MemoryByteSource::new());
        source.insert("a.csv", "id\n1\n").expect("healthy insert");

        let holder = std::sync::Arc::clone(&source);
        let _ = std::thread::spawn(move || {
            let _guard = holder.objects.write().unwrap();
            panic!("writer died holding the lock");
        })
        .join();

        assert!(matches!(source.insert("b.csv", "id\n2\n"), Err(IngestError::Store(_))));
    }
}
