#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use rust_xlsxwriter::{Format, Workbook};
use tabular_reconcile::source::FsByteSource;
use tempfile::{TempDir, tempdir};

/// Scratch directory that doubles as the object-store root for a test.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        self.write_bytes(name, contents.as_bytes())
    }

    pub fn write_bytes(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create fixture dir");
        }
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents).expect("write temp file contents");
        path
    }

    pub fn byte_source(&self) -> FsByteSource {
        FsByteSource::new(self.path())
    }

    /// A sub-directory for a table store, created on demand.
    pub fn store_dir(&self) -> PathBuf {
        let dir = self.path().join("store");
        std::fs::create_dir_all(&dir).expect("create store dir");
        dir
    }
}

/// `order_id,amount` rows where every `bad_every`-th amount is not a number.
pub fn orders_csv(rows: usize, bad_every: usize) -> String {
    let mut text = String::from("order_id,amount\n");
    for i in 0..rows {
        if bad_every > 0 && i % bad_every == bad_every - 1 {
            text.push_str(&format!("{i},unknown\n"));
        } else {
            text.push_str(&format!("{i},{}.50\n", i * 3));
        }
    }
    text
}

/// Builds an xlsx workbook in memory. Each sheet is `(name, rows)`; cells that
/// parse as numbers are written as numbers and `@serial` as a formatted date.
pub fn xlsx_bytes(sheets: &[(&str, Vec<Vec<&str>>)]) -> Vec<u8> {
    let mut workbook = Workbook::new();
    let date_format = Format::new().set_num_format("yyyy-mm-dd");
    for (name, rows) in sheets {
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(*name).expect("sheet name");
        for (r, row) in rows.iter().enumerate() {
            for (c, cell) in row.iter().enumerate() {
                let (r, c) = (r as u32, c as u16);
                if let Some(serial) = cell.strip_prefix('@') {
                    let serial: f64 = serial.parse().expect("serial date");
                    worksheet
                        .write_number_with_format(r, c, serial, &date_format)
                        .expect("write date");
                } else if let Ok(number) = cell.parse::<f64>() {
                    worksheet.write_number(r, c, number).expect("write number");
                } else {
                    worksheet.write_string(r, c, *cell).expect("write string");
                }
            }
        }
    }
    workbook.save_to_buffer().expect("xlsx buffer")
}
