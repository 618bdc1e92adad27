//! Workbook access for spreadsheet-like sources.
//!
//! Sheets are loaded through `calamine` and flattened into rows of display
//! text. No typing happens here: a numeric cell becomes `"42"` or `"2.5"`, a
//! date cell its ISO rendering, and the column mapper decides what it means.

use std::io::Cursor;

use calamine::{Data, Reader, Sheets, open_workbook_auto_from_rs};
use chrono::{Duration, NaiveDate};
use log::debug;

use crate::error::{IngestError, IngestResult};

pub struct Workbook {
    sheets: Sheets<Cursor<Vec<u8>>>,
    names: Vec<String>,
}

impl Workbook {
    pub fn from_bytes(id: &str, bytes: Vec<u8>) -> IngestResult<Self> {
        let sheets = open_workbook_auto_from_rs(Cursor::new(bytes))?;
        let names = sheets.sheet_names();
        debug!("Workbook '{id}' exposes {} sheet(s): {:?}", names.len(), names);
        Ok(Self { sheets, names })
    }

    pub fn sheet_names(&self) -> &[String] {
        &self.names
    }

    /// Resolves the requested sheet, defaulting to the first one.
    pub fn select(&self, requested: Option<&str>) -> IngestResult<String> {
        match requested {
            Some(name) => self
                .names
                .iter()
                .find(|candidate| candidate.as_str() == name)
                .cloned()
                .ok_or_else(|| IngestError::SheetNotFound {
                    sheet: name.to_string(),
                    available: self.names.clone(),
                }),
            None => self.names.first().cloned().ok_or_else(|| IngestError::SheetNotFound {
                sheet: "<first>".to_string(),
                available: Vec::new(),
            }),
        }
    }

    /// Reads `sheet` as display-text rows, skipping rows with no content.
    pub fn read_rows(&mut self, sheet: &str) -> IngestResult<Vec<Vec<String>>> {
        let range = self.sheets.worksheet_range(sheet)?;
        let rows = range
            .rows()
            .filter(|row| row.iter().any(|cell| !matches!(cell, Data::Empty)))
            .map(|row| row.iter().map(cell_text).collect::<Vec<_>>())
            .collect::<Vec<_>>();
        debug!("Sheet '{sheet}' yielded {} non-empty row(s)", rows.len());
        Ok(rows)
    }
}

pub fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                (*f as i64).to_string()
            } else {
                f.to_string()
            }
        }
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => {
            if dt.is_duration() {
                dt.as_f64().to_string()
            } else {
                excel_serial_to_text(dt.as_f64())
            }
        }
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(e) => e.to_string(),
    }
}

/// Renders a 1900-system serial date; whole days print as a plain date.
fn excel_serial_to_text(serial: f64) -> String {
    let Some(epoch) = NaiveDate::from_ymd_opt(1899, 12, 30) else {
        return serial.to_string();
    };
    let days = serial.trunc() as i64;
    let seconds = ((serial - serial.trunc()) * 86_400.0).round() as i64;
    let Some(date) = epoch.checked_add_signed(Duration::days(days)) else {
        return serial.to_string();
    };
    if seconds == 0 {
        return date.format("%Y-%m-%d").to_string();
    }
    match date
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| midnight.checked_add_signed(Duration::seconds(seconds)))
    {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => serial.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_cells_render_like_a_spreadsheet() {
        assert_eq!(cell_text(&Data::Float(3.0)), "3");
        assert_eq!(cell_text(&Data::Float(2.25)), "2.25");
        assert_eq!(cell_text(&Data::Int(-7)), "-7");
        assert_eq!(cell_text(&Data::Bool(true)), "true");
        assert_eq!(cell_text(&Data::Empty), "");
    }

    #[test]
    fn serial_dates_render_as_iso() {
        assert_eq!(excel_serial_to_text(45_292.0), "2024-01-01");
        assert_eq!(excel_serial_to_text(45_292.5), "2024-01-01 12:00:00");
    }

    #[test]
    fn garbage_bytes_are_a_spreadsheet_error() {
        let err = Workbook::from_bytes("bad.xlsx", b"not a workbook".to_vec())
            .err()
            .expect("must fail");
        assert!(matches!(err, IngestError::Spreadsheet(_)));
    }
}
