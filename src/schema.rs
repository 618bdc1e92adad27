//! Column descriptors and per-file type inference.
//!
//! A file's discovered schema is a list of [`ColumnDescriptor`]s typed from a
//! sample of its rows. Inference votes per column: a column keeps a type only
//! if every non-empty sampled value fits it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::data::{is_boolean_word, is_null_token, parse_numeric, parse_temporal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Boolean,
    Numeric,
    Temporal,
    Text,
}

impl ColumnType {
    /// Merge precedence: lower rank wins when files disagree.
    pub fn precedence(self) -> u8 {
        match self {
            ColumnType::Boolean => 0,
            ColumnType::Numeric => 1,
            ColumnType::Temporal => 2,
            ColumnType::Text => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ColumnType::Boolean => "boolean",
            ColumnType::Numeric => "numeric",
            ColumnType::Temporal => "temporal",
            ColumnType::Text => "text",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColumnType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "boolean" | "bool" => Ok(ColumnType::Boolean),
            "numeric" | "number" | "float" | "integer" => Ok(ColumnType::Numeric),
            "temporal" | "date" | "datetime" | "timestamp" => Ok(ColumnType::Temporal),
            "text" | "string" => Ok(ColumnType::Text),
            other => Err(format!("unknown column type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub data_type: ColumnType,
    pub nullable: bool,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, data_type: ColumnType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Text, true)
    }
}

/// The schema one file contributed, tagged with the source it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSchema {
    pub source_id: String,
    pub columns: Vec<ColumnDescriptor>,
}

#[derive(Debug, Clone, Default)]
struct TypeCandidate {
    non_empty: usize,
    empty: usize,
    boolean_matches: usize,
    numeric_matches: usize,
    temporal_matches: usize,
}

impl TypeCandidate {
    fn observe(&mut self, value: &str) {
        if is_null_token(value) {
            self.empty += 1;
            return;
        }
        self.non_empty += 1;
        if is_boolean_word(value) {
            self.boolean_matches += 1;
        }
        if parse_numeric(value).is_some() && crate::sniff::looks_numeric(value) {
            self.numeric_matches += 1;
        }
        if parse_temporal(value).is_some() {
            self.temporal_matches += 1;
        }
    }

    fn decide(&self) -> ColumnType {
        if self.non_empty == 0 {
            return ColumnType::Text;
        }
        if self.boolean_matches == self.non_empty {
            ColumnType::Boolean
        } else if self.numeric_matches == self.non_empty {
            ColumnType::Numeric
        } else if self.temporal_matches == self.non_empty {
            ColumnType::Temporal
        } else {
            ColumnType::Text
        }
    }
}

/// Types each column from the sampled `rows`. Rows are expected to be already
/// padded to `columns.len()`; extra cells are ignored.
pub fn infer_columns(columns: &[String], rows: &[Vec<String>]) -> Vec<ColumnDescriptor> {
    let mut candidates = vec![TypeCandidate::default(); columns.len()];
    for row in rows {
        for (candidate, value) in candidates.iter_mut().zip(row.iter()) {
            candidate.observe(value);
        }
    }
    columns
        .iter()
        .zip(candidates.iter())
        .map(|(name, candidate)| ColumnDescriptor {
            name: name.clone(),
            data_type: candidate.decide(),
            nullable: candidate.empty > 0 || candidate.non_empty == 0,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(raw: &[&[&str]]) -> Vec<Vec<String>> {
        raw.iter()
            .map(|r| r.iter().map(|v| v.to_string()).collect())
            .collect()
    }

    #[test]
    fn infers_each_type_and_nullability() {
        let columns = vec![
            "id".to_string(),
            "active".to_string(),
            "joined".to_string(),
            "note".to_string(),
        ];
        let data = rows(&[
            &["1", "yes", "2024-01-01", "hello"],
            &["2", "no", "2024-02-01", ""],
            &["$3.50", "Y", "01/03/2024", "42"],
        ]);
        let inferred = infer_columns(&columns, &data);
        assert_eq!(inferred[0].data_type, ColumnType::Numeric);
        assert!(!inferred[0].nullable);
        assert_eq!(inferred[1].data_type, ColumnType::Boolean);
        assert_eq!(inferred[2].data_type, ColumnType::Temporal);
        assert_eq!(inferred[3].data_type, ColumnType::Text);
        assert!(inferred[3].nullable);
    }

    #[test]
    fn digit_flags_stay_numeric_and_empty_columns_are_text() {
        let columns = vec!["flag".to_string(), "blank".to_string()];
        let inferred = infer_columns(&columns, &rows(&[&["1", ""], &["0", "NA"]]));
        assert_eq!(inferred[0].data_type, ColumnType::Numeric);
        assert_eq!(inferred[1].data_type, ColumnType::Text);
        assert!(inferred[1].nullable);
    }

    #[test]
    fn precedence_orders_boolean_first() {
        let mut types = vec![ColumnType::Text, ColumnType::Temporal, ColumnType::Boolean, ColumnType::Numeric];
        types.sort_by_key(|t| t.precedence());
        assert_eq!(
            types,
            vec![ColumnType::Boolean, ColumnType::Numeric, ColumnType::Temporal, ColumnType::Text]
        );
        assert_eq!("datetime".parse::<ColumnType>().unwrap(), ColumnType::Temporal);
    }
}
