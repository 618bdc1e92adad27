//! Column matching between one file and a target column set, and typed value
//! conversion for the matched columns.
//!
//! Matching is greedy: source columns are visited in order and each one takes
//! the first unclaimed target that passes the earliest matching step. This is
//! an approximation, not an optimal assignment.

use serde::Serialize;

use crate::{
    config::EngineConfig,
    data::{Value, is_null_token, parse_boolean, parse_numeric, parse_temporal},
    names::{self, within_distance},
    schema::{ColumnDescriptor, ColumnType},
};

/// Name tokens that mark a temporal column.
const TEMPORAL_KEYWORDS: &[&str] = &[
    "date", "time", "datetime", "timestamp", "created", "updated", "modified", "dob", "birthday",
];

/// Name tokens that mark a numeric column.
const NUMERIC_KEYWORDS: &[&str] = &[
    "amount", "price", "cost", "count", "qty", "quantity", "total", "sum", "balance", "rate",
    "score", "age", "number", "num",
];

/// Name tokens that mark a boolean column.
const BOOLEAN_KEYWORDS: &[&str] = &["active", "enabled", "disabled", "flag", "deleted", "valid"];

/// Name prefixes that mark a boolean column.
const BOOLEAN_PREFIXES: &[&str] = &["is_", "has_"];

pub const CONVERSION_REMEDIATION: &str = "check format or set null";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchOptions {
    pub case_sensitive: bool,
    pub max_edit_distance: usize,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            case_sensitive: false,
            max_edit_distance: 2,
        }
    }
}

impl MatchOptions {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            case_sensitive: config.case_sensitive_matching,
            max_edit_distance: config.max_edit_distance,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    CaseInsensitive,
    Normalized,
    Fuzzy { distance: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnMatch {
    pub source_index: usize,
    pub source: String,
    pub target_index: usize,
    pub target: String,
    #[serde(flatten)]
    pub kind: MatchKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MismatchKind {
    Missing,
    Extra,
    CaseDifference,
    TypeDifference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mismatch {
    pub column: String,
    pub kind: MismatchKind,
    pub severity: Severity,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnMapping {
    pub matches: Vec<ColumnMatch>,
    pub mismatches: Vec<Mismatch>,
    pub source_len: usize,
    pub target_len: usize,
}

impl ColumnMapping {
    pub fn target_for(&self, source_index: usize) -> Option<usize> {
        self.matches
            .iter()
            .find(|m| m.source_index == source_index)
            .map(|m| m.target_index)
    }

    pub fn has_kind(&self, kind: MismatchKind) -> bool {
        self.mismatches.iter().any(|m| m.kind == kind)
    }

    /// Builds a mapping from a target name already chosen for every source
    /// column (`None` leaves the column unmapped). No name matching happens
    /// here; a target named twice goes to the first source column.
    pub fn assigned(
        sources: &[ColumnDescriptor],
        targets: &[ColumnDescriptor],
        assignment: &[Option<String>],
    ) -> Self {
        let mut claimed = vec![false; targets.len()];
        let found = sources
            .iter()
            .enumerate()
            .map(|(source_index, source)| {
                let name = assignment.get(source_index)?.as_deref()?;
                let (idx, _) = targets
                    .iter()
                    .enumerate()
                    .find(|(idx, t)| !claimed[*idx] && t.name == name)?;
                claimed[idx] = true;
                let kind = if source.name == name {
                    MatchKind::Exact
                } else if source.name.to_lowercase() == name.to_lowercase() {
                    MatchKind::CaseInsensitive
                } else {
                    MatchKind::Normalized
                };
                Some((idx, kind))
            })
            .collect();
        Self::assemble(sources, targets, found)
    }

    fn assemble(
        sources: &[ColumnDescriptor],
        targets: &[ColumnDescriptor],
        found: Vec<Option<(usize, MatchKind)>>,
    ) -> Self {
        let mut claimed = vec![false; targets.len()];
        let mut matches = Vec::new();
        let mut mismatches = Vec::new();

        for (source_index, (source, step)) in sources.iter().zip(found).enumerate() {
            let Some((target_index, kind)) = step else {
                mismatches.push(Mismatch {
                    column: source.name.clone(),
                    kind: MismatchKind::Extra,
                    severity: Severity::Warning,
                    detail: format!("column '{}' has no counterpart in the target", source.name),
                });
                continue;
            };
            claimed[target_index] = true;
            let target = &targets[target_index];

            if kind != MatchKind::Exact && source.name != target.name {
                mismatches.push(Mismatch {
                    column: source.name.clone(),
                    kind: MismatchKind::CaseDifference,
                    severity: Severity::Info,
                    detail: format!("'{}' matched target '{}'", source.name, target.name),
                });
            }
            if source.data_type != ColumnType::Text
                && target.data_type != ColumnType::Text
                && source.data_type != target.data_type
            {
                mismatches.push(Mismatch {
                    column: source.name.clone(),
                    kind: MismatchKind::TypeDifference,
                    severity: Severity::Warning,
                    detail: format!(
                        "'{}' is {} but target '{}' is {}",
                        source.name, source.data_type, target.name, target.data_type
                    ),
                });
            }
            matches.push(ColumnMatch {
                source_index,
                source: source.name.clone(),
                target_index,
                target: target.name.clone(),
                kind,
            });
        }

        for (target, _) in targets.iter().zip(&claimed).filter(|(_, claimed)| !**claimed) {
            mismatches.push(Mismatch {
                column: target.name.clone(),
                kind: MismatchKind::Missing,
                severity: Severity::Warning,
                detail: format!("target column '{}' is not supplied by the source", target.name),
            });
        }

        Self {
            matches,
            mismatches,
            source_len: sources.len(),
            target_len: targets.len(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ColumnMapper {
    options: MatchOptions,
}

impl ColumnMapper {
    pub fn new(options: MatchOptions) -> Self {
        Self { options }
    }

    /// Maps source columns onto targets. Each source column gets at most one
    /// target and each target is claimed at most once.
    pub fn map(&self, sources: &[ColumnDescriptor], targets: &[ColumnDescriptor]) -> ColumnMapping {
        let normalized_targets: Vec<String> =
            targets.iter().map(|t| names::normalize(&t.name)).collect();
        let mut claimed = vec![false; targets.len()];
        let mut found = Vec::with_capacity(sources.len());

        for source in sources {
            let normalized_source = names::normalize(&source.name);
            let step = self
                .exact_step(&source.name, targets, &claimed)
                .or_else(|| {
                    normalized_step(&normalized_source, &normalized_targets, &claimed)
                        .map(|idx| (idx, MatchKind::Normalized))
                })
                .or_else(|| {
                    self.fuzzy_step(&normalized_source, &normalized_targets, &claimed)
                        .map(|(idx, distance)| (idx, MatchKind::Fuzzy { distance }))
                });
            if let Some((idx, _)) = step {
                claimed[idx] = true;
            }
            found.push(step);
        }
        ColumnMapping::assemble(sources, targets, found)
    }

    /// Convenience for callers that only have header names.
    pub fn map_names(&self, sources: &[String], targets: &[ColumnDescriptor]) -> ColumnMapping {
        let sources: Vec<ColumnDescriptor> = sources.iter().map(ColumnDescriptor::text).collect();
        self.map(&sources, targets)
    }

    /// A case-sensitive hit on any unclaimed target beats a case-insensitive
    /// hit on an earlier one.
    fn exact_step(
        &self,
        source: &str,
        targets: &[ColumnDescriptor],
        claimed: &[bool],
    ) -> Option<(usize, MatchKind)> {
        let unclaimed = || {
            targets
                .iter()
                .enumerate()
                .filter(|(idx, _)| !claimed[*idx])
        };
        if let Some((idx, _)) = unclaimed().find(|(_, target)| target.name == source) {
            return Some((idx, MatchKind::Exact));
        }
        if self.options.case_sensitive {
            return None;
        }
        let lowered = source.to_lowercase();
        unclaimed()
            .find(|(_, target)| target.name.to_lowercase() == lowered)
            .map(|(idx, _)| (idx, MatchKind::CaseInsensitive))
    }

    fn fuzzy_step(&self, source: &str, targets: &[String], claimed: &[bool]) -> Option<(usize, usize)> {
        if self.options.max_edit_distance == 0 {
            return None;
        }
        targets
            .iter()
            .enumerate()
            .filter(|(idx, _)| !claimed[*idx])
            .find_map(|(idx, target)| {
                within_distance(source, target, self.options.max_edit_distance).map(|d| (idx, d))
            })
    }
}

fn normalized_step(source: &str, targets: &[String], claimed: &[bool]) -> Option<usize> {
    targets
        .iter()
        .enumerate()
        .find(|(idx, target)| !claimed[*idx] && target.as_str() == source)
        .map(|(idx, _)| idx)
}

/// How a target column's raw text is typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionIntent {
    Temporal,
    Numeric,
    Boolean,
    Text,
}

impl From<ColumnType> for ConversionIntent {
    fn from(value: ColumnType) -> Self {
        match value {
            ColumnType::Boolean => ConversionIntent::Boolean,
            ColumnType::Numeric => ConversionIntent::Numeric,
            ColumnType::Temporal => ConversionIntent::Temporal,
            ColumnType::Text => ConversionIntent::Text,
        }
    }
}

/// Name keywords first, then the target's declared type.
pub fn conversion_intent(target: &ColumnDescriptor) -> ConversionIntent {
    let snake = names::snake_case(names::trim(&target.name).as_ref()).into_owned();
    if BOOLEAN_PREFIXES.iter().any(|prefix| snake.starts_with(prefix)) {
        return ConversionIntent::Boolean;
    }
    let has_token =
        |keywords: &[&str]| snake.split('_').any(|token| keywords.iter().any(|k| *k == token));
    if has_token(TEMPORAL_KEYWORDS) {
        ConversionIntent::Temporal
    } else if has_token(NUMERIC_KEYWORDS) {
        ConversionIntent::Numeric
    } else if has_token(BOOLEAN_KEYWORDS) {
        ConversionIntent::Boolean
    } else {
        target.data_type.into()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowError {
    pub row_index: usize,
    pub column: String,
    pub code: String,
    pub raw_value: String,
    pub remediation: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConvertedRow {
    /// One value per target column; unmapped targets are null.
    pub values: Vec<Value>,
    pub errors: Vec<RowError>,
}

impl ConvertedRow {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Applies a [`ColumnMapping`] to raw rows, producing target-shaped values.
#[derive(Debug, Clone)]
pub struct RowConverter {
    /// `(source_index, target_index, intent)` for every matched column.
    plan: Vec<(usize, usize, ConversionIntent)>,
    target_names: Vec<String>,
}

impl RowConverter {
    pub fn new(mapping: &ColumnMapping, targets: &[ColumnDescriptor]) -> Self {
        let plan = mapping
            .matches
            .iter()
            .map(|m| (m.source_index, m.target_index, conversion_intent(&targets[m.target_index])))
            .collect();
        Self {
            plan,
            target_names: targets.iter().map(|t| t.name.clone()).collect(),
        }
    }

    pub fn convert(&self, row_index: usize, raw: &[String]) -> ConvertedRow {
        let mut values = vec![Value::Null; self.target_names.len()];
        let mut errors = Vec::new();
        for &(source_index, target_index, intent) in &self.plan {
            let cell = raw.get(source_index).map(String::as_str).unwrap_or_default();
            match convert_value(cell, intent) {
                Ok(value) => values[target_index] = value,
                Err(code) => errors.push(RowError {
                    row_index,
                    column: self.target_names[target_index].clone(),
                    code: code.to_string(),
                    raw_value: cell.to_string(),
                    remediation: CONVERSION_REMEDIATION.to_string(),
                }),
            }
        }
        ConvertedRow { values, errors }
    }
}

/// Converts one cell. Null tokens never fail.
pub fn convert_value(raw: &str, intent: ConversionIntent) -> Result<Value, &'static str> {
    if is_null_token(raw) {
        return Ok(Value::Null);
    }
    match intent {
        ConversionIntent::Temporal => parse_temporal(raw).ok_or("invalid_temporal"),
        ConversionIntent::Numeric => parse_numeric(raw).map(Value::Numeric).ok_or("invalid_numeric"),
        ConversionIntent::Boolean => parse_boolean(raw).map(Value::Boolean).ok_or("invalid_boolean"),
        ConversionIntent::Text => Ok(Value::Text(raw.to_string())),
    }
}
