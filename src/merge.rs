//! Reconciles the schemas discovered in several files into one target schema.
//!
//! Disagreements never fail a merge. Each one becomes a [`Conflict`] carrying
//! the files involved and how it was resolved; only an empty input is an error.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use itertools::Itertools;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    error::{IngestError, IngestResult},
    names,
    schema::{ColumnDescriptor, ColumnType, FileSchema},
};

pub const MANUAL_RESOLUTION: &str = "requires manual resolution";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergePolicy {
    #[default]
    Union,
    FirstFile,
    Manual,
}

impl MergePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            MergePolicy::Union => "union",
            MergePolicy::FirstFile => "first-file",
            MergePolicy::Manual => "manual",
        }
    }
}

impl fmt::Display for MergePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergePolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "union" => Ok(MergePolicy::Union),
            "first-file" | "first_file" | "first" => Ok(MergePolicy::FirstFile),
            "manual" => Ok(MergePolicy::Manual),
            other => Err(format!("unknown resolution policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictKind {
    PureCase,
    PureFormat,
    NameDifference,
    TypeDifference,
    MissingInFirst,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conflict {
    pub column: String,
    pub kind: ConflictKind,
    /// Spellings or types that disagreed.
    pub variants: Vec<String>,
    pub files: Vec<String>,
    pub resolution: String,
}

/// Where one file's columns went in the merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceAssignment {
    pub source_id: String,
    /// Merged column for each of the file's columns, in file order. `None`
    /// marks a column the merge excluded.
    pub columns: Vec<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergedSchema {
    pub columns: Vec<ColumnDescriptor>,
    pub conflicts: Vec<Conflict>,
    pub policy: MergePolicy,
    pub sources: Vec<String>,
    /// One entry per input schema, in input order.
    pub assignments: Vec<SourceAssignment>,
}

impl MergedSchema {
    fn has_type_conflict(&self, column: &str) -> bool {
        self.conflicts
            .iter()
            .any(|c| c.kind == ConflictKind::TypeDifference && c.column == column)
    }

    /// Columns for a freshly created table: all nullable, and text wherever
    /// the files disagreed on type.
    pub fn table_columns(&self) -> Vec<ColumnDescriptor> {
        self.columns
            .iter()
            .map(|column| {
                let data_type = if self.has_type_conflict(&column.name) {
                    ColumnType::Text
                } else {
                    column.data_type
                };
                ColumnDescriptor::new(column.name.clone(), data_type, true)
            })
            .collect()
    }

    pub fn requires_manual_resolution(&self) -> bool {
        self.conflicts.iter().any(|c| c.resolution == MANUAL_RESOLUTION)
    }
}

/// One case- and separator-insensitive column group across all files.
#[derive(Debug)]
struct ColumnGroup {
    /// Distinct spellings in first-seen order.
    spellings: Vec<String>,
    types: Vec<ColumnType>,
    files: BTreeSet<String>,
    nullable: bool,
}

impl ColumnGroup {
    fn name(&self) -> &str {
        self.spellings.first().map(String::as_str).unwrap_or_default()
    }

    fn resolved_type(&self) -> ColumnType {
        self.types
            .iter()
            .copied()
            .min_by_key(|t| t.precedence())
            .unwrap_or(ColumnType::Text)
    }

    fn distinct_types(&self) -> Vec<ColumnType> {
        self.types.iter().copied().unique().collect()
    }
}

fn group_columns(schemas: &[FileSchema]) -> (Vec<String>, BTreeMap<String, ColumnGroup>) {
    let mut order = Vec::new();
    let mut groups: BTreeMap<String, ColumnGroup> = BTreeMap::new();
    for schema in schemas {
        for column in &schema.columns {
            let key = names::group_key(&column.name);
            let group = groups.entry(key.clone()).or_insert_with(|| {
                order.push(key);
                ColumnGroup {
                    spellings: Vec::new(),
                    types: Vec::new(),
                    files: BTreeSet::new(),
                    nullable: false,
                }
            });
            if !group.spellings.contains(&column.name) {
                group.spellings.push(column.name.clone());
            }
            group.types.push(column.data_type);
            group.files.insert(schema.source_id.clone());
            group.nullable |= column.nullable;
        }
    }
    (order, groups)
}

fn spelling_kind(spellings: &[String]) -> ConflictKind {
    let first = spellings.first().map(String::as_str).unwrap_or_default();
    if spellings.iter().all(|s| s.to_lowercase() == first.to_lowercase()) {
        ConflictKind::PureCase
    } else {
        ConflictKind::PureFormat
    }
}

/// Merges per-file schemas under `policy`. Fails only when `schemas` is empty.
pub fn merge_schemas(
    schemas: &[FileSchema],
    policy: MergePolicy,
    max_edit_distance: usize,
) -> IngestResult<MergedSchema> {
    if schemas.is_empty() {
        return Err(IngestError::NoParsableFiles);
    }
    let mut merged = match policy {
        MergePolicy::Union | MergePolicy::Manual => merge_union(schemas, max_edit_distance),
        MergePolicy::FirstFile => merge_first_file(schemas),
    };
    if policy == MergePolicy::Manual {
        for conflict in &mut merged.conflicts {
            conflict.resolution = MANUAL_RESOLUTION.to_string();
        }
    }
    merged.policy = policy;
    debug!(
        "Merged {} file(s) into {} column(s) with {} conflict(s) under '{}'",
        schemas.len(),
        merged.columns.len(),
        merged.conflicts.len(),
        policy
    );
    Ok(merged)
}

fn source_ids(schemas: &[FileSchema]) -> Vec<String> {
    schemas.iter().map(|s| s.source_id.clone()).collect()
}

/// Routes every file column through its group to the merged column named by
/// `merged_name`, or to nothing when that returns `None`.
fn assign_columns(
    schemas: &[FileSchema],
    groups: &BTreeMap<String, ColumnGroup>,
    merged_name: impl Fn(&str, &ColumnGroup) -> Option<String>,
) -> Vec<SourceAssignment> {
    schemas
        .iter()
        .map(|schema| SourceAssignment {
            source_id: schema.source_id.clone(),
            columns: schema
                .columns
                .iter()
                .map(|column| {
                    let key = names::group_key(&column.name);
                    groups.get(&key).and_then(|group| merged_name(&key, group))
                })
                .collect(),
        })
        .collect()
}

fn merge_union(schemas: &[FileSchema], max_edit_distance: usize) -> MergedSchema {
    let file_count = schemas.len();
    let (order, groups) = group_columns(schemas);
    let mut conflicts = Vec::new();
    let mut columns = Vec::new();

    for key in &order {
        let Some(group) = groups.get(key) else {
            continue;
        };
        let name = group.name().to_string();
        let files: Vec<String> = group.files.iter().cloned().collect();

        if group.spellings.len() > 1 {
            conflicts.push(Conflict {
                column: name.clone(),
                kind: spelling_kind(&group.spellings),
                variants: group.spellings.clone(),
                files: files.clone(),
                resolution: format!("using first-seen spelling '{name}'"),
            });
        }
        let resolved = group.resolved_type();
        let distinct = group.distinct_types();
        if distinct.len() > 1 {
            conflicts.push(Conflict {
                column: name.clone(),
                kind: ConflictKind::TypeDifference,
                variants: distinct.iter().map(|t| t.to_string()).collect(),
                files,
                resolution: format!("resolved to {resolved}"),
            });
        }
        columns.push(ColumnDescriptor::new(
            name,
            resolved,
            group.nullable || group.files.len() < file_count,
        ));
    }

    if max_edit_distance > 0 {
        let named: Vec<(&ColumnGroup, String)> = order
            .iter()
            .filter_map(|key| groups.get(key))
            .map(|group| (group, names::normalize(group.name())))
            .collect();
        for ((left, left_norm), (right, right_norm)) in named.iter().tuple_combinations() {
            if names::within_distance(left_norm, right_norm, max_edit_distance).is_none() {
                continue;
            }
            conflicts.push(Conflict {
                column: left.name().to_string(),
                kind: ConflictKind::NameDifference,
                variants: vec![left.name().to_string(), right.name().to_string()],
                files: left.files.union(&right.files).cloned().collect(),
                resolution: "kept as separate columns".to_string(),
            });
        }
    }

    columns.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.name.cmp(&b.name))
    });

    let assignments = assign_columns(schemas, &groups, |_, group| Some(group.name().to_string()));

    MergedSchema {
        columns,
        conflicts,
        policy: MergePolicy::Union,
        sources: source_ids(schemas),
        assignments,
    }
}

fn merge_first_file(schemas: &[FileSchema]) -> MergedSchema {
    let file_count = schemas.len();
    let (order, groups) = group_columns(schemas);
    let first = &schemas[0];
    let first_keys: BTreeSet<String> = first
        .columns
        .iter()
        .map(|c| names::group_key(&c.name))
        .collect();
    let mut conflicts = Vec::new();

    let columns = first
        .columns
        .iter()
        .map(|column| {
            let key = names::group_key(&column.name);
            let Some(group) = groups.get(&key) else {
                return column.clone();
            };
            let files: Vec<String> = group.files.iter().cloned().collect();
            if group.spellings.len() > 1 {
                conflicts.push(Conflict {
                    column: column.name.clone(),
                    kind: spelling_kind(&group.spellings),
                    variants: group.spellings.clone(),
                    files: files.clone(),
                    resolution: format!("using first file spelling '{}'", column.name),
                });
            }
            let distinct = group.distinct_types();
            if distinct.len() > 1 {
                conflicts.push(Conflict {
                    column: column.name.clone(),
                    kind: ConflictKind::TypeDifference,
                    variants: distinct.iter().map(|t| t.to_string()).collect(),
                    files,
                    resolution: format!("using first file type {}", column.data_type),
                });
            }
            ColumnDescriptor::new(
                column.name.clone(),
                column.data_type,
                group.nullable || group.files.len() < file_count,
            )
        })
        .collect();

    for key in order.iter().filter(|key| !first_keys.contains(*key)) {
        if let Some(group) = groups.get(key) {
            conflicts.push(Conflict {
                column: group.name().to_string(),
                kind: ConflictKind::MissingInFirst,
                variants: group.spellings.clone(),
                files: group.files.iter().cloned().collect(),
                resolution: "excluded".to_string(),
            });
        }
    }

    let first_names: BTreeMap<String, String> = first
        .columns
        .iter()
        .rev()
        .map(|c| (names::group_key(&c.name), c.name.clone()))
        .collect();
    let assignments = assign_columns(schemas, &groups, |key, _| first_names.get(key).cloned());

    MergedSchema {
        columns,
        conflicts,
        policy: MergePolicy::FirstFile,
        sources: source_ids(schemas),
        assignments,
    }
}
