//! Column-name normalization shared by the mapper and the merger.

use std::borrow::Cow;
use std::sync::LazyLock;

use heck::ToSnakeCase;
use regex::Regex;

const KNOWN_PREFIXES: &[&str] = &["column_", "col_", "field_", "fld_"];
const KNOWN_SUFFIXES: &[&str] = &["_column", "_col", "_field"];

static TRAILING_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_?\d+$").expect("static pattern"));

/// Trims surrounding whitespace without allocating.
pub fn trim(input: &str) -> Cow<'_, str> {
    Cow::Borrowed(input.trim())
}

/// Converts identifiers to `snake_case`.
pub fn snake_case(input: &str) -> Cow<'_, str> {
    let converted = input.to_snake_case();
    if converted == input {
        Cow::Borrowed(input)
    } else {
        Cow::Owned(converted)
    }
}

/// Canonical spelling used for normalized and fuzzy matching.
///
/// `" Customer_Name_col"` and `"fld_customerName2"` both become
/// `customer_name`. A strip that would leave nothing is skipped.
pub fn normalize(name: &str) -> String {
    let mut current = snake_case(trim(name).as_ref()).into_owned();

    if let Some(stripped) = KNOWN_PREFIXES
        .iter()
        .find_map(|prefix| current.strip_prefix(prefix))
        .filter(|rest| !rest.is_empty())
    {
        current = stripped.to_string();
    }
    if let Some(stripped) = KNOWN_SUFFIXES
        .iter()
        .find_map(|suffix| current.strip_suffix(suffix))
        .filter(|rest| !rest.is_empty())
    {
        current = stripped.to_string();
    }
    let without_number = TRAILING_NUMBER.replace(&current, "");
    if !without_number.is_empty() && without_number.len() != current.len() {
        current = without_number.into_owned();
    }
    current
}

/// Grouping key for schema merging: case-folded with separators removed.
pub fn group_key(name: &str) -> String {
    name.chars()
        .filter(|ch| !is_separator(*ch))
        .flat_map(char::to_lowercase)
        .collect()
}

pub fn is_separator(ch: char) -> bool {
    ch.is_whitespace() || matches!(ch, '_' | '-' | '.')
}

/// Edit distance over characters.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// Fuzzy-match test: within `max_distance`, and closer than the shorter name
/// is long so that two-letter names never match anything.
pub fn within_distance(a: &str, b: &str, max_distance: usize) -> Option<usize> {
    let distance = levenshtein(a, b);
    let shorter = a.chars().count().min(b.chars().count());
    (distance <= max_distance && distance < shorter).then_some(distance)
}
