use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// A typed cell produced by the column mapper. `Null` is a first-class value
/// because failed conversions and placeholders both land there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Numeric(f64),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_display(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Numeric(f) => {
                if f.fract() == 0.0 && f.abs() < 1e15 {
                    (*f as i64).to_string()
                } else {
                    f.to_string()
                }
            }
            Value::Boolean(b) => b.to_string(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            Value::Text(s) => s.clone(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

/// Date-time layouts, tried in order; the first that parses wins.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%d/%m/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Date-only layouts, tried after the date-time layouts.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%d/%m/%Y",
    "%m/%d/%Y",
    "%Y/%m/%d",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%b %d, %Y",
    "%d %b %Y",
];

const PLACEHOLDER_TOKENS: &[&str] = &["null", "na", "n/a", "none", "nil", "-", "--"];

const TRUE_TOKENS: &[&str] = &["true", "1", "yes", "y"];
const FALSE_TOKENS: &[&str] = &["false", "0", "no", "n"];

/// Empty cells and well-known "no value" spellings convert to null silently.
pub fn is_null_token(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty()
        || PLACEHOLDER_TOKENS
            .iter()
            .any(|token| trimmed.eq_ignore_ascii_case(token))
}

pub fn parse_naive_date(value: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}

pub fn parse_naive_datetime(value: &str) -> Option<NaiveDateTime> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.naive_utc());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
}

/// Date-time layouts first, then date-only layouts.
pub fn parse_temporal(value: &str) -> Option<Value> {
    let trimmed = value.trim();
    if let Some(dt) = parse_naive_datetime(trimmed) {
        return Some(Value::DateTime(dt));
    }
    parse_naive_date(trimmed).map(Value::Date)
}

/// Keeps only digits, sign and decimal point, then parses what is left.
///
/// This is lenient on purpose for spreadsheet exports (`$1,234.50`, `12 %`);
/// text with no digits at all never parses.
pub fn parse_numeric(value: &str) -> Option<f64> {
    let stripped: String = value
        .trim()
        .chars()
        .filter(|ch| ch.is_ascii_digit() || matches!(ch, '-' | '+' | '.'))
        .collect();
    if !stripped.chars().any(|ch| ch.is_ascii_digit()) {
        return None;
    }
    stripped.parse::<f64>().ok().filter(|f| f.is_finite())
}

pub fn parse_boolean(value: &str) -> Option<bool> {
    let trimmed = value.trim();
    if TRUE_TOKENS.iter().any(|t| trimmed.eq_ignore_ascii_case(t)) {
        Some(true)
    } else if FALSE_TOKENS.iter().any(|t| trimmed.eq_ignore_ascii_case(t)) {
        Some(false)
    } else {
        None
    }
}

/// Word-only booleans used during type inference, where bare `1`/`0` are
/// more likely counts than flags.
pub fn is_boolean_word(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "false" | "yes" | "no" | "y" | "n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_naive_date_supports_multiple_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 5, 6).unwrap();
        assert_eq!(parse_naive_date("2024-05-06"), Some(expected));
        assert_eq!(parse_naive_date("06/05/2024"), Some(expected));
        assert_eq!(parse_naive_date("2024/05/06"), Some(expected));
        assert_eq!(parse_naive_date("May 06, 2024"), Some(expected));
        assert_eq!(parse_naive_date("yesterday"), None);
    }

    #[test]
    fn parse_temporal_prefers_datetime_layouts() {
        let expected =
            NaiveDateTime::parse_from_str("2024-05-06 14:30:00", "%Y-%m-%d %H:%M:%S").unwrap();
        assert_eq!(parse_temporal("2024-05-06T14:30:00"), Some(Value::DateTime(expected)));
        assert_eq!(parse_temporal("2024-05-06T14:30:00Z"), Some(Value::DateTime(expected)));
        assert!(matches!(parse_temporal("2024-05-06"), Some(Value::Date(_))));
    }

    #[test]
    fn parse_numeric_strips_formatting() {
        assert_eq!(parse_numeric("$1,234.50"), Some(1234.5));
        assert_eq!(parse_numeric("-12 %"), Some(-12.0));
        assert_eq!(parse_numeric("abc"), None);
        assert_eq!(parse_numeric("1.2.3"), None);
    }

    #[test]
    fn parse_boolean_accepts_words_and_digits() {
        assert_eq!(parse_boolean("YES"), Some(true));
        assert_eq!(parse_boolean("0"), Some(false));
        assert_eq!(parse_boolean("maybe"), None);
        assert!(!is_boolean_word("1"));
    }

    #[test]
    fn placeholders_are_null_tokens() {
        assert!(is_null_token("  "));
        assert!(is_null_token("N/A"));
        assert!(!is_null_token("0"));
    }

    #[test]
    fn numeric_display_drops_integral_fraction() {
        assert_eq!(Value::Numeric(42.0).as_display(), "42");
        assert_eq!(Value::Numeric(2.5).as_display(), "2.5");
        assert_eq!(Value::Null.as_display(), "");
    }
}
