//! Delimiter and header inference from a byte sample.
//!
//! Everything here is a pure function of the sample. The heuristics carry no
//! guarantee on adversarial input.

use serde::Serialize;

pub const SNIFF_SAMPLE_LINES: usize = 5;
pub const DEFAULT_DELIMITER: u8 = b',';

/// Candidate delimiters in tie-break order.
const CANDIDATE_DELIMITERS: &[u8] = &[b',', b';', b'\t', b'|'];

/// Formatting characters removed before a field is tested as a number.
const NUMERIC_NOISE: &[char] = &[',', '$', '€', '£', '¥', '%', ' ', '\u{a0}', '_'];

/// Characters that may legitimately remain inside a float literal.
const NUMERIC_FORMATTING: &[char] = &['.', '-', '+', 'e', 'E'];

const MAX_NON_NUMERIC_RESIDUE: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Dialect {
    pub delimiter: u8,
    pub has_headers: bool,
}

impl Default for Dialect {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER,
            has_headers: true,
        }
    }
}

/// Infers delimiter and header presence from the start of a delimited source.
pub fn sniff(sample: &[u8]) -> Dialect {
    let delimiter = detect_delimiter(sample);
    let rows = sample_rows(sample, delimiter, 2);
    let has_headers = match rows.as_slice() {
        [] => true,
        [first] => detect_header(first.as_slice(), &[] as &[String]),
        [first, second, ..] => detect_header(first.as_slice(), second.as_slice()),
    };
    Dialect {
        delimiter,
        has_headers,
    }
}

fn sample_lines(sample: &[u8]) -> impl Iterator<Item = &[u8]> {
    sample
        .split(|b| *b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .filter(|line| line.iter().any(|b| !b.is_ascii_whitespace()))
        .take(SNIFF_SAMPLE_LINES)
}

/// Picks the candidate with the highest occurrence count across the first
/// non-empty sample lines, falling back to comma when nothing is found.
pub fn detect_delimiter(sample: &[u8]) -> u8 {
    let mut counts = [0usize; CANDIDATE_DELIMITERS.len()];
    for line in sample_lines(sample) {
        for byte in line {
            if let Some(idx) = CANDIDATE_DELIMITERS.iter().position(|c| c == byte) {
                counts[idx] += 1;
            }
        }
    }

    let mut best = 0usize;
    for (idx, count) in counts.iter().enumerate() {
        if *count > counts[best] {
            best = idx;
        }
    }
    if counts[best] == 0 {
        DEFAULT_DELIMITER
    } else {
        CANDIDATE_DELIMITERS[best]
    }
}

fn sample_rows(sample: &[u8], delimiter: u8, limit: usize) -> Vec<Vec<String>> {
    let mut joined = Vec::with_capacity(sample.len());
    for line in sample_lines(sample) {
        joined.extend_from_slice(line);
        joined.push(b'\n');
    }
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(joined.as_slice());
    reader
        .byte_records()
        .filter_map(Result::ok)
        .take(limit)
        .map(|record| {
            record
                .iter()
                .map(|field| String::from_utf8_lossy(field).into_owned())
                .collect()
        })
        .collect()
}

/// True when `value` reads as a number once currency, percent and grouping
/// marks are removed.
pub fn looks_numeric(value: &str) -> bool {
    let residue: String = value
        .trim()
        .chars()
        .filter(|ch| !NUMERIC_NOISE.contains(ch))
        .collect();
    if residue.is_empty() {
        return false;
    }
    let stray = residue
        .chars()
        .filter(|ch| !ch.is_ascii_digit() && !NUMERIC_FORMATTING.contains(ch))
        .count();
    if stray > MAX_NON_NUMERIC_RESIDUE {
        return false;
    }
    match residue.parse::<f64>() {
        Ok(parsed) => parsed.is_finite(),
        Err(_) => false,
    }
}

/// Decides whether `first` is a header row by comparing it with `second`.
///
/// The first row is a header when it holds strictly fewer numeric fields than
/// the second, or when its first field alone is non-numeric.
pub fn detect_header<S: AsRef<str>>(first: &[S], second: &[S]) -> bool {
    let width = if second.is_empty() {
        first.len()
    } else {
        first.len().min(second.len())
    };
    let first_numeric = first
        .iter()
        .take(width)
        .filter(|v| looks_numeric(v.as_ref()))
        .count();
    let second_numeric = second
        .iter()
        .take(width)
        .filter(|v| looks_numeric(v.as_ref()))
        .count();

    if first_numeric < second_numeric {
        return true;
    }
    first
        .first()
        .is_some_and(|lead| !looks_numeric(lead.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn semicolon_file_is_detected() {
        let sample = b"name;age;city\nAda;36;London\nAlan;41;Wilmslow\n";
        assert_eq!(detect_delimiter(sample), b';');
    }

    #[test]
    fn structureless_sample_defaults_to_comma() {
        assert_eq!(detect_delimiter(b"hello world\nno separators here\n"), b',');
        assert_eq!(detect_delimiter(b""), b',');
    }

    #[test]
    fn tie_prefers_earlier_candidate() {
        assert_eq!(detect_delimiter(b"a,b;c\n"), b',');
    }

    #[test]
    fn only_first_five_non_empty_lines_count() {
        let mut sample = String::from("a,b\n\n\nc,d\ne,f\ng,h\ni,j\n");
        for _ in 0..20 {
            sample.push_str("x|y|z|w|v|u\n");
        }
        assert_eq!(detect_delimiter(sample.as_bytes()), b',');
    }

    #[test]
    fn numeric_fields_tolerate_currency_and_grouping() {
        assert!(looks_numeric("1,234.50"));
        assert!(looks_numeric("$12"));
        assert!(looks_numeric("45%"));
        assert!(looks_numeric("-3.5e2"));
        assert!(!looks_numeric("abc"));
        assert!(!looks_numeric(""));
        assert!(!looks_numeric("NaN"));
        assert!(!looks_numeric("inf"));
    }

    #[test]
    fn text_over_numbers_is_a_header() {
        assert!(detect_header(&["id", "amount"], &["1", "9.99"]));
    }

    #[test]
    fn numbers_over_numbers_is_not_a_header() {
        assert!(!detect_header(&["1", "2.5"], &["3", "4.5"]));
    }

    #[test]
    fn leading_text_field_alone_marks_header() {
        assert!(detect_header(&["name", "city"], &["Ada", "London"]));
        assert!(detect_header(&["name"], &[] as &[&str]));
    }

    #[test]
    fn sniff_respects_quoted_delimiters() {
        let dialect = sniff(b"\"last, first\",score\n\"Lovelace, Ada\",99\n");
        assert_eq!(dialect.delimiter, b',');
        assert!(dialect.has_headers);

        let dialect = sniff(b"1;2;3\n4;5;6\n");
        assert_eq!(dialect, Dialect { delimiter: b';', has_headers: false });
    }

    proptest! {
        #[test]
        fn single_delimiter_files_are_always_detected(
            delim_idx in 0usize..CANDIDATE_DELIMITERS.len(),
            rows in prop::collection::vec(prop::collection::vec("[a-z0-9]{1,6}", 2..5), 1..6),
        ) {
            let delimiter = CANDIDATE_DELIMITERS[delim_idx];
            let sep = (delimiter as char).to_string();
            let text: String = rows.iter().map(|r| r.join(&sep) + "\n").collect();
            prop_assert_eq!(detect_delimiter(text.as_bytes()), delimiter);
        }
    }
}
