//! Plain-text rendering of a row window for the `browse` command.

use std::borrow::Cow;
use std::fmt::Write as _;

use crate::sniff::looks_numeric;

/// Cells wider than this are cut and end with `…`.
const MAX_CELL_WIDTH: usize = 40;

pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut widths = headers
        .iter()
        .map(|h| display_width(&clip(h)))
        .collect::<Vec<_>>();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(display_width(&clip(cell)));
        }
    }
    for width in &mut widths {
        *width = (*width).max(3);
    }

    let mut output = String::new();
    let _ = writeln!(output, "{}", format_row(headers, &widths, false));
    let rule = widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&rule, &widths, false));
    for row in rows {
        let _ = writeln!(output, "{}", format_row(row, &widths, true));
    }
    if rows.is_empty() {
        let _ = writeln!(output, "(no rows)");
    }
    output
}

pub fn print_table(headers: &[String], rows: &[Vec<String>]) {
    print!("{}", render_table(headers, rows));
}

/// Numbers are right-aligned in data rows; everything else is left-aligned.
fn format_row(values: &[String], widths: &[usize], align_numbers: bool) -> String {
    let line = values
        .iter()
        .zip(widths)
        .map(|(value, width)| {
            let cell = clip(value);
            let padding = width.saturating_sub(display_width(&cell));
            if align_numbers && looks_numeric(value) {
                format!("{}{cell}", " ".repeat(padding))
            } else {
                format!("{cell}{}", " ".repeat(padding))
            }
        })
        .collect::<Vec<_>>()
        .join("  ");
    line.trim_end().to_string()
}

fn display_width(value: &str) -> usize {
    value.chars().count()
}

/// Flattens control whitespace and cuts overly long cells.
fn clip(value: &str) -> Cow<'_, str> {
    let needs_flatten = value.contains(['\n', '\r', '\t']);
    let too_long = display_width(value) > MAX_CELL_WIDTH;
    if !needs_flatten && !too_long {
        return Cow::Borrowed(value);
    }
    let mut clipped: String = value
        .chars()
        .map(|ch| if matches!(ch, '\n' | '\r' | '\t') { ' ' } else { ch })
        .take(if too_long { MAX_CELL_WIDTH - 1 } else { usize::MAX })
        .collect();
    if too_long {
        clipped.push('…');
    }
    Cow::Owned(clipped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn renders_aligned_columns() {
        let rendered = render_table(
            &strings(&["name", "amount"]),
            &[strings(&["Ada", "7"]), strings(&["Grace", "1200"])],
        );
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "name   amount");
        assert_eq!(lines[1], "-----  ------");
        assert_eq!(lines[2], "Ada         7");
        assert_eq!(lines[3], "Grace    1200");
    }

    #[test]
    fn long_and_multiline_cells_are_clipped() {
        let long = "x".repeat(60);
        let rendered = render_table(&strings(&["note"]), &[vec![long], strings(&["a\nb"])]);
        assert!(rendered.contains('…'));
        assert!(rendered.contains("a b"));
        assert!(rendered.lines().all(|line| line.chars().count() <= MAX_CELL_WIDTH));
    }

    #[test]
    fn empty_window_is_called_out() {
        let rendered = render_table(&strings(&["id"]), &[]);
        assert!(rendered.ends_with("(no rows)\n"));
    }
}
