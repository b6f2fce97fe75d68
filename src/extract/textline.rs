//! Full-line text strategy: a leading label followed by one or more
//! money-formatted numerals. The cheapest detector, and preferred because
//! the native text layer keeps labels whole.

use crate::extract::{DetectionMethod, ExtractedCell, ExtractedTable};
use regex::Regex;
use std::sync::OnceLock;

const TEXTLINE_CONFIDENCE: f64 = 0.9;
const MIN_TABLE_ROWS: usize = 2;

static MONEY_RE: OnceLock<Regex> = OnceLock::new();

fn money_re() -> &'static Regex {
    MONEY_RE.get_or_init(|| {
        Regex::new(r"\(?(?:(?:US\$|[$€£¥₹]) ?)?-?\d[\d,.]*(?: ?(?:bn|mn|tn|[KMBTkmbt]))?\)?%?")
            .expect("money pattern compiles")
    })
}

/// One parsed line: the label and the trailing numeral run.
struct LineRow {
    label: String,
    numerals: Vec<String>,
}

/// Detect tables on one page of native text. Contiguous runs of qualifying
/// lines become tables; a run shorter than two rows is discarded.
pub fn extract(page: usize, page_text: &str) -> Vec<ExtractedTable> {
    let mut tables = Vec::new();
    let mut run: Vec<LineRow> = Vec::new();

    for line in page_text.lines() {
        match parse_line(line) {
            Some(row) => run.push(row),
            None => flush_run(page, &mut run, &mut tables),
        }
    }
    flush_run(page, &mut run, &mut tables);
    tables
}

fn flush_run(page: usize, run: &mut Vec<LineRow>, tables: &mut Vec<ExtractedTable>) {
    if run.len() >= MIN_TABLE_ROWS {
        let rows = run
            .drain(..)
            .enumerate()
            .map(|(row_idx, line)| {
                let mut cells = vec![ExtractedCell::new(line.label, row_idx, 0)];
                for (i, numeral) in line.numerals.into_iter().enumerate() {
                    cells.push(ExtractedCell::new(numeral, row_idx, i + 1));
                }
                cells
            })
            .collect();
        tables.push(ExtractedTable {
            page,
            rows,
            bbox: None,
            confidence: TEXTLINE_CONFIDENCE,
            method: DetectionMethod::TextLine,
        });
    } else {
        run.clear();
    }
}

/// Split a line into a leading label and its trailing numeral run.
///
/// The numerals must form an unbroken whitespace-separated suffix of the
/// line. A line qualifies with one numeral when it has a label, or with
/// two or more without one (a period-header row like `2023  2022`).
fn parse_line(line: &str) -> Option<LineRow> {
    let trimmed_end = line.trim_end();
    if trimmed_end.is_empty() {
        return None;
    }

    let matches: Vec<regex::Match> = money_re().find_iter(trimmed_end).collect();
    let last = matches.last()?;
    if !trimmed_end[last.end()..].trim().is_empty() {
        return None;
    }

    // Walk backwards while only whitespace separates consecutive numerals.
    let mut first_idx = matches.len() - 1;
    while first_idx > 0 {
        let prev = &matches[first_idx - 1];
        let gap = &trimmed_end[prev.end()..matches[first_idx].start()];
        if gap.chars().all(char::is_whitespace) && !gap.is_empty() {
            first_idx -= 1;
        } else {
            break;
        }
    }

    let suffix = &matches[first_idx..];
    let label = trimmed_end[..suffix[0].start()].trim().to_string();
    if label.is_empty() && suffix.len() < 2 {
        return None;
    }

    Some(LineRow {
        label,
        numerals: suffix.iter().map(|m| m.as_str().to_string()).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_and_single_numeral() {
        let row = parse_line("Revenue 1,000,000").unwrap();
        assert_eq!(row.label, "Revenue");
        assert_eq!(row.numerals, vec!["1,000,000"]);
    }

    #[test]
    fn test_multi_column_row() {
        let row = parse_line("Cost of Goods Sold   400,000   380,000").unwrap();
        assert_eq!(row.label, "Cost of Goods Sold");
        assert_eq!(row.numerals, vec!["400,000", "380,000"]);
    }

    #[test]
    fn test_accounting_negative_and_currency() {
        let row = parse_line("Income Tax Expense  ($12,500)").unwrap();
        assert_eq!(row.label, "Income Tax Expense");
        assert_eq!(row.numerals, vec!["($12,500)"]);
    }

    #[test]
    fn test_numerals_carry_no_leading_space() {
        // The space is part of the numeral only behind a currency symbol.
        let row = parse_line("Cash and Equivalents  $ 5,000").unwrap();
        assert_eq!(row.numerals, vec!["$ 5,000"]);

        let row = parse_line("Revenue  1,000,000").unwrap();
        assert!(row.numerals.iter().all(|n| !n.starts_with(' ')));
    }

    #[test]
    fn test_period_header_without_label() {
        let row = parse_line("   2023   2022").unwrap();
        assert_eq!(row.label, "");
        assert_eq!(row.numerals, vec!["2023", "2022"]);
    }

    #[test]
    fn test_narrative_line_rejected() {
        assert!(parse_line("Refer to note 12 for details of provisions").is_none());
        assert!(parse_line("Income Statement").is_none());
        assert!(parse_line("").is_none());
    }

    #[test]
    fn test_page_extraction() {
        let text = "Income Statement\n\
                    For the year ended 31 December\n\
                    Revenue 1,000,000\n\
                    Cost of Goods Sold 400,000\n\
                    Gross Profit 600,000\n\
                    \n\
                    Notes follow on the next page\n";
        let tables = extract(1, text);
        assert_eq!(tables.len(), 1);
        let table = &tables[0];
        assert_eq!(table.row_count(), 3);
        assert_eq!(table.rows[0][0].text, "Revenue");
        assert_eq!(table.rows[0][1].parsed.value, Some(1_000_000.0));
        assert_eq!(table.rows[2][1].parsed.value, Some(600_000.0));
    }
}
