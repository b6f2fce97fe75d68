//! Locale-aware parsing of financial numeric text.
//!
//! Cell text in scanned statements arrives in many shapes: `$1,234.56`,
//! `(1.234,56)`, `1.5M`, `12,3 %`. Parsing strips one dimension of the
//! string at a time (sign, currency, percent, magnitude) and then
//! disambiguates the comma/period roles of what remains. Unparsable input
//! is a data condition, not an error: it yields a null value at zero
//! confidence.

use serde::{Deserialize, Serialize};

/// Outcome of parsing one piece of numeric text.
///
/// `value` is the canonical signed value with the magnitude multiplier
/// already applied and the sign applied last. A `None` value always carries
/// `confidence` 0.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedNumber {
    pub value: Option<f64>,
    pub confidence: f64,
    pub currency: Option<String>,
    pub multiplier: f64,
    pub is_negative: bool,
    pub is_percentage: bool,
}

impl ParsedNumber {
    fn empty() -> Self {
        Self {
            value: None,
            confidence: 0.0,
            currency: None,
            multiplier: 1.0,
            is_negative: false,
            is_percentage: false,
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.value.is_some()
    }
}

const CURRENCY_SYMBOLS: &[(&str, &str)] = &[
    ("US$", "USD"),
    ("A$", "AUD"),
    ("C$", "CAD"),
    ("R$", "BRL"),
    ("$", "USD"),
    ("€", "EUR"),
    ("£", "GBP"),
    ("¥", "JPY"),
    ("₹", "INR"),
    ("₩", "KRW"),
];

const CURRENCY_CODES: &[&str] = &[
    "USD", "EUR", "GBP", "JPY", "CNY", "RMB", "AUD", "CAD", "CHF", "INR", "NZD", "SEK", "NOK",
    "SGD", "HKD", "KRW", "BRL", "MXN", "ZAR",
];

const MAGNITUDE_SUFFIXES: &[(&str, f64)] = &[
    ("thousands", 1e3),
    ("thousand", 1e3),
    ("millions", 1e6),
    ("million", 1e6),
    ("billions", 1e9),
    ("billion", 1e9),
    ("trillions", 1e12),
    ("trillion", 1e12),
    ("mm", 1e6),
    ("mn", 1e6),
    ("bn", 1e9),
    ("tn", 1e12),
    ("k", 1e3),
    ("m", 1e6),
    ("b", 1e9),
    ("t", 1e12),
];

/// Parse raw cell text into a canonical signed value.
///
/// Never panics and never returns an error; anything unrecognizable comes
/// back as a null value at confidence 0.0.
pub fn parse_numeric(raw: &str) -> ParsedNumber {
    let mut text = raw.trim().to_string();
    if text.is_empty() {
        return ParsedNumber::empty();
    }

    let mut result = ParsedNumber::empty();

    // 1. Accounting negatives: (1,234) or a leading sign.
    if text.starts_with('(') && text.ends_with(')') && text.len() > 2 {
        result.is_negative = true;
        text = text[1..text.len() - 1].trim().to_string();
    } else if let Some(stripped) = text
        .strip_prefix('-')
        .or_else(|| text.strip_prefix('\u{2212}'))
    {
        result.is_negative = true;
        text = stripped.trim().to_string();
    } else if let Some(stripped) = text.strip_prefix('+') {
        text = stripped.trim().to_string();
    }

    // 2. Currency symbol or code, prefix or suffix.
    (text, result.currency) = strip_currency(&text);

    // 3. Trailing percent sign.
    if let Some(stripped) = text.strip_suffix('%') {
        result.is_percentage = true;
        text = stripped.trim().to_string();
    }

    // 4. Trailing magnitude suffix (K/M/B/T and spelled-out forms).
    (text, result.multiplier) = strip_magnitude(&text);

    // 5. Decimal parse with separator disambiguation.
    let (parsed, confidence) = parse_decimal(&text);
    let Some(magnitude) = parsed else {
        return ParsedNumber {
            currency: result.currency,
            ..ParsedNumber::empty()
        };
    };

    let mut value = magnitude * result.multiplier;
    if result.is_negative {
        value = -value;
    }
    result.value = Some(round6(value));
    result.confidence = confidence;
    result
}

/// Render a value in a plain `-1234.56` shape that [`parse_numeric`] reads
/// back exactly. Trailing fractional zeros are trimmed.
pub fn format_value(value: f64) -> String {
    let mut s = format!("{:.6}", value);
    while s.ends_with('0') {
        s.pop();
    }
    if s.ends_with('.') {
        s.pop();
    }
    s
}

fn strip_currency(text: &str) -> (String, Option<String>) {
    for (symbol, code) in CURRENCY_SYMBOLS {
        if let Some(stripped) = text.strip_prefix(symbol) {
            return (stripped.trim().to_string(), Some((*code).to_string()));
        }
        if let Some(stripped) = text.strip_suffix(symbol) {
            return (stripped.trim().to_string(), Some((*code).to_string()));
        }
    }
    let upper = text.to_uppercase();
    for code in CURRENCY_CODES {
        if let Some(stripped) = upper.strip_prefix(code) {
            if stripped.starts_with(|c: char| c.is_ascii_digit() || c == ' ' || c == '.') {
                return (
                    text[code.len()..].trim().to_string(),
                    Some((*code).to_string()),
                );
            }
        }
        if upper.ends_with(code) && upper.len() > code.len() {
            let cut = text.len() - code.len();
            let before = text[..cut].trim_end();
            if before.ends_with(|c: char| c.is_ascii_digit() || c == '.') {
                return (before.to_string(), Some((*code).to_string()));
            }
        }
    }
    (text.to_string(), None)
}

fn strip_magnitude(text: &str) -> (String, f64) {
    let lower = text.to_lowercase();
    if lower.len() != text.len() {
        return (text.to_string(), 1.0);
    }
    for (suffix, factor) in MAGNITUDE_SUFFIXES {
        if let Some(stripped) = lower.strip_suffix(suffix) {
            let head = &text[..stripped.len()];
            let head = head.trim_end();
            // Require a digit before the suffix so bare words don't match.
            if head.ends_with(|c: char| c.is_ascii_digit() || c == '.' || c == ',') {
                return (head.to_string(), *factor);
            }
        }
    }
    (text.to_string(), 1.0)
}

/// Disambiguate comma/period roles and parse the remaining numeral.
///
/// Returns the unsigned magnitude and the confidence of the interpretation:
/// 1.0 for unambiguous input, 0.95/0.9 where a thousands-separator heuristic
/// decided, 0.7 where a lone separator was read as a decimal comma.
fn parse_decimal(text: &str) -> (Option<f64>, f64) {
    // Tolerate internal whitespace, including space-as-thousands-separator.
    let cleaned: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{00a0}')
        .collect();

    if cleaned.is_empty() || !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return (None, 0.0);
    }
    if !cleaned
        .chars()
        .all(|c| c.is_ascii_digit() || c == ',' || c == '.')
    {
        return (None, 0.0);
    }

    let commas = cleaned.matches(',').count();
    let periods = cleaned.matches('.').count();

    match (commas, periods) {
        (0, 0) => (cleaned.parse::<f64>().ok(), 1.0),
        (0, 1) => {
            // "1234.56" is a plain decimal unless the groups look like
            // European thousands, which a single period cannot prove.
            (cleaned.parse::<f64>().ok(), 1.0)
        }
        (0, _) => {
            // "1.234.567" - period thousands only if every later group is 3.
            if groups_are_thousands(&cleaned, '.') {
                (cleaned.replace('.', "").parse::<f64>().ok(), 0.9)
            } else {
                (None, 0.0)
            }
        }
        (1, 0) => {
            if groups_are_thousands(&cleaned, ',') {
                (cleaned.replace(',', "").parse::<f64>().ok(), 0.95)
            } else {
                // "1,5" reads as a decimal comma.
                (cleaned.replace(',', ".").parse::<f64>().ok(), 0.7)
            }
        }
        (_, 0) => {
            if groups_are_thousands(&cleaned, ',') {
                (cleaned.replace(',', "").parse::<f64>().ok(), 0.95)
            } else {
                (None, 0.0)
            }
        }
        _ => {
            // Mixed separators: the rightmost one is the decimal point.
            let last_comma = cleaned.rfind(',').unwrap_or(0);
            let last_period = cleaned.rfind('.').unwrap_or(0);
            let (thousands, decimal) = if last_period > last_comma {
                (',', '.')
            } else {
                ('.', ',')
            };
            let integer_part = &cleaned[..last_comma.max(last_period)];
            if !groups_are_thousands(integer_part, thousands) {
                return (None, 0.0);
            }
            let normalized: String = cleaned
                .chars()
                .filter(|c| *c != thousands)
                .map(|c| if c == decimal { '.' } else { c })
                .collect();
            (normalized.parse::<f64>().ok(), 0.95)
        }
    }
}

/// A separator plays the thousands role only when every group after the
/// first is exactly three digits.
fn groups_are_thousands(text: &str, separator: char) -> bool {
    let groups: Vec<&str> = text.split(separator).collect();
    if groups.len() < 2 {
        return true;
    }
    if groups[0].is_empty() || groups[0].len() > 3 {
        return false;
    }
    groups[1..].iter().all(|g| g.len() == 3)
}

fn round6(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}
