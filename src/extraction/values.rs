//! Cell value parsing: dates, amounts and yes/no flags.

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use std::str::FromStr;
use thiserror::Error;

/// Why a single cell could not be turned into a typed value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CellError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("unparseable date '{0}'")]
    InvalidDate(String),

    #[error("unparseable amount '{0}'")]
    InvalidAmount(String),

    #[error("amount must be positive for a {kind} row, got {amount}")]
    NonPositiveAmount { kind: &'static str, amount: Decimal },

    #[error("unrecognized flag value '{value}' in column '{column}'")]
    InvalidFlag { column: &'static str, value: String },
}

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%m/%d/%y",
    "%d-%m-%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%B %d %Y",
    "%d %B %Y",
];

/// Parse a date cell in any of the supported report formats.
pub fn parse_date(raw: &str) -> Result<NaiveDate, CellError> {
    let cleaned = raw.trim().replace('.', "");
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

    if cleaned.is_empty() {
        return Err(CellError::MissingField("date"));
    }

    DATE_FORMATS
        .iter()
        .filter_map(|fmt| NaiveDate::parse_from_str(&cleaned, fmt).ok())
        // "%Y" happily reads "24" as year 24
        .find(|d| (1900..=2200).contains(&d.year()))
        .ok_or_else(|| CellError::InvalidDate(raw.trim().to_string()))
}

const CURRENCY_CODES: &[&str] = &["USD", "EUR", "GBP", "CHF", "CAD", "AUD", "US"];
const CURRENCY_SYMBOLS: &[char] = &['$', '€', '£', '¥'];

/// Parse an amount cell into a signed decimal.
///
/// Accepts currency symbols and codes, thousands separators, `(1,000)` and
/// leading or trailing minus for negatives, and K / M / MM / B magnitude suffixes.
pub fn parse_amount(raw: &str) -> Result<Decimal, CellError> {
    let original = raw.trim();
    if original.is_empty() {
        return Err(CellError::MissingField("amount"));
    }

    let mut s: String = original
        .to_uppercase()
        .replace('\u{2212}', "-")
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',' && *c != '_' && !CURRENCY_SYMBOLS.contains(c))
        .collect();

    for code in CURRENCY_CODES {
        s = s.replace(code, "");
    }

    let mut negative = false;
    if s.starts_with('(') && s.ends_with(')') && s.len() >= 2 {
        negative = true;
        s = s[1..s.len() - 1].to_string();
    }
    if let Some(rest) = s.strip_prefix('-') {
        negative = true;
        s = rest.to_string();
    } else if let Some(rest) = s.strip_suffix('-') {
        negative = true;
        s = rest.to_string();
    }

    let (number, multiplier) = split_magnitude_suffix(&s);

    if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return Err(CellError::InvalidAmount(original.to_string()));
    }

    let value = Decimal::from_str(number)
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(|| CellError::InvalidAmount(original.to_string()))?;

    Ok(if negative { -value } else { value })
}

fn split_magnitude_suffix(s: &str) -> (&str, Decimal) {
    if let Some(n) = s.strip_suffix("MM") {
        (n, Decimal::from(1_000_000))
    } else if let Some(n) = s.strip_suffix("BN") {
        (n, Decimal::from(1_000_000_000))
    } else if let Some(n) = s.strip_suffix('M') {
        (n, Decimal::from(1_000_000))
    } else if let Some(n) = s.strip_suffix('K') {
        (n, Decimal::from(1_000))
    } else if let Some(n) = s.strip_suffix('B') {
        (n, Decimal::from(1_000_000_000))
    } else {
        (s, Decimal::ONE)
    }
}

/// Parse a yes/no cell. Blank means `false`; anything outside the vocabulary is an error.
pub fn parse_flag(raw: &str, column: &'static str) -> Result<bool, CellError> {
    match raw.trim().to_lowercase().as_str() {
        "" | "no" | "n" | "false" => Ok(false),
        "yes" | "y" | "true" => Ok(true),
        _ => Err(CellError::InvalidFlag {
            column,
            value: raw.trim().to_string(),
        }),
    }
}
