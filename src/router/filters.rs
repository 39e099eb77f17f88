//! Filter language → `LedgerQuery`
//!
//! Recognised: entry kinds ("capital calls", "distributions", "adjustments"), the
//! recallable qualifier on distributions, years (1900 to 2100), month-years, quarters
//! and full dates, "between X and Y", "since/after X", "before/until X", and
//! "largest/smallest". Anything else, amount thresholds included, is `UnsupportedFilter`.

use crate::error::LedgerError;
use crate::extraction::values::parse_date;
use crate::models::{EntryKind, FundId};
use crate::store::{LedgerQuery, Rank};
use crate::text::{contains_phrase, tokenize};
use crate::Result;
use chrono::{Datelike, Duration, NaiveDate};
use std::collections::BTreeSet;
use lazy_static::lazy_static;
use regex::Regex;

/// Bare years outside this range are not read as periods.
const YEAR_RANGE: std::ops::RangeInclusive<i32> = 1900..=2100;

const DATE_EXPR: &str = r"(?:\d{4}-\d{1,2}-\d{1,2}|\d{4}/\d{1,2}/\d{1,2}|\d{1,2}/\d{1,2}/\d{4}|(?:jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s+(?:\d{1,2},?\s+)?\d{4}|q[1-4]\s+\d{4}|\d{4})";

lazy_static! {
    static ref BETWEEN: Regex =
        Regex::new(&format!(r"\bbetween\s+({d})\s+(?:and|to)\s+({d})\b", d = DATE_EXPR)).unwrap();
    static ref LOWER_BOUND: Regex =
        Regex::new(&format!(r"\b(since|after|from)\s+({d})\b", d = DATE_EXPR)).unwrap();
    static ref UPPER_BOUND: Regex = Regex::new(&format!(
        r"\b(before|until|through|prior to|to)\s+({d})\b",
        d = DATE_EXPR
    ))
    .unwrap();
    static ref AS_OF: Regex = Regex::new(&format!(
        r"\b(?:as of|as at|at the end of|end of)\s+({d})\b",
        d = DATE_EXPR
    ))
    .unwrap();
    static ref ANY_DATE: Regex = Regex::new(&format!(r"\b({d})\b", d = DATE_EXPR)).unwrap();
    static ref RANGE_WORD: Regex =
        Regex::new(r"\b(between|since|after|before|until|through|as of)\b").unwrap();
    static ref QUARTER: Regex = Regex::new(r"^q([1-4])\s+(\d{4})$").unwrap();
    static ref MONTH_YEAR: Regex = Regex::new(r"^([a-z]+)\.?\s+(\d{4})$").unwrap();
    static ref YEAR: Regex = Regex::new(r"^\d{4}$").unwrap();
    static ref AMOUNT_THRESHOLD: Regex = Regex::new(
        r"\b(?:above|over|below|under|exceeding|more than|less than|greater than|at least|at most)\s+(?:usd\s*)?[$€£]?\s*\d"
    )
    .unwrap();
}

/// Inclusive calendar span named by one date expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateSpan {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Resolve "2024", "Q3 2024", "March 2024", "2024-03-10", "March 10, 2024".
pub fn resolve_span(expr: &str) -> Result<DateSpan> {
    let expr = expr.trim().to_lowercase();
    let unsupported = || LedgerError::UnsupportedFilter(format!("cannot read '{}' as a date", expr));

    if YEAR.is_match(&expr) {
        let year: i32 = expr.parse().map_err(|_| unsupported())?;
        if !YEAR_RANGE.contains(&year) {
            return Err(unsupported());
        }
        let start = NaiveDate::from_ymd_opt(year, 1, 1).ok_or_else(unsupported)?;
        let end = NaiveDate::from_ymd_opt(year, 12, 31).ok_or_else(unsupported)?;
        return Ok(DateSpan { start, end });
    }

    if let Some(caps) = QUARTER.captures(&expr) {
        let quarter: u32 = caps[1].parse().map_err(|_| unsupported())?;
        let year: i32 = caps[2].parse().map_err(|_| unsupported())?;
        let start = NaiveDate::from_ymd_opt(year, (quarter - 1) * 3 + 1, 1).ok_or_else(unsupported)?;
        return Ok(DateSpan {
            start,
            end: month_end(year, quarter * 3).ok_or_else(unsupported)?,
        });
    }

    if let Some(caps) = MONTH_YEAR.captures(&expr) {
        let first = parse_date(&format!("{} 1, {}", &caps[1], &caps[2])).map_err(|_| unsupported())?;
        return Ok(DateSpan {
            start: first,
            end: month_end(first.year(), first.month()).ok_or_else(unsupported)?,
        });
    }

    let day = parse_date(&expr).map_err(|_| unsupported())?;
    Ok(DateSpan { start: day, end: day })
}

fn month_end(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1).map(|d| d - Duration::days(1))
}

/// Evaluation date named in the query ("as of June 30, 2024", "end of 2023").
/// `None` when the query names none.
pub fn parse_as_of(query: &str) -> Result<Option<NaiveDate>> {
    let lowered = query.to_lowercase();
    match AS_OF.captures(&lowered) {
        Some(caps) => Ok(Some(resolve_span(&caps[1])?.end)),
        None => Ok(None),
    }
}

/// Translate the query's filter language into a bounded ledger query.
pub fn parse_ledger_query(query: &str, fund_id: FundId, max_rows: usize) -> Result<LedgerQuery> {
    let lowered = query.to_lowercase();
    let tokens = tokenize(&lowered);
    let mut ledger_query = LedgerQuery::new(fund_id, max_rows);
    let mut recognised = false;

    if AMOUNT_THRESHOLD.is_match(&lowered) {
        return Err(LedgerError::UnsupportedFilter(format!(
            "amount thresholds are not supported in '{}'",
            query.trim()
        )));
    }

    // ----- kind -----
    let mut kinds = BTreeSet::new();
    if contains_phrase(&tokens, "capital call") || contains_phrase(&tokens, "call") || contains_phrase(&tokens, "drawdown") {
        kinds.insert(EntryKind::CapitalCall);
    }
    if contains_phrase(&tokens, "distribution") {
        kinds.insert(EntryKind::Distribution);
    }
    if contains_phrase(&tokens, "adjustment") || contains_phrase(&tokens, "recall") {
        kinds.insert(EntryKind::Adjustment);
    }

    // "recallable" only qualifies distributions
    let recallable = if ["non recallable", "not recallable", "nonrecallable"]
        .iter()
        .any(|p| contains_phrase(&tokens, p))
    {
        Some(false)
    } else if contains_phrase(&tokens, "recallable") {
        Some(true)
    } else {
        None
    };
    if let Some(flag) = recallable {
        if kinds.iter().any(|k| *k != EntryKind::Distribution) {
            return Err(LedgerError::UnsupportedFilter(format!(
                "'recallable' only applies to distributions in '{}'",
                query.trim()
            )));
        }
        kinds.insert(EntryKind::Distribution);
        ledger_query.recallable = Some(flag);
    }

    if !kinds.is_empty()
        || contains_phrase(&tokens, "transaction")
        || contains_phrase(&tokens, "cash flow")
        || contains_phrase(&tokens, "ledger")
    {
        recognised = true;
    }
    ledger_query.kinds = kinds;

    // ----- rank -----
    if ["largest", "biggest", "highest"].iter().any(|w| contains_phrase(&tokens, w)) {
        ledger_query.rank = Some(Rank::Largest);
        recognised = true;
    } else if ["smallest", "lowest"].iter().any(|w| contains_phrase(&tokens, w)) {
        ledger_query.rank = Some(Rank::Smallest);
        recognised = true;
    }

    // ----- dates -----
    let mut bounded = false;
    if let Some(caps) = BETWEEN.captures(&lowered) {
        let from = resolve_span(&caps[1])?;
        let to = resolve_span(&caps[2])?;
        ledger_query.from = Some(from.start);
        ledger_query.to = Some(to.end);
        bounded = true;
    } else {
        if let Some(caps) = LOWER_BOUND.captures(&lowered) {
            let span = resolve_span(&caps[2])?;
            ledger_query.from = Some(if &caps[1] == "after" {
                span.end + Duration::days(1)
            } else {
                span.start
            });
            bounded = true;
        }
        if let Some(caps) = UPPER_BOUND.captures(&lowered) {
            let span = resolve_span(&caps[2])?;
            ledger_query.to = Some(if &caps[1] == "before" || &caps[1] == "prior to" {
                span.start - Duration::days(1)
            } else {
                span.end
            });
            bounded = true;
        }
    }

    if !bounded {
        if RANGE_WORD.is_match(&lowered) {
            return Err(LedgerError::UnsupportedFilter(format!(
                "could not read the date range in '{}'",
                query.trim()
            )));
        }

        // bare periods: "in 2024", "during Q1 2024"
        let spans = ANY_DATE
            .captures_iter(&lowered)
            .map(|caps| resolve_span(&caps[1]))
            .collect::<Result<Vec<_>>>()?;
        if let (Some(start), Some(end)) = (
            spans.iter().map(|s| s.start).min(),
            spans.iter().map(|s| s.end).max(),
        ) {
            ledger_query.from = Some(start);
            ledger_query.to = Some(end);
            bounded = true;
        }
    }

    if let (Some(from), Some(to)) = (ledger_query.from, ledger_query.to) {
        if from > to {
            return Err(LedgerError::UnsupportedFilter(format!(
                "date range starts ({}) after it ends ({})",
                from, to
            )));
        }
    }

    if !(recognised || bounded) {
        return Err(LedgerError::UnsupportedFilter(format!(
            "no ledger filter recognised in '{}'",
            query.trim()
        )));
    }

    Ok(ledger_query)
}
