//! Internal Rate of Return over dated cash flows
//!
//! Flows are netted per calendar date and discounted on an actual/365 basis:
//! Σ CF_t / (1 + r)^(days_t / 365) = 0, with t measured from the first flow.

use crate::error::LedgerError;
use crate::models::{LedgerEntry, LedgerEvent};
use crate::Result;
use chrono::NaiveDate;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Rates scanned for a sign change before bisecting.
const SCAN_GRID: &[f64] = &[
    -0.99, -0.9, -0.75, -0.5, -0.25, -0.1, 0.0, 0.05, 0.1, 0.2, 0.35, 0.5, 0.75, 1.0, 1.5, 2.0,
    3.0, 5.0, 7.5, 10.0,
];

const TOLERANCE: f64 = 1e-10;
const MAX_ITERATIONS: usize = 200;

/// Net investor cash flow on one date. Negative = paid in, positive = received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashFlow {
    pub date: NaiveDate,
    pub amount: Decimal,
}

/// Investor-perspective sign of a ledger event.
pub fn signed_flow(event: &LedgerEvent) -> Decimal {
    match event {
        LedgerEvent::CapitalCall(c) => -c.amount,
        LedgerEvent::Distribution(d) => d.amount,
        LedgerEvent::Adjustment(a) if a.is_contribution_adjustment => -a.amount,
        LedgerEvent::Adjustment(a) => a.amount,
    }
}

/// Signed flows of all entries on or before `as_of`, one per date, in date order.
pub fn build_cash_flows<'a>(
    entries: impl IntoIterator<Item = &'a LedgerEntry>,
    as_of: NaiveDate,
) -> Result<Vec<CashFlow>> {
    let mut by_date: BTreeMap<NaiveDate, Decimal> = BTreeMap::new();
    for entry in entries {
        if entry.date() > as_of {
            continue;
        }
        let net = by_date.entry(entry.date()).or_insert(Decimal::ZERO);
        *net = net.checked_add(signed_flow(&entry.event)).ok_or_else(|| {
            LedgerError::ArithmeticOverflow(format!("cash flows on {} exceed the representable amount range", entry.date()))
        })?;
    }

    Ok(by_date
        .into_iter()
        .map(|(date, amount)| CashFlow { date, amount })
        .collect())
}

/// Solve for the annual IRR of already-netted flows.
pub fn solve_irr(flows: &[CashFlow]) -> Result<Decimal> {
    let has_negative = flows.iter().any(|f| f.amount < Decimal::ZERO);
    let has_positive = flows.iter().any(|f| f.amount > Decimal::ZERO);
    if !has_negative || !has_positive {
        return Err(LedgerError::IrrUndefined(
            "cash flows need at least one outflow and one inflow".to_string(),
        ));
    }

    let series = to_year_fractions(flows)?;
    let rate = find_root(&series).ok_or_else(|| {
        LedgerError::IrrUndefined("no rate between -99% and 1000% sets NPV to zero".to_string())
    })?;

    Decimal::from_f64(rate)
        .map(|d| d.round_dp(6))
        .ok_or_else(|| LedgerError::IrrUndefined(format!("rate {} is not representable", rate)))
}

fn to_year_fractions(flows: &[CashFlow]) -> Result<Vec<(f64, f64)>> {
    let start = flows[0].date;
    flows
        .iter()
        .map(|f| {
            let years = (f.date - start).num_days() as f64 / 365.0;
            let amount = f.amount.to_f64().ok_or_else(|| {
                LedgerError::IrrUndefined(format!("amount {} is out of range", f.amount))
            })?;
            Ok((years, amount))
        })
        .collect()
}

/// Net present value at `rate`.
pub(crate) fn npv_at_rate(series: &[(f64, f64)], rate: f64) -> f64 {
    series
        .iter()
        .map(|(years, amount)| amount / (1.0 + rate).powf(*years))
        .sum()
}

fn find_root(series: &[(f64, f64)]) -> Option<f64> {
    let mut previous: Option<(f64, f64)> = None;

    for &rate in SCAN_GRID {
        let npv = npv_at_rate(series, rate);
        if !npv.is_finite() {
            previous = None;
            continue;
        }
        if npv.abs() < TOLERANCE {
            return Some(rate);
        }
        if let Some((low, npv_low)) = previous {
            if npv_low * npv < 0.0 {
                return bisect(series, low, rate, npv_low);
            }
        }
        previous = Some((rate, npv));
    }

    None
}

fn bisect(series: &[(f64, f64)], mut low: f64, mut high: f64, mut npv_low: f64) -> Option<f64> {
    for _ in 0..MAX_ITERATIONS {
        let mid = (low + high) / 2.0;
        let npv_mid = npv_at_rate(series, mid);

        if npv_mid.abs() < TOLERANCE || (high - low) / 2.0 < TOLERANCE {
            return Some(mid);
        }

        if npv_low * npv_mid < 0.0 {
            high = mid;
        } else {
            low = mid;
            npv_low = npv_mid;
        }
    }

    Some((low + high) / 2.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn flow(y: i32, m: u32, d: u32, amount: i64) -> CashFlow {
        CashFlow {
            date: NaiveDate::from_ymd_opt(y, m, d).unwrap(),
            amount: Decimal::from(amount),
        }
    }

    fn as_f64(d: Decimal) -> f64 {
        d.to_f64().unwrap()
    }

    #[test]
    fn test_break_even_is_zero() {
        let flows = vec![flow(2023, 1, 1, -10_000_000), flow(2024, 1, 1, 10_000_000)];
        assert_abs_diff_eq!(as_f64(solve_irr(&flows).unwrap()), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_ten_percent_over_one_year() {
        let flows = vec![flow(2023, 1, 1, -1_000), flow(2024, 1, 1, 1_100)];
        assert_abs_diff_eq!(as_f64(solve_irr(&flows).unwrap()), 0.10, epsilon = 1e-5);
    }

    #[test]
    fn test_loss_gives_negative_rate() {
        let flows = vec![flow(2023, 1, 1, -1_000), flow(2024, 1, 1, 500)];
        assert_abs_diff_eq!(as_f64(solve_irr(&flows).unwrap()), -0.5, epsilon = 1e-5);
    }

    #[test]
    fn test_one_sided_flows_are_undefined() {
        let flows = vec![flow(2023, 1, 1, -1_000), flow(2024, 1, 1, -500)];
        assert!(matches!(solve_irr(&flows), Err(LedgerError::IrrUndefined(_))));
    }

    #[test]
    fn test_no_bracket_is_undefined() {
        // a 100x return in one day is far above the search range
        let flows = vec![flow(2023, 1, 1, -1), flow(2023, 1, 2, 100)];
        assert!(matches!(solve_irr(&flows), Err(LedgerError::IrrUndefined(_))));
    }
}
