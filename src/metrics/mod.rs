//! Metrics Engine
//!
//! Pure computations over a committed ledger snapshot. Every metric takes an `as_of`
//! date and ignores entries dated after it.
//!
//! Undefined results are errors (`InsufficientData`, `DivisionUndefined`,
//! `IrrUndefined`), never zero.

pub mod irr;

use crate::error::LedgerError;
use crate::glossary::MetricKind;
use crate::models::{FundId, LedgerEntry, LedgerEvent};
use crate::Result;
use chrono::NaiveDate;
use irr::{build_cash_flows, solve_irr, CashFlow};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ================= Snapshot =================

/// A fund's committed ledger, sorted by date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub fund_id: FundId,
    entries: Vec<LedgerEntry>,
}

impl LedgerSnapshot {
    pub fn new(fund_id: FundId, mut entries: Vec<LedgerEntry>) -> Self {
        entries.sort_by(|a, b| {
            a.date()
                .cmp(&b.date())
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        Self { fund_id, entries }
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries dated on or before `as_of`.
    pub fn visible(&self, as_of: NaiveDate) -> impl Iterator<Item = &LedgerEntry> {
        self.entries.iter().take_while(move |e| e.date() <= as_of)
    }

    /// Date of the latest entry.
    pub fn last_date(&self) -> Option<NaiveDate> {
        self.entries.last().map(LedgerEntry::date)
    }
}

/// Running sums by ledger side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTotals {
    pub capital_calls: Decimal,
    pub contribution_adjustments: Decimal,
    pub distributions: Decimal,
    pub distribution_adjustments: Decimal,
    pub recallable_distributions: Decimal,
    pub call_count: usize,
    pub entry_count: usize,
}

// ================= Results =================

/// A metric that may be undefined for the ledger it was computed on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MetricValue {
    Value { value: Decimal },
    Unavailable { reason: String },
}

impl MetricValue {
    pub fn from_result(result: Result<Decimal>) -> Self {
        match result {
            Ok(value) => MetricValue::Value { value },
            Err(e) => MetricValue::Unavailable {
                reason: e.to_string(),
            },
        }
    }

    pub fn value(&self) -> Option<Decimal> {
        match self {
            MetricValue::Value { value } => Some(*value),
            MetricValue::Unavailable { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub fund_id: FundId,
    pub as_of: NaiveDate,
    pub entry_count: usize,
    pub nav: Option<Decimal>,
    pub paid_in_capital: MetricValue,
    pub net_paid_in_capital: MetricValue,
    pub cumulative_distributions: MetricValue,
    pub dpi: MetricValue,
    pub rvpi: MetricValue,
    pub tvpi: MetricValue,
    pub irr: MetricValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakdownComponent {
    pub label: String,
    pub amount: Decimal,
}

/// Inputs and intermediate values behind one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationBreakdown {
    pub metric: MetricKind,
    pub formula: String,
    pub as_of: NaiveDate,
    pub entry_count: usize,
    pub components: Vec<BreakdownComponent>,
    pub cash_flows: Vec<CashFlow>,
    pub result: Decimal,
}

// ================= Engine =================

pub struct MetricsEngine<'a> {
    ledger: &'a LedgerSnapshot,
}

impl<'a> MetricsEngine<'a> {
    pub fn new(ledger: &'a LedgerSnapshot) -> Self {
        Self { ledger }
    }

    /// Side totals of the entries visible at `as_of`. Sums are checked: a ledger whose
    /// totals leave the decimal range is an `ArithmeticOverflow`, not a panic.
    pub fn totals(&self, as_of: NaiveDate) -> Result<LedgerTotals> {
        let mut totals = LedgerTotals::default();
        for entry in self.ledger.visible(as_of) {
            totals.entry_count += 1;
            match &entry.event {
                LedgerEvent::CapitalCall(c) => {
                    totals.capital_calls = checked_sum("capital calls", totals.capital_calls, c.amount)?;
                    totals.call_count += 1;
                }
                LedgerEvent::Distribution(d) => {
                    totals.distributions = checked_sum("distributions", totals.distributions, d.amount)?;
                    if d.is_recallable {
                        totals.recallable_distributions = checked_sum(
                            "recallable distributions",
                            totals.recallable_distributions,
                            d.amount,
                        )?;
                    }
                }
                LedgerEvent::Adjustment(a) if a.is_contribution_adjustment => {
                    totals.contribution_adjustments = checked_sum(
                        "contribution adjustments",
                        totals.contribution_adjustments,
                        a.amount,
                    )?;
                }
                LedgerEvent::Adjustment(a) => {
                    totals.distribution_adjustments = checked_sum(
                        "distribution adjustments",
                        totals.distribution_adjustments,
                        a.amount,
                    )?;
                }
            }
        }
        Ok(totals)
    }

    /// Σ capital calls + Σ signed contribution-side adjustments.
    pub fn paid_in_capital(&self, as_of: NaiveDate) -> Result<Decimal> {
        let totals = self.totals(as_of)?;
        if totals.call_count == 0 {
            return Err(LedgerError::InsufficientData(format!(
                "no capital calls recorded on or before {}",
                as_of
            )));
        }
        checked_sum("paid-in capital", totals.capital_calls, totals.contribution_adjustments)
    }

    /// Paid-in capital less distributions that remain recallable.
    pub fn net_paid_in_capital(&self, as_of: NaiveDate) -> Result<Decimal> {
        let pic = self.paid_in_capital(as_of)?;
        checked_sum("net paid-in capital", pic, -self.totals(as_of)?.recallable_distributions)
    }

    /// Σ distributions + Σ signed distribution-side adjustments.
    ///
    /// A recallable distribution counts from its own date; a later recall shows up as a
    /// negative adjustment on its own date.
    pub fn cumulative_distributions(&self, as_of: NaiveDate) -> Result<Decimal> {
        let totals = self.totals(as_of)?;
        checked_sum("cumulative distributions", totals.distributions, totals.distribution_adjustments)
    }

    pub fn dpi(&self, as_of: NaiveDate) -> Result<Decimal> {
        let distributions = self.cumulative_distributions(as_of)?;
        ratio("DPI", distributions, self.paid_in_capital(as_of)?)
    }

    pub fn tvpi(&self, as_of: NaiveDate, nav: Decimal) -> Result<Decimal> {
        let distributions = self.cumulative_distributions(as_of)?;
        let total_value = checked_sum("total value", distributions, nav)?;
        ratio("TVPI", total_value, self.paid_in_capital(as_of)?)
    }

    pub fn rvpi(&self, as_of: NaiveDate, nav: Decimal) -> Result<Decimal> {
        ratio("RVPI", nav, self.paid_in_capital(as_of)?)
    }

    /// Annual IRR as a fraction (0.12 = 12%).
    ///
    /// An empty ledger at `as_of` is `InsufficientData` (nothing to compute on). Flows
    /// that exist but never change sign are `IrrUndefined` (no rate solves them).
    pub fn irr(&self, as_of: NaiveDate) -> Result<Decimal> {
        let flows = self.cash_flows(as_of)?;
        if flows.is_empty() {
            return Err(LedgerError::InsufficientData(format!(
                "no cash flows recorded on or before {}",
                as_of
            )));
        }
        solve_irr(&flows)
    }

    pub fn cash_flows(&self, as_of: NaiveDate) -> Result<Vec<CashFlow>> {
        build_cash_flows(self.ledger.entries(), as_of)
    }

    /// Dispatch by metric. NAV-based ratios fail with `InsufficientData` without a NAV.
    pub fn compute(&self, metric: MetricKind, as_of: NaiveDate, nav: Option<Decimal>) -> Result<Decimal> {
        match metric {
            MetricKind::PaidInCapital => self.paid_in_capital(as_of),
            MetricKind::NetPaidInCapital => self.net_paid_in_capital(as_of),
            MetricKind::CumulativeDistributions => self.cumulative_distributions(as_of),
            MetricKind::Dpi => self.dpi(as_of),
            MetricKind::Irr => self.irr(as_of),
            MetricKind::Tvpi => self.tvpi(as_of, require_nav(metric, nav)?),
            MetricKind::Rvpi => self.rvpi(as_of, require_nav(metric, nav)?),
        }
    }

    pub fn summary(&self, as_of: NaiveDate, nav: Option<Decimal>) -> MetricsSummary {
        let value = |metric| MetricValue::from_result(self.compute(metric, as_of, nav));

        MetricsSummary {
            fund_id: self.ledger.fund_id,
            as_of,
            entry_count: self.ledger.visible(as_of).count(),
            nav,
            paid_in_capital: value(MetricKind::PaidInCapital),
            net_paid_in_capital: value(MetricKind::NetPaidInCapital),
            cumulative_distributions: value(MetricKind::CumulativeDistributions),
            dpi: value(MetricKind::Dpi),
            rvpi: value(MetricKind::Rvpi),
            tvpi: value(MetricKind::Tvpi),
            irr: value(MetricKind::Irr),
        }
    }

    pub fn breakdown(
        &self,
        metric: MetricKind,
        as_of: NaiveDate,
        nav: Option<Decimal>,
    ) -> Result<CalculationBreakdown> {
        let result = self.compute(metric, as_of, nav)?;
        let totals = self.totals(as_of)?;

        let component = |label: &str, amount: Decimal| BreakdownComponent {
            label: label.to_string(),
            amount,
        };
        let pic_parts = vec![
            component("capital calls", totals.capital_calls),
            component("contribution adjustments", totals.contribution_adjustments),
        ];
        let distribution_parts = vec![
            component("distributions", totals.distributions),
            component("distribution adjustments", totals.distribution_adjustments),
        ];

        let mut cash_flows = Vec::new();
        let components = match metric {
            MetricKind::PaidInCapital => pic_parts,
            MetricKind::NetPaidInCapital => {
                let mut parts = pic_parts;
                parts.push(component("recallable distributions", totals.recallable_distributions));
                parts
            }
            MetricKind::CumulativeDistributions => distribution_parts,
            MetricKind::Dpi => {
                let mut parts = distribution_parts;
                parts.extend(pic_parts);
                parts
            }
            MetricKind::Tvpi | MetricKind::Rvpi => {
                let mut parts = if metric == MetricKind::Tvpi {
                    distribution_parts
                } else {
                    Vec::new()
                };
                parts.push(component("nav", nav.unwrap_or_default()));
                parts.extend(pic_parts);
                parts
            }
            MetricKind::Irr => {
                cash_flows = self.cash_flows(as_of)?;
                let mut outflows = Decimal::ZERO;
                let mut inflows = Decimal::ZERO;
                for flow in &cash_flows {
                    if flow.amount < Decimal::ZERO {
                        outflows = checked_sum("outflows", outflows, flow.amount)?;
                    } else {
                        inflows = checked_sum("inflows", inflows, flow.amount)?;
                    }
                }
                vec![
                    component("total outflows", outflows),
                    component("total inflows", inflows),
                    component("net cash flow", checked_sum("net cash flow", outflows, inflows)?),
                ]
            }
        };

        Ok(CalculationBreakdown {
            metric,
            formula: metric.formula().to_string(),
            as_of,
            entry_count: totals.entry_count,
            components,
            cash_flows,
            result,
        })
    }
}

fn require_nav(metric: MetricKind, nav: Option<Decimal>) -> Result<Decimal> {
    nav.ok_or_else(|| {
        LedgerError::InsufficientData(format!("{} needs the fund's current NAV", metric))
    })
}

fn checked_sum(label: &str, a: Decimal, b: Decimal) -> Result<Decimal> {
    a.checked_add(b).ok_or_else(|| {
        LedgerError::ArithmeticOverflow(format!("{} exceed the representable amount range", label))
    })
}

fn ratio(name: &str, numerator: Decimal, paid_in_capital: Decimal) -> Result<Decimal> {
    if paid_in_capital <= Decimal::ZERO {
        return Err(LedgerError::DivisionUndefined(format!(
            "{} is undefined while paid-in capital is {}",
            name, paid_in_capital
        )));
    }
    numerator
        .checked_div(paid_in_capital)
        .ok_or_else(|| LedgerError::DivisionUndefined(format!("{} overflowed", name)))
}

// ================= Formatting =================

/// Render a metric value for an answer: money with separators, multiples as `0.40x`,
/// IRR as a percentage.
pub fn format_metric(metric: MetricKind, value: Decimal) -> String {
    if metric == MetricKind::Irr {
        format!("{:.2}%", (value * Decimal::ONE_HUNDRED).round_dp(2))
    } else if metric.is_multiple() {
        format!("{:.2}x", value.round_dp(2))
    } else {
        format_money(value)
    }
}

pub fn format_money(value: Decimal) -> String {
    let rounded = value.round_dp(2).abs();
    let text = format!("{:.2}", rounded);
    let (whole, cents) = text.split_once('.').unwrap_or((text.as_str(), "00"));

    let mut grouped = String::new();
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if value < Decimal::ZERO { "-" } else { "" };
    format!("{}${}.{}", sign, grouped, cents)
}
