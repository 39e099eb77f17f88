//! Metric glossary shared by the intent classifier and the query router.

use crate::text::{contains_phrase, tokenize};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    PaidInCapital,
    NetPaidInCapital,
    CumulativeDistributions,
    Dpi,
    Rvpi,
    Tvpi,
    Irr,
}

impl MetricKind {
    pub fn label(self) -> &'static str {
        match self {
            MetricKind::PaidInCapital => "Paid-In Capital",
            MetricKind::NetPaidInCapital => "Net Paid-In Capital",
            MetricKind::CumulativeDistributions => "Cumulative Distributions",
            MetricKind::Dpi => "DPI",
            MetricKind::Rvpi => "RVPI",
            MetricKind::Tvpi => "TVPI",
            MetricKind::Irr => "IRR",
        }
    }

    pub fn formula(self) -> &'static str {
        match self {
            MetricKind::PaidInCapital => "Σ capital calls + Σ contribution adjustments",
            MetricKind::NetPaidInCapital => "Paid-In Capital - Σ recallable distributions",
            MetricKind::CumulativeDistributions => "Σ distributions + Σ distribution adjustments",
            MetricKind::Dpi => "Cumulative Distributions / Paid-In Capital",
            MetricKind::Rvpi => "NAV / Paid-In Capital",
            MetricKind::Tvpi => "(Cumulative Distributions + NAV) / Paid-In Capital",
            MetricKind::Irr => "rate r where Σ CF_t / (1 + r)^(days_t / 365) = 0",
        }
    }

    /// Ratios against NAV cannot be computed from the ledger alone.
    pub fn requires_nav(self) -> bool {
        matches!(self, MetricKind::Rvpi | MetricKind::Tvpi)
    }

    /// Multiples are shown as `1.23x`, IRR as a percentage, the rest as money.
    pub fn is_multiple(self) -> bool {
        matches!(self, MetricKind::Dpi | MetricKind::Rvpi | MetricKind::Tvpi)
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

const METRIC_ALIASES: &[(MetricKind, &str)] = &[
    (MetricKind::NetPaidInCapital, "net paid in capital"),
    (MetricKind::NetPaidInCapital, "net pic"),
    (MetricKind::PaidInCapital, "paid in capital"),
    (MetricKind::PaidInCapital, "pic"),
    (MetricKind::PaidInCapital, "contributed capital"),
    (MetricKind::PaidInCapital, "total capital called"),
    (MetricKind::CumulativeDistributions, "cumulative distribution"),
    (MetricKind::CumulativeDistributions, "total distribution"),
    (MetricKind::CumulativeDistributions, "distributions to date"),
    (MetricKind::Dpi, "dpi"),
    (MetricKind::Dpi, "distributions to paid in"),
    (MetricKind::Dpi, "distribution to paid in capital"),
    (MetricKind::Dpi, "realization multiple"),
    (MetricKind::Rvpi, "rvpi"),
    (MetricKind::Rvpi, "residual value to paid in"),
    (MetricKind::Tvpi, "tvpi"),
    (MetricKind::Tvpi, "total value to paid in"),
    (MetricKind::Tvpi, "total value multiple"),
    (MetricKind::Irr, "irr"),
    (MetricKind::Irr, "internal rate of return"),
];

/// Non-metric fund terms that make a "what is ..." question a definition request.
pub const GLOSSARY_TERMS: &[&str] = &[
    "nav",
    "net asset value",
    "capital call",
    "distribution",
    "recallable",
    "adjustment",
    "commitment",
    "unfunded commitment",
    "vintage year",
    "carried interest",
    "management fee",
    "hurdle rate",
    "j curve",
    "general partner",
    "limited partner",
];

/// The metric named in `query`. The longest matching alias wins, so
/// "net paid-in capital" resolves to `NetPaidInCapital` rather than `PaidInCapital`.
pub fn find_metric(query: &str) -> Option<MetricKind> {
    let tokens = tokenize(query);
    find_metric_in(&tokens)
}

pub fn find_metric_in(tokens: &[String]) -> Option<MetricKind> {
    let mut best: Option<(usize, MetricKind)> = None;
    for (metric, alias) in METRIC_ALIASES {
        if !contains_phrase(tokens, alias) {
            continue;
        }
        let len = tokenize(alias).len();
        if best.map_or(true, |(best_len, _)| len > best_len) {
            best = Some((len, *metric));
        }
    }
    best.map(|(_, metric)| metric)
}

/// Whether the tokens mention any metric or glossary term.
pub fn mentions_term(tokens: &[String]) -> bool {
    find_metric_in(tokens).is_some() || GLOSSARY_TERMS.iter().any(|t| contains_phrase(tokens, t))
}
