//! Table kind scoring.
//!
//! Each kind has weighted keywords. A keyword contributes its weight once for the
//! headers and once for the heading, scaled by the configured multipliers.

use crate::config::ExtractionConfig;
use crate::models::TableKind;
use crate::text::{contains_phrase, tokenize};

const KEYWORDS: &[(TableKind, &str, f64)] = &[
    (TableKind::CapitalCall, "capital call", 3.0),
    (TableKind::CapitalCall, "call", 1.0),
    (TableKind::CapitalCall, "drawdown", 2.0),
    (TableKind::CapitalCall, "capital contribution", 2.0),
    (TableKind::Distribution, "distribution", 3.0),
    (TableKind::Distribution, "recallable", 2.0),
    (TableKind::Distribution, "return of capital", 2.0),
    (TableKind::Distribution, "dividend", 1.0),
    (TableKind::Adjustment, "adjustment", 3.0),
    (TableKind::Adjustment, "recall", 2.0),
    (TableKind::Adjustment, "correction", 1.5),
    (TableKind::Adjustment, "true up", 1.5),
];

const KINDS: [TableKind; 3] = [
    TableKind::CapitalCall,
    TableKind::Distribution,
    TableKind::Adjustment,
];

/// Scores for every known kind plus the decision.
#[derive(Debug, Clone, PartialEq)]
pub struct TableScores {
    pub scores: Vec<(TableKind, f64)>,
    pub kind: TableKind,
    /// Why the table ended up `Unknown`, if it did.
    pub ambiguity: Option<String>,
}

pub fn score_table(headers: &[String], heading: Option<&str>, config: &ExtractionConfig) -> TableScores {
    let header_tokens: Vec<String> = headers.iter().flat_map(|h| tokenize(h)).collect();
    let heading_tokens = heading.map(tokenize).unwrap_or_default();

    // "contribution adjustment" is a column of adjustment tables, not a call signal
    let header_tokens = strip_phrase(header_tokens, "contribution adjustment");

    let mut scores: Vec<(TableKind, f64)> = KINDS.iter().map(|k| (*k, 0.0)).collect();

    for (kind, phrase, weight) in KEYWORDS {
        let mut contribution = 0.0;
        if contains_phrase(&header_tokens, phrase) {
            contribution += weight * config.header_weight;
        }
        if contains_phrase(&heading_tokens, phrase) {
            contribution += weight * config.heading_weight;
        }
        if let Some(slot) = scores.iter_mut().find(|(k, _)| k == kind) {
            slot.1 += contribution;
        }
    }

    let mut ranked = scores.clone();
    // Stable sort keeps KINDS order for equal scores, so the outcome is deterministic.
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let (top_kind, top_score) = ranked[0];
    let runner_up = ranked[1].1;

    let ambiguity = if top_score < config.min_score {
        Some(format!(
            "best score {:.1} for {} is below the minimum {:.1}",
            top_score, top_kind, config.min_score
        ))
    } else if top_score - runner_up < config.tie_margin {
        Some(format!(
            "{} ({:.1}) and {} ({:.1}) are within the tie margin {:.1}",
            top_kind, top_score, ranked[1].0, runner_up, config.tie_margin
        ))
    } else {
        None
    };

    TableScores {
        kind: if ambiguity.is_some() { TableKind::Unknown } else { top_kind },
        scores,
        ambiguity,
    }
}

fn strip_phrase(tokens: Vec<String>, phrase: &str) -> Vec<String> {
    let needle = tokenize(phrase);
    let mut out = Vec::with_capacity(tokens.len());
    let mut i = 0;
    while i < tokens.len() {
        if tokens[i..].starts_with(&needle) {
            out.push("adjustment".to_string());
            i += needle.len();
        } else {
            out.push(tokens[i].clone());
            i += 1;
        }
    }
    out
}
