//! Intent Classifier
//!
//! Maps a question to the path that can answer it:
//! - Definition: "what is / what does X mean" about a glossary term
//! - Calculation: a metric name plus a computation verb ("calculate the current DPI")
//! - DataRetrieval: listing or filtering ledger rows ("show all capital calls in 2024")
//! - Hybrid: comparative or explanatory questions, and anything unrecognised
//!
//! Used for dispatch only; it never answers the question.

use crate::glossary::{find_metric_in, mentions_term, MetricKind};
use crate::text::{contains_phrase, tokenize};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    Definition,
    Calculation,
    DataRetrieval,
    Hybrid,
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Intent::Definition => "DEFINITION",
            Intent::Calculation => "CALCULATION",
            Intent::DataRetrieval => "DATA_RETRIEVAL",
            Intent::Hybrid => "HYBRID",
        };
        write!(f, "{}", s)
    }
}

/// Static keyword lists, matched on whole tokens
const DEFINITION_PHRASES: &[&str] = &[
    "what is", "what are", "what does", "mean", "meaning", "define", "definition", "explain",
    "stand for",
];

const COMPUTATION_VERBS: &[&str] = &[
    "calculate", "compute", "current", "latest", "today", "as of", "how much", "what is the",
    "what s the", "give me the",
];

const STRONG_COMPUTATION_VERBS: &[&str] = &["calculate", "compute"];

const RETRIEVAL_PHRASES: &[&str] = &[
    // Listing
    "show", "list", "all", "display", "transaction", "history",
    // Ranking
    "largest", "biggest", "smallest", "top",
    // Ranges
    "between", "since", "before", "after", "until", "during",
];

const LEDGER_KIND_WORDS: &[&str] = &["capital call", "distribution", "adjustment", "call"];

const HYBRID_PHRASES: &[&str] = &[
    "compare", "compared", "comparison", "versus", "vs", "benchmark", "peer", "perform",
    "performing", "performance", "why", "trend", "relative", "how is", "how did", "outlook",
];

/// Raw keyword scores per intent
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IntentScores {
    pub definition: u32,
    pub calculation: u32,
    pub data_retrieval: u32,
    pub hybrid: u32,
}

impl IntentScores {
    pub fn get(&self, intent: Intent) -> u32 {
        match intent {
            Intent::Definition => self.definition,
            Intent::Calculation => self.calculation,
            Intent::DataRetrieval => self.data_retrieval,
            Intent::Hybrid => self.hybrid,
        }
    }

    fn is_empty(&self) -> bool {
        self.definition + self.calculation + self.data_retrieval + self.hybrid == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub intent: Intent,
    pub scores: IntentScores,
    /// Metric named in the query, if any
    pub metric: Option<MetricKind>,
}

/// Intent classifier
pub struct IntentClassifier {
    priority: [Intent; 4],
}

impl IntentClassifier {
    /// `priority` breaks ties between equal scores, highest priority first.
    pub fn new(priority: [Intent; 4]) -> Self {
        Self { priority }
    }

    pub fn classify(&self, query: &str) -> Classification {
        let tokens = tokenize(query);
        let metric = find_metric_in(&tokens);
        let scores = score(&tokens, metric);

        let intent = if scores.is_empty() {
            Intent::Hybrid
        } else {
            // first in priority order among the top scores
            let best = self.priority.iter().map(|i| scores.get(*i)).max().unwrap_or(0);
            self.priority
                .iter()
                .copied()
                .find(|i| scores.get(*i) == best)
                .unwrap_or(Intent::Hybrid)
        };

        Classification {
            intent,
            scores,
            metric,
        }
    }
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new([
            Intent::Calculation,
            Intent::DataRetrieval,
            Intent::Definition,
            Intent::Hybrid,
        ])
    }
}

fn count(tokens: &[String], phrases: &[&str]) -> u32 {
    phrases
        .iter()
        .filter(|p| contains_phrase(tokens, p))
        .count() as u32
}

fn score(tokens: &[String], metric: Option<MetricKind>) -> IntentScores {
    let mut definition = count(tokens, DEFINITION_PHRASES);
    if definition > 0 && mentions_term(tokens) {
        definition += 1;
    }

    let calculation = match metric {
        Some(_) => 1 + 2 * count(tokens, COMPUTATION_VERBS),
        None => count(tokens, STRONG_COMPUTATION_VERBS),
    };

    let has_year = tokens
        .iter()
        .any(|t| t.len() == 4 && t.parse::<u32>().map_or(false, |y| (1900..=2200).contains(&y)));
    let mut data_retrieval = count(tokens, RETRIEVAL_PHRASES) + u32::from(has_year);
    if data_retrieval > 0 && LEDGER_KIND_WORDS.iter().any(|w| contains_phrase(tokens, w)) {
        data_retrieval += 1;
    }

    let mut hybrid = count(tokens, HYBRID_PHRASES);
    if hybrid > 0 && metric.is_some() {
        hybrid += 1;
    }

    IntentScores {
        definition,
        calculation,
        data_retrieval,
        hybrid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(query: &str) -> Intent {
        IntentClassifier::default().classify(query).intent
    }

    #[test]
    fn test_reference_queries() {
        assert_eq!(classify("What is DPI?"), Intent::Definition);
        assert_eq!(classify("Calculate the current DPI"), Intent::Calculation);
        assert_eq!(classify("Show me all capital calls in 2024"), Intent::DataRetrieval);
        assert_eq!(
            classify("How is the fund performing compared to benchmarks?"),
            Intent::Hybrid
        );
    }

    #[test]
    fn test_definition_questions() {
        let cases = vec![
            "What does IRR mean?",
            "Explain recallable distributions",
            "What is a capital call?",
            "Define TVPI",
        ];

        for c in cases {
            assert_eq!(classify(c), Intent::Definition, "query: {}", c);
        }
    }

    #[test]
    fn test_calculation_questions() {
        let cases = vec![
            "What is the current TVPI?",
            "Compute IRR as of 2024-06-30",
            "How much paid-in capital do we have?",
            "What's the latest DPI",
        ];

        for c in cases {
            assert_eq!(classify(c), Intent::Calculation, "query: {}", c);
        }
    }

    #[test]
    fn test_retrieval_questions() {
        let cases = vec![
            "List distributions since January 2024",
            "What was the largest distribution?",
            "Show adjustments between 2023-01-01 and 2023-12-31",
        ];

        for c in cases {
            assert_eq!(classify(c), Intent::DataRetrieval, "query: {}", c);
        }
    }

    #[test]
    fn test_unmatched_query_defaults_to_hybrid() {
        let result = IntentClassifier::default().classify("hello there");
        assert_eq!(result.intent, Intent::Hybrid);
        assert_eq!(result.scores, IntentScores::default());
    }

    #[test]
    fn test_ties_follow_priority() {
        // "calculate" alone scores one point for calculation; "list" one for retrieval
        let query = "calculate list";
        assert_eq!(classify(query), Intent::Calculation);

        let retrieval_first = IntentClassifier::new([
            Intent::DataRetrieval,
            Intent::Calculation,
            Intent::Definition,
            Intent::Hybrid,
        ]);
        assert_eq!(retrieval_first.classify(query).intent, Intent::DataRetrieval);
    }

    #[test]
    fn test_metric_is_reported() {
        let result = IntentClassifier::default().classify("Calculate net paid-in capital");
        assert_eq!(result.metric, Some(MetricKind::NetPaidInCapital));
    }
}
