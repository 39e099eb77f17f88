//! Query Router
//!
//! QUERY → CLASSIFY → (METRICS | LEDGER FILTER | RETRIEVAL | METRICS + RETRIEVAL) → ANSWER
//!
//! Numbers always come from the Metrics Engine or the ledger; the language model only
//! phrases answers around retrieved passages and computed figures.

pub mod filters;

use crate::classifier::{Intent, IntentClassifier};
use crate::config::QueryConfig;
use crate::error::LedgerError;
use crate::glossary::{find_metric, MetricKind};
use crate::metrics::{format_metric, format_money, CalculationBreakdown, MetricsEngine, MetricValue};
use crate::models::{DocumentId, FundId, LedgerEntry};
use crate::retrieval::{RetrievedChunk, SemanticRetriever};
use crate::store::{total_amount, LedgerQuery, LedgerStore, Rank};
use crate::Result;
use chrono::{NaiveDate, Utc};
use filters::{parse_as_of, parse_ledger_query};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const EXCERPT_CHARS: usize = 160;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub fund_id: FundId,
    pub query: String,
    /// Evaluation date; defaults to today unless the query names one
    pub as_of: Option<NaiveDate>,
    /// Needed for TVPI and RVPI
    pub current_nav: Option<Decimal>,
}

impl QueryRequest {
    pub fn new(fund_id: FundId, query: impl Into<String>) -> Self {
        Self {
            fund_id,
            query: query.into(),
            as_of: None,
            current_nav: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub chunk_id: Uuid,
    pub document_id: DocumentId,
    pub chunk_index: usize,
    pub score: f32,
    pub excerpt: String,
}

impl From<&RetrievedChunk> for Citation {
    fn from(retrieved: &RetrievedChunk) -> Self {
        Self {
            chunk_id: retrieved.chunk.id,
            document_id: retrieved.chunk.document_id,
            chunk_index: retrieved.chunk.chunk_index,
            score: retrieved.score,
            excerpt: retrieved.chunk.content.chars().take(EXCERPT_CHARS).collect(),
        }
    }
}

/// A computed metric with the basis it was computed on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationResult {
    pub metric: MetricKind,
    pub value: Decimal,
    pub formatted: String,
    pub as_of: NaiveDate,
    pub entry_count: usize,
    pub breakdown: CalculationBreakdown,
}

impl CalculationResult {
    pub fn describe(&self) -> String {
        format!(
            "{} as of {} is {} ({}, computed from {} ledger entries)",
            self.metric,
            self.as_of,
            self.formatted,
            self.metric.formula(),
            self.entry_count
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub intent: Intent,
    pub text: String,
    pub calculation: Option<CalculationResult>,
    pub ledger_rows: Vec<LedgerEntry>,
    pub citations: Vec<Citation>,
    /// Caveats: suppressed errors, fallbacks, truncation
    pub notes: Vec<String>,
}

impl Answer {
    fn new(intent: Intent, text: String) -> Self {
        Self {
            intent,
            text,
            calculation: None,
            ledger_rows: Vec::new(),
            citations: Vec::new(),
            notes: Vec::new(),
        }
    }
}

pub struct QueryRouter {
    store: Arc<dyn LedgerStore>,
    retriever: Arc<SemanticRetriever>,
    classifier: IntentClassifier,
    config: QueryConfig,
}

impl QueryRouter {
    pub fn new(store: Arc<dyn LedgerStore>, retriever: Arc<SemanticRetriever>, config: QueryConfig) -> Self {
        Self {
            store,
            retriever,
            classifier: IntentClassifier::new(config.intent_priority),
            config,
        }
    }

    pub async fn answer(&self, request: &QueryRequest) -> Result<Answer> {
        let classification = self.classifier.classify(&request.query);
        info!(
            fund_id = %request.fund_id,
            intent = %classification.intent,
            metric = ?classification.metric,
            "Routing query"
        );

        match classification.intent {
            Intent::Definition => self.answer_definition(request, classification.metric).await,
            Intent::Calculation => self.answer_calculation(request).await,
            Intent::DataRetrieval => self.answer_retrieval(request).await,
            Intent::Hybrid => self.answer_hybrid(request).await,
        }
    }

    // =============================
    // Paths
    // =============================

    async fn answer_definition(&self, request: &QueryRequest, metric: Option<MetricKind>) -> Result<Answer> {
        let chunks = self.retriever.retrieve(&request.query, Some(request.fund_id)).await?;

        if chunks.is_empty() {
            // fall back to the glossary for metric names
            return match metric {
                Some(metric) => {
                    let mut answer = Answer::new(
                        Intent::Definition,
                        format!("{} = {}", metric, metric.formula()),
                    );
                    answer
                        .notes
                        .push("No document text matched; answered from the metric glossary".to_string());
                    Ok(answer)
                }
                None => Err(LedgerError::NoAnswerAvailable(
                    "no document text matches the question".to_string(),
                )),
            };
        }

        let text = self.retriever.generate_answer(&request.query, &chunks, &[]).await?;
        let mut answer = Answer::new(Intent::Definition, text);
        answer.citations = chunks.iter().map(Citation::from).collect();
        Ok(answer)
    }

    async fn answer_calculation(&self, request: &QueryRequest) -> Result<Answer> {
        let metric = find_metric(&request.query)
            .ok_or_else(|| LedgerError::UnknownMetric(request.query.trim().to_string()))?;
        let calculation = self.calculate(request, metric).await?;

        let mut answer = Answer::new(Intent::Calculation, calculation.describe());
        answer.calculation = Some(calculation);
        Ok(answer)
    }

    async fn answer_retrieval(&self, request: &QueryRequest) -> Result<Answer> {
        let query = parse_ledger_query(&request.query, request.fund_id, self.config.max_rows)?;
        debug!(?query, "Ledger query");

        let rows = self.store.query_ledger(&query).await?;
        let mut answer = Answer::new(Intent::DataRetrieval, describe_rows(&query, &rows)?);
        if query.rank.is_none() && rows.len() == query.limit {
            answer
                .notes
                .push(format!("Showing the first {} matching entries", query.limit));
        }
        answer.ledger_rows = rows;
        Ok(answer)
    }

    /// Calculation and retrieval run concurrently; whichever produced something is merged.
    async fn answer_hybrid(&self, request: &QueryRequest) -> Result<Answer> {
        let metric = find_metric(&request.query);

        let (figures, chunks) = tokio::join!(
            self.hybrid_figures(request, metric),
            self.retriever.retrieve(&request.query, Some(request.fund_id)),
        );

        let mut notes = Vec::new();
        let (calculation, context) = match figures {
            Ok(figures) => figures,
            Err(e) if e.is_query_level() => {
                notes.push(e.to_string());
                (None, Vec::new())
            }
            Err(e) => return Err(e),
        };

        let chunks = match chunks {
            Ok(chunks) => chunks,
            Err(e @ LedgerError::UpstreamUnavailable { .. }) if !context.is_empty() => {
                warn!(error = %e, "Retrieval unavailable, answering from figures only");
                notes.push(e.to_string());
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        if context.is_empty() && chunks.is_empty() {
            return Err(LedgerError::NoAnswerAvailable(
                "neither the ledger nor the documents answer this question".to_string(),
            ));
        }

        let text = if chunks.is_empty() {
            context.join("\n")
        } else {
            match self.retriever.generate_answer(&request.query, &chunks, &context).await {
                Ok(text) => text,
                Err(e) if !context.is_empty() => {
                    notes.push(e.to_string());
                    context.join("\n")
                }
                Err(e) => return Err(e),
            }
        };

        let mut answer = Answer::new(Intent::Hybrid, text);
        answer.calculation = calculation;
        answer.citations = chunks.iter().map(Citation::from).collect();
        answer.notes = notes;
        Ok(answer)
    }

    /// The named metric, or a summary of every available metric when none is named.
    async fn hybrid_figures(
        &self,
        request: &QueryRequest,
        metric: Option<MetricKind>,
    ) -> Result<(Option<CalculationResult>, Vec<String>)> {
        if let Some(metric) = metric {
            let calculation = self.calculate(request, metric).await?;
            let line = calculation.describe();
            return Ok((Some(calculation), vec![line]));
        }

        let as_of = self.resolve_as_of(request)?;
        let snapshot = self.store.read_ledger(request.fund_id, Some(as_of)).await?;
        if snapshot.is_empty() {
            return Ok((None, Vec::new()));
        }
        let summary = MetricsEngine::new(&snapshot).summary(as_of, request.current_nav);

        let lines = [
            (MetricKind::PaidInCapital, &summary.paid_in_capital),
            (MetricKind::CumulativeDistributions, &summary.cumulative_distributions),
            (MetricKind::Dpi, &summary.dpi),
            (MetricKind::Tvpi, &summary.tvpi),
            (MetricKind::Irr, &summary.irr),
        ]
        .iter()
        .filter_map(|(metric, value)| match value {
            MetricValue::Value { value } => Some(format!(
                "{} as of {}: {}",
                metric,
                as_of,
                format_metric(*metric, *value)
            )),
            MetricValue::Unavailable { .. } => None,
        })
        .collect();

        Ok((None, lines))
    }

    async fn calculate(&self, request: &QueryRequest, metric: MetricKind) -> Result<CalculationResult> {
        let as_of = self.resolve_as_of(request)?;
        let snapshot = self.store.read_ledger(request.fund_id, Some(as_of)).await?;
        let breakdown = MetricsEngine::new(&snapshot).breakdown(metric, as_of, request.current_nav)?;

        Ok(CalculationResult {
            metric,
            value: breakdown.result,
            formatted: format_metric(metric, breakdown.result),
            as_of,
            entry_count: breakdown.entry_count,
            breakdown,
        })
    }

    fn resolve_as_of(&self, request: &QueryRequest) -> Result<NaiveDate> {
        Ok(parse_as_of(&request.query)?
            .or(request.as_of)
            .unwrap_or_else(|| Utc::now().date_naive()))
    }
}

fn describe_rows(query: &LedgerQuery, rows: &[LedgerEntry]) -> Result<String> {
    let mut noun = if query.kinds.is_empty() {
        "ledger entries".to_string()
    } else {
        query
            .kinds
            .iter()
            .map(|kind| format!("{}s", kind))
            .collect::<Vec<_>>()
            .join(" and ")
    };
    match query.recallable {
        Some(true) => noun = format!("recallable {}", noun),
        Some(false) => noun = format!("non-recallable {}", noun),
        None => {}
    }

    if let Some(rank) = query.rank {
        let Some(row) = rows.first() else {
            return Ok(format!("No {} match the filter.", noun));
        };
        let which = match rank {
            Rank::Largest => "Largest",
            Rank::Smallest => "Smallest",
        };
        return Ok(format!(
            "{} {}: {} on {}{}",
            which,
            row.kind(),
            format_money(row.amount()),
            row.date(),
            row.event
                .description()
                .map(|d| format!(" ({})", d))
                .unwrap_or_default()
        ));
    }

    if rows.is_empty() {
        return Ok(format!("No {} match the filter.", noun));
    }

    let period = match (query.from, query.to) {
        (Some(from), Some(to)) => format!(" between {} and {}", from, to),
        (Some(from), None) => format!(" since {}", from),
        (None, Some(to)) => format!(" up to {}", to),
        (None, None) => String::new(),
    };

    Ok(format!(
        "Found {} {}{} totaling {}.",
        rows.len(),
        noun,
        period,
        format_money(total_amount(rows)?)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UpstreamPolicy;
    use crate::models::{CapitalCall, Distribution, FundProfile, LedgerEvent, NewLedgerEntry, TextChunk};
    use crate::retrieval::memory::{ExtractiveGenerator, HashingEmbedder, InMemoryChunkIndex};
    use crate::retrieval::{ChunkIndex, Embedder, TextGenerator};
    use crate::store::InMemoryLedgerStore;

    struct UnavailableGenerator;

    #[async_trait::async_trait]
    impl TextGenerator for UnavailableGenerator {
        async fn generate(&self, _prompt: &str, _context: &[String]) -> Result<String> {
            Err(LedgerError::LlmError("model offline".to_string()))
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    struct Harness {
        router: QueryRouter,
        fund_id: FundId,
    }

    async fn harness(generator: Arc<dyn TextGenerator>, passages: &[&str]) -> Harness {
        let store = Arc::new(InMemoryLedgerStore::new());
        let fund = store.create_fund("Tech Ventures Fund III", FundProfile::default()).await.unwrap();

        let call = |d, amount: i64| {
            NewLedgerEntry::manual(
                fund.id,
                LedgerEvent::CapitalCall(CapitalCall {
                    date: d,
                    amount: Decimal::from(amount),
                    call_type: None,
                    description: None,
                }),
            )
        };
        let distribution = |d, amount: i64, recallable| {
            NewLedgerEntry::manual(
                fund.id,
                LedgerEvent::Distribution(Distribution {
                    date: d,
                    amount: Decimal::from(amount),
                    is_recallable: recallable,
                    distribution_type: None,
                    description: None,
                }),
            )
        };
        store
            .insert_ledger_entries(
                fund.id,
                vec![
                    call(date(2023, 1, 15), 5_000_000),
                    call(date(2023, 6, 20), 3_000_000),
                    call(date(2024, 3, 10), 2_000_000),
                    distribution(date(2023, 12, 15), 1_500_000, false),
                    distribution(date(2024, 6, 30), 2_500_000, true),
                ],
            )
            .await
            .unwrap();

        let embedder = Arc::new(HashingEmbedder::default());
        let index = Arc::new(InMemoryChunkIndex::new());
        let document_id = Uuid::new_v4();
        let chunks: Vec<TextChunk> = passages
            .iter()
            .enumerate()
            .map(|(i, p)| TextChunk {
                id: Uuid::new_v4(),
                document_id,
                fund_id: fund.id,
                chunk_index: i,
                content: p.to_string(),
            })
            .collect();
        if !chunks.is_empty() {
            let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
            let vectors = embedder.embed(&texts).await.unwrap();
            index.index_chunks(&chunks, vectors).await.unwrap();
        }

        let retriever = Arc::new(SemanticRetriever::new(
            embedder,
            index,
            generator,
            UpstreamPolicy::default(),
            3,
        ));

        Harness {
            router: QueryRouter::new(store, retriever, QueryConfig::default()),
            fund_id: fund.id,
        }
    }

    #[tokio::test]
    async fn test_calculation_uses_ledger() {
        let h = harness(Arc::new(ExtractiveGenerator), &[]).await;
        let mut request = QueryRequest::new(h.fund_id, "Calculate the current DPI");
        request.as_of = Some(date(2024, 12, 31));

        let answer = h.router.answer(&request).await.unwrap();
        assert_eq!(answer.intent, Intent::Calculation);
        let calculation = answer.calculation.unwrap();
        assert_eq!(calculation.metric, MetricKind::Dpi);
        assert_eq!(calculation.value, Decimal::new(4, 1));
        assert_eq!(calculation.entry_count, 5);
        assert!(answer.text.contains("0.40x"));
    }

    #[tokio::test]
    async fn test_as_of_in_query_wins() {
        let h = harness(Arc::new(ExtractiveGenerator), &[]).await;
        let request = QueryRequest::new(h.fund_id, "Calculate paid-in capital as of 2023-12-31");

        let answer = h.router.answer(&request).await.unwrap();
        let calculation = answer.calculation.unwrap();
        assert_eq!(calculation.as_of, date(2023, 12, 31));
        assert_eq!(calculation.value, Decimal::from(8_000_000));
    }

    #[tokio::test]
    async fn test_tvpi_without_nav_is_query_error() {
        let h = harness(Arc::new(ExtractiveGenerator), &[]).await;
        let request = QueryRequest::new(h.fund_id, "Calculate the current TVPI");

        let err = h.router.answer(&request).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientData(_)));
        assert!(err.is_query_level());
    }

    #[tokio::test]
    async fn test_retrieval_lists_rows() {
        let h = harness(Arc::new(ExtractiveGenerator), &[]).await;
        let request = QueryRequest::new(h.fund_id, "Show me all capital calls in 2023");

        let answer = h.router.answer(&request).await.unwrap();
        assert_eq!(answer.intent, Intent::DataRetrieval);
        assert_eq!(answer.ledger_rows.len(), 2);
        assert!(answer.text.contains("$8,000,000.00"));
    }

    #[tokio::test]
    async fn test_retrieval_superlative() {
        let h = harness(Arc::new(ExtractiveGenerator), &[]).await;
        let request = QueryRequest::new(h.fund_id, "What was the largest distribution?");

        let answer = h.router.answer(&request).await.unwrap();
        assert_eq!(answer.ledger_rows.len(), 1);
        assert_eq!(answer.ledger_rows[0].amount(), Decimal::from(2_500_000));
    }

    #[tokio::test]
    async fn test_retrieval_recallable_distributions() {
        let h = harness(Arc::new(ExtractiveGenerator), &[]).await;
        let request = QueryRequest::new(h.fund_id, "Show all recallable distributions");

        let answer = h.router.answer(&request).await.unwrap();
        assert_eq!(answer.ledger_rows.len(), 1);
        assert_eq!(answer.ledger_rows[0].amount(), Decimal::from(2_500_000));
        assert!(answer.text.contains("recallable distributions"));
    }

    #[tokio::test]
    async fn test_retrieval_amount_threshold_is_unsupported() {
        let h = harness(Arc::new(ExtractiveGenerator), &[]).await;
        let request = QueryRequest::new(h.fund_id, "Show all distributions above 5000");

        let err = h.router.answer(&request).await.unwrap_err();
        assert!(matches!(err, LedgerError::UnsupportedFilter(_)));
        assert!(err.is_query_level());
    }

    #[tokio::test]
    async fn test_definition_cites_chunks() {
        let h = harness(
            Arc::new(ExtractiveGenerator),
            &["DPI is the ratio of cumulative distributions to paid-in capital."],
        )
        .await;
        let request = QueryRequest::new(h.fund_id, "What is DPI?");

        let answer = h.router.answer(&request).await.unwrap();
        assert_eq!(answer.intent, Intent::Definition);
        assert_eq!(answer.citations.len(), 1);
        assert!(answer.text.contains("ratio of cumulative distributions"));
    }

    #[tokio::test]
    async fn test_definition_without_text_falls_back_to_glossary() {
        let h = harness(Arc::new(ExtractiveGenerator), &[]).await;
        let answer = h
            .router
            .answer(&QueryRequest::new(h.fund_id, "What is DPI?"))
            .await
            .unwrap();
        assert!(answer.text.contains("Cumulative Distributions / Paid-In Capital"));
        assert_eq!(answer.notes.len(), 1);
    }

    #[tokio::test]
    async fn test_hybrid_merges_figures_and_text() {
        let h = harness(
            Arc::new(ExtractiveGenerator),
            &["The fund is performing in line with its vintage benchmark."],
        )
        .await;
        let mut request = QueryRequest::new(h.fund_id, "How is the fund performing compared to benchmarks?");
        request.as_of = Some(date(2024, 12, 31));

        let answer = h.router.answer(&request).await.unwrap();
        assert_eq!(answer.intent, Intent::Hybrid);
        assert_eq!(answer.citations.len(), 1);
        assert!(answer.calculation.is_none());
    }

    #[tokio::test]
    async fn test_hybrid_survives_generator_failure_with_figures() {
        let h = harness(
            Arc::new(UnavailableGenerator),
            &["Benchmark commentary for the fund."],
        )
        .await;
        let mut request = QueryRequest::new(h.fund_id, "How is the fund performing compared to benchmarks?");
        request.as_of = Some(date(2024, 12, 31));

        let answer = h.router.answer(&request).await.unwrap();
        assert!(answer.text.contains("Paid-In Capital as of 2024-12-31"));
        assert!(!answer.notes.is_empty());
    }

    #[tokio::test]
    async fn test_hybrid_with_nothing_is_no_answer() {
        let h = harness(Arc::new(ExtractiveGenerator), &[]).await;
        let request = QueryRequest::new(Uuid::new_v4(), "hello there");

        let err = h.router.answer(&request).await.unwrap_err();
        // unknown fund: the ledger path fails before retrieval can help
        assert!(matches!(err, LedgerError::NotFound(_)));

        let mut request = QueryRequest::new(h.fund_id, "How is the weather in Paris compared to Rome?");
        request.as_of = Some(date(2022, 1, 1));
        let err = h.router.answer(&request).await.unwrap_err();
        assert!(matches!(err, LedgerError::NoAnswerAvailable(_)));
    }
}
