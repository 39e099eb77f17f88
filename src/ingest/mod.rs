//! Document ingestion
//!
//! CLAIM → EXTRACT → VALIDATE → COMMIT LEDGER → INDEX TEXT → COMPLETE
//!
//! One tokio task per document. The task claims the document with a compare-and-set
//! on its status and is the only writer allowed to finish it. Cancellation is honoured
//! up to the ledger commit; after that the run completes.
//!
//! A document fails only when nothing usable was extracted or the ledger batch could
//! not be committed. Text indexing is best effort: its failure is reported on the
//! run, not on the document.

pub mod manual;

use crate::audit::{compute_source_hash, AuditLog, ExtractionRecord};
use crate::config::{ExtractionConfig, SegmenterConfig};
use crate::error::LedgerError;
use crate::extraction::profile::parse_fund_profile;
use crate::extraction::{ExtractionContext, ParsedTable, TableExtractor};
use crate::models::{
    Document, DocumentId, FundId, FundProfile, ParsingStatus, RowDiagnostic,
    TableReview, TextChunk,
};
use crate::retrieval::SemanticRetriever;
use crate::segmenter::TextSegmenter;
use crate::store::LedgerStore;
use crate::validation::{LedgerValidator, RuleViolation, Severity, ValidationContext};
use crate::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const CANCELLED_MESSAGE: &str = "extraction cancelled";

/// Output of the PDF layer for one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedDocument {
    pub document_id: DocumentId,
    pub tables: Vec<ParsedTable>,
    /// Narrative text outside tables
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub document_id: DocumentId,
    pub fund_id: FundId,
    pub task_id: Uuid,
    pub audit_id: Uuid,
    pub entries_inserted: usize,
    pub chunks_indexed: usize,
    pub rejected_rows: Vec<RowDiagnostic>,
    pub reviews: Vec<TableReview>,
    pub warnings: Vec<RuleViolation>,
    /// Why the narrative text was not indexed, when it was not
    pub indexing_error: Option<String>,
    /// Header fields found in the text and applied to the fund
    pub profile: FundProfile,
}

/// What a run produced, whether or not it committed.
#[derive(Default)]
struct RunState {
    entries_inserted: usize,
    chunks_indexed: usize,
    rejected_rows: Vec<RowDiagnostic>,
    reviews: Vec<TableReview>,
    violations: Vec<RuleViolation>,
    indexing_error: Option<String>,
    profile: FundProfile,
}

pub struct DocumentIngestor {
    store: Arc<dyn LedgerStore>,
    retriever: Arc<SemanticRetriever>,
    extractor: TableExtractor,
    segmenter: TextSegmenter,
    validator: LedgerValidator,
    audit: Arc<AuditLog>,
}

impl DocumentIngestor {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        retriever: Arc<SemanticRetriever>,
        extraction: ExtractionConfig,
        segmenter: &SegmenterConfig,
        validator: LedgerValidator,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            store,
            retriever,
            extractor: TableExtractor::new(extraction),
            segmenter: TextSegmenter::new(segmenter),
            validator,
            audit,
        }
    }

    pub fn audit_log(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    /// Delete a document, its ledger entries and its indexed text.
    /// Returns the number of ledger entries removed.
    pub async fn delete_document(&self, document_id: DocumentId) -> Result<usize> {
        let removed = self.store.delete_document(document_id).await?;
        if let Err(e) = self.retriever.remove_document(document_id).await {
            warn!(%document_id, error = %e, "Indexed chunks not removed");
        }
        info!(%document_id, entries = removed, "Document deleted");
        Ok(removed)
    }

    /// Start processing in the background and return immediately.
    pub fn spawn(self: &Arc<Self>, document: ParsedDocument) -> IngestHandle {
        let task_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let document_id = document.document_id;

        let ingestor = Arc::clone(self);
        let token = cancel.clone();
        let join = tokio::spawn(async move { ingestor.process(document, task_id, token).await });

        info!(%document_id, %task_id, "Ingestion task spawned");
        IngestHandle {
            document_id,
            task_id,
            cancel,
            join,
        }
    }

    /// Run one ingestion as `task_id`. The document must be `pending`.
    pub async fn process(
        &self,
        document: ParsedDocument,
        task_id: Uuid,
        cancel: CancellationToken,
    ) -> Result<IngestReport> {
        let stored = self.store.get_document(document.document_id).await?;
        let source_hash = compute_source_hash(&document.tables)?;

        // claim: fails if another task got there first
        self.store
            .update_document_status(stored.id, task_id, ParsingStatus::Processing, None)
            .await?;
        info!(document_id = %stored.id, fund_id = %stored.fund_id, %task_id, "Document claimed");

        let mut state = RunState::default();
        let outcome = self.run(&stored, &document, &cancel, &mut state).await;

        let (status, error_message) = match &outcome {
            Ok(()) => (ParsingStatus::Completed, None),
            Err(e) => (ParsingStatus::Failed, Some(failure_message(e))),
        };

        if let Err(e) = &outcome {
            error!(document_id = %stored.id, %task_id, error = %e, "Ingestion failed");
        }

        let finished = self
            .finish(&stored, task_id, status, error_message.clone(), state.entries_inserted)
            .await;
        let audit_error = match &finished {
            Ok(()) => error_message,
            Err(e) => Some(format!("status not recorded as {}: {}", status, e)),
        };

        let audit_id = self
            .audit
            .record(ExtractionRecord {
                audit_id: Uuid::new_v4(),
                document_id: stored.id,
                fund_id: stored.fund_id,
                task_id,
                status,
                source_hash,
                tables_seen: document.tables.len(),
                entries_inserted: state.entries_inserted,
                chunks_indexed: state.chunks_indexed,
                rejected_rows: state.rejected_rows.clone(),
                reviews: state.reviews.clone(),
                violations: state.violations.clone(),
                indexing_error: state.indexing_error.clone(),
                error: audit_error,
                created_at: Utc::now(),
            })
            .await?;

        finished?;
        outcome?;

        info!(
            document_id = %stored.id,
            entries = state.entries_inserted,
            chunks = state.chunks_indexed,
            rejected = state.rejected_rows.len(),
            reviews = state.reviews.len(),
            "Document completed"
        );

        Ok(IngestReport {
            document_id: stored.id,
            fund_id: stored.fund_id,
            task_id,
            audit_id,
            entries_inserted: state.entries_inserted,
            chunks_indexed: state.chunks_indexed,
            rejected_rows: state.rejected_rows,
            reviews: state.reviews,
            warnings: state
                .violations
                .into_iter()
                .filter(|v| v.severity == Severity::Warning)
                .collect(),
            indexing_error: state.indexing_error,
            profile: state.profile,
        })
    }

    async fn run(
        &self,
        stored: &Document,
        document: &ParsedDocument,
        cancel: &CancellationToken,
        state: &mut RunState,
    ) -> Result<()> {
        // ----- extract -----
        let ctx = ExtractionContext {
            fund_id: stored.fund_id,
            document_id: Some(stored.id),
        };
        let mut entries = Vec::new();
        for outcome in self.extractor.extract_all(&document.tables, ctx) {
            entries.extend(outcome.entries);
            state.rejected_rows.extend(outcome.rejected_rows);
            state.reviews.extend(outcome.review);
        }

        // ----- validate -----
        let report = self.validator.validate(entries, &ValidationContext::new(stored.fund_id));
        let rejected_by_rules = report.rejected_count();
        state.violations = report.violations;
        let entries = report.accepted;

        if entries.is_empty() {
            return Err(LedgerError::DocumentExtractionFailed {
                document_id: stored.id,
                reason: format!(
                    "no ledger entries extracted from {} tables ({} rows rejected, {} entries failed validation, {} tables need review)",
                    document.tables.len(),
                    state.rejected_rows.len(),
                    rejected_by_rules,
                    state.reviews.len()
                ),
                diagnostics: state.rejected_rows.clone(),
            });
        }

        // ----- commit -----
        if cancel.is_cancelled() {
            return Err(cancelled(stored.id));
        }
        let inserted = self.store.insert_ledger_entries(stored.fund_id, entries).await?;
        state.entries_inserted = inserted.len();
        info!(document_id = %stored.id, entries = inserted.len(), "Ledger batch committed");

        // ----- text -----
        let chunks: Vec<TextChunk> = self
            .segmenter
            .segment(&document.text)
            .into_iter()
            .enumerate()
            .map(|(chunk_index, content)| TextChunk {
                id: Uuid::new_v4(),
                document_id: stored.id,
                fund_id: stored.fund_id,
                chunk_index,
                content,
            })
            .collect();

        let indexed = tokio::select! {
            _ = cancel.cancelled() => Err(LedgerError::upstream(
                "text indexing",
                "cancelled after the ledger was committed",
            )),
            indexed = self.retriever.index_chunks(&chunks) => indexed,
        };
        match indexed {
            Ok(count) => state.chunks_indexed = count,
            Err(e) => {
                warn!(document_id = %stored.id, error = %e, "Text not indexed, ledger kept");
                state.indexing_error = Some(e.to_string());
            }
        }

        // ----- fund header -----
        let profile = parse_fund_profile(&document.text);
        // the fund's name is chosen by the user, not the report
        let profile = FundProfile { name: None, ..profile };
        if !profile.is_empty() {
            if let Err(e) = self.store.update_fund_profile(stored.fund_id, profile.clone()).await {
                warn!(fund_id = %stored.fund_id, error = %e, "Fund profile not updated");
            }
        }
        state.profile = profile;

        Ok(())
    }

    /// Record the final status. One retry; a committed ledger is never rolled back here,
    /// so a lost status update is logged loudly and surfaced in the audit record.
    async fn finish(
        &self,
        stored: &Document,
        task_id: Uuid,
        status: ParsingStatus,
        error_message: Option<String>,
        entries_inserted: usize,
    ) -> Result<()> {
        let first = self
            .store
            .update_document_status(stored.id, task_id, status, error_message.clone())
            .await;
        let Err(e) = first else {
            return Ok(());
        };
        if matches!(e, LedgerError::InvalidStatusTransition(_)) {
            error!(document_id = %stored.id, %task_id, %status, entries_inserted, error = %e, "Final status rejected");
            return Err(e);
        }

        warn!(document_id = %stored.id, %task_id, %status, error = %e, "Final status update failed, retrying");
        self.store
            .update_document_status(stored.id, task_id, status, error_message)
            .await
            .map_err(|e| {
                error!(
                    document_id = %stored.id,
                    %task_id,
                    %status,
                    entries_inserted,
                    error = %e,
                    "Final status not recorded; document left in processing"
                );
                e
            })
            .map(|_| ())
    }
}

fn cancelled(document_id: DocumentId) -> LedgerError {
    LedgerError::DocumentExtractionFailed {
        document_id,
        reason: CANCELLED_MESSAGE.to_string(),
        diagnostics: Vec::new(),
    }
}

/// Message stored on a failed document.
fn failure_message(e: &LedgerError) -> String {
    match e {
        LedgerError::DocumentExtractionFailed { reason, .. } => reason.clone(),
        other => other.to_string(),
    }
}

/// Handle to a spawned ingestion.
pub struct IngestHandle {
    pub document_id: DocumentId,
    pub task_id: Uuid,
    cancel: CancellationToken,
    join: JoinHandle<Result<IngestReport>>,
}

impl IngestHandle {
    /// Request cancellation. Has no effect once the ledger batch is committed.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn wait(self) -> Result<IngestReport> {
        match self.join.await {
            Ok(result) => result,
            Err(e) => Err(LedgerError::DocumentExtractionFailed {
                document_id: self.document_id,
                reason: format!("ingestion task aborted: {}", e),
                diagnostics: Vec::new(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UpstreamPolicy;
    use crate::retrieval::memory::{ExtractiveGenerator, HashingEmbedder, InMemoryChunkIndex};
    use crate::retrieval::Embedder;
    use crate::store::{InMemoryLedgerStore, NewDocument};
    use crate::validation::create_default_validator;
    use rust_decimal::Decimal;
    use std::time::Duration;

    struct SlowEmbedder;

    struct OfflineEmbedder;

    #[async_trait::async_trait]
    impl Embedder for OfflineEmbedder {
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(LedgerError::LlmError("embedding model offline".to_string()))
        }
    }

    #[async_trait::async_trait]
    impl Embedder for SlowEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(texts.iter().map(|_| vec![1.0]).collect())
        }
    }

    struct Setup {
        store: Arc<InMemoryLedgerStore>,
        ingestor: Arc<DocumentIngestor>,
        fund_id: FundId,
        document_id: DocumentId,
    }

    async fn setup(embedder: Arc<dyn Embedder>) -> Setup {
        let store = Arc::new(InMemoryLedgerStore::new());
        let fund = store.create_fund("Tech Ventures Fund III", FundProfile::default()).await.unwrap();
        let document = store
            .create_document(NewDocument {
                fund_id: fund.id,
                file_name: "q4-2024.pdf".to_string(),
                file_path: "/uploads/q4-2024.pdf".to_string(),
            })
            .await
            .unwrap();

        let retriever = Arc::new(SemanticRetriever::new(
            embedder,
            Arc::new(InMemoryChunkIndex::new()),
            Arc::new(ExtractiveGenerator),
            UpstreamPolicy {
                timeout: Duration::from_secs(10),
                max_retries: 0,
            },
            3,
        ));
        let ingestor = Arc::new(DocumentIngestor::new(
            store.clone(),
            retriever,
            ExtractionConfig::default(),
            &SegmenterConfig::default(),
            create_default_validator(),
            Arc::new(AuditLog::new()),
        ));

        Setup {
            store,
            ingestor,
            fund_id: fund.id,
            document_id: document.id,
        }
    }

    fn report(document_id: DocumentId) -> ParsedDocument {
        ParsedDocument {
            document_id,
            tables: vec![
                ParsedTable::from_grid(
                    Some("Capital Calls"),
                    &["Date", "Call Number", "Amount", "Description"],
                    &[
                        vec!["2023-01-15", "Call 1", "$5,000,000", "Initial Capital Call"],
                        vec!["2023-06-20", "Call 2", "$3,000,000", "Follow-on"],
                        vec!["Total", "", "$8,000,000", ""],
                    ],
                ),
                ParsedTable::from_grid(
                    Some("Distributions"),
                    &["Distribution Date", "Type", "Amount", "Recallable?", "Description"],
                    &[vec!["2023-12-15", "Return of Capital", "$1,500,000", "No", ""]],
                ),
            ],
            text: "Fund Name: Tech Ventures Fund III\nGP: Tech Ventures Partners\nVintage Year: 2022\n\n\
                   The fund made its first investments in enterprise software."
                .to_string(),
        }
    }

    #[tokio::test]
    async fn test_ingest_commits_ledger_and_completes() {
        let s = setup(Arc::new(HashingEmbedder::default())).await;

        let handle = s.ingestor.spawn(report(s.document_id));
        let result = handle.wait().await.unwrap();

        assert_eq!(result.entries_inserted, 3);
        assert_eq!(result.rejected_rows.len(), 1);
        assert!(result.chunks_indexed >= 1);
        assert_eq!(result.profile.vintage_year, Some(2022));

        let document = s.store.get_document(s.document_id).await.unwrap();
        assert_eq!(document.parsing_status, ParsingStatus::Completed);

        let snapshot = s.store.read_ledger(s.fund_id, None).await.unwrap();
        assert_eq!(crate::store::total_amount(snapshot.entries()).unwrap(), Decimal::from(9_500_000));

        let fund = s.store.get_fund(s.fund_id).await.unwrap();
        assert_eq!(fund.gp_name.as_deref(), Some("Tech Ventures Partners"));

        let audit = s.ingestor.audit_log();
        assert!(audit.verify_integrity(result.audit_id, &report(s.document_id).tables).await.unwrap());
        let record = audit.get(result.audit_id).await.unwrap().unwrap();
        assert_eq!(record.status, ParsingStatus::Completed);
        assert_eq!(record.tables_seen, 2);
    }

    #[tokio::test]
    async fn test_cancel_before_commit_fails_document() {
        let s = setup(Arc::new(HashingEmbedder::default())).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = s
            .ingestor
            .process(report(s.document_id), Uuid::new_v4(), cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::DocumentExtractionFailed { .. }));

        let document = s.store.get_document(s.document_id).await.unwrap();
        assert_eq!(document.parsing_status, ParsingStatus::Failed);
        assert_eq!(document.error_message.as_deref(), Some(CANCELLED_MESSAGE));
        assert!(s.store.read_ledger(s.fund_id, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_after_commit_keeps_ledger() {
        let s = setup(Arc::new(SlowEmbedder)).await;

        let handle = s.ingestor.spawn(report(s.document_id));
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();

        let result = handle.wait().await.unwrap();
        assert_eq!(result.entries_inserted, 3);
        assert_eq!(result.chunks_indexed, 0);
        assert!(result.indexing_error.is_some());

        let document = s.store.get_document(s.document_id).await.unwrap();
        assert_eq!(document.parsing_status, ParsingStatus::Completed);
        assert_eq!(s.store.read_ledger(s.fund_id, None).await.unwrap().entries().len(), 3);
    }

    #[tokio::test]
    async fn test_embedder_failure_does_not_fail_document() {
        let s = setup(Arc::new(OfflineEmbedder)).await;

        let result = s
            .ingestor
            .process(report(s.document_id), Uuid::new_v4(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.entries_inserted, 3);
        assert_eq!(result.chunks_indexed, 0);
        assert!(result
            .indexing_error
            .as_deref()
            .is_some_and(|e| e.contains("embedding service")));

        let document = s.store.get_document(s.document_id).await.unwrap();
        assert_eq!(document.parsing_status, ParsingStatus::Completed);
        assert_eq!(document.error_message, None);

        let record = s.ingestor.audit_log().get(result.audit_id).await.unwrap().unwrap();
        assert_eq!(record.status, ParsingStatus::Completed);
        assert_eq!(record.indexing_error, result.indexing_error);
    }

    #[tokio::test]
    async fn test_delete_document_removes_entries_and_text() {
        let s = setup(Arc::new(HashingEmbedder::default())).await;
        s.ingestor
            .process(report(s.document_id), Uuid::new_v4(), CancellationToken::new())
            .await
            .unwrap();
        assert!(!s.ingestor.retriever.retrieve("enterprise software", Some(s.fund_id)).await.unwrap().is_empty());

        assert_eq!(s.ingestor.delete_document(s.document_id).await.unwrap(), 3);
        assert!(s.store.read_ledger(s.fund_id, None).await.unwrap().is_empty());
        assert!(s.ingestor.retriever.retrieve("enterprise software", Some(s.fund_id)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_task_cannot_claim() {
        let s = setup(Arc::new(HashingEmbedder::default())).await;
        s.ingestor
            .process(report(s.document_id), Uuid::new_v4(), CancellationToken::new())
            .await
            .unwrap();

        let err = s
            .ingestor
            .process(report(s.document_id), Uuid::new_v4(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidStatusTransition(_)));
        // no duplicate entries
        assert_eq!(s.store.read_ledger(s.fund_id, None).await.unwrap().entries().len(), 3);
    }

    #[tokio::test]
    async fn test_document_without_entries_fails_with_diagnostics() {
        let s = setup(Arc::new(HashingEmbedder::default())).await;
        let document = ParsedDocument {
            document_id: s.document_id,
            tables: vec![ParsedTable::from_grid(
                Some("Portfolio Companies"),
                &["Company", "Sector", "Ownership"],
                &[vec!["Acme", "SaaS", "12%"]],
            )],
            text: String::new(),
        };

        let err = s
            .ingestor
            .process(document, Uuid::new_v4(), CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            LedgerError::DocumentExtractionFailed { reason, .. } => {
                assert!(reason.contains("no ledger entries"))
            }
            other => panic!("unexpected error {:?}", other),
        }

        let stored = s.store.get_document(s.document_id).await.unwrap();
        assert_eq!(stored.parsing_status, ParsingStatus::Failed);
        let audit_ids = s.ingestor.audit_log().list_for_document(s.document_id).await.unwrap();
        assert_eq!(audit_ids.len(), 1);
    }
}
