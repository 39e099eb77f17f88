//! Extraction audit trail
//!
//! Every ingestion run leaves a record: what was read (content hash of the parsed
//! tables), what was committed and what was rejected.

use crate::extraction::ParsedTable;
use crate::models::{DocumentId, FundId, ParsingStatus, RowDiagnostic, TableReview};
use crate::validation::RuleViolation;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Outcome of one ingestion run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRecord {
    pub audit_id: Uuid,
    pub document_id: DocumentId,
    pub fund_id: FundId,
    pub task_id: Uuid,
    pub status: ParsingStatus,
    /// SHA-256 of the parsed tables the run consumed
    pub source_hash: String,
    pub tables_seen: usize,
    pub entries_inserted: usize,
    pub chunks_indexed: usize,
    pub rejected_rows: Vec<RowDiagnostic>,
    pub reviews: Vec<TableReview>,
    pub violations: Vec<RuleViolation>,
    /// Set when the ledger committed but the narrative text was not indexed
    pub indexing_error: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Audit trail storage
pub struct AuditLog {
    records: Arc<RwLock<HashMap<Uuid, ExtractionRecord>>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn record(&self, record: ExtractionRecord) -> Result<Uuid> {
        let audit_id = record.audit_id;
        self.records.write().await.insert(audit_id, record);
        Ok(audit_id)
    }

    pub async fn get(&self, audit_id: Uuid) -> Result<Option<ExtractionRecord>> {
        Ok(self.records.read().await.get(&audit_id).cloned())
    }

    /// Audit ids for a document, oldest first.
    pub async fn list_for_document(&self, document_id: DocumentId) -> Result<Vec<Uuid>> {
        let records = self.records.read().await;

        let mut items: Vec<_> = records
            .iter()
            .filter(|(_, record)| record.document_id == document_id)
            .map(|(id, record)| (*id, record.created_at))
            .collect();
        items.sort_by_key(|(_, created_at)| *created_at);

        Ok(items.into_iter().map(|(id, _)| id).collect())
    }

    /// Check that `tables` are the ones the recorded run extracted from.
    pub async fn verify_integrity(&self, audit_id: Uuid, tables: &[ParsedTable]) -> Result<bool> {
        let records = self.records.read().await;

        match records.get(&audit_id) {
            Some(record) => Ok(compute_source_hash(tables)? == record.source_hash),
            None => Ok(false),
        }
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

/// SHA-256 of the parsed tables, streamed through serde_json.
pub fn compute_source_hash(tables: &[ParsedTable]) -> Result<String> {
    let mut hasher = Sha256::new();
    serde_json::to_writer(&mut HashWriter(&mut hasher), tables)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
