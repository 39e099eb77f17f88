//! Relational store boundary
//!
//! `LedgerStore` is the only place ledger entries and document status are persisted.
//! Implementations must guarantee:
//! - `insert_ledger_entries` is all-or-nothing
//! - `read_ledger` returns a committed snapshot, never part of an in-flight batch
//! - `update_document_status` is a compare-and-set guarded by the claiming task

pub mod memory;
pub mod postgres;

use crate::error::LedgerError;
use crate::metrics::LedgerSnapshot;
use crate::models::{
    Document, DocumentId, EntryKind, Fund, FundId, FundProfile, LedgerEntry, LedgerEvent,
    NewLedgerEntry, ParsingStatus,
};
use crate::Result;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BTreeSet;
use uuid::Uuid;

pub use memory::InMemoryLedgerStore;
pub use postgres::PgLedgerStore;

/// Top-1 ordering by amount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rank {
    Largest,
    Smallest,
}

/// Bounded filter over one fund's ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerQuery {
    pub fund_id: FundId,
    /// Empty means every kind
    pub kinds: BTreeSet<EntryKind>,
    /// Restricts to distributions with this recallable flag
    pub recallable: Option<bool>,
    /// Inclusive bounds
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub rank: Option<Rank>,
    pub limit: usize,
}

impl LedgerQuery {
    pub fn new(fund_id: FundId, limit: usize) -> Self {
        Self {
            fund_id,
            kinds: BTreeSet::new(),
            recallable: None,
            from: None,
            to: None,
            rank: None,
            limit,
        }
    }

    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        entry.fund_id == self.fund_id
            && (self.kinds.is_empty() || self.kinds.contains(&entry.kind()))
            && self.recallable.map_or(true, |flag| match &entry.event {
                LedgerEvent::Distribution(d) => d.is_recallable == flag,
                _ => false,
            })
            && self.from.map_or(true, |from| entry.date() >= from)
            && self.to.map_or(true, |to| entry.date() <= to)
    }

    /// Filter, rank and bound entries already loaded for the fund.
    pub fn apply(&self, entries: impl IntoIterator<Item = LedgerEntry>) -> Vec<LedgerEntry> {
        let mut rows: Vec<LedgerEntry> = entries.into_iter().filter(|e| self.matches(e)).collect();
        rows.sort_by(|a, b| a.date().cmp(&b.date()).then(a.created_at.cmp(&b.created_at)));

        match self.rank {
            // adjustments are signed; rank them by magnitude
            Some(Rank::Largest) => {
                rows.sort_by_key(|e| Reverse(e.amount().abs()));
                rows.truncate(1);
            }
            Some(Rank::Smallest) => {
                rows.sort_by_key(|e| e.amount().abs());
                rows.truncate(1);
            }
            None => rows.truncate(self.limit),
        }
        rows
    }
}

/// Fields for registering an uploaded document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDocument {
    pub fund_id: FundId,
    pub file_name: String,
    pub file_path: String,
}

impl NewDocument {
    pub fn into_document(self) -> Document {
        let now = Utc::now();
        Document {
            id: Uuid::new_v4(),
            fund_id: self.fund_id,
            file_name: self.file_name,
            file_path: self.file_path,
            parsing_status: ParsingStatus::Pending,
            error_message: None,
            processing_task: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Persistence for funds, documents and the ledger.
#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
    // ----- Funds -----

    async fn create_fund(&self, name: &str, profile: FundProfile) -> Result<Fund>;

    async fn get_fund(&self, fund_id: FundId) -> Result<Fund>;

    async fn list_funds(&self) -> Result<Vec<Fund>>;

    /// Administrative edit. Only fields present in `profile` are changed.
    async fn update_fund_profile(&self, fund_id: FundId, profile: FundProfile) -> Result<Fund>;

    // ----- Documents -----

    async fn create_document(&self, document: NewDocument) -> Result<Document>;

    async fn get_document(&self, document_id: DocumentId) -> Result<Document>;

    async fn list_documents(&self, fund_id: FundId) -> Result<Vec<Document>>;

    /// Delete a document and, in the same transaction, every ledger entry it produced.
    /// Returns the number of entries removed.
    async fn delete_document(&self, document_id: DocumentId) -> Result<usize>;

    /// Compare-and-set status transition.
    ///
    /// `pending → processing` claims the document for `task_id`; moving out of
    /// `processing` is only allowed for the task holding the claim. Anything else is
    /// `InvalidStatusTransition` and leaves the document untouched.
    async fn update_document_status(
        &self,
        document_id: DocumentId,
        task_id: Uuid,
        status: ParsingStatus,
        error_message: Option<String>,
    ) -> Result<Document>;

    // ----- Ledger -----

    /// Insert a batch atomically. Every entry must belong to `fund_id`.
    async fn insert_ledger_entries(
        &self,
        fund_id: FundId,
        entries: Vec<NewLedgerEntry>,
    ) -> Result<Vec<LedgerEntry>>;

    /// Committed entries dated on or before `as_of` (all entries when `None`).
    async fn read_ledger(&self, fund_id: FundId, as_of: Option<NaiveDate>) -> Result<LedgerSnapshot>;

    async fn query_ledger(&self, query: &LedgerQuery) -> Result<Vec<LedgerEntry>> {
        let snapshot = self.read_ledger(query.fund_id, query.to).await?;
        Ok(query.apply(snapshot.entries().iter().cloned()))
    }
}

/// Shared precondition checks for batch inserts.
pub(crate) fn check_batch(fund_id: FundId, entries: &[NewLedgerEntry]) -> Result<()> {
    for (i, entry) in entries.iter().enumerate() {
        if entry.fund_id != fund_id {
            return Err(LedgerError::InvalidEntry(format!(
                "entry {} belongs to fund {}, not {}",
                i, entry.fund_id, fund_id
            )));
        }
        entry.event.validate()?;
    }
    Ok(())
}

/// Shared transition rule for `update_document_status`.
pub(crate) fn check_transition(
    document: &Document,
    task_id: Uuid,
    next: ParsingStatus,
) -> Result<()> {
    if !document.parsing_status.can_transition_to(next) {
        return Err(LedgerError::InvalidStatusTransition(format!(
            "document {} cannot move from {} to {}",
            document.id, document.parsing_status, next
        )));
    }
    if document.parsing_status == ParsingStatus::Processing && document.processing_task != Some(task_id) {
        return Err(LedgerError::InvalidStatusTransition(format!(
            "document {} is being processed by another task",
            document.id
        )));
    }
    Ok(())
}

/// Sum helper used by summaries and answers.
pub fn total_amount(entries: &[LedgerEntry]) -> Result<Decimal> {
    entries.iter().try_fold(Decimal::ZERO, |total, entry| {
        total.checked_add(entry.amount()).ok_or_else(|| {
            LedgerError::ArithmeticOverflow("entry total exceeds the representable amount range".to_string())
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CapitalCall, Distribution};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn entries(fund_id: FundId) -> Vec<LedgerEntry> {
        let call = |d, amount: i64| {
            LedgerEvent::CapitalCall(CapitalCall {
                date: d,
                amount: Decimal::from(amount),
                call_type: None,
                description: None,
            })
        };
        let dist = |d, amount: i64, recallable| {
            LedgerEvent::Distribution(Distribution {
                date: d,
                amount: Decimal::from(amount),
                is_recallable: recallable,
                distribution_type: None,
                description: None,
            })
        };
        vec![
            call(date(2023, 1, 15), 5_000),
            call(date(2024, 3, 10), 2_000),
            call(date(2024, 7, 1), 3_000),
            dist(date(2024, 6, 30), 500, false),
            dist(date(2024, 9, 30), 800, true),
        ]
        .into_iter()
        .map(|e| LedgerEntry::from_new(NewLedgerEntry::manual(fund_id, e), Utc::now()))
        .collect()
    }

    #[test]
    fn test_query_filters_kind_and_range() {
        let fund_id = Uuid::new_v4();
        let query = LedgerQuery {
            kinds: BTreeSet::from([EntryKind::CapitalCall]),
            from: Some(date(2024, 1, 1)),
            to: Some(date(2024, 12, 31)),
            ..LedgerQuery::new(fund_id, 100)
        };

        let rows = query.apply(entries(fund_id));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date(), date(2024, 3, 10));
    }

    #[test]
    fn test_query_rank_returns_one_row() {
        let fund_id = Uuid::new_v4();
        let query = LedgerQuery {
            kinds: BTreeSet::from([EntryKind::CapitalCall]),
            rank: Some(Rank::Largest),
            ..LedgerQuery::new(fund_id, 100)
        };
        let rows = query.apply(entries(fund_id));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].amount(), Decimal::from(5_000));
    }

    #[test]
    fn test_query_limit_bounds_results() {
        let fund_id = Uuid::new_v4();
        let rows = LedgerQuery::new(fund_id, 2).apply(entries(fund_id));
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_query_recallable_flag() {
        let fund_id = Uuid::new_v4();
        let recallable = LedgerQuery {
            kinds: BTreeSet::from([EntryKind::Distribution]),
            recallable: Some(true),
            ..LedgerQuery::new(fund_id, 100)
        };
        let rows = recallable.apply(entries(fund_id));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].amount(), Decimal::from(800));

        let other = LedgerQuery {
            recallable: Some(false),
            ..recallable
        };
        let rows = other.apply(entries(fund_id));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].amount(), Decimal::from(500));
    }

    #[test]
    fn test_query_several_kinds() {
        let fund_id = Uuid::new_v4();
        let query = LedgerQuery {
            kinds: BTreeSet::from([EntryKind::CapitalCall, EntryKind::Distribution]),
            to: Some(date(2024, 6, 30)),
            ..LedgerQuery::new(fund_id, 100)
        };
        let rows = query.apply(entries(fund_id));
        assert_eq!(rows.len(), 3);
        assert_eq!(total_amount(&rows).unwrap(), Decimal::from(7_500));
    }
}
