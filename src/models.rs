//! Core data models for the fund ledger

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::LedgerError;
use crate::Result;

pub type FundId = Uuid;
pub type DocumentId = Uuid;

//
// ================= Fund =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Fund {
    pub id: FundId,
    pub name: String,
    pub gp_name: Option<String>,
    pub fund_type: Option<String>,
    pub vintage_year: Option<i32>,
    pub created_at: DateTime<Utc>,
}

/// Descriptive fund attributes. Used for creation and for administrative edits,
/// and produced by the report header parser.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FundProfile {
    pub name: Option<String>,
    pub gp_name: Option<String>,
    pub fund_type: Option<String>,
    pub vintage_year: Option<i32>,
}

impl FundProfile {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.gp_name.is_none()
            && self.fund_type.is_none()
            && self.vintage_year.is_none()
    }
}

//
// ================= Ledger =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    CapitalCall,
    Distribution,
    Adjustment,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapitalCall {
    pub date: NaiveDate,
    /// Positive magnitude.
    pub amount: Decimal,
    pub call_type: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Distribution {
    pub date: NaiveDate,
    /// Positive magnitude.
    pub amount: Decimal,
    pub is_recallable: bool,
    pub distribution_type: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Adjustment {
    pub date: NaiveDate,
    /// Signed: positive raises the side the adjustment belongs to, negative lowers it.
    pub amount: Decimal,
    pub category: Option<String>,
    /// `true` adjusts paid-in capital, `false` adjusts distributions.
    pub is_contribution_adjustment: bool,
    pub description: Option<String>,
}

/// One financial event, tagged by kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerEvent {
    CapitalCall(CapitalCall),
    Distribution(Distribution),
    Adjustment(Adjustment),
}

impl LedgerEvent {
    pub fn kind(&self) -> EntryKind {
        match self {
            LedgerEvent::CapitalCall(_) => EntryKind::CapitalCall,
            LedgerEvent::Distribution(_) => EntryKind::Distribution,
            LedgerEvent::Adjustment(_) => EntryKind::Adjustment,
        }
    }

    pub fn date(&self) -> NaiveDate {
        match self {
            LedgerEvent::CapitalCall(c) => c.date,
            LedgerEvent::Distribution(d) => d.date,
            LedgerEvent::Adjustment(a) => a.date,
        }
    }

    /// Stored amount: a magnitude for calls and distributions, signed for adjustments.
    pub fn amount(&self) -> Decimal {
        match self {
            LedgerEvent::CapitalCall(c) => c.amount,
            LedgerEvent::Distribution(d) => d.amount,
            LedgerEvent::Adjustment(a) => a.amount,
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            LedgerEvent::CapitalCall(c) => c.description.as_deref(),
            LedgerEvent::Distribution(d) => d.description.as_deref(),
            LedgerEvent::Adjustment(a) => a.description.as_deref(),
        }
    }

    /// Checks the magnitude invariant of calls and distributions.
    pub fn validate(&self) -> Result<()> {
        match self {
            LedgerEvent::CapitalCall(c) if c.amount <= Decimal::ZERO => Err(
                LedgerError::InvalidEntry(format!("capital call amount must be positive, got {}", c.amount)),
            ),
            LedgerEvent::Distribution(d) if d.amount <= Decimal::ZERO => Err(
                LedgerError::InvalidEntry(format!("distribution amount must be positive, got {}", d.amount)),
            ),
            _ => Ok(()),
        }
    }

    /// Builds the adjustment that cancels this event's effect on the ledger.
    ///
    /// A capital call is offset on the contribution side, a distribution (for example a
    /// recalled recallable distribution) on the distribution side, and an adjustment on
    /// its own side.
    pub fn offsetting_adjustment(&self, date: NaiveDate, description: Option<String>) -> LedgerEvent {
        let (amount, is_contribution_adjustment, category) = match self {
            LedgerEvent::CapitalCall(c) => (-c.amount, true, "call reversal"),
            LedgerEvent::Distribution(d) if d.is_recallable => (-d.amount, false, "recall"),
            LedgerEvent::Distribution(d) => (-d.amount, false, "distribution reversal"),
            LedgerEvent::Adjustment(a) => (-a.amount, a.is_contribution_adjustment, "adjustment reversal"),
        };

        LedgerEvent::Adjustment(Adjustment {
            date,
            amount,
            category: Some(category.to_string()),
            is_contribution_adjustment,
            description,
        })
    }
}

/// An entry that has not been persisted yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewLedgerEntry {
    pub fund_id: FundId,
    /// `None` for manually entered rows.
    pub document_id: Option<DocumentId>,
    /// Row index in the source table, when extracted.
    pub source_row: Option<usize>,
    pub event: LedgerEvent,
}

impl NewLedgerEntry {
    pub fn manual(fund_id: FundId, event: LedgerEvent) -> Self {
        Self {
            fund_id,
            document_id: None,
            source_row: None,
            event,
        }
    }
}

/// A persisted ledger entry. There is no API to mutate or individually delete one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub fund_id: FundId,
    pub document_id: Option<DocumentId>,
    pub event: LedgerEvent,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn from_new(entry: NewLedgerEntry, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            fund_id: entry.fund_id,
            document_id: entry.document_id,
            event: entry.event,
            created_at,
        }
    }

    pub fn kind(&self) -> EntryKind {
        self.event.kind()
    }

    pub fn date(&self) -> NaiveDate {
        self.event.date()
    }

    pub fn amount(&self) -> Decimal {
        self.event.amount()
    }
}

//
// ================= Documents =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParsingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ParsingStatus {
    /// Monotonic lifecycle: pending → processing → {completed, failed}.
    pub fn can_transition_to(self, next: ParsingStatus) -> bool {
        matches!(
            (self, next),
            (ParsingStatus::Pending, ParsingStatus::Processing)
                | (ParsingStatus::Processing, ParsingStatus::Completed)
                | (ParsingStatus::Processing, ParsingStatus::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ParsingStatus::Completed | ParsingStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ParsingStatus::Pending => "pending",
            ParsingStatus::Processing => "processing",
            ParsingStatus::Completed => "completed",
            ParsingStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "pending" => Ok(ParsingStatus::Pending),
            "processing" => Ok(ParsingStatus::Processing),
            "completed" => Ok(ParsingStatus::Completed),
            "failed" => Ok(ParsingStatus::Failed),
            other => Err(LedgerError::DatabaseError(format!(
                "unknown parsing status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: DocumentId,
    pub fund_id: FundId,
    pub file_name: String,
    pub file_path: String,
    pub parsing_status: ParsingStatus,
    pub error_message: Option<String>,
    /// Task that moved the document to `processing`; only it may finish the document.
    pub processing_task: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TextChunk {
    pub id: Uuid,
    pub document_id: DocumentId,
    pub fund_id: FundId,
    pub chunk_index: usize,
    pub content: String,
}

//
// ================= Extraction diagnostics =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    CapitalCall,
    Distribution,
    Adjustment,
    Unknown,
}

impl TableKind {
    pub fn entry_kind(self) -> Option<EntryKind> {
        match self {
            TableKind::CapitalCall => Some(EntryKind::CapitalCall),
            TableKind::Distribution => Some(EntryKind::Distribution),
            TableKind::Adjustment => Some(EntryKind::Adjustment),
            TableKind::Unknown => None,
        }
    }
}

/// A rejected row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RowDiagnostic {
    pub table_index: usize,
    pub row_index: usize,
    pub reason: String,
}

/// A table that could not be classified with confidence and needs a human look.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableReview {
    pub table_index: usize,
    pub heading: Option<String>,
    pub headers: Vec<String>,
    pub scores: Vec<(TableKind, f64)>,
    pub reason: String,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntryKind::CapitalCall => "capital call",
            EntryKind::Distribution => "distribution",
            EntryKind::Adjustment => "adjustment",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TableKind::CapitalCall => "capital_call",
            TableKind::Distribution => "distribution",
            TableKind::Adjustment => "adjustment",
            TableKind::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for ParsingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
