//! Table extractor
//!
//! Turns parsed report tables into ledger entries:
//! CLASSIFY → MAP COLUMNS → PARSE CELLS → EMIT ENTRIES (+ row diagnostics)
//!
//! Extraction is deterministic and never touches storage. Bad rows are reported and
//! skipped; tables that cannot be classified confidently are flagged for review and
//! produce no entries.

pub mod classify;
pub mod columns;
pub mod profile;
pub mod values;

use crate::config::ExtractionConfig;
use crate::error::LedgerError;
use crate::models::{
    Adjustment, CapitalCall, Distribution, DocumentId, FundId, LedgerEvent, NewLedgerEntry,
    RowDiagnostic, TableKind, TableReview,
};
use crate::Result;
use classify::score_table;
use columns::{CanonicalField, ColumnMap};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use values::{parse_amount, parse_date, parse_flag, CellError};

/// One table as handed over by the PDF layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParsedTable {
    /// Text immediately preceding the table (section heading).
    pub heading: Option<String>,
    pub rows: Vec<TableRow>,
}

/// One body row of a parsed table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableRow {
    /// Zero-based position in the source table body, blank rows included
    pub source_index: usize,
    /// Ordered (raw header, raw cell) pairs
    pub cells: Vec<(String, String)>,
}

impl ParsedTable {
    /// Build from a header row and body rows. Blank rows are dropped (their
    /// positions still count) and short rows are padded with empty cells.
    pub fn from_grid(heading: Option<&str>, header: &[&str], body: &[Vec<&str>]) -> Self {
        let rows = body
            .iter()
            .enumerate()
            .filter(|(_, row)| row.iter().any(|cell| !cell.trim().is_empty()))
            .map(|(source_index, row)| TableRow {
                source_index,
                cells: header
                    .iter()
                    .enumerate()
                    .map(|(i, h)| {
                        let cell = row.get(i).copied().unwrap_or("");
                        (h.trim().to_string(), cell.trim().to_string())
                    })
                    .collect(),
            })
            .collect();

        Self {
            heading: heading.map(|h| h.trim().to_string()),
            rows,
        }
    }

    /// Distinct headers in first-seen order.
    pub fn headers(&self) -> Vec<String> {
        let mut headers: Vec<String> = Vec::new();
        for row in &self.rows {
            for (header, _) in &row.cells {
                if !headers.contains(header) {
                    headers.push(header.clone());
                }
            }
        }
        headers
    }
}

/// Ownership of the entries being extracted.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionContext {
    pub fund_id: FundId,
    pub document_id: Option<DocumentId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionOutcome {
    pub table_index: usize,
    pub kind: TableKind,
    pub entries: Vec<NewLedgerEntry>,
    pub rejected_rows: Vec<RowDiagnostic>,
    pub review: Option<TableReview>,
}

pub struct TableExtractor {
    config: ExtractionConfig,
}

impl TableExtractor {
    pub fn new(config: ExtractionConfig) -> Self {
        Self { config }
    }

    /// Decide the table kind, or fail with `TableClassificationAmbiguous`.
    pub fn classify(&self, table: &ParsedTable) -> Result<TableKind> {
        let scores = score_table(&table.headers(), table.heading.as_deref(), &self.config);
        match scores.ambiguity {
            None => Ok(scores.kind),
            Some(reason) => Err(LedgerError::TableClassificationAmbiguous(reason)),
        }
    }

    /// Extract every table of a document, in order.
    pub fn extract_all(&self, tables: &[ParsedTable], ctx: ExtractionContext) -> Vec<ExtractionOutcome> {
        tables
            .iter()
            .enumerate()
            .map(|(i, table)| self.extract(i, table, ctx))
            .collect()
    }

    pub fn extract(&self, table_index: usize, table: &ParsedTable, ctx: ExtractionContext) -> ExtractionOutcome {
        let headers = table.headers();
        let scores = score_table(&headers, table.heading.as_deref(), &self.config);

        if let Some(reason) = scores.ambiguity {
            warn!(
                table_index,
                heading = ?table.heading,
                %reason,
                "Table flagged for manual review"
            );
            return ExtractionOutcome {
                table_index,
                kind: TableKind::Unknown,
                entries: Vec::new(),
                rejected_rows: Vec::new(),
                review: Some(TableReview {
                    table_index,
                    heading: table.heading.clone(),
                    headers,
                    scores: scores.scores,
                    reason,
                }),
            };
        }

        let kind = scores.kind;
        let columns = ColumnMap::from_headers(headers.iter().map(String::as_str));
        let mut entries = Vec::new();
        let mut rejected_rows = Vec::new();

        for row in &table.rows {
            let row_index = row.source_index;
            match parse_row(kind, &columns, &row.cells, row_index) {
                Ok(event) => entries.push(NewLedgerEntry {
                    fund_id: ctx.fund_id,
                    document_id: ctx.document_id,
                    source_row: Some(row_index),
                    event,
                }),
                Err(e) => {
                    debug!(table_index, row_index, error = %e, "Row rejected");
                    rejected_rows.push(RowDiagnostic {
                        table_index,
                        row_index,
                        reason: e.to_string(),
                    });
                }
            }
        }

        debug!(
            table_index,
            kind = %kind,
            accepted = entries.len(),
            rejected = rejected_rows.len(),
            "Table extracted"
        );

        ExtractionOutcome {
            table_index,
            kind,
            entries,
            rejected_rows,
            review: None,
        }
    }
}

impl Default for TableExtractor {
    fn default() -> Self {
        Self::new(ExtractionConfig::default())
    }
}

fn cell<'a>(row: &'a [(String, String)], columns: &ColumnMap, field: CanonicalField) -> Option<&'a str> {
    let header = columns.header_for(field)?;
    row.iter()
        .find(|(h, _)| h == header)
        .map(|(_, v)| v.trim())
}

fn optional_text(row: &[(String, String)], columns: &ColumnMap, field: CanonicalField) -> Option<String> {
    cell(row, columns, field)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_row(
    kind: TableKind,
    columns: &ColumnMap,
    row: &[(String, String)],
    row_index: usize,
) -> Result<LedgerEvent> {
    let row_error = |source: CellError| LedgerError::RowParsing { row_index, source };

    let date_cell = cell(row, columns, CanonicalField::Date)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| row_error(CellError::MissingField("date")))?;
    let amount_cell = cell(row, columns, CanonicalField::Amount)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| row_error(CellError::MissingField("amount")))?;

    let date = parse_date(date_cell).map_err(row_error)?;
    let amount = parse_amount(amount_cell).map_err(row_error)?;

    let label = optional_text(row, columns, CanonicalField::Type);
    let description = optional_text(row, columns, CanonicalField::Description);

    let require_positive = |kind_name: &'static str| {
        if amount <= Decimal::ZERO {
            Err(row_error(CellError::NonPositiveAmount {
                kind: kind_name,
                amount,
            }))
        } else {
            Ok(amount)
        }
    };

    match kind {
        TableKind::CapitalCall => Ok(LedgerEvent::CapitalCall(CapitalCall {
            date,
            amount: require_positive("capital call")?,
            call_type: label,
            description,
        })),
        TableKind::Distribution => {
            let is_recallable = cell(row, columns, CanonicalField::Recallable)
                .map(|v| parse_flag(v, "recallable"))
                .transpose()
                .map_err(row_error)?
                .unwrap_or(false);

            Ok(LedgerEvent::Distribution(Distribution {
                date,
                amount: require_positive("distribution")?,
                is_recallable,
                distribution_type: label,
                description,
            }))
        }
        TableKind::Adjustment => {
            let is_contribution_adjustment = cell(row, columns, CanonicalField::ContributionAdjustment)
                .map(|v| parse_flag(v, "contribution_adjustment"))
                .transpose()
                .map_err(row_error)?
                .unwrap_or(false);

            Ok(LedgerEvent::Adjustment(Adjustment {
                date,
                amount,
                category: label,
                is_contribution_adjustment,
                description,
            }))
        }
        TableKind::Unknown => Err(LedgerError::TableClassificationAmbiguous(
            "row parsing requested for an unclassified table".to_string(),
        )),
    }
}
