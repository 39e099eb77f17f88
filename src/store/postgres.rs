//! PostgreSQL `LedgerStore` (sqlx)
//!
//! Batch inserts and cascading deletes run in one transaction; the document status
//! compare-and-set is a single guarded UPDATE.

use super::{check_batch, check_transition, LedgerStore, NewDocument};
use crate::error::LedgerError;
use crate::metrics::LedgerSnapshot;
use crate::models::{
    Adjustment, CapitalCall, Distribution, Document, DocumentId, Fund, FundId, FundProfile,
    LedgerEntry, LedgerEvent, NewLedgerEntry, ParsingStatus,
};
use crate::Result;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS funds (
      id UUID PRIMARY KEY,
      name TEXT NOT NULL,
      gp_name TEXT,
      fund_type TEXT,
      vintage_year INTEGER,
      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS documents (
      id UUID PRIMARY KEY,
      fund_id UUID NOT NULL REFERENCES funds(id),
      file_name TEXT NOT NULL,
      file_path TEXT NOT NULL,
      parsing_status TEXT NOT NULL DEFAULT 'pending',
      error_message TEXT,
      processing_task UUID,
      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
      updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ledger_entries (
      id UUID PRIMARY KEY,
      fund_id UUID NOT NULL REFERENCES funds(id),
      document_id UUID REFERENCES documents(id),
      source_row INTEGER,
      kind TEXT NOT NULL,
      entry_date DATE NOT NULL,
      amount NUMERIC NOT NULL,
      label TEXT,
      is_recallable BOOLEAN NOT NULL DEFAULT FALSE,
      is_contribution_adjustment BOOLEAN NOT NULL DEFAULT FALSE,
      description TEXT,
      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
      CHECK (kind = 'adjustment' OR amount > 0)
    );
    "#,
    // older databases were created with a fixed scale that rounded amounts
    r#"
    ALTER TABLE ledger_entries ALTER COLUMN amount TYPE NUMERIC;
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_ledger_entries_fund_date
    ON ledger_entries (fund_id, entry_date);
    "#,
];

const FUND_COLUMNS: &str = "id, name, gp_name, fund_type, vintage_year, created_at";
const DOCUMENT_COLUMNS: &str = "id, fund_id, file_name, file_path, parsing_status, error_message, processing_task, created_at, updated_at";
const ENTRY_COLUMNS: &str = "id, fund_id, document_id, kind, entry_date, amount, label, is_recallable, is_contribution_adjustment, description, created_at";

#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PgLedgerStore {
    /// Lazily connecting pool; the schema is created on first use.
    pub fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(database_url)
            .map_err(|e| LedgerError::DatabaseError(format!("Invalid database URL: {}", e)))?;
        info!("Ledger store backend: postgres");
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        }
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                for statement in SCHEMA {
                    sqlx::query(statement).execute(&self.pool).await?;
                }
                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| db_error("Failed to initialize ledger schema", e))?;
        Ok(())
    }

    async fn fetch_document(&self, document_id: DocumentId) -> Result<Option<Document>> {
        let row = sqlx::query(&format!("SELECT {} FROM documents WHERE id = $1", DOCUMENT_COLUMNS))
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to load document", e))?;
        row.as_ref().map(document_from_row).transpose()
    }

    async fn fund_exists(&self, fund_id: FundId) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM funds WHERE id = $1")
            .bind(fund_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to load fund", e))?;
        Ok(row.is_some())
    }
}

#[async_trait::async_trait]
impl LedgerStore for PgLedgerStore {
    async fn create_fund(&self, name: &str, profile: FundProfile) -> Result<Fund> {
        self.ensure_schema().await?;
        let row = sqlx::query(&format!(
            "INSERT INTO funds (id, name, gp_name, fund_type, vintage_year) VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            FUND_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(&profile.gp_name)
        .bind(&profile.fund_type)
        .bind(profile.vintage_year)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("Failed to create fund", e))?;
        fund_from_row(&row)
    }

    async fn get_fund(&self, fund_id: FundId) -> Result<Fund> {
        self.ensure_schema().await?;
        let row = sqlx::query(&format!("SELECT {} FROM funds WHERE id = $1", FUND_COLUMNS))
            .bind(fund_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to load fund", e))?
            .ok_or_else(|| LedgerError::NotFound(format!("fund {}", fund_id)))?;
        fund_from_row(&row)
    }

    async fn list_funds(&self) -> Result<Vec<Fund>> {
        self.ensure_schema().await?;
        let rows = sqlx::query(&format!("SELECT {} FROM funds ORDER BY created_at, name", FUND_COLUMNS))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to list funds", e))?;
        rows.iter().map(fund_from_row).collect()
    }

    async fn update_fund_profile(&self, fund_id: FundId, profile: FundProfile) -> Result<Fund> {
        self.ensure_schema().await?;
        let row = sqlx::query(&format!(
            r#"
            UPDATE funds SET
              name = COALESCE($2, name),
              gp_name = COALESCE($3, gp_name),
              fund_type = COALESCE($4, fund_type),
              vintage_year = COALESCE($5, vintage_year)
            WHERE id = $1
            RETURNING {}
            "#,
            FUND_COLUMNS
        ))
        .bind(fund_id)
        .bind(&profile.name)
        .bind(&profile.gp_name)
        .bind(&profile.fund_type)
        .bind(profile.vintage_year)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to update fund", e))?
        .ok_or_else(|| LedgerError::NotFound(format!("fund {}", fund_id)))?;
        fund_from_row(&row)
    }

    async fn create_document(&self, document: NewDocument) -> Result<Document> {
        self.ensure_schema().await?;
        if !self.fund_exists(document.fund_id).await? {
            return Err(LedgerError::NotFound(format!("fund {}", document.fund_id)));
        }

        let document = document.into_document();
        sqlx::query(
            r#"
            INSERT INTO documents (id, fund_id, file_name, file_path, parsing_status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(document.id)
        .bind(document.fund_id)
        .bind(&document.file_name)
        .bind(&document.file_path)
        .bind(document.parsing_status.as_str())
        .bind(document.created_at)
        .bind(document.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to create document", e))?;
        Ok(document)
    }

    async fn get_document(&self, document_id: DocumentId) -> Result<Document> {
        self.ensure_schema().await?;
        self.fetch_document(document_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("document {}", document_id)))
    }

    async fn list_documents(&self, fund_id: FundId) -> Result<Vec<Document>> {
        self.ensure_schema().await?;
        let rows = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE fund_id = $1 ORDER BY created_at",
            DOCUMENT_COLUMNS
        ))
        .bind(fund_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list documents", e))?;
        rows.iter().map(document_from_row).collect()
    }

    async fn delete_document(&self, document_id: DocumentId) -> Result<usize> {
        self.ensure_schema().await?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin delete transaction", e))?;

        let removed = sqlx::query("DELETE FROM ledger_entries WHERE document_id = $1")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to delete document entries", e))?
            .rows_affected();

        let deleted = sqlx::query("DELETE FROM documents WHERE id = $1")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to delete document", e))?
            .rows_affected();

        if deleted == 0 {
            // dropping the transaction rolls it back
            return Err(LedgerError::NotFound(format!("document {}", document_id)));
        }

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit document delete", e))?;

        debug!(%document_id, removed, "Document deleted");
        Ok(removed as usize)
    }

    async fn update_document_status(
        &self,
        document_id: DocumentId,
        task_id: Uuid,
        status: ParsingStatus,
        error_message: Option<String>,
    ) -> Result<Document> {
        self.ensure_schema().await?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE documents SET
              parsing_status = $3::text,
              processing_task = CASE WHEN $3::text = 'processing' THEN $2::uuid ELSE processing_task END,
              error_message = CASE WHEN $3::text = 'failed' THEN $4::text ELSE error_message END,
              updated_at = NOW()
            WHERE id = $1
              AND (
                (parsing_status = 'pending' AND $3::text = 'processing')
                OR (parsing_status = 'processing' AND processing_task = $2::uuid
                    AND $3::text IN ('completed', 'failed'))
              )
            RETURNING {}
            "#,
            DOCUMENT_COLUMNS
        ))
        .bind(document_id)
        .bind(task_id)
        .bind(status.as_str())
        .bind(&error_message)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to update document status", e))?;

        if let Some(row) = row {
            return document_from_row(&row);
        }

        // Lost the compare-and-set: report why.
        let current = self
            .fetch_document(document_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("document {}", document_id)))?;
        check_transition(&current, task_id, status)?;
        Err(LedgerError::InvalidStatusTransition(format!(
            "document {} changed concurrently",
            document_id
        )))
    }

    async fn insert_ledger_entries(
        &self,
        fund_id: FundId,
        entries: Vec<NewLedgerEntry>,
    ) -> Result<Vec<LedgerEntry>> {
        check_batch(fund_id, &entries)?;
        self.ensure_schema().await?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin ledger transaction", e))?;

        let now = Utc::now();
        let mut inserted = Vec::with_capacity(entries.len());

        for new_entry in entries {
            let source_row = new_entry.source_row.map(|r| r as i32);
            let entry = LedgerEntry::from_new(new_entry, now);
            let columns = EventColumns::from_event(&entry.event);

            sqlx::query(
                r#"
                INSERT INTO ledger_entries
                  (id, fund_id, document_id, source_row, kind, entry_date, amount, label,
                   is_recallable, is_contribution_adjustment, description, created_at)
                VALUES
                  ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(entry.id)
            .bind(entry.fund_id)
            .bind(entry.document_id)
            .bind(source_row)
            .bind(columns.kind)
            .bind(entry.date())
            .bind(entry.amount())
            .bind(columns.label)
            .bind(columns.is_recallable)
            .bind(columns.is_contribution_adjustment)
            .bind(entry.event.description())
            .bind(entry.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to insert ledger entry", e))?;

            inserted.push(entry);
        }

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit ledger batch", e))?;

        debug!(%fund_id, count = inserted.len(), "Ledger batch committed");
        Ok(inserted)
    }

    async fn read_ledger(&self, fund_id: FundId, as_of: Option<NaiveDate>) -> Result<LedgerSnapshot> {
        self.ensure_schema().await?;
        if !self.fund_exists(fund_id).await? {
            return Err(LedgerError::NotFound(format!("fund {}", fund_id)));
        }

        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM ledger_entries
            WHERE fund_id = $1 AND ($2::date IS NULL OR entry_date <= $2::date)
            ORDER BY entry_date, created_at, id
            "#,
            ENTRY_COLUMNS
        ))
        .bind(fund_id)
        .bind(as_of)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to read ledger", e))?;

        let entries = rows.iter().map(entry_from_row).collect::<Result<Vec<_>>>()?;
        Ok(LedgerSnapshot::new(fund_id, entries))
    }
}

// =============================
// Row mapping
// =============================

fn db_error(context: &str, e: sqlx::Error) -> LedgerError {
    LedgerError::DatabaseError(format!("{}: {}", context, e))
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(name)
        .map_err(|e| db_error(&format!("Failed to read column '{}'", name), e))
}

fn fund_from_row(row: &PgRow) -> Result<Fund> {
    Ok(Fund {
        id: column(row, "id")?,
        name: column(row, "name")?,
        gp_name: column(row, "gp_name")?,
        fund_type: column(row, "fund_type")?,
        vintage_year: column(row, "vintage_year")?,
        created_at: column(row, "created_at")?,
    })
}

fn document_from_row(row: &PgRow) -> Result<Document> {
    let status: String = column(row, "parsing_status")?;
    Ok(Document {
        id: column(row, "id")?,
        fund_id: column(row, "fund_id")?,
        file_name: column(row, "file_name")?,
        file_path: column(row, "file_path")?,
        parsing_status: ParsingStatus::parse(&status)?,
        error_message: column(row, "error_message")?,
        processing_task: column(row, "processing_task")?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

/// Flat columns for one event.
struct EventColumns<'a> {
    kind: &'static str,
    label: Option<&'a str>,
    is_recallable: bool,
    is_contribution_adjustment: bool,
}

impl<'a> EventColumns<'a> {
    fn from_event(event: &'a LedgerEvent) -> Self {
        match event {
            LedgerEvent::CapitalCall(c) => Self {
                kind: "capital_call",
                label: c.call_type.as_deref(),
                is_recallable: false,
                is_contribution_adjustment: false,
            },
            LedgerEvent::Distribution(d) => Self {
                kind: "distribution",
                label: d.distribution_type.as_deref(),
                is_recallable: d.is_recallable,
                is_contribution_adjustment: false,
            },
            LedgerEvent::Adjustment(a) => Self {
                kind: "adjustment",
                label: a.category.as_deref(),
                is_recallable: false,
                is_contribution_adjustment: a.is_contribution_adjustment,
            },
        }
    }
}

fn entry_from_row(row: &PgRow) -> Result<LedgerEntry> {
    let kind: String = column(row, "kind")?;
    let date: NaiveDate = column(row, "entry_date")?;
    let amount: Decimal = column(row, "amount")?;
    let label: Option<String> = column(row, "label")?;
    let description: Option<String> = column(row, "description")?;

    let event = match kind.as_str() {
        "capital_call" => LedgerEvent::CapitalCall(CapitalCall {
            date,
            amount,
            call_type: label,
            description,
        }),
        "distribution" => LedgerEvent::Distribution(Distribution {
            date,
            amount,
            is_recallable: column(row, "is_recallable")?,
            distribution_type: label,
            description,
        }),
        "adjustment" => LedgerEvent::Adjustment(Adjustment {
            date,
            amount,
            category: label,
            is_contribution_adjustment: column(row, "is_contribution_adjustment")?,
            description,
        }),
        other => {
            return Err(LedgerError::DatabaseError(format!(
                "unknown ledger entry kind '{}'",
                other
            )))
        }
    };

    let created_at: DateTime<Utc> = column(row, "created_at")?;
    Ok(LedgerEntry {
        id: column(row, "id")?,
        fund_id: column(row, "fund_id")?,
        document_id: column(row, "document_id")?,
        event,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_columns() {
        let event = LedgerEvent::Distribution(Distribution {
            date: NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
            amount: Decimal::from(2_000_000),
            is_recallable: true,
            distribution_type: Some("Income".to_string()),
            description: None,
        });
        let columns = EventColumns::from_event(&event);
        assert_eq!(columns.kind, "distribution");
        assert_eq!(columns.label, Some("Income"));
        assert!(columns.is_recallable);
        assert!(!columns.is_contribution_adjustment);
    }

    #[test]
    fn test_schema_guards_magnitudes() {
        assert!(SCHEMA.iter().any(|s| s.contains("CHECK (kind = 'adjustment' OR amount > 0)")));
    }

    #[test]
    fn test_schema_keeps_amount_scale() {
        // amounts accepted by check_batch must round-trip exactly, as in the in-memory store
        assert!(SCHEMA.iter().any(|s| s.contains("amount NUMERIC NOT NULL")));
        assert!(!SCHEMA.iter().any(|s| s.contains("NUMERIC(")));
    }
}
