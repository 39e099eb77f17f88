//! Manual ledger entries and corrections
//!
//! Entries typed in by an operator skip extraction but pass the same validation.
//! Committed entries are never edited: a correction is a new offsetting adjustment.

use crate::error::LedgerError;
use crate::models::{FundId, LedgerEntry, LedgerEvent, NewLedgerEntry};
use crate::store::LedgerStore;
use crate::validation::{LedgerValidator, Severity, ValidationContext};
use crate::Result;
use chrono::NaiveDate;
use tracing::{info, warn};

/// Validate and insert operator entries as one batch. Any rejected entry fails the batch.
pub async fn record_manual_entries(
    store: &dyn LedgerStore,
    validator: &LedgerValidator,
    fund_id: FundId,
    events: Vec<LedgerEvent>,
) -> Result<Vec<LedgerEntry>> {
    let batch = events
        .into_iter()
        .map(|event| NewLedgerEntry::manual(fund_id, event))
        .collect();

    let report = validator.validate(batch, &ValidationContext::new(fund_id));

    let rejections: Vec<String> = report
        .violations
        .iter()
        .filter(|v| v.severity == Severity::Reject)
        .map(|v| format!("entry {}: {}", v.entry_index, v.details))
        .collect();
    if !rejections.is_empty() {
        return Err(LedgerError::InvalidEntry(rejections.join("; ")));
    }
    for warning in report.warnings() {
        warn!(%fund_id, rule = %warning.rule_name, details = %warning.details, "Manual entry warning");
    }

    let inserted = store.insert_ledger_entries(fund_id, report.accepted).await?;
    info!(%fund_id, count = inserted.len(), "Manual entries recorded");
    Ok(inserted)
}

/// Cancel `entry`'s effect with an adjustment dated `date`.
pub async fn record_correction(
    store: &dyn LedgerStore,
    entry: &LedgerEntry,
    date: NaiveDate,
    description: Option<String>,
) -> Result<LedgerEntry> {
    let correction = NewLedgerEntry::manual(entry.fund_id, entry.event.offsetting_adjustment(date, description));

    store
        .insert_ledger_entries(entry.fund_id, vec![correction])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| LedgerError::DatabaseError("correction was not inserted".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsEngine;
    use crate::models::{CapitalCall, Distribution, FundProfile};
    use crate::store::InMemoryLedgerStore;
    use crate::validation::create_default_validator;
    use rust_decimal::Decimal;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn call(d: NaiveDate, amount: i64) -> LedgerEvent {
        LedgerEvent::CapitalCall(CapitalCall {
            date: d,
            amount: Decimal::from(amount),
            call_type: None,
            description: None,
        })
    }

    #[tokio::test]
    async fn test_batch_with_invalid_entry_is_refused() {
        let store = InMemoryLedgerStore::new();
        let fund = store.create_fund("Fund", FundProfile::default()).await.unwrap();

        let err = record_manual_entries(
            &store,
            &create_default_validator(),
            fund.id,
            vec![call(date(2023, 1, 15), 1_000), call(date(2023, 2, 15), 0)],
        )
        .await
        .unwrap_err();

        assert!(matches!(err, LedgerError::InvalidEntry(ref m) if m.contains("entry 1")));
        assert!(store.read_ledger(fund.id, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_correction_offsets_recalled_distribution() {
        let store = InMemoryLedgerStore::new();
        let fund = store.create_fund("Fund", FundProfile::default()).await.unwrap();

        let inserted = record_manual_entries(
            &store,
            &create_default_validator(),
            fund.id,
            vec![
                call(date(2023, 1, 15), 10_000_000),
                LedgerEvent::Distribution(Distribution {
                    date: date(2023, 12, 15),
                    amount: Decimal::from(500_000),
                    is_recallable: true,
                    distribution_type: None,
                    description: None,
                }),
            ],
        )
        .await
        .unwrap();

        record_correction(&store, &inserted[1], date(2024, 1, 15), Some("Recalled".to_string()))
            .await
            .unwrap();

        let as_of = date(2024, 12, 31);
        let snapshot = store.read_ledger(fund.id, None).await.unwrap();
        let engine = MetricsEngine::new(&snapshot);
        assert_eq!(engine.cumulative_distributions(as_of).unwrap(), Decimal::ZERO);
        assert_eq!(engine.paid_in_capital(as_of).unwrap(), Decimal::from(10_000_000));
    }
}
