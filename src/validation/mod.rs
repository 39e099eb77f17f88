//! Ledger entry validation
//!
//! Rules-based checks run over an extracted batch before it is committed.
//! Deterministic: the same batch always yields the same report.

use crate::models::{FundId, LedgerEvent, NewLedgerEntry};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Reported, entry is kept
    Warning,
    /// Entry is dropped from the batch
    Reject,
}

/// Context shared by every rule for one batch.
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext {
    pub fund_id: FundId,
    pub today: NaiveDate,
}

impl ValidationContext {
    pub fn new(fund_id: FundId) -> Self {
        Self {
            fund_id,
            today: Utc::now().date_naive(),
        }
    }
}

/// Trait for ledger rules
pub trait LedgerRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn severity(&self) -> Severity;

    /// `Some(details)` when the entry breaks the rule.
    fn check(&self, entry: &NewLedgerEntry, context: &ValidationContext) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleViolation {
    pub rule_name: String,
    pub severity: Severity,
    /// Position in the validated batch
    pub entry_index: usize,
    pub source_row: Option<usize>,
    pub details: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub accepted: Vec<NewLedgerEntry>,
    pub violations: Vec<RuleViolation>,
}

impl ValidationReport {
    pub fn rejected_count(&self) -> usize {
        let mut rejected: Vec<usize> = self
            .violations
            .iter()
            .filter(|v| v.severity == Severity::Reject)
            .map(|v| v.entry_index)
            .collect();
        rejected.dedup();
        rejected.len()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &RuleViolation> {
        self.violations.iter().filter(|v| v.severity == Severity::Warning)
    }
}

/// Runs every registered rule over a batch
pub struct LedgerValidator {
    rules: Vec<Box<dyn LedgerRule>>,
}

impl LedgerValidator {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn add_rule(&mut self, rule: Box<dyn LedgerRule>) {
        self.rules.push(rule);
    }

    pub fn validate(&self, entries: Vec<NewLedgerEntry>, context: &ValidationContext) -> ValidationReport {
        let mut report = ValidationReport::default();

        for (index, entry) in entries.into_iter().enumerate() {
            let mut rejected = false;

            for rule in &self.rules {
                if let Some(details) = rule.check(&entry, context) {
                    rejected |= rule.severity() == Severity::Reject;
                    report.violations.push(RuleViolation {
                        rule_name: rule.name().to_string(),
                        severity: rule.severity(),
                        entry_index: index,
                        source_row: entry.source_row,
                        details,
                    });
                }
            }

            if !rejected {
                report.accepted.push(entry);
            }
        }

        info!(
            rule_count = self.rules.len(),
            accepted = report.accepted.len(),
            violations = report.violations.len(),
            "Ledger validation completed"
        );
        report
    }
}

impl Default for LedgerValidator {
    fn default() -> Self {
        Self::new()
    }
}

//
// ========== Rules ==========
//

/// Calls and distributions carry positive magnitudes.
pub struct MagnitudeRule;

impl LedgerRule for MagnitudeRule {
    fn name(&self) -> &'static str {
        "positive_magnitude"
    }

    fn severity(&self) -> Severity {
        Severity::Reject
    }

    fn check(&self, entry: &NewLedgerEntry, _context: &ValidationContext) -> Option<String> {
        entry.event.validate().err().map(|e| e.to_string())
    }
}

/// Every entry in a batch belongs to the fund being ingested.
pub struct FundOwnershipRule;

impl LedgerRule for FundOwnershipRule {
    fn name(&self) -> &'static str {
        "fund_ownership"
    }

    fn severity(&self) -> Severity {
        Severity::Reject
    }

    fn check(&self, entry: &NewLedgerEntry, context: &ValidationContext) -> Option<String> {
        (entry.fund_id != context.fund_id).then(|| {
            format!("entry belongs to fund {}, batch is for {}", entry.fund_id, context.fund_id)
        })
    }
}

/// Future-dated events are usually a misread year.
pub struct FutureDateRule;

impl LedgerRule for FutureDateRule {
    fn name(&self) -> &'static str {
        "future_date"
    }

    fn severity(&self) -> Severity {
        Severity::Warning
    }

    fn check(&self, entry: &NewLedgerEntry, context: &ValidationContext) -> Option<String> {
        let date = entry.event.date();
        (date > context.today).then(|| format!("{} is dated {} (after {})", entry.event.kind(), date, context.today))
    }
}

/// Recalls reduce distributions, so they belong on the distribution side.
pub struct RecallSideRule;

impl LedgerRule for RecallSideRule {
    fn name(&self) -> &'static str {
        "recall_side"
    }

    fn severity(&self) -> Severity {
        Severity::Warning
    }

    fn check(&self, entry: &NewLedgerEntry, _context: &ValidationContext) -> Option<String> {
        match &entry.event {
            LedgerEvent::Adjustment(a) if a.category.as_deref() == Some("recall") && a.is_contribution_adjustment => {
                Some("recall adjustment is booked on the contribution side".to_string())
            }
            _ => None,
        }
    }
}

/// Create a validator with the standard rules
pub fn create_default_validator() -> LedgerValidator {
    let mut validator = LedgerValidator::new();
    validator.add_rule(Box::new(MagnitudeRule));
    validator.add_rule(Box::new(FundOwnershipRule));
    validator.add_rule(Box::new(FutureDateRule));
    validator.add_rule(Box::new(RecallSideRule));
    validator
}

//
// ================= Tests =================
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Adjustment, CapitalCall};
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn call(fund_id: FundId, d: NaiveDate, amount: i64) -> NewLedgerEntry {
        NewLedgerEntry::manual(
            fund_id,
            LedgerEvent::CapitalCall(CapitalCall {
                date: d,
                amount: Decimal::from(amount),
                call_type: None,
                description: None,
            }),
        )
    }

    fn context(fund_id: FundId) -> ValidationContext {
        ValidationContext {
            fund_id,
            today: date(2024, 12, 31),
        }
    }

    #[test]
    fn test_valid_batch_passes() {
        let fund_id = Uuid::new_v4();
        let report = create_default_validator().validate(
            vec![call(fund_id, date(2023, 1, 15), 5_000_000)],
            &context(fund_id),
        );
        assert_eq!(report.accepted.len(), 1);
        assert!(report.violations.is_empty());
    }

    #[test]
    fn test_rejects_are_dropped_and_warnings_kept() {
        let fund_id = Uuid::new_v4();
        let batch = vec![
            call(fund_id, date(2023, 1, 15), 0),
            call(Uuid::new_v4(), date(2023, 1, 15), 100),
            call(fund_id, date(2031, 1, 15), 100),
        ];

        let report = create_default_validator().validate(batch, &context(fund_id));
        assert_eq!(report.accepted.len(), 1);
        assert_eq!(report.rejected_count(), 2);
        assert_eq!(report.warnings().count(), 1);
        assert_eq!(report.warnings().next().unwrap().rule_name, "future_date");
    }

    #[test]
    fn test_contribution_side_recall_is_flagged() {
        let fund_id = Uuid::new_v4();
        let entry = NewLedgerEntry::manual(
            fund_id,
            LedgerEvent::Adjustment(Adjustment {
                date: date(2024, 2, 1),
                amount: Decimal::from(-500),
                category: Some("recall".to_string()),
                is_contribution_adjustment: true,
                description: None,
            }),
        );

        let report = create_default_validator().validate(vec![entry], &context(fund_id));
        assert_eq!(report.accepted.len(), 1);
        assert_eq!(report.violations[0].rule_name, "recall_side");
    }
}
