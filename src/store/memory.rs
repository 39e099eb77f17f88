//! In-memory `LedgerStore`
//!
//! All state sits behind one lock, so a batch insert and a ledger read can never
//! interleave.

use super::{check_batch, check_transition, LedgerStore, NewDocument};
use crate::error::LedgerError;
use crate::metrics::LedgerSnapshot;
use crate::models::{
    Document, DocumentId, Fund, FundId, FundProfile, LedgerEntry, NewLedgerEntry, ParsingStatus,
};
use crate::Result;
use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

#[derive(Default)]
struct State {
    funds: HashMap<FundId, Fund>,
    documents: HashMap<DocumentId, Document>,
    entries: Vec<LedgerEntry>,
}

#[derive(Clone, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn create_fund(&self, name: &str, profile: FundProfile) -> Result<Fund> {
        let fund = Fund {
            id: Uuid::new_v4(),
            name: name.to_string(),
            gp_name: profile.gp_name,
            fund_type: profile.fund_type,
            vintage_year: profile.vintage_year,
            created_at: Utc::now(),
        };
        self.state.write().await.funds.insert(fund.id, fund.clone());
        Ok(fund)
    }

    async fn get_fund(&self, fund_id: FundId) -> Result<Fund> {
        self.state
            .read()
            .await
            .funds
            .get(&fund_id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("fund {}", fund_id)))
    }

    async fn list_funds(&self) -> Result<Vec<Fund>> {
        let mut funds: Vec<Fund> = self.state.read().await.funds.values().cloned().collect();
        funds.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        Ok(funds)
    }

    async fn update_fund_profile(&self, fund_id: FundId, profile: FundProfile) -> Result<Fund> {
        let mut state = self.state.write().await;
        let fund = state
            .funds
            .get_mut(&fund_id)
            .ok_or_else(|| LedgerError::NotFound(format!("fund {}", fund_id)))?;

        if let Some(name) = profile.name {
            fund.name = name;
        }
        if profile.gp_name.is_some() {
            fund.gp_name = profile.gp_name;
        }
        if profile.fund_type.is_some() {
            fund.fund_type = profile.fund_type;
        }
        if profile.vintage_year.is_some() {
            fund.vintage_year = profile.vintage_year;
        }
        Ok(fund.clone())
    }

    async fn create_document(&self, document: NewDocument) -> Result<Document> {
        let mut state = self.state.write().await;
        if !state.funds.contains_key(&document.fund_id) {
            return Err(LedgerError::NotFound(format!("fund {}", document.fund_id)));
        }
        let document = document.into_document();
        state.documents.insert(document.id, document.clone());
        Ok(document)
    }

    async fn get_document(&self, document_id: DocumentId) -> Result<Document> {
        self.state
            .read()
            .await
            .documents
            .get(&document_id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("document {}", document_id)))
    }

    async fn list_documents(&self, fund_id: FundId) -> Result<Vec<Document>> {
        let mut documents: Vec<Document> = self
            .state
            .read()
            .await
            .documents
            .values()
            .filter(|d| d.fund_id == fund_id)
            .cloned()
            .collect();
        documents.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(documents)
    }

    async fn delete_document(&self, document_id: DocumentId) -> Result<usize> {
        let mut state = self.state.write().await;
        if state.documents.remove(&document_id).is_none() {
            return Err(LedgerError::NotFound(format!("document {}", document_id)));
        }
        let before = state.entries.len();
        state.entries.retain(|e| e.document_id != Some(document_id));
        let removed = before - state.entries.len();
        debug!(%document_id, removed, "Document deleted");
        Ok(removed)
    }

    async fn update_document_status(
        &self,
        document_id: DocumentId,
        task_id: Uuid,
        status: ParsingStatus,
        error_message: Option<String>,
    ) -> Result<Document> {
        let mut state = self.state.write().await;
        let document = state
            .documents
            .get_mut(&document_id)
            .ok_or_else(|| LedgerError::NotFound(format!("document {}", document_id)))?;

        check_transition(document, task_id, status)?;

        document.parsing_status = status;
        document.updated_at = Utc::now();
        match status {
            ParsingStatus::Processing => document.processing_task = Some(task_id),
            ParsingStatus::Failed => document.error_message = error_message,
            _ => {}
        }
        Ok(document.clone())
    }

    async fn insert_ledger_entries(
        &self,
        fund_id: FundId,
        entries: Vec<NewLedgerEntry>,
    ) -> Result<Vec<LedgerEntry>> {
        check_batch(fund_id, &entries)?;

        let mut state = self.state.write().await;
        if !state.funds.contains_key(&fund_id) {
            return Err(LedgerError::NotFound(format!("fund {}", fund_id)));
        }
        for document_id in entries.iter().filter_map(|e| e.document_id) {
            if !state.documents.contains_key(&document_id) {
                return Err(LedgerError::NotFound(format!("document {}", document_id)));
            }
        }

        let now = Utc::now();
        let inserted: Vec<LedgerEntry> = entries
            .into_iter()
            .map(|e| LedgerEntry::from_new(e, now))
            .collect();
        state.entries.extend(inserted.iter().cloned());
        Ok(inserted)
    }

    async fn read_ledger(&self, fund_id: FundId, as_of: Option<NaiveDate>) -> Result<LedgerSnapshot> {
        let state = self.state.read().await;
        if !state.funds.contains_key(&fund_id) {
            return Err(LedgerError::NotFound(format!("fund {}", fund_id)));
        }
        let entries = state
            .entries
            .iter()
            .filter(|e| e.fund_id == fund_id)
            .filter(|e| as_of.map_or(true, |d| e.date() <= d))
            .cloned()
            .collect();
        Ok(LedgerSnapshot::new(fund_id, entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CapitalCall, LedgerEvent};
    use rust_decimal::Decimal;

    fn call(fund_id: FundId, document_id: Option<DocumentId>, amount: i64) -> NewLedgerEntry {
        NewLedgerEntry {
            fund_id,
            document_id,
            source_row: None,
            event: LedgerEvent::CapitalCall(CapitalCall {
                date: NaiveDate::from_ymd_opt(2023, 1, 15).unwrap(),
                amount: Decimal::from(amount),
                call_type: None,
                description: None,
            }),
        }
    }

    async fn setup() -> (InMemoryLedgerStore, Fund, Document) {
        let store = InMemoryLedgerStore::new();
        let fund = store.create_fund("Tech Ventures Fund III", FundProfile::default()).await.unwrap();
        let document = store
            .create_document(NewDocument {
                fund_id: fund.id,
                file_name: "q4.pdf".to_string(),
                file_path: "/uploads/q4.pdf".to_string(),
            })
            .await
            .unwrap();
        (store, fund, document)
    }

    #[tokio::test]
    async fn test_only_claiming_task_can_finish() {
        let (store, _, document) = setup().await;
        let owner = Uuid::new_v4();
        let intruder = Uuid::new_v4();

        store
            .update_document_status(document.id, owner, ParsingStatus::Processing, None)
            .await
            .unwrap();

        // second claim fails
        assert!(matches!(
            store
                .update_document_status(document.id, intruder, ParsingStatus::Processing, None)
                .await,
            Err(LedgerError::InvalidStatusTransition(_))
        ));
        assert!(matches!(
            store
                .update_document_status(document.id, intruder, ParsingStatus::Completed, None)
                .await,
            Err(LedgerError::InvalidStatusTransition(_))
        ));

        let done = store
            .update_document_status(document.id, owner, ParsingStatus::Failed, Some("boom".to_string()))
            .await
            .unwrap();
        assert_eq!(done.parsing_status, ParsingStatus::Failed);
        assert_eq!(done.error_message.as_deref(), Some("boom"));

        // failed is terminal
        assert!(store
            .update_document_status(document.id, owner, ParsingStatus::Processing, None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_batch_insert_is_all_or_nothing() {
        let (store, fund, document) = setup().await;

        let batch = vec![call(fund.id, Some(document.id), 100), call(fund.id, Some(document.id), -5)];
        assert!(matches!(
            store.insert_ledger_entries(fund.id, batch).await,
            Err(LedgerError::InvalidEntry(_))
        ));
        assert!(store.read_ledger(fund.id, None).await.unwrap().is_empty());

        let other_fund = Uuid::new_v4();
        let batch = vec![call(fund.id, None, 100), call(other_fund, None, 100)];
        assert!(store.insert_ledger_entries(fund.id, batch).await.is_err());
        assert!(store.read_ledger(fund.id, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sub_cent_amounts_are_kept_exactly() {
        let (store, fund, _) = setup().await;
        let mut entry = call(fund.id, None, 0);
        if let LedgerEvent::CapitalCall(c) = &mut entry.event {
            c.amount = Decimal::new(1, 3);
        }

        store.insert_ledger_entries(fund.id, vec![entry]).await.unwrap();
        let snapshot = store.read_ledger(fund.id, None).await.unwrap();
        assert_eq!(snapshot.entries()[0].amount(), Decimal::new(1, 3));
    }

    #[tokio::test]
    async fn test_delete_document_cascades_to_its_entries_only() {
        let (store, fund, document) = setup().await;

        store
            .insert_ledger_entries(
                fund.id,
                vec![call(fund.id, Some(document.id), 100), call(fund.id, None, 50)],
            )
            .await
            .unwrap();

        assert_eq!(store.delete_document(document.id).await.unwrap(), 1);
        let snapshot = store.read_ledger(fund.id, None).await.unwrap();
        assert_eq!(snapshot.entries().len(), 1);
        assert!(store.get_document(document.id).await.is_err());
    }

    #[tokio::test]
    async fn test_profile_update_keeps_missing_fields() {
        let (store, fund, _) = setup().await;
        let updated = store
            .update_fund_profile(
                fund.id,
                FundProfile {
                    gp_name: Some("Tech Ventures Partners".to_string()),
                    vintage_year: Some(2022),
                    ..FundProfile::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.name, "Tech Ventures Fund III");
        assert_eq!(updated.vintage_year, Some(2022));
    }
}
