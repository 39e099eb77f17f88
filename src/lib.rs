//! Fund Ledger Orchestrator
//!
//! Turns fund performance reports into an auditable cash-flow ledger and answers
//! questions about the fund:
//! - Extracts capital calls, distributions and adjustments from parsed report tables
//! - Commits each document's ledger batch atomically, one claiming task per document
//! - Computes PIC, DPI, TVPI, RVPI and IRR deterministically (LLM excluded from numbers)
//! - Routes questions to calculation, ledger lookup, document retrieval or a mix
//! - Keeps an audit record of every extraction run
//!
//! INGEST:  TABLES → EXTRACT → VALIDATE → COMMIT → COMPLETE
//! QUERY:   QUESTION → CLASSIFY → (METRICS | LEDGER | RETRIEVAL) → ANSWER

pub mod audit;
pub mod classifier;
pub mod config;
pub mod error;
pub mod extraction;
pub mod gemini;
pub mod glossary;
pub mod ingest;
pub mod metrics;
pub mod models;
pub mod retrieval;
pub mod router;
pub mod segmenter;
pub mod store;
pub mod text;
pub mod validation;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use classifier::{Classification, Intent, IntentClassifier};
pub use config::EngineConfig;
pub use error::LedgerError;
pub use extraction::{ParsedTable, TableExtractor};
pub use ingest::{DocumentIngestor, IngestReport, ParsedDocument};
pub use metrics::{LedgerSnapshot, MetricsEngine};
pub use router::{Answer, QueryRequest, QueryRouter};
pub use store::{InMemoryLedgerStore, LedgerStore, PgLedgerStore};
