use fund_ledger_orchestrator::{
    audit::AuditLog,
    extraction::ParsedTable,
    gemini::GeminiClient,
    ingest::{DocumentIngestor, ParsedDocument},
    retrieval::{
        memory::{ExtractiveGenerator, HashingEmbedder},
        Embedder, InMemoryChunkIndex, SemanticRetriever, TextGenerator,
    },
    router::{QueryRequest, QueryRouter},
    store::{InMemoryLedgerStore, LedgerStore, NewDocument, PgLedgerStore},
    validation::create_default_validator,
    EngineConfig, FundProfile,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Fund Ledger Orchestrator starting");

    let config = EngineConfig::from_env()?;

    // Create components
    let store: Arc<dyn LedgerStore> = match &config.database_url {
        Some(url) => {
            info!("Using Postgres ledger store");
            Arc::new(PgLedgerStore::connect(url)?)
        }
        None => {
            info!("DATABASE_URL not set, using in-memory ledger store");
            Arc::new(InMemoryLedgerStore::new())
        }
    };

    let (embedder, generator): (Arc<dyn Embedder>, Arc<dyn TextGenerator>) = match &config.gemini_api_key {
        Some(key) => {
            let gemini = Arc::new(GeminiClient::new(key.clone())?);
            let embedder: Arc<dyn Embedder> = gemini.clone();
            (embedder, gemini as Arc<dyn TextGenerator>)
        }
        None => {
            warn!("GEMINI_API_KEY not set, using local hashing embedder and extractive answers");
            let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::default());
            let generator: Arc<dyn TextGenerator> = Arc::new(ExtractiveGenerator);
            (embedder, generator)
        }
    };

    let retriever = Arc::new(SemanticRetriever::new(
        embedder,
        Arc::new(InMemoryChunkIndex::new()),
        generator,
        config.upstream.clone(),
        config.query.top_k,
    ));

    let ingestor = Arc::new(DocumentIngestor::new(
        store.clone(),
        retriever.clone(),
        config.extraction.clone(),
        &config.segmenter,
        create_default_validator(),
        Arc::new(AuditLog::new()),
    ));
    let router = QueryRouter::new(store.clone(), retriever, config.query.clone());

    // Sample report
    let fund = store.create_fund("Tech Ventures Fund III", FundProfile::default()).await?;
    let document = store
        .create_document(NewDocument {
            fund_id: fund.id,
            file_name: "Sample_Fund_Performance_Report.pdf".to_string(),
            file_path: "uploads/Sample_Fund_Performance_Report.pdf".to_string(),
        })
        .await?;

    let handle = ingestor.spawn(sample_report(document.id));
    info!(task_id = %handle.task_id, "Waiting for ingestion");
    let report = handle.wait().await?;

    println!("\n=== INGESTION ===");
    println!("Entries: {}", report.entries_inserted);
    println!("Chunks: {}", report.chunks_indexed);
    if let Some(reason) = &report.indexing_error {
        println!("  text not indexed: {}", reason);
    }
    for row in &report.rejected_rows {
        println!("  rejected table {} row {}: {}", row.table_index, row.row_index, row.reason);
    }
    for review in &report.reviews {
        println!("  review table {}: {}", review.table_index, review.reason);
    }

    let questions = [
        "What is DPI?",
        "Calculate the current DPI",
        "What is the TVPI as of June 30, 2024?",
        "Calculate the IRR",
        "Show me all capital calls in 2023",
        "What was the largest distribution?",
        "How is the fund performing compared to benchmarks?",
    ];

    println!("\n=== QUERIES ===");
    for question in questions {
        let mut request = QueryRequest::new(fund.id, question);
        request.current_nav = Some(Decimal::from(8_000_000));

        match router.answer(&request).await {
            Ok(answer) => {
                println!("\nQ: {}\n[{}] {}", question, answer.intent, answer.text);
                for row in &answer.ledger_rows {
                    println!("  {} {} {}", row.date(), row.kind(), row.amount());
                }
                for citation in &answer.citations {
                    println!("  cited chunk {} (score {:.2})", citation.chunk_index, citation.score);
                }
                for note in &answer.notes {
                    println!("  note: {}", note);
                }
            }
            Err(e) if e.is_query_level() => println!("\nQ: {}\n  {}", question, e),
            Err(e) => {
                eprintln!("Query failed: {}", e);
                return Err(e.into());
            }
        }
    }

    Ok(())
}

fn sample_report(document_id: uuid::Uuid) -> ParsedDocument {
    ParsedDocument {
        document_id,
        tables: vec![
            ParsedTable::from_grid(
                Some("Capital Calls"),
                &["Date", "Call Number", "Amount", "Description"],
                &[
                    vec!["2023-01-15", "Call 1", "$5,000,000", "Initial Capital Call"],
                    vec!["2023-06-20", "Call 2", "$3,000,000", "Follow-on Investment"],
                    vec!["2024-03-10", "Call 3", "$2,000,000", "Bridge Round"],
                    vec!["Total", "", "$10,000,000", ""],
                ],
            ),
            ParsedTable::from_grid(
                Some("Distributions"),
                &["Distribution Date", "Type", "Amount", "Recallable?", "Description"],
                &[
                    vec!["2023-12-15", "Return of Capital", "$1,500,000", "No", "Exit: DataCo"],
                    vec!["2024-06-30", "Income", "$500,000", "No", "Dividend"],
                    vec!["2024-09-30", "Return of Capital", "$2,000,000", "Yes", "Partial exit"],
                ],
            ),
            ParsedTable::from_grid(
                Some("Adjustments"),
                &["Date", "Type", "Amount", "Contribution Adjustment", "Description"],
                &[vec!["2024-01-15", "Capital Call Adjustment", "$100,000", "Yes", "Fee true-up"]],
            ),
        ],
        text: "Fund Name: Tech Ventures Fund III\n\
               GP: Tech Ventures Partners\n\
               Vintage Year: 2022\n\n\
               DPI (Distributions to Paid-In Capital) measures the cash returned to limited \
               partners relative to the capital they have contributed.\n\n\
               TVPI (Total Value to Paid-In Capital) adds the remaining net asset value to \
               distributions, showing total value created per dollar invested.\n\n\
               The fund is performing in line with its vintage-year benchmark, with two \
               realized exits in the enterprise software portfolio."
            .to_string(),
    }
}
