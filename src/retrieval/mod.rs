//! Retrieval and generation collaborators
//!
//! Embedding, vector search and text generation are external services consumed
//! through traits. Every call goes through `call_upstream`, which applies the
//! caller's timeout and a bounded retry on timeout.

pub mod memory;

use crate::config::UpstreamPolicy;
use crate::error::LedgerError;
use crate::models::{DocumentId, FundId, TextChunk};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

pub use memory::InMemoryChunkIndex;

// ================= Collaborator traits =================

/// Turns text into vectors. One vector per input, in order.
#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Vector index over text chunks.
#[async_trait::async_trait]
pub trait ChunkIndex: Send + Sync {
    async fn index_chunks(&self, chunks: &[TextChunk], embeddings: Vec<Vec<f32>>) -> Result<()>;

    /// Closest chunks to `vector`, best first, optionally restricted to one fund.
    async fn nearest_neighbors(
        &self,
        vector: &[f32],
        k: usize,
        fund_id: Option<FundId>,
    ) -> Result<Vec<ScoredChunk>>;

    async fn fetch_chunks(&self, ids: &[Uuid]) -> Result<Vec<TextChunk>>;

    /// Drop every chunk of a document. Returns how many were removed.
    async fn remove_document(&self, document_id: DocumentId) -> Result<usize>;
}

/// Text completion grounded on context passages.
#[async_trait::async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, context: &[String]) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk_id: Uuid,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk: TextChunk,
    pub score: f32,
}

// ================= Upstream contract =================

/// Run one collaborator call under `policy`.
///
/// A timeout is retried up to `max_retries` times; any other failure is not retried.
/// Both end as `UpstreamUnavailable`.
pub async fn call_upstream<T, F, Fut>(policy: &UpstreamPolicy, service: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match tokio::time::timeout(policy.timeout, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e @ LedgerError::UpstreamUnavailable { .. })) => return Err(e),
            Ok(Err(e)) => {
                warn!(service, error = %e, "Upstream call failed");
                return Err(LedgerError::upstream(service, e.to_string()));
            }
            Err(_) if attempt < policy.max_retries => {
                attempt += 1;
                warn!(service, attempt, timeout = ?policy.timeout, "Upstream call timed out, retrying");
            }
            Err(_) => {
                return Err(LedgerError::upstream(
                    service,
                    format!("timed out after {:?}", policy.timeout),
                ));
            }
        }
    }
}

/// Prompt that keeps the model inside the retrieved passages.
pub fn build_grounded_prompt(question: &str, context: &[String]) -> String {
    let context_text = context
        .iter()
        .enumerate()
        .map(|(i, passage)| format!("Context {}:\n{}", i + 1, passage))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "You are an expert private-equity fund analyst.\n\
         Use only the context below to answer the question.\n\
         If the answer is not contained in the context, respond with 'I don't know'.\n\n\
         {}\n\nQuestion: {}\nAnswer:",
        context_text, question
    )
}

// ================= Retriever =================

pub struct SemanticRetriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn ChunkIndex>,
    generator: Arc<dyn TextGenerator>,
    policy: UpstreamPolicy,
    top_k: usize,
}

impl SemanticRetriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn ChunkIndex>,
        generator: Arc<dyn TextGenerator>,
        policy: UpstreamPolicy,
        top_k: usize,
    ) -> Self {
        Self {
            embedder,
            index,
            generator,
            policy,
            top_k,
        }
    }

    /// Embed and index a document's chunks.
    pub async fn index_chunks(&self, chunks: &[TextChunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = call_upstream(&self.policy, "embedding service", || {
            self.embedder.embed(&texts)
        })
        .await?;

        if embeddings.len() != chunks.len() {
            return Err(LedgerError::upstream(
                "embedding service",
                format!("expected {} vectors, got {}", chunks.len(), embeddings.len()),
            ));
        }

        call_upstream(&self.policy, "vector index", || {
            self.index.index_chunks(chunks, embeddings.clone())
        })
        .await?;

        debug!(chunks = chunks.len(), "Chunks indexed");
        Ok(chunks.len())
    }

    pub async fn remove_document(&self, document_id: DocumentId) -> Result<usize> {
        call_upstream(&self.policy, "vector index", || {
            self.index.remove_document(document_id)
        })
        .await
    }

    /// Top-k chunks for `query`, best first.
    pub async fn retrieve(&self, query: &str, fund_id: Option<FundId>) -> Result<Vec<RetrievedChunk>> {
        let texts = vec![query.to_string()];
        let vector = call_upstream(&self.policy, "embedding service", || {
            self.embedder.embed(&texts)
        })
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| LedgerError::upstream("embedding service", "no vector returned for query"))?;

        let scored = call_upstream(&self.policy, "vector index", || {
            self.index.nearest_neighbors(&vector, self.top_k, fund_id)
        })
        .await?;

        if scored.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = scored.iter().map(|s| s.chunk_id).collect();
        let chunks = call_upstream(&self.policy, "vector index", || self.index.fetch_chunks(&ids)).await?;
        let mut by_id: HashMap<Uuid, TextChunk> = chunks.into_iter().map(|c| (c.id, c)).collect();

        Ok(scored
            .into_iter()
            .filter_map(|s| {
                by_id.remove(&s.chunk_id).map(|chunk| RetrievedChunk {
                    chunk,
                    score: s.score,
                })
            })
            .collect())
    }

    /// Generate an answer grounded on `chunks` plus any extra passages
    /// (for example a computed metric).
    pub async fn generate_answer(
        &self,
        query: &str,
        chunks: &[RetrievedChunk],
        extra_context: &[String],
    ) -> Result<String> {
        let context: Vec<String> = extra_context
            .iter()
            .cloned()
            .chain(chunks.iter().map(|c| c.chunk.content.clone()))
            .collect();

        call_upstream(&self.policy, "text generation", || {
            self.generator.generate(query, &context)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn policy() -> UpstreamPolicy {
        UpstreamPolicy {
            timeout: Duration::from_millis(20),
            max_retries: 1,
        }
    }

    #[tokio::test]
    async fn test_retries_once_after_timeout() {
        let calls = AtomicUsize::new(0);
        let result = call_upstream(&policy(), "embedding service", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
                Ok(n)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_second_timeout() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = call_upstream(&policy(), "text generation", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            }
        })
        .await;

        assert!(matches!(result, Err(LedgerError::UpstreamUnavailable { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failures_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = call_upstream(&policy(), "vector index", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(LedgerError::LlmError("quota exceeded".to_string())) }
        })
        .await;

        match result {
            Err(LedgerError::UpstreamUnavailable { service, reason }) => {
                assert_eq!(service, "vector index");
                assert!(reason.contains("quota"));
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_grounded_prompt_numbers_passages() {
        let prompt = build_grounded_prompt(
            "What is DPI?",
            &["DPI measures realized returns.".to_string()],
        );
        assert!(prompt.contains("Context 1:\nDPI measures realized returns."));
        assert!(prompt.contains("I don't know"));
        assert!(prompt.ends_with("Question: What is DPI?\nAnswer:"));
    }
}
