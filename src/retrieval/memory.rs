//! In-process collaborators for development and tests.
//!
//! `InMemoryChunkIndex` is a brute-force cosine index. `HashingEmbedder` and
//! `ExtractiveGenerator` stand in for the hosted models when no API key is configured.

use super::{ChunkIndex, Embedder, ScoredChunk, TextGenerator};
use crate::error::LedgerError;
use crate::models::{DocumentId, FundId, TextChunk};
use crate::text::tokenize;
use crate::Result;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Clone, Default)]
pub struct InMemoryChunkIndex {
    entries: Arc<RwLock<HashMap<Uuid, (TextChunk, Vec<f32>)>>>,
}

impl InMemoryChunkIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait::async_trait]
impl ChunkIndex for InMemoryChunkIndex {
    async fn index_chunks(&self, chunks: &[TextChunk], embeddings: Vec<Vec<f32>>) -> Result<()> {
        if chunks.len() != embeddings.len() {
            return Err(LedgerError::InvalidEntry(format!(
                "{} chunks but {} embeddings",
                chunks.len(),
                embeddings.len()
            )));
        }

        let mut entries = self.entries.write().await;
        for (chunk, vector) in chunks.iter().zip(embeddings) {
            entries.insert(chunk.id, (chunk.clone(), vector));
        }
        Ok(())
    }

    async fn nearest_neighbors(
        &self,
        vector: &[f32],
        k: usize,
        fund_id: Option<FundId>,
    ) -> Result<Vec<ScoredChunk>> {
        let entries = self.entries.read().await;

        let mut scored: Vec<(ScoredChunk, DocumentId, usize)> = entries
            .values()
            .filter(|(chunk, _)| fund_id.map_or(true, |f| chunk.fund_id == f))
            .map(|(chunk, stored)| {
                (
                    ScoredChunk {
                        chunk_id: chunk.id,
                        score: cosine_similarity(vector, stored),
                    },
                    chunk.document_id,
                    chunk.chunk_index,
                )
            })
            .collect();

        // ties fall back to document order so results are stable
        scored.sort_by(|a, b| {
            b.0.score
                .partial_cmp(&a.0.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
                .then(a.2.cmp(&b.2))
        });

        Ok(scored.into_iter().take(k).map(|(s, _, _)| s).collect())
    }

    async fn fetch_chunks(&self, ids: &[Uuid]) -> Result<Vec<TextChunk>> {
        let entries = self.entries.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| entries.get(id).map(|(chunk, _)| chunk.clone()))
            .collect())
    }

    async fn remove_document(&self, document_id: DocumentId) -> Result<usize> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, (chunk, _)| chunk.document_id != document_id);
        Ok(before - entries.len())
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Bag-of-words feature hashing into a fixed number of dimensions.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimensions];
        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let bucket = u64::from_le_bytes([
                digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6],
                digest[7],
            ]) as usize
                % self.dimensions;
            vector[bucket] += 1.0;
        }
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait::async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Answers with the most relevant passage verbatim.
#[derive(Debug, Clone, Default)]
pub struct ExtractiveGenerator;

#[async_trait::async_trait]
impl TextGenerator for ExtractiveGenerator {
    async fn generate(&self, _prompt: &str, context: &[String]) -> Result<String> {
        Ok(context
            .first()
            .cloned()
            .unwrap_or_else(|| "I don't know".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(fund_id: FundId, document_id: DocumentId, index: usize, content: &str) -> TextChunk {
        TextChunk {
            id: Uuid::new_v4(),
            document_id,
            fund_id,
            chunk_index: index,
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn test_nearest_neighbors_ranks_by_similarity() {
        let fund = Uuid::new_v4();
        let doc = Uuid::new_v4();
        let index = InMemoryChunkIndex::new();
        let embedder = HashingEmbedder::default();

        let chunks = vec![
            chunk(fund, doc, 0, "DPI measures distributions relative to paid-in capital"),
            chunk(fund, doc, 1, "The office moved to a new building last spring"),
        ];
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        index
            .index_chunks(&chunks, embedder.embed(&texts).await.unwrap())
            .await
            .unwrap();

        let query = embedder.embed(&["what is DPI distributions".to_string()]).await.unwrap();
        let hits = index.nearest_neighbors(&query[0], 1, Some(fund)).await.unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, chunks[0].id);
    }

    #[tokio::test]
    async fn test_fund_filter_and_document_removal() {
        let fund_a = Uuid::new_v4();
        let fund_b = Uuid::new_v4();
        let doc_a = Uuid::new_v4();
        let doc_b = Uuid::new_v4();
        let index = InMemoryChunkIndex::new();

        let chunks = vec![chunk(fund_a, doc_a, 0, "alpha"), chunk(fund_b, doc_b, 0, "beta")];
        index
            .index_chunks(&chunks, vec![vec![1.0, 0.0], vec![1.0, 0.0]])
            .await
            .unwrap();

        let hits = index.nearest_neighbors(&[1.0, 0.0], 5, Some(fund_b)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, chunks[1].id);

        assert_eq!(index.remove_document(doc_a).await.unwrap(), 1);
        assert_eq!(index.len().await, 1);
    }

    #[test]
    fn test_cosine_similarity_bounds() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
