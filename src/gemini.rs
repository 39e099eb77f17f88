//! Gemini API client
//!
//! Implements `TextGenerator` (generateContent) and `Embedder` (batchEmbedContents).
//! Uses a long-lived reqwest::Client for connection pooling.

use crate::error::LedgerError;
use crate::retrieval::{build_grounded_prompt, Embedder, TextGenerator};
use crate::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const CHAT_MODEL: &str = "gemini-2.0-flash";
const EMBEDDING_MODEL: &str = "text-embedding-004";

const SYSTEM_PROMPT: &str = r#"You are a private-equity fund analyst answering questions about a fund's reports.

Guidelines:
- Answer only from the supplied context and computed figures
- Quote figures exactly as given; never recompute them
- Be structured and concise
- If the context does not contain the answer, say "I don't know""#;

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(LedgerError::ConfigError("GEMINI_API_KEY not configured".to_string()));
        }

        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: BASE_URL.to_string(),
        })
    }

    fn url(&self, model: &str, method: &str) -> String {
        format!("{}/{}:{}?key={}", self.base_url, model, method, self.api_key)
    }

    async fn post<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        body: &Req,
    ) -> Result<Resp> {
        let response = self.client.post(url).json(body).send().await.map_err(|e| {
            error!("Gemini API request failed: {}", e);
            LedgerError::LlmError(format!("Gemini API error: {}", e))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, "Gemini API error response: {}", error_text);
            return Err(LedgerError::LlmError(format!(
                "Gemini API returned {}: {}",
                status, error_text
            )));
        }

        response.json::<Resp>().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            LedgerError::LlmError(format!("Gemini parse error: {}", e))
        })
    }
}

#[async_trait::async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str, context: &[String]) -> Result<String> {
        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: build_grounded_prompt(prompt, context),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.2,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 1024,
            },
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: SYSTEM_PROMPT.to_string(),
                }],
            },
        };

        info!(passages = context.len(), "Calling Gemini generateContent");

        let response: GeminiResponse = self
            .post(&self.url(CHAT_MODEL, "generateContent"), &request)
            .await?;

        let answer = response
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| LedgerError::LlmError("Empty response from Gemini".to_string()))?;

        Ok(answer)
    }
}

#[async_trait::async_trait]
impl Embedder for GeminiClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model = format!("models/{}", EMBEDDING_MODEL);
        let request = BatchEmbedRequest {
            requests: texts
                .iter()
                .map(|text| EmbedRequest {
                    model: model.clone(),
                    content: Content {
                        parts: vec![Part { text: text.clone() }],
                    },
                })
                .collect(),
        };

        let response: BatchEmbedResponse = self
            .post(&self.url(EMBEDDING_MODEL, "batchEmbedContents"), &request)
            .await?;

        if response.embeddings.len() != texts.len() {
            return Err(LedgerError::LlmError(format!(
                "Gemini returned {} embeddings for {} texts",
                response.embeddings.len(),
                texts.len()
            )));
        }

        Ok(response.embeddings.into_iter().map(|e| e.values).collect())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    system_instruction: SystemInstruction,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

#[derive(Debug, Serialize)]
struct BatchEmbedRequest {
    requests: Vec<EmbedRequest>,
}

#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    content: Content,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<Embedding>,
}

#[derive(Debug, Deserialize)]
struct Embedding {
    values: Vec<f32>,
}
