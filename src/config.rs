//! Engine configuration
//!
//! Thresholds that decide classification and routing are configuration, not constants.
//! Every value has a default and can be overridden from the environment.

use crate::classifier::Intent;
use crate::error::LedgerError;
use crate::Result;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Table classification thresholds
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    /// Minimum weighted keyword score for a table kind to be accepted
    pub min_score: f64,
    /// The winning kind must lead the runner-up by at least this much
    pub tie_margin: f64,
    /// Multiplier for keywords found in column headers
    pub header_weight: f64,
    /// Multiplier for keywords found in the preceding heading
    pub heading_weight: f64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_score: 2.0,
            tie_margin: 1.5,
            header_weight: 1.0,
            heading_weight: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// Characters per chunk
    pub chunk_size: usize,
    /// Characters shared by consecutive chunks
    pub overlap: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            overlap: 50,
        }
    }
}

/// Contract for calls into the embedding / index / generation services
#[derive(Debug, Clone)]
pub struct UpstreamPolicy {
    pub timeout: Duration,
    /// Retries after a timeout. Other failures are not retried.
    pub max_retries: u32,
}

impl Default for UpstreamPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// Chunks fetched per semantic lookup
    pub top_k: usize,
    /// Upper bound on rows returned by a data retrieval query
    pub max_rows: usize,
    /// Tie-break order between intents with equal scores, highest priority first
    pub intent_priority: [Intent; 4],
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            max_rows: 100,
            intent_priority: [
                Intent::Calculation,
                Intent::DataRetrieval,
                Intent::Definition,
                Intent::Hybrid,
            ],
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub extraction: ExtractionConfig,
    pub segmenter: SegmenterConfig,
    pub upstream: UpstreamPolicy,
    pub query: QueryConfig,
    pub database_url: Option<String>,
    pub gemini_api_key: Option<String>,
}

impl EngineConfig {
    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = env_parse::<f64>("EXTRACTION_MIN_SCORE")? {
            config.extraction.min_score = v;
        }
        if let Some(v) = env_parse::<f64>("EXTRACTION_TIE_MARGIN")? {
            config.extraction.tie_margin = v;
        }
        if let Some(v) = env_parse::<usize>("CHUNK_SIZE")? {
            config.segmenter.chunk_size = v;
        }
        if let Some(v) = env_parse::<usize>("CHUNK_OVERLAP")? {
            config.segmenter.overlap = v;
        }
        if let Some(v) = env_parse::<u64>("UPSTREAM_TIMEOUT_SECS")? {
            config.upstream.timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u32>("UPSTREAM_MAX_RETRIES")? {
            config.upstream.max_retries = v;
        }
        if let Some(v) = env_parse::<usize>("RETRIEVAL_TOP_K")? {
            config.query.top_k = v;
        }
        if let Some(v) = env_parse::<usize>("QUERY_MAX_ROWS")? {
            config.query.max_rows = v;
        }

        config.database_url = env::var("POSTGRES_URL")
            .or_else(|_| env::var("DATABASE_URL"))
            .ok()
            .filter(|v| !v.trim().is_empty());

        config.gemini_api_key = env::var("GEMINI_API_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty());

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.segmenter.chunk_size == 0 {
            return Err(LedgerError::ConfigError("CHUNK_SIZE must be positive".to_string()));
        }
        if self.segmenter.overlap >= self.segmenter.chunk_size {
            return Err(LedgerError::ConfigError(format!(
                "CHUNK_OVERLAP ({}) must be smaller than CHUNK_SIZE ({})",
                self.segmenter.overlap, self.segmenter.chunk_size
            )));
        }
        let extraction = &self.extraction;
        let thresholds = [
            ("EXTRACTION_MIN_SCORE", extraction.min_score),
            ("EXTRACTION_TIE_MARGIN", extraction.tie_margin),
            ("header weight", extraction.header_weight),
            ("heading weight", extraction.heading_weight),
        ];
        // rejects NaN too
        if let Some((name, value)) = thresholds.iter().find(|(_, v)| !(v.is_finite() && *v >= 0.0)) {
            return Err(LedgerError::ConfigError(format!(
                "{} must be a finite non-negative number, got {}",
                name, value
            )));
        }
        if self.query.max_rows == 0 {
            return Err(LedgerError::ConfigError("QUERY_MAX_ROWS must be positive".to_string()));
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| LedgerError::ConfigError(format!("{}: {}", key, e))),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk() {
        let mut config = EngineConfig::default();
        config.segmenter.overlap = config.segmenter.chunk_size;
        assert!(matches!(config.validate(), Err(LedgerError::ConfigError(_))));
    }

    #[test]
    fn test_thresholds_must_be_finite() {
        let mut config = EngineConfig::default();
        config.extraction.min_score = f64::NAN;
        assert!(matches!(config.validate(), Err(LedgerError::ConfigError(_))));

        let mut config = EngineConfig::default();
        config.extraction.tie_margin = f64::INFINITY;
        assert!(matches!(config.validate(), Err(LedgerError::ConfigError(_))));

        let mut config = EngineConfig::default();
        config.extraction.heading_weight = -1.0;
        assert!(matches!(config.validate(), Err(LedgerError::ConfigError(_))));
    }
}
