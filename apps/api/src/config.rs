use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::generation::TtlClass;
use crate::references::DEFAULT_REFERENCE_CAP;

/// Which persistent tier backs the result cache.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheStoreKind {
    Redis(String),
    File(PathBuf),
    /// Second tier held in process memory, optionally capped in bytes.
    /// Nothing survives a restart.
    Memory { quota_bytes: Option<usize> },
    /// No second tier at all.
    Disabled,
}

/// Per-class cache lifetimes.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheTtls {
    pub classification: Duration,
    pub story_matching: Duration,
    pub analysis: Duration,
    pub answer: Duration,
    pub research: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            classification: Duration::from_secs(15 * 60),
            story_matching: Duration::from_secs(60 * 60),
            analysis: Duration::from_secs(24 * 60 * 60),
            answer: Duration::from_secs(24 * 60 * 60),
            research: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

impl CacheTtls {
    pub fn for_class(&self, class: TtlClass) -> Duration {
        match class {
            TtlClass::Classification => self.classification,
            TtlClass::StoryMatching => self.story_matching,
            TtlClass::Analysis => self.analysis,
            TtlClass::Answer => self.answer,
            TtlClass::Research => self.research,
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Missing key is allowed: the service still runs, classification falls
    /// back to heuristics and generation fails with an auth error.
    pub anthropic_api_key: Option<String>,
    pub cache_namespace: String,
    pub cache_store: CacheStoreKind,
    pub cache_ttls: CacheTtls,
    pub reference_cap: usize,
    pub classifier_min_confidence: u8,
    pub classifier_short_message_chars: usize,
    pub single_flight: bool,
    pub port: u16,
    pub rust_log: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            anthropic_api_key: None,
            cache_namespace: "coach".to_string(),
            cache_store: CacheStoreKind::Disabled,
            cache_ttls: CacheTtls::default(),
            reference_cap: DEFAULT_REFERENCE_CAP,
            classifier_min_confidence: 70,
            classifier_short_message_chars: 40,
            single_flight: true,
            port: 8080,
            rust_log: "info".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let defaults = Config::default();
        let ttl = |key: &str, default: Duration| -> Result<Duration> {
            Ok(optional_env::<u64>(key)?
                .map(Duration::from_secs)
                .unwrap_or(default))
        };

        let cache_ttls = CacheTtls {
            classification: ttl("TTL_CLASSIFICATION_SECS", defaults.cache_ttls.classification)?,
            story_matching: ttl("TTL_STORY_MATCHING_SECS", defaults.cache_ttls.story_matching)?,
            analysis: ttl("TTL_ANALYSIS_SECS", defaults.cache_ttls.analysis)?,
            answer: ttl("TTL_ANSWER_SECS", defaults.cache_ttls.answer)?,
            research: ttl("TTL_RESEARCH_SECS", defaults.cache_ttls.research)?,
        };

        let classifier_min_confidence = optional_env::<u8>("CLASSIFIER_MIN_CONFIDENCE")?
            .unwrap_or(defaults.classifier_min_confidence);
        if classifier_min_confidence > 100 {
            bail!("CLASSIFIER_MIN_CONFIDENCE must be between 0 and 100");
        }

        Ok(Config {
            anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
            cache_namespace: std::env::var("CACHE_NAMESPACE")
                .unwrap_or(defaults.cache_namespace),
            cache_store: cache_store_from_env()?,
            cache_ttls,
            reference_cap: optional_env("REFERENCE_CAP")?.unwrap_or(defaults.reference_cap),
            classifier_min_confidence,
            classifier_short_message_chars: optional_env("CLASSIFIER_SHORT_MESSAGE_CHARS")?
                .unwrap_or(defaults.classifier_short_message_chars),
            single_flight: optional_env("SINGLE_FLIGHT")?.unwrap_or(defaults.single_flight),
            port: optional_env("PORT")?.unwrap_or(defaults.port),
            rust_log: std::env::var("RUST_LOG").unwrap_or(defaults.rust_log),
        })
    }
}

fn cache_store_from_env() -> Result<CacheStoreKind> {
    let kind = std::env::var("CACHE_STORE").unwrap_or_else(|_| "none".to_string());
    match kind.as_str() {
        "redis" => Ok(CacheStoreKind::Redis(require_env("REDIS_URL")?)),
        "file" => Ok(CacheStoreKind::File(
            std::env::var("CACHE_FILE_PATH")
                .unwrap_or_else(|_| ".coach/cache.json".to_string())
                .into(),
        )),
        "memory" => Ok(CacheStoreKind::Memory {
            quota_bytes: optional_env("CACHE_MEMORY_QUOTA_BYTES")?,
        }),
        "none" => Ok(CacheStoreKind::Disabled),
        other => bail!("CACHE_STORE must be one of redis, file, memory, none (got '{other}')"),
    }
}

fn optional_env<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("Environment variable '{key}' has an invalid value '{raw}'")),
        Err(_) => Ok(None),
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ttls_order_by_volatility() {
        let ttls = CacheTtls::default();
        assert!(ttls.classification < ttls.story_matching);
        assert!(ttls.story_matching < ttls.analysis);
        assert!(ttls.analysis < ttls.research);
        assert_eq!(ttls.for_class(TtlClass::Research), Duration::from_secs(604_800));
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.cache_store, CacheStoreKind::Disabled);
        assert_eq!(config.reference_cap, 10);
        assert!(config.single_flight);
        assert!(config.anthropic_api_key.is_none());
    }

    #[test]
    fn test_optional_env_rejects_garbage() {
        std::env::set_var("COACH_TEST_OPTIONAL_PORT", "not-a-number");
        assert!(optional_env::<u16>("COACH_TEST_OPTIONAL_PORT").is_err());
        std::env::set_var("COACH_TEST_OPTIONAL_PORT", " 9000 ");
        assert_eq!(optional_env::<u16>("COACH_TEST_OPTIONAL_PORT").unwrap(), Some(9000));
        std::env::remove_var("COACH_TEST_OPTIONAL_PORT");
        assert_eq!(optional_env::<u16>("COACH_TEST_OPTIONAL_PORT").unwrap(), None);
    }
}
