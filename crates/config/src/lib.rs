//! Configuration for the scribeflow context engine.
//!
//! The numeric policy knobs here (budget ratios, recall thresholds, search
//! limits) are tunable configuration, not load-bearing invariants — the
//! allocator only depends on their roles. Loads from a TOML file with
//! environment variable overrides and validates everything up front.

use serde::{Deserialize, Serialize};
use std::path::Path;

use scribeflow_core::error::ConfigError;

/// Root configuration for one allocation pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Token budget policy (ratios, thresholds, caps).
    #[serde(default)]
    pub budget: BudgetPolicy,

    /// Web/library search tuning.
    #[serde(default)]
    pub search: SearchTuning,

    /// Per-request deadline for the whole allocation run, in seconds.
    /// On expiry, tiers that already completed are serialized as-is.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            budget: BudgetPolicy::default(),
            search: SearchTuning::default(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Token budget policy.
///
/// Sub-budgets are soft: a tier may slightly overshoot when an indivisible
/// chunk set is returned, but the allocator always subtracts actual
/// consumption before moving on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetPolicy {
    /// Fraction of the model's max tokens reserved for context (the rest is
    /// left for the system prompt, history, and generation headroom).
    #[serde(default = "default_max_context_ratio")]
    pub max_context_ratio: f64,

    /// Fraction of the context budget reserved for the URL-sources tier.
    #[serde(default = "default_url_sources_ratio")]
    pub url_sources_ratio: f64,

    /// Fraction of a tier budget spent in the primary (phase-1) pass; the
    /// remainder is kept for short items and budget-capped recall.
    #[serde(default = "default_relevant_ratio")]
    pub relevant_ratio: f64,

    /// Items above this token count are always chunk-recalled, never
    /// included whole.
    #[serde(default = "default_need_recall_threshold")]
    pub need_recall_threshold: usize,

    /// Items below this token count are included verbatim unconditionally in
    /// the remainder pass.
    #[serde(default = "default_short_content_threshold")]
    pub short_content_threshold: usize,

    /// Top-k chunks requested per recall.
    #[serde(default = "default_recall_chunk_limit")]
    pub recall_chunk_limit: usize,

    /// Mentioned-context pool split across content / resources / documents.
    #[serde(default = "default_mentioned_content_ratio")]
    pub mentioned_content_ratio: f64,
    #[serde(default = "default_mentioned_resource_ratio")]
    pub mentioned_resource_ratio: f64,
    #[serde(default = "default_mentioned_document_ratio")]
    pub mentioned_document_ratio: f64,

    /// Max web/library sources kept when explicit or relevant context is
    /// present (the noise cap).
    #[serde(default = "default_noise_cap")]
    pub noise_cap: usize,

    /// Max sources kept for models without long-context support.
    #[serde(default = "default_short_context_source_cap")]
    pub short_context_source_cap: usize,
}

fn default_max_context_ratio() -> f64 {
    0.7
}
fn default_url_sources_ratio() -> f64 {
    0.25
}
fn default_relevant_ratio() -> f64 {
    0.7
}
fn default_need_recall_threshold() -> usize {
    1024
}
fn default_short_content_threshold() -> usize {
    300
}
fn default_recall_chunk_limit() -> usize {
    10
}
fn default_mentioned_content_ratio() -> f64 {
    0.4
}
fn default_mentioned_resource_ratio() -> f64 {
    0.3
}
fn default_mentioned_document_ratio() -> f64 {
    0.3
}
fn default_noise_cap() -> usize {
    10
}
fn default_short_context_source_cap() -> usize {
    10
}

impl Default for BudgetPolicy {
    fn default() -> Self {
        Self {
            max_context_ratio: default_max_context_ratio(),
            url_sources_ratio: default_url_sources_ratio(),
            relevant_ratio: default_relevant_ratio(),
            need_recall_threshold: default_need_recall_threshold(),
            short_content_threshold: default_short_content_threshold(),
            recall_chunk_limit: default_recall_chunk_limit(),
            mentioned_content_ratio: default_mentioned_content_ratio(),
            mentioned_resource_ratio: default_mentioned_resource_ratio(),
            mentioned_document_ratio: default_mentioned_document_ratio(),
            noise_cap: default_noise_cap(),
            short_context_source_cap: default_short_context_source_cap(),
        }
    }
}

impl BudgetPolicy {
    /// `budget × ratio`, floored. `usize::MAX` stays unbounded.
    pub fn fraction_of(budget: usize, ratio: f64) -> usize {
        if budget == usize::MAX {
            return usize::MAX;
        }
        (budget as f64 * ratio).floor() as usize
    }
}

/// Web and library search tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchTuning {
    /// Result limit per merged search; doubled in deep mode.
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,

    /// Locales fanned out per query variant.
    #[serde(default = "default_locales")]
    pub locales: Vec<String>,

    /// Whether to rerank merged results when a reranker is wired in.
    #[serde(default = "default_enable_rerank")]
    pub enable_rerank: bool,

    /// Rerank relevance floor; raised in deep mode.
    #[serde(default = "default_rerank_threshold")]
    pub rerank_threshold: f32,
    #[serde(default = "default_deep_rerank_threshold")]
    pub deep_rerank_threshold: f32,

    /// Bounded fan-out across (query × locale) search calls.
    #[serde(default = "default_search_concurrency")]
    pub search_concurrency: usize,

    /// Bounded fan-out across per-item recall calls within a tier.
    #[serde(default = "default_recall_concurrency")]
    pub recall_concurrency: usize,

    /// Per-backend-call timeout, in seconds.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

fn default_search_limit() -> usize {
    10
}
fn default_locales() -> Vec<String> {
    vec!["en".to_string()]
}
fn default_enable_rerank() -> bool {
    true
}
fn default_rerank_threshold() -> f32 {
    0.2
}
fn default_deep_rerank_threshold() -> f32 {
    0.4
}
fn default_search_concurrency() -> usize {
    3
}
fn default_recall_concurrency() -> usize {
    5
}
fn default_call_timeout_secs() -> u64 {
    15
}

impl Default for SearchTuning {
    fn default() -> Self {
        Self {
            search_limit: default_search_limit(),
            locales: default_locales(),
            enable_rerank: default_enable_rerank(),
            rerank_threshold: default_rerank_threshold(),
            deep_rerank_threshold: default_deep_rerank_threshold(),
            search_concurrency: default_search_concurrency(),
            recall_concurrency: default_recall_concurrency(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

impl SearchTuning {
    /// Effective result limit: doubled in deep mode.
    pub fn limit(&self, deep: bool) -> usize {
        if deep {
            self.search_limit * 2
        } else {
            self.search_limit
        }
    }

    /// Effective rerank relevance floor for the requested mode.
    pub fn relevance_threshold(&self, deep: bool) -> f32 {
        if deep {
            self.deep_rerank_threshold
        } else {
            self.rerank_threshold
        }
    }
}

impl ContextConfig {
    /// Load from a TOML file, then apply environment overrides and validate.
    /// A missing file means defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?
        } else {
            tracing::info!(path = %path.display(), "No config file found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse from a TOML string (validated).
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Environment variable overrides (highest priority).
    fn apply_env_overrides(&mut self) {
        if let Some(limit) = env_parse::<usize>("SCRIBEFLOW_SEARCH_LIMIT") {
            self.search.search_limit = limit;
        }
        if let Some(concurrency) = env_parse::<usize>("SCRIBEFLOW_SEARCH_CONCURRENCY") {
            self.search.search_concurrency = concurrency;
        }
        if let Some(timeout) = env_parse::<u64>("SCRIBEFLOW_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = timeout;
        }
        if let Ok(locales) = std::env::var("SCRIBEFLOW_SEARCH_LOCALES") {
            let parsed: Vec<String> = locales
                .split(',')
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .collect();
            if !parsed.is_empty() {
                self.search.locales = parsed;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ratio_fields = [
            ("budget.max_context_ratio", self.budget.max_context_ratio),
            ("budget.url_sources_ratio", self.budget.url_sources_ratio),
            ("budget.relevant_ratio", self.budget.relevant_ratio),
            (
                "budget.mentioned_content_ratio",
                self.budget.mentioned_content_ratio,
            ),
            (
                "budget.mentioned_resource_ratio",
                self.budget.mentioned_resource_ratio,
            ),
            (
                "budget.mentioned_document_ratio",
                self.budget.mentioned_document_ratio,
            ),
        ];
        for (field, value) in ratio_fields {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::Invalid {
                    field: field.into(),
                    reason: format!("must be in (0, 1], got {value}"),
                });
            }
        }

        let mentioned_total = self.budget.mentioned_content_ratio
            + self.budget.mentioned_resource_ratio
            + self.budget.mentioned_document_ratio;
        if mentioned_total > 1.0 + f64::EPSILON {
            return Err(ConfigError::Invalid {
                field: "budget.mentioned_*_ratio".into(),
                reason: format!("pool split sums to {mentioned_total}, must be <= 1.0"),
            });
        }

        if self.budget.short_content_threshold >= self.budget.need_recall_threshold {
            return Err(ConfigError::Invalid {
                field: "budget.short_content_threshold".into(),
                reason: "must be below need_recall_threshold".into(),
            });
        }

        if self.budget.recall_chunk_limit == 0 {
            return Err(ConfigError::Invalid {
                field: "budget.recall_chunk_limit".into(),
                reason: "must be at least 1".into(),
            });
        }

        if self.search.search_concurrency == 0 || self.search.recall_concurrency == 0 {
            return Err(ConfigError::Invalid {
                field: "search.*_concurrency".into(),
                reason: "must be at least 1".into(),
            });
        }

        if self.search.locales.is_empty() {
            return Err(ConfigError::Invalid {
                field: "search.locales".into(),
                reason: "at least one locale required".into(),
            });
        }

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.parse().ok()
}
