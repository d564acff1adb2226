use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::PageType;

/// Top-level system configuration, deserialized from `system.toml`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SystemConfig {
    pub concurrency: ConcurrencyConfig,
    pub rate_limit: RateLimitDefaults,
    pub retry: RetryDefaults,
    pub timeouts: TimeoutConfig,
    pub cache: CacheConfig,
    pub scheduler: SchedulerConfig,
    pub probe: ApiProbeConfig,
}

impl Default for SystemConfig {
    /// Defaults matching the numbers named throughout §4/§5 of the spec,
    /// used when a deployment has no `system.toml` override for a field.
    fn default() -> Self {
        Self {
            concurrency: ConcurrencyConfig {
                global_concurrency: 16,
                per_host_concurrency: 2,
                renderer_session_cap: 4,
            },
            rate_limit: RateLimitDefaults::default(),
            retry: RetryDefaults {
                http_fetch: RetryConfig {
                    max_attempts: 3,
                    initial_backoff_ms: 500,
                    max_backoff_ms: 8_000,
                    backoff_multiplier: 2.0,
                    jitter: true,
                },
                llm_api: RetryConfig {
                    max_attempts: 2,
                    initial_backoff_ms: 1_000,
                    max_backoff_ms: 10_000,
                    backoff_multiplier: 2.0,
                    jitter: true,
                },
            },
            timeouts: TimeoutConfig::default(),
            cache: CacheConfig {
                fetch_ttl_seconds: 3600,
            },
            scheduler: SchedulerConfig {
                tick_interval_secs: 60,
                host_block_threshold: 5,
                host_cooldown_secs: 900,
                consecutive_not_found_threshold: default_consecutive_not_found_threshold(),
                consecutive_blocked_threshold: default_consecutive_blocked_threshold(),
            },
            probe: ApiProbeConfig::default(),
        }
    }
}

/// Worker and session concurrency caps (§5 Concurrency & Resource Model).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// Total in-flight crawl jobs across all OEMs.
    pub global_concurrency: u32,
    /// Default per-host maximum concurrent requests (K in §4.2).
    pub per_host_concurrency: u32,
    /// Max concurrent headless-renderer sessions per process (S in §4.3).
    pub renderer_session_cap: u32,
}

/// Default per-host leaky-bucket rate limit (R requests/s, burst B); an
/// OEM's `politeness_override` in its own config replaces this wholesale.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RateLimitDefaults {
    pub requests_per_second: f64,
    pub burst: u32,
}

impl Default for RateLimitDefaults {
    fn default() -> Self {
        Self {
            requests_per_second: 1.0,
            burst: 3,
        }
    }
}

/// Retry policy defaults, one set per outbound collaborator class.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryDefaults {
    pub http_fetch: RetryConfig,
    pub llm_api: RetryConfig,
}

/// Retry configuration for a specific target.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

/// Deadlines for outbound calls and the overall per-page job (§5).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimeoutConfig {
    pub http_fetch_secs: u64,
    pub render_total_secs: u64,
    pub render_wait_policy_secs: u64,
    pub llm_secs: u64,
    pub job_deadline_secs: u64,
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            http_fetch_secs: 30,
            render_total_secs: 90,
            render_wait_policy_secs: 20,
            llm_secs: 60,
            job_deadline_secs: 300,
            shutdown_grace_secs: 60,
        }
    }
}

/// Fetch-service response cache TTL.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    pub fetch_ttl_seconds: u64,
}

/// Scheduler tick cadence and per-host block/cool-down thresholds (§4.9, §4.10).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub tick_interval_secs: u64,
    /// Number of `Blocked` outcomes for one host within a run before the
    /// owning OEM is paused for a cool-down.
    pub host_block_threshold: u32,
    pub host_cooldown_secs: u64,
    /// Consecutive 404s (N, §4.8) before a SourcePage moves to `removed`.
    #[serde(default = "default_consecutive_not_found_threshold")]
    pub consecutive_not_found_threshold: u32,
    /// Consecutive 403/429s (M, §4.8) before a SourcePage moves to `blocked`.
    #[serde(default = "default_consecutive_blocked_threshold")]
    pub consecutive_blocked_threshold: u32,
}

fn default_consecutive_not_found_threshold() -> u32 {
    3
}

fn default_consecutive_blocked_threshold() -> u32 {
    3
}

/// Thresholds governing DiscoveredAPI replay and retirement (§4.4).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ApiProbeConfig {
    pub min_reliability_to_replay: f64,
    pub retire_after_consecutive_failures: u32,
    pub retire_below_score: f64,
    pub success_multiplier: f64,
    pub failure_multiplier: f64,
}

impl Default for ApiProbeConfig {
    fn default() -> Self {
        Self {
            min_reliability_to_replay: 0.6,
            retire_after_consecutive_failures: 5,
            retire_below_score: 0.2,
            success_multiplier: 1.05,
            failure_multiplier: 0.8,
        }
    }
}

/// Per-OEM configuration document (one TOML file per OEM under the config
/// directory). Config is read-only at runtime — nothing in the pipeline
/// mutates an `OemConfig`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OemConfig {
    pub id: String,
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub flags: OemFlags,
    #[serde(default)]
    pub seeds: Vec<SeedUrl>,
    /// CSS/XPath selector map per page_type, field name -> selector.
    #[serde(default)]
    pub selectors: HashMap<PageType, HashMap<String, String>>,
    /// Declarative JSON-path style mapping for known DiscoveredAPI payload
    /// shapes, keyed by `data_type` name.
    #[serde(default)]
    pub api_mappings: HashMap<String, serde_json::Value>,
    /// Fields that bump diff severity one level when they change (§4.1).
    #[serde(default)]
    pub critical_fields: Vec<String>,
    #[serde(default = "default_discovery_depth")]
    pub max_discovery_depth: u32,
    /// Grace window past an ImportRun's start before a product/offer not
    /// seen again is reconciled as `discontinued` (§4.7). Defaults to one
    /// full cadence cycle of the slowest-tracked page_type (news/sitemap,
    /// 24h).
    #[serde(default = "default_removal_grace_secs")]
    pub removal_grace_secs: i64,
}

fn default_discovery_depth() -> u32 {
    2
}

fn default_removal_grace_secs() -> i64 {
    24 * 60 * 60
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OemFlags {
    #[serde(default)]
    pub requires_render: bool,
    #[serde(default)]
    pub politeness_override: Option<RateLimitDefaults>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SeedUrl {
    pub url: String,
    pub page_type: PageType,
}

/// LLM router configuration, deserialized from `llm.toml` (§4.6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmRouterConfig {
    pub tasks: HashMap<String, TaskRouting>,
    pub prices: HashMap<String, ModelPrice>,
    #[serde(default)]
    pub monthly_caps_usd: HashMap<String, f64>,
    #[serde(default)]
    pub batch_eligible_tasks: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskRouting {
    pub primary: ModelRef,
    pub fallback: ModelRef,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelRef {
    pub provider: String,
    pub model: String,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input_per_million_usd: f64,
    pub output_per_million_usd: f64,
}

/// Load `SystemConfig` from a TOML file, falling back to built-in defaults
/// if no path is given. A malformed file at a given path is a startup
/// error (§6: non-zero exit reserved for unrecoverable startup errors).
pub fn load_system_config(path: Option<&std::path::Path>) -> crate::error::Result<SystemConfig> {
    match path {
        None => Ok(SystemConfig::default()),
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| crate::error::OemWatchError::Config(format!("{}: {e}", path.display())))?;
            toml::from_str(&raw)
                .map_err(|e| crate::error::OemWatchError::Config(format!("{}: {e}", path.display())))
        }
    }
}

/// Load every per-OEM TOML document in a directory (one file per OEM).
pub fn load_oem_configs(dir: &std::path::Path) -> crate::error::Result<Vec<OemConfig>> {
    let mut configs = Vec::new();
    let entries = std::fs::read_dir(dir)
        .map_err(|e| crate::error::OemWatchError::Config(format!("{}: {e}", dir.display())))?;
    for entry in entries {
        let entry =
            entry.map_err(|e| crate::error::OemWatchError::Config(format!("{}: {e}", dir.display())))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("toml") {
            continue;
        }
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| crate::error::OemWatchError::Config(format!("{}: {e}", path.display())))?;
        let config: OemConfig = toml::from_str(&raw)
            .map_err(|e| crate::error::OemWatchError::Config(format!("{}: {e}", path.display())))?;
        configs.push(config);
    }
    Ok(configs)
}
