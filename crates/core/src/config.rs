//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// HTTP server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:8181").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Value of `Access-Control-Allow-Origin`. `*` allows any origin.
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
    /// URL prefix under which the output directory is served.
    #[serde(default = "default_static_prefix")]
    pub static_prefix: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
    /// Deadline in seconds for one background build. A build that overruns
    /// is recorded as a transient failure.
    #[serde(default = "default_build_timeout_secs")]
    pub build_timeout_secs: u64,
}

fn default_bind() -> String {
    "127.0.0.1:8181".to_string()
}

fn default_cors_origin() -> String {
    "*".to_string()
}

fn default_static_prefix() -> String {
    "/static".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_build_timeout_secs() -> u64 {
    300
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            cors_origin: default_cors_origin(),
            static_prefix: default_static_prefix(),
            metrics_enabled: default_metrics_enabled(),
            build_timeout_secs: default_build_timeout_secs(),
        }
    }
}

impl ServerConfig {
    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.build_timeout_secs == 0 {
            return Err("server.build_timeout_secs cannot be 0".to_string());
        }
        if !self.static_prefix.starts_with('/') {
            return Err(format!(
                "server.static_prefix must start with '/', got {:?}",
                self.static_prefix
            ));
        }
        Ok(())
    }
}

/// Where artifacts are written and served from.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Artifact directory. Created on startup if missing.
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./geo")
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

impl OutputConfig {
    /// Last path component of the output directory, used in static URLs.
    pub fn dir_name(&self) -> String {
        self.dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "geo".to_string())
    }
}

/// Remote dataset (OSM API) client configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the API, without the `/api/0.6` suffix.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_remote_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_base_url() -> String {
    "https://api.openstreetmap.org".to_string()
}

fn default_remote_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    concat!("subarea/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_remote_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(format!(
                "remote.base_url must be an http(s) URL, got {:?}",
                self.base_url
            ));
        }
        if self.timeout_secs == 0 {
            return Err("remote.timeout_secs cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Fan-out settings of the build pipeline.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of concurrent fetch+convert workers.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Capacity of the id and result channels.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_workers() -> usize {
    10
}

fn default_channel_capacity() -> usize {
    1000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("pipeline.workers cannot be 0".to_string());
        }
        // tokio::sync::mpsc::channel panics on zero capacity
        if self.channel_capacity == 0 {
            return Err("pipeline.channel_capacity cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Success and failure cache sizing for the HTTP layer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_capacity")]
    pub success_capacity: u64,
    #[serde(default = "default_cache_capacity")]
    pub failure_capacity: u64,
    /// Cooldown in seconds before a failed id may be rebuilt.
    #[serde(default = "default_failure_ttl_secs")]
    pub failure_ttl_secs: u64,
}

fn default_cache_capacity() -> u64 {
    5000
}

fn default_failure_ttl_secs() -> u64 {
    10
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            success_capacity: default_cache_capacity(),
            failure_capacity: default_cache_capacity(),
            failure_ttl_secs: default_failure_ttl_secs(),
        }
    }
}

impl CacheConfig {
    pub fn failure_ttl(&self) -> Duration {
        Duration::from_secs(self.failure_ttl_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.success_capacity == 0 || self.failure_capacity == 0 {
            return Err("cache capacities must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Rate limiting configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,
    /// Sustained requests per second per client IP.
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
    /// Burst size (allows temporary burst above rate limit).
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,
    /// Trusted proxy IP addresses/CIDR ranges.
    /// Only requests from these IPs will have X-Forwarded-For/X-Real-IP headers trusted.
    /// If empty, forwarded headers are never trusted (only direct connection IP is used).
    /// Use ["*"] to trust all proxies (NOT recommended for production).
    #[serde(default)]
    pub trusted_proxies: Vec<String>,
    /// Maximum number of unique IPs to track before rejecting new entries.
    /// When the limit is reached, new IPs are rejected with 429 until cleanup runs.
    #[serde(default = "default_max_entries")]
    pub max_entries: u32,
    /// Interval in seconds between cleanup sweeps of stale entries.
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// Entries not accessed within this many seconds are evicted during cleanup.
    #[serde(default = "default_entry_ttl_secs")]
    pub entry_ttl_secs: u64,
}

fn default_rate_limit_enabled() -> bool {
    true
}

fn default_requests_per_second() -> u32 {
    10
}

fn default_burst_size() -> u32 {
    5
}

fn default_max_entries() -> u32 {
    100_000
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

fn default_entry_ttl_secs() -> u64 {
    120
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_rate_limit_enabled(),
            requests_per_second: default_requests_per_second(),
            burst_size: default_burst_size(),
            trusted_proxies: Vec::new(),
            max_entries: default_max_entries(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            entry_ttl_secs: default_entry_ttl_secs(),
        }
    }
}

impl RateLimitConfig {
    /// Validate rate limit configuration for dangerous settings.
    /// Returns warnings for configs that are insecure but allowed,
    /// and errors for configs that should be rejected.
    pub fn validate(&self) -> Result<Vec<String>, String> {
        let mut warnings = Vec::new();

        if !self.enabled {
            return Ok(warnings);
        }

        // tokio::time::interval panics on a zero period
        if self.cleanup_interval_secs == 0 {
            return Err("rate_limit.cleanup_interval_secs cannot be 0. \
                 Use a value >= 1 second."
                .to_string());
        }

        if self.requests_per_second == 0 || self.burst_size == 0 {
            return Err(
                "rate_limit.requests_per_second and rate_limit.burst_size must be > 0".to_string(),
            );
        }

        if self.trusted_proxies.len() == 1 && self.trusted_proxies[0] == "*" {
            warnings.push(
                "rate_limit.trusted_proxies=['*'] trusts ALL forwarded headers. \
                 Clients can spoof their IP address and bypass rate limits."
                    .to_string(),
            );
        }

        if self.entry_ttl_secs < 2 {
            warnings.push(format!(
                "rate_limit.entry_ttl_secs={} is very short. \
                 Entries may be evicted before their bucket refills.",
                self.entry_ttl_secs
            ));
        }

        Ok(warnings)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn entry_ttl(&self) -> Duration {
        Duration::from_secs(self.entry_ttl_secs)
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl AppConfig {
    /// Create a test configuration writing to `output_dir`.
    ///
    /// **For testing only.** Rate limiting and metrics are disabled.
    pub fn for_testing(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            server: ServerConfig {
                metrics_enabled: false,
                ..ServerConfig::default()
            },
            output: OutputConfig {
                dir: output_dir.into(),
            },
            rate_limit: RateLimitConfig {
                enabled: false,
                ..RateLimitConfig::default()
            },
            ..Self::default()
        }
    }

    /// Validate every section. Returns non-fatal warnings on success.
    pub fn validate(&self) -> Result<Vec<String>, String> {
        self.server.validate()?;
        self.remote.validate()?;
        self.pipeline.validate()?;
        self.cache.validate()?;
        self.rate_limit.validate()
    }
}
