//! Application state shared across handlers.

use crate::coalesce::Coalescer;
use crate::ratelimit::RateLimitState;
use std::sync::Arc;
use std::time::Duration;
use subarea_core::config::AppConfig;
use subarea_pipeline::Pipeline;
use subarea_storage::ArtifactStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub coalescer: Coalescer,
    pub rate_limit: RateLimitState,
}

impl AppState {
    /// Build the state. The configuration is expected to be validated already.
    pub fn new(config: AppConfig, store: ArtifactStore, pipeline: Pipeline) -> Self {
        let rate_limit = RateLimitState::new(&config.rate_limit);
        let coalescer = Coalescer::new(&config, store, pipeline);
        Self {
            config: Arc::new(config),
            coalescer,
            rate_limit,
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        self.coalescer.store()
    }

    /// Interval of the limiter janitor, if rate limiting is enabled.
    pub fn rate_limit_cleanup_interval(&self) -> Option<Duration> {
        self.rate_limit
            .is_enabled()
            .then(|| self.config.rate_limit.cleanup_interval())
    }

    /// URL path prefix under which the output directory is served.
    pub fn static_root(&self) -> String {
        format!(
            "{}/{}",
            self.config.server.static_prefix.trim_end_matches('/'),
            self.config.output.dir_name()
        )
    }
}
