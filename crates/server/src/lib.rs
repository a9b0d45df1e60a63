//! HTTP server for subarea.
//!
//! This crate provides the serve mode:
//! - `GET /api/v1/subareas/{id}` answered from a coalescing cache that runs
//!   at most one background build per entity
//! - Static serving of the artifact directory
//! - Per-IP rate limiting, CORS and Prometheus metrics

pub mod coalesce;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod ratelimit;
pub mod routes;
pub mod state;

pub use coalesce::{Coalescer, QueryStatus};
pub use error::{ApiError, ApiResponse};
pub use ratelimit::RateLimitState;
pub use routes::create_router;
pub use state::AppState;
