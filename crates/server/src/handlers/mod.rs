//! HTTP request handlers.

pub mod health;
pub mod subareas;

pub use health::*;
pub use subareas::*;
