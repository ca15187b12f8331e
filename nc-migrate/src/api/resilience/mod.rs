//! Resilience features for API calls
//!
//! Retry with backoff and per-endpoint concurrency limiting.

pub mod concurrency;
pub mod config;
pub mod retry;

pub use concurrency::{ConcurrencyLimiter, ConcurrencyStats};
pub use config::ResilienceConfig;
pub use retry::RetryPolicy;
