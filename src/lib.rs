//! steadyfetch library
//!
//! A resilient client for read-only HTTP resource APIs: per-host rate
//! limiting, a circuit breaker, bounded retries, and a two-tier (memory and
//! disk) response cache. The modules are public so integration tests and the
//! binary can reach them.

pub mod breaker;
pub mod cache;
pub mod cli;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod limiter;
pub mod storage;
pub mod sweeper;
pub mod transport;

pub use client::{ClientBuilder, ResilientClient};
pub use config::{ClientConfig, ConfigError};
pub use error::{AppError, AppResult};
