//! Shared plumbing used by every component: the data model, error types,
//! HTTP client, ISIN validation, currency hint tables and config.

pub mod client;
pub mod config;
pub mod currency;
pub mod dataframe;
pub mod error;
pub mod isin;
pub(crate) mod net;
pub mod types;

pub use client::{Backoff, HttpClient, RetryConfig, Timeouts};
pub use config::EngineConfig;
pub use error::EngineError;
