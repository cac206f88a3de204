//! # true-exposure
//!
//! A privacy-first holdings decomposition and identity-resolution engine.
//!
//! Given a user's raw investment positions — direct equities, ETFs, crypto —
//! this crate resolves every heterogeneous identifier (tickers in Bloomberg,
//! Reuters/Yahoo or local formats; bare company names) to a canonical ISIN,
//! decomposes ETF positions into their underlying holdings, and aggregates
//! everything into a single *true-exposure* report with provenance and
//! confidence metadata for every row.
//!
//! The engine is headless: it is driven over the IPC envelope in [`ipc`] by
//! an external shell, which owns the UI, broker authentication, and update
//! mechanics. This crate only resolves, decomposes and aggregates.
//!
//! ## Components
//!
//! * [`normalize`] — name canonicalization and ticker-format parsing.
//! * [`cache`] — the embedded local store (assets, listings, aliases,
//!   positive/negative ISIN cache, format logs).
//! * [`hive`] — the community store client (the "Hive").
//! * [`resolver`] — the identity resolution cascade.
//! * [`adapters`] — per-issuer ETF-holdings fetchers.
//! * [`decompose`] — drives adapters and the resolver to flatten ETF rows.
//! * [`aggregate`] — merges direct and decomposed holdings into one table.
//! * [`pipeline`] — sequences load → decompose → enrich → aggregate.
//! * [`ingest`] — the single gate between external data and the pipeline.
//! * [`ipc`] — the command/response envelope the shell drives the engine
//!   with.
//!
//! ## Quick start
//!
//! ```no_run
//! use true_exposure::core::EngineConfig;
//! use true_exposure::ingest;
//! use true_exposure::pipeline::Orchestrator;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::default();
//! let orchestrator = Orchestrator::bootstrap(&config, "local-install").await?;
//! let positions = ingest::ingest_positions(&[])?.rows;
//! let outcome = orchestrator.run(positions, None).await?;
//! println!("resolved {} holdings", outcome.resolved.len());
//! # Ok(())
//! # }
//! ```
#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

/// Shared data model, error types, HTTP client, ISIN validation, config.
pub mod core;

/// Name canonicalization and ticker-format parsing (§4.1).
pub mod normalize;

/// Embedded local cache: assets, listings, aliases, ISIN cache, format logs (§4.2).
pub mod cache;

/// Community store ("Hive") client: read/write RPC surface (§4.3).
pub mod hive;

/// Cascaded identity resolution (§4.4).
pub mod resolver;

/// Per-issuer ETF-holdings adapters (§4.5).
pub mod adapters;

/// ETF decomposition: drives adapters + resolver, detects cycles (§4.6).
pub mod decompose;

/// Merges direct and decomposed holdings into one true-exposure table (§4.7).
pub mod aggregate;

/// Sequences the four pipeline phases and emits progress + health report (§4.8).
pub mod pipeline;

/// The single ingestion gate enforcing the canonical schema (§4.9).
pub mod ingest;

/// Request/response envelope the external shell drives the engine with (§6).
pub mod ipc;

pub use core::{EngineConfig, EngineError};
