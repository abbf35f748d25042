//! FactorLab Core — data composition and engine contract for backtests.
//!
//! This crate contains everything a run needs before and during simulation:
//! - Domain types (bars, frames, data kinds, signals)
//! - Market data providers with priority, health state and fallback
//! - A validating cache in front of the providers (memory or Parquet store)
//! - An explicit factor registry and the built-in factor classes
//! - DataGroups: one series plus bound factors, exposed as an engine feed
//! - The synchronous engine contract and a reference replay engine
//!
//! Persistence, orchestration and metric normalization live in the runner.

pub mod data;
pub mod domain;
pub mod engine;
pub mod factors;
pub mod group;
