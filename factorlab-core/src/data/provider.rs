//! Market data provider trait and structured error types.
//!
//! The `MarketDataProvider` trait abstracts over data sources (CSV directories,
//! synthetic generators, vendor clients) so they can be ranked, swapped and
//! mocked for tests. Providers know nothing about the cache or about each
//! other; health bookkeeping lives in `ProviderRegistry`.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::domain::{DataKind, Frame};

/// Structured error types for a single provider call.
///
/// Every variant is transient from the caller's point of view: the registry
/// counts it against the provider and moves on to the next one.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider '{provider}' unreachable: {reason}")]
    Unreachable { provider: String, reason: String },

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("provider '{provider}' does not serve {kind} data")]
    UnsupportedKind { provider: String, kind: DataKind },

    #[error("malformed data from '{provider}': {reason}")]
    Malformed { provider: String, reason: String },

    #[error("provider '{provider}' returned no rows for {symbol}")]
    Empty { provider: String, symbol: String },

    #[error("provider error: {0}")]
    Other(String),
}

/// Health state of a registered provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderStatus {
    Active,
    Inactive,
    Error,
}

impl ProviderStatus {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            ProviderStatus::Active => 0,
            ProviderStatus::Inactive => 1,
            ProviderStatus::Error => 2,
        }
    }

    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            0 => ProviderStatus::Active,
            1 => ProviderStatus::Inactive,
            _ => ProviderStatus::Error,
        }
    }
}

impl fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProviderStatus::Active => "active",
            ProviderStatus::Inactive => "inactive",
            ProviderStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Uniform retrieval contract for a market data source.
///
/// Returned frames carry a time index and, for price kinds, the
/// `open/high/low/close/volume` columns.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Data kinds this provider can serve.
    fn data_kinds(&self) -> &[DataKind] {
        &[DataKind::Daily]
    }

    fn supports(&self, kind: DataKind) -> bool {
        self.data_kinds().contains(&kind)
    }

    /// Fetch a series for a symbol over an inclusive date range.
    async fn fetch(
        &self,
        symbol: &str,
        kind: DataKind,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Frame, ProviderError>;

    /// Cheap liveness check.
    async fn health_check(&self) -> bool;
}
