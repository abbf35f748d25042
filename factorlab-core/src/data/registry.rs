//! Priority ordering, health bookkeeping and fallback across providers.
//!
//! Providers are tried in ascending priority (lower number first). Each
//! registered provider owns its own atomic counters, so concurrent fetches for
//! different symbols never interfere across providers:
//! - a failed fetch increments `error_count`; at `max_errors` the provider goes
//!   `inactive` and is skipped until a health check succeeds
//! - a successful fetch resets `error_count` and marks the provider `active`
//! - an empty result counts as a failure of that provider
//!
//! Exhausting every provider is not an error: it is `FetchOutcome::NoData`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::provider::{MarketDataProvider, ProviderError, ProviderStatus};
use crate::domain::{DataKind, Frame};

/// Default number of consecutive failures before a provider is disabled.
pub const DEFAULT_MAX_ERRORS: u32 = 3;

/// A provider plus its ranking and health state.
pub struct ProviderSlot {
    provider: Arc<dyn MarketDataProvider>,
    priority: i32,
    max_errors: u32,
    error_count: AtomicU32,
    status: AtomicU8,
}

impl ProviderSlot {
    fn new(provider: Arc<dyn MarketDataProvider>, priority: i32, max_errors: u32) -> Self {
        Self {
            provider,
            priority,
            max_errors: max_errors.max(1),
            error_count: AtomicU32::new(0),
            status: AtomicU8::new(ProviderStatus::Active.to_u8()),
        }
    }

    pub fn name(&self) -> &str {
        self.provider.name()
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> ProviderStatus {
        ProviderStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    fn set_status(&self, status: ProviderStatus) {
        self.status.store(status.to_u8(), Ordering::SeqCst);
    }

    /// Count one failure; disable the provider once the threshold is reached.
    pub fn record_error(&self) -> u32 {
        let count = self.error_count.fetch_add(1, Ordering::SeqCst) + 1;
        if count >= self.max_errors {
            self.set_status(ProviderStatus::Inactive);
        }
        count
    }

    /// Count one failed health check; at the threshold the provider is `error`.
    pub fn record_failed_check(&self) -> u32 {
        let count = self.error_count.fetch_add(1, Ordering::SeqCst) + 1;
        if count >= self.max_errors {
            self.set_status(ProviderStatus::Error);
        }
        count
    }

    pub fn record_success(&self) {
        self.error_count.store(0, Ordering::SeqCst);
        self.set_status(ProviderStatus::Active);
    }

    pub fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: self.name().to_string(),
            priority: self.priority,
            status: self.status(),
            error_count: self.error_count(),
            max_errors: self.max_errors,
            data_kinds: self.provider.data_kinds().to_vec(),
        }
    }
}

/// Point-in-time snapshot of one provider's health.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub priority: i32,
    pub status: ProviderStatus,
    pub error_count: u32,
    pub max_errors: u32,
    pub data_kinds: Vec<DataKind>,
}

/// Result of walking the provider list for one request.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Fetched { provider: String, frame: Frame },
    NoData { attempted: Vec<String> },
}

/// Explicitly constructed registry of providers; one per application or test.
#[derive(Default)]
pub struct ProviderRegistry {
    slots: Vec<ProviderSlot>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider. Equal priorities keep registration order.
    pub fn register(
        &mut self,
        provider: Arc<dyn MarketDataProvider>,
        priority: i32,
        max_errors: u32,
    ) -> &mut Self {
        info!(provider = provider.name(), priority, "registered data provider");
        self.slots
            .push(ProviderSlot::new(provider, priority, max_errors));
        self.slots.sort_by_key(|s| s.priority);
        self
    }

    pub fn with_provider(
        mut self,
        provider: Arc<dyn MarketDataProvider>,
        priority: i32,
    ) -> Self {
        self.register(provider, priority, DEFAULT_MAX_ERRORS);
        self
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slots in the order they are tried.
    pub fn slots(&self) -> &[ProviderSlot] {
        &self.slots
    }

    pub fn slot(&self, name: &str) -> Option<&ProviderSlot> {
        self.slots.iter().find(|s| s.name() == name)
    }

    pub fn error_count(&self, name: &str) -> Option<u32> {
        self.slot(name).map(|s| s.error_count())
    }

    /// Try each usable provider in priority order until one returns rows.
    pub async fn fetch_with_fallback(
        &self,
        symbol: &str,
        kind: DataKind,
        start: NaiveDate,
        end: NaiveDate,
    ) -> FetchOutcome {
        let mut attempted = Vec::new();

        for slot in &self.slots {
            if slot.status() != ProviderStatus::Active {
                debug!(provider = slot.name(), status = %slot.status(), "skipping provider");
                continue;
            }
            if !slot.provider.supports(kind) {
                continue;
            }
            attempted.push(slot.name().to_string());

            let result = slot
                .provider
                .fetch(symbol, kind, start, end)
                .await
                .and_then(|frame| {
                    if frame.is_empty() {
                        Err(ProviderError::Empty {
                            provider: slot.name().to_string(),
                            symbol: symbol.to_string(),
                        })
                    } else {
                        Ok(frame)
                    }
                });

            match result {
                Ok(frame) => {
                    slot.record_success();
                    info!(
                        provider = slot.name(),
                        symbol,
                        kind = %kind,
                        rows = frame.len(),
                        "fetched series"
                    );
                    return FetchOutcome::Fetched {
                        provider: slot.name().to_string(),
                        frame,
                    };
                }
                Err(e) => {
                    let count = slot.record_error();
                    warn!(
                        provider = slot.name(),
                        symbol,
                        error = %e,
                        error_count = count,
                        status = %slot.status(),
                        "provider fetch failed, trying next"
                    );
                }
            }
        }

        warn!(symbol, kind = %kind, ?attempted, "no provider returned data");
        FetchOutcome::NoData { attempted }
    }

    /// Check every provider. Success reactivates it; a failure counts as one
    /// error and marks it `error` once `max_errors` is reached.
    pub async fn health_check_all(&self) -> Vec<(String, bool)> {
        let mut results = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            let healthy = slot.provider.health_check().await;
            if healthy {
                slot.record_success();
            } else {
                let count = slot.record_failed_check();
                warn!(provider = slot.name(), error_count = count, status = %slot.status(), "health check failed");
            }
            debug!(provider = slot.name(), healthy, "health check");
            results.push((slot.name().to_string(), healthy));
        }
        results
    }

    pub fn status(&self) -> Vec<ProviderInfo> {
        self.slots.iter().map(|s| s.info()).collect()
    }
}
