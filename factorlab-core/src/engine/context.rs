//! StepContext — the per-step surface a strategy sees inside the engine loop.
//!
//! Feeds are addressed by position (the order they were handed to the
//! engine). Field reads go through each feed's slot map. Orders fill at the
//! current bar's close. Signals emitted here are buffered for the step and
//! must be drained by whoever wraps the strategy before the step returns.

use chrono::NaiveDateTime;

use super::broker::Broker;
use super::feed::EngineFeed;
use crate::domain::SignalDraft;

pub struct StepContext<'a> {
    time: NaiveDateTime,
    step: usize,
    feeds: &'a [EngineFeed],
    /// Row of each feed at or before `time`; `None` before a feed's first bar.
    cursors: &'a [Option<usize>],
    broker: &'a mut Broker,
    signals: Vec<SignalDraft>,
}

impl<'a> StepContext<'a> {
    pub(crate) fn new(
        time: NaiveDateTime,
        step: usize,
        feeds: &'a [EngineFeed],
        cursors: &'a [Option<usize>],
        broker: &'a mut Broker,
    ) -> Self {
        Self {
            time,
            step,
            feeds,
            cursors,
            broker,
            signals: Vec::new(),
        }
    }

    pub fn time(&self) -> NaiveDateTime {
        self.time
    }

    /// Zero-based index of this step on the aligned timeline.
    pub fn bar_index(&self) -> usize {
        self.step
    }

    pub fn feed_count(&self) -> usize {
        self.feeds.len()
    }

    pub fn feed(&self, feed: usize) -> Option<&EngineFeed> {
        self.feeds.get(feed)
    }

    pub fn feed_index(&self, name: &str) -> Option<usize> {
        self.feeds.iter().position(|f| f.name() == name)
    }

    /// Current row of a feed, if it has produced a bar yet.
    pub fn row(&self, feed: usize) -> Option<usize> {
        self.cursors.get(feed).copied().flatten()
    }

    /// True when the feed has a bar stamped exactly at this step's time.
    pub fn is_fresh(&self, feed: usize) -> bool {
        self.row(feed)
            .and_then(|r| self.feeds.get(feed)?.time(r))
            .is_some_and(|t| t == self.time)
    }

    /// Read a field by name through the feed's slot map.
    pub fn field(&self, feed: usize, name: &str) -> Option<f64> {
        let f = self.feeds.get(feed)?;
        f.value(self.row(feed)?, f.slot_of(name)?)
    }

    /// Read a field by slot index resolved earlier from the slot map.
    pub fn slot_value(&self, feed: usize, slot: usize) -> Option<f64> {
        self.feeds.get(feed)?.value(self.row(feed)?, slot)
    }

    pub fn close(&self, feed: usize) -> Option<f64> {
        self.feeds.get(feed)?.bar(self.row(feed)?).map(|b| b.close)
    }

    pub fn symbol(&self, feed: usize) -> Option<&str> {
        self.feeds.get(feed).map(|f| f.symbol())
    }

    pub fn position(&self, feed: usize) -> f64 {
        self.broker.position(feed)
    }

    pub fn cash(&self) -> f64 {
        self.broker.cash()
    }

    /// Account value marked at the current closes.
    pub fn value(&self) -> f64 {
        let prices: Vec<Option<f64>> = (0..self.feeds.len()).map(|i| self.close(i)).collect();
        self.broker.value(&prices)
    }

    /// Market buy at the current close. `None` goes all-in. Returns the filled size.
    pub fn buy(&mut self, feed: usize, size: Option<f64>) -> f64 {
        match self.close(feed) {
            Some(px) => self.broker.buy(feed, px, size, self.time, self.step),
            None => 0.0,
        }
    }

    /// Market sell at the current close. `None` sells the whole position.
    pub fn sell(&mut self, feed: usize, size: Option<f64>) -> f64 {
        match self.close(feed) {
            Some(px) => self.broker.sell(feed, px, size, self.time, self.step),
            None => 0.0,
        }
    }

    pub fn close_position(&mut self, feed: usize) -> f64 {
        self.sell(feed, None)
    }

    /// Record a trading decision made in this step.
    pub fn emit(&mut self, signal: SignalDraft) {
        self.signals.push(signal);
    }

    /// Take every signal emitted so far in this step.
    pub fn drain_signals(&mut self) -> Vec<SignalDraft> {
        std::mem::take(&mut self.signals)
    }

    pub(crate) fn pending_signals(&self) -> usize {
        self.signals.len()
    }
}
