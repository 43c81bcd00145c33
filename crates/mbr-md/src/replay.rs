//! Replay data source over normalized bars.
//!
//! Implements the `BarDataSource` port for backtest and paper runs:
//! historical queries are finite and restartable; the live stream
//! replays the same bars once, in `(ts, symbol)` order.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use mbr_core::ports::{BarDataSource, DataSourceError};
use mbr_core::types::{Bar, Timeframe};

/// In-memory source fed from a normalized batch.
#[derive(Debug)]
pub struct ReplayDataSource {
    /// All bars, sorted by `(symbol, ts)` as the normalizer emits them.
    bars: Vec<Bar>,
    /// Lazily built live queue in `(ts, symbol)` order.
    live_queue: Option<VecDeque<Bar>>,
}

impl ReplayDataSource {
    /// Build from normalizer output (closed bars, `(symbol, ts)` sorted).
    pub fn new(bars: Vec<Bar>) -> Self {
        Self {
            bars,
            live_queue: None,
        }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}

impl BarDataSource for ReplayDataSource {
    fn get_historical_bars(
        &mut self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        timeframe: Timeframe,
    ) -> Result<Vec<Bar>, DataSourceError> {
        Ok(self
            .bars
            .iter()
            .filter(|b| b.symbol == symbol && b.timeframe == timeframe)
            .filter(|b| b.ts >= start && b.ts <= end)
            .cloned()
            .collect())
    }

    fn next_live_bar(
        &mut self,
        symbols: &[String],
        timeframe: Timeframe,
    ) -> Result<Option<Bar>, DataSourceError> {
        if self.live_queue.is_none() {
            let mut selected: Vec<Bar> = self
                .bars
                .iter()
                .filter(|b| b.timeframe == timeframe)
                .filter(|b| symbols.iter().any(|s| s == &b.symbol))
                .cloned()
                .collect();
            selected.sort_by(|a, b| a.ts.cmp(&b.ts).then_with(|| a.symbol.cmp(&b.symbol)));
            self.live_queue = Some(selected.into());
        }
        Ok(self.live_queue.as_mut().and_then(|q| q.pop_front()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
