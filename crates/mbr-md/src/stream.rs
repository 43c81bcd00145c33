//! Streaming bar delivery with a bounded reorder window.
//!
//! Live feeds may deliver bars slightly out of order. [`BarStream`] holds
//! a per-symbol reorder buffer: a bar is committed (emitted downstream)
//! once the newest close time seen for its symbol is at least
//! `reorder_window_secs` ahead of it. With a zero window every bar commits
//! immediately and any late arrival is an ordering error.
//!
//! Committed bars per symbol are strictly increasing in `ts`; a bar at or
//! before the commit watermark is rejected — never silently reordered.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

use mbr_core::types::Bar;

use crate::normalizer::{parse_record, DedupWinner, MdError, NormalizerConfig, RawBarRecord};

// ---------------------------------------------------------------------------
// Per-symbol state
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SymbolState {
    /// Buffered bars keyed by close time, not yet committed.
    buffer: BTreeMap<DateTime<Utc>, Bar>,
    /// Close time of the last committed bar.
    last_committed: Option<DateTime<Utc>>,
    /// Newest close time ever seen (committed or buffered).
    newest_seen: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// BarStream
// ---------------------------------------------------------------------------

/// Stateful streaming normalizer.
///
/// `push` parses and validates one record, then returns the bars that
/// became committable, in `ts` order. `flush` drains every buffer at
/// end-of-stream. Open (`is_closed == false`) bars are counted and
/// dropped by the readiness gate.
#[derive(Debug)]
pub struct BarStream {
    cfg: NormalizerConfig,
    symbols: BTreeMap<String, SymbolState>,
    open_bars_dropped: usize,
    duplicates_resolved: usize,
}

impl BarStream {
    pub fn new(cfg: NormalizerConfig) -> Self {
        Self {
            cfg,
            symbols: BTreeMap::new(),
            open_bars_dropped: 0,
            duplicates_resolved: 0,
        }
    }

    /// Bars dropped so far by the readiness gate.
    pub fn open_bars_dropped(&self) -> usize {
        self.open_bars_dropped
    }

    /// Duplicate keys resolved so far by the configured winner.
    pub fn duplicates_resolved(&self) -> usize {
        self.duplicates_resolved
    }

    /// Ingest one raw record; returns the bars that became committable.
    pub fn push(&mut self, record: &RawBarRecord) -> Result<Vec<Bar>, MdError> {
        let bar = parse_record(record)?;

        if !bar.is_closed {
            self.open_bars_dropped += 1;
            return Ok(Vec::new());
        }

        let state = self.symbols.entry(bar.symbol.clone()).or_default();

        // A bar at or before the commit watermark can no longer be
        // reordered — the window for it has passed.
        if let Some(last) = state.last_committed {
            if bar.ts <= last {
                return Err(MdError::Ordering {
                    symbol: bar.symbol,
                    ts: bar.ts,
                    last_committed: last,
                });
            }
        }

        // Duplicate inside the buffer: resolve by the configured winner.
        match state.buffer.get_mut(&bar.ts) {
            Some(existing) => {
                self.duplicates_resolved += 1;
                if self.cfg.dedup_winner == DedupWinner::Last {
                    *existing = bar.clone();
                }
            }
            None => {
                state.buffer.insert(bar.ts, bar.clone());
            }
        }

        if state.newest_seen.map_or(true, |n| bar.ts > n) {
            state.newest_seen = Some(bar.ts);
        }

        let symbol = bar.symbol.clone();
        Ok(self.drain_committable(&symbol))
    }

    /// Commit every buffered bar whose reorder window has elapsed.
    fn drain_committable(&mut self, symbol: &str) -> Vec<Bar> {
        let window = Duration::seconds(self.cfg.reorder_window_secs);
        let state = match self.symbols.get_mut(symbol) {
            Some(s) => s,
            None => return Vec::new(),
        };
        let newest = match state.newest_seen {
            Some(n) => n,
            None => return Vec::new(),
        };

        let mut out = Vec::new();
        while let Some((ts, bar)) = state.buffer.pop_first() {
            if newest - ts < window {
                state.buffer.insert(ts, bar);
                break;
            }
            state.last_committed = Some(ts);
            out.push(bar);
        }
        out
    }

    /// Drain all remaining buffered bars in `(symbol, ts)` order.
    pub fn flush(&mut self) -> Vec<Bar> {
        let mut out = Vec::new();
        for state in self.symbols.values_mut() {
            while let Some((ts, bar)) = state.buffer.pop_first() {
                state.last_committed = Some(ts);
                out.push(bar);
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(symbol: &str, ts: &str, close: &str) -> RawBarRecord {
        RawBarRecord {
            symbol: Some(symbol.to_string()),
            timeframe: Some("1m".to_string()),
            ts: Some(ts.to_string()),
            open: Some(close.to_string()),
            high: Some(close.to_string()),
            low: Some(close.to_string()),
            close: Some(close.to_string()),
            volume: Some("1".to_string()),
            is_closed: Some(true),
            source: None,
        }
    }

    fn cfg(window: i64) -> NormalizerConfig {
        NormalizerConfig {
            reorder_window_secs: window,
            ..NormalizerConfig::default()
        }
    }

    #[test]
    fn zero_window_commits_immediately() {
        let mut stream = BarStream::new(cfg(0));
        let out = stream.push(&raw("BTC-USD", "2026-01-01T00:01:00Z", "100")).unwrap();
        assert_eq!(out.len(), 1);
        let out = stream.push(&raw("BTC-USD", "2026-01-01T00:02:00Z", "101")).unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn zero_window_rejects_late_bar() {
        let mut stream = BarStream::new(cfg(0));
        stream.push(&raw("BTC-USD", "2026-01-01T00:03:00Z", "100")).unwrap();
        let err = stream
            .push(&raw("BTC-USD", "2026-01-01T00:01:00Z", "99"))
            .unwrap_err();
        assert!(matches!(err, MdError::Ordering { .. }));
    }

    #[test]
    fn window_buffers_and_reorders_late_bar() {
        // 120 s window: bars are held back until something 2 minutes newer
        // arrives, so a one-minute-late bar slots back into order.
        let mut stream = BarStream::new(cfg(120));
        assert!(stream.push(&raw("BTC-USD", "2026-01-01T00:02:00Z", "101")).unwrap().is_empty());
        assert!(stream.push(&raw("BTC-USD", "2026-01-01T00:01:00Z", "100")).unwrap().is_empty());
        let out = stream.push(&raw("BTC-USD", "2026-01-01T00:04:00Z", "103")).unwrap();
        let ts: Vec<String> = out.iter().map(|b| b.ts.to_rfc3339()).collect();
        assert_eq!(
            ts,
            vec![
                "2026-01-01T00:01:00+00:00".to_string(),
                "2026-01-01T00:02:00+00:00".to_string(),
            ]
        );
    }

    #[test]
    fn late_bar_behind_watermark_rejected_even_with_window() {
        let mut stream = BarStream::new(cfg(60));
        stream.push(&raw("BTC-USD", "2026-01-01T00:01:00Z", "100")).unwrap();
        // 00:03 commits 00:01 and 00:02-less buffer; watermark at 00:01... push 00:03
        stream.push(&raw("BTC-USD", "2026-01-01T00:03:00Z", "102")).unwrap();
        // 00:05 moves newest far enough that 00:03 commits too.
        stream.push(&raw("BTC-USD", "2026-01-01T00:05:00Z", "104")).unwrap();
        let err = stream
            .push(&raw("BTC-USD", "2026-01-01T00:03:00Z", "999"))
            .unwrap_err();
        assert!(matches!(err, MdError::Ordering { .. }));
    }

    #[test]
    fn duplicate_in_buffer_resolved_by_winner() {
        let mut stream = BarStream::new(NormalizerConfig {
            reorder_window_secs: 120,
            dedup_winner: DedupWinner::Last,
            ..NormalizerConfig::default()
        });
        stream.push(&raw("BTC-USD", "2026-01-01T00:01:00Z", "100")).unwrap();
        stream.push(&raw("BTC-USD", "2026-01-01T00:01:00Z", "105")).unwrap();
        let out = stream.flush();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].close_micros, 105_000_000);
        assert_eq!(stream.duplicates_resolved(), 1);
    }

    #[test]
    fn open_bars_are_gated_not_buffered() {
        let mut stream = BarStream::new(cfg(0));
        let mut open = raw("BTC-USD", "2026-01-01T00:01:00Z", "100");
        open.is_closed = Some(false);
        let out = stream.push(&open).unwrap();
        assert!(out.is_empty());
        assert_eq!(stream.open_bars_dropped(), 1);
        assert!(stream.flush().is_empty());
    }

    #[test]
    fn flush_drains_in_symbol_then_ts_order() {
        let mut stream = BarStream::new(cfg(600));
        stream.push(&raw("ETH-USD", "2026-01-01T00:01:00Z", "10")).unwrap();
        stream.push(&raw("BTC-USD", "2026-01-01T00:02:00Z", "101")).unwrap();
        stream.push(&raw("BTC-USD", "2026-01-01T00:01:00Z", "100")).unwrap();
        let out = stream.flush();
        let keys: Vec<(String, String)> = out
            .iter()
            .map(|b| (b.symbol.clone(), b.ts.to_rfc3339()))
            .collect();
        assert_eq!(keys[0].0, "BTC-USD");
        assert_eq!(keys[1].0, "BTC-USD");
        assert_eq!(keys[2].0, "ETH-USD");
        assert!(keys[0].1 < keys[1].1);
    }
}
