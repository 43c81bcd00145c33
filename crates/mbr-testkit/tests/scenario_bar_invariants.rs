//! Bar invariants: duplicate keys resolve to the configured winner, and
//! with a zero reorder window a 120-second-late bar is rejected as an
//! ordering error in streaming mode.

use mbr_md::{
    normalize_batch, BarStream, DedupWinner, MdError, NormalizerConfig,
};
use mbr_testkit::raw_record;

fn cfg_winner_last() -> NormalizerConfig {
    NormalizerConfig {
        reorder_window_secs: 0,
        dedup_winner: DedupWinner::Last,
        ..NormalizerConfig::default()
    }
}

#[test]
fn late_bar_outside_zero_window_is_rejected() {
    // A row arrives 120 s behind the committed watermark.
    let mut stream = BarStream::new(cfg_winner_last());

    stream
        .push(&raw_record("BTC-USD", "2026-01-01T00:01:00Z", "100"))
        .unwrap();
    stream
        .push(&raw_record("BTC-USD", "2026-01-01T00:03:00Z", "102"))
        .unwrap();

    let err = stream
        .push(&raw_record("BTC-USD", "2026-01-01T00:01:00Z", "999"))
        .unwrap_err();
    match err {
        MdError::Ordering { symbol, ts, last_committed } => {
            assert_eq!(symbol, "BTC-USD");
            assert_eq!(ts.to_rfc3339(), "2026-01-01T00:01:00+00:00");
            assert_eq!(last_committed.to_rfc3339(), "2026-01-01T00:03:00+00:00");
        }
        other => panic!("expected ordering rejection, got {other:?}"),
    }
}

#[test]
fn batch_dedup_winner_last_keeps_the_later_row() {
    let records = vec![
        raw_record("BTC-USD", "2026-01-01T00:01:00Z", "100"),
        raw_record("BTC-USD", "2026-01-01T00:01:00Z", "105"),
        raw_record("BTC-USD", "2026-01-01T00:02:00Z", "106"),
    ];
    let out = normalize_batch(&records, &cfg_winner_last()).unwrap();

    assert_eq!(out.bars.len(), 2);
    assert_eq!(out.bars[0].close_micros, 105_000_000);
    assert_eq!(out.report.duplicate_count(), 1);
}

#[test]
fn batch_dedup_winner_first_keeps_the_earlier_row() {
    let records = vec![
        raw_record("BTC-USD", "2026-01-01T00:01:00Z", "100"),
        raw_record("BTC-USD", "2026-01-01T00:01:00Z", "105"),
    ];
    let cfg = NormalizerConfig {
        dedup_winner: DedupWinner::First,
        ..NormalizerConfig::default()
    };
    let out = normalize_batch(&records, &cfg).unwrap();
    assert_eq!(out.bars[0].close_micros, 100_000_000);
}

#[test]
fn naive_timestamp_rejected() {
    let err = normalize_batch(
        &[raw_record("BTC-USD", "2026-01-01T00:01:00", "100")],
        &NormalizerConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, MdError::Timezone { .. }));
}

#[test]
fn missing_ohlcv_rejected() {
    let mut record = raw_record("BTC-USD", "2026-01-01T00:01:00Z", "100");
    record.volume = None;
    let err = normalize_batch(&[record], &NormalizerConfig::default()).unwrap_err();
    assert!(matches!(err, MdError::Schema { field: "volume", .. }));
}

#[test]
fn non_minute_timeframe_rejected() {
    let mut record = raw_record("BTC-USD", "2026-01-01T00:01:00Z", "100");
    record.timeframe = Some("1h".to_string());
    let err = normalize_batch(&[record], &NormalizerConfig::default()).unwrap_err();
    assert!(matches!(err, MdError::Schema { field: "timeframe", .. }));
}

#[test]
fn contiguous_segments_are_exactly_sixty_seconds_apart() {
    let records = vec![
        raw_record("BTC-USD", "2026-01-01T00:01:00Z", "100"),
        raw_record("BTC-USD", "2026-01-01T00:02:00Z", "101"),
        raw_record("BTC-USD", "2026-01-01T00:05:00Z", "104"),
        raw_record("BTC-USD", "2026-01-01T00:06:00Z", "105"),
    ];
    let out = normalize_batch(&records, &NormalizerConfig::default()).unwrap();

    // One gap event, two missing bars, no synthetic rows.
    assert_eq!(out.bars.len(), 4);
    assert_eq!(out.report.gaps.len(), 1);
    assert_eq!(out.report.gaps[0].gap_count, 2);
}
