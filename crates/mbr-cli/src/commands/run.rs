//! Shared run pipeline: load bundle → compose policies → ingest and
//! normalize bars → drive the engine → materialize artifacts.

use chrono::{DateTime, Utc};

use mbr_broker_paper::PaperBroker;
use mbr_core::fixedpoint::{render_micros, MICROS_SCALE};
use mbr_core::ports::{BarDataSource, Clock, SimClock, SystemClock};
use mbr_core::types::{Bar, Timeframe};
use mbr_engine::{
    EngineConfig, RebalancingEngine, RunMode, RunReport, SingleStrategyEngine,
};
use mbr_md::{normalize_batch, parse_csv_file, NormalizerConfig, ReplayDataSource};
use mbr_policy::merge;
use mbr_strategy::StrategyKind;

use crate::builtin;
use crate::commands::{CliError, RunArgs};

/// Run one backtest/paper session end to end. `extra_warning` carries a
/// safety-gate downgrade notice into the printed summary.
pub fn execute(
    mode: RunMode,
    args: &RunArgs,
    extra_warning: Option<String>,
) -> Result<(), CliError> {
    let start = parse_ts(&args.start, "--start")?;
    let end = parse_ts(&args.end, "--end")?;
    if end < start {
        return Err(CliError::InvalidInput(format!(
            "--end {} precedes --start {}",
            args.end, args.start
        )));
    }

    let symbols: Vec<String> = args
        .symbols
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if symbols.is_empty() {
        return Err(CliError::InvalidInput("--symbols is empty".to_string()));
    }

    // Resolve → sandbox → construct → validate.
    let registry = builtin::registry(&args.strategies_dir);
    let bundle = registry
        .load_bundle(&args.strategy)
        .map_err(CliError::StrategyLoad)?;
    let policies = merge(&mbr_policy::PolicySet::default(), bundle.overrides.as_ref());

    let bars = load_bars(args, &symbols, start, end)?;
    if bars.is_empty() {
        tracing::warn!("no bars selected; the run will produce empty artifacts");
    }

    let strategy = (bundle.build)();
    let clock: Box<dyn Clock> = match mode {
        RunMode::Backtest => Box::new(SimClock::new(start)),
        _ => Box::new(SystemClock),
    };
    let cfg = EngineConfig {
        mode,
        initial_cash_micros: args.cash * MICROS_SCALE,
        ..EngineConfig::backtest(0)
    };
    let broker = PaperBroker::new(policies.cost.clone(), start);

    let report = match bundle.meta.kind {
        StrategyKind::Signal => {
            let mut engine = SingleStrategyEngine::new(
                cfg,
                policies,
                bundle.meta.name.clone(),
                bundle.meta.universe.clone(),
                strategy,
                broker,
                clock,
            );
            engine
                .run(&bars, Some(&args.out))
                .map_err(|e| CliError::Runtime(e.to_string()))?
        }
        StrategyKind::Rebalance => {
            let mut engine = RebalancingEngine::new(
                cfg,
                policies,
                bundle.meta.name.clone(),
                bundle.meta.universe.clone(),
                strategy,
                broker,
                clock,
            );
            engine
                .run(&bars, Some(&args.out))
                .map_err(|e| CliError::Runtime(e.to_string()))?
        }
        // Arbitrage bundles are rejected by the loader.
        StrategyKind::Arbitrage => unreachable!("rejected at load time"),
    };

    print_summary(&report, args, extra_warning);
    Ok(())
}

fn parse_ts(raw: &str, flag: &str) -> Result<DateTime<Utc>, CliError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CliError::InvalidInput(format!("{flag} '{raw}': {e}")))
}

/// Ingest the CSV, normalize, window to `[start, end]` and the requested
/// symbols, and order for the engine.
fn load_bars(
    args: &RunArgs,
    symbols: &[String],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<Bar>, CliError> {
    let records = parse_csv_file(&args.data, &symbols[0])
        .map_err(|e| CliError::InvalidInput(e.to_string()))?;
    let normalized = normalize_batch(&records, &NormalizerConfig::default())
        .map_err(|e| CliError::InvalidInput(e.to_string()))?;

    for gap in &normalized.report.gaps {
        tracing::warn!(
            symbol = %gap.symbol,
            prev = %gap.prev_ts,
            next = %gap.next_ts,
            missing = gap.gap_count,
            "gap in bar series"
        );
    }

    let mut source = ReplayDataSource::new(normalized.bars);
    let mut bars: Vec<Bar> = Vec::new();
    for symbol in symbols {
        bars.extend(
            source
                .get_historical_bars(symbol, start, end, Timeframe::M1)
                .map_err(|e| CliError::InvalidInput(e.to_string()))?,
        );
    }
    // Engines consume bars in (ts, symbol) order.
    bars.sort_by(|a, b| a.ts.cmp(&b.ts).then_with(|| a.symbol.cmp(&b.symbol)));
    Ok(bars)
}

fn print_summary(report: &RunReport, args: &RunArgs, extra_warning: Option<String>) {
    println!("mode:            {}", report.mode);
    println!("strategy:        {}", report.strategy);
    println!("bars processed:  {}", report.bars_processed);
    println!("orders:          {}", report.orders_submitted);
    println!("fills:           {}", report.fills_applied);
    println!("intents blocked: {}", report.intents_rejected);
    println!("kill switch:     {}", report.kill_switch_tripped);
    println!("final equity:    {}", render_micros(report.final_equity_micros));
    for (stream, summary) in &report.manifest.streams {
        println!("{stream:>15}: {} events, sha256 {}", summary.count, summary.sha256);
    }
    if let Some(warning) = extra_warning {
        println!("warning:         {warning}");
    }
    for warning in &report.warnings {
        println!("warning:         {warning}");
    }
    println!("artifacts:       {}", args.out.display());
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
