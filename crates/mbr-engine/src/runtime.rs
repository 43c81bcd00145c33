//! Shared engine runtime core.
//!
//! Owns the per-bar machinery both engine variants drive: bar sequencing
//! checks, marks, the risk gate, the submit/retry path, fill draining,
//! kill-switch handling, artifact emission, and finalization. The
//! variants differ only in how they turn strategy output into order
//! requests.
//!
//! Mutator ownership: the order state machine owns order records, the
//! risk monitor owns risk state, this core owns portfolio state. Adapters
//! are never invoked concurrently.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use mbr_artifacts::{
    ArtifactEvent, ArtifactWriter, FillEvent, LimitHitEvent, Manifest, OrderEvent,
    PnlSnapshotEvent, PositionsSnapshotEvent, RiskEventRecord, RunMeta,
};
use mbr_core::ports::{Broker, Clock, Notifier, NotifierEvent, StateStore};
use mbr_core::types::{Bar, Fill, OrderRequest, OrderStatus, PortfolioState, Side};
use mbr_execution::{retry_delay_ms, Cooldown, OrderStateMachine};
use mbr_policy::PolicySet;
use mbr_portfolio as portfolio;
use mbr_risk::{RiskMonitor, TripReport};

use crate::EngineError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Execution mode of a run.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RunMode {
    Backtest,
    Paper,
    Live,
}

impl RunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::Backtest => "backtest",
            RunMode::Paper => "paper",
            RunMode::Live => "live",
        }
    }
}

/// Engine configuration bound at the composition root.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub mode: RunMode,
    pub initial_cash_micros: i64,
    /// Kill-switch post-trip policy: cancel-only (false) or cancel and
    /// flatten (true).
    pub flatten_on_trip: bool,
    /// Rate-limit cool-down length.
    pub cooldown_secs: i64,
    /// Wall-clock bound on any single port call (paper/live).
    pub port_timeout_secs: i64,
}

impl EngineConfig {
    pub fn backtest(initial_cash_micros: i64) -> Self {
        Self {
            mode: RunMode::Backtest,
            initial_cash_micros,
            flatten_on_trip: false,
            cooldown_secs: 60,
            port_timeout_secs: 30,
        }
    }
}

/// Cooperative stop signal, checked between bars.
#[derive(Clone, Debug, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Summary of a completed run.
#[derive(Clone, Debug)]
pub struct RunReport {
    pub mode: &'static str,
    pub strategy: String,
    pub bars_processed: u64,
    pub orders_submitted: u64,
    pub fills_applied: u64,
    pub intents_rejected: u64,
    pub kill_switch_tripped: bool,
    pub final_equity_micros: i64,
    pub manifest: Manifest,
    pub warnings: Vec<String>,
}

// ---------------------------------------------------------------------------
// Submit outcome (engine level)
// ---------------------------------------------------------------------------

/// What happened to one intent inside the submit path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum IntentOutcome {
    Submitted,
    Replayed,
    RejectedByRisk,
    RejectedByBroker,
    CooldownBlocked,
}

// ---------------------------------------------------------------------------
// RuntimeCore
// ---------------------------------------------------------------------------

pub(crate) struct RuntimeCore<B: Broker> {
    pub cfg: EngineConfig,
    pub policies: PolicySet,
    pub strategy_name: String,
    pub broker: B,
    clock: Box<dyn Clock>,
    notifier: Box<dyn Notifier>,
    state_store: Option<Box<dyn StateStore>>,
    pub osm: OrderStateMachine,
    pub risk: RiskMonitor,
    pub portfolio: PortfolioState,
    writer: ArtifactWriter,
    cooldown: Cooldown,
    pub marks: BTreeMap<String, i64>,
    applied_fills: BTreeSet<Uuid>,
    emitted_status: BTreeMap<Uuid, OrderStatus>,
    /// Fills applied since the variant last collected them for
    /// `strategy.on_fill`.
    pending_strategy_fills: Vec<Fill>,
    pub stop: StopFlag,
    current_bar_ts: DateTime<Utc>,
    last_bar_key: Option<(DateTime<Utc>, String)>,
    tripped: bool,
    pub bars_processed: u64,
    pub orders_submitted: u64,
    pub fills_applied: u64,
    pub intents_rejected: u64,
    pub warnings: Vec<String>,
}

impl<B: Broker> RuntimeCore<B> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: EngineConfig,
        policies: PolicySet,
        strategy_name: String,
        universe: Vec<String>,
        broker: B,
        clock: Box<dyn Clock>,
        notifier: Box<dyn Notifier>,
        state_store: Option<Box<dyn StateStore>>,
        stop: StopFlag,
    ) -> Self {
        let start = clock.now();
        let portfolio_state = PortfolioState::new(start, cfg.initial_cash_micros);
        let risk = RiskMonitor::new(
            start,
            policies.risk.clone(),
            cfg.flatten_on_trip,
            cfg.initial_cash_micros,
        );
        let writer = ArtifactWriter::new(RunMeta {
            schema_version: 1,
            mode: cfg.mode.as_str().to_string(),
            strategy: strategy_name.clone(),
            symbols: universe,
        });
        let cooldown = Cooldown::new(cfg.cooldown_secs);
        Self {
            cfg,
            policies,
            strategy_name,
            broker,
            clock,
            notifier,
            state_store,
            osm: OrderStateMachine::new(),
            risk,
            portfolio: portfolio_state,
            writer,
            cooldown,
            marks: BTreeMap::new(),
            applied_fills: BTreeSet::new(),
            emitted_status: BTreeMap::new(),
            pending_strategy_fills: Vec::new(),
            stop,
            current_bar_ts: start,
            last_bar_key: None,
            tripped: false,
            bars_processed: 0,
            orders_submitted: 0,
            fills_applied: 0,
            intents_rejected: 0,
            warnings: Vec::new(),
        }
    }

    pub fn set_notifier(&mut self, notifier: Box<dyn Notifier>) {
        self.notifier = notifier;
    }

    pub fn set_state_store(&mut self, store: Box<dyn StateStore>) {
        self.state_store = Some(store);
    }

    /// Event timestamp: bar time in backtest, wall clock otherwise.
    pub fn event_now(&self) -> DateTime<Utc> {
        match self.cfg.mode {
            RunMode::Backtest => self.current_bar_ts,
            _ => self.clock.now(),
        }
    }

    fn guard_port(
        &self,
        port: &'static str,
        started: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let elapsed_secs = (self.clock.now() - started).num_seconds();
        if elapsed_secs > self.cfg.port_timeout_secs {
            return Err(EngineError::PortTimeout { port, elapsed_secs });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Per-bar entry
    // -----------------------------------------------------------------------

    /// Common head of the per-bar step: sequencing checks, venue pump,
    /// marks, risk tick, and fill draining.
    pub fn begin_bar(&mut self, bar: &Bar) -> Result<(), EngineError> {
        if !bar.is_closed {
            return Err(EngineError::BarSequence {
                detail: format!("open bar reached the engine: {} @ {}", bar.symbol, bar.ts),
            });
        }
        let key = (bar.ts, bar.symbol.clone());
        if let Some(last) = &self.last_bar_key {
            if key <= *last {
                return Err(EngineError::BarSequence {
                    detail: format!(
                        "bars out of (ts, symbol) order: {:?} after {:?}",
                        key, last
                    ),
                });
            }
        }
        self.last_bar_key = Some(key);
        self.current_bar_ts = bar.ts;

        let started = self.clock.now();
        self.broker
            .on_bar_close(bar)
            .map_err(|source| EngineError::Broker {
                context: "on_bar_close",
                source,
            })?;
        self.guard_port("on_bar_close", started)?;

        self.marks.insert(bar.symbol.clone(), bar.close_micros);
        portfolio::mark(&mut self.portfolio, &bar.symbol, bar.close_micros, bar.ts);
        self.portfolio.pending_orders = self.osm.open_orders().len();

        if let Some(report) = self.risk.on_bar(&self.portfolio) {
            self.handle_trip(report)?;
        }

        // Resting orders may have crossed at the new mark.
        self.drain_fills()?;

        self.bars_processed += 1;
        Ok(())
    }

    /// Common tail of the per-bar step: snapshots and persistence.
    pub fn end_bar(&mut self) -> Result<(), EngineError> {
        self.portfolio.pending_orders = self.osm.open_orders().len();
        self.append(ArtifactEvent::PositionsSnapshot(
            PositionsSnapshotEvent::from_portfolio(&self.portfolio),
        ))?;
        self.append(ArtifactEvent::PnlSnapshot(PnlSnapshotEvent::from_portfolio(
            &self.portfolio,
        )))?;
        self.persist_state();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Intents
    // -----------------------------------------------------------------------

    /// Route one request through the risk gate and the submit path.
    pub fn submit_intent(&mut self, request: &OrderRequest) -> Result<IntentOutcome, EngineError> {
        let now = self.event_now();

        if self.cooldown.active(now) {
            self.intents_rejected += 1;
            self.append(ArtifactEvent::RiskEvent(RiskEventRecord::intent_rejected(
                now,
                "rate_limit_cooldown",
                format!("submission blocked during cool-down: {}", request.idempotency_key),
            )))?;
            return Ok(IntentOutcome::CooldownBlocked);
        }

        let mark = self
            .marks
            .get(&request.symbol)
            .copied()
            .unwrap_or(0);
        if let Err(reject) = self.risk.pre_trade_check(request, &self.portfolio, mark) {
            self.intents_rejected += 1;
            tracing::info!(key = %request.idempotency_key, reason = %reject, "intent rejected");
            self.append(ArtifactEvent::RiskEvent(RiskEventRecord::intent_rejected(
                now,
                reject.kind(),
                reject.to_string(),
            )))?;
            return Ok(IntentOutcome::RejectedByRisk);
        }

        self.submit_unchecked(request)
    }

    /// Reject a whole intent batch (e.g. invalid target weights) with a
    /// recorded risk event; the run continues.
    pub fn reject_batch(&mut self, kind: &str, reason: String) -> Result<(), EngineError> {
        self.intents_rejected += 1;
        let now = self.event_now();
        self.append(ArtifactEvent::RiskEvent(RiskEventRecord::intent_rejected(
            now, kind, reason,
        )))
    }

    /// Submit path without the pre-trade gate (kill-switch flattening
    /// submits risk-reducing orders while the switch is active).
    fn submit_unchecked(&mut self, request: &OrderRequest) -> Result<IntentOutcome, EngineError> {
        let now = self.event_now();
        let outcome = self.osm.submit(request, now)?;
        let order_id = outcome.record().order_id;
        if outcome.is_replay() {
            // Replay-safe path: no resubmission, no new artifact entry.
            return Ok(IntentOutcome::Replayed);
        }

        let mut attempt: u32 = 1;
        loop {
            let started = self.clock.now();
            match self.broker.submit_order(request) {
                Ok(venue_record) => {
                    self.guard_port("submit_order", started)?;
                    self.osm
                        .record_acceptance(order_id, venue_record.venue_order_id.clone(), now)?;
                    self.orders_submitted += 1;
                    // Synchronous fills (backtest/paper) land in this
                    // same per-bar step.
                    self.drain_fills()?;
                    self.emit_order_event(order_id)?;
                    return Ok(IntentOutcome::Submitted);
                }
                Err(e) if e.rate_limited => {
                    self.cooldown.trip(now);
                    self.append(ArtifactEvent::LimitHit(LimitHitEvent::new(
                        now,
                        "broker",
                        e.message.clone(),
                    )))?;
                    self.notifier.emit(&NotifierEvent {
                        ts: now,
                        kind: "limit_hit".to_string(),
                        message: e.message.clone(),
                    });
                    self.osm.apply_reject(order_id, "rate limited", now)?;
                    self.emit_order_event(order_id)?;
                    return Ok(IntentOutcome::RejectedByBroker);
                }
                Err(e) => {
                    if let Some(delay_ms) =
                        retry_delay_ms(&e, &request.idempotency_key, attempt)
                    {
                        tracing::warn!(
                            key = %request.idempotency_key,
                            attempt,
                            delay_ms,
                            error = %e,
                            "transient submit failure; retrying with same key"
                        );
                        if self.cfg.mode != RunMode::Backtest {
                            std::thread::sleep(std::time::Duration::from_millis(delay_ms));
                        }
                        attempt += 1;
                        continue;
                    }
                    self.osm.apply_reject(order_id, &e.message, now)?;
                    self.emit_order_event(order_id)?;
                    tracing::warn!(key = %request.idempotency_key, error = %e, "order rejected");
                    return Ok(IntentOutcome::RejectedByBroker);
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Fills
    // -----------------------------------------------------------------------

    /// Pull adapter fills and apply each unseen one, in report order.
    pub fn drain_fills(&mut self) -> Result<(), EngineError> {
        let started = self.clock.now();
        let fills = self
            .broker
            .get_fills(None)
            .map_err(|source| EngineError::Broker {
                context: "get_fills",
                source,
            })?;
        self.guard_port("get_fills", started)?;

        for fill in fills {
            if self.applied_fills.contains(&fill.fill_id) {
                continue;
            }
            self.apply_fill(fill)?;
        }
        Ok(())
    }

    fn apply_fill(&mut self, fill: Fill) -> Result<(), EngineError> {
        if !self.applied_fills.insert(fill.fill_id) {
            return Ok(());
        }
        self.osm.apply_fill(&fill, fill.ts)?;
        portfolio::apply_fill(&mut self.portfolio, &fill);
        self.fills_applied += 1;

        self.append(ArtifactEvent::Fill(FillEvent::from_fill(&fill)))?;
        self.emit_order_event(fill.order_id)?;

        let trip = self.risk.on_fill(&self.portfolio);
        self.pending_strategy_fills.push(fill);
        if let Some(report) = trip {
            self.handle_trip(report)?;
        }
        Ok(())
    }

    /// Fills applied since the last call (for `strategy.on_fill`).
    pub fn take_new_fills(&mut self) -> Vec<Fill> {
        std::mem::take(&mut self.pending_strategy_fills)
    }

    // -----------------------------------------------------------------------
    // Kill switch
    // -----------------------------------------------------------------------

    fn handle_trip(&mut self, report: TripReport) -> Result<(), EngineError> {
        self.tripped = true;
        self.append(ArtifactEvent::RiskEvent(RiskEventRecord::kill_switch_tripped(
            report.ts,
            "drawdown breached kill switch",
            report.threshold_bps,
            report.observed_bps,
        )))?;
        self.notifier.emit(&NotifierEvent {
            ts: report.ts,
            kind: "kill_switch_tripped".to_string(),
            message: format!(
                "drawdown {}bps breached kill switch {}bps",
                report.observed_bps, report.threshold_bps
            ),
        });

        self.cancel_open_orders("kill_switch")?;
        if report.flatten {
            self.flatten_positions()?;
        }
        Ok(())
    }

    /// Cancel every non-terminal order through the broker port; orders
    /// the broker cannot confirm are marked cancelled locally and left
    /// for later reconciliation.
    pub fn cancel_open_orders(&mut self, reason: &str) -> Result<(), EngineError> {
        let open = self.osm.non_terminal_ids();
        for order_id in &open {
            let started = self.clock.now();
            match self.broker.cancel_order(*order_id) {
                Ok(_) => self.guard_port("cancel_order", started)?,
                Err(e) => {
                    self.warnings
                        .push(format!("cancel {order_id} failed at venue: {e}"));
                }
            }
        }
        // A fill may have landed before the venue processed the cancel.
        self.drain_fills()?;

        let now = self.event_now();
        for order_id in self.osm.non_terminal_ids() {
            self.osm.apply_cancel(order_id, reason, now)?;
            self.emit_order_event(order_id)?;
        }
        Ok(())
    }

    /// Submit risk-reducing market orders to close every open position.
    fn flatten_positions(&mut self) -> Result<(), EngineError> {
        let now = self.event_now();
        let targets: Vec<(String, i64)> = self
            .portfolio
            .positions
            .iter()
            .filter(|(_, p)| p.qty_micros != 0)
            .map(|(s, p)| (s.clone(), p.qty_micros))
            .collect();

        for (seq, (symbol, qty)) in targets.into_iter().enumerate() {
            let side = if qty > 0 { Side::Sell } else { Side::Buy };
            let request = OrderRequest {
                idempotency_key: format!(
                    "{}:flatten:{}:{}:{}",
                    self.strategy_name,
                    symbol,
                    now.format("%Y-%m-%dT%H:%M:%SZ"),
                    seq
                ),
                created_at: now,
                symbol: symbol.clone(),
                side,
                order_type: mbr_core::types::OrderType::Market,
                qty_micros: qty.abs(),
                limit_price_micros: None,
                stop_price_micros: None,
                strategy_name: self.strategy_name.clone(),
                metadata: BTreeMap::new(),
            };
            self.submit_unchecked(&request)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Artifacts and persistence
    // -----------------------------------------------------------------------

    fn append(&mut self, event: ArtifactEvent) -> Result<(), EngineError> {
        self.writer
            .append(&event)
            .map_err(|e| EngineError::Artifact(e.to_string()))
    }

    /// Record a fatal-class error in the manifest and materialize what
    /// exists so far. Called on the error path before surfacing.
    pub fn record_failure(&mut self, error: &EngineError, run_dir: Option<&Path>) {
        self.writer.record_error(error.class(), &error.to_string());
        if let Some(dir) = run_dir {
            if let Err(e) = self.writer.write_to_dir(dir) {
                self.warnings.push(format!("partial artifact write failed: {e}"));
            }
        }
    }

    /// Append an order snapshot when the status changed since the last
    /// emission for that order. One submission therefore yields exactly
    /// one entry, and an idempotent replay yields none.
    fn emit_order_event(&mut self, order_id: Uuid) -> Result<(), EngineError> {
        let record = match self.osm.get(order_id) {
            Some(r) => r.clone(),
            None => return Ok(()),
        };
        if self.emitted_status.get(&order_id) == Some(&record.status) {
            return Ok(());
        }
        self.emitted_status.insert(order_id, record.status);
        let ts = self.event_now();
        self.append(ArtifactEvent::Order(OrderEvent::from_record(ts, &record)))
    }

    fn persist_state(&mut self) {
        let (portfolio_state, risk_state, idempotency) = (
            self.portfolio.clone(),
            self.risk.state().clone(),
            self.osm.idempotency_map(),
        );
        if let Some(store) = self.state_store.as_mut() {
            if let Err(e) = store.save_portfolio_state(&portfolio_state) {
                self.warnings.push(format!("state store: {e}"));
            }
            if let Err(e) = store.save_risk_state(&risk_state) {
                self.warnings.push(format!("state store: {e}"));
            }
            if let Err(e) = store.save_idempotency_map(&idempotency) {
                self.warnings.push(format!("state store: {e}"));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Finalization
    // -----------------------------------------------------------------------

    /// Close out the run: cancel open orders, verify terminality, emit
    /// final snapshots, and build (optionally materialize) the manifest.
    pub fn finalize(&mut self, run_dir: Option<&Path>) -> Result<RunReport, EngineError> {
        self.cancel_open_orders("finalize")?;
        let remaining = self.osm.non_terminal_ids();
        if !remaining.is_empty() {
            return Err(EngineError::NonTerminalAfterFinalize {
                count: remaining.len(),
            });
        }

        self.end_bar()?;

        if let Some(dir) = run_dir {
            self.writer
                .write_to_dir(dir)
                .map_err(|e| EngineError::Artifact(e.to_string()))?;
        }

        Ok(RunReport {
            mode: self.cfg.mode.as_str(),
            strategy: self.strategy_name.clone(),
            bars_processed: self.bars_processed,
            orders_submitted: self.orders_submitted,
            fills_applied: self.fills_applied,
            intents_rejected: self.intents_rejected,
            kill_switch_tripped: self.tripped,
            final_equity_micros: self.portfolio.equity_micros,
            manifest: self.writer.manifest(),
            warnings: self.warnings.clone(),
        })
    }
}
