//! mbr-core
//!
//! Core value types for the minute-bar trading runtime: bars, signals,
//! orders, fills, portfolio and risk state, artifact events, and the
//! synchronous port traits that adapters implement.
//!
//! This crate holds **data and contracts only**:
//! - no IO (no files, no network, no clocks beyond the `Clock` port)
//! - no engine logic (see `mbr-engine`)
//! - no lifecycle enforcement (see `mbr-execution`)

pub mod fixedpoint;
pub mod ports;
pub mod types;

pub use fixedpoint::{
    apply_bps, mul_price_qty, price_to_micros, render_micros, FixedPointError, BPS_SCALE,
    MICROS_SCALE,
};
pub use ports::{
    BarDataSource, Broker, BrokerError, Clock, DataSourceError, ErrorClass, Notifier,
    NotifierEvent, NullNotifier, SimClock, StateStore, StateStoreError, SystemClock,
};
pub use types::{
    Bar, Fill, OrderRecord, OrderRequest, OrderStatus, OrderType, PortfolioState, Position,
    RiskState, Side, Signal, SignalAction, TargetWeights, Timeframe, Transition,
};
