//! CLI subcommand implementations and the exit-code taxonomy.

pub mod run;

use std::fmt;
use std::path::PathBuf;

use clap::Args;

use mbr_safety::LiveSafetyGateError;
use mbr_strategy::StrategyError;

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

/// Arguments shared by `backtest`, `paper`, and `live`.
#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Strategy name (resolved in the strategies directory)
    #[arg(long)]
    pub strategy: String,

    /// Comma-separated symbols to trade
    #[arg(long)]
    pub symbols: String,

    /// Run start, RFC-3339 UTC (e.g. 2026-01-01T00:00:00Z)
    #[arg(long)]
    pub start: String,

    /// Run end, RFC-3339 UTC (inclusive)
    #[arg(long)]
    pub end: String,

    /// Bar CSV file (columns: timestamp,open,high,low,close,volume[,symbol,...])
    #[arg(long)]
    pub data: PathBuf,

    /// Artifact output directory
    #[arg(long)]
    pub out: PathBuf,

    /// Strategy plugin source directory
    #[arg(long, default_value = "strategies")]
    pub strategies_dir: PathBuf,

    /// Initial cash in whole currency units
    #[arg(long, default_value_t = 100_000)]
    pub cash: i64,
}

/// `live` adds the gate-miss policy.
#[derive(Args, Clone, Debug)]
pub struct LiveArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Downgrade to paper (with a recorded warning) instead of failing
    /// when a safety gate is missing
    #[arg(long, default_value_t = false)]
    pub downgrade: bool,
}

// ---------------------------------------------------------------------------
// Exit-code taxonomy
// ---------------------------------------------------------------------------

/// CLI failure classes, each mapped to its process exit code.
#[derive(Debug)]
pub enum CliError {
    /// Exit 2: malformed arguments or input data.
    InvalidInput(String),
    /// Exit 3: the strategy failed to resolve, sandbox, or validate.
    StrategyLoad(StrategyError),
    /// Exit 4: live requested without both safety gates.
    SafetyGate(LiveSafetyGateError),
    /// Exit 5: the run itself failed.
    Runtime(String),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::InvalidInput(_) => 2,
            CliError::StrategyLoad(_) => 3,
            CliError::SafetyGate(_) => 4,
            CliError::Runtime(_) => 5,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            CliError::StrategyLoad(e) => write!(f, "{e}"),
            CliError::SafetyGate(e) => write!(f, "{e}"),
            CliError::Runtime(msg) => write!(f, "runtime error: {msg}"),
        }
    }
}

impl std::error::Error for CliError {}
