//! mbr — composition root for the minute-bar trading runtime.
//!
//! This binary is the only place where clocks, environment, and adapters
//! are bound. Exit codes: 0 success, 2 invalid input, 3 strategy load
//! failure, 4 safety-gate failure, 5 runtime error.

mod builtin;
mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mbr_engine::RunMode;
use mbr_safety::{process_env, resolve_live_mode, GateAction, ResolvedMode};

use commands::{CliError, LiveArgs, RunArgs};

#[derive(Parser)]
#[command(name = "mbr")]
#[command(about = "Minute-bar trading runtime", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay historical bars through a strategy, deterministically
    Backtest(RunArgs),

    /// Trade the simulated venue in real time
    Paper(RunArgs),

    /// Live trading; requires LIVE_API=1 and CONFIRM_LIVE=YES
    Live(LiveArgs),
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let result = match cli.cmd {
        Commands::Backtest(args) => commands::run::execute(RunMode::Backtest, &args, None),
        Commands::Paper(args) => commands::run::execute(RunMode::Paper, &args, None),
        Commands::Live(args) => run_live(&args),
    };

    if let Err(e) = result {
        eprintln!("{e}");
        std::process::exit(e.exit_code());
    }
}

/// Live entry: the composition-root half of the dual safety gate. The
/// second half lives inside the live-adapter constructor
/// (`mbr_safety::GatedLiveBroker`).
fn run_live(args: &LiveArgs) -> Result<(), CliError> {
    let action = if args.downgrade {
        GateAction::DowngradeToPaper
    } else {
        GateAction::HardFail
    };

    match resolve_live_mode(action, &process_env).map_err(CliError::SafetyGate)? {
        ResolvedMode::Live => {
            // No broker network SDK links into this build; hosts supply a
            // live adapter (wrapped in GatedLiveBroker) and their own
            // composition root.
            Err(CliError::Runtime(
                "safety gates passed, but no live broker adapter is linked into this binary"
                    .to_string(),
            ))
        }
        ResolvedMode::PaperDowngrade { warning } => {
            tracing::warn!(%warning);
            commands::run::execute(RunMode::Paper, &args.run, Some(warning))
        }
    }
}
