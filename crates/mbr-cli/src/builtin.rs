//! Built-in strategy catalogue.
//!
//! Each plugin lives as a source file under the repository `strategies/`
//! directory — the file the loader resolves and sandbox-scans — and is
//! compiled into this binary from that same file, so the vetted source
//! and the registered factory cannot drift apart.

use std::path::Path;

use mbr_strategy::StrategyRegistry;

#[path = "../../../strategies/ma_crossover.rs"]
mod ma_crossover;

#[path = "../../../strategies/equal_weight.rs"]
mod equal_weight;

/// Registry over the configured strategies directory with every built-in
/// factory registered.
pub fn registry(strategies_dir: &Path) -> StrategyRegistry {
    let mut reg = StrategyRegistry::new(strategies_dir);
    reg.register("ma_crossover", ma_crossover::get_bundle)
        .expect("built-in names are unique");
    reg.register("equal_weight", equal_weight::get_bundle)
        .expect("built-in names are unique");
    reg
}
