//! Equal-weight rebalancer.
//!
//! Targets an equal weight per universe symbol, rebalancing at the top
//! of each hour. Carries a sizing override tightening the turnover cap.

use std::collections::BTreeMap;

use chrono::{DateTime, Timelike, Utc};

use mbr_core::types::{Bar, PortfolioState, Signal, TargetWeights, Timeframe};
use mbr_policy::{PolicyOverrides, SizingOverride};
use mbr_strategy::{Strategy, StrategyBundle, StrategyKind, StrategyMeta};

const UNIVERSE: [&str; 2] = ["BTC-USD", "ETH-USD"];

struct EqualWeight {
    last_rebalance_hour: Option<u32>,
}

impl Strategy for EqualWeight {
    fn on_bar(&mut self, _bar: &Bar) -> Vec<Signal> {
        Vec::new()
    }

    fn target_weights(
        &mut self,
        ts: DateTime<Utc>,
        _portfolio: &PortfolioState,
    ) -> Option<TargetWeights> {
        let hour = ts.hour();
        let due = ts.minute() == 0 && self.last_rebalance_hour != Some(hour);
        if due {
            self.last_rebalance_hour = Some(hour);
        }

        let per_symbol_bps = 10_000 / UNIVERSE.len() as i64;
        let weights_bps: BTreeMap<String, i64> = UNIVERSE
            .iter()
            .map(|s| (s.to_string(), per_symbol_bps))
            .collect();

        Some(TargetWeights {
            ts,
            weights_bps,
            rebalance: due,
            reason: due.then(|| "hourly equal weight".to_string()),
        })
    }
}

/// Plugin entry point.
pub fn get_bundle() -> StrategyBundle {
    StrategyBundle::new(
        StrategyMeta {
            name: "equal_weight".to_string(),
            kind: StrategyKind::Rebalance,
            universe: UNIVERSE.iter().map(|s| s.to_string()).collect(),
            timeframe: Timeframe::M1,
            required_fields: vec!["close".to_string()],
            session: Some("24x7".to_string()),
        },
        Box::new(|| {
            Box::new(EqualWeight {
                last_rebalance_hour: None,
            })
        }),
    )
    .with_overrides(PolicyOverrides {
        sizing: Some(SizingOverride {
            max_gross_exposure_bps: Some(5_000),
            ..SizingOverride::default()
        }),
        ..PolicyOverrides::default()
    })
}
