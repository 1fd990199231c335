//! Per-dimension weights for the Scoring Engine, §4.6.2 / §4.13. Defaults mirror the reference
//! weighted scorer's `RegimeWeights` map, renamed to the fourteen named dimensions.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::scoring::dimensions::DIMENSION_NAMES;

/// The fourteen dimension weights, §4.6.2. The futures-only dimensions (`oi_funding`,
/// `liquidation_risk`) are dropped for DEX-only tokens and the remainder re-normalised.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub oi_funding: f64,
    pub trend: f64,
    pub candle_pattern: f64,
    pub volume: f64,
    pub key_levels: f64,
    pub rsi: f64,
    pub macd: f64,
    pub pullback_risk: f64,
    pub liquidity_risk: f64,
    pub volatility_risk: f64,
    pub liquidation_risk: f64,
    pub new_token_risk: f64,
    pub whale_risk: f64,
    pub volume_price_divergence: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            oi_funding: 0.16,
            trend: 0.16,
            candle_pattern: 0.12,
            volume: 0.08,
            key_levels: 0.06,
            rsi: 0.08,
            macd: 0.02,
            pullback_risk: 0.08,
            liquidity_risk: 0.10,
            volatility_risk: 0.06,
            liquidation_risk: 0.04,
            new_token_risk: 0.03,
            whale_risk: 0.02,
            volume_price_divergence: 0.02,
        }
    }
}

impl ScoringWeights {
    fn as_map(&self) -> HashMap<&'static str, f64> {
        let mut m = HashMap::with_capacity(DIMENSION_NAMES.len());
        m.insert("oi_funding", self.oi_funding);
        m.insert("trend", self.trend);
        m.insert("candle_pattern", self.candle_pattern);
        m.insert("volume", self.volume);
        m.insert("key_levels", self.key_levels);
        m.insert("rsi", self.rsi);
        m.insert("macd", self.macd);
        m.insert("pullback_risk", self.pullback_risk);
        m.insert("liquidity_risk", self.liquidity_risk);
        m.insert("volatility_risk", self.volatility_risk);
        m.insert("liquidation_risk", self.liquidation_risk);
        m.insert("new_token_risk", self.new_token_risk);
        m.insert("whale_risk", self.whale_risk);
        m.insert("volume_price_divergence", self.volume_price_divergence);
        m
    }

    /// Normalised weights for the given dimension names, re-summing to 1.0 over exactly the
    /// dimensions present (the DEX-only variant drops `oi_funding` and `liquidation_risk`, §4.6.2).
    pub fn normalized_for(&self, dims: &[&'static str]) -> HashMap<&'static str, f64> {
        let all = self.as_map();
        let total: f64 = dims.iter().filter_map(|d| all.get(d)).sum();
        let mut out = HashMap::with_capacity(dims.len());
        if total <= 0.0 {
            let even = 1.0 / dims.len().max(1) as f64;
            for d in dims {
                out.insert(*d, even);
            }
            return out;
        }
        for d in dims {
            let w = all.get(d).copied().unwrap_or(0.0);
            out.insert(*d, w / total);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::dimensions::{DEX_ONLY_DIMENSION_NAMES, DIMENSION_NAMES};

    #[test]
    fn full_set_normalizes_to_one() {
        let w = ScoringWeights::default();
        let n = w.normalized_for(&DIMENSION_NAMES);
        let sum: f64 = n.values().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn dex_only_set_drops_futures_dims_and_still_sums_to_one() {
        let w = ScoringWeights::default();
        let n = w.normalized_for(&DEX_ONLY_DIMENSION_NAMES);
        assert!(!n.contains_key("oi_funding"));
        assert!(!n.contains_key("liquidation_risk"));
        let sum: f64 = n.values().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn mis_summed_weights_still_normalize() {
        let mut w = ScoringWeights::default();
        w.trend = 5.0; // badly mis-summed on purpose
        let n = w.normalized_for(&DIMENSION_NAMES);
        let sum: f64 = n.values().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }
}
