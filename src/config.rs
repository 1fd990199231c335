//! Config & Weights Loader (C14), §4.13. Grounded on `runtime_config.rs`'s hot-reloadable,
//! every-field-`serde(default)` shape, adapted from a local JSON file to a Store-backed row so the
//! same atomic in-memory swap applies across a multi-process deployment.
//!
//! The spec calls for "exactly one active WEIGHTS row and one active THRESHOLDS row"; this engine
//! persists both as a single [`ScoringConfigRow`] (weights map + threshold scalars together) since
//! they are always read and swapped together by `reloadWeights()` — see DESIGN.md.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::EngineResult;
use crate::model::ScoringConfigRow;
use crate::scoring::engine::{ScoringEngine, ScoringThresholds};
use crate::scoring::weights::ScoringWeights;
use crate::store::Store;

pub struct ConfigLoader {
    store: Arc<dyn Store>,
}

impl ConfigLoader {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// §4.13: on boot, read the one active row and apply it; a missing row is not an error, the
    /// compiled-in defaults already loaded into `ScoringEngine::new` stand.
    pub async fn load_on_boot(&self, engine: &ScoringEngine) -> EngineResult<()> {
        match self.store.get_active_scoring_config().await? {
            Some(row) => {
                self.apply(engine, &row);
                info!(version = %row.version, "scoring config loaded on boot");
            }
            None => {
                warn!("no active scoring config row — compiled-in defaults remain in effect");
            }
        }
        Ok(())
    }

    /// §4.13 `reloadWeights()`: re-reads the active row and atomically swaps it in. Safe to call
    /// repeatedly; each call is a full reload, not an incremental patch.
    pub async fn reload_weights(&self, engine: &ScoringEngine) -> EngineResult<()> {
        self.load_on_boot(engine).await
    }

    /// Persists a new active row built from the given weights/thresholds, then applies it. Used
    /// by operator tooling that wants to push a new config without a process restart.
    pub async fn publish(
        &self,
        engine: &ScoringEngine,
        version: impl Into<String>,
        weights: ScoringWeights,
        thresholds: ScoringThresholds,
    ) -> EngineResult<()> {
        let row = ScoringConfigRow {
            version: version.into(),
            weights: weights_to_map(&weights),
            min_confidence: thresholds.min_confidence,
            min_oi_change_pct: thresholds.min_oi_change_pct,
            min_funding_rate: thresholds.min_funding_rate,
            active: true,
        };
        self.store.upsert_scoring_config(row.clone()).await?;
        self.apply(engine, &row);
        info!(version = %row.version, "scoring config published and applied");
        Ok(())
    }

    /// §4.13: mis-summed weights are accepted as-is — normalisation happens per-call inside
    /// `ScoringWeights::normalized_for`, not here. A key missing from the stored row falls back to
    /// that dimension's compiled-in default.
    fn apply(&self, engine: &ScoringEngine, row: &ScoringConfigRow) {
        let defaults = ScoringWeights::default();
        let weights = map_to_weights(&row.weights, defaults);
        engine.set_weights(weights);
        engine.set_thresholds(ScoringThresholds {
            min_confidence: row.min_confidence,
            min_oi_change_pct: row.min_oi_change_pct,
            min_funding_rate: row.min_funding_rate,
        });
    }
}

fn weights_to_map(w: &ScoringWeights) -> HashMap<String, f64> {
    let mut m = HashMap::with_capacity(14);
    m.insert("oi_funding".to_string(), w.oi_funding);
    m.insert("trend".to_string(), w.trend);
    m.insert("candle_pattern".to_string(), w.candle_pattern);
    m.insert("volume".to_string(), w.volume);
    m.insert("key_levels".to_string(), w.key_levels);
    m.insert("rsi".to_string(), w.rsi);
    m.insert("macd".to_string(), w.macd);
    m.insert("pullback_risk".to_string(), w.pullback_risk);
    m.insert("liquidity_risk".to_string(), w.liquidity_risk);
    m.insert("volatility_risk".to_string(), w.volatility_risk);
    m.insert("liquidation_risk".to_string(), w.liquidation_risk);
    m.insert("new_token_risk".to_string(), w.new_token_risk);
    m.insert("whale_risk".to_string(), w.whale_risk);
    m.insert("volume_price_divergence".to_string(), w.volume_price_divergence);
    m
}

fn map_to_weights(m: &HashMap<String, f64>, defaults: ScoringWeights) -> ScoringWeights {
    let get = |key: &str, default: f64| m.get(key).copied().unwrap_or(default);
    ScoringWeights {
        oi_funding: get("oi_funding", defaults.oi_funding),
        trend: get("trend", defaults.trend),
        candle_pattern: get("candle_pattern", defaults.candle_pattern),
        volume: get("volume", defaults.volume),
        key_levels: get("key_levels", defaults.key_levels),
        rsi: get("rsi", defaults.rsi),
        macd: get("macd", defaults.macd),
        pullback_risk: get("pullback_risk", defaults.pullback_risk),
        liquidity_risk: get("liquidity_risk", defaults.liquidity_risk),
        volatility_risk: get("volatility_risk", defaults.volatility_risk),
        liquidation_risk: get("liquidation_risk", defaults.liquidation_risk),
        new_token_risk: get("new_token_risk", defaults.new_token_risk),
        whale_risk: get("whale_risk", defaults.whale_risk),
        volume_price_divergence: get("volume_price_divergence", defaults.volume_price_divergence),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::knowledge::KnowledgeProvider;
    use crate::external::market_data::{ComprehensiveData, MarketDataProvider};
    use crate::store::InMemoryStore;
    use async_trait::async_trait;

    struct StubMarketData;
    #[async_trait]
    impl MarketDataProvider for StubMarketData {
        async fn get_comprehensive_data(&self, _symbol: &str) -> EngineResult<ComprehensiveData> {
            unimplemented!()
        }
        async fn get_batch_realtime_prices(&self, _symbols: &[String]) -> EngineResult<HashMap<String, f64>> {
            Ok(HashMap::new())
        }
        async fn get_all_alpha_tokens_including_dex(&self) -> EngineResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    fn engine(store: Arc<dyn Store>) -> ScoringEngine {
        ScoringEngine::new(Arc::new(StubMarketData), None::<Arc<dyn KnowledgeProvider>>, store)
    }

    #[tokio::test]
    async fn missing_row_leaves_defaults_in_place() {
        let store = Arc::new(InMemoryStore::new());
        let loader = ConfigLoader::new(store.clone());
        let scoring = engine(store);
        loader.load_on_boot(&scoring).await.unwrap();
    }

    #[tokio::test]
    async fn publish_then_reload_round_trips() {
        let store = Arc::new(InMemoryStore::new());
        let loader = ConfigLoader::new(store.clone());
        let scoring = engine(store.clone());

        let mut weights = ScoringWeights::default();
        weights.trend = 0.5;
        let thresholds = ScoringThresholds { min_confidence: 70.0, min_oi_change_pct: 8.0, min_funding_rate: 0.001 };
        loader.publish(&scoring, "v2", weights, thresholds).await.unwrap();

        let stored = store.get_active_scoring_config().await.unwrap().unwrap();
        assert_eq!(stored.version, "v2");
        assert!((stored.weights["trend"] - 0.5).abs() < 1e-9);
        assert!((stored.min_confidence - 70.0).abs() < 1e-9);

        loader.reload_weights(&scoring).await.unwrap();
    }

    #[test]
    fn map_round_trip_preserves_values() {
        let w = ScoringWeights::default();
        let m = weights_to_map(&w);
        let back = map_to_weights(&m, ScoringWeights::default());
        assert!((back.trend - w.trend).abs() < 1e-9);
        assert!((back.whale_risk - w.whale_risk).abs() < 1e-9);
    }

    #[test]
    fn missing_key_falls_back_to_default() {
        let mut m = HashMap::new();
        m.insert("trend".to_string(), 0.9);
        let back = map_to_weights(&m, ScoringWeights::default());
        assert!((back.trend - 0.9).abs() < 1e-9);
        assert!((back.rsi - ScoringWeights::default().rsi).abs() < 1e-9);
    }
}
