//! Confidence aggregation, trading plan and knowledge augmentation, §4.6.3-§4.6.6. Generalised
//! from the reference `WeightedScorer::score` (`src/signals/weighted_score.rs`) to the spec's
//! fixed dimension set and persisted-signal output.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::EngineResult;
use crate::external::knowledge::{parse_confidence_adjustment, KnowledgeProvider};
use crate::external::market_data::{ComprehensiveData, MarketDataProvider};
use crate::model::Signal;
use crate::scoring::dimensions::{evaluate_all, DEX_ONLY_DIMENSION_NAMES, DIMENSION_NAMES};
use crate::scoring::weights::ScoringWeights;
use crate::store::Store;
use crate::types::{Chain, SignalStatus, SignalType};

const SIGNAL_TTL_HOURS: i64 = 24;

/// Thresholds that gate whether a generated signal is worth emitting at all, §4.13.
#[derive(Debug, Clone, Copy)]
pub struct ScoringThresholds {
    pub min_confidence: f64,
    pub min_oi_change_pct: f64,
    pub min_funding_rate: f64,
}

impl Default for ScoringThresholds {
    fn default() -> Self {
        Self { min_confidence: 50.0, min_oi_change_pct: 5.0, min_funding_rate: 0.0001 }
    }
}

pub struct ScoringEngine {
    market_data: Arc<dyn MarketDataProvider>,
    knowledge: Option<Arc<dyn KnowledgeProvider>>,
    store: Arc<dyn Store>,
    weights: parking_lot::RwLock<ScoringWeights>,
    thresholds: parking_lot::RwLock<ScoringThresholds>,
}

/// Outcome of aggregating dimension votes into a signal type, §4.6.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VoteTally {
    Long,
    Short,
    Neutral,
}

impl ScoringEngine {
    pub fn new(
        market_data: Arc<dyn MarketDataProvider>,
        knowledge: Option<Arc<dyn KnowledgeProvider>>,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            market_data,
            knowledge,
            store,
            weights: parking_lot::RwLock::new(ScoringWeights::default()),
            thresholds: parking_lot::RwLock::new(ScoringThresholds::default()),
        }
    }

    /// Hot-swap the weight set, §4.13. Mis-summed weights are accepted as-is; normalisation
    /// happens per-call in [`ScoringWeights::normalized_for`].
    pub fn set_weights(&self, weights: ScoringWeights) {
        *self.weights.write() = weights;
    }

    pub fn set_thresholds(&self, thresholds: ScoringThresholds) {
        *self.thresholds.write() = thresholds;
    }

    /// §4.6.1-§4.6.6: fetch market data for `symbol`, score it, build the trading plan, apply
    /// optional knowledge augmentation, and persist the resulting ACTIVE signal. Returns `None`
    /// when the signal does not clear the confidence/thresholds bar (§4.13) — a below-bar read
    /// is not an error, it is simply not actionable.
    #[instrument(skip(self), fields(symbol = %symbol))]
    pub async fn generate_signal(
        &self,
        symbol: &str,
        chain: Chain,
        contract_address: Option<String>,
        source: &str,
    ) -> EngineResult<Option<Signal>> {
        let data = self.market_data.get_comprehensive_data(symbol).await?;

        let thresholds = *self.thresholds.read();
        if data.open_interest_change_24h_pct.abs() < thresholds.min_oi_change_pct
            && data.funding_rate_current.abs() < thresholds.min_funding_rate
            && !data.is_dex_only
        {
            debug!(symbol, "market data below OI/funding activity threshold");
        }

        let dims = evaluate_all(&data);
        let dim_names: &[&str] = if data.is_dex_only { &DEX_ONLY_DIMENSION_NAMES } else { &DIMENSION_NAMES };
        let normalized = self.weights.read().normalized_for(dim_names);

        let mut confidence = 0.0;
        for dim in &dims {
            let w = normalized.get(dim.name).copied().unwrap_or(0.0);
            let contribution = if dim.score.is_finite() { dim.score } else { 0.0 };
            confidence += w * contribution;
        }
        confidence = confidence.clamp(0.0, 100.0);

        let long_votes = dims.iter().filter(|d| d.vote == SignalType::Long).count();
        let short_votes = dims.iter().filter(|d| d.vote == SignalType::Short).count();
        // Applied uniformly to both the 14-dimension and 12-dimension (DEX-only) variants, even
        // though this makes the DEX-only bar relatively harder to clear (§9 decision 4).
        let vote_threshold = 3;

        let tally = if long_votes >= vote_threshold {
            VoteTally::Long
        } else if short_votes >= vote_threshold {
            VoteTally::Short
        } else {
            VoteTally::Neutral
        };

        if tally == VoteTally::Neutral {
            debug!(symbol, long_votes, short_votes, "no dimension majority — signal stays neutral");
            return Ok(None);
        }

        if confidence < thresholds.min_confidence {
            debug!(symbol, confidence, "confidence below minimum threshold");
            return Ok(None);
        }

        let signal_type = match tally {
            VoteTally::Long => SignalType::Long,
            VoteTally::Short => SignalType::Short,
            VoteTally::Neutral => unreachable!("checked above"),
        };

        let (entry_min, entry_max, stop_loss, take_profits) = trading_plan(signal_type, data.current_price);

        let mut reasoning = dims
            .iter()
            .map(|d| format!("{}={:.0}:{}", d.name, d.score, d.description))
            .collect::<Vec<_>>()
            .join("; ");

        let mut final_confidence = confidence;
        let mut knowledge_note = None;
        if let Some(kp) = &self.knowledge {
            let market_condition = format!("confidence={confidence:.1} votes=L{long_votes}/S{short_votes}");
            match kp.query_historical_cases(symbol, &signal_type.to_string(), &market_condition).await {
                Ok(answer) if answer.success => {
                    let adjustment = parse_confidence_adjustment(&answer.answer);
                    final_confidence = (confidence + adjustment as f64).clamp(50.0, 95.0);
                    reasoning.push_str(&format!(" | knowledge[{}]: {}", answer.source, answer.answer));
                    knowledge_note = Some(answer.answer);
                }
                Ok(_) => debug!(symbol, "knowledge provider returned no answer"),
                Err(e) => warn!(symbol, error = %e, "knowledge provider call failed — proceeding with raw confidence"),
            }
        }

        let now = Utc::now();
        let signal = Signal {
            id: format!("sig_{}", Uuid::new_v4()),
            token_symbol: symbol.to_string(),
            chain,
            contract_address,
            signal_type,
            confidence: final_confidence,
            entry_min,
            entry_max,
            stop_loss,
            take_profits,
            current_price: data.current_price,
            expires_at: now + Duration::hours(SIGNAL_TTL_HOURS),
            status: SignalStatus::Active,
            source: source.to_string(),
            strategy_id: None,
            chat_id: None,
            is_alpha_token: !data.is_dex_only,
            reasoning,
            reject_reason: None,
            knowledge_note,
            created_at: now,
        };

        if let Err(e) = signal.validate_invariants() {
            warn!(symbol, error = %e, "generated signal failed invariant check — discarding");
            return Ok(None);
        }

        self.store.upsert_signal(signal.clone()).await?;
        info!(symbol, confidence = final_confidence, signal_type = %signal_type, "signal generated and persisted");
        Ok(Some(signal))
    }
}

/// §4.6.4: trading plan from current price and signal direction.
fn trading_plan(signal_type: SignalType, price: f64) -> (f64, f64, f64, Vec<f64>) {
    match signal_type {
        SignalType::Long | SignalType::Buy => (
            0.98 * price,
            1.01 * price,
            0.95 * price,
            vec![1.05 * price, 1.10 * price, 1.15 * price],
        ),
        SignalType::Short | SignalType::Sell | SignalType::Neutral => (
            0.99 * price,
            1.02 * price,
            1.05 * price,
            vec![0.95 * price, 0.90 * price, 0.85 * price],
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::market_data::Klines;
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::HashMap;

    struct StubMarketData(ComprehensiveData);

    #[async_trait]
    impl MarketDataProvider for StubMarketData {
        async fn get_comprehensive_data(&self, _symbol: &str) -> EngineResult<ComprehensiveData> {
            Ok(self.0.clone())
        }
        async fn get_batch_realtime_prices(&self, _symbols: &[String]) -> EngineResult<HashMap<String, f64>> {
            Ok(HashMap::new())
        }
        async fn get_all_alpha_tokens_including_dex(&self) -> EngineResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    fn bullish_data() -> ComprehensiveData {
        ComprehensiveData {
            symbol: "LINKUSDT".into(),
            current_price: 12.0,
            klines: Klines::default(),
            open_interest_current: 1_000_000.0,
            open_interest_change_24h_pct: 20.0,
            funding_rate_current: -0.01,
            market_cap: 10_000_000.0,
            volume_24h: 1_000_000.0,
            holders: 50_000,
            listing_time: Utc.timestamp_opt(0, 0).single().unwrap(),
            liquidity_usd: 2_000_000.0,
            price_high_24h: 12.5,
            price_low_24h: 11.0,
            circulating_supply: 800_000_000.0,
            total_supply: 1_000_000_000.0,
            is_dex_only: false,
        }
    }

    #[tokio::test]
    async fn neutral_market_produces_no_signal() {
        let data = ComprehensiveData { is_dex_only: false, ..bullish_data() };
        let mut neutral = data.clone();
        neutral.open_interest_change_24h_pct = 0.0;
        neutral.funding_rate_current = 0.0;
        neutral.liquidity_usd = 100_000.0;

        let engine = ScoringEngine::new(
            Arc::new(StubMarketData(neutral)),
            None,
            Arc::new(InMemoryStore::new()),
        );
        let result = engine.generate_signal("LINKUSDT", Chain::Bsc, None, "TOP_SIGNALS").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn strong_bullish_market_produces_long_signal() {
        let engine = ScoringEngine::new(
            Arc::new(StubMarketData(bullish_data())),
            None,
            Arc::new(InMemoryStore::new()),
        );
        let result = engine.generate_signal("LINKUSDT", Chain::Bsc, None, "TOP_SIGNALS").await.unwrap();
        let signal = result.expect("expected a signal");
        assert_eq!(signal.signal_type, SignalType::Long);
        assert!(signal.confidence >= 50.0);
    }

    #[test]
    fn trading_plan_long_orders_correctly() {
        let (entry_min, entry_max, sl, tps) = trading_plan(SignalType::Long, 100.0);
        assert!(entry_min < entry_max);
        assert!(sl < entry_min);
        assert!(tps[0] > entry_max);
    }

    #[test]
    fn trading_plan_short_orders_correctly() {
        let (entry_min, entry_max, sl, tps) = trading_plan(SignalType::Short, 100.0);
        assert!(entry_min < entry_max);
        assert!(sl > entry_max);
        assert!(tps[0] < entry_min);
    }
}
