//! Risk Controller (C6), §4.4. Generalises the reference circuit-breaker engine (four breakers,
//! automatic daily reset) from a single in-process capital ledger to the per-(user, strategy)
//! checks of §4.4: Store-backed balances, positions and stats replace the reference's in-memory
//! `Inner` state, but the "derive a status label from a handful of thresholds" shape survives.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::error::EngineResult;
use crate::external::dex_aggregator::DexAggregator;
use crate::model::{Signal, StrategyConfig};
use crate::store::Store;
use crate::types::SignalType;

const COOLDOWN_HOURS: i64 = 24;

/// One failed dimension of a risk check, §4.4.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskFinding {
    pub dimension: String,
    pub reason: String,
}

/// Outcome of [`RiskController::check_trade_risk`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RiskCheckResult {
    pub passed: bool,
    pub risks: Vec<RiskFinding>,
}

impl RiskCheckResult {
    fn fail(dimension: &str, reason: impl Into<String>) -> Self {
        Self { passed: false, risks: vec![RiskFinding { dimension: dimension.to_string(), reason: reason.into() }] }
    }

    fn ok() -> Self {
        Self { passed: true, risks: Vec::new() }
    }
}

pub struct RiskController {
    store: Arc<dyn Store>,
    dex: Arc<dyn DexAggregator>,
}

impl RiskController {
    pub fn new(store: Arc<dyn Store>, dex: Arc<dyn DexAggregator>) -> Self {
        Self { store, dex }
    }

    /// §4.4: strategies where enabled=true, not currently paused, follow_strategy matches the
    /// signal's source, and the token passes white/black-list. Filters to `strategy_id` if given.
    pub async fn get_enabled_strategies(
        &self,
        signal: &Signal,
        strategy_id: Option<&str>,
    ) -> EngineResult<Vec<StrategyConfig>> {
        let now = Utc::now();
        let all = self.store.list_enabled_strategy_configs().await?;
        let filtered = all
            .into_iter()
            .filter(|c| !c.is_paused(now))
            .filter(|c| c.follow_strategy.matches_source(&signal.source))
            .filter(|c| !c.blacklist.iter().any(|t| t == &signal.token_symbol))
            .filter(|c| c.whitelist.is_empty() || c.whitelist.iter().any(|t| t == &signal.token_symbol))
            .filter(|c| strategy_id.map(|id| c.id == id).unwrap_or(true))
            .collect();
        Ok(filtered)
    }

    /// §4.4: the 8-step check list, short-circuiting on first failure.
    #[instrument(skip(self, strategy, signal), fields(user_id = %strategy.user_id, token = %signal.token_symbol))]
    pub async fn check_trade_risk(
        &self,
        strategy: &StrategyConfig,
        signal: &Signal,
        amount: f64,
    ) -> EngineResult<RiskCheckResult> {
        // 1. Follow-strategy match.
        if !strategy.follow_strategy.matches_source(&signal.source) {
            return Ok(RiskCheckResult::fail(
                "follow_strategy",
                format!("{:?} does not match signal source {}", strategy.follow_strategy, signal.source),
            ));
        }

        // 2. Balance.
        if strategy.usdt_balance < amount {
            return Ok(RiskCheckResult::fail(
                "balance",
                format!("usdt_balance {:.2} < required {:.2}", strategy.usdt_balance, amount),
            ));
        }

        // 3. Liquidity — never bypassed, in test mode or otherwise (§9).
        if strategy.min_liquidity_usd > 0.0 {
            match &signal.contract_address {
                None => {
                    return Ok(RiskCheckResult::fail("liquidity", "no contract address to verify pool liquidity"));
                }
                Some(addr) => {
                    let liquidity = self.dex.pool_liquidity_usd(signal.chain, addr).await?;
                    if liquidity < strategy.min_liquidity_usd {
                        return Ok(RiskCheckResult::fail(
                            "liquidity",
                            format!("pool liquidity ${liquidity:.0} < minimum ${:.0}", strategy.min_liquidity_usd),
                        ));
                    }
                }
            }
        }

        // 4. Blacklist / whitelist.
        if strategy.blacklist.iter().any(|t| t == &signal.token_symbol) {
            return Ok(RiskCheckResult::fail("blacklist", format!("{} is blacklisted", signal.token_symbol)));
        }
        if !strategy.whitelist.is_empty() && !strategy.whitelist.iter().any(|t| t == &signal.token_symbol) {
            return Ok(RiskCheckResult::fail("whitelist", format!("{} is not in whitelist", signal.token_symbol)));
        }

        // 5. Per-token exposure cap.
        let user_holdings = self
            .store
            .list_holding_positions()
            .await?
            .into_iter()
            .filter(|p| p.user_id == strategy.user_id)
            .collect::<Vec<_>>();
        let portfolio_value: f64 = user_holdings.iter().map(|p| p.entry_amount_usdt).sum();
        let token_value: f64 = user_holdings
            .iter()
            .filter(|p| p.token_symbol == signal.token_symbol)
            .map(|p| p.entry_amount_usdt)
            .sum();
        // §3: existing HOLDING value for this token × 100 / portfolio — a pre-trade check against
        // current exposure, not a projection of where exposure would land after this trade.
        if portfolio_value > 0.0 {
            let exposure_pct = token_value * 100.0 / portfolio_value;
            if exposure_pct > strategy.single_token_max_percent {
                return Ok(RiskCheckResult::fail(
                    "exposure",
                    format!("{exposure_pct:.1}% of portfolio exceeds cap {:.1}%", strategy.single_token_max_percent),
                ));
            }
        }

        // 6. Position count.
        if user_holdings.len() as u32 >= strategy.max_positions {
            return Ok(RiskCheckResult::fail(
                "position_count",
                format!("{} holding positions >= max {}", user_holdings.len(), strategy.max_positions),
            ));
        }

        // 7. Circuit breaker: realised daily loss.
        if let Some(stats) = self.store.get_user_stats(&strategy.user_id).await? {
            let baseline = (strategy.trade_amount * strategy.max_positions as f64).max(1.0);
            let pnl_today_pct = stats.pnl_today_usdt / baseline * 100.0;
            if pnl_today_pct <= strategy.daily_loss_limit_pct {
                let paused_until = Utc::now() + Duration::hours(24);
                self.store.set_paused_until(&strategy.id, Some(paused_until)).await?;
                warn!(
                    user_id = %strategy.user_id,
                    pnl_today_pct,
                    limit = strategy.daily_loss_limit_pct,
                    "daily loss circuit breaker tripped — pausing 24h"
                );
                return Ok(RiskCheckResult::fail(
                    "circuit_breaker",
                    format!("daily pnl {pnl_today_pct:.1}% breached limit {:.1}%", strategy.daily_loss_limit_pct),
                ));
            }
        }

        // 8. Per-token cooldown.
        if self.token_in_cooldown(&strategy.user_id, &signal.token_symbol).await? {
            return Ok(RiskCheckResult::fail("cooldown", format!("{} traded within the last 24h", signal.token_symbol)));
        }

        Ok(RiskCheckResult::ok())
    }

    async fn token_in_cooldown(&self, user_id: &str, token_symbol: &str) -> EngineResult<bool> {
        let since: DateTime<Utc> = Utc::now() - Duration::hours(COOLDOWN_HOURS);

        let recent_execution = self
            .store
            .list_executions_for_token(token_symbol)
            .await?
            .into_iter()
            .any(|e| e.user_id == user_id && e.created_at >= since);
        if recent_execution {
            return Ok(true);
        }

        let recent_history = self
            .store
            .list_history_for_token_since(token_symbol, since)
            .await?
            .into_iter()
            .any(|h| h.user_id == user_id);
        Ok(recent_history)
    }

    /// Clears `paused_until` for a user's strategy configs, §4.4.
    pub async fn unpause_user(&self, user_id: &str) -> EngineResult<()> {
        let configs = self.store.list_strategy_configs_for_user(user_id).await?;
        for c in configs {
            self.store.set_paused_until(&c.id, None).await?;
        }
        info!(user_id, "user unpaused");
        Ok(())
    }
}

/// Dimensions a [`Signal`] of type NEUTRAL must never reach — guarded at the Strategy Agent
/// boundary (§4.3), not here; kept as a standalone helper so both call sites share the rule.
pub fn is_tradeable(signal_type: SignalType) -> bool {
    !matches!(signal_type, SignalType::Neutral)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Position, UserStats};
    use crate::store::InMemoryStore;
    use crate::types::{Chain, FollowStrategy, PositionStatus, SignalStatus, StopLossType, TakeProfitMode};
    use async_trait::async_trait;

    struct StubDex(f64);

    #[async_trait]
    impl DexAggregator for StubDex {
        async fn build_swap_tx(
            &self,
            _request: crate::external::dex_aggregator::SwapRequest,
        ) -> EngineResult<crate::external::dex_aggregator::SwapTx> {
            unimplemented!("not exercised by risk controller tests")
        }
        async fn pool_liquidity_usd(&self, _chain: Chain, _token_address: &str) -> EngineResult<f64> {
            Ok(self.0)
        }
    }

    fn sample_strategy(user_id: &str) -> StrategyConfig {
        let mut c = StrategyConfig::with_defaults(user_id, "0xwallet", "principal-1");
        c.usdt_balance = 1_000.0;
        c
    }

    fn sample_signal(token: &str) -> Signal {
        let now = Utc::now();
        Signal {
            id: "sig-1".into(),
            token_symbol: token.into(),
            chain: Chain::Bsc,
            contract_address: Some("0xabc".into()),
            signal_type: SignalType::Long,
            confidence: 80.0,
            entry_min: 9.8,
            entry_max: 10.1,
            stop_loss: 9.0,
            take_profits: vec![11.0],
            current_price: 10.0,
            expires_at: now + Duration::hours(24),
            status: SignalStatus::Active,
            source: "TOP_SIGNALS".into(),
            strategy_id: None,
            chat_id: None,
            is_alpha_token: false,
            reasoning: String::new(),
            reject_reason: None,
            knowledge_note: None,
            created_at: now,
        }
    }

    #[tokio::test]
    async fn passes_when_all_checks_clear() {
        let store = Arc::new(InMemoryStore::new());
        let controller = RiskController::new(store, Arc::new(StubDex(1_000_000.0)));
        let strategy = sample_strategy("U1");
        let signal = sample_signal("FOOUSDT");
        let result = controller.check_trade_risk(&strategy, &signal, 100.0).await.unwrap();
        assert!(result.passed);
    }

    #[tokio::test]
    async fn fails_on_insufficient_balance() {
        let store = Arc::new(InMemoryStore::new());
        let controller = RiskController::new(store, Arc::new(StubDex(1_000_000.0)));
        let mut strategy = sample_strategy("U1");
        strategy.usdt_balance = 10.0;
        let signal = sample_signal("FOOUSDT");
        let result = controller.check_trade_risk(&strategy, &signal, 100.0).await.unwrap();
        assert!(!result.passed);
        assert_eq!(result.risks[0].dimension, "balance");
    }

    #[tokio::test]
    async fn liquidity_check_is_never_bypassed() {
        let store = Arc::new(InMemoryStore::new());
        let controller = RiskController::new(store, Arc::new(StubDex(1_000.0)));
        let strategy = sample_strategy("U1");
        let signal = sample_signal("FOOUSDT");
        let result = controller.check_trade_risk(&strategy, &signal, 100.0).await.unwrap();
        assert!(!result.passed);
        assert_eq!(result.risks[0].dimension, "liquidity");
    }

    #[tokio::test]
    async fn fails_on_blacklisted_token() {
        let store = Arc::new(InMemoryStore::new());
        let controller = RiskController::new(store, Arc::new(StubDex(1_000_000.0)));
        let mut strategy = sample_strategy("U1");
        strategy.blacklist.push("FOOUSDT".to_string());
        let signal = sample_signal("FOOUSDT");
        let result = controller.check_trade_risk(&strategy, &signal, 100.0).await.unwrap();
        assert!(!result.passed);
        assert_eq!(result.risks[0].dimension, "blacklist");
    }

    #[tokio::test]
    async fn circuit_breaker_trips_and_pauses() {
        let store = Arc::new(InMemoryStore::new());
        let mut strategy = sample_strategy("U1");
        strategy.daily_loss_limit_pct = -5.0;
        store.upsert_strategy_config(strategy.clone()).await.unwrap();
        let mut stats = UserStats::empty("U1", Utc::now());
        stats.pnl_today_usdt = -50.0; // baseline = 100*3 = 300 -> -16.6%
        store.upsert_user_stats(stats).await.unwrap();

        let controller = RiskController::new(store.clone(), Arc::new(StubDex(1_000_000.0)));
        let signal = sample_signal("FOOUSDT");
        let result = controller.check_trade_risk(&strategy, &signal, 100.0).await.unwrap();
        assert!(!result.passed);
        assert_eq!(result.risks[0].dimension, "circuit_breaker");

        let refreshed = store.get_strategy_config(&strategy.id).await.unwrap().unwrap();
        assert!(refreshed.paused_until.is_some());
    }

    #[tokio::test]
    async fn cooldown_blocks_reentry_within_24h() {
        let store = Arc::new(InMemoryStore::new());
        let strategy = sample_strategy("U1");
        let signal = sample_signal("FOOUSDT");

        let position = Position {
            id: "pos-1".into(),
            user_id: "U1".into(),
            execution_id: "exec-1".into(),
            signal_id: signal.id.clone(),
            token_symbol: "FOOUSDT".into(),
            chain: Chain::Bsc,
            contract_address: Some("0xabc".into()),
            dex: "pancakeswap".into(),
            entry_price: 10.0,
            entry_amount_usdt: 100.0,
            entry_amount_token: 10.0,
            current_token_balance: 10.0,
            stop_loss_price: 9.0,
            take_profit_price: 11.0,
            atr_value: None,
            highest_price: 10.0,
            trailing_stop_activated: false,
            trailing_stop_price: None,
            stop_loss_type: StopLossType::Fixed,
            take_profit_mode: TakeProfitMode::OneTime,
            current_price: 10.0,
            unrealized_pnl_usdt: 0.0,
            unrealized_pnl_pct: 0.0,
            is_alpha_token: false,
            signal_source: "TOP_SIGNALS".into(),
            partial_sold_pct: 0.0,
            opened_at: Utc::now(),
            status: PositionStatus::Closed,
        };
        store.upsert_position(position).await.unwrap();

        let exec = crate::model::Execution {
            id: "exec-1".into(),
            user_id: "U1".into(),
            signal_id: signal.id.clone(),
            token_symbol: "FOOUSDT".into(),
            chain: Chain::Bsc,
            dex: "pancakeswap".into(),
            entry_amount_usdt: 100.0,
            entry_amount_token: 10.0,
            entry_price: 10.0,
            entry_tx_hash: Some("0xhash".into()),
            exit_tx_hash: None,
            exit_price: None,
            exit_amount_usdt: None,
            exit_type: None,
            profit_loss_usdt: 0.0,
            profit_loss_pct: 0.0,
            fees_usdt: 0.0,
            follow_strategy: FollowStrategy::TopSignals,
            strategy_id: None,
            is_alpha_token: false,
            signal_source: "TOP_SIGNALS".into(),
            batch_id: None,
            status: crate::types::ExecutionStatus::Confirmed,
            error_message: None,
            created_at: Utc::now(),
            entry_executed_at: Some(Utc::now()),
            exit_executed_at: None,
        };
        store.upsert_execution(exec).await.unwrap();

        let controller = RiskController::new(store, Arc::new(StubDex(1_000_000.0)));
        let result = controller.check_trade_risk(&strategy, &signal, 100.0).await.unwrap();
        assert!(!result.passed);
        assert_eq!(result.risks[0].dimension, "cooldown");
    }

    #[test]
    fn take_profit_mode_variants_exist() {
        let _ = TakeProfitMode::Staged;
    }

    #[tokio::test]
    async fn exposure_cap_is_evaluated_pre_trade_not_post_trade() {
        let store = Arc::new(InMemoryStore::new());
        let mut strategy = sample_strategy("U1");
        strategy.single_token_max_percent = 20.0;
        let signal = sample_signal("FOOUSDT");

        let existing_foo = Position {
            id: "pos-foo".into(),
            user_id: "U1".into(),
            execution_id: "exec-foo".into(),
            signal_id: signal.id.clone(),
            token_symbol: "FOOUSDT".into(),
            chain: Chain::Bsc,
            contract_address: Some("0xabc".into()),
            dex: "pancakeswap".into(),
            entry_price: 10.0,
            entry_amount_usdt: 300.0,
            entry_amount_token: 30.0,
            current_token_balance: 30.0,
            stop_loss_price: 9.0,
            take_profit_price: 11.0,
            atr_value: None,
            highest_price: 10.0,
            trailing_stop_activated: false,
            trailing_stop_price: None,
            stop_loss_type: StopLossType::Fixed,
            take_profit_mode: TakeProfitMode::OneTime,
            current_price: 10.0,
            unrealized_pnl_usdt: 0.0,
            unrealized_pnl_pct: 0.0,
            is_alpha_token: false,
            signal_source: "TOP_SIGNALS".into(),
            partial_sold_pct: 0.0,
            opened_at: Utc::now(),
            status: PositionStatus::Holding,
        };
        store.upsert_position(existing_foo.clone()).await.unwrap();

        let mut existing_bar = existing_foo.clone();
        existing_bar.id = "pos-bar".into();
        existing_bar.execution_id = "exec-bar".into();
        existing_bar.token_symbol = "BARUSDT".into();
        existing_bar.entry_amount_usdt = 700.0;
        store.upsert_position(existing_bar).await.unwrap();

        // FOOUSDT is already 300/1000 = 30% of the portfolio, over the 20% cap, using only
        // pre-trade holdings — the contemplated trade's own amount must not be folded in.
        let controller = RiskController::new(store, Arc::new(StubDex(1_000_000.0)));
        let result = controller.check_trade_risk(&strategy, &signal, 100.0).await.unwrap();
        assert!(!result.passed);
        assert_eq!(result.risks[0].dimension, "exposure");
    }
}
