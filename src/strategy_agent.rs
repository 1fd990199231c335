//! Strategy Agent (C12), §4.3 + §4.9. The top-level controller: accepts freshly scored signals,
//! orchestrates Risk Controller → Price Watcher (§4.4→§4.5), and fans out SELL signals directly to
//! the Exit Monitor. Grounded on `src/strategy.rs`'s gating-pipeline composition (run each gate in
//! order, stop at the first rejection, record why) and `src/main.rs`'s top-level
//! initialize/shutdown/status shape.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{info, instrument, warn};

use crate::error::EngineResult;
use crate::exit_monitor::ExitMonitor;
use crate::model::{Signal, StrategyConfig, UserStats};
use crate::price_watcher::PriceWatcher;
use crate::risk::RiskController;
use crate::store::Store;
use crate::types::{ExitType, PositionStatus, SignalStatus, SignalType};

const SELL_FANOUT_GAP: StdDuration = StdDuration::from_secs(2);

pub struct StrategyAgent {
    store: Arc<dyn Store>,
    risk: Arc<RiskController>,
    price_watcher: Arc<PriceWatcher>,
    exit_monitor: Arc<ExitMonitor>,
    running: RwLock<bool>,
}

impl StrategyAgent {
    pub fn new(
        store: Arc<dyn Store>,
        risk: Arc<RiskController>,
        price_watcher: Arc<PriceWatcher>,
        exit_monitor: Arc<ExitMonitor>,
    ) -> Self {
        Self { store, risk, price_watcher, exit_monitor, running: RwLock::new(false) }
    }

    /// §4.3: idempotent startup recovery — restarts Price Watcher for ACTIVE LONG/BUY signals
    /// whose at-least-one strategy still passes a full risk check, and marks the service running.
    /// Restarting Exit Monitor / Transaction Monitor reconciliation is driven by the Scheduler
    /// (C13), which owns their `run()` loops; this only re-arms Price Watcher monitors, the one
    /// piece of in-memory state this component itself owns.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> EngineResult<()> {
        if *self.running.read() {
            return Ok(());
        }

        let now = Utc::now();
        for signal in self.store.list_active_signals().await? {
            if signal.is_expired(now) {
                continue;
            }
            if !matches!(signal.signal_type, SignalType::Long | SignalType::Buy) {
                continue;
            }
            let candidates = self.risk.get_enabled_strategies(&signal, signal.strategy_id.as_deref()).await?;
            let mut passing = Vec::new();
            for strategy in candidates {
                let result = self.risk.check_trade_risk(&strategy, &signal, strategy.trade_amount).await?;
                if result.passed {
                    passing.push(strategy);
                }
            }
            if !passing.is_empty() {
                self.price_watcher.start_monitoring(signal, passing);
            }
        }

        *self.running.write() = true;
        info!("strategy agent initialized");
        Ok(())
    }

    /// §4.3 `handleNewSignal`: the sole entry point for ACTIVE signals. Any error is logged and
    /// swallowed — the caller never sees a hard failure, the signal is simply retried on the next
    /// monitor tick per the spec's failure semantics.
    #[instrument(skip(self, signal), fields(signal_id = %signal.id, token = %signal.token_symbol))]
    pub async fn handle_new_signal(&self, mut signal: Signal) {
        if let Err(e) = self.try_handle_new_signal(&mut signal).await {
            warn!(signal_id = %signal.id, error = %e, "handleNewSignal failed — will retry on next tick");
        }
    }

    async fn try_handle_new_signal(&self, signal: &mut Signal) -> EngineResult<()> {
        if signal.signal_type == SignalType::Neutral {
            return self.reject(signal, "signal type is NEUTRAL").await;
        }
        if signal.signal_type == SignalType::Short {
            return self.reject(signal, "signal type is SHORT").await;
        }
        if signal.signal_type == SignalType::Sell {
            return self.sell_fanout(signal).await;
        }
        if signal.contract_address.is_none() {
            return self.reject(signal, "no contract address — treated as CEX-only").await;
        }

        let candidates = self.risk.get_enabled_strategies(signal, signal.strategy_id.as_deref()).await?;
        if candidates.is_empty() {
            return self.reject(signal, "no enabled strategy matches this signal").await;
        }

        let mut passing = Vec::new();
        for strategy in candidates {
            let result = self.risk.check_trade_risk(&strategy, signal, strategy.trade_amount).await?;
            if result.passed {
                passing.push(strategy);
            } else {
                info!(
                    user_id = %strategy.user_id,
                    risks = ?result.risks,
                    "strategy failed risk check for this signal"
                );
            }
        }

        if passing.is_empty() {
            return self.reject(signal, "no enabled strategy matches this signal").await;
        }

        self.price_watcher.start_monitoring(signal.clone(), passing);
        Ok(())
    }

    async fn reject(&self, signal: &mut Signal, reason: &str) -> EngineResult<()> {
        signal.status = SignalStatus::Rejected;
        signal.reject_reason = Some(reason.to_string());
        self.store.upsert_signal(signal.clone()).await?;
        info!(signal_id = %signal.id, reason, "signal rejected");
        Ok(())
    }

    /// §4.9: resolve subscribed users by, in priority: explicit `strategy_id`; else `chat_id`
    /// joined to `telegram_group_configs`; else a broad `signal_source=TELEGRAM` match. Exit every
    /// matching HOLDING position on the signal's `(token_symbol, chain)` sequentially, 2s apart.
    async fn sell_fanout(&self, signal: &Signal) -> EngineResult<()> {
        let subscribed_user_ids: Vec<String> = if let Some(strategy_id) = &signal.strategy_id {
            self.store
                .get_strategy_config(strategy_id)
                .await?
                .map(|c| vec![c.user_id])
                .unwrap_or_default()
        } else if let Some(chat_id) = &signal.chat_id {
            match self.store.get_telegram_group_config(chat_id).await? {
                Some(group) => group.user_ids,
                None => Vec::new(),
            }
        } else if signal.source == "TELEGRAM" {
            self.store
                .list_enabled_strategy_configs()
                .await?
                .into_iter()
                .filter(|c| c.follow_strategy.matches_source("TELEGRAM"))
                .map(|c| c.user_id)
                .collect()
        } else {
            Vec::new()
        };

        let positions: Vec<_> = self
            .store
            .list_holding_positions_for_token(&signal.token_symbol)
            .await?
            .into_iter()
            .filter(|p| p.chain == signal.chain && p.status == PositionStatus::Holding)
            .filter(|p| subscribed_user_ids.iter().any(|u| u == &p.user_id))
            .collect();

        info!(signal_id = %signal.id, count = positions.len(), "SELL signal fanout");

        let mut first = true;
        for position in &positions {
            if !first {
                tokio::time::sleep(SELL_FANOUT_GAP).await;
            }
            first = false;
            if let Err(e) = self.exit_monitor.execute_exit(position, ExitType::SignalSell, "SIGNAL_SELL").await {
                warn!(position_id = %position.id, error = %e, "SELL fanout exit failed");
            }
        }
        Ok(())
    }

    /// §4.3 `createUserConfig`: upsert with the spec's compiled-in defaults.
    #[instrument(skip(self))]
    pub async fn create_user_config(
        &self,
        user_id: &str,
        wallet_address: &str,
        principal_id: &str,
        overrides: impl FnOnce(&mut StrategyConfig),
    ) -> EngineResult<StrategyConfig> {
        let mut config = StrategyConfig::with_defaults(user_id, wallet_address, principal_id);
        overrides(&mut config);
        config.validate_invariants().map_err(crate::error::EngineError::validation)?;
        self.store.upsert_strategy_config(config.clone()).await?;
        Ok(config)
    }

    #[instrument(skip(self))]
    pub async fn toggle_auto_trade(&self, config_id: &str, enabled: bool) -> EngineResult<()> {
        if let Some(mut config) = self.store.get_strategy_config(config_id).await? {
            config.enabled = enabled;
            self.store.upsert_strategy_config(config).await?;
        }
        Ok(())
    }

    pub async fn get_user_stats(&self, user_id: &str) -> EngineResult<UserStats> {
        Ok(self.store.get_user_stats(user_id).await?.unwrap_or_else(|| UserStats::empty(user_id, Utc::now())))
    }

    pub async fn shutdown(&self) {
        self.price_watcher.stop_all();
        *self.running.write() = false;
        info!("strategy agent shut down");
    }

    pub fn get_status(&self) -> bool {
        *self.running.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::chain_gateway::{ChainGateway, SignRequest, TxStatus};
    use crate::external::dex_aggregator::{DexAggregator, SwapRequest, SwapTx};
    use crate::external::market_data::MarketDataProvider;
    use crate::model::Position;
    use crate::store::InMemoryStore;
    use crate::types::{Chain, FollowStrategy, StopLossType, TakeProfitMode};
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct StubDex;
    #[async_trait]
    impl DexAggregator for StubDex {
        async fn build_swap_tx(&self, _r: SwapRequest) -> EngineResult<SwapTx> {
            Ok(SwapTx {
                router_address: "0xrouter".into(),
                tx_data: "0x".into(),
                value: "0".into(),
                gas_limit: 21_000,
                gas_price: "5".into(),
                estimated_slippage_pct: 0.1,
                token_address: "0xabc".into(),
                needs_approval: false,
                approval_tx_data: None,
            })
        }
        async fn pool_liquidity_usd(&self, _chain: Chain, _token_address: &str) -> EngineResult<f64> {
            Ok(1_000_000.0)
        }
    }

    struct StubGateway;
    #[async_trait]
    impl ChainGateway for StubGateway {
        async fn sign_transaction(&self, _request: SignRequest) -> EngineResult<String> {
            Ok("0xhash".into())
        }
        async fn get_transaction_status(&self, _hash: &str, _chain: Chain) -> EngineResult<TxStatus> {
            Ok(TxStatus::Success)
        }
    }

    struct StubMarketData;
    #[async_trait]
    impl MarketDataProvider for StubMarketData {
        async fn get_comprehensive_data(&self, _symbol: &str) -> EngineResult<crate::external::market_data::ComprehensiveData> {
            unimplemented!()
        }
        async fn get_batch_realtime_prices(&self, symbols: &[String]) -> EngineResult<HashMap<String, f64>> {
            Ok(symbols.iter().map(|s| (s.clone(), 10.0)).collect())
        }
        async fn get_all_alpha_tokens_including_dex(&self) -> EngineResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    fn sample_signal(signal_type: SignalType) -> Signal {
        let now = Utc::now();
        Signal {
            id: "sig-1".into(),
            token_symbol: "FOOUSDT".into(),
            chain: Chain::Bsc,
            contract_address: Some("0xabc".into()),
            signal_type,
            confidence: 80.0,
            entry_min: 9.8,
            entry_max: 10.1,
            stop_loss: 9.0,
            take_profits: vec![11.0],
            current_price: 10.0,
            expires_at: now + chrono::Duration::hours(24),
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

    fn agent(store: Arc<InMemoryStore>) -> StrategyAgent {
        let dex = Arc::new(StubDex);
        let gateway = Arc::new(StubGateway);
        let market_data = Arc::new(StubMarketData);
        let risk = Arc::new(RiskController::new(store.clone(), dex.clone()));
        let batch_executor = Arc::new(crate::batch_executor::BatchExecutor::new(store.clone(), dex.clone(), gateway.clone()));
        let price_watcher = Arc::new(PriceWatcher::new(store.clone(), market_data.clone(), batch_executor));
        let exit_monitor = Arc::new(ExitMonitor::new(store.clone(), market_data, dex, gateway));
        StrategyAgent::new(store, risk, price_watcher, exit_monitor)
    }

    #[tokio::test]
    async fn neutral_signal_is_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let signal = sample_signal(SignalType::Neutral);
        store.upsert_signal(signal.clone()).await.unwrap();
        let agent = agent(store.clone());
        agent.handle_new_signal(signal.clone()).await;

        let stored = store.get_signal(&signal.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SignalStatus::Rejected);
        assert_eq!(stored.reject_reason.as_deref(), Some("signal type is NEUTRAL"));
    }

    #[tokio::test]
    async fn short_signal_is_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let signal = sample_signal(SignalType::Short);
        store.upsert_signal(signal.clone()).await.unwrap();
        let agent = agent(store.clone());
        agent.handle_new_signal(signal.clone()).await;

        let stored = store.get_signal(&signal.id).await.unwrap().unwrap();
        assert_eq!(stored.reject_reason.as_deref(), Some("signal type is SHORT"));
    }

    #[tokio::test]
    async fn missing_contract_address_is_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let mut signal = sample_signal(SignalType::Long);
        signal.contract_address = None;
        store.upsert_signal(signal.clone()).await.unwrap();
        let agent = agent(store.clone());
        agent.handle_new_signal(signal.clone()).await;

        let stored = store.get_signal(&signal.id).await.unwrap().unwrap();
        assert_eq!(stored.reject_reason.as_deref(), Some("no contract address — treated as CEX-only"));
    }

    #[tokio::test]
    async fn no_matching_strategy_is_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let signal = sample_signal(SignalType::Long);
        store.upsert_signal(signal.clone()).await.unwrap();
        let agent = agent(store.clone());
        agent.handle_new_signal(signal.clone()).await;

        let stored = store.get_signal(&signal.id).await.unwrap().unwrap();
        assert_eq!(stored.reject_reason.as_deref(), Some("no enabled strategy matches this signal"));
    }

    #[tokio::test]
    async fn passing_signal_starts_price_watcher_monitoring() {
        let store = Arc::new(InMemoryStore::new());
        let signal = sample_signal(SignalType::Long);
        store.upsert_signal(signal.clone()).await.unwrap();

        let mut config = StrategyConfig::with_defaults("U1", "0xwallet", "principal-1");
        config.usdt_balance = 1_000.0;
        store.upsert_strategy_config(config).await.unwrap();

        let agent = agent(store.clone());
        agent.handle_new_signal(signal.clone()).await;

        let stored = store.get_signal(&signal.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SignalStatus::Active);
        assert!(agent.price_watcher.get_monitor_status().iter().any(|m| m.signal_id == signal.id));
    }

    #[tokio::test]
    async fn sell_fanout_exits_matching_holding_position() {
        let store = Arc::new(InMemoryStore::new());
        let sell_signal = sample_signal(SignalType::Sell);

        let position = Position {
            id: "pos-1".into(),
            user_id: "U1".into(),
            execution_id: "exec-1".into(),
            signal_id: "sig-entry".into(),
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
            status: PositionStatus::Holding,
        };
        store.upsert_position(position.clone()).await.unwrap();

        let mut config = StrategyConfig::with_defaults("U1", "0xwallet", "principal-1");
        config.follow_strategy = FollowStrategy::Telegram;
        store.upsert_strategy_config(config).await.unwrap();

        let mut execution = crate::model::Execution::new_pending("U1", &sell_signal, 100.0, Utc::now());
        execution.id = "exec-1".into();
        execution.status = crate::types::ExecutionStatus::Holding;
        store.upsert_execution(execution).await.unwrap();

        let mut sell = sell_signal.clone();
        sell.source = "TELEGRAM".to_string();

        let agent = agent(store.clone());
        agent.handle_new_signal(sell).await;

        assert!(store.get_position_for_execution("exec-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sell_fanout_resolves_via_telegram_group_chat_id() {
        let store = Arc::new(InMemoryStore::new());
        let sell_signal = sample_signal(SignalType::Sell);

        let position = Position {
            id: "pos-2".into(),
            user_id: "U2".into(),
            execution_id: "exec-2".into(),
            signal_id: "sig-entry".into(),
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
            status: PositionStatus::Holding,
        };
        store.upsert_position(position.clone()).await.unwrap();

        let mut execution = crate::model::Execution::new_pending("U2", &sell_signal, 100.0, Utc::now());
        execution.id = "exec-2".into();
        execution.status = crate::types::ExecutionStatus::Holding;
        store.upsert_execution(execution).await.unwrap();

        store
            .upsert_telegram_group_config(crate::model::TelegramGroupConfig {
                chat_id: "chat-77".into(),
                user_ids: vec!["U2".into()],
            })
            .await
            .unwrap();

        let mut sell = sell_signal.clone();
        sell.source = "TELEGRAM_GROUP".to_string();
        sell.chat_id = Some("chat-77".to_string());

        let agent = agent(store.clone());
        agent.handle_new_signal(sell).await;

        assert!(store.get_position_for_execution("exec-2").await.unwrap().is_none());
    }
}
