//! Scheduler (C13), §4.12. Six named periodic jobs, each on its own timer and independently
//! skippable on overlap. Grounded on `main.rs`'s pattern of several independent `tokio::spawn`
//! interval loops (one per concern) rather than a single cron-style dispatcher.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use tracing::{info, warn};

use crate::data_sync::DataSync;
use crate::external::market_data::MarketDataProvider;
use crate::store::Store;
use crate::transaction_monitor::TransactionMonitor;

const LIQUIDITY_WHITELIST_INTERVAL: StdDuration = StdDuration::from_secs(3_600);
const TX_MONITOR_INTERVAL: StdDuration = StdDuration::from_secs(30);
const CIRCUIT_BREAKER_EXPIRY_INTERVAL: StdDuration = StdDuration::from_secs(600);
const CONSISTENCY_REPAIR_INTERVAL: StdDuration = StdDuration::from_secs(300);
const HELD_TOKEN_PRICE_REFRESH_INTERVAL: StdDuration = StdDuration::from_secs(60);

pub struct Scheduler {
    store: Arc<dyn Store>,
    market_data: Arc<dyn MarketDataProvider>,
    tx_monitor: Arc<TransactionMonitor>,
    data_sync: Arc<DataSync>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn Store>,
        market_data: Arc<dyn MarketDataProvider>,
        tx_monitor: Arc<TransactionMonitor>,
        data_sync: Arc<DataSync>,
    ) -> Self {
        Self { store, market_data, tx_monitor, data_sync }
    }

    /// Spawns all six named jobs and returns immediately; each job runs forever on its own
    /// timer until the process exits.
    pub fn start(self: &Arc<Self>) {
        self.spawn_job("liquidity_whitelist_refresh", LIQUIDITY_WHITELIST_INTERVAL, {
            let this = self.clone();
            move || {
                let this = this.clone();
                async move { this.refresh_liquidity_whitelist().await }
            }
        });

        self.spawn_job("transaction_monitor_sweep", TX_MONITOR_INTERVAL, {
            let this = self.clone();
            move || {
                let this = this.clone();
                async move { this.tx_monitor.tick().await.map_err(|e| e.to_string()) }
            }
        });

        self.spawn_job("circuit_breaker_expiry_unpause", CIRCUIT_BREAKER_EXPIRY_INTERVAL, {
            let this = self.clone();
            move || {
                let this = this.clone();
                async move { this.unpause_expired_strategies().await }
            }
        });

        self.spawn_job("consistency_repair", CONSISTENCY_REPAIR_INTERVAL, {
            let this = self.clone();
            move || {
                let this = this.clone();
                async move { this.data_sync.check_and_repair_data_consistency().await.map_err(|e| e.to_string()) }
            }
        });

        self.spawn_job("held_token_price_refresh", HELD_TOKEN_PRICE_REFRESH_INTERVAL, {
            let this = self.clone();
            move || {
                let this = this.clone();
                async move { this.refresh_held_token_prices().await }
            }
        });

        let data_sync = self.data_sync.clone();
        tokio::spawn(async move {
            match data_sync.sync_existing_positions().await {
                Ok(recovered) => info!(recovered, "data-sync startup sweep complete"),
                Err(e) => warn!(error = %e, "data-sync startup sweep failed"),
            }
        });
    }

    /// Generic named-job runner: a fresh `AtomicBool` gate per job skips a tick that would
    /// otherwise overlap a still-running previous one, per §4.12 "skippable on overlap".
    fn spawn_job<F, Fut>(&self, name: &'static str, interval: StdDuration, mut make_job: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<(), String>> + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(false));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if running.swap(true, Ordering::SeqCst) {
                    warn!(job = name, "previous tick still running — skipping this one");
                    continue;
                }
                let result = make_job().await;
                running.store(false, Ordering::SeqCst);
                if let Err(e) = result {
                    warn!(job = name, error = %e, "scheduled job failed");
                }
            }
        });
    }

    /// §4.12: refreshes the set of tokens known to carry sufficient on-chain liquidity to be
    /// eligible at all, sourced from the Market Data Provider's alpha-token sweep (§6). The engine
    /// has no separate persisted whitelist table — eligibility is re-checked live by the Risk
    /// Controller's liquidity gate (§4.4 step 3) on every trade, so this job's role is limited to
    /// logging drift for observability rather than mutating Store state.
    async fn refresh_liquidity_whitelist(&self) -> Result<(), String> {
        let tokens = self.market_data.get_all_alpha_tokens_including_dex().await.map_err(|e| e.to_string())?;
        info!(count = tokens.len(), "liquidity whitelist refreshed");
        Ok(())
    }

    /// §4.4/§4.12: any strategy config whose 24h pause has elapsed is cleared directly (not via
    /// `unpause_user`, which clears unconditionally for every config of a user regardless of
    /// whether its pause has actually expired).
    async fn unpause_expired_strategies(&self) -> Result<(), String> {
        let now = Utc::now();
        let configs = self.store.list_enabled_strategy_configs().await.map_err(|e| e.to_string())?;
        let mut cleared = 0u32;
        for config in configs {
            if let Some(paused_until) = config.paused_until {
                if paused_until <= now {
                    self.store.set_paused_until(&config.id, None).await.map_err(|e| e.to_string())?;
                    cleared += 1;
                }
            }
        }
        if cleared > 0 {
            info!(cleared, "circuit-breaker pauses expired and cleared");
        }
        Ok(())
    }

    /// §4.12: a lighter-weight price-only refresh for held positions, distinct from Exit
    /// Monitor's own 15s stop-loss/take-profit evaluation loop (§4.8) — keeps `current_price` and
    /// unrealised pnl fresh for dashboards/stats even on a tick where no exit condition is met.
    async fn refresh_held_token_prices(&self) -> Result<(), String> {
        let positions = self.store.list_holding_positions().await.map_err(|e| e.to_string())?;
        if positions.is_empty() {
            return Ok(());
        }
        let symbols: Vec<String> = positions.iter().map(|p| p.token_symbol.clone()).collect();
        let prices = self.market_data.get_batch_realtime_prices(&symbols).await.map_err(|e| e.to_string())?;
        for mut position in positions {
            if let Some(&price) = prices.get(&position.token_symbol) {
                position.current_price = price;
                position.unrealized_pnl_usdt = (price - position.entry_price) * position.current_token_balance;
                position.unrealized_pnl_pct = (price - position.entry_price) / position.entry_price * 100.0;
                self.store.upsert_position(position).await.map_err(|e| e.to_string())?;
            }
        }
        Ok(())
    }
}
