//! Exit Monitor (C9), §4.8. Grounded on `exit/monitor.rs`'s poll loop shape (collect exits to
//! close without holding a lock across the close call) and `exit/triple_barrier.rs`'s
//! long/short-mirrored stop/take-profit evaluation, narrowed to the spec's three stop-loss modes
//! and two take-profit modes.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::error::EngineResult;
use crate::external::chain_gateway::{ChainGateway, SignRequest};
use crate::external::dex_aggregator::{DexAggregator, SwapRequest};
use crate::external::market_data::MarketDataProvider;
use crate::model::{History, Position};
use crate::store::Store;
use crate::types::{ExitType, PositionStatus, StopLossType, TakeProfitMode};

const POLL_INTERVAL: StdDuration = StdDuration::from_secs(15);
const TRAILING_ACTIVATION_GAIN_PCT: f64 = 5.0;
const TRAILING_TRAIL_PCT: f64 = 3.0;
const MAX_EXIT_RETRIES: u32 = 3;

/// STAGED take-profit tiers: (gain_pct_from_entry, cumulative_sell_pct). Each fires once,
/// `partial_sold_pct` tracks progress so a tier already crossed is not re-triggered.
const STAGED_TIERS: [(f64, f64); 3] = [(50.0, 30.0), (100.0, 60.0), (200.0, 100.0)];

pub struct ExitMonitor {
    store: Arc<dyn Store>,
    market_data: Arc<dyn MarketDataProvider>,
    dex: Arc<dyn DexAggregator>,
    chain_gateway: Arc<dyn ChainGateway>,
}

impl ExitMonitor {
    pub fn new(
        store: Arc<dyn Store>,
        market_data: Arc<dyn MarketDataProvider>,
        dex: Arc<dyn DexAggregator>,
        chain_gateway: Arc<dyn ChainGateway>,
    ) -> Self {
        Self { store, market_data, dex, chain_gateway }
    }

    /// Runs forever; intended to be spawned once at startup.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(e) = self.tick().await {
                warn!(error = %e, "exit monitor tick failed");
            }
        }
    }

    /// §4.8 steps 1-5, run once. Exposed separately from [`Self::run`] so tests can drive a
    /// single pass deterministically.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> EngineResult<()> {
        let positions = self.store.list_holding_positions().await?;
        if positions.is_empty() {
            debug!("no holding positions");
            return Ok(());
        }

        for mut position in positions {
            let current_price = match self.market_data.get_batch_realtime_prices(&[position.token_symbol.clone()]).await {
                Ok(prices) => match prices.get(&position.token_symbol) {
                    Some(&p) => p,
                    None => continue,
                },
                Err(e) => {
                    warn!(position_id = %position.id, error = %e, "price fetch failed — skipping tick for this position");
                    continue;
                }
            };

            position.current_price = current_price;
            position.unrealized_pnl_usdt =
                (current_price - position.entry_price) * position.current_token_balance;
            position.unrealized_pnl_pct =
                (current_price - position.entry_price) / position.entry_price * 100.0;
            position.highest_price = position.highest_price.max(current_price);
            maybe_activate_trailing_stop(&mut position, current_price);

            if let Some(exit_type) = evaluate_stop_loss(&position, current_price) {
                self.store.upsert_position(position.clone()).await?;
                self.execute_exit(&position, exit_type, "stop loss triggered").await?;
                continue;
            }

            if let Some((exit_type, sell_pct)) = evaluate_take_profit(&position, current_price) {
                self.store.upsert_position(position.clone()).await?;
                self.execute_partial_or_full_exit(&position, exit_type, sell_pct, "take profit triggered").await?;
                continue;
            }

            self.store.upsert_position(position).await?;
        }

        Ok(())
    }

    /// §4.9 SIGNAL_SELL path: invoked directly by the Strategy Agent's SELL fanout.
    pub async fn execute_exit(&self, position: &Position, exit_type: ExitType, reason: &str) -> EngineResult<()> {
        self.execute_partial_or_full_exit(position, exit_type, 100.0, reason).await
    }

    async fn execute_partial_or_full_exit(
        &self,
        position: &Position,
        exit_type: ExitType,
        sell_pct: f64,
        reason: &str,
    ) -> EngineResult<()> {
        let Some(mut execution) = self.store.get_execution(&position.execution_id).await? else {
            warn!(position_id = %position.id, "no execution row for position — cannot exit");
            return Ok(());
        };

        let sell_amount_token = position.current_token_balance * (sell_pct / 100.0);
        let token_address = position.contract_address.clone().unwrap_or_default();

        let swap_request = SwapRequest {
            chain: position.chain,
            token_in: position.token_symbol.clone(),
            token_out: position.chain.quote_asset().to_string(),
            token_out_address: token_address,
            amount_in: sell_amount_token,
            slippage_pct: 2.0,
            user_address: String::new(),
            is_four_meme: false,
        };

        let retry_count = retry_count_from_error(execution.error_message.as_deref());

        let swap_tx = match self.dex.build_swap_tx(swap_request).await {
            Ok(tx) => tx,
            Err(e) => return self.record_exit_failure(&mut execution, retry_count, &format!("exit quote failed: {e}")).await,
        };

        let sign_request = SignRequest {
            principal_id: String::new(),
            to: swap_tx.router_address,
            data: swap_tx.tx_data,
            value: swap_tx.value,
            chain_id: position.chain.chain_id(),
            gas: Some(swap_tx.gas_limit),
            gas_price: Some(swap_tx.gas_price),
        };

        let tx_hash = match self.chain_gateway.sign_transaction(sign_request).await {
            Ok(hash) => hash,
            Err(e) => return self.record_exit_failure(&mut execution, retry_count, &format!("exit submission failed: {e}")).await,
        };

        let now = Utc::now();
        let exit_value_usdt = sell_amount_token * position.current_price;
        let proceeds_pct_of_position = if position.entry_amount_token > 0.0 {
            sell_amount_token / position.entry_amount_token
        } else {
            1.0
        };
        let cost_basis = position.entry_amount_usdt * proceeds_pct_of_position;
        let pnl = exit_value_usdt - cost_basis;

        execution.exit_tx_hash = Some(tx_hash);
        execution.exit_price = Some(position.current_price);
        execution.exit_amount_usdt = Some(exit_value_usdt);
        execution.exit_type = Some(exit_type);
        execution.profit_loss_usdt += pnl;
        execution.profit_loss_pct = execution.profit_loss_usdt / execution.entry_amount_usdt * 100.0;
        execution.exit_executed_at = Some(now);
        execution.error_message = None;

        let mut updated_position = position.clone();
        updated_position.current_token_balance -= sell_amount_token;
        updated_position.partial_sold_pct += sell_pct;

        let fully_closed = sell_pct >= 100.0 || updated_position.current_token_balance <= 1e-9;

        if fully_closed {
            execution.status = crate::types::ExecutionStatus::Exited;
            updated_position.status = PositionStatus::Closed;
            self.store.insert_history(History {
                id: format!("hist_{}", execution.id),
                execution_id: execution.id.clone(),
                user_id: execution.user_id.clone(),
                token_symbol: execution.token_symbol.clone(),
                entry_price: execution.entry_price,
                exit_price: execution.exit_price.unwrap_or(position.current_price),
                profit_loss_usdt: execution.profit_loss_usdt,
                profit_loss_pct: execution.profit_loss_pct,
                fees_usdt: execution.fees_usdt,
                exit_type,
                holding_duration_seconds: (now - position.opened_at).num_seconds(),
                closed_at: now,
            })
            .await?;
            self.store.delete_position(&position.id).await?;
        } else {
            updated_position.status = PositionStatus::Holding;
            self.store.upsert_position(updated_position).await?;
        }

        self.store.upsert_execution(execution).await?;
        info!(position_id = %position.id, exit_type = ?exit_type, sell_pct, reason, "exit executed");
        Ok(())
    }

    async fn record_exit_failure(
        &self,
        execution: &mut crate::model::Execution,
        prior_retry_count: u32,
        message: &str,
    ) -> EngineResult<()> {
        let retry_count = prior_retry_count + 1;
        execution.error_message = Some(format!("[Retry {retry_count}] {message}"));
        if retry_count >= MAX_EXIT_RETRIES {
            execution.status = crate::types::ExecutionStatus::Failed;
            warn!(execution_id = %execution.id, retry_count, "exit exhausted retries — marking failed");
        }
        self.store.upsert_execution(execution.clone()).await?;
        Ok(())
    }
}

fn retry_count_from_error(error_message: Option<&str>) -> u32 {
    error_message
        .and_then(|m| m.strip_prefix("[Retry "))
        .and_then(|m| m.split(']').next())
        .and_then(|n| n.trim().parse::<u32>().ok())
        .unwrap_or(0)
}

/// §4.8.4: stop-loss evaluation by `stop_loss_type`. `DYNAMIC` is not representable here — it is
/// mapped to `Fixed` at the ingress boundary (§9), so every live position already carries a
/// concrete type.
fn evaluate_stop_loss(position: &Position, current_price: f64) -> Option<ExitType> {
    match position.stop_loss_type {
        StopLossType::Fixed | StopLossType::Atr => {
            if current_price <= position.stop_loss_price {
                Some(ExitType::StopLoss)
            } else {
                None
            }
        }
        StopLossType::Trailing => {
            let gain_pct = (position.highest_price - position.entry_price) / position.entry_price * 100.0;
            if !position.trailing_stop_activated && gain_pct >= TRAILING_ACTIVATION_GAIN_PCT {
                return None; // activation is applied by the caller before persisting; see tests
            }
            let trail_price = position.trailing_stop_price.unwrap_or(position.stop_loss_price);
            if position.trailing_stop_activated && current_price <= trail_price {
                Some(ExitType::StopLoss)
            } else {
                None
            }
        }
        StopLossType::TimeDecay => {
            if current_price <= position.stop_loss_price {
                Some(ExitType::StopLoss)
            } else {
                None
            }
        }
    }
}

/// §4.8.5: take-profit evaluation. Returns `(exit_type, sell_pct_of_remaining_balance)`.
fn evaluate_take_profit(position: &Position, current_price: f64) -> Option<(ExitType, f64)> {
    match position.take_profit_mode {
        TakeProfitMode::OneTime => {
            if current_price >= position.take_profit_price {
                Some((ExitType::TakeProfit, 100.0))
            } else {
                None
            }
        }
        TakeProfitMode::Staged => {
            let gain_pct = (current_price - position.entry_price) / position.entry_price * 100.0;
            for (tier_gain, cumulative_pct) in STAGED_TIERS {
                if gain_pct >= tier_gain && position.partial_sold_pct < cumulative_pct {
                    let remaining_to_sell = cumulative_pct - position.partial_sold_pct;
                    return Some((ExitType::TakeProfitPartial, remaining_to_sell));
                }
            }
            None
        }
    }
}

/// Activates the trailing stop in-place once the gain threshold is crossed; called by the tick
/// loop before [`evaluate_stop_loss`] so the very tick that crosses the threshold cannot also
/// exit on it.
pub fn maybe_activate_trailing_stop(position: &mut Position, current_price: f64) {
    if position.stop_loss_type != StopLossType::Trailing || position.trailing_stop_activated {
        return;
    }
    let gain_pct = (current_price - position.entry_price) / position.entry_price * 100.0;
    if gain_pct >= TRAILING_ACTIVATION_GAIN_PCT {
        position.trailing_stop_activated = true;
        position.trailing_stop_price = Some(position.highest_price.max(current_price) * (1.0 - TRAILING_TRAIL_PCT / 100.0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Chain;

    fn sample_position(stop_loss_type: StopLossType) -> Position {
        Position {
            id: "pos-1".into(),
            user_id: "U1".into(),
            execution_id: "exec-1".into(),
            signal_id: "sig-1".into(),
            token_symbol: "FOOUSDT".into(),
            chain: Chain::Bsc,
            contract_address: Some("0xabc".into()),
            dex: "aggregator".into(),
            entry_price: 10.0,
            entry_amount_usdt: 100.0,
            entry_amount_token: 10.0,
            current_token_balance: 10.0,
            stop_loss_price: 9.5,
            take_profit_price: 11.0,
            atr_value: None,
            highest_price: 10.0,
            trailing_stop_activated: false,
            trailing_stop_price: None,
            stop_loss_type,
            take_profit_mode: TakeProfitMode::OneTime,
            current_price: 10.0,
            unrealized_pnl_usdt: 0.0,
            unrealized_pnl_pct: 0.0,
            is_alpha_token: false,
            signal_source: "TOP_SIGNALS".into(),
            partial_sold_pct: 0.0,
            opened_at: Utc::now(),
            status: PositionStatus::Holding,
        }
    }

    #[test]
    fn fixed_stop_loss_triggers_below_price() {
        let position = sample_position(StopLossType::Fixed);
        assert_eq!(evaluate_stop_loss(&position, 9.4), Some(ExitType::StopLoss));
        assert_eq!(evaluate_stop_loss(&position, 9.6), None);
    }

    #[test]
    fn trailing_stop_requires_activation_first() {
        let mut position = sample_position(StopLossType::Trailing);
        // Below activation gain: no trigger even if price crashes toward entry's stop floor.
        assert_eq!(evaluate_stop_loss(&position, 9.0), None);

        position.highest_price = 10.6; // +6% gain, past the 5% activation threshold
        maybe_activate_trailing_stop(&mut position, 10.6);
        assert!(position.trailing_stop_activated);
        let trail = position.trailing_stop_price.unwrap();

        assert_eq!(evaluate_stop_loss(&position, trail - 0.01), Some(ExitType::StopLoss));
        assert_eq!(evaluate_stop_loss(&position, trail + 0.5), None);
    }

    #[test]
    fn one_time_take_profit_sells_everything() {
        let mut position = sample_position(StopLossType::Fixed);
        position.take_profit_price = 11.0;
        assert_eq!(evaluate_take_profit(&position, 11.5), Some((ExitType::TakeProfit, 100.0)));
        assert_eq!(evaluate_take_profit(&position, 10.5), None);
    }

    #[test]
    fn staged_take_profit_fires_tiers_once_each() {
        let mut position = sample_position(StopLossType::Fixed);
        position.take_profit_mode = TakeProfitMode::Staged;
        position.take_profit_price = 999.0; // irrelevant in staged mode

        let first = evaluate_take_profit(&position, 15.0); // +50%
        assert_eq!(first, Some((ExitType::TakeProfitPartial, 30.0)));
        position.partial_sold_pct = 30.0;

        // Still within tier 1's range, already sold — no re-trigger.
        assert_eq!(evaluate_take_profit(&position, 15.0), None);

        let second = evaluate_take_profit(&position, 20.0); // +100%
        assert_eq!(second, Some((ExitType::TakeProfitPartial, 30.0)));
    }
}
