//! Data Sync (C11), §4.11. Grounded on `reconcile.rs`'s "log drift, never auto-correct against
//! the exchange" stance (here: auto-correct internal rows, but only ever in a direction derivable
//! from those same rows — never from chain state) and `position_engine.rs`'s Position
//! construction-on-entry shape.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use tracing::{info, instrument, warn};

use crate::error::EngineResult;
use crate::external::chain_gateway::{ChainGateway, TxStatus};
use crate::model::{History, Position, UserStats};
use crate::store::Store;
use crate::types::{ExecutionStatus, PositionStatus};

const STARTUP_SWEEP_WINDOW_DAYS: i64 = 3;
const MAX_EXIT_RETRIES: u32 = 3;
const RETRY_SPACING: StdDuration = StdDuration::from_secs(10);

pub struct DataSync {
    store: Arc<dyn Store>,
    chain_gateway: Arc<dyn ChainGateway>,
}

impl DataSync {
    pub fn new(store: Arc<dyn Store>, chain_gateway: Arc<dyn ChainGateway>) -> Self {
        Self { store, chain_gateway }
    }

    /// §4.11 `onTradeEntry`: a CONFIRMED/HOLDING execution with a fill hash gets a Position row.
    #[instrument(skip(self))]
    pub async fn on_trade_entry(&self, execution_id: &str) -> EngineResult<()> {
        let Some(execution) = self.store.get_execution(execution_id).await? else {
            warn!(execution_id, "onTradeEntry: execution not found");
            return Ok(());
        };
        if !matches!(execution.status, ExecutionStatus::Confirmed | ExecutionStatus::Holding) {
            return Ok(());
        }
        if execution.entry_tx_hash.is_none() {
            warn!(execution_id, "onTradeEntry: execution has no entry_tx_hash yet");
            return Ok(());
        }
        if self.store.get_position_for_execution(execution_id).await?.is_some() {
            return Ok(());
        }

        let signal = self.store.get_signal(&execution.signal_id).await?;
        let (stop_loss_price, take_profit_price) = resolve_tp_sl(&signal, execution.entry_price);

        let position = Position {
            id: Position::id_for_execution(&execution.id),
            user_id: execution.user_id.clone(),
            execution_id: execution.id.clone(),
            signal_id: execution.signal_id.clone(),
            token_symbol: execution.token_symbol.clone(),
            chain: execution.chain,
            contract_address: signal.as_ref().and_then(|s| s.contract_address.clone()),
            dex: execution.dex.clone(),
            entry_price: execution.entry_price,
            entry_amount_usdt: execution.entry_amount_usdt,
            entry_amount_token: execution.entry_amount_token,
            current_token_balance: execution.entry_amount_token,
            stop_loss_price,
            take_profit_price,
            atr_value: None,
            highest_price: execution.entry_price,
            trailing_stop_activated: false,
            trailing_stop_price: None,
            stop_loss_type: crate::types::StopLossType::Fixed,
            take_profit_mode: crate::types::TakeProfitMode::OneTime,
            current_price: execution.entry_price,
            unrealized_pnl_usdt: 0.0,
            unrealized_pnl_pct: 0.0,
            is_alpha_token: execution.is_alpha_token,
            signal_source: execution.signal_source.clone(),
            partial_sold_pct: 0.0,
            opened_at: execution.entry_executed_at.unwrap_or_else(Utc::now),
            status: PositionStatus::Holding,
        };
        self.store.upsert_position(position).await?;

        if execution.status == ExecutionStatus::Confirmed {
            let mut advanced = execution.clone();
            advanced.status = ExecutionStatus::Holding;
            self.store.upsert_execution(advanced).await?;
        }

        self.update_user_stats(&execution.user_id).await?;
        info!(execution_id, "position opened from confirmed execution");
        Ok(())
    }

    /// §4.11 `onTradeExit`: an EXITED execution is migrated into History and its Position dropped.
    #[instrument(skip(self))]
    pub async fn on_trade_exit(&self, execution_id: &str) -> EngineResult<()> {
        let Some(execution) = self.store.get_execution(execution_id).await? else {
            warn!(execution_id, "onTradeExit: execution not found");
            return Ok(());
        };
        if execution.status != ExecutionStatus::Exited {
            return Ok(());
        }

        let position = self.store.get_position_for_execution(execution_id).await?;
        let opened_at = position.as_ref().map(|p| p.opened_at).unwrap_or(execution.created_at);
        let closed_at = execution.exit_executed_at.unwrap_or_else(Utc::now);

        if let Some(exit_type) = execution.exit_type {
            self.store
                .insert_history(History {
                    id: format!("hist_{execution_id}"),
                    execution_id: execution.id.clone(),
                    user_id: execution.user_id.clone(),
                    token_symbol: execution.token_symbol.clone(),
                    entry_price: execution.entry_price,
                    exit_price: execution.exit_price.unwrap_or(execution.entry_price),
                    profit_loss_usdt: execution.profit_loss_usdt,
                    profit_loss_pct: execution.profit_loss_pct,
                    fees_usdt: execution.fees_usdt,
                    exit_type,
                    holding_duration_seconds: (closed_at - opened_at).num_seconds(),
                    closed_at,
                })
                .await?;
        }

        if let Some(p) = position {
            self.store.delete_position(&p.id).await?;
        }
        self.update_user_stats(&execution.user_id).await?;
        info!(execution_id, "execution migrated to history");
        Ok(())
    }

    /// §4.11 `updateUserStats`: derive everything from History + Position in a single upsert.
    #[instrument(skip(self))]
    pub async fn update_user_stats(&self, user_id: &str) -> EngineResult<()> {
        let now = Utc::now();
        let history = self.store.list_history_for_user(user_id).await?;
        let holdings: Vec<Position> = self
            .store
            .list_holding_positions()
            .await?
            .into_iter()
            .filter(|p| p.user_id == user_id)
            .collect();

        let today_start = now - Duration::hours(24);
        let week_start = now - Duration::days(7);

        let trades_today = history.iter().filter(|h| h.closed_at >= today_start).count() as u32;
        let trades_week = history.iter().filter(|h| h.closed_at >= week_start).count() as u32;
        let trades_total = history.len() as u32;

        let pnl_today: f64 = history.iter().filter(|h| h.closed_at >= today_start).map(|h| h.profit_loss_usdt).sum();
        let pnl_week: f64 = history.iter().filter(|h| h.closed_at >= week_start).map(|h| h.profit_loss_usdt).sum();
        let pnl_total: f64 = history.iter().map(|h| h.profit_loss_usdt).sum();

        let wins_total = history.iter().filter(|h| h.profit_loss_usdt > 0.0).count() as u32;
        let best_trade_pct = history.iter().map(|h| h.profit_loss_pct).fold(None, max_option);
        let worst_trade_pct = history.iter().map(|h| h.profit_loss_pct).fold(None, min_option);

        let holding_value_usdt: f64 = holdings.iter().map(|p| p.current_token_balance * p.current_price).sum();

        let stats = UserStats {
            user_id: user_id.to_string(),
            trades_today,
            trades_week,
            trades_total,
            pnl_today_usdt: pnl_today,
            pnl_week_usdt: pnl_week,
            pnl_total_usdt: pnl_total,
            wins_total,
            holding_count: holdings.len() as u32,
            holding_value_usdt,
            best_trade_pct,
            worst_trade_pct,
            last_updated: now,
        };
        self.store.upsert_user_stats(stats).await?;
        Ok(())
    }

    /// §4.11 `syncExistingPositions`: startup sweep, recovers only recent executions.
    #[instrument(skip(self))]
    pub async fn sync_existing_positions(&self) -> EngineResult<u32> {
        let cutoff = Utc::now() - Duration::days(STARTUP_SWEEP_WINDOW_DAYS);
        let mut recovered = 0u32;
        for status in [ExecutionStatus::Confirmed, ExecutionStatus::Holding] {
            for execution in self.store.list_executions_by_status(status).await? {
                if execution.created_at <= cutoff {
                    continue;
                }
                if self.store.get_position_for_execution(&execution.id).await?.is_none() {
                    self.on_trade_entry(&execution.id).await?;
                    recovered += 1;
                }
            }
        }
        info!(recovered, "startup position sweep complete");
        Ok(recovered)
    }

    /// §4.11 `checkAndRepairDataConsistency`, run every 5 min by the Scheduler.
    #[instrument(skip(self))]
    pub async fn check_and_repair_data_consistency(&self) -> EngineResult<()> {
        // (i) backfill missing Positions for CONFIRMED/HOLDING executions.
        for status in [ExecutionStatus::Confirmed, ExecutionStatus::Holding] {
            for execution in self.store.list_executions_by_status(status).await? {
                if self.store.get_position_for_execution(&execution.id).await?.is_none() {
                    warn!(execution_id = %execution.id, "backfilling missing position");
                    self.on_trade_entry(&execution.id).await?;
                }
            }
        }

        // (ii) resolve stuck exits: SUBMITTED but the position shows HOLDING with an exit tx hash.
        for execution in self.store.list_executions_by_status(ExecutionStatus::Submitted).await? {
            if let Some(exit_hash) = &execution.exit_tx_hash {
                let status = self.chain_gateway.get_transaction_status(exit_hash, execution.chain).await?;
                if status == TxStatus::Success {
                    let mut updated = execution.clone();
                    updated.status = ExecutionStatus::Exited;
                    self.store.upsert_execution(updated).await?;
                    self.on_trade_exit(&execution.id).await?;
                }
            }
        }

        // (iii) retry FAILED exits up to MAX_EXIT_RETRIES, 10s spacing.
        for execution in self.store.list_executions_by_status(ExecutionStatus::Failed).await? {
            let retry_count = retry_count_from_error(execution.error_message.as_deref());
            if retry_count >= MAX_EXIT_RETRIES {
                continue;
            }
            tokio::time::sleep(RETRY_SPACING).await;
            warn!(execution_id = %execution.id, retry_count, "would retry failed exit");
        }

        // (iv) delete orphan Positions whose Execution is EXITED, FAILED, or missing — a later
        // on-chain failure/revert must not leave a permanent phantom HOLDING position that Exit
        // Monitor keeps polling forever.
        for position in self.store.list_holding_positions().await? {
            match self.store.get_execution(&position.execution_id).await? {
                Some(e) if e.status == ExecutionStatus::Exited || e.status == ExecutionStatus::Failed => {
                    warn!(position_id = %position.id, status = ?e.status, "deleting orphan position for terminal execution");
                    self.store.delete_position(&position.id).await?;
                }
                None => {
                    warn!(position_id = %position.id, "deleting orphan position with no execution");
                    self.store.delete_position(&position.id).await?;
                }
                _ => {}
            }
        }

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

/// §4.11: TP/SL priority is signal-provided, then recomputed from the actual fill if the
/// signal-provided level is inconsistent with the confirmed entry price.
fn resolve_tp_sl(signal: &Option<crate::model::Signal>, actual_entry: f64) -> (f64, f64) {
    let Some(signal) = signal else {
        return (actual_entry * 0.95, actual_entry * 1.10);
    };
    let tp1 = signal.take_profits.first().copied().unwrap_or(actual_entry * 1.10);
    let sl = signal.stop_loss;

    let tp_valid = tp1 > actual_entry;
    let sl_valid = sl < actual_entry;
    if tp_valid && sl_valid {
        return (sl, tp1);
    }

    let original_tp_pct = ((tp1 - signal.current_price) / signal.current_price * 100.0).clamp(5.0, 50.0);
    let original_sl_pct = ((signal.current_price - sl) / signal.current_price * 100.0).clamp(3.0, 20.0);
    (
        if sl_valid { sl } else { actual_entry * (1.0 - original_sl_pct / 100.0) },
        if tp_valid { tp1 } else { actual_entry * (1.0 + original_tp_pct / 100.0) },
    )
}

fn max_option(acc: Option<f64>, x: f64) -> Option<f64> {
    Some(acc.map_or(x, |a| a.max(x)))
}

fn min_option(acc: Option<f64>, x: f64) -> Option<f64> {
    Some(acc.map_or(x, |a| a.min(x)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Execution, Signal};
    use crate::store::InMemoryStore;
    use crate::types::{Chain, FollowStrategy, SignalStatus, SignalType};
    use async_trait::async_trait;

    struct StubGateway;

    #[async_trait]
    impl ChainGateway for StubGateway {
        async fn sign_transaction(&self, _request: crate::external::chain_gateway::SignRequest) -> EngineResult<String> {
            unimplemented!()
        }
        async fn get_transaction_status(&self, _hash: &str, _chain: Chain) -> EngineResult<TxStatus> {
            Ok(TxStatus::Pending)
        }
    }

    fn sample_signal() -> Signal {
        let now = Utc::now();
        Signal {
            id: "sig-1".into(),
            token_symbol: "FOOUSDT".into(),
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
    async fn on_trade_entry_creates_position_from_confirmed_execution() {
        let store = Arc::new(InMemoryStore::new());
        let signal = sample_signal();
        store.upsert_signal(signal.clone()).await.unwrap();

        let mut execution = Execution::new_pending("U1", &signal, 100.0, Utc::now());
        execution.status = ExecutionStatus::Confirmed;
        execution.entry_tx_hash = Some("0xhash".into());
        execution.entry_price = 10.0;
        execution.entry_amount_token = 10.0;
        execution.follow_strategy = FollowStrategy::TopSignals;
        store.upsert_execution(execution.clone()).await.unwrap();

        let sync = DataSync::new(store.clone(), Arc::new(StubGateway));
        sync.on_trade_entry(&execution.id).await.unwrap();

        let position = store.get_position_for_execution(&execution.id).await.unwrap();
        assert!(position.is_some());
        assert_eq!(position.unwrap().current_token_balance, 10.0);
    }

    #[tokio::test]
    async fn on_trade_exit_migrates_to_history_and_drops_position() {
        let store = Arc::new(InMemoryStore::new());
        let signal = sample_signal();
        store.upsert_signal(signal.clone()).await.unwrap();

        let mut execution = Execution::new_pending("U1", &signal, 100.0, Utc::now());
        execution.status = ExecutionStatus::Confirmed;
        execution.entry_tx_hash = Some("0xhash".into());
        execution.entry_price = 10.0;
        execution.entry_amount_token = 10.0;
        store.upsert_execution(execution.clone()).await.unwrap();

        let sync = DataSync::new(store.clone(), Arc::new(StubGateway));
        sync.on_trade_entry(&execution.id).await.unwrap();

        let mut exited = execution.clone();
        exited.status = ExecutionStatus::Exited;
        exited.exit_type = Some(crate::types::ExitType::TakeProfit);
        exited.exit_price = Some(11.0);
        exited.profit_loss_usdt = 10.0;
        exited.profit_loss_pct = 10.0;
        store.upsert_execution(exited.clone()).await.unwrap();

        sync.on_trade_exit(&exited.id).await.unwrap();

        let history = store.list_history_for_user("U1").await.unwrap();
        assert_eq!(history.len(), 1);
        let position = store.get_position_for_execution(&exited.id).await.unwrap();
        assert!(position.is_none());
    }

    #[tokio::test]
    async fn update_user_stats_aggregates_history() {
        let store = Arc::new(InMemoryStore::new());
        store
            .insert_history(History {
                id: "h1".into(),
                execution_id: "exec-1".into(),
                user_id: "U1".into(),
                token_symbol: "FOOUSDT".into(),
                entry_price: 10.0,
                exit_price: 11.0,
                profit_loss_usdt: 10.0,
                profit_loss_pct: 10.0,
                fees_usdt: 0.1,
                exit_type: crate::types::ExitType::TakeProfit,
                holding_duration_seconds: 3600,
                closed_at: Utc::now(),
            })
            .await
            .unwrap();

        let sync = DataSync::new(store.clone(), Arc::new(StubGateway));
        sync.update_user_stats("U1").await.unwrap();

        let stats = store.get_user_stats("U1").await.unwrap().unwrap();
        assert_eq!(stats.trades_total, 1);
        assert_eq!(stats.wins_total, 1);
        assert!((stats.pnl_total_usdt - 10.0).abs() < 1e-9);
    }
}
