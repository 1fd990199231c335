//! Batch Executor (C7), §4.7. Generalises the reference `ExecutionEngine::execute_proposal`
//! (risk pre-check, demo/live branch, submit and await confirmation) from a single Binance order
//! to fanning a signal out across many users' wallets in liquidity-sized chunks through the DEX
//! Aggregator and Chain Gateway. Stops at SUBMITTED (§4.14) — Position creation happens only once
//! Transaction Monitor confirms the fill on-chain and hands off to Data Sync.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::error::{EngineError, EngineResult};
use crate::external::chain_gateway::{ChainGateway, SignRequest};
use crate::external::dex_aggregator::{DexAggregator, SwapRequest};
use crate::model::{Batch, Execution, Position, Signal, StrategyConfig};
use crate::store::Store;
use crate::types::{BatchStatus, Chain, ExecutionStatus, TradeOutcome};

const MAX_LIQUIDITY_PERCENT: f64 = 2.0;
const MAX_BATCH_SIZE: u32 = 50;
const MIN_BATCH_AMOUNT_USDT: f64 = 1_000.0;
const MIN_POOL_LIQUIDITY_USD: f64 = 50_000.0;

pub struct BatchExecutor {
    store: Arc<dyn Store>,
    dex: Arc<dyn DexAggregator>,
    chain_gateway: Arc<dyn ChainGateway>,
    batch_interval: StdDuration,
    approval_wait: StdDuration,
}

impl BatchExecutor {
    pub fn new(store: Arc<dyn Store>, dex: Arc<dyn DexAggregator>, chain_gateway: Arc<dyn ChainGateway>) -> Self {
        Self {
            store,
            dex,
            chain_gateway,
            batch_interval: StdDuration::from_secs(30),
            approval_wait: StdDuration::from_secs(5),
        }
    }

    /// Test/demo hook: collapse the inter-batch wait and the post-approval wait to near-zero.
    pub fn with_intervals(mut self, batch_interval: StdDuration, approval_wait: StdDuration) -> Self {
        self.batch_interval = batch_interval;
        self.approval_wait = approval_wait;
        self
    }

    /// §4.7: size, chunk and run the batch for `signal` across `users`.
    #[instrument(skip(self, signal, users), fields(signal_id = %signal.id, token = %signal.token_symbol, n_users = users.len()))]
    pub async fn execute_batch_trades(
        &self,
        signal: &Signal,
        users: &[StrategyConfig],
        current_price: f64,
    ) -> EngineResult<Batch> {
        let now = Utc::now();
        let total_amount: f64 = users.iter().map(|u| u.trade_amount).sum();

        let liquidity = match &signal.contract_address {
            Some(addr) => self.dex.pool_liquidity_usd(signal.chain, addr).await?,
            None => 0.0,
        };
        if liquidity < MIN_POOL_LIQUIDITY_USD {
            let mut batch = Batch::new(&signal.id, users.len() as u32, total_amount, 1, users.len() as u32, now);
            batch.status = BatchStatus::Failed;
            batch.failed = users.len() as u32;
            self.store.upsert_batch(batch.clone()).await?;
            warn!(liquidity, "pool liquidity below floor — batch aborted");
            return Ok(batch);
        }

        let (batch_count, users_per_batch) = if total_amount < MIN_BATCH_AMOUNT_USDT {
            (1u32, users.len() as u32)
        } else {
            let max_chunk = (liquidity * MAX_LIQUIDITY_PERCENT / 100.0).max(1.0);
            let count = (total_amount / max_chunk).ceil().max(1.0) as u32;
            let per_batch = ((users.len() as f64 / count as f64).ceil() as u32).min(MAX_BATCH_SIZE);
            (count, per_batch.max(1))
        };

        let mut batch = Batch::new(&signal.id, users.len() as u32, total_amount, batch_count, users_per_batch, now);
        self.store.upsert_batch(batch.clone()).await?;

        for (i, chunk) in users.chunks(users_per_batch as usize).enumerate() {
            batch.current_batch = i as u32 + 1;
            info!(batch = batch.current_batch, batch_count, size = chunk.len(), "executing batch chunk");

            let outcomes = futures::future::join_all(
                chunk.iter().map(|user| self.execute_user_trade(signal, user, current_price)),
            )
            .await;

            for outcome in outcomes {
                match outcome {
                    TradeOutcome::Executed => batch.completed += 1,
                    TradeOutcome::Skipped => {}
                    TradeOutcome::Failed => batch.failed += 1,
                }
            }
            self.store.upsert_batch(batch.clone()).await?;

            if i + 1 < batch.batch_count as usize {
                tokio::time::sleep(self.batch_interval).await;
            }
        }

        batch.status = if batch.failed == 0 { BatchStatus::Completed } else if batch.completed == 0 {
            BatchStatus::Failed
        } else {
            BatchStatus::Completed
        };
        if let Err(e) = batch.check_invariant() {
            warn!(error = %e, "batch invariant violated at completion");
        }
        self.store.upsert_batch(batch.clone()).await?;
        Ok(batch)
    }

    /// §4.7 `executeUserTrade` a-i. Never propagates an error to the batch accountant — every
    /// outcome, including failure, is classified and recorded.
    #[instrument(skip(self, signal, user, current_price), fields(user_id = %user.user_id, token = %signal.token_symbol))]
    async fn execute_user_trade(&self, signal: &Signal, user: &StrategyConfig, current_price: f64) -> TradeOutcome {
        match self.try_execute_user_trade(signal, user, current_price).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "user trade attempt errored — recording as failed");
                TradeOutcome::Failed
            }
        }
    }

    async fn try_execute_user_trade(
        &self,
        signal: &Signal,
        user: &StrategyConfig,
        current_price: f64,
    ) -> EngineResult<TradeOutcome> {
        let exec_id = Execution::deterministic_id(&user.user_id, &signal.id);

        // a. Idempotency.
        if let Some(existing) = self.store.get_execution(&exec_id).await? {
            if existing.status.blocks_reentry() {
                return Ok(TradeOutcome::Skipped);
            }
        }

        // b. Token-level mutex: HOLDING positions, in-flight executions, 24h global cooldown.
        if !self.store.list_holding_positions_for_token(&signal.token_symbol).await?.is_empty() {
            return Ok(TradeOutcome::Skipped);
        }
        let in_flight = self
            .store
            .list_executions_for_token(&signal.token_symbol)
            .await?
            .into_iter()
            .any(|e| e.status.is_in_flight());
        if in_flight {
            return Ok(TradeOutcome::Skipped);
        }
        let cooldown_since = Utc::now() - chrono::Duration::hours(24);
        let in_cooldown = self
            .store
            .list_history_for_token_since(&signal.token_symbol, cooldown_since)
            .await?
            .into_iter()
            .any(|h| h.user_id == user.user_id);
        if in_cooldown {
            return Ok(TradeOutcome::Skipped);
        }

        // c. Re-check balance.
        if user.usdt_balance < user.trade_amount {
            let mut exec = Execution::new_pending(&user.user_id, signal, user.trade_amount, Utc::now());
            exec.status = ExecutionStatus::InsufficientBalance;
            exec.error_message = Some("balance below trade_amount at submission time".to_string());
            self.store.upsert_execution(exec).await?;
            return Ok(TradeOutcome::Skipped);
        }

        // d. Insert PENDING row.
        let mut exec = Execution::new_pending(&user.user_id, signal, user.trade_amount, Utc::now());
        self.store.upsert_execution(exec.clone()).await?;

        // e. Quote swap.
        let token_out_address = signal
            .contract_address
            .clone()
            .ok_or_else(|| EngineError::validation("no contract_address on signal for swap quote"))?;
        let swap_request = SwapRequest {
            chain: signal.chain,
            token_in: signal.chain.quote_asset().to_string(),
            token_out: signal.token_symbol.clone(),
            token_out_address: token_out_address.clone(),
            amount_in: user.trade_amount,
            slippage_pct: user.max_slippage_pct,
            user_address: user.wallet_address.clone(),
            is_four_meme: false,
        };
        let swap_tx = match self.dex.build_swap_tx(swap_request).await {
            Ok(tx) => tx,
            Err(e) => {
                exec.status = ExecutionStatus::Failed;
                exec.error_message = Some(format!("quote failed: {e}"));
                self.store.upsert_execution(exec).await?;
                return Ok(TradeOutcome::Failed);
            }
        };

        // f. Approval, if needed.
        exec.status = ExecutionStatus::Submitting;
        self.store.upsert_execution(exec.clone()).await?;
        if swap_tx.needs_approval {
            if let Some(approval_data) = &swap_tx.approval_tx_data {
                let approval_req = SignRequest {
                    principal_id: user.principal_id.clone(),
                    to: swap_tx.token_address.clone(),
                    data: approval_data.clone(),
                    value: "0".to_string(),
                    chain_id: signal.chain.chain_id(),
                    gas: None,
                    gas_price: None,
                };
                if let Err(e) = self.chain_gateway.sign_transaction(approval_req).await {
                    exec.status = ExecutionStatus::Failed;
                    exec.error_message = Some(format!("approval failed: {e}"));
                    self.store.upsert_execution(exec).await?;
                    return Ok(TradeOutcome::Failed);
                }
                tokio::time::sleep(self.approval_wait).await;
            }
        }

        // g. Submit main transaction.
        let swap_req = SignRequest {
            principal_id: user.principal_id.clone(),
            to: swap_tx.router_address.clone(),
            data: swap_tx.tx_data.clone(),
            value: swap_tx.value.clone(),
            chain_id: signal.chain.chain_id(),
            gas: Some(swap_tx.gas_limit),
            gas_price: Some(swap_tx.gas_price.clone()),
        };
        let tx_hash = match self.chain_gateway.sign_transaction(swap_req).await {
            Ok(hash) => hash,
            Err(e) => {
                // i. On any failure, write FAILED.
                exec.status = ExecutionStatus::Failed;
                exec.error_message = Some(format!("submission failed: {e}"));
                self.store.upsert_execution(exec).await?;
                return Ok(TradeOutcome::Failed);
            }
        };

        exec.status = ExecutionStatus::Submitted;
        exec.entry_tx_hash = Some(tx_hash);
        exec.entry_price = current_price;
        exec.entry_amount_token = user.trade_amount / current_price;
        exec.dex = "aggregator".to_string();
        exec.entry_executed_at = Some(Utc::now());
        self.store.upsert_execution(exec.clone()).await?;

        // h. Demote every other ACTIVE signal for this token, so no duplicate entry fires.
        self.store.mark_token_signals_triggered(&signal.token_symbol).await?;

        // Position creation is deferred: per the execution state machine (§4.14) a Position is
        // only opened once Transaction Monitor observes on-chain confirmation and hands off to
        // Data Sync's `onTradeEntry` (§4.10/4.11) — never here at submission time.
        info!(exec_id = %exec.id, "user trade submitted on-chain, awaiting confirmation");
        Ok(TradeOutcome::Executed)
    }
}
