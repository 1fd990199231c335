//! Store (C2, external contract), §4.2/§6.
//!
//! The core never assumes a specific database engine; it depends only on this trait. Method
//! names describe the concern (`upsert_execution`, `list_holding_positions_for_token`) rather
//! than exposing raw SQL, matching the "abstract contract" framing of §6. `Store` is
//! object-safe (`async_trait`) so every component holds it as `Arc<dyn Store>`.
//!
//! [`InMemoryStore`] is a reference implementation used by tests and by the demo binary. It is
//! not part of the specified behaviour: a real deployment plugs in a relational backend behind
//! the same trait. It still honours the contract's hard requirements — row-level locking on
//! `user_credits` is simulated with a single global lock guarding the whole credits map, which is
//! correct (if coarse) for the SERIALISABLE-isolation requirement of §4.2/§4.4.1.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::error::{EngineError, EngineResult};
use crate::model::{
    Batch, Execution, History, Position, ScoringConfigRow, Signal, StrategyConfig,
    TelegramGroupConfig, UserStats,
};
use crate::types::ExecutionStatus;

#[async_trait]
pub trait Store: Send + Sync {
    // -- Signals -----------------------------------------------------------------------------
    async fn upsert_signal(&self, signal: Signal) -> EngineResult<()>;
    async fn get_signal(&self, id: &str) -> EngineResult<Option<Signal>>;
    async fn list_active_signals(&self) -> EngineResult<Vec<Signal>>;
    /// §4.7.h: on first successful SUBMITTED, every other ACTIVE signal for the token is
    /// simultaneously demoted to TRIGGERED.
    async fn mark_token_signals_triggered(&self, token_symbol: &str) -> EngineResult<()>;
    async fn expire_signal(&self, id: &str) -> EngineResult<()>;

    // -- StrategyConfig ------------------------------------------------------------------------
    async fn upsert_strategy_config(&self, config: StrategyConfig) -> EngineResult<()>;
    async fn get_strategy_config(&self, id: &str) -> EngineResult<Option<StrategyConfig>>;
    async fn list_enabled_strategy_configs(&self) -> EngineResult<Vec<StrategyConfig>>;
    async fn list_strategy_configs_for_user(&self, user_id: &str) -> EngineResult<Vec<StrategyConfig>>;
    async fn set_paused_until(
        &self,
        config_id: &str,
        paused_until: Option<DateTime<Utc>>,
    ) -> EngineResult<()>;

    // -- Execution -----------------------------------------------------------------------------
    async fn get_execution(&self, id: &str) -> EngineResult<Option<Execution>>;
    /// Inserts or overwrites. Callers are responsible for the idempotency check of §4.7.a
    /// before calling this for a fresh PENDING row; this method itself does not enforce it so
    /// that legitimate status-transition writes are not rejected.
    async fn upsert_execution(&self, execution: Execution) -> EngineResult<()>;
    async fn delete_execution(&self, id: &str) -> EngineResult<()>;
    async fn list_executions_for_token(&self, token_symbol: &str) -> EngineResult<Vec<Execution>>;
    async fn list_executions_by_status(&self, status: ExecutionStatus) -> EngineResult<Vec<Execution>>;

    // -- Position ------------------------------------------------------------------------------
    async fn get_position(&self, id: &str) -> EngineResult<Option<Position>>;
    async fn get_position_for_execution(&self, execution_id: &str) -> EngineResult<Option<Position>>;
    async fn upsert_position(&self, position: Position) -> EngineResult<()>;
    async fn delete_position(&self, id: &str) -> EngineResult<()>;
    async fn list_holding_positions(&self) -> EngineResult<Vec<Position>>;
    async fn list_holding_positions_for_token(&self, token_symbol: &str) -> EngineResult<Vec<Position>>;

    // -- History -------------------------------------------------------------------------------
    async fn insert_history(&self, row: History) -> EngineResult<()>;
    /// Used by the §4.7.b 24h per-token global cooldown check (Execution OR History within 24h).
    async fn list_history_for_token_since(
        &self,
        token_symbol: &str,
        since: DateTime<Utc>,
    ) -> EngineResult<Vec<History>>;
    async fn list_history_for_user(&self, user_id: &str) -> EngineResult<Vec<History>>;

    // -- UserStats -----------------------------------------------------------------------------
    async fn get_user_stats(&self, user_id: &str) -> EngineResult<Option<UserStats>>;
    async fn upsert_user_stats(&self, stats: UserStats) -> EngineResult<()>;

    // -- Batch ---------------------------------------------------------------------------------
    async fn upsert_batch(&self, batch: Batch) -> EngineResult<()>;
    async fn get_batch(&self, id: &str) -> EngineResult<Option<Batch>>;

    // -- ScoringConfig (§4.13, the single active WEIGHTS+THRESHOLDS row) ----------------------
    async fn get_active_scoring_config(&self) -> EngineResult<Option<ScoringConfigRow>>;
    /// Replaces whatever row was previously active; the engine only ever holds one.
    async fn upsert_scoring_config(&self, row: ScoringConfigRow) -> EngineResult<()>;

    // -- TelegramGroupConfig (§4.9 SELL fanout middle tier) -----------------------------------
    async fn get_telegram_group_config(&self, chat_id: &str) -> EngineResult<Option<TelegramGroupConfig>>;
    async fn upsert_telegram_group_config(&self, config: TelegramGroupConfig) -> EngineResult<()>;

    // -- Credits (§4.4.1, gates signal-detail viewing, not trading) ---------------------------
    /// Transactional deduction: `SELECT … FOR UPDATE` on `user_credits`, deduct free balance
    /// first then paid balance, append a `credit_consumption` row. Rolls back entirely on
    /// insufficient balance.
    async fn deduct_credits(&self, user_id: &str, amount: f64) -> EngineResult<()>;
    async fn get_credit_balance(&self, user_id: &str) -> EngineResult<f64>;
}

// ---------------------------------------------------------------------------
// In-memory reference implementation
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Tables {
    signals: HashMap<String, Signal>,
    strategy_configs: HashMap<String, StrategyConfig>,
    executions: HashMap<String, Execution>,
    positions: HashMap<String, Position>,
    history: Vec<History>,
    user_stats: HashMap<String, UserStats>,
    batches: HashMap<String, Batch>,
    scoring_config: Option<ScoringConfigRow>,
    telegram_group_configs: HashMap<String, TelegramGroupConfig>,
    /// free + paid credit balance per user, standing in for `user_credits`.
    credits: HashMap<String, (f64, f64)>,
}

pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }

    /// Test/demo helper: seed a user's free/paid credit balance.
    pub fn seed_credits(&self, user_id: impl Into<String>, free: f64, paid: f64) {
        self.tables.write().credits.insert(user_id.into(), (free, paid));
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert_signal(&self, signal: Signal) -> EngineResult<()> {
        self.tables.write().signals.insert(signal.id.clone(), signal);
        Ok(())
    }

    async fn get_signal(&self, id: &str) -> EngineResult<Option<Signal>> {
        Ok(self.tables.read().signals.get(id).cloned())
    }

    async fn list_active_signals(&self) -> EngineResult<Vec<Signal>> {
        use crate::types::SignalStatus;
        Ok(self
            .tables
            .read()
            .signals
            .values()
            .filter(|s| s.status == SignalStatus::Active)
            .cloned()
            .collect())
    }

    async fn mark_token_signals_triggered(&self, token_symbol: &str) -> EngineResult<()> {
        use crate::types::SignalStatus;
        let mut tables = self.tables.write();
        for s in tables.signals.values_mut() {
            if s.token_symbol == token_symbol && s.status == SignalStatus::Active {
                s.status = SignalStatus::Triggered;
            }
        }
        Ok(())
    }

    async fn expire_signal(&self, id: &str) -> EngineResult<()> {
        use crate::types::SignalStatus;
        if let Some(s) = self.tables.write().signals.get_mut(id) {
            s.status = SignalStatus::Expired;
        }
        Ok(())
    }

    async fn upsert_strategy_config(&self, config: StrategyConfig) -> EngineResult<()> {
        self.tables
            .write()
            .strategy_configs
            .insert(config.id.clone(), config);
        Ok(())
    }

    async fn get_strategy_config(&self, id: &str) -> EngineResult<Option<StrategyConfig>> {
        Ok(self.tables.read().strategy_configs.get(id).cloned())
    }

    async fn list_enabled_strategy_configs(&self) -> EngineResult<Vec<StrategyConfig>> {
        Ok(self
            .tables
            .read()
            .strategy_configs
            .values()
            .filter(|c| c.enabled)
            .cloned()
            .collect())
    }

    async fn list_strategy_configs_for_user(&self, user_id: &str) -> EngineResult<Vec<StrategyConfig>> {
        Ok(self
            .tables
            .read()
            .strategy_configs
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn set_paused_until(
        &self,
        config_id: &str,
        paused_until: Option<DateTime<Utc>>,
    ) -> EngineResult<()> {
        if let Some(c) = self.tables.write().strategy_configs.get_mut(config_id) {
            c.paused_until = paused_until;
        }
        Ok(())
    }

    async fn get_execution(&self, id: &str) -> EngineResult<Option<Execution>> {
        Ok(self.tables.read().executions.get(id).cloned())
    }

    async fn upsert_execution(&self, execution: Execution) -> EngineResult<()> {
        self.tables.write().executions.insert(execution.id.clone(), execution);
        Ok(())
    }

    async fn delete_execution(&self, id: &str) -> EngineResult<()> {
        self.tables.write().executions.remove(id);
        Ok(())
    }

    async fn list_executions_for_token(&self, token_symbol: &str) -> EngineResult<Vec<Execution>> {
        Ok(self
            .tables
            .read()
            .executions
            .values()
            .filter(|e| e.token_symbol == token_symbol)
            .cloned()
            .collect())
    }

    async fn list_executions_by_status(&self, status: ExecutionStatus) -> EngineResult<Vec<Execution>> {
        Ok(self
            .tables
            .read()
            .executions
            .values()
            .filter(|e| e.status == status)
            .cloned()
            .collect())
    }

    async fn get_position(&self, id: &str) -> EngineResult<Option<Position>> {
        Ok(self.tables.read().positions.get(id).cloned())
    }

    async fn get_position_for_execution(&self, execution_id: &str) -> EngineResult<Option<Position>> {
        Ok(self
            .tables
            .read()
            .positions
            .values()
            .find(|p| p.execution_id == execution_id)
            .cloned())
    }

    async fn upsert_position(&self, position: Position) -> EngineResult<()> {
        self.tables.write().positions.insert(position.id.clone(), position);
        Ok(())
    }

    async fn delete_position(&self, id: &str) -> EngineResult<()> {
        self.tables.write().positions.remove(id);
        Ok(())
    }

    async fn list_holding_positions(&self) -> EngineResult<Vec<Position>> {
        use crate::types::PositionStatus;
        Ok(self
            .tables
            .read()
            .positions
            .values()
            .filter(|p| p.status == PositionStatus::Holding)
            .cloned()
            .collect())
    }

    async fn list_holding_positions_for_token(&self, token_symbol: &str) -> EngineResult<Vec<Position>> {
        use crate::types::PositionStatus;
        Ok(self
            .tables
            .read()
            .positions
            .values()
            .filter(|p| p.token_symbol == token_symbol && p.status == PositionStatus::Holding)
            .cloned()
            .collect())
    }

    async fn insert_history(&self, row: History) -> EngineResult<()> {
        self.tables.write().history.push(row);
        Ok(())
    }

    async fn list_history_for_token_since(
        &self,
        token_symbol: &str,
        since: DateTime<Utc>,
    ) -> EngineResult<Vec<History>> {
        Ok(self
            .tables
            .read()
            .history
            .iter()
            .filter(|h| h.token_symbol == token_symbol && h.closed_at >= since)
            .cloned()
            .collect())
    }

    async fn list_history_for_user(&self, user_id: &str) -> EngineResult<Vec<History>> {
        Ok(self
            .tables
            .read()
            .history
            .iter()
            .filter(|h| h.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn get_user_stats(&self, user_id: &str) -> EngineResult<Option<UserStats>> {
        Ok(self.tables.read().user_stats.get(user_id).cloned())
    }

    async fn upsert_user_stats(&self, stats: UserStats) -> EngineResult<()> {
        self.tables.write().user_stats.insert(stats.user_id.clone(), stats);
        Ok(())
    }

    async fn upsert_batch(&self, batch: Batch) -> EngineResult<()> {
        self.tables.write().batches.insert(batch.id.clone(), batch);
        Ok(())
    }

    async fn get_batch(&self, id: &str) -> EngineResult<Option<Batch>> {
        Ok(self.tables.read().batches.get(id).cloned())
    }

    async fn get_active_scoring_config(&self) -> EngineResult<Option<ScoringConfigRow>> {
        Ok(self.tables.read().scoring_config.clone())
    }

    async fn upsert_scoring_config(&self, row: ScoringConfigRow) -> EngineResult<()> {
        self.tables.write().scoring_config = Some(row);
        Ok(())
    }

    async fn get_telegram_group_config(&self, chat_id: &str) -> EngineResult<Option<TelegramGroupConfig>> {
        Ok(self.tables.read().telegram_group_configs.get(chat_id).cloned())
    }

    async fn upsert_telegram_group_config(&self, config: TelegramGroupConfig) -> EngineResult<()> {
        self.tables.write().telegram_group_configs.insert(config.chat_id.clone(), config);
        Ok(())
    }

    async fn deduct_credits(&self, user_id: &str, amount: f64) -> EngineResult<()> {
        // `write()` on the whole table stands in for `SELECT … FOR UPDATE` on `user_credits`:
        // only one deduction can be in flight across the entire store at a time.
        let mut tables = self.tables.write();
        let (free, paid) = tables.credits.entry(user_id.to_string()).or_insert((0.0, 0.0));
        let total = *free + *paid;
        if total < amount {
            return Err(EngineError::gated(
                "credits",
                format!("insufficient credits: have {total}, need {amount}"),
            ));
        }
        let from_free = amount.min(*free);
        *free -= from_free;
        *paid -= amount - from_free;
        Ok(())
    }

    async fn get_credit_balance(&self, user_id: &str) -> EngineResult<f64> {
        let tables = self.tables.read();
        Ok(tables.credits.get(user_id).map(|(f, p)| f + p).unwrap_or(0.0))
    }
}
