//! Data model entities, §3. Field shapes follow the teacher's `position_engine.rs` /
//! `decision_envelope.rs` construction style: plain structs, `serde(default)` on every field
//! that may be absent from an older row, explicit `Option<T>` rather than sentinel values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{
    BatchStatus, Chain, ExecutionStatus, ExitType, FollowStrategy, PositionStatus, SignalStatus,
    SignalType, StopLossType, TakeProfitMode,
};

// ---------------------------------------------------------------------------
// Signal
// ---------------------------------------------------------------------------

/// A proposal to trade a token, scored and timestamped (§3, GLOSSARY).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub token_symbol: String,
    pub chain: Chain,
    pub contract_address: Option<String>,
    pub signal_type: SignalType,
    pub confidence: f64,
    pub entry_min: f64,
    pub entry_max: f64,
    pub stop_loss: f64,
    /// At least one take-profit level; index 0 is TP1.
    pub take_profits: Vec<f64>,
    pub current_price: f64,
    pub expires_at: DateTime<Utc>,
    pub status: SignalStatus,
    pub source: String,
    pub strategy_id: Option<String>,
    /// Set when the signal originated in a Telegram group; resolves to subscribers via
    /// `telegram_group_configs` when `strategy_id` is absent (§4.9 SELL fanout middle tier).
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub is_alpha_token: bool,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub reject_reason: Option<String>,
    #[serde(default)]
    pub knowledge_note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Signal {
    /// §3 invariants: entry_min ≤ entry_max; for LONG/BUY stop_loss < current_price <
    /// take_profit_1; for SHORT/SELL reversed. NEUTRAL has no ordering requirement since it is
    /// never executed.
    pub fn validate_invariants(&self) -> Result<(), String> {
        if self.entry_min > self.entry_max {
            return Err(format!(
                "entry_min {} > entry_max {}",
                self.entry_min, self.entry_max
            ));
        }
        let Some(&tp1) = self.take_profits.first() else {
            return Err("signal has no take-profit levels".to_string());
        };
        match self.signal_type {
            SignalType::Long | SignalType::Buy => {
                if !(self.stop_loss < self.current_price && self.current_price < tp1) {
                    return Err(format!(
                        "LONG/BUY ordering violated: sl={} price={} tp1={}",
                        self.stop_loss, self.current_price, tp1
                    ));
                }
            }
            SignalType::Short | SignalType::Sell => {
                if !(self.stop_loss > self.current_price && self.current_price > tp1) {
                    return Err(format!(
                        "SHORT/SELL ordering violated: sl={} price={} tp1={}",
                        self.stop_loss, self.current_price, tp1
                    ));
                }
            }
            SignalType::Neutral => {}
        }
        Ok(())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

// ---------------------------------------------------------------------------
// StrategyConfig
// ---------------------------------------------------------------------------

/// Per-user, per-strategy-instance subscription and risk parameters (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub id: String,
    pub user_id: String,
    pub wallet_address: String,
    /// Privy-style delegated-signing principal id (§6).
    pub principal_id: String,
    pub enabled: bool,
    pub supported_chains: Vec<Chain>,
    pub follow_strategy: FollowStrategy,
    pub trade_amount: f64,
    pub max_slippage_pct: f64,
    pub max_positions: u32,
    pub take_profit_mode: TakeProfitMode,
    pub stop_loss_type: StopLossType,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    /// Negative number, e.g. -10.0 for -10%.
    pub daily_loss_limit_pct: f64,
    pub single_token_max_percent: f64,
    pub min_liquidity_usd: f64,
    #[serde(default)]
    pub whitelist: Vec<String>,
    #[serde(default)]
    pub blacklist: Vec<String>,
    #[serde(default)]
    pub usdt_balance: f64,
    #[serde(default)]
    pub gas_balance: f64,
    #[serde(default)]
    pub paused_until: Option<DateTime<Utc>>,
}

impl StrategyConfig {
    /// Defaults applied by `Strategy Agent::createUserConfig`, §4.3.
    pub fn with_defaults(
        user_id: impl Into<String>,
        wallet_address: impl Into<String>,
        principal_id: impl Into<String>,
    ) -> Self {
        Self {
            id: format!("cfg_{}", Uuid::new_v4()),
            user_id: user_id.into(),
            wallet_address: wallet_address.into(),
            principal_id: principal_id.into(),
            enabled: true,
            supported_chains: vec![Chain::Bsc],
            follow_strategy: FollowStrategy::TopSignals,
            trade_amount: 100.0,
            max_slippage_pct: 2.0,
            max_positions: 3,
            take_profit_mode: TakeProfitMode::OneTime,
            stop_loss_type: StopLossType::Fixed,
            stop_loss_pct: 5.0,
            take_profit_pct: 10.0,
            daily_loss_limit_pct: -10.0,
            single_token_max_percent: 25.0,
            min_liquidity_usd: 200_000.0,
            whitelist: Vec::new(),
            blacklist: Vec::new(),
            usdt_balance: 0.0,
            gas_balance: 0.0,
            paused_until: None,
        }
    }

    pub fn validate_invariants(&self) -> Result<(), String> {
        if self.trade_amount <= 0.0 {
            return Err("trade_amount must be > 0".to_string());
        }
        if !(0.0..=100.0).contains(&self.max_slippage_pct) || self.max_slippage_pct <= 0.0 {
            return Err("max_slippage_pct must be in (0, 100]".to_string());
        }
        Ok(())
    }

    pub fn is_paused(&self, now: DateTime<Utc>) -> bool {
        self.paused_until.map(|p| p > now).unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// One user's attempt at one trade for one signal (§3, §4.14).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub user_id: String,
    pub signal_id: String,
    pub token_symbol: String,
    pub chain: Chain,
    pub dex: String,
    pub entry_amount_usdt: f64,
    #[serde(default)]
    pub entry_amount_token: f64,
    #[serde(default)]
    pub entry_price: f64,
    #[serde(default)]
    pub entry_tx_hash: Option<String>,
    #[serde(default)]
    pub exit_tx_hash: Option<String>,
    #[serde(default)]
    pub exit_price: Option<f64>,
    #[serde(default)]
    pub exit_amount_usdt: Option<f64>,
    #[serde(default)]
    pub exit_type: Option<ExitType>,
    #[serde(default)]
    pub profit_loss_usdt: f64,
    #[serde(default)]
    pub profit_loss_pct: f64,
    #[serde(default)]
    pub fees_usdt: f64,
    pub follow_strategy: FollowStrategy,
    pub strategy_id: Option<String>,
    #[serde(default)]
    pub is_alpha_token: bool,
    pub signal_source: String,
    #[serde(default)]
    pub batch_id: Option<String>,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub entry_executed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub exit_executed_at: Option<DateTime<Utc>>,
}

impl Execution {
    /// Deterministic execution id, §3: `exec_<user>_<signal>`.
    pub fn deterministic_id(user_id: &str, signal_id: &str) -> String {
        format!("exec_{user_id}_{signal_id}")
    }

    pub fn new_pending(
        user_id: impl Into<String>,
        signal: &Signal,
        entry_amount_usdt: f64,
        now: DateTime<Utc>,
    ) -> Self {
        let user_id = user_id.into();
        Self {
            id: Self::deterministic_id(&user_id, &signal.id),
            user_id,
            signal_id: signal.id.clone(),
            token_symbol: signal.token_symbol.clone(),
            chain: signal.chain,
            dex: String::new(),
            entry_amount_usdt,
            entry_amount_token: 0.0,
            entry_price: 0.0,
            entry_tx_hash: None,
            exit_tx_hash: None,
            exit_price: None,
            exit_amount_usdt: None,
            exit_type: None,
            profit_loss_usdt: 0.0,
            profit_loss_pct: 0.0,
            fees_usdt: 0.0,
            follow_strategy: FollowStrategy::TopSignals,
            strategy_id: signal.strategy_id.clone(),
            is_alpha_token: signal.is_alpha_token,
            signal_source: signal.source.clone(),
            batch_id: None,
            status: ExecutionStatus::Pending,
            error_message: None,
            created_at: now,
            entry_executed_at: None,
            exit_executed_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// The open, held side of an execution (§3, GLOSSARY).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub user_id: String,
    pub execution_id: String,
    pub signal_id: String,
    pub token_symbol: String,
    pub chain: Chain,
    pub contract_address: Option<String>,
    pub dex: String,
    pub entry_price: f64,
    pub entry_amount_usdt: f64,
    pub entry_amount_token: f64,
    pub current_token_balance: f64,
    pub stop_loss_price: f64,
    pub take_profit_price: f64,
    #[serde(default)]
    pub atr_value: Option<f64>,
    pub highest_price: f64,
    #[serde(default)]
    pub trailing_stop_activated: bool,
    #[serde(default)]
    pub trailing_stop_price: Option<f64>,
    pub stop_loss_type: StopLossType,
    #[serde(default = "default_take_profit_mode")]
    pub take_profit_mode: TakeProfitMode,
    pub current_price: f64,
    #[serde(default)]
    pub unrealized_pnl_usdt: f64,
    #[serde(default)]
    pub unrealized_pnl_pct: f64,
    #[serde(default)]
    pub is_alpha_token: bool,
    pub signal_source: String,
    #[serde(default)]
    pub partial_sold_pct: f64,
    pub opened_at: DateTime<Utc>,
    pub status: PositionStatus,
}

fn default_take_profit_mode() -> TakeProfitMode {
    TakeProfitMode::OneTime
}

impl Position {
    /// Deterministic position id, §3: `pos_<execId>`.
    pub fn id_for_execution(execution_id: &str) -> String {
        format!("pos_{execution_id}")
    }

    pub fn is_long(&self) -> bool {
        // A short position, were it modelled, would carry stop_loss_price > entry_price;
        // every position currently opened by the Batch Executor is a long spot buy (§4.7).
        true
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// Append-only closed projection of an execution (§3, GLOSSARY).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct History {
    pub id: String,
    pub execution_id: String,
    pub user_id: String,
    pub token_symbol: String,
    pub entry_price: f64,
    pub exit_price: f64,
    pub profit_loss_usdt: f64,
    pub profit_loss_pct: f64,
    pub fees_usdt: f64,
    pub exit_type: ExitType,
    pub holding_duration_seconds: i64,
    pub closed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// UserStats
// ---------------------------------------------------------------------------

/// Rolling, derivable per-user statistics (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserStats {
    pub user_id: String,
    pub trades_today: u32,
    pub trades_week: u32,
    pub trades_total: u32,
    pub pnl_today_usdt: f64,
    pub pnl_week_usdt: f64,
    pub pnl_total_usdt: f64,
    pub wins_total: u32,
    pub holding_count: u32,
    pub holding_value_usdt: f64,
    pub best_trade_pct: Option<f64>,
    pub worst_trade_pct: Option<f64>,
    pub last_updated: DateTime<Utc>,
}

impl UserStats {
    pub fn empty(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            trades_today: 0,
            trades_week: 0,
            trades_total: 0,
            pnl_today_usdt: 0.0,
            pnl_week_usdt: 0.0,
            pnl_total_usdt: 0.0,
            wins_total: 0,
            holding_count: 0,
            holding_value_usdt: 0.0,
            best_trade_pct: None,
            worst_trade_pct: None,
            last_updated: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

/// One run of the Batch Executor grouping users for a single signal (§3, GLOSSARY).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: String,
    pub signal_id: String,
    pub total_users: u32,
    pub total_amount_usdt: f64,
    pub batch_count: u32,
    pub batch_size: u32,
    pub current_batch: u32,
    pub completed: u32,
    pub failed: u32,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
}

impl Batch {
    pub fn new(
        signal_id: impl Into<String>,
        total_users: u32,
        total_amount_usdt: f64,
        batch_count: u32,
        batch_size: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!("batch_{}", Uuid::new_v4()),
            signal_id: signal_id.into(),
            total_users,
            total_amount_usdt,
            batch_count,
            batch_size,
            current_batch: 0,
            completed: 0,
            failed: 0,
            status: BatchStatus::Executing,
            created_at: now,
        }
    }

    /// §8 round-trip law: `completed + failed ≤ batch_count`, and at COMPLETED, equality holds.
    pub fn check_invariant(&self) -> Result<(), String> {
        if self.completed + self.failed > self.batch_count {
            return Err(format!(
                "completed({}) + failed({}) > batch_count({})",
                self.completed, self.failed, self.batch_count
            ));
        }
        if self.status == BatchStatus::Completed
            && self.completed + self.failed != self.batch_count
        {
            return Err("COMPLETED batch with completed+failed != batch_count".to_string());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TelegramGroupConfig
// ---------------------------------------------------------------------------

/// Maps a Telegram group chat to the users subscribed through it (§4.9 SELL fanout's middle
/// priority tier, `telegram_group_configs` table per §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramGroupConfig {
    pub chat_id: String,
    pub user_ids: Vec<String>,
}

// ---------------------------------------------------------------------------
// ScoringConfig (the persisted row; the in-memory hot-reload view lives in config.rs)
// ---------------------------------------------------------------------------

/// Exactly one active WEIGHTS row and one active THRESHOLDS row exist at a time (§3, §4.13).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfigRow {
    pub version: String,
    pub weights: std::collections::HashMap<String, f64>,
    pub min_confidence: f64,
    pub min_oi_change_pct: f64,
    pub min_funding_rate: f64,
    pub active: bool,
}

// ---------------------------------------------------------------------------
// Event (ephemeral, owned by the Event Bus)
// ---------------------------------------------------------------------------

/// One pub/sub message, §3/§4.1. Ephemeral — the bus only retains the last ~100.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub from_agent: String,
    pub name: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_signal(signal_type: SignalType, price: f64, sl: f64, tp1: f64) -> Signal {
        Signal {
            id: "SIG-001".into(),
            token_symbol: "LINKUSDT".into(),
            chain: Chain::Bsc,
            contract_address: Some("0xabc".into()),
            signal_type,
            confidence: 82.0,
            entry_min: 9.80,
            entry_max: 10.10,
            stop_loss: sl,
            take_profits: vec![tp1],
            current_price: price,
            expires_at: Utc::now(),
            status: SignalStatus::Active,
            source: "TOP_SIGNALS".into(),
            strategy_id: None,
            chat_id: None,
            is_alpha_token: false,
            reasoning: String::new(),
            reject_reason: None,
            knowledge_note: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn signal_invariant_long_ok() {
        let s = base_signal(SignalType::Long, 10.0, 9.50, 10.50);
        assert!(s.validate_invariants().is_ok());
    }

    #[test]
    fn signal_invariant_long_violated() {
        let s = base_signal(SignalType::Long, 10.0, 10.50, 9.50);
        assert!(s.validate_invariants().is_err());
    }

    #[test]
    fn signal_invariant_short_ok() {
        let s = base_signal(SignalType::Short, 10.0, 10.50, 9.50);
        assert!(s.validate_invariants().is_ok());
    }

    #[test]
    fn neutral_signal_has_no_ordering_requirement() {
        let s = base_signal(SignalType::Neutral, 10.0, 10.50, 9.50);
        assert!(s.validate_invariants().is_ok());
    }

    #[test]
    fn execution_deterministic_id() {
        let id = Execution::deterministic_id("U1", "SIG-001");
        assert_eq!(id, "exec_U1_SIG-001");
    }

    #[test]
    fn position_id_derivation() {
        assert_eq!(Position::id_for_execution("exec_U1_SIG-001"), "pos_exec_U1_SIG-001");
    }

    #[test]
    fn batch_invariant_completed_exceeds_count() {
        let mut b = Batch::new("SIG-001", 10, 1000.0, 2, 5, Utc::now());
        b.completed = 2;
        b.failed = 1;
        assert!(b.check_invariant().is_ok());
        b.completed = 3;
        assert!(b.check_invariant().is_err());
    }

    #[test]
    fn batch_invariant_completed_status_mismatch() {
        let mut b = Batch::new("SIG-001", 10, 1000.0, 2, 5, Utc::now());
        b.status = BatchStatus::Completed;
        b.completed = 1;
        b.failed = 0;
        assert!(b.check_invariant().is_err());
        b.failed = 1;
        assert!(b.check_invariant().is_ok());
    }
}
