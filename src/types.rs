//! Shared enums used across the data model (§3).

use serde::{Deserialize, Serialize};

/// Kind of a scored signal, §3/§4.6.3. NEUTRAL must never cause a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalType {
    Long,
    Short,
    Buy,
    Sell,
    Neutral,
}

impl SignalType {
    pub fn is_long_side(self) -> bool {
        matches!(self, Self::Long | Self::Buy)
    }

    pub fn is_short_side(self) -> bool {
        matches!(self, Self::Short | Self::Sell)
    }
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Long => "LONG",
            Self::Short => "SHORT",
            Self::Buy => "BUY",
            Self::Sell => "SELL",
            Self::Neutral => "NEUTRAL",
        };
        write!(f, "{s}")
    }
}

/// Signal lifecycle, §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalStatus {
    Active,
    Triggered,
    Expired,
    HitTp,
    HitSl,
    Rejected,
}

/// Execution state machine, §4.14.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Pending,
    Submitting,
    Submitted,
    Confirmed,
    Holding,
    Exited,
    InsufficientBalance,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// Statuses that block a fresh idempotent re-entry attempt (§3 Execution invariants,
    /// §4.14).
    pub fn blocks_reentry(self) -> bool {
        matches!(self, Self::Pending | Self::Holding | Self::Confirmed)
    }

    /// Terminal statuses — no further state transition is expected.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Exited | Self::Cancelled)
    }

    /// Non-terminal, non-failed: still "in flight" for the token-level mutex in §4.7.b.
    pub fn is_in_flight(self) -> bool {
        !self.is_terminal() && self != Self::Failed
    }
}

/// Position lifecycle, §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Holding,
    Closing,
    Closed,
}

/// Stop-loss mode, §3/§4.8. `DYNAMIC` from the source is intentionally not a variant here —
/// see SPEC_FULL.md §9; any ingress path producing it must map to `Fixed` before construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopLossType {
    Fixed,
    Atr,
    Trailing,
    TimeDecay,
}

/// Take-profit mode, §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TakeProfitMode {
    OneTime,
    Staged,
}

/// Source filter a StrategyConfig subscribes to, §3/§4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FollowStrategy {
    TopSignals,
    TwitterKol,
    Telegram,
    Meme,
    Range,
    Fusion,
    Whitelist,
    All,
}

impl FollowStrategy {
    /// §4.4 step 1: does this strategy's follow mode accept `source`?
    pub fn matches_source(self, source: &str) -> bool {
        match self {
            Self::All => true,
            Self::Whitelist => true, // whitelist is enforced separately, by token
            Self::TopSignals => source.eq_ignore_ascii_case("TOP_SIGNALS"),
            Self::TwitterKol => source.eq_ignore_ascii_case("TWITTER_KOL"),
            Self::Telegram => source.eq_ignore_ascii_case("TELEGRAM"),
            Self::Meme => source.eq_ignore_ascii_case("MEME"),
            Self::Range => source.eq_ignore_ascii_case("RANGE"),
            Self::Fusion => source.eq_ignore_ascii_case("FUSION"),
        }
    }
}

/// Reason an Execution left HOLDING, §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitType {
    StopLoss,
    TakeProfit,
    TakeProfitPartial,
    SignalSell,
    Manual,
    TimeExit,
}

/// Batch lifecycle, §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchStatus {
    Executing,
    Completed,
    Failed,
}

/// Supported chains, §6. Each carries its quote asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Chain {
    Bsc,
    Base,
}

impl Chain {
    pub fn chain_id(self) -> u64 {
        match self {
            Self::Bsc => 56,
            Self::Base => 8453,
        }
    }

    pub fn quote_asset(self) -> &'static str {
        match self {
            Self::Bsc => "USDT",
            Self::Base => "USDC",
        }
    }
}

/// Per-user trade outcome classification returned by the Batch Executor, §4.7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeOutcome {
    Executed,
    Skipped,
    Failed,
}
