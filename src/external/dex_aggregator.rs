//! DEX Aggregator (external contract), §6.

use async_trait::async_trait;

use crate::error::EngineResult;
use crate::types::Chain;

#[derive(Debug, Clone)]
pub struct SwapRequest {
    pub chain: Chain,
    pub token_in: String,
    pub token_out: String,
    pub token_out_address: String,
    pub amount_in: f64,
    pub slippage_pct: f64,
    pub user_address: String,
    /// Four.meme bonding-curve tokens need a different route; `None` for ordinary DEX pairs.
    pub is_four_meme: bool,
}

/// A swap transaction quoted and ready for signing.
#[derive(Debug, Clone)]
pub struct SwapTx {
    pub router_address: String,
    pub tx_data: String,
    pub value: String,
    pub gas_limit: u64,
    pub gas_price: String,
    pub estimated_slippage_pct: f64,
    pub token_address: String,
    pub needs_approval: bool,
    /// Present iff `needs_approval`; submitted first, then the caller waits ~5s (§4.7.f)
    /// before the main swap.
    pub approval_tx_data: Option<String>,
}

#[async_trait]
pub trait DexAggregator: Send + Sync {
    /// Quote and build a swap transaction. Fails with `EngineError::TransientExternal` on quote
    /// failure (no route, stale liquidity snapshot, etc).
    async fn build_swap_tx(&self, request: SwapRequest) -> EngineResult<SwapTx>;

    /// Current pool liquidity for `token_out_address` on `chain`, in USD. Used by the Batch
    /// Executor's pre-flight liquidity gate (§4.7.2) and the Risk Controller's liquidity check
    /// (§4.4.3).
    async fn pool_liquidity_usd(&self, chain: Chain, token_address: &str) -> EngineResult<f64>;
}
