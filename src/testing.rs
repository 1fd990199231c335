//! In-memory reference doubles for the external collaborators (§6) that have no concrete
//! production implementation in this crate: Chain Gateway, DEX Aggregator, Knowledge Provider.
//! Not part of the specified core (§1) — they exist so the engine can be wired up and run
//! end-to-end (demo mode) without a live blockchain node, DEX, or LLM backend. Grounded on the
//! teacher's own demo-mode stance in `execution.rs`'s `ExecutionResult::Simulated` path.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::debug;

use crate::error::EngineResult;
use crate::external::chain_gateway::{ChainGateway, SignRequest, TxStatus};
use crate::external::dex_aggregator::{DexAggregator, SwapRequest, SwapTx};
use crate::external::knowledge::{KnowledgeAnswer, KnowledgeProvider};
use crate::types::Chain;

/// Signs nothing and submits nothing; every transaction it hands back reports `Success` as soon
/// as its status is queried. Useful for demo/paused deployments and for exercising the rest of
/// the engine without a signer.
pub struct NullChainGateway {
    next_hash: AtomicU64,
}

impl NullChainGateway {
    pub fn new() -> Self {
        Self { next_hash: AtomicU64::new(1) }
    }
}

impl Default for NullChainGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainGateway for NullChainGateway {
    async fn sign_transaction(&self, request: SignRequest) -> EngineResult<String> {
        let n = self.next_hash.fetch_add(1, Ordering::SeqCst);
        let hash = format!("0xdemo{n:016x}");
        debug!(principal_id = %request.principal_id, hash = %hash, "simulated transaction signed");
        Ok(hash)
    }

    async fn get_transaction_status(&self, _hash: &str, _chain: Chain) -> EngineResult<TxStatus> {
        Ok(TxStatus::Success)
    }
}

/// Quotes a flat, zero-slippage swap against a fixed, generous liquidity pool. No real routing
/// ever happens.
pub struct NullDexAggregator {
    liquidity_usd: f64,
}

impl NullDexAggregator {
    pub fn new(liquidity_usd: f64) -> Self {
        Self { liquidity_usd }
    }
}

impl Default for NullDexAggregator {
    fn default() -> Self {
        Self::new(1_000_000.0)
    }
}

#[async_trait]
impl DexAggregator for NullDexAggregator {
    async fn build_swap_tx(&self, request: SwapRequest) -> EngineResult<SwapTx> {
        Ok(SwapTx {
            router_address: "0xdemoRouter".to_string(),
            tx_data: "0x".to_string(),
            value: "0".to_string(),
            gas_limit: 150_000,
            gas_price: "5".to_string(),
            estimated_slippage_pct: 0.0,
            token_address: request.token_out_address,
            needs_approval: false,
            approval_tx_data: None,
        })
    }

    async fn pool_liquidity_usd(&self, _chain: Chain, _token_address: &str) -> EngineResult<f64> {
        Ok(self.liquidity_usd)
    }
}

/// Always reports no historical knowledge. §4.6.5: a failed/absent provider is a safe no-op —
/// the Scoring Engine proceeds with the raw confidence.
pub struct NullKnowledgeProvider;

#[async_trait]
impl KnowledgeProvider for NullKnowledgeProvider {
    async fn query_historical_cases(
        &self,
        _symbol: &str,
        _signal_type: &str,
        _market_condition: &str,
    ) -> EngineResult<KnowledgeAnswer> {
        Ok(KnowledgeAnswer {
            success: false,
            answer: String::new(),
            source: "none".to_string(),
            similar_cases_count: 0,
        })
    }
}
