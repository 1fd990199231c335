//! Chain Gateway (C3, external contract), §6 — a Privy-style delegated signer. The core never
//! holds a private key; it asks the gateway to sign and submit on its behalf by `principal_id`.

use async_trait::async_trait;

use crate::error::EngineResult;
use crate::types::Chain;

/// An unsigned transaction request, built by the caller (typically from a [`super::SwapTx`]).
#[derive(Debug, Clone)]
pub struct SignRequest {
    pub principal_id: String,
    pub to: String,
    pub data: String,
    pub value: String,
    pub chain_id: u64,
    pub gas: Option<u64>,
    pub gas_price: Option<String>,
}

/// Outcome of asking the Chain Gateway for a transaction's on-chain status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Success,
    Failed,
    Pending,
}

#[async_trait]
pub trait ChainGateway: Send + Sync {
    /// Sign and submit `request` via delegated signing; returns the transaction hash.
    async fn sign_transaction(&self, request: SignRequest) -> EngineResult<String>;

    /// Query the confirmation status of a previously submitted transaction.
    async fn get_transaction_status(&self, hash: &str, chain: Chain) -> EngineResult<TxStatus>;
}
