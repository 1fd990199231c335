//! External collaborator contracts (§6): Chain Gateway, DEX Aggregator, Market Data Provider,
//! Knowledge Provider. The core depends only on these traits; concrete adapters (including the
//! reference Binance-backed `MarketDataProvider` in [`binance_client`]) are swappable and not
//! themselves part of the specified behaviour.

pub mod binance_client;
pub mod chain_gateway;
pub mod dex_aggregator;
pub mod knowledge;
pub mod market_data;

pub use chain_gateway::{ChainGateway, SignRequest, TxStatus};
pub use dex_aggregator::{DexAggregator, SwapRequest, SwapTx};
pub use knowledge::{KnowledgeAnswer, KnowledgeProvider};
pub use market_data::{ComprehensiveData, Klines, MarketDataProvider};
