//! Market Data Provider (C4, external contract), §6.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;

/// A single OHLCV candle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time: i64,
}

/// The two kline resolutions the Scoring Engine's dimensions read from (§4.6.2).
#[derive(Debug, Clone, Default)]
pub struct Klines {
    pub h1: Vec<Candle>,
    pub h4: Vec<Candle>,
}

/// Everything the Scoring Engine needs for one symbol in a single round-trip (§6).
#[derive(Debug, Clone)]
pub struct ComprehensiveData {
    pub symbol: String,
    pub current_price: f64,
    pub klines: Klines,
    pub open_interest_current: f64,
    pub open_interest_change_24h_pct: f64,
    pub funding_rate_current: f64,
    pub market_cap: f64,
    pub volume_24h: f64,
    pub holders: u64,
    pub listing_time: DateTime<Utc>,
    pub liquidity_usd: f64,
    pub price_high_24h: f64,
    pub price_low_24h: f64,
    pub circulating_supply: f64,
    pub total_supply: f64,
    /// `true` when no futures market exists for this symbol — selects the DEX-only,
    /// 12-dimension scoring variant (§4.6.2).
    pub is_dex_only: bool,
}

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn get_comprehensive_data(&self, symbol: &str) -> EngineResult<ComprehensiveData>;

    async fn get_batch_realtime_prices(&self, symbols: &[String]) -> EngineResult<HashMap<String, f64>>;

    async fn get_all_alpha_tokens_including_dex(&self) -> EngineResult<Vec<String>>;
}
