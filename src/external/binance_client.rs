//! Reference `MarketDataProvider` adapter backed by the Binance REST API.
//!
//! This is *not* part of the specified core (§1: market-data providers are an out-of-scope
//! external collaborator) — it exists purely so the crate has one concrete, runnable
//! implementation of the trait to wire up in `main.rs`. Any other provider implementing
//! [`MarketDataProvider`] plugs in without the rest of the engine noticing.
//!
//! HMAC-SHA256 signing and klines parsing are carried over from the teacher's Binance client
//! almost unchanged; the public surface is narrowed down to what [`MarketDataProvider`] needs.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, instrument, warn};

use crate::error::{EngineError, EngineResult};
use crate::external::market_data::{Candle, ComprehensiveData, Klines, MarketDataProvider};

type HmacSha256 = Hmac<Sha256>;

const RECV_WINDOW: u64 = 5000;

/// Binance REST API client with HMAC-SHA256 request signing.
#[derive(Clone)]
pub struct BinanceMarketDataProvider {
    api_key: String,
    secret: String,
    base_url: String,
    client: reqwest::Client,
}

impl BinanceMarketDataProvider {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            api_key: api_key.into(),
            secret: secret.into(),
            base_url: "https://api.binance.com".to_string(),
            client,
        }
    }

    fn sign(&self, query: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }

    #[allow(dead_code)]
    fn signed_query(&self, params: &str) -> String {
        let ts = Self::timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}&recvWindow={RECV_WINDOW}")
        } else {
            format!("{params}&timestamp={ts}&recvWindow={RECV_WINDOW}")
        };
        let sig = self.sign(&base);
        format!("{base}&signature={sig}")
    }

    #[instrument(skip(self), name = "binance::get_klines")]
    async fn get_klines(&self, symbol: &str, interval: &str, limit: u32) -> EngineResult<Vec<Candle>> {
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url, symbol, interval, limit
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::transient(anyhow::anyhow!(e)))?;

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| EngineError::transient(anyhow::anyhow!(e)))?;

        let raw = body
            .as_array()
            .ok_or_else(|| EngineError::transient(anyhow::anyhow!("klines response is not an array")))?;

        let mut candles = Vec::with_capacity(raw.len());
        for entry in raw {
            let Some(arr) = entry.as_array() else { continue };
            if arr.len() < 7 {
                warn!("skipping malformed kline entry with {} elements", arr.len());
                continue;
            }
            let open_time = arr[0].as_i64().unwrap_or(0);
            let open = parse_str_f64(&arr[1]).unwrap_or(0.0);
            let high = parse_str_f64(&arr[2]).unwrap_or(0.0);
            let low = parse_str_f64(&arr[3]).unwrap_or(0.0);
            let close = parse_str_f64(&arr[4]).unwrap_or(0.0);
            let volume = parse_str_f64(&arr[5]).unwrap_or(0.0);
            let close_time = arr[6].as_i64().unwrap_or(0);
            candles.push(Candle {
                open_time,
                open,
                high,
                low,
                close,
                volume,
                close_time,
            });
        }

        debug!(symbol, interval, count = candles.len(), "klines fetched");
        Ok(candles)
    }

    #[instrument(skip(self), name = "binance::get_ticker_price")]
    async fn get_ticker_price(&self, symbol: &str) -> EngineResult<f64> {
        let url = format!("{}/api/v3/ticker/price?symbol={}", self.base_url, symbol);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::transient(anyhow::anyhow!(e)))?;
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| EngineError::transient(anyhow::anyhow!(e)))?;
        parse_str_f64(&body["price"])
            .ok_or_else(|| EngineError::transient(anyhow::anyhow!("missing price field")))
    }
}

fn parse_str_f64(val: &serde_json::Value) -> Option<f64> {
    if let Some(s) = val.as_str() {
        s.parse::<f64>().ok()
    } else {
        val.as_f64()
    }
}

#[async_trait]
impl MarketDataProvider for BinanceMarketDataProvider {
    async fn get_comprehensive_data(&self, symbol: &str) -> EngineResult<ComprehensiveData> {
        let h1 = self.get_klines(symbol, "1h", 50).await?;
        let h4 = self.get_klines(symbol, "4h", 50).await?;
        let current_price = h1.last().map(|c| c.close).unwrap_or(0.0);
        let high_24h = h1.iter().rev().take(24).map(|c| c.high).fold(0.0, f64::max);
        let low_24h = h1
            .iter()
            .rev()
            .take(24)
            .map(|c| c.low)
            .fold(f64::INFINITY, f64::min);
        let volume_24h: f64 = h1.iter().rev().take(24).map(|c| c.volume).sum();

        Ok(ComprehensiveData {
            symbol: symbol.to_string(),
            current_price,
            klines: Klines { h1, h4 },
            open_interest_current: 0.0,
            open_interest_change_24h_pct: 0.0,
            funding_rate_current: 0.0,
            market_cap: 0.0,
            volume_24h,
            holders: 0,
            listing_time: Utc.timestamp_opt(0, 0).single().unwrap_or_else(Utc::now),
            liquidity_usd: 0.0,
            price_high_24h: high_24h,
            price_low_24h: if low_24h.is_finite() { low_24h } else { 0.0 },
            circulating_supply: 0.0,
            total_supply: 0.0,
            is_dex_only: false,
        })
    }

    async fn get_batch_realtime_prices(&self, symbols: &[String]) -> EngineResult<HashMap<String, f64>> {
        let mut out = HashMap::with_capacity(symbols.len());
        for symbol in symbols {
            // 500ms spacing between price-refresh calls, §5.
            let price = self.get_ticker_price(symbol).await?;
            out.insert(symbol.clone(), price);
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        }
        Ok(out)
    }

    async fn get_all_alpha_tokens_including_dex(&self) -> EngineResult<Vec<String>> {
        // The reference adapter has no concept of the "Binance Alpha" listing; a real
        // deployment would call the dedicated endpoint. Left empty rather than fabricated.
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signing_is_deterministic_for_same_input() {
        let client = BinanceMarketDataProvider::new("key", "secret");
        let sig1 = client.sign("symbol=BTCUSDT&timestamp=1000");
        let sig2 = client.sign("symbol=BTCUSDT&timestamp=1000");
        assert_eq!(sig1, sig2);
        assert_eq!(sig1.len(), 64); // hex-encoded SHA256
    }

    #[test]
    fn signing_differs_for_different_input() {
        let client = BinanceMarketDataProvider::new("key", "secret");
        assert_ne!(client.sign("a=1"), client.sign("a=2"));
    }

    #[test]
    fn parse_str_f64_handles_string_and_number() {
        assert_eq!(parse_str_f64(&serde_json::json!("1.5")), Some(1.5));
        assert_eq!(parse_str_f64(&serde_json::json!(2.5)), Some(2.5));
        assert_eq!(parse_str_f64(&serde_json::json!(null)), None);
    }
}
