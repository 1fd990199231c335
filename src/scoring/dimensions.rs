//! The fourteen scoring dimensions, §4.6.2. Each function is pure and operates on a single
//! [`ComprehensiveData`] snapshot, mirroring the reference strategy engine's one-signal-per-block
//! shape (`src/strategy.rs`) generalised from ad-hoc indicator names to these fixed dimensions.

use chrono::Utc;

use crate::external::market_data::{Candle, ComprehensiveData};
use crate::indicators::{ema, rsi};
use crate::types::SignalType;

/// Output of one scoring dimension: a strength in `[0, 100]` and a directional vote.
#[derive(Debug, Clone)]
pub struct DimensionOutput {
    pub name: &'static str,
    pub score: f64,
    pub vote: SignalType,
    pub description: String,
}

impl DimensionOutput {
    fn new(name: &'static str, score: f64, vote: SignalType, description: impl Into<String>) -> Self {
        let score = if score.is_finite() { score.clamp(0.0, 100.0) } else { 0.0 };
        Self { name, score, vote, description: description.into() }
    }
}

pub const DIMENSION_NAMES: [&str; 14] = [
    "oi_funding",
    "trend",
    "candle_pattern",
    "volume",
    "key_levels",
    "rsi",
    "macd",
    "pullback_risk",
    "liquidity_risk",
    "volatility_risk",
    "liquidation_risk",
    "new_token_risk",
    "whale_risk",
    "volume_price_divergence",
];

/// DEX-only tokens have no futures market, so the OI-dependent dimensions collapse out, §4.6.2.
pub const DEX_ONLY_DIMENSION_NAMES: [&str; 12] = [
    "trend",
    "candle_pattern",
    "volume",
    "key_levels",
    "rsi",
    "macd",
    "pullback_risk",
    "liquidity_risk",
    "volatility_risk",
    "new_token_risk",
    "whale_risk",
    "volume_price_divergence",
];

/// Evaluate every applicable dimension for `data`, selecting the 14- or 12-dimension variant
/// per `data.is_dex_only`.
pub fn evaluate_all(data: &ComprehensiveData) -> Vec<DimensionOutput> {
    let mut out = Vec::with_capacity(14);
    if !data.is_dex_only {
        out.push(oi_funding(data));
    }
    out.push(trend(data));
    out.push(candle_pattern(data));
    out.push(volume(data));
    out.push(key_levels(data));
    out.push(rsi_dimension(data));
    out.push(macd(data));
    out.push(pullback_risk(data));
    out.push(liquidity_risk(data));
    out.push(volatility_risk(data));
    if !data.is_dex_only {
        out.push(liquidation_risk(data));
    }
    out.push(new_token_risk(data));
    out.push(whale_risk(data));
    out.push(volume_price_divergence(data));
    out
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        0.0
    } else {
        xs.iter().sum::<f64>() / xs.len() as f64
    }
}

fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}

/// §4.6.2: 90 when OI↑>10% and funding negative (crowd short, whales long); 85 when OI↑>10% and
/// funding>0.001 (crowd long, squeeze risk); 75 on capitulation (OI down >10%); else 60/40.
pub fn oi_funding(data: &ComprehensiveData) -> DimensionOutput {
    let oi_chg = data.open_interest_change_24h_pct;
    let fr = data.funding_rate_current;

    if oi_chg > 10.0 && fr < 0.0 {
        DimensionOutput::new("oi_funding", 90.0, SignalType::Long, "OI surge with negative funding — crowd short, whales accumulating")
    } else if oi_chg > 10.0 && fr > 0.001 {
        DimensionOutput::new("oi_funding", 85.0, SignalType::Short, "OI surge with rich positive funding — crowded longs, squeeze risk")
    } else if oi_chg < -10.0 {
        DimensionOutput::new("oi_funding", 75.0, SignalType::Neutral, "OI capitulation — deleveraging, direction unclear")
    } else if fr < 0.0 {
        DimensionOutput::new("oi_funding", 60.0, SignalType::Long, "mild negative funding bias")
    } else {
        DimensionOutput::new("oi_funding", 40.0, SignalType::Short, "mild positive funding bias")
    }
}

/// §4.6.2: MA20 vs MA50 vs price on 4h klines.
pub fn trend(data: &ComprehensiveData) -> DimensionOutput {
    let h4 = closes(&data.klines.h4);
    if h4.len() < 50 {
        return DimensionOutput::new("trend", 0.0, SignalType::Neutral, "insufficient 4h history");
    }
    let ma20 = mean(&h4[h4.len() - 20..]);
    let ma50 = mean(&h4[h4.len() - 50..]);
    let price = data.current_price;

    if price > ma20 && ma20 > ma50 {
        DimensionOutput::new("trend", 80.0, SignalType::Long, "price above MA20 above MA50 — bullish alignment")
    } else if price < ma20 && ma20 < ma50 {
        DimensionOutput::new("trend", 80.0, SignalType::Short, "price below MA20 below MA50 — bearish alignment")
    } else {
        DimensionOutput::new("trend", 40.0, SignalType::Neutral, "MA20/MA50 not aligned with price")
    }
}

/// §4.6.2: hammer / inverted hammer / engulfing / consecutive rise-fall on 1h candles.
pub fn candle_pattern(data: &ComprehensiveData) -> DimensionOutput {
    let h1 = &data.klines.h1;
    if h1.len() < 4 {
        return DimensionOutput::new("candle_pattern", 0.0, SignalType::Neutral, "insufficient 1h history");
    }

    let last = &h1[h1.len() - 1];
    let prev = &h1[h1.len() - 2];

    let last_body = (last.close - last.open).abs();

    // Bullish/bearish engulfing: last candle's body fully contains the previous one's.
    if prev.close < prev.open && last.close > last.open && last.close > prev.open && last.open < prev.close {
        return DimensionOutput::new("candle_pattern", 75.0, SignalType::Long, "bullish engulfing");
    }
    if prev.close > prev.open && last.close < last.open && last.open > prev.close && last.close < prev.open {
        return DimensionOutput::new("candle_pattern", 75.0, SignalType::Short, "bearish engulfing");
    }

    // Hammer: small body near the top of the range, long lower wick, short upper wick.
    let range = last.high - last.low;
    if range > 0.0 {
        let lower_wick = last.open.min(last.close) - last.low;
        let upper_wick = last.high - last.open.max(last.close);
        if last_body < range * 0.3 && lower_wick > last_body * 2.0 && upper_wick < last_body {
            return DimensionOutput::new("candle_pattern", 65.0, SignalType::Long, "hammer — rejection of lower wick");
        }
        if last_body < range * 0.3 && upper_wick > last_body * 2.0 && lower_wick < last_body {
            return DimensionOutput::new("candle_pattern", 60.0, SignalType::Short, "inverted hammer — rejection of upper wick");
        }
    }

    // Consecutive rise/fall over the last 3 candles.
    if h1.len() >= 3 {
        let last3 = &h1[h1.len() - 3..];
        if last3.iter().all(|c| c.close > c.open) {
            return DimensionOutput::new("candle_pattern", 55.0, SignalType::Long, "three consecutive rising candles");
        }
        if last3.iter().all(|c| c.close < c.open) {
            return DimensionOutput::new("candle_pattern", 55.0, SignalType::Short, "three consecutive falling candles");
        }
    }

    DimensionOutput::new("candle_pattern", 30.0, SignalType::Neutral, "no recognised pattern")
}

/// §4.6.2: ratio current / mean(20): >2 surge, >1.5 moderate, <0.5 decline.
pub fn volume(data: &ComprehensiveData) -> DimensionOutput {
    let h1 = &data.klines.h1;
    if h1.len() < 20 {
        return DimensionOutput::new("volume", 0.0, SignalType::Neutral, "insufficient 1h history");
    }
    let window = &h1[h1.len() - 20..];
    let avg = mean(&window.iter().map(|c| c.volume).collect::<Vec<_>>());
    let current = h1.last().map(|c| c.volume).unwrap_or(0.0);
    let ratio = if avg > 0.0 { current / avg } else { 0.0 };

    let last_up = h1.last().map(|c| c.close >= c.open).unwrap_or(true);
    let direction = if last_up { SignalType::Long } else { SignalType::Short };

    if ratio > 2.0 {
        DimensionOutput::new("volume", 85.0, direction, format!("volume surge {ratio:.1}x 20-bar average"))
    } else if ratio > 1.5 {
        DimensionOutput::new("volume", 65.0, direction, format!("moderate volume increase {ratio:.1}x"))
    } else if ratio < 0.5 {
        DimensionOutput::new("volume", 30.0, SignalType::Neutral, format!("volume decline {ratio:.1}x"))
    } else {
        DimensionOutput::new("volume", 40.0, SignalType::Neutral, "volume in normal range")
    }
}

/// §4.6.2: proximity to 20-bar 4h high/low, break-of-resistance.
pub fn key_levels(data: &ComprehensiveData) -> DimensionOutput {
    let h4 = &data.klines.h4;
    if h4.len() < 20 {
        return DimensionOutput::new("key_levels", 0.0, SignalType::Neutral, "insufficient 4h history");
    }
    let window = &h4[h4.len() - 20..];
    let range_high = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let range_low = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    let price = data.current_price;

    if price > range_high {
        DimensionOutput::new("key_levels", 80.0, SignalType::Long, "breakout above 20-bar 4h high")
    } else if price < range_low {
        DimensionOutput::new("key_levels", 80.0, SignalType::Short, "breakdown below 20-bar 4h low")
    } else if range_high > 0.0 && (range_high - price) / range_high < 0.01 {
        DimensionOutput::new("key_levels", 55.0, SignalType::Short, "testing resistance")
    } else if range_low > 0.0 && (price - range_low) / range_low < 0.01 {
        DimensionOutput::new("key_levels", 55.0, SignalType::Long, "testing support")
    } else {
        DimensionOutput::new("key_levels", 30.0, SignalType::Neutral, "mid-range")
    }
}

/// §4.6.2: RSI(14, 1h): <30 long, >70 short.
pub fn rsi_dimension(data: &ComprehensiveData) -> DimensionOutput {
    let h1 = closes(&data.klines.h1);
    let Some((value, _)) = rsi::current_rsi(&h1, 14) else {
        return DimensionOutput::new("rsi", 0.0, SignalType::Neutral, "insufficient 1h history");
    };

    if value < 30.0 {
        DimensionOutput::new("rsi", 60.0 + (30.0 - value), SignalType::Long, format!("RSI {value:.1} oversold"))
    } else if value > 70.0 {
        DimensionOutput::new("rsi", 60.0 + (value - 70.0), SignalType::Short, format!("RSI {value:.1} overbought"))
    } else {
        DimensionOutput::new("rsi", 30.0, SignalType::Neutral, format!("RSI {value:.1} neutral"))
    }
}

/// §4.6.2: golden/death cross on 1h MACD histogram sign change.
pub fn macd(data: &ComprehensiveData) -> DimensionOutput {
    let c = closes(&data.klines.h1);
    if c.len() < 35 {
        return DimensionOutput::new("macd", 0.0, SignalType::Neutral, "insufficient 1h history");
    }

    let ema12 = ema::calculate_ema(&c, 12);
    let ema26 = ema::calculate_ema(&c, 26);
    let offset = ema12.len().saturating_sub(ema26.len());
    let macd_line: Vec<f64> = ema26
        .iter()
        .enumerate()
        .map(|(i, &slow)| ema12[i + offset] - slow)
        .collect();
    let signal = ema::calculate_ema(&macd_line, 9);
    if signal.len() < 2 {
        return DimensionOutput::new("macd", 0.0, SignalType::Neutral, "insufficient history for signal line");
    }
    let macd_offset = macd_line.len() - signal.len();
    let hist_prev = macd_line[macd_offset + signal.len() - 2] - signal[signal.len() - 2];
    let hist_now = macd_line[macd_offset + signal.len() - 1] - signal[signal.len() - 1];

    if hist_prev <= 0.0 && hist_now > 0.0 {
        DimensionOutput::new("macd", 70.0, SignalType::Long, "MACD golden cross")
    } else if hist_prev >= 0.0 && hist_now < 0.0 {
        DimensionOutput::new("macd", 70.0, SignalType::Short, "MACD death cross")
    } else {
        DimensionOutput::new("macd", 30.0, SignalType::Neutral, "no MACD cross")
    }
}

/// §4.6.2: 24h pct change vs RSI; EXTREME when +30% and RSI>70 (mirrored for the downside).
pub fn pullback_risk(data: &ComprehensiveData) -> DimensionOutput {
    let h1 = closes(&data.klines.h1);
    let Some((rsi_value, _)) = rsi::current_rsi(&h1, 14) else {
        return DimensionOutput::new("pullback_risk", 0.0, SignalType::Neutral, "insufficient 1h history");
    };
    let pct_24h = if h1.len() >= 25 {
        let then = h1[h1.len() - 25];
        if then > 0.0 { (data.current_price - then) / then * 100.0 } else { 0.0 }
    } else {
        0.0
    };

    if pct_24h > 30.0 && rsi_value > 70.0 {
        DimensionOutput::new("pullback_risk", 90.0, SignalType::Short, "extreme pullback risk — up >30% with RSI overbought")
    } else if pct_24h > 15.0 && rsi_value > 60.0 {
        DimensionOutput::new("pullback_risk", 60.0, SignalType::Short, "elevated pullback risk")
    } else if pct_24h < -30.0 && rsi_value < 30.0 {
        DimensionOutput::new("pullback_risk", 90.0, SignalType::Long, "extreme bounce risk — down >30% with RSI oversold")
    } else if pct_24h < -15.0 && rsi_value < 40.0 {
        DimensionOutput::new("pullback_risk", 60.0, SignalType::Long, "elevated bounce risk")
    } else {
        DimensionOutput::new("pullback_risk", 25.0, SignalType::Neutral, "no elevated pullback/bounce risk")
    }
}

/// §4.6.2: absolute pool liquidity plus turnover rate. A risk gauge — never itself directional.
pub fn liquidity_risk(data: &ComprehensiveData) -> DimensionOutput {
    let liq = data.liquidity_usd;
    let score = if liq >= 1_000_000.0 {
        90.0
    } else if liq >= 500_000.0 {
        75.0
    } else if liq >= 200_000.0 {
        60.0
    } else if liq >= 50_000.0 {
        40.0
    } else {
        15.0
    };
    DimensionOutput::new("liquidity_risk", score, SignalType::Neutral, format!("pool liquidity ${liq:.0}"))
}

/// §4.6.2: 24h high/low amplitude or mean hourly range.
pub fn volatility_risk(data: &ComprehensiveData) -> DimensionOutput {
    let low = data.price_low_24h;
    let amplitude = if low > 0.0 {
        (data.price_high_24h - low) / low * 100.0
    } else {
        0.0
    };
    let score = if amplitude > 20.0 {
        85.0
    } else if amplitude > 10.0 {
        60.0
    } else if amplitude > 5.0 {
        40.0
    } else {
        20.0
    };
    DimensionOutput::new("volatility_risk", score, SignalType::Neutral, format!("24h amplitude {amplitude:.1}%"))
}

/// §4.6.2: OI/MC ratio crossed with funding rate (squeeze direction).
pub fn liquidation_risk(data: &ComprehensiveData) -> DimensionOutput {
    let ratio = if data.market_cap > 0.0 {
        data.open_interest_current / data.market_cap
    } else {
        0.0
    };
    if ratio > 0.15 && data.funding_rate_current > 0.001 {
        DimensionOutput::new("liquidation_risk", 85.0, SignalType::Short, "overleveraged longs — long-squeeze risk")
    } else if ratio > 0.15 && data.funding_rate_current < -0.001 {
        DimensionOutput::new("liquidation_risk", 80.0, SignalType::Long, "overleveraged shorts — short-squeeze risk")
    } else {
        DimensionOutput::new("liquidation_risk", 30.0, SignalType::Neutral, "OI/MC ratio unremarkable")
    }
}

/// §4.6.2: age since listing time.
pub fn new_token_risk(data: &ComprehensiveData) -> DimensionOutput {
    let age_days = (Utc::now() - data.listing_time).num_hours() as f64 / 24.0;
    let score = if age_days < 1.0 {
        90.0
    } else if age_days < 7.0 {
        70.0
    } else if age_days < 30.0 {
        45.0
    } else {
        15.0
    };
    DimensionOutput::new("new_token_risk", score, SignalType::Neutral, format!("listed {age_days:.1} days ago"))
}

/// §4.6.2: holders count times circulation ratio heuristic.
pub fn whale_risk(data: &ComprehensiveData) -> DimensionOutput {
    let circ_ratio = if data.total_supply > 0.0 {
        data.circulating_supply / data.total_supply
    } else {
        1.0
    };
    let score = if data.holders < 500 && circ_ratio < 0.3 {
        85.0
    } else if data.holders < 2_000 {
        55.0
    } else {
        20.0
    };
    DimensionOutput::new(
        "whale_risk",
        score,
        SignalType::Neutral,
        format!("{} holders, {:.0}% circulating", data.holders, circ_ratio * 100.0),
    )
}

/// §4.6.2: last 5 candles price-up with volume-down suggests a fake breakout.
pub fn volume_price_divergence(data: &ComprehensiveData) -> DimensionOutput {
    let h1 = &data.klines.h1;
    if h1.len() < 5 {
        return DimensionOutput::new("volume_price_divergence", 0.0, SignalType::Neutral, "insufficient 1h history");
    }
    let window = &h1[h1.len() - 5..];
    let price_up = window.last().unwrap().close > window.first().unwrap().close;
    let volume_down = window.last().unwrap().volume < window.first().unwrap().volume;

    if price_up && volume_down {
        DimensionOutput::new("volume_price_divergence", 75.0, SignalType::Short, "price up on declining volume — possible fake breakout")
    } else if !price_up && volume_down {
        DimensionOutput::new("volume_price_divergence", 50.0, SignalType::Neutral, "price down on declining volume")
    } else {
        DimensionOutput::new("volume_price_divergence", 20.0, SignalType::Neutral, "volume confirms price action")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::market_data::Klines;
    use chrono::{TimeZone, Utc};

    fn candle(open: f64, high: f64, low: f64, close: f64, volume: f64) -> Candle {
        Candle { open_time: 0, open, high, low, close, volume, close_time: 0 }
    }

    fn flat_data(price: f64) -> ComprehensiveData {
        ComprehensiveData {
            symbol: "TESTUSDT".into(),
            current_price: price,
            klines: Klines::default(),
            open_interest_current: 0.0,
            open_interest_change_24h_pct: 0.0,
            funding_rate_current: 0.0,
            market_cap: 0.0,
            volume_24h: 0.0,
            holders: 0,
            listing_time: Utc.timestamp_opt(0, 0).single().unwrap(),
            liquidity_usd: 0.0,
            price_high_24h: price,
            price_low_24h: price,
            circulating_supply: 0.0,
            total_supply: 0.0,
            is_dex_only: false,
        }
    }

    #[test]
    fn oi_funding_whale_long_case() {
        let mut data = flat_data(1.0);
        data.open_interest_change_24h_pct = 15.0;
        data.funding_rate_current = -0.002;
        let out = oi_funding(&data);
        assert_eq!(out.score, 90.0);
        assert_eq!(out.vote, SignalType::Long);
    }

    #[test]
    fn oi_funding_whale_short_case() {
        let mut data = flat_data(1.0);
        data.open_interest_change_24h_pct = 15.0;
        data.funding_rate_current = 0.002;
        let out = oi_funding(&data);
        assert_eq!(out.score, 85.0);
        assert_eq!(out.vote, SignalType::Short);
    }

    #[test]
    fn trend_insufficient_history_is_neutral() {
        let data = flat_data(1.0);
        let out = trend(&data);
        assert_eq!(out.vote, SignalType::Neutral);
    }

    #[test]
    fn trend_bullish_alignment() {
        let mut data = flat_data(100.0);
        data.klines.h4 = (1..=60).map(|i| candle(i as f64, i as f64 + 1.0, i as f64 - 1.0, i as f64, 10.0)).collect();
        data.current_price = 200.0;
        let out = trend(&data);
        assert_eq!(out.vote, SignalType::Long);
    }

    #[test]
    fn liquidity_risk_is_never_directional() {
        let mut data = flat_data(1.0);
        data.liquidity_usd = 2_000_000.0;
        let out = liquidity_risk(&data);
        assert_eq!(out.vote, SignalType::Neutral);
        assert_eq!(out.score, 90.0);
    }

    #[test]
    fn new_token_risk_scales_with_age() {
        let mut data = flat_data(1.0);
        data.listing_time = Utc::now();
        let fresh = new_token_risk(&data);
        data.listing_time = Utc.timestamp_opt(0, 0).single().unwrap();
        let old = new_token_risk(&data);
        assert!(fresh.score > old.score);
    }

    #[test]
    fn evaluate_all_drops_futures_dims_for_dex_only() {
        let mut data = flat_data(1.0);
        data.is_dex_only = true;
        let dims = evaluate_all(&data);
        assert_eq!(dims.len(), 12);
        assert!(dims.iter().all(|d| d.name != "oi_funding" && d.name != "liquidation_risk"));
    }

    #[test]
    fn evaluate_all_includes_all_14_for_futures_tokens() {
        let data = flat_data(1.0);
        let dims = evaluate_all(&data);
        assert_eq!(dims.len(), 14);
    }
}
