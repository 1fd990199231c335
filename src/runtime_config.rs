//! Operational engine configuration — hot-reloadable, loaded from a JSON file on boot with
//! atomic tmp+rename persistence. Distinct from the C14 [`crate::config::ConfigLoader`], which
//! owns the Store-backed scoring weights/thresholds row (§4.13); this covers the handful of
//! process-level settings that are not part of the scored signal pipeline itself — which tokens
//! to scan, on which chain, under which signal source, and how often. Grounded on the teacher's
//! `RuntimeConfig`, trimmed down to the settings that still have a counterpart once circuit
//! breakers and position sizing moved to the per-user `StrategyConfig` row (§3) and the teacher's
//! own feature flags (HTF gate, CUSUM, etc) were dropped with the proprietary filters they gated.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::Chain;

/// One token the Scoring Engine scans on each tick. `contract_address` is `None` only for
/// CEX-quoted symbols, which the Strategy Agent rejects as out of scope (§4.3) — in practice an
/// operator only lists tokens here once they have a resolved on-chain address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchedToken {
    pub symbol: String,
    pub chain: Chain,
    pub contract_address: Option<String>,
    /// Matched against each `StrategyConfig.follow_strategy` (§4.4 step 1).
    pub source: String,
}

fn default_watchlist() -> Vec<WatchedToken> {
    vec![
        WatchedToken {
            symbol: "CAKEUSDT".to_string(),
            chain: Chain::Bsc,
            contract_address: Some("0x0e09fabb73bd3ade0a17ecc321fd13a19e81ce82".to_string()),
            source: "TOP_SIGNALS".to_string(),
        },
        WatchedToken {
            symbol: "DEGENUSDC".to_string(),
            chain: Chain::Base,
            contract_address: Some("0x4ed4e862860bed51a9570b96d89af5e1b0efefed".to_string()),
            source: "TOP_SIGNALS".to_string(),
        },
    ]
}

fn default_scan_interval_secs() -> u64 {
    5
}

/// Process-level settings loaded once at boot and hot-reloadable via [`EngineConfig::load`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Tokens the Scoring Engine scans on each tick.
    #[serde(default = "default_watchlist")]
    pub watchlist: Vec<WatchedToken>,

    /// Interval between Scoring Engine scan passes.
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            watchlist: default_watchlist(),
            scan_interval_secs: default_scan_interval_secs(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file at `path`. Missing fields fall back to their serde
    /// default rather than failing the parse.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;
        info!(path = %path.display(), count = config.watchlist.len(), "engine config loaded");
        Ok(config)
    }

    /// Persist via a temp-file + rename so a crash mid-write never corrupts the config on disk.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self).context("failed to serialise engine config to JSON")?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;
        info!(path = %path.display(), "engine config saved (atomic)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.watchlist[0].symbol, "CAKEUSDT");
        assert_eq!(cfg.scan_interval_secs, 5);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.watchlist.len(), default_watchlist().len());
        assert_eq!(cfg.scan_interval_secs, 5);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "watchlist": [{"symbol": "ETHUSDC", "chain": "Base", "contract_address": null, "source": "MEME"}] }"#;
        let cfg: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.watchlist[0].symbol, "ETHUSDC");
        assert_eq!(cfg.scan_interval_secs, 5);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = EngineConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.watchlist.len(), cfg2.watchlist.len());
        assert_eq!(cfg.scan_interval_secs, cfg2.scan_interval_secs);
    }
}
