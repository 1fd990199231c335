// =============================================================================
// Autotrade Engine — Main Entry Point
// =============================================================================
//
// Boots the Store, the external collaborators (§6), and the full C1-C14 component graph via
// AppState, then runs the Scoring Engine's scan loop that feeds freshly generated signals into
// the Strategy Agent — the sole entry point for ACTIVE signals (§4.3).
// =============================================================================

mod app_state;
mod batch_executor;
mod config;
mod data_sync;
mod error;
mod event_bus;
mod exit_monitor;
mod external;
mod indicators;
mod model;
mod price_watcher;
mod risk;
mod runtime_config;
mod scheduler;
mod scoring;
mod store;
mod strategy_agent;
#[cfg(any(test, feature = "testing"))]
mod testing;
mod transaction_monitor;
mod types;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::{AppState, Collaborators};
use crate::external::binance_client::BinanceMarketDataProvider;
use crate::runtime_config::EngineConfig;
use crate::store::InMemoryStore;
use crate::testing::{NullChainGateway, NullDexAggregator, NullKnowledgeProvider};

const ENGINE_CONFIG_PATH: &str = "engine_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("autotrade engine starting up");

    let engine_config = EngineConfig::load(ENGINE_CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load engine config, using defaults");
        EngineConfig::default()
    });
    info!(watchlist = engine_config.watchlist.len(), interval_s = engine_config.scan_interval_secs, "engine config resolved");

    // ── External collaborators (§6) ──────────────────────────────────────
    // Market Data Provider is the one collaborator with a runnable concrete adapter in this
    // crate (Binance REST, via API-key env vars); Chain Gateway, DEX Aggregator, and Knowledge
    // Provider have no production implementation here (§1: they're out-of-scope external
    // collaborators) — the in-memory reference doubles stand in so the engine runs end-to-end.
    let api_key = std::env::var("BINANCE_API_KEY").unwrap_or_default();
    let api_secret = std::env::var("BINANCE_API_SECRET").unwrap_or_default();
    let market_data = Arc::new(BinanceMarketDataProvider::new(api_key, api_secret));

    let state = AppState::new(Collaborators {
        store: Arc::new(InMemoryStore::new()),
        chain_gateway: Arc::new(NullChainGateway::new()),
        dex: Arc::new(NullDexAggregator::default()),
        market_data,
        knowledge: Some(Arc::new(NullKnowledgeProvider)),
    });

    state.start().await?;

    // ── Scoring Engine scan loop ──────────────────────────────────────────
    // For each watched token: score it, and if it clears the confidence bar (§4.13), hand the
    // resulting ACTIVE signal straight to the Strategy Agent, the sole entry point for ACTIVE
    // signals (§4.3). Failures are logged and the loop moves on to the next token/tick — matching
    // the Strategy Agent's own "swallow and retry on the next tick" stance on `handleNewSignal`.
    let scan_state = state.clone();
    let watchlist = engine_config.watchlist.clone();
    let scan_interval = tokio::time::Duration::from_secs(engine_config.scan_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(scan_interval);
        loop {
            ticker.tick().await;
            for token in &watchlist {
                let result = scan_state
                    .scoring
                    .generate_signal(&token.symbol, token.chain, token.contract_address.clone(), &token.source)
                    .await;
                match result {
                    Ok(Some(signal)) => {
                        info!(symbol = %token.symbol, signal_id = %signal.id, signal_type = %signal.signal_type, "signal generated");
                        scan_state.event_bus.publish("scoring_engine", "signal.generated", serde_json::json!({"id": signal.id, "symbol": token.symbol}));
                        scan_state.strategy_agent.handle_new_signal(signal).await;
                    }
                    Ok(None) => {}
                    Err(e) => warn!(symbol = %token.symbol, error = %e, "signal generation failed"),
                }
            }
        }
    });

    info!("all subsystems running. press ctrl+c to stop.");

    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping gracefully");

    state.shutdown().await;
    if let Err(e) = engine_config.save(ENGINE_CONFIG_PATH) {
        error!(error = %e, "failed to save engine config on shutdown");
    }

    info!("autotrade engine shut down complete");
    Ok(())
}
