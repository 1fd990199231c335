//! Central application state. Grounded 1:1 on the teacher's `src/app_state.rs`: a single
//! `Arc<AppState>` built once at startup that every long-running task clones a handle out of.
//! Unlike the teacher (one strategy, one symbol set, one risk engine) this wires the full C1-C14
//! component graph in its leaves-first dependency order (§2).

use std::sync::Arc;

use tracing::info;

use crate::batch_executor::BatchExecutor;
use crate::config::ConfigLoader;
use crate::data_sync::DataSync;
use crate::error::EngineResult;
use crate::event_bus::EventBus;
use crate::exit_monitor::ExitMonitor;
use crate::external::chain_gateway::ChainGateway;
use crate::external::dex_aggregator::DexAggregator;
use crate::external::knowledge::KnowledgeProvider;
use crate::external::market_data::MarketDataProvider;
use crate::price_watcher::PriceWatcher;
use crate::risk::RiskController;
use crate::scheduler::Scheduler;
use crate::scoring::engine::ScoringEngine;
use crate::store::Store;
use crate::strategy_agent::StrategyAgent;
use crate::transaction_monitor::TransactionMonitor;

/// Every external collaborator (§6) the engine is built against, bundled so callers construct
/// `AppState` with one argument per boundary instead of five.
pub struct Collaborators {
    pub store: Arc<dyn Store>,
    pub chain_gateway: Arc<dyn ChainGateway>,
    pub dex: Arc<dyn DexAggregator>,
    pub market_data: Arc<dyn MarketDataProvider>,
    pub knowledge: Option<Arc<dyn KnowledgeProvider>>,
}

/// The full, wired component graph (C1-C14).
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub event_bus: Arc<EventBus>,

    pub scoring: Arc<ScoringEngine>,
    pub risk: Arc<RiskController>,
    pub batch_executor: Arc<BatchExecutor>,
    pub price_watcher: Arc<PriceWatcher>,
    pub exit_monitor: Arc<ExitMonitor>,
    pub transaction_monitor: Arc<TransactionMonitor>,
    pub data_sync: Arc<DataSync>,
    pub strategy_agent: Arc<StrategyAgent>,
    pub scheduler: Arc<Scheduler>,
    pub config_loader: Arc<ConfigLoader>,
}

impl AppState {
    /// Builds every component in leaves-first order (§2): Risk Controller and Batch Executor
    /// depend only on Store/Chain Gateway/DEX Aggregator; Price Watcher depends on Batch
    /// Executor; Exit Monitor is independent of Price Watcher; Strategy Agent depends on all
    /// three; Scheduler depends on Transaction Monitor and Data Sync.
    pub fn new(collaborators: Collaborators) -> Arc<Self> {
        let Collaborators { store, chain_gateway, dex, market_data, knowledge } = collaborators;

        let event_bus = EventBus::new();
        for agent in [
            "scoring_engine",
            "risk_controller",
            "batch_executor",
            "price_watcher",
            "exit_monitor",
            "transaction_monitor",
            "data_sync",
            "strategy_agent",
            "scheduler",
        ] {
            event_bus.register(agent);
        }

        let scoring = Arc::new(ScoringEngine::new(market_data.clone(), knowledge, store.clone()));
        let risk = Arc::new(RiskController::new(store.clone(), dex.clone()));
        let batch_executor = Arc::new(BatchExecutor::new(store.clone(), dex.clone(), chain_gateway.clone()));
        let price_watcher = Arc::new(PriceWatcher::new(store.clone(), market_data.clone(), batch_executor.clone()));
        let exit_monitor = Arc::new(ExitMonitor::new(store.clone(), market_data.clone(), dex.clone(), chain_gateway.clone()));
        let data_sync = Arc::new(DataSync::new(store.clone(), chain_gateway.clone()));
        let transaction_monitor = Arc::new(TransactionMonitor::new(store.clone(), chain_gateway.clone(), data_sync.clone()));
        let strategy_agent = Arc::new(StrategyAgent::new(
            store.clone(),
            risk.clone(),
            price_watcher.clone(),
            exit_monitor.clone(),
        ));
        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            market_data.clone(),
            transaction_monitor.clone(),
            data_sync.clone(),
        ));
        let config_loader = Arc::new(ConfigLoader::new(store.clone()));

        Arc::new(Self {
            store,
            event_bus,
            scoring,
            risk,
            batch_executor,
            price_watcher,
            exit_monitor,
            transaction_monitor,
            data_sync,
            strategy_agent,
            scheduler,
            config_loader,
        })
    }

    /// Boots every long-running subsystem. Order matters: config before scoring runs, Strategy
    /// Agent recovery before the Scheduler starts issuing new periodic work, Exit Monitor's own
    /// loop spawned directly since the Scheduler never drives it (§4.12 only drives Transaction
    /// Monitor and Data Sync on its own timers).
    pub async fn start(self: &Arc<Self>) -> EngineResult<()> {
        self.config_loader.load_on_boot(&self.scoring).await?;
        self.strategy_agent.initialize().await?;

        tokio::spawn(self.exit_monitor.clone().run());

        self.scheduler.start();

        self.event_bus.publish("app_state", "engine.started", serde_json::json!({}));
        info!("engine started: scoring, risk, batch executor, price watcher, exit monitor, \
               transaction monitor, data sync, strategy agent, scheduler all wired and running");
        Ok(())
    }

    /// Graceful shutdown: stops accepting new signals and tears down in-memory monitor state.
    /// Persisted Store rows are untouched — Data Sync's startup sweep will pick up anything still
    /// mid-flight on the next boot.
    pub async fn shutdown(&self) {
        self.strategy_agent.shutdown().await;
        self.price_watcher.stop_all();
        self.event_bus.publish("app_state", "engine.stopped", serde_json::json!({}));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::testing::{NullChainGateway, NullDexAggregator, NullKnowledgeProvider};
    use std::collections::HashMap;
    use async_trait::async_trait;

    struct StubMarketData;
    #[async_trait]
    impl MarketDataProvider for StubMarketData {
        async fn get_comprehensive_data(&self, _symbol: &str) -> EngineResult<crate::external::market_data::ComprehensiveData> {
            unimplemented!()
        }
        async fn get_batch_realtime_prices(&self, _symbols: &[String]) -> EngineResult<HashMap<String, f64>> {
            Ok(HashMap::new())
        }
        async fn get_all_alpha_tokens_including_dex(&self) -> EngineResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    fn collaborators() -> Collaborators {
        Collaborators {
            store: Arc::new(InMemoryStore::new()),
            chain_gateway: Arc::new(NullChainGateway::new()),
            dex: Arc::new(NullDexAggregator::default()),
            market_data: Arc::new(StubMarketData),
            knowledge: Some(Arc::new(NullKnowledgeProvider)),
        }
    }

    #[tokio::test]
    async fn start_wires_and_boots_every_component() {
        let state = AppState::new(collaborators());
        state.start().await.unwrap();
        assert!(state.event_bus.status().registered_agents.len() >= 9);
        state.shutdown().await;
    }
}
