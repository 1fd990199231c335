//! Price Watcher (C8), §4.5. No reference equivalent — the teacher trades on its own bar-close
//! signal, it never waits for price to re-enter a band. Shaped on `AppState`'s
//! `RwLock<HashMap<String, _>>` monitor-map idiom: one entry per signal, one spawned poll task per
//! entry, removable by key.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::batch_executor::BatchExecutor;
use crate::external::market_data::MarketDataProvider;
use crate::model::{Signal, StrategyConfig};
use crate::store::Store;
use crate::types::SignalStatus;

const DEFAULT_POLL_INTERVAL: StdDuration = StdDuration::from_secs(15);
const NO_BAND_TOLERANCE_PCT: f64 = 1.0;

/// Snapshot of one monitored signal, returned by [`PriceWatcher::get_monitor_status`].
#[derive(Debug, Clone)]
pub struct MonitorStatus {
    pub signal_id: String,
    pub token_symbol: String,
    pub last_price: Option<f64>,
    pub created_at: chrono::DateTime<Utc>,
}

struct Monitor {
    signal: Signal,
    users: Vec<StrategyConfig>,
    last_price: RwLock<Option<f64>>,
    created_at: chrono::DateTime<Utc>,
    handle: JoinHandle<()>,
}

pub struct PriceWatcher {
    store: Arc<dyn Store>,
    market_data: Arc<dyn MarketDataProvider>,
    batch_executor: Arc<BatchExecutor>,
    monitors: Arc<RwLock<HashMap<String, Monitor>>>,
    poll_interval: StdDuration,
}

impl PriceWatcher {
    pub fn new(
        store: Arc<dyn Store>,
        market_data: Arc<dyn MarketDataProvider>,
        batch_executor: Arc<BatchExecutor>,
    ) -> Self {
        Self {
            store,
            market_data,
            batch_executor,
            monitors: Arc::new(RwLock::new(HashMap::new())),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: StdDuration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// §4.5: idempotent per `signal.id` — a second call for an already-monitored signal is a
    /// no-op, it does not spawn a duplicate poll loop.
    #[instrument(skip(self, signal, users), fields(signal_id = %signal.id, token = %signal.token_symbol))]
    pub fn start_monitoring(&self, signal: Signal, users: Vec<StrategyConfig>) {
        if self.monitors.read().contains_key(&signal.id) {
            debug!("signal already monitored");
            return;
        }

        let signal_id = signal.id.clone();
        let store = self.store.clone();
        let market_data = self.market_data.clone();
        let batch_executor = self.batch_executor.clone();
        let monitors = self.monitors.clone();
        let poll_interval = self.poll_interval;
        let signal_for_task = signal.clone();
        let users_for_task = users.clone();

        let handle = tokio::spawn(async move {
            poll_loop(
                signal_for_task,
                users_for_task,
                store,
                market_data,
                batch_executor,
                monitors,
                poll_interval,
            )
            .await;
        });

        self.monitors.write().insert(
            signal_id,
            Monitor { signal, users, last_price: RwLock::new(None), created_at: Utc::now(), handle },
        );
    }

    pub fn stop_monitoring(&self, signal_id: &str) {
        if let Some(monitor) = self.monitors.write().remove(signal_id) {
            monitor.handle.abort();
        }
    }

    pub fn stop_all(&self) {
        let mut monitors = self.monitors.write();
        for (_, monitor) in monitors.drain() {
            monitor.handle.abort();
        }
    }

    pub fn get_monitor_status(&self) -> Vec<MonitorStatus> {
        self.monitors
            .read()
            .values()
            .map(|m| MonitorStatus {
                signal_id: m.signal.id.clone(),
                token_symbol: m.signal.token_symbol.clone(),
                last_price: *m.last_price.read(),
                created_at: m.created_at,
            })
            .collect()
    }
}

/// §4.5 entry rule, standalone so it is independently testable without spinning up a task.
pub fn entry_condition_met(signal: &Signal, current_price: f64) -> bool {
    if signal.entry_min > 0.0 && signal.entry_max > 0.0 && signal.entry_min <= signal.entry_max {
        current_price >= signal.entry_min && current_price <= signal.entry_max
    } else {
        let tolerance = signal.current_price * NO_BAND_TOLERANCE_PCT / 100.0;
        (current_price - signal.current_price).abs() <= tolerance
    }
}

#[allow(clippy::too_many_arguments)]
async fn poll_loop(
    signal: Signal,
    users: Vec<StrategyConfig>,
    store: Arc<dyn Store>,
    market_data: Arc<dyn MarketDataProvider>,
    batch_executor: Arc<BatchExecutor>,
    monitors: Arc<RwLock<HashMap<String, Monitor>>>,
    poll_interval: StdDuration,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    loop {
        ticker.tick().await;

        if signal.is_expired(Utc::now()) {
            if let Err(e) = store.expire_signal(&signal.id).await {
                warn!(signal_id = %signal.id, error = %e, "failed to mark expired signal");
            }
            monitors.write().remove(&signal.id);
            return;
        }

        let prices = match market_data.get_batch_realtime_prices(&[signal.token_symbol.clone()]).await {
            Ok(p) => p,
            Err(e) => {
                warn!(signal_id = %signal.id, error = %e, "price poll failed — will retry next tick");
                continue;
            }
        };
        let Some(&current_price) = prices.get(&signal.token_symbol) else {
            continue;
        };

        if let Some(m) = monitors.read().get(&signal.id) {
            *m.last_price.write() = Some(current_price);
        }

        if entry_condition_met(&signal, current_price) {
            info!(signal_id = %signal.id, current_price, "entry condition met — firing batch executor");
            if let Err(e) = batch_executor.execute_batch_trades(&signal, &users, current_price).await {
                warn!(signal_id = %signal.id, error = %e, "batch execution failed");
            }
            if let Err(e) = store.expire_signal(&signal.id).await {
                debug!(signal_id = %signal.id, error = %e, "expire_signal no-op: already TRIGGERED by batch path");
            }
            monitors.write().remove(&signal.id);
            return;
        }
    }
}
