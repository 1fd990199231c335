//! Transaction Monitor (C10), §4.10. Grounded on `reconcile.rs`'s polling-and-classifying shape
//! (fetch external state, bucket local rows against it, log and move on) narrowed to a single
//! status transition per submitted execution rather than a full balance/order reconciliation.
//! On confirmation it hands off to Data Sync's `onTradeEntry` (§4.11), which is where the
//! Position row actually gets created — never at submission time (§4.14's state machine).

use std::sync::Arc;
use std::time::Duration as StdDuration;

use tracing::{info, instrument, warn};

use crate::data_sync::DataSync;
use crate::error::EngineResult;
use crate::external::chain_gateway::{ChainGateway, TxStatus};
use crate::store::Store;
use crate::types::ExecutionStatus;

const POLL_INTERVAL: StdDuration = StdDuration::from_secs(30);

pub struct TransactionMonitor {
    store: Arc<dyn Store>,
    chain_gateway: Arc<dyn ChainGateway>,
    data_sync: Arc<DataSync>,
}

impl TransactionMonitor {
    pub fn new(store: Arc<dyn Store>, chain_gateway: Arc<dyn ChainGateway>, data_sync: Arc<DataSync>) -> Self {
        Self { store, chain_gateway, data_sync }
    }

    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(e) = self.tick().await {
                warn!(error = %e, "transaction monitor tick failed");
            }
        }
    }

    /// §4.10: every SUBMITTED execution is asked for a receipt; SUCCESS confirms, FAILED fails,
    /// anything still pending is left untouched for the next tick.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> EngineResult<()> {
        let submitted = self.store.list_executions_by_status(ExecutionStatus::Submitted).await?;
        for mut execution in submitted {
            let Some(tx_hash) = execution.entry_tx_hash.clone() else {
                warn!(execution_id = %execution.id, "SUBMITTED execution has no tx hash — skipping");
                continue;
            };

            let status = match self.chain_gateway.get_transaction_status(&tx_hash, execution.chain).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(execution_id = %execution.id, error = %e, "receipt check failed — retry next tick");
                    continue;
                }
            };

            match status {
                TxStatus::Success => {
                    execution.status = ExecutionStatus::Confirmed;
                    self.store.upsert_execution(execution.clone()).await?;
                    info!(execution_id = %execution.id, "execution confirmed on-chain");
                    // §4.10/4.11: Position creation happens only now, after on-chain confirmation,
                    // never at submission time.
                    self.data_sync.on_trade_entry(&execution.id).await?;
                }
                TxStatus::Failed => {
                    execution.status = ExecutionStatus::Failed;
                    execution.error_message = Some("on-chain transaction failed".to_string());
                    self.store.upsert_execution(execution.clone()).await?;
                    warn!(execution_id = %execution.id, "execution failed on-chain");
                }
                TxStatus::Pending => {}
            }
        }
        Ok(())
    }
}
