//! Settlement worker
//!
//! Every poll interval, scan the payment ledger for pending rows and move
//! the funds: parse the display amount into USDC units, submit an ERC-20
//! `transfer(operator, units)` through the chain client, await the
//! receipt, and mark the row settled with its transaction hash.
//!
//! Failures increment an in-memory retry counter per payment id; after
//! [`MAX_SETTLEMENT_RETRIES`] consecutive failures the row is parked until
//! operator intervention. A success clears the counter. A single worker
//! runs per process, so no per-id lease is needed.

use crate::chain::ChainClient;
use crate::config::{parse_display_amount, Config};
use crate::crypto::parse_address;
use crate::store::PaymentStore;
use crate::types::{ChainConfig, PaymentRecord};
use crate::{ProofportError, Result};
use ethereum_types::U256;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Consecutive failures before a payment is parked
pub const MAX_SETTLEMENT_RETRIES: u32 = 3;

/// Default scan interval
const POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Receipt wait per settlement attempt
const RECEIPT_TIMEOUT: Duration = Duration::from_secs(120);

/// Periodic settlement worker
pub struct SettlementWorker {
    payments: PaymentStore,
    chain: Arc<ChainClient>,
    config: Arc<Config>,
    poll_interval: Duration,
    retries: HashMap<String, u32>,
}

impl SettlementWorker {
    /// Create a worker
    pub fn new(payments: PaymentStore, chain: Arc<ChainClient>, config: Arc<Config>) -> Self {
        Self {
            payments,
            chain,
            config,
            poll_interval: POLL_INTERVAL,
            retries: HashMap::new(),
        }
    }

    /// Override the poll interval (tests)
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Whether a payment id is parked after exhausting its retries
    pub fn is_parked(&self, payment_id: &str) -> bool {
        self.retries
            .get(payment_id)
            .map(|count| *count >= MAX_SETTLEMENT_RETRIES)
            .unwrap_or(false)
    }

    /// Run until the shutdown flag flips
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(interval = ?self.poll_interval, "settlement worker started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.changed() => {}
            }
            if *shutdown.borrow() {
                break;
            }
            if let Err(err) = self.run_once().await {
                tracing::error!(error = %err, "settlement scan failed");
            }
        }
        tracing::info!("settlement worker exiting");
    }

    /// One scan over the pending ledger
    pub async fn run_once(&mut self) -> Result<()> {
        let pending = self.payments.list_pending().await?;
        for record in pending {
            if self.is_parked(&record.id) {
                continue;
            }
            match self.settle(&record).await {
                Ok(tx_hash) => {
                    self.payments.mark_settled(&record.id, &tx_hash).await?;
                    self.retries.remove(&record.id);
                    tracing::info!(payment_id = %record.id, tx_hash, "payment settled");
                }
                Err(err) => {
                    let count = self.retries.entry(record.id.clone()).or_insert(0);
                    *count += 1;
                    if *count >= MAX_SETTLEMENT_RETRIES {
                        tracing::warn!(
                            payment_id = %record.id,
                            attempts = *count,
                            error = %err,
                            "payment parked until operator intervention"
                        );
                    } else {
                        tracing::warn!(
                            payment_id = %record.id,
                            attempt = *count,
                            error = %err,
                            "settlement attempt failed"
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// Execute one transfer and wait for its receipt
    async fn settle(&self, record: &PaymentRecord) -> Result<String> {
        let chain = ChainConfig::from_name(&record.network)
            .unwrap_or_else(|| self.config.payment_chain());
        let operator = self
            .chain
            .operator()
            .ok_or_else(|| ProofportError::config("no operator key configured"))?;
        let token = parse_address(&chain.usdc_contract)?;
        let units = parse_display_amount(&record.amount)?;

        let tx_hash = self
            .chain
            .erc20_transfer(chain.chain_id, token, operator, U256::from(units))
            .await?;
        let succeeded = self
            .chain
            .wait_for_receipt(chain.chain_id, tx_hash, RECEIPT_TIMEOUT)
            .await?;
        if !succeeded {
            return Err(ProofportError::dependency(format!(
                "settlement transaction 0x{} reverted",
                hex::encode(tx_hash.as_bytes())
            )));
        }
        Ok(format!("0x{}", hex::encode(tx_hash.as_bytes())))
    }
}
