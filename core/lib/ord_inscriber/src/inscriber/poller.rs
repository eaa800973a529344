use std::time::{Duration, Instant};

use bitcoin::Txid;
use ord_config::InscriberConfig;
use tokio::{sync::watch, time::MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::{
    metrics::METRICS,
    traits::ChainIndexer,
    types::{InscriberError, Result, TxStatus},
};

/// Polls the indexer until a transaction is confirmed.
///
/// The first check runs immediately and the next ones every `interval`. Lookup errors are
/// logged and retried on the next tick. Without `max_wait` the loop only ends on confirmation
/// or when the stop signal is raised.
#[derive(Debug, Clone, Copy)]
pub struct ConfirmationPoller {
    interval: Duration,
    max_wait: Option<Duration>,
}

impl Default for ConfirmationPoller {
    fn default() -> Self {
        Self::from_config(&InscriberConfig::default())
    }
}

impl ConfirmationPoller {
    /// `interval` is clamped to at least one millisecond.
    pub fn new(interval: Duration, max_wait: Option<Duration>) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            max_wait,
        }
    }

    pub fn from_config(config: &InscriberConfig) -> Self {
        Self::new(config.poll_interval(), config.max_confirmation_wait())
    }

    #[instrument(skip(self, indexer, stop_receiver), target = "ord_inscriber::poller")]
    pub async fn wait_for_confirmation(
        &self,
        indexer: &dyn ChainIndexer,
        txid: Txid,
        mut stop_receiver: watch::Receiver<bool>,
    ) -> Result<TxStatus> {
        let started = Instant::now();
        let mut timer = tokio::time::interval(self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let max_wait = self.max_wait;
        let timeout = async move {
            match max_wait {
                Some(max_wait) => tokio::time::sleep(max_wait).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(timeout);

        // A dropped sender can no longer stop the loop.
        let mut stop_open = true;

        while !*stop_receiver.borrow_and_update() {
            tokio::select! {
                _ = timer.tick() => { /* continue iterations */ }
                changed = stop_receiver.changed(), if stop_open => {
                    if changed.is_err() {
                        stop_open = false;
                    }
                    continue;
                }
                _ = &mut timeout => return Err(timed_out(txid, started)),
            }

            METRICS.confirmation_polls.inc();
            let lookup = indexer.get_confirmation_status(&txid);
            tokio::pin!(lookup);

            // The lookup itself must not outlive the stop signal or the timeout.
            let result = loop {
                tokio::select! {
                    result = &mut lookup => break result,
                    changed = stop_receiver.changed(), if stop_open => {
                        if changed.is_err() {
                            stop_open = false;
                        } else if *stop_receiver.borrow_and_update() {
                            return Err(cancelled(txid));
                        }
                    }
                    _ = &mut timeout => return Err(timed_out(txid, started)),
                }
            };

            match result {
                Ok(status) if status.confirmed => {
                    METRICS.commit_confirmation_time.observe(started.elapsed());
                    info!(
                        "Transaction {} confirmed at height {:?}",
                        txid, status.block_height
                    );
                    return Ok(status);
                }
                Ok(_) => debug!("Transaction {} not confirmed yet", txid),
                Err(err) => {
                    METRICS.confirmation_poll_errors.inc();
                    warn!("Failed to check confirmation of {}: {}", txid, err);
                }
            }
        }

        Err(cancelled(txid))
    }
}

fn cancelled(txid: Txid) -> InscriberError {
    info!("Stop signal received, no longer waiting for {}", txid);
    InscriberError::ConfirmationCancelled(txid)
}

fn timed_out(txid: Txid, started: Instant) -> InscriberError {
    warn!("Gave up waiting for {} after {:?}", txid, started.elapsed());
    InscriberError::ConfirmationTimeout(txid)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use bitcoin::{hashes::Hash, Address};
    use mockall::{mock, predicate::eq};

    use super::*;
    use crate::{
        inscriber::test_utils::{MockChainIndexer, MockChainIndexerConfig},
        types::{BitcoinIndexerResult, IndexedTransaction, Utxo},
    };

    mock! {
        Indexer {}
        #[async_trait]
        impl ChainIndexer for Indexer {
            async fn get_spendable_outputs(&self, address: &Address) -> BitcoinIndexerResult<Vec<Utxo>>;
            async fn broadcast(&self, tx_hex: &str) -> BitcoinIndexerResult<Txid>;
            async fn get_transaction(&self, txid: &Txid) -> BitcoinIndexerResult<IndexedTransaction>;
            async fn get_confirmation_status(&self, txid: &Txid) -> BitcoinIndexerResult<TxStatus>;
        }
    }

    const INTERVAL: Duration = Duration::from_secs(60);

    fn txid() -> Txid {
        Txid::from_byte_array([5u8; 32])
    }

    #[tokio::test(start_paused = true)]
    async fn returns_once_confirmed() {
        let indexer = MockChainIndexer::new(MockChainIndexerConfig {
            confirm_after_polls: 3,
            ..Default::default()
        });
        let (_stop_sender, stop_receiver) = watch::channel(false);
        let started = tokio::time::Instant::now();

        let status = ConfirmationPoller::new(INTERVAL, None)
            .wait_for_confirmation(&indexer, txid(), stop_receiver)
            .await
            .unwrap();

        assert!(status.confirmed);
        assert_eq!(indexer.status_polls(), 3);
        assert!(started.elapsed() >= INTERVAL * 2);
        assert!(started.elapsed() < INTERVAL * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn lookup_errors_do_not_stop_polling() {
        let indexer = MockChainIndexer::new(MockChainIndexerConfig {
            confirm_after_polls: 4,
            failing_status_polls: 2,
            ..Default::default()
        });
        let (_stop_sender, stop_receiver) = watch::channel(false);

        let status = ConfirmationPoller::new(INTERVAL, None)
            .wait_for_confirmation(&indexer, txid(), stop_receiver)
            .await
            .unwrap();

        assert!(status.confirmed);
        assert_eq!(indexer.status_polls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_wait() {
        let indexer = MockChainIndexer::new(MockChainIndexerConfig {
            confirm_after_polls: usize::MAX,
            ..Default::default()
        });
        let (_stop_sender, stop_receiver) = watch::channel(false);

        let result = ConfirmationPoller::new(INTERVAL, Some(Duration::from_secs(150)))
            .wait_for_confirmation(&indexer, txid(), stop_receiver)
            .await;

        assert_matches!(result, Err(InscriberError::ConfirmationTimeout(id)) if id == txid());
        // t = 0, 60, 120
        assert_eq!(indexer.status_polls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_signal_cancels_polling() {
        let indexer = MockChainIndexer::new(MockChainIndexerConfig {
            confirm_after_polls: usize::MAX,
            ..Default::default()
        });
        let (stop_sender, stop_receiver) = watch::channel(false);

        let poller = ConfirmationPoller::new(INTERVAL, None);
        let wait = poller.wait_for_confirmation(&indexer, txid(), stop_receiver);
        let stop = async {
            tokio::time::sleep(INTERVAL * 3 + Duration::from_secs(1)).await;
            stop_sender.send_replace(true);
        };
        let (result, ()) = tokio::join!(wait, stop);

        assert_matches!(result, Err(InscriberError::ConfirmationCancelled(_)));
        assert_eq!(indexer.status_polls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn raised_stop_signal_skips_polling() {
        let indexer = MockChainIndexer::new(MockChainIndexerConfig::default());
        let (_stop_sender, stop_receiver) = watch::channel(true);

        let result = ConfirmationPoller::new(INTERVAL, None)
            .wait_for_confirmation(&indexer, txid(), stop_receiver)
            .await;

        assert_matches!(result, Err(InscriberError::ConfirmationCancelled(_)));
        assert_eq!(indexer.status_polls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_stop_sender_keeps_polling() {
        let indexer = MockChainIndexer::new(MockChainIndexerConfig {
            confirm_after_polls: 2,
            ..Default::default()
        });
        let (stop_sender, stop_receiver) = watch::channel(false);
        drop(stop_sender);

        let status = ConfirmationPoller::new(INTERVAL, None)
            .wait_for_confirmation(&indexer, txid(), stop_receiver)
            .await
            .unwrap();
        assert!(status.confirmed);
    }

    #[tokio::test(start_paused = true)]
    async fn polls_only_the_awaited_transaction() {
        let mut indexer = MockIndexer::new();
        indexer
            .expect_get_confirmation_status()
            .with(eq(txid()))
            .times(1)
            .returning(|_| {
                Ok(TxStatus {
                    confirmed: true,
                    block_height: Some(840_000),
                })
            });
        indexer.expect_get_transaction().never();
        indexer.expect_broadcast().never();
        let (_stop_sender, stop_receiver) = watch::channel(false);

        let status = ConfirmationPoller::new(INTERVAL, None)
            .wait_for_confirmation(&indexer, txid(), stop_receiver)
            .await
            .unwrap();

        assert_eq!(status.block_height, Some(840_000));
    }

    /// Indexer whose status lookups never complete.
    struct StalledIndexer;

    #[async_trait]
    impl ChainIndexer for StalledIndexer {
        async fn get_spendable_outputs(&self, _: &Address) -> BitcoinIndexerResult<Vec<Utxo>> {
            Ok(vec![])
        }

        async fn broadcast(&self, _: &str) -> BitcoinIndexerResult<Txid> {
            Err(InscriberError::Broadcast("unavailable".into()))
        }

        async fn get_transaction(&self, _: &Txid) -> BitcoinIndexerResult<IndexedTransaction> {
            Err(InscriberError::Lookup("unavailable".into()))
        }

        async fn get_confirmation_status(&self, _: &Txid) -> BitcoinIndexerResult<TxStatus> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stop_signal_interrupts_a_stalled_lookup() {
        let (stop_sender, stop_receiver) = watch::channel(false);
        let poller = ConfirmationPoller::new(INTERVAL, Some(Duration::from_secs(120)));
        let started = tokio::time::Instant::now();

        let stop = async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            stop_sender.send_replace(true);
        };
        let (result, ()) = tokio::join!(
            poller.wait_for_confirmation(&StalledIndexer, txid(), stop_receiver),
            stop
        );

        assert_matches!(result, Err(InscriberError::ConfirmationCancelled(_)));
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert!(started.elapsed() < Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn max_wait_interrupts_a_stalled_lookup() {
        let (_stop_sender, stop_receiver) = watch::channel(false);
        let poller = ConfirmationPoller::new(INTERVAL, Some(Duration::from_secs(120)));
        let started = tokio::time::Instant::now();

        let result = poller
            .wait_for_confirmation(&StalledIndexer, txid(), stop_receiver)
            .await;

        assert_matches!(result, Err(InscriberError::ConfirmationTimeout(_)));
        assert!(started.elapsed() >= Duration::from_secs(120));
        assert!(started.elapsed() < Duration::from_secs(121));
    }
}
