use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::{consensus::deserialize, Address, OutPoint, Transaction, Txid};
use bitcoincore_rpc::{json::ScanTxOutRequest, Client, RpcApi};
use tracing::{debug, instrument};

use crate::{
    metrics::{IndexerMethod, METRICS},
    traits::ChainIndexer,
    types::{BitcoinIndexerResult, IndexedTransaction, InscriberError, NodeAuth, TxStatus, Utxo},
};

/// Chain access through a Bitcoin Core node.
///
/// Outputs are looked up with `scantxoutset`, so the node needs no wallet. Calls are not
/// retried.
#[derive(Debug)]
pub struct BitcoinRpcIndexer {
    client: Arc<Client>,
}

impl BitcoinRpcIndexer {
    #[instrument(skip(auth), target = "ord_inscriber::client::rpc")]
    pub fn new(url: &str, auth: NodeAuth) -> BitcoinIndexerResult<Self> {
        let client = Client::new(url, auth)?;
        Ok(Self {
            client: Arc::new(client),
        })
    }

    fn status(&self, txid: &Txid) -> BitcoinIndexerResult<(Transaction, TxStatus)> {
        let info = self.client.get_raw_transaction_info(txid, None)?;
        let tx: Transaction =
            deserialize(&info.hex).map_err(|e| InscriberError::Lookup(e.to_string()))?;

        let confirmed = info.confirmations.unwrap_or(0) > 0;
        let block_height = match info.blockhash {
            Some(blockhash) if confirmed => Some(
                self.client.get_block_header_info(&blockhash)?.height as u32,
            ),
            _ => None,
        };

        Ok((
            tx,
            TxStatus {
                confirmed,
                block_height,
            },
        ))
    }
}

fn track<T>(method: IndexerMethod, result: BitcoinIndexerResult<T>) -> BitcoinIndexerResult<T> {
    if result.is_err() {
        METRICS.indexer_errors[&method].inc();
    }
    result
}

#[async_trait]
impl ChainIndexer for BitcoinRpcIndexer {
    #[instrument(skip(self), target = "ord_inscriber::client::rpc")]
    async fn get_spendable_outputs(&self, address: &Address) -> BitcoinIndexerResult<Vec<Utxo>> {
        debug!("Scanning UTXO set");
        let descriptor = format!("addr({})", address);
        let request = vec![ScanTxOutRequest::Single(descriptor)];
        let result = self
            .client
            .scan_tx_out_set_blocking(&request)
            .map_err(InscriberError::from)
            .map(|result| {
                result
                    .unspents
                    .into_iter()
                    .map(|unspent| Utxo {
                        outpoint: OutPoint::new(unspent.txid, unspent.vout),
                        value: unspent.amount,
                        confirmed: true,
                    })
                    .collect()
            });

        track(IndexerMethod::GetSpendableOutputs, result)
    }

    #[instrument(skip(self, tx_hex), target = "ord_inscriber::client::rpc")]
    async fn broadcast(&self, tx_hex: &str) -> BitcoinIndexerResult<Txid> {
        debug!("Sending raw transaction");
        let result = self
            .client
            .send_raw_transaction(tx_hex)
            .map_err(|e| InscriberError::Broadcast(e.to_string()));
        track(IndexerMethod::Broadcast, result)
    }

    #[instrument(skip(self), target = "ord_inscriber::client::rpc")]
    async fn get_transaction(&self, txid: &Txid) -> BitcoinIndexerResult<IndexedTransaction> {
        debug!("Getting transaction");
        let result = self.status(txid).map(|(tx, status)| IndexedTransaction {
            txid: *txid,
            outputs: tx.output,
            status,
        });
        track(IndexerMethod::GetTransaction, result)
    }

    #[instrument(skip(self), target = "ord_inscriber::client::rpc")]
    async fn get_confirmation_status(&self, txid: &Txid) -> BitcoinIndexerResult<TxStatus> {
        let result = self.status(txid).map(|(_, status)| status);
        track(IndexerMethod::GetConfirmationStatus, result)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use bitcoin::hashes::Hash;

    use super::*;

    // Nothing listens on the discard port.
    fn unreachable_node() -> BitcoinRpcIndexer {
        BitcoinRpcIndexer::new(
            "http://127.0.0.1:9",
            NodeAuth::UserPass("rpcuser".to_string(), "rpcpassword".to_string()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn transport_failures_are_not_retried_or_hidden() {
        let indexer = unreachable_node();
        let txid = Txid::from_byte_array([7u8; 32]);

        assert_matches!(
            indexer.get_confirmation_status(&txid).await,
            Err(InscriberError::Lookup(_))
        );
        assert_matches!(
            indexer.get_transaction(&txid).await,
            Err(InscriberError::Lookup(_))
        );
        assert_matches!(
            indexer.broadcast("0200").await,
            Err(InscriberError::Broadcast(_))
        );
    }
}
