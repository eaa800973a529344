use std::{str::FromStr, sync::Arc, time::Duration};

use async_trait::async_trait;
use bitcoin::{Address, Amount, Network, OutPoint, ScriptBuf, TxOut, Txid};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize};
use tracing::{debug, instrument};

use crate::{
    metrics::{IndexerMethod, METRICS},
    traits::ChainIndexer,
    types::{BitcoinIndexerResult, IndexedTransaction, InscriberError, TxStatus, Utxo},
};

#[derive(Debug, Deserialize)]
struct EsploraStatus {
    confirmed: bool,
    block_height: Option<u32>,
}

impl From<EsploraStatus> for TxStatus {
    fn from(status: EsploraStatus) -> Self {
        Self {
            confirmed: status.confirmed,
            block_height: status.block_height,
        }
    }
}

#[derive(Debug, Deserialize)]
struct EsploraUtxo {
    txid: Txid,
    vout: u32,
    value: u64,
    status: EsploraStatus,
}

#[derive(Debug, Deserialize)]
struct EsploraVout {
    scriptpubkey: String,
    value: u64,
}

#[derive(Debug, Deserialize)]
struct EsploraTransaction {
    txid: Txid,
    vout: Vec<EsploraVout>,
    status: EsploraStatus,
}

/// Upper bound for a single HTTP request, connection included.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Esplora REST client, as served by mempool.space.
#[derive(Debug, Clone)]
pub struct MempoolClient {
    base_url: String,
    client: Arc<Client>,
}

impl MempoolClient {
    /// Public endpoint for `network`. Regtest has none.
    pub fn default_base_url(network: Network) -> Option<&'static str> {
        match network {
            Network::Bitcoin => Some("https://mempool.space/api"),
            Network::Testnet => Some("https://mempool.space/testnet/api"),
            Network::Signet => Some("https://mempool.space/signet/api"),
            _ => None,
        }
    }

    pub fn new(network: Network, base_url: Option<&str>) -> BitcoinIndexerResult<Self> {
        Self::with_timeout(network, base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        network: Network,
        base_url: Option<&str>,
        timeout: Duration,
    ) -> BitcoinIndexerResult<Self> {
        let base_url = base_url
            .or_else(|| Self::default_base_url(network))
            .ok_or_else(|| {
                InscriberError::InvalidConfig(format!("no default indexer URL for {network}"))
            })?;

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Arc::new(client),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> BitcoinIndexerResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let res = self.client.get(&url).send().await?;

        if !res.status().is_success() {
            return Err(InscriberError::Lookup(format!(
                "GET {} failed: {}",
                path,
                res.status()
            )));
        }
        Ok(res.json::<T>().await?)
    }
}

fn track<T>(method: IndexerMethod, result: BitcoinIndexerResult<T>) -> BitcoinIndexerResult<T> {
    if result.is_err() {
        METRICS.indexer_errors[&method].inc();
    }
    result
}

#[async_trait]
impl ChainIndexer for MempoolClient {
    #[instrument(skip(self), target = "ord_inscriber::client::esplora")]
    async fn get_spendable_outputs(&self, address: &Address) -> BitcoinIndexerResult<Vec<Utxo>> {
        debug!("Fetching spendable outputs");
        let utxos = self
            .get_json::<Vec<EsploraUtxo>>(&format!("/address/{}/utxo", address))
            .await;

        track(IndexerMethod::GetSpendableOutputs, utxos).map(|utxos| {
            utxos
                .into_iter()
                .map(|utxo| Utxo {
                    outpoint: OutPoint::new(utxo.txid, utxo.vout),
                    value: Amount::from_sat(utxo.value),
                    confirmed: utxo.status.confirmed,
                })
                .collect()
        })
    }

    #[instrument(skip(self, tx_hex), target = "ord_inscriber::client::esplora")]
    async fn broadcast(&self, tx_hex: &str) -> BitcoinIndexerResult<Txid> {
        debug!("Broadcasting transaction");
        let result = async {
            let url = format!("{}/tx", self.base_url);
            let res = self
                .client
                .post(&url)
                .body(tx_hex.to_string())
                .send()
                .await
                .map_err(|e| InscriberError::Broadcast(e.to_string()))?;

            let status = res.status();
            let body = res
                .text()
                .await
                .map_err(|e| InscriberError::Broadcast(e.to_string()))?;
            if !status.is_success() {
                return Err(InscriberError::Broadcast(format!("{}: {}", status, body)));
            }

            Txid::from_str(body.trim()).map_err(|e| {
                InscriberError::Broadcast(format!("unexpected broadcast response {body:?}: {e}"))
            })
        }
        .await;

        track(IndexerMethod::Broadcast, result)
    }

    #[instrument(skip(self), target = "ord_inscriber::client::esplora")]
    async fn get_transaction(&self, txid: &Txid) -> BitcoinIndexerResult<IndexedTransaction> {
        debug!("Fetching transaction");
        let result = async {
            let tx = self
                .get_json::<EsploraTransaction>(&format!("/tx/{}", txid))
                .await?;
            let outputs = tx
                .vout
                .into_iter()
                .map(|vout| {
                    Ok(TxOut {
                        value: Amount::from_sat(vout.value),
                        script_pubkey: ScriptBuf::from_hex(&vout.scriptpubkey)
                            .map_err(|e| InscriberError::Lookup(e.to_string()))?,
                    })
                })
                .collect::<BitcoinIndexerResult<Vec<_>>>()?;

            Ok(IndexedTransaction {
                txid: tx.txid,
                outputs,
                status: tx.status.into(),
            })
        }
        .await;

        track(IndexerMethod::GetTransaction, result)
    }

    #[instrument(skip(self), target = "ord_inscriber::client::esplora")]
    async fn get_confirmation_status(&self, txid: &Txid) -> BitcoinIndexerResult<TxStatus> {
        let status = self
            .get_json::<EsploraStatus>(&format!("/tx/{}/status", txid))
            .await;
        track(IndexerMethod::GetConfirmationStatus, status).map(Into::into)
    }
}
