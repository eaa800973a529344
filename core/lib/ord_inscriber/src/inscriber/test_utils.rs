//! Test doubles and fixtures shared by unit and integration tests.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use bitcoin::{
    consensus::encode::deserialize,
    hashes::Hash,
    secp256k1::{Secp256k1, SecretKey},
    Address, Amount, Network, OutPoint, PrivateKey, Transaction, TxOut, Txid, Witness,
};

use super::address_type::OutputType;
use crate::{
    signer::{InternalKeyPair, KeyManager},
    traits::{BitcoinSigner, ChainIndexer},
    types::{
        BitcoinIndexerResult, BitcoinSignerResult, IndexedTransaction, InscriberError,
        InscriptionConfig, InscriptionRequest, RevealFailurePolicy, TxStatus, Utxo,
    },
};

/// Regtest key funding the commits in tests.
pub const TEST_SENDER_WIF: &str = "cN9spWsvaxA8taS7DFMxnk1yJD2gaF2PX1npuTpy3vuZFJdwavaw";
pub const TEST_CHANGE_ADDRESS: &str = "bcrt1qw508d6qejxtdg4y5r3zarvary0c5xw7kygt080";
pub const TEST_RECIPIENT: &str =
    "bcrt1p3s7m76wp5seprjy4gdxuxrr8pjgd47q5s8lu9vefxmp0my2p4t9qh6s8kq";

/// Deterministic internal key, distinct for every `seed > 0`.
pub fn test_internal_key(seed: u8) -> InternalKeyPair {
    let secret_key = SecretKey::from_slice(&[seed; 32]).expect("seed must be non-zero");
    InternalKeyPair::from_private_key(
        &Secp256k1::new(),
        PrivateKey::new(secret_key, Network::Regtest),
    )
}

pub fn test_signer(sender: OutputType) -> KeyManager {
    KeyManager::new(TEST_SENDER_WIF, sender, Network::Regtest).expect("valid test WIF")
}

/// Regtest session funded by [`TEST_SENDER_WIF`] with `requests` small text inscriptions.
pub fn test_config(sender: OutputType, requests: usize) -> InscriptionConfig {
    InscriptionConfig {
        network: Network::Regtest,
        sender_address: test_signer(sender).get_address().to_string(),
        change_address: TEST_CHANGE_ADDRESS.to_string(),
        fee_rate: 5,
        requests: (0..requests)
            .map(|i| {
                InscriptionRequest::new(
                    "text/plain;charset=utf-8",
                    format!("inscription #{i}"),
                    TEST_RECIPIENT,
                )
            })
            .collect(),
        reveal_failure_policy: RevealFailurePolicy::ContinueOnError,
    }
}

/// Confirmed outputs with the given values, one per distinct funding transaction.
pub fn funding_utxos(values: &[u64]) -> Vec<Utxo> {
    values
        .iter()
        .enumerate()
        .map(|(i, value)| Utxo {
            outpoint: OutPoint::new(Txid::from_byte_array([i as u8 + 1; 32]), 0),
            value: Amount::from_sat(*value),
            confirmed: true,
        })
        .collect()
}

#[derive(Debug, Default, Clone)]
pub struct MockChainIndexerConfig {
    pub utxos: Vec<Utxo>,
    /// The status query with this ordinal (1-based) and every later one report confirmation.
    pub confirm_after_polls: usize,
    /// Number of leading status queries that fail.
    pub failing_status_polls: usize,
    /// Ordinals (0-based) of broadcasts to reject.
    pub rejected_broadcasts: HashSet<usize>,
}

/// In-memory chain: remembers broadcast transactions and confirms them after a number of
/// status queries.
#[derive(Debug, Default)]
pub struct MockChainIndexer {
    config: MockChainIndexerConfig,
    broadcasts: Mutex<Vec<Transaction>>,
    transactions: Mutex<HashMap<Txid, (Transaction, bool)>>,
    status_polls: AtomicUsize,
}

impl MockChainIndexer {
    pub fn new(config: MockChainIndexerConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Makes `tx` known to the chain, as if broadcast by an earlier process.
    pub fn insert_transaction(&self, tx: Transaction, confirmed: bool) {
        self.transactions
            .lock()
            .unwrap()
            .insert(tx.compute_txid(), (tx, confirmed));
    }

    pub fn broadcasts(&self) -> Vec<Transaction> {
        self.broadcasts.lock().unwrap().clone()
    }

    pub fn status_polls(&self) -> usize {
        self.status_polls.load(Ordering::SeqCst)
    }

    pub fn reject_broadcast(&mut self, ordinal: usize) {
        self.config.rejected_broadcasts.insert(ordinal);
    }
}

#[async_trait]
impl ChainIndexer for MockChainIndexer {
    async fn get_spendable_outputs(&self, _address: &Address) -> BitcoinIndexerResult<Vec<Utxo>> {
        Ok(self.config.utxos.clone())
    }

    async fn broadcast(&self, tx_hex: &str) -> BitcoinIndexerResult<Txid> {
        let bytes = hex::decode(tx_hex).map_err(|e| InscriberError::Broadcast(e.to_string()))?;
        let tx: Transaction =
            deserialize(&bytes).map_err(|e| InscriberError::Broadcast(e.to_string()))?;

        let ordinal = {
            let mut broadcasts = self.broadcasts.lock().unwrap();
            broadcasts.push(tx.clone());
            broadcasts.len() - 1
        };
        if self.config.rejected_broadcasts.contains(&ordinal) {
            return Err(InscriberError::Broadcast(format!(
                "broadcast #{ordinal} rejected"
            )));
        }

        let txid = tx.compute_txid();
        self.transactions
            .lock()
            .unwrap()
            .entry(txid)
            .or_insert((tx, false));
        Ok(txid)
    }

    async fn get_transaction(&self, txid: &Txid) -> BitcoinIndexerResult<IndexedTransaction> {
        let transactions = self.transactions.lock().unwrap();
        let (tx, confirmed) = transactions
            .get(txid)
            .ok_or_else(|| InscriberError::Lookup(format!("transaction {txid} not found")))?;

        Ok(IndexedTransaction {
            txid: *txid,
            outputs: tx.output.clone(),
            status: TxStatus {
                confirmed: *confirmed,
                block_height: confirmed.then_some(100),
            },
        })
    }

    async fn get_confirmation_status(&self, txid: &Txid) -> BitcoinIndexerResult<TxStatus> {
        let poll = self.status_polls.fetch_add(1, Ordering::SeqCst) + 1;
        if poll <= self.config.failing_status_polls {
            return Err(InscriberError::Lookup("indexer unavailable".to_string()));
        }

        let mut transactions = self.transactions.lock().unwrap();
        let confirmed = poll >= self.config.confirm_after_polls;
        if let Some((_, tx_confirmed)) = transactions.get_mut(txid) {
            *tx_confirmed |= confirmed;
        }
        Ok(TxStatus {
            confirmed,
            block_height: confirmed.then_some(100),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignerBehavior {
    Honest,
    LeaveUnsigned,
    /// Signs, then flips a bit in every signature.
    Corrupt,
}

/// Wraps a real signer and misbehaves on request.
pub struct MockBitcoinSigner {
    inner: KeyManager,
    behavior: SignerBehavior,
}

impl MockBitcoinSigner {
    pub fn new(inner: KeyManager, behavior: SignerBehavior) -> Self {
        Self { inner, behavior }
    }
}

impl BitcoinSigner for MockBitcoinSigner {
    fn sign_inputs(&self, tx: &mut Transaction, prevouts: &[TxOut]) -> BitcoinSignerResult<()> {
        match self.behavior {
            SignerBehavior::Honest => self.inner.sign_inputs(tx, prevouts),
            SignerBehavior::LeaveUnsigned => Ok(()),
            SignerBehavior::Corrupt => {
                self.inner.sign_inputs(tx, prevouts)?;
                for input in &mut tx.input {
                    let mut elements = input.witness.to_vec();
                    if let Some(signature) = elements.first_mut() {
                        let position = signature.len() - 2;
                        signature[position] ^= 0x01;
                    }
                    input.witness = Witness::from_slice(&elements);
                }
                Ok(())
            }
        }
    }

    fn get_address(&self) -> &Address {
        self.inner.get_address()
    }
}
