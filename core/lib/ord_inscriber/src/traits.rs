use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::{Address, Transaction, TxOut, Txid};

use crate::types::{BitcoinIndexerResult, BitcoinSignerResult, IndexedTransaction, TxStatus, Utxo};

/// Read and broadcast access to the chain.
///
/// Implementations report transport failures as errors and never retry on their own; the
/// lifecycle decides what a failed call means for the session.
#[async_trait]
pub trait ChainIndexer: Send + Sync {
    async fn get_spendable_outputs(&self, address: &Address) -> BitcoinIndexerResult<Vec<Utxo>>;

    /// Broadcasts a consensus-serialized transaction given as hex.
    async fn broadcast(&self, tx_hex: &str) -> BitcoinIndexerResult<Txid>;

    async fn get_transaction(&self, txid: &Txid) -> BitcoinIndexerResult<IndexedTransaction>;

    async fn get_confirmation_status(&self, txid: &Txid) -> BitcoinIndexerResult<TxStatus>;
}

#[async_trait]
impl<T: ChainIndexer + ?Sized> ChainIndexer for Arc<T> {
    async fn get_spendable_outputs(&self, address: &Address) -> BitcoinIndexerResult<Vec<Utxo>> {
        self.as_ref().get_spendable_outputs(address).await
    }

    async fn broadcast(&self, tx_hex: &str) -> BitcoinIndexerResult<Txid> {
        self.as_ref().broadcast(tx_hex).await
    }

    async fn get_transaction(&self, txid: &Txid) -> BitcoinIndexerResult<IndexedTransaction> {
        self.as_ref().get_transaction(txid).await
    }

    async fn get_confirmation_status(&self, txid: &Txid) -> BitcoinIndexerResult<TxStatus> {
        self.as_ref().get_confirmation_status(txid).await
    }
}

/// Signs the inputs of a commit transaction that spend the sender's outputs.
pub trait BitcoinSigner: Send + Sync {
    /// `prevouts[i]` is the output spent by `tx.input[i]`.
    fn sign_inputs(&self, tx: &mut Transaction, prevouts: &[TxOut]) -> BitcoinSignerResult<()>;

    fn get_address(&self) -> &Address;
}
