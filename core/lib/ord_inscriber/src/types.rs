use bitcoin::{Amount, Network, OutPoint, ScriptBuf, TxOut, Txid};
pub use bitcoincore_rpc::Auth as NodeAuth;
use ord_config::InscriberConfig;
pub use ord_config::RevealFailurePolicy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Content to embed in one reveal transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InscriptionRequest {
    pub content_type: String,
    pub content: Vec<u8>,
    pub recipient_address: String,
}

impl InscriptionRequest {
    pub fn new(
        content_type: impl Into<String>,
        content: impl Into<Vec<u8>>,
        recipient_address: impl Into<String>,
    ) -> Self {
        Self {
            content_type: content_type.into(),
            content: content.into(),
            recipient_address: recipient_address.into(),
        }
    }
}

/// One inscription session: who pays, where the change goes and what to inscribe.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InscriptionConfig {
    pub network: Network,
    pub sender_address: String,
    pub change_address: String,
    /// sat/vB
    pub fee_rate: u64,
    pub requests: Vec<InscriptionRequest>,
    #[serde(default)]
    pub reveal_failure_policy: RevealFailurePolicy,
}

impl InscriptionConfig {
    /// Session config taking network, fee rate and reveal policy from the service config.
    pub fn new(
        settings: &InscriberConfig,
        sender_address: impl Into<String>,
        change_address: impl Into<String>,
        requests: Vec<InscriptionRequest>,
    ) -> Self {
        Self {
            network: settings.network(),
            sender_address: sender_address.into(),
            change_address: change_address.into(),
            fee_rate: settings.fee_rate(),
            requests,
            reveal_failure_policy: settings.reveal_failure_policy(),
        }
    }
}

/// Per-request contract between the commit output and its reveal spend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealPlan {
    pub envelope_address: String,
    pub script_pubkey: ScriptBuf,
    /// Exact value of the matching commit output. Fixed once computed.
    pub required_value: Amount,
    pub commit_output: Option<OutPoint>,
    pub reveal_txid: Option<Txid>,
}

/// Spendable output reported by the chain indexer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub outpoint: OutPoint,
    pub value: Amount,
    pub confirmed: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxStatus {
    pub confirmed: bool,
    pub block_height: Option<u32>,
}

/// Transaction outputs together with their confirmation status.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexedTransaction {
    pub txid: Txid,
    pub outputs: Vec<TxOut>,
    pub status: TxStatus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InscriptionState {
    New,
    CommitBuilt,
    CommitSigned,
    CommitBroadcast,
    CommitConfirmed,
    Complete,
    Aborted,
}

/// The externally reproducible part of a session, enough to resume it after a restart.
///
/// Holds the session's private key in WIF. Whoever persists it controls every commit output
/// of the batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub internal_key_wif: String,
    pub commit_txid: Option<Txid>,
}

#[derive(Debug)]
pub enum RevealOutcome {
    Broadcast(Txid),
    /// Revealed by an earlier pass of the same session.
    AlreadyRevealed(Txid),
    Failed(InscriberError),
    /// Not attempted because an earlier reveal failed under `RevealFailurePolicy::FailFast`.
    Skipped,
}

#[derive(Debug, Default)]
pub struct RevealReport {
    pub outcomes: Vec<(usize, RevealOutcome)>,
}

impl RevealReport {
    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(|(_, outcome)| {
            matches!(
                outcome,
                RevealOutcome::Broadcast(_) | RevealOutcome::AlreadyRevealed(_)
            )
        })
    }

    pub fn revealed_txids(&self) -> Vec<Txid> {
        self.outcomes
            .iter()
            .filter_map(|(_, outcome)| match outcome {
                RevealOutcome::Broadcast(txid) | RevealOutcome::AlreadyRevealed(txid) => {
                    Some(*txid)
                }
                _ => None,
            })
            .collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = (usize, &InscriberError)> {
        self.outcomes.iter().filter_map(|(index, outcome)| match outcome {
            RevealOutcome::Failed(err) => Some((*index, err)),
            _ => None,
        })
    }
}

#[derive(Debug, Error)]
pub enum InscriberError {
    #[error("Unsupported address type: {0}")]
    UnsupportedAddressType(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Insufficient balance: available {available}, required {required}")]
    InsufficientBalance { available: Amount, required: Amount },

    #[error("Inscription address mismatch for request {index}: expected {expected}, derived {derived}")]
    AddressMismatch {
        index: usize,
        expected: String,
        derived: String,
    },

    #[error("Invalid signature for input {input}: {reason}")]
    SignatureInvalid { input: usize, reason: String },

    #[error("Signing error: {0}")]
    SigningError(String),

    #[error("Broadcast error: {0}")]
    Broadcast(String),

    #[error("Lookup error: {0}")]
    Lookup(String),

    #[error("Not ready: {0}")]
    NotReady(String),

    #[error("Confirmation polling for {0} was cancelled")]
    ConfirmationCancelled(Txid),

    #[error("Transaction {0} was not confirmed in time")]
    ConfirmationTimeout(Txid),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Invalid inscription content: {0}")]
    InvalidContent(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Transaction building error: {0}")]
    TransactionBuilding(String),

    #[error("Session aborted after a signature failure")]
    SessionAborted,
}

pub type Result<T> = std::result::Result<T, InscriberError>;

pub type BitcoinIndexerResult<T> = Result<T>;
pub type BitcoinSignerResult<T> = Result<T>;
pub type InscriberResult<T> = Result<T>;

impl From<bitcoincore_rpc::Error> for InscriberError {
    fn from(error: bitcoincore_rpc::Error) -> Self {
        InscriberError::Lookup(error.to_string())
    }
}

impl From<reqwest::Error> for InscriberError {
    fn from(error: reqwest::Error) -> Self {
        InscriberError::Lookup(error.to_string())
    }
}

impl From<bitcoin::address::ParseError> for InscriberError {
    fn from(error: bitcoin::address::ParseError) -> Self {
        InscriberError::InvalidAddress(error.to_string())
    }
}
