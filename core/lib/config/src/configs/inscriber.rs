use std::{str::FromStr, time::Duration};

use bitcoin::Network;
use serde::{Deserialize, Serialize};

/// Default interval between two confirmation checks of the commit transaction.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 60_000;

/// Backend used to look up outputs, broadcast transactions and query confirmations.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IndexerKind {
    /// Esplora REST API, as served by mempool.space.
    #[default]
    Esplora,
    /// Bitcoin Core JSON-RPC.
    Rpc,
}

/// What the lifecycle does when one reveal of a batch fails after the commit is confirmed.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RevealFailurePolicy {
    /// Attempt every request and report the failures together.
    #[default]
    ContinueOnError,
    /// Stop at the first failed reveal; later requests are reported as skipped.
    FailFast,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct InscriberConfig {
    /// Name of the used Bitcoin network
    pub network: String,

    pub indexer: IndexerKind,

    /// Base URL of the indexer. Esplora defaults to mempool.space for public networks.
    pub indexer_url: Option<String>,
    pub rpc_user: Option<String>,
    pub rpc_password: Option<String>,

    // confirmation poll interval, ms
    pub poll_interval: u64,

    /// Give up waiting for the commit confirmation after this many ms. Unbounded when unset.
    pub max_confirmation_wait: Option<u64>,

    /// sat/vB
    pub fee_rate: u64,

    #[serde(default)]
    pub reveal_failure_policy: RevealFailurePolicy,
}

impl InscriberConfig {
    /// Returns the Bitcoin network
    pub fn network(&self) -> Network {
        Network::from_str(&self.network).unwrap_or(Network::Regtest)
    }

    pub fn indexer_url(&self) -> Option<&str> {
        self.indexer_url.as_deref()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval)
    }

    pub fn max_confirmation_wait(&self) -> Option<Duration> {
        self.max_confirmation_wait.map(Duration::from_millis)
    }

    pub fn fee_rate(&self) -> u64 {
        self.fee_rate
    }

    pub fn reveal_failure_policy(&self) -> RevealFailurePolicy {
        self.reveal_failure_policy
    }
}

impl Default for InscriberConfig {
    fn default() -> Self {
        Self {
            network: Network::Bitcoin.to_string(),
            indexer: IndexerKind::Esplora,
            indexer_url: None,
            rpc_user: None,
            rpc_password: None,
            poll_interval: DEFAULT_POLL_INTERVAL_MS,
            max_confirmation_wait: None,
            fee_rate: 1,
            reveal_failure_policy: RevealFailurePolicy::ContinueOnError,
        }
    }
}

impl InscriberConfig {
    // Creates a config object suitable for use in unit tests.
    pub fn for_tests() -> Self {
        Self {
            network: Network::Regtest.to_string(),
            indexer: IndexerKind::Rpc,
            indexer_url: Some("http://localhost:18443".to_string()),
            rpc_user: Some("rpcuser".to_string()),
            rpc_password: Some("rpcpassword".to_string()),
            poll_interval: 1000,
            max_confirmation_wait: Some(600_000),
            fee_rate: 5,
            reveal_failure_policy: RevealFailurePolicy::FailFast,
        }
    }
}
