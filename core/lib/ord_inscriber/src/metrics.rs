use std::time::Duration;

use vise::{Buckets, Counter, EncodeLabelSet, EncodeLabelValue, Family, Histogram, Metrics, Unit};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EncodeLabelSet, EncodeLabelValue)]
#[metrics(label = "tx_kind", rename_all = "snake_case")]
pub(crate) enum TxKind {
    Commit,
    Reveal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EncodeLabelSet, EncodeLabelValue)]
#[metrics(label = "method", rename_all = "snake_case")]
pub(crate) enum IndexerMethod {
    GetSpendableOutputs,
    Broadcast,
    GetTransaction,
    GetConfirmationStatus,
}

#[derive(Debug, Metrics)]
#[metrics(prefix = "ord_inscriber")]
pub(crate) struct OrdInscriberMetrics {
    /// Transactions accepted by the indexer, by kind.
    pub broadcasts: Family<TxKind, Counter>,

    /// Transactions rejected by the indexer, by kind.
    pub broadcast_failures: Family<TxKind, Counter>,

    /// Number of confirmation status requests for commit transactions.
    pub confirmation_polls: Counter,

    /// Confirmation status requests that failed and were retried on the next tick.
    pub confirmation_poll_errors: Counter,

    /// Time between the first confirmation poll and the observed confirmation.
    #[metrics(buckets = Buckets::exponential(60.0..=86400.0, 5.0), unit = Unit::Seconds)]
    pub commit_confirmation_time: Histogram<Duration>,

    /// Sessions aborted after a commit signature failed validation.
    pub session_aborts: Counter,

    /// Errors returned by indexer backends, by method.
    pub indexer_errors: Family<IndexerMethod, Counter>,
}

#[vise::register]
pub(crate) static METRICS: vise::Global<OrdInscriberMetrics> = vise::Global::new();
