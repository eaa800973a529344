use std::fmt;

use bitcoin::{
    consensus::encode::serialize_hex,
    secp256k1::{All, Secp256k1},
    OutPoint, Txid, XOnlyPublicKey,
};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    metrics::{TxKind, METRICS},
    signer::InternalKeyPair,
    traits::{BitcoinSigner, ChainIndexer},
    types::{
        IndexedTransaction, InscriberError, InscriberResult, InscriptionConfig, InscriptionState,
        RevealFailurePolicy, RevealOutcome, RevealPlan, RevealReport, SessionSnapshot, TxStatus,
        Utxo,
    },
};

pub mod address_type;
pub mod fee;
pub mod poller;
pub mod script_builder;
#[cfg(any(test, feature = "testing"))]
pub mod test_utils;
pub mod transaction_builder;
pub mod validation;

use address_type::{parse_address, OutputType};
pub use poller::ConfirmationPoller;
use transaction_builder::{
    build_reveal_plan, build_reveal_transaction, build_unsigned_commit, sign_and_validate_commit,
};
pub use transaction_builder::{SignedCommitTx, UnsignedCommitTx};

/// One commit/reveal inscription session.
///
/// The session drives `New -> CommitBuilt -> CommitSigned -> CommitBroadcast -> CommitConfirmed
/// -> Complete`. A commit signature that fails validation moves it to `Aborted` for good.
///
/// # Key custody
///
/// Every envelope of the batch commits to the same internal key, and that key alone can spend
/// all commit outputs. Losing it strands every inscription of the batch that has not been
/// revealed yet; leaking it lets anyone redirect them. Export it with
/// [`Inscriber::internal_key_wif`] or [`Inscriber::snapshot`] only to persist it for
/// [`Inscriber::resume`], and treat the result as a secret.
///
/// ```text
/// let mut inscriber = Inscriber::new(client, config)?;
/// let report = inscriber.inscribe(&signer, stop_receiver).await?;
///
/// // after a restart
/// let mut inscriber = Inscriber::from_snapshot(client, config, snapshot)?;
/// let report = inscriber.inscribe(&signer, stop_receiver).await?;
/// ```
pub struct Inscriber {
    client: Box<dyn ChainIndexer>,
    config: InscriptionConfig,
    secp: Secp256k1<All>,
    internal_key: InternalKeyPair,
    poller: ConfirmationPoller,
    plans: Vec<RevealPlan>,
    state: InscriptionState,
    commit_txid: Option<Txid>,
}

impl fmt::Debug for Inscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inscriber")
            .field("internal_key", &self.internal_key)
            .field("state", &self.state)
            .field("commit_txid", &self.commit_txid)
            .field("plans", &self.plans)
            .field("poller", &self.poller)
            .finish_non_exhaustive()
    }
}

impl Inscriber {
    /// Starts a session with a freshly generated internal key.
    pub fn new(client: Box<dyn ChainIndexer>, config: InscriptionConfig) -> InscriberResult<Self> {
        let internal_key = InternalKeyPair::generate(config.network);
        Self::with_internal_key(client, config, internal_key)
    }

    /// Starts a session around a known internal key. Nothing has been built or broadcast yet.
    #[instrument(skip_all, target = "ord_inscriber::inscriber")]
    pub fn with_internal_key(
        client: Box<dyn ChainIndexer>,
        config: InscriptionConfig,
        internal_key: InternalKeyPair,
    ) -> InscriberResult<Self> {
        validate_config(&config)?;

        let secp = Secp256k1::new();
        let plans = config
            .requests
            .iter()
            .map(|request| {
                build_reveal_plan(
                    &secp,
                    config.network,
                    config.fee_rate,
                    request,
                    &internal_key,
                )
            })
            .collect::<InscriberResult<Vec<_>>>()?;

        debug!(
            "Session created with {} requests, internal key {}",
            plans.len(),
            internal_key.x_only_public_key()
        );

        Ok(Self {
            client,
            config,
            secp,
            internal_key,
            poller: ConfirmationPoller::default(),
            plans,
            state: InscriptionState::New,
            commit_txid: None,
        })
    }

    /// Re-enters a session whose commit transaction was already broadcast.
    ///
    /// Reveal plans are derived again from the key and the requests, so `config` must carry
    /// the same requests as the original session.
    pub fn resume(
        client: Box<dyn ChainIndexer>,
        config: InscriptionConfig,
        internal_key: InternalKeyPair,
        commit_txid: Txid,
    ) -> InscriberResult<Self> {
        let mut inscriber = Self::with_internal_key(client, config, internal_key)?;
        inscriber.set_commit_txid(commit_txid);
        info!("Resumed session at commit {}", commit_txid);
        Ok(inscriber)
    }

    pub fn from_snapshot(
        client: Box<dyn ChainIndexer>,
        config: InscriptionConfig,
        snapshot: SessionSnapshot,
    ) -> InscriberResult<Self> {
        let internal_key = InternalKeyPair::from_wif(&snapshot.internal_key_wif)?;
        match snapshot.commit_txid {
            Some(commit_txid) => Self::resume(client, config, internal_key, commit_txid),
            None => Self::with_internal_key(client, config, internal_key),
        }
    }

    pub fn with_poller(mut self, poller: ConfirmationPoller) -> Self {
        self.poller = poller;
        self
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            internal_key_wif: self.internal_key_wif(),
            commit_txid: self.commit_txid,
        }
    }

    pub fn internal_key_wif(&self) -> String {
        self.internal_key.to_wif()
    }

    pub fn internal_public_key(&self) -> XOnlyPublicKey {
        self.internal_key.x_only_public_key()
    }

    pub fn state(&self) -> InscriptionState {
        self.state
    }

    pub fn commit_txid(&self) -> Option<Txid> {
        self.commit_txid
    }

    pub fn reveal_plans(&self) -> &[RevealPlan] {
        &self.plans
    }

    pub fn config(&self) -> &InscriptionConfig {
        &self.config
    }

    /// Runs every remaining step of the session, from wherever it currently stands.
    pub async fn inscribe(
        &mut self,
        signer: &dyn BitcoinSigner,
        stop_receiver: watch::Receiver<bool>,
    ) -> InscriberResult<RevealReport> {
        if matches!(
            self.state,
            InscriptionState::New | InscriptionState::CommitBuilt | InscriptionState::CommitSigned
        ) {
            let unsigned = self.build_commit().await?;
            let signed = self.sign_commit(unsigned, signer)?;
            self.broadcast_commit(&signed).await?;
        }

        if self.state == InscriptionState::CommitBroadcast {
            self.wait_for_commit_confirmation(stop_receiver).await?;
        }

        self.broadcast_reveals().await
    }

    /// Builds the commit from every spendable output of the sender.
    pub async fn build_commit(&mut self) -> InscriberResult<UnsignedCommitTx> {
        self.ensure_commit_not_broadcast()?;

        let sender = parse_address(&self.config.sender_address, self.config.network)?;
        let utxos = self.client.get_spendable_outputs(&sender).await?;
        let unconfirmed = utxos.iter().filter(|utxo| !utxo.confirmed).count();
        if unconfirmed > 0 {
            debug!("Funding includes {} unconfirmed outputs", unconfirmed);
        }

        self.build_commit_with_utxos(&utxos)
    }

    /// Builds the commit from a caller-chosen set of the sender's outputs.
    pub fn build_commit_with_utxos(
        &mut self,
        utxos: &[Utxo],
    ) -> InscriberResult<UnsignedCommitTx> {
        self.ensure_commit_not_broadcast()?;

        let unsigned = build_unsigned_commit(&self.config, utxos, &self.plans)?;
        self.state = InscriptionState::CommitBuilt;
        Ok(unsigned)
    }

    /// Signs the commit and verifies the signatures. Any signing or validation failure aborts
    /// the session.
    pub fn sign_commit(
        &mut self,
        unsigned: UnsignedCommitTx,
        signer: &dyn BitcoinSigner,
    ) -> InscriberResult<SignedCommitTx> {
        self.ensure_not_aborted()?;
        if self.state != InscriptionState::CommitBuilt {
            return Err(InscriberError::NotReady(format!(
                "cannot sign a commit in state {:?}",
                self.state
            )));
        }

        match sign_and_validate_commit(unsigned, signer) {
            Ok(signed) => {
                self.state = InscriptionState::CommitSigned;
                Ok(signed)
            }
            Err(err) => {
                error!("Commit signature rejected, aborting session: {}", err);
                METRICS.session_aborts.inc();
                self.state = InscriptionState::Aborted;
                Err(err)
            }
        }
    }

    /// Submits the signed commit. Indexer errors are returned as they are and leave the session
    /// in `CommitSigned`.
    #[instrument(skip_all, fields(txid = %signed.txid), target = "ord_inscriber::inscriber")]
    pub async fn broadcast_commit(&mut self, signed: &SignedCommitTx) -> InscriberResult<Txid> {
        self.ensure_not_aborted()?;
        if self.state != InscriptionState::CommitSigned {
            return Err(InscriberError::NotReady(format!(
                "cannot broadcast a commit in state {:?}",
                self.state
            )));
        }

        let txid = match self.client.broadcast(&serialize_hex(&signed.tx)).await {
            Ok(txid) => txid,
            Err(err) => {
                METRICS.broadcast_failures[&TxKind::Commit].inc();
                return Err(err);
            }
        };
        METRICS.broadcasts[&TxKind::Commit].inc();

        if txid != signed.txid {
            warn!("Indexer reported txid {} for commit {}", txid, signed.txid);
        }
        info!("Commit transaction broadcast: {}", txid);
        self.set_commit_txid(txid);
        Ok(txid)
    }

    /// Blocks until the commit is confirmed, the stop signal fires or the poller gives up.
    pub async fn wait_for_commit_confirmation(
        &mut self,
        stop_receiver: watch::Receiver<bool>,
    ) -> InscriberResult<TxStatus> {
        self.ensure_not_aborted()?;
        let commit_txid = self.require_commit_txid()?;

        let status = self
            .poller
            .wait_for_confirmation(self.client.as_ref(), commit_txid, stop_receiver)
            .await?;
        if self.state == InscriptionState::CommitBroadcast {
            self.state = InscriptionState::CommitConfirmed;
        }
        Ok(status)
    }

    /// Broadcasts the reveal of every request not revealed yet, in request order.
    ///
    /// Requires the commit to be confirmed. Failures of single reveals are collected in the
    /// report according to the session's [`RevealFailurePolicy`]; calling this again retries
    /// only the requests without a reveal.
    pub async fn broadcast_reveals(&mut self) -> InscriberResult<RevealReport> {
        self.ensure_not_aborted()?;
        let commit_txid = self.require_commit_txid()?;

        let commit_tx = self.client.get_transaction(&commit_txid).await?;
        if !commit_tx.status.confirmed {
            return Err(InscriberError::NotReady(format!(
                "commit {commit_txid} is not confirmed yet"
            )));
        }
        if self.state == InscriptionState::CommitBroadcast {
            self.state = InscriptionState::CommitConfirmed;
        }

        let mut report = RevealReport::default();
        let mut halted = false;
        for index in 0..self.plans.len() {
            let outcome = if let Some(txid) = self.plans[index].reveal_txid {
                RevealOutcome::AlreadyRevealed(txid)
            } else if halted {
                RevealOutcome::Skipped
            } else {
                match self.reveal(index, &commit_tx).await {
                    Ok(txid) => {
                        self.plans[index].reveal_txid = Some(txid);
                        RevealOutcome::Broadcast(txid)
                    }
                    Err(err) => {
                        warn!("Reveal {} failed: {}", index, err);
                        if self.config.reveal_failure_policy == RevealFailurePolicy::FailFast {
                            halted = true;
                        }
                        RevealOutcome::Failed(err)
                    }
                }
            };
            report.outcomes.push((index, outcome));
        }

        if report.is_complete() {
            info!("All {} reveals broadcast", self.plans.len());
            self.state = InscriptionState::Complete;
        }
        Ok(report)
    }

    #[instrument(skip(self, commit_tx), target = "ord_inscriber::inscriber")]
    async fn reveal(&self, index: usize, commit_tx: &IndexedTransaction) -> InscriberResult<Txid> {
        let plan = &self.plans[index];
        let commit_output = commit_tx.outputs.get(index).ok_or_else(|| {
            InscriberError::Lookup(format!(
                "commit {} has no output {}",
                commit_tx.txid, index
            ))
        })?;

        if commit_output.script_pubkey != plan.script_pubkey {
            return Err(InscriberError::AddressMismatch {
                index,
                expected: plan.envelope_address.clone(),
                derived: commit_output.script_pubkey.to_hex_string(),
            });
        }
        if commit_output.value != plan.required_value {
            warn!(
                "Commit output {} holds {} instead of {}",
                index, commit_output.value, plan.required_value
            );
        }

        let outpoint = plan
            .commit_output
            .unwrap_or_else(|| OutPoint::new(commit_tx.txid, index as u32));
        let reveal_tx = build_reveal_transaction(
            &self.secp,
            self.config.network,
            index,
            &self.config.requests[index],
            &self.internal_key,
            plan,
            outpoint,
            commit_output,
        )?;

        match self.client.broadcast(&serialize_hex(&reveal_tx)).await {
            Ok(txid) => {
                METRICS.broadcasts[&TxKind::Reveal].inc();
                info!("Reveal {} broadcast: {}", index, txid);
                Ok(txid)
            }
            Err(err) => {
                METRICS.broadcast_failures[&TxKind::Reveal].inc();
                Err(err)
            }
        }
    }

    fn set_commit_txid(&mut self, commit_txid: Txid) {
        self.commit_txid = Some(commit_txid);
        for (index, plan) in self.plans.iter_mut().enumerate() {
            plan.commit_output = Some(OutPoint::new(commit_txid, index as u32));
        }
        self.state = InscriptionState::CommitBroadcast;
    }

    fn require_commit_txid(&self) -> InscriberResult<Txid> {
        self.commit_txid
            .ok_or_else(|| InscriberError::NotReady("commit transaction not broadcast".into()))
    }

    fn ensure_not_aborted(&self) -> InscriberResult<()> {
        if self.state == InscriptionState::Aborted {
            return Err(InscriberError::SessionAborted);
        }
        Ok(())
    }

    fn ensure_commit_not_broadcast(&self) -> InscriberResult<()> {
        self.ensure_not_aborted()?;
        if self.commit_txid.is_some() {
            return Err(InscriberError::NotReady(
                "commit transaction already broadcast".into(),
            ));
        }
        Ok(())
    }
}

/// Rejects sessions that could never produce a valid commit, before any network call.
fn validate_config(config: &InscriptionConfig) -> InscriberResult<()> {
    OutputType::from_address(&config.sender_address)?;
    OutputType::from_address(&config.change_address)?;
    parse_address(&config.sender_address, config.network)?;
    parse_address(&config.change_address, config.network)?;

    if config.fee_rate == 0 {
        return Err(InscriberError::InvalidConfig(
            "fee rate must be positive".into(),
        ));
    }
    if config.requests.is_empty() {
        return Err(InscriberError::InvalidConfig(
            "at least one inscription request is required".into(),
        ));
    }
    for request in &config.requests {
        parse_address(&request.recipient_address, config.network)?;
    }
    Ok(())
}
