use bitcoin::{
    absolute::LockTime,
    hashes::Hash,
    secp256k1::{All, Message, Secp256k1},
    sighash::{Prevouts, SighashCache},
    taproot::LeafVersion,
    transaction::Version,
    Amount, Network, OutPoint, ScriptBuf, Sequence, TapLeafHash, TapSighashType, Transaction,
    TxIn, TxOut, Txid, Witness,
};
use tracing::{debug, instrument};

use super::{
    address_type::{parse_address, OutputType},
    fee::{InscriberFeeCalculator, DUST_FLOOR},
    script_builder::InscriptionData,
    validation::{verify_commit_signatures, verify_reveal_signature},
};
use crate::{
    signer::InternalKeyPair,
    traits::BitcoinSigner,
    types::{InscriberError, InscriptionConfig, InscriptionRequest, Result, RevealPlan, Utxo},
};

/// Commit transaction before its inputs are signed.
#[derive(Debug, Clone, PartialEq)]
pub struct UnsignedCommitTx {
    pub tx: Transaction,
    /// Outputs spent by `tx.input`, in input order.
    pub prevouts: Vec<TxOut>,
    pub change: Option<Amount>,
    pub fee: Amount,
}

/// Commit transaction whose every input signature was verified independently of the signer.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedCommitTx {
    pub tx: Transaction,
    pub prevouts: Vec<TxOut>,
    pub txid: Txid,
}

/// Derives the envelope address and fixes the commit output value for one request.
#[instrument(skip(secp, request, internal_key), target = "ord_inscriber::transaction_builder")]
pub fn build_reveal_plan(
    secp: &Secp256k1<All>,
    network: Network,
    fee_rate: u64,
    request: &InscriptionRequest,
    internal_key: &InternalKeyPair,
) -> Result<RevealPlan> {
    let inscription = InscriptionData::new(request, secp, internal_key.x_only_public_key(), network)?;
    let recipient = parse_address(&request.recipient_address, network)?;
    let required_value = InscriberFeeCalculator::estimate_reveal_value(
        &inscription,
        recipient.script_pubkey(),
        fee_rate,
    )?;

    debug!(
        "Reveal plan for {}: {}",
        inscription.address, required_value
    );
    Ok(RevealPlan {
        envelope_address: inscription.address.to_string(),
        script_pubkey: inscription.script_pubkey,
        required_value,
        commit_output: None,
        reveal_txid: None,
    })
}

/// Builds the commit: one input per UTXO of the sender, one output per plan at its fixed value
/// (output `i` funds plan `i`), then the optional change output.
#[instrument(skip(config, utxos, plans), target = "ord_inscriber::transaction_builder")]
pub fn build_unsigned_commit(
    config: &InscriptionConfig,
    utxos: &[Utxo],
    plans: &[RevealPlan],
) -> Result<UnsignedCommitTx> {
    let sender_type = OutputType::from_address(&config.sender_address)?;
    OutputType::from_address(&config.change_address)?;
    let sender = parse_address(&config.sender_address, config.network)?;
    let change_address = parse_address(&config.change_address, config.network)?;

    let spend = plans
        .iter()
        .map(|plan| plan.required_value)
        .try_fold(Amount::ZERO, |acc, value| acc.checked_add(value))
        .ok_or_else(|| InscriberError::TransactionBuilding("reveal values overflow".into()))?;
    let total = utxos
        .iter()
        .map(|utxo| utxo.value)
        .try_fold(Amount::ZERO, |acc, value| acc.checked_add(value))
        .ok_or_else(|| InscriberError::TransactionBuilding("input values overflow".into()))?;

    if utxos.is_empty() {
        return Err(InscriberError::InsufficientBalance {
            available: Amount::ZERO,
            required: spend,
        });
    }

    let commit_fee = InscriberFeeCalculator::commit_fee(
        sender_type,
        utxos.len(),
        plans.len(),
        total,
        spend,
        config.fee_rate,
    )?;

    let sender_script = sender.script_pubkey();
    let input = utxos
        .iter()
        .map(|utxo| TxIn {
            previous_output: utxo.outpoint,
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            witness: Witness::new(),
        })
        .collect();
    let prevouts = utxos
        .iter()
        .map(|utxo| TxOut {
            value: utxo.value,
            script_pubkey: sender_script.clone(),
        })
        .collect();

    let mut output: Vec<TxOut> = plans
        .iter()
        .map(|plan| TxOut {
            value: plan.required_value,
            script_pubkey: plan.script_pubkey.clone(),
        })
        .collect();
    if let Some(change) = commit_fee.change {
        output.push(TxOut {
            value: change,
            script_pubkey: change_address.script_pubkey(),
        });
    }

    debug!(
        "Commit built: {} inputs, {} reveal outputs, change {:?}, fee {}",
        utxos.len(),
        plans.len(),
        commit_fee.change,
        commit_fee.fee
    );

    Ok(UnsignedCommitTx {
        tx: Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input,
            output,
        },
        prevouts,
        change: commit_fee.change,
        fee: commit_fee.fee,
    })
}

/// Signs the commit through `signer`, then re-verifies each input signature on its own.
#[instrument(skip(unsigned, signer), target = "ord_inscriber::transaction_builder")]
pub fn sign_and_validate_commit(
    unsigned: UnsignedCommitTx,
    signer: &dyn BitcoinSigner,
) -> Result<SignedCommitTx> {
    let UnsignedCommitTx {
        mut tx, prevouts, ..
    } = unsigned;

    signer.sign_inputs(&mut tx, &prevouts)?;
    verify_commit_signatures(&tx, &prevouts)?;

    Ok(SignedCommitTx {
        txid: tx.compute_txid(),
        tx,
        prevouts,
    })
}

/// Builds and signs the reveal of request `index`, spending `commit_output` (holding
/// `commit_prevout`) through the envelope script.
///
/// The envelope is derived again from the internal key and the request; any difference from
/// the address recorded in `plan` or from the spent output fails with `AddressMismatch`.
#[allow(clippy::too_many_arguments)]
#[instrument(
    skip(secp, request, internal_key, plan, commit_prevout),
    target = "ord_inscriber::transaction_builder"
)]
pub fn build_reveal_transaction(
    secp: &Secp256k1<All>,
    network: Network,
    index: usize,
    request: &InscriptionRequest,
    internal_key: &InternalKeyPair,
    plan: &RevealPlan,
    commit_output: OutPoint,
    commit_prevout: &TxOut,
) -> Result<Transaction> {
    let leaf_key = internal_key.x_only_public_key();
    let inscription = InscriptionData::new(request, secp, leaf_key, network)?;

    let derived = inscription.address.to_string();
    if derived != plan.envelope_address {
        return Err(InscriberError::AddressMismatch {
            index,
            expected: plan.envelope_address.clone(),
            derived,
        });
    }
    if inscription.script_pubkey != commit_prevout.script_pubkey {
        return Err(InscriberError::AddressMismatch {
            index,
            expected: commit_prevout.script_pubkey.to_hex_string(),
            derived: inscription.script_pubkey.to_hex_string(),
        });
    }

    let recipient = parse_address(&request.recipient_address, network)?;
    let mut tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: commit_output,
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: DUST_FLOOR,
            script_pubkey: recipient.script_pubkey(),
        }],
    };

    let prevouts = [commit_prevout.clone()];
    let sighash = SighashCache::new(&tx)
        .taproot_script_spend_signature_hash(
            0,
            &Prevouts::All(&prevouts),
            TapLeafHash::from_script(&inscription.inscription_script, LeafVersion::TapScript),
            TapSighashType::Default,
        )
        .map_err(|e| InscriberError::SigningError(e.to_string()))?;

    let message = Message::from_digest(sighash.to_byte_array());
    let signature = bitcoin::taproot::Signature {
        signature: secp.sign_schnorr_no_aux_rand(&message, internal_key.keypair()),
        sighash_type: TapSighashType::Default,
    };

    let mut witness = Witness::new();
    witness.push(signature.serialize());
    witness.push(inscription.inscription_script.as_bytes());
    witness.push(inscription.control_block.serialize());
    tx.input[0].witness = witness;

    verify_reveal_signature(
        &tx,
        0,
        &prevouts,
        &leaf_key,
        &inscription.inscription_script,
        &inscription.control_block,
    )?;

    debug!("Reveal {} built: {}", index, tx.compute_txid());
    Ok(tx)
}
