use bitcoin::{
    hashes::Hash,
    secp256k1::{Message, Secp256k1, Verification},
    sighash::{Prevouts, SighashCache},
    taproot::{ControlBlock, LeafVersion},
    CompressedPublicKey, Script, ScriptBuf, TapLeafHash, Transaction, TxOut, XOnlyPublicKey,
};

use crate::types::{InscriberError, Result};

fn invalid(input: usize, reason: impl Into<String>) -> InscriberError {
    InscriberError::SignatureInvalid {
        input,
        reason: reason.into(),
    }
}

/// Output key committed to by a v1 witness program.
fn taproot_output_key(input: usize, script_pubkey: &Script) -> Result<XOnlyPublicKey> {
    if !script_pubkey.is_p2tr() {
        return Err(invalid(input, "prevout is not a taproot output"));
    }
    XOnlyPublicKey::from_slice(&script_pubkey.as_bytes()[2..34])
        .map_err(|e| invalid(input, e.to_string()))
}

/// Checks every signed input of a commit transaction against the outputs it spends.
pub fn verify_commit_signatures(tx: &Transaction, prevouts: &[TxOut]) -> Result<()> {
    if prevouts.len() != tx.input.len() {
        return Err(InscriberError::TransactionBuilding(format!(
            "{} prevouts for {} inputs",
            prevouts.len(),
            tx.input.len()
        )));
    }

    let secp = Secp256k1::verification_only();
    let mut sighash_cache = SighashCache::new(tx);
    for (input_index, prevout) in prevouts.iter().enumerate() {
        if prevout.script_pubkey.is_p2wpkh() {
            verify_p2wpkh_input(&secp, &mut sighash_cache, tx, input_index, prevout)?;
        } else if prevout.script_pubkey.is_p2tr() {
            verify_p2tr_key_spend(&secp, &mut sighash_cache, tx, input_index, prevouts)?;
        } else {
            return Err(invalid(input_index, "unsupported prevout script"));
        }
    }
    Ok(())
}

fn verify_p2wpkh_input<C: Verification>(
    secp: &Secp256k1<C>,
    sighash_cache: &mut SighashCache<&Transaction>,
    tx: &Transaction,
    input_index: usize,
    prevout: &TxOut,
) -> Result<()> {
    let witness = &tx.input[input_index].witness;
    if witness.len() != 2 {
        return Err(invalid(
            input_index,
            format!("expected 2 witness elements, got {}", witness.len()),
        ));
    }
    let (Some(signature), Some(public_key)) = (witness.nth(0), witness.nth(1)) else {
        return Err(invalid(input_index, "missing witness element"));
    };

    let signature = bitcoin::ecdsa::Signature::from_slice(signature)
        .map_err(|e| invalid(input_index, e.to_string()))?;
    let public_key = CompressedPublicKey::from_slice(public_key)
        .map_err(|e| invalid(input_index, e.to_string()))?;

    if ScriptBuf::new_p2wpkh(&public_key.wpubkey_hash()) != prevout.script_pubkey {
        return Err(invalid(
            input_index,
            "public key does not match the spent output",
        ));
    }

    let sighash = sighash_cache
        .p2wpkh_signature_hash(
            input_index,
            &prevout.script_pubkey,
            prevout.value,
            signature.sighash_type,
        )
        .map_err(|e| invalid(input_index, e.to_string()))?;

    secp.verify_ecdsa(
        &Message::from_digest(sighash.to_byte_array()),
        &signature.signature,
        &public_key.0,
    )
    .map_err(|e| invalid(input_index, e.to_string()))
}

fn verify_p2tr_key_spend<C: Verification>(
    secp: &Secp256k1<C>,
    sighash_cache: &mut SighashCache<&Transaction>,
    tx: &Transaction,
    input_index: usize,
    prevouts: &[TxOut],
) -> Result<()> {
    let witness = &tx.input[input_index].witness;
    let Some(signature) = witness.nth(0).filter(|_| witness.len() == 1) else {
        return Err(invalid(input_index, "expected a single key-path signature"));
    };
    let signature = bitcoin::taproot::Signature::from_slice(signature)
        .map_err(|e| invalid(input_index, e.to_string()))?;
    let output_key = taproot_output_key(input_index, &prevouts[input_index].script_pubkey)?;

    let sighash = sighash_cache
        .taproot_key_spend_signature_hash(
            input_index,
            &Prevouts::All(prevouts),
            signature.sighash_type,
        )
        .map_err(|e| invalid(input_index, e.to_string()))?;

    secp.verify_schnorr(
        &signature.signature,
        &Message::from_digest(sighash.to_byte_array()),
        &output_key,
    )
    .map_err(|e| invalid(input_index, e.to_string()))
}

/// Checks a reveal input: the witness must be `[signature, script, control block]`, the
/// signature must be valid for the key in the envelope, and the control block must commit the
/// envelope script to the spent output.
pub fn verify_reveal_signature(
    tx: &Transaction,
    input_index: usize,
    prevouts: &[TxOut],
    leaf_key: &XOnlyPublicKey,
    script: &Script,
    control_block: &ControlBlock,
) -> Result<()> {
    let input = tx
        .input
        .get(input_index)
        .ok_or_else(|| invalid(input_index, "no such input"))?;
    let prevout = prevouts
        .get(input_index)
        .ok_or_else(|| invalid(input_index, "missing prevout"))?;

    let witness = &input.witness;
    if witness.len() != 3 {
        return Err(invalid(
            input_index,
            format!("expected 3 witness elements, got {}", witness.len()),
        ));
    }
    let (Some(signature), Some(witness_script), Some(witness_control_block)) =
        (witness.nth(0), witness.nth(1), witness.nth(2))
    else {
        return Err(invalid(input_index, "missing witness element"));
    };
    if witness_script != script.as_bytes() {
        return Err(invalid(input_index, "witness script differs from the envelope"));
    }
    if witness_control_block != control_block.serialize().as_slice() {
        return Err(invalid(input_index, "witness control block differs"));
    }

    let signature = bitcoin::taproot::Signature::from_slice(signature)
        .map_err(|e| invalid(input_index, e.to_string()))?;

    let secp = Secp256k1::verification_only();
    let sighash = SighashCache::new(tx)
        .taproot_script_spend_signature_hash(
            input_index,
            &Prevouts::All(prevouts),
            TapLeafHash::from_script(script, LeafVersion::TapScript),
            signature.sighash_type,
        )
        .map_err(|e| invalid(input_index, e.to_string()))?;

    secp.verify_schnorr(
        &signature.signature,
        &Message::from_digest(sighash.to_byte_array()),
        leaf_key,
    )
    .map_err(|e| invalid(input_index, e.to_string()))?;

    let output_key = taproot_output_key(input_index, &prevout.script_pubkey)?;
    if !control_block.verify_taproot_commitment(&secp, output_key, script) {
        return Err(invalid(
            input_index,
            "control block does not commit to the envelope script",
        ));
    }
    Ok(())
}
