use std::fmt;

use bitcoin::{
    hashes::Hash,
    key::TapTweak,
    secp256k1::{All, Keypair, Message, Secp256k1, SecretKey},
    sighash::{Prevouts, SighashCache},
    Address, CompressedPublicKey, EcdsaSighashType, Network, PrivateKey, TapSighashType,
    Transaction, TxOut, Witness,
};
use tracing::{debug, instrument};

use crate::{
    inscriber::address_type::OutputType,
    traits::BitcoinSigner,
    types::{BitcoinSignerResult, InscriberError},
};

mod internal_key;

pub use internal_key::InternalKeyPair;

/// Holds the sender's key and signs commit inputs spending the sender's outputs.
///
/// P2WPKH outputs get an ECDSA `SIGHASH_ALL` signature, P2TR outputs a key-path Schnorr
/// signature with the default sighash.
pub struct KeyManager {
    secp: Secp256k1<All>,
    secret_key: SecretKey,
    keypair: Keypair,
    public_key: CompressedPublicKey,
    address: Address,
}

impl fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyManager")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl KeyManager {
    pub fn new(
        private_key_wif: &str,
        output_type: OutputType,
        network: Network,
    ) -> BitcoinSignerResult<Self> {
        let secp = Secp256k1::new();
        let private_key = PrivateKey::from_wif(private_key_wif)
            .map_err(|e| InscriberError::InvalidPrivateKey(e.to_string()))?;
        let public_key = CompressedPublicKey::from_private_key(&secp, &private_key)
            .map_err(|e| InscriberError::InvalidPrivateKey(e.to_string()))?;
        let keypair = Keypair::from_secret_key(&secp, &private_key.inner);

        let address = match output_type {
            OutputType::P2wpkh => Address::p2wpkh(&public_key, network),
            OutputType::P2tr => Address::p2tr(&secp, keypair.x_only_public_key().0, None, network),
        };

        Ok(Self {
            secp,
            secret_key: private_key.inner,
            keypair,
            public_key,
            address,
        })
    }

    fn sign_p2wpkh(
        &self,
        sighash_cache: &mut SighashCache<&Transaction>,
        input_index: usize,
        prevout: &TxOut,
    ) -> BitcoinSignerResult<Witness> {
        let sighash = sighash_cache
            .p2wpkh_signature_hash(
                input_index,
                &prevout.script_pubkey,
                prevout.value,
                EcdsaSighashType::All,
            )
            .map_err(|e| InscriberError::SigningError(e.to_string()))?;

        let message = Message::from_digest(sighash.to_byte_array());
        let signature = bitcoin::ecdsa::Signature {
            signature: self.secp.sign_ecdsa(&message, &self.secret_key),
            sighash_type: EcdsaSighashType::All,
        };

        Ok(Witness::p2wpkh(&signature, &self.public_key.0))
    }

    fn sign_p2tr(
        &self,
        sighash_cache: &mut SighashCache<&Transaction>,
        input_index: usize,
        prevouts: &[TxOut],
    ) -> BitcoinSignerResult<Witness> {
        let sighash = sighash_cache
            .taproot_key_spend_signature_hash(
                input_index,
                &Prevouts::All(prevouts),
                TapSighashType::Default,
            )
            .map_err(|e| InscriberError::SigningError(e.to_string()))?;

        let tweaked = self.keypair.tap_tweak(&self.secp, None);
        let message = Message::from_digest(sighash.to_byte_array());
        let signature = bitcoin::taproot::Signature {
            signature: self
                .secp
                .sign_schnorr_no_aux_rand(&message, &tweaked.to_keypair()),
            sighash_type: TapSighashType::Default,
        };

        Ok(Witness::p2tr_key_spend(&signature))
    }
}

impl BitcoinSigner for KeyManager {
    #[instrument(skip(self, tx, prevouts), target = "ord_inscriber::signer")]
    fn sign_inputs(&self, tx: &mut Transaction, prevouts: &[TxOut]) -> BitcoinSignerResult<()> {
        if prevouts.len() != tx.input.len() {
            return Err(InscriberError::SigningError(format!(
                "{} prevouts given for {} inputs",
                prevouts.len(),
                tx.input.len()
            )));
        }

        let own_script = self.address.script_pubkey();
        let witnesses = {
            let mut sighash_cache = SighashCache::new(&*tx);
            let mut witnesses = Vec::with_capacity(prevouts.len());
            for (input_index, prevout) in prevouts.iter().enumerate() {
                if prevout.script_pubkey != own_script {
                    return Err(InscriberError::SigningError(format!(
                        "input {input_index} does not spend {}",
                        self.address
                    )));
                }
                let witness = if own_script.is_p2wpkh() {
                    self.sign_p2wpkh(&mut sighash_cache, input_index, prevout)?
                } else {
                    self.sign_p2tr(&mut sighash_cache, input_index, prevouts)?
                };
                witnesses.push(witness);
            }
            witnesses
        };

        for (input, witness) in tx.input.iter_mut().zip(witnesses) {
            input.witness = witness;
        }
        debug!("Signed {} commit inputs", tx.input.len());
        Ok(())
    }

    fn get_address(&self) -> &Address {
        &self.address
    }
}
