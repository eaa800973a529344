use std::fmt;

use bitcoin::{
    secp256k1::{All, Keypair, Secp256k1},
    Network, PrivateKey, XOnlyPublicKey,
};

use crate::types::{BitcoinSignerResult, InscriberError};

/// Session key behind every envelope of one inscription batch.
///
/// The x-only half goes into each envelope script and is the taproot internal key of each
/// envelope address; the secret half signs every reveal. One key therefore controls all commit
/// outputs of a batch, and leaking its WIF hands all of them over.
#[derive(Clone)]
pub struct InternalKeyPair {
    private_key: PrivateKey,
    keypair: Keypair,
}

impl InternalKeyPair {
    pub fn generate(network: Network) -> Self {
        let secp = Secp256k1::new();
        Self::from_private_key(&secp, PrivateKey::generate(network))
    }

    pub fn from_wif(wif: &str) -> BitcoinSignerResult<Self> {
        let private_key = PrivateKey::from_wif(wif)
            .map_err(|e| InscriberError::InvalidPrivateKey(e.to_string()))?;
        let secp = Secp256k1::new();
        Ok(Self::from_private_key(&secp, private_key))
    }

    pub fn from_private_key(secp: &Secp256k1<All>, private_key: PrivateKey) -> Self {
        let keypair = Keypair::from_secret_key(secp, &private_key.inner);
        Self {
            private_key,
            keypair,
        }
    }

    pub fn to_wif(&self) -> String {
        self.private_key.to_wif()
    }

    pub fn x_only_public_key(&self) -> XOnlyPublicKey {
        self.keypair.x_only_public_key().0
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }
}

impl fmt::Debug for InternalKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InternalKeyPair")
            .field("x_only_public_key", &self.x_only_public_key())
            .finish_non_exhaustive()
    }
}
