use std::str::FromStr;

use bitcoin::{address::NetworkUnchecked, Address, AddressType, Network};
use serde::{Deserialize, Serialize};

use crate::types::{InscriberError, Result};

// Input/output virtual sizes (vB) used for commit transaction size estimation.
//
// p2wpkh input: outpoint (36) + scriptSig length (1) + sequence (4) + witness/4 (~26)
const P2WPKH_INPUT_SIZE: u64 = 67;
// p2tr key spend input: outpoint (36) + scriptSig length (1) + sequence (4) + witness/4 (~16)
const P2TR_INPUT_SIZE: u64 = 57;
// value (8) + scriptPubKey length (1) + scriptPubKey (22)
const P2WPKH_OUTPUT_SIZE: u64 = 31;
// value (8) + scriptPubKey length (1) + scriptPubKey (34)
const P2TR_OUTPUT_SIZE: u64 = 43;

/// Output types an inscription session can fund from or send change to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputType {
    /// Witness v0, 20-byte program.
    P2wpkh,
    /// Witness v1, 32-byte program.
    P2tr,
}

impl OutputType {
    /// Classifies an address string by its native segwit version and program length.
    ///
    /// Returns `None` for anything unsupported, including strings that do not parse. The
    /// network encoded in the address is not checked here.
    pub fn classify(address: &str) -> Option<Self> {
        let address = Address::<NetworkUnchecked>::from_str(address).ok()?;
        match address.assume_checked().address_type()? {
            AddressType::P2wpkh => Some(Self::P2wpkh),
            AddressType::P2tr => Some(Self::P2tr),
            _ => None,
        }
    }

    pub fn from_address(address: &str) -> Result<Self> {
        Self::classify(address)
            .ok_or_else(|| InscriberError::UnsupportedAddressType(address.to_string()))
    }

    pub fn input_size(self) -> u64 {
        match self {
            Self::P2wpkh => P2WPKH_INPUT_SIZE,
            Self::P2tr => P2TR_INPUT_SIZE,
        }
    }

    pub fn output_size(self) -> u64 {
        match self {
            Self::P2wpkh => P2WPKH_OUTPUT_SIZE,
            Self::P2tr => P2TR_OUTPUT_SIZE,
        }
    }
}

/// Parses an address and checks it belongs to `network`.
pub fn parse_address(address: &str, network: Network) -> Result<Address> {
    Ok(Address::<NetworkUnchecked>::from_str(address)?.require_network(network)?)
}
