use bitcoin::{
    opcodes::{all, OP_0, OP_FALSE},
    script::{Builder as ScriptBuilder, PushBytesBuf},
    secp256k1::{Secp256k1, Verification},
    taproot::{ControlBlock, LeafVersion, TaprootBuilder, TaprootSpendInfo},
    Address, Network, ScriptBuf, XOnlyPublicKey,
};
use tracing::{debug, instrument};

use crate::types::{InscriberError, InscriptionRequest, Result};

/// Protocol identifier pushed right after `OP_IF`.
pub const ORD_PROTOCOL_TAG: &[u8] = b"ord";
/// Field tag announcing the content type.
pub const CONTENT_TYPE_TAG: &[u8] = &[1];
/// Largest data push the script interpreter accepts.
pub const MAX_PUSH_SIZE: usize = 520;

/// Envelope script of one request and the taproot commitment derived from it.
#[derive(Debug, Clone)]
pub struct InscriptionData {
    pub inscription_script: ScriptBuf,
    pub script_size: usize,
    pub script_pubkey: ScriptBuf,
    pub taproot_spend_info: TaprootSpendInfo,
    pub control_block: ControlBlock,
    pub address: Address,
}

impl InscriptionData {
    #[instrument(
        skip(request, secp, internal_key),
        target = "ord_inscriber::script_builder"
    )]
    pub fn new<C: Verification>(
        request: &InscriptionRequest,
        secp: &Secp256k1<C>,
        internal_key: XOnlyPublicKey,
        network: Network,
    ) -> Result<Self> {
        debug!("Creating new InscriptionData");
        let inscription_script = build_envelope_script(&internal_key, request)?;
        let script_size = inscription_script.len();

        let taproot_spend_info =
            Self::construct_commitment_data(secp, &inscription_script, internal_key)?;

        let control_block = taproot_spend_info
            .control_block(&(inscription_script.clone(), LeafVersion::TapScript))
            .ok_or_else(|| {
                InscriberError::TransactionBuilding("missing control block for leaf".to_string())
            })?;

        let address = Address::p2tr_tweaked(taproot_spend_info.output_key(), network);
        let script_pubkey = address.script_pubkey();

        debug!("InscriptionData created, script size: {}", script_size);
        Ok(Self {
            inscription_script,
            script_size,
            script_pubkey,
            taproot_spend_info,
            control_block,
            address,
        })
    }

    // The envelope is committed as two identical leaves at depth one. Changing the tree shape
    // changes every derived address, and with it the ability to resume older sessions.
    fn construct_commitment_data<C: Verification>(
        secp: &Secp256k1<C>,
        inscription_script: &ScriptBuf,
        internal_key: XOnlyPublicKey,
    ) -> Result<TaprootSpendInfo> {
        let builder = TaprootBuilder::new()
            .add_leaf(1, inscription_script.clone())
            .and_then(|builder| builder.add_leaf(1, inscription_script.clone()))
            .map_err(|e| InscriberError::TransactionBuilding(e.to_string()))?;

        builder.finalize(secp, internal_key).map_err(|e| {
            InscriberError::TransactionBuilding(format!(
                "Failed to finalize taproot spend info: {:?}",
                e
            ))
        })
    }
}

/// Builds the envelope script of a request:
///
/// ```text
/// <internal key> OP_CHECKSIG OP_FALSE OP_IF "ord" 0x01 <content type> OP_0 <content chunks..> OP_ENDIF
/// ```
///
/// Content is pushed in chunks of at most [`MAX_PUSH_SIZE`] bytes; empty content yields no
/// chunk at all. The output only depends on the arguments.
pub fn build_envelope_script(
    public_key: &XOnlyPublicKey,
    request: &InscriptionRequest,
) -> Result<ScriptBuf> {
    let mut script = ScriptBuilder::new()
        .push_x_only_key(public_key)
        .push_opcode(all::OP_CHECKSIG)
        .push_opcode(OP_FALSE)
        .push_opcode(all::OP_IF)
        .push_slice(encode_push_bytes(ORD_PROTOCOL_TAG)?)
        .push_slice(encode_push_bytes(CONTENT_TYPE_TAG)?)
        .push_slice(encode_push_bytes(request.content_type.as_bytes())?)
        .push_opcode(OP_0);

    for chunk in request.content.chunks(MAX_PUSH_SIZE) {
        script = script.push_slice(encode_push_bytes(chunk)?);
    }

    Ok(script.push_opcode(all::OP_ENDIF).into_script())
}

fn encode_push_bytes(data: &[u8]) -> Result<PushBytesBuf> {
    PushBytesBuf::try_from(data.to_vec())
        .map_err(|e| InscriberError::InvalidContent(e.to_string()))
}

#[cfg(test)]
mod tests {
    use bitcoin::{script::Instruction, secp256k1::Secp256k1};

    use super::*;
    use crate::inscriber::{address_type::OutputType, test_utils::test_internal_key};

    fn request(content: &[u8]) -> InscriptionRequest {
        InscriptionRequest::new(
            "text/plain;charset=utf-8",
            content,
            "bcrt1qw508d6qejxtdg4y5r3zarvary0c5xw7kygt080",
        )
    }

    fn content_chunks(script: &ScriptBuf) -> Vec<Vec<u8>> {
        let instructions: Vec<_> = script
            .instructions()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        // key, CHECKSIG, FALSE, IF, tag, content type tag, content type, OP_0 ... ENDIF
        assert_eq!(
            instructions.last(),
            Some(&Instruction::Op(all::OP_ENDIF))
        );
        instructions[8..instructions.len() - 1]
            .iter()
            .map(|instruction| match instruction {
                Instruction::PushBytes(bytes) => bytes.as_bytes().to_vec(),
                Instruction::Op(op) => panic!("unexpected opcode {op:?} in content"),
            })
            .collect()
    }

    #[test]
    fn envelope_layout() {
        let key = test_internal_key(1).x_only_public_key();
        let script = build_envelope_script(&key, &request(b"hello world")).unwrap();

        let mut expected = vec![0x20];
        expected.extend_from_slice(&key.serialize());
        expected.extend_from_slice(&[0xac, 0x00, 0x63]);
        expected.extend_from_slice(&[0x03, b'o', b'r', b'd']);
        expected.extend_from_slice(&[0x01, 0x01]);
        expected.push(24);
        expected.extend_from_slice(b"text/plain;charset=utf-8");
        expected.push(0x00);
        expected.push(11);
        expected.extend_from_slice(b"hello world");
        expected.push(0x68);

        assert_eq!(script.as_bytes(), expected.as_slice());
    }

    #[test]
    fn content_is_split_into_max_size_pushes() {
        let key = test_internal_key(1).x_only_public_key();
        for len in [0usize, 1, 519, 520, 521, 1040, 1041, 5000] {
            let content: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let script = build_envelope_script(&key, &request(&content)).unwrap();
            let chunks = content_chunks(&script);

            assert_eq!(chunks.len(), len.div_ceil(MAX_PUSH_SIZE), "length {len}");
            assert!(chunks.iter().all(|chunk| chunk.len() <= MAX_PUSH_SIZE));
            assert_eq!(chunks.concat(), content);
        }
    }

    #[test]
    fn envelope_is_deterministic() {
        let key = test_internal_key(7).x_only_public_key();
        let content = vec![0xab; 1500];
        let first = build_envelope_script(&key, &request(&content)).unwrap();
        let second = build_envelope_script(&key, &request(&content)).unwrap();
        assert_eq!(first, second);

        let secp = Secp256k1::verification_only();
        let first = InscriptionData::new(&request(&content), &secp, key, Network::Regtest).unwrap();
        let second =
            InscriptionData::new(&request(&content), &secp, key, Network::Regtest).unwrap();
        assert_eq!(first.address, second.address);
        assert_eq!(first.control_block, second.control_block);
    }

    #[test]
    fn derived_address_is_taproot() {
        let secp = Secp256k1::verification_only();
        let key = test_internal_key(3).x_only_public_key();
        let data = InscriptionData::new(&request(b"{}"), &secp, key, Network::Testnet).unwrap();

        assert_eq!(
            OutputType::classify(&data.address.to_string()),
            Some(OutputType::P2tr)
        );
        assert_eq!(data.script_size, data.inscription_script.len());
        assert!(data.control_block.verify_taproot_commitment(
            &secp,
            data.taproot_spend_info.output_key().to_x_only_public_key(),
            &data.inscription_script,
        ));
    }

    #[test]
    fn address_depends_on_key_and_content() {
        let secp = Secp256k1::verification_only();
        let key = test_internal_key(3).x_only_public_key();
        let other_key = test_internal_key(4).x_only_public_key();

        let base = InscriptionData::new(&request(b"a"), &secp, key, Network::Regtest).unwrap();
        let other_content =
            InscriptionData::new(&request(b"b"), &secp, key, Network::Regtest).unwrap();
        let other_owner =
            InscriptionData::new(&request(b"a"), &secp, other_key, Network::Regtest).unwrap();

        assert_ne!(base.address, other_content.address);
        assert_ne!(base.address, other_owner.address);
    }

    #[test]
    fn small_chunks_stay_data_pushes() {
        let key = test_internal_key(1).x_only_public_key();
        for byte in [0x01u8, 0x05, 0x10, 0x81] {
            let script = build_envelope_script(&key, &request(&[byte])).unwrap();
            let bytes = script.as_bytes();

            assert_eq!(&bytes[bytes.len() - 4..], &[0x00, 0x01, byte, 0x68]);
            assert_eq!(content_chunks(&script), vec![vec![byte]]);
        }
    }
}
