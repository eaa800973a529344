use bitcoin::{
    absolute::LockTime, transaction::Version, Amount, OutPoint, ScriptBuf, Sequence, Transaction,
    TxIn, TxOut, Witness,
};

use super::{address_type::OutputType, script_builder::InscriptionData};
use crate::types::{InscriberError, Result};

/// Smallest output value treated as spendable. Every reveal output carries exactly this much.
pub const DUST_FLOOR: Amount = Amount::from_sat(330);

// version (4) + segwit marker and flag (1/2) + input count (1) + output count (1) + locktime (4)
const COMMIT_TX_BASE_SIZE: u64 = 10;

// BIP-340 signature with the default sighash, the flag byte is omitted
const SCHNORR_SIGNATURE_SIZE: usize = 64;

/// Commit change decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitFee {
    /// Change output value, present only when it exceeds [`DUST_FLOOR`].
    pub change: Option<Amount>,
    /// Implicit fee: inputs minus outputs.
    pub fee: Amount,
}

pub struct InscriberFeeCalculator {}

impl InscriberFeeCalculator {
    /// Reveal spend of `inscription` with a dummy signature, shaped like the real one.
    pub fn placeholder_reveal(inscription: &InscriptionData, recipient: ScriptBuf) -> Transaction {
        let mut witness = Witness::new();
        witness.push([0u8; SCHNORR_SIGNATURE_SIZE]);
        witness.push(inscription.inscription_script.as_bytes());
        witness.push(inscription.control_block.serialize());

        Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness,
            }],
            output: vec![TxOut {
                value: DUST_FLOOR,
                script_pubkey: recipient,
            }],
        }
    }

    /// Value the commit output of `inscription` must hold: the reveal fee at `fee_rate` plus
    /// the dust floor forwarded to the recipient.
    pub fn estimate_reveal_value(
        inscription: &InscriptionData,
        recipient: ScriptBuf,
        fee_rate: u64,
    ) -> Result<Amount> {
        let vsize = Self::placeholder_reveal(inscription, recipient).vsize() as u64;
        let fee = vsize
            .checked_mul(fee_rate)
            .map(Amount::from_sat)
            .ok_or_else(|| InscriberError::InvalidConfig(format!("fee rate {fee_rate} overflows")))?;
        fee.checked_add(DUST_FLOOR)
            .ok_or_else(|| InscriberError::InvalidConfig(format!("fee rate {fee_rate} overflows")))
    }

    /// Estimated commit size without a change output.
    pub fn estimate_commit_size(
        sender: OutputType,
        inputs_count: usize,
        reveals_count: usize,
    ) -> u64 {
        COMMIT_TX_BASE_SIZE
            + sender.input_size() * inputs_count as u64
            + OutputType::P2tr.output_size() * reveals_count as u64
    }

    /// Decides whether the commit keeps a change output.
    ///
    /// Fails when the inputs cannot cover `spend` plus the fee of the commit without change.
    /// The change output is sized like a sender output.
    pub fn commit_fee(
        sender: OutputType,
        inputs_count: usize,
        reveals_count: usize,
        total_input: Amount,
        spend: Amount,
        fee_rate: u64,
    ) -> Result<CommitFee> {
        let insufficient = || InscriberError::InsufficientBalance {
            available: total_input,
            required: spend,
        };

        let size = Self::estimate_commit_size(sender, inputs_count, reveals_count);
        let left = total_input.checked_sub(spend).ok_or_else(insufficient)?;
        if left.to_sat() / size < fee_rate {
            return Err(InscriberError::InsufficientBalance {
                available: total_input,
                required: spend + Amount::from_sat(size.saturating_mul(fee_rate)),
            });
        }

        let size_with_change = size + sender.output_size();
        let change = left
            .to_sat()
            .checked_sub(size_with_change.saturating_mul(fee_rate))
            .map(Amount::from_sat)
            .filter(|change| *change > DUST_FLOOR);

        Ok(CommitFee {
            change,
            fee: left - change.unwrap_or(Amount::ZERO),
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use bitcoin::{address::NetworkUnchecked, secp256k1::Secp256k1, Address, Network};

    use super::*;
    use crate::{inscriber::test_utils::test_internal_key, types::InscriptionRequest};

    const RECIPIENT: &str = "bcrt1qw508d6qejxtdg4y5r3zarvary0c5xw7kygt080";

    fn inscription(content_len: usize) -> InscriptionData {
        let request = InscriptionRequest::new("text/plain", vec![7u8; content_len], RECIPIENT);
        InscriptionData::new(
            &request,
            &Secp256k1::verification_only(),
            test_internal_key(1).x_only_public_key(),
            Network::Regtest,
        )
        .unwrap()
    }

    fn recipient_script() -> ScriptBuf {
        RECIPIENT
            .parse::<Address<NetworkUnchecked>>()
            .unwrap()
            .assume_checked()
            .script_pubkey()
    }

    #[test]
    fn reveal_value_is_fee_plus_dust() {
        let data = inscription(100);
        let vsize = InscriberFeeCalculator::placeholder_reveal(&data, recipient_script()).vsize();

        let value =
            InscriberFeeCalculator::estimate_reveal_value(&data, recipient_script(), 3).unwrap();
        assert_eq!(value, Amount::from_sat(vsize as u64 * 3) + DUST_FLOOR);

        let free = InscriberFeeCalculator::estimate_reveal_value(&data, recipient_script(), 0)
            .unwrap();
        assert_eq!(free, DUST_FLOOR);
    }

    #[test]
    fn reveal_value_grows_with_fee_rate_and_content() {
        let data = inscription(1_000);
        let mut previous = Amount::ZERO;
        for fee_rate in [0, 1, 2, 5, 10, 50, 200] {
            let value =
                InscriberFeeCalculator::estimate_reveal_value(&data, recipient_script(), fee_rate)
                    .unwrap();
            assert!(value >= DUST_FLOOR);
            assert!(value >= previous);
            previous = value;
        }

        let small =
            InscriberFeeCalculator::estimate_reveal_value(&inscription(10), recipient_script(), 5)
                .unwrap();
        let large = InscriberFeeCalculator::estimate_reveal_value(
            &inscription(2_000),
            recipient_script(),
            5,
        )
        .unwrap();
        assert!(large > small);
    }

    #[test]
    fn commit_size_uses_sender_input_size() {
        assert_eq!(
            InscriberFeeCalculator::estimate_commit_size(OutputType::P2wpkh, 2, 3),
            10 + 67 * 2 + 43 * 3
        );
        assert_eq!(
            InscriberFeeCalculator::estimate_commit_size(OutputType::P2tr, 1, 1),
            10 + 57 + 43
        );
    }

    #[test]
    fn change_is_kept_above_dust() {
        // size 120, size with change 151
        let fee = InscriberFeeCalculator::commit_fee(
            OutputType::P2wpkh,
            1,
            1,
            Amount::from_sat(100_000),
            Amount::from_sat(10_000),
            10,
        )
        .unwrap();

        assert_eq!(fee.change, Some(Amount::from_sat(100_000 - 10_000 - 1_510)));
        assert_eq!(fee.fee, Amount::from_sat(1_510));
    }

    #[test]
    fn change_at_or_below_dust_is_dropped() {
        // left 1_840 covers 151 * 10 = 1_510 with exactly 330 to spare
        let fee = InscriberFeeCalculator::commit_fee(
            OutputType::P2wpkh,
            1,
            1,
            Amount::from_sat(11_840),
            Amount::from_sat(10_000),
            10,
        )
        .unwrap();
        assert_eq!(fee.change, None);
        assert_eq!(fee.fee, Amount::from_sat(1_840));

        // affordable without change, not with it
        let fee = InscriberFeeCalculator::commit_fee(
            OutputType::P2wpkh,
            1,
            1,
            Amount::from_sat(11_300),
            Amount::from_sat(10_000),
            10,
        )
        .unwrap();
        assert_eq!(fee.change, None);
        assert_eq!(fee.fee, Amount::from_sat(1_300));
    }

    #[test]
    fn insufficient_balance() {
        assert_matches!(
            InscriberFeeCalculator::commit_fee(
                OutputType::P2wpkh,
                1,
                1,
                Amount::from_sat(5_000),
                Amount::from_sat(10_000),
                1,
            ),
            Err(InscriberError::InsufficientBalance { .. })
        );

        // left 1_199 over size 120 floors to 9 < 10
        assert_matches!(
            InscriberFeeCalculator::commit_fee(
                OutputType::P2wpkh,
                1,
                1,
                Amount::from_sat(11_199),
                Amount::from_sat(10_000),
                10,
            ),
            Err(InscriberError::InsufficientBalance { .. })
        );

        // exactly enough for the no-change size
        let fee = InscriberFeeCalculator::commit_fee(
            OutputType::P2wpkh,
            1,
            1,
            Amount::from_sat(11_200),
            Amount::from_sat(10_000),
            10,
        )
        .unwrap();
        assert_eq!(fee.change, None);
    }

    #[test]
    fn commit_fee_is_monotonic_in_fee_rate() {
        let mut previous_fee = Amount::ZERO;
        let mut previous_change = Amount::MAX_MONEY;
        for fee_rate in 1..=40 {
            let fee = InscriberFeeCalculator::commit_fee(
                OutputType::P2tr,
                2,
                3,
                Amount::from_sat(60_000),
                Amount::from_sat(30_000),
                fee_rate,
            )
            .unwrap();
            let change = fee.change.unwrap_or(Amount::ZERO);
            assert!(fee.fee >= previous_fee, "fee rate {fee_rate}");
            assert!(change <= previous_change, "fee rate {fee_rate}");
            previous_fee = fee.fee;
            previous_change = change;
        }
    }
}
