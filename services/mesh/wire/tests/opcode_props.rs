//! Property tests for opcode widths and access PDU framing.

use bytes::Bytes;
use mesh_wire::{AccessPdu, Opcode, WireError, MAX_SEGMENTED_ACCESS_PDU, MAX_UNSEGMENTED_ACCESS_PDU};
use proptest::prelude::*;

/// Valid opcodes of every encoding width
fn opcode_strategy() -> impl Strategy<Value = Opcode> {
    prop_oneof![
        (0x00u32..=0x7E),
        (0x8000u32..=0xBFFF),
        (0xC0_0000u32..=0xFF_FFFF),
    ]
    .prop_map(|value| Opcode::new(value).unwrap())
}

fn expected_width(value: u32) -> usize {
    match value {
        0x00..=0x7E => 1,
        0x8000..=0xBFFF => 2,
        _ => 3,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn access_pdu_round_trips_all_widths(
        opcode in opcode_strategy(),
        params in prop::collection::vec(any::<u8>(), 0..=MAX_SEGMENTED_ACCESS_PDU - 3),
    ) {
        let pdu = AccessPdu::new(opcode, params.clone());
        let encoded = pdu.encode_segmented().unwrap();

        let width = expected_width(opcode.value());
        prop_assert_eq!(opcode.encoded_len(), width);
        prop_assert_eq!(encoded.len(), width + params.len());

        let decoded = AccessPdu::decode(&encoded).unwrap();
        prop_assert_eq!(decoded.opcode, opcode);
        prop_assert_eq!(&decoded.parameters[..], &params[..]);

        let (raw, read) = Opcode::decode(&encoded).unwrap();
        prop_assert_eq!(raw, opcode);
        prop_assert_eq!(read, width);
    }

    #[test]
    fn unsegmented_limit_depends_on_width(
        opcode in opcode_strategy(),
        len in 0usize..=16,
    ) {
        let pdu = AccessPdu::new(opcode, vec![0x5A; len]);
        let total = opcode.encoded_len() + len;
        match pdu.encode() {
            Ok(encoded) => {
                prop_assert!(total <= MAX_UNSEGMENTED_ACCESS_PDU);
                prop_assert_eq!(AccessPdu::decode(&encoded).unwrap(), pdu);
            }
            Err(err) => {
                prop_assert!(total > MAX_UNSEGMENTED_ACCESS_PDU);
                prop_assert_eq!(
                    err,
                    WireError::ParametersTooLarge { len: total, max: MAX_UNSEGMENTED_ACCESS_PDU }
                );
            }
        }
    }

    #[test]
    fn truncated_opcodes_never_decode(opcode in opcode_strategy()) {
        let encoded = AccessPdu::new(opcode, Bytes::new()).encode().unwrap();
        for cut in 0..encoded.len() {
            prop_assert!(AccessPdu::decode(&encoded.slice(..cut)).is_err());
        }
    }
}
