//! Property tests for segmentation and reassembly.

use bytes::Bytes;
use mesh_wire::{reassemble, segment, Reassembler, ACCESS_SEGMENT_SIZE, MAX_SEGMENTS};
use proptest::prelude::*;

fn pdu_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..=110)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn segments_respect_size_and_count(data in pdu_strategy(), size in 1usize..=ACCESS_SEGMENT_SIZE) {
        let pdu = Bytes::from(data);
        match segment(&pdu, size, 0x0042) {
            Ok(segments) => {
                prop_assert!(segments.len() <= MAX_SEGMENTS);
                prop_assert!(segments.iter().all(|s| s.payload.len() <= size));
                prop_assert!(segments.last().map(|s| s.is_last()).unwrap_or(false));
                for (i, s) in segments.iter().enumerate() {
                    prop_assert_eq!(s.seg_o as usize, i);
                }
            }
            Err(_) => prop_assert!((pdu.len() + size - 1) / size > MAX_SEGMENTS),
        }
    }

    #[test]
    fn reassembly_is_order_insensitive(
        (data, segments) in pdu_strategy().prop_flat_map(|data| {
            let segments = segment(&Bytes::from(data.clone()), ACCESS_SEGMENT_SIZE, 0x1FFF).unwrap();
            (Just(data), Just(segments).prop_shuffle())
        }),
    ) {
        let pdu = Bytes::from(data);

        prop_assert_eq!(reassemble(0x0001, segments.clone()).unwrap(), pdu.clone());

        let reassembler = Reassembler::default();
        let mut completed = Vec::new();
        for s in segments.iter().chain(segments.iter()) {
            if let Some(done) = reassembler.add_segment(0x0001, s.clone()).unwrap() {
                completed.push(done.payload);
            }
        }
        prop_assert_eq!(completed, vec![pdu]);
    }
}
