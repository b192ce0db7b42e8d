use mesh_models::{Characteristic, CharacteristicKind, CharacteristicValue, MessageCatalog};
use proptest::prelude::*;

proptest! {
    // Arbitrary parameters either decode or fail cleanly; nothing reads out of bounds
    #[test]
    fn catalog_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
        let catalog = MessageCatalog::sensor();
        let _ = catalog.decode_bytes(&bytes);
    }

    #[test]
    fn percentage8_accepts_exactly_declared_range(raw in any::<u8>()) {
        let decoded = CharacteristicKind::Percentage8.decode(&[raw]);
        match raw {
            0..=200 => prop_assert_eq!(
                decoded.unwrap(),
                Characteristic::Percentage8(CharacteristicValue::Known(raw as f32 / 2.0))
            ),
            0xFF => prop_assert_eq!(
                decoded.unwrap(),
                Characteristic::Percentage8(CharacteristicValue::Unknown)
            ),
            _ => prop_assert!(decoded.is_err()),
        }
    }
}
