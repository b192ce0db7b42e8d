//! Versioned binary snapshot of a provisioner: `[version u8] ++ CBOR`.

use crate::model::Provisioner;
use crate::StorageError;

/// Current snapshot format version
pub const SNAPSHOT_VERSION: u8 = 1;

/// Serialize a provisioner snapshot
pub fn encode_snapshot(provisioner: &Provisioner) -> Result<Vec<u8>, StorageError> {
    let mut out = vec![SNAPSHOT_VERSION];
    ciborium::ser::into_writer(provisioner, &mut out)
        .map_err(|e| StorageError::Snapshot(e.to_string()))?;
    Ok(out)
}

/// Deserialize a provisioner snapshot, rejecting unknown versions
pub fn decode_snapshot(bytes: &[u8]) -> Result<Provisioner, StorageError> {
    let (&version, body) = bytes
        .split_first()
        .ok_or_else(|| StorageError::Snapshot("empty snapshot".to_string()))?;
    if version != SNAPSHOT_VERSION {
        return Err(StorageError::Snapshot(format!(
            "unsupported snapshot version {}",
            version
        )));
    }
    ciborium::de::from_reader(body).map_err(|e| StorageError::Snapshot(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AllocatedRange, RangeKind};
    use uuid::Uuid;

    #[test]
    fn test_snapshot_preserves_provisioner() {
        let p = Provisioner::new(Uuid::new_v4(), "Snap")
            .with_address(0x0001)
            .with_range(RangeKind::Unicast, AllocatedRange::new(0x0001, 0x00FF))
            .with_range(RangeKind::Scene, AllocatedRange::new(0x0001, 0x0010));
        let bytes = encode_snapshot(&p).unwrap();
        assert_eq!(bytes[0], SNAPSHOT_VERSION);
        assert_eq!(decode_snapshot(&bytes).unwrap(), p);
    }

    #[test]
    fn test_snapshot_rejects_unknown_version() {
        let p = Provisioner::new(Uuid::new_v4(), "Snap");
        let mut bytes = encode_snapshot(&p).unwrap();
        bytes[0] = 9;
        assert!(matches!(
            decode_snapshot(&bytes),
            Err(StorageError::Snapshot(_))
        ));
        assert!(decode_snapshot(&[]).is_err());
    }
}
