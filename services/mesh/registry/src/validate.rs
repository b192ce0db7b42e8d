//! Synchronous validation of provisioner fields and ranges.

use crate::error::RegistryError;
use mesh_storage::{AllocatedRange, Provisioner, RangeKind};
use mesh_wire::address::{
    is_valid_unicast_address, MAX_GROUP_ADDRESS, MAX_SCENE_NUMBER, MAX_UNICAST_ADDRESS,
    MIN_GROUP_ADDRESS, MIN_SCENE_NUMBER, MIN_UNICAST_ADDRESS,
};

/// Bounds of the address class for `kind`
pub fn class_bounds(kind: RangeKind) -> (u16, u16) {
    match kind {
        RangeKind::Unicast => (MIN_UNICAST_ADDRESS, MAX_UNICAST_ADDRESS),
        RangeKind::Group => (MIN_GROUP_ADDRESS, MAX_GROUP_ADDRESS),
        RangeKind::Scene => (MIN_SCENE_NUMBER, MAX_SCENE_NUMBER),
    }
}

/// Reject empty or whitespace-only names
pub fn validate_name(name: &str) -> Result<(), RegistryError> {
    if name.trim().is_empty() {
        return Err(RegistryError::EmptyName);
    }
    Ok(())
}

/// TTL must be 0 or 2..=127
pub fn validate_ttl(ttl: u8) -> Result<(), RegistryError> {
    match ttl {
        0 | 2..=127 => Ok(()),
        _ => Err(RegistryError::InvalidTtl(ttl)),
    }
}

/// Check a range on its own: ordered bounds within the address class
pub fn validate_range_bounds(range: &AllocatedRange, kind: RangeKind) -> Result<(), RegistryError> {
    let invalid = |reason| RegistryError::InvalidRange {
        range: *range,
        kind,
        reason,
    };

    if range.low > range.high {
        return Err(invalid("low bound above high bound"));
    }
    let (min, max) = class_bounds(kind);
    if range.low < min || range.high > max {
        return Err(invalid("outside the address class"));
    }
    Ok(())
}

/// Check `range` against the existing ranges of the same kind
pub fn validate_against(
    existing: &[AllocatedRange],
    range: &AllocatedRange,
    kind: RangeKind,
) -> Result<(), RegistryError> {
    validate_range_bounds(range, kind)?;
    if existing.iter().any(|r| r.overlaps(range)) {
        return Err(RegistryError::InvalidRange {
            range: *range,
            kind,
            reason: "overlaps an allocated range",
        });
    }
    Ok(())
}

/// Validate every field of a provisioner record
pub fn validate_provisioner(provisioner: &Provisioner) -> Result<(), RegistryError> {
    validate_name(&provisioner.name)?;
    validate_ttl(provisioner.global_ttl)?;

    if let Some(address) = provisioner.unicast_address {
        if !is_valid_unicast_address(address) {
            return Err(RegistryError::InvalidAddress(address));
        }
    }

    for kind in [RangeKind::Unicast, RangeKind::Group, RangeKind::Scene] {
        let ranges = provisioner.ranges(kind);
        for (i, range) in ranges.iter().enumerate() {
            validate_against(&ranges[..i], range, kind)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_ttl_values() {
        assert!(validate_ttl(0).is_ok());
        assert!(matches!(validate_ttl(1), Err(RegistryError::InvalidTtl(1))));
        assert!(validate_ttl(2).is_ok());
        assert!(validate_ttl(127).is_ok());
        assert!(validate_ttl(128).is_err());
    }

    #[test]
    fn test_name() {
        assert!(validate_name("Alpha").is_ok());
        assert!(matches!(validate_name(""), Err(RegistryError::EmptyName)));
        assert!(validate_name("   ").is_err());
    }

    #[test]
    fn test_range_bounds_per_class() {
        let inverted = AllocatedRange::new(0x0200, 0x0100);
        assert!(validate_range_bounds(&inverted, RangeKind::Unicast).is_err());
        assert!(validate_range_bounds(&AllocatedRange::new(0x0001, 0x7FFF), RangeKind::Unicast).is_ok());
        assert!(validate_range_bounds(&AllocatedRange::new(0x0000, 0x0010), RangeKind::Unicast).is_err());
        assert!(validate_range_bounds(&AllocatedRange::new(0x7000, 0x8000), RangeKind::Unicast).is_err());
        assert!(validate_range_bounds(&AllocatedRange::new(0xC000, 0xFEFF), RangeKind::Group).is_ok());
        assert!(validate_range_bounds(&AllocatedRange::new(0xC000, 0xFF00), RangeKind::Group).is_err());
        assert!(validate_range_bounds(&AllocatedRange::new(0x0001, 0xFFFF), RangeKind::Scene).is_ok());
        assert!(validate_range_bounds(&AllocatedRange::new(0x0000, 0x0001), RangeKind::Scene).is_err());
    }

    #[test]
    fn test_provisioner_with_overlapping_ranges_rejected() {
        let p = Provisioner::new(Uuid::new_v4(), "Overlap")
            .with_range(RangeKind::Unicast, AllocatedRange::new(0x0001, 0x0100))
            .with_range(RangeKind::Unicast, AllocatedRange::new(0x0100, 0x0200));
        assert!(matches!(
            validate_provisioner(&p),
            Err(RegistryError::InvalidRange { .. })
        ));
    }
}
