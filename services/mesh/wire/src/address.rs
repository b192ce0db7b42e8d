//! Mesh address classes.
//!
//! ```text
//! 0x0000          unassigned
//! 0x0001..0x7FFF  unicast
//! 0x8000..0xBFFF  virtual
//! 0xC000..0xFEFF  group
//! 0xFF00..0xFFFF  fixed group (all-proxies, all-friends, all-relays, all-nodes)
//! ```

/// Unassigned address
pub const UNASSIGNED_ADDRESS: u16 = 0x0000;
/// Lowest unicast address
pub const MIN_UNICAST_ADDRESS: u16 = 0x0001;
/// Highest unicast address
pub const MAX_UNICAST_ADDRESS: u16 = 0x7FFF;
/// Lowest virtual address
pub const MIN_VIRTUAL_ADDRESS: u16 = 0x8000;
/// Highest virtual address
pub const MAX_VIRTUAL_ADDRESS: u16 = 0xBFFF;
/// Lowest group address available for allocation
pub const MIN_GROUP_ADDRESS: u16 = 0xC000;
/// Highest group address available for allocation
pub const MAX_GROUP_ADDRESS: u16 = 0xFEFF;
/// Lowest scene number
pub const MIN_SCENE_NUMBER: u16 = 0x0001;
/// Highest scene number
pub const MAX_SCENE_NUMBER: u16 = 0xFFFF;
/// All-nodes fixed group address
pub const ALL_NODES_ADDRESS: u16 = 0xFFFF;

/// Classification of a 16-bit mesh address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressType {
    /// 0x0000
    Unassigned,
    /// Single element
    Unicast,
    /// Label-UUID hash
    Virtual,
    /// Allocatable group
    Group,
    /// Reserved fixed group
    FixedGroup,
}

impl AddressType {
    /// Classify an address
    pub fn of(address: u16) -> Self {
        match address {
            UNASSIGNED_ADDRESS => AddressType::Unassigned,
            MIN_UNICAST_ADDRESS..=MAX_UNICAST_ADDRESS => AddressType::Unicast,
            MIN_VIRTUAL_ADDRESS..=MAX_VIRTUAL_ADDRESS => AddressType::Virtual,
            MIN_GROUP_ADDRESS..=MAX_GROUP_ADDRESS => AddressType::Group,
            _ => AddressType::FixedGroup,
        }
    }
}

/// Whether `address` is a unicast address
pub fn is_valid_unicast_address(address: u16) -> bool {
    AddressType::of(address) == AddressType::Unicast
}

/// Whether `address` is an allocatable group address
pub fn is_valid_group_address(address: u16) -> bool {
    AddressType::of(address) == AddressType::Group
}

/// Whether `scene` is a valid scene number
pub fn is_valid_scene_number(scene: u16) -> bool {
    scene >= MIN_SCENE_NUMBER
}

/// Whether a network PDU may carry `address` as destination
pub fn is_valid_destination(address: u16) -> bool {
    AddressType::of(address) != AddressType::Unassigned
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_classes() {
        assert_eq!(AddressType::of(0x0000), AddressType::Unassigned);
        assert_eq!(AddressType::of(0x0001), AddressType::Unicast);
        assert_eq!(AddressType::of(0x7FFF), AddressType::Unicast);
        assert_eq!(AddressType::of(0x8000), AddressType::Virtual);
        assert_eq!(AddressType::of(0xC000), AddressType::Group);
        assert_eq!(AddressType::of(0xFEFF), AddressType::Group);
        assert_eq!(AddressType::of(0xFF00), AddressType::FixedGroup);
        assert_eq!(AddressType::of(ALL_NODES_ADDRESS), AddressType::FixedGroup);
    }

    #[test]
    fn test_validity_helpers() {
        assert!(!is_valid_unicast_address(0));
        assert!(is_valid_unicast_address(0x1234));
        assert!(!is_valid_group_address(0xFFFF));
        assert!(is_valid_scene_number(0xFFFF));
        assert!(!is_valid_scene_number(0));
        assert!(!is_valid_destination(UNASSIGNED_ADDRESS));
    }
}
