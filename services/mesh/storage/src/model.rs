//! Plain persisted entities.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Name given to provisioners created without one
pub const DEFAULT_PROVISIONER_NAME: &str = "nRF Mesh Provisioner";

/// Default TTL for messages originated by a provisioner
pub const DEFAULT_GLOBAL_TTL: u8 = 5;

/// Closed address interval `low..=high`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AllocatedRange {
    /// Lowest address in the range
    pub low: u16,
    /// Highest address in the range
    pub high: u16,
}

impl AllocatedRange {
    /// Create a range; bounds are not validated here
    pub fn new(low: u16, high: u16) -> Self {
        Self { low, high }
    }

    /// Whether `address` lies in the range
    pub fn contains(&self, address: u16) -> bool {
        self.low <= address && address <= self.high
    }

    /// Whether two ranges share at least one address
    pub fn overlaps(&self, other: &AllocatedRange) -> bool {
        self.low <= other.high && other.low <= self.high
    }

    /// Number of addresses in the range
    pub fn len(&self) -> u32 {
        if self.high < self.low {
            0
        } else {
            (self.high - self.low) as u32 + 1
        }
    }

    /// Whether the range is inverted
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for AllocatedRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}-0x{:04X}", self.low, self.high)
    }
}

/// Address space a range belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeKind {
    /// Unicast addresses for provisioned nodes
    Unicast,
    /// Group addresses
    Group,
    /// Scene numbers
    Scene,
}

impl fmt::Display for RangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeKind::Unicast => write!(f, "unicast"),
            RangeKind::Group => write!(f, "group"),
            RangeKind::Scene => write!(f, "scene"),
        }
    }
}

/// A provisioner of a mesh network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provisioner {
    /// Provisioner identifier
    pub id: Uuid,
    /// Network this provisioner belongs to
    pub mesh_uuid: Uuid,
    /// Display name
    pub name: String,
    /// Own unicast address, if any
    pub unicast_address: Option<u16>,
    /// TTL used for originated messages
    pub global_ttl: u8,
    /// Last used 24-bit sequence number
    pub sequence_number: u32,
    /// Selected as the active provisioner
    pub last_selected: bool,
    /// Allocated unicast ranges, sorted by `low`
    pub unicast_ranges: Vec<AllocatedRange>,
    /// Allocated group ranges, sorted by `low`
    pub group_ranges: Vec<AllocatedRange>,
    /// Allocated scene ranges, sorted by `low`
    pub scene_ranges: Vec<AllocatedRange>,
}

impl Provisioner {
    /// Create a provisioner with defaults and a fresh id
    pub fn new(mesh_uuid: Uuid, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            mesh_uuid,
            name: name.into(),
            unicast_address: None,
            global_ttl: DEFAULT_GLOBAL_TTL,
            sequence_number: 0,
            last_selected: false,
            unicast_ranges: Vec::new(),
            group_ranges: Vec::new(),
            scene_ranges: Vec::new(),
        }
    }

    /// Builder-style range addition, kept sorted
    pub fn with_range(mut self, kind: RangeKind, range: AllocatedRange) -> Self {
        self.insert_range(kind, range);
        self
    }

    /// Builder-style unicast address
    pub fn with_address(mut self, address: u16) -> Self {
        self.unicast_address = Some(address);
        self
    }

    /// Ranges of `kind`
    pub fn ranges(&self, kind: RangeKind) -> &[AllocatedRange] {
        match kind {
            RangeKind::Unicast => &self.unicast_ranges,
            RangeKind::Group => &self.group_ranges,
            RangeKind::Scene => &self.scene_ranges,
        }
    }

    fn ranges_mut(&mut self, kind: RangeKind) -> &mut Vec<AllocatedRange> {
        match kind {
            RangeKind::Unicast => &mut self.unicast_ranges,
            RangeKind::Group => &mut self.group_ranges,
            RangeKind::Scene => &mut self.scene_ranges,
        }
    }

    /// Insert a range keeping the set ordered by `low`
    pub fn insert_range(&mut self, kind: RangeKind, range: AllocatedRange) {
        let ranges = self.ranges_mut(kind);
        let pos = ranges.partition_point(|r| r.low < range.low);
        ranges.insert(pos, range);
    }

    /// Remove an exact range; returns whether it was present
    pub fn remove_range(&mut self, kind: RangeKind, range: &AllocatedRange) -> bool {
        let ranges = self.ranges_mut(kind);
        let before = ranges.len();
        ranges.retain(|r| r != range);
        ranges.len() != before
    }
}

/// Element block of a provisioned node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Device UUID advertised before provisioning
    pub device_uuid: Uuid,
    /// Network the node belongs to
    pub mesh_uuid: Uuid,
    /// Provisioner that admitted the node
    pub provisioner_id: Uuid,
    /// Primary element address
    pub unicast_address: u16,
    /// Number of elements
    pub element_count: u8,
}

impl NodeRecord {
    /// Addresses occupied by the node's elements
    pub fn addresses(&self) -> AllocatedRange {
        let last = self.unicast_address as u32 + self.element_count.max(1) as u32 - 1;
        AllocatedRange::new(self.unicast_address, last.min(u16::MAX as u32) as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_overlap() {
        let a = AllocatedRange::new(0x0001, 0x00FF);
        assert!(a.overlaps(&AllocatedRange::new(0x00FF, 0x0200)));
        assert!(!a.overlaps(&AllocatedRange::new(0x0100, 0x0200)));
        assert!(a.contains(0x0001) && a.contains(0x00FF));
        assert_eq!(a.len(), 255);
        assert!(AllocatedRange::new(5, 4).is_empty());
    }

    #[test]
    fn test_ranges_stay_sorted() {
        let mut p = Provisioner::new(Uuid::new_v4(), DEFAULT_PROVISIONER_NAME);
        p.insert_range(RangeKind::Group, AllocatedRange::new(0xD000, 0xD0FF));
        p.insert_range(RangeKind::Group, AllocatedRange::new(0xC000, 0xC0FF));
        p.insert_range(RangeKind::Group, AllocatedRange::new(0xE000, 0xE0FF));
        let lows: Vec<u16> = p.ranges(RangeKind::Group).iter().map(|r| r.low).collect();
        assert_eq!(lows, vec![0xC000, 0xD000, 0xE000]);

        assert!(p.remove_range(RangeKind::Group, &AllocatedRange::new(0xD000, 0xD0FF)));
        assert!(!p.remove_range(RangeKind::Group, &AllocatedRange::new(0xD000, 0xD0FF)));
    }

    #[test]
    fn test_defaults() {
        let p = Provisioner::new(Uuid::nil(), DEFAULT_PROVISIONER_NAME);
        assert_eq!(p.global_ttl, 5);
        assert_eq!(p.sequence_number, 0);
        assert!(p.unicast_address.is_none());
    }

    #[test]
    fn test_node_addresses() {
        let node = NodeRecord {
            device_uuid: Uuid::nil(),
            mesh_uuid: Uuid::nil(),
            provisioner_id: Uuid::nil(),
            unicast_address: 0x0010,
            element_count: 3,
        };
        assert_eq!(node.addresses(), AllocatedRange::new(0x0010, 0x0012));
    }
}
