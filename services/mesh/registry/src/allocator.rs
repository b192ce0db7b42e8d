//! Provisioner registry with address, range and sequence number allocation.
//!
//! Every mutation is written to storage before the in-memory record changes,
//! so a failed save leaves the allocator exactly as it was.

use crate::error::RegistryError;
use crate::validate::{validate_against, validate_name, validate_provisioner, validate_ttl};
use dashmap::DashMap;
use mesh_storage::{AllocatedRange, NodeRecord, Provisioner, RangeKind, Storage};
use mesh_wire::address::is_valid_unicast_address;
use mesh_wire::MAX_SEQUENCE_NUMBER;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Address and key-range allocator for one mesh network
pub struct AddressKeyAllocator {
    mesh_uuid: Uuid,
    storage: Storage,
    /// Provisioner id -> record, one lock per provisioner
    provisioners: DashMap<Uuid, Arc<Mutex<Provisioner>>>,
    /// Provisioner id -> own unicast address
    provisioner_addresses: DashMap<Uuid, u16>,
    /// Device UUID -> provisioned node
    nodes: DashMap<Uuid, NodeRecord>,
    /// Device UUID -> block held for a provisioning session in flight
    reservations: DashMap<Uuid, AllocatedRange>,
    /// Held by every operation that claims unicast addresses
    address_lock: Mutex<()>,
}

impl AddressKeyAllocator {
    /// Create an empty allocator for `mesh_uuid`
    pub fn new(mesh_uuid: Uuid, storage: Storage) -> Self {
        Self {
            mesh_uuid,
            storage,
            provisioners: DashMap::new(),
            provisioner_addresses: DashMap::new(),
            nodes: DashMap::new(),
            reservations: DashMap::new(),
            address_lock: Mutex::new(()),
        }
    }

    /// Network this allocator manages
    pub fn mesh_uuid(&self) -> Uuid {
        self.mesh_uuid
    }

    /// Hydrate provisioners and nodes from storage, replacing memory state.
    ///
    /// Returns the number of provisioners loaded.
    pub async fn load_provisioners(&self) -> Result<usize, RegistryError> {
        let _addresses = self.address_lock.lock().await;
        let provisioners = self
            .storage
            .provisioners
            .list_provisioners(self.mesh_uuid)
            .await?;
        let nodes = self.storage.nodes.load_nodes(self.mesh_uuid).await?;

        self.provisioners.clear();
        self.provisioner_addresses.clear();
        self.nodes.clear();
        self.reservations.clear();

        for provisioner in provisioners {
            if let Err(e) = validate_provisioner(&provisioner) {
                warn!("Loaded provisioner {} fails validation: {}", provisioner.id, e);
            }
            if let Some(address) = provisioner.unicast_address {
                self.provisioner_addresses.insert(provisioner.id, address);
            }
            self.provisioners
                .insert(provisioner.id, Arc::new(Mutex::new(provisioner)));
        }
        for node in nodes {
            self.nodes.insert(node.device_uuid, node);
        }

        info!(
            "Loaded {} provisioners and {} nodes for mesh {}",
            self.provisioners.len(),
            self.nodes.len(),
            self.mesh_uuid
        );
        Ok(self.provisioners.len())
    }

    fn handle(&self, id: Uuid) -> Result<Arc<Mutex<Provisioner>>, RegistryError> {
        self.provisioners
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(RegistryError::UnknownProvisioner(id))
    }

    /// Apply `f` to a copy, persist it, then publish it
    async fn mutate<T, F>(&self, id: Uuid, f: F) -> Result<T, RegistryError>
    where
        F: FnOnce(&mut Provisioner) -> Result<T, RegistryError>,
    {
        let handle = self.handle(id)?;
        let mut current = handle.lock().await;
        let mut updated = current.clone();
        let out = f(&mut updated)?;
        self.storage.provisioners.save_provisioner(&updated).await?;
        *current = updated;
        Ok(out)
    }

    /// Snapshot of a provisioner
    pub async fn provisioner(&self, id: Uuid) -> Result<Provisioner, RegistryError> {
        let handle = self.handle(id)?;
        let provisioner = handle.lock().await;
        Ok(provisioner.clone())
    }

    /// Snapshots of all provisioners, ordered by name
    pub async fn provisioners(&self) -> Vec<Provisioner> {
        let handles: Vec<_> = self
            .provisioners
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        let mut list = Vec::with_capacity(handles.len());
        for handle in handles {
            list.push(handle.lock().await.clone());
        }
        list.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        list
    }

    /// Provisioned nodes, ordered by address
    pub fn nodes(&self) -> Vec<NodeRecord> {
        let mut nodes: Vec<NodeRecord> = self.nodes.iter().map(|n| n.value().clone()).collect();
        nodes.sort_by_key(|n| n.unicast_address);
        nodes
    }

    /// First address of `block` held by a node, a reservation or another
    /// provisioner
    fn occupied_by(
        &self,
        block: &AllocatedRange,
        exclude_provisioner: Option<Uuid>,
        exclude_device: Option<Uuid>,
    ) -> Option<u16> {
        for entry in self.provisioner_addresses.iter() {
            if Some(*entry.key()) != exclude_provisioner && block.contains(*entry.value()) {
                return Some(*entry.value());
            }
        }
        let nodes = self.nodes.iter().map(|n| (*n.key(), n.value().addresses()));
        let reserved = self.reservations.iter().map(|r| (*r.key(), *r.value()));
        for (device, taken) in nodes.chain(reserved) {
            if Some(device) != exclude_device && taken.overlaps(block) {
                return Some(taken.low.max(block.low));
            }
        }
        None
    }

    fn find_free_block(&self, provisioner: &Provisioner, element_count: u8) -> Option<u16> {
        let count = element_count as u32;
        for range in provisioner.ranges(RangeKind::Unicast) {
            let mut candidate = range.low as u32;
            while candidate + count - 1 <= range.high as u32 {
                let block = AllocatedRange::new(candidate as u16, (candidate + count - 1) as u16);
                match self.occupied_by(&block, None, None) {
                    None => return Some(candidate as u16),
                    Some(taken) => candidate = taken as u32 + 1,
                }
            }
        }
        None
    }

    /// Add a validated provisioner
    pub async fn add_provisioner(&self, provisioner: Provisioner) -> Result<(), RegistryError> {
        if provisioner.mesh_uuid != self.mesh_uuid {
            return Err(RegistryError::WrongMesh(provisioner.mesh_uuid));
        }
        validate_provisioner(&provisioner)?;

        let _addresses = self.address_lock.lock().await;
        if self.provisioners.contains_key(&provisioner.id) {
            return Err(RegistryError::ProvisionerExists(provisioner.id));
        }
        if let Some(address) = provisioner.unicast_address {
            let block = AllocatedRange::new(address, address);
            if self.occupied_by(&block, None, None).is_some() {
                return Err(RegistryError::AddressInUse(address));
            }
        }

        self.storage.provisioners.save_provisioner(&provisioner).await?;
        info!(
            "Added provisioner {} '{}' address={:?}",
            provisioner.id, provisioner.name, provisioner.unicast_address
        );
        if let Some(address) = provisioner.unicast_address {
            self.provisioner_addresses.insert(provisioner.id, address);
        }
        self.provisioners
            .insert(provisioner.id, Arc::new(Mutex::new(provisioner)));
        Ok(())
    }

    /// Remove a provisioner and release its address
    pub async fn remove_provisioner(&self, id: Uuid) -> Result<(), RegistryError> {
        let _addresses = self.address_lock.lock().await;
        let handle = self.handle(id)?;
        let _record = handle.lock().await;

        self.storage.provisioners.delete_provisioner(id).await?;
        self.provisioners.remove(&id);
        self.provisioner_addresses.remove(&id);
        info!("Removed provisioner {}", id);
        Ok(())
    }

    /// Rename a provisioner
    pub async fn rename(&self, id: Uuid, name: &str) -> Result<(), RegistryError> {
        validate_name(name)?;
        self.mutate(id, |p| {
            p.name = name.to_string();
            Ok(())
        })
        .await
    }

    /// Change the global TTL
    pub async fn set_ttl(&self, id: Uuid, ttl: u8) -> Result<(), RegistryError> {
        validate_ttl(ttl)?;
        self.mutate(id, |p| {
            p.global_ttl = ttl;
            Ok(())
        })
        .await
    }

    /// Mark one provisioner as last selected, clearing the flag on the others
    pub async fn select_provisioner(&self, id: Uuid) -> Result<(), RegistryError> {
        self.handle(id)?;
        let ids: Vec<Uuid> = self.provisioners.iter().map(|e| *e.key()).collect();
        for other in ids {
            self.mutate(other, |p| {
                p.last_selected = p.id == id;
                Ok(())
            })
            .await?;
        }
        Ok(())
    }

    /// Set or clear the provisioner's own unicast address
    pub async fn set_provisioner_address(
        &self,
        id: Uuid,
        address: Option<u16>,
    ) -> Result<(), RegistryError> {
        if let Some(address) = address {
            if !is_valid_unicast_address(address) {
                return Err(RegistryError::InvalidAddress(address));
            }
        }

        let _addresses = self.address_lock.lock().await;
        if let Some(address) = address {
            if self
                .occupied_by(&AllocatedRange::new(address, address), Some(id), None)
                .is_some()
            {
                return Err(RegistryError::AddressInUse(address));
            }
        }

        self.mutate(id, |p| {
            p.unicast_address = address;
            Ok(())
        })
        .await?;

        match address {
            Some(address) => self.provisioner_addresses.insert(id, address),
            None => self.provisioner_addresses.remove(&id).map(|(_, a)| a),
        };
        debug!("Provisioner {} address set to {:?}", id, address);
        Ok(())
    }

    /// Check whether `range` could be allocated to the provisioner
    pub async fn validate_range(
        &self,
        id: Uuid,
        range: AllocatedRange,
        kind: RangeKind,
    ) -> Result<(), RegistryError> {
        let provisioner = self.provisioner(id).await?;
        validate_against(provisioner.ranges(kind), &range, kind)
    }

    /// Allocate a range to the provisioner
    pub async fn allocate_range(
        &self,
        id: Uuid,
        range: AllocatedRange,
        kind: RangeKind,
    ) -> Result<(), RegistryError> {
        self.mutate(id, |p| {
            validate_against(p.ranges(kind), &range, kind)?;
            p.insert_range(kind, range);
            Ok(())
        })
        .await?;
        info!("Allocated {} range {} to {}", kind, range, id);
        Ok(())
    }

    /// Release a previously allocated range
    pub async fn remove_range(
        &self,
        id: Uuid,
        range: AllocatedRange,
        kind: RangeKind,
    ) -> Result<(), RegistryError> {
        self.mutate(id, |p| {
            if p.remove_range(kind, &range) {
                Ok(())
            } else {
                Err(RegistryError::InvalidRange {
                    range,
                    kind,
                    reason: "not allocated to this provisioner",
                })
            }
        })
        .await
    }

    /// Accept `candidate` as a node address if it lies in one of the
    /// provisioner's unicast ranges and is free
    pub async fn assign_address(&self, id: Uuid, candidate: u16) -> Result<u16, RegistryError> {
        let provisioner = self.provisioner(id).await?;
        if !is_valid_unicast_address(candidate)
            || !provisioner
                .ranges(RangeKind::Unicast)
                .iter()
                .any(|r| r.contains(candidate))
        {
            return Err(RegistryError::InvalidAddress(candidate));
        }
        let block = AllocatedRange::new(candidate, candidate);
        if let Some(taken) = self.occupied_by(&block, None, None) {
            return Err(RegistryError::AddressInUse(taken));
        }
        Ok(candidate)
    }

    /// Lowest free block of `element_count` consecutive addresses inside one
    /// of the provisioner's unicast ranges
    pub async fn next_available_address(
        &self,
        id: Uuid,
        element_count: u8,
    ) -> Result<u16, RegistryError> {
        if element_count == 0 {
            return Err(RegistryError::NoAddressAvailable { element_count });
        }
        let provisioner = self.provisioner(id).await?;
        self.find_free_block(&provisioner, element_count)
            .ok_or(RegistryError::NoAddressAvailable { element_count })
    }

    /// Pick the next free block and hold it for `device_uuid` until the node
    /// is committed or the reservation is released
    pub async fn reserve_address(
        &self,
        id: Uuid,
        element_count: u8,
        device_uuid: Uuid,
    ) -> Result<u16, RegistryError> {
        if element_count == 0 {
            return Err(RegistryError::NoAddressAvailable { element_count });
        }
        let provisioner = self.provisioner(id).await?;

        let _addresses = self.address_lock.lock().await;
        self.reservations.remove(&device_uuid);
        let address = self
            .find_free_block(&provisioner, element_count)
            .ok_or(RegistryError::NoAddressAvailable { element_count })?;
        let block = AllocatedRange::new(address, address + element_count as u16 - 1);
        self.reservations.insert(device_uuid, block);
        debug!("Reserved {} for device {}", block, device_uuid);
        Ok(address)
    }

    /// Drop the reservation held for `device_uuid`, if any
    pub fn release_reservation(&self, device_uuid: Uuid) -> bool {
        self.reservations.remove(&device_uuid).is_some()
    }

    /// Record a provisioned node's element block
    pub async fn commit_node_address(
        &self,
        id: Uuid,
        address: u16,
        element_count: u8,
        device_uuid: Uuid,
    ) -> Result<NodeRecord, RegistryError> {
        let provisioner = self.provisioner(id).await?;
        let node = NodeRecord {
            device_uuid,
            mesh_uuid: self.mesh_uuid,
            provisioner_id: id,
            unicast_address: address,
            element_count,
        };
        let block = node.addresses();

        if element_count == 0
            || !is_valid_unicast_address(block.low)
            || !is_valid_unicast_address(block.high)
            || block.len() != element_count as u32
            || !provisioner
                .ranges(RangeKind::Unicast)
                .iter()
                .any(|r| r.contains(block.low) && r.contains(block.high))
        {
            return Err(RegistryError::InvalidAddress(address));
        }

        let _addresses = self.address_lock.lock().await;
        if let Some(taken) = self.occupied_by(&block, None, Some(device_uuid)) {
            return Err(RegistryError::AddressInUse(taken));
        }

        self.storage.nodes.save_node(&node).await?;
        self.nodes.insert(device_uuid, node.clone());
        self.reservations.remove(&device_uuid);
        info!(
            "Committed node {} at {} ({} elements)",
            device_uuid, block, element_count
        );
        Ok(node)
    }

    /// Forget a provisioned node and free its addresses
    pub async fn remove_node(&self, device_uuid: Uuid) -> Result<(), RegistryError> {
        let _addresses = self.address_lock.lock().await;
        if !self.nodes.contains_key(&device_uuid) {
            return Err(RegistryError::UnknownNode(device_uuid));
        }
        self.storage
            .nodes
            .delete_node(self.mesh_uuid, device_uuid)
            .await?;
        self.nodes.remove(&device_uuid);
        Ok(())
    }

    /// Increment and return the provisioner's sequence number.
    ///
    /// Calls for one provisioner are strictly ordered; the value never wraps.
    pub async fn next_sequence_number(&self, id: Uuid) -> Result<u32, RegistryError> {
        self.mutate(id, |p| {
            if p.sequence_number >= MAX_SEQUENCE_NUMBER {
                return Err(RegistryError::SequenceExhausted(p.id));
            }
            p.sequence_number += 1;
            Ok(p.sequence_number)
        })
        .await
    }
}

impl std::fmt::Debug for AddressKeyAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressKeyAllocator")
            .field("mesh_uuid", &self.mesh_uuid)
            .field("provisioners", &self.provisioners.len())
            .field("nodes", &self.nodes.len())
            .finish()
    }
}
