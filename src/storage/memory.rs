//! In-memory stores.

use super::{GatewayStore, IdentityStore};
use crate::core::types::{
    Activation, DevAddr, DevEui, DeviceIdentity, GatewayIdentity, NetId, NetworkIdentity,
};
use crate::error::constants::ERR_STORE_LOCK_POISONED;
use crate::error::{StorageError, StoreResult};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

fn read<T>(lock: &RwLock<T>) -> StoreResult<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| StorageError::Unavailable(ERR_STORE_LOCK_POISONED.to_string()))
}

fn write<T>(lock: &RwLock<T>) -> StoreResult<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| StorageError::Unavailable(ERR_STORE_LOCK_POISONED.to_string()))
}

/// Device identities keyed by address.
///
/// With a [`NetId`] configured, addresses outside the network's range are
/// rejected. An OTAA record may not reuse a devEUI bound to another address.
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    records: RwLock<BTreeMap<DevAddr, DeviceIdentity>>,
    net_id: Option<NetId>,
}

impl MemoryIdentityStore {
    pub fn new(net_id: Option<NetId>) -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            net_id,
        }
    }

    pub fn net_id(&self) -> Option<NetId> {
        self.net_id
    }

    /// Replace the whole content, skipping policy checks.
    pub fn load(&self, records: Vec<NetworkIdentity>) -> StoreResult<()> {
        let mut map = write(&self.records)?;
        map.clear();
        map.extend(records.into_iter().map(|r| (r.addr, r.device)));
        Ok(())
    }

    pub fn snapshot(&self) -> StoreResult<Vec<NetworkIdentity>> {
        Ok(read(&self.records)?
            .iter()
            .map(|(addr, device)| NetworkIdentity::new(*addr, device.clone()))
            .collect())
    }

    fn check_range(&self, addr: DevAddr) -> StoreResult<()> {
        match self.net_id {
            Some(net_id) if !net_id.contains(addr) => Err(StorageError::AddressOutOfRange {
                addr: addr.to_string(),
                net_id: net_id.to_string(),
            }),
            _ => Ok(()),
        }
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get_by_addr(&self, addr: DevAddr) -> StoreResult<DeviceIdentity> {
        read(&self.records)?
            .get(&addr)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    fn get_by_eui(&self, eui: DevEui) -> StoreResult<NetworkIdentity> {
        read(&self.records)?
            .iter()
            .find(|(_, device)| device.dev_eui == eui)
            .map(|(addr, device)| NetworkIdentity::new(*addr, device.clone()))
            .ok_or(StorageError::NotFound)
    }

    fn put(&self, addr: DevAddr, identity: &DeviceIdentity) -> StoreResult<()> {
        self.check_range(addr)?;
        let mut records = write(&self.records)?;
        if identity.activation == Activation::Otaa && !identity.dev_eui.is_empty() {
            let taken = records
                .iter()
                .any(|(other, device)| *other != addr && device.dev_eui == identity.dev_eui);
            if taken {
                return Err(StorageError::Duplicate(identity.dev_eui.to_string()));
            }
        }
        records.insert(addr, identity.clone());
        debug!(addr = %addr, eui = %identity.dev_eui, "Identity stored");
        Ok(())
    }

    fn remove(&self, addr: DevAddr) -> StoreResult<()> {
        write(&self.records)?
            .remove(&addr)
            .map(|_| ())
            .ok_or(StorageError::NotFound)
    }

    fn list(&self, offset: usize, limit: usize) -> StoreResult<Vec<NetworkIdentity>> {
        Ok(read(&self.records)?
            .iter()
            .skip(offset)
            .take(limit)
            .map(|(addr, device)| NetworkIdentity::new(*addr, device.clone()))
            .collect())
    }

    fn size(&self) -> usize {
        read(&self.records).map(|r| r.len()).unwrap_or(0)
    }
}

/// Gateway socket addresses keyed by gateway id.
#[derive(Debug, Default)]
pub struct MemoryGatewayStore {
    gateways: RwLock<BTreeMap<DevEui, Option<SocketAddr>>>,
}

impl MemoryGatewayStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self, gateways: Vec<GatewayIdentity>) -> StoreResult<()> {
        let mut map = write(&self.gateways)?;
        map.clear();
        map.extend(gateways.into_iter().map(|g| (g.gateway_id, g.addr)));
        Ok(())
    }

    pub fn snapshot(&self) -> StoreResult<Vec<GatewayIdentity>> {
        self.list(0, usize::MAX)
    }

    fn find_key(
        map: &BTreeMap<DevEui, Option<SocketAddr>>,
        key: &GatewayIdentity,
    ) -> Option<DevEui> {
        if !key.gateway_id.is_empty() {
            return map.contains_key(&key.gateway_id).then_some(key.gateway_id);
        }
        let wanted = key.addr?;
        map.iter()
            .find(|(_, addr)| **addr == Some(wanted))
            .map(|(id, _)| *id)
    }
}

impl GatewayStore for MemoryGatewayStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, key: &GatewayIdentity) -> StoreResult<GatewayIdentity> {
        let map = read(&self.gateways)?;
        let id = Self::find_key(&map, key).ok_or(StorageError::NotFound)?;
        let addr = map.get(&id).copied().flatten();
        Ok(GatewayIdentity::new(id, addr))
    }

    fn put(&self, gateway: &GatewayIdentity) -> StoreResult<()> {
        write(&self.gateways)?.insert(gateway.gateway_id, gateway.addr);
        debug!(gateway = %gateway.gateway_id, addr = ?gateway.addr, "Gateway stored");
        Ok(())
    }

    fn remove(&self, key: &GatewayIdentity) -> StoreResult<()> {
        let mut map = write(&self.gateways)?;
        let id = Self::find_key(&map, key).ok_or(StorageError::NotFound)?;
        map.remove(&id);
        Ok(())
    }

    fn list(&self, offset: usize, limit: usize) -> StoreResult<Vec<GatewayIdentity>> {
        Ok(read(&self.gateways)?
            .iter()
            .skip(offset)
            .take(limit)
            .map(|(id, addr)| GatewayIdentity::new(*id, *addr))
            .collect())
    }

    fn size(&self) -> usize {
        read(&self.gateways).map(|g| g.len()).unwrap_or(0)
    }
}
