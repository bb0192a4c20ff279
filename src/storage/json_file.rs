//! JSON-file stores.
//!
//! The file holds a JSON array of records. It is read once on `init` and
//! rewritten (temporary file, then rename) on `flush` / `close` when the
//! content changed.

use super::memory::{MemoryGatewayStore, MemoryIdentityStore};
use super::{GatewayStore, IdentityStore};
use crate::core::types::{DevAddr, DevEui, DeviceIdentity, GatewayIdentity, NetId, NetworkIdentity};
use crate::error::{StorageError, StoreResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

fn load_records<T: DeserializeOwned>(path: &Path) -> StoreResult<Vec<T>> {
    if !path.exists() {
        info!(path = %path.display(), "Store file missing, starting empty");
        return Ok(Vec::new());
    }
    let text = fs::read_to_string(path)?;
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&text)
        .map_err(|e| StorageError::Serialization(format!("{}: {e}", path.display())))
}

fn save_records<T: Serialize>(path: &Path, records: &[T]) -> StoreResult<()> {
    let text = serde_json::to_string_pretty(records)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, text)?;
    fs::rename(&tmp, path)?;
    debug!(path = %path.display(), records = records.len(), "Store file written");
    Ok(())
}

/// Identity store persisted to a JSON file.
#[derive(Debug)]
pub struct JsonFileIdentityStore {
    path: PathBuf,
    inner: MemoryIdentityStore,
    dirty: AtomicBool,
}

impl JsonFileIdentityStore {
    pub fn new(path: impl Into<PathBuf>, net_id: Option<NetId>) -> Self {
        Self {
            path: path.into(),
            inner: MemoryIdentityStore::new(net_id),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IdentityStore for JsonFileIdentityStore {
    fn name(&self) -> &'static str {
        "json"
    }

    fn init(&self) -> StoreResult<()> {
        let records: Vec<NetworkIdentity> = load_records(&self.path)?;
        info!(path = %self.path.display(), records = records.len(), "Identity file loaded");
        self.inner.load(records)
    }

    fn get_by_addr(&self, addr: DevAddr) -> StoreResult<DeviceIdentity> {
        self.inner.get_by_addr(addr)
    }

    fn get_by_eui(&self, eui: DevEui) -> StoreResult<NetworkIdentity> {
        self.inner.get_by_eui(eui)
    }

    fn put(&self, addr: DevAddr, identity: &DeviceIdentity) -> StoreResult<()> {
        self.inner.put(addr, identity)?;
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    fn remove(&self, addr: DevAddr) -> StoreResult<()> {
        self.inner.remove(addr)?;
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    fn list(&self, offset: usize, limit: usize) -> StoreResult<Vec<NetworkIdentity>> {
        self.inner.list(offset, limit)
    }

    fn size(&self) -> usize {
        self.inner.size()
    }

    fn flush(&self) -> StoreResult<()> {
        if self.dirty.swap(false, Ordering::AcqRel) {
            if let Err(e) = save_records(&self.path, &self.inner.snapshot()?) {
                self.dirty.store(true, Ordering::Release);
                return Err(e);
            }
        }
        Ok(())
    }
}

/// Gateway store persisted to a JSON file.
#[derive(Debug)]
pub struct JsonFileGatewayStore {
    path: PathBuf,
    inner: MemoryGatewayStore,
    dirty: AtomicBool,
}

impl JsonFileGatewayStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            inner: MemoryGatewayStore::new(),
            dirty: AtomicBool::new(false),
        }
    }
}

impl GatewayStore for JsonFileGatewayStore {
    fn name(&self) -> &'static str {
        "json"
    }

    fn init(&self) -> StoreResult<()> {
        let gateways: Vec<GatewayIdentity> = load_records(&self.path)?;
        info!(path = %self.path.display(), gateways = gateways.len(), "Gateway file loaded");
        self.inner.load(gateways)
    }

    fn get(&self, key: &GatewayIdentity) -> StoreResult<GatewayIdentity> {
        self.inner.get(key)
    }

    fn put(&self, gateway: &GatewayIdentity) -> StoreResult<()> {
        self.inner.put(gateway)?;
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    fn remove(&self, key: &GatewayIdentity) -> StoreResult<()> {
        self.inner.remove(key)?;
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    fn list(&self, offset: usize, limit: usize) -> StoreResult<Vec<GatewayIdentity>> {
        self.inner.list(offset, limit)
    }

    fn size(&self) -> usize {
        self.inner.size()
    }

    fn flush(&self) -> StoreResult<()> {
        if self.dirty.swap(false, Ordering::AcqRel) {
            if let Err(e) = save_records(&self.path, &self.inner.snapshot()?) {
                self.dirty.store(true, Ordering::Release);
                return Err(e);
            }
        }
        Ok(())
    }
}
