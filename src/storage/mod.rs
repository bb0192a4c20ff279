//! # Persistence Port
//!
//! Store traits the dispatcher talks to, plus the backends shipped with the
//! service.
//!
//! Every method takes `&self` and is atomic with respect to other calls on
//! the same store; implementations lock internally so one store can be shared
//! by several listeners. Errors are [`StorageError`]s, which the dispatcher
//! turns into result codes.
//!
//! ## Backends
//! - [`memory`]: `RwLock<BTreeMap>` keyed by address / gateway id.
//! - [`json_file`]: memory backend loaded from a JSON file on `init` and
//!   rewritten on `flush` / `close`.

pub mod json_file;
pub mod memory;

use crate::config::{StorageBackend, StorageConfig};
use crate::core::types::{DevAddr, DevEui, DeviceIdentity, GatewayIdentity, NetworkIdentity};
use crate::error::StoreResult;
use std::sync::Arc;
use tracing::info;

pub use json_file::{JsonFileGatewayStore, JsonFileIdentityStore};
pub use memory::{MemoryGatewayStore, MemoryIdentityStore};

/// Device identity persistence.
pub trait IdentityStore: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    fn init(&self) -> StoreResult<()> {
        Ok(())
    }

    fn get_by_addr(&self, addr: DevAddr) -> StoreResult<DeviceIdentity>;

    /// Lowest address bound to `eui`.
    fn get_by_eui(&self, eui: DevEui) -> StoreResult<NetworkIdentity>;

    /// Insert or replace.
    fn put(&self, addr: DevAddr, identity: &DeviceIdentity) -> StoreResult<()>;

    /// `NotFound` if absent.
    fn remove(&self, addr: DevAddr) -> StoreResult<()>;

    /// Up to `limit` records starting at `offset`, ascending address order.
    fn list(&self, offset: usize, limit: usize) -> StoreResult<Vec<NetworkIdentity>>;

    fn size(&self) -> usize;

    fn flush(&self) -> StoreResult<()> {
        Ok(())
    }

    fn close(&self) -> StoreResult<()> {
        self.flush()
    }
}

/// Gateway address persistence.
///
/// Lookup, removal and replacement key on the gateway id when it is non-zero
/// and on the socket address otherwise.
pub trait GatewayStore: Send + Sync {
    fn name(&self) -> &'static str;

    fn init(&self) -> StoreResult<()> {
        Ok(())
    }

    fn get(&self, key: &GatewayIdentity) -> StoreResult<GatewayIdentity>;

    fn put(&self, gateway: &GatewayIdentity) -> StoreResult<()>;

    fn remove(&self, key: &GatewayIdentity) -> StoreResult<()>;

    /// Ascending gateway id order.
    fn list(&self, offset: usize, limit: usize) -> StoreResult<Vec<GatewayIdentity>>;

    fn size(&self) -> usize;

    fn flush(&self) -> StoreResult<()> {
        Ok(())
    }

    fn close(&self) -> StoreResult<()> {
        self.flush()
    }
}

/// Build the identity store selected by `config`. The store is not initialized.
pub fn open_identity_store(config: &StorageConfig) -> Arc<dyn IdentityStore> {
    let store: Arc<dyn IdentityStore> = match config.backend {
        StorageBackend::Memory => Arc::new(MemoryIdentityStore::new(config.net_id)),
        StorageBackend::Json => Arc::new(JsonFileIdentityStore::new(
            config.identity_path.clone(),
            config.net_id,
        )),
    };
    info!(backend = store.name(), net_id = ?config.net_id, "Identity store selected");
    store
}

/// Build the gateway store selected by `config`. The store is not initialized.
pub fn open_gateway_store(config: &StorageConfig) -> Arc<dyn GatewayStore> {
    let store: Arc<dyn GatewayStore> = match config.backend {
        StorageBackend::Memory => Arc::new(MemoryGatewayStore::new()),
        StorageBackend::Json => {
            Arc::new(JsonFileGatewayStore::new(config.gateway_path.clone()))
        }
    };
    info!(backend = store.name(), "Gateway store selected");
    store
}
