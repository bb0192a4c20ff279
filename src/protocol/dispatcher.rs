use crate::core::message::{Request, RequestBody, Response, ResponseBody};
use crate::core::types::{DevAddr, DevEui, DeviceIdentity, GatewayIdentity, NetworkIdentity};
use crate::core::wire::{Header, Tag, WireRecord, LIST_RESPONSE_HEADER_SIZE};
use crate::error::{ResultCode, StorageError, StoreResult};
use crate::storage::{GatewayStore, IdentityStore, MemoryGatewayStore, MemoryIdentityStore};
use crate::utils::metrics::{global_metrics, Timer};
use bytes::BytesMut;
use std::sync::Arc;
use tracing::{debug, warn};

/// Request dispatcher: decode, authorize, call the store, encode.
///
/// Stateless apart from the shared stores, so one instance can be cloned into
/// every listener.
#[derive(Clone)]
pub struct Dispatcher {
    identities: Arc<dyn IdentityStore>,
    gateways: Arc<dyn GatewayStore>,
    code: i32,
    access_code: u64,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("identities", &self.identities.name())
            .field("gateways", &self.gateways.name())
            .field("code", &self.code)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(
        identities: Arc<dyn IdentityStore>,
        gateways: Arc<dyn GatewayStore>,
        code: i32,
        access_code: u64,
    ) -> Self {
        Self {
            identities,
            gateways,
            code,
            access_code,
        }
    }

    /// Dispatcher over fresh in-memory stores.
    pub fn in_memory(code: i32, access_code: u64) -> Self {
        Self::new(
            Arc::new(MemoryIdentityStore::new(None)),
            Arc::new(MemoryGatewayStore::new()),
            code,
            access_code,
        )
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn access_code(&self) -> u64 {
        self.access_code
    }

    pub fn identities(&self) -> &Arc<dyn IdentityStore> {
        &self.identities
    }

    pub fn gateways(&self) -> &Arc<dyn GatewayStore> {
        &self.gateways
    }

    pub fn is_authorized(&self, header: &Header) -> bool {
        header.code == self.code && header.access_code == self.access_code
    }

    /// Handle one raw request. `None` means no reply is sent: the request did
    /// not decode, or the reply cannot fit `capacity` bytes.
    pub fn dispatch(&self, request: &[u8], capacity: usize) -> Option<BytesMut> {
        let response = self.respond(request, capacity)?;
        let bytes = response.to_bytes();
        global_metrics().bytes_out(bytes.len() as u64);
        Some(bytes)
    }

    /// Like [`dispatch`](Self::dispatch), writing into `out`. Returns the
    /// number of bytes written, 0 for no reply.
    pub fn query(&self, request: &[u8], out: &mut [u8]) -> usize {
        let Some(response) = self.respond(request, out.len()) else {
            return 0;
        };
        match response.encode_to_slice(out) {
            Ok(written) => {
                global_metrics().bytes_out(written as u64);
                written
            }
            Err(_) => 0,
        }
    }

    fn respond(&self, request: &[u8], capacity: usize) -> Option<Response> {
        let metrics = global_metrics();
        metrics.bytes_in(request.len() as u64);

        let request = match Request::decode(request) {
            Ok(request) => request,
            Err(e) => {
                metrics.malformed();
                debug!(error = %e, len = request.len(), "Dropping malformed request");
                return None;
            }
        };
        let response = self.handle(&request)?;
        fit_to_capacity(response, capacity)
    }

    /// Authorize and execute a decoded request.
    ///
    /// `None` only for a body that does not match its tag, which the binary
    /// decoder never produces.
    pub fn handle(&self, request: &Request) -> Option<Response> {
        let _timer = Timer::start("dispatch");
        let metrics = global_metrics();
        metrics.request();

        let h = request.header;
        if !self.is_authorized(&h) {
            metrics.denied();
            debug!(tag = h.tag.name(), code = h.code, "Access denied");
            return Some(Response::access_denied(h.tag));
        }

        let response = match (h.tag, &request.body) {
            (Tag::AddrLookup, RequestBody::Eui(eui)) => {
                match self.identities.get_by_eui(*eui) {
                    Ok(identity) => lookup(h, ResultCode::Ok, identity),
                    Err(e) => lookup(h, record_error(h.tag, &e), eui_key(*eui)),
                }
            }
            (Tag::EuiLookup, RequestBody::Addr(addr)) => {
                match self.identities.get_by_addr(*addr) {
                    Ok(device) => lookup(h, ResultCode::Ok, NetworkIdentity::new(*addr, device)),
                    Err(e) => lookup(h, record_error(h.tag, &e), addr_key(*addr)),
                }
            }
            (Tag::Assign, RequestBody::Identity(identity)) => {
                mutation(h, self.identities.put(identity.addr, &identity.device))
            }
            (Tag::Remove, RequestBody::Identity(identity)) => {
                mutation(h, self.identities.remove(identity.addr))
            }
            (Tag::List, RequestBody::Operation { offset, size }) => {
                let (code, items) = listed(
                    h.tag,
                    self.identities.list(*offset as usize, *size as usize),
                );
                Response {
                    header: Header::new(h.tag, code.as_i32(), h.access_code),
                    body: ResponseBody::IdentityList {
                        offset: *offset,
                        items,
                    },
                }
            }
            (Tag::Count, RequestBody::Operation { offset, size }) => {
                Response::count(h, *offset, *size, self.identities.size())
            }
            (Tag::GatewayAddrLookup, RequestBody::Gateway(gateway)) => {
                let key = GatewayIdentity::new(gateway.gateway_id, None);
                gateway_lookup(h, &key, self.gateways.get(&key))
            }
            (Tag::GatewayIdLookup, RequestBody::Gateway(gateway)) => {
                let key = GatewayIdentity::new(DevEui(0), gateway.addr);
                gateway_lookup(h, &key, self.gateways.get(&key))
            }
            (Tag::GatewayAssign, RequestBody::Gateway(gateway)) => {
                mutation(h, self.gateways.put(gateway))
            }
            (Tag::GatewayRemove, RequestBody::Gateway(gateway)) => {
                mutation(h, self.gateways.remove(gateway))
            }
            (Tag::GatewayList, RequestBody::Operation { offset, size }) => {
                let (code, items) =
                    listed(h.tag, self.gateways.list(*offset as usize, *size as usize));
                Response {
                    header: Header::new(h.tag, code.as_i32(), h.access_code),
                    body: ResponseBody::GatewayList {
                        offset: *offset,
                        items,
                    },
                }
            }
            (Tag::GatewayCount, RequestBody::Operation { offset, size }) => {
                Response::count(h, *offset, *size, self.gateways.size())
            }
            (Tag::ForceSave, RequestBody::Operation { offset, size }) => {
                saved(h, *offset, *size, self.identities.flush())
            }
            (Tag::GatewayForceSave, RequestBody::Operation { offset, size }) => {
                saved(h, *offset, *size, self.gateways.flush())
            }
            // stores stay open for other clients; close only acknowledges
            (Tag::Close | Tag::GatewayClose, RequestBody::Operation { offset, size }) => {
                Response::operation(h, *offset, *size, ResultCode::Ok)
            }
            (tag, body) => {
                metrics.malformed();
                warn!(tag = tag.name(), ?body, "Request body does not match its tag");
                return None;
            }
        };

        debug!(
            tag = h.tag.name(),
            result = response.result(),
            "Request handled"
        );
        Some(response)
    }
}

/// Drop trailing list records until the reply fits `capacity`.
///
/// Non-list replies are all-or-nothing.
pub fn fit_to_capacity(response: Response, capacity: usize) -> Option<Response> {
    if response.encoded_len() <= capacity {
        return Some(response);
    }
    let metrics = global_metrics();
    let header = response.header;
    let fitted = match response.body {
        ResponseBody::IdentityList { offset, mut items } => {
            let keep = fit_count(capacity, NetworkIdentity::WIRE_SIZE)?;
            debug!(requested = items.len(), kept = keep, capacity, "Truncating identity list");
            items.truncate(keep);
            ResponseBody::IdentityList { offset, items }
        }
        ResponseBody::GatewayList { offset, mut items } => {
            let keep = fit_count(capacity, GatewayIdentity::WIRE_SIZE)?;
            debug!(requested = items.len(), kept = keep, capacity, "Truncating gateway list");
            items.truncate(keep);
            ResponseBody::GatewayList { offset, items }
        }
        _ => {
            metrics.response_dropped();
            debug!(tag = header.tag.name(), capacity, "Response exceeds capacity");
            return None;
        }
    };
    metrics.list_truncated();
    Some(Response {
        header,
        body: fitted,
    })
}

fn fit_count(capacity: usize, record_size: usize) -> Option<usize> {
    match capacity.checked_sub(LIST_RESPONSE_HEADER_SIZE) {
        Some(room) => Some(room / record_size),
        None => {
            global_metrics().response_dropped();
            None
        }
    }
}

fn record_error(tag: Tag, error: &StorageError) -> ResultCode {
    let code = error.code();
    match error {
        StorageError::NotFound => {
            debug!(tag = tag.name(), "Record not found");
        }
        StorageError::Duplicate(_) | StorageError::AddressOutOfRange { .. } => {
            global_metrics().backend_error();
            debug!(tag = tag.name(), error = %error, "Store rejected request");
        }
        _ => {
            global_metrics().backend_error();
            warn!(tag = tag.name(), error = %error, "Store failure");
        }
    }
    code
}

fn lookup(h: Header, code: ResultCode, identity: NetworkIdentity) -> Response {
    Response {
        header: Header::new(h.tag, code.as_i32(), h.access_code),
        body: ResponseBody::Identity(identity),
    }
}

fn gateway_lookup(
    h: Header,
    key: &GatewayIdentity,
    found: StoreResult<GatewayIdentity>,
) -> Response {
    let (code, gateway) = match found {
        Ok(gateway) => (ResultCode::Ok, gateway),
        Err(e) => (record_error(h.tag, &e), *key),
    };
    Response {
        header: Header::new(h.tag, code.as_i32(), h.access_code),
        body: ResponseBody::Gateway(gateway),
    }
}

fn mutation(h: Header, outcome: StoreResult<()>) -> Response {
    match outcome {
        Ok(()) => Response::operation(h, 0, 1, ResultCode::Ok),
        Err(e) => Response::operation(h, 0, 0, record_error(h.tag, &e)),
    }
}

fn saved(h: Header, offset: u32, size: u8, outcome: StoreResult<()>) -> Response {
    match outcome {
        Ok(()) => Response::operation(h, offset, size, ResultCode::Ok),
        Err(e) => Response::operation(h, offset, size, record_error(h.tag, &e)),
    }
}

fn listed<T>(tag: Tag, outcome: StoreResult<Vec<T>>) -> (ResultCode, Vec<T>) {
    match outcome {
        Ok(items) => (ResultCode::Ok, items),
        Err(e) => (record_error(tag, &e), Vec::new()),
    }
}

fn eui_key(eui: DevEui) -> NetworkIdentity {
    NetworkIdentity {
        addr: DevAddr::default(),
        device: DeviceIdentity {
            dev_eui: eui,
            ..DeviceIdentity::default()
        },
    }
}

fn addr_key(addr: DevAddr) -> NetworkIdentity {
    NetworkIdentity {
        addr,
        ..NetworkIdentity::default()
    }
}
