// test-only module included via protocol/mod.rs
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use crate::core::message::{Request, RequestBody, Response, ResponseBody};
use crate::core::types::{DevAddr, DevEui, DeviceIdentity, GatewayIdentity, NetworkIdentity};
use crate::core::wire::{Header, Tag, OPERATION_RESPONSE_SIZE};
use crate::error::{ResultCode, StorageError, StoreResult};
use crate::protocol::dispatcher::{fit_to_capacity, Dispatcher};
use crate::storage::{GatewayStore, IdentityStore, MemoryGatewayStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const CODE: i32 = 42;
const ACCESS: u64 = 0x2A;

/// Store that fails every call and counts how often it was touched.
#[derive(Default)]
struct FailingStore {
    calls: AtomicUsize,
}

impl FailingStore {
    fn touch<T>(&self) -> StoreResult<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StorageError::Unavailable("offline".into()))
    }
}

impl IdentityStore for FailingStore {
    fn name(&self) -> &'static str {
        "failing"
    }
    fn get_by_addr(&self, _: DevAddr) -> StoreResult<DeviceIdentity> {
        self.touch()
    }
    fn get_by_eui(&self, _: DevEui) -> StoreResult<NetworkIdentity> {
        self.touch()
    }
    fn put(&self, _: DevAddr, _: &DeviceIdentity) -> StoreResult<()> {
        self.touch()
    }
    fn remove(&self, _: DevAddr) -> StoreResult<()> {
        self.touch()
    }
    fn list(&self, _: usize, _: usize) -> StoreResult<Vec<NetworkIdentity>> {
        self.touch()
    }
    fn size(&self) -> usize {
        self.calls.fetch_add(1, Ordering::SeqCst);
        0
    }
}

fn failing_dispatcher() -> (Arc<FailingStore>, Dispatcher) {
    let store = Arc::new(FailingStore::default());
    let gateways: Arc<dyn GatewayStore> = Arc::new(MemoryGatewayStore::new());
    let dispatcher = Dispatcher::new(store.clone(), gateways, CODE, ACCESS);
    (store, dispatcher)
}

fn identity(addr: u32) -> NetworkIdentity {
    let mut identity = NetworkIdentity::default();
    identity.addr = DevAddr(addr);
    identity.device.dev_eui = DevEui(0x1000 + addr as u64);
    identity
}

#[test]
fn test_wrong_credentials_never_touch_store() {
    let (store, dispatcher) = failing_dispatcher();
    for (code, access) in [(CODE + 1, ACCESS), (CODE, ACCESS + 1), (0, 0)] {
        let request = Request::eui_lookup(code, access, DevAddr(1));
        let response = dispatcher.handle(&request).expect("response");
        assert_eq!(response, Response::access_denied(Tag::EuiLookup));
    }
    assert_eq!(store.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_access_denied_wire_image() {
    let dispatcher = Dispatcher::in_memory(CODE, ACCESS);
    let request = Request::list(CODE, 7, 0, 5).to_bytes();
    let reply = dispatcher.dispatch(&request, 4096).expect("reply");
    assert_eq!(reply.len(), OPERATION_RESPONSE_SIZE);
    assert_eq!(reply[0], b'l');
    assert_eq!(&reply[1..5], &(-5i32).to_be_bytes());
    assert_eq!(&reply[5..13], &[0u8; 8]);
    assert_eq!(&reply[13..18], &[0u8; 5]);
    assert_eq!(&reply[18..22], &(-5i32 as u32).to_be_bytes());
}

#[test]
fn test_backend_failure_becomes_result_code() {
    let (_, dispatcher) = failing_dispatcher();

    let lookup = dispatcher
        .handle(&Request::addr_lookup(CODE, ACCESS, DevEui(9)))
        .expect("response");
    assert_eq!(lookup.header.code, ResultCode::Unavailable.as_i32());
    assert_eq!(lookup.header.access_code, ACCESS);
    match lookup.body {
        ResponseBody::Identity(record) => {
            assert_eq!(record.device.dev_eui, DevEui(9));
            assert_eq!(record.addr, DevAddr(0));
        }
        other => panic!("unexpected body {other:?}"),
    }

    let list = dispatcher
        .handle(&Request::list(CODE, ACCESS, 4, 10))
        .expect("response");
    assert_eq!(list.header.code, ResultCode::Unavailable.as_i32());
    assert_eq!(
        list.body,
        ResponseBody::IdentityList {
            offset: 4,
            items: vec![]
        }
    );

    let assign = dispatcher
        .handle(&Request::assign(CODE, ACCESS, identity(1)))
        .expect("response");
    assert_eq!(
        assign.body,
        ResponseBody::Operation {
            offset: 0,
            size: 0,
            result: ResultCode::Unavailable.as_i32()
        }
    );
}

#[test]
fn test_force_save_and_close_echo_paging() {
    let (store, dispatcher) = failing_dispatcher();
    for tag in [Tag::ForceSave, Tag::Close, Tag::GatewayForceSave, Tag::GatewayClose] {
        let response = dispatcher
            .handle(&Request::operation(tag, CODE, ACCESS, 11, 3))
            .expect("response");
        assert_eq!(
            response.body,
            ResponseBody::Operation {
                offset: 11,
                size: 3,
                result: 0
            }
        );
    }
    assert_eq!(store.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_mismatched_body_is_dropped() {
    let dispatcher = Dispatcher::in_memory(CODE, ACCESS);
    let request = Request {
        header: Header::new(Tag::Assign, CODE, ACCESS),
        body: RequestBody::Addr(DevAddr(1)),
    };
    assert!(dispatcher.handle(&request).is_none());
}

#[test]
fn test_truncation_keeps_prefix() {
    let items: Vec<NetworkIdentity> = (1..=10).map(identity).collect();
    let response = Response {
        header: Header::new(Tag::List, 0, ACCESS),
        body: ResponseBody::IdentityList {
            offset: 0,
            items: items.clone(),
        },
    };

    let fitted = fit_to_capacity(response.clone(), 22 + 95 * 3 + 94).expect("fits");
    assert_eq!(
        fitted.body,
        ResponseBody::IdentityList {
            offset: 0,
            items: items[..3].to_vec()
        }
    );
    assert_eq!(fitted.encoded_len(), 22 + 95 * 3);

    let empty = fit_to_capacity(response.clone(), 22).expect("header fits");
    assert_eq!(empty.encoded_len(), 22);
    assert!(fit_to_capacity(response, 21).is_none());
}

#[test]
fn test_non_list_response_is_all_or_nothing() {
    let response = Response {
        header: Header::new(Tag::GatewayAddrLookup, 0, ACCESS),
        body: ResponseBody::Gateway(GatewayIdentity::default()),
    };
    assert!(fit_to_capacity(response.clone(), 39).is_none());
    assert!(fit_to_capacity(response, 40).is_some());
}

#[test]
fn test_query_writes_into_caller_buffer() {
    let dispatcher = Dispatcher::in_memory(CODE, ACCESS);
    let request = Request::operation(Tag::Count, CODE, ACCESS, 0, 0).to_bytes();

    let mut out = [0u8; 64];
    assert_eq!(dispatcher.query(&request, &mut out), OPERATION_RESPONSE_SIZE);
    let mut tiny = [0u8; 10];
    assert_eq!(dispatcher.query(&request, &mut tiny), 0);
    assert_eq!(dispatcher.query(&request[..5], &mut out), 0);
}

#[test]
fn test_force_save_flushes_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("identity.json");
    let identities = Arc::new(crate::storage::JsonFileIdentityStore::new(&path, None));
    identities.init().unwrap();
    let dispatcher = Dispatcher::new(
        identities,
        Arc::new(MemoryGatewayStore::new()),
        CODE,
        ACCESS,
    );

    dispatcher
        .handle(&Request::assign(CODE, ACCESS, identity(3)))
        .expect("response");
    assert!(!path.exists());

    let saved = dispatcher
        .handle(&Request::operation(Tag::ForceSave, CODE, ACCESS, 0, 0))
        .expect("response");
    assert_eq!(saved.result(), 0);
    assert!(path.exists());
}
