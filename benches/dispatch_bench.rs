use criterion::{criterion_group, criterion_main, Criterion};
use lorawan_storage::core::message::Request;
use lorawan_storage::core::types::{DevAddr, DevEui, NetworkIdentity};
use lorawan_storage::core::wire::Tag;
use lorawan_storage::protocol::Dispatcher;

#[allow(clippy::unwrap_used)]
fn populated(records: u32) -> Dispatcher {
    let dispatcher = Dispatcher::in_memory(42, 42);
    for addr in 0..records {
        let mut identity = NetworkIdentity::default();
        identity.addr = DevAddr(addr);
        identity.device.dev_eui = DevEui(addr as u64);
        dispatcher
            .identities()
            .put(identity.addr, &identity.device)
            .unwrap();
    }
    dispatcher
}

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");
    let dispatcher = populated(10_000);
    let mut out = vec![0u8; 4096];

    let by_addr = Request::eui_lookup(42, 42, DevAddr(5_000)).to_bytes();
    group.bench_function("lookup_by_addr", |b| {
        b.iter(|| dispatcher.query(&by_addr, &mut out))
    });

    let by_eui = Request::addr_lookup(42, 42, DevEui(9_999)).to_bytes();
    group.bench_function("lookup_by_eui", |b| {
        b.iter(|| dispatcher.query(&by_eui, &mut out))
    });

    let list = Request::list(42, 42, 100, 255).to_bytes();
    group.bench_function("list_truncated", |b| {
        b.iter(|| dispatcher.query(&list, &mut out))
    });

    let denied = Request::operation(Tag::Count, 1, 1, 0, 0).to_bytes();
    group.bench_function("access_denied", |b| {
        b.iter(|| dispatcher.query(&denied, &mut out))
    });

    group.bench_function("malformed", |b| {
        b.iter(|| dispatcher.query(&by_addr[..5], &mut out))
    });
    group.finish();
}

criterion_group!(benches, bench_dispatch);
criterion_main!(benches);
