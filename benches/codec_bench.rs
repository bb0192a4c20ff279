use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use lorawan_storage::core::message::{Request, Response, ResponseBody};
use lorawan_storage::core::types::{DevAddr, DevEui, NetworkIdentity};
use lorawan_storage::core::wire::{Header, Tag};

fn identity(addr: u32) -> NetworkIdentity {
    let mut identity = NetworkIdentity::default();
    identity.addr = DevAddr(addr);
    identity.device.dev_eui = DevEui(addr as u64);
    identity
}

#[allow(clippy::unwrap_used)]
fn bench_request_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_codec");
    let assign = Request::assign(42, 42, identity(1));
    let bytes = assign.to_bytes();
    group.throughput(Throughput::Bytes(bytes.len() as u64));

    group.bench_function("encode_assign", |b| {
        b.iter_batched(
            || assign.clone(),
            |request| request.to_bytes(),
            BatchSize::SmallInput,
        )
    });
    group.bench_function("decode_assign", |b| {
        b.iter(|| Request::decode(&bytes).unwrap())
    });
    group.bench_function("encode_into_slice", |b| {
        let mut out = [0u8; 128];
        b.iter(|| assign.encode_to_slice(&mut out).unwrap())
    });
    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_list_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("list_codec");
    for &count in &[1usize, 10, 43] {
        let response = Response {
            header: Header::new(Tag::List, 0, 42),
            body: ResponseBody::IdentityList {
                offset: 0,
                items: (0..count as u32).map(identity).collect(),
            },
        };
        let bytes = response.to_bytes();
        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_function(format!("encode_{count}"), |b| b.iter(|| response.to_bytes()));
        group.bench_function(format!("decode_{count}"), |b| {
            b.iter(|| Response::decode(&bytes).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_request_codec, bench_list_codec);
criterion_main!(benches);
