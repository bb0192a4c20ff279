//! Listener tests over real loop-back sockets

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use lorawan_storage::config::{DirectoryConfig, ListenerMode};
use lorawan_storage::core::message::{Request, Response, ResponseBody};
use lorawan_storage::core::types::{DevAddr, DevEui, GatewayIdentity, NetworkIdentity};
use lorawan_storage::core::wire::{Tag, OPERATION_RESPONSE_SIZE};
use lorawan_storage::error::ProtocolError;
use lorawan_storage::protocol::Dispatcher;
use lorawan_storage::service::{DirectoryService, QueryClient};
use lorawan_storage::transport::{BlockingTcpListener, BlockingUdpListener, EventLoopListener};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;

const CODE: i32 = 42;
const ACCESS: u64 = 42;
const POLL: Duration = Duration::from_millis(20);

fn local() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

fn identity(addr: u32) -> NetworkIdentity {
    let mut identity = NetworkIdentity::default();
    identity.addr = DevAddr(addr);
    identity.device.dev_eui = DevEui(0xD000 + addr as u64);
    identity
}

/// A port free for both UDP and TCP at the time of the call.
fn free_port() -> u16 {
    let udp = UdpSocket::bind(local()).unwrap();
    let port = udp.local_addr().unwrap().port();
    let _tcp = std::net::TcpListener::bind(("127.0.0.1", port)).unwrap();
    port
}

#[test]
fn test_blocking_udp_end_to_end() {
    let listener = BlockingUdpListener::bind(local(), Dispatcher::in_memory(CODE, ACCESS), 4096, POLL)
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let stop = listener.shutdown_handle();
    let thread = listener.spawn().unwrap();

    let client = QueryClient::connect(addr, CODE, ACCESS).unwrap();
    client.assign(&identity(1)).unwrap();
    client.assign(&identity(2)).unwrap();
    assert_eq!(client.count().unwrap(), 2);
    assert_eq!(client.get_by_addr(DevAddr(2)).unwrap(), identity(2));
    assert_eq!(client.get_by_eui(DevEui(0xD001)).unwrap().addr, DevAddr(1));
    assert_eq!(client.list(0, 10).unwrap().len(), 2);
    assert!(matches!(
        client.remove(DevAddr(3)),
        Err(ProtocolError::Rejected(-2))
    ));

    let gateway = GatewayIdentity::new(DevEui(7), Some("10.0.0.7:1700".parse().unwrap()));
    client.assign_gateway(gateway).unwrap();
    assert_eq!(client.gateway_addr(DevEui(7)).unwrap(), gateway);
    assert_eq!(client.count_gateways().unwrap(), 1);

    stop.shutdown();
    thread.join().unwrap().unwrap();
    assert!(stop.is_shutdown());
}

#[test]
fn test_blocking_udp_ignores_short_datagram() {
    let listener = BlockingUdpListener::bind(local(), Dispatcher::in_memory(CODE, ACCESS), 4096, POLL)
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let stop = listener.shutdown_handle();
    let thread = listener.spawn().unwrap();

    let socket = UdpSocket::bind(local()).unwrap();
    socket.set_read_timeout(Some(Duration::from_millis(300))).unwrap();
    socket.send_to(b"a\0\0\0\x2a", addr).unwrap();
    let mut buf = [0u8; 128];
    assert!(socket.recv_from(&mut buf).is_err());

    // the listener is still serving
    let count = Request::operation(Tag::Count, CODE, ACCESS, 0, 0).to_bytes();
    socket.send_to(&count, addr).unwrap();
    let (len, _) = socket.recv_from(&mut buf).unwrap();
    assert_eq!(len, OPERATION_RESPONSE_SIZE);

    stop.shutdown();
    thread.join().unwrap().unwrap();
}

#[test]
fn test_client_times_out_without_server() {
    let silent = UdpSocket::bind(local()).unwrap();
    let client = QueryClient::connect(silent.local_addr().unwrap(), CODE, ACCESS)
        .unwrap()
        .with_timeout(Duration::from_millis(100))
        .unwrap();
    assert!(matches!(client.count(), Err(ProtocolError::Timeout)));
}

#[test]
fn test_blocking_tcp_serves_sequential_requests() {
    let listener = BlockingTcpListener::bind(local(), Dispatcher::in_memory(CODE, ACCESS), 4096, POLL)
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let stop = listener.shutdown_handle();
    let thread = listener.spawn().unwrap();

    let mut stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let mut buf = [0u8; 512];

    stream
        .write_all(&Request::assign(CODE, ACCESS, identity(4)).to_bytes())
        .unwrap();
    let len = stream.read(&mut buf).unwrap();
    let reply = Response::decode(&buf[..len]).unwrap();
    assert!(matches!(reply.body, ResponseBody::Operation { result: 0, .. }));

    stream
        .write_all(&Request::eui_lookup(CODE, ACCESS, DevAddr(4)).to_bytes())
        .unwrap();
    let len = stream.read(&mut buf).unwrap();
    let reply = Response::decode(&buf[..len]).unwrap();
    assert_eq!(reply.body, ResponseBody::Identity(identity(4)));
    drop(stream);

    stop.shutdown();
    thread.join().unwrap().unwrap();
}

#[tokio::test]
async fn test_event_loop_udp_and_tcp_share_store() {
    let listener = EventLoopListener::bind(local(), true, Dispatcher::in_memory(CODE, ACCESS), 4096)
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::channel(1);

    let client = async move {
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(&Request::assign(CODE, ACCESS, identity(9)).to_bytes())
            .await
            .unwrap();
        let mut buf = [0u8; 512];
        let len = stream.read(&mut buf).await.unwrap();
        assert_eq!(len, OPERATION_RESPONSE_SIZE);

        // a short request gets no reply; the connection stays usable
        stream.write_all(b"i\0\0").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let udp = tokio::net::UdpSocket::bind(local()).await.unwrap();
        udp.send_to(&Request::eui_lookup(CODE, ACCESS, DevAddr(9)).to_bytes(), addr)
            .await
            .unwrap();
        let (len, _) = tokio::time::timeout(Duration::from_secs(5), udp.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let reply = Response::decode(&buf[..len]).unwrap();

        stream
            .write_all(&Request::operation(Tag::Count, CODE, ACCESS, 0, 0).to_bytes())
            .await
            .unwrap();
        let count_len = stream.read(&mut buf).await.unwrap();
        let count = Response::decode(&buf[..count_len]).unwrap();

        tx.send(()).await.unwrap();
        (reply, count)
    };

    let (served, (reply, count)) = tokio::join!(listener.serve(rx), client);
    served.unwrap();
    assert_eq!(reply.body, ResponseBody::Identity(identity(9)));
    assert!(matches!(count.body, ResponseBody::Operation { result: 1, .. }));
}

#[tokio::test]
async fn test_service_blocking_mode_lifecycle() {
    let port = free_port();
    let config = DirectoryConfig::default_with_overrides(|c| {
        c.server.address = format!("127.0.0.1:{port}");
        c.server.mode = ListenerMode::Blocking;
        c.server.poll_interval = POLL;
    });
    let service = DirectoryService::open(config).unwrap();
    let (tx, rx) = mpsc::channel(1);

    let server: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    let client = tokio::task::spawn_blocking(move || {
        let client = QueryClient::connect(server, CODE, ACCESS).unwrap();
        let mut count = Err(ProtocolError::Timeout);
        for _ in 0..20 {
            count = client.count();
            if count.is_ok() {
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        client.assign(&identity(3)).unwrap();
        count.unwrap()
    });

    let stopper = async move {
        let result = client.await.unwrap();
        tx.send(()).await.unwrap();
        result
    };

    let (served, count) = tokio::join!(service.serve(rx), stopper);
    served.unwrap();
    assert_eq!(count, 0);
    assert_eq!(service.dispatcher().identities().size(), 1);
    service.close().unwrap();
}
