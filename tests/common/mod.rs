//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use netlayer::config::{LayerConfig, TlsSettings};
use netlayer::net::{NetAddr, ReadOutcome};
use netlayer::ops::ListenKind;
use netlayer::resolver::{Resolver, StaticBackend};
use netlayer::tls::TlsContext;
use netlayer::{Handle, NetOps};

/// A layer with default config, a fixed host table instead of DNS, and no
/// trust anchors.
pub fn test_ops() -> NetOps {
    test_ops_with(LayerConfig::default(), no_roots())
}

pub fn test_ops_with(config: LayerConfig, tls: TlsContext) -> NetOps {
    let hosts = StaticBackend::new([
        ("service.test", vec!["127.0.0.1".parse::<IpAddr>().unwrap()]),
        (
            "dual.test",
            vec!["::1".parse().unwrap(), "127.0.0.1".parse().unwrap()],
        ),
    ]);
    let resolver = Resolver::with_backends(Arc::new(hosts), None, &config.resolver);
    NetOps::with_parts(config, resolver, tls)
}

pub fn no_roots() -> TlsContext {
    TlsContext::from_settings(&TlsSettings {
        use_webpki_roots: false,
        ca_file: None,
    })
    .unwrap()
}

/// Listen on an ephemeral loopback port.
pub async fn tcp_listener(ops: &NetOps) -> (Handle, SocketAddr) {
    let listener = ops
        .listen(ListenKind::Tcp, "127.0.0.1:0", None)
        .await
        .unwrap();
    let NetAddr::Inet(addr) = ops.local_addr(listener).unwrap() else {
        panic!("tcp listener without an inet address");
    };
    (listener, addr)
}

/// Client and server handles of one loopback TCP connection.
pub async fn connected_pair(ops: &NetOps) -> (Handle, Handle) {
    let (listener, addr) = tcp_listener(ops).await;
    let accept = ops.accept(listener);
    let client = ops
        .connect(netlayer::ops::ConnectTarget::Candidates(vec![
            netlayer::resolver::AddressCandidate::new(addr),
        ]))
        .await
        .unwrap();
    let (server, _) = accept.await.unwrap();
    ops.close(listener).unwrap();
    (client, server)
}

/// Write everything, resubmitting after short writes.
pub async fn write_all(ops: &NetOps, handle: Handle, mut data: &[u8]) {
    while !data.is_empty() {
        let written = ops.write(handle, data.to_vec()).await.unwrap();
        assert!(written > 0, "write made no progress");
        data = &data[written..];
    }
}

/// Read exactly `len` bytes, or panic on EOF.
pub async fn read_exact(ops: &NetOps, handle: Handle, len: usize) -> Vec<u8> {
    let mut received = Vec::with_capacity(len);
    while received.len() < len {
        match ops.read(handle, len - received.len()).await.unwrap() {
            ReadOutcome::Data(chunk) => received.extend_from_slice(&chunk),
            ReadOutcome::Eof => panic!("EOF after {} of {len} bytes", received.len()),
        }
    }
    received
}

/// Self-signed certificate for `localhost` as (certificate PEM, key PEM).
pub fn self_signed() -> (String, String) {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    (cert.pem(), key_pair.serialize_pem())
}
