//! TCP driver behaviour through the op surface.

use std::time::Duration;

use netlayer::net::{Half, NetAddr, ReadOutcome, SocketOption};
use netlayer::ops::{ConnectTarget, ListenKind};
use netlayer::resolver::AddressCandidate;
use netlayer::{ErrorKind, Handle};

mod common;

#[tokio::test]
async fn ping_round_trip() {
    let ops = common::test_ops();
    let (listener, addr) = common::tcp_listener(&ops).await;

    let accept = ops.accept(listener);
    let client = ops
        .connect(ConnectTarget::Candidates(vec![AddressCandidate::new(addr)]))
        .await
        .unwrap();
    let (server, remote) = accept.await.unwrap();
    assert_eq!(Some(remote), ops.local_addr(client).ok());

    assert_eq!(ops.write(client, b"ping".to_vec()).await.unwrap(), 4);
    assert_eq!(common::read_exact(&ops, server, 4).await, b"ping");
}

#[tokio::test]
async fn writes_complete_in_issue_order() {
    let ops = common::test_ops();
    let (client, server) = common::connected_pair(&ops).await;

    let first = ops.write(client, b"a".to_vec());
    let second = ops.write(client, b"b".to_vec());
    let third = ops.write(client, b"c".to_vec());
    let (a, b, c) = tokio::join!(third, second, first);
    assert_eq!((a.unwrap(), b.unwrap(), c.unwrap()), (1, 1, 1));

    assert_eq!(common::read_exact(&ops, server, 3).await, b"abc");
}

#[tokio::test]
async fn pending_reads_receive_data_in_issue_order() {
    let ops = common::test_ops();
    let (client, server) = common::connected_pair(&ops).await;

    let reads: Vec<_> = (0..3).map(|_| ops.read(server, 1)).collect();
    common::write_all(&ops, client, b"xyz").await;

    let mut received = Vec::new();
    for read in reads {
        received.extend(read.await.unwrap().into_bytes().unwrap());
    }
    assert_eq!(received, b"xyz");
}

#[tokio::test]
async fn cancelled_accept_leaves_listener_usable() {
    let ops = common::test_ops();
    let (listener, addr) = common::tcp_listener(&ops).await;

    let abandoned = ops.accept(listener);
    tokio::time::sleep(Duration::from_millis(20)).await;
    drop(abandoned);

    let accept = ops.accept(listener);
    let client = ops
        .connect(ConnectTarget::Candidates(vec![AddressCandidate::new(addr)]))
        .await
        .unwrap();
    let (server, _) = tokio::time::timeout(Duration::from_secs(5), accept)
        .await
        .expect("second accept never completed")
        .unwrap();

    // Only the listener and the two ends exist; nothing was leaked.
    assert_eq!(ops.table().len(), 3);
    common::write_all(&ops, server, b"ok").await;
    assert_eq!(common::read_exact(&ops, client, 2).await, b"ok");
}

#[tokio::test]
async fn accept_timeout_is_reported_and_listener_survives() {
    let ops = common::test_ops();
    let (listener, _) = common::tcp_listener(&ops).await;

    let err = ops
        .with_timeout(Duration::from_millis(30))
        .accept(listener)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(ops.local_addr(listener).is_ok());
}

#[tokio::test]
async fn close_is_idempotent_for_issued_handles() {
    let ops = common::test_ops();
    let (client, server) = common::connected_pair(&ops).await;

    ops.close(client).unwrap();
    ops.close(client).unwrap();
    assert_eq!(
        ops.read(client, 8).await.unwrap_err().kind(),
        ErrorKind::InvalidHandle
    );
    assert_eq!(
        ops.close(Handle(9_999)).unwrap_err().kind(),
        ErrorKind::InvalidHandle
    );

    // The peer observes the close.
    assert_eq!(ops.read(server, 8).await.unwrap(), ReadOutcome::Eof);
}

#[tokio::test]
async fn close_interrupts_a_pending_read() {
    let ops = common::test_ops();
    let (client, _server) = common::connected_pair(&ops).await;

    let read = ops.read(client, 16);
    tokio::time::sleep(Duration::from_millis(20)).await;
    ops.close(client).unwrap();

    let err = tokio::time::timeout(Duration::from_secs(5), read)
        .await
        .expect("read was not interrupted")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidHandle);
}

#[tokio::test]
async fn shutting_both_halves_releases_the_handle() {
    let ops = common::test_ops();
    let (client, server) = common::connected_pair(&ops).await;

    common::write_all(&ops, client, b"last").await;
    ops.shutdown(client, Half::Write).await.unwrap();
    assert_eq!(common::read_exact(&ops, server, 4).await, b"last");
    assert_eq!(ops.read(server, 4).await.unwrap(), ReadOutcome::Eof);
    assert!(ops.local_addr(client).is_ok());

    ops.shutdown(client, Half::Read).await.unwrap();
    assert_eq!(
        ops.local_addr(client).unwrap_err().kind(),
        ErrorKind::InvalidHandle
    );
    // Closing afterwards is still fine.
    ops.close(client).unwrap();
}

#[tokio::test]
async fn connect_skips_refused_candidates() {
    let ops = common::test_ops();
    let (dead_listener, dead_addr) = common::tcp_listener(&ops).await;
    ops.close(dead_listener).unwrap();
    let (listener, addr) = common::tcp_listener(&ops).await;

    let accept = ops.accept(listener);
    let client = ops
        .connect(ConnectTarget::Candidates(vec![
            AddressCandidate::new(dead_addr),
            AddressCandidate::new(addr),
        ]))
        .await
        .unwrap();
    accept.await.unwrap();
    assert_eq!(ops.peer_addr(client).unwrap(), NetAddr::Inet(addr));
}

#[tokio::test]
async fn connect_reports_the_last_failure() {
    let ops = common::test_ops();
    let (dead_listener, dead_addr) = common::tcp_listener(&ops).await;
    ops.close(dead_listener).unwrap();

    let err = ops
        .connect(ConnectTarget::Candidates(vec![AddressCandidate::new(dead_addr)]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectionRefused);
}

#[tokio::test]
async fn connect_by_hostname_resolves_first() {
    let ops = common::test_ops();
    let (listener, addr) = common::tcp_listener(&ops).await;

    let accept = ops.accept(listener);
    let client = ops
        .connect(ConnectTarget::Host {
            host: "service.test".into(),
            port: addr.port(),
            family: None,
        })
        .await
        .unwrap();
    accept.await.unwrap();
    assert_eq!(ops.peer_addr(client).unwrap(), NetAddr::Inet(addr));

    let err = ops
        .connect(ConnectTarget::Host {
            host: "missing.test".into(),
            port: addr.port(),
            family: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NameNotFound);
}

#[tokio::test]
async fn options_apply_by_resource_kind() {
    let ops = common::test_ops();
    let (client, _server) = common::connected_pair(&ops).await;

    ops.set_option(client, SocketOption::NoDelay(true)).await.unwrap();
    ops.set_option(client, SocketOption::KeepAlive(Some(Duration::from_secs(30))))
        .await
        .unwrap();
    let err = ops
        .set_option(client, SocketOption::Broadcast(true))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadResource);

    let err = ops
        .set_option_value(client, "so_linger", &serde_json::json!(5))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[tokio::test]
async fn ops_on_the_wrong_kind_are_bad_resource() {
    let ops = common::test_ops();
    let listener = ops
        .listen(ListenKind::Tcp, "127.0.0.1:0", Some(16))
        .await
        .unwrap();

    assert_eq!(
        ops.read(listener, 1).await.unwrap_err().kind(),
        ErrorKind::BadResource
    );
    assert_eq!(
        ops.peer_addr(listener).unwrap_err().kind(),
        ErrorKind::BadResource
    );
    assert_eq!(
        ops.accept(Handle(9_999)).await.unwrap_err().kind(),
        ErrorKind::InvalidHandle
    );
}

#[tokio::test]
async fn listening_twice_on_one_address_fails() {
    let ops = common::test_ops();
    let (_listener, addr) = common::tcp_listener(&ops).await;

    let mut config = netlayer::LayerConfig::default();
    config.sockets.reuse_address = false;
    let strict = common::test_ops_with(config, common::no_roots());
    let err = strict
        .listen(ListenKind::Tcp, &addr.to_string(), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AddressInUse);
}

#[tokio::test]
async fn close_all_releases_everything() {
    let ops = common::test_ops();
    let _pair = common::connected_pair(&ops).await;
    let (_listener, _) = common::tcp_listener(&ops).await;

    assert_eq!(ops.close_all(), 3);
    assert!(ops.table().is_empty());
}

#[tokio::test]
async fn unclaimed_accept_result_is_closed() {
    let ops = common::test_ops();
    let (listener, addr) = common::tcp_listener(&ops).await;

    let accept = ops.accept(listener);
    let client = ops
        .connect(ConnectTarget::Candidates(vec![AddressCandidate::new(addr)]))
        .await
        .unwrap();
    // Let the accept finish before its future is dropped.
    tokio::time::sleep(Duration::from_millis(100)).await;
    drop(accept);
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Listener and client only.
    assert_eq!(ops.table().len(), 2);
    assert_eq!(ops.read(client, 8).await.unwrap(), ReadOutcome::Eof);
}

#[tokio::test]
async fn unclaimed_connect_result_is_closed() {
    let ops = common::test_ops();
    let (listener, addr) = common::tcp_listener(&ops).await;

    let accept = ops.accept(listener);
    let connect = ops.connect(ConnectTarget::Candidates(vec![AddressCandidate::new(addr)]));
    let (server, _) = accept.await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    drop(connect);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(ops.table().len(), 2);
    assert_eq!(ops.read(server, 8).await.unwrap(), ReadOutcome::Eof);
}

#[tokio::test]
async fn shutting_down_a_finalized_connection_succeeds() {
    let ops = common::test_ops();
    let (client, _server) = common::connected_pair(&ops).await;

    ops.shutdown(client, Half::Both).await.unwrap();
    ops.shutdown(client, Half::Both).await.unwrap();
    ops.shutdown(client, Half::Write).await.unwrap();
    assert_eq!(
        ops.shutdown(Handle(9_999), Half::Both).await.unwrap_err().kind(),
        ErrorKind::InvalidHandle
    );
}

#[tokio::test]
async fn reads_are_capped_at_the_configured_limit() {
    let mut config = netlayer::LayerConfig::default();
    config.sockets.max_read_bytes = 8;
    let ops = common::test_ops_with(config, common::no_roots());
    let (client, server) = common::connected_pair(&ops).await;

    common::write_all(&ops, client, b"0123456789abcdef").await;
    // Let all sixteen bytes land.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let first = ops.read(server, 1 << 46).await.unwrap().into_bytes().unwrap();
    assert_eq!(first, b"01234567");
    assert_eq!(common::read_exact(&ops, server, 8).await, b"89abcdef");
}
