//! Subscription link behavior against a scripted publisher.

use rosty_tcpros::subscription::{Disconnect, MessageEvent};
use rosty_tcpros::{LinkSpec, Subscription, SubscriptionConfig, frame, header};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

fn fast_config() -> SubscriptionConfig {
    SubscriptionConfig {
        dial_timeout: Duration::from_secs(1),
        read_deadline: Duration::from_millis(200),
        deliver_timeout: Duration::from_millis(50),
    }
}

fn link_spec(addr: SocketAddr) -> LinkSpec {
    LinkSpec {
        uri: addr.to_string(),
        topic: "/counts".to_owned(),
        caller_id: "/listener".to_owned(),
        topic_type: "pkg/Count".to_owned(),
        md5sum: "abc123".to_owned(),
    }
}

fn pairs(entries: &[(&str, &str)]) -> Vec<(String, String)> {
    entries
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect()
}

/// Accept one subscriber, validate its header, reply with `reply_fields`.
async fn accept_and_handshake(
    listener: &TcpListener,
    reply_fields: &[(&str, &str)],
) -> TcpStream {
    let (mut stream, _) = listener.accept().await.expect("accept");
    let subscriber_header = header::read_header(&mut stream).await.expect("sub header");
    assert_eq!(subscriber_header["topic"], "/counts");
    assert_eq!(subscriber_header["callerid"], "/listener");
    header::write_header(&mut stream, &pairs(reply_fields))
        .await
        .expect("reply header");
    stream
}

fn matching_reply() -> Vec<(&'static str, &'static str)> {
    vec![
        ("md5sum", "abc123"),
        ("type", "pkg/Count"),
        ("callerid", "/talker"),
    ]
}

#[tokio::test]
async fn delivers_frames_in_order_and_substitutes_topic() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (event_tx, mut event_rx) = mpsc::channel::<MessageEvent>(16);
    let (disconnect_tx, _disconnect_rx) = mpsc::channel::<Disconnect>(4);

    let sub = Subscription::start(fast_config(), link_spec(addr), event_tx, disconnect_tx);
    // The publisher reply omits `topic`.
    let mut publisher = accept_and_handshake(&listener, &matching_reply()).await;
    frame::write_frame(&mut publisher, b"first").await.unwrap();
    frame::write_frame(&mut publisher, b"second").await.unwrap();

    let first = timeout(Duration::from_secs(2), event_rx.recv())
        .await
        .expect("first event")
        .expect("channel open");
    assert_eq!(first.bytes, b"first");
    assert_eq!(first.header["callerid"], "/talker");
    assert_eq!(first.header["topic"], "/counts", "configured topic substituted");

    let second = timeout(Duration::from_secs(2), event_rx.recv())
        .await
        .expect("second event")
        .expect("channel open");
    assert_eq!(second.bytes, b"second");

    sub.stop();
}

#[tokio::test]
async fn md5_mismatch_disconnects_without_events() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (event_tx, mut event_rx) = mpsc::channel::<MessageEvent>(16);
    let (disconnect_tx, mut disconnect_rx) = mpsc::channel::<Disconnect>(4);

    let _sub = Subscription::start(fast_config(), link_spec(addr), event_tx, disconnect_tx);
    let mut publisher = accept_and_handshake(
        &listener,
        &[
            ("md5sum", "something-else"),
            ("type", "pkg/Count"),
            ("callerid", "/talker"),
        ],
    )
    .await;

    let disconnect = timeout(Duration::from_secs(2), disconnect_rx.recv())
        .await
        .expect("disconnect event")
        .expect("channel open");
    assert!(disconnect.reason.contains("md5sum mismatch"), "{disconnect:?}");
    assert!(event_rx.try_recv().is_err(), "no message event on refusal");

    // The transport closed the TCP connection.
    let mut buf = [0u8; 1];
    let n = timeout(Duration::from_secs(2), publisher.read(&mut buf))
        .await
        .expect("read returns")
        .unwrap();
    assert_eq!(n, 0, "publisher sees EOF");
}

#[tokio::test]
async fn type_mismatch_is_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (event_tx, _event_rx) = mpsc::channel::<MessageEvent>(16);
    let (disconnect_tx, mut disconnect_rx) = mpsc::channel::<Disconnect>(4);

    let _sub = Subscription::start(fast_config(), link_spec(addr), event_tx, disconnect_tx);
    let _publisher = accept_and_handshake(
        &listener,
        &[
            ("md5sum", "abc123"),
            ("type", "pkg/Other"),
            ("callerid", "/talker"),
        ],
    )
    .await;

    let disconnect = timeout(Duration::from_secs(2), disconnect_rx.recv())
        .await
        .expect("disconnect event")
        .expect("channel open");
    assert!(disconnect.reason.contains("type mismatch"), "{disconnect:?}");
}

#[tokio::test]
async fn oversized_length_prefix_reconnects_without_disconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (event_tx, mut event_rx) = mpsc::channel::<MessageEvent>(16);
    let (disconnect_tx, mut disconnect_rx) = mpsc::channel::<Disconnect>(4);

    let sub = Subscription::start(fast_config(), link_spec(addr), event_tx, disconnect_tx);

    // First connection: one good frame, then a 2^31 length prefix.
    {
        let mut publisher = accept_and_handshake(&listener, &matching_reply()).await;
        frame::write_frame(&mut publisher, b"before").await.unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut publisher, &[0x00, 0x00, 0x00, 0x80])
            .await
            .unwrap();
    }

    let before = timeout(Duration::from_secs(2), event_rx.recv())
        .await
        .expect("event before desync")
        .expect("channel open");
    assert_eq!(before.bytes, b"before");

    // The link redials; the read loop resumes on the fresh connection.
    let mut publisher = timeout(
        Duration::from_secs(2),
        accept_and_handshake(&listener, &matching_reply()),
    )
    .await
    .expect("reconnect after desync");
    frame::write_frame(&mut publisher, b"after").await.unwrap();

    let after = timeout(Duration::from_secs(2), event_rx.recv())
        .await
        .expect("event after resync")
        .expect("channel open");
    assert_eq!(after.bytes, b"after");
    assert!(disconnect_rx.try_recv().is_err(), "resync is not a disconnect");

    sub.stop();
}

#[tokio::test]
async fn stall_after_size_prefix_reconnects() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (event_tx, _event_rx) = mpsc::channel::<MessageEvent>(16);
    let (disconnect_tx, mut disconnect_rx) = mpsc::channel::<Disconnect>(4);

    let sub = Subscription::start(fast_config(), link_spec(addr), event_tx, disconnect_tx);

    {
        let mut publisher = accept_and_handshake(&listener, &matching_reply()).await;
        // Declare ten bytes, deliver three, then stall past the deadline.
        tokio::io::AsyncWriteExt::write_all(&mut publisher, &10u32.to_le_bytes())
            .await
            .unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut publisher, b"abc")
            .await
            .unwrap();
        // Hold the socket open while the deadline elapses.
        tokio::time::sleep(Duration::from_millis(400)).await;
    }

    let _publisher = timeout(
        Duration::from_secs(2),
        accept_and_handshake(&listener, &matching_reply()),
    )
    .await
    .expect("reconnect after payload stall");
    assert!(disconnect_rx.try_recv().is_err());

    sub.stop();
}

#[tokio::test]
async fn stop_is_silent() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (event_tx, _event_rx) = mpsc::channel::<MessageEvent>(16);
    let (disconnect_tx, mut disconnect_rx) = mpsc::channel::<Disconnect>(4);

    let sub = Subscription::start(fast_config(), link_spec(addr), event_tx, disconnect_tx);
    let mut publisher = accept_and_handshake(&listener, &matching_reply()).await;

    sub.stop();

    // The subscription closes the socket without emitting a disconnect.
    let mut buf = [0u8; 1];
    let n = timeout(Duration::from_secs(2), publisher.read(&mut buf))
        .await
        .expect("read returns")
        .unwrap();
    assert_eq!(n, 0, "socket closed on stop");
    assert!(
        timeout(Duration::from_millis(300), disconnect_rx.recv())
            .await
            .is_err(),
        "no disconnect on orderly stop"
    );
}

#[tokio::test]
async fn remote_eof_is_a_disconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (event_tx, _event_rx) = mpsc::channel::<MessageEvent>(16);
    let (disconnect_tx, mut disconnect_rx) = mpsc::channel::<Disconnect>(4);

    let _sub = Subscription::start(fast_config(), link_spec(addr), event_tx, disconnect_tx);
    let publisher = accept_and_handshake(&listener, &matching_reply()).await;
    drop(publisher);

    // Whether the close lands during or after the handshake read, the
    // link reports exactly one disconnect.
    let disconnect = timeout(Duration::from_secs(2), disconnect_rx.recv())
        .await
        .expect("disconnect event")
        .expect("channel open");
    assert_eq!(disconnect.uri, addr.to_string());
}

#[tokio::test]
async fn backpressured_payloads_are_dropped() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    // Queue depth of one and nobody consuming.
    let (event_tx, mut event_rx) = mpsc::channel::<MessageEvent>(1);
    let (disconnect_tx, _disconnect_rx) = mpsc::channel::<Disconnect>(4);

    let sub = Subscription::start(fast_config(), link_spec(addr), event_tx, disconnect_tx);
    let mut publisher = accept_and_handshake(&listener, &matching_reply()).await;
    frame::write_frame(&mut publisher, b"kept").await.unwrap();
    frame::write_frame(&mut publisher, b"dropped").await.unwrap();

    // Give the link time to read both frames; the second cannot be queued.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let kept = event_rx.try_recv().expect("first payload queued");
    assert_eq!(kept.bytes, b"kept");
    assert!(event_rx.try_recv().is_err(), "second payload dropped");

    // Delivery resumes once the queue has room.
    frame::write_frame(&mut publisher, b"later").await.unwrap();
    let later = timeout(Duration::from_secs(2), event_rx.recv())
        .await
        .expect("later event")
        .expect("channel open");
    assert_eq!(later.bytes, b"later");

    sub.stop();
}
