use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use answer_receiver::{
    encode_frame, JsonParser, MessageParser, Receiver, ReceiverConfig, ReceiverError,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(5);

fn config() -> ReceiverConfig {
    ReceiverConfig::default()
        .with_address("127.0.0.1", 0)
        .with_retry_delay(Duration::from_millis(100))
}

async fn start_json() -> (Receiver<JsonParser<Value>>, SocketAddr) {
    let mut receiver = Receiver::new(config(), JsonParser::new());
    receiver.start().unwrap();
    let addr = timeout(WAIT, receiver.wait_listening()).await.unwrap().unwrap();
    (receiver, addr)
}

async fn pop<P: MessageParser>(receiver: &Receiver<P>) -> P::Message {
    timeout(WAIT, receiver.pop())
        .await
        .expect("no message arrived")
        .unwrap()
}

/// Wait for the server side to drop the connection.
async fn wait_closed(client: &mut TcpStream) {
    let mut buf = [0u8; 16];
    match timeout(WAIT, client.read(&mut buf)).await.expect("connection stayed open") {
        Ok(0) | Err(_) => {}
        Ok(n) => panic!("unexpected {} bytes from receiver", n),
    }
}

/// Wait until the listener was torn down and bound again.
async fn wait_rebound<P: MessageParser>(receiver: &Receiver<P>) -> SocketAddr {
    timeout(WAIT, async {
        while receiver.local_addr().is_some() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("listener was not torn down");
    timeout(WAIT, receiver.wait_listening()).await.unwrap().unwrap()
}

/// Accepts any non-empty text verbatim.
struct TextParser;

impl MessageParser for TextParser {
    type Message = String;

    fn parse(&self, text: &str) -> Result<String, ReceiverError> {
        Ok(text.to_string())
    }
}

#[tokio::test]
async fn frame_followed_by_blank_line_yields_one_message() {
    let mut receiver = Receiver::new(config(), TextParser);
    receiver.start().unwrap();
    let addr = receiver.wait_listening().await.unwrap();

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"ANSWER 2\nhi\n\n").await.unwrap();

    assert_eq!(pop(&receiver).await, "hi");
    sleep(Duration::from_millis(50)).await;
    assert!(receiver.queue().is_empty());
    receiver.shutdown().await;
}

#[tokio::test]
async fn valid_frame_then_close_leaves_listener_ready() {
    let (mut receiver, addr) = start_json().await;

    let mut first = TcpStream::connect(addr).await.unwrap();
    first.write_all(&encode_frame(br#"{"seq": 1}"#)).await.unwrap();
    drop(first);
    assert_eq!(pop(&receiver).await, json!({"seq": 1}));

    let mut second = TcpStream::connect(addr).await.unwrap();
    second.write_all(&encode_frame(br#"{"seq": 2}"#)).await.unwrap();
    assert_eq!(pop(&receiver).await, json!({"seq": 2}));
    assert_eq!(receiver.local_addr(), Some(addr));

    receiver.shutdown().await;
}

#[tokio::test]
async fn empty_and_unparsable_payloads_are_dropped() {
    let (mut receiver, addr) = start_json().await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"ANSWER 0\n\n").await.unwrap();
    client.write_all(&encode_frame(b"   \n\t")).await.unwrap();
    client.write_all(&encode_frame(b"{broken")).await.unwrap();
    client.write_all(&encode_frame(br#"{"ok": true}"#)).await.unwrap();

    assert_eq!(pop(&receiver).await, json!({"ok": true}));
    assert!(receiver.queue().is_empty());

    // the connection survived the dropped payloads
    client.write_all(&encode_frame(b"[1]")).await.unwrap();
    assert_eq!(pop(&receiver).await, json!([1]));

    receiver.shutdown().await;
}

#[tokio::test]
async fn malformed_header_discards_connection_and_recovers() {
    let (mut receiver, addr) = start_json().await;

    let mut bad = TcpStream::connect(addr).await.unwrap();
    bad.write_all(&encode_frame(br#"{"before": 1}"#)).await.unwrap();
    assert_eq!(pop(&receiver).await, json!({"before": 1}));

    bad.write_all(b"QUESTION 2\n{}\n").await.unwrap();
    wait_closed(&mut bad).await;
    let _ = bad.write_all(&encode_frame(br#"{"lost": 1}"#)).await;

    let addr = wait_rebound(&receiver).await;
    let mut good = TcpStream::connect(addr).await.unwrap();
    good.write_all(&encode_frame(br#"{"after": 1}"#)).await.unwrap();

    assert_eq!(pop(&receiver).await, json!({"after": 1}));
    assert!(receiver.queue().is_empty());
    receiver.shutdown().await;
}

#[tokio::test]
async fn missing_end_marker_discards_connection() {
    let (mut receiver, addr) = start_json().await;

    let mut bad = TcpStream::connect(addr).await.unwrap();
    bad.write_all(b"ANSWER 2\n{}X").await.unwrap();
    wait_closed(&mut bad).await;
    assert!(receiver.queue().is_empty());

    let addr = wait_rebound(&receiver).await;
    let mut good = TcpStream::connect(addr).await.unwrap();
    good.write_all(&encode_frame(b"null")).await.unwrap();
    assert_eq!(pop(&receiver).await, Value::Null);

    receiver.shutdown().await;
}

#[tokio::test]
async fn connections_are_served_one_at_a_time() {
    let (mut receiver, addr) = start_json().await;

    let mut first = TcpStream::connect(addr).await.unwrap();
    first.write_all(&encode_frame(b"\"a\"")).await.unwrap();
    assert_eq!(pop(&receiver).await, json!("a"));

    let mut second = TcpStream::connect(addr).await.unwrap();
    second.write_all(&encode_frame(b"\"b\"")).await.unwrap();
    sleep(Duration::from_millis(100)).await;
    assert!(receiver.queue().is_empty());

    first.write_all(&encode_frame(b"\"c\"")).await.unwrap();
    drop(first);

    assert_eq!(pop(&receiver).await, json!("c"));
    assert_eq!(pop(&receiver).await, json!("b"));
    receiver.shutdown().await;
}

#[tokio::test]
async fn preserves_order_within_a_connection() {
    let (mut receiver, addr) = start_json().await;

    let mut stream = Vec::new();
    for i in 0..50 {
        stream.extend_from_slice(&encode_frame(json!({ "i": i }).to_string().as_bytes()));
        if i % 3 == 0 {
            stream.push(b'\n');
        }
    }
    let mut client = TcpStream::connect(addr).await.unwrap();
    for chunk in stream.chunks(7) {
        client.write_all(chunk).await.unwrap();
    }

    for i in 0..50 {
        assert_eq!(pop(&receiver).await, json!({ "i": i }));
    }
    receiver.shutdown().await;
}

#[derive(Debug, PartialEq, Deserialize)]
struct Proposal {
    node: u32,
    value: String,
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocking_consumer_thread_receives_messages() {
    let mut receiver = Receiver::new(config(), JsonParser::<Proposal>::new());
    receiver.start().unwrap();
    let addr = receiver.wait_listening().await.unwrap();

    let queue = Arc::clone(receiver.queue());
    let consumer = tokio::task::spawn_blocking(move || {
        (0..2).map(|_| queue.blocking_pop().unwrap()).collect::<Vec<_>>()
    });

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(&encode_frame(br#"{"node": 1, "value": "x"}"#))
        .await
        .unwrap();
    client
        .write_all(&encode_frame(br#"{"node": 2, "value": "y"}"#))
        .await
        .unwrap();

    let received = timeout(WAIT, consumer).await.unwrap().unwrap();
    assert_eq!(
        received,
        vec![
            Proposal {
                node: 1,
                value: "x".into()
            },
            Proposal {
                node: 2,
                value: "y".into()
            },
        ]
    );
    receiver.shutdown().await;
}

#[tokio::test]
async fn stop_with_idle_client_connected() {
    let (mut receiver, addr) = start_json().await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"ANSWER 10\n{\"par").await.unwrap();
    sleep(Duration::from_millis(50)).await;

    timeout(WAIT, receiver.shutdown()).await.expect("shutdown hung");
    wait_closed(&mut client).await;
    assert!(receiver.local_addr().is_none());
    assert!(receiver.queue().is_empty());
}

#[tokio::test]
async fn messages_from_successive_connections_share_one_queue() {
    let (mut receiver, addr) = start_json().await;

    for i in 0..3 {
        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(&encode_frame(json!({ "conn": i }).to_string().as_bytes()))
            .await
            .unwrap();
        client.shutdown().await.unwrap();
        wait_closed(&mut client).await;
    }

    for i in 0..3 {
        assert_eq!(pop(&receiver).await, json!({ "conn": i }));
    }
    receiver.shutdown().await;
}

#[tokio::test]
async fn bind_failure_is_retried_until_the_port_frees() {
    let holder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = holder.local_addr().unwrap().port();

    let mut receiver = Receiver::new(
        config().with_address("127.0.0.1", port),
        JsonParser::<Value>::new(),
    );
    receiver.start().unwrap();
    sleep(Duration::from_millis(250)).await;
    assert!(receiver.local_addr().is_none());

    drop(holder);
    let addr = timeout(WAIT, receiver.wait_listening()).await.unwrap().unwrap();
    assert_eq!(addr.port(), port);

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(&encode_frame(br#"{"bound": true}"#)).await.unwrap();
    assert_eq!(pop(&receiver).await, json!({"bound": true}));
    receiver.shutdown().await;
}
