//! Integration tests against an in-process fake gateway.
//!
//! Each test binds a local TCP listener, lets `FeedConnection` connect and
//! handshake, then scripts the gateway side of the conversation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use barfeed_connector_lib::{
    event_queue, Bar, BarRouter, ConnectionHealth, ConnectionState, FeedConnection, FeedError,
    FeedListener, LogNotifier, MemoryBarStore, WatchRequest,
};
use barfeed_metadata::{GatewayConfig, IntervalType};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

async fn bind_gateway() -> (TcpListener, GatewayConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = GatewayConfig {
        host: "127.0.0.1".to_string(),
        port: listener.local_addr().unwrap().port(),
        read_timeout_secs: 1,
        join_timeout_secs: 5,
        ..GatewayConfig::default()
    };
    (listener, config)
}

/// Accept one client and read its three handshake lines
async fn accept_handshake(listener: &TcpListener) -> (BufReader<TcpStream>, Vec<String>) {
    let (socket, _) = listener.accept().await.unwrap();
    let mut gateway = BufReader::new(socket);
    let mut lines = Vec::new();
    for _ in 0..3 {
        lines.push(read_line(&mut gateway).await);
    }
    (gateway, lines)
}

async fn read_line(gateway: &mut BufReader<TcpStream>) -> String {
    let mut line = String::new();
    timeout(WAIT, gateway.read_line(&mut line))
        .await
        .expect("client sent nothing")
        .unwrap();
    line
}

async fn send(gateway: &mut BufReader<TcpStream>, lines: &str) {
    gateway.get_mut().write_all(lines.as_bytes()).await.unwrap();
}

async fn connect(
    conn: &mut FeedConnection,
    listener: &TcpListener,
) -> BufReader<TcpStream> {
    let (connected, (gateway, _)) = tokio::join!(conn.connect(), accept_handshake(listener));
    connected.unwrap();
    gateway
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[derive(Default)]
struct LiveBarCounter {
    live: AtomicUsize,
}

impl FeedListener for LiveBarCounter {
    fn process_live_bar(&self, _bar: &Bar) {
        self.live.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_handshake_sent_in_order() {
    let (listener, config) = bind_gateway().await;
    let mut conn = FeedConnection::new("bars", config);

    let (connected, (_gateway, lines)) =
        tokio::join!(conn.connect(), accept_handshake(&listener));
    connected.unwrap();

    assert_eq!(
        lines,
        vec![
            "S,SET PROTOCOL,6.0\r\n",
            "S,SET CLIENT NAME,BarFeed\r\n",
            "S,CONNECT\r\n",
        ]
    );
    assert!(conn.reader_running());
    assert_eq!(conn.state(), ConnectionState::Running);
    assert!(matches!(conn.connect().await, Err(FeedError::AlreadyConnected(_))));

    conn.disconnect().await.unwrap();
    assert_eq!(conn.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_live_bar_flows_to_store() {
    let (listener, config) = bind_gateway().await;
    let store = Arc::new(MemoryBarStore::with_tables(["SPY"]));
    let (tx, rx) = event_queue(16);
    let mut router = BarRouter::new(
        "bars",
        store.clone(),
        Arc::new(LogNotifier::new("bars")),
        ["SPY".to_string()],
    )
    .start_listening(rx, WAIT);

    let counter = Arc::new(LiveBarCounter::default());
    let mut conn = FeedConnection::new("bars", config).with_queue(tx);
    conn.add_listener(counter.clone());
    let mut gateway = connect(&mut conn, &listener).await;

    send(
        &mut gateway,
        "S,CURRENT PROTOCOL,6.0\r\n\
         S,SERVER CONNECTED\r\n\
         BC,B,SPY,20230101 093100,100.0,101.0,99.5,100.5,5000,500,12\r\n",
    )
    .await;

    wait_until(|| store.total_rows() == 1).await;
    assert_eq!(counter.live.load(Ordering::SeqCst), 1);
    assert_eq!(conn.health(), ConnectionHealth::Connected);
    assert!(conn.connected());

    let rows = store.rows("spy");
    assert_eq!(rows[0].symbol, "SPY");
    assert_eq!(rows[0].close.to_string(), "100.5");
    assert_eq!(rows[0].period_volume, 500);

    conn.disconnect().await.unwrap();
    assert_eq!(conn.health(), ConnectionHealth::Disconnected);
    let stats = router.stop_listening().await.unwrap();
    assert_eq!(stats.bars_stored, 1);
}

#[tokio::test]
async fn test_bar_split_across_packets() {
    let (listener, config) = bind_gateway().await;
    let counter = Arc::new(LiveBarCounter::default());
    let mut conn = FeedConnection::new("bars", config);
    conn.add_listener(counter.clone());
    let mut gateway = connect(&mut conn, &listener).await;

    send(&mut gateway, "BC,B,SPY,20230101 0931").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(counter.live.load(Ordering::SeqCst), 0);

    send(&mut gateway, "00,100.0,101.0,99.5,100.5,5000,500,12\r\n").await;
    wait_until(|| counter.live.load(Ordering::SeqCst) == 1).await;

    conn.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_protocol_mismatch_closes_connection() {
    let (listener, config) = bind_gateway().await;
    let mut conn = FeedConnection::new("bars", config);
    let mut gateway = connect(&mut conn, &listener).await;

    send(&mut gateway, "S,SERVER CONNECTED\r\nS,CURRENT PROTOCOL,5.0\r\n").await;

    let err = timeout(WAIT, conn.closed()).await.unwrap().unwrap_err();
    assert_eq!(
        err.to_string(),
        "desired protocol 6.0, server says protocol 5.0 in bars"
    );
    assert!(!conn.reader_running());
    assert_eq!(conn.health(), ConnectionHealth::Disconnected);
}

#[tokio::test]
async fn test_unknown_record_desynchronizes() {
    let (listener, config) = bind_gateway().await;
    let mut conn = FeedConnection::new("bars", config);
    let mut gateway = connect(&mut conn, &listener).await;

    send(&mut gateway, "Q,SPY,1.0\r\n").await;

    let err = timeout(WAIT, conn.closed()).await.unwrap().unwrap_err();
    assert!(matches!(err, FeedError::UnexpectedMessage { .. }));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_reconnect_failed_latch_survives_recovery() {
    let (listener, config) = bind_gateway().await;
    let mut conn = FeedConnection::new("bars", config);
    let mut gateway = connect(&mut conn, &listener).await;

    send(
        &mut gateway,
        "S,SERVER CONNECTED\r\nS,SERVER RECONNECT FAILED\r\nS,SERVER CONNECTED\r\n",
    )
    .await;
    wait_until(|| conn.reconnect_failed() && conn.connected()).await;
    assert_eq!(conn.health(), ConnectionHealth::Connected);

    conn.disconnect().await.unwrap();
    assert!(conn.reconnect_failed());
}

#[tokio::test]
async fn test_commands_reach_gateway() {
    let (listener, config) = bind_gateway().await;
    let mut conn = FeedConnection::new("bars", config);
    let mut gateway = connect(&mut conn, &listener).await;

    conn.watch(&WatchRequest::new("SPY", 60, IntervalType::Seconds))
        .await
        .unwrap();
    conn.unwatch("SPY").await.unwrap();
    conn.request_watches().await.unwrap();
    conn.unwatch_all().await.unwrap();

    assert_eq!(read_line(&mut gateway).await, "BW,SPY,60,,,,,,B-SPY-0060-s,s,,\r\n");
    assert_eq!(read_line(&mut gateway).await, "BR,SPY\r\n");
    assert_eq!(read_line(&mut gateway).await, "S,REQUEST WATCHES\r\n");
    assert_eq!(read_line(&mut gateway).await, "S,UNWATCH ALL\r\n");

    conn.disconnect().await.unwrap();
    assert!(matches!(
        conn.unwatch_all().await,
        Err(FeedError::NotConnected(_))
    ));
}

#[tokio::test]
async fn test_gateway_close_then_reconnect() {
    let (listener, config) = bind_gateway().await;
    let mut conn = FeedConnection::new("bars", config);
    let gateway = connect(&mut conn, &listener).await;

    drop(gateway);
    let err = timeout(WAIT, conn.closed()).await.unwrap().unwrap_err();
    assert!(matches!(err, FeedError::Transport { .. }));
    assert_eq!(conn.state(), ConnectionState::Closed);

    let mut gateway = connect(&mut conn, &listener).await;
    send(&mut gateway, "S,SERVER CONNECTED\r\n").await;
    wait_until(|| conn.connected()).await;

    conn.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_disconnect_while_idle_gateway() {
    let (listener, config) = bind_gateway().await;
    let mut conn = FeedConnection::new("bars", config);
    let _gateway = connect(&mut conn, &listener).await;

    // reader is parked in a read with nothing arriving
    timeout(WAIT, conn.disconnect()).await.unwrap().unwrap();
    assert!(!conn.reader_running());
}
