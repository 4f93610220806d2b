use async_trait::async_trait;
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use wsmux::core::engine::{Connection, OutboundFrame};
use wsmux::{
    Endpoint, EngineConfig, EngineError, EngineState, Flow, MarketSegment, ReconnectPolicy,
    StopReason, TopicKey, WsClient,
};

/// One scripted event on the fake wire.
enum Script {
    Frame(String),
    Error(String),
    Close,
}

/// Scripted in-memory transport. Inbound frames are fed through a channel
/// so tests control exactly what the engine receives and when; every
/// outbound frame is recorded for ordering assertions.
struct ScriptedConnection {
    inbound: mpsc::UnboundedReceiver<Script>,
    sent: Arc<Mutex<Vec<OutboundFrame>>>,
    opens: Arc<AtomicUsize>,
    open: bool,
}

#[derive(Clone)]
struct ScriptHandle {
    tx: mpsc::UnboundedSender<Script>,
    sent: Arc<Mutex<Vec<OutboundFrame>>>,
    opens: Arc<AtomicUsize>,
}

impl ScriptHandle {
    fn push_frame(&self, frame: &str) {
        self.tx.send(Script::Frame(frame.to_string())).unwrap();
    }

    fn push_error(&self, message: &str) {
        self.tx.send(Script::Error(message.to_string())).unwrap();
    }

    #[allow(dead_code)]
    fn push_close(&self) {
        self.tx.send(Script::Close).unwrap();
    }

    fn sent(&self) -> Vec<OutboundFrame> {
        self.sent.lock().unwrap().clone()
    }

    fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

fn scripted_connection() -> (ScriptedConnection, ScriptHandle) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let (tx, rx) = mpsc::unbounded_channel();
    let sent = Arc::new(Mutex::new(Vec::new()));
    let opens = Arc::new(AtomicUsize::new(0));
    let conn = ScriptedConnection {
        inbound: rx,
        sent: sent.clone(),
        opens: opens.clone(),
        open: false,
    };
    (conn, ScriptHandle { tx, sent, opens })
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn open(&mut self) -> Result<(), EngineError> {
        self.open = true;
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&mut self, frame: OutboundFrame) -> Result<(), EngineError> {
        if !self.open {
            return Err(EngineError::TransportError("not connected".to_string()));
        }
        self.sent.lock().unwrap().push(frame);
        Ok(())
    }

    async fn receive(&mut self) -> Result<Option<String>, EngineError> {
        if !self.open {
            return Err(EngineError::TransportError("not connected".to_string()));
        }
        match self.inbound.recv().await {
            Some(Script::Frame(text)) => Ok(Some(text)),
            Some(Script::Error(message)) => {
                self.open = false;
                Err(EngineError::TransportError(message))
            }
            Some(Script::Close) | None => {
                self.open = false;
                Ok(None)
            }
        }
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

fn public_client(conn: ScriptedConnection) -> WsClient<ScriptedConnection> {
    WsClient::with_connection(
        conn,
        Endpoint::public(MarketSegment::Linear),
        EngineConfig::read_only(),
    )
    .unwrap()
}

fn private_client(
    conn: ScriptedConnection,
    reconnect: Option<ReconnectPolicy>,
) -> WsClient<ScriptedConnection> {
    let mut config = EngineConfig::new("test-key".to_string(), "test-secret".to_string());
    if let Some(policy) = reconnect {
        config = config.reconnect(policy);
    }
    WsClient::with_connection(conn, Endpoint::private(), config).unwrap()
}

fn topics_of(frame: &OutboundFrame) -> Vec<String> {
    match frame {
        OutboundFrame::Subscribe { topics, .. } | OutboundFrame::Unsubscribe { topics, .. } => {
            let mut topics = topics.clone();
            topics.sort();
            topics
        }
        other => panic!("expected subscribe/unsubscribe frame, got {:?}", other),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
struct TickerFrame {
    topic: String,
    data: TickerData,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
struct TickerData {
    symbol: String,
    #[serde(rename = "lastPrice")]
    last_price: String,
}

#[tokio::test]
async fn auth_frame_precedes_any_subscribe_frame() {
    let (conn, handle) = scripted_connection();
    let mut client = private_client(conn, None);

    client
        .subscribe::<serde_json::Value, _>(TopicKey::new("position"), |_| Flow::Continue)
        .await
        .unwrap();

    handle.push_frame(r#"{"op":"auth","success":true}"#);
    client.connect().await.unwrap();
    assert_eq!(client.state(), EngineState::Active);

    let sent = handle.sent();
    assert_eq!(sent.len(), 2, "expected exactly auth + subscribe: {:?}", sent);
    assert!(
        matches!(&sent[0], OutboundFrame::Auth { api_key, .. } if api_key == "test-key"),
        "first frame must be the login: {:?}",
        sent[0]
    );
    assert_eq!(topics_of(&sent[1]), ["position"]);
}

#[tokio::test]
async fn rejected_auth_is_fatal_and_sends_no_subscribes() {
    let (conn, handle) = scripted_connection();
    let mut client = private_client(conn, None);

    client
        .subscribe::<serde_json::Value, _>(TopicKey::new("order"), |_| Flow::Continue)
        .await
        .unwrap();

    handle.push_frame(r#"{"op":"auth","success":false,"ret_msg":"invalid signature"}"#);
    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, EngineError::AuthError(_)));
    assert_eq!(client.state(), EngineState::Failed);

    let sent = handle.sent();
    assert_eq!(sent.len(), 1, "no subscribe may follow a rejected auth");
    assert!(matches!(sent[0], OutboundFrame::Auth { .. }));
}

#[tokio::test]
async fn step_dispatches_one_frame_to_the_matching_callback() {
    let (conn, handle) = scripted_connection();
    let mut client = public_client(conn);

    let received: Arc<Mutex<Vec<TickerFrame>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    client
        .subscribe::<TickerFrame, _>(
            TopicKey::new("tickers").param("BTCUSDT"),
            move |message| {
                sink.lock().unwrap().push(message);
                Flow::Continue
            },
        )
        .await
        .unwrap();

    client.connect().await.unwrap();

    handle.push_frame(r#"{"op":"subscribe","req_id":"1","success":true}"#);
    handle.push_frame(
        r#"{"topic":"tickers.BTCUSDT","data":{"symbol":"BTCUSDT","lastPrice":"64250.50"}}"#,
    );

    assert_eq!(client.step().await.unwrap(), Flow::Continue); // ack
    assert_eq!(client.step().await.unwrap(), Flow::Continue); // data

    let received = received.lock().unwrap();
    assert_eq!(
        *received,
        vec![TickerFrame {
            topic: "tickers.BTCUSDT".to_string(),
            data: TickerData {
                symbol: "BTCUSDT".to_string(),
                last_price: "64250.50".to_string(),
            },
        }]
    );
}

#[tokio::test]
async fn unknown_topics_never_invoke_callbacks_or_stop_the_loop() {
    let (conn, handle) = scripted_connection();
    let mut client = public_client(conn);

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    client
        .subscribe::<serde_json::Value, _>(TopicKey::new("tickers").param("BTCUSDT"), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Flow::Continue
        })
        .await
        .unwrap();

    client.connect().await.unwrap();

    handle.push_frame(r#"{"op":"subscribe","req_id":"1","success":true}"#);
    handle.push_frame(r#"{"topic":"liquidation.BTCUSDT","data":{}}"#);
    handle.push_frame(r#"{"topic":"tickers.DOGEUSDT","data":{}}"#);
    handle.push_frame(r#"{"garbage":true}"#);
    handle.push_frame(r#"{"topic":"tickers.BTCUSDT","data":{"ok":true}}"#);

    for _ in 0..5 {
        assert_eq!(client.step().await.unwrap(), Flow::Continue);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(client.state(), EngineState::Active);
}

#[tokio::test]
async fn callback_stop_ends_the_managed_loop_without_error() {
    let (conn, handle) = scripted_connection();
    let mut client = public_client(conn);

    client
        .subscribe::<serde_json::Value, _>(TopicKey::new("tickers").param("BTCUSDT"), |_| {
            Flow::Stop
        })
        .await
        .unwrap();

    handle.push_frame(r#"{"op":"subscribe","req_id":"1","success":true}"#);
    handle.push_frame(r#"{"topic":"tickers.BTCUSDT","data":{}}"#);

    // run() establishes the connection itself from Idle.
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let reason = client.run(cancel_rx, |_| {}).await.unwrap();

    assert_eq!(reason, StopReason::Callback);
    assert_eq!(client.state(), EngineState::Stopped);
}

#[tokio::test]
async fn cancellation_stops_the_loop_with_no_further_callbacks() {
    let (conn, handle) = scripted_connection();
    let mut client = public_client(conn);

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    client
        .subscribe::<serde_json::Value, _>(TopicKey::new("tickers").param("BTCUSDT"), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Flow::Continue
        })
        .await
        .unwrap();

    client.connect().await.unwrap();
    handle.push_frame(r#"{"op":"subscribe","req_id":"1","success":true}"#);

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let run = client.run(cancel_rx, |_| {});
    let canceller = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel_tx.send(true).unwrap();
        // A frame arriving after cancellation must not reach the callback.
        handle.push_frame(r#"{"topic":"tickers.BTCUSDT","data":{}}"#);
    };

    let (result, ()) = tokio::join!(run, canceller);
    assert_eq!(result.unwrap(), StopReason::Cancelled);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn reconnect_reissues_every_subscription_exactly_once() {
    let (conn, handle) = scripted_connection();
    let mut client = private_client(
        conn,
        Some(ReconnectPolicy {
            enabled: true,
            max_attempts: 2,
            initial_delay_ms: 10,
        }),
    );

    client
        .subscribe::<serde_json::Value, _>(TopicKey::new("position"), |_| Flow::Continue)
        .await
        .unwrap();
    client
        .subscribe::<serde_json::Value, _>(TopicKey::new("order"), |_| Flow::Continue)
        .await
        .unwrap();

    handle.push_frame(r#"{"op":"auth","success":true}"#);
    client.connect().await.unwrap();

    handle.push_frame(r#"{"op":"subscribe","req_id":"1","success":true}"#);
    handle.push_error("socket reset");
    // Script for the reconnected session.
    handle.push_frame(r#"{"op":"auth","success":true}"#);
    handle.push_frame(r#"{"op":"subscribe","req_id":"2","success":true}"#);

    let errors = Arc::new(AtomicUsize::new(0));
    let error_counter = errors.clone();
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let run = client.run(cancel_rx, move |_| {
        error_counter.fetch_add(1, Ordering::SeqCst);
    });
    let canceller = async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel_tx.send(true).unwrap();
    };

    let (result, ()) = tokio::join!(run, canceller);
    assert_eq!(result.unwrap(), StopReason::Cancelled);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert_eq!(handle.open_count(), 2);

    // One login and one batched subscribe per session, auth first both
    // times, same topic set re-issued with no duplicates or omissions.
    let sent = handle.sent();
    assert_eq!(sent.len(), 4, "unexpected frame sequence: {:?}", sent);
    assert!(matches!(sent[0], OutboundFrame::Auth { .. }));
    assert_eq!(topics_of(&sent[1]), ["order", "position"]);
    assert!(matches!(sent[2], OutboundFrame::Auth { .. }));
    assert_eq!(topics_of(&sent[3]), ["order", "position"]);
}

#[tokio::test]
async fn transport_error_without_reconnect_policy_fails_the_loop() {
    let (conn, handle) = scripted_connection();
    let mut client = public_client(conn);

    client.connect().await.unwrap();
    handle.push_error("socket reset");

    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let err = client.run(cancel_rx, |_| {}).await.unwrap_err();

    assert!(matches!(err, EngineError::TransportError(_)));
    assert_eq!(client.state(), EngineState::Failed);
}

#[tokio::test]
async fn unsubscribe_sends_frame_and_stops_dispatch() {
    let (conn, handle) = scripted_connection();
    let mut client = public_client(conn);

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let token = client
        .subscribe::<serde_json::Value, _>(TopicKey::new("tickers").param("BTCUSDT"), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Flow::Continue
        })
        .await
        .unwrap();

    client.connect().await.unwrap();
    handle.push_frame(r#"{"op":"subscribe","req_id":"1","success":true}"#);
    assert_eq!(client.step().await.unwrap(), Flow::Continue);

    client.unsubscribe(&token).await.unwrap();
    assert_eq!(client.subscription_count(), 0);

    let sent = handle.sent();
    assert!(matches!(sent.last(), Some(OutboundFrame::Unsubscribe { .. })));

    handle.push_frame(r#"{"topic":"tickers.BTCUSDT","data":{}}"#);
    assert_eq!(client.step().await.unwrap(), Flow::Continue);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn step_requires_an_established_connection() {
    let (conn, _handle) = scripted_connection();
    let mut client = public_client(conn);

    let err = client.step().await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));
}

#[tokio::test]
async fn managed_loop_survives_bursts_of_heartbeats() {
    let (conn, handle) = scripted_connection();
    let mut client = public_client(conn);

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    client
        .subscribe::<serde_json::Value, _>(TopicKey::new("tickers").param("BTCUSDT"), move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 2 {
                Flow::Stop
            } else {
                Flow::Continue
            }
        })
        .await
        .unwrap();

    handle.push_frame(r#"{"op":"subscribe","req_id":"1","success":true}"#);
    for _ in 0..3 {
        handle.push_frame(r#"{"op":"pong"}"#);
        handle.push_frame(r#"{"topic":"tickers.BTCUSDT","data":{}}"#);
    }

    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let reason = timeout(Duration::from_secs(5), client.run(cancel_rx, |_| {}))
        .await
        .expect("loop must terminate")
        .unwrap();

    assert_eq!(reason, StopReason::Callback);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}
