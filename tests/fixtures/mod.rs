//! In-memory transport fixtures for driving the client without a network.
#![allow(dead_code)]

use std::time::Duration;

use async_trait::async_trait;
use rivulet::{Client, ClientBuilder, Connect, Transport, TransportError};
use serde_json::{Value, json};
use tokio::sync::mpsc;

struct MockTransport {
    incoming: mpsc::UnboundedReceiver<Result<String, TransportError>>,
    outgoing: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        self.outgoing
            .send(frame)
            .map_err(|_| TransportError::Closed)
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        self.incoming.recv().await
    }

    async fn close(&mut self) {}
}

/// Server side of one mock transport. Dropping it severs the link, which the
/// client observes as transport loss.
pub struct ServerEnd {
    from_client: mpsc::UnboundedReceiver<String>,
    to_client: mpsc::UnboundedSender<Result<String, TransportError>>,
}

impl ServerEnd {
    /// Next protocol frame from the client, transparently answering
    /// keepalive pings along the way.
    pub async fn recv_json(&mut self) -> Value {
        loop {
            let frame = self
                .from_client
                .recv()
                .await
                .expect("client closed its transport");
            let value: Value = serde_json::from_str(&frame).expect("client sent valid JSON");
            match value["msg"].as_str() {
                Some("ping") => self.send_json(&json!({ "msg": "pong" })),
                Some("pong") => {}
                _ => return value,
            }
        }
    }

    /// Next raw frame with no keepalive handling.
    pub async fn recv_raw(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    pub fn send_json(&self, value: &Value) {
        self.to_client
            .send(Ok(value.to_string()))
            .expect("client hung up");
    }

    pub fn send_result(&self, id: &str, result: Value) {
        self.send_json(&json!({ "msg": "result", "id": id, "result": result }));
    }

    pub fn send_error(&self, id: &str, error: Value) {
        self.send_json(&json!({ "msg": "result", "id": id, "error": error }));
    }

    pub fn send_ready(&self, id: &str) {
        self.send_json(&json!({ "msg": "ready", "subs": [id] }));
    }

    pub async fn expect_method(&mut self, method: &str) -> (String, Vec<Value>) {
        let frame = self.recv_json().await;
        assert_eq!(frame["msg"], "method", "frame: {frame}");
        assert_eq!(frame["method"], method, "frame: {frame}");
        let id = frame["id"].as_str().expect("method id").to_string();
        let params = frame["params"].as_array().cloned().unwrap_or_default();
        (id, params)
    }

    pub async fn expect_sub(&mut self) -> (String, String, Vec<Value>) {
        let frame = self.recv_json().await;
        assert_eq!(frame["msg"], "sub", "frame: {frame}");
        let id = frame["id"].as_str().expect("sub id").to_string();
        let name = frame["name"].as_str().expect("sub name").to_string();
        let params = frame["params"].as_array().cloned().unwrap_or_default();
        (id, name, params)
    }

    pub async fn expect_unsub(&mut self) -> String {
        let frame = self.recv_json().await;
        assert_eq!(frame["msg"], "unsub", "frame: {frame}");
        frame["id"].as_str().expect("unsub id").to_string()
    }

    /// Push a room-message stream event for `event_name`.
    pub fn push_room_message(&self, event_name: &str, message: Value) {
        self.send_json(&json!({
            "msg": "changed",
            "collection": "stream-room-messages",
            "id": "id",
            "fields": {
                "eventName": event_name,
                "args": [message, { "roomType": "c" }],
            },
        }));
    }
}

/// Connector handing each dial a fresh in-memory transport.
#[derive(Clone)]
pub struct MockConnector {
    accepts: mpsc::UnboundedSender<ServerEnd>,
}

/// New mock connector plus the acceptor queue its dials arrive on.
pub fn mock_connector() -> (MockConnector, mpsc::UnboundedReceiver<ServerEnd>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MockConnector { accepts: tx }, rx)
}

#[async_trait]
impl Connect for MockConnector {
    async fn connect(&self, _url: &str) -> Result<Box<dyn Transport>, TransportError> {
        let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();
        let (from_client_tx, from_client_rx) = mpsc::unbounded_channel();
        self.accepts
            .send(ServerEnd {
                from_client: from_client_rx,
                to_client: to_client_tx,
            })
            .map_err(|_| TransportError::Closed)?;
        Ok(Box::new(MockTransport {
            incoming: to_client_rx,
            outgoing: from_client_tx,
        }))
    }
}

/// Accept the next dial and complete the protocol handshake.
pub async fn accept_session(accepts: &mut mpsc::UnboundedReceiver<ServerEnd>) -> ServerEnd {
    let mut server = accepts.recv().await.expect("client should dial");
    let connect = server.recv_json().await;
    assert_eq!(connect["msg"], "connect", "frame: {connect}");
    assert_eq!(connect["version"], "1");
    server.send_json(&json!({ "msg": "connected", "session": "session-1" }));
    server
}

/// Install a test subscriber once so client logs surface with --nocapture.
fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Builder preconfigured with the mock connector and fast timings.
pub fn test_builder(connector: MockConnector) -> ClientBuilder {
    init_logging();
    Client::builder()
        .host("chat.test")
        .connector(connector)
        .connect_timeout(Duration::from_secs(5))
        .keepalive_interval(Duration::from_secs(30))
        .reconnect_delay(Duration::from_millis(100))
}

/// Poll `condition` until it holds, letting the paused clock advance.
pub async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}
