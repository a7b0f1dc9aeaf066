//! Scripted in-process backend used by the integration tests.
//!
//! Each test binds a [`TcpListener`] on an ephemeral port, points a client at
//! it, and drives the server side by hand: accept, read requests, reply in
//! whatever order or timing the test needs.

#![allow(dead_code)]

use std::time::Duration;

use qalink_client::{ClientConfig, Endpoint, ReconnectConfig};
use qalink_core::{encode_frame, CorrelationMode, FrameDecoder, Framing};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Upper bound on any single step a test waits for.
pub const STEP: Duration = Duration::from_secs(5);

/// Pause after each raw-mode reply so the kernel does not coalesce replies.
pub const RAW_REPLY_GAP: Duration = Duration::from_millis(50);

pub async fn listen() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    (listener, port)
}

/// A port with nothing listening on it.
pub async fn refused_port() -> u16 {
    let (listener, port) = listen().await;
    drop(listener);
    port
}

/// Client settings for tests: short reconnect delay, short connect timeout.
pub fn config(port: u16, framing: Framing, correlation: CorrelationMode) -> ClientConfig {
    ClientConfig {
        endpoint: Endpoint::new("127.0.0.1", port),
        framing,
        correlation,
        connect_timeout: Duration::from_secs(2),
        request_timeout: None,
        reconnect: ReconnectConfig::Fixed {
            delay: Duration::from_millis(100),
            max_attempts: None,
        },
    }
}

/// Builds a success envelope that echoes the request's `request_id`, if any.
pub fn reply_to(request: &Value, message: &str) -> Value {
    let mut reply = json!({"status": "success", "message": message});
    if let Some(id) = request.get("request_id") {
        reply["request_id"] = id.clone();
    }
    reply
}

/// The server side of one accepted connection.
pub struct ServerConn {
    stream: TcpStream,
    framing: Framing,
    decoder: FrameDecoder,
    raw_buf: Vec<u8>,
    ready: Vec<Vec<u8>>,
}

impl ServerConn {
    pub async fn accept(listener: &TcpListener, framing: Framing) -> Self {
        let (stream, _) = tokio::time::timeout(STEP, listener.accept())
            .await
            .expect("client connected in time")
            .expect("accept");
        stream.set_nodelay(true).expect("nodelay");
        Self {
            stream,
            framing,
            decoder: FrameDecoder::new(framing),
            raw_buf: Vec::new(),
            ready: Vec::new(),
        }
    }

    /// Reads the next complete request.
    pub async fn next_request(&mut self) -> Value {
        loop {
            if let Some(value) = self.take_ready() {
                return value;
            }
            let mut chunk = [0u8; 4096];
            let n = tokio::time::timeout(STEP, self.stream.read(&mut chunk))
                .await
                .expect("request arrived in time")
                .expect("read");
            assert!(n > 0, "client closed the connection while a request was expected");
            match self.framing {
                Framing::Raw => self.raw_buf.extend_from_slice(&chunk[..n]),
                _ => {
                    let frames = self.decoder.push(&chunk[..n]).expect("client frames are valid");
                    self.ready.extend(frames);
                }
            }
        }
    }

    /// Raw requests are bare JSON documents back to back, so they are split
    /// with a streaming deserializer.
    fn take_ready(&mut self) -> Option<Value> {
        if !self.ready.is_empty() {
            let frame = self.ready.remove(0);
            return Some(serde_json::from_slice(&frame).expect("request frame is JSON"));
        }
        let (value, used) = {
            let mut docs = serde_json::Deserializer::from_slice(&self.raw_buf).into_iter::<Value>();
            match docs.next() {
                Some(Ok(value)) => (value, docs.byte_offset()),
                _ => return None,
            }
        };
        self.raw_buf.drain(..used);
        Some(value)
    }

    pub async fn reply(&mut self, value: &Value) {
        let payload = serde_json::to_vec(value).expect("serialize reply");
        let bytes = encode_frame(&self.framing, &payload).expect("frame reply");
        self.write_bytes(&bytes).await;
        if self.framing == Framing::Raw {
            tokio::time::sleep(RAW_REPLY_GAP).await;
        }
    }

    pub async fn write_bytes(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("write");
        self.stream.flush().await.expect("flush");
    }
}
