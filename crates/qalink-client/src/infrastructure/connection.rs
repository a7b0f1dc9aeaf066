//! One TCP connection and its lifecycle.
//!
//! A [`Connection`] wraps a single attempt to reach the backend.  It walks the
//! state machine described on [`ConnectionState`], hands every chunk it reads
//! to its chunk handler, and reports how it ended to its termination handler
//! exactly once.  A connection is never reused: after it ends, the owner builds
//! a new one.
//!
//! # Task layout
//!
//! `start()` spawns one tokio task that owns the socket.  It connects (bounded
//! by the connect timeout), then multiplexes three sources with
//! `tokio::select!`: the cancel signal, the read half, and an unbounded queue
//! of outbound byte buffers fed by [`Connection::send`].  A write in progress
//! is raced against the cancel signal too, so `stop()` always releases the
//! socket.
//!
//! # How a connection ends
//!
//! | Cause                          | Final state    | Termination handler gets |
//! |--------------------------------|----------------|--------------------------|
//! | handshake refused or timed out | `Failed(err)`  | `Some(err)`              |
//! | read or write error            | `Failed(err)`  | `Some(err)`              |
//! | remote side closed the stream  | `Cancelled`    | `None`                   |
//! | `stop()` called                | `Cancelled`    | `None`                   |

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use qalink_core::ConnectionId;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio::time;
use tracing::{debug, info, warn};

use crate::domain::config::{Endpoint, MAX_READ_SIZE};
use crate::domain::error::ConnectionError;
use crate::domain::state::ConnectionState;

type ChunkHandler = Arc<dyn Fn(Vec<u8>) + Send + Sync>;
type StateHandler = Arc<dyn Fn(ConnectionState) + Send + Sync>;
type TerminationHandler = Box<dyn FnOnce(Option<ConnectionError>) + Send>;

/// Locks `mutex`, recovering the data if a handler panicked while holding it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the [`Connection`] handle and its socket task.
struct Shared {
    id: ConnectionId,
    endpoint: Endpoint,
    connect_timeout: Duration,
    state: Mutex<ConnectionState>,
    on_chunk: Mutex<Option<ChunkHandler>>,
    on_state: Mutex<Option<StateHandler>>,
    on_terminated: Mutex<Option<TerminationHandler>>,
    cancel: Notify,
}

impl Shared {
    /// Moves to `next` unless a terminal state has already been reached.
    ///
    /// Returns `false` if the transition was refused.
    fn transition(&self, next: ConnectionState) -> bool {
        {
            let mut state = lock(&self.state);
            if state.is_terminal() {
                return false;
            }
            *state = next.clone();
        }
        debug!("{} state -> {next}", self.id);
        let handler = lock(&self.on_state).clone();
        if let Some(handler) = handler {
            handler(next);
        }
        true
    }

    /// Enters the terminal state matching `error`, wakes the socket task, and
    /// fires the termination handler if it has not fired yet.
    fn terminate(&self, error: Option<ConnectionError>) {
        let terminal = match &error {
            Some(err) => ConnectionState::Failed(err.clone()),
            None => ConnectionState::Cancelled,
        };
        self.transition(terminal);
        self.cancel.notify_one();

        // Taken under the lock, invoked outside it: a second caller finds None.
        let handler = lock(&self.on_terminated).take();
        if let Some(handler) = handler {
            handler(error);
        }
    }

    fn deliver(&self, chunk: Vec<u8>) {
        let handler = lock(&self.on_chunk).clone();
        match handler {
            Some(handler) => handler(chunk),
            None => debug!("{} dropped {} bytes: no chunk handler", self.id, chunk.len()),
        }
    }

    async fn run(self: Arc<Self>, mut outbound: mpsc::UnboundedReceiver<Vec<u8>>) {
        if !self.transition(ConnectionState::Preparing) {
            return;
        }

        let stream = tokio::select! {
            biased;
            _ = self.cancel.notified() => return,
            result = time::timeout(
                self.connect_timeout,
                TcpStream::connect((self.endpoint.host.as_str(), self.endpoint.port)),
            ) => match result {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    warn!("{} could not connect to {}: {e}", self.id, self.endpoint);
                    self.terminate(Some(ConnectionError::connect_failed(&self.endpoint, &e)));
                    return;
                }
                Err(_) => {
                    warn!("{} timed out connecting to {}", self.id, self.endpoint);
                    self.terminate(Some(ConnectionError::ConnectTimeout {
                        endpoint: self.endpoint.to_string(),
                        timeout: self.connect_timeout,
                    }));
                    return;
                }
            },
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("{} could not disable Nagle: {e}", self.id);
        }
        if !self.transition(ConnectionState::Ready) {
            // stop() raced the handshake.
            return;
        }
        info!("{} connected to {}", self.id, self.endpoint);

        let (mut reader, mut writer) = stream.into_split();
        let mut buf = vec![0u8; MAX_READ_SIZE];

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.notified() => {
                    debug!("{} socket task cancelled", self.id);
                    break;
                }
                read = reader.read(&mut buf) => match read {
                    Ok(0) => {
                        info!("{} closed by remote side", self.id);
                        self.terminate(None);
                        break;
                    }
                    Ok(n) => {
                        debug!("{} received {n} bytes", self.id);
                        self.deliver(buf[..n].to_vec());
                    }
                    Err(e) => {
                        warn!("{} read error: {e}", self.id);
                        self.terminate(Some(ConnectionError::read(&e)));
                        break;
                    }
                },
                Some(bytes) = outbound.recv() => {
                    // A peer that stops reading can park the write forever.
                    let written = tokio::select! {
                        biased;
                        _ = self.cancel.notified() => {
                            debug!("{} socket task cancelled during a write", self.id);
                            break;
                        }
                        written = writer.write_all(&bytes) => written,
                    };
                    if let Err(e) = written {
                        warn!("{} write error: {e}", self.id);
                        self.terminate(Some(ConnectionError::write(&e)));
                        break;
                    }
                    debug!("{} sent {} bytes", self.id, bytes.len());
                }
            }
        }
    }
}

/// A single TCP connection to the backend.
///
/// Handlers are installed before [`start`](Connection::start).  They run on
/// the connection's socket task and must not block.
///
/// Dropping a `Connection` stops it.
pub struct Connection {
    shared: Arc<Shared>,
    outbound_tx: mpsc::UnboundedSender<Vec<u8>>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

impl Connection {
    /// Creates a connection in the `Setup` state.  Nothing touches the network
    /// until [`start`](Connection::start).
    pub fn new(id: ConnectionId, endpoint: Endpoint, connect_timeout: Duration) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                id,
                endpoint,
                connect_timeout,
                state: Mutex::new(ConnectionState::Setup),
                on_chunk: Mutex::new(None),
                on_state: Mutex::new(None),
                on_terminated: Mutex::new(None),
                cancel: Notify::new(),
            }),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        lock(&self.shared.state).clone()
    }

    /// Receives every chunk read from the socket, in arrival order.  Chunk
    /// boundaries are whatever the kernel delivered; they carry no meaning.
    pub fn set_chunk_handler(&self, handler: impl Fn(Vec<u8>) + Send + Sync + 'static) {
        *lock(&self.shared.on_chunk) = Some(Arc::new(handler));
    }

    /// Observes every state transition, terminal ones included.
    pub fn set_state_handler(&self, handler: impl Fn(ConnectionState) + Send + Sync + 'static) {
        *lock(&self.shared.on_state) = Some(Arc::new(handler));
    }

    /// Called exactly once when the connection ends, with the error that
    /// ended it or `None` for an orderly end.
    pub fn set_termination_handler(
        &self,
        handler: impl FnOnce(Option<ConnectionError>) + Send + 'static,
    ) {
        *lock(&self.shared.on_terminated) = Some(Box::new(handler));
    }

    /// Spawns the socket task.  Must be called from within a tokio runtime.
    /// Calling it a second time has no effect.
    pub fn start(&self) {
        let Some(outbound) = lock(&self.outbound_rx).take() else {
            debug!("{} already started", self.shared.id);
            return;
        };
        info!("{} starting; connecting to {}", self.shared.id, self.shared.endpoint);
        let shared = Arc::clone(&self.shared);
        tokio::spawn(shared.run(outbound));
    }

    /// Queues `bytes` for writing.
    ///
    /// Bytes queued before the handshake completes are written once the
    /// connection is ready.  Bytes queued after the connection ended are
    /// discarded.
    pub fn send(&self, bytes: Vec<u8>) {
        let len = bytes.len();
        if self.outbound_tx.send(bytes).is_err() {
            debug!("{} discarded {len} bytes: socket task has exited", self.shared.id);
        }
    }

    /// Ends the connection.
    ///
    /// Chunk and state handlers are detached first, so nothing else is
    /// delivered after this call.  The termination handler fires with `None`
    /// unless it already fired.  Safe to call any number of times.
    pub fn stop(&self) {
        *lock(&self.shared.on_chunk) = None;
        *lock(&self.shared.on_state) = None;
        self.shared.terminate(None);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// Returns a port on which nothing is listening.
    async fn refused_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    fn endpoint(port: u16) -> Endpoint {
        Endpoint::new("127.0.0.1", port)
    }

    /// Installs a termination handler that counts invocations and forwards the
    /// first error on a oneshot.
    fn watch_termination(
        conn: &Connection,
    ) -> (Arc<AtomicUsize>, oneshot::Receiver<Option<ConnectionError>>) {
        let count = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel();
        let counter = Arc::clone(&count);
        conn.set_termination_handler(move |err| {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(err);
        });
        (count, rx)
    }

    #[tokio::test]
    async fn test_new_connection_is_in_setup() {
        let conn = Connection::new(ConnectionId(0), endpoint(1), Duration::from_secs(1));
        assert_eq!(conn.state(), ConnectionState::Setup);
        assert_eq!(conn.id(), ConnectionId(0));
    }

    #[tokio::test]
    async fn test_refused_connect_fails_once_and_stop_does_not_refire() {
        // Arrange
        let port = refused_port().await;
        let conn = Connection::new(ConnectionId(1), endpoint(port), Duration::from_secs(5));
        let (count, rx) = watch_termination(&conn);

        // Act
        conn.start();
        let err = time::timeout(Duration::from_secs(5), rx)
            .await
            .expect("termination within timeout")
            .expect("handler fired");
        conn.stop();
        conn.stop();

        // Assert
        let err = err.expect("refused connect carries an error");
        assert!(matches!(err, ConnectionError::ConnectFailed { .. }));
        assert!(matches!(conn.state(), ConnectionState::Failed(_)));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_on_ready_connection_cancels_once() {
        // Arrange
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let conn = Connection::new(ConnectionId(2), endpoint(port), Duration::from_secs(5));
        let (count, rx) = watch_termination(&conn);
        let (ready_tx, ready_rx) = oneshot::channel();
        let ready_tx = Mutex::new(Some(ready_tx));
        conn.set_state_handler(move |state| {
            if state == ConnectionState::Ready {
                if let Some(tx) = lock(&ready_tx).take() {
                    let _ = tx.send(());
                }
            }
        });

        // Act
        conn.start();
        let (_server_side, _) = listener.accept().await.unwrap();
        ready_rx.await.unwrap();
        conn.stop();
        conn.stop();

        // Assert
        assert_eq!(rx.await.unwrap(), None);
        assert_eq!(conn.state(), ConnectionState::Cancelled);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_before_start_cancels_without_network() {
        let conn = Connection::new(ConnectionId(3), endpoint(1), Duration::from_secs(1));
        let (count, _rx) = watch_termination(&conn);

        conn.stop();
        conn.start();

        assert_eq!(conn.state(), ConnectionState::Cancelled);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remote_close_cancels_with_no_error() {
        // Arrange
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let conn = Connection::new(ConnectionId(4), endpoint(port), Duration::from_secs(5));
        let (count, rx) = watch_termination(&conn);

        // Act
        conn.start();
        let (server_side, _) = listener.accept().await.unwrap();
        drop(server_side);

        // Assert
        let err = time::timeout(Duration::from_secs(5), rx).await.unwrap().unwrap();
        assert_eq!(err, None);
        assert_eq!(conn.state(), ConnectionState::Cancelled);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_chunks_and_sends_flow_both_ways() {
        // Arrange
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let conn = Connection::new(ConnectionId(5), endpoint(port), Duration::from_secs(5));
        let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel();
        conn.set_chunk_handler(move |chunk| {
            let _ = chunk_tx.send(chunk);
        });

        // Act: queue a write before the handshake finishes
        conn.send(b"ping".to_vec());
        conn.start();
        let (mut server_side, _) = listener.accept().await.unwrap();
        let mut got = [0u8; 4];
        server_side.read_exact(&mut got).await.unwrap();
        server_side.write_all(b"pong").await.unwrap();

        // Assert
        assert_eq!(&got, b"ping");
        let mut received = Vec::new();
        while received.len() < 4 {
            let chunk = time::timeout(Duration::from_secs(5), chunk_rx.recv())
                .await
                .unwrap()
                .unwrap();
            received.extend(chunk);
        }
        assert_eq!(received, b"pong");
    }

    #[tokio::test]
    async fn test_stop_releases_socket_while_write_is_blocked() {
        // Arrange: the server accepts but never reads, so a large write stalls
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let conn = Connection::new(ConnectionId(7), endpoint(port), Duration::from_secs(5));
        let (count, rx) = watch_termination(&conn);
        conn.start();
        let (_server_side, _) = listener.accept().await.unwrap();
        conn.send(vec![0u8; 64 * 1024 * 1024]);
        time::sleep(Duration::from_millis(300)).await;

        // Act
        conn.stop();

        // Assert: the socket task drops its handle on the shared state
        time::timeout(Duration::from_secs(5), async {
            while Arc::strong_count(&conn.shared) > 1 {
                time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("socket task exits after stop");
        assert_eq!(rx.await.unwrap(), None);
        assert_eq!(conn.state(), ConnectionState::Cancelled);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_state_handler_sees_preparing_then_ready() {
        // Arrange
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let conn = Connection::new(ConnectionId(6), endpoint(port), Duration::from_secs(5));
        let (state_tx, mut state_rx) = mpsc::unbounded_channel();
        conn.set_state_handler(move |state| {
            let _ = state_tx.send(state);
        });

        // Act
        conn.start();
        let (_server_side, _) = listener.accept().await.unwrap();

        // Assert
        assert_eq!(state_rx.recv().await, Some(ConnectionState::Preparing));
        assert_eq!(state_rx.recv().await, Some(ConnectionState::Ready));
    }
}
