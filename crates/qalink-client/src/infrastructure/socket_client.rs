//! The reconnecting request/response client.
//!
//! # Architecture
//!
//! [`SocketClient`] is a cheap, cloneable handle.  All mutable state lives in
//! a single actor task that consumes two queues:
//!
//! - **commands** from handles (`start`, `send`, `pending_count`, `close`)
//! - **events** from the current [`Connection`] (chunks, state changes,
//!   termination) and from timers (reconnect due, request timed out)
//!
//! Because only the actor touches the pending table, the frame decoder, and
//! the current connection, none of them need a lock, and every callback
//! arrives in the order its event was queued.
//!
//! Events carry the [`ConnectionId`] of the connection that produced them.
//! Events from a connection that has already been replaced are ignored, so a
//! late chunk from a dead socket can never complete a request sent on its
//! successor.
//!
//! # Connectivity signals
//!
//! `connected` becomes `true` as soon as a connection object has been created
//! and started, before its handshake finishes, and `false` when it ends.  A
//! send issued while `connected` is `true` is queued on the connection and
//! written once the handshake completes.  [`LinkState`] carries the precise
//! phase for callers that need it.

use std::time::Duration;

use qalink_core::{
    encode_frame, tag_request, ConnectionId, CorrelationMode, FrameDecoder, IdSequence, RequestId,
    ResponseEnvelope,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::application::pending::{Delivery, PendingTable, ResponseCallback};
use crate::application::reconnect::{policy_from_config, ReconnectPolicy};
use crate::domain::config::ClientConfig;
use crate::domain::error::{ClientError, ConnectionError};
use crate::domain::state::{ConnectionState, LinkState};
use crate::infrastructure::connection::Connection;

/// Requests from [`SocketClient`] handles to the actor.
enum Command {
    Start,
    Send {
        request: Value,
        on_result: ResponseCallback,
    },
    PendingCount(oneshot::Sender<usize>),
    Close(oneshot::Sender<()>),
}

/// Notifications produced inside the client: by connections and timers.
#[derive(Debug)]
enum Event {
    Chunk {
        connection: ConnectionId,
        bytes: Vec<u8>,
    },
    StateChanged {
        connection: ConnectionId,
        state: ConnectionState,
    },
    Terminated {
        connection: ConnectionId,
        error: Option<ConnectionError>,
    },
    ReconnectDue {
        attempt: u32,
    },
    RequestTimedOut {
        id: RequestId,
        after: Duration,
    },
}

/// Handle to a persistent, reconnecting TCP client.
///
/// Cloning the handle is cheap; all clones talk to the same connection.  The
/// client shuts down when [`close`](SocketClient::close) is called or when the
/// last handle is dropped.
///
/// Must be created from within a tokio runtime.
#[derive(Clone)]
pub struct SocketClient {
    commands: mpsc::UnboundedSender<Command>,
    connected: watch::Receiver<bool>,
    link_state: watch::Receiver<LinkState>,
    correlation: CorrelationMode,
    client_id: Uuid,
}

impl SocketClient {
    /// Creates an idle client using the reconnect policy named in `config`.
    /// No connection is made until [`start`](SocketClient::start).
    pub fn new(config: ClientConfig) -> Self {
        let policy = policy_from_config(&config.reconnect);
        Self::with_policy(config, policy)
    }

    /// Creates an idle client with a caller-supplied reconnect policy.
    pub fn with_policy(config: ClientConfig, policy: Box<dyn ReconnectPolicy>) -> Self {
        let client_id = Uuid::new_v4();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (connected_tx, connected_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(LinkState::Idle);
        let correlation = config.correlation;

        let actor = ClientActor::new(config, policy, events_tx, connected_tx, state_tx);
        let span = info_span!("client", id = %client_id);
        tokio::spawn(actor.run(commands_rx, events_rx).instrument(span));

        Self {
            commands: commands_tx,
            connected: connected_rx,
            link_state: state_rx,
            correlation,
            client_id,
        }
    }

    /// Creates a client and immediately starts connecting.
    pub fn connect(config: ClientConfig) -> Self {
        let client = Self::new(config);
        client.start();
        client
    }

    /// Opens the first connection.  Has no effect if a connection already
    /// exists or a reconnect is scheduled.  After the client gave up, calling
    /// this starts over with a fresh attempt count.
    pub fn start(&self) {
        if self.commands.send(Command::Start).is_err() {
            debug!("start ignored: client {} is closed", self.client_id);
        }
    }

    /// Sends `request` as JSON and calls `on_result` exactly once with the
    /// matching reply or an error.
    ///
    /// Serialization failures are reported through `on_result` before this
    /// method returns.  Every other outcome is reported from the client task.
    /// `on_result` runs on that task and must not block.
    pub fn send<R, F>(&self, request: &R, on_result: F)
    where
        R: Serialize + ?Sized,
        F: FnOnce(Result<Vec<u8>, ClientError>) + Send + 'static,
    {
        let request = match serde_json::to_value(request) {
            Ok(value) => value,
            Err(e) => return on_result(Err(ClientError::Serialize(e.to_string()))),
        };
        if self.correlation == CorrelationMode::Tagged && !request.is_object() {
            return on_result(Err(ClientError::Serialize(
                "tagged correlation needs a JSON object request".to_string(),
            )));
        }

        let command = Command::Send {
            request,
            on_result: Box::new(on_result),
        };
        if let Err(mpsc::error::SendError(command)) = self.commands.send(command) {
            if let Command::Send { on_result, .. } = command {
                on_result(Err(ClientError::Closed));
            }
        }
    }

    /// Sends `request` and waits for the raw reply bytes.
    ///
    /// # Errors
    ///
    /// Any [`ClientError`] the request can end with.
    pub async fn request<R>(&self, request: &R) -> Result<Vec<u8>, ClientError>
    where
        R: Serialize + ?Sized,
    {
        let (tx, rx) = oneshot::channel();
        self.send(request, move |result| {
            let _ = tx.send(result);
        });
        rx.await.unwrap_or(Err(ClientError::Closed))
    }

    /// Sends `request` and decodes the reply as a [`ResponseEnvelope`].
    ///
    /// A reply with `"status": "error"` is still `Ok`; inspect
    /// [`ResponseEnvelope::status`] or call
    /// [`ResponseEnvelope::into_result`].
    ///
    /// # Errors
    ///
    /// [`ClientError::Decode`] if the reply is not a valid envelope, plus every
    /// error [`request`](SocketClient::request) can return.
    pub async fn request_envelope<R, T>(&self, request: &R) -> Result<ResponseEnvelope<T>, ClientError>
    where
        R: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let bytes = self.request(request).await?;
        ResponseEnvelope::decode(&bytes).map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// `true` while a connection object exists (see the module docs).
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// A receiver that observes every change of the `connected` flag.
    pub fn watch_connected(&self) -> watch::Receiver<bool> {
        self.connected.clone()
    }

    pub fn link_state(&self) -> LinkState {
        self.link_state.borrow().clone()
    }

    pub fn watch_link_state(&self) -> watch::Receiver<LinkState> {
        self.link_state.clone()
    }

    /// Number of requests still waiting for a reply.  Zero once closed.
    pub async fn pending_count(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::PendingCount(tx)).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Stops the connection, fails every pending request with
    /// [`ClientError::Closed`], and ends the client task.  Later sends fail
    /// with `Closed`.  Returns once shutdown is complete.
    pub async fn close(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Close(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Random identifier of this client, used in log output.
    pub fn client_id(&self) -> Uuid {
        self.client_id
    }
}

/// The single owner of all client state.
struct ClientActor {
    config: ClientConfig,
    policy: Box<dyn ReconnectPolicy>,
    ids: IdSequence,
    connection: Option<Connection>,
    decoder: FrameDecoder,
    pending: PendingTable,
    attempt: u32,
    events_tx: mpsc::UnboundedSender<Event>,
    connected_tx: watch::Sender<bool>,
    state_tx: watch::Sender<LinkState>,
}

impl ClientActor {
    fn new(
        config: ClientConfig,
        policy: Box<dyn ReconnectPolicy>,
        events_tx: mpsc::UnboundedSender<Event>,
        connected_tx: watch::Sender<bool>,
        state_tx: watch::Sender<LinkState>,
    ) -> Self {
        Self {
            decoder: FrameDecoder::new(config.framing),
            pending: PendingTable::new(config.correlation),
            config,
            policy,
            ids: IdSequence::new(),
            connection: None,
            attempt: 0,
            events_tx,
            connected_tx,
            state_tx,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<Event>,
    ) {
        loop {
            tokio::select! {
                biased;
                Some(event) = events.recv() => self.handle_event(event),
                command = commands.recv() => match command {
                    Some(Command::Close(done)) => {
                        self.shutdown();
                        let _ = done.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("every handle dropped");
                        self.shutdown();
                        break;
                    }
                },
            }
        }
        info!("client task finished");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start => self.handle_start(),
            Command::Send { request, on_result } => self.handle_send(request, on_result),
            Command::PendingCount(reply) => {
                let _ = reply.send(self.pending.waiting());
            }
            Command::Close(done) => {
                self.shutdown();
                let _ = done.send(());
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Chunk { connection, bytes } => self.handle_chunk(connection, bytes),
            Event::StateChanged { connection, state } => self.handle_state(connection, state),
            Event::Terminated { connection, error } => self.handle_terminated(connection, error),
            Event::ReconnectDue { attempt } => self.handle_reconnect_due(attempt),
            Event::RequestTimedOut { id, after } => {
                if self.pending.expire(id, after) {
                    warn!("{id} timed out after {after:?}");
                }
            }
        }
    }

    fn is_current(&self, connection: ConnectionId) -> bool {
        self.connection.as_ref().map(Connection::id) == Some(connection)
    }

    fn set_link_state(&self, state: LinkState) {
        debug!("link state -> {state}");
        self.state_tx.send_replace(state);
    }

    fn handle_start(&mut self) {
        match *self.state_tx.borrow() {
            LinkState::Idle | LinkState::GaveUp { .. } => {}
            ref other => {
                debug!("start ignored while {other}");
                return;
            }
        }
        self.attempt = 0;
        self.policy.reset();
        self.open_connection();
    }

    /// Creates, wires, and starts a new connection, replacing nothing: the
    /// caller guarantees there is no current connection.
    fn open_connection(&mut self) {
        let id = self.ids.next_connection();
        let connection = Connection::new(
            id,
            self.config.endpoint.clone(),
            self.config.connect_timeout,
        );

        let tx = self.events_tx.clone();
        connection.set_chunk_handler(move |bytes| {
            let _ = tx.send(Event::Chunk {
                connection: id,
                bytes,
            });
        });
        let tx = self.events_tx.clone();
        connection.set_state_handler(move |state| {
            let _ = tx.send(Event::StateChanged {
                connection: id,
                state,
            });
        });
        let tx = self.events_tx.clone();
        connection.set_termination_handler(move |error| {
            let _ = tx.send(Event::Terminated {
                connection: id,
                error,
            });
        });

        connection.start();
        self.decoder.reset();
        self.connection = Some(connection);
        self.connected_tx.send_replace(true);
        self.set_link_state(LinkState::Connecting { connection: id });
    }

    fn handle_send(&mut self, mut request: Value, on_result: ResponseCallback) {
        let Some(connection) = self.connection.as_ref() else {
            debug!("send rejected: no connection");
            return on_result(Err(ClientError::NotConnected));
        };

        let id = self.ids.next_request();
        if self.pending.mode() == CorrelationMode::Tagged {
            if let Err(e) = tag_request(&mut request, id) {
                return on_result(Err(ClientError::Serialize(e.to_string())));
            }
        }
        let payload = match serde_json::to_vec(&request) {
            Ok(payload) => payload,
            Err(e) => return on_result(Err(ClientError::Serialize(e.to_string()))),
        };
        let frame = match encode_frame(&self.config.framing, &payload) {
            Ok(frame) => frame,
            Err(e) => return on_result(Err(ClientError::Framing(e))),
        };

        debug!("{id} queued on {} ({} bytes)", connection.id(), frame.len());
        self.pending.insert(id, on_result);
        connection.send(frame);

        if let Some(after) = self.config.request_timeout {
            let tx = self.events_tx.clone();
            tokio::spawn(async move {
                time::sleep(after).await;
                let _ = tx.send(Event::RequestTimedOut { id, after });
            });
        }
    }

    fn handle_chunk(&mut self, connection: ConnectionId, bytes: Vec<u8>) {
        if !self.is_current(connection) {
            debug!("dropping {} bytes from stale {connection}", bytes.len());
            return;
        }
        let messages = match self.decoder.push(&bytes) {
            Ok(messages) => messages,
            Err(e) => {
                warn!("framing error on {connection}: {e}; dropping connection");
                if let Some(current) = self.connection.as_ref() {
                    current.stop();
                }
                return;
            }
        };
        for message in messages {
            match self.pending.deliver(message) {
                Delivery::Completed { id, elapsed } => debug!("{id} completed in {elapsed:?}"),
                Delivery::Discarded(id) => debug!("late reply for timed-out {id} discarded"),
                Delivery::Unsolicited => warn!("reply with no pending request discarded"),
                Delivery::MissingId => warn!("reply without request_id discarded"),
                Delivery::UnknownId(id) => warn!("reply for unknown {id} discarded"),
            }
        }
    }

    fn handle_state(&mut self, connection: ConnectionId, state: ConnectionState) {
        if !self.is_current(connection) {
            return;
        }
        if state == ConnectionState::Ready {
            info!("{connection} ready");
            self.attempt = 0;
            self.policy.reset();
            self.set_link_state(LinkState::Ready { connection });
        }
    }

    fn handle_terminated(&mut self, connection: ConnectionId, error: Option<ConnectionError>) {
        if !self.is_current(connection) {
            debug!("ignoring termination of stale {connection}");
            return;
        }
        match &error {
            Some(err) => warn!(io_kind = ?err.io_kind(), "{connection} failed: {err}"),
            None => info!("{connection} ended"),
        }

        self.connection = None;
        self.connected_tx.send_replace(false);
        self.decoder.reset();
        let failed = self.pending.fail_all(|| ClientError::Disconnected);
        if failed > 0 {
            info!("{failed} pending request(s) failed by disconnect");
        }
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        self.attempt = self.attempt.saturating_add(1);
        let attempt = self.attempt;
        match self.policy.next_delay(attempt) {
            Some(delay) => {
                info!("reconnect attempt {attempt} in {delay:?}");
                self.set_link_state(LinkState::Reconnecting { attempt, delay });
                let tx = self.events_tx.clone();
                tokio::spawn(async move {
                    time::sleep(delay).await;
                    let _ = tx.send(Event::ReconnectDue { attempt });
                });
            }
            None => {
                let attempts = attempt - 1;
                warn!("giving up after {attempts} reconnect attempt(s)");
                self.set_link_state(LinkState::GaveUp { attempts });
            }
        }
    }

    fn handle_reconnect_due(&mut self, attempt: u32) {
        let due = matches!(
            *self.state_tx.borrow(),
            LinkState::Reconnecting { attempt: scheduled, .. } if scheduled == attempt
        );
        if due && self.connection.is_none() {
            self.open_connection();
        }
    }

    fn shutdown(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.stop();
        }
        self.connected_tx.send_replace(false);
        self.decoder.reset();
        let failed = self.pending.fail_all(|| ClientError::Closed);
        if failed > 0 {
            info!("{failed} pending request(s) failed by close");
        }
        self.set_link_state(LinkState::Closed);
    }
}
