// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Resilient Transport
//!
//! Owns one authenticated connection to the relay. Outbound frames go
//! through a [`PriorityQueue`] drained by a writer thread; a reader thread
//! fills the inbox, answers pings, resolves acknowledgements and reconnects
//! after failures. Every (re)connect authenticates with the offset supplied
//! by [`Credentials`], so delivery resumes after the last processed frame.
//!
//! # Example
//!
//! ```ignore
//! use envoy_core::network::{Transport, TransportConfig, WebSocketDialer};
//!
//! let config = TransportConfig::new("wss://relay.example.com", "alice:phone");
//! let transport = Transport::new(config, Arc::new(WebSocketDialer), credentials);
//! transport.connect()?;
//! transport.send(&["bob:laptop".into()], "message", &ciphertext)?;
//! let inbound = transport.receive()?;
//! transport.close();
//! ```

use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::connection::{Connection, ConnectionState, Credentials, Dialer, TransportResult};
use super::error::NetworkError;
use super::frame::{AuthFrame, Frame, MessageFrame, AUTH_REJECTED, KIND_SESSION_RECOVERY};
use super::queue::PriorityQueue;

/// Queue class of the shutdown sentinel.
pub const CLASS_CLOSE: usize = 0;
/// Queue class of control frames (pongs, session recovery).
pub const CLASS_CONTROL: usize = 1;
/// Queue class of application messages.
pub const CLASS_APPLICATION: usize = 2;

const QUEUE_CLASSES: usize = 3;

/// Configuration for the resilient transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Relay URL.
    pub url: String,
    /// Address of this device, sent in the authentication frame.
    pub device: String,
    /// Connection timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Time allowed for the relay to acknowledge authentication.
    pub handshake_timeout_ms: u64,
    /// How long one receive call waits before checking for shutdown.
    pub poll_interval_ms: u64,
    /// Time a synchronous send waits for its acknowledgements.
    pub ack_timeout_ms: u64,
    /// Reconnection attempts after a lost connection.
    pub max_reconnect_attempts: u32,
    /// Fixed delay between reconnection attempts.
    pub reconnect_delay_ms: u64,
    /// Maximum frames waiting to be written.
    pub queue_capacity: usize,
    /// Maximum received frames waiting for [`Transport::receive`].
    pub inbox_capacity: usize,
    /// Queue class per frame kind.
    pub priorities: HashMap<String, usize>,
    /// Queue class of kinds missing from `priorities`.
    pub default_priority: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            url: String::new(),
            device: String::new(),
            connect_timeout_ms: 10_000,
            handshake_timeout_ms: 5_000,
            poll_interval_ms: 100,
            ack_timeout_ms: 30_000,
            max_reconnect_attempts: 5,
            reconnect_delay_ms: 1_000,
            queue_capacity: 1_024,
            inbox_capacity: 256,
            priorities: HashMap::from([(KIND_SESSION_RECOVERY.to_string(), CLASS_CONTROL)]),
            default_priority: CLASS_APPLICATION,
        }
    }
}

impl TransportConfig {
    pub fn new(url: &str, device: &str) -> Self {
        TransportConfig {
            url: url.to_string(),
            device: device.to_string(),
            ..Default::default()
        }
    }

    /// Queue class for frames of `kind`.
    pub fn priority(&self, kind: &str) -> usize {
        self.priorities
            .get(kind)
            .copied()
            .unwrap_or(self.default_priority)
    }
}

/// A message frame delivered to this device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub id: String,
    pub kind: String,
    pub sender: String,
    /// Resumption offset assigned by the relay.
    pub offset: u64,
    pub ciphertext: Vec<u8>,
    pub timestamp: i64,
}

impl From<MessageFrame> for Inbound {
    fn from(frame: MessageFrame) -> Self {
        Inbound {
            id: frame.id,
            kind: frame.kind,
            sender: frame.sender,
            offset: frame.offset,
            ciphertext: frame.ciphertext,
            timestamp: frame.timestamp,
        }
    }
}

/// Callback receiving the relay's response to an asynchronous send.
pub type SendCallback = Arc<dyn Fn(TransportResult<()>) + Send + Sync>;
type ConnectHook = Arc<dyn Fn() + Send + Sync>;
type DisconnectHook = Arc<dyn Fn(&NetworkError) + Send + Sync>;

enum Responder {
    Waiter(SyncSender<TransportResult<()>>),
    Callback(SendCallback),
}

impl Responder {
    fn respond(self, result: TransportResult<()>) {
        match self {
            Responder::Waiter(tx) => {
                let _ = tx.try_send(result);
            }
            Responder::Callback(callback) => {
                thread::spawn(move || callback(result));
            }
        }
    }
}

enum Outbound {
    Frame {
        frame: Frame,
        responder: Option<Responder>,
    },
    Close,
}

impl Outbound {
    fn fail(self, error: NetworkError) {
        if let Outbound::Frame {
            responder: Some(responder),
            ..
        } = self
        {
            responder.respond(Err(error));
        }
    }
}

struct Link {
    state: ConnectionState,
    connection: Option<Arc<dyn Connection>>,
    /// Set when reconnecting gave up; fails queued frames.
    failure: Option<NetworkError>,
}

struct Shared {
    config: TransportConfig,
    dialer: Arc<dyn Dialer>,
    credentials: Arc<dyn Credentials>,
    queue: PriorityQueue<Outbound>,
    link: Mutex<Link>,
    link_changed: Condvar,
    pending: Mutex<HashMap<String, Responder>>,
    shutdown: AtomicBool,
    on_connect: RwLock<Option<ConnectHook>>,
    on_disconnect: RwLock<Option<DisconnectHook>>,
}

#[derive(Default)]
struct Workers {
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

/// Reconnecting, authenticated connection to the relay.
pub struct Transport {
    shared: Arc<Shared>,
    inbox_tx: Mutex<Option<SyncSender<Inbound>>>,
    inbox: Mutex<Receiver<Inbound>>,
    workers: Mutex<Workers>,
}

impl Transport {
    pub fn new(config: TransportConfig, dialer: Arc<dyn Dialer>, credentials: Arc<dyn Credentials>) -> Self {
        let (inbox_tx, inbox) = mpsc::sync_channel(config.inbox_capacity.max(1));
        let queue = PriorityQueue::new(QUEUE_CLASSES, config.queue_capacity);
        Transport {
            shared: Arc::new(Shared {
                config,
                dialer,
                credentials,
                queue,
                link: Mutex::new(Link {
                    state: ConnectionState::Disconnected,
                    connection: None,
                    failure: None,
                }),
                link_changed: Condvar::new(),
                pending: Mutex::new(HashMap::new()),
                shutdown: AtomicBool::new(false),
                on_connect: RwLock::new(None),
                on_disconnect: RwLock::new(None),
            }),
            inbox_tx: Mutex::new(Some(inbox_tx)),
            inbox: Mutex::new(inbox),
            workers: Mutex::new(Workers::default()),
        }
    }

    /// Registers a hook run after every successful (re)connect.
    pub fn on_connect<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.shared.on_connect.write() = Some(Arc::new(hook));
    }

    /// Registers a hook run with the causing error whenever the connection
    /// is lost. Must not call [`Transport::close`].
    pub fn on_disconnect<F>(&self, hook: F)
    where
        F: Fn(&NetworkError) + Send + Sync + 'static,
    {
        *self.shared.on_disconnect.write() = Some(Arc::new(hook));
    }

    pub fn config(&self) -> &TransportConfig {
        &self.shared.config
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.link.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Connects, authenticates and starts the reader and writer threads.
    ///
    /// Once started, lost connections are re-established automatically and
    /// further calls return immediately. After reconnecting has given up, a
    /// call dials again and restarts the reader.
    pub fn connect(&self) -> TransportResult<()> {
        if self.shared.is_shutdown() {
            return Err(NetworkError::Closed);
        }

        let mut workers = self.workers.lock();
        if workers.reader.is_some() {
            let Some(failure) = self.shared.failure() else {
                return Ok(());
            };
            // The reader stops right after giving up
            if let Some(reader) = workers.reader.take() {
                let _ = reader.join();
            }
            info!("Restarting transport after: {}", failure);
        }
        let inbox = self.inbox_tx.lock().clone().ok_or(NetworkError::Closed)?;

        self.shared.set_state(ConnectionState::Connecting);
        let (connection, early) = match self.shared.handshake() {
            Ok(connected) => connected,
            Err(e) => {
                self.shared.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };
        self.shared.set_connected(connection);

        let shared = self.shared.clone();
        workers.reader = Some(thread::spawn(move || shared.run_reader(inbox, early)));
        if workers.writer.is_none() {
            let shared = self.shared.clone();
            workers.writer = Some(thread::spawn(move || shared.run_writer()));
        }
        Ok(())
    }

    /// Sends `data` to every recipient and waits until the relay has
    /// acknowledged each frame. Returns the first error encountered.
    pub fn send(&self, recipients: &[String], kind: &str, data: &[u8]) -> TransportResult<()> {
        let mut waiting = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            let (tx, rx) = mpsc::sync_channel(1);
            let frame = self.message_frame(recipient, kind, data);
            let id = frame.id().to_string();
            self.enqueue(kind, frame, Responder::Waiter(tx))?;
            waiting.push((id, rx));
        }

        let deadline = Instant::now() + Duration::from_millis(self.shared.config.ack_timeout_ms);
        let mut first_error = None;
        for (id, rx) in waiting {
            let result = match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                Ok(result) => result,
                Err(RecvTimeoutError::Timeout) => {
                    self.shared.pending.lock().remove(&id);
                    Err(NetworkError::Timeout)
                }
                Err(RecvTimeoutError::Disconnected) => Err(NetworkError::Closed),
            };
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Queues `data` for every recipient and returns immediately. `callback`
    /// runs once per frame, on its own thread, with the relay's response.
    pub fn send_async<F>(&self, recipients: &[String], kind: &str, data: &[u8], callback: F) -> TransportResult<()>
    where
        F: Fn(TransportResult<()>) + Send + Sync + 'static,
    {
        let callback: SendCallback = Arc::new(callback);
        for recipient in recipients {
            let frame = self.message_frame(recipient, kind, data);
            self.enqueue(kind, frame, Responder::Callback(callback.clone()))?;
        }
        Ok(())
    }

    /// Blocks until the next inbound message. Fails with
    /// [`NetworkError::Closed`] once the transport has shut down.
    pub fn receive(&self) -> TransportResult<Inbound> {
        self.inbox.lock().recv().map_err(|_| NetworkError::Closed)
    }

    /// Shuts down: fails queued and unacknowledged sends, stops both
    /// threads, closes the connection and drains the inbox. Idempotent.
    pub fn close(&self) {
        if self.shared.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Closing transport");
        self.shared.set_state(ConnectionState::Closing);

        self.shared.fail_queued();
        let _ = self.shared.queue.push(CLASS_CLOSE, Outbound::Close);
        let connection = self.shared.link.lock().connection.take();
        if let Some(connection) = connection {
            connection.close();
        }
        self.shared.queue.close();
        self.shared.link_changed.notify_all();

        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in [workers.reader, workers.writer].into_iter().flatten() {
            let _ = worker.join();
        }

        self.shared.fail_queued();
        self.shared.fail_pending(NetworkError::Closed);
        self.inbox_tx.lock().take();
        if let Some(inbox) = self.inbox.try_lock() {
            while inbox.try_recv().is_ok() {}
        }
        self.shared.set_state(ConnectionState::Disconnected);
        info!("Transport closed");
    }

    fn message_frame(&self, recipient: &str, kind: &str, data: &[u8]) -> Frame {
        Frame::Message(MessageFrame {
            id: uuid::Uuid::new_v4().to_string(),
            kind: kind.to_string(),
            sender: self.shared.config.device.clone(),
            recipient: recipient.to_string(),
            ciphertext: data.to_vec(),
            priority: self.shared.config.priority(kind) as u8,
            offset: 0,
            timestamp: crate::clock::unix_now(),
        })
    }

    fn enqueue(&self, kind: &str, frame: Frame, responder: Responder) -> TransportResult<()> {
        if self.shared.is_shutdown() {
            return Err(NetworkError::Closed);
        }
        let outbound = Outbound::Frame {
            frame,
            responder: Some(responder),
        };
        self.shared
            .queue
            .push(self.shared.config.priority(kind), outbound)
            .map_err(|_| NetworkError::Closed)
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}

impl Shared {
    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: ConnectionState) {
        self.link.lock().state = state;
        self.link_changed.notify_all();
    }

    fn set_connected(&self, connection: Arc<dyn Connection>) {
        {
            let mut link = self.link.lock();
            link.state = ConnectionState::Connected;
            link.connection = Some(connection);
            link.failure = None;
        }
        self.link_changed.notify_all();
        info!("Connected to {} as {}", self.config.url, self.config.device);

        let hook = self.on_connect.read().clone();
        if let Some(hook) = hook {
            hook();
        }
    }

    fn failure(&self) -> Option<NetworkError> {
        self.link.lock().failure.clone()
    }

    fn current_connection(&self) -> Option<Arc<dyn Connection>> {
        self.link.lock().connection.clone()
    }

    /// Dials and authenticates. Frames arriving before the acknowledgement
    /// are returned for normal handling.
    fn handshake(&self) -> TransportResult<(Arc<dyn Connection>, Vec<Frame>)> {
        let connection = self.dialer.dial(&self.config)?;
        match self.authenticate(connection.as_ref()) {
            Ok(early) => Ok((connection, early)),
            Err(e) => {
                connection.close();
                Err(e)
            }
        }
    }

    fn authenticate(&self, connection: &dyn Connection) -> TransportResult<Vec<Frame>> {
        let id = uuid::Uuid::new_v4().to_string();
        let offset = self.credentials.offset()?;
        connection.send(&Frame::Auth(AuthFrame {
            id: id.clone(),
            device: self.config.device.clone(),
            token: self.credentials.token()?,
            offset,
        }))?;
        debug!("Sent authentication for {} at offset {}", self.config.device, offset);

        let deadline = Instant::now() + Duration::from_millis(self.config.handshake_timeout_ms);
        let mut early = Vec::new();
        while Instant::now() < deadline {
            if self.is_shutdown() {
                return Err(NetworkError::Closed);
            }
            match connection.receive()? {
                Some(Frame::Ack { id: acked }) if acked == id => return Ok(early),
                Some(Frame::Error {
                    id: failed,
                    code,
                    message,
                }) if failed == id => {
                    return Err(if code == AUTH_REJECTED {
                        NetworkError::AuthenticationFailed(message)
                    } else {
                        NetworkError::Rejected { code, message }
                    });
                }
                Some(frame) => early.push(frame),
                None => {}
            }
        }
        Err(NetworkError::Timeout)
    }

    fn run_reader(&self, inbox: SyncSender<Inbound>, early: Vec<Frame>) {
        for frame in early {
            self.handle_frame(frame, &inbox);
        }

        while !self.is_shutdown() {
            let Some(connection) = self.current_connection() else {
                break;
            };
            match connection.receive() {
                Ok(Some(frame)) => self.handle_frame(frame, &inbox),
                Ok(None) => {}
                Err(NetworkError::InvalidMessage(reason)) => {
                    warn!("Dropping undecodable frame: {}", reason);
                }
                Err(e) => {
                    if self.is_shutdown() {
                        break;
                    }
                    self.connection_lost(connection.as_ref(), &e);
                    if e.is_permanent() {
                        self.give_up(e);
                        break;
                    }
                    match self.reconnect() {
                        Some(early) => {
                            for frame in early {
                                self.handle_frame(frame, &inbox);
                            }
                        }
                        None => break,
                    }
                }
            }
        }
        debug!("Transport reader stopped");
    }

    fn run_writer(&self) {
        while let Some(item) = self.queue.pop() {
            let (frame, responder) = match item {
                Outbound::Close => break,
                Outbound::Frame { frame, responder } => (frame, responder),
            };

            let connection = match self.wait_for_connection() {
                Ok(connection) => connection,
                Err(e) => {
                    if let Some(responder) = responder {
                        responder.respond(Err(e));
                    }
                    continue;
                }
            };

            let id = frame.id().to_string();
            if let Some(responder) = responder {
                self.pending.lock().insert(id.clone(), responder);
            }
            if let Err(e) = connection.send(&frame) {
                warn!("Failed to send frame {}: {}", id, e);
                let responder = self.pending.lock().remove(&id);
                if let Some(responder) = responder {
                    responder.respond(Err(e));
                }
                // The reader notices the closed connection and reconnects
                connection.close();
            }
        }
        debug!("Transport writer stopped");
    }

    fn wait_for_connection(&self) -> TransportResult<Arc<dyn Connection>> {
        let poll = Duration::from_millis(self.config.poll_interval_ms);
        let mut link = self.link.lock();
        loop {
            if self.is_shutdown() {
                return Err(NetworkError::Closed);
            }
            if let Some(failure) = &link.failure {
                return Err(failure.clone());
            }
            if link.state == ConnectionState::Connected {
                if let Some(connection) = &link.connection {
                    return Ok(connection.clone());
                }
            }
            self.link_changed.wait_for(&mut link, poll);
        }
    }

    fn handle_frame(&self, frame: Frame, inbox: &SyncSender<Inbound>) {
        match frame {
            Frame::Ack { id } => {
                let responder = self.pending.lock().remove(&id);
                if let Some(responder) = responder {
                    responder.respond(Ok(()));
                }
            }
            Frame::Error { id, code, message } => {
                warn!("Relay rejected frame {} ({}): {}", id, code, message);
                let responder = self.pending.lock().remove(&id);
                if let Some(responder) = responder {
                    responder.respond(Err(NetworkError::Rejected { code, message }));
                }
            }
            Frame::Ping { id } => {
                let pong = Outbound::Frame {
                    frame: Frame::Pong { id },
                    responder: None,
                };
                if self.queue.push(CLASS_CONTROL, pong).is_err() {
                    debug!("Dropping pong, queue closed");
                }
            }
            Frame::Message(message) => self.deliver(inbox, message.into()),
            Frame::Pong { .. } | Frame::Auth(_) => {
                debug!("Ignoring unexpected {} frame", frame_type(&frame));
            }
        }
    }

    fn deliver(&self, inbox: &SyncSender<Inbound>, inbound: Inbound) {
        let mut item = inbound;
        loop {
            match inbox.try_send(item) {
                Ok(()) => return,
                Err(TrySendError::Full(back)) => {
                    if self.is_shutdown() {
                        return;
                    }
                    item = back;
                    thread::sleep(Duration::from_millis(1));
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }

    fn connection_lost(&self, connection: &dyn Connection, error: &NetworkError) {
        {
            let mut link = self.link.lock();
            if link.state != ConnectionState::Closing {
                link.state = ConnectionState::Disconnected;
            }
            link.connection = None;
        }
        self.link_changed.notify_all();
        connection.close();
        self.fail_pending(NetworkError::ConnectionClosed);
        warn!("Connection to {} lost: {}", self.config.url, error);

        let hook = self.on_disconnect.read().clone();
        if let Some(hook) = hook {
            hook(error);
        }
    }

    /// Retries with a fixed delay. Returns frames received during the
    /// handshake, or `None` if reconnecting was abandoned.
    fn reconnect(&self) -> Option<Vec<Frame>> {
        let max = self.config.max_reconnect_attempts;
        for attempt in 1..=max {
            if !self.pause(Duration::from_millis(self.config.reconnect_delay_ms)) {
                return None;
            }
            self.set_state(ConnectionState::Connecting);
            info!("Reconnecting to {} (attempt {}/{})", self.config.url, attempt, max);

            match self.handshake() {
                Ok((connection, early)) => {
                    if self.is_shutdown() {
                        connection.close();
                        return None;
                    }
                    self.set_connected(connection);
                    return Some(early);
                }
                Err(e) if e.is_permanent() => {
                    warn!("Reconnect rejected: {}", e);
                    self.give_up(e);
                    return None;
                }
                Err(e) => {
                    warn!("Reconnect attempt {} failed: {}", attempt, e);
                    self.set_state(ConnectionState::Disconnected);
                }
            }
        }
        self.give_up(NetworkError::MaxRetriesExceeded);
        None
    }

    /// Sleeps for `delay` unless shut down first. Returns false on shutdown.
    fn pause(&self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        let poll = Duration::from_millis(self.config.poll_interval_ms.max(1));
        loop {
            if self.is_shutdown() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(poll.min(deadline - now));
        }
    }

    fn give_up(&self, error: NetworkError) {
        warn!("Giving up on {}: {}", self.config.url, error);
        {
            let mut link = self.link.lock();
            link.state = ConnectionState::Disconnected;
            link.failure = Some(error);
        }
        self.link_changed.notify_all();
    }

    fn fail_pending(&self, error: NetworkError) {
        let pending: Vec<Responder> = self.pending.lock().drain().map(|(_, r)| r).collect();
        for responder in pending {
            responder.respond(Err(error.clone()));
        }
    }

    fn fail_queued(&self) {
        for class in 0..QUEUE_CLASSES {
            for item in self.queue.flush(class) {
                item.fail(NetworkError::Closed);
            }
        }
    }
}

fn frame_type(frame: &Frame) -> &'static str {
    match frame {
        Frame::Auth(_) => "auth",
        Frame::Message(_) => "message",
        Frame::Ack { .. } => "ack",
        Frame::Error { .. } => "error",
        Frame::Ping { .. } => "ping",
        Frame::Pong { .. } => "pong",
    }
}
