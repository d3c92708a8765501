// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Messaging Client
//!
//! Ties the session store to the transport. Outgoing content is encrypted
//! once for all recipients and sent as one frame per recipient. A reader
//! thread decrypts inbound frames and hands them to a waiting request or a
//! subscription. Frames that cannot be decrypted against an existing
//! session trigger a signed session-recovery frame back to the sender.
//!
//! # Example
//!
//! ```ignore
//! use envoy_core::api::{ClientBuilder, ClientConfig, Content};
//!
//! let client = ClientBuilder::new(address, seed)
//!     .resolver(resolver)
//!     .config(ClientConfig::new("wss://relay.example.com"))
//!     .build()?;
//!
//! client.subscribe("chat.message", |message| println!("{}", message.body));
//! client.send(&[bob], &Content::new("chat.message", json!({"text": "hi"})))?;
//! client.close();
//! ```

use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::config::ClientConfig;
use super::error::{ClientError, ClientResult};
use super::message::{Content, Message, WILDCARD};
use crate::crypto::token::{self, Claims};
use crate::crypto::{SeedKeys, SigningKeyPair};
use crate::network::{
    Credentials, Dialer, Inbound, NetworkError, Transport, TransportResult, KIND_MESSAGE,
    KIND_SESSION_RECOVERY,
};
use crate::pki::{DeviceAddress, KeyResolver};
use crate::storage::{SessionStore, StoreError};

/// Token type of transport authentication.
const AUTH_TOKEN_TYPE: &str = "auth";

/// Handler invoked with each routed message.
pub type Handler = Arc<dyn Fn(Message) + Send + Sync>;

type ConnectHook = Box<dyn Fn() + Send + Sync>;
type DisconnectHook = Box<dyn Fn(&NetworkError) + Send + Sync>;

/// Authenticates the transport with a fresh token and the offset last
/// committed by the store.
struct StoreCredentials {
    address: DeviceAddress,
    signer: Arc<SigningKeyPair>,
    store: Arc<SessionStore>,
    ttl_secs: i64,
}

impl Credentials for StoreCredentials {
    fn token(&self) -> TransportResult<String> {
        let claims = Claims::new(&self.address.identity, &self.address.device, self.ttl_secs)
            .with_type(AUTH_TOKEN_TYPE);
        token::issue(&self.signer, &claims)
            .map_err(|e| NetworkError::AuthenticationFailed(e.to_string()))
    }

    fn offset(&self) -> TransportResult<u64> {
        self.store
            .account_offset(&self.address)
            .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))
    }
}

/// Builds and connects a [`Client`].
pub struct ClientBuilder {
    address: DeviceAddress,
    seed: Zeroizing<[u8; 32]>,
    resolver: Option<Arc<dyn KeyResolver>>,
    dialer: Option<Arc<dyn Dialer>>,
    config: ClientConfig,
    on_connect: Option<ConnectHook>,
    on_disconnect: Option<DisconnectHook>,
}

impl ClientBuilder {
    /// Starts a builder for the device at `address`, whose keys derive from
    /// `seed`.
    pub fn new(address: DeviceAddress, seed: [u8; 32]) -> Self {
        ClientBuilder {
            address,
            seed: Zeroizing::new(seed),
            resolver: None,
            dialer: None,
            config: ClientConfig::default(),
            on_connect: None,
            on_disconnect: None,
        }
    }

    pub fn resolver(mut self, resolver: Arc<dyn KeyResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Overrides the WebSocket dialer.
    pub fn dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = Some(dialer);
        self
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Hook run after every successful (re)connect.
    pub fn on_connect<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_connect = Some(Box::new(hook));
        self
    }

    /// Hook run whenever the connection is lost.
    pub fn on_disconnect<F>(mut self, hook: F) -> Self
    where
        F: Fn(&NetworkError) + Send + Sync + 'static,
    {
        self.on_disconnect = Some(Box::new(hook));
        self
    }

    /// Opens the store, creates the account if needed, connects and starts
    /// the reader and key-refresh threads.
    pub fn build(self) -> ClientResult<Client> {
        let resolver = self
            .resolver
            .ok_or_else(|| ClientError::Configuration("no key resolver".into()))?;
        let dialer = match self.dialer {
            Some(dialer) => dialer,
            None => default_dialer()?,
        };
        let config = self.config;
        let address = self.address;

        let storage_key = SeedKeys::storage_key(&self.seed);
        let signing_seed = Zeroizing::new(SeedKeys::signing_seed(&self.seed));
        let signer = Arc::new(SigningKeyPair::from_seed(&signing_seed)?);

        let store = Arc::new(match &config.storage_path {
            Some(path) => SessionStore::open(path, storage_key, resolver.clone(), config.store.clone())?,
            None => SessionStore::in_memory(storage_key, resolver.clone(), config.store.clone())?,
        });
        store.account_create(&address, &self.seed)?;

        let mut transport_config = config.transport.clone();
        transport_config.device = address.to_string();
        let credentials = Arc::new(StoreCredentials {
            address: address.clone(),
            signer: signer.clone(),
            store: store.clone(),
            ttl_secs: config.auth_token_ttl_secs,
        });
        let transport = Transport::new(transport_config, dialer, credentials);
        if let Some(hook) = self.on_connect {
            transport.on_connect(hook);
        }
        if let Some(hook) = self.on_disconnect {
            transport.on_disconnect(move |error: &NetworkError| hook(error));
        }

        let inner = Arc::new(Inner {
            address,
            signer,
            store,
            resolver,
            transport,
            config,
            pending: Mutex::new(HashMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
            shutdown: AtomicBool::new(false),
            refresh_lock: Mutex::new(()),
            refresh_wake: Condvar::new(),
        });
        inner.transport.connect()?;

        let mut workers = Vec::with_capacity(2);
        let reader = inner.clone();
        workers.push(thread::spawn(move || reader.run_reader()));
        if inner.config.key_refresh_interval_ms > 0 {
            let refresher = inner.clone();
            workers.push(thread::spawn(move || refresher.run_key_refresh()));
        }
        info!("Client {} started", inner.address);

        Ok(Client {
            inner,
            workers: Mutex::new(workers),
        })
    }
}

#[cfg(any(feature = "network-native-tls", feature = "network-rustls"))]
fn default_dialer() -> ClientResult<Arc<dyn Dialer>> {
    Ok(Arc::new(crate::network::WebSocketDialer))
}

#[cfg(not(any(feature = "network-native-tls", feature = "network-rustls")))]
fn default_dialer() -> ClientResult<Arc<dyn Dialer>> {
    Err(ClientError::Configuration("no dialer configured".into()))
}

struct Inner {
    address: DeviceAddress,
    signer: Arc<SigningKeyPair>,
    store: Arc<SessionStore>,
    resolver: Arc<dyn KeyResolver>,
    transport: Transport,
    config: ClientConfig,
    /// Waiting requests by conversation id.
    pending: Mutex<HashMap<String, SyncSender<Message>>>,
    subscriptions: RwLock<HashMap<String, Handler>>,
    shutdown: AtomicBool,
    refresh_lock: Mutex<()>,
    refresh_wake: Condvar,
}

/// End-to-end encrypted messaging client for one device.
pub struct Client {
    inner: Arc<Inner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Client {
    pub fn address(&self) -> &DeviceAddress {
        &self.inner.address
    }

    /// The underlying session store.
    pub fn store(&self) -> &SessionStore {
        &self.inner.store
    }

    pub fn is_connected(&self) -> bool {
        self.inner.transport.is_connected()
    }

    /// Encrypts `content` for all recipients and waits until the relay has
    /// accepted every frame.
    pub fn send(&self, recipients: &[DeviceAddress], content: &Content) -> ClientResult<()> {
        self.inner.send(recipients, content)
    }

    /// Sends `content` and waits for the response carrying the same
    /// conversation id. A missing id is generated.
    pub fn request(
        &self,
        recipients: &[DeviceAddress],
        mut content: Content,
        timeout: Duration,
    ) -> ClientResult<Message> {
        let cid = content
            .cid
            .get_or_insert_with(|| uuid::Uuid::new_v4().to_string())
            .clone();

        let (tx, rx) = mpsc::sync_channel(1);
        {
            let mut pending = self.inner.pending.lock();
            if pending.contains_key(&cid) {
                return Err(ClientError::DuplicateRequest(cid));
            }
            pending.insert(cid.clone(), tx);
        }

        if let Err(e) = self.inner.send(recipients, &content) {
            self.inner.pending.lock().remove(&cid);
            return Err(e);
        }

        match rx.recv_timeout(timeout) {
            Ok(message) => Ok(message),
            Err(RecvTimeoutError::Timeout) => {
                self.inner.pending.lock().remove(&cid);
                debug!("Request {} timed out", cid);
                Err(ClientError::RequestTimeout)
            }
            Err(RecvTimeoutError::Disconnected) => Err(ClientError::Closed),
        }
    }

    /// Routes messages of type `typ` to `handler`, replacing any earlier
    /// handler. [`WILDCARD`] receives messages no other handler matches.
    pub fn subscribe<F>(&self, typ: &str, handler: F)
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        self.inner
            .subscriptions
            .write()
            .insert(typ.to_string(), Arc::new(handler));
    }

    pub fn unsubscribe(&self, typ: &str) -> bool {
        self.inner.subscriptions.write().remove(typ).is_some()
    }

    /// Closes the transport, stops all threads and fails waiting requests.
    /// Idempotent.
    pub fn close(&self) {
        if self.inner.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Closing client {}", self.inner.address);
        self.inner.transport.close();
        {
            let _guard = self.inner.refresh_lock.lock();
            self.inner.refresh_wake.notify_all();
        }

        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for worker in workers {
            let _ = worker.join();
        }
        self.inner.pending.lock().clear();
        self.inner.subscriptions.write().clear();
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}

impl Inner {
    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn send(&self, recipients: &[DeviceAddress], content: &Content) -> ClientResult<()> {
        if self.is_shutdown() {
            return Err(ClientError::Closed);
        }
        let plaintext = Zeroizing::new(content.to_bytes()?);
        let ciphertext = self.store.encrypt(&self.address, recipients, &plaintext)?;

        let mut seen = BTreeSet::new();
        let targets: Vec<String> = recipients
            .iter()
            .filter(|r| seen.insert(*r))
            .map(ToString::to_string)
            .collect();
        self.transport.send(&targets, KIND_MESSAGE, &ciphertext)?;
        Ok(())
    }

    fn run_reader(&self) {
        while let Ok(inbound) = self.transport.receive() {
            if self.is_shutdown() {
                break;
            }
            self.process(inbound);
        }
        debug!("Client reader stopped");
    }

    fn process(&self, inbound: Inbound) {
        let offset = inbound.offset;
        match self.store.account_offset(&self.address) {
            Ok(current) if offset <= current => {
                debug!("Skipping frame {} at offset {} (at {})", inbound.id, offset, current);
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Cannot read offset, dropping frame {}: {}", inbound.id, e);
                return;
            }
        }

        let sender: DeviceAddress = match inbound.sender.parse() {
            Ok(sender) => sender,
            Err(e) => {
                warn!("Dropping frame {} with bad sender {}: {}", inbound.id, inbound.sender, e);
                self.consume(offset);
                return;
            }
        };

        if inbound.kind == KIND_SESSION_RECOVERY {
            self.handle_recovery(&sender, &inbound);
            self.consume(offset);
            return;
        }

        match self.store.decrypt(&sender, &self.address, offset, &inbound.ciphertext) {
            Ok(plaintext) => self.dispatch(sender, &inbound, &plaintext),
            Err(StoreError::DecryptionFailed { .. }) => {
                self.request_recovery(&sender, &inbound.id);
                self.consume(offset);
            }
            Err(e) => {
                warn!("Dropping frame {} from {}: {}", inbound.id, sender, e);
                self.consume(offset);
            }
        }
    }

    /// Marks a frame as processed without a successful decrypt.
    fn consume(&self, offset: u64) {
        if let Err(e) = self.store.advance_offset(&self.address, offset) {
            warn!("Failed to advance offset to {}: {}", offset, e);
        }
    }

    fn dispatch(&self, sender: DeviceAddress, inbound: &Inbound, plaintext: &[u8]) {
        let content = match Content::from_bytes(plaintext) {
            Ok(content) => content,
            Err(e) => {
                warn!("Dropping malformed content in frame {}: {}", inbound.id, e);
                return;
            }
        };
        let message = Message {
            sender,
            id: inbound.id.clone(),
            offset: inbound.offset,
            typ: content.typ,
            cid: content.cid,
            body: content.body,
            timestamp: inbound.timestamp,
        };

        if let Some(cid) = &message.cid {
            let waiter = self.pending.lock().remove(cid);
            if let Some(waiter) = waiter {
                let _ = waiter.try_send(message);
                return;
            }
        }

        let handler = {
            let subscriptions = self.subscriptions.read();
            subscriptions
                .get(&message.typ)
                .or_else(|| subscriptions.get(WILDCARD))
                .cloned()
        };
        match handler {
            Some(handler) => {
                thread::spawn(move || handler(message));
            }
            None => debug!("No subscriber for {} message {}", message.typ, message.id),
        }
    }

    /// Asks `sender` to negotiate a new session after frame `frame_id`
    /// could not be decrypted.
    fn request_recovery(&self, sender: &DeviceAddress, frame_id: &str) {
        let claims = Claims::new(
            &self.address.identity,
            &self.address.device,
            self.config.recovery_token_ttl_secs,
        )
        .with_audience(&sender.to_string())
        .with_type(KIND_SESSION_RECOVERY)
        .with_reference(frame_id);
        let token = match token::issue(&self.signer, &claims) {
            Ok(token) => token,
            Err(e) => {
                warn!("Failed to issue recovery token: {}", e);
                return;
            }
        };

        info!("Requesting session recovery from {} for frame {}", sender, frame_id);
        let peer = sender.to_string();
        let result = self.transport.send_async(
            &[peer.clone()],
            KIND_SESSION_RECOVERY,
            token.as_bytes(),
            move |result| {
                if let Err(e) = result {
                    warn!("Recovery request to {} failed: {}", peer, e);
                }
            },
        );
        if let Err(e) = result {
            warn!("Failed to queue recovery request: {}", e);
        }
    }

    /// Verifies a recovery request and drops the session with its sender.
    fn handle_recovery(&self, sender: &DeviceAddress, inbound: &Inbound) {
        match self.verify_recovery(sender, &inbound.ciphertext) {
            Ok(claims) => match self.store.purge_session(&self.address, sender) {
                Ok(purged) => info!(
                    "Session with {} reset on request (frame {}, purged: {})",
                    sender,
                    claims.rid.as_deref().unwrap_or("-"),
                    purged
                ),
                Err(e) => warn!("Failed to purge session with {}: {}", sender, e),
            },
            Err(e) => warn!("Ignoring recovery frame {} from {}: {}", inbound.id, sender, e),
        }
    }

    fn verify_recovery(&self, sender: &DeviceAddress, data: &[u8]) -> ClientResult<Claims> {
        let token = std::str::from_utf8(data).map_err(|e| ClientError::Serialization(e.to_string()))?;

        let history = self
            .resolver
            .history(&sender.identity)
            .map_err(StoreError::from)?;
        let operation = history
            .active_device(&sender.device)
            .ok_or_else(|| StoreError::InactiveDevice(sender.to_string()))?;
        let claims = token::verify(token, &operation.signing_public_key(), crate::clock::unix_now())?;

        let audience = self.address.to_string();
        if claims.iss != sender.identity
            || claims.sub != sender.device
            || claims.aud.as_deref() != Some(audience.as_str())
            || claims.typ.as_deref() != Some(KIND_SESSION_RECOVERY)
        {
            return Err(ClientError::Token(token::TokenError::Malformed(
                "unexpected recovery claims".into(),
            )));
        }
        Ok(claims)
    }

    fn run_key_refresh(&self) {
        let interval = Duration::from_millis(self.config.key_refresh_interval_ms);
        loop {
            {
                let mut guard = self.refresh_lock.lock();
                if self.is_shutdown() {
                    break;
                }
                self.refresh_wake.wait_for(&mut guard, interval);
            }
            if self.is_shutdown() {
                break;
            }
            match self.store.refresh_one_time_keys(&self.address) {
                Ok(0) => {}
                Ok(published) => debug!("Published {} one-time keys", published),
                Err(e) => warn!("One-time key refresh failed: {}", e),
            }
        }
        debug!("Key refresh stopped");
    }
}
