// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! In-Memory Relay
//!
//! A [`Dialer`] whose connections talk to an in-process relay. The relay
//! keeps a mailbox per device, assigns per-recipient offsets, replays from
//! the resume offset on authentication and lets tests drop connections,
//! refuse dials, reject authentication, send pings and push undecodable
//! bytes. Frames travel encoded, as on a socket.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::connection::{Connection, Credentials, Dialer, TransportResult};
use super::error::NetworkError;
use super::frame::{decode_frame, encode_frame, Frame, MessageFrame, AUTH_REJECTED};
use super::transport::TransportConfig;

struct Peer {
    device: Option<String>,
    outbox: Sender<Vec<u8>>,
    closed: Arc<AtomicBool>,
}

fn post(outbox: &Sender<Vec<u8>>, frame: Frame) {
    match encode_frame(&frame) {
        Ok(bytes) => {
            let _ = outbox.send(bytes);
        }
        Err(e) => debug!("Relay cannot encode frame {}: {}", frame.id(), e),
    }
}

#[derive(Default)]
struct RelayState {
    next_connection: u64,
    peers: HashMap<u64, Peer>,
    mailboxes: HashMap<String, Vec<MessageFrame>>,
    auth_offsets: HashMap<String, Vec<u64>>,
    pongs: HashMap<String, usize>,
    reject_auth: bool,
    refuse_dials: bool,
    dials: usize,
}

/// In-process relay. Clones share the same state.
#[derive(Clone, Default)]
pub struct MemoryRelay {
    state: Arc<Mutex<RelayState>>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every live connection, as if the relay restarted.
    pub fn disconnect_all(&self) {
        let peers: Vec<Peer> = self.state.lock().peers.drain().map(|(_, p)| p).collect();
        for peer in peers {
            peer.closed.store(true, Ordering::SeqCst);
        }
    }

    /// Makes new dials fail until reset.
    pub fn set_refuse_dials(&self, refuse: bool) {
        self.state.lock().refuse_dials = refuse;
    }

    /// Answers authentication with a permanent rejection until reset.
    pub fn set_reject_auth(&self, reject: bool) {
        self.state.lock().reject_auth = reject;
    }

    /// Sends a ping to every connection of `device`.
    pub fn ping(&self, device: &str) {
        let state = self.state.lock();
        for peer in state.peers.values() {
            if peer.device.as_deref() == Some(device) {
                post(
                    &peer.outbox,
                    Frame::Ping {
                        id: uuid::Uuid::new_v4().to_string(),
                    },
                );
            }
        }
    }

    /// Pushes raw bytes to every connection of `device`.
    pub fn send_raw(&self, device: &str, bytes: &[u8]) {
        let state = self.state.lock();
        for peer in state.peers.values() {
            if peer.device.as_deref() == Some(device) {
                let _ = peer.outbox.send(bytes.to_vec());
            }
        }
    }

    /// Pongs received from `device`.
    pub fn pong_count(&self, device: &str) -> usize {
        self.state.lock().pongs.get(device).copied().unwrap_or(0)
    }

    /// Resume offsets `device` authenticated with, in order.
    pub fn auth_offsets(&self, device: &str) -> Vec<u64> {
        self.state
            .lock()
            .auth_offsets
            .get(device)
            .cloned()
            .unwrap_or_default()
    }

    /// Messages stored for `device`.
    pub fn mailbox(&self, device: &str) -> Vec<MessageFrame> {
        self.state
            .lock()
            .mailboxes
            .get(device)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of dial attempts, refused ones included.
    pub fn dial_count(&self) -> usize {
        self.state.lock().dials
    }

    /// Number of authenticated live connections.
    pub fn connected_count(&self) -> usize {
        self.state
            .lock()
            .peers
            .values()
            .filter(|p| p.device.is_some())
            .count()
    }

    fn handle(&self, connection: u64, frame: Frame) {
        let mut state = self.state.lock();
        let Some(peer) = state.peers.get(&connection) else {
            return;
        };
        let outbox = peer.outbox.clone();
        let device = peer.device.clone();

        match frame {
            Frame::Auth(auth) => {
                state
                    .auth_offsets
                    .entry(auth.device.clone())
                    .or_default()
                    .push(auth.offset);
                if state.reject_auth {
                    post(
                        &outbox,
                        Frame::Error {
                            id: auth.id,
                            code: AUTH_REJECTED,
                            message: "authentication rejected".into(),
                        },
                    );
                    return;
                }
                if let Some(peer) = state.peers.get_mut(&connection) {
                    peer.device = Some(auth.device.clone());
                }
                post(&outbox, Frame::Ack { id: auth.id });

                let backlog = state
                    .mailboxes
                    .get(&auth.device)
                    .map(|mailbox| {
                        mailbox
                            .iter()
                            .filter(|m| m.offset > auth.offset)
                            .cloned()
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default();
                debug!("Replaying {} messages to {}", backlog.len(), auth.device);
                for message in backlog {
                    post(&outbox, Frame::Message(message));
                }
            }
            Frame::Message(mut message) => {
                let Some(sender) = device else {
                    post(
                        &outbox,
                        Frame::Error {
                            id: message.id,
                            code: AUTH_REJECTED,
                            message: "not authenticated".into(),
                        },
                    );
                    return;
                };
                let id = message.id.clone();
                let mailbox = state.mailboxes.entry(message.recipient.clone()).or_default();
                message.offset = mailbox.last().map_or(1, |m| m.offset + 1);
                message.sender = sender;
                mailbox.push(message.clone());

                post(&outbox, Frame::Ack { id });
                for peer in state.peers.values() {
                    if peer.device.as_deref() == Some(message.recipient.as_str()) {
                        post(&peer.outbox, Frame::Message(message.clone()));
                    }
                }
            }
            Frame::Pong { .. } => {
                if let Some(device) = device {
                    *state.pongs.entry(device).or_default() += 1;
                }
            }
            Frame::Ping { id } => {
                post(&outbox, Frame::Pong { id });
            }
            Frame::Ack { .. } | Frame::Error { .. } => {}
        }
    }
}

impl Dialer for MemoryRelay {
    fn dial(&self, config: &TransportConfig) -> TransportResult<Arc<dyn Connection>> {
        let mut state = self.state.lock();
        state.dials += 1;
        if state.refuse_dials {
            return Err(NetworkError::ConnectionFailed("relay unreachable".into()));
        }

        let (outbox, inbox) = mpsc::channel();
        let closed = Arc::new(AtomicBool::new(false));
        let id = state.next_connection;
        state.next_connection += 1;
        state.peers.insert(
            id,
            Peer {
                device: None,
                outbox,
                closed: closed.clone(),
            },
        );

        Ok(Arc::new(MemoryConnection {
            relay: self.clone(),
            id,
            inbox: Mutex::new(inbox),
            closed,
            poll: Duration::from_millis(config.poll_interval_ms.max(1)),
        }))
    }
}

/// Client end of a [`MemoryRelay`] connection.
pub struct MemoryConnection {
    relay: MemoryRelay,
    id: u64,
    inbox: Mutex<Receiver<Vec<u8>>>,
    closed: Arc<AtomicBool>,
    poll: Duration,
}

impl Connection for MemoryConnection {
    fn send(&self, frame: &Frame) -> TransportResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(NetworkError::ConnectionClosed);
        }
        self.relay.handle(self.id, frame.clone());
        Ok(())
    }

    fn receive(&self) -> TransportResult<Option<Frame>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(NetworkError::ConnectionClosed);
        }
        match self.inbox.lock().recv_timeout(self.poll) {
            Ok(bytes) => decode_frame(&bytes).map(Some),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(NetworkError::ConnectionClosed),
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.relay.state.lock().peers.remove(&self.id);
    }
}

/// Credentials with a fixed token and a settable offset.
pub struct StaticCredentials {
    token: String,
    offset: AtomicU64,
}

impl StaticCredentials {
    pub fn new(token: &str, offset: u64) -> Self {
        StaticCredentials {
            token: token.to_string(),
            offset: AtomicU64::new(offset),
        }
    }

    pub fn set_offset(&self, offset: u64) {
        self.offset.store(offset, Ordering::SeqCst);
    }
}

impl Credentials for StaticCredentials {
    fn token(&self) -> TransportResult<String> {
        Ok(self.token.clone())
    }

    fn offset(&self) -> TransportResult<u64> {
        Ok(self.offset.load(Ordering::SeqCst))
    }
}
