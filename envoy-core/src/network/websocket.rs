// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! WebSocket Connections
//!
//! [`Dialer`] over blocking tungstenite. Supports both native-tls and rustls
//! TLS backends. The socket read timeout equals the transport's poll
//! interval, so the reader periodically releases the socket to the writer.

use parking_lot::Mutex;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[cfg(all(feature = "network-native-tls", not(feature = "network-rustls")))]
use native_tls::TlsConnector;

#[cfg(feature = "network-rustls")]
use rustls::pki_types::ServerName;

use tungstenite::client::IntoClientRequest;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

use super::connection::{Connection, Dialer, TransportResult};
use super::error::NetworkError;
use super::frame::{decode_frame, encode_frame, Frame};
use super::transport::TransportConfig;

/// Opens WebSocket connections (ws:// or wss://) to the relay.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketDialer;

impl WebSocketDialer {
    /// Parses a WebSocket URL into host, port and TLS flag.
    fn parse_url(url: &str) -> Result<(String, u16, bool), NetworkError> {
        let is_tls = url.starts_with("wss://");
        let url_without_scheme = url
            .strip_prefix("wss://")
            .or_else(|| url.strip_prefix("ws://"))
            .ok_or_else(|| {
                NetworkError::ConnectionFailed("Invalid URL scheme (expected ws:// or wss://)".into())
            })?;

        let host_port = url_without_scheme
            .split('/')
            .next()
            .unwrap_or(url_without_scheme);

        let (host, port) = match host_port.rsplit_once(':') {
            Some((host, port)) => {
                let port: u16 = port
                    .parse()
                    .map_err(|_| NetworkError::ConnectionFailed(format!("Invalid port: {}", port)))?;
                (host.to_string(), port)
            }
            None => (host_port.to_string(), if is_tls { 443 } else { 80 }),
        };

        if host.is_empty() {
            return Err(NetworkError::ConnectionFailed("Missing host".into()));
        }
        Ok((host, port, is_tls))
    }

    #[cfg(all(feature = "network-native-tls", not(feature = "network-rustls")))]
    fn create_tls_stream(host: &str, tcp_stream: TcpStream) -> Result<MaybeTlsStream<TcpStream>, NetworkError> {
        let connector =
            TlsConnector::new().map_err(|e| NetworkError::ConnectionFailed(format!("TLS error: {}", e)))?;
        let tls_stream = connector
            .connect(host, tcp_stream)
            .map_err(|e| NetworkError::ConnectionFailed(format!("TLS handshake failed: {}", e)))?;
        Ok(MaybeTlsStream::NativeTls(tls_stream))
    }

    #[cfg(feature = "network-rustls")]
    fn create_tls_stream(host: &str, tcp_stream: TcpStream) -> Result<MaybeTlsStream<TcpStream>, NetworkError> {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        let server_name: ServerName<'_> = host
            .try_into()
            .map_err(|_| NetworkError::ConnectionFailed(format!("Invalid server name: {}", host)))?;

        let tls_conn = rustls::ClientConnection::new(Arc::new(config), server_name.to_owned())
            .map_err(|e| NetworkError::ConnectionFailed(format!("TLS setup failed: {}", e)))?;

        Ok(MaybeTlsStream::Rustls(rustls::StreamOwned::new(tls_conn, tcp_stream)))
    }
}

impl Dialer for WebSocketDialer {
    fn dial(&self, config: &TransportConfig) -> TransportResult<Arc<dyn Connection>> {
        let (host, port, is_tls) = Self::parse_url(&config.url)?;

        let addr = (host.as_str(), port)
            .to_socket_addrs()
            .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?
            .next()
            .ok_or_else(|| NetworkError::ConnectionFailed(format!("No address for {}", host)))?;

        let tcp_stream = TcpStream::connect_timeout(&addr, Duration::from_millis(config.connect_timeout_ms))
            .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;
        tcp_stream
            .set_read_timeout(Some(Duration::from_millis(config.poll_interval_ms.max(1))))
            .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;
        tcp_stream
            .set_write_timeout(Some(Duration::from_millis(config.connect_timeout_ms)))
            .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;

        let stream = if is_tls {
            Self::create_tls_stream(&host, tcp_stream)?
        } else {
            MaybeTlsStream::Plain(tcp_stream)
        };

        let request = config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| NetworkError::ConnectionFailed(format!("Invalid WebSocket request: {}", e)))?;

        let (socket, _response) = tungstenite::client(request, stream)
            .map_err(|e| NetworkError::ConnectionFailed(format!("WebSocket handshake failed: {}", e)))?;

        Ok(Arc::new(WebSocketConnection {
            socket: Mutex::new(socket),
            closed: AtomicBool::new(false),
        }))
    }
}

/// A live WebSocket connection carrying binary frames.
pub struct WebSocketConnection {
    socket: Mutex<WebSocket<MaybeTlsStream<TcpStream>>>,
    closed: AtomicBool,
}

impl Connection for WebSocketConnection {
    fn send(&self, frame: &Frame) -> TransportResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(NetworkError::ConnectionClosed);
        }
        let encoded = encode_frame(frame)?;
        self.socket
            .lock()
            .send(Message::Binary(encoded))
            .map_err(|e| match e {
                tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                    NetworkError::ConnectionClosed
                }
                e => NetworkError::SendFailed(e.to_string()),
            })
    }

    fn receive(&self) -> TransportResult<Option<Frame>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(NetworkError::ConnectionClosed);
        }
        let mut socket = self.socket.lock();
        match socket.read() {
            Ok(Message::Binary(data)) => decode_frame(&data).map(Some),
            // tungstenite queues the pong reply itself
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => Ok(None),
            Ok(Message::Close(_)) => Err(NetworkError::ConnectionClosed),
            Ok(Message::Text(_)) => Err(NetworkError::InvalidMessage("Unexpected text message".into())),
            Err(tungstenite::Error::Io(ref e))
                if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Ok(None)
            }
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                Err(NetworkError::ConnectionClosed)
            }
            Err(e) => Err(NetworkError::ReceiveFailed(e.to_string())),
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut socket = self.socket.lock();
        let _ = socket.close(None);
        let _ = socket.flush();
    }
}

// INLINE_TEST_REQUIRED: Tests private parse_url function for URL parsing logic
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_url_wss() {
        let (host, port, is_tls) = WebSocketDialer::parse_url("wss://relay.example.com").unwrap();
        assert_eq!(host, "relay.example.com");
        assert_eq!(port, 443);
        assert!(is_tls);
    }

    #[test]
    fn test_parse_url_ws_with_path() {
        let (host, port, is_tls) = WebSocketDialer::parse_url("ws://localhost:8080/relay").unwrap();
        assert_eq!(host, "localhost");
        assert_eq!(port, 8080);
        assert!(!is_tls);
    }

    #[test]
    fn test_parse_url_rejects_bad_input() {
        assert!(WebSocketDialer::parse_url("http://example.com").is_err());
        assert!(WebSocketDialer::parse_url("ws://host:notaport").is_err());
        assert!(WebSocketDialer::parse_url("ws://:80").is_err());
    }

    #[test]
    fn test_dial_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = TransportConfig::new(&format!("ws://127.0.0.1:{}", port), "alice:phone");
        assert!(matches!(
            WebSocketDialer.dial(&config),
            Err(NetworkError::ConnectionFailed(_))
        ));
    }
}
