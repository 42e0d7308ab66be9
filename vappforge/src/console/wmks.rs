//! WebMKS console client.
//!
//! The console proxy speaks RFB over a `binary`-subprotocol websocket. After
//! the 3.x handshake, keyboard input is sent as 8-byte WMKS client messages.
//! The socket is abstracted behind `ConsoleSocket` so the handshake and
//! framing can be exercised against a scripted transcript.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};

use crate::console::scancodes;
use crate::driver::types::MksTicket;
use crate::errors::{ForgeError, ForgeResult};
use crate::pipeline::cancel::CancelToken;

/// WMKS client-message marker for binary frames.
const MSG_CLIENT: u8 = 127;
/// Sub-opcode of the 8-byte key event.
const MSG_KEY_EVENT: u8 = 0;

/// Message-oriented transport to the console proxy.
#[async_trait]
pub trait ConsoleSocket: Send {
    async fn send(&mut self, frame: Vec<u8>) -> ForgeResult<()>;
    async fn recv(&mut self) -> ForgeResult<Vec<u8>>;
    async fn close(&mut self) -> ForgeResult<()>;
}

/// The production transport: a TLS websocket to the console proxy.
pub struct WebSocketConsole {
    inner: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
}

/// Dial the console proxy named by `ticket`.
pub async fn connect(ticket: &MksTicket, insecure: bool) -> ForgeResult<WebSocketConsole> {
    let url = ticket.websocket_url();
    let host = ticket
        .host
        .split(':')
        .next()
        .unwrap_or(ticket.host.as_str())
        .to_string();

    let mut request = url
        .clone()
        .into_client_request()
        .map_err(|e| ForgeError::Protocol(format!("bad console URL {url}: {e}")))?;
    request.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        HeaderValue::from_static("binary"),
    );
    let origin = format!("https://{host}");
    request.headers_mut().insert(
        "Origin",
        HeaderValue::from_str(&origin)
            .map_err(|e| ForgeError::Protocol(format!("bad console host {host}: {e}")))?,
    );

    let connector = if insecure {
        let tls = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()
            .map_err(|e| ForgeError::Protocol(format!("TLS setup failed: {e}")))?;
        Some(Connector::NativeTls(tls))
    } else {
        None
    };

    let (stream, response) =
        tokio_tungstenite::connect_async_tls_with_config(request, None, false, connector)
            .await
            .map_err(|e| {
                ForgeError::Protocol(format!("failed to connect to console at {url}: {e}"))
            })?;
    tracing::debug!(status = %response.status(), url = %url, "console websocket connected");

    Ok(WebSocketConsole { inner: stream })
}

#[async_trait]
impl ConsoleSocket for WebSocketConsole {
    async fn send(&mut self, frame: Vec<u8>) -> ForgeResult<()> {
        self.inner
            .send(Message::Binary(frame))
            .await
            .map_err(|e| ForgeError::Protocol(format!("console send failed: {e}")))
    }

    async fn recv(&mut self) -> ForgeResult<Vec<u8>> {
        loop {
            let msg = self
                .inner
                .next()
                .await
                .ok_or_else(|| ForgeError::Protocol("console closed during handshake".into()))?
                .map_err(|e| ForgeError::Protocol(format!("console receive failed: {e}")))?;
            match msg {
                Message::Binary(data) => return Ok(data),
                Message::Text(data) => return Ok(data.into_bytes()),
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
                Message::Close(_) => {
                    return Err(ForgeError::Protocol("console closed the connection".into()))
                }
            }
        }
    }

    async fn close(&mut self) -> ForgeResult<()> {
        let _ = self.inner.close(None).await;
        Ok(())
    }
}

/// Encode one key event as the 8-byte WMKS frame.
pub fn key_event_frame(scan_code: u16, down: bool) -> [u8; 8] {
    [
        MSG_CLIENT,
        MSG_KEY_EVENT,
        0,
        8,
        (scan_code >> 8) as u8,
        (scan_code & 0xFF) as u8,
        u8::from(down),
        0,
    ]
}

/// A connected console with keyboard input.
pub struct WmksClient<S: ConsoleSocket> {
    socket: S,
    key_interval: Duration,
    cancel: CancelToken,
}

impl<S: ConsoleSocket> WmksClient<S> {
    pub fn new(socket: S, key_interval: Duration, cancel: CancelToken) -> WmksClient<S> {
        WmksClient {
            socket,
            key_interval,
            cancel,
        }
    }

    /// Complete the RFB 3.x negotiation.
    ///
    /// The server version is echoed back verbatim, security type 1 (None) is
    /// preferred over anything else offered, and ServerInit is read and
    /// discarded.
    pub async fn handshake(&mut self) -> ForgeResult<()> {
        let version = self.socket.recv().await?;
        if version.len() < 12 || &version[..4] != b"RFB " {
            return Err(ForgeError::Protocol(format!(
                "unexpected RFB server version: {:?}",
                String::from_utf8_lossy(&version)
            )));
        }
        self.socket.send(version.clone()).await?;

        let security = self.socket.recv().await?;
        let count = *security
            .first()
            .ok_or_else(|| ForgeError::Protocol("empty security-type list".into()))?
            as usize;
        if count == 0 {
            return Err(ForgeError::Protocol(
                "console refused the connection during security negotiation".into(),
            ));
        }
        let offered = &security[1..security.len().min(1 + count)];
        if offered.is_empty() {
            return Err(ForgeError::Protocol("truncated security-type list".into()));
        }
        let selected = if offered.contains(&1) { 1 } else { offered[0] };
        self.socket.send(vec![selected]).await?;

        if selected != 1 {
            let result = self.socket.recv().await?;
            if result.len() >= 4 && result[..4] != [0, 0, 0, 0] {
                return Err(ForgeError::Protocol(
                    "console rejected security negotiation".into(),
                ));
            }
        }

        // ClientInit: shared session.
        self.socket.send(vec![1]).await?;

        // ServerInit carries framebuffer details we do not need.
        let _ = self.socket.recv().await?;

        tracing::debug!(security_type = selected, "RFB handshake complete");
        Ok(())
    }

    pub async fn send_key_event(&mut self, scan_code: u16, down: bool) -> ForgeResult<()> {
        self.cancel.check()?;
        self.socket
            .send(key_event_frame(scan_code, down).to_vec())
            .await
    }

    /// Press and release a key with the configured interval between.
    pub async fn send_key(&mut self, scan_code: u16) -> ForgeResult<()> {
        self.send_key_event(scan_code, true).await?;
        self.cancel.sleep(self.key_interval).await?;
        self.send_key_event(scan_code, false).await
    }

    /// Type a string character by character, wrapping shifted characters in
    /// a left-shift press/release. Unknown characters are skipped.
    pub async fn send_string(&mut self, s: &str) -> ForgeResult<()> {
        for c in s.chars() {
            let Some((code, shift)) = scancodes::char_code(c) else {
                tracing::warn!(character = %c.escape_default(), "no scan code; skipping");
                continue;
            };
            if shift {
                self.send_key_event(scancodes::LSHIFT, true).await?;
                self.cancel.sleep(self.key_interval).await?;
            }
            self.send_key(code).await?;
            if shift {
                self.cancel.sleep(self.key_interval).await?;
                self.send_key_event(scancodes::LSHIFT, false).await?;
            }
            self.cancel.sleep(self.key_interval).await?;
        }
        Ok(())
    }

    pub async fn close(&mut self) -> ForgeResult<()> {
        self.socket.close().await
    }
}
