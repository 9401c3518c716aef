// WebSocket-backed ports for proxies running outside the root's process.
// Text frames carry one JSON message each; a closed socket closes the port.

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::{Error, Result};
use crate::transport::MessagePort;

/// Connects to a remote desktop agent and returns the socket as a port.
pub async fn connect_ws(url: &str) -> Result<MessagePort> {
    let (stream, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| Error::Transport(format!("WebSocket connection failed: {e}")))?;
    Ok(port_from_ws(stream))
}

/// Bridges an established client socket to a [`MessagePort`].
pub fn port_from_ws(stream: WebSocketStream<MaybeTlsStream<TcpStream>>) -> MessagePort {
    bridge(stream)
}

/// Bridges an accepted server-side socket to a [`MessagePort`].
pub fn port_from_accepted_ws(stream: WebSocketStream<TcpStream>) -> MessagePort {
    bridge(stream)
}

fn bridge<S>(stream: WebSocketStream<S>) -> MessagePort
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut source) = stream.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Value>();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<Value>();

    // Writer: drain locally posted messages onto the socket.
    tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("unserializable outbound message: {e}");
                    continue;
                }
            };
            if let Err(e) = sink.send(WsMessage::Text(text.into())).await {
                tracing::debug!("WebSocket send failed, dropping port: {e}");
                break;
            }
        }
        // Local port dropped; tell the far end so its cleanup runs.
        let _ = sink.close().await;
    });

    // Reader: pump socket frames into the port until close.
    tokio::spawn(async move {
        while let Some(frame) = source.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => match serde_json::from_str::<Value>(&text) {
                    Ok(message) => {
                        if inbound_tx.send(message).is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!("dropping unparseable frame: {e}"),
                },
                Ok(WsMessage::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!("WebSocket read error, closing port: {e}");
                    break;
                }
            }
        }
    });

    MessagePort::from_halves(outbound_tx, inbound_rx)
}
