// WebSocket acceptor: remote proxies run the whole WCP exchange on the
// socket, after which the socket is their message port.

use tokio::net::TcpListener;

use crate::error::Result;
use crate::server::root::RootAgent;
use crate::transport::websocket::port_from_accepted_ws;

/// Accepts proxy connections until the listener fails. Spawn this next to
/// the root agent:
///
/// ```ignore
/// let listener = TcpListener::bind("127.0.0.1:4422").await?;
/// tokio::spawn(serve_ws(root.clone(), listener));
/// ```
pub async fn serve_ws(root: RootAgent, listener: TcpListener) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let root = root.clone();
        tokio::spawn(async move {
            match tokio_tungstenite::accept_async(stream).await {
                Ok(ws) => {
                    tracing::debug!(%peer, "proxy socket accepted");
                    root.attach_port(port_from_accepted_ws(ws));
                }
                Err(e) => tracing::warn!(%peer, "WebSocket handshake failed: {e}"),
            }
        });
    }
}
