//! Message transport.
//!
//! A [`MessagePort`] is one end of an entangled pair, with the semantics the
//! broker relies on: delivery in post order, non-blocking sends, and silent
//! failure once the far end is gone (subsequent deliveries simply cease).

pub mod websocket;

use serde_json::Value;
use tokio::sync::mpsc;

/// One end of an in-process message channel.
pub struct MessagePort {
    tx: mpsc::UnboundedSender<Value>,
    rx: mpsc::UnboundedReceiver<Value>,
}

impl MessagePort {
    /// Creates an entangled pair: anything posted on one end arrives, in
    /// order, on the other.
    pub fn pair() -> (MessagePort, MessagePort) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            MessagePort { tx: a_tx, rx: a_rx },
            MessagePort { tx: b_tx, rx: b_rx },
        )
    }

    /// Assembles a port from raw halves. Used by transports that pump a
    /// socket into a channel.
    pub fn from_halves(tx: mpsc::UnboundedSender<Value>, rx: mpsc::UnboundedReceiver<Value>) -> Self {
        Self { tx, rx }
    }

    /// Ships a message without waiting. A closed far end is not an error.
    pub fn post(&self, message: Value) {
        let _ = self.tx.send(message);
    }

    /// Next inbound message, or `None` once the far end is dropped.
    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }

    /// Splits into a cloneable sender and the owned receive half.
    pub fn split(self) -> (PortSender, PortReceiver) {
        (PortSender { tx: self.tx }, PortReceiver { rx: self.rx })
    }
}

/// Sending half of a port. Cheap to clone; held by the publisher per proxy.
#[derive(Clone)]
pub struct PortSender {
    tx: mpsc::UnboundedSender<Value>,
}

impl PortSender {
    pub fn post(&self, message: Value) {
        let _ = self.tx.send(message);
    }

    /// True once the receiving end has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half of a port.
pub struct PortReceiver {
    rx: mpsc::UnboundedReceiver<Value>,
}

impl PortReceiver {
    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }
}
