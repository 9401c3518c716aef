// Proxy-side connection: owns the message port, correlates responses to
// in-flight requests by request UUID, and fans every inbound frame to the
// registered response handlers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::protocol::envelope;
use crate::transport::{MessagePort, PortReceiver, PortSender};

type ResponseHandler = Box<dyn Fn(&Value) + Send + Sync>;

/// One proxy's view of its port.
///
/// `post` ships a frame and never waits. `request` ships a frame and awaits
/// the response carrying the same `meta.requestUuid`. Handlers registered
/// with [`add_response_handler`](Self::add_response_handler) see every
/// inbound response and event, with no id filtering; correlation beyond the
/// request/response pairing is up to the handler.
pub struct ProxyConnection {
    sender: PortSender,
    receiver: Mutex<Option<PortReceiver>>,
    callbacks: Mutex<HashMap<String, oneshot::Sender<Value>>>,
    handlers: Mutex<Vec<ResponseHandler>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for ProxyConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyConnection")
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ProxyConnection {
    pub fn new(port: MessagePort) -> Self {
        let (sender, receiver) = port.split();
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
            callbacks: Mutex::new(HashMap::new()),
            handlers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Fire-and-forget send. Delivery is best-effort; a closed port is
    /// silent.
    pub fn post(&self, message: Value) {
        self.sender.post(message);
    }

    /// Registers a callback invoked for every inbound response and event.
    pub fn add_response_handler(&self, handler: impl Fn(&Value) + Send + Sync + 'static) {
        self.handlers.lock().push(Box::new(handler));
    }

    /// Ships a request and awaits its response. There is no request-level
    /// timeout; the future resolves when the response arrives or errors
    /// when the port closes with the request still pending.
    pub async fn request(&self, message: Value) -> Result<Value> {
        let request_uuid = envelope::request_uuid(&message)
            .ok_or_else(|| Error::InvalidArgument("request frame has no requestUuid".into()))?
            .to_string();

        let (tx, rx) = oneshot::channel();
        self.callbacks.lock().insert(request_uuid.clone(), tx);
        // The close flag is raised before the run loop drops pending
        // callbacks, so a request racing the close either sees the flag or
        // has its callback dropped; both resolve to PortClosed.
        if self.closed.load(Ordering::SeqCst) {
            self.callbacks.lock().remove(&request_uuid);
            return Err(Error::PortClosed);
        }
        self.sender.post(message);
        rx.await.map_err(|_| Error::PortClosed)
    }

    /// Inbound pump. Call once, typically from a spawned task; returns when
    /// the port closes, failing any requests still awaiting a response.
    pub async fn run(&self) {
        let mut receiver = self
            .receiver
            .lock()
            .take()
            .expect("run() can only be called once");

        while let Some(message) = receiver.recv().await {
            if envelope::is_response_message(&message)
                && let Some(request_uuid) = envelope::request_uuid(&message)
                && let Some(callback) = self.callbacks.lock().remove(request_uuid)
            {
                let _ = callback.send(message.clone());
            }
            for handler in self.handlers.lock().iter() {
                handler(&message);
            }
        }

        tracing::debug!("message port closed, connection loop ended");
        self.closed.store(true, Ordering::SeqCst);
        self.callbacks.lock().clear();
    }
}
