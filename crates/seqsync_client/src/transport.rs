//! Transport abstraction for the client session.

use crate::client::EventSender;
use crate::error::{ClientError, ClientResult};
use parking_lot::Mutex;
use seqsync_protocol::HandshakeRequest;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// A duplex connection to the peer.
///
/// Inbound traffic is not pulled through this trait: the transport pushes
/// updates, resume replies and lifecycle notifications into the session
/// through an [`EventSender`]. This trait covers the calls the session
/// makes outward.
pub trait Transport: Send + Sync + 'static {
    /// Sends a handshake and waits for the peer's acknowledgement.
    ///
    /// The wait is bounded by the transport's own timeout.
    fn handshake(
        &self,
        request: HandshakeRequest,
    ) -> impl Future<Output = ClientResult<bool>> + Send;

    /// Opens the connection.
    fn connect(&self) -> impl Future<Output = ClientResult<()>> + Send;

    /// Closes the connection.
    fn disconnect(&self) -> impl Future<Output = ClientResult<()>> + Send;
}

/// A mock transport for testing.
///
/// Once [`attach`](Self::attach)ed, `connect` and `disconnect` report the
/// matching lifecycle events to the session.
#[derive(Debug)]
pub struct MockTransport {
    accept: AtomicBool,
    failure: Mutex<Option<String>>,
    requests: Mutex<Vec<HandshakeRequest>>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    events: Mutex<Option<EventSender>>,
}

impl MockTransport {
    /// Creates a transport that accepts every handshake.
    pub fn new() -> Self {
        Self {
            accept: AtomicBool::new(true),
            failure: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            events: Mutex::new(None),
        }
    }

    /// Sets the acknowledgement returned by handshakes.
    pub fn set_accept(&self, accept: bool) {
        self.accept.store(accept, Ordering::SeqCst);
    }

    /// Makes every later handshake fail with a transport error.
    pub fn fail_handshakes(&self, message: impl Into<String>) {
        *self.failure.lock() = Some(message.into());
    }

    /// Reports lifecycle events to a session.
    pub fn attach(&self, sender: EventSender) {
        *self.events.lock() = Some(sender);
    }

    /// Returns every handshake request received.
    pub fn requests(&self) -> Vec<HandshakeRequest> {
        self.requests.lock().clone()
    }

    /// Returns the number of `connect` calls.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Returns the number of `disconnect` calls.
    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    fn sender(&self) -> Option<EventSender> {
        self.events.lock().clone()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockTransport {
    async fn handshake(&self, request: HandshakeRequest) -> ClientResult<bool> {
        self.requests.lock().push(request);
        if let Some(message) = self.failure.lock().clone() {
            return Err(ClientError::transport_retryable(message));
        }
        Ok(self.accept.load(Ordering::SeqCst))
    }

    async fn connect(&self) -> ClientResult<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match self.sender() {
            Some(sender) => sender.connected(),
            None => Ok(()),
        }
    }

    async fn disconnect(&self) -> ClientResult<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        match self.sender() {
            Some(sender) => sender.disconnected(),
            None => Ok(()),
        }
    }
}
