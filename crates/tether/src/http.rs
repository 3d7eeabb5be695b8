//! Pseudo-adapters for request/response transports with no server push.
//!
//! The client side wraps a caller-supplied round-trip closure (request body
//! out, response body back); the server side queues incoming bodies into a
//! channel's read path and resolves each [`HttpServerBridge::handle_request`]
//! call when the channel writes the response with the matching id.
//!
//! Both sides advertise `bidirectional = false`: the server cannot initiate
//! calls, and the codec rejects callback arguments outright rather than
//! dropping them silently.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::adapter::{Adapter, AdapterMessage, Capabilities, Inbox, MessageHook};
use crate::error::RpcError;
use crate::message::{RpcMessage, WireEnvelope};

type RoundTripFuture = Pin<Box<dyn Future<Output = io::Result<String>> + Send>>;

fn client_capabilities() -> Capabilities {
    Capabilities {
        bidirectional: false,
        ..Capabilities::text()
    }
}

/// Client-side pseudo-adapter: each written request performs one round trip
/// and queues the returned frame for the read loop.
///
/// Writes serialize through the channel's writer task, so concurrent calls
/// issue one round trip at a time.
pub struct HttpClientAdapter {
    name: String,
    round_trip: Box<dyn Fn(String) -> RoundTripFuture + Send + Sync>,
    inbox: Arc<Inbox>,
}

impl HttpClientAdapter {
    pub fn new<F, Fut>(round_trip: F) -> Arc<Self>
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = io::Result<String>> + Send + 'static,
    {
        Arc::new(Self {
            name: "http-client".to_string(),
            round_trip: Box::new(move |body| Box::pin(round_trip(body))),
            inbox: Arc::new(Inbox::new()),
        })
    }
}

#[async_trait]
impl Adapter for HttpClientAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self) -> io::Result<Option<AdapterMessage>> {
        Ok(self.inbox.recv().await)
    }

    async fn write(&self, message: AdapterMessage) -> io::Result<()> {
        let AdapterMessage::Text(frame) = message else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "http adapter cannot carry structured envelopes",
            ));
        };
        let body = (self.round_trip)(frame).await?;
        for line in body.lines() {
            if line.trim().is_empty() {
                continue;
            }
            self.inbox.deliver(AdapterMessage::Text(line.to_string()));
        }
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        client_capabilities()
    }

    fn set_hook(&self, hook: Option<MessageHook>) -> bool {
        self.inbox.set_hook(hook);
        true
    }

    fn hook(&self) -> Option<MessageHook> {
        self.inbox.hook()
    }

    async fn destroy(&self) {
        self.inbox.close();
    }

    /// There is no peer-facing stream to signal; the server observes the
    /// end of traffic instead.
    async fn signal_destroy(&self) {}
}

/// Server-side pseudo-adapter plus its request entry point.
pub struct HttpServerBridge {
    adapter: Arc<HttpServerAdapter>,
}

pub struct HttpServerAdapter {
    name: String,
    inbox: Arc<Inbox>,
    waiting: Mutex<HashMap<String, oneshot::Sender<String>>>,
}

impl Default for HttpServerBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpServerBridge {
    pub fn new() -> Self {
        Self {
            adapter: Arc::new(HttpServerAdapter {
                name: "http-server".to_string(),
                inbox: Arc::new(Inbox::new()),
                waiting: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The adapter to hand to the serving channel.
    pub fn adapter(&self) -> Arc<HttpServerAdapter> {
        Arc::clone(&self.adapter)
    }

    /// Feeds one request body into the channel and resolves with the
    /// response body once the channel writes the matching id.
    pub async fn handle_request(&self, body: &str) -> Result<String, RpcError> {
        let frame = body.trim();
        let envelope = WireEnvelope::from_frame(frame)?;
        let RpcMessage::Request { id, .. } = envelope.message else {
            return Err(RpcError::protocol(
                "http server only accepts request messages",
            ));
        };

        let (tx, rx) = oneshot::channel();
        self.adapter
            .waiting
            .lock()
            .expect("http waiting lock")
            .insert(id, tx);
        self.adapter
            .inbox
            .deliver(AdapterMessage::Text(frame.to_string()));

        rx.await.map_err(|_| RpcError::ChannelTerminated)
    }
}

#[async_trait]
impl Adapter for HttpServerAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self) -> io::Result<Option<AdapterMessage>> {
        Ok(self.inbox.recv().await)
    }

    async fn write(&self, message: AdapterMessage) -> io::Result<()> {
        let AdapterMessage::Text(frame) = message else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "http adapter cannot carry structured envelopes",
            ));
        };
        let envelope = WireEnvelope::from_frame(&frame)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))?;
        let RpcMessage::Response { id, .. } = envelope.message else {
            // The transport has no path for server-initiated traffic.
            warn!(adapter = %self.name, "dropping non-response write");
            return Ok(());
        };
        let waiter = self
            .waiting
            .lock()
            .expect("http waiting lock")
            .remove(&id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(frame);
            }
            None => debug!(%id, "dropping response with no waiting request"),
        }
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        client_capabilities()
    }

    async fn destroy(&self) {
        self.inbox.close();
        self.waiting.lock().expect("http waiting lock").clear();
    }

    async fn signal_destroy(&self) {}
}
