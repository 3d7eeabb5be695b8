use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::message::{WireEnvelope, DESTROY_SENTINEL};

/// One unit of transport traffic: either a newline-framed text line or a
/// structured envelope passed through as a native object.
#[derive(Clone, Debug)]
pub enum AdapterMessage {
    Text(String),
    Envelope(WireEnvelope),
}

impl AdapterMessage {
    pub fn is_destroy_sentinel(&self) -> bool {
        matches!(self, AdapterMessage::Text(frame) if frame == DESTROY_SENTINEL)
    }
}

/// What an adapter can carry. Drives the channel's choice of wire format
/// and the codec's callback admission check.
#[derive(Clone, Debug)]
pub struct Capabilities {
    /// The transport preserves structured values natively; the channel uses
    /// envelope mode.
    pub structured_clone: bool,
    /// The transport honors a transferable-reference list on writes.
    pub transfer: bool,
    pub transfer_types: Option<Vec<String>>,
    /// False for request/response transports that cannot push peer-to-caller
    /// traffic; the codec rejects callback arguments on such adapters.
    pub bidirectional: bool,
}

impl Capabilities {
    /// Byte-stream transport: text frames, no transfer, bidirectional.
    pub fn text() -> Self {
        Self {
            structured_clone: false,
            transfer: false,
            transfer_types: None,
            bidirectional: true,
        }
    }

    /// Message-port style transport: native envelopes with transfer support.
    pub fn structured() -> Self {
        Self {
            structured_clone: true,
            transfer: true,
            transfer_types: None,
            bidirectional: true,
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::text()
    }
}

/// Event-driven sink installed by the relay; when present the adapter
/// delivers incoming messages here instead of queuing them for `read`.
pub type MessageHook = Arc<dyn Fn(AdapterMessage) + Send + Sync + 'static>;

/// A duplex message endpoint. Implementations exist for byte streams (text
/// frames) and in-memory ports (envelopes); everything above the adapter is
/// transport-agnostic.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Identifier used in diagnostics.
    fn name(&self) -> &str;

    /// The next incoming message, or `None` once the stream has ended
    /// (including after the destroy sentinel was observed).
    async fn read(&self) -> io::Result<Option<AdapterMessage>>;

    /// Writes one message.
    async fn write(&self, message: AdapterMessage) -> io::Result<()>;

    fn capabilities(&self) -> Capabilities;

    /// Installs or clears the event-driven delivery hook. Returns false when
    /// the adapter does not support hooks (the relay requires support).
    fn set_hook(&self, _hook: Option<MessageHook>) -> bool {
        false
    }

    /// The currently installed hook, if any.
    fn hook(&self) -> Option<MessageHook> {
        None
    }

    /// Closes the underlying resource. Called on channel teardown.
    async fn destroy(&self) {}

    /// Cooperative close notification to the peer without closing the local
    /// resource. The default writes the reserved sentinel frame.
    async fn signal_destroy(&self) {
        if let Err(error) = self
            .write(AdapterMessage::Text(DESTROY_SENTINEL.to_string()))
            .await
        {
            tracing::debug!(?error, adapter = self.name(), "destroy signal not delivered");
        }
    }
}

/// Routes incoming messages to the installed hook or to the `read` queue,
/// and turns the destroy sentinel into end-of-stream. Shared by the
/// reference adapters so hook semantics stay uniform.
pub(crate) struct Inbox {
    tx: Mutex<Option<mpsc::UnboundedSender<AdapterMessage>>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<AdapterMessage>>,
    hook: Mutex<Option<MessageHook>>,
}

impl Inbox {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
            hook: Mutex::new(None),
        }
    }

    /// Delivers one incoming message, honoring the sentinel and any hook.
    /// A hook observes the sentinel (a relay must forward it) before the
    /// local stream closes.
    pub(crate) fn deliver(&self, message: AdapterMessage) {
        let sentinel = message.is_destroy_sentinel();
        let hook = self.hook.lock().expect("inbox hook lock").clone();
        match hook {
            Some(hook) => hook(message),
            None if sentinel => {}
            None => {
                let tx = self.tx.lock().expect("inbox sender lock");
                if let Some(tx) = tx.as_ref() {
                    let _ = tx.send(message);
                }
                return;
            }
        }
        if sentinel {
            self.close();
        }
    }

    pub(crate) async fn recv(&self) -> Option<AdapterMessage> {
        self.rx.lock().await.recv().await
    }

    /// Ends the stream: queued messages drain, then `recv` yields `None`.
    pub(crate) fn close(&self) {
        self.tx.lock().expect("inbox sender lock").take();
    }

    pub(crate) fn set_hook(&self, hook: Option<MessageHook>) {
        *self.hook.lock().expect("inbox hook lock") = hook;
    }

    pub(crate) fn hook(&self) -> Option<MessageHook> {
        self.hook.lock().expect("inbox hook lock").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn inbox_queues_until_closed() {
        let inbox = Inbox::new();
        inbox.deliver(AdapterMessage::Text("one".into()));
        inbox.close();
        assert!(matches!(
            inbox.recv().await,
            Some(AdapterMessage::Text(frame)) if frame == "one"
        ));
        assert!(inbox.recv().await.is_none());
    }

    #[tokio::test]
    async fn sentinel_closes_the_stream() {
        let inbox = Inbox::new();
        inbox.deliver(AdapterMessage::Text(DESTROY_SENTINEL.to_string()));
        assert!(inbox.recv().await.is_none());
    }

    #[tokio::test]
    async fn hook_bypasses_the_queue() {
        let inbox = Inbox::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        inbox.set_hook(Some(Arc::new(move |message| {
            let _ = tx.send(message);
        })));
        inbox.deliver(AdapterMessage::Text("hooked".into()));
        assert!(matches!(
            rx.recv().await,
            Some(AdapterMessage::Text(frame)) if frame == "hooked"
        ));

        inbox.set_hook(None);
        inbox.deliver(AdapterMessage::Text("queued".into()));
        assert!(matches!(
            inbox.recv().await,
            Some(AdapterMessage::Text(frame)) if frame == "queued"
        ));
    }
}
