use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::adapter::{Adapter, AdapterMessage};
use crate::api::Api;
use crate::callbacks::CallbackRegistry;
use crate::codec::CodecContext;
use crate::dispatch;
use crate::error::RpcError;
use crate::message::WireEnvelope;
use crate::pending::PendingTable;
use crate::proxy::RemoteProxy;

/// Wire format override for a channel.
///
/// The default picks the envelope form when the adapter advertises
/// structured-clone support and the text form otherwise; both peers must
/// land on the same choice.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Serialization {
    #[default]
    Auto,
    Text,
    Envelope,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum WireMode {
    Text,
    Envelope,
}

pub(crate) struct ChannelInner {
    pub(crate) adapter: Arc<dyn Adapter>,
    pub(crate) mode: WireMode,
    pub(crate) pending: PendingTable,
    pub(crate) registry: Arc<CallbackRegistry>,
    pub(crate) api: RwLock<Api>,
    pub(crate) outbound: mpsc::UnboundedSender<WireEnvelope>,
    terminated: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ChannelInner {
    pub(crate) fn codec(&self) -> CodecContext {
        CodecContext {
            registry: Arc::clone(&self.registry),
            outbound: self.outbound.clone(),
            capabilities: self.adapter.capabilities(),
            adapter_name: self.adapter.name().to_string(),
        }
    }

    pub(crate) fn text_mode(&self) -> bool {
        self.mode == WireMode::Text
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Rejects everything pending, drops all callback registrations, and
    /// stops the read/write loops. Idempotent; runs on end-of-stream,
    /// transport failure, and destroy. Aborting the calling loop's own task
    /// is fine: nothing awaits after the call.
    pub(crate) fn terminate(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        let rejected = self.pending.reject_all();
        self.registry.release(&rejected);
        self.registry.clear();
        self.abort_tasks();
    }

    fn abort_tasks(&self) {
        for task in self.tasks.lock().expect("channel tasks lock").drain(..) {
            task.abort();
        }
    }
}

/// A bound pair of an adapter, a local exposed [`Api`], and the dispatch
/// loop. Cheap to clone; all clones drive the same connection.
///
/// The read loop starts eagerly on construction. Dropping the last clone
/// does not close the connection; call [`Channel::destroy`] for a
/// cooperative shutdown.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    /// A channel with no exposed API and default serialization.
    pub fn new(adapter: Arc<dyn Adapter>) -> Self {
        Self::builder(adapter).build()
    }

    pub fn builder(adapter: Arc<dyn Adapter>) -> ChannelBuilder {
        ChannelBuilder {
            adapter,
            api: None,
            serialization: Serialization::Auto,
        }
    }

    /// Replaces the local exposed tree. Method resolution is always by
    /// current lookup, so in-flight requests observe the new tree.
    pub fn expose(&self, api: Api) {
        *self.inner.api.write().expect("api lock") = api;
    }

    /// The root proxy for the peer's exposed tree.
    pub fn api(&self) -> RemoteProxy {
        RemoteProxy::root(Arc::clone(&self.inner))
    }

    /// True once the channel has torn down (end-of-stream, transport
    /// failure, or destroy); calls on a terminated channel fail with
    /// [`crate::RpcError::ChannelTerminated`].
    pub fn is_terminated(&self) -> bool {
        self.inner.is_terminated()
    }

    /// Signals the peer with the destroy sentinel, closes the adapter, and
    /// rejects everything pending locally.
    pub async fn destroy(&self) {
        self.inner.adapter.signal_destroy().await;
        self.inner.adapter.destroy().await;
        self.inner.terminate();
    }
}

pub struct ChannelBuilder {
    adapter: Arc<dyn Adapter>,
    api: Option<Api>,
    serialization: Serialization,
}

impl ChannelBuilder {
    pub fn expose(mut self, api: Api) -> Self {
        self.api = Some(api);
        self
    }

    pub fn serialization(mut self, serialization: Serialization) -> Self {
        self.serialization = serialization;
        self
    }

    pub fn build(self) -> Channel {
        let capabilities = self.adapter.capabilities();
        let mode = match self.serialization {
            Serialization::Text => WireMode::Text,
            Serialization::Envelope => WireMode::Envelope,
            Serialization::Auto => {
                if capabilities.structured_clone {
                    WireMode::Envelope
                } else {
                    WireMode::Text
                }
            }
        };

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(ChannelInner {
            adapter: self.adapter,
            mode,
            pending: PendingTable::new(),
            registry: Arc::new(CallbackRegistry::new()),
            api: RwLock::new(self.api.unwrap_or_default()),
            outbound,
            terminated: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        });

        let writer = tokio::spawn(write_loop(Arc::clone(&inner), outbound_rx));
        let reader = tokio::spawn(read_loop(Arc::clone(&inner)));
        inner
            .tasks
            .lock()
            .expect("channel tasks lock")
            .extend([writer, reader]);
        // An adapter that hit end-of-stream before the handles landed above
        // has already terminated; its loops still need reaping.
        if inner.is_terminated() {
            inner.abort_tasks();
        }

        Channel { inner }
    }
}

async fn read_loop(inner: Arc<ChannelInner>) {
    loop {
        match inner.adapter.read().await {
            Ok(Some(message)) => dispatch::handle_incoming(&inner, message),
            Ok(None) => {
                debug!(adapter = inner.adapter.name(), "stream ended");
                break;
            }
            Err(source) => {
                let error = RpcError::Transport {
                    adapter: inner.adapter.name().to_string(),
                    source,
                };
                warn!(%error, "terminating channel");
                break;
            }
        }
    }
    inner.terminate();
}

async fn write_loop(
    inner: Arc<ChannelInner>,
    mut outbound_rx: mpsc::UnboundedReceiver<WireEnvelope>,
) {
    while let Some(envelope) = outbound_rx.recv().await {
        let message = match inner.mode {
            WireMode::Envelope => AdapterMessage::Envelope(envelope),
            WireMode::Text => AdapterMessage::Text(envelope.to_frame()),
        };
        if let Err(source) = inner.adapter.write(message).await {
            let error = RpcError::Transport {
                adapter: inner.adapter.name().to_string(),
                source,
            };
            warn!(%error, "terminating channel");
            inner.terminate();
            return;
        }
    }
}
