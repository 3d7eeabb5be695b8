//! Reference adapters: newline-framed byte streams and in-memory ports.
//!
//! `StreamAdapter` turns any `AsyncRead`/`AsyncWrite` pair (a child
//! process's stdio, a socket, a `tokio::io::duplex` pipe) into a
//! text-capability adapter. `port_pair` builds two connected
//! object-capability adapters that pass envelopes as native values, the way
//! a message port would.

use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::adapter::{Adapter, AdapterMessage, Capabilities, Inbox, MessageHook};
use crate::framing::FrameBuffer;

const READ_CHUNK_BYTES: usize = 8192;

/// Byte-stream adapter with newline framing.
pub struct StreamAdapter<W> {
    name: String,
    writer: tokio::sync::Mutex<W>,
    inbox: Arc<Inbox>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

impl<W> StreamAdapter<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new<R>(reader: R, writer: W) -> Arc<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        Self::named("stream", reader, writer)
    }

    pub fn named<R>(name: impl Into<String>, reader: R, writer: W) -> Arc<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let name = name.into();
        let inbox = Arc::new(Inbox::new());
        let reader_task = tokio::spawn(pump_frames(name.clone(), reader, Arc::clone(&inbox)));
        Arc::new(Self {
            name,
            writer: tokio::sync::Mutex::new(writer),
            inbox,
            reader_task: Mutex::new(Some(reader_task)),
        })
    }
}

async fn pump_frames<R>(name: String, mut reader: R, inbox: Arc<Inbox>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut buffer = FrameBuffer::default();
    let mut chunk = [0u8; READ_CHUNK_BYTES];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => {
                if let Some(frame) = buffer.finish() {
                    inbox.deliver(AdapterMessage::Text(frame));
                }
                inbox.close();
                return;
            }
            Ok(n) => {
                for frame in buffer.push(&chunk[..n]) {
                    inbox.deliver(AdapterMessage::Text(frame));
                }
            }
            Err(error) => {
                debug!(?error, adapter = %name, "stream read failed, closing");
                inbox.close();
                return;
            }
        }
    }
}

#[async_trait]
impl<W> Adapter for StreamAdapter<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
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
                "byte-stream adapter cannot carry structured envelopes",
            ));
        };
        let mut writer = self.writer.lock().await;
        writer.write_all(frame.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::text()
    }

    fn set_hook(&self, hook: Option<MessageHook>) -> bool {
        self.inbox.set_hook(hook);
        true
    }

    fn hook(&self) -> Option<MessageHook> {
        self.inbox.hook()
    }

    async fn destroy(&self) {
        if let Some(task) = self.reader_task.lock().expect("reader task lock").take() {
            task.abort();
        }
        self.inbox.close();
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

/// One side of an in-memory connected pair passing envelopes natively.
pub struct PortAdapter {
    name: String,
    peer_tx: Mutex<Option<mpsc::UnboundedSender<AdapterMessage>>>,
    inbox: Arc<Inbox>,
    pump_task: Mutex<Option<JoinHandle<()>>>,
}

/// Builds two connected [`PortAdapter`]s, message-port style: everything
/// written on one side is delivered on the other.
pub fn port_pair() -> (Arc<PortAdapter>, Arc<PortAdapter>) {
    let (a_to_b_tx, a_to_b_rx) = mpsc::unbounded_channel();
    let (b_to_a_tx, b_to_a_rx) = mpsc::unbounded_channel();
    (
        PortAdapter::build("port-a", a_to_b_tx, b_to_a_rx),
        PortAdapter::build("port-b", b_to_a_tx, a_to_b_rx),
    )
}

impl PortAdapter {
    fn build(
        name: &str,
        peer_tx: mpsc::UnboundedSender<AdapterMessage>,
        mut incoming: mpsc::UnboundedReceiver<AdapterMessage>,
    ) -> Arc<Self> {
        let inbox = Arc::new(Inbox::new());
        let pump_inbox = Arc::clone(&inbox);
        let pump_task = tokio::spawn(async move {
            while let Some(message) = incoming.recv().await {
                pump_inbox.deliver(message);
            }
            pump_inbox.close();
        });
        Arc::new(Self {
            name: name.to_string(),
            peer_tx: Mutex::new(Some(peer_tx)),
            inbox,
            pump_task: Mutex::new(Some(pump_task)),
        })
    }
}

#[async_trait]
impl Adapter for PortAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self) -> io::Result<Option<AdapterMessage>> {
        Ok(self.inbox.recv().await)
    }

    async fn write(&self, message: AdapterMessage) -> io::Result<()> {
        let tx = self.peer_tx.lock().expect("peer sender lock").clone();
        match tx {
            Some(tx) => tx
                .send(message)
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer port closed")),
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "port already destroyed",
            )),
        }
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::structured()
    }

    fn set_hook(&self, hook: Option<MessageHook>) -> bool {
        self.inbox.set_hook(hook);
        true
    }

    fn hook(&self) -> Option<MessageHook> {
        self.inbox.hook()
    }

    async fn destroy(&self) {
        self.peer_tx.lock().expect("peer sender lock").take();
        if let Some(task) = self.pump_task.lock().expect("pump task lock").take() {
            task.abort();
        }
        self.inbox.close();
    }
}
