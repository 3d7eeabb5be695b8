use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::adapter::{Adapter, AdapterMessage, MessageHook};
use crate::error::RpcError;

/// Connects two adapters so every frame read from one is written to the
/// other, unparsed. The two peers behind them behave exactly as if they had
/// a direct channel — request correlation, callbacks, and destroy sentinels
/// all pass through.
///
/// Both adapters must support message hooks. Pre-existing hooks keep
/// observing traffic and are restored on [`Relay::destroy`].
pub fn relay(a: Arc<dyn Adapter>, b: Arc<dyn Adapter>) -> Result<Relay, RpcError> {
    let original_a = a.hook();
    let original_b = b.hook();

    let pump_a_to_b = install_forwarding(&a, &b, original_a.clone())?;
    let pump_b_to_a = match install_forwarding(&b, &a, original_b.clone()) {
        Ok(pump) => pump,
        Err(error) => {
            a.set_hook(original_a);
            pump_a_to_b.abort();
            return Err(error);
        }
    };

    Ok(Relay {
        a,
        b,
        original_a,
        original_b,
        pumps: vec![pump_a_to_b, pump_b_to_a],
    })
}

fn install_forwarding(
    from: &Arc<dyn Adapter>,
    to: &Arc<dyn Adapter>,
    wrapped: Option<MessageHook>,
) -> Result<JoinHandle<()>, RpcError> {
    let (tx, mut rx) = mpsc::unbounded_channel::<AdapterMessage>();
    let hook: MessageHook = Arc::new(move |message: AdapterMessage| {
        let _ = tx.send(message.clone());
        if let Some(wrapped) = &wrapped {
            wrapped(message);
        }
    });
    if !from.set_hook(Some(hook)) {
        return Err(RpcError::protocol(format!(
            "adapter `{}` does not support message hooks",
            from.name()
        )));
    }

    let to = Arc::clone(to);
    Ok(tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(error) = to.write(message).await {
                debug!(?error, adapter = to.name(), "relay forward failed");
                return;
            }
        }
    }))
}

/// Handle to an active relay.
pub struct Relay {
    a: Arc<dyn Adapter>,
    b: Arc<dyn Adapter>,
    original_a: Option<MessageHook>,
    original_b: Option<MessageHook>,
    pumps: Vec<JoinHandle<()>>,
}

impl Relay {
    /// Restores the original hooks and closes both adapters.
    pub async fn destroy(self) {
        self.a.set_hook(self.original_a);
        self.b.set_hook(self.original_b);
        for pump in &self.pumps {
            pump.abort();
        }
        self.a.destroy().await;
        self.b.destroy().await;
    }
}
