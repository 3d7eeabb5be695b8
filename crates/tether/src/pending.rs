use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;

use crate::error::RpcError;
use crate::value::Value;

struct PendingEntry {
    tx: oneshot::Sender<Result<Value, RpcError>>,
    /// Callback identifiers registered while encoding this call's
    /// arguments; released when the call settles.
    callback_ids: Vec<String>,
}

/// Map from outgoing request ids to the resolvers awaiting their response.
pub(crate) struct PendingTable {
    entries: Mutex<HashMap<String, PendingEntry>>,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn insert(
        &self,
        id: String,
        callback_ids: Vec<String>,
    ) -> oneshot::Receiver<Result<Value, RpcError>> {
        let (tx, rx) = oneshot::channel();
        self.entries
            .lock()
            .expect("pending table lock")
            .insert(id, PendingEntry { tx, callback_ids });
        rx
    }

    /// Settles the matching entry and returns the callback ids it held, or
    /// `None` when the id is unknown (orphaned response).
    pub(crate) fn settle(
        &self,
        id: &str,
        outcome: Result<Value, RpcError>,
    ) -> Option<Vec<String>> {
        let entry = self.entries.lock().expect("pending table lock").remove(id)?;
        let _ = entry.tx.send(outcome);
        Some(entry.callback_ids)
    }

    /// Rejects every outstanding call with [`RpcError::ChannelTerminated`]
    /// and returns all callback ids they held.
    pub(crate) fn reject_all(&self) -> Vec<String> {
        let drained: Vec<PendingEntry> = {
            let mut entries = self.entries.lock().expect("pending table lock");
            entries.drain().map(|(_, entry)| entry).collect()
        };
        let mut callback_ids = Vec::new();
        for entry in drained {
            let _ = entry.tx.send(Err(RpcError::ChannelTerminated));
            callback_ids.extend(entry.callback_ids);
        }
        callback_ids
    }
}
