use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

use crate::message::CALLBACK_PREFIX;
use crate::value::Callback;

/// Per-channel table of locally held callbacks, keyed by the
/// `__callback__<uuid>` identifiers that travel in their place.
///
/// Entries registered for a call are released when that call's response
/// settles; entries registered while encoding a response live until channel
/// teardown.
pub(crate) struct CallbackRegistry {
    entries: Mutex<HashMap<String, Callback>>,
}

impl CallbackRegistry {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Stores a callback under a fresh identifier. A colliding identifier
    /// (theoretical with uuids) is overwritten; the newer entry wins.
    pub(crate) fn register(&self, callback: Callback) -> String {
        let id = format!("{CALLBACK_PREFIX}{}", Uuid::new_v4());
        self.entries
            .lock()
            .expect("callback registry lock")
            .insert(id.clone(), callback);
        id
    }

    pub(crate) fn get(&self, id: &str) -> Option<Callback> {
        self.entries
            .lock()
            .expect("callback registry lock")
            .get(id)
            .cloned()
    }

    pub(crate) fn release(&self, ids: &[String]) {
        if ids.is_empty() {
            return;
        }
        let mut entries = self.entries.lock().expect("callback registry lock");
        for id in ids {
            entries.remove(id);
        }
    }

    pub(crate) fn clear(&self) {
        self.entries
            .lock()
            .expect("callback registry lock")
            .clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().expect("callback registry lock").len()
    }
}
