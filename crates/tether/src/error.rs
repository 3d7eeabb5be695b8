use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::value::Value;

/// Errors surfaced to callers of a channel.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("no method or property at `{path}`")]
    MethodNotFound { path: String },
    #[error("remote handler failed: {0}")]
    Remote(ErrorRecord),
    #[error("channel terminated before a response arrived")]
    ChannelTerminated,
    #[error("transport failed on adapter `{adapter}`: {source}")]
    Transport {
        adapter: String,
        #[source]
        source: std::io::Error,
    },
    #[error("protocol violation: {reason}")]
    Protocol { reason: String },
    #[error("adapter `{adapter}` is not bidirectional and cannot carry callback arguments")]
    CallbacksUnsupported { adapter: String },
}

impl RpcError {
    pub(crate) fn protocol(reason: impl Into<String>) -> Self {
        RpcError::Protocol {
            reason: reason.into(),
        }
    }

    /// The remote error record, when the peer's handler failed.
    pub fn remote(&self) -> Option<&ErrorRecord> {
        match self {
            RpcError::Remote(record) => Some(record),
            _ => None,
        }
    }
}

/// Wire form of a thrown value: the fields a peer needs to reconstruct an
/// error-like object with name-based discrimination intact.
///
/// `extra` carries the thrower's own enumerable properties (e.g. a `code`
/// field); `cause` chains recursively.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ErrorRecord {
    pub name: String,
    pub message: String,
    pub stack: Option<String>,
    pub cause: Option<Box<ErrorRecord>>,
    pub extra: BTreeMap<String, Value>,
}

impl ErrorRecord {
    /// A plain `"Error"`-named record.
    pub fn new(message: impl Into<String>) -> Self {
        Self::named("Error", message)
    }

    pub fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
            cause: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn with_cause(mut self, cause: ErrorRecord) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn extra(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    /// Fills in the `"Error"` default for records decoded without a name.
    pub(crate) fn normalized(mut self) -> Self {
        if self.name.is_empty() {
            self.name = "Error".to_string();
        }
        self
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.name, self.message)
        }
    }
}

impl std::error::Error for ErrorRecord {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

impl From<String> for ErrorRecord {
    fn from(message: String) -> Self {
        ErrorRecord::new(message)
    }
}

impl From<&str> for ErrorRecord {
    fn from(message: &str) -> Self {
        ErrorRecord::new(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_name() {
        let record = ErrorRecord::named("TimeoutError", "took too long");
        assert_eq!(record.to_string(), "TimeoutError: took too long");
    }

    #[test]
    fn cause_chain_is_the_error_source() {
        let record =
            ErrorRecord::new("outer").with_cause(ErrorRecord::named("Inner", "root cause"));
        let source = std::error::Error::source(&record).expect("cause");
        assert_eq!(source.to_string(), "Inner: root cause");
    }

    #[test]
    fn normalized_defaults_the_name() {
        let record = ErrorRecord {
            name: String::new(),
            message: "m".into(),
            ..Default::default()
        };
        assert_eq!(record.normalized().name, "Error");
    }
}
