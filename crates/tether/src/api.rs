use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::ErrorRecord;
use crate::value::Value;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, ErrorRecord>> + Send>>;

/// An exposed async handler: decoded arguments in, encodable result or
/// error record out.
#[derive(Clone)]
pub struct Method(Arc<dyn Fn(Vec<Value>) -> HandlerFuture + Send + Sync + 'static>);

impl Method {
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ErrorRecord>> + Send + 'static,
    {
        Self(Arc::new(move |args| Box::pin(handler(args))))
    }

    pub(crate) fn invoke(&self, args: Vec<Value>) -> HandlerFuture {
        (self.0)(args)
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Method")
    }
}

/// One node of the exposed tree.
#[derive(Clone, Debug)]
pub enum ApiNode {
    Method(Method),
    Property(Value),
    Object(BTreeMap<String, ApiNode>),
}

/// The local tree a peer may call through its proxy: methods and readable
/// properties addressed by dotted path.
///
/// Built with the chaining registration helpers; resolution is always by
/// current lookup, so leaves added after exposure are immediately callable.
///
/// ```
/// use tether::{Api, Value};
///
/// let api = Api::new()
///     .method("math.grade1.add", |args| async move {
///         let a = args[0].as_i64().unwrap_or(0);
///         let b = args[1].as_i64().unwrap_or(0);
///         Ok(Value::from(a + b))
///     })
///     .property("counter", 7i64);
/// # let _ = api;
/// ```
#[derive(Clone, Debug, Default)]
pub struct Api {
    root: BTreeMap<String, ApiNode>,
}

impl Api {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a method at a dotted path, creating namespaces as needed.
    pub fn method<F, Fut>(mut self, path: &str, handler: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ErrorRecord>> + Send + 'static,
    {
        self.insert(path, ApiNode::Method(Method::new(handler)));
        self
    }

    /// Registers a readable (and peer-assignable) property.
    pub fn property(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.insert(path, ApiNode::Property(value.into()));
        self
    }

    fn insert(&mut self, path: &str, node: ApiNode) {
        let mut segments = path.split('.').peekable();
        let mut current = &mut self.root;
        while let Some(segment) = segments.next() {
            if segments.peek().is_none() {
                current.insert(segment.to_string(), node);
                return;
            }
            let entry = current
                .entry(segment.to_string())
                .or_insert_with(|| ApiNode::Object(BTreeMap::new()));
            if !matches!(entry, ApiNode::Object(_)) {
                // A leaf in the middle of the path is replaced by a
                // namespace; the old leaf is unreachable anyway.
                *entry = ApiNode::Object(BTreeMap::new());
            }
            let ApiNode::Object(children) = entry else {
                unreachable!();
            };
            current = children;
        }
    }

    pub(crate) fn resolve(&self, path: &str) -> Option<&ApiNode> {
        if path.is_empty() {
            return None;
        }
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut node = self.root.get(first)?;
        for segment in segments {
            let ApiNode::Object(children) = node else {
                return None;
            };
            node = children.get(segment)?;
        }
        Some(node)
    }

    /// Assigns a property leaf for a `set` request. Fails when the parent
    /// namespace does not exist; creating new leaves under an existing
    /// parent is permitted.
    pub(crate) fn assign(&mut self, path: &str, value: Value) -> bool {
        if path.is_empty() {
            return false;
        }
        let mut segments: Vec<&str> = path.split('.').collect();
        let Some(leaf) = segments.pop() else {
            return false;
        };
        let mut current = &mut self.root;
        for segment in segments {
            let Some(ApiNode::Object(children)) = current.get_mut(segment) else {
                return false;
            };
            current = children;
        }
        current.insert(leaf.to_string(), ApiNode::Property(value));
        true
    }

    /// Materializes the value a `get` of this node observes. Namespaces
    /// surface their property leaves; methods are not readable values.
    pub(crate) fn read(node: &ApiNode) -> Option<Value> {
        match node {
            ApiNode::Property(value) => Some(value.clone()),
            ApiNode::Object(children) => {
                let mut out = BTreeMap::new();
                for (key, child) in children {
                    if let Some(value) = Self::read(child) {
                        out.insert(key.clone(), value);
                    }
                }
                Some(Value::Object(Arc::new(out)))
            }
            ApiNode::Method(_) => None,
        }
    }
}
