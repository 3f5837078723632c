//! Per-object log sinks handed to the orchestrator.

use std::sync::{Mutex, PoisonError};

use serde_json::Value as Json;

/// Log sink scoped to one object. Messages are emitted verbatim.
pub trait ObjectLogger: Send + Sync {
    fn debug(&self, message: &str);
}

/// Forwards to `tracing`, tagging every event with the object's coordinates.
#[derive(Debug, Clone)]
pub struct TracingObjectLogger {
    namespace: Option<String>,
    name: Option<String>,
}

impl TracingObjectLogger {
    pub fn new(namespace: Option<&str>, name: Option<&str>) -> Self {
        Self { namespace: namespace.map(str::to_string), name: name.map(str::to_string) }
    }

    pub fn for_body(body: &Json) -> Self {
        let meta = body.get("metadata");
        Self::new(
            meta.and_then(|m| m.get("namespace")).and_then(Json::as_str),
            meta.and_then(|m| m.get("name")).and_then(Json::as_str),
        )
    }
}

impl ObjectLogger for TracingObjectLogger {
    fn debug(&self, message: &str) {
        tracing::debug!(
            target: "kopatch::objects",
            namespace = self.namespace.as_deref().unwrap_or("-"),
            name = self.name.as_deref().unwrap_or("-"),
            "{}",
            message
        );
    }
}

/// Keeps every message, optionally passing it on to another sink.
#[derive(Default)]
pub struct RecordingLogger {
    messages: Mutex<Vec<String>>,
    inner: Option<Box<dyn ObjectLogger>>,
}

impl RecordingLogger {
    pub fn new() -> Self { Self::default() }

    pub fn wrapping(inner: impl ObjectLogger + 'static) -> Self {
        Self { messages: Mutex::default(), inner: Some(Box::new(inner)) }
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl ObjectLogger for RecordingLogger {
    fn debug(&self, message: &str) {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner).push(message.to_string());
        if let Some(inner) = &self.inner {
            inner.debug(message);
        }
    }
}
