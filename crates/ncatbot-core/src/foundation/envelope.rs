//! The event envelope carried through one publish call.
//!
//! An [`Envelope`] wraps a topic and an opaque payload, and accumulates the
//! results and failures of every handler that ran for it. It is shared with
//! handlers as `Arc<Envelope>`; handlers may only flip the propagation flags,
//! while results and failures are appended by the bus itself.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde_json::Value;

use crate::foundation::error::HandlerError;

/// Opaque, shareable event payload.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// The record published on the [`EventBus`](crate::EventBus).
pub struct Envelope {
    topic: String,
    payload: Payload,
    results: Mutex<Vec<Value>>,
    exceptions: Mutex<Vec<HandlerError>>,
    /// Once set, no further handler runs for the current publish.
    propagation_stopped: AtomicBool,
    intercepted: AtomicBool,
}

impl Envelope {
    /// Creates an envelope carrying `payload` under `topic`.
    pub fn new<T>(topic: impl Into<String>, payload: T) -> Self
    where
        T: Any + Send + Sync,
    {
        Self::from_payload(topic, Arc::new(payload))
    }

    /// Creates an envelope from an already shared payload.
    pub fn from_payload(topic: impl Into<String>, payload: Payload) -> Self {
        Self {
            topic: topic.into(),
            payload,
            results: Mutex::new(Vec::new()),
            exceptions: Mutex::new(Vec::new()),
            propagation_stopped: AtomicBool::new(false),
            intercepted: AtomicBool::new(false),
        }
    }

    /// Creates an envelope with no payload.
    pub fn empty(topic: impl Into<String>) -> Self {
        Self::new(topic, ())
    }

    /// Creates an envelope under the `ncatbot.` namespace.
    pub fn ncatbot(name: &str, payload: Payload) -> Self {
        Self::from_payload(format!("ncatbot.{name}"), payload)
    }

    /// Convenience for building an `Arc<Envelope>` ready to publish.
    pub fn shared<T>(topic: impl Into<String>, payload: T) -> Arc<Self>
    where
        T: Any + Send + Sync,
    {
        Arc::new(Self::new(topic, payload))
    }

    /// The topic this envelope was published under.
    pub fn topic(&self) -> String {
        self.topic.clone()
    }

    pub(crate) fn topic_str(&self) -> &str {
        &self.topic
    }

    /// A new handle to the payload.
    pub fn payload(&self) -> Payload {
        Arc::clone(&self.payload)
    }

    /// Downcasts the payload to `T`.
    pub fn payload_as<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    /// Snapshot of the results collected so far.
    pub fn results(&self) -> Vec<Value> {
        self.results.lock().clone()
    }

    /// Snapshot of the failures collected so far.
    pub fn exceptions(&self) -> Vec<HandlerError> {
        self.exceptions.lock().clone()
    }

    /// Prevents any lower-priority handler from running for this publish.
    pub fn stop_propagation(&self) {
        self.propagation_stopped.store(true, Ordering::SeqCst);
    }

    /// Stops propagation and marks the event as deliberately swallowed.
    pub fn intercept(&self) {
        self.propagation_stopped.store(true, Ordering::SeqCst);
        self.intercepted.store(true, Ordering::SeqCst);
    }

    /// Whether a handler stopped propagation.
    pub fn is_propagation_stopped(&self) -> bool {
        self.propagation_stopped.load(Ordering::SeqCst)
    }

    /// Whether a handler intercepted the event.
    pub fn is_intercepted(&self) -> bool {
        self.intercepted.load(Ordering::SeqCst)
    }

    pub(crate) fn add_result(&self, result: Value) {
        self.results.lock().push(result);
    }

    pub(crate) fn add_exception(&self, error: HandlerError) {
        self.exceptions.lock().push(error);
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("topic", &self.topic)
            .field("results", &self.results.lock().len())
            .field("exceptions", &self.exceptions.lock().len())
            .field("propagation_stopped", &self.is_propagation_stopped())
            .field("intercepted", &self.is_intercepted())
            .finish_non_exhaustive()
    }
}
