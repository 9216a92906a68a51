//! Framework layer: handlers, the bus, typed registration and dispatch.

pub mod bus;
pub mod dispatcher;
pub mod handler;
pub mod registry;

pub use bus::{
    DEFAULT_HANDLER_TIMEOUT, DEFAULT_PUBLISH_WAIT, EventBus, OwnerMeta, REGEX_PREFIX,
    SubscribeOptions,
};
pub use dispatcher::{EventCategory, EventDispatcher, TOPIC_NAMESPACE, parse_event_category};
pub use handler::{Handler, HandlerFuture, HandlerResult};
pub use registry::{EventFilter, EventRegistry};
