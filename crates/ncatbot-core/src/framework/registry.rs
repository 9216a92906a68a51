//! Typed handler registration on top of the [`EventBus`].
//!
//! Handlers registered through the [`EventRegistry`] receive the typed event
//! instead of the envelope: the payload is downcast to `E`, an optional filter
//! is applied, and only then the user function runs. Envelopes carrying a
//! payload of another type are skipped silently.
//!
//! ```rust,ignore
//! registry.on_message(|event: Arc<MessageEvent>| async move {
//!     println!("{}", event.raw_message);
//!     Ok(())
//! })?;
//! ```

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::foundation::envelope::Envelope;
use crate::foundation::error::{BoxError, BusResult};
use crate::framework::bus::{EventBus, OwnerMeta, SubscribeOptions};
use crate::framework::dispatcher::EventCategory;
use crate::framework::handler::{Handler, HandlerResult};

/// Predicate deciding whether a typed handler sees an event.
pub type EventFilter<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Registration facade over an [`EventBus`].
///
/// A registry may carry an owner; every subscription made through it is then
/// tagged with that owner so it can be removed in one go.
#[derive(Clone, Debug)]
pub struct EventRegistry {
    bus: EventBus,
    owner: Option<OwnerMeta>,
}

impl EventRegistry {
    pub fn new(bus: EventBus) -> Self {
        Self { bus, owner: None }
    }

    /// A registry sharing the same bus whose subscriptions belong to `owner`.
    pub fn with_owner(&self, owner: OwnerMeta) -> Self {
        Self {
            bus: self.bus.clone(),
            owner: Some(owner),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn owner(&self) -> Option<&OwnerMeta> {
        self.owner.as_ref()
    }

    fn options(&self, options: impl Into<SubscribeOptions>) -> SubscribeOptions {
        let mut options = options.into();
        if options.owner.is_none() {
            options.owner = self.owner.clone();
        }
        options
    }

    /// Subscribes an envelope-level handler.
    pub fn subscribe(
        &self,
        topic: &str,
        handler: Handler,
        options: impl Into<SubscribeOptions>,
    ) -> BusResult<Uuid> {
        self.bus.subscribe(topic, handler, self.options(options))
    }

    /// Subscribes a handler receiving the payload downcast to `E`.
    pub fn register_handler<E, F, Fut>(
        &self,
        topic: &str,
        handler: F,
        options: impl Into<SubscribeOptions>,
        filter: Option<EventFilter<E>>,
    ) -> BusResult<Uuid>
    where
        E: Any + Send + Sync,
        F: Fn(Arc<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let name = std::any::type_name::<F>();
        let handler = Arc::new(handler);
        let wrapped = Handler::new(move |envelope: Arc<Envelope>| {
            let handler = Arc::clone(&handler);
            let filter = filter.clone();
            async move {
                let Ok(event) = envelope.payload().downcast::<E>() else {
                    return HandlerResult::Ok(Value::Null);
                };
                if filter.is_some_and(|accept| !accept(&event)) {
                    return HandlerResult::Ok(Value::Null);
                }
                (*handler)(event).await?;
                HandlerResult::Ok(Value::Null)
            }
        })
        .named(name);

        self.subscribe(topic, wrapped, options)
    }

    /// Registers a typed handler for one event category.
    pub fn on_category<E, F, Fut>(
        &self,
        category: EventCategory,
        handler: F,
        options: impl Into<SubscribeOptions>,
        filter: Option<EventFilter<E>>,
    ) -> BusResult<Uuid>
    where
        E: Any + Send + Sync,
        F: Fn(Arc<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.register_handler(&category.topic(), handler, options, filter)
    }

    pub fn on_message<E, F, Fut>(&self, handler: F) -> BusResult<Uuid>
    where
        E: Any + Send + Sync,
        F: Fn(Arc<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.on_category(EventCategory::Message, handler, 0, None)
    }

    pub fn on_message_sent<E, F, Fut>(&self, handler: F) -> BusResult<Uuid>
    where
        E: Any + Send + Sync,
        F: Fn(Arc<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.on_category(EventCategory::MessageSent, handler, 0, None)
    }

    pub fn on_notice<E, F, Fut>(&self, handler: F) -> BusResult<Uuid>
    where
        E: Any + Send + Sync,
        F: Fn(Arc<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.on_category(EventCategory::Notice, handler, 0, None)
    }

    pub fn on_request<E, F, Fut>(&self, handler: F) -> BusResult<Uuid>
    where
        E: Any + Send + Sync,
        F: Fn(Arc<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.on_category(EventCategory::Request, handler, 0, None)
    }

    pub fn on_meta<E, F, Fut>(&self, handler: F) -> BusResult<Uuid>
    where
        E: Any + Send + Sync,
        F: Fn(Arc<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.on_category(EventCategory::Meta, handler, 0, None)
    }
}
