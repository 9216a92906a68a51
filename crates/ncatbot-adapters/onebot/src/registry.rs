//! OneBot-specific registration helpers for [`EventRegistry`].
//!
//! ```rust,ignore
//! use ncatbot_adapter_onebot::{OneBotRegistryExt, NoticeEvent};
//!
//! registry.on_notice_type("group_increase", |event: Arc<NoticeEvent>| async move {
//!     tracing::info!(user = ?event.user_id, "Welcome");
//!     Ok(())
//! })?;
//! ```

use std::future::Future;
use std::sync::Arc;

use ncatbot_core::{BoxError, BusResult, EventCategory, EventFilter, EventRegistry};
use uuid::Uuid;

use crate::model::{MessageEvent, MetaEvent, NoticeEvent, RequestEvent};

fn filter<E>(accept: impl Fn(&E) -> bool + Send + Sync + 'static) -> Option<EventFilter<E>> {
    Some(Arc::new(accept))
}

pub trait OneBotRegistryExt {
    fn on_group_message<F, Fut>(&self, handler: F) -> BusResult<Uuid>
    where
        F: Fn(Arc<MessageEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static;

    fn on_private_message<F, Fut>(&self, handler: F) -> BusResult<Uuid>
    where
        F: Fn(Arc<MessageEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static;

    /// Notices whose `notice_type` equals `notice_type`. Notify events
    /// match `"notify"`.
    fn on_notice_type<F, Fut>(&self, notice_type: &str, handler: F) -> BusResult<Uuid>
    where
        F: Fn(Arc<NoticeEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static;

    fn on_friend_request<F, Fut>(&self, handler: F) -> BusResult<Uuid>
    where
        F: Fn(Arc<RequestEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static;

    fn on_group_request<F, Fut>(&self, handler: F) -> BusResult<Uuid>
    where
        F: Fn(Arc<RequestEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static;

    /// The lifecycle `connect` event.
    fn on_startup<F, Fut>(&self, handler: F) -> BusResult<Uuid>
    where
        F: Fn(Arc<MetaEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static;

    fn on_heartbeat<F, Fut>(&self, handler: F) -> BusResult<Uuid>
    where
        F: Fn(Arc<MetaEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static;
}

impl OneBotRegistryExt for EventRegistry {
    fn on_group_message<F, Fut>(&self, handler: F) -> BusResult<Uuid>
    where
        F: Fn(Arc<MessageEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.on_category(
            EventCategory::Message,
            handler,
            0,
            filter(MessageEvent::is_group),
        )
    }

    fn on_private_message<F, Fut>(&self, handler: F) -> BusResult<Uuid>
    where
        F: Fn(Arc<MessageEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.on_category(
            EventCategory::Message,
            handler,
            0,
            filter(MessageEvent::is_private),
        )
    }

    fn on_notice_type<F, Fut>(&self, notice_type: &str, handler: F) -> BusResult<Uuid>
    where
        F: Fn(Arc<NoticeEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let notice_type = notice_type.to_string();
        self.on_category(
            EventCategory::Notice,
            handler,
            0,
            filter(move |event: &NoticeEvent| event.notice_type() == notice_type),
        )
    }

    fn on_friend_request<F, Fut>(&self, handler: F) -> BusResult<Uuid>
    where
        F: Fn(Arc<RequestEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.on_category(
            EventCategory::Request,
            handler,
            0,
            filter(RequestEvent::is_friend),
        )
    }

    fn on_group_request<F, Fut>(&self, handler: F) -> BusResult<Uuid>
    where
        F: Fn(Arc<RequestEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.on_category(
            EventCategory::Request,
            handler,
            0,
            filter(RequestEvent::is_group),
        )
    }

    fn on_startup<F, Fut>(&self, handler: F) -> BusResult<Uuid>
    where
        F: Fn(Arc<MetaEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.on_category(EventCategory::Meta, handler, 0, filter(MetaEvent::is_connect))
    }

    fn on_heartbeat<F, Fut>(&self, handler: F) -> BusResult<Uuid>
    where
        F: Fn(Arc<MetaEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.on_category(
            EventCategory::Meta,
            handler,
            0,
            filter(MetaEvent::is_heartbeat),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use ncatbot_core::{BotApi, Envelope, EventBus, EventParser};
    use serde_json::{Value, json};

    use super::*;
    use crate::parser::OneBotParser;

    async fn publish(bus: &EventBus, raw: Value) {
        let category = EventCategory::from_post_type(raw["post_type"].as_str().unwrap()).unwrap();
        let payload = OneBotParser::new()
            .parse(&raw, &BotApi::disconnected())
            .unwrap();
        bus.publish(Arc::new(Envelope::from_payload(category.topic(), payload)))
            .await;
    }

    fn counter() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        (Arc::clone(&hits), hits)
    }

    #[tokio::test]
    async fn test_group_and_private_filters() {
        let bus = EventBus::new();
        let registry = EventRegistry::new(bus.clone());
        let (group_hits, group_seen) = counter();
        let (private_hits, private_seen) = counter();

        registry
            .on_group_message(move |_event: Arc<MessageEvent>| {
                let hits = Arc::clone(&group_hits);
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();
        registry
            .on_private_message(move |_event: Arc<MessageEvent>| {
                let hits = Arc::clone(&private_hits);
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();

        let message = |message_type: &str| {
            json!({
                "time": 1,
                "self_id": 1,
                "post_type": "message",
                "message_type": message_type,
                "message_id": 1,
                "user_id": 2,
                "group_id": 3
            })
        };
        publish(&bus, message("group")).await;
        publish(&bus, message("group")).await;
        publish(&bus, message("private")).await;

        assert_eq!(group_seen.load(Ordering::SeqCst), 2);
        assert_eq!(private_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_on_notice_type() {
        let bus = EventBus::new();
        let registry = EventRegistry::new(bus.clone());
        let (hits, seen) = counter();

        registry
            .on_notice_type("group_increase", move |event: Arc<NoticeEvent>| {
                let hits = Arc::clone(&hits);
                async move {
                    assert_eq!(event.user_id.as_deref(), Some("20002"));
                    hits.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();

        let notice = |notice_type: &str| {
            json!({
                "time": 1,
                "self_id": 1,
                "post_type": "notice",
                "notice_type": notice_type,
                "group_id": 30003,
                "user_id": 20002,
                "operator_id": 40004
            })
        };
        publish(&bus, notice("group_increase")).await;
        publish(&bus, notice("group_decrease")).await;

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_on_startup_only_sees_connect() {
        let bus = EventBus::new();
        let registry = EventRegistry::new(bus.clone());
        let (hits, seen) = counter();

        registry
            .on_startup(move |_event: Arc<MetaEvent>| {
                let hits = Arc::clone(&hits);
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();

        let lifecycle = |sub_type: &str| {
            json!({
                "time": 1,
                "self_id": 1,
                "post_type": "meta_event",
                "meta_event_type": "lifecycle",
                "sub_type": sub_type
            })
        };
        publish(&bus, lifecycle("connect")).await;
        publish(&bus, lifecycle("enable")).await;
        publish(
            &bus,
            json!({
                "time": 1,
                "self_id": 1,
                "post_type": "meta_event",
                "meta_event_type": "heartbeat",
                "interval": 5000
            }),
        )
        .await;

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
