//! Inbound payload dispatch.
//!
//! The [`EventDispatcher`] sits between the transport and the bus: it reads
//! the `post_type` discriminator, lets the [`EventParser`] build the typed
//! event, wraps it in an [`Envelope`] and publishes it under
//! `ncatbot.<category>`.
//!
//! | `post_type` | Topic |
//! |---|---|
//! | `message` | `ncatbot.message_event` |
//! | `message_sent` | `ncatbot.message_sent_event` |
//! | `notice` | `ncatbot.notice_event` |
//! | `request` | `ncatbot.request_event` |
//! | `meta_event` | `ncatbot.meta_event` |
//!
//! Dispatch never fails: unknown categories and parser failures are logged
//! and the payload is dropped.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, warn};

use crate::foundation::envelope::Envelope;
use crate::foundation::error::{ParseError, panic_message};
use crate::framework::bus::EventBus;
use crate::integration::api::BotApi;
use crate::integration::parser::EventParser;

/// Namespace shared by every dispatched topic.
pub const TOPIC_NAMESPACE: &str = "ncatbot";

/// The five inbound event categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    Message,
    MessageSent,
    Notice,
    Request,
    Meta,
}

impl EventCategory {
    pub const ALL: [EventCategory; 5] = [
        Self::Message,
        Self::MessageSent,
        Self::Notice,
        Self::Request,
        Self::Meta,
    ];

    /// Maps a `post_type` value to its category.
    pub fn from_post_type(post_type: &str) -> Option<Self> {
        match post_type {
            "message" => Some(Self::Message),
            "message_sent" => Some(Self::MessageSent),
            "notice" => Some(Self::Notice),
            "request" => Some(Self::Request),
            "meta_event" => Some(Self::Meta),
            _ => None,
        }
    }

    /// The `post_type` value of this category.
    pub fn post_type(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::MessageSent => "message_sent",
            Self::Notice => "notice",
            Self::Request => "request",
            Self::Meta => "meta_event",
        }
    }

    /// The topic segment after the namespace.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message_event",
            Self::MessageSent => "message_sent_event",
            Self::Notice => "notice_event",
            Self::Request => "request_event",
            Self::Meta => "meta_event",
        }
    }

    /// Full topic, e.g. `ncatbot.notice_event`.
    pub fn topic(self) -> String {
        format!("{TOPIC_NAMESPACE}.{}", self.as_str())
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reads the category of a raw payload.
pub fn parse_event_category(raw: &Value) -> Option<EventCategory> {
    raw.get("post_type")
        .and_then(Value::as_str)
        .and_then(EventCategory::from_post_type)
}

/// Turns raw payloads into published envelopes.
pub struct EventDispatcher {
    bus: EventBus,
    api: BotApi,
    parser: Arc<dyn EventParser>,
}

impl EventDispatcher {
    pub fn new(bus: EventBus, api: BotApi, parser: Arc<dyn EventParser>) -> Self {
        Self { bus, api, parser }
    }

    pub fn api(&self) -> &BotApi {
        &self.api
    }

    /// Parses and publishes one raw payload.
    pub async fn dispatch(&self, raw: &Value) {
        let Some(category) = parse_event_category(raw) else {
            debug!(post_type = ?raw.get("post_type"), "Unknown event category, dropping");
            return;
        };

        let parsed =
            std::panic::catch_unwind(AssertUnwindSafe(|| self.parser.parse(raw, &self.api)));

        let payload = match parsed {
            Ok(Ok(payload)) => payload,
            Ok(Err(ParseError::Invalid(reason))) => {
                warn!(%category, %reason, "Failed to parse event");
                return;
            }
            Ok(Err(ParseError::Internal(e))) => {
                error!(%category, error = %e, raw = %raw, "Event parser error");
                return;
            }
            Err(panic) => {
                error!(
                    %category,
                    panic = %panic_message(panic.as_ref()),
                    raw = %raw,
                    "Event parser panicked"
                );
                return;
            }
        };

        let envelope = Arc::new(Envelope::from_payload(category.topic(), payload));
        self.bus.publish(envelope).await;
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}
