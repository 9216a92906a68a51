//! OneBot v11 events.
//!
//! Each category event embeds the common [`EventBase`] and a `detail` enum
//! for the secondary type:
//!
//! ```text
//! OneBotEvent
//! ├── Message(MessageEvent)  detail: Private | Group               (message_type)
//! ├── Notice(NoticeEvent)    detail: GroupUpload | ... | Notify(..) (notice_type, sub_type)
//! ├── Request(RequestEvent)  detail: Friend | Group                (request_type)
//! └── Meta(MetaEvent)        detail: Lifecycle | Heartbeat         (meta_event_type)
//! ```
//!
//! The dispatcher publishes the category event itself, so a handler for
//! `ncatbot.message_event` receives an `Arc<MessageEvent>`.

mod message;
mod meta;
mod notice;
mod request;

use std::sync::Arc;

use ncatbot_core::{ApiError, ApiResult, BotApi, EventCategory, Payload};
use serde::{Deserialize, Serialize};

pub use message::{MessageDetail, MessageEvent, extract_plain_text};
pub use meta::{MetaDetail, MetaEvent};
pub use notice::{HonorType, NoticeDetail, NoticeEvent, NotifyDetail};
pub use request::{RequestDetail, RequestEvent};

use super::types::id;

/// Fields shared by every event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBase {
    /// Unix timestamp in seconds.
    pub time: i64,
    #[serde(deserialize_with = "id::deserialize")]
    pub self_id: String,
    pub post_type: String,
    #[serde(skip)]
    api: Option<BotApi>,
}

impl EventBase {
    pub fn bind_api(&mut self, api: BotApi) {
        self.api = Some(api);
    }

    /// The API this event was parsed with.
    pub fn api(&self) -> ApiResult<&BotApi> {
        self.api.as_ref().ok_or(ApiError::NotConnected)
    }

    pub fn category(&self) -> Option<EventCategory> {
        EventCategory::from_post_type(&self.post_type)
    }
}

/// A parsed OneBot event.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum OneBotEvent {
    Message(MessageEvent),
    Notice(NoticeEvent),
    Request(RequestEvent),
    Meta(MetaEvent),
}

impl OneBotEvent {
    pub fn base(&self) -> &EventBase {
        match self {
            Self::Message(event) => &event.base,
            Self::Notice(event) => &event.base,
            Self::Request(event) => &event.base,
            Self::Meta(event) => &event.base,
        }
    }

    fn base_mut(&mut self) -> &mut EventBase {
        match self {
            Self::Message(event) => &mut event.base,
            Self::Notice(event) => &mut event.base,
            Self::Request(event) => &mut event.base,
            Self::Meta(event) => &mut event.base,
        }
    }

    pub fn bind_api(&mut self, api: BotApi) {
        self.base_mut().bind_api(api);
    }

    pub fn category(&self) -> Option<EventCategory> {
        self.base().category()
    }

    /// Unwraps the category event into a bus payload.
    pub fn into_payload(self) -> Payload {
        match self {
            Self::Message(event) => Arc::new(event),
            Self::Notice(event) => Arc::new(event),
            Self::Request(event) => Arc::new(event),
            Self::Meta(event) => Arc::new(event),
        }
    }
}
