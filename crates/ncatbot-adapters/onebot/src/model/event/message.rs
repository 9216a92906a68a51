use ncatbot_core::{ApiError, ApiResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::EventBase;
use crate::api::OneBotApi;
use crate::model::types::{Anonymous, Sender, id};

/// A message received (`post_type = "message"`) or sent by the bot itself
/// (`post_type = "message_sent"`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEvent {
    #[serde(flatten)]
    pub base: EventBase,
    #[serde(deserialize_with = "id::deserialize")]
    pub message_id: String,
    #[serde(deserialize_with = "id::deserialize")]
    pub user_id: String,
    /// Segment array as sent by the implementation.
    #[serde(default)]
    pub message: Value,
    #[serde(default)]
    pub raw_message: String,
    #[serde(default)]
    pub font: i32,
    #[serde(default)]
    pub sender: Sender,
    #[serde(flatten)]
    pub detail: MessageDetail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
pub enum MessageDetail {
    Private {
        /// "friend", "group", "discuss" or "other".
        #[serde(default = "friend")]
        sub_type: String,
        #[serde(default, deserialize_with = "id::option")]
        temp_source: Option<String>,
    },
    Group {
        #[serde(deserialize_with = "id::deserialize")]
        group_id: String,
        #[serde(default)]
        anonymous: Option<Anonymous>,
        /// "normal", "anonymous" or "notice".
        #[serde(default = "normal")]
        sub_type: String,
    },
}

fn friend() -> String {
    "friend".to_string()
}

fn normal() -> String {
    "normal".to_string()
}

impl MessageEvent {
    pub fn is_group(&self) -> bool {
        matches!(self.detail, MessageDetail::Group { .. })
    }

    pub fn is_private(&self) -> bool {
        matches!(self.detail, MessageDetail::Private { .. })
    }

    pub fn group_id(&self) -> Option<&str> {
        match &self.detail {
            MessageDetail::Group { group_id, .. } => Some(group_id.as_str()),
            MessageDetail::Private { .. } => None,
        }
    }

    pub fn sub_type(&self) -> &str {
        match &self.detail {
            MessageDetail::Private { sub_type, .. } | MessageDetail::Group { sub_type, .. } => {
                sub_type.as_str()
            }
        }
    }

    /// Whether the bot sent this message itself.
    pub fn is_self_sent(&self) -> bool {
        self.base.post_type == "message_sent"
    }

    /// Concatenated text segments.
    pub fn plain_text(&self) -> String {
        extract_plain_text(&self.message)
    }

    /// Replies in the conversation the message came from.
    pub async fn reply(&self, text: &str) -> ApiResult<Value> {
        let api = self.base.api()?;
        match &self.detail {
            MessageDetail::Group { group_id, .. } => api.send_group_msg(group_id, text).await,
            MessageDetail::Private { .. } => api.send_private_msg(&self.user_id, text).await,
        }
    }

    /// Recalls the message.
    pub async fn delete(&self) -> ApiResult<Value> {
        self.base.api()?.delete_msg(&self.message_id).await
    }

    /// Kicks the sender from the group. Fails on private messages.
    pub async fn kick(&self, reject_add_request: bool) -> ApiResult<Value> {
        let group_id = self.require_group()?;
        self.base
            .api()?
            .set_group_kick(group_id, &self.user_id, reject_add_request)
            .await
    }

    /// Mutes the sender for `duration` seconds. Fails on private messages.
    pub async fn ban(&self, duration: u64) -> ApiResult<Value> {
        let group_id = self.require_group()?;
        self.base
            .api()?
            .set_group_ban(group_id, &self.user_id, duration)
            .await
    }

    fn require_group(&self) -> ApiResult<&str> {
        self.group_id()
            .ok_or_else(|| ApiError::Other("not a group message".to_string()))
    }
}

/// Extracts plain text from message segments.
pub fn extract_plain_text(message: &Value) -> String {
    match message {
        Value::Array(segments) => segments
            .iter()
            .filter(|seg| seg.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|seg| seg.get("data")?.get("text")?.as_str())
            .collect(),
        Value::String(text) => text.clone(),
        _ => String::new(),
    }
}
