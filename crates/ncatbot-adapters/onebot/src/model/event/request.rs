use ncatbot_core::ApiResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::EventBase;
use crate::api::OneBotApi;
use crate::model::types::id;

/// A friend or group-join request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEvent {
    #[serde(flatten)]
    pub base: EventBase,
    #[serde(deserialize_with = "id::deserialize")]
    pub user_id: String,
    #[serde(default)]
    pub comment: Option<String>,
    /// Handle passed back when answering the request.
    pub flag: String,
    #[serde(flatten)]
    pub detail: RequestDetail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "request_type", rename_all = "snake_case")]
pub enum RequestDetail {
    Friend {},
    Group {
        #[serde(deserialize_with = "id::deserialize")]
        group_id: String,
        /// "add" or "invite".
        #[serde(default = "add")]
        sub_type: String,
    },
}

fn add() -> String {
    "add".to_string()
}

impl RequestEvent {
    pub fn is_friend(&self) -> bool {
        matches!(self.detail, RequestDetail::Friend {})
    }

    pub fn is_group(&self) -> bool {
        matches!(self.detail, RequestDetail::Group { .. })
    }

    pub fn group_id(&self) -> Option<&str> {
        match &self.detail {
            RequestDetail::Group { group_id, .. } => Some(group_id.as_str()),
            RequestDetail::Friend {} => None,
        }
    }

    /// Accepts the request. `remark` only applies to friend requests.
    pub async fn approve(&self, remark: &str) -> ApiResult<Value> {
        self.answer(true, remark, "").await
    }

    /// Rejects the request. `reason` only applies to group requests.
    pub async fn reject(&self, reason: &str) -> ApiResult<Value> {
        self.answer(false, "", reason).await
    }

    async fn answer(&self, approve: bool, remark: &str, reason: &str) -> ApiResult<Value> {
        let api = self.base.api()?;
        match &self.detail {
            RequestDetail::Friend {} => {
                api.set_friend_add_request(&self.flag, approve, remark)
                    .await
            }
            RequestDetail::Group { sub_type, .. } => {
                api.set_group_add_request(&self.flag, sub_type, approve, reason)
                    .await
            }
        }
    }
}
