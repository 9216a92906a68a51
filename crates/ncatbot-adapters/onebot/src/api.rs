//! Typed OneBot v11 actions on top of [`BotApi`].
//!
//! ```rust,ignore
//! use ncatbot_adapter_onebot::OneBotApi;
//!
//! api.send_group_msg("30003", "hello").await?;
//! ```

use async_trait::async_trait;
use ncatbot_core::{ApiResult, BotApi};
use serde_json::{Value, json};

use crate::model::id_value;

/// A message of one text segment.
pub fn text_message(text: &str) -> Value {
    json!([{ "type": "text", "data": { "text": text } }])
}

#[async_trait]
pub trait OneBotApi {
    async fn send_private_msg(&self, user_id: &str, text: &str) -> ApiResult<Value>;

    async fn send_group_msg(&self, group_id: &str, text: &str) -> ApiResult<Value>;

    async fn delete_msg(&self, message_id: &str) -> ApiResult<Value>;

    async fn set_group_kick(
        &self,
        group_id: &str,
        user_id: &str,
        reject_add_request: bool,
    ) -> ApiResult<Value>;

    /// Mutes a member for `duration` seconds; zero lifts the mute.
    async fn set_group_ban(
        &self,
        group_id: &str,
        user_id: &str,
        duration: u64,
    ) -> ApiResult<Value>;

    async fn set_friend_add_request(
        &self,
        flag: &str,
        approve: bool,
        remark: &str,
    ) -> ApiResult<Value>;

    async fn set_group_add_request(
        &self,
        flag: &str,
        sub_type: &str,
        approve: bool,
        reason: &str,
    ) -> ApiResult<Value>;

    async fn get_login_info(&self) -> ApiResult<Value>;
}

#[async_trait]
impl OneBotApi for BotApi {
    async fn send_private_msg(&self, user_id: &str, text: &str) -> ApiResult<Value> {
        self.call_api(
            "send_private_msg",
            json!({ "user_id": id_value(user_id), "message": text_message(text) }),
        )
        .await
    }

    async fn send_group_msg(&self, group_id: &str, text: &str) -> ApiResult<Value> {
        self.call_api(
            "send_group_msg",
            json!({ "group_id": id_value(group_id), "message": text_message(text) }),
        )
        .await
    }

    async fn delete_msg(&self, message_id: &str) -> ApiResult<Value> {
        self.call_api("delete_msg", json!({ "message_id": id_value(message_id) }))
            .await
    }

    async fn set_group_kick(
        &self,
        group_id: &str,
        user_id: &str,
        reject_add_request: bool,
    ) -> ApiResult<Value> {
        self.call_api(
            "set_group_kick",
            json!({
                "group_id": id_value(group_id),
                "user_id": id_value(user_id),
                "reject_add_request": reject_add_request,
            }),
        )
        .await
    }

    async fn set_group_ban(
        &self,
        group_id: &str,
        user_id: &str,
        duration: u64,
    ) -> ApiResult<Value> {
        self.call_api(
            "set_group_ban",
            json!({
                "group_id": id_value(group_id),
                "user_id": id_value(user_id),
                "duration": duration,
            }),
        )
        .await
    }

    async fn set_friend_add_request(
        &self,
        flag: &str,
        approve: bool,
        remark: &str,
    ) -> ApiResult<Value> {
        self.call_api(
            "set_friend_add_request",
            json!({ "flag": flag, "approve": approve, "remark": remark }),
        )
        .await
    }

    async fn set_group_add_request(
        &self,
        flag: &str,
        sub_type: &str,
        approve: bool,
        reason: &str,
    ) -> ApiResult<Value> {
        self.call_api(
            "set_group_add_request",
            json!({ "flag": flag, "sub_type": sub_type, "approve": approve, "reason": reason }),
        )
        .await
    }

    async fn get_login_info(&self) -> ApiResult<Value> {
        self.call_api("get_login_info", json!({})).await
    }
}
