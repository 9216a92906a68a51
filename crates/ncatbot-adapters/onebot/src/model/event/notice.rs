use serde::{Deserialize, Serialize};

use super::EventBase;
use crate::model::types::{FileInfo, id};

/// A notice. `group_id` and `user_id` are present on nearly every kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoticeEvent {
    #[serde(flatten)]
    pub base: EventBase,
    #[serde(default, deserialize_with = "id::option")]
    pub group_id: Option<String>,
    #[serde(default, deserialize_with = "id::option")]
    pub user_id: Option<String>,
    #[serde(flatten)]
    pub detail: NoticeDetail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "notice_type", rename_all = "snake_case")]
pub enum NoticeDetail {
    GroupUpload {
        file: FileInfo,
    },
    GroupAdmin {
        /// "set" or "unset".
        #[serde(default = "set")]
        sub_type: String,
    },
    GroupDecrease {
        /// "leave", "kick" or "kick_me".
        #[serde(default = "leave")]
        sub_type: String,
        #[serde(deserialize_with = "id::deserialize")]
        operator_id: String,
    },
    GroupIncrease {
        /// "approve" or "invite".
        #[serde(default = "approve")]
        sub_type: String,
        #[serde(deserialize_with = "id::deserialize")]
        operator_id: String,
    },
    GroupBan {
        /// "ban" or "lift_ban".
        #[serde(default = "ban")]
        sub_type: String,
        #[serde(deserialize_with = "id::deserialize")]
        operator_id: String,
        /// Seconds.
        duration: i64,
    },
    FriendAdd {},
    GroupRecall {
        #[serde(deserialize_with = "id::deserialize")]
        operator_id: String,
        #[serde(deserialize_with = "id::deserialize")]
        message_id: String,
    },
    FriendRecall {
        #[serde(deserialize_with = "id::deserialize")]
        message_id: String,
    },
    Notify(NotifyDetail),
}

/// The `notify` family, keyed by `sub_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "sub_type", rename_all = "snake_case")]
pub enum NotifyDetail {
    Poke {
        #[serde(deserialize_with = "id::deserialize")]
        target_id: String,
    },
    LuckyKing {
        #[serde(deserialize_with = "id::deserialize")]
        target_id: String,
    },
    Honor {
        honor_type: HonorType,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HonorType {
    Talkative,
    Performer,
    Emotion,
}

fn set() -> String {
    "set".to_string()
}

fn leave() -> String {
    "leave".to_string()
}

fn approve() -> String {
    "approve".to_string()
}

fn ban() -> String {
    "ban".to_string()
}

impl NoticeEvent {
    pub fn notice_type(&self) -> &'static str {
        match self.detail {
            NoticeDetail::GroupUpload { .. } => "group_upload",
            NoticeDetail::GroupAdmin { .. } => "group_admin",
            NoticeDetail::GroupDecrease { .. } => "group_decrease",
            NoticeDetail::GroupIncrease { .. } => "group_increase",
            NoticeDetail::GroupBan { .. } => "group_ban",
            NoticeDetail::FriendAdd {} => "friend_add",
            NoticeDetail::GroupRecall { .. } => "group_recall",
            NoticeDetail::FriendRecall { .. } => "friend_recall",
            NoticeDetail::Notify(_) => "notify",
        }
    }

    pub fn sub_type(&self) -> Option<&str> {
        match &self.detail {
            NoticeDetail::GroupAdmin { sub_type }
            | NoticeDetail::GroupDecrease { sub_type, .. }
            | NoticeDetail::GroupIncrease { sub_type, .. }
            | NoticeDetail::GroupBan { sub_type, .. } => Some(sub_type.as_str()),
            NoticeDetail::Notify(NotifyDetail::Poke { .. }) => Some("poke"),
            NoticeDetail::Notify(NotifyDetail::LuckyKing { .. }) => Some("lucky_king"),
            NoticeDetail::Notify(NotifyDetail::Honor { .. }) => Some("honor"),
            _ => None,
        }
    }

    pub fn is_group(&self) -> bool {
        self.group_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_group_ban() {
        let event: NoticeEvent = serde_json::from_value(json!({
            "time": 1,
            "self_id": 10001,
            "post_type": "notice",
            "notice_type": "group_ban",
            "group_id": 30003,
            "user_id": 20002,
            "operator_id": 40004,
            "duration": 600
        }))
        .unwrap();

        assert_eq!(event.notice_type(), "group_ban");
        assert_eq!(event.sub_type(), Some("ban"));
        assert_eq!(event.group_id.as_deref(), Some("30003"));
        assert_eq!(
            event.detail,
            NoticeDetail::GroupBan {
                sub_type: "ban".to_string(),
                operator_id: "40004".to_string(),
                duration: 600,
            }
        );
    }

    #[test]
    fn test_poke_is_a_notify() {
        let event: NoticeEvent = serde_json::from_value(json!({
            "time": 1,
            "self_id": 10001,
            "post_type": "notice",
            "notice_type": "notify",
            "sub_type": "poke",
            "group_id": 30003,
            "user_id": 20002,
            "target_id": 10001
        }))
        .unwrap();

        assert_eq!(event.notice_type(), "notify");
        assert_eq!(event.sub_type(), Some("poke"));
        assert_eq!(
            event.detail,
            NoticeDetail::Notify(NotifyDetail::Poke {
                target_id: "10001".to_string()
            })
        );
    }

    #[test]
    fn test_friend_add_has_no_group() {
        let event: NoticeEvent = serde_json::from_value(json!({
            "time": 1,
            "self_id": 10001,
            "post_type": "notice",
            "notice_type": "friend_add",
            "user_id": 20002
        }))
        .unwrap();

        assert!(!event.is_group());
        assert_eq!(event.detail, NoticeDetail::FriendAdd {});
        assert_eq!(event.sub_type(), None);
    }
}
