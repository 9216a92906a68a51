//! Shared OneBot v11 types.
//!
//! QQ ids arrive as numbers from most implementations and as strings from
//! some; every id is kept as a `String`.

use serde::{Deserialize, Deserializer, Serialize};

/// Message sender information.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sender {
    #[serde(default, deserialize_with = "id::option")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
    /// "male", "female" or "unknown".
    #[serde(default)]
    pub sex: Option<String>,
    #[serde(default)]
    pub age: Option<i32>,
    /// Group card (group nickname).
    #[serde(default)]
    pub card: Option<String>,
    #[serde(default)]
    pub area: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    /// "owner", "admin" or "member".
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

/// Anonymous user of an anonymous group message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anonymous {
    pub id: i64,
    pub name: String,
    /// Needed to mute the anonymous user.
    pub flag: String,
}

/// File of a group upload notice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    #[serde(deserialize_with = "id::deserialize")]
    pub id: String,
    pub name: String,
    pub size: i64,
    #[serde(default)]
    pub busid: i64,
}

/// Status carried by heartbeats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    #[serde(default = "yes")]
    pub online: bool,
    #[serde(default = "yes")]
    pub good: bool,
}

impl Default for Status {
    fn default() -> Self {
        Self {
            online: true,
            good: true,
        }
    }
}

fn yes() -> bool {
    true
}

/// Turns a stored id back into the number OneBot expects, if it is one.
pub fn id_value(id: &str) -> serde_json::Value {
    match id.parse::<i64>() {
        Ok(number) => number.into(),
        Err(_) => id.into(),
    }
}

/// Id deserializers accepting numbers and strings.
pub(crate) mod id {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Signed(i64),
        Unsigned(u64),
    }

    impl RawId {
        fn into_string(self) -> String {
            match self {
                Self::Text(text) => text,
                Self::Signed(n) => n.to_string(),
                Self::Unsigned(n) => n.to_string(),
            }
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        RawId::deserialize(deserializer).map(RawId::into_string)
    }

    pub fn option<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<RawId>::deserialize(deserializer)?
            .map(RawId::into_string)
            .filter(|id| !id.is_empty() && id != "0"))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_sender_ids_accept_numbers_and_strings() {
        let sender: Sender = serde_json::from_value(json!({ "user_id": 10001 })).unwrap();
        assert_eq!(sender.user_id.as_deref(), Some("10001"));

        let sender: Sender = serde_json::from_value(json!({ "user_id": "10002" })).unwrap();
        assert_eq!(sender.user_id.as_deref(), Some("10002"));

        let sender: Sender = serde_json::from_value(json!({ "user_id": 0 })).unwrap();
        assert_eq!(sender.user_id, None);
    }

    #[test]
    fn test_id_value() {
        assert_eq!(id_value("123"), json!(123));
        assert_eq!(id_value("abc"), json!("abc"));
    }
}
