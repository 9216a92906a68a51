use serde::{Deserialize, Serialize};

use super::EventBase;
use crate::model::types::Status;

/// Connection-level events from the implementation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaEvent {
    #[serde(flatten)]
    pub base: EventBase,
    #[serde(flatten)]
    pub detail: MetaDetail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "meta_event_type", rename_all = "snake_case")]
pub enum MetaDetail {
    Lifecycle {
        /// "enable", "disable" or "connect".
        #[serde(default = "enable")]
        sub_type: String,
    },
    Heartbeat {
        #[serde(default)]
        status: Status,
        /// Milliseconds until the next heartbeat.
        #[serde(default)]
        interval: i64,
    },
}

fn enable() -> String {
    "enable".to_string()
}

impl MetaEvent {
    pub fn meta_event_type(&self) -> &'static str {
        match self.detail {
            MetaDetail::Lifecycle { .. } => "lifecycle",
            MetaDetail::Heartbeat { .. } => "heartbeat",
        }
    }

    /// The lifecycle event sent once the connection is up.
    pub fn is_connect(&self) -> bool {
        matches!(&self.detail, MetaDetail::Lifecycle { sub_type } if sub_type == "connect")
    }

    pub fn is_heartbeat(&self) -> bool {
        matches!(self.detail, MetaDetail::Heartbeat { .. })
    }
}
