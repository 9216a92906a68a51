//! OneBot v11 [`EventParser`].
//!
//! Events are looked up by `(post_type, secondary)`:
//!
//! | post_type | secondary |
//! |---|---|
//! | `message`, `message_sent` | `message_type` |
//! | `notice` | `notice_type`, or `sub_type` when `notice_type` is `notify` |
//! | `request` | `request_type` |
//! | `meta_event` | `meta_event_type` |
//!
//! `message_sent` shares the `message` entries. Anything without an entry is
//! rejected with [`ParseError::Invalid`].

use std::collections::HashMap;
use std::fmt;

use ncatbot_core::{BotApi, EventParser, ParseError, ParseResult, Payload};
use serde_json::Value;
use tracing::trace;

use crate::model::{MessageEvent, MetaEvent, NoticeEvent, OneBotEvent, RequestEvent};

/// Builds an event from a raw payload.
pub type ParseFn = fn(&Value) -> serde_json::Result<OneBotEvent>;

const MESSAGE_KEYS: &[&str] = &["private", "group"];
const NOTICE_KEYS: &[&str] = &[
    "group_upload",
    "group_admin",
    "group_decrease",
    "group_increase",
    "group_ban",
    "friend_add",
    "group_recall",
    "friend_recall",
    "poke",
    "lucky_king",
    "honor",
];
const REQUEST_KEYS: &[&str] = &["friend", "group"];
const META_KEYS: &[&str] = &["lifecycle", "heartbeat"];

fn parse_message(raw: &Value) -> serde_json::Result<OneBotEvent> {
    serde_json::from_value::<MessageEvent>(raw.clone()).map(OneBotEvent::Message)
}

fn parse_notice(raw: &Value) -> serde_json::Result<OneBotEvent> {
    serde_json::from_value::<NoticeEvent>(raw.clone()).map(OneBotEvent::Notice)
}

fn parse_request(raw: &Value) -> serde_json::Result<OneBotEvent> {
    serde_json::from_value::<RequestEvent>(raw.clone()).map(OneBotEvent::Request)
}

fn parse_meta(raw: &Value) -> serde_json::Result<OneBotEvent> {
    serde_json::from_value::<MetaEvent>(raw.clone()).map(OneBotEvent::Meta)
}

/// The lookup key of a raw payload, or `None` for an unknown `post_type`.
pub fn lookup_key(raw: &Value) -> Option<(&'static str, &str)> {
    fn field<'a>(raw: &'a Value, name: &str) -> &'a str {
        raw.get(name).and_then(Value::as_str).unwrap_or("")
    }

    match field(raw, "post_type") {
        "message" | "message_sent" => Some(("message", field(raw, "message_type"))),
        "notice" => match field(raw, "notice_type") {
            "notify" => Some(("notice", field(raw, "sub_type"))),
            notice_type => Some(("notice", notice_type)),
        },
        "request" => Some(("request", field(raw, "request_type"))),
        "meta_event" => Some(("meta_event", field(raw, "meta_event_type"))),
        _ => None,
    }
}

/// Table-driven OneBot v11 parser.
#[derive(Clone)]
pub struct OneBotParser {
    table: HashMap<(String, String), ParseFn>,
}

impl Default for OneBotParser {
    fn default() -> Self {
        Self::new()
    }
}

impl OneBotParser {
    /// A parser knowing every built-in OneBot v11 event.
    pub fn new() -> Self {
        let mut parser = Self::empty();
        let groups: [(&str, &[&str], ParseFn); 4] = [
            ("message", MESSAGE_KEYS, parse_message),
            ("notice", NOTICE_KEYS, parse_notice),
            ("request", REQUEST_KEYS, parse_request),
            ("meta_event", META_KEYS, parse_meta),
        ];
        for (post_type, keys, parse) in groups {
            for key in keys {
                parser.register(post_type, key, parse);
            }
        }
        parser
    }

    /// A parser without entries.
    pub fn empty() -> Self {
        Self {
            table: HashMap::new(),
        }
    }

    /// Adds or replaces the entry for `(post_type, secondary)`.
    pub fn register(&mut self, post_type: &str, secondary: &str, parse: ParseFn) -> Option<ParseFn> {
        self.table
            .insert((post_type.to_string(), secondary.to_string()), parse)
    }

    pub fn is_registered(&self, post_type: &str, secondary: &str) -> bool {
        self.table
            .contains_key(&(post_type.to_string(), secondary.to_string()))
    }

    /// Parses `raw` without binding an API.
    pub fn parse_event(&self, raw: &Value) -> ParseResult<OneBotEvent> {
        let Some((post_type, secondary)) = lookup_key(raw) else {
            return Err(ParseError::invalid(format!(
                "unknown event type: post_type={}",
                raw.get("post_type").unwrap_or(&Value::Null)
            )));
        };

        let parse = self
            .table
            .get(&(post_type.to_string(), secondary.to_string()))
            .ok_or_else(|| {
                ParseError::invalid(format!(
                    "no event registered for ({post_type}, {secondary})"
                ))
            })?;

        trace!(post_type, secondary, "Parsing OneBot event");
        parse(raw).map_err(|e| {
            ParseError::invalid(format!("malformed ({post_type}, {secondary}) event: {e}"))
        })
    }
}

impl EventParser for OneBotParser {
    fn parse(&self, raw: &Value, api: &BotApi) -> ParseResult<Payload> {
        let mut event = self.parse_event(raw)?;
        event.bind_api(api.clone());
        Ok(event.into_payload())
    }
}

impl fmt::Debug for OneBotParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OneBotParser")
            .field("entries", &self.table.len())
            .finish()
    }
}
