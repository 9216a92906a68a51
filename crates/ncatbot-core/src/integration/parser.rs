//! Raw payload to typed event conversion.

use serde_json::Value;

use crate::foundation::envelope::Payload;
use crate::foundation::error::ParseResult;
use crate::integration::api::BotApi;

/// Turns a raw inbound payload into a typed event.
///
/// Implementations return the event as an opaque [`Payload`]; handlers
/// recover the concrete type with
/// [`Envelope::payload_as`](crate::Envelope::payload_as).
pub trait EventParser: Send + Sync {
    /// Parses `raw`. `api` is bound into events that need to reply.
    fn parse(&self, raw: &Value, api: &BotApi) -> ParseResult<Payload>;
}

impl<F> EventParser for F
where
    F: Fn(&Value, &BotApi) -> ParseResult<Payload> + Send + Sync,
{
    fn parse(&self, raw: &Value, api: &BotApi) -> ParseResult<Payload> {
        self(raw, api)
    }
}
