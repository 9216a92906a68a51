//! Foundation layer: the envelope and the error taxonomy.

pub mod envelope;
pub mod error;

pub use envelope::{Envelope, Payload};
pub use error::{
    ApiError, ApiResult, BoxError, BusError, BusResult, HandlerError, HandlerTimeoutError,
    ParseError, ParseResult, RunnerError, RunnerResult, ThreadsafePublishError, panic_message,
};
