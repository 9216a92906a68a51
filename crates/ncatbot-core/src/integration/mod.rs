//! Integration layer: seams towards the transport, the service layer and the
//! protocol parser.

pub mod api;
pub mod parser;
pub mod transport;

pub use api::{ApiSender, BotApi, DisconnectedSender};
pub use parser::EventParser;
pub use transport::{Services, Transport};
