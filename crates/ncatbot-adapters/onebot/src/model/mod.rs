//! OneBot v11 data model.

pub mod event;
pub mod types;

pub use event::*;
pub use types::{Anonymous, FileInfo, Sender, Status, id_value};
