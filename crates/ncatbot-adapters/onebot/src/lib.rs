//! # NcatBot OneBot v11 Adapter
//!
//! Typed OneBot v11 events and the [`OneBotParser`] that produces them from
//! the raw payloads a NapCat connection delivers.
//!
//! ## Event Layout
//!
//! ```text
//! OneBotEvent
//! ├── Message(MessageEvent)   Private | Group
//! ├── Notice(NoticeEvent)     GroupUpload | GroupAdmin | ... | Notify(Poke | LuckyKing | Honor)
//! ├── Request(RequestEvent)   Friend | Group
//! └── Meta(MetaEvent)         Lifecycle | Heartbeat
//! ```
//!
//! The parser publishes the category event (`MessageEvent`, `NoticeEvent`,
//! ...) as the envelope payload, with the bot API bound so that handlers can
//! answer directly:
//!
//! ```rust,ignore
//! use ncatbot_adapter_onebot::{MessageEvent, OneBotRegistryExt};
//!
//! registry.on_group_message(|event: Arc<MessageEvent>| async move {
//!     if event.plain_text() == "ping" {
//!         event.reply("pong").await?;
//!     }
//!     Ok(())
//! })?;
//! ```

pub mod api;
pub mod model;
pub mod parser;
pub mod registry;

pub use api::{OneBotApi, text_message};
pub use model::{
    Anonymous, EventBase, FileInfo, HonorType, MessageDetail, MessageEvent, MetaDetail,
    MetaEvent, NoticeDetail, NoticeEvent, NotifyDetail, OneBotEvent, RequestDetail,
    RequestEvent, Sender, Status, extract_plain_text, id_value,
};
pub use parser::{OneBotParser, ParseFn, lookup_key};
pub use registry::OneBotRegistryExt;
