//! Echo Bot Example
//!
//! Drives the blocking [`BotClient::try_run`] entry over a line-based transport:
//! every stdin line is a raw OneBot v11 event, every API call the bot makes
//! is written to stdout as one JSON line.
//!
//! ```bash
//! echo '{"time":1,"self_id":10001,"post_type":"message","message_type":"private","message_id":1,"user_id":20002,"message":[{"type":"text","data":{"text":"/ping"}}]}' \
//!     | cargo run --package echo-bot -- --uin 10001
//! ```
//!
//! Commands understood by the bot:
//!
//! | Command | Reply |
//! |---|---|
//! | `/echo <text>` | `<text>` |
//! | `/ping` | `Pong!` |
//! | `/help` | Command list |
//! | `/group` | Group id, in groups only |

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use ncatbot::core::{ApiResult, EventDispatcher};
use ncatbot::prelude::*;
use ncatbot::runtime::ConfigLoader;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

const HELP_TEXT: &str = "Echo Bot - Commands
/echo <text> - Echo text
/ping        - Pong!
/help        - This help
/group       - Group only";

#[derive(Debug, Parser)]
#[command(name = "echo-bot", about = "NcatBot echo bot over stdin/stdout")]
struct Args {
    /// QQ account of the bot.
    #[arg(long)]
    uin: Option<String>,

    /// Configuration file; searched in the usual places when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Start in debug mode.
    #[arg(long)]
    debug: bool,

    /// Launch the NapCat process instead of running in mock mode.
    #[arg(long)]
    live: bool,
}

// ============================================================================
// Stdio Transport
// ============================================================================

/// Writes each action to stdout and answers with a fake message id.
#[derive(Default)]
struct StdoutSender {
    next_id: AtomicU64,
    stdout: tokio::sync::Mutex<Option<tokio::io::Stdout>>,
}

#[async_trait]
impl ApiSender for StdoutSender {
    async fn send(&self, action: &str, params: Value) -> ApiResult<Value> {
        let message_id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mut line = json!({ "action": action, "params": params, "echo": message_id })
            .to_string()
            .into_bytes();
        line.push(b'\n');

        let mut stdout = self.stdout.lock().await;
        let stdout = stdout.get_or_insert_with(tokio::io::stdout);
        if let Err(e) = stdout.write_all(&line).await {
            warn!(action, error = %e, "Failed to write action");
        }
        let _ = stdout.flush().await;

        Ok(json!({ "message_id": message_id }))
    }
}

struct StdioTransport {
    dispatcher: Mutex<Option<Arc<EventDispatcher>>>,
    sender: Arc<StdoutSender>,
}

#[async_trait]
impl Transport for StdioTransport {
    fn set_event_dispatcher(&self, dispatcher: Arc<EventDispatcher>) {
        *self.dispatcher.lock() = Some(dispatcher);
    }

    fn api_sender(&self) -> Arc<dyn ApiSender> {
        Arc::clone(&self.sender) as Arc<dyn ApiSender>
    }

    async fn listen(&self) -> Result<(), BoxError> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let raw: Value = match serde_json::from_str(line) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(error = %e, "Skipping malformed line");
                    continue;
                }
            };
            let dispatcher = self.dispatcher.lock().clone();
            if let Some(dispatcher) = dispatcher {
                dispatcher.dispatch(&raw).await;
            }
        }
        info!("Input closed");
        Ok(())
    }
}

struct StdioServices {
    transport: Arc<StdioTransport>,
    test_mode: AtomicBool,
}

#[async_trait]
impl Services for StdioServices {
    async fn load_all(&self) -> Result<(), BoxError> {
        debug!(test_mode = self.test_mode.load(Ordering::SeqCst), "Services loaded");
        Ok(())
    }

    async fn close_all(&self) -> Result<(), BoxError> {
        debug!("Services closed");
        Ok(())
    }

    fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport) as Arc<dyn Transport>
    }

    fn set_debug_mode(&self, enabled: bool) {
        debug!(debug_mode = enabled, "Debug mode");
    }

    fn set_test_mode(&self, test: bool) {
        self.test_mode.store(test, Ordering::SeqCst);
    }
}

// ============================================================================
// Commands Plugin
// ============================================================================

struct Commands;

#[async_trait]
impl Plugin for Commands {
    fn name(&self) -> &str {
        "commands"
    }

    fn is_builtin(&self) -> bool {
        true
    }

    async fn on_load(&self, ctx: &PluginContext) -> Result<(), BoxError> {
        ctx.registry().on_message(|event: Arc<MessageEvent>| async move {
            let text = event.plain_text();
            let text = text.trim();

            if let Some(content) = text.strip_prefix("/echo ") {
                event.reply(content).await?;
            } else if text == "/ping" {
                event.reply("Pong!").await?;
            } else if text == "/help" {
                event.reply(HELP_TEXT).await?;
            } else if text == "/group"
                && let Some(group_id) = event.group_id()
            {
                event
                    .reply(&format!("This is a group-only command!\nGroup: {group_id}"))
                    .await?;
            }
            Ok::<(), BoxError>(())
        })?;

        ctx.registry()
            .on_friend_request(|event: Arc<RequestEvent>| async move {
                info!(user = %event.user_id, "Accepting friend request");
                event.approve("").await?;
                Ok::<(), BoxError>(())
            })?;

        Ok(())
    }
}

/// Logs every message before the commands see it.
fn register_logging(client: &BotClient) -> Result<()> {
    client.bus().subscribe(
        "ncatbot.message_event",
        Handler::new(|envelope: Arc<Envelope>| async move {
            if let Some(event) = envelope.payload_as::<MessageEvent>() {
                let nickname = event.sender.nickname.as_deref().unwrap_or("Unknown");
                match event.group_id() {
                    Some(group_id) => info!(
                        "[Group {}] {} ({}): {}",
                        group_id,
                        nickname,
                        event.user_id,
                        event.plain_text()
                    ),
                    None => info!(
                        "[Private] {} ({}): {}",
                        nickname,
                        event.user_id,
                        event.plain_text()
                    ),
                }
            }
            HandlerResult::Ok(Value::Null)
        }),
        100,
    )?;
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> Result<()> {
    let args = Args::parse();

    let loader = match &args.config {
        Some(path) => ConfigLoader::new().file(path),
        None => ConfigLoader::new().with_user_config_dir(),
    };
    let config = loader.load()?;

    let services = Arc::new(StdioServices {
        transport: Arc::new(StdioTransport {
            dispatcher: Mutex::new(None),
            sender: Arc::new(StdoutSender::default()),
        }),
        test_mode: AtomicBool::new(false),
    });

    let client = BotClient::builder(services, Arc::new(OneBotParser::new()))
        .config(config)
        .init_logging(true)
        .build()?;

    register_logging(&client)?;
    client.register_plugin(Commands)?;

    let mut options = StartOptions::new().mock(!args.live).debug(args.debug);
    if let Some(uin) = args.uin {
        options = options.bot_uin(uin);
    }

    // Blocks until stdin closes or Ctrl-C.
    client.try_run(options)?;
    Ok(())
}
