//! In-memory services and transport for lifecycle tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ncatbot_core::{
    ApiResult, ApiSender, BotApi, BoxError, EventDispatcher, EventParser, ParseResult, Payload,
    Services, Transport,
};
use ncatbot_runtime::{BotClient, LifecycleState, NcatConfig, ProcessLauncher};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;

pub type Journal = Arc<Mutex<Vec<String>>>;

pub struct EchoSender;

#[async_trait]
impl ApiSender for EchoSender {
    async fn send(&self, action: &str, params: Value) -> ApiResult<Value> {
        Ok(json!({ "action": action, "params": params }))
    }
}

/// Feeds queued payloads to the dispatcher; a `null` payload ends `listen`.
pub struct MockTransport {
    journal: Journal,
    dispatcher: Mutex<Option<Arc<EventDispatcher>>>,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<Value>>,
    outbox: mpsc::UnboundedSender<Value>,
    fail_listen: AtomicBool,
}

impl MockTransport {
    fn new(journal: Journal) -> Self {
        let (outbox, inbox) = mpsc::unbounded_channel();
        Self {
            journal,
            dispatcher: Mutex::new(None),
            inbox: tokio::sync::Mutex::new(inbox),
            outbox,
            fail_listen: AtomicBool::new(false),
        }
    }

    pub fn inject(&self, raw: Value) {
        let _ = self.outbox.send(raw);
    }

    pub fn close(&self) {
        let _ = self.outbox.send(Value::Null);
    }

    pub fn fail_listen(&self) {
        self.fail_listen.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn set_event_dispatcher(&self, dispatcher: Arc<EventDispatcher>) {
        *self.dispatcher.lock() = Some(dispatcher);
    }

    fn api_sender(&self) -> Arc<dyn ApiSender> {
        Arc::new(EchoSender)
    }

    async fn listen(&self) -> Result<(), BoxError> {
        let thread = std::thread::current().name().unwrap_or("unnamed").to_string();
        self.journal.lock().push(format!("listen on {thread}"));
        if self.fail_listen.load(Ordering::SeqCst) {
            return Err("connection refused".into());
        }

        let mut inbox = self.inbox.lock().await;
        while let Some(raw) = inbox.recv().await {
            if raw.is_null() {
                break;
            }
            let dispatcher = self.dispatcher.lock().clone();
            if let Some(dispatcher) = dispatcher {
                dispatcher.dispatch(&raw).await;
            }
        }
        Ok(())
    }
}

pub struct MockServices {
    pub journal: Journal,
    pub transport: Arc<MockTransport>,
    pub fail_load: AtomicBool,
    /// Keeps `load_all` pending until the start is cancelled.
    pub hold_load: AtomicBool,
    pub debug: AtomicBool,
    pub test_mode: AtomicBool,
}

impl MockServices {
    pub fn new() -> Arc<Self> {
        let journal: Journal = Arc::new(Mutex::new(Vec::new()));
        Arc::new(Self {
            transport: Arc::new(MockTransport::new(Arc::clone(&journal))),
            journal,
            fail_load: AtomicBool::new(false),
            hold_load: AtomicBool::new(false),
            debug: AtomicBool::new(false),
            test_mode: AtomicBool::new(false),
        })
    }

    pub fn count(&self, entry: &str) -> usize {
        self.journal.lock().iter().filter(|e| *e == entry).count()
    }

    pub fn entries(&self) -> Vec<String> {
        self.journal.lock().clone()
    }
}

#[async_trait]
impl Services for MockServices {
    async fn load_all(&self) -> Result<(), BoxError> {
        self.journal.lock().push("load_all".to_string());
        if self.fail_load.load(Ordering::SeqCst) {
            return Err("load failed".into());
        }
        if self.hold_load.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn close_all(&self) -> Result<(), BoxError> {
        self.journal.lock().push("close_all".to_string());
        Ok(())
    }

    fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport) as Arc<dyn Transport>
    }

    fn set_debug_mode(&self, debug: bool) {
        self.debug.store(debug, Ordering::SeqCst);
    }

    fn set_test_mode(&self, test: bool) {
        self.test_mode.store(test, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct CountingLauncher {
    pub launches: AtomicUsize,
}

impl ProcessLauncher for CountingLauncher {
    fn launch(&self, config: &NcatConfig) -> Result<(), BoxError> {
        if config.napcat.remote_mode {
            return Err("remote mode cannot launch".into());
        }
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Wraps the raw payload itself as the typed event.
pub fn raw_parser(raw: &Value, _api: &BotApi) -> ParseResult<Payload> {
    Ok(Arc::new(raw.clone()))
}

pub fn client(services: &Arc<MockServices>) -> BotClient {
    BotClient::builder(
        Arc::clone(services) as Arc<dyn Services>,
        Arc::new(raw_parser) as Arc<dyn EventParser>,
    )
    .config(NcatConfig::default())
    .build()
    .expect("default config builds")
}

pub async fn wait_for_entry(services: &MockServices, entry: &str) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while services.count(entry) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("entry not recorded in time");
}

pub async fn wait_for_state(client: &BotClient, state: LifecycleState) {
    let mut rx = client.lifecycle().subscribe_state();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == state))
        .await
        .expect("state not reached in time")
        .expect("state channel closed");
}
