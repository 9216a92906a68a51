//! Bot lifecycle: prepare, run, clean up.
//!
//! Three ways to start the same main task:
//!
//! | Call | Blocks | Runtime |
//! |---|---|---|
//! | [`run`](LifecycleManager::run) | until the bot stops | a fresh multi-thread runtime |
//! | [`run_backend_async`](LifecycleManager::run_backend_async) | until ready | the caller's |
//! | [`run_backend`](LifecycleManager::run_backend) | until ready | a current-thread runtime on `NcatBot-Thread` |
//!
//! The main task binds the bus, loads the services, builds the API and the
//! dispatcher, loads plugins, signals ready and then awaits
//! [`Transport::listen`](ncatbot_core::Transport::listen). Whatever ends it
//! (transport close, error, cancellation, panic, abort), cleanup runs exactly
//! once.
//!
//! ```text
//! Idle ──prepare──▶ Preparing ──ready──▶ Running ──cleanup──▶ Stopping ──▶ Idle
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ncatbot_core::{
    BotApi, BoxError, EventBus, EventDispatcher, EventParser, Services, panic_message,
};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, NcatConfig, validate_config};
use crate::error::{LifecycleError, LifecycleResult};
use crate::plugin::PluginLoader;

/// Keys accepted by the start calls.
pub const START_OPTION_KEYS: &[&str] = &[
    "bot_uin",
    "root",
    "ws_uri",
    "webui_uri",
    "ws_token",
    "webui_token",
    "ws_listen_ip",
    "remote_mode",
    "enable_webui",
    "debug",
    "mock",
    "load_plugin",
];

/// Name of the thread started by [`LifecycleManager::run_backend`].
pub const BACKEND_THREAD_NAME: &str = "NcatBot-Thread";

/// Starts the external protocol process (NapCat) before the bot connects.
pub trait ProcessLauncher: Send + Sync {
    fn launch(&self, config: &NcatConfig) -> Result<(), BoxError>;
}

/// Options of one start call, checked against [`START_OPTION_KEYS`].
///
/// `null` values are ignored. `mock` skips the process launch and puts the
/// services in test mode.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StartOptions {
    entries: Vec<(String, Value)>,
}

impl StartOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key`, replacing an earlier value.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
        self
    }

    pub fn bot_uin(self, uin: impl Into<Value>) -> Self {
        self.set("bot_uin", uin)
    }

    pub fn root(self, uin: impl Into<Value>) -> Self {
        self.set("root", uin)
    }

    pub fn mock(self, mock: bool) -> Self {
        self.set("mock", mock)
    }

    pub fn debug(self, debug: bool) -> Self {
        self.set("debug", debug)
    }

    pub fn load_plugin(self, load: bool) -> Self {
        self.set("load_plugin", load)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for StartOptions
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::new(), |options, (k, v)| options.set(k, v))
    }
}

/// Observable lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Preparing,
    Running,
    Stopping,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Preparing => "preparing",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct RunFlags {
    debug: bool,
    mock: bool,
    load_plugin: bool,
}

/// The in-flight main task. `handle` is `None` under the blocking `run`,
/// where the task is driven by `block_on` instead of spawned.
struct MainTask {
    token: CancellationToken,
    handle: Option<JoinHandle<LifecycleResult<()>>>,
}

/// Starts and stops the bot.
pub struct LifecycleManager {
    bus: EventBus,
    services: Arc<dyn Services>,
    parser: Arc<dyn EventParser>,
    launcher: Option<Arc<dyn ProcessLauncher>>,
    plugins: Arc<PluginLoader>,
    config: RwLock<NcatConfig>,
    flags: Mutex<RunFlags>,
    running: AtomicBool,
    state: watch::Sender<LifecycleState>,
    api: RwLock<Option<BotApi>>,
    main_task: Mutex<Option<MainTask>>,
    backend_thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl LifecycleManager {
    pub fn new(
        bus: EventBus,
        services: Arc<dyn Services>,
        parser: Arc<dyn EventParser>,
        config: NcatConfig,
    ) -> Self {
        let (state, _) = watch::channel(LifecycleState::Idle);
        Self {
            plugins: Arc::new(PluginLoader::new(bus.clone())),
            bus,
            services,
            parser,
            launcher: None,
            config: RwLock::new(config),
            flags: Mutex::new(RunFlags::default()),
            running: AtomicBool::new(false),
            state,
            api: RwLock::new(None),
            main_task: Mutex::new(None),
            backend_thread: Mutex::new(None),
        }
    }

    /// Launches NapCat through `launcher` on every non-mock start.
    pub fn with_launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn plugins(&self) -> &Arc<PluginLoader> {
        &self.plugins
    }

    pub fn services(&self) -> &Arc<dyn Services> {
        &self.services
    }

    /// Current configuration, start options included.
    pub fn config(&self) -> NcatConfig {
        self.config.read().clone()
    }

    /// API of the running bot.
    pub fn api(&self) -> Option<BotApi> {
        self.api.read().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Whether the last start ran in debug mode.
    pub fn is_debug(&self) -> bool {
        self.flags.lock().debug
    }

    /// Whether the last start was a mock start.
    pub fn is_mock(&self) -> bool {
        self.flags.lock().mock
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: LifecycleState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Lifecycle state changed");
        }
    }

    // -------------------------------------------------------------------------
    // Phases
    // -------------------------------------------------------------------------

    /// Validates `options`, merges them into the configuration, configures
    /// services and plugins, launches NapCat unless mocked, and marks the
    /// manager running.
    pub fn prepare(&self, options: &StartOptions) -> LifecycleResult<()> {
        if let Some((key, _)) = options.iter().find(|(k, _)| !START_OPTION_KEYS.contains(k)) {
            return Err(ConfigError::UnknownOption(key.to_string()).into());
        }

        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(LifecycleError::AlreadyStarting);
        }

        self.set_state(LifecycleState::Preparing);
        if let Err(e) = self.apply_options(options) {
            self.abort_start();
            return Err(e);
        }
        Ok(())
    }

    fn apply_options(&self, options: &StartOptions) -> LifecycleResult<()> {
        let mut config = self.config();
        let mut mock = false;

        for (key, value) in options.iter() {
            match (key, value) {
                (_, Value::Null) => {}
                ("mock", Value::Bool(flag)) => mock = *flag,
                ("mock", _) => {
                    return Err(ConfigError::invalid_value("mock", "expected a boolean").into());
                }
                _ => config.update_value(key, value)?,
            }
        }

        validate_config(&config)?;
        for issue in config.issues() {
            warn!(%issue, "Configuration issue");
        }

        let debug_mode = config.debug || mock;
        self.services.set_debug_mode(debug_mode);
        self.services.set_test_mode(mock);
        self.plugins.configure(debug_mode, &config.plugin);
        *self.flags.lock() = RunFlags {
            debug: debug_mode,
            mock,
            load_plugin: config.plugin.load_plugin,
        };

        if mock {
            info!("Mock mode, NapCat will not be launched");
        } else if let Some(launcher) = &self.launcher {
            launcher.launch(&config).map_err(LifecycleError::Launch)?;
        }

        debug!(bot_uin = %config.bot_uin, debug_mode, mock, "Bot prepared");
        *self.config.write() = config;
        Ok(())
    }

    fn abort_start(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.set_state(LifecycleState::Idle);
    }

    /// Body of the main task.
    ///
    /// The API is published on `ready` once the bot is up. Cleanup runs
    /// before this returns, or from the guard if the future is dropped.
    async fn core_execution(
        self: Arc<Self>,
        ready: watch::Sender<Option<BotApi>>,
        token: CancellationToken,
    ) -> LifecycleResult<()> {
        let guard = CleanupGuard::new(Arc::clone(&self));

        let outcome = tokio::select! {
            biased;
            () = token.cancelled() => Err(LifecycleError::Cancelled),
            result = self.start_and_listen(&ready) => result,
        };

        match &outcome {
            Ok(()) => info!("Transport closed, stopping bot"),
            Err(LifecycleError::Cancelled) => info!("Bot cancelled, stopping"),
            Err(e) => error!(error = %e, "Bot stopped with an error"),
        }

        guard.finish().await;
        outcome
    }

    async fn start_and_listen(&self, ready: &watch::Sender<Option<BotApi>>) -> LifecycleResult<()> {
        self.bus.bind_loop(None);

        self.services
            .load_all()
            .await
            .map_err(LifecycleError::Service)?;

        let transport = self.services.transport();
        let api = BotApi::new(transport.api_sender());
        let dispatcher = EventDispatcher::new(self.bus.clone(), api.clone(), Arc::clone(&self.parser));
        transport.set_event_dispatcher(Arc::new(dispatcher));
        *self.api.write() = Some(api.clone());

        let flags = *self.flags.lock();
        if flags.load_plugin {
            self.plugins.load_external_plugins(&api).await;
        }
        self.plugins.load_builtin_plugins(&api).await;

        self.set_state(LifecycleState::Running);
        ready.send_replace(Some(api));
        info!(plugins = ?self.plugins.list_plugins(), "Bot started");

        transport.listen().await.map_err(LifecycleError::Transport)
    }

    /// Unloads plugins and closes services. Runs once per start.
    pub async fn cleanup(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        self.set_state(LifecycleState::Stopping);
        self.plugins.unload_all().await;
        if let Err(e) = self.services.close_all().await {
            error!(error = %e, "Failed to close services");
        }
        self.api.write().take();
        self.bus.unbind();
        self.set_state(LifecycleState::Idle);
        info!("Bot resources released");
    }

    // -------------------------------------------------------------------------
    // Start modes
    // -------------------------------------------------------------------------

    /// Blocking start. Exits the process with status 1 on failure.
    ///
    /// Ctrl-C and SIGTERM stop the bot cleanly.
    pub fn run(self: &Arc<Self>, options: StartOptions) {
        if let Err(e) = self.try_run(options) {
            error!(error = %e, "Bot failed");
            std::process::exit(1);
        }
    }

    /// [`run`](Self::run) returning the failure instead of exiting.
    pub fn try_run(self: &Arc<Self>, options: StartOptions) -> LifecycleResult<()> {
        if Handle::try_current().is_ok() {
            return Err(LifecycleError::NestedRuntime);
        }
        if self.is_running() {
            warn!("Bot is already running");
            return Ok(());
        }

        self.prepare(&options)?;
        let runtime = match tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                self.abort_start();
                return Err(e.into());
            }
        };

        let token = CancellationToken::new();
        *self.main_task.lock() = Some(MainTask {
            token: token.clone(),
            handle: None,
        });

        let this = Arc::clone(self);
        let outcome = runtime.block_on(async move {
            let signal_token = token.clone();
            let signals = tokio::spawn(async move {
                wait_for_shutdown_signal().await;
                signal_token.cancel();
            });

            let (ready, _ready_rx) = watch::channel(None);
            let result = this.core_execution(ready, token).await;
            signals.abort();
            result
        });
        self.main_task.lock().take();

        match outcome {
            Err(LifecycleError::Cancelled) => {
                info!("Bot exited");
                Ok(())
            }
            other => other,
        }
    }

    /// Starts the bot on the current runtime and returns once it is ready.
    ///
    /// A failure before ready is returned as the main task produced it.
    /// Calling this while the bot runs returns the existing API.
    pub async fn run_backend_async(self: &Arc<Self>, options: StartOptions) -> LifecycleResult<BotApi> {
        if self.is_running() {
            return self.existing_api();
        }
        self.prepare(&options)?;

        // Registered under the lock so shutdown can always reach the token.
        let token = CancellationToken::new();
        let (ready_tx, mut ready_rx) = watch::channel(None);
        {
            let mut slot = self.main_task.lock();
            let handle = tokio::spawn(Arc::clone(self).core_execution(ready_tx, token.clone()));
            *slot = Some(MainTask {
                token,
                handle: Some(handle),
            });
        }

        let ready = ready_rx
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|api| (*api).clone());
        if let Some(api) = ready {
            info!("Bot running in the background");
            return Ok(api);
        }

        // The sender is gone: the main task ended before ready.
        let handle = self.main_task.lock().take().and_then(|task| task.handle);
        let Some(handle) = handle else {
            return Err(LifecycleError::Cancelled);
        };
        match handle.await {
            Ok(Err(e)) => Err(e),
            Ok(Ok(())) => Err(LifecycleError::StartupAborted),
            Err(e) if e.is_panic() => Err(LifecycleError::Panicked(panic_message(
                e.into_panic().as_ref(),
            ))),
            Err(_) => Err(LifecycleError::Cancelled),
        }
    }

    /// Starts the bot on its own thread and returns once it is ready.
    ///
    /// The thread keeps its runtime alive until the bot stops. A non-daemon
    /// thread can be joined with [`join_backend`](Self::join_backend).
    /// Blocks the calling thread, including a runtime worker.
    pub fn run_backend(self: &Arc<Self>, daemon: bool, options: StartOptions) -> LifecycleResult<BotApi> {
        if self.is_running() {
            return self.existing_api();
        }

        let (tx, rx) = std::sync::mpsc::channel();
        let this = Arc::clone(self);
        let thread = std::thread::Builder::new()
            .name(BACKEND_THREAD_NAME.to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = tx.send(Err(LifecycleError::from(e)));
                        return;
                    }
                };

                runtime.block_on(async move {
                    let started = this.run_backend_async(options).await;
                    let keep_alive = started.is_ok();
                    let _ = tx.send(started);
                    if keep_alive {
                        this.wait_until_idle().await;
                    }
                });
                debug!("Backend runtime finished");
            })?;

        let result = rx.recv().unwrap_or(Err(LifecycleError::BackendExited));
        if !daemon {
            *self.backend_thread.lock() = Some(thread);
        }
        result
    }

    /// Joins the non-daemon backend thread. Returns `false` if there is none.
    pub fn join_backend(&self) -> bool {
        let thread = self.backend_thread.lock().take();
        match thread {
            Some(thread) => {
                if thread.join().is_err() {
                    error!("Backend thread panicked");
                }
                true
            }
            None => false,
        }
    }

    fn existing_api(&self) -> LifecycleResult<BotApi> {
        match self.api() {
            Some(api) => {
                warn!("Bot is already running, returning the existing API");
                Ok(api)
            }
            None => Err(LifecycleError::AlreadyStarting),
        }
    }

    async fn wait_until_idle(&self) {
        let mut state = self.state.subscribe();
        let _ = state.wait_for(|s| *s == LifecycleState::Idle).await;
    }

    // -------------------------------------------------------------------------
    // Stopping
    // -------------------------------------------------------------------------

    /// Cancels the main task and waits until cleanup is done.
    pub async fn shutdown(&self) {
        if !self.is_running() {
            debug!("Shutdown requested while not running");
            return;
        }
        info!("Shutting down bot");

        let handle = {
            let mut slot = self.main_task.lock();
            if let Some(task) = slot.as_ref() {
                task.token.cancel();
            }
            if slot.as_ref().is_some_and(|task| task.handle.is_some()) {
                slot.take().and_then(|task| task.handle)
            } else {
                None
            }
        };

        match handle {
            Some(handle) => match handle.await {
                Ok(Ok(())) | Ok(Err(LifecycleError::Cancelled)) => {}
                Ok(Err(e)) => warn!(error = %e, "Bot stopped with an error during shutdown"),
                Err(e) if e.is_panic() => error!("Main task panicked during shutdown"),
                Err(_) => debug!("Main task was aborted"),
            },
            None => self.wait_until_idle().await,
        }
    }

    /// Requests exit without waiting. Safe to call from a handler.
    pub fn bot_exit(&self) {
        self.plugins.clear();
        if !self.is_running() {
            warn!("bot_exit called while the bot is not running");
            return;
        }
        info!("Bot exit requested");
        if let Some(task) = self.main_task.lock().as_ref() {
            task.token.cancel();
        }
    }
}

impl fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("state", &self.state())
            .field("running", &self.is_running())
            .field("plugins", &self.plugins)
            .finish_non_exhaustive()
    }
}

/// Runs cleanup when the main task ends without reaching `finish`.
struct CleanupGuard {
    manager: Option<Arc<LifecycleManager>>,
}

impl CleanupGuard {
    fn new(manager: Arc<LifecycleManager>) -> Self {
        Self {
            manager: Some(manager),
        }
    }

    async fn finish(mut self) {
        if let Some(manager) = self.manager.take() {
            manager.cleanup().await;
        }
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        let Some(manager) = self.manager.take() else {
            return;
        };
        if !manager.is_running() {
            return;
        }
        match Handle::try_current() {
            Ok(handle) => {
                warn!("Main task dropped before cleanup, cleaning up in the background");
                handle.spawn(async move { manager.cleanup().await });
            }
            Err(_) => {
                error!("Main task dropped outside a runtime, resources were not released");
                manager.abort_start();
            }
        }
    }
}

/// Waits for Ctrl-C, or SIGTERM on unix.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler");
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Received Ctrl+C, shutting down");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_start_options_builder() {
        let options = StartOptions::new()
            .bot_uin(10001)
            .mock(true)
            .set("ws_uri", "localhost:3001")
            .mock(false);

        assert_eq!(options.get("bot_uin"), Some(&json!(10001)));
        assert_eq!(options.get("mock"), Some(&json!(false)));
        assert_eq!(options.iter().count(), 3);
    }

    #[test]
    fn test_start_options_from_iter() {
        let options: StartOptions = [("debug", json!(true)), ("root", json!("42"))]
            .into_iter()
            .collect();
        assert_eq!(options.get("root"), Some(&json!("42")));
        assert!(!options.is_empty());
    }

    #[test]
    fn test_option_keys_are_config_keys() {
        let mut config = NcatConfig::default();
        for key in START_OPTION_KEYS.iter().filter(|k| **k != "mock") {
            let current = serde_json::to_value(&config).unwrap();
            let path = crate::config::resolve_key(key);
            let slot = path
                .split('.')
                .try_fold(&current, |node, segment| node.get(segment))
                .cloned();
            assert!(slot.is_some(), "{key} is not a configuration key");
            config.update_value(key, &slot.unwrap()).unwrap();
        }
    }

    #[test]
    fn test_state_display() {
        assert_eq!(LifecycleState::Running.to_string(), "running");
    }
}
