//! The application-facing bot handle.
//!
//! ```rust,ignore
//! use ncatbot_runtime::{BotClient, StartOptions};
//!
//! let client = BotClient::builder(services, Arc::new(OneBotParser::new()))
//!     .config(config)
//!     .build()?;
//! client.registry().on_message(|event: Arc<OneBotEvent>| async move { Ok(()) })?;
//! client.run(StartOptions::new().bot_uin(10001));
//! ```

use std::sync::Arc;

use ncatbot_core::{BotApi, EventBus, EventParser, EventRegistry, Services};

use crate::config::{ConfigLoader, ConfigResult, NcatConfig};
use crate::error::{LifecycleResult, PluginResult};
use crate::lifecycle::{LifecycleManager, LifecycleState, ProcessLauncher, StartOptions};
use crate::logging;
use crate::plugin::{Plugin, PluginLoader};

/// Bus, registry and lifecycle of one bot.
#[derive(Debug, Clone)]
pub struct BotClient {
    registry: EventRegistry,
    lifecycle: Arc<LifecycleManager>,
}

impl BotClient {
    pub fn builder(services: Arc<dyn Services>, parser: Arc<dyn EventParser>) -> BotClientBuilder {
        BotClientBuilder {
            services,
            parser,
            config: None,
            launcher: None,
            init_logging: false,
        }
    }

    pub fn bus(&self) -> &EventBus {
        self.lifecycle.bus()
    }

    pub fn registry(&self) -> &EventRegistry {
        &self.registry
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    pub fn plugins(&self) -> &Arc<PluginLoader> {
        self.lifecycle.plugins()
    }

    /// API of the running bot.
    pub fn api(&self) -> Option<BotApi> {
        self.lifecycle.api()
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn register_plugin(&self, plugin: impl Plugin) -> PluginResult<()> {
        self.lifecycle.plugins().register(Arc::new(plugin))
    }

    pub fn run(&self, options: StartOptions) {
        self.lifecycle.run(options);
    }

    pub fn try_run(&self, options: StartOptions) -> LifecycleResult<()> {
        self.lifecycle.try_run(options)
    }

    pub async fn run_backend_async(&self, options: StartOptions) -> LifecycleResult<BotApi> {
        self.lifecycle.run_backend_async(options).await
    }

    pub fn run_backend(&self, daemon: bool, options: StartOptions) -> LifecycleResult<BotApi> {
        self.lifecycle.run_backend(daemon, options)
    }

    pub fn join_backend(&self) -> bool {
        self.lifecycle.join_backend()
    }

    pub async fn shutdown(&self) {
        self.lifecycle.shutdown().await;
    }

    pub fn bot_exit(&self) {
        self.lifecycle.bot_exit();
    }
}

/// Builder for [`BotClient`].
pub struct BotClientBuilder {
    services: Arc<dyn Services>,
    parser: Arc<dyn EventParser>,
    config: Option<NcatConfig>,
    launcher: Option<Arc<dyn ProcessLauncher>>,
    init_logging: bool,
}

impl BotClientBuilder {
    /// Uses `config` instead of loading one from files and environment.
    pub fn config(mut self, config: NcatConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Installs the global subscriber from the logging configuration.
    pub fn init_logging(mut self, enabled: bool) -> Self {
        self.init_logging = enabled;
        self
    }

    pub fn build(self) -> ConfigResult<BotClient> {
        let config = match self.config {
            Some(config) => config,
            None => ConfigLoader::new().load()?,
        };
        if self.init_logging {
            logging::init_from_config(&config.logging);
        }

        let bus = EventBus::with_default_timeout(config.event_bus.handler_timeout());
        let registry = EventRegistry::new(bus.clone());
        let mut lifecycle = LifecycleManager::new(bus, self.services, self.parser, config);
        if let Some(launcher) = self.launcher {
            lifecycle = lifecycle.with_launcher(launcher);
        }

        Ok(BotClient {
            registry,
            lifecycle: Arc::new(lifecycle),
        })
    }
}
