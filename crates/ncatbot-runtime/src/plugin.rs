//! Plugin loading and unloading.
//!
//! # Responsibilities
//!
//! - Holds every registered [`Plugin`] together with its
//!   [`PluginLoadState`]; registration never loads anything.
//! - Loads external plugins (when enabled) and then built-ins, each group in
//!   dependency order with registration order as the tie-break.
//! - A plugin whose `on_load` fails or panics, or whose dependency is not
//!   active, is marked [`PluginLoadState::Failed`]; loading continues.
//! - Unloads in reverse load order. Every subscription a plugin made through
//!   its [`PluginContext`] is tagged with the plugin's name and removed with it.

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use ncatbot_core::{
    BotApi, BoxError, BusResult, EventBus, EventRegistry, Handler, OwnerMeta, SubscribeOptions,
    panic_message,
};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::PluginConfig;
use crate::error::{PluginError, PluginResult};

/// A unit of bot behaviour loaded by the [`PluginLoader`].
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn version(&self) -> &str {
        "0.0.0"
    }

    /// Built-ins load after the external set and ignore `load_plugin`.
    fn is_builtin(&self) -> bool {
        false
    }

    /// Names of plugins that must be active first.
    fn dependencies(&self) -> &[&'static str] {
        &[]
    }

    async fn on_load(&self, ctx: &PluginContext) -> Result<(), BoxError>;

    async fn on_unload(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

/// What a plugin gets to work with while loading.
#[derive(Clone)]
pub struct PluginContext {
    name: Arc<str>,
    registry: EventRegistry,
    api: BotApi,
    data_dir: PathBuf,
    debug: bool,
}

impl PluginContext {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registry whose subscriptions are owned by this plugin.
    pub fn registry(&self) -> &EventRegistry {
        &self.registry
    }

    pub fn api(&self) -> &BotApi {
        &self.api
    }

    /// `<plugins_dir>/<name>`; not created by the loader.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    pub fn subscribe(
        &self,
        topic: &str,
        handler: Handler,
        options: impl Into<SubscribeOptions>,
    ) -> BusResult<Uuid> {
        self.registry.subscribe(topic, handler, options)
    }
}

impl fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginContext")
            .field("name", &self.name)
            .field("data_dir", &self.data_dir)
            .field("debug", &self.debug)
            .finish_non_exhaustive()
    }
}

/// Load state of a registered plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginLoadState {
    /// Registered and not loaded.
    Registered,
    /// `on_load` succeeded; its subscriptions are live.
    Active,
    /// Skipped or failed during the last load attempt.
    Failed,
}

struct PluginEntry {
    plugin: Arc<dyn Plugin>,
    state: PluginLoadState,
}

#[derive(Debug, Default)]
struct LoaderSettings {
    debug: bool,
    config: PluginConfig,
}

/// Registers, loads and unloads plugins against one [`EventBus`].
pub struct PluginLoader {
    bus: EventBus,
    entries: RwLock<Vec<PluginEntry>>,
    load_order: Mutex<Vec<String>>,
    settings: RwLock<LoaderSettings>,
}

impl PluginLoader {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            entries: RwLock::new(Vec::new()),
            load_order: Mutex::new(Vec::new()),
            settings: RwLock::new(LoaderSettings::default()),
        }
    }

    /// Applies the settings of the next start.
    pub fn configure(&self, debug: bool, config: &PluginConfig) {
        *self.settings.write() = LoaderSettings {
            debug,
            config: config.clone(),
        };
    }

    pub fn register(&self, plugin: Arc<dyn Plugin>) -> PluginResult<()> {
        let mut entries = self.entries.write();
        if entries.iter().any(|e| e.plugin.name() == plugin.name()) {
            return Err(PluginError::AlreadyRegistered(plugin.name().to_string()));
        }
        debug!(plugin = %plugin.name(), version = %plugin.version(), "Plugin registered");
        entries.push(PluginEntry {
            plugin,
            state: PluginLoadState::Registered,
        });
        Ok(())
    }

    /// Loads every registered non-built-in plugin that is not blacklisted.
    ///
    /// Returns the number of plugins activated.
    pub async fn load_external_plugins(&self, api: &BotApi) -> usize {
        self.load_group(api, false).await
    }

    /// Loads every registered built-in plugin.
    pub async fn load_builtin_plugins(&self, api: &BotApi) -> usize {
        self.load_group(api, true).await
    }

    /// Loads one registered plugin whose dependencies are already active.
    pub async fn load_plugin(&self, name: &str, api: &BotApi) -> PluginResult<()> {
        let plugin = self
            .get_plugin(name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        if self.is_loaded(name) {
            return Ok(());
        }
        if let Some(missing) = self.missing_dependency(plugin.as_ref()) {
            self.set_state(name, PluginLoadState::Failed);
            return Err(PluginError::MissingDependency {
                plugin: name.to_string(),
                dependency: missing.to_string(),
            });
        }
        self.activate(&plugin, api).await
    }

    /// Unloads an active plugin and removes its subscriptions.
    ///
    /// Returns `false` when the plugin is not active.
    pub async fn unload_plugin(&self, name: &str) -> bool {
        if !self.is_loaded(name) {
            return false;
        }
        let Some(plugin) = self.get_plugin(name) else {
            return false;
        };
        self.deactivate(&plugin).await;
        true
    }

    /// Unloads a plugin and loads it again.
    pub async fn reload_plugin(&self, name: &str, api: &BotApi) -> PluginResult<()> {
        self.unload_plugin(name).await;
        self.load_plugin(name, api).await
    }

    /// Unloads every active plugin, last loaded first.
    pub async fn unload_all(&self) {
        let order: Vec<String> = self.load_order.lock().iter().rev().cloned().collect();
        for name in order {
            if let Some(plugin) = self.get_plugin(&name) {
                self.deactivate(&plugin).await;
            }
        }
    }

    /// Drops every plugin that is not active.
    ///
    /// Active plugins stay so the following cleanup can unload them.
    pub fn clear(&self) {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.state == PluginLoadState::Active);
        debug!(dropped = before - entries.len(), "Plugin index cleared");
    }

    /// Active plugins in load order.
    pub fn list_plugins(&self) -> Vec<String> {
        self.load_order.lock().clone()
    }

    /// Every registered plugin in registration order.
    pub fn registered_plugins(&self) -> Vec<String> {
        self.entries
            .read()
            .iter()
            .map(|e| e.plugin.name().to_string())
            .collect()
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.state(name) == Some(PluginLoadState::Active)
    }

    pub fn state(&self, name: &str) -> Option<PluginLoadState> {
        self.entries
            .read()
            .iter()
            .find(|e| e.plugin.name() == name)
            .map(|e| e.state)
    }

    pub fn get_plugin(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.entries
            .read()
            .iter()
            .find(|e| e.plugin.name() == name)
            .map(|e| Arc::clone(&e.plugin))
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    async fn load_group(&self, api: &BotApi, builtin: bool) -> usize {
        let candidates: Vec<Arc<dyn Plugin>> = {
            let settings = self.settings.read();
            let blacklist = &settings.config.plugin_blacklist;
            self.entries
                .read()
                .iter()
                .filter(|e| e.state != PluginLoadState::Active)
                .filter(|e| e.plugin.is_builtin() == builtin)
                .filter(|e| {
                    let blocked = !builtin && blacklist.iter().any(|b| b == e.plugin.name());
                    if blocked {
                        info!(plugin = %e.plugin.name(), "Plugin is blacklisted, skipping");
                    }
                    !blocked
                })
                .map(|e| Arc::clone(&e.plugin))
                .collect()
        };

        let (order, cyclic) = load_order(&candidates);
        if !cyclic.is_empty() {
            let names: Vec<String> = cyclic
                .iter()
                .map(|&i| candidates[i].name().to_string())
                .collect();
            error!(error = %PluginError::CircularDependency(names.clone()), "Skipping plugins");
            for name in &names {
                self.set_state(name, PluginLoadState::Failed);
            }
        }

        let mut loaded = 0;
        for index in order {
            let plugin = &candidates[index];
            if let Some(missing) = self.missing_dependency(plugin.as_ref()) {
                let err = PluginError::MissingDependency {
                    plugin: plugin.name().to_string(),
                    dependency: missing.to_string(),
                };
                warn!(error = %err, "Skipping plugin");
                self.set_state(plugin.name(), PluginLoadState::Failed);
                continue;
            }
            match self.activate(plugin, api).await {
                Ok(()) => loaded += 1,
                Err(e) => error!(error = %e, "Plugin load failed"),
            }
        }

        let group = if builtin { "builtin" } else { "external" };
        info!(group, loaded, "Plugins loaded");
        loaded
    }

    fn missing_dependency<'a>(&self, plugin: &'a dyn Plugin) -> Option<&'a str> {
        plugin
            .dependencies()
            .iter()
            .copied()
            .find(|dep| !self.is_loaded(dep))
    }

    fn context(&self, name: &str, api: &BotApi) -> PluginContext {
        let settings = self.settings.read();
        PluginContext {
            name: Arc::from(name),
            registry: EventRegistry::new(self.bus.clone()).with_owner(OwnerMeta::new(name)),
            api: api.clone(),
            data_dir: settings.config.plugins_dir.join(name),
            debug: settings.debug,
        }
    }

    async fn activate(&self, plugin: &Arc<dyn Plugin>, api: &BotApi) -> PluginResult<()> {
        let name = plugin.name();
        let ctx = self.context(name, api);

        let outcome = AssertUnwindSafe(plugin.on_load(&ctx)).catch_unwind().await;
        let source: BoxError = match outcome {
            Ok(Ok(())) => {
                self.set_state(name, PluginLoadState::Active);
                self.load_order.lock().push(name.to_string());
                info!(plugin = %name, version = %plugin.version(), "Plugin loaded");
                return Ok(());
            }
            Ok(Err(e)) => e,
            Err(panic) => format!("on_load panicked: {}", panic_message(panic.as_ref())).into(),
        };

        // Drop whatever the plugin subscribed before failing.
        self.bus.unsubscribe_owner(name);
        self.set_state(name, PluginLoadState::Failed);
        Err(PluginError::LoadFailed {
            plugin: name.to_string(),
            source,
        })
    }

    async fn deactivate(&self, plugin: &Arc<dyn Plugin>) {
        let name = plugin.name();
        match AssertUnwindSafe(plugin.on_unload()).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(plugin = %name, error = %e, "Plugin on_unload failed"),
            Err(panic) => error!(
                plugin = %name,
                panic = %panic_message(panic.as_ref()),
                "Plugin on_unload panicked"
            ),
        }

        let removed = self.bus.unsubscribe_owner(name);
        self.load_order.lock().retain(|n| n != name);
        self.set_state(name, PluginLoadState::Registered);
        info!(plugin = %name, subscriptions = removed, "Plugin unloaded");
    }

    fn set_state(&self, name: &str, state: PluginLoadState) {
        if let Some(entry) = self
            .entries
            .write()
            .iter_mut()
            .find(|e| e.plugin.name() == name)
        {
            entry.state = state;
        }
    }
}

impl fmt::Debug for PluginLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginLoader")
            .field("registered", &self.registered_plugins())
            .field("loaded", &self.list_plugins())
            .finish_non_exhaustive()
    }
}

/// Kahn's algorithm over the dependencies inside `plugins`.
///
/// Returns indices in load order, registration order breaking ties, and
/// separately the indices that could not be ordered because of a cycle.
/// Dependencies on plugins outside the slice add no edge.
fn load_order(plugins: &[Arc<dyn Plugin>]) -> (Vec<usize>, Vec<usize>) {
    let n = plugins.len();
    let index: HashMap<&str, usize> = plugins
        .iter()
        .enumerate()
        .map(|(i, p)| (p.name(), i))
        .collect();

    let mut in_degree = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, plugin) in plugins.iter().enumerate() {
        for dep in plugin.dependencies() {
            match index.get(dep) {
                Some(&provider) if provider != i => {
                    dependents[provider].push(i);
                    in_degree[i] += 1;
                }
                Some(_) => warn!(plugin = %plugin.name(), "Plugin depends on itself, ignored"),
                None => {}
            }
        }
    }

    let mut order = Vec::with_capacity(n);
    let mut current: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    while !current.is_empty() {
        let mut next = Vec::new();
        for &i in &current {
            for &j in &dependents[i] {
                in_degree[j] -= 1;
                if in_degree[j] == 0 {
                    next.push(j);
                }
            }
        }
        order.append(&mut current);
        next.sort_unstable();
        current = next;
    }

    let cyclic = (0..n).filter(|&i| in_degree[i] > 0).collect();
    (order, cyclic)
}

#[cfg(test)]
mod tests {
    use ncatbot_core::{Envelope, HandlerResult};
    use serde_json::Value;

    use super::*;

    #[derive(Default)]
    struct TestPlugin {
        name: &'static str,
        builtin: bool,
        deps: &'static [&'static str],
        fail: bool,
        journal: Option<Arc<Mutex<Vec<String>>>>,
    }

    impl TestPlugin {
        fn named(name: &'static str) -> Self {
            Self {
                name,
                ..Default::default()
            }
        }

        fn journal(mut self, journal: &Arc<Mutex<Vec<String>>>) -> Self {
            self.journal = Some(Arc::clone(journal));
            self
        }
    }

    #[async_trait]
    impl Plugin for TestPlugin {
        fn name(&self) -> &str {
            self.name
        }

        fn is_builtin(&self) -> bool {
            self.builtin
        }

        fn dependencies(&self) -> &[&'static str] {
            self.deps
        }

        async fn on_load(&self, ctx: &PluginContext) -> Result<(), BoxError> {
            ctx.subscribe(
                "ncatbot.message_event",
                Handler::new(|_env: Arc<Envelope>| async { HandlerResult::Ok(Value::Null) })
                    .named(self.name),
                0,
            )?;
            if self.fail {
                return Err("refusing to load".into());
            }
            if let Some(journal) = &self.journal {
                journal.lock().push(format!("load {}", self.name));
            }
            Ok(())
        }

        async fn on_unload(&self) -> Result<(), BoxError> {
            if let Some(journal) = &self.journal {
                journal.lock().push(format!("unload {}", self.name));
            }
            Ok(())
        }
    }

    fn loader() -> (PluginLoader, EventBus) {
        let bus = EventBus::new();
        (PluginLoader::new(bus.clone()), bus)
    }

    #[tokio::test]
    async fn test_load_and_unload_order() {
        let (loader, bus) = loader();
        let journal = Arc::new(Mutex::new(Vec::new()));
        loader
            .register(Arc::new(TestPlugin::named("a").journal(&journal)))
            .unwrap();
        loader
            .register(Arc::new(TestPlugin::named("b").journal(&journal)))
            .unwrap();

        assert_eq!(loader.load_external_plugins(&BotApi::disconnected()).await, 2);
        assert_eq!(loader.list_plugins(), vec!["a", "b"]);
        assert_eq!(bus.subscription_count(), 2);

        loader.unload_all().await;
        assert_eq!(bus.subscription_count(), 0);
        assert!(loader.list_plugins().is_empty());
        assert_eq!(
            *journal.lock(),
            vec!["load a", "load b", "unload b", "unload a"]
        );
        assert_eq!(loader.state("a"), Some(PluginLoadState::Registered));
    }

    #[tokio::test]
    async fn test_dependencies_reorder_loading() {
        let (loader, _bus) = loader();
        let journal = Arc::new(Mutex::new(Vec::new()));
        loader
            .register(Arc::new(TestPlugin {
                deps: &["core"],
                ..TestPlugin::named("feature").journal(&journal)
            }))
            .unwrap();
        loader
            .register(Arc::new(TestPlugin::named("core").journal(&journal)))
            .unwrap();

        loader.load_external_plugins(&BotApi::disconnected()).await;
        assert_eq!(loader.list_plugins(), vec!["core", "feature"]);
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_loading() {
        let (loader, bus) = loader();
        loader
            .register(Arc::new(TestPlugin {
                fail: true,
                ..TestPlugin::named("broken")
            }))
            .unwrap();
        loader
            .register(Arc::new(TestPlugin {
                deps: &["absent"],
                ..TestPlugin::named("orphan")
            }))
            .unwrap();
        loader.register(Arc::new(TestPlugin::named("fine"))).unwrap();

        let loaded = loader.load_external_plugins(&BotApi::disconnected()).await;
        assert_eq!(loaded, 1);
        assert_eq!(loader.state("broken"), Some(PluginLoadState::Failed));
        assert_eq!(loader.state("orphan"), Some(PluginLoadState::Failed));
        assert!(loader.is_loaded("fine"));
        // The failed plugin's partial subscription is gone.
        assert_eq!(bus.subscription_count(), 1);
    }

    #[tokio::test]
    async fn test_cycle_is_skipped() {
        let (loader, _bus) = loader();
        loader
            .register(Arc::new(TestPlugin {
                deps: &["y"],
                ..TestPlugin::named("x")
            }))
            .unwrap();
        loader
            .register(Arc::new(TestPlugin {
                deps: &["x"],
                ..TestPlugin::named("y")
            }))
            .unwrap();
        loader.register(Arc::new(TestPlugin::named("z"))).unwrap();

        loader.load_external_plugins(&BotApi::disconnected()).await;
        assert_eq!(loader.list_plugins(), vec!["z"]);
        assert_eq!(loader.state("x"), Some(PluginLoadState::Failed));
    }

    #[tokio::test]
    async fn test_groups_and_blacklist() {
        let (loader, _bus) = loader();
        loader
            .register(Arc::new(TestPlugin {
                builtin: true,
                ..TestPlugin::named("help")
            }))
            .unwrap();
        loader.register(Arc::new(TestPlugin::named("games"))).unwrap();
        loader.register(Arc::new(TestPlugin::named("spam"))).unwrap();
        loader.configure(
            false,
            &PluginConfig {
                plugin_blacklist: vec!["spam".to_string()],
                ..Default::default()
            },
        );

        let api = BotApi::disconnected();
        assert_eq!(loader.load_external_plugins(&api).await, 1);
        assert_eq!(loader.load_builtin_plugins(&api).await, 1);
        assert_eq!(loader.list_plugins(), vec!["games", "help"]);
        assert_eq!(loader.state("spam"), Some(PluginLoadState::Registered));
    }

    #[tokio::test]
    async fn test_unload_single_and_reload() {
        let (loader, bus) = loader();
        loader.register(Arc::new(TestPlugin::named("a"))).unwrap();
        let api = BotApi::disconnected();

        loader.load_plugin("a", &api).await.unwrap();
        assert!(loader.unload_plugin("a").await);
        assert!(!loader.unload_plugin("a").await);
        assert_eq!(bus.subscription_count(), 0);

        loader.reload_plugin("a", &api).await.unwrap();
        assert!(loader.is_loaded("a"));
        assert!(matches!(
            loader.load_plugin("missing", &api).await,
            Err(PluginError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_clear_keeps_active_plugins() {
        let (loader, _bus) = loader();
        loader.register(Arc::new(TestPlugin::named("on"))).unwrap();
        loader.load_plugin("on", &BotApi::disconnected()).await.unwrap();
        loader.register(Arc::new(TestPlugin::named("off"))).unwrap();

        loader.clear();
        assert_eq!(loader.registered_plugins(), vec!["on"]);
    }

    #[test]
    fn test_duplicate_registration() {
        let (loader, _bus) = loader();
        loader.register(Arc::new(TestPlugin::named("a"))).unwrap();
        assert!(matches!(
            loader.register(Arc::new(TestPlugin::named("a"))),
            Err(PluginError::AlreadyRegistered(_))
        ));
    }

    #[test]
    fn test_context_data_dir() {
        let (loader, _bus) = loader();
        loader.configure(
            true,
            &PluginConfig {
                plugins_dir: PathBuf::from("data"),
                ..Default::default()
            },
        );
        let ctx = loader.context("echo", &BotApi::disconnected());
        assert_eq!(ctx.data_dir(), Path::new("data/echo"));
        assert!(ctx.is_debug());
        assert_eq!(ctx.registry().owner().map(|o| o.name.as_str()), Some("echo"));
    }

    #[test]
    fn test_load_order() {
        let plugins: Vec<Arc<dyn Plugin>> = vec![
            Arc::new(TestPlugin {
                deps: &["c"],
                ..TestPlugin::named("a")
            }),
            Arc::new(TestPlugin::named("b")),
            Arc::new(TestPlugin::named("c")),
        ];
        let (order, cyclic) = load_order(&plugins);
        assert_eq!(order, vec![1, 2, 0]);
        assert!(cyclic.is_empty());
    }
}
