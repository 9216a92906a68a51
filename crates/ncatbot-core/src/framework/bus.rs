//! The priority- and pattern-aware event bus.
//!
//! # Topics and patterns
//!
//! A subscription is keyed by either an exact topic (`ncatbot.message_event`)
//! or a regular expression tagged with `re:` (`re:ncatbot\.(notice|request)`).
//! Publishing topic `T` matches, in this order:
//!
//! 1. exact subscriptions on `T`;
//! 2. exact subscriptions on every dot-prefix of `T`, longest first, so a
//!    handler on `ncatbot.notice` also sees `ncatbot.notice.group_increase`
//!    (never the reverse);
//! 3. every regex that matches `T` starting at position 0.
//!
//! The matched set is then ordered by priority (highest first) with the
//! handler name as tie-breaker, and handlers run strictly one after another.
//!
//! # Failures
//!
//! `publish` never fails. Handler errors, panics and timeouts are recorded on
//! the [`Envelope`] and the remaining handlers keep running.
//!
//! # Example
//!
//! ```rust,ignore
//! let bus = EventBus::new();
//! bus.subscribe("ncatbot.notice", Handler::new(on_notice).named("on_notice"), 10)?;
//!
//! let results = bus
//!     .publish(Envelope::shared("ncatbot.notice.group_increase", payload))
//!     .await;
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use regex::Regex;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::foundation::envelope::Envelope;
use crate::foundation::error::{BusError, BusResult, HandlerTimeoutError, ThreadsafePublishError};
use crate::framework::handler::Handler;

/// Tag marking a subscription pattern as a regular expression.
pub const REGEX_PREFIX: &str = "re:";

/// Handler timeout used when neither the subscription nor the bus sets one.
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(120);

/// Default wait used by [`EventBus::publish_threadsafe_wait`] callers.
pub const DEFAULT_PUBLISH_WAIT: Duration = Duration::from_secs(5);

/// Compiled patterns kept around for resubscription.
pub const REGEX_CACHE_CAPACITY: usize = 128;

const UNKNOWN_OWNER: &str = "Unknown";

// =============================================================================
// Subscription
// =============================================================================

/// Metadata about whoever registered a subscription, usually a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnerMeta {
    pub name: String,
}

impl OwnerMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Per-subscription settings.
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Higher runs first.
    pub priority: i32,
    /// Falls back to the bus default when unset.
    pub timeout: Option<Duration>,
    pub owner: Option<OwnerMeta>,
}

impl SubscribeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_owner(mut self, owner: OwnerMeta) -> Self {
        self.owner = Some(owner);
        self
    }
}

impl From<i32> for SubscribeOptions {
    fn from(priority: i32) -> Self {
        Self::default().with_priority(priority)
    }
}

#[derive(Debug)]
enum PatternKind {
    Exact,
    Regex(Regex),
}

#[derive(Debug)]
struct Subscription {
    id: Uuid,
    pattern: String,
    kind: PatternKind,
    priority: i32,
    handler: Handler,
    timeout: Duration,
}

impl Subscription {
    fn matches_regex(&self, topic: &str) -> bool {
        match &self.kind {
            PatternKind::Regex(re) => re.find(topic).is_some_and(|m| m.start() == 0),
            PatternKind::Exact => false,
        }
    }
}

fn dispatch_order(a: &Arc<Subscription>, b: &Arc<Subscription>) -> std::cmp::Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.handler.name().cmp(b.handler.name()))
}

#[derive(Default)]
struct Tables {
    exact: HashMap<String, Vec<Arc<Subscription>>>,
    regex: Vec<Arc<Subscription>>,
    owners: HashMap<Uuid, OwnerMeta>,
}

impl Tables {
    fn remove(&mut self, id: Uuid) -> bool {
        let mut removed = self.owners.remove(&id).is_some();

        self.exact.retain(|_, list| {
            let before = list.len();
            list.retain(|s| s.id != id);
            removed |= list.len() != before;
            !list.is_empty()
        });

        let before = self.regex.len();
        self.regex.retain(|s| s.id != id);
        removed |= self.regex.len() != before;

        removed
    }

    fn len(&self) -> usize {
        self.exact.values().map(Vec::len).sum::<usize>() + self.regex.len()
    }
}

/// The runtime the bus publishes on.
///
/// `alive` is cancelled when the binding is replaced, or when the runtime is
/// dropped and takes the watcher task with it.
struct Binding {
    handle: Handle,
    alive: CancellationToken,
}

impl Binding {
    fn watch(handle: Handle) -> Self {
        let alive = CancellationToken::new();
        let guard = alive.clone().drop_guard();
        let released = alive.clone();
        handle.spawn(async move {
            let _guard = guard;
            released.cancelled().await;
        });
        Self { handle, alive }
    }

    fn is_alive(&self) -> bool {
        !self.alive.is_cancelled()
    }
}

// =============================================================================
// EventBus
// =============================================================================

struct Inner {
    tables: RwLock<Tables>,
    regex_cache: Mutex<HashMap<String, Regex>>,
    runtime: RwLock<Option<Binding>>,
    default_timeout: Duration,
}

/// Publish/subscribe hub shared by the dispatcher, plugins and the lifecycle.
///
/// Cloning is cheap; all clones share the same tables.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Creates a bus with the default handler timeout.
    pub fn new() -> Self {
        Self::with_default_timeout(DEFAULT_HANDLER_TIMEOUT)
    }

    /// Creates a bus whose subscriptions default to `timeout`.
    pub fn with_default_timeout(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                tables: RwLock::new(Tables::default()),
                regex_cache: Mutex::new(HashMap::new()),
                runtime: RwLock::new(None),
                default_timeout: timeout,
            }),
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.inner.default_timeout
    }

    // -------------------------------------------------------------------------
    // Registration
    // -------------------------------------------------------------------------

    /// Registers `handler` for an exact topic or a `re:` pattern.
    ///
    /// A regex pattern is compiled here, so a malformed one is rejected
    /// immediately and can never fail a later publish.
    pub fn subscribe(
        &self,
        pattern: &str,
        handler: Handler,
        options: impl Into<SubscribeOptions>,
    ) -> BusResult<Uuid> {
        let options = options.into();
        let kind = match pattern.strip_prefix(REGEX_PREFIX) {
            Some(raw) => PatternKind::Regex(self.compile(raw)?),
            None => PatternKind::Exact,
        };

        let id = Uuid::new_v4();
        let subscription = Arc::new(Subscription {
            id,
            pattern: pattern.to_string(),
            kind,
            priority: options.priority,
            handler,
            timeout: options.timeout.unwrap_or(self.inner.default_timeout),
        });

        debug!(
            pattern = %subscription.pattern,
            handler = subscription.handler.name(),
            priority = subscription.priority,
            %id,
            "Subscribed handler"
        );

        let mut tables = self.inner.tables.write();
        if let Some(owner) = options.owner {
            tables.owners.insert(id, owner);
        }
        let list = match subscription.kind {
            PatternKind::Exact => tables.exact.entry(pattern.to_string()).or_default(),
            PatternKind::Regex(_) => &mut tables.regex,
        };
        list.push(subscription);
        list.sort_by(dispatch_order);

        Ok(id)
    }

    /// Removes a subscription. Returns whether anything was removed.
    pub fn unsubscribe(&self, id: Uuid) -> bool {
        let removed = self.inner.tables.write().remove(id);
        if removed {
            debug!(%id, "Unsubscribed handler");
        }
        removed
    }

    /// Removes every subscription registered by `owner`. Returns how many.
    pub fn unsubscribe_owner(&self, owner: &str) -> usize {
        let mut tables = self.inner.tables.write();
        let ids: Vec<Uuid> = tables
            .owners
            .iter()
            .filter(|(_, meta)| meta.name == owner)
            .map(|(id, _)| *id)
            .collect();

        let removed = ids.into_iter().filter(|id| tables.remove(*id)).count();
        if removed > 0 {
            debug!(owner, removed, "Removed owner subscriptions");
        }
        removed
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.inner.tables.read().len()
    }

    fn compile(&self, raw: &str) -> BusResult<Regex> {
        let mut cache = self.inner.regex_cache.lock();
        if let Some(re) = cache.get(raw) {
            return Ok(re.clone());
        }
        let re = Regex::new(raw).map_err(|e| BusError::InvalidPattern {
            pattern: raw.to_string(),
            reason: e.to_string(),
        })?;

        if cache.len() >= REGEX_CACHE_CAPACITY {
            let tables = self.inner.tables.read();
            cache.retain(|pattern, _| {
                tables
                    .regex
                    .iter()
                    .any(|s| s.pattern.strip_prefix(REGEX_PREFIX) == Some(pattern.as_str()))
            });
            if cache.len() >= REGEX_CACHE_CAPACITY {
                cache.clear();
            }
        }
        cache.insert(raw.to_string(), re.clone());
        Ok(re)
    }

    fn collect(&self, topic: &str) -> Vec<Arc<Subscription>> {
        let tables = self.inner.tables.read();
        let mut matched = Vec::new();

        if let Some(list) = tables.exact.get(topic) {
            matched.extend(list.iter().cloned());
        }

        let mut end = topic.len();
        while let Some(dot) = topic[..end].rfind('.') {
            let prefix = &topic[..dot];
            if let Some(list) = tables.exact.get(prefix).filter(|_| !prefix.is_empty()) {
                matched.extend(list.iter().cloned());
            }
            end = dot;
        }

        matched.extend(
            tables
                .regex
                .iter()
                .filter(|s| s.matches_regex(topic))
                .cloned(),
        );

        matched.sort_by(dispatch_order);
        matched
    }

    // -------------------------------------------------------------------------
    // Publishing
    // -------------------------------------------------------------------------

    /// Runs every matching handler in order and returns the collected results.
    pub async fn publish(&self, envelope: Arc<Envelope>) -> Vec<Value> {
        let handlers = self.collect(envelope.topic_str());
        debug!(
            topic = %envelope.topic_str(),
            handlers = handlers.len(),
            "Publishing event"
        );

        for sub in handlers {
            if envelope.is_propagation_stopped() {
                break;
            }

            let run = sub.handler.invoke(Arc::clone(&envelope));
            match tokio::time::timeout(sub.timeout, run).await {
                Ok(Ok(value)) => envelope.add_result(value),
                Ok(Err(e)) => {
                    error!(handler = sub.handler.name(), id = %sub.id, error = %e, "Handler failed");
                    envelope.add_exception(e);
                }
                Err(_) => {
                    let owner = self
                        .inner
                        .tables
                        .read()
                        .owners
                        .get(&sub.id)
                        .map_or_else(|| UNKNOWN_OWNER.to_string(), |o| o.name.clone());
                    error!(
                        handler = sub.handler.name(),
                        id = %sub.id,
                        timeout = ?sub.timeout,
                        "Handler timed out"
                    );
                    envelope.add_exception(
                        HandlerTimeoutError {
                            owner,
                            handler: sub.handler.name().to_string(),
                            timeout: sub.timeout,
                        }
                        .into(),
                    );
                }
            }
        }

        envelope.results()
    }

    /// Schedules `publish` on the bound runtime without waiting.
    ///
    /// Returns `None` when the bus is not bound.
    pub fn publish_threadsafe(&self, envelope: Arc<Envelope>) -> Option<JoinHandle<Vec<Value>>> {
        let Some(handle) = self.runtime_handle() else {
            warn!(topic = %envelope.topic_str(), "Event bus is not bound to a runtime, dropping publish");
            return None;
        };
        let bus = self.clone();
        Some(handle.spawn(async move { bus.publish(envelope).await }))
    }

    /// Publishes on the bound runtime and blocks the calling thread for the
    /// results. `None` means unbound, timed out or aborted.
    ///
    /// Must not be called from a thread that drives the bound runtime.
    pub fn publish_threadsafe_wait(
        &self,
        envelope: Arc<Envelope>,
        timeout: Option<Duration>,
    ) -> Option<Vec<Value>> {
        let topic = envelope.topic();
        match self.try_publish_threadsafe_wait(envelope, timeout) {
            Ok(results) => Some(results),
            Err(ThreadsafePublishError::NotBound) => None,
            Err(e) => {
                error!(%topic, error = %e, "Threadsafe publish failed");
                None
            }
        }
    }

    /// Like [`publish_threadsafe_wait`](Self::publish_threadsafe_wait) but
    /// reports why no results came back.
    pub fn try_publish_threadsafe_wait(
        &self,
        envelope: Arc<Envelope>,
        timeout: Option<Duration>,
    ) -> Result<Vec<Value>, ThreadsafePublishError> {
        let Some(handle) = self.runtime_handle() else {
            warn!(topic = %envelope.topic_str(), "Event bus is not bound to a runtime");
            return Err(ThreadsafePublishError::NotBound);
        };

        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        let bus = self.clone();
        handle.spawn(async move {
            let results = bus.publish(envelope).await;
            let _ = tx.send(results);
        });

        match timeout {
            Some(limit) => rx.recv_timeout(limit).map_err(|e| match e {
                std::sync::mpsc::RecvTimeoutError::Timeout => ThreadsafePublishError::Timeout(limit),
                std::sync::mpsc::RecvTimeoutError::Disconnected => ThreadsafePublishError::Aborted,
            }),
            None => rx.recv().map_err(|_| ThreadsafePublishError::Aborted),
        }
    }

    // -------------------------------------------------------------------------
    // Runtime binding
    // -------------------------------------------------------------------------

    /// Binds the bus to `handle`, or to the current runtime when `None`.
    ///
    /// Outside a runtime with no handle given, the bus is left unbound. Once
    /// the bound runtime is dropped the bus reads as unbound again.
    pub fn bind_loop(&self, handle: Option<Handle>) {
        let handle = handle.or_else(|| Handle::try_current().ok());
        if handle.is_none() {
            warn!("No tokio runtime available, event bus left unbound");
        }
        let previous = std::mem::replace(
            &mut *self.inner.runtime.write(),
            handle.map(Binding::watch),
        );
        if let Some(previous) = previous {
            previous.alive.cancel();
        }
    }

    /// Forgets the bound runtime.
    pub fn unbind(&self) {
        if let Some(binding) = self.inner.runtime.write().take() {
            binding.alive.cancel();
            debug!("Event bus unbound");
        }
    }

    pub fn is_bound(&self) -> bool {
        self.runtime_handle().is_some()
    }

    fn runtime_handle(&self) -> Option<Handle> {
        self.inner
            .runtime
            .read()
            .as_ref()
            .filter(|binding| binding.is_alive())
            .map(|binding| binding.handle.clone())
    }

    /// Drops every subscription and unbinds the bus. Safe to call repeatedly.
    pub fn shutdown(&self) {
        {
            let mut tables = self.inner.tables.write();
            tables.exact.clear();
            tables.regex.clear();
            tables.owners.clear();
        }
        self.inner.regex_cache.lock().clear();
        self.unbind();
        info!("Event bus shut down, all handlers cleared");
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriptions", &self.subscription_count())
            .field("bound", &self.is_bound())
            .field("default_timeout", &self.inner.default_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    use serde_json::json;
    use tokio_test::assert_ok;

    use super::*;
    use crate::foundation::error::HandlerError;
    use crate::framework::handler::HandlerResult;

    fn returning(name: &str, value: &'static str) -> Handler {
        Handler::new(move |_env| async move { HandlerResult::Ok(json!(value)) }).named(name)
    }

    fn counting(name: &str, counter: Arc<AtomicUsize>) -> Handler {
        Handler::new(move |_env| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                HandlerResult::Ok(Value::Null)
            }
        })
        .named(name)
    }

    #[tokio::test]
    async fn test_priority_order() {
        let bus = EventBus::new();
        assert_ok!(bus.subscribe("t", returning("h2", "b"), 1));
        assert_ok!(bus.subscribe("t", returning("h1", "a"), 10));

        let results = bus.publish(Envelope::shared("t", ())).await;
        assert_eq!(results, vec![json!("a"), json!("b")]);
    }

    #[tokio::test]
    async fn test_equal_priority_ordered_by_name() {
        let bus = EventBus::new();
        bus.subscribe("t", returning("zeta", "z"), 5).unwrap();
        bus.subscribe("t", returning("alpha", "a"), 5).unwrap();
        bus.subscribe("t", returning("mid", "m"), 7).unwrap();

        let results = bus.publish(Envelope::shared("t", ())).await;
        assert_eq!(results, vec![json!("m"), json!("a"), json!("z")]);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let id = bus.subscribe("t", counting("c", Arc::clone(&counter)), 0).unwrap();

        bus.publish(Envelope::shared("t", ())).await;
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish(Envelope::shared("t", ())).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_regex() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let id = bus
            .subscribe(r"re:ncatbot\..*", counting("c", Arc::clone(&counter)), 0)
            .unwrap();

        assert!(bus.unsubscribe(id));
        bus.publish(Envelope::shared("ncatbot.message_event", ())).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stop_propagation_skips_lower_priority() {
        let bus = EventBus::new();
        let low = Arc::new(AtomicUsize::new(0));

        bus.subscribe("t", returning("first", "a"), 10).unwrap();
        bus.subscribe(
            "t",
            Handler::new(|env: Arc<Envelope>| async move {
                env.stop_propagation();
                HandlerResult::Ok(json!("stop"))
            })
            .named("stopper"),
            5,
        )
        .unwrap();
        bus.subscribe("t", counting("low", Arc::clone(&low)), 1).unwrap();

        let env = Envelope::shared("t", ());
        let results = bus.publish(Arc::clone(&env)).await;

        assert_eq!(results, vec![json!("a"), json!("stop")]);
        assert_eq!(low.load(Ordering::SeqCst), 0);
        assert!(env.is_propagation_stopped());
        assert!(!env.is_intercepted());
    }

    #[tokio::test]
    async fn test_intercept_stops_propagation() {
        let bus = EventBus::new();
        let low = Arc::new(AtomicUsize::new(0));
        bus.subscribe(
            "t",
            Handler::new(|env: Arc<Envelope>| async move {
                env.intercept();
                HandlerResult::Ok(Value::Null)
            }),
            10,
        )
        .unwrap();
        bus.subscribe("t", counting("low", Arc::clone(&low)), 0).unwrap();

        let env = Envelope::shared("t", ());
        bus.publish(Arc::clone(&env)).await;
        assert!(env.is_intercepted());
        assert_eq!(low.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_timeout_is_recorded() {
        let bus = EventBus::new();
        bus.subscribe(
            "t",
            Handler::new(|_env| async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                HandlerResult::Ok(json!("late"))
            })
            .named("sleepy"),
            SubscribeOptions::new().with_timeout(Duration::from_millis(50)),
        )
        .unwrap();

        let env = Envelope::shared("t", ());
        let start = Instant::now();
        let results = bus.publish(Arc::clone(&env)).await;
        let elapsed = start.elapsed();

        assert!(results.is_empty());
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(200));

        let exceptions = env.exceptions();
        assert_eq!(exceptions.len(), 1);
        let timeout = exceptions[0].as_timeout().expect("timeout error");
        assert_eq!(timeout.handler, "sleepy");
        assert_eq!(timeout.owner, "Unknown");
        assert_eq!(timeout.timeout, Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_timeout_reports_owner() {
        let bus = EventBus::new();
        bus.subscribe(
            "t",
            Handler::new(|_env| async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                HandlerResult::Ok(Value::Null)
            }),
            SubscribeOptions::new()
                .with_timeout(Duration::from_millis(10))
                .with_owner(OwnerMeta::new("weather")),
        )
        .unwrap();

        let env = Envelope::shared("t", ());
        bus.publish(Arc::clone(&env)).await;
        assert_eq!(env.exceptions()[0].as_timeout().unwrap().owner, "weather");
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_other_handlers() {
        let bus = EventBus::new();
        bus.subscribe(
            "t",
            Handler::new(|_env| async { HandlerResult::Err("bad input".into()) }).named("err"),
            3,
        )
        .unwrap();
        bus.subscribe(
            "t",
            Handler::new(|_env| async {
                if true {
                    panic!("kaboom");
                }
                HandlerResult::Ok(Value::Null)
            })
            .named("panic"),
            2,
        )
        .unwrap();
        bus.subscribe("t", returning("ok", "fine"), 1).unwrap();

        let env = Envelope::shared("t", ());
        let results = bus.publish(Arc::clone(&env)).await;

        assert_eq!(results, vec![json!("fine")]);
        let exceptions = env.exceptions();
        assert_eq!(exceptions.len(), 2);
        assert!(matches!(exceptions[0], HandlerError::Failed { .. }));
        assert!(matches!(exceptions[1], HandlerError::Panicked { .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_blocking_handler_runs_off_runtime() {
        let bus = EventBus::new();
        bus.subscribe(
            "t",
            Handler::blocking(|_env| {
                std::thread::sleep(Duration::from_millis(10));
                Ok(json!("sync"))
            }),
            0,
        )
        .unwrap();

        let results = bus.publish(Envelope::shared("t", ())).await;
        assert_eq!(results, vec![json!("sync")]);
    }

    #[tokio::test]
    async fn test_prefix_matching_is_one_way() {
        let bus = EventBus::new();
        let general = Arc::new(AtomicUsize::new(0));
        let specific = Arc::new(AtomicUsize::new(0));

        bus.subscribe("ncatbot.notice", counting("general", Arc::clone(&general)), 0)
            .unwrap();
        bus.subscribe(
            "ncatbot.notice.group_increase",
            counting("specific", Arc::clone(&specific)),
            0,
        )
        .unwrap();

        bus.publish(Envelope::shared("ncatbot.notice.group_increase", ()))
            .await;
        assert_eq!(general.load(Ordering::SeqCst), 1);
        assert_eq!(specific.load(Ordering::SeqCst), 1);

        bus.publish(Envelope::shared("ncatbot.notice", ())).await;
        assert_eq!(general.load(Ordering::SeqCst), 2);
        assert_eq!(specific.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_prefix_requires_dot_boundary() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        bus.subscribe("ncatbot.not", counting("c", Arc::clone(&counter)), 0)
            .unwrap();

        bus.publish(Envelope::shared("ncatbot.notice", ())).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_regex_is_anchored_at_start() {
        let bus = EventBus::new();
        let anchored = Arc::new(AtomicUsize::new(0));
        let inner = Arc::new(AtomicUsize::new(0));

        bus.subscribe(
            r"re:ncatbot\.(message|notice)",
            counting("anchored", Arc::clone(&anchored)),
            0,
        )
        .unwrap();
        bus.subscribe("re:message", counting("inner", Arc::clone(&inner)), 0)
            .unwrap();

        bus.publish(Envelope::shared("ncatbot.message_event", ())).await;
        assert_eq!(anchored.load(Ordering::SeqCst), 1);
        assert_eq!(inner.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_regex_and_exact_merge_by_priority() {
        let bus = EventBus::new();
        bus.subscribe("ncatbot.request_event", returning("exact", "exact"), 1)
            .unwrap();
        bus.subscribe(r"re:ncatbot\.", returning("regex", "regex"), 9)
            .unwrap();

        let results = bus
            .publish(Envelope::shared("ncatbot.request_event", ()))
            .await;
        assert_eq!(results, vec![json!("regex"), json!("exact")]);
    }

    #[test]
    fn test_malformed_regex_fails_at_subscribe() {
        let bus = EventBus::new();
        let err = bus
            .subscribe("re:(unclosed", returning("h", "x"), 0)
            .unwrap_err();

        assert!(matches!(err, BusError::InvalidPattern { ref pattern, .. } if pattern == "(unclosed"));
        assert_eq!(bus.subscription_count(), 0);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let bus = EventBus::new();
        bus.subscribe("a", returning("h", "x"), 0).unwrap();
        bus.subscribe("re:b.*", returning("h", "x"), 0).unwrap();
        bus.subscribe(
            "c",
            returning("h", "x"),
            SubscribeOptions::new().with_owner(OwnerMeta::new("p")),
        )
        .unwrap();

        bus.shutdown();
        assert_eq!(bus.subscription_count(), 0);
        assert!(!bus.is_bound());

        bus.shutdown();
        assert_eq!(bus.subscription_count(), 0);
        assert_eq!(bus.unsubscribe_owner("p"), 0);
    }

    #[test]
    fn test_unsubscribe_owner() {
        let bus = EventBus::new();
        let owned = SubscribeOptions::new().with_owner(OwnerMeta::new("plugin_a"));
        bus.subscribe("a", returning("h1", "x"), owned.clone()).unwrap();
        bus.subscribe("re:a.*", returning("h2", "x"), owned).unwrap();
        bus.subscribe("a", returning("h3", "x"), 0).unwrap();

        assert_eq!(bus.unsubscribe_owner("plugin_a"), 2);
        assert_eq!(bus.subscription_count(), 1);
    }

    #[test]
    fn test_threadsafe_publish_unbound() {
        let bus = EventBus::new();
        assert!(!bus.is_bound());
        assert!(bus.publish_threadsafe(Envelope::shared("t", ())).is_none());
        assert_eq!(
            bus.try_publish_threadsafe_wait(Envelope::shared("t", ()), Some(DEFAULT_PUBLISH_WAIT)),
            Err(ThreadsafePublishError::NotBound)
        );
    }

    #[test]
    fn test_bind_loop_outside_runtime_stays_unbound() {
        let bus = EventBus::new();
        bus.bind_loop(None);
        assert!(!bus.is_bound());
    }

    #[test]
    fn test_dropped_runtime_reads_as_unbound() {
        let bus = EventBus::new();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async { bus.bind_loop(None) });
        assert!(bus.is_bound());

        drop(runtime);

        assert!(!bus.is_bound());
        assert!(bus.publish_threadsafe(Envelope::shared("t", ())).is_none());
        assert_eq!(
            bus.try_publish_threadsafe_wait(Envelope::shared("t", ()), Some(DEFAULT_PUBLISH_WAIT)),
            Err(ThreadsafePublishError::NotBound)
        );
    }

    #[tokio::test]
    async fn test_unbind_and_rebind() {
        let bus = EventBus::new();
        bus.bind_loop(None);
        bus.unbind();
        assert!(!bus.is_bound());
        assert!(bus.publish_threadsafe(Envelope::shared("t", ())).is_none());

        bus.bind_loop(None);
        bus.bind_loop(None);
        assert!(bus.is_bound());
    }

    #[test]
    fn test_regex_cache_is_bounded() {
        let bus = EventBus::new();
        let kept = bus.subscribe("re:kept", returning("k", "k"), 0).unwrap();
        for i in 0..REGEX_CACHE_CAPACITY * 2 {
            let id = bus
                .subscribe(&format!("re:generated_{i}"), returning("g", "g"), 0)
                .unwrap();
            bus.unsubscribe(id);
        }

        let cache_len = bus.inner.regex_cache.lock().len();
        assert!(cache_len <= REGEX_CACHE_CAPACITY);
        assert!(bus.unsubscribe(kept));

        bus.shutdown();
        assert!(bus.inner.regex_cache.lock().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_publish_threadsafe_wait_from_plain_thread() {
        let bus = EventBus::new();
        bus.subscribe("t", returning("h", "a"), 0).unwrap();
        bus.bind_loop(None);
        assert!(bus.is_bound());

        let b = bus.clone();
        let results = std::thread::spawn(move || {
            b.publish_threadsafe_wait(Envelope::shared("t", ()), Some(Duration::from_secs(5)))
        })
        .join()
        .unwrap();

        assert_eq!(results, Some(vec![json!("a")]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_publish_threadsafe_wait_timeout() {
        let bus = EventBus::new();
        bus.subscribe(
            "t",
            Handler::new(|_env| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                HandlerResult::Ok(Value::Null)
            }),
            0,
        )
        .unwrap();
        bus.bind_loop(None);

        let b = bus.clone();
        let outcome = std::thread::spawn(move || {
            b.try_publish_threadsafe_wait(Envelope::shared("t", ()), Some(Duration::from_millis(20)))
        })
        .join()
        .unwrap();

        assert_eq!(
            outcome,
            Err(ThreadsafePublishError::Timeout(Duration::from_millis(20)))
        );
    }

    #[tokio::test]
    async fn test_publish_threadsafe_returns_join_handle() {
        let bus = EventBus::new();
        bus.subscribe("t", returning("h", "a"), 0).unwrap();
        bus.bind_loop(Some(Handle::current()));

        let handle = bus.publish_threadsafe(Envelope::shared("t", ())).unwrap();
        assert_eq!(handle.await.unwrap(), vec![json!("a")]);
    }
}
