//! Source coordinator.
//!
//! Holds a name-keyed registry of sources and a list of strategies. On
//! activation each strategy becomes a listener on its source's notifier;
//! the target is looked up by name every time the listener fires, so a
//! source can be replaced without redefining the rules.
//!
//! Deactivation closes the gate for new forwards only. A forward already
//! running keeps its listeners attached until it finishes, so the sync that
//! merges its result back still runs.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;

use crate::error::{Error, Result};
use crate::events::{self, Listener, SourceEvent, Subscription};
use crate::source::Source;
use crate::strategy::{Action, Strategy};

type Registry = Arc<DashMap<String, Arc<dyn Source>>>;

tokio::task_local! {
    /// Set while a forward runs, for the events it causes.
    static FORWARDING: ();
}

/// Activation state shared with the listeners.
#[derive(Default)]
struct Lifecycle {
    /// Open while active. Listeners check it before starting a forward.
    active: AtomicBool,
    in_flight: AtomicUsize,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl Lifecycle {
    fn subscriptions(&self) -> std::sync::MutexGuard<'_, Vec<Subscription>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Detach every listener once inactive with no forward running.
    fn release_if_idle(&self) {
        let mut subscriptions = self.subscriptions();
        if self.active.load(Ordering::SeqCst) || self.in_flight.load(Ordering::SeqCst) > 0 {
            return;
        }
        let count = subscriptions.len();
        subscriptions.clear();
        if count > 0 {
            tracing::debug!(listeners = count, "Listeners detached");
        }
    }
}

/// Counts a running forward. The last one to finish after deactivation
/// detaches the listeners.
struct InFlight(Arc<Lifecycle>);

impl InFlight {
    fn enter(lifecycle: &Arc<Lifecycle>) -> Self {
        lifecycle.in_flight.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(lifecycle))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.release_if_idle();
        }
    }
}

/// Coordinates a set of sources through strategies.
///
/// Thread-safe and can be shared via `Arc`.
pub struct Coordinator {
    sources: Registry,
    strategies: Mutex<Vec<Strategy>>,
    lifecycle: Arc<Lifecycle>,
}

impl Coordinator {
    pub fn new<I>(sources: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Source>>,
    {
        let registry = DashMap::new();
        for source in sources {
            registry.insert(source.name().to_string(), source);
        }
        Self {
            sources: Arc::new(registry),
            strategies: Mutex::new(Vec::new()),
            lifecycle: Arc::new(Lifecycle::default()),
        }
    }

    pub fn source(&self, name: &str) -> Option<Arc<dyn Source>> {
        self.sources.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn source_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sources.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Register a source, or swap out the one registered under the same
    /// name. Strategies targeting that name use the new source from the
    /// next event on. Listeners already attached to the old source's events
    /// stay there until the coordinator is reactivated.
    pub fn replace_source(&self, source: Arc<dyn Source>) -> Option<Arc<dyn Source>> {
        let name = source.name().to_string();
        tracing::info!(source = %name, "Source registered");
        self.sources.insert(name, source)
    }

    pub fn strategies(&self) -> Vec<Strategy> {
        self.strategies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Add a strategy. Only allowed while inactive.
    pub fn add_strategy(&self, strategy: Strategy) -> Result<()> {
        if self.is_active() {
            return Err(Error::AlreadyActive);
        }
        strategy.validate()?;
        for name in [&strategy.source, &strategy.target] {
            if !self.sources.contains_key(name.as_str()) {
                return Err(Error::UnknownSource(name.clone()));
            }
        }

        tracing::debug!(strategy = %strategy, "Strategy added");
        self.strategies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(strategy);
        Ok(())
    }

    pub fn add_strategies<I>(&self, strategies: I) -> Result<()>
    where
        I: IntoIterator<Item = Strategy>,
    {
        strategies
            .into_iter()
            .try_for_each(|strategy| self.add_strategy(strategy))
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle.active.load(Ordering::SeqCst)
    }

    /// Number of forwards currently running.
    pub fn in_flight(&self) -> usize {
        self.lifecycle.in_flight.load(Ordering::SeqCst)
    }

    /// Subscribe every strategy to its source's events.
    pub fn activate(&self) -> Result<()> {
        if self
            .lifecycle
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::AlreadyActive);
        }

        // Listeners left attached for forwards still running are replaced
        let mut attached = self.lifecycle.subscriptions();
        attached.clear();

        let strategies = self.strategies();
        let mut subscriptions = Vec::with_capacity(strategies.len());
        for strategy in &strategies {
            let Some(source) = self.source(&strategy.source) else {
                // Dropping the partial list unregisters what was attached
                drop(subscriptions);
                self.lifecycle.active.store(false, Ordering::SeqCst);
                return Err(Error::UnknownSource(strategy.source.clone()));
            };
            subscriptions.push(source.notifier().subscribe(
                strategy.on,
                strategy.blocking,
                self.forwarder(strategy),
            ));
        }
        *attached = subscriptions;

        tracing::info!(strategies = strategies.len(), "Coordinator activated");
        Ok(())
    }

    /// Stop forwarding. Forwards already running complete, including the
    /// syncs they trigger; no new forward starts. A no-op when inactive.
    pub fn deactivate(&self) {
        if !self.lifecycle.active.swap(false, Ordering::SeqCst) {
            tracing::debug!("Coordinator already inactive");
            return;
        }

        let in_flight = self.in_flight();
        self.lifecycle.release_if_idle();

        tracing::info!(in_flight, "Coordinator deactivated");
    }

    fn forwarder(&self, strategy: &Strategy) -> Listener {
        let sources = Arc::clone(&self.sources);
        let lifecycle = Arc::clone(&self.lifecycle);
        let strategy = strategy.clone();

        events::listener(move |event| {
            let sources = Arc::clone(&sources);
            let lifecycle = Arc::clone(&lifecycle);
            let strategy = strategy.clone();
            async move {
                // Counted before the gate check so deactivate cannot detach
                // listeners between the two
                let _in_flight = InFlight::enter(&lifecycle);
                let nested = FORWARDING.try_with(|_| ()).is_ok();
                if !nested && !lifecycle.active.load(Ordering::SeqCst) {
                    tracing::debug!(strategy = %strategy, "Coordinator inactive, not forwarding");
                    return Ok(());
                }
                let target = sources
                    .get(&strategy.target)
                    .map(|entry| Arc::clone(entry.value()))
                    .ok_or_else(|| Error::UnknownSource(strategy.target.clone()))?;

                FORWARDING
                    .scope((), forward(target.as_ref(), &strategy, &event))
                    .await
            }
        })
    }
}

async fn forward(target: &dyn Source, strategy: &Strategy, event: &SourceEvent) -> Result<()> {
    let missing = || Error::InvalidStrategy(format!("{strategy} received {}", event.kind()));
    tracing::debug!(strategy = %strategy, "Forwarding");

    match strategy.action {
        Action::Query => {
            target.query(event.query().ok_or_else(missing)?).await?;
        }
        Action::Update => {
            target.update(event.operation().ok_or_else(missing)?).await?;
        }
        Action::Sync => {
            target.sync(event.result().ok_or_else(missing)?).await?;
        }
    }
    Ok(())
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.deactivate();
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("sources", &self.source_names())
            .field("strategies", &self.strategies())
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventKind, Notifier};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tether_engine::{Operation, QueryExpr, RecordBatch, RecordIdentity};

    /// Counts calls; emits `beforeQuery` from `query`.
    struct Recorder {
        name: String,
        notifier: Notifier,
        queries: AtomicUsize,
        syncs: AtomicUsize,
    }

    impl Recorder {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                notifier: Notifier::new(name),
                queries: AtomicUsize::new(0),
                syncs: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Source for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn notifier(&self) -> &Notifier {
            &self.notifier
        }

        async fn query(&self, query: &QueryExpr) -> Result<RecordBatch> {
            self.notifier
                .emit(SourceEvent::BeforeQuery(query.clone()))
                .await?;
            self.queries.fetch_add(1, Ordering::SeqCst);
            Ok(RecordBatch::new())
        }

        async fn update(&self, _operation: &Operation) -> Result<RecordBatch> {
            Ok(RecordBatch::new())
        }

        async fn sync(&self, _batch: &RecordBatch) -> Result<()> {
            self.syncs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn query() -> QueryExpr {
        QueryExpr::find_record(RecordIdentity::new("planet", "1"))
    }

    fn forwarding(a: &Arc<Recorder>, b: &Arc<Recorder>) -> Coordinator {
        let coordinator = Coordinator::new([
            Arc::clone(a) as Arc<dyn Source>,
            Arc::clone(b) as Arc<dyn Source>,
        ]);
        coordinator
            .add_strategy(Strategy::request(
                "a",
                EventKind::BeforeQuery,
                "b",
                Action::Query,
                true,
            ))
            .unwrap();
        coordinator
    }

    #[tokio::test]
    async fn forwards_while_active() {
        let (a, b) = (Recorder::new("a"), Recorder::new("b"));
        let coordinator = forwarding(&a, &b);

        a.query(&query()).await.unwrap();
        assert_eq!(b.queries.load(Ordering::SeqCst), 0);

        coordinator.activate().unwrap();
        a.query(&query()).await.unwrap();
        assert_eq!(b.queries.load(Ordering::SeqCst), 1);

        coordinator.deactivate();
        a.query(&query()).await.unwrap();
        assert_eq!(b.queries.load(Ordering::SeqCst), 1);
        assert_eq!(a.notifier().listener_count(EventKind::BeforeQuery), 0);
    }

    #[test]
    fn activation_state_machine() {
        let (a, b) = (Recorder::new("a"), Recorder::new("b"));
        let coordinator = forwarding(&a, &b);

        coordinator.deactivate();
        coordinator.activate().unwrap();
        assert!(matches!(coordinator.activate(), Err(Error::AlreadyActive)));
        assert!(matches!(
            coordinator.add_strategies(Strategy::sync("b", "a", true)),
            Err(Error::AlreadyActive)
        ));

        coordinator.deactivate();
        coordinator.activate().unwrap();
        assert_eq!(a.notifier().listener_count(EventKind::BeforeQuery), 1);
    }

    #[test]
    fn unknown_sources_rejected() {
        let a = Recorder::new("a");
        let coordinator = Coordinator::new([a as Arc<dyn Source>]);
        let err = coordinator
            .add_strategy(Strategy::request(
                "a",
                EventKind::BeforeQuery,
                "missing",
                Action::Query,
                true,
            ))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownSource(name) if name == "missing"));
    }

    #[tokio::test]
    async fn replaced_target_receives_forwards() {
        let (a, b) = (Recorder::new("a"), Recorder::new("b"));
        let coordinator = forwarding(&a, &b);
        coordinator.activate().unwrap();

        let replacement = Recorder::new("b");
        let old = coordinator
            .replace_source(Arc::clone(&replacement) as Arc<dyn Source>)
            .unwrap();
        assert_eq!(old.name(), "b");

        a.query(&query()).await.unwrap();
        assert_eq!(b.queries.load(Ordering::SeqCst), 0);
        assert_eq!(replacement.queries.load(Ordering::SeqCst), 1);
    }
}
