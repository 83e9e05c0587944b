use crate::internal_logging::diag_debug;
use crate::source::SourceInner;
use crate::{
    CreationOptions, DataRequest, IdGenerator, Listener, Parent, RandomIdGenerator, Source, Span,
};
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, RwLock, Weak};

/// Mediates every span-creation sampling decision and start/stop
/// notification for the sources created through it.
///
/// A `Registry` is an explicitly constructed handle; applications typically
/// wire one instance at startup and hand clones to the components that create
/// sources, which keeps tests free to build isolated registries. Cloning is
/// cheap and clones share state.
///
/// Attach and detach of listeners are individually atomic. A dispatch works
/// over a snapshot of the attached set taken when it begins: a listener
/// detached mid-dispatch may still see that one in-flight invocation, and a
/// listener attached mid-dispatch is picked up by the next one. Sampling and
/// notification take separate snapshots, so a listener attached between the
/// two observes the start of spans it never voted on.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    /// Create a registry with the default configuration.
    pub fn new() -> Self {
        Registry::builder().build()
    }

    /// Create a [`RegistryBuilder`] to configure a registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub(crate) fn inner(&self) -> &Arc<RegistryInner> {
        &self.inner
    }

    /// Create a named [`Source`] registered with this registry.
    pub fn source(&self, name: impl Into<String>) -> Source {
        self.source_inner(name.into(), None)
    }

    /// Create a named and versioned [`Source`] registered with this
    /// registry.
    pub fn source_with_version(
        &self,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Source {
        self.source_inner(name.into(), Some(version.into()))
    }

    fn source_inner(&self, name: String, version: Option<String>) -> Source {
        let source = Source::new(name, version, self.inner.clone());
        self.inner.register_source(&source);
        source
    }

    /// Fast-path guard: returns `false` when no attached listener's filter
    /// accepts `source`.
    ///
    /// The zero-listener answer is taken from a flag cached on the source,
    /// without locking or allocating; callers must check this before
    /// constructing any [`CreationOptions`]. With listeners attached,
    /// current filters are polled, so a filter replaced after attachment is
    /// honored on the next dispatch.
    pub fn should_create(&self, source: &Source) -> bool {
        self.inner.should_create(source)
    }

    /// Poll every attached listener whose filter accepts `source` for a
    /// sampling vote and fold the votes into one decision.
    ///
    /// Listeners are polled in attachment order. For each one, the sampling
    /// callback matching the parent form in `options` is invoked; an empty
    /// matching slot counts as [`DataRequest::AllDataAndRecorded`]. If
    /// `options` proposes a root span and a polled listener requests root
    /// trace-id synthesis, one id is generated before that listener's
    /// callback runs and is visible to every later callback in the round.
    ///
    /// Returns [`DataRequest::None`] when no accepting listener exists or
    /// every vote was `None`; the caller must then skip span construction.
    pub fn sampling_decision(&self, source: &Source, options: &mut CreationOptions) -> DataRequest {
        self.inner.sampling_decision(source, options)
    }

    /// Fan the start of `span` out to every attached listener whose filter
    /// accepts its source.
    ///
    /// Targeting is decided now, on current membership, independent of who
    /// voted at sampling time or how they voted.
    pub fn notify_started(&self, span: &Span) {
        self.inner.notify_started(span);
    }

    /// Fan the completion of `span` out to every attached listener whose
    /// filter accepts its source.
    pub fn notify_stopped(&self, span: &Span) {
        self.inner.notify_stopped(span);
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("listeners", &self.inner.listener_count())
            .finish()
    }
}

/// Configures and builds a [`Registry`].
#[derive(Debug)]
pub struct RegistryBuilder {
    id_generator: Box<dyn IdGenerator>,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        RegistryBuilder {
            id_generator: Box::<RandomIdGenerator>::default(),
        }
    }
}

impl RegistryBuilder {
    /// Use `id_generator` to mint trace and span ids.
    pub fn with_id_generator<T: IdGenerator + 'static>(mut self, id_generator: T) -> Self {
        self.id_generator = Box::new(id_generator);
        self
    }

    /// Build the configured registry.
    pub fn build(self) -> Registry {
        diag_debug!(name: "Registry.Built");
        Registry {
            inner: Arc::new(RegistryInner {
                listeners: RwLock::new(Vec::new()),
                sources: Mutex::new(Vec::new()),
                id_generator: self.id_generator,
            }),
        }
    }
}

pub(crate) struct RegistryInner {
    /// Attached listeners in attachment order; fan-out follows this order.
    listeners: RwLock<Vec<Arc<Listener>>>,
    /// Live sources, tracked weakly so the registry never extends a source's
    /// lifetime. Each source caches whether any listener is attached at all;
    /// filters are evaluated per dispatch.
    sources: Mutex<Vec<Weak<SourceInner>>>,
    id_generator: Box<dyn IdGenerator>,
}

impl RegistryInner {
    pub(crate) fn id_generator(&self) -> &dyn IdGenerator {
        self.id_generator.as_ref()
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.listeners.read().map(|l| l.len()).unwrap_or(0)
    }

    /// Snapshot the attached set. User callbacks are only ever invoked
    /// against such a snapshot, never while the listener list lock is held.
    fn snapshot(&self) -> Vec<Arc<Listener>> {
        self.listeners
            .read()
            .map(|listeners| listeners.clone())
            .unwrap_or_default()
    }

    /// Upgrade and prune the live source set.
    fn live_sources(&self) -> Vec<Arc<SourceInner>> {
        match self.sources.lock() {
            Ok(mut sources) => {
                sources.retain(|source| source.strong_count() > 0);
                sources.iter().filter_map(Weak::upgrade).collect()
            }
            Err(_) => Vec::new(),
        }
    }

    pub(crate) fn register_listener(&self, listener: Arc<Listener>) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.push(listener);
        }

        // Arm every source's fast-path flag. The flag only records that a
        // listener exists; filters run per dispatch, so a filter set or
        // replaced later still takes effect on the next dispatch.
        for inner in self.live_sources() {
            inner.listeners_attached.store(true, Ordering::Release);
        }
    }

    pub(crate) fn deregister_listener(&self, listener: &Listener) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.retain(|l| !std::ptr::eq(Arc::as_ptr(l), listener as *const _));
        }

        let any_attached = self.snapshot().iter().any(|l| l.is_attached());
        for inner in self.live_sources() {
            inner.listeners_attached.store(any_attached, Ordering::Release);
        }
    }

    pub(crate) fn register_source(&self, source: &Source) {
        if let Ok(mut sources) = self.sources.lock() {
            sources.push(Arc::downgrade(source.inner()));
        }

        let any_attached = self.snapshot().iter().any(|l| l.is_attached());
        source
            .inner()
            .listeners_attached
            .store(any_attached, Ordering::Release);
    }

    pub(crate) fn should_create(&self, source: &Source) -> bool {
        if !source.inner().listeners_attached.load(Ordering::Acquire) {
            return false;
        }

        self.snapshot()
            .iter()
            .any(|l| l.is_attached() && l.accepts(source))
    }

    pub(crate) fn sampling_decision(
        &self,
        source: &Source,
        options: &mut CreationOptions,
    ) -> DataRequest {
        let mut decision = DataRequest::None;

        for listener in self.snapshot() {
            if !listener.is_attached() || !listener.accepts(source) {
                continue;
            }

            // Root trace-id synthesis: generate once, before this listener's
            // callback runs, so every later callback in the round sees the
            // same id.
            if options.parent().is_root()
                && listener.auto_generate_root_trace_id()
                && options.trace_id().is_none()
            {
                options.set_trace_id(self.id_generator.new_trace_id());
            }

            let callback = match options.parent() {
                Parent::Id(_) => listener.sample_using_parent_id(),
                Parent::Root | Parent::Context(_) => listener.sample(),
            };
            let vote = match callback {
                Some(callback) => callback(options),
                // Default-allow: an observing listener without a sampling
                // callback opts in to full data.
                None => DataRequest::AllDataAndRecorded,
            };

            decision = decision.max(vote);
        }

        decision
    }

    pub(crate) fn notify_started(&self, span: &Span) {
        for listener in self.snapshot() {
            if !listener.is_attached() || !listener.accepts(span.source()) {
                continue;
            }
            if let Some(callback) = listener.on_started() {
                callback(span);
            }
        }
    }

    pub(crate) fn notify_stopped(&self, span: &Span) {
        for listener in self.snapshot() {
            if !listener.is_attached() || !listener.accepts(span.source()) {
                continue;
            }
            if let Some(callback) = listener.on_stopped() {
                callback(span);
            }
        }
    }
}

impl fmt::Debug for RegistryInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryInner")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{IncrementIdGenerator, SpanKind, TraceId};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    fn voting_listener(vote: DataRequest) -> Arc<Listener> {
        let listener = Listener::new();
        listener.set_should_listen_to(|_| true);
        listener.set_sample(move |_| vote);
        listener
    }

    #[test]
    fn zero_listeners_mean_no_creation() {
        let registry = Registry::new();
        let source = registry.source("payments");

        assert!(!source.has_listeners());
        assert!(!registry.should_create(&source));

        let mut options = CreationOptions::new("charge", SpanKind::Internal, Parent::Root);
        assert_eq!(
            registry.sampling_decision(&source, &mut options),
            DataRequest::None
        );
    }

    #[test]
    fn rejecting_filter_never_sees_callbacks() {
        let registry = Registry::new();
        let source = registry.source("payments");

        let polled = Arc::new(AtomicUsize::new(0));
        let listener = Listener::new();
        listener.set_should_listen_to(|source| source.name() == "orders");
        let polled_in_sample = polled.clone();
        listener.set_sample(move |_| {
            polled_in_sample.fetch_add(1, Ordering::SeqCst);
            DataRequest::AllDataAndRecorded
        });
        let polled_in_start = polled.clone();
        listener.set_on_started(move |_| {
            polled_in_start.fetch_add(1, Ordering::SeqCst);
        });
        listener.attach(&registry);

        assert!(!registry.should_create(&source));
        let mut options = CreationOptions::new("charge", SpanKind::Internal, Parent::Root);
        assert_eq!(
            registry.sampling_decision(&source, &mut options),
            DataRequest::None
        );
        assert!(source.start("charge").is_none());
        assert_eq!(polled.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn replacing_a_filter_after_attach_takes_effect() {
        let registry = Registry::new();
        let source = registry.source("payments");

        let listener = Listener::new();
        listener.set_should_listen_to(|source| source.name() == "orders");
        listener.set_sample(|_| DataRequest::AllData);
        listener.attach(&registry);

        assert!(!registry.should_create(&source));
        assert!(source.start("charge").is_none());

        // The broadened filter must apply to the pre-existing source on the
        // very next dispatch.
        listener.set_should_listen_to(|_| true);
        assert!(registry.should_create(&source));
        assert!(source.has_listeners());
        let span = source.start("charge").expect("span should be created");
        assert_eq!(span.data_request(), DataRequest::AllData);

        // And narrowing it back suppresses creation again.
        listener.set_should_listen_to(|source| source.name() == "orders");
        assert!(!registry.should_create(&source));
        assert!(source.start("charge").is_none());
    }

    #[test]
    fn votes_fold_by_max() {
        let cases = vec![
            (vec![DataRequest::None], DataRequest::None),
            (
                vec![DataRequest::None, DataRequest::PropagationOnly],
                DataRequest::PropagationOnly,
            ),
            (
                vec![
                    DataRequest::PropagationOnly,
                    DataRequest::AllData,
                    DataRequest::None,
                ],
                DataRequest::AllData,
            ),
            (
                vec![DataRequest::AllDataAndRecorded, DataRequest::None],
                DataRequest::AllDataAndRecorded,
            ),
        ];

        for (votes, expected) in cases {
            let registry = Registry::new();
            let source = registry.source("payments");
            let listeners: Vec<_> = votes.iter().map(|v| voting_listener(*v)).collect();
            for listener in &listeners {
                listener.attach(&registry);
            }

            let mut options = CreationOptions::new("charge", SpanKind::Internal, Parent::Root);
            assert_eq!(
                registry.sampling_decision(&source, &mut options),
                expected,
                "votes: {:?}",
                votes
            );
        }
    }

    #[test]
    fn missing_sampling_callback_defaults_to_full_capture() {
        let registry = Registry::new();
        let source = registry.source("payments");

        // Observer-only listener: start callback, no sampling callback.
        let listener = Listener::new();
        listener.set_should_listen_to(|_| true);
        listener.set_on_started(|_| {});
        listener.attach(&registry);

        // A second listener voting None must not lower the default.
        voting_listener(DataRequest::None).attach(&registry);

        let mut options = CreationOptions::new("charge", SpanKind::Internal, Parent::Root);
        assert_eq!(
            registry.sampling_decision(&source, &mut options),
            DataRequest::AllDataAndRecorded
        );
    }

    #[test]
    fn root_trace_id_generated_once_and_shared() {
        let registry = Registry::builder()
            .with_id_generator(IncrementIdGenerator::new())
            .build();
        let source = registry.source("payments");

        let seen = Arc::new(StdMutex::new(Vec::new()));

        // First listener does not request synthesis and is polled before any
        // id exists.
        let first_seen = seen.clone();
        let first = Listener::new();
        first.set_should_listen_to(|_| true);
        first.set_sample(move |options| {
            first_seen.lock().unwrap().push(options.trace_id());
            DataRequest::AllData
        });
        first.attach(&registry);

        // Two synthesis-requesting listeners; generation must happen exactly
        // once and be identical for both.
        for _ in 0..2 {
            let seen = seen.clone();
            let listener = Listener::new();
            listener.set_should_listen_to(|_| true);
            listener.set_auto_generate_root_trace_id(true);
            listener.set_sample(move |options| {
                seen.lock().unwrap().push(options.trace_id());
                DataRequest::AllData
            });
            listener.attach(&registry);
        }

        let mut options = CreationOptions::new("charge", SpanKind::Internal, Parent::Root);
        registry.sampling_decision(&source, &mut options);

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], None);
        assert_eq!(seen[1], Some(TraceId::from(1u128)));
        assert_eq!(seen[2], Some(TraceId::from(1u128)));
        assert_eq!(options.trace_id(), Some(TraceId::from(1u128)));
    }

    #[test]
    fn parent_form_selects_sampling_callback() {
        let registry = Registry::new();
        let source = registry.source("payments");

        let by_context = Arc::new(AtomicUsize::new(0));
        let by_parent_id = Arc::new(AtomicUsize::new(0));

        let listener = Listener::new();
        listener.set_should_listen_to(|_| true);
        let context_hits = by_context.clone();
        listener.set_sample(move |_| {
            context_hits.fetch_add(1, Ordering::SeqCst);
            DataRequest::AllData
        });
        let parent_id_hits = by_parent_id.clone();
        listener.set_sample_using_parent_id(move |_| {
            parent_id_hits.fetch_add(1, Ordering::SeqCst);
            DataRequest::AllData
        });
        listener.attach(&registry);

        let mut options = CreationOptions::new(
            "charge",
            SpanKind::Internal,
            Parent::Id("legacy-41ad".to_string()),
        );
        registry.sampling_decision(&source, &mut options);
        assert_eq!(by_context.load(Ordering::SeqCst), 0);
        assert_eq!(by_parent_id.load(Ordering::SeqCst), 1);

        let mut options = CreationOptions::new("charge", SpanKind::Internal, Parent::Root);
        registry.sampling_decision(&source, &mut options);
        assert_eq!(by_context.load(Ordering::SeqCst), 1);
        assert_eq!(by_parent_id.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn notification_targets_current_membership() {
        let registry = Registry::new();
        let source = registry.source("payments");

        voting_listener(DataRequest::AllData).attach(&registry);

        let mut options = CreationOptions::new("charge", SpanKind::Internal, Parent::Root);
        let decision = registry.sampling_decision(&source, &mut options);
        assert_eq!(decision, DataRequest::AllData);

        // Attached after sampling, before the start notification: must still
        // be notified.
        let late_started = Arc::new(AtomicUsize::new(0));
        let late = Listener::new();
        late.set_should_listen_to(|_| true);
        let hits = late_started.clone();
        late.set_on_started(move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        });
        late.attach(&registry);

        let span = source.start("charge").expect("span should be created");
        assert_eq!(late_started.load(Ordering::SeqCst), 1);

        // Detached between start and stop: must not see the stop.
        let late_stopped = Arc::new(AtomicUsize::new(0));
        let hits = late_stopped.clone();
        late.set_on_stopped(move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        });
        late.detach();
        drop(span);
        assert_eq!(late_stopped.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn none_voter_still_receives_start_notification() {
        let registry = Registry::new();
        let source = registry.source("payments");

        let none_started = Arc::new(AtomicUsize::new(0));
        let none_voter = Listener::new();
        none_voter.set_should_listen_to(|_| true);
        none_voter.set_sample(|_| DataRequest::None);
        let hits = none_started.clone();
        none_voter.set_on_started(move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        });
        none_voter.attach(&registry);

        let prop_started = Arc::new(AtomicUsize::new(0));
        let prop_voter = Listener::new();
        prop_voter.set_should_listen_to(|_| true);
        prop_voter.set_sample(|_| DataRequest::PropagationOnly);
        let hits = prop_started.clone();
        prop_voter.set_on_started(move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        });
        prop_voter.attach(&registry);

        let span = source.start("charge").expect("span should be created");
        assert_eq!(span.data_request(), DataRequest::PropagationOnly);
        // Notification targeting depends only on the filter, not the vote:
        // both voters see the start.
        assert_eq!(none_started.load(Ordering::SeqCst), 1);
        assert_eq!(prop_started.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn detached_listener_skipped_by_future_dispatches() {
        let registry = Registry::new();
        let source = registry.source("payments");

        let polls = Arc::new(AtomicUsize::new(0));
        let listener = Listener::new();
        listener.set_should_listen_to(|_| true);
        let hits = polls.clone();
        listener.set_sample(move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
            DataRequest::AllData
        });
        listener.attach(&registry);

        assert!(source.start("charge").is_some());
        assert_eq!(polls.load(Ordering::SeqCst), 1);

        listener.detach();
        assert!(source.start("charge").is_none());
        assert_eq!(polls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_attach_detach_smoke() {
        use std::thread;

        let registry = Registry::new();
        let source = registry.source("payments");

        let churn = {
            let registry = registry.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    let listener = voting_listener(DataRequest::AllData);
                    listener.attach(&registry);
                    listener.detach();
                }
            })
        };

        let steady = voting_listener(DataRequest::AllData);
        steady.attach(&registry);
        for _ in 0..200 {
            // The steady listener keeps every creation sampled regardless of
            // interleaving with the churn thread.
            assert!(source.start("charge").is_some());
        }

        churn.join().unwrap();
        assert_eq!(registry.inner().listener_count(), 1);
    }
}
