use crate::internal_logging::{diag_debug, diag_warn};
use crate::registry::RegistryInner;
use crate::{CreationOptions, DataRequest, Registry, Source, Span};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};

pub(crate) type SpanCallback = Arc<dyn Fn(&Span) + Send + Sync>;
pub(crate) type FilterCallback = Arc<dyn Fn(&Source) -> bool + Send + Sync>;
pub(crate) type SampleCallback = Arc<dyn Fn(&mut CreationOptions) -> DataRequest + Send + Sync>;

const IDLE: u8 = 0;
const ATTACHED: u8 = 1;
const DETACHED: u8 = 2;

/// A subscriber that votes on span sampling and observes span start/stop.
///
/// A listener is inert until [`attach`]ed to a [`Registry`] and becomes
/// permanently inert once [`detach`]ed. All callback slots may be set before
/// or after attachment; a set after attachment takes effect on the next
/// dispatch. An absent callback is a no-op rather than an error, with one
/// deliberate exception: an attached listener whose matching sampling slot is
/// empty votes [`DataRequest::AllDataAndRecorded`], so listeners that only
/// observe never silently lose data.
///
/// Callbacks are invoked without any registry or listener lock held; a
/// panicking callback unwinds to the call site that triggered the dispatch
/// and skips the listeners not yet polled in that round, but cannot corrupt
/// registry state.
///
/// [`attach`]: Listener::attach
/// [`detach`]: Listener::detach
#[derive(Default)]
pub struct Listener {
    on_started: Mutex<Option<SpanCallback>>,
    on_stopped: Mutex<Option<SpanCallback>>,
    should_listen_to: Mutex<Option<FilterCallback>>,
    sample: Mutex<Option<SampleCallback>>,
    sample_using_parent_id: Mutex<Option<SampleCallback>>,
    auto_generate_root_trace_id: AtomicBool,
    state: AtomicU8,
    registry: Mutex<Option<Weak<RegistryInner>>>,
}

impl Listener {
    /// Create a listener with every callback slot empty.
    pub fn new() -> Arc<Self> {
        Arc::new(Listener::default())
    }

    /// Set the callback invoked when a span created through an accepted
    /// source starts.
    pub fn set_on_started(&self, callback: impl Fn(&Span) + Send + Sync + 'static) {
        if let Ok(mut slot) = self.on_started.lock() {
            *slot = Some(Arc::new(callback));
        }
    }

    /// Set the callback invoked when a span created through an accepted
    /// source ends.
    pub fn set_on_stopped(&self, callback: impl Fn(&Span) + Send + Sync + 'static) {
        if let Ok(mut slot) = self.on_stopped.lock() {
            *slot = Some(Arc::new(callback));
        }
    }

    /// Set the source filter predicate.
    ///
    /// A listener with no filter is interested in no source at all.
    pub fn set_should_listen_to(
        &self,
        predicate: impl Fn(&Source) -> bool + Send + Sync + 'static,
    ) {
        if let Ok(mut slot) = self.should_listen_to.lock() {
            *slot = Some(Arc::new(predicate));
        }
    }

    /// Set the sampling callback invoked when the proposed parent is absent
    /// or a structured [`SpanContext`](crate::SpanContext).
    pub fn set_sample(
        &self,
        callback: impl Fn(&mut CreationOptions) -> DataRequest + Send + Sync + 'static,
    ) {
        if let Ok(mut slot) = self.sample.lock() {
            *slot = Some(Arc::new(callback));
        }
    }

    /// Set the sampling callback invoked when the proposed parent is a
    /// legacy opaque id string.
    pub fn set_sample_using_parent_id(
        &self,
        callback: impl Fn(&mut CreationOptions) -> DataRequest + Send + Sync + 'static,
    ) {
        if let Ok(mut slot) = self.sample_using_parent_id.lock() {
            *slot = Some(Arc::new(callback));
        }
    }

    /// Control whether a fresh root trace id is synthesized before this
    /// listener's sampling callback runs on parentless creations.
    pub fn set_auto_generate_root_trace_id(&self, enabled: bool) {
        self.auto_generate_root_trace_id
            .store(enabled, Ordering::Relaxed);
    }

    /// Register this listener with `registry`.
    ///
    /// Attaching an already attached listener is a no-op; attaching a
    /// detached listener is a no-op as well, since detachment is permanent.
    pub fn attach(self: &Arc<Self>, registry: &Registry) {
        match self
            .state
            .compare_exchange(IDLE, ATTACHED, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => {
                if let Ok(mut slot) = self.registry.lock() {
                    *slot = Some(Arc::downgrade(registry.inner()));
                }
                registry.inner().register_listener(self.clone());
                diag_debug!(name: "Listener.Attached");
            }
            Err(DETACHED) => {
                diag_warn!(name: "Listener.Attach.AfterDetach");
            }
            Err(_) => {}
        }
    }

    /// Register this listener and return a guard that detaches it when
    /// dropped.
    pub fn attach_scoped(self: Arc<Self>, registry: &Registry) -> ListenerGuard {
        self.attach(registry);
        ListenerGuard { listener: self }
    }

    /// Remove this listener from its registry.
    ///
    /// Idempotent. Once this call returns, no dispatch that begins
    /// afterwards invokes this listener; a dispatch already iterating over a
    /// snapshot containing it may still complete that one invocation.
    pub fn detach(&self) {
        if self.state.swap(DETACHED, Ordering::SeqCst) == ATTACHED {
            let registry = self
                .registry
                .lock()
                .ok()
                .and_then(|slot| slot.as_ref().and_then(Weak::upgrade));
            if let Some(registry) = registry {
                registry.deregister_listener(self);
            }
            diag_debug!(name: "Listener.Detached");
        }
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.state.load(Ordering::SeqCst) == ATTACHED
    }

    pub(crate) fn auto_generate_root_trace_id(&self) -> bool {
        self.auto_generate_root_trace_id.load(Ordering::Relaxed)
    }

    // Callback accessors clone the slot's `Arc` under a short-lived lock so
    // user code is never invoked while a listener lock is held.

    pub(crate) fn on_started(&self) -> Option<SpanCallback> {
        self.on_started.lock().ok().and_then(|slot| slot.clone())
    }

    pub(crate) fn on_stopped(&self) -> Option<SpanCallback> {
        self.on_stopped.lock().ok().and_then(|slot| slot.clone())
    }

    pub(crate) fn filter(&self) -> Option<FilterCallback> {
        self.should_listen_to
            .lock()
            .ok()
            .and_then(|slot| slot.clone())
    }

    pub(crate) fn sample(&self) -> Option<SampleCallback> {
        self.sample.lock().ok().and_then(|slot| slot.clone())
    }

    pub(crate) fn sample_using_parent_id(&self) -> Option<SampleCallback> {
        self.sample_using_parent_id
            .lock()
            .ok()
            .and_then(|slot| slot.clone())
    }

    /// Returns `true` if `self`'s filter accepts `source`.
    pub(crate) fn accepts(&self, source: &Source) -> bool {
        match self.filter() {
            Some(predicate) => predicate(source),
            None => false,
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state.load(Ordering::SeqCst) {
            ATTACHED => "attached",
            DETACHED => "detached",
            _ => "idle",
        };
        f.debug_struct("Listener")
            .field("state", &state)
            .field(
                "auto_generate_root_trace_id",
                &self.auto_generate_root_trace_id(),
            )
            .finish()
    }
}

/// Detaches the wrapped [`Listener`] when dropped.
///
/// Detachment affects correctness (stale notifications), not just resource
/// reclamation, so scoped release is explicit rather than left to garbage
/// collection of the listener itself.
#[must_use = "dropping the guard detaches the listener immediately"]
#[derive(Debug)]
pub struct ListenerGuard {
    listener: Arc<Listener>,
}

impl ListenerGuard {
    /// The guarded listener.
    pub fn listener(&self) -> &Arc<Listener> {
        &self.listener
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.listener.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_is_idempotent() {
        let registry = Registry::builder().build();
        let listener = Listener::new();
        listener.set_should_listen_to(|_| true);

        listener.attach(&registry);
        listener.attach(&registry);
        assert_eq!(registry.inner().listener_count(), 1);
    }

    #[test]
    fn detach_is_idempotent_and_permanent() {
        let registry = Registry::builder().build();
        let listener = Listener::new();
        listener.set_should_listen_to(|_| true);

        listener.attach(&registry);
        listener.detach();
        listener.detach();
        assert_eq!(registry.inner().listener_count(), 0);

        // Detached listeners never come back.
        listener.attach(&registry);
        assert_eq!(registry.inner().listener_count(), 0);
        assert!(!listener.is_attached());
    }

    #[test]
    fn guard_detaches_on_drop() {
        let registry = Registry::builder().build();
        let listener = Listener::new();
        listener.set_should_listen_to(|_| true);

        {
            let _guard = listener.clone().attach_scoped(&registry);
            assert_eq!(registry.inner().listener_count(), 1);
        }
        assert_eq!(registry.inner().listener_count(), 0);
        assert!(!listener.is_attached());
    }

    #[test]
    fn absent_filter_accepts_nothing() {
        let registry = Registry::builder().build();
        let source = registry.source("db");
        let listener = Listener::new();
        assert!(!listener.accepts(&source));
    }
}
