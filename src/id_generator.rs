use crate::{SpanId, TraceId};
use rand::{rngs, Rng, SeedableRng};
use std::cell::RefCell;
use std::fmt;

/// Interface for generating trace and span ids.
///
/// The registry calls `new_trace_id` at most once per sampling decision, and
/// only when root trace-id synthesis is triggered or a root span is minted
/// without a callback-provided id.
pub trait IdGenerator: Send + Sync + fmt::Debug {
    /// Generate a new `TraceId`.
    fn new_trace_id(&self) -> TraceId;

    /// Generate a new `SpanId`.
    fn new_span_id(&self) -> SpanId;
}

/// Default [`IdGenerator`] backed by a per-thread random number generator.
#[derive(Clone, Debug, Default)]
pub struct RandomIdGenerator {
    _private: (),
}

impl IdGenerator for RandomIdGenerator {
    fn new_trace_id(&self) -> TraceId {
        CURRENT_RNG.with(|rng| TraceId::from(rng.borrow_mut().gen::<u128>()))
    }

    fn new_span_id(&self) -> SpanId {
        CURRENT_RNG.with(|rng| SpanId::from(rng.borrow_mut().gen::<u64>()))
    }
}

thread_local! {
    static CURRENT_RNG: RefCell<rngs::SmallRng> = RefCell::new(rngs::SmallRng::from_entropy());
}

#[cfg(any(test, feature = "testing"))]
pub use increment::IncrementIdGenerator;

#[cfg(any(test, feature = "testing"))]
mod increment {
    use crate::{IdGenerator, SpanId, TraceId};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    /// [`IdGenerator`] that increments a counter for each new id, producing
    /// predictable ids for tests.
    #[derive(Clone, Debug)]
    pub struct IncrementIdGenerator(Arc<AtomicU64>);

    impl IncrementIdGenerator {
        /// Create a new `IncrementIdGenerator` starting at 1.
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl Default for IncrementIdGenerator {
        fn default() -> Self {
            Self(Arc::new(AtomicU64::new(1)))
        }
    }

    impl IdGenerator for IncrementIdGenerator {
        fn new_trace_id(&self) -> TraceId {
            TraceId::from(self.0.fetch_add(1, Ordering::SeqCst) as u128)
        }

        fn new_span_id(&self) -> SpanId {
            SpanId::from(self.0.fetch_add(1, Ordering::SeqCst))
        }
    }
}
