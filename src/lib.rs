//! Named trace sources with listener-based span sampling and start/stop
//! dispatch.
//!
//! This crate is the in-process sampling-and-dispatch core of a
//! distributed-tracing instrumentation library. Application code proposes
//! spans through a named [`Source`]; zero or more independently registered
//! [`Listener`]s decide, per proposal, whether and how much data to capture,
//! without the instrumented code knowing which observers exist.
//!
//! # Overview
//!
//! A [`Registry`] holds the attached listeners and mediates every decision.
//! On each proposal, every attached listener whose filter accepts the source
//! returns a [`DataRequest`] vote; the votes fold by maximum into one
//! decision. Anything above [`DataRequest::None`] mints a [`Span`] and fans
//! a start notification out to the interested listeners; ending the span
//! fans out the stop notification the same way. When nothing is listening,
//! proposing a span is a cheap flag check that allocates nothing.
//!
//! Exporters, wire formats, and collector endpoints are out of scope: an
//! exporter is simply a listener whose stop callback serializes and ships
//! finished spans.
//!
//! # Examples
//!
//! ```
//! use tracesource::{DataRequest, Listener, Registry};
//!
//! let registry = Registry::new();
//! let source = registry.source("checkout");
//!
//! let listener = Listener::new();
//! listener.set_should_listen_to(|source| source.name() == "checkout");
//! listener.set_sample(|_options| DataRequest::AllDataAndRecorded);
//! listener.set_on_stopped(|span| println!("finished {}", span.name()));
//! listener.attach(&registry);
//!
//! let mut span = source.start("charge").expect("sampled in");
//! // ... traced work ...
//! span.end();
//!
//! listener.detach();
//! ```
#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod common;
mod id_generator;
mod internal_logging;
mod listener;
mod registry;
mod sampling;
mod source;
mod span;
mod span_context;
mod trace_context;

pub use common::{Key, KeyValue, SpanKind, Value};
#[cfg(any(test, feature = "testing"))]
pub use id_generator::IncrementIdGenerator;
pub use id_generator::{IdGenerator, RandomIdGenerator};
pub use listener::{Listener, ListenerGuard};
pub use registry::{Registry, RegistryBuilder};
pub use sampling::{CreationOptions, DataRequest, Parent};
pub use source::{Source, SpanBuilder};
pub use span::Span;
pub use span_context::{SpanContext, TraceState, TraceStateError};
pub use trace_context::{SpanId, TraceFlags, TraceId};
