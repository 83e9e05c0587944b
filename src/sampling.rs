use crate::{KeyValue, SpanContext, SpanKind, TraceId};
use std::borrow::Cow;

/// How much data a listener requests for a span about to be created.
///
/// Variants are totally ordered; when several listeners vote on one creation
/// the maximum vote wins.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DataRequest {
    /// Do not create the span.
    None,
    /// Create the span with propagation fields only; tags and links are not
    /// captured.
    PropagationOnly,
    /// Create the span with all proposed data.
    AllData,
    /// Create the span with all proposed data and mark it recorded (the
    /// `sampled` trace flag is set).
    AllDataAndRecorded,
}

/// The proposed parent of a span-to-be, in one of its two representations.
///
/// Sampling callbacks are registered against either shape; the registry
/// dispatches to whichever callback matches the form present on a given
/// creation attempt.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Parent {
    /// No parent; the span starts a new trace.
    #[default]
    Root,
    /// A legacy opaque parent identifier.
    Id(String),
    /// A structured parent span context.
    Context(SpanContext),
}

impl Parent {
    /// Returns `true` if there is no parent.
    pub fn is_root(&self) -> bool {
        matches!(self, Parent::Root)
    }

    /// The parent span context, if the structured form is present.
    pub fn context(&self) -> Option<&SpanContext> {
        match self {
            Parent::Context(ctx) => Some(ctx),
            _ => None,
        }
    }
}

/// Transient bundle of the attributes proposed for a span-to-be.
///
/// Passed by mutable reference to sampling callbacks so they can read the
/// proposal and, for root creations, force a trace id before the decision is
/// finalized. Discarded once the decision is made.
#[derive(Debug)]
pub struct CreationOptions {
    name: Cow<'static, str>,
    kind: SpanKind,
    parent: Parent,
    tags: Vec<KeyValue>,
    links: Vec<SpanContext>,
    trace_id: Option<TraceId>,
}

impl CreationOptions {
    /// Create options for a span named `name` with the given parent.
    pub fn new(name: impl Into<Cow<'static, str>>, kind: SpanKind, parent: Parent) -> Self {
        CreationOptions {
            name: name.into(),
            kind,
            parent,
            tags: Vec::new(),
            links: Vec::new(),
            trace_id: None,
        }
    }

    /// Attach proposed tags.
    pub fn with_tags(mut self, tags: Vec<KeyValue>) -> Self {
        self.tags = tags;
        self
    }

    /// Attach proposed links.
    pub fn with_links(mut self, links: Vec<SpanContext>) -> Self {
        self.links = links;
        self
    }

    /// The proposed span name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The proposed span kind.
    pub fn kind(&self) -> &SpanKind {
        &self.kind
    }

    /// The proposed parent.
    pub fn parent(&self) -> &Parent {
        &self.parent
    }

    /// The proposed tags.
    pub fn tags(&self) -> &[KeyValue] {
        &self.tags
    }

    /// The proposed links.
    pub fn links(&self) -> &[SpanContext] {
        &self.links
    }

    /// The trace id the span will be created with, if one is already
    /// determined: a valid structured parent fixes it, otherwise a callback
    /// may have set it.
    pub fn trace_id(&self) -> Option<TraceId> {
        match &self.parent {
            Parent::Context(ctx) if ctx.trace_id() != TraceId::INVALID => Some(ctx.trace_id()),
            _ => self.trace_id,
        }
    }

    /// Set the trace id for a root creation.
    ///
    /// Only the first set is honored; later calls, and calls when a valid
    /// parent context already fixes the trace id, are no-ops.
    pub fn set_trace_id(&mut self, trace_id: TraceId) {
        if self.trace_id().is_none() {
            self.trace_id = Some(trace_id);
        }
    }

    pub(crate) fn into_parts(self) -> (Cow<'static, str>, SpanKind, Parent, Vec<KeyValue>, Vec<SpanContext>) {
        (self.name, self.kind, self.parent, self.tags, self.links)
    }
}
