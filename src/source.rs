use crate::registry::RegistryInner;
use crate::{
    CreationOptions, DataRequest, KeyValue, Parent, Span, SpanContext, SpanKind, TraceFlags,
};
use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::SystemTime;

/// A named factory that spans are created through.
///
/// Instrumented code holds a `Source` and proposes spans on it; the source
/// consults its [`Registry`](crate::Registry) so that none of the
/// instrumented code needs to know which listeners exist. Cloning is cheap
/// and clones share identity.
#[derive(Clone)]
pub struct Source {
    inner: Arc<SourceInner>,
}

pub(crate) struct SourceInner {
    name: String,
    version: Option<String>,
    registry: Arc<RegistryInner>,
    /// Cached "any listener attached" flag, maintained by the registry on
    /// attach, detach, and source creation. Reading it is the allocation-free
    /// zero-listener fast path; filters are polled per dispatch.
    pub(crate) listeners_attached: AtomicBool,
}

impl Source {
    pub(crate) fn new(name: String, version: Option<String>, registry: Arc<RegistryInner>) -> Self {
        Source {
            inner: Arc::new(SourceInner {
                name,
                version,
                registry,
                listeners_attached: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn inner(&self) -> &Arc<SourceInner> {
        &self.inner
    }

    pub(crate) fn registry(&self) -> &Arc<RegistryInner> {
        &self.inner.registry
    }

    /// The name of this source.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The version of this source, if one was given.
    pub fn version(&self) -> Option<&str> {
        self.inner.version.as_deref()
    }

    /// Returns `true` if any attached listener's filter currently accepts
    /// this source.
    ///
    /// The zero-listener case answers from a cached flag without locking or
    /// allocating.
    pub fn has_listeners(&self) -> bool {
        self.inner.registry.should_create(self)
    }

    /// Start building a span named `name`.
    pub fn span_builder(&self, name: impl Into<Cow<'static, str>>) -> SpanBuilder {
        SpanBuilder::new(name)
    }

    /// Propose a root span named `name` with default options.
    ///
    /// Returns `None` when no listener is interested or every sampling vote
    /// was [`DataRequest::None`].
    pub fn start(&self, name: impl Into<Cow<'static, str>>) -> Option<Span> {
        self.span_builder(name).start(self)
    }

    pub(crate) fn create_span(&self, builder: SpanBuilder) -> Option<Span> {
        let registry = self.inner.registry.clone();
        if !registry.should_create(self) {
            return None;
        }

        let SpanBuilder {
            name,
            kind,
            parent,
            tags,
            links,
        } = builder;
        let mut options = CreationOptions::new(name, kind, parent)
            .with_tags(tags)
            .with_links(links);

        let decision = registry.sampling_decision(self, &mut options);
        if decision == DataRequest::None {
            return None;
        }

        // Parent context first, then a callback-set or synthesized id, then
        // a fresh trace.
        let trace_id = options
            .trace_id()
            .unwrap_or_else(|| registry.id_generator().new_trace_id());
        let span_id = registry.id_generator().new_span_id();

        let (name, kind, parent, tags, links) = options.into_parts();
        let trace_state = parent
            .context()
            .map(|ctx| ctx.trace_state().clone())
            .unwrap_or_default();
        let trace_flags =
            TraceFlags::default().with_sampled(decision == DataRequest::AllDataAndRecorded);
        let context = SpanContext::new(trace_id, span_id, trace_flags, false, trace_state);

        // PropagationOnly spans carry propagation fields only.
        let (tags, links) = if decision >= DataRequest::AllData {
            (tags, links)
        } else {
            (Vec::new(), Vec::new())
        };

        let span = Span::new(
            name,
            kind,
            context,
            parent,
            tags,
            links,
            SystemTime::now(),
            decision,
            self.clone(),
        );
        registry.notify_started(&span);
        Some(span)
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("name", &self.inner.name)
            .field("version", &self.inner.version)
            .finish()
    }
}

/// Configures a proposed span before it is submitted for sampling.
#[derive(Debug)]
pub struct SpanBuilder {
    name: Cow<'static, str>,
    kind: SpanKind,
    parent: Parent,
    tags: Vec<KeyValue>,
    links: Vec<SpanContext>,
}

impl SpanBuilder {
    /// Create a builder for a root span named `name`.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        SpanBuilder {
            name: name.into(),
            kind: SpanKind::Internal,
            parent: Parent::Root,
            tags: Vec::new(),
            links: Vec::new(),
        }
    }

    /// Set the span kind.
    pub fn with_kind(mut self, kind: SpanKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set the proposed parent.
    pub fn with_parent(mut self, parent: Parent) -> Self {
        self.parent = parent;
        self
    }

    /// Set a structured parent span context.
    pub fn with_parent_context(self, context: SpanContext) -> Self {
        self.with_parent(Parent::Context(context))
    }

    /// Set a legacy opaque parent id.
    pub fn with_parent_id(self, parent_id: impl Into<String>) -> Self {
        self.with_parent(Parent::Id(parent_id.into()))
    }

    /// Set the proposed tags.
    pub fn with_tags(mut self, tags: Vec<KeyValue>) -> Self {
        self.tags = tags;
        self
    }

    /// Set the proposed links.
    pub fn with_links(mut self, links: Vec<SpanContext>) -> Self {
        self.links = links;
        self
    }

    /// Submit the proposal to `source` for sampling.
    ///
    /// Returns `None` when the fold of all sampling votes is
    /// [`DataRequest::None`]; no span is constructed in that case.
    pub fn start(self, source: &Source) -> Option<Span> {
        source.create_span(self)
    }
}
