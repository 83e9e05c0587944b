use crate::{DataRequest, KeyValue, Parent, Source, SpanContext, SpanId, SpanKind};
use std::borrow::Cow;
use std::fmt;
use std::time::SystemTime;

/// A single traced operation's record.
///
/// A span only exists if sampling approved its creation; its captured data
/// level is fixed at creation time. Ending a span fans the stop notification
/// out through the registry; a span that is dropped without being ended ends
/// itself first.
pub struct Span {
    name: Cow<'static, str>,
    kind: SpanKind,
    context: SpanContext,
    parent: Parent,
    tags: Vec<KeyValue>,
    links: Vec<SpanContext>,
    start_time: SystemTime,
    end_time: Option<SystemTime>,
    data_request: DataRequest,
    source: Source,
}

impl Span {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: Cow<'static, str>,
        kind: SpanKind,
        context: SpanContext,
        parent: Parent,
        tags: Vec<KeyValue>,
        links: Vec<SpanContext>,
        start_time: SystemTime,
        data_request: DataRequest,
        source: Source,
    ) -> Self {
        Span {
            name,
            kind,
            context,
            parent,
            tags,
            links,
            start_time,
            end_time: None,
            data_request,
            source,
        }
    }

    /// The span's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The span's kind.
    pub fn kind(&self) -> &SpanKind {
        &self.kind
    }

    /// The span's identifying context.
    pub fn span_context(&self) -> &SpanContext {
        &self.context
    }

    /// The proposed parent the span was created with.
    pub fn parent(&self) -> &Parent {
        &self.parent
    }

    /// The parent's span id when the parent was a structured context,
    /// [`SpanId::INVALID`] otherwise.
    pub fn parent_span_id(&self) -> SpanId {
        self.parent
            .context()
            .map(|ctx| ctx.span_id())
            .unwrap_or(SpanId::INVALID)
    }

    /// The legacy opaque parent id, when the parent took that form.
    pub fn parent_id(&self) -> Option<&str> {
        match &self.parent {
            Parent::Id(id) => Some(id.as_str()),
            _ => None,
        }
    }

    /// Tags captured at creation; empty below [`DataRequest::AllData`].
    pub fn tags(&self) -> &[KeyValue] {
        &self.tags
    }

    /// Links captured at creation; empty below [`DataRequest::AllData`].
    pub fn links(&self) -> &[SpanContext] {
        &self.links
    }

    /// When the span started.
    pub fn start_time(&self) -> SystemTime {
        self.start_time
    }

    /// When the span ended, if it has.
    pub fn end_time(&self) -> Option<SystemTime> {
        self.end_time
    }

    /// The folded sampling decision the span was created under.
    pub fn data_request(&self) -> DataRequest {
        self.data_request
    }

    /// The source the span was created through.
    pub fn source(&self) -> &Source {
        &self.source
    }

    /// Returns `true` while the span is open and its data level admits
    /// tracing events.
    pub fn is_recording(&self) -> bool {
        self.end_time.is_none() && self.data_request >= DataRequest::AllData
    }

    /// Add a tag to the span; ignored unless the span is recording.
    pub fn set_tag(&mut self, tag: KeyValue) {
        if self.is_recording() {
            self.tags.push(tag);
        }
    }

    /// End the span now.
    pub fn end(&mut self) {
        self.end_with_timestamp(SystemTime::now());
    }

    /// End the span at `timestamp`, fanning the stop notification out to the
    /// currently attached listeners. Ending an already ended span is a
    /// no-op.
    pub fn end_with_timestamp(&mut self, timestamp: SystemTime) {
        if self.end_time.is_none() {
            self.end_time = Some(timestamp);
            let registry = self.source.registry().clone();
            registry.notify_stopped(self);
        }
    }
}

impl Drop for Span {
    fn drop(&mut self) {
        if self.end_time.is_none() {
            self.end();
        }
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Span")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("context", &self.context)
            .field("data_request", &self.data_request)
            .field("source", &self.source.name())
            .finish()
    }
}
