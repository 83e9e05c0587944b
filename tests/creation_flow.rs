//! End-to-end exercise of the create/notify flow against a live registry.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracesource::{DataRequest, KeyValue, Listener, Registry, SpanContext, SpanKind};

#[test]
fn create_and_notify_full_flow() {
    let registry = Registry::new();
    let source = registry.source_with_version("checkout", "1.4.0");
    assert!(!source.has_listeners());
    assert!(source.start("charge").is_none());

    let started: Arc<Mutex<Vec<(String, SpanContext)>>> = Arc::new(Mutex::new(Vec::new()));
    let stopped = Arc::new(AtomicUsize::new(0));

    let listener = Listener::new();
    listener.set_should_listen_to(|source| source.name() == "checkout");
    listener.set_sample(|_| DataRequest::AllDataAndRecorded);
    let started_log = started.clone();
    listener.set_on_started(move |span| {
        started_log
            .lock()
            .unwrap()
            .push((span.name().to_string(), span.span_context().clone()));
    });
    let stop_hits = stopped.clone();
    listener.set_on_stopped(move |_| {
        stop_hits.fetch_add(1, Ordering::SeqCst);
    });
    let guard = listener.attach_scoped(&registry);

    assert!(source.has_listeners());
    let mut span = source
        .span_builder("charge")
        .with_kind(SpanKind::Client)
        .with_tags(vec![KeyValue::new("amount", 100i64)])
        .start(&source)
        .expect("an accepting listener is attached");

    assert!(span.is_recording());
    assert!(span.span_context().is_sampled());
    assert_eq!(span.kind(), &SpanKind::Client);
    span.set_tag(KeyValue::new("currency", "EUR"));
    assert_eq!(span.tags().len(), 2);

    span.end();
    assert_eq!(stopped.load(Ordering::SeqCst), 1);
    assert!(!span.is_recording());

    {
        let started = started.lock().unwrap();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].0, "charge");
        assert!(started[0].1.is_valid());
        assert_eq!(started[0].1, *span.span_context());
    }

    // Dropping the guard detaches the listener and creation stops.
    drop(guard);
    assert!(source.start("refund").is_none());
    assert_eq!(stopped.load(Ordering::SeqCst), 1);
}
