use crate::{SpanId, TraceFlags, TraceId};
use std::collections::VecDeque;
use std::str::FromStr;
use thiserror::Error;

/// Vendor-specific propagated state, an ordered list of key-value pairs.
///
/// Keys and values follow the W3C `tracestate` grammar so that state parsed
/// from an inbound carrier can be re-serialized unchanged.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct TraceState(Option<VecDeque<(String, String)>>);

impl TraceState {
    /// The empty `TraceState`, as a constant.
    pub const NONE: TraceState = TraceState(None);

    fn valid_key(key: &str) -> bool {
        if key.is_empty() || key.len() > 256 {
            return false;
        }

        let allowed_special = |b: u8| b == b'_' || b == b'-' || b == b'*' || b == b'/';
        let mut vendor_start = None;
        for (i, &b) in key.as_bytes().iter().enumerate() {
            if !(b.is_ascii_lowercase() || b.is_ascii_digit() || allowed_special(b) || b == b'@') {
                return false;
            }

            if i == 0 && !b.is_ascii_lowercase() && !b.is_ascii_digit() {
                return false;
            } else if b == b'@' {
                if vendor_start.is_some() || i + 14 < key.len() {
                    return false;
                }
                vendor_start = Some(i);
            } else if let Some(start) = vendor_start {
                if i == start + 1 && !(b.is_ascii_lowercase() || b.is_ascii_digit()) {
                    return false;
                }
            }
        }

        true
    }

    fn valid_value(value: &str) -> bool {
        if value.len() > 256 {
            return false;
        }

        !(value.contains(',') || value.contains('='))
    }

    /// Build a `TraceState` from a key-value collection, preserving order.
    pub fn from_key_value<T, K, V>(entries: T) -> Result<Self, TraceStateError>
    where
        T: IntoIterator<Item = (K, V)>,
        K: ToString,
        V: ToString,
    {
        let ordered = entries
            .into_iter()
            .map(|(key, value)| {
                let (key, value) = (key.to_string(), value.to_string());
                if !TraceState::valid_key(key.as_str()) {
                    return Err(TraceStateError::Key(key));
                }
                if !TraceState::valid_value(value.as_str()) {
                    return Err(TraceStateError::Value(value));
                }

                Ok((key, value))
            })
            .collect::<Result<VecDeque<_>, TraceStateError>>()?;

        if ordered.is_empty() {
            Ok(TraceState(None))
        } else {
            Ok(TraceState(Some(ordered)))
        }
    }

    /// The value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.as_ref().and_then(|kvs| {
            kvs.iter()
                .find_map(|(k, v)| if k == key { Some(v.as_str()) } else { None })
        })
    }

    /// Returns a new `TraceState` with `key` set to `value`, moved to the
    /// front of the list. The original state is unchanged.
    pub fn insert<K, V>(&self, key: K, value: V) -> Result<TraceState, TraceStateError>
    where
        K: Into<String>,
        V: Into<String>,
    {
        let (key, value) = (key.into(), value.into());
        if !TraceState::valid_key(key.as_str()) {
            return Err(TraceStateError::Key(key));
        }
        if !TraceState::valid_value(value.as_str()) {
            return Err(TraceStateError::Value(value));
        }

        let mut updated = self.without_key(&key);
        let kvs = updated.0.get_or_insert(VecDeque::with_capacity(1));
        kvs.push_front((key, value));

        Ok(updated)
    }

    /// Returns a new `TraceState` with `key` removed; a no-op copy if the key
    /// is absent.
    pub fn delete<K: Into<String>>(&self, key: K) -> Result<TraceState, TraceStateError> {
        let key = key.into();
        if !TraceState::valid_key(key.as_str()) {
            return Err(TraceStateError::Key(key));
        }

        Ok(self.without_key(&key))
    }

    fn without_key(&self, key: &str) -> TraceState {
        let mut owned = self.clone();
        if let Some(kvs) = owned.0.as_mut() {
            if let Some(index) = kvs.iter().position(|(k, _)| k == key) {
                kvs.remove(index);
            }
        }
        owned
    }

    /// Serialize as a `tracestate` header value: `key=value` entries joined
    /// by commas.
    pub fn header(&self) -> String {
        self.0
            .as_ref()
            .map(|kvs| {
                kvs.iter()
                    .map(|(key, value)| format!("{}={}", key, value))
                    .collect::<Vec<String>>()
                    .join(",")
            })
            .unwrap_or_default()
    }
}

impl FromStr for TraceState {
    type Err = TraceStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let members: Vec<&str> = s.split_terminator(',').collect();
        let mut entries: Vec<(String, String)> = Vec::with_capacity(members.len());

        for member in members {
            match member.find('=') {
                None => return Err(TraceStateError::List(member.to_string())),
                Some(separator) => {
                    let (key, value) = member.split_at(separator);
                    entries.push((key.to_string(), value.trim_start_matches('=').to_string()));
                }
            }
        }

        TraceState::from_key_value(entries)
    }
}

/// Error returned by [`TraceState`] operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TraceStateError {
    /// The key does not satisfy the W3C `tracestate` key grammar.
    #[error("{0} is not a valid tracestate key")]
    Key(String),

    /// The value does not satisfy the W3C `tracestate` value grammar.
    #[error("{0} is not a valid tracestate value")]
    Value(String),

    /// The list member is not a `key=value` pair.
    #[error("{0} is not a valid tracestate list member")]
    List(String),
}

/// Immutable identifying portion of a span, propagated to descendants.
///
/// Span contexts are structurally comparable and never mutated after
/// construction.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SpanContext {
    trace_id: TraceId,
    span_id: SpanId,
    trace_flags: TraceFlags,
    is_remote: bool,
    trace_state: TraceState,
}

impl SpanContext {
    /// An invalid span context.
    pub const NONE: SpanContext = SpanContext {
        trace_id: TraceId::INVALID,
        span_id: SpanId::INVALID,
        trace_flags: TraceFlags::NOT_SAMPLED,
        is_remote: false,
        trace_state: TraceState::NONE,
    };

    /// Create an invalid empty span context.
    pub fn empty_context() -> Self {
        SpanContext::NONE
    }

    /// Construct a new `SpanContext`.
    pub fn new(
        trace_id: TraceId,
        span_id: SpanId,
        trace_flags: TraceFlags,
        is_remote: bool,
        trace_state: TraceState,
    ) -> Self {
        SpanContext {
            trace_id,
            span_id,
            trace_flags,
            is_remote,
            trace_state,
        }
    }

    /// The trace id of this context.
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    /// The span id of this context.
    pub fn span_id(&self) -> SpanId {
        self.span_id
    }

    /// The flags of this context.
    pub fn trace_flags(&self) -> TraceFlags {
        self.trace_flags
    }

    /// Returns `true` if both the trace id and the span id are non-zero.
    pub fn is_valid(&self) -> bool {
        self.trace_id != TraceId::INVALID && self.span_id != SpanId::INVALID
    }

    /// Returns `true` if this context was propagated from a remote parent.
    pub fn is_remote(&self) -> bool {
        self.is_remote
    }

    /// Returns `true` if the `sampled` trace flag is set.
    pub fn is_sampled(&self) -> bool {
        self.trace_flags.is_sampled()
    }

    /// The propagated [`TraceState`] of this context.
    pub fn trace_state(&self) -> &TraceState {
        &self.trace_state
    }
}
