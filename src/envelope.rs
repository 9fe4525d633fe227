//! The immutable message envelope and its builder.
//!
//! An [`Envelope`] pairs an opaque payload with an immutable header map. Four
//! header names are reserved and transient — `id`, `timestamp`, `replyChannel`,
//! `errorChannel` — and are never copied across a mapping boundary. The payload
//! is held as `Arc<dyn Any + Send + Sync>` so cloning an envelope (or deriving a
//! new one from it) never clones the payload itself, the same zero-copy idiom
//! used for mailbox messages elsewhere in this crate's lineage.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Header value. Headers are free-form; most carry strings, integers, or a
/// correlation UUID, so the value is a small closed set rather than
/// `Box<dyn Any>` — callers that need a string just call `.as_str()`.
///
/// Serializable so an adapter can turn an envelope's header map into the
/// wire form described in §6 (headers serialize as a string-keyed map with
/// reserved names preserved); the payload itself is transport-defined and is
/// not part of this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HeaderValue {
    String(String),
    Int(i64),
    Bool(bool),
    Uuid(Uuid),
}

impl HeaderValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            HeaderValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            HeaderValue::Uuid(u) => Some(*u),
            _ => None,
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(s: &str) -> Self {
        HeaderValue::String(s.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(s: String) -> Self {
        HeaderValue::String(s)
    }
}

impl From<i64> for HeaderValue {
    fn from(i: i64) -> Self {
        HeaderValue::Int(i)
    }
}

impl From<bool> for HeaderValue {
    fn from(b: bool) -> Self {
        HeaderValue::Bool(b)
    }
}

impl From<Uuid> for HeaderValue {
    fn from(u: Uuid) -> Self {
        HeaderValue::Uuid(u)
    }
}

/// Reserved header name: unique message identity, assigned at construction.
pub const HEADER_ID: &str = "id";
/// Reserved header name: construction time.
pub const HEADER_TIMESTAMP: &str = "timestamp";
/// Reserved header name: channel a reply should be sent to.
pub const HEADER_REPLY_CHANNEL: &str = "replyChannel";
/// Reserved header name: channel an error should be reported to.
pub const HEADER_ERROR_CHANNEL: &str = "errorChannel";
/// Reserved (non-transient) header name: envelope priority, used by [`crate::channel::PriorityChannel`].
pub const HEADER_PRIORITY: &str = "priority";
/// Reserved (non-transient) header name: correlation id for a sequence of envelopes.
pub const HEADER_CORRELATION_ID: &str = "correlationId";
/// Reserved (non-transient) header name: 1-based position within a sequence.
pub const HEADER_SEQUENCE_NUMBER: &str = "sequenceNumber";
/// Reserved (non-transient) header name: total size of a sequence.
pub const HEADER_SEQUENCE_SIZE: &str = "sequenceSize";
/// Internal-only header stamped by [`crate::channel::PriorityChannel`]; never
/// visible to a handler (invariant P3).
pub const HEADER_PRIORITY_SEQUENCE: &str = "__priorityChannelSequence__";

/// Headers that are never copied across a mapping boundary (§4.3 rule 1) and
/// are always regenerated, never inherited, when an envelope is derived.
const TRANSIENT_HEADERS: &[&str] = &[
    HEADER_ID,
    HEADER_TIMESTAMP,
    HEADER_REPLY_CHANNEL,
    HEADER_ERROR_CHANNEL,
];

pub fn is_transient_header(name: &str) -> bool {
    TRANSIENT_HEADERS.contains(&name)
}

/// Nanoseconds since the Unix epoch. Kept as a free function so envelope
/// construction and tests use one clock source.
fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// An immutable message: an opaque payload plus an immutable header map.
///
/// Clone is cheap: the payload is reference-counted and the header map uses a
/// `BTreeMap` for deterministic iteration order in tests and logs.
#[derive(Clone)]
pub struct Envelope {
    payload: Arc<dyn Any + Send + Sync>,
    headers: Arc<BTreeMap<String, HeaderValue>>,
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("id", &self.id())
            .field("headers", &self.headers)
            .finish()
    }
}

impl Envelope {
    /// Build a fresh envelope, auto-populating `id` and `timestamp` if absent (I1).
    pub fn build<T: Send + Sync + 'static>(
        payload: T,
        headers: BTreeMap<String, HeaderValue>,
    ) -> Self {
        EnvelopeBuilder::from_payload(payload).with_headers(headers).finish()
    }

    /// Start a builder seeded with a fresh payload and no headers.
    pub fn builder<T: Send + Sync + 'static>(payload: T) -> EnvelopeBuilder {
        EnvelopeBuilder::from_payload(payload)
    }

    /// Start a builder that derives from `self`: the payload is reused by
    /// reference, non-reserved headers carry over, and `id`/`timestamp` are
    /// regenerated (§4.1 `derive`).
    pub fn derive(source: &Envelope) -> EnvelopeBuilder {
        let mut headers = BTreeMap::new();
        for (k, v) in source.headers.iter() {
            if !is_transient_header(k) {
                headers.insert(k.clone(), v.clone());
            }
        }
        EnvelopeBuilder {
            payload: source.payload.clone(),
            headers,
        }
    }

    pub fn id(&self) -> Uuid {
        self.headers
            .get(HEADER_ID)
            .and_then(HeaderValue::as_uuid)
            .expect("envelope invariant I1: id header always present")
    }

    pub fn timestamp(&self) -> u64 {
        self.headers
            .get(HEADER_TIMESTAMP)
            .and_then(HeaderValue::as_int)
            .expect("envelope invariant I1: timestamp header always present") as u64
    }

    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers.get(name)
    }

    pub fn headers(&self) -> &BTreeMap<String, HeaderValue> {
        &self.headers
    }

    /// The envelope's wire form for an adapter crossing a process boundary
    /// (§6, informative): the header map serialized as JSON, reserved names
    /// preserved. The payload is transport-defined and is not part of this.
    pub fn headers_wire_form(&self) -> serde_json::Value {
        serde_json::to_value(&*self.headers).unwrap_or(serde_json::Value::Null)
    }

    /// Downcast the payload to a concrete type. Returns `None` if `T` does not
    /// match the payload's dynamic type.
    pub fn payload<T: 'static>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    pub fn payload_any(&self) -> &(dyn Any + Send + Sync) {
        &*self.payload
    }

    /// Internal hook used only by [`crate::channel::PriorityChannel`] to stamp
    /// the monotonic tiebreaker sequence (I2); not exposed outside the crate.
    pub(crate) fn with_priority_sequence(&self, sequence: i64) -> Envelope {
        let mut headers = (*self.headers).clone();
        headers.insert(HEADER_PRIORITY_SEQUENCE.to_string(), HeaderValue::Int(sequence));
        Envelope {
            payload: self.payload.clone(),
            headers: Arc::new(headers),
        }
    }

    /// Internal hook: strip the priority-sequence header before delivery (I3/P3).
    pub(crate) fn without_priority_sequence(&self) -> Envelope {
        if !self.headers.contains_key(HEADER_PRIORITY_SEQUENCE) {
            return self.clone();
        }
        let mut headers = (*self.headers).clone();
        headers.remove(HEADER_PRIORITY_SEQUENCE);
        Envelope {
            payload: self.payload.clone(),
            headers: Arc::new(headers),
        }
    }

    pub(crate) fn priority_sequence(&self) -> Option<i64> {
        self.headers.get(HEADER_PRIORITY_SEQUENCE).and_then(HeaderValue::as_int)
    }

    /// Header used by the priority channel's default comparator; missing = 0.
    pub fn priority(&self) -> i64 {
        self.headers.get(HEADER_PRIORITY).and_then(HeaderValue::as_int).unwrap_or(0)
    }
}

/// Builder for [`Envelope`]. Each call returns a modified builder; nothing is
/// mutated until [`EnvelopeBuilder::finish`] is called, and earlier envelopes
/// are never affected.
pub struct EnvelopeBuilder {
    payload: Arc<dyn Any + Send + Sync>,
    headers: BTreeMap<String, HeaderValue>,
}

impl EnvelopeBuilder {
    fn from_payload<T: Send + Sync + 'static>(payload: T) -> Self {
        EnvelopeBuilder {
            payload: Arc::new(payload),
            headers: BTreeMap::new(),
        }
    }

    /// Set a header. Reserved transient names are silently ignored: callers
    /// cannot forge `id`/`timestamp`/`replyChannel`/`errorChannel`.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<HeaderValue>) -> Self {
        let name = name.into();
        if !is_transient_header(&name) {
            self.headers.insert(name, value.into());
        }
        self
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, HeaderValue>) -> Self {
        for (k, v) in headers {
            if !is_transient_header(&k) {
                self.headers.insert(k, v);
            }
        }
        self
    }

    pub fn with_headers_if_absent(mut self, headers: BTreeMap<String, HeaderValue>) -> Self {
        for (k, v) in headers {
            if is_transient_header(&k) {
                continue;
            }
            self.headers.entry(k).or_insert(v);
        }
        self
    }

    pub fn remove_header(mut self, name: &str) -> Self {
        self.headers.remove(name);
        self
    }

    /// Stamp `correlationId`/`sequenceNumber`/`sequenceSize`, used by routers
    /// running with `applySequence` enabled.
    pub fn push_sequence_details(mut self, correlation_id: Uuid, number: usize, size: usize) -> Self {
        self.headers
            .insert(HEADER_CORRELATION_ID.to_string(), HeaderValue::Uuid(correlation_id));
        self.headers
            .insert(HEADER_SEQUENCE_NUMBER.to_string(), HeaderValue::Int(number as i64));
        self.headers
            .insert(HEADER_SEQUENCE_SIZE.to_string(), HeaderValue::Int(size as i64));
        self
    }

    pub fn with_priority(self, priority: i64) -> Self {
        self.with_header(HEADER_PRIORITY, priority)
    }

    /// Produce the envelope, assigning `id`/`timestamp` fresh (I1).
    pub fn finish(mut self) -> Envelope {
        self.headers
            .insert(HEADER_ID.to_string(), HeaderValue::Uuid(Uuid::new_v4()));
        self.headers
            .insert(HEADER_TIMESTAMP.to_string(), HeaderValue::Int(now_nanos() as i64));
        Envelope {
            payload: self.payload,
            headers: Arc::new(self.headers),
        }
    }
}
