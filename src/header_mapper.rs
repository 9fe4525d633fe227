//! Bidirectional header translation between an [`Envelope`]'s header map and a
//! transport adapter's native header model (§4.3).
//!
//! Concrete transport adapters are out of scope for this crate; an adapter
//! plugs in by implementing [`NativeHeaderCarrier`] over whatever header
//! representation its wire protocol uses.

use std::collections::BTreeMap;

use tracing::debug;

use crate::envelope::{is_transient_header, HeaderValue};

/// A transport's native, string-keyed header carrier. An adapter implements
/// this once for its own header type; the mapper never needs to know more
/// about the transport than "a flat list of name/value pairs."
pub trait NativeHeaderCarrier {
    fn entries(&self) -> Vec<(String, String)>;
    fn set(&mut self, name: &str, value: String);
}

/// A protocol's reserved header names and the namespace they live under,
/// discovered once at mapper construction (§9 Design Notes: "Introspection-driven
/// header discovery" becomes an explicit table rather than reflection).
#[derive(Debug, Clone, Default)]
pub struct HeaderDescriptor {
    pub standard_prefix: String,
    pub request_headers: Vec<String>,
    pub reply_headers: Vec<String>,
}

impl HeaderDescriptor {
    pub fn new(
        standard_prefix: impl Into<String>,
        request_headers: Vec<String>,
        reply_headers: Vec<String>,
    ) -> Self {
        HeaderDescriptor {
            standard_prefix: standard_prefix.into(),
            request_headers,
            reply_headers,
        }
    }

    fn is_standard(&self, name: &str) -> bool {
        self.request_headers.iter().any(|h| h.eq_ignore_ascii_case(name))
            || self.reply_headers.iter().any(|h| h.eq_ignore_ascii_case(name))
    }

    /// Strip the protocol's own namespace off a native header name, e.g.
    /// `amqp_contentType` -> `contentType` when `standard_prefix` is
    /// `"amqp_"`. A name that does not carry the prefix is returned as-is,
    /// so mappers whose adapter puts standard headers on the wire unprefixed
    /// still recognize them.
    fn bare_name<'a>(&self, name: &'a str) -> &'a str {
        if self.standard_prefix.is_empty() {
            return name;
        }
        if name.len() > self.standard_prefix.len()
            && name[..self.standard_prefix.len()].eq_ignore_ascii_case(&self.standard_prefix)
        {
            &name[self.standard_prefix.len()..]
        } else {
            name
        }
    }
}

/// Which side of the mapper a header-name pattern list applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// A parsed header-name selector: an exact name, a `prefix*`/`*suffix`/`*mid*`
/// wildcard, or one of the two standard-header tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
enum HeaderPattern {
    Exact(String),
    Prefix(String),
    Suffix(String),
    Contains(String),
    StandardRequest,
    StandardReply,
}

impl HeaderPattern {
    fn parse(raw: &str) -> Self {
        match raw {
            "STANDARD_REQUEST_HEADERS" => HeaderPattern::StandardRequest,
            "STANDARD_REPLY_HEADERS" => HeaderPattern::StandardReply,
            _ => {
                let starts = raw.starts_with('*');
                let ends = raw.ends_with('*') && raw.len() > 1;
                match (starts, ends) {
                    (true, true) => HeaderPattern::Contains(raw[1..raw.len() - 1].to_string()),
                    (true, false) => HeaderPattern::Suffix(raw[1..].to_string()),
                    (false, true) => HeaderPattern::Prefix(raw[..raw.len() - 1].to_string()),
                    (false, false) => HeaderPattern::Exact(raw.to_string()),
                }
            }
        }
    }

    fn matches_name(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        match self {
            HeaderPattern::Exact(p) => lower == p.to_lowercase(),
            HeaderPattern::Prefix(p) => lower.starts_with(&p.to_lowercase()),
            HeaderPattern::Suffix(p) => lower.ends_with(&p.to_lowercase()),
            HeaderPattern::Contains(p) => lower.contains(&p.to_lowercase()),
            HeaderPattern::StandardRequest | HeaderPattern::StandardReply => false,
        }
    }
}

/// Immutable, validated configuration for a [`HeaderMapper`], built once via
/// [`HeaderMapperConfig::builder`] (§9 Design Notes: configuration-by-setter
/// becomes an explicit immutable struct).
#[derive(Debug, Clone)]
pub struct HeaderMapperConfig {
    inbound_header_names: Vec<String>,
    outbound_header_names: Vec<String>,
    user_defined_header_prefix: String,
    descriptor: HeaderDescriptor,
}

impl HeaderMapperConfig {
    pub fn builder(descriptor: HeaderDescriptor) -> HeaderMapperConfigBuilder {
        HeaderMapperConfigBuilder {
            inbound_header_names: vec!["STANDARD_REQUEST_HEADERS".to_string(), "STANDARD_REPLY_HEADERS".to_string()],
            outbound_header_names: vec!["STANDARD_REQUEST_HEADERS".to_string(), "STANDARD_REPLY_HEADERS".to_string()],
            user_defined_header_prefix: String::new(),
            descriptor,
        }
    }
}

pub struct HeaderMapperConfigBuilder {
    inbound_header_names: Vec<String>,
    outbound_header_names: Vec<String>,
    user_defined_header_prefix: String,
    descriptor: HeaderDescriptor,
}

impl HeaderMapperConfigBuilder {
    pub fn with_inbound_header_names(mut self, names: Vec<String>) -> Self {
        self.inbound_header_names = names;
        self
    }

    pub fn with_outbound_header_names(mut self, names: Vec<String>) -> Self {
        self.outbound_header_names = names;
        self
    }

    pub fn with_user_defined_header_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.user_defined_header_prefix = prefix.into();
        self
    }

    pub fn build(self) -> HeaderMapperConfig {
        HeaderMapperConfig {
            inbound_header_names: self.inbound_header_names,
            outbound_header_names: self.outbound_header_names,
            user_defined_header_prefix: self.user_defined_header_prefix,
            descriptor: self.descriptor,
        }
    }
}

/// Translates between an envelope's header map and a transport's native
/// headers, applying the pattern-matching rules in §4.3 and always excluding
/// the four transient header names regardless of configuration.
pub struct HeaderMapper {
    config: HeaderMapperConfig,
}

impl HeaderMapper {
    pub fn new(config: HeaderMapperConfig) -> Self {
        HeaderMapper { config }
    }

    fn should_map(&self, name: &str, direction: Direction) -> bool {
        if name.is_empty() || is_transient_header(name) {
            return false;
        }

        let patterns = match direction {
            Direction::Inbound => &self.config.inbound_header_names,
            Direction::Outbound => &self.config.outbound_header_names,
        };

        let bare = self.config.descriptor.bare_name(name);
        for raw in patterns {
            match HeaderPattern::parse(raw) {
                HeaderPattern::StandardRequest => {
                    if self.config.descriptor.request_headers.iter().any(|h| h.eq_ignore_ascii_case(bare)) {
                        return true;
                    }
                }
                HeaderPattern::StandardReply => {
                    if self.config.descriptor.reply_headers.iter().any(|h| h.eq_ignore_ascii_case(bare)) {
                        return true;
                    }
                }
                pattern => {
                    if pattern.matches_name(name) {
                        return true;
                    }
                }
            }
        }

        false
    }

    /// Extract standard and user-defined headers from a transport's native
    /// headers (inbound direction). A standard header's own namespace
    /// (`standardHeaderPrefix`, e.g. `amqp_contentType`) is stripped so the
    /// envelope carries the bare standard name; individual failures are
    /// logged and skipped rather than aborting the whole operation.
    pub fn to_headers<T: NativeHeaderCarrier>(&self, source: &T) -> BTreeMap<String, HeaderValue> {
        let mut result = BTreeMap::new();
        for (name, value) in source.entries() {
            if !self.should_map(&name, Direction::Inbound) {
                continue;
            }
            let bare = self.config.descriptor.bare_name(&name);
            let mapped_name = if self.config.descriptor.is_standard(bare) {
                bare.to_string()
            } else {
                format!("{}{}", self.config.user_defined_header_prefix, name)
            };
            result.insert(mapped_name, HeaderValue::String(value));
        }
        result
    }

    /// Populate a transport's native headers from an envelope's header map
    /// (outbound direction). A standard header is reassigned its protocol
    /// namespace (`standardHeaderPrefix`) on the way out; a user-defined
    /// header gets `userDefinedHeaderPrefix` instead.
    pub fn from_headers<T: NativeHeaderCarrier>(&self, headers: &BTreeMap<String, HeaderValue>, target: &mut T) {
        for (name, value) in headers {
            if !self.should_map(name, Direction::Outbound) {
                continue;
            }

            let value_str = match value.as_str() {
                Some(s) => s.to_string(),
                None => {
                    debug!(header = %name, "skipping non-string header during outbound mapping");
                    continue;
                }
            };

            let bare = self.config.descriptor.bare_name(name);
            let mapped_name = if self.config.descriptor.is_standard(bare) {
                format!("{}{}", self.config.descriptor.standard_prefix, bare)
            } else {
                format!("{}{}", self.config.user_defined_header_prefix, name)
            };

            target.set(&mapped_name, value_str);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{HEADER_ERROR_CHANNEL, HEADER_ID, HEADER_REPLY_CHANNEL, HEADER_TIMESTAMP};

    #[derive(Default)]
    struct FakeNativeHeaders {
        entries: Vec<(String, String)>,
    }

    impl NativeHeaderCarrier for FakeNativeHeaders {
        fn entries(&self) -> Vec<(String, String)> {
            self.entries.clone()
        }

        fn set(&mut self, name: &str, value: String) {
            self.entries.push((name.to_string(), value));
        }
    }

    fn descriptor() -> HeaderDescriptor {
        HeaderDescriptor::new("amqp_", vec!["contentType".to_string()], vec!["replyTo".to_string()])
    }

    #[test]
    fn transient_headers_are_never_mapped_regardless_of_configuration() {
        let mapper = HeaderMapper::new(
            HeaderMapperConfig::builder(descriptor())
                .with_inbound_header_names(vec!["*".to_string()])
                .build(),
        );

        let mut native = FakeNativeHeaders::default();
        for name in [HEADER_ID, HEADER_TIMESTAMP, HEADER_REPLY_CHANNEL, HEADER_ERROR_CHANNEL] {
            native.entries.push((name.to_string(), "x".to_string()));
        }

        let mapped = mapper.to_headers(&native);
        assert!(mapped.is_empty());
    }

    #[test]
    fn standard_headers_pass_through_without_the_user_defined_prefix() {
        let mapper = HeaderMapper::new(HeaderMapperConfig::builder(descriptor()).build());
        let mut native = FakeNativeHeaders::default();
        native.entries.push(("contentType".to_string(), "application/json".to_string()));

        let mapped = mapper.to_headers(&native);
        assert_eq!(mapped.get("contentType").and_then(HeaderValue::as_str), Some("application/json"));
    }

    #[test]
    fn user_defined_headers_get_the_configured_prefix() {
        let mapper = HeaderMapper::new(
            HeaderMapperConfig::builder(descriptor())
                .with_inbound_header_names(vec!["custom*".to_string()])
                .with_user_defined_header_prefix("amqp_")
                .build(),
        );
        let mut native = FakeNativeHeaders::default();
        native.entries.push(("customTraceId".to_string(), "abc".to_string()));

        let mapped = mapper.to_headers(&native);
        assert_eq!(mapped.get("amqp_customTraceId").and_then(HeaderValue::as_str), Some("abc"));
    }

    #[test]
    fn prefix_suffix_and_contains_patterns_all_match() {
        let mapper = HeaderMapper::new(
            HeaderMapperConfig::builder(descriptor())
                .with_inbound_header_names(vec!["x-*".to_string(), "*-trace".to_string(), "*mid*".to_string()])
                .build(),
        );
        let mut native = FakeNativeHeaders::default();
        native.entries.push(("x-request-id".to_string(), "1".to_string()));
        native.entries.push(("span-trace".to_string(), "2".to_string()));
        native.entries.push(("has-mid-value".to_string(), "3".to_string()));
        native.entries.push(("unmatched".to_string(), "4".to_string()));

        let mapped = mapper.to_headers(&native);
        assert_eq!(mapped.len(), 3);
        assert!(!mapped.contains_key("unmatched"));
    }

    #[test]
    fn unmapped_headers_are_silently_excluded_not_errors() {
        let mapper = HeaderMapper::new(HeaderMapperConfig::builder(descriptor()).build());
        let mut native = FakeNativeHeaders::default();
        native.entries.push(("whatever".to_string(), "value".to_string()));

        assert!(mapper.to_headers(&native).is_empty());
    }

    #[test]
    fn round_trip_preserves_matched_headers() {
        let mapper = HeaderMapper::new(
            HeaderMapperConfig::builder(descriptor())
                .with_inbound_header_names(vec!["STANDARD_REQUEST_HEADERS".to_string(), "custom*".to_string()])
                .with_outbound_header_names(vec!["STANDARD_REQUEST_HEADERS".to_string(), "custom*".to_string()])
                .build(),
        );

        // The standard header arrives already carrying the protocol's own
        // namespace, as the wire form of `descriptor()`'s "amqp_" prefix.
        let mut native = FakeNativeHeaders::default();
        native.entries.push(("amqp_contentType".to_string(), "text/plain".to_string()));
        native.entries.push(("customFlag".to_string(), "yes".to_string()));

        let headers = mapper.to_headers(&native);
        assert_eq!(headers.get("contentType").and_then(HeaderValue::as_str), Some("text/plain"));

        let mut target = FakeNativeHeaders::default();
        mapper.from_headers(&headers, &mut target);

        let mut out: BTreeMap<String, String> = target.entries.into_iter().collect();
        assert_eq!(out.remove("amqp_contentType").as_deref(), Some("text/plain"));
        assert_eq!(out.remove("customFlag").as_deref(), Some("yes"));
        assert!(out.is_empty());
    }

    #[test]
    fn standard_header_prefix_is_stripped_inbound_and_reapplied_outbound() {
        let mapper = HeaderMapper::new(HeaderMapperConfig::builder(descriptor()).build());

        let mut native = FakeNativeHeaders::default();
        native.entries.push(("amqp_contentType".to_string(), "application/json".to_string()));

        let mapped = mapper.to_headers(&native);
        assert_eq!(mapped.get("contentType").and_then(HeaderValue::as_str), Some("application/json"));
        assert!(!mapped.contains_key("amqp_contentType"));

        let mut target = FakeNativeHeaders::default();
        mapper.from_headers(&mapped, &mut target);
        assert_eq!(target.entries, vec![("amqp_contentType".to_string(), "application/json".to_string())]);
    }

    #[test]
    fn standard_header_without_the_protocol_prefix_is_still_recognized_inbound() {
        let mapper = HeaderMapper::new(HeaderMapperConfig::builder(descriptor()).build());

        let mut native = FakeNativeHeaders::default();
        native.entries.push(("contentType".to_string(), "text/plain".to_string()));

        let mapped = mapper.to_headers(&native);
        assert_eq!(mapped.get("contentType").and_then(HeaderValue::as_str), Some("text/plain"));
    }
}
