//! Routers: handlers that compute zero or more destination channels for an
//! envelope and forward it (§4.4).

mod payload_type;

pub use payload_type::{interleave_candidates, PayloadTypeRegistry, PayloadTypeRouter, TypeLevel};

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::channel::{Channel, ChannelResolver, MessageHandler};
use crate::envelope::Envelope;
use crate::error::{MessagingError, Result};

/// The value a [`RouteResolver`] returns for a given envelope: a channel
/// instance, a name to resolve, or a (possibly nested) list of either.
/// Covers steps 1-5 of the resolution pipeline in §4.4; step 6 (an opaque
/// "other" type coerced via a conversion service) does not arise because
/// Rust resolvers only ever produce one of these three shapes.
#[derive(Clone)]
pub enum RoutingValue {
    Channel(Arc<dyn Channel>),
    Name(String),
    List(Vec<RoutingValue>),
}

impl RoutingValue {
    pub fn none() -> Self {
        RoutingValue::List(Vec::new())
    }
}

/// Supplies the routing key(s) for an envelope; the piece of a router that
/// varies per specialization (a plain channel-mapping router, the payload-type
/// router, or a custom strategy).
pub trait RouteResolver: Send + Sync {
    fn channel_keys(&self, envelope: &Envelope) -> RoutingValue;
}

/// Immutable router configuration (§6), built once via [`RouterConfig::builder`].
#[derive(Clone)]
pub struct RouterConfig {
    pub prefix: String,
    pub suffix: String,
    pub default_output_channel: Option<String>,
    pub resolution_required: bool,
    pub ignore_send_failures: bool,
    pub apply_sequence: bool,
    pub send_timeout: Option<Duration>,
    pub max_destinations: Option<usize>,
    pub should_fallback_to_direct_channel_lookup: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        RouterConfig {
            prefix: String::new(),
            suffix: String::new(),
            default_output_channel: None,
            resolution_required: true,
            ignore_send_failures: false,
            apply_sequence: false,
            send_timeout: None,
            max_destinations: None,
            should_fallback_to_direct_channel_lookup: true,
        }
    }
}

impl RouterConfig {
    pub fn builder() -> RouterConfigBuilder {
        RouterConfigBuilder::default()
    }
}

#[derive(Default)]
pub struct RouterConfigBuilder {
    config: RouterConfig,
}

impl RouterConfigBuilder {
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.prefix = prefix.into();
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.config.suffix = suffix.into();
        self
    }

    pub fn with_default_output_channel(mut self, name: impl Into<String>) -> Self {
        self.config.default_output_channel = Some(name.into());
        self
    }

    pub fn resolution_required(mut self, required: bool) -> Self {
        self.config.resolution_required = required;
        self
    }

    pub fn ignore_send_failures(mut self, ignore: bool) -> Self {
        self.config.ignore_send_failures = ignore;
        self
    }

    pub fn apply_sequence(mut self, apply: bool) -> Self {
        self.config.apply_sequence = apply;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.config.send_timeout = Some(timeout);
        self
    }

    pub fn with_max_destinations(mut self, max: usize) -> Self {
        self.config.max_destinations = Some(max);
        self
    }

    pub fn should_fallback_to_direct_channel_lookup(mut self, fallback: bool) -> Self {
        self.config.should_fallback_to_direct_channel_lookup = fallback;
        self
    }

    pub fn build(self) -> RouterConfig {
        self.config
    }
}

/// A handler that resolves destination channels for each envelope via a
/// [`RouteResolver`] and forwards it, applying the resolution pipeline,
/// mapping dictionary, affixes, and failure policy of §4.4.
pub struct Router {
    name: String,
    config: RouterConfig,
    channel_mappings: DashMap<String, String>,
    channel_resolver: Arc<dyn ChannelResolver>,
    key_resolver: Arc<dyn RouteResolver>,
}

impl Router {
    pub fn new(
        name: impl Into<String>,
        channel_resolver: Arc<dyn ChannelResolver>,
        key_resolver: Arc<dyn RouteResolver>,
        config: RouterConfig,
    ) -> Self {
        Router {
            name: name.into(),
            config,
            channel_mappings: DashMap::new(),
            channel_resolver,
            key_resolver,
        }
    }

    pub fn set_channel_mapping(&self, key: impl Into<String>, channel_name: impl Into<String>) {
        self.channel_mappings.insert(key.into(), channel_name.into());
    }

    fn push_destination(&self, channel: Arc<dyn Channel>, out: &mut Vec<Arc<dyn Channel>>) -> Result<()> {
        if let Some(max) = self.config.max_destinations {
            if out.len() + 1 > max {
                return Err(MessagingError::ambiguity(channel.name().to_string(), max));
            }
        }
        out.push(channel);
        Ok(())
    }

    fn resolve_name(&self, raw: &str, out: &mut Vec<Arc<dyn Channel>>) -> Result<()> {
        if raw.contains(',') {
            for token in raw.split(',') {
                let token = token.trim();
                if !token.is_empty() {
                    self.resolve_name(token, out)?;
                }
            }
            return Ok(());
        }

        let mapped = self.channel_mappings.get(raw).map(|entry| entry.value().clone());
        let base_name = match mapped {
            Some(name) => name,
            None => {
                if !self.config.should_fallback_to_direct_channel_lookup {
                    debug!(router = %self.name, key = %raw, "no mapping entry, direct lookup disabled, dropping key");
                    return Ok(());
                }
                raw.to_string()
            }
        };

        let resolved_name = format!("{}{}{}", self.config.prefix, base_name, self.config.suffix);

        match self.channel_resolver.resolve(&resolved_name) {
            Ok(channel) => self.push_destination(channel, out),
            Err(err) => {
                if self.config.resolution_required {
                    Err(err)
                } else {
                    debug!(router = %self.name, channel = %resolved_name, "resolution failed, dropping (resolutionRequired=false)");
                    Ok(())
                }
            }
        }
    }

    fn resolve_value(&self, value: RoutingValue, out: &mut Vec<Arc<dyn Channel>>) -> Result<()> {
        match value {
            RoutingValue::Channel(channel) => self.push_destination(channel, out),
            RoutingValue::Name(name) => self.resolve_name(&name, out),
            RoutingValue::List(list) => {
                for item in list {
                    self.resolve_value(item, out)?;
                    // Stop at the first hit once the cap is reached rather than
                    // treating later candidates as ambiguous: this is what lets
                    // PayloadTypeRouter's interleaved candidate list pick exactly
                    // one destination (§4.4.1) instead of erroring on the second
                    // type-name that happens to also have a mapping entry.
                    if let Some(max) = self.config.max_destinations {
                        if out.len() >= max {
                            break;
                        }
                    }
                }
                Ok(())
            }
        }
    }

    fn resolve_destinations(&self, envelope: &Envelope) -> Result<Vec<Arc<dyn Channel>>> {
        let raw = self.key_resolver.channel_keys(envelope);
        let mut destinations = Vec::new();
        self.resolve_value(raw, &mut destinations)?;

        if destinations.is_empty() {
            if let Some(default_name) = &self.config.default_output_channel {
                let channel = self.channel_resolver.resolve(default_name)?;
                destinations.push(channel);
            }
        }

        Ok(destinations)
    }
}

impl MessageHandler for Router {
    fn handle(&self, envelope: &Envelope) -> Result<()> {
        let destinations = self.resolve_destinations(envelope)?;

        if destinations.is_empty() {
            warn!(router = %self.name, "no destination resolved and no default output channel");
            return Err(MessagingError::delivery("no destination resolved and no default output channel"));
        }

        let total = destinations.len();
        let correlation_id = envelope.id();

        for (index, channel) in destinations.iter().enumerate() {
            let outgoing = if self.config.apply_sequence {
                Envelope::derive(envelope)
                    .push_sequence_details(correlation_id, index + 1, total)
                    .finish()
            } else {
                envelope.clone()
            };

            match channel.send(outgoing, self.config.send_timeout) {
                Ok(true) => {}
                Ok(false) => {
                    if self.config.ignore_send_failures {
                        debug!(router = %self.name, channel = %channel.name(), "send failed, ignoring per policy");
                    } else {
                        return Err(MessagingError::delivery(format!(
                            "send to channel {:?} failed",
                            channel.name()
                        )));
                    }
                }
                Err(err) => {
                    if self.config.ignore_send_failures {
                        debug!(router = %self.name, channel = %channel.name(), error = %err, "send errored, ignoring per policy");
                    } else {
                        return Err(err);
                    }
                }
            }
        }

        Ok(())
    }
}
