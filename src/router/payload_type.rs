//! [`PayloadTypeRouter`]: selects one destination channel by walking a
//! payload's type hierarchy (§4.4.1).
//!
//! The original algorithm walks a live class hierarchy at dispatch time.
//! Rust payloads carry no such hierarchy at runtime, so a payload type
//! registers its ordered candidate list once, up front, via
//! [`PayloadTypeRegistry::register`]. The interleaving itself —
//! exact type, then its interfaces, then its supertype, then its interfaces,
//! and so on — is computed by [`interleave_candidates`] from a list of
//! [`TypeLevel`]s, so call sites describe the hierarchy declaratively instead
//! of hand-ordering strings.

use std::any::TypeId;
use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;

use crate::channel::ChannelResolver;
use crate::envelope::Envelope;

use super::{RouteResolver, Router, RouterConfig, RoutingValue};

/// One level of a payload's type hierarchy: the class/struct name at that
/// level (absent once you run past the root) plus the interfaces/traits
/// introduced at that level.
#[derive(Debug, Clone, Default)]
pub struct TypeLevel {
    pub class_name: Option<String>,
    pub interface_names: Vec<String>,
}

impl TypeLevel {
    pub fn class(name: impl Into<String>) -> Self {
        TypeLevel {
            class_name: Some(name.into()),
            interface_names: Vec::new(),
        }
    }

    pub fn with_interfaces(mut self, names: Vec<String>) -> Self {
        self.interface_names = names;
        self
    }
}

/// Interleaves class and interface candidates level-by-level: at level *i*,
/// the class candidate is emitted before the interface candidates at that
/// same level, and earlier levels are emitted entirely before later ones.
/// This delivers the ordering contract of §4.4.1: exact class beats its
/// direct interfaces, which beat the superclass, which beats its own
/// interfaces, and so on. A name already emitted is never re-added.
pub fn interleave_candidates(levels: Vec<TypeLevel>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for level in levels {
        if let Some(class_name) = level.class_name {
            if seen.insert(class_name.clone()) {
                out.push(class_name);
            }
        }
        for interface_name in level.interface_names {
            if seen.insert(interface_name.clone()) {
                out.push(interface_name);
            }
        }
    }
    out
}

/// Maps a payload's Rust type to its precomputed, ordered candidate list.
/// Populated once at startup per payload type the router needs to dispatch.
pub struct PayloadTypeRegistry {
    candidates: DashMap<TypeId, Vec<String>>,
}

impl PayloadTypeRegistry {
    pub fn new() -> Self {
        PayloadTypeRegistry {
            candidates: DashMap::new(),
        }
    }

    /// Register `T`'s candidate list from its declared type-hierarchy levels.
    pub fn register<T: 'static>(&self, levels: Vec<TypeLevel>) {
        self.candidates.insert(TypeId::of::<T>(), interleave_candidates(levels));
    }

    /// Register `T`'s candidate list directly, already in priority order.
    pub fn register_candidates<T: 'static>(&self, candidates: Vec<String>) {
        self.candidates.insert(TypeId::of::<T>(), candidates);
    }

    fn candidates_for(&self, type_id: TypeId) -> Option<Vec<String>> {
        self.candidates.get(&type_id).map(|entry| entry.value().clone())
    }
}

impl Default for PayloadTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

struct PayloadTypeKeyResolver {
    registry: Arc<PayloadTypeRegistry>,
}

impl RouteResolver for PayloadTypeKeyResolver {
    fn channel_keys(&self, envelope: &Envelope) -> RoutingValue {
        let type_id = (*envelope.payload_any()).type_id();
        match self.registry.candidates_for(type_id) {
            Some(candidates) => RoutingValue::List(candidates.into_iter().map(RoutingValue::Name).collect()),
            None => RoutingValue::none(),
        }
    }
}

/// Builds a [`Router`] preconfigured as a payload-type router: at most one
/// destination, and no fallback to treating an unmapped type name as a
/// literal channel name (§4.4.1: "no direct-channel-name fallback").
pub struct PayloadTypeRouter;

impl PayloadTypeRouter {
    pub fn new(channel_resolver: Arc<dyn ChannelResolver>, registry: Arc<PayloadTypeRegistry>) -> Router {
        let config = RouterConfig::builder()
            .with_max_destinations(1)
            .should_fallback_to_direct_channel_lookup(false)
            .build();

        Router::new(
            "payload-type-router",
            channel_resolver,
            Arc::new(PayloadTypeKeyResolver { registry }),
            config,
        )
    }
}
