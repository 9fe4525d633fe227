//! In-process message routing and mediation kernel.
//!
//! Producers build an [`Envelope`] and hand it to a [`Channel`]; a channel
//! delivers it to subscribed handlers or holds it for a consumer to poll. A
//! [`Router`] is itself a handler that computes destination channels for an
//! envelope and forwards it, with [`PayloadTypeRouter`] choosing a single
//! destination by walking a payload's declared type hierarchy. A
//! [`HeaderMapper`] translates between an envelope's headers and a transport
//! adapter's native header model at the edges of a flow. A
//! [`ChannelRegistry`] is the name-indexed directory tying inbound and
//! outbound endpoints together, with optional taps for observing traffic.
//!
//! # Architecture
//!
//! ```text
//! producer --> Envelope --> Channel --> MessageHandler(s)
//!                              |
//!                              `--> Router --(resolve destinations)--> Channel --> ...
//!
//! ChannelRegistry: name -> (inbound Channel, outbound Channel, taps[])
//! HeaderMapper<T>: Envelope headers <-> T (a transport's native headers)
//! ```
//!
//! # Scope
//!
//! This crate is the mediation kernel only: concrete transport adapters,
//! expression-language evaluation of routing keys, and a dependency-injection
//! container are external collaborators, not part of this crate. Delivery is
//! best-effort within a single process; there is no persistence, no
//! cross-process delivery guarantee, and no transactional message boundary.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use integration_bus::channel::{Channel, DirectChannel, SubscribableChannel};
//! use integration_bus::envelope::Envelope;
//!
//! let channel = Arc::new(DirectChannel::new("greetings"));
//! channel.subscribe(Arc::new(|e: &integration_bus::envelope::Envelope| {
//!     println!("received: {:?}", e.payload::<String>());
//!     Ok(())
//! }));
//!
//! let envelope = Envelope::build("hello".to_string(), Default::default());
//! channel.send(envelope, None).unwrap();
//! ```

pub mod channel;
pub mod envelope;
pub mod error;
pub mod header_mapper;
pub mod registry;
pub mod router;

pub use channel::{Channel, ChannelResolver, DirectChannel, MessageHandler, PollableChannel, PriorityChannel, QueueChannel, SubscribableChannel, SubscriptionId};
pub use envelope::{Envelope, EnvelopeBuilder, HeaderValue};
pub use error::{MessagingError, Result};
pub use header_mapper::{Direction, HeaderDescriptor, HeaderMapper, HeaderMapperConfig, NativeHeaderCarrier};
pub use registry::ChannelRegistry;
pub use router::{interleave_candidates, PayloadTypeRegistry, PayloadTypeRouter, RouteResolver, Router, RouterConfig, RoutingValue, TypeLevel};
