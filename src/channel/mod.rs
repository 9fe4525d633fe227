//! Channel abstractions: the transport primitives envelopes move through.
//!
//! A [`Channel`] accepts envelopes. [`SubscribableChannel`] dispatches
//! synchronously to registered handlers on the sender's thread; [`PollableChannel`]
//! decouples producer and consumer through a FIFO or priority queue.

mod direct;
mod priority;
mod queue;

pub use direct::DirectChannel;
pub use priority::PriorityChannel;
pub use queue::QueueChannel;

use std::sync::Arc;
use std::time::Duration;

use crate::envelope::Envelope;
use crate::error::{MessagingError, Result};

/// A unit of work invoked by a [`SubscribableChannel`] for each envelope it
/// dispatches. Handlers run on the dispatching thread.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, envelope: &Envelope) -> Result<()>;
}

impl<F> MessageHandler for F
where
    F: Fn(&Envelope) -> Result<()> + Send + Sync,
{
    fn handle(&self, envelope: &Envelope) -> Result<()> {
        (self)(envelope)
    }
}

/// Capability every channel implements: accept an envelope, optionally
/// blocking up to `timeout` if the concrete channel has bounded capacity.
/// A `None` timeout means "block indefinitely" for channels that support
/// blocking sends, and is a synonym for "no wait" for `DirectChannel`, which
/// never blocks on delivery itself.
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    fn send(&self, envelope: Envelope, timeout: Option<Duration>) -> Result<bool>;

    /// Downcast hook used by the registry to recover whether a channel also
    /// supports subscription or polling. Returns `None` when the concrete
    /// channel does not support that capability, matching the Java source's
    /// `CapabilityError` ("channel does not support this operation").
    fn as_subscribable(&self) -> Option<&dyn SubscribableChannel> {
        None
    }

    fn as_pollable(&self) -> Option<&dyn PollableChannel> {
        None
    }
}

/// A channel that fans an envelope out to registered handlers synchronously.
pub trait SubscribableChannel: Channel {
    fn subscribe(&self, handler: Arc<dyn MessageHandler>) -> SubscriptionId;
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

/// A channel a consumer can poll or block-receive from.
pub trait PollableChannel: Channel {
    fn receive(&self, timeout: Option<Duration>) -> Option<Envelope>;
}

/// Opaque handle returned by [`SubscribableChannel::subscribe`], used to
/// unsubscribe later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub(crate) u64);

/// Resolves a channel by name. Implemented by [`crate::registry::ChannelRegistry`].
pub trait ChannelResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Result<Arc<dyn Channel>>;
}

pub(crate) fn capability_error(name: &str, operation: &str) -> MessagingError {
    MessagingError::capability(name, operation)
}
