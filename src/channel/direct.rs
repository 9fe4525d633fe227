use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::envelope::Envelope;
use crate::error::{MessagingError, Result};

use super::{Channel, MessageHandler, SubscribableChannel, SubscriptionId};

/// A synchronous point-to-point channel. `send` dispatches on the calling
/// thread: subscribers are tried in subscription order and dispatch stops at
/// the first one that accepts the envelope without error (unicast-until-success,
/// the default dispatch policy). If every subscriber fails, the last failure
/// is surfaced to the sender.
pub struct DirectChannel {
    name: String,
    subscribers: RwLock<Vec<(SubscriptionId, Arc<dyn MessageHandler>)>>,
    next_subscription_id: AtomicU64,
}

impl DirectChannel {
    pub fn new(name: impl Into<String>) -> Self {
        DirectChannel {
            name: name.into(),
            subscribers: RwLock::new(Vec::new()),
            next_subscription_id: AtomicU64::new(0),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Channel for DirectChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, envelope: Envelope, _timeout: Option<Duration>) -> Result<bool> {
        let subscribers = self.subscribers.read().clone();
        if subscribers.is_empty() {
            warn!(channel = %self.name, "direct channel has no subscribers");
            return Err(MessagingError::delivery(format!(
                "channel {:?} has no subscribers",
                self.name
            )));
        }

        let mut last_err = None;
        for (_, handler) in subscribers.iter() {
            match handler.handle(&envelope) {
                Ok(()) => return Ok(true),
                Err(err) => {
                    debug!(channel = %self.name, error = %err, "subscriber declined envelope");
                    last_err = Some(err);
                }
            }
        }

        let err = last_err.unwrap_or_else(|| MessagingError::delivery("no subscriber accepted envelope"));
        warn!(channel = %self.name, error = %err, "all subscribers failed");
        Err(err)
    }

    fn as_subscribable(&self) -> Option<&dyn SubscribableChannel> {
        Some(self)
    }
}

impl SubscribableChannel for DirectChannel {
    fn subscribe(&self, handler: Arc<dyn MessageHandler>) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().push((id, handler));
        debug!(channel = %self.name, subscription = id.0, "subscriber added");
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(sub_id, _)| *sub_id != id);
        subscribers.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;

    fn envelope(n: u32) -> Envelope {
        Envelope::build(n, BTreeMap::new())
    }

    #[test]
    fn dispatches_in_subscription_order_and_stops_at_first_success() {
        let channel = DirectChannel::new("test.direct");
        let calls = Arc::new(RwLock::new(Vec::new()));

        let calls_a = calls.clone();
        channel.subscribe(Arc::new(move |_: &Envelope| {
            calls_a.write().push("a");
            Ok(())
        }));
        let calls_b = calls.clone();
        channel.subscribe(Arc::new(move |_: &Envelope| {
            calls_b.write().push("b");
            Ok(())
        }));

        assert!(channel.send(envelope(1), None).unwrap());
        assert_eq!(*calls.read(), vec!["a"]);
    }

    #[test]
    fn falls_through_to_next_subscriber_on_failure() {
        let channel = DirectChannel::new("test.direct");
        let hits = Arc::new(AtomicUsize::new(0));

        channel.subscribe(Arc::new(|_: &Envelope| {
            Err(MessagingError::delivery("first handler refuses"))
        }));
        let hits_clone = hits.clone();
        channel.subscribe(Arc::new(move |_: &Envelope| {
            hits_clone.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }));

        assert!(channel.send(envelope(1), None).unwrap());
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn fails_when_every_subscriber_fails() {
        let channel = DirectChannel::new("test.direct");
        channel.subscribe(Arc::new(|_: &Envelope| Err(MessagingError::delivery("nope"))));
        assert!(channel.send(envelope(1), None).is_err());
    }

    #[test]
    fn fails_with_no_subscribers() {
        let channel = DirectChannel::new("test.direct");
        assert!(channel.send(envelope(1), None).is_err());
    }

    #[test]
    fn unsubscribe_removes_handler() {
        let channel = DirectChannel::new("test.direct");
        let id = channel.subscribe(Arc::new(|_: &Envelope| Ok(())));
        assert_eq!(channel.subscriber_count(), 1);
        assert!(channel.unsubscribe(id));
        assert_eq!(channel.subscriber_count(), 0);
    }
}
