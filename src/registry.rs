//! [`ChannelRegistry`]: a name-indexed directory binding inbound and outbound
//! channel endpoints and wiring taps onto inbound traffic (§4.5).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::channel::{Channel, ChannelResolver, MessageHandler, PollableChannel, SubscribableChannel, SubscriptionId};
use crate::envelope::Envelope;
use crate::error::{MessagingError, Result};

/// Wraps a registered inbound channel so every envelope delivered to it is
/// also copied to any tap channels attached via [`ChannelRegistry::tap`].
/// Delegates the subscribable/pollable capability of the wrapped channel so
/// callers cannot tell a tapped channel from a plain one.
struct TappedChannel {
    name: String,
    inner: Arc<dyn Channel>,
    taps: RwLock<Vec<Arc<dyn Channel>>>,
}

impl TappedChannel {
    fn new(name: String, inner: Arc<dyn Channel>) -> Self {
        TappedChannel {
            name,
            inner,
            taps: RwLock::new(Vec::new()),
        }
    }

    fn add_tap(&self, tap: Arc<dyn Channel>) {
        self.taps.write().push(tap);
    }
}

impl Channel for TappedChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, envelope: Envelope, timeout: Option<Duration>) -> Result<bool> {
        for tap in self.taps.read().iter() {
            if let Err(err) = tap.send(envelope.clone(), None) {
                warn!(channel = %self.name, tap = %tap.name(), error = %err, "tap delivery failed");
            }
        }
        self.inner.send(envelope, timeout)
    }

    fn as_subscribable(&self) -> Option<&dyn SubscribableChannel> {
        if self.inner.as_subscribable().is_some() {
            Some(self)
        } else {
            None
        }
    }

    fn as_pollable(&self) -> Option<&dyn PollableChannel> {
        if self.inner.as_pollable().is_some() {
            Some(self)
        } else {
            None
        }
    }
}

impl SubscribableChannel for TappedChannel {
    fn subscribe(&self, handler: Arc<dyn MessageHandler>) -> SubscriptionId {
        self.inner
            .as_subscribable()
            .expect("as_subscribable already confirmed Some before this is reachable")
            .subscribe(handler)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner
            .as_subscribable()
            .map(|subscribable| subscribable.unsubscribe(id))
            .unwrap_or(false)
    }
}

impl PollableChannel for TappedChannel {
    fn receive(&self, timeout: Option<Duration>) -> Option<Envelope> {
        self.inner.as_pollable().and_then(|pollable| pollable.receive(timeout))
    }
}

/// How a bidirectional bridge (R2) forwards outbound sends into the inbound
/// binding: by subscribing directly (cheap, synchronous) when the outbound
/// channel supports it, or by pumping a background thread when the outbound
/// channel is pollable-only.
enum Bridge {
    Subscription(SubscriptionId),
    Pump { running: Arc<AtomicBool>, handle: JoinHandle<()> },
}

struct Entry {
    inbound: Option<Arc<TappedChannel>>,
    outbound: Option<Arc<dyn Channel>>,
    bridge: Option<Bridge>,
}

impl Default for Entry {
    fn default() -> Self {
        Entry {
            inbound: None,
            outbound: None,
            bridge: None,
        }
    }
}

/// Name-indexed directory of channels. At most one inbound and one outbound
/// binding per name (R1); registering both under the same name forms a
/// bridge so outbound sends reach the inbound binding's subscribers (R2).
pub struct ChannelRegistry {
    entries: DashMap<String, Entry>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        ChannelRegistry {
            entries: DashMap::new(),
        }
    }

    /// Register `channel` as the inbound endpoint for `name`.
    pub fn inbound(&self, name: impl Into<String>, channel: Arc<dyn Channel>) -> Result<()> {
        let name = name.into();
        let mut entry = self.entries.entry(name.clone()).or_default();
        if entry.inbound.is_some() {
            return Err(MessagingError::argument(format!("inbound already registered for {name:?}")));
        }
        entry.inbound = Some(Arc::new(TappedChannel::new(name.clone(), channel)));
        debug!(channel = %name, "inbound binding registered");
        self.establish_bridge_if_ready(&name, &mut entry);
        Ok(())
    }

    /// Register `channel` as the outbound endpoint for `name`.
    pub fn outbound(&self, name: impl Into<String>, channel: Arc<dyn Channel>) -> Result<()> {
        let name = name.into();
        let mut entry = self.entries.entry(name.clone()).or_default();
        if entry.outbound.is_some() {
            return Err(MessagingError::argument(format!("outbound already registered for {name:?}")));
        }
        entry.outbound = Some(channel);
        debug!(channel = %name, "outbound binding registered");
        self.establish_bridge_if_ready(&name, &mut entry);
        Ok(())
    }

    /// Attach an observer channel to an existing inbound binding. Fails with
    /// an argument error if `name` has no inbound binding (e.g. outbound-only).
    pub fn tap(&self, name: &str, tap_channel: Arc<dyn Channel>) -> Result<()> {
        let entry = self.entries.get(name).ok_or_else(|| {
            MessagingError::argument(format!("cannot tap {name:?}: no such channel registered"))
        })?;
        match &entry.inbound {
            Some(inbound) => {
                inbound.add_tap(tap_channel);
                debug!(channel = %name, "tap attached");
                Ok(())
            }
            None => Err(MessagingError::argument(format!(
                "cannot tap {name:?}: it has no inbound binding"
            ))),
        }
    }

    /// Remove a name's bindings entirely, stopping any bridge thread.
    pub fn unregister(&self, name: &str) -> bool {
        if let Some((_, entry)) = self.entries.remove(name) {
            if let Some(Bridge::Pump { running, .. }) = entry.bridge {
                running.store(false, Ordering::Relaxed);
            }
            true
        } else {
            false
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    fn establish_bridge_if_ready(&self, name: &str, entry: &mut Entry) {
        if entry.bridge.is_some() {
            return;
        }
        let (Some(inbound), Some(outbound)) = (entry.inbound.clone(), entry.outbound.clone()) else {
            return;
        };

        let inbound_channel: Arc<dyn Channel> = inbound;
        if let Some(subscribable) = outbound.as_subscribable() {
            let forward_target = inbound_channel.clone();
            let id = subscribable.subscribe(Arc::new(move |e: &Envelope| {
                forward_target.send(e.clone(), None).map(|_| ())
            }));
            debug!(channel = %name, "bridge established via subscription");
            entry.bridge = Some(Bridge::Subscription(id));
        } else if outbound.as_pollable().is_some() {
            let running = Arc::new(AtomicBool::new(true));
            let running_for_thread = running.clone();
            let name_owned = name.to_string();
            let handle = thread::spawn(move || {
                while running_for_thread.load(Ordering::Relaxed) {
                    let received = outbound
                        .as_pollable()
                        .and_then(|pollable| pollable.receive(Some(Duration::from_millis(200))));
                    if let Some(envelope) = received {
                        if let Err(err) = inbound_channel.send(envelope, None) {
                            warn!(channel = %name_owned, error = %err, "bridge forward failed");
                        }
                    }
                }
            });
            debug!(channel = %name, "bridge established via pump thread");
            entry.bridge = Some(Bridge::Pump { running, handle });
        }
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelResolver for ChannelRegistry {
    fn resolve(&self, name: &str) -> Result<Arc<dyn Channel>> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| MessagingError::resolution(name, "no channel registered under this name"))?;

        if let Some(outbound) = &entry.outbound {
            return Ok(outbound.clone());
        }
        if let Some(inbound) = &entry.inbound {
            return Ok(inbound.clone() as Arc<dyn Channel>);
        }
        Err(MessagingError::resolution(name, "registered with neither inbound nor outbound binding"))
    }
}
