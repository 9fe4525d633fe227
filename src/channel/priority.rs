use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver as PermitReceiver, Sender as PermitSender};
use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::envelope::Envelope;
use crate::error::Result;

use super::{Channel, PollableChannel};

/// Orders two envelopes for priority-queue placement. Must return `Greater`
/// for the envelope that should be received first.
pub type Comparator = Arc<dyn Fn(&Envelope, &Envelope) -> Ordering + Send + Sync>;

/// Default comparator (§4.2): `priority` header descending, `__priorityChannelSequence__`
/// ascending as the FIFO tiebreaker (P1).
fn default_comparator() -> Comparator {
    Arc::new(|a, b| {
        a.priority().cmp(&b.priority()).then_with(|| {
            let seq_a = a.priority_sequence().unwrap_or(0);
            let seq_b = b.priority_sequence().unwrap_or(0);
            // Reversed: a lower sequence number must sort as "greater" so it
            // is popped first when priorities tie.
            seq_b.cmp(&seq_a)
        })
    })
}

struct HeapEntry {
    envelope: Envelope,
    comparator: Comparator,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.comparator)(&self.envelope, &other.envelope)
    }
}

/// A bounded or unbounded priority queue channel (§4.2). Envelopes are
/// received in the order established by `comparator`; the default orders by
/// the `priority` header, descending, with FIFO order within a priority
/// class (P1). Capacity, when set, is enforced by a semaphore so `send` never
/// exceeds it (P2); the internal sequence tiebreaker header is never exposed
/// to a receiver (P3).
pub struct PriorityChannel {
    name: String,
    heap: Mutex<BinaryHeap<HeapEntry>>,
    not_empty: Condvar,
    comparator: Comparator,
    sequence: AtomicI64,
    permits: Option<(PermitSender<()>, PermitReceiver<()>)>,
}

impl PriorityChannel {
    pub fn unbounded(name: impl Into<String>) -> Self {
        Self::with_comparator(name, None, default_comparator())
    }

    pub fn bounded(name: impl Into<String>, capacity: usize) -> Self {
        Self::with_comparator(name, Some(capacity), default_comparator())
    }

    pub fn with_comparator(name: impl Into<String>, capacity: Option<usize>, comparator: Comparator) -> Self {
        let permits = capacity.map(|capacity| {
            let (tx, rx) = bounded(capacity);
            for _ in 0..capacity {
                tx.try_send(()).expect("channel sized to capacity, cannot be full yet");
            }
            (tx, rx)
        });

        PriorityChannel {
            name: name.into(),
            heap: Mutex::new(BinaryHeap::new()),
            not_empty: Condvar::new(),
            comparator,
            sequence: AtomicI64::new(0),
            permits,
        }
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }

    fn acquire_permit(&self, timeout: Option<Duration>) -> bool {
        match &self.permits {
            None => true,
            Some((_, rx)) => match timeout {
                Some(timeout) => rx.recv_timeout(timeout).is_ok(),
                None => rx.recv().is_ok(),
            },
        }
    }

    fn release_permit(&self) {
        if let Some((tx, _)) = &self.permits {
            // Balanced by construction: every release corresponds to one
            // prior acquire, so the channel can never be observed full here.
            let _ = tx.try_send(());
        }
    }
}

impl Channel for PriorityChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, envelope: Envelope, timeout: Option<Duration>) -> Result<bool> {
        if !self.acquire_permit(timeout) {
            debug!(channel = %self.name, "priority channel at capacity, send timed out");
            return Ok(false);
        }

        let sequence = self.sequence.fetch_add(1, AtomicOrdering::Relaxed);
        let stamped = envelope.with_priority_sequence(sequence);

        let mut heap = self.heap.lock();
        heap.push(HeapEntry {
            envelope: stamped,
            comparator: self.comparator.clone(),
        });
        drop(heap);
        self.not_empty.notify_one();
        Ok(true)
    }

    fn as_pollable(&self) -> Option<&dyn PollableChannel> {
        Some(self)
    }
}

impl PollableChannel for PriorityChannel {
    fn receive(&self, timeout: Option<Duration>) -> Option<Envelope> {
        let mut heap = self.heap.lock();
        if heap.is_empty() {
            match timeout {
                Some(timeout) => {
                    let result = self.not_empty.wait_for(&mut heap, timeout);
                    if heap.is_empty() && result.timed_out() {
                        return None;
                    }
                }
                None => {
                    while heap.is_empty() {
                        self.not_empty.wait(&mut heap);
                    }
                }
            }
        }

        let entry = heap.pop()?;
        drop(heap);
        self.release_permit();
        Some(entry.envelope.without_priority_sequence())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::HEADER_PRIORITY_SEQUENCE;
    use std::collections::BTreeMap;

    fn with_priority(payload: &str, priority: i64) -> Envelope {
        Envelope::builder(payload.to_string()).with_priority(priority).finish()
    }

    #[test]
    fn receives_in_priority_descending_order() {
        let channel = PriorityChannel::unbounded("test.priority");
        let priorities = [1, 9, 5, 9, 1];
        let payloads = ["a", "b", "c", "d", "e"];
        for (p, payload) in priorities.iter().zip(payloads.iter()) {
            channel.send(with_priority(payload, *p), None).unwrap();
        }

        let mut received = Vec::new();
        while let Some(e) = channel.receive(Some(Duration::from_millis(10))) {
            received.push(e.payload::<String>().unwrap().clone());
        }
        assert_eq!(received, vec!["b", "d", "c", "a", "e"]);
    }

    #[test]
    fn equal_priority_preserves_fifo_order() {
        let channel = PriorityChannel::unbounded("test.priority");
        channel.send(with_priority("first", 5), None).unwrap();
        channel.send(with_priority("second", 5), None).unwrap();
        channel.send(with_priority("third", 5), None).unwrap();

        assert_eq!(channel.receive(None).unwrap().payload::<String>().unwrap(), "first");
        assert_eq!(channel.receive(None).unwrap().payload::<String>().unwrap(), "second");
        assert_eq!(channel.receive(None).unwrap().payload::<String>().unwrap(), "third");
    }

    #[test]
    fn sequence_header_never_escapes_the_channel() {
        let channel = PriorityChannel::unbounded("test.priority");
        channel.send(with_priority("a", 1), None).unwrap();
        let received = channel.receive(None).unwrap();
        assert!(received.header(HEADER_PRIORITY_SEQUENCE).is_none());
    }

    #[test]
    fn capacity_is_never_exceeded() {
        let channel = PriorityChannel::bounded("test.priority", 1);
        assert!(channel.send(with_priority("a", 1), Some(Duration::from_millis(5))).unwrap());
        assert!(!channel.send(with_priority("b", 1), Some(Duration::from_millis(5))).unwrap());

        channel.receive(None);
        assert!(channel.send(with_priority("c", 1), Some(Duration::from_millis(5))).unwrap());
    }

    #[test]
    fn missing_priority_header_defaults_to_zero() {
        let channel = PriorityChannel::unbounded("test.priority");
        channel.send(Envelope::build("no-priority".to_string(), BTreeMap::new()), None).unwrap();
        channel.send(with_priority("has-priority", 5), None).unwrap();

        assert_eq!(channel.receive(None).unwrap().payload::<String>().unwrap(), "has-priority");
        assert_eq!(channel.receive(None).unwrap().payload::<String>().unwrap(), "no-priority");
    }
}
