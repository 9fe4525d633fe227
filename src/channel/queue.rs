use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use tracing::{debug, warn};

use crate::envelope::Envelope;
use crate::error::Result;

use super::{Channel, PollableChannel};

/// A FIFO channel decoupling producer and consumer threads. Bounded queues
/// block `send` up to the requested timeout once full; unbounded queues never
/// block on send. `receive` always blocks up to the requested timeout (or
/// indefinitely when `timeout` is `None`).
pub struct QueueChannel {
    name: String,
    sender: Sender<Envelope>,
    receiver: Receiver<Envelope>,
}

impl QueueChannel {
    pub fn unbounded(name: impl Into<String>) -> Self {
        let (sender, receiver) = unbounded();
        QueueChannel {
            name: name.into(),
            sender,
            receiver,
        }
    }

    pub fn bounded(name: impl Into<String>, capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        QueueChannel {
            name: name.into(),
            sender,
            receiver,
        }
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl Channel for QueueChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, envelope: Envelope, timeout: Option<Duration>) -> Result<bool> {
        let outcome = match timeout {
            Some(timeout) => self.sender.send_timeout(envelope, timeout),
            None => self.sender.send(envelope).map_err(|e| SendTimeoutError::Disconnected(e.0)),
        };

        match outcome {
            Ok(()) => Ok(true),
            Err(SendTimeoutError::Timeout(_)) => {
                debug!(channel = %self.name, "send timed out, queue full");
                Ok(false)
            }
            Err(SendTimeoutError::Disconnected(_)) => {
                warn!(channel = %self.name, "send failed, channel disconnected");
                Ok(false)
            }
        }
    }

    fn as_pollable(&self) -> Option<&dyn PollableChannel> {
        Some(self)
    }
}

impl PollableChannel for QueueChannel {
    fn receive(&self, timeout: Option<Duration>) -> Option<Envelope> {
        let outcome = match timeout {
            Some(timeout) => self.receiver.recv_timeout(timeout),
            None => self.receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match outcome {
            Ok(envelope) => Some(envelope),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn envelope(payload: &str) -> Envelope {
        Envelope::build(payload.to_string(), BTreeMap::new())
    }

    #[test]
    fn fifo_order_is_preserved() {
        let channel = QueueChannel::unbounded("test.queue");
        channel.send(envelope("a"), None).unwrap();
        channel.send(envelope("b"), None).unwrap();

        let first = channel.receive(None).unwrap();
        let second = channel.receive(None).unwrap();
        assert_eq!(first.payload::<String>().unwrap(), "a");
        assert_eq!(second.payload::<String>().unwrap(), "b");
    }

    #[test]
    fn receive_on_empty_channel_times_out() {
        let channel = QueueChannel::unbounded("test.queue");
        assert!(channel.receive(Some(Duration::from_millis(5))).is_none());
    }

    #[test]
    fn bounded_channel_reports_full_as_timeout() {
        let channel = QueueChannel::bounded("test.queue", 1);
        assert!(channel.send(envelope("a"), Some(Duration::from_millis(5))).unwrap());
        assert!(!channel.send(envelope("b"), Some(Duration::from_millis(5))).unwrap());
    }

    #[test]
    fn length_tracks_pending_envelopes() {
        let channel = QueueChannel::unbounded("test.queue");
        assert_eq!(channel.len(), 0);
        channel.send(envelope("a"), None).unwrap();
        assert_eq!(channel.len(), 1);
        channel.receive(None);
        assert!(channel.is_empty());
    }
}
