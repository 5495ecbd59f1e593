use gibberish_events::{TimelineEnvelope, TimelineEvent};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;
use uuid::Uuid;

/// The append-only outbound timeline for one session (§4.4). Producers
/// (`publish`) never block; a single logical consumer drains it through
/// `recv`. Modeled on the corpus's bounded-bus shape: an atomic sequence
/// counter plus a bounded buffer that drops the oldest entry under
/// back-pressure rather than growing without bound or blocking the
/// scheduler.
pub struct OutboundQueue {
    capacity: usize,
    seq: AtomicU64,
    buffer: Mutex<VecDeque<TimelineEnvelope>>,
    notify: Notify,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            seq: AtomicU64::new(0),
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
        }
    }

    /// Appends `event`, returning the sequence number assigned to it.
    pub fn publish(&self, session_id: Uuid, event: TimelineEvent) -> u64 {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let envelope = TimelineEnvelope {
            session_id,
            seq,
            event,
        };
        {
            let mut buffer = self.buffer.lock().unwrap();
            if buffer.len() >= self.capacity {
                if let Some(dropped) = buffer.pop_front() {
                    tracing::warn!(
                        session_id = %session_id,
                        dropped_seq = dropped.seq,
                        "outbound timeline queue full, dropping oldest event"
                    );
                }
            }
            buffer.push_back(envelope);
        }
        self.notify.notify_one();
        seq
    }

    /// Awaits and removes the oldest undelivered event.
    pub async fn recv(&self) -> TimelineEnvelope {
        loop {
            if let Some(envelope) = self.buffer.lock().unwrap().pop_front() {
                return envelope;
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
