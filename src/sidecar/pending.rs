//! Pending request table keyed by sequence number.
//!
//! Each request moves through a small state machine:
//!
//! ```text
//! Sent ──response──▶ Acked
//!   │
//!   └──timeout─────▶ TimedOut
//! ```
//!
//! The waiter is resolved exactly once, on the transition out of `Sent`.
//! Responses for a sequence that already left `Sent` are discarded.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::oneshot;

use super::protocol::Request;
use crate::error::LockResultExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Sent,
    Acked,
    TimedOut,
}

struct Entry {
    request: Request,
    state: RequestState,
    registered_at: Instant,
    last_sent: Instant,
    /// Time of the transition out of `Sent`
    settled_at: Option<Instant>,
    waiter: Option<oneshot::Sender<Option<Value>>>,
}

impl Entry {
    fn settle(&mut self, state: RequestState, data: Option<Value>, now: Instant) {
        self.state = state;
        self.settled_at = Some(now);
        if let Some(waiter) = self.waiter.take() {
            // the caller may have gone away; nothing to do then
            let _ = waiter.send(data);
        }
    }
}

/// Outcome of delivering a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// First response; carries the request it answers
    Resolved { kind: String, file: String },
    /// Sequence already settled or never seen
    Discarded,
}

#[derive(Default)]
pub struct PendingTable {
    entries: Mutex<HashMap<u64, Entry>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a request that is about to be written.
    pub fn register(&self, request: Request, now: Instant) -> oneshot::Receiver<Option<Value>> {
        let (tx, rx) = oneshot::channel();
        let mut entries = self.entries.lock().recover_poison("sidecar pending register");
        entries.insert(
            request.seq,
            Entry {
                request,
                state: RequestState::Sent,
                registered_at: now,
                last_sent: now,
                settled_at: None,
                waiter: Some(tx),
            },
        );
        rx
    }

    pub fn resolve(&self, seq: u64, data: Option<Value>, now: Instant) -> Delivery {
        let mut entries = self.entries.lock().recover_poison("sidecar pending resolve");
        match entries.get_mut(&seq) {
            Some(entry) if entry.state == RequestState::Sent => {
                entry.settle(RequestState::Acked, data, now);
                Delivery::Resolved {
                    kind: entry.request.kind.clone(),
                    file: entry.request.file.clone(),
                }
            }
            _ => Delivery::Discarded,
        }
    }

    /// Requests still in `Sent` whose last transmission is at least
    /// `interval` old. Their resend time is updated.
    pub fn due_for_resend(&self, now: Instant, interval: Duration) -> Vec<Request> {
        let mut entries = self.entries.lock().recover_poison("sidecar pending resend");
        let mut due: Vec<Request> = entries
            .values_mut()
            .filter(|e| e.state == RequestState::Sent && now.duration_since(e.last_sent) >= interval)
            .map(|e| {
                e.last_sent = now;
                e.request.clone()
            })
            .collect();
        due.sort_by_key(|r| r.seq);
        due
    }

    /// Move requests older than `timeout` to `TimedOut`, resolving them with
    /// `None`. Returns the affected sequence numbers.
    pub fn expire(&self, now: Instant, timeout: Duration) -> Vec<u64> {
        let mut entries = self.entries.lock().recover_poison("sidecar pending expire");
        let mut expired = Vec::new();
        for (seq, entry) in entries.iter_mut() {
            if entry.state == RequestState::Sent && now.duration_since(entry.registered_at) >= timeout {
                entry.settle(RequestState::TimedOut, None, now);
                expired.push(*seq);
            }
        }
        expired.sort_unstable();
        expired
    }

    /// Connection lost: every request still waiting resolves to `None`.
    pub fn fail_all(&self, now: Instant) {
        let mut entries = self.entries.lock().recover_poison("sidecar pending fail_all");
        for entry in entries.values_mut() {
            if entry.state == RequestState::Sent {
                entry.settle(RequestState::TimedOut, None, now);
            }
        }
    }

    /// Forget settled entries older than `retention`.
    ///
    /// Sequence numbers are never reused, so a response for a forgotten
    /// sequence is still discarded.
    pub fn prune(&self, now: Instant, retention: Duration) {
        let mut entries = self.entries.lock().recover_poison("sidecar pending prune");
        entries.retain(|_, e| {
            e.settled_at
                .is_none_or(|settled| now.duration_since(settled) < retention)
        });
    }

    pub fn state(&self, seq: u64) -> Option<RequestState> {
        let entries = self.entries.lock().recover_poison("sidecar pending state");
        entries.get(&seq).map(|e| e.state)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().recover_poison("sidecar pending len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(seq: u64) -> Request {
        Request {
            seq,
            kind: "componentNames".to_string(),
            file: "/a/App.vue".to_string(),
            args: Vec::new(),
        }
    }

    #[tokio::test]
    async fn first_response_resolves_and_duplicates_are_discarded() {
        let table = PendingTable::new();
        let start = Instant::now();
        let rx = table.register(request(1), start);

        assert_eq!(
            table.resolve(1, Some(json!(["Foo"])), start),
            Delivery::Resolved {
                kind: "componentNames".to_string(),
                file: "/a/App.vue".to_string()
            }
        );
        assert_eq!(table.resolve(1, Some(json!(["Bar"])), start), Delivery::Discarded);
        assert_eq!(table.resolve(99, None, start), Delivery::Discarded);

        assert_eq!(rx.await.unwrap(), Some(json!(["Foo"])));
        assert_eq!(table.state(1), Some(RequestState::Acked));
    }

    #[test]
    fn resend_only_requests_still_waiting_past_the_interval() {
        let table = PendingTable::new();
        let start = Instant::now();
        let interval = Duration::from_millis(100);
        let _a = table.register(request(1), start);
        let _b = table.register(request(2), start + Duration::from_millis(80));
        table.resolve(2, None, start + Duration::from_millis(90));

        assert!(table.due_for_resend(start + Duration::from_millis(50), interval).is_empty());
        let due = table.due_for_resend(start + Duration::from_millis(150), interval);
        assert_eq!(due.iter().map(|r| r.seq).collect::<Vec<_>>(), vec![1]);
        // just resent
        assert!(table.due_for_resend(start + Duration::from_millis(160), interval).is_empty());
    }

    #[tokio::test]
    async fn timeout_resolves_to_none_once() {
        let table = PendingTable::new();
        let start = Instant::now();
        let rx = table.register(request(3), start);

        assert!(table.expire(start + Duration::from_millis(10), Duration::from_secs(1)).is_empty());
        assert_eq!(table.expire(start + Duration::from_secs(2), Duration::from_secs(1)), vec![3]);
        assert_eq!(rx.await.unwrap(), None);

        // a late response after the timeout changes nothing
        assert_eq!(table.resolve(3, Some(json!(1)), start + Duration::from_secs(3)), Delivery::Discarded);
        assert_eq!(table.state(3), Some(RequestState::TimedOut));

        table.prune(start + Duration::from_secs(10), Duration::from_secs(5));
        assert!(table.is_empty());
    }
}
