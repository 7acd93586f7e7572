//! Server half of the sidecar protocol.
//!
//! The server deduplicates requests by sequence number within a window: a
//! re-sent request that was already processed gets the cached response
//! replayed instead of running the handler again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, warn};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};

use super::protocol::{Frame, FrameReader, Request, Response, write_frame};
use crate::error::{LockResultExt, SidecarError};
use crate::plugin::BoxFuture;

const LOG_TARGET: &str = "yosegi::sidecar";

pub type RequestHandler = Arc<dyn Fn(Request) -> BoxFuture<Option<Value>> + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub enum Seen {
    /// Not seen within the window; run it
    Fresh,
    /// Already answered; send this again
    Replay(Option<Value>),
    /// Still running; its response will follow
    InFlight,
}

struct SeenEntry {
    at: Instant,
    response: Option<Option<Value>>,
}

pub struct SeqDeduper {
    window: Duration,
    seen: Mutex<HashMap<u64, SeenEntry>>,
}

impl SeqDeduper {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: Mutex::default(),
        }
    }

    /// Classify `seq`, marking fresh ones as in flight.
    pub fn check(&self, seq: u64, now: Instant) -> Seen {
        let mut seen = self.seen.lock().recover_poison("sidecar dedup check");
        let window = self.window;
        seen.retain(|_, e| now.duration_since(e.at) < window);
        match seen.get(&seq) {
            Some(SeenEntry {
                response: Some(response),
                ..
            }) => Seen::Replay(response.clone()),
            Some(SeenEntry { response: None, .. }) => Seen::InFlight,
            None => {
                seen.insert(
                    seq,
                    SeenEntry {
                        at: now,
                        response: None,
                    },
                );
                Seen::Fresh
            }
        }
    }

    pub fn complete(&self, seq: u64, response: Option<Value>, now: Instant) {
        let mut seen = self.seen.lock().recover_poison("sidecar dedup complete");
        seen.insert(
            seq,
            SeenEntry {
                at: now,
                response: Some(response),
            },
        );
    }
}

/// Serve one connection until the client hangs up.
///
/// Requests run concurrently; responses are written as they complete.
pub async fn serve<R, W>(
    reader: R,
    writer: W,
    handler: RequestHandler,
    window: Duration,
) -> Result<(), SidecarError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let mut frames = FrameReader::new(reader);
    let writer = Arc::new(tokio::sync::Mutex::new(writer));
    let deduper = Arc::new(SeqDeduper::new(window));

    loop {
        let request = match frames.next_frame().await {
            Ok(Some(Frame::Request(request))) => request,
            Ok(Some(other)) => {
                debug!(target: LOG_TARGET, "server ignoring {:?}", other);
                continue;
            }
            Ok(None) => return Ok(()),
            Err(SidecarError::Protocol(message)) => {
                warn!(target: LOG_TARGET, "server skipping malformed frame: {}", message);
                continue;
            }
            Err(e) => return Err(e),
        };

        let seq = request.seq;
        match deduper.check(seq, Instant::now()) {
            Seen::Fresh => {
                let handler = Arc::clone(&handler);
                let deduper = Arc::clone(&deduper);
                let writer = Arc::clone(&writer);
                tokio::spawn(async move {
                    let data = handler(request).await;
                    deduper.complete(seq, data.clone(), Instant::now());
                    let frame = Frame::Response(Response { seq, data });
                    if let Err(e) = write_frame(&mut *writer.lock().await, &frame).await {
                        warn!(target: LOG_TARGET, "failed to answer {}: {}", seq, e);
                    }
                });
            }
            Seen::Replay(data) => {
                debug!(target: LOG_TARGET, "replaying response {}", seq);
                let frame = Frame::Response(Response { seq, data });
                write_frame(&mut *writer.lock().await, &frame).await?;
            }
            Seen::InFlight => {
                debug!(target: LOG_TARGET, "request {} already running", seq);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn seen_sequences_replay_within_the_window() {
        let deduper = SeqDeduper::new(Duration::from_secs(1));
        let start = Instant::now();

        assert_eq!(deduper.check(1, start), Seen::Fresh);
        assert_eq!(deduper.check(1, start), Seen::InFlight);
        deduper.complete(1, Some(json!(42)), start);
        assert_eq!(deduper.check(1, start + Duration::from_millis(500)), Seen::Replay(Some(json!(42))));

        // outside the window the sequence is forgotten
        assert_eq!(deduper.check(1, start + Duration::from_secs(2)), Seen::Fresh);
    }

    #[tokio::test]
    async fn retried_request_is_not_executed_twice() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handler: RequestHandler = Arc::new(move |request: Request| {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Some(json!(request.kind))
            })
        });

        let (client_io, server_io) = tokio::io::duplex(4096);
        let (server_read, server_write) = tokio::io::split(server_io);
        let server = tokio::spawn(serve(server_read, server_write, handler, Duration::from_secs(10)));

        let (client_read, mut client_write) = tokio::io::split(client_io);
        let mut responses = FrameReader::new(client_read);
        let request = Frame::Request(Request {
            seq: 5,
            kind: "ping".to_string(),
            file: "/a.vue".to_string(),
            args: vec![],
        });

        write_frame(&mut client_write, &request).await.unwrap();
        let first = responses.next_frame().await.unwrap();
        write_frame(&mut client_write, &request).await.unwrap();
        let second = responses.next_frame().await.unwrap();

        let expected = Some(Frame::Response(Response {
            seq: 5,
            data: Some(json!("ping")),
        }));
        assert_eq!(first, expected);
        assert_eq!(second, expected);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        drop(client_write);
        drop(responses);
        server.await.unwrap().unwrap();
    }
}
