//! Sidecar client: one connection, a reader task and a single resend timer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::cache::{CachedValue, NotificationCache};
use super::pending::{Delivery, PendingTable, RequestState};
use super::protocol::{Frame, FrameReader, Request, write_frame};
use crate::config::SidecarSettings;
use crate::error::SidecarError;

const LOG_TARGET: &str = "yosegi::sidecar";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    pub retry_interval: Duration,
    pub request_timeout: Duration,
    /// How long settled sequence numbers are remembered
    pub retention: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        (&SidecarSettings::default()).into()
    }
}

impl From<&SidecarSettings> for ClientConfig {
    fn from(settings: &SidecarSettings) -> Self {
        Self {
            retry_interval: settings.retry_interval(),
            request_timeout: settings.request_timeout(),
            retention: settings.dedup_window(),
        }
    }
}

type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct Shared {
    writer: Mutex<BoxWriter>,
    pending: PendingTable,
    cache: NotificationCache,
    closed: AtomicBool,
    config: ClientConfig,
}

impl Shared {
    async fn send(&self, frame: &Frame) -> Result<(), SidecarError> {
        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, frame).await
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.pending.fail_all(Instant::now());
    }
}

/// Connection to one sidecar server.
///
/// Dropping the client stops its background tasks.
pub struct SidecarClient {
    shared: Arc<Shared>,
    next_seq: AtomicU64,
    cancel: CancellationToken,
    _reader: JoinHandle<()>,
    _timer: JoinHandle<()>,
}

impl std::fmt::Debug for SidecarClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SidecarClient")
            .field("closed", &self.is_closed())
            .field("pending", &self.shared.pending.len())
            .finish()
    }
}

impl SidecarClient {
    /// Start a client over an already connected stream pair.
    pub fn new<R, W>(reader: R, writer: W, config: ClientConfig) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let shared = Arc::new(Shared {
            writer: Mutex::new(Box::new(writer)),
            pending: PendingTable::new(),
            cache: NotificationCache::new(),
            closed: AtomicBool::new(false),
            config,
        });
        let cancel = CancellationToken::new();
        let reader = tokio::spawn(reader_loop(
            FrameReader::new(reader),
            Arc::clone(&shared),
            cancel.clone(),
        ));
        let timer = tokio::spawn(resend_loop(Arc::clone(&shared), cancel.clone()));
        Self {
            shared,
            next_seq: AtomicU64::new(1),
            cancel,
            _reader: reader,
            _timer: timer,
        }
    }

    /// Connect to a server listening on a Unix domain socket.
    #[cfg(unix)]
    pub async fn connect(
        path: &std::path::Path,
        config: ClientConfig,
    ) -> Result<Self, SidecarError> {
        let stream = tokio::net::UnixStream::connect(path)
            .await
            .map_err(|e| SidecarError::Unavailable(format!("{}: {}", path.display(), e)))?;
        let (read, write) = stream.into_split();
        Ok(Self::new(read, write, config))
    }

    #[cfg(not(unix))]
    pub async fn connect(
        path: &std::path::Path,
        _config: ClientConfig,
    ) -> Result<Self, SidecarError> {
        Err(SidecarError::Unavailable(format!(
            "{}: local sockets are not supported on this platform",
            path.display()
        )))
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    pub fn cached(&self, kind: &str, file: &str) -> Option<CachedValue> {
        self.shared.cache.get(kind, file)
    }

    pub fn invalidate(&self, file: &str) {
        self.shared.cache.invalidate_file(file);
    }

    /// Send a request and wait for its response.
    ///
    /// `Ok(None)` is a `null` response. The request is re-sent every
    /// `retry_interval` until answered or `request_timeout` passes.
    pub async fn try_request(
        &self,
        kind: &str,
        file: &str,
        args: Vec<Value>,
    ) -> Result<Option<Value>, SidecarError> {
        if self.is_closed() {
            return Err(SidecarError::Closed);
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let request = Request {
            seq,
            kind: kind.to_string(),
            file: file.to_string(),
            args,
        };
        let waiter = self.shared.pending.register(request.clone(), Instant::now());
        if let Err(e) = self.shared.send(&Frame::Request(request)).await {
            // the timer keeps re-sending; only a closed connection is final
            warn!(target: LOG_TARGET, "failed to send request {}: {}", seq, e);
        }

        // the timer expires the entry; this bound only covers a stopped timer
        let bound = self.shared.config.request_timeout + self.shared.config.retry_interval * 2;
        let data = match tokio::time::timeout(bound, waiter).await {
            Ok(Ok(data)) => data,
            Ok(Err(_)) => return Err(SidecarError::Closed),
            Err(_) => return Err(SidecarError::Timeout { seq }),
        };
        match self.shared.pending.state(seq) {
            Some(RequestState::TimedOut) if self.is_closed() => Err(SidecarError::Closed),
            Some(RequestState::TimedOut) => Err(SidecarError::Timeout { seq }),
            _ => Ok(data),
        }
    }

    /// Like [`try_request`](Self::try_request), with every failure reported
    /// as "no data".
    pub async fn request(&self, kind: &str, file: &str, args: Vec<Value>) -> Option<Value> {
        match self.try_request(kind, file, args).await {
            Ok(data) => data,
            Err(e) => {
                debug!(target: LOG_TARGET, "{} for {} gave no data: {}", kind, file, e);
                None
            }
        }
    }

    /// Typed variant; a response that does not deserialize is "no data".
    pub async fn request_as<T: DeserializeOwned>(
        &self,
        kind: &str,
        file: &str,
        args: Vec<Value>,
    ) -> Option<T> {
        let data = self.request(kind, file, args).await?;
        match serde_json::from_value(data) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(target: LOG_TARGET, "unexpected {} response: {}", kind, e);
                None
            }
        }
    }
}

impl Drop for SidecarClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn reader_loop<R: AsyncRead + Unpin>(
    mut frames: FrameReader<R>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(target: LOG_TARGET, "reader cancelled");
                break;
            }
            result = frames.next_frame() => match result {
                Ok(Some(frame)) => handle_frame(frame, &shared),
                Ok(None) => {
                    debug!(target: LOG_TARGET, "server closed the connection");
                    break;
                }
                Err(SidecarError::Protocol(message)) => {
                    warn!(target: LOG_TARGET, "skipping malformed frame: {}", message);
                }
                Err(e) => {
                    warn!(target: LOG_TARGET, "reader error: {}, failing pending requests", e);
                    break;
                }
            }
        }
    }
    shared.close();
}

fn handle_frame(frame: Frame, shared: &Shared) {
    match frame {
        Frame::Response(response) => {
            match shared
                .pending
                .resolve(response.seq, response.data.clone(), Instant::now())
            {
                Delivery::Resolved { kind, file } => {
                    if let Some(data) = response.data {
                        shared.cache.record_response(&kind, &file, data);
                    }
                }
                Delivery::Discarded => {
                    debug!(
                        target: LOG_TARGET,
                        "discarding duplicate or stale response {}", response.seq
                    );
                }
            }
        }
        Frame::Notification(notification) => shared.cache.fold_notification(&notification),
        Frame::Request(request) => {
            debug!(target: LOG_TARGET, "ignoring request frame {} from server", request.seq);
        }
    }
}

async fn resend_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    let config = shared.config;
    let mut ticker = tokio::time::interval(config.retry_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let now = Instant::now();
        for request in shared.pending.due_for_resend(now, config.retry_interval) {
            debug!(target: LOG_TARGET, "re-sending request {}", request.seq);
            if let Err(e) = shared.send(&Frame::Request(request)).await {
                warn!(target: LOG_TARGET, "re-send failed: {}", e);
            }
        }
        for seq in shared.pending.expire(now, config.request_timeout) {
            debug!(target: LOG_TARGET, "request {} timed out", seq);
        }
        shared.pending.prune(now, config.retention);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

    use crate::sidecar::protocol::{Notification, Response};

    fn config(retry_ms: u64, timeout_ms: u64) -> ClientConfig {
        ClientConfig {
            retry_interval: Duration::from_millis(retry_ms),
            request_timeout: Duration::from_millis(timeout_ms),
            retention: Duration::from_secs(10),
        }
    }

    #[test]
    fn default_config_follows_sidecar_settings() {
        let config = ClientConfig::default();

        assert_eq!(config.retry_interval, Duration::from_millis(1000));
        assert_eq!(config.request_timeout, Duration::from_millis(5000));
        assert_eq!(config.retention, Duration::from_secs(10));
    }

    fn pair(
        config: ClientConfig,
    ) -> (
        SidecarClient,
        FrameReader<ReadHalf<DuplexStream>>,
        WriteHalf<DuplexStream>,
    ) {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let (client_read, client_write) = tokio::io::split(client_io);
        let (server_read, server_write) = tokio::io::split(server_io);
        (
            SidecarClient::new(client_read, client_write, config),
            FrameReader::new(server_read),
            server_write,
        )
    }

    async fn next_request(frames: &mut FrameReader<ReadHalf<DuplexStream>>) -> Request {
        match frames.next_frame().await.unwrap() {
            Some(Frame::Request(request)) => request,
            other => panic!("expected a request, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn dropped_ack_is_retried_and_resolves_exactly_once() {
        let (client, mut frames, mut server) = pair(config(20, 5000));

        let server_task = tokio::spawn(async move {
            let first = next_request(&mut frames).await;
            // no reply: wait for the resend of the same sequence number
            let retry = next_request(&mut frames).await;
            assert_eq!(first, retry);
            for data in [json!(["Original"]), json!(["Duplicate"])] {
                let response = Frame::Response(Response {
                    seq: first.seq,
                    data: Some(data),
                });
                write_frame(&mut server, &response).await.unwrap();
            }
            (frames, server)
        });

        let data = client
            .try_request("componentNames", "/a/App.vue", vec![])
            .await
            .unwrap();
        assert_eq!(data, Some(json!(["Original"])));
        let (_frames, _server) = server_task.await.unwrap();

        // give the reader a chance to see the duplicate
        tokio::time::sleep(Duration::from_millis(50)).await;
        let cached = client.cached("componentNames", "/a/App.vue").unwrap();
        assert_eq!(cached.data, json!(["Original"]));
        assert!(cached.authoritative);
        assert!(!client.is_closed());
    }

    #[tokio::test]
    async fn unanswered_request_times_out_as_no_data() {
        let (client, _frames, _server) = pair(config(10, 60));

        let started = Instant::now();
        let result = client.try_request("componentNames", "/a/App.vue", vec![]).await;
        assert!(matches!(result, Err(SidecarError::Timeout { seq: 1 })));
        assert!(started.elapsed() < Duration::from_secs(2));

        assert_eq!(client.request("componentNames", "/a/App.vue", vec![]).await, None);
    }

    #[tokio::test]
    async fn notifications_fold_into_cache_until_a_response_overwrites_them() {
        let (client, mut frames, mut server) = pair(config(1000, 5000));

        let push = Frame::Notification(Notification {
            kind: "componentNames".to_string(),
            file: "/a/App.vue".to_string(),
            data: json!(["Stale"]),
        });
        write_frame(&mut server, &push).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!client.cached("componentNames", "/a/App.vue").unwrap().authoritative);

        let server_task = tokio::spawn(async move {
            let request = next_request(&mut frames).await;
            let response = Frame::Response(Response {
                seq: request.seq,
                data: Some(json!(["Fresh"])),
            });
            write_frame(&mut server, &response).await.unwrap();
            (frames, server)
        });
        let data = client.request("componentNames", "/a/App.vue", vec![]).await;
        assert_eq!(data, Some(json!(["Fresh"])));
        let _keep = server_task.await.unwrap();

        let cached = client.cached("componentNames", "/a/App.vue").unwrap();
        assert_eq!(cached.data, json!(["Fresh"]));
        assert!(cached.authoritative);
    }

    #[tokio::test]
    async fn closed_connection_fails_pending_and_later_requests() {
        let (client, frames, server) = pair(config(20, 5000));

        let request = client.try_request("componentNames", "/a/App.vue", vec![]);
        let close = async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            drop(frames);
            drop(server);
        };
        let (result, ()) = tokio::join!(request, close);
        assert!(matches!(result, Err(SidecarError::Closed)));
        assert!(client.is_closed());
        assert!(matches!(
            client.try_request("x", "/a", vec![]).await,
            Err(SidecarError::Closed)
        ));
    }
}
