//! Bucket scheduler
//!
//! Every bucket key gets a worker task fed by an unbounded channel. The
//! worker takes one request at a time, so a bucket never has two requests
//! in flight and requests leave in submission order. Before each send it
//! waits out the bucket window and any global pause.
//!
//! A worker that sits idle for [`BUCKET_IDLE_TIMEOUT`] with nothing queued
//! and no open window removes its own map entry and exits; the next request
//! for that key starts a fresh bucket.

use super::bucket::{BucketSnapshot, BucketState};
use super::headers::RateLimitHeaders;
use crate::error::{RestError, RestResult};
use crate::route::resolve_bucket;
use crate::transport::{RestRequest, RestResponse, Transport};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep, sleep_until, Instant};

/// Wait applied to a 429 that names no delay
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// How long a bucket worker waits for work before reclaiming itself
pub const BUCKET_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

type BucketMap = DashMap<String, BucketHandle>;

/// Result of a submitted request
///
/// Resolves once the request has gone through its bucket. Dropping it does
/// not cancel the request.
#[derive(Debug)]
#[must_use = "the response is only observed by awaiting it"]
pub struct PendingResponse {
    rx: oneshot::Receiver<RestResult<RestResponse>>,
}

impl PendingResponse {
    fn resolved(result: RestResult<RestResponse>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }
}

impl Future for PendingResponse {
    type Output = RestResult<RestResponse>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(RestError::Canceled)))
    }
}

struct Job {
    request: RestRequest,
    reply: oneshot::Sender<RestResult<RestResponse>>,
}

struct Bucket {
    key: String,
    state: Mutex<BucketState>,
    pending: AtomicUsize,
}

struct BucketHandle {
    jobs: mpsc::UnboundedSender<Job>,
    bucket: Arc<Bucket>,
}

/// State shared with the bucket workers. They reach the bucket map only
/// through a `Weak`, so dropping the limiter drops every worker's channel.
struct Shared {
    transport: Arc<dyn Transport>,
    max_retries: u32,
    global_until: Mutex<Option<Instant>>,
    closed: watch::Sender<bool>,
    unauthorized_reported: AtomicBool,
}

impl Shared {
    fn global_until(&self, now: Instant) -> Option<Instant> {
        self.global_until.lock().filter(|until| *until > now)
    }

    fn pause_global(&self, until: Instant) {
        let mut global = self.global_until.lock();
        *global = Some(global.map_or(until, |current| current.max(until)));
    }
}

/// Per-route admission control for REST calls
pub struct RateLimiter {
    shared: Arc<Shared>,
    buckets: Arc<BucketMap>,
}

impl RateLimiter {
    /// `max_retries` is how many 429s one request absorbs before its
    /// future fails with [`RestError::RateLimited`]
    pub fn new(transport: Arc<dyn Transport>, max_retries: u32) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                transport,
                max_retries,
                global_until: Mutex::new(None),
                closed,
                unauthorized_reported: AtomicBool::new(false),
            }),
            buckets: Arc::new(DashMap::new()),
        }
    }

    /// Queue `request` on the bucket its path resolves to
    pub fn submit(&self, request: RestRequest) -> PendingResponse {
        let key = resolve_bucket(&request.path);
        self.submit_to(&key, request)
    }

    /// Queue `request` on an explicit bucket
    pub fn submit_to(&self, key: &str, request: RestRequest) -> PendingResponse {
        if self.is_shut_down() {
            return PendingResponse::resolved(Err(RestError::Canceled));
        }

        let (reply, rx) = oneshot::channel();
        let mut job = Job { request, reply };

        // A second pass covers a worker that went away under a live entry
        for _ in 0..2 {
            let handle = self
                .buckets
                .entry(key.to_string())
                .or_insert_with(|| self.spawn_bucket(key));

            // Counted under the entry lock, so reclamation sees it
            handle.bucket.pending.fetch_add(1, Ordering::SeqCst);
            let sent = handle.jobs.send(job);
            match sent {
                Ok(()) => return PendingResponse { rx },
                Err(mpsc::error::SendError(returned)) => {
                    handle.bucket.pending.fetch_sub(1, Ordering::SeqCst);
                    let stale = Arc::clone(&handle.bucket);
                    drop(handle);
                    self.buckets
                        .remove_if(key, |_, h| Arc::ptr_eq(&h.bucket, &stale));
                    tracing::debug!(bucket = %key, "Bucket worker gone, respawning");
                    job = returned;
                }
            }
        }

        let _ = job.reply.send(Err(RestError::Canceled));
        PendingResponse { rx }
    }

    fn spawn_bucket(&self, key: &str) -> BucketHandle {
        let (jobs, rx) = mpsc::unbounded_channel();
        let bucket = Arc::new(Bucket {
            key: key.to_string(),
            state: Mutex::new(BucketState::default()),
            pending: AtomicUsize::new(0),
        });

        tracing::debug!(bucket = %key, "Creating rate limit bucket");
        tokio::spawn(run_bucket(
            Arc::clone(&self.shared),
            Arc::downgrade(&self.buckets),
            Arc::clone(&bucket),
            rx,
        ));

        BucketHandle { jobs, bucket }
    }

    /// Snapshot of a bucket, if it has been used
    pub fn bucket(&self, key: &str) -> Option<BucketSnapshot> {
        self.buckets.get(key).map(|handle| {
            let bucket = &handle.bucket;
            bucket
                .state
                .lock()
                .snapshot(&bucket.key, bucket.pending.load(Ordering::SeqCst))
        })
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// End of the current global pause, if one is active
    pub fn global_paused_until(&self) -> Option<Instant> {
        self.shared.global_until(Instant::now())
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shared.closed.borrow()
    }

    /// Drop every queued request; their futures resolve with
    /// [`RestError::Canceled`]. Requests already sent run to completion.
    pub fn shutdown(&self) {
        if self.shared.closed.send_replace(true) {
            return;
        }
        let queued: usize = self
            .buckets
            .iter()
            .map(|handle| handle.bucket.pending.load(Ordering::SeqCst))
            .sum();
        tracing::info!(buckets = self.buckets.len(), queued, "Shutting down rate limiter");
        self.buckets.clear();
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("buckets", &self.buckets.len())
            .field("max_retries", &self.shared.max_retries)
            .finish()
    }
}

async fn run_bucket(
    shared: Arc<Shared>,
    buckets: Weak<BucketMap>,
    bucket: Arc<Bucket>,
    mut jobs: mpsc::UnboundedReceiver<Job>,
) {
    let mut closed = shared.closed.subscribe();

    loop {
        let job = tokio::select! {
            job = jobs.recv() => job,
            () = sleep(BUCKET_IDLE_TIMEOUT) => {
                if reclaim(&buckets, &bucket) {
                    break;
                }
                continue;
            }
        };
        let Some(job) = job else {
            break;
        };

        let result = execute(&shared, &bucket, &job.request, &mut closed).await;
        bucket.pending.fetch_sub(1, Ordering::SeqCst);

        if let Err(e) = &result {
            tracing::debug!(bucket = %bucket.key, error = %e, "Request failed");
        }
        let _ = job.reply.send(result);
    }

    tracing::trace!(bucket = %bucket.key, "Bucket worker stopped");
}

/// Remove an idle bucket from the map; false while it still has queued
/// work or an unexpired window
fn reclaim(buckets: &Weak<BucketMap>, bucket: &Arc<Bucket>) -> bool {
    let Some(buckets) = buckets.upgrade() else {
        return true;
    };
    if !bucket.state.lock().is_idle(Instant::now()) {
        return false;
    }

    // `submit_to` bumps `pending` while holding the entry, so a request
    // racing with this check keeps the bucket alive
    let removed = buckets
        .remove_if(&bucket.key, |_, handle| {
            Arc::ptr_eq(&handle.bucket, bucket) && handle.bucket.pending.load(Ordering::SeqCst) == 0
        })
        .is_some();
    if removed {
        tracing::debug!(bucket = %bucket.key, "Reclaimed idle rate limit bucket");
    }
    removed
}

async fn execute(
    shared: &Shared,
    bucket: &Bucket,
    request: &RestRequest,
    closed: &mut watch::Receiver<bool>,
) -> RestResult<RestResponse> {
    let mut rate_limited = 0u32;

    loop {
        if !wait_for_slot(shared, bucket, closed).await {
            return Err(RestError::Canceled);
        }

        bucket.state.lock().reserve(Instant::now());

        tracing::trace!(
            bucket = %bucket.key,
            method = %request.method,
            path = %request.path,
            "Dispatching request"
        );
        let response = shared.transport.execute(request).await?;

        let now = Instant::now();
        let headers = RateLimitHeaders::from_response(&response);
        bucket.state.lock().update(&headers, now);

        if response.status != 429 {
            return classify(shared, response);
        }

        let retry_after = headers
            .retry_after
            .or(headers.reset_after)
            .unwrap_or(DEFAULT_RETRY_AFTER);

        if headers.global {
            shared.pause_global(now + retry_after);
        } else {
            bucket.state.lock().hold(now + retry_after);
        }

        tracing::warn!(
            bucket = %bucket.key,
            global = headers.global,
            retry_after_ms = retry_after.as_millis() as u64,
            attempt = rate_limited + 1,
            "Rate limited"
        );

        if rate_limited >= shared.max_retries {
            return Err(RestError::RateLimited {
                retry_after,
                global: headers.global,
            });
        }
        rate_limited += 1;
    }
}

/// Wait until neither the bucket nor the global gate blocks; false when
/// the limiter shut down meanwhile
async fn wait_for_slot(
    shared: &Shared,
    bucket: &Bucket,
    closed: &mut watch::Receiver<bool>,
) -> bool {
    loop {
        let is_closed = *closed.borrow_and_update();
        if is_closed {
            return false;
        }

        let now = Instant::now();
        let bucket_ready = bucket.state.lock().ready_at(now);
        let Some(until) = shared.global_until(now).max(bucket_ready) else {
            return true;
        };

        tracing::debug!(
            bucket = %bucket.key,
            wait_ms = until.saturating_duration_since(now).as_millis() as u64,
            "Waiting for rate limit reset"
        );

        tokio::select! {
            () = sleep_until(until) => {}
            changed = closed.changed() => {
                if changed.is_err() {
                    return false;
                }
            }
        }
    }
}

fn classify(shared: &Shared, response: RestResponse) -> RestResult<RestResponse> {
    match response.status {
        200..=299 => Ok(response),
        401 => {
            if !shared.unauthorized_reported.swap(true, Ordering::SeqCst) {
                tracing::error!("REST request rejected with 401, check the bot token");
            }
            Err(RestError::Unauthorized)
        }
        status => Err(RestError::Http {
            status,
            body: response.text(),
        }),
    }
}
