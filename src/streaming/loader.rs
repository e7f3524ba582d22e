//! Async tile loader with bounded concurrency per resource class
//!
//! Fetches run on a tokio runtime and decode on its blocking pool. Results
//! travel back over a channel that the frame thread drains once per frame,
//! so no load ever mutates the tree mid-walk.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::runtime::{Handle, Runtime};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::core::error::FetchError;
use crate::core::types::Result;

use super::decode::{DecodeJob, Payload};
use super::request_queue::{LoadingQueue, ResourceKind, Ticket, TileRequest};
use super::source::TileSource;

/// Result of one request
#[derive(Debug)]
pub struct LoadOutcome {
    pub request: TileRequest,
    pub result: std::result::Result<Payload, FetchError>,
}

/// Everything needed to start a request later
struct Job {
    source: Arc<dyn TileSource>,
    decode: DecodeJob,
}

/// Counters for frame statistics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoaderStats {
    pub fetches_started: u64,
    pub completions: u64,
    pub dropped: u64,
    pub cancelled: u64,
}

/// Two independent loading queues (imagery and terrain) driving fetch tasks
pub struct Loader {
    imagery: LoadingQueue,
    terrain: LoadingQueue,
    /// Jobs of queued or running requests
    jobs: HashMap<Ticket, Job>,
    /// Running tasks whose outcome has not been received yet
    in_flight: HashMap<Ticket, AbortHandle>,
    completion_tx: mpsc::UnboundedSender<LoadOutcome>,
    completion_rx: mpsc::UnboundedReceiver<LoadOutcome>,
    /// Outcomes received while waiting, not yet handed out
    received: VecDeque<LoadOutcome>,
    next_ticket: u64,
    stats: LoaderStats,
    handle: Handle,
    /// Owned runtime (None when borrowing the caller's)
    #[allow(dead_code)]
    runtime: Option<Runtime>,
}

impl Loader {
    /// Create a loader with its own runtime
    ///
    /// # Arguments
    /// * `imagery_max` - Maximum concurrent imagery fetches
    /// * `terrain_max` - Maximum concurrent terrain fetches
    pub fn new(imagery_max: usize, terrain_max: usize) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("terrae-loader")
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();
        Ok(Self::build(imagery_max, terrain_max, handle, Some(runtime)))
    }

    /// Create a loader that spawns onto an existing runtime
    pub fn with_handle(imagery_max: usize, terrain_max: usize, handle: Handle) -> Self {
        Self::build(imagery_max, terrain_max, handle, None)
    }

    fn build(
        imagery_max: usize,
        terrain_max: usize,
        handle: Handle,
        runtime: Option<Runtime>,
    ) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Self {
            imagery: LoadingQueue::new(imagery_max),
            terrain: LoadingQueue::new(terrain_max),
            jobs: HashMap::new(),
            in_flight: HashMap::new(),
            completion_tx,
            completion_rx,
            received: VecDeque::new(),
            next_ticket: 0,
            stats: LoaderStats::default(),
            handle,
            runtime,
        }
    }

    pub fn next_ticket(&mut self) -> Ticket {
        self.next_ticket += 1;
        Ticket(self.next_ticket)
    }

    fn queue_mut(&mut self, kind: ResourceKind) -> &mut LoadingQueue {
        match kind {
            ResourceKind::Imagery(_) => &mut self.imagery,
            ResourceKind::Terrain => &mut self.terrain,
        }
    }

    /// Queue a request; it starts right away if its class has a free slot.
    ///
    /// # Returns
    /// True if the fetch started immediately
    pub fn submit(
        &mut self,
        request: TileRequest,
        source: Arc<dyn TileSource>,
        decode: DecodeJob,
    ) -> bool {
        let ticket = request.ticket;
        self.jobs.insert(ticket, Job { source, decode });
        match self.queue_mut(request.kind).enqueue(request) {
            Some(request) => {
                self.spawn(request);
                true
            }
            None => {
                log::trace!("Queued request {:?}", ticket);
                false
            }
        }
    }

    fn spawn(&mut self, request: TileRequest) {
        let Some(job) = self.jobs.get(&request.ticket) else {
            log::warn!("No job for ticket {:?}", request.ticket);
            return;
        };

        log::trace!("Fetching {} ({:?}) from {}", request.address, request.kind, job.source.name());
        let fetch = job.source.fetch(request.address);
        let decode = job.decode;
        let ticket = request.ticket;
        let tx = self.completion_tx.clone();

        let task = self.handle.spawn(async move {
            let result = match fetch.await {
                Ok(bytes) => match tokio::task::spawn_blocking(move || decode.run(&bytes)).await {
                    Ok(decoded) => decoded,
                    Err(e) => Err(FetchError::Decode(e.to_string())),
                },
                Err(e) => Err(e),
            };
            // Receiver gone means the loader was dropped
            let _ = tx.send(LoadOutcome { request, result });
        });

        self.in_flight.insert(ticket, task.abort_handle());
        self.stats.fetches_started += 1;
    }

    /// Re-prioritise a pending request that is still wanted.
    pub fn touch(&mut self, kind: ResourceKind, ticket: Ticket, frame: u64) -> bool {
        self.queue_mut(kind).touch(ticket, frame)
    }

    /// Forget a request. A running fetch is aborted; an outcome that already
    /// arrived is discarded when drained.
    pub fn cancel(&mut self, kind: ResourceKind, ticket: Ticket) -> bool {
        self.jobs.remove(&ticket);
        if let Some(abort) = self.in_flight.remove(&ticket) {
            abort.abort();
        }
        let cancelled = self.queue_mut(kind).cancel(ticket).is_some();
        if cancelled {
            self.stats.cancelled += 1;
        }
        cancelled
    }

    /// Forget a request only if it has not started. Running fetches are left
    /// to finish so their result can still be cached.
    pub fn cancel_if_pending(&mut self, kind: ResourceKind, ticket: Ticket) -> bool {
        let queue = self.queue_mut(kind);
        if !queue.is_pending(ticket) {
            return false;
        }
        queue.cancel(ticket);
        self.jobs.remove(&ticket);
        self.stats.cancelled += 1;
        true
    }

    /// Take every outcome that arrived since the last call, freeing their slots.
    pub fn drain_completions(&mut self) -> Vec<LoadOutcome> {
        while let Ok(outcome) = self.completion_rx.try_recv() {
            self.received.push_back(outcome);
        }

        let mut outcomes = Vec::with_capacity(self.received.len());
        while let Some(outcome) = self.received.pop_front() {
            let ticket = outcome.request.ticket;
            self.in_flight.remove(&ticket);
            self.jobs.remove(&ticket);
            if self.queue_mut(outcome.request.kind).complete(ticket).is_none() {
                log::trace!("Discarding outcome of cancelled ticket {:?}", ticket);
                continue;
            }
            self.stats.completions += 1;
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Start pending requests in free slots, newest first, skipping those
    /// `eligible` rejects.
    ///
    /// # Returns
    /// The requests that were discarded
    pub fn pump(&mut self, mut eligible: impl FnMut(&TileRequest) -> bool) -> Vec<TileRequest> {
        let (mut started, mut dropped) = self.imagery.pump(&mut eligible);
        let (terrain_started, terrain_dropped) = self.terrain.pump(&mut eligible);
        started.extend(terrain_started);
        dropped.extend(terrain_dropped);

        for request in &dropped {
            log::trace!("Dropping stale request for {} ({:?})", request.address, request.kind);
            self.jobs.remove(&request.ticket);
        }
        self.stats.dropped += dropped.len() as u64;

        for request in started {
            self.spawn(request);
        }
        dropped
    }

    /// Block until every running fetch has reported back or `timeout` passes.
    ///
    /// Outcomes are buffered for the next [`drain_completions`](Self::drain_completions).
    /// Must not be called from inside an async context.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.in_flight.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let rx = &mut self.completion_rx;
            match self.handle.block_on(async { tokio::time::timeout(remaining, rx.recv()).await }) {
                Ok(Some(outcome)) => {
                    self.in_flight.remove(&outcome.request.ticket);
                    self.received.push_back(outcome);
                }
                Ok(None) | Err(_) => return false,
            }
        }
        true
    }

    /// Abort everything and forget all queued requests.
    pub fn clear(&mut self) -> Vec<TileRequest> {
        for (_, abort) in self.in_flight.drain() {
            abort.abort();
        }
        self.jobs.clear();
        self.received.clear();
        let mut all = self.imagery.clear();
        all.extend(self.terrain.clear());
        all
    }

    pub fn active_count(&self) -> usize {
        self.imagery.active_count() + self.terrain.active_count()
    }

    pub fn pending_count(&self) -> usize {
        self.imagery.pending_count() + self.terrain.pending_count()
    }

    pub fn stats(&self) -> LoaderStats {
        self.stats
    }
}

impl Drop for Loader {
    fn drop(&mut self) {
        for (_, abort) in self.in_flight.drain() {
            abort.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::source::FetchFuture;
    use crate::terrain::{ElevationFormat, ElevationGrid};
    use crate::tile::TileAddress;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves flat raw grids after a short delay, failing for x == 99.
    struct SlowSource {
        calls: AtomicUsize,
        delay: Duration,
    }

    impl TileSource for SlowSource {
        fn fetch(&self, address: TileAddress) -> FetchFuture {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = self.delay;
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                if address.x == 99 {
                    return Err(FetchError::Transport("503".into()));
                }
                Ok(ElevationGrid::flat(3).to_raw_bytes())
            })
        }
    }

    fn source(delay_ms: u64) -> Arc<SlowSource> {
        Arc::new(SlowSource { calls: AtomicUsize::new(0), delay: Duration::from_millis(delay_ms) })
    }

    fn job() -> DecodeJob {
        DecodeJob::Elevation { format: ElevationFormat::RawF32, tile_size: (10.0, 10.0) }
    }

    fn request(loader: &mut Loader, x: u32) -> TileRequest {
        TileRequest {
            ticket: loader.next_ticket(),
            address: TileAddress::new(x, 0, 7),
            kind: ResourceKind::Terrain,
            version: 0,
            priority: 0,
        }
    }

    #[test]
    fn test_bounded_dispatch() {
        let mut loader = Loader::new(4, 2).unwrap();
        let src = source(10);
        for x in 0..5 {
            let r = request(&mut loader, x);
            loader.submit(r, src.clone(), job());
        }
        assert_eq!(src.calls.load(Ordering::SeqCst), 2);
        assert_eq!(loader.active_count(), 2);
        assert_eq!(loader.pending_count(), 3);

        assert!(loader.wait_idle(Duration::from_secs(5)));
        let outcomes = loader.drain_completions();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| matches!(o.result, Ok(Payload::Elevation(_)))));

        // Newest pending first
        let dropped = loader.pump(|_| true);
        assert!(dropped.is_empty());
        assert_eq!(src.calls.load(Ordering::SeqCst), 4);
        assert!(loader.wait_idle(Duration::from_secs(5)));
        let xs: Vec<u32> = loader.drain_completions().iter().map(|o| o.request.address.x).collect();
        assert!(xs.contains(&4) && xs.contains(&3));
    }

    #[test]
    fn test_failure_reported() {
        let mut loader = Loader::new(1, 1).unwrap();
        let r = request(&mut loader, 99);
        loader.submit(r, source(0), job());
        assert!(loader.wait_idle(Duration::from_secs(5)));
        let outcomes = loader.drain_completions();
        assert_eq!(outcomes[0].result.as_ref().err(), Some(&FetchError::Transport("503".into())));
    }

    #[test]
    fn test_cancelled_outcome_discarded() {
        let mut loader = Loader::new(1, 1).unwrap();
        let r = request(&mut loader, 1);
        let ticket = r.ticket;
        loader.submit(r, source(50), job());

        assert!(loader.cancel(ResourceKind::Terrain, ticket));
        assert_eq!(loader.active_count(), 0);
        assert!(loader.wait_idle(Duration::from_millis(10)));
        std::thread::sleep(Duration::from_millis(100));
        assert!(loader.drain_completions().is_empty());
    }

    #[test]
    fn test_cancel_if_pending_keeps_running() {
        let mut loader = Loader::new(1, 1).unwrap();
        let src = source(5);
        let running = request(&mut loader, 1);
        let waiting = request(&mut loader, 2);
        let (running_ticket, waiting_ticket) = (running.ticket, waiting.ticket);
        loader.submit(running, src.clone(), job());
        loader.submit(waiting, src.clone(), job());

        assert!(!loader.cancel_if_pending(ResourceKind::Terrain, running_ticket));
        assert!(loader.cancel_if_pending(ResourceKind::Terrain, waiting_ticket));
        assert_eq!(loader.pending_count(), 0);

        assert!(loader.wait_idle(Duration::from_secs(5)));
        let outcomes = loader.drain_completions();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].request.ticket, running_ticket);
    }

    #[test]
    fn test_stale_pending_dropped() {
        let mut loader = Loader::new(1, 1).unwrap();
        let src = source(5);
        let first = request(&mut loader, 1);
        let stale = request(&mut loader, 2);
        let stale_ticket = stale.ticket;
        loader.submit(first, src.clone(), job());
        loader.submit(stale, src.clone(), job());

        assert!(loader.wait_idle(Duration::from_secs(5)));
        loader.drain_completions();
        let dropped = loader.pump(|r| r.ticket != stale_ticket);
        assert_eq!(dropped.len(), 1);
        // The stale tile was never fetched
        assert_eq!(src.calls.load(Ordering::SeqCst), 1);
        assert_eq!(loader.stats().dropped, 1);
    }
}
