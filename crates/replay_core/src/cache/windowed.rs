use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use backoff::{backoff::Backoff, ExponentialBackoff};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::budget::MemoryBudget;
use super::loader::{CancelToken, Segment, SegmentLoader};
use super::window::{plan_window, prefetch_target, Playhead, TravelDirection};
use crate::config::WindowConfig;
use crate::coordinates::Vec2;
use crate::error::{LoadError, QueryError, QueryResult};
use crate::store::{EntityId, Frame, PlayerSample};

const PREFETCH_QUEUE: usize = 8;

/// A frame served by the cache.
///
/// `stale` means the requested frame could not be loaded and the nearest
/// resident frame (`index`) is served instead.
#[derive(Debug, Clone)]
pub struct FrameView {
    segment: Arc<Segment>,
    index: usize,
    requested: usize,
    stale: bool,
}

impl FrameView {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn requested(&self) -> usize {
        self.requested
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn frame(&self) -> &Frame {
        self.segment.frame_at(self.index)
    }

    pub fn timestamp(&self) -> f64 {
        self.frame().timestamp
    }

    pub fn position(&self, entity: EntityId) -> Option<Vec2> {
        self.segment.position(self.index, entity)
    }

    pub fn player(&self, id: u32) -> Option<&PlayerSample> {
        self.segment.player(self.index, id)
    }

    pub fn segment(&self) -> &Arc<Segment> {
        &self.segment
    }
}

/// Consumer-facing health of the cache, polled rather than raised.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStatus {
    pub resident_windows: Vec<Range<usize>>,
    pub resident_bytes: usize,
    pub budget_used: usize,
    pub budget_limit: usize,
    pub degraded: Vec<Range<usize>>,
    pub in_flight: Vec<Range<usize>>,
    pub prefetches_started: u64,
    pub prefetches_completed: u64,
    pub prefetches_cancelled: u64,
    pub sync_loads: u64,
    pub load_retries: u64,
    pub evictions: u64,
}

struct Resident {
    segment: Arc<Segment>,
    last_used: AtomicU64,
}

struct InFlight {
    id: u64,
    target: Range<usize>,
    keep_alive: Range<usize>,
    token: CancelToken,
}

struct PrefetchJob {
    id: u64,
    target: Range<usize>,
    token: CancelToken,
}

#[derive(Default)]
struct Counters {
    prefetches_started: AtomicU64,
    prefetches_completed: AtomicU64,
    prefetches_cancelled: AtomicU64,
    sync_loads: AtomicU64,
    load_retries: AtomicU64,
    evictions: AtomicU64,
}

struct Shared {
    loader: Arc<dyn SegmentLoader>,
    config: WindowConfig,
    frame_count: usize,
    budget: Arc<MemoryBudget>,
    resident: RwLock<BTreeMap<usize, Resident>>,
    in_flight: Mutex<Vec<InFlight>>,
    degraded: Mutex<Vec<Range<usize>>>,
    direction: Mutex<TravelDirection>,
    tick: AtomicU64,
    next_job: AtomicU64,
    last_served: AtomicUsize,
    counters: Counters,
}

/// Sliding, prefetched view over a frame source.
///
/// Resident segments are written only as whole published segments, so a
/// reader either sees a complete window or none at all.
pub struct WindowedCache {
    shared: Arc<Shared>,
    sender: Option<Sender<PrefetchJob>>,
    workers: Vec<JoinHandle<()>>,
}

impl WindowedCache {
    pub fn new(loader: Arc<dyn SegmentLoader>, config: WindowConfig, budget: Arc<MemoryBudget>) -> Self {
        let frame_count = loader.frame_count();
        let shared = Arc::new(Shared {
            loader,
            frame_count,
            budget,
            resident: RwLock::new(BTreeMap::new()),
            in_flight: Mutex::new(Vec::new()),
            degraded: Mutex::new(Vec::new()),
            direction: Mutex::new(TravelDirection::Forward),
            tick: AtomicU64::new(0),
            next_job: AtomicU64::new(0),
            last_served: AtomicUsize::new(0),
            counters: Counters::default(),
            config,
        });

        let (tx, rx) = bounded(PREFETCH_QUEUE);
        let mut workers = Vec::new();
        for i in 0..shared.config.prefetch_workers {
            let worker_shared = shared.clone();
            let receiver: Receiver<PrefetchJob> = rx.clone();
            match thread::Builder::new()
                .name(format!("replay-prefetch-{}", i))
                .spawn(move || worker_loop(worker_shared, receiver))
            {
                Ok(handle) => workers.push(handle),
                Err(e) => warn!(worker = i, error = %e, "failed to spawn prefetch worker"),
            }
        }
        let sender = (!workers.is_empty()).then_some(tx);
        debug!(frame_count, workers = workers.len(), window = shared.config.size_frames, "windowed cache ready");

        Self { shared, sender, workers }
    }

    pub fn frame_count(&self) -> usize {
        self.shared.frame_count
    }

    pub fn config(&self) -> &WindowConfig {
        &self.shared.config
    }

    /// Frame at `index`. Blocks only when the index is not resident, for at
    /// most one window load (with retries).
    pub fn get_frame(&self, index: usize) -> QueryResult<FrameView> {
        let shared = &self.shared;
        if index >= shared.frame_count {
            return Err(QueryError::OutOfRange { index, frame_count: shared.frame_count });
        }
        if let Some(view) = shared.lookup(index) {
            shared.last_served.store(index, Ordering::Relaxed);
            return Ok(view);
        }

        if let Some(range) = shared.degraded_range(index) {
            return shared.stale_fallback(index, range, "window degraded");
        }

        let direction = *shared.direction.lock();
        let target = plan_window(index, direction, shared.frame_count, &shared.config);
        shared.counters.sync_loads.fetch_add(1, Ordering::Relaxed);
        debug!(index, start = target.start, end = target.end, "synchronous window load");

        match shared.load_with_retry(target.clone(), &CancelToken::new()) {
            Ok(segment) => {
                shared.last_served.store(index, Ordering::Relaxed);
                let segment = shared.publish(segment);
                Ok(FrameView { segment, index, requested: index, stale: false })
            }
            Err(e) => {
                shared.mark_degraded(target.clone(), &e);
                shared.stale_fallback(index, target, &e.to_string())
            }
        }
    }

    pub fn is_resident(&self, index: usize) -> bool {
        self.shared.lookup_segment(index).is_some()
    }

    pub fn is_degraded(&self, index: usize) -> bool {
        self.shared.degraded_range(index).is_some()
    }

    /// Forget degraded ranges so the next access retries the loader.
    pub fn clear_degraded(&self) {
        self.shared.degraded.lock().clear();
    }

    /// Start loading the window around `center` in the background.
    /// Returns `false` if it is already resident or queued.
    pub fn ensure_window(&self, center: usize, direction: TravelDirection) -> bool {
        let target = plan_window(center, direction, self.shared.frame_count, &self.shared.config);
        self.enqueue(target.clone(), target)
    }

    /// Apply the playhead: cancel prefetches it has left behind and start the
    /// next one when it enters the tail of its current window.
    pub fn observe(&self, playhead: &Playhead) {
        let shared = &self.shared;
        *shared.direction.lock() = playhead.direction;
        shared.cancel_outside(playhead.frame);

        let Some(current) = shared.current_window(playhead.frame, playhead.direction) else {
            self.ensure_window(playhead.frame, playhead.direction);
            return;
        };
        if let Some(target) =
            prefetch_target(playhead.frame, &current, playhead.direction, shared.frame_count, &shared.config)
        {
            let keep_alive = current.start.min(target.start)..current.end.max(target.end);
            self.enqueue(target, keep_alive);
        }
    }

    /// Block until no prefetch is in flight, up to `timeout`.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.shared.in_flight.lock().is_empty() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    pub fn status(&self) -> CacheStatus {
        let shared = &self.shared;
        let (resident_windows, resident_bytes): (Vec<Range<usize>>, usize) = {
            let resident = shared.resident.read();
            (
                resident.values().map(|r| r.segment.range()).collect(),
                resident.values().map(|r| r.segment.bytes()).sum(),
            )
        };
        let c = &shared.counters;
        CacheStatus {
            resident_windows,
            resident_bytes,
            budget_used: shared.budget.used(),
            budget_limit: shared.budget.limit(),
            degraded: shared.degraded.lock().clone(),
            in_flight: shared.in_flight.lock().iter().map(|j| j.target.clone()).collect(),
            prefetches_started: c.prefetches_started.load(Ordering::Relaxed),
            prefetches_completed: c.prefetches_completed.load(Ordering::Relaxed),
            prefetches_cancelled: c.prefetches_cancelled.load(Ordering::Relaxed),
            sync_loads: c.sync_loads.load(Ordering::Relaxed),
            load_retries: c.load_retries.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
        }
    }

    fn enqueue(&self, target: Range<usize>, keep_alive: Range<usize>) -> bool {
        let shared = &self.shared;
        let Some(sender) = &self.sender else {
            return false;
        };
        if target.is_empty() || shared.is_covered(&target) {
            return false;
        }
        let mut in_flight = shared.in_flight.lock();
        if in_flight.iter().any(|job| job.target == target) {
            return false;
        }
        let id = shared.next_job.fetch_add(1, Ordering::Relaxed);
        let token = CancelToken::new();
        match sender.try_send(PrefetchJob { id, target: target.clone(), token: token.clone() }) {
            Ok(()) => {
                in_flight.push(InFlight { id, target: target.clone(), keep_alive, token });
                shared.counters.prefetches_started.fetch_add(1, Ordering::Relaxed);
                debug!(start = target.start, end = target.end, "prefetch queued");
                true
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                debug!(start = target.start, end = target.end, "prefetch queue unavailable");
                false
            }
        }
    }
}

impl Drop for WindowedCache {
    fn drop(&mut self) {
        for job in self.shared.in_flight.lock().drain(..) {
            job.token.cancel();
        }
        self.sender.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        let mut resident = self.shared.resident.write();
        for (_, entry) in std::mem::take(&mut *resident) {
            self.shared.budget.release(entry.segment.bytes());
        }
    }
}

/// Iterates frames while reusing the current segment without touching locks.
pub struct FrameCursor<'a> {
    cache: &'a WindowedCache,
    current: Option<Arc<Segment>>,
    degraded: bool,
}

impl<'a> FrameCursor<'a> {
    pub fn new(cache: &'a WindowedCache) -> Self {
        Self { cache, current: None, degraded: false }
    }

    /// True once any read through this cursor was served a stale substitute.
    pub fn read_degraded(&self) -> bool {
        self.degraded
    }

    pub fn frame(&mut self, index: usize) -> QueryResult<FrameView> {
        if let Some(segment) = &self.current {
            if segment.contains(index) {
                return Ok(FrameView { segment: segment.clone(), index, requested: index, stale: false });
            }
        }
        let view = self.cache.get_frame(index)?;
        if view.is_stale() {
            self.degraded = true;
        } else {
            self.current = Some(view.segment.clone());
        }
        Ok(view)
    }

    /// Position of `entity` at `index`; `None` when absent or when only a
    /// stale substitute frame is available.
    pub fn position(&mut self, index: usize, entity: EntityId) -> QueryResult<Option<Vec2>> {
        let view = self.frame(index)?;
        if view.is_stale() {
            return Ok(None);
        }
        Ok(view.position(entity))
    }
}

fn worker_loop(shared: Arc<Shared>, receiver: Receiver<PrefetchJob>) {
    for job in receiver.iter() {
        if job.token.is_cancelled() {
            shared.finish(job.id);
            continue;
        }
        match shared.load_with_retry(job.target.clone(), &job.token) {
            Ok(segment) if !job.token.is_cancelled() => {
                shared.publish(segment);
                shared.counters.prefetches_completed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(_) | Err(LoadError::Cancelled) => {
                debug!(start = job.target.start, end = job.target.end, "prefetch abandoned");
            }
            Err(e) => shared.mark_degraded(job.target.clone(), &e),
        }
        shared.finish(job.id);
    }
}

impl Shared {
    fn lookup_segment(&self, index: usize) -> Option<Arc<Segment>> {
        let resident = self.resident.read();
        for (&start, entry) in resident.range(..=index).rev() {
            if entry.segment.contains(index) {
                entry.last_used.store(self.tick.fetch_add(1, Ordering::Relaxed), Ordering::Relaxed);
                return Some(entry.segment.clone());
            }
            if start + self.config.size_frames <= index {
                break;
            }
        }
        None
    }

    fn lookup(&self, index: usize) -> Option<FrameView> {
        self.lookup_segment(index)
            .map(|segment| FrameView { segment, index, requested: index, stale: false })
    }

    fn current_window(&self, frame: usize, direction: TravelDirection) -> Option<Range<usize>> {
        let resident = self.resident.read();
        let containing = resident.values().map(|r| r.segment.range()).filter(|r| r.contains(&frame));
        match direction {
            TravelDirection::Forward => containing.max_by_key(|r| r.end),
            TravelDirection::Backward => containing.min_by_key(|r| r.start),
        }
    }

    fn is_covered(&self, target: &Range<usize>) -> bool {
        self.resident
            .read()
            .values()
            .any(|r| r.segment.start() <= target.start && target.end <= r.segment.end())
    }

    fn degraded_range(&self, index: usize) -> Option<Range<usize>> {
        self.degraded.lock().iter().find(|r| r.contains(&index)).cloned()
    }

    fn load_with_retry(&self, range: Range<usize>, token: &CancelToken) -> Result<Segment, LoadError> {
        let mut backoff = ExponentialBackoff {
            initial_interval: self.config.retry_initial(),
            max_interval: self.config.retry_max(),
            max_elapsed_time: None,
            ..Default::default()
        };
        let mut attempts = 0u32;

        loop {
            if token.is_cancelled() {
                return Err(LoadError::Cancelled);
            }
            match self.loader.load(range.clone(), token) {
                Ok(segment) => {
                    if attempts > 0 {
                        info!(start = range.start, end = range.end, attempts, "window loaded after retry");
                    }
                    return Ok(segment);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    attempts += 1;
                    if attempts > self.config.max_retries {
                        return Err(e);
                    }
                    self.counters.load_retries.fetch_add(1, Ordering::Relaxed);
                    if let Some(delay) = backoff.next_backoff() {
                        warn!(
                            start = range.start,
                            end = range.end,
                            attempt = attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "window load failed, retrying"
                        );
                        thread::sleep(delay);
                    } else {
                        backoff.reset();
                    }
                }
            }
        }
    }

    fn publish(&self, segment: Segment) -> Arc<Segment> {
        let segment = Arc::new(segment);
        let start = segment.start();
        {
            let mut resident = self.resident.write();
            if let Some(existing) = resident.get(&start) {
                if existing.segment.end() >= segment.end() {
                    return existing.segment.clone();
                }
            }
            let tick = self.tick.fetch_add(1, Ordering::Relaxed);
            let entry = Resident { segment: segment.clone(), last_used: AtomicU64::new(tick) };
            if let Some(old) = resident.insert(start, entry) {
                self.budget.release(old.segment.bytes());
            }
            self.budget.charge(segment.bytes());
        }
        self.degraded
            .lock()
            .retain(|r| !(segment.start() <= r.start && r.end <= segment.end()));
        debug!(start, end = segment.end(), bytes = segment.bytes(), "window published");

        self.evict_over_budget(start);
        segment
    }

    /// Drop least recently used windows while the shared budget is exceeded,
    /// never the window just published nor the one last served.
    fn evict_over_budget(&self, keep_start: usize) {
        let served = self.last_served.load(Ordering::Relaxed);
        while self.budget.over_limit() {
            let mut resident = self.resident.write();
            let victim = resident
                .iter()
                .filter(|(start, r)| **start != keep_start && !r.segment.contains(served))
                .min_by_key(|(_, r)| r.last_used.load(Ordering::Relaxed))
                .map(|(&start, _)| start);
            let Some(victim) = victim else {
                debug!(used = self.budget.used(), limit = self.budget.limit(), "nothing evictable");
                break;
            };
            if let Some(entry) = resident.remove(&victim) {
                self.budget.release(entry.segment.bytes());
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(start = victim, end = entry.segment.end(), "window evicted");
            }
        }
    }

    fn mark_degraded(&self, range: Range<usize>, error: &LoadError) {
        warn!(start = range.start, end = range.end, error = %error, "window degraded");
        let mut degraded = self.degraded.lock();
        degraded.push(range);
        degraded.sort_by_key(|r| r.start);
        let mut merged: Vec<Range<usize>> = Vec::with_capacity(degraded.len());
        for r in degraded.drain(..) {
            match merged.last_mut() {
                Some(last) if r.start <= last.end => last.end = last.end.max(r.end),
                _ => merged.push(r),
            }
        }
        *degraded = merged;
    }

    fn stale_fallback(&self, index: usize, range: Range<usize>, reason: &str) -> QueryResult<FrameView> {
        let resident = self.resident.read();
        let nearest = resident
            .values()
            .filter(|r| !r.segment.is_empty())
            .map(|r| {
                let candidate = index.clamp(r.segment.start(), r.segment.end() - 1);
                (candidate.abs_diff(index), candidate, r.segment.clone())
            })
            .min_by_key(|(distance, candidate, _)| (*distance, *candidate));
        match nearest {
            Some((_, candidate, segment)) => Ok(FrameView { segment, index: candidate, requested: index, stale: true }),
            None => Err(QueryError::Unavailable { start: range.start, end: range.end, reason: reason.to_string() }),
        }
    }

    fn cancel_outside(&self, frame: usize) {
        let mut in_flight = self.in_flight.lock();
        in_flight.retain(|job| {
            if job.keep_alive.contains(&frame) {
                return true;
            }
            job.token.cancel();
            self.counters.prefetches_cancelled.fetch_add(1, Ordering::Relaxed);
            debug!(start = job.target.start, end = job.target.end, frame, "prefetch cancelled");
            false
        });
    }

    fn finish(&self, id: u64) {
        self.in_flight.lock().retain(|job| job.id != id);
    }
}
