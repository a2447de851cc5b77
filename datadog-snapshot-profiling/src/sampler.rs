// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Periodic stack sampling of the threads executing selected traces.
//!
//! One sampling session exists per trace. A session targets exactly one
//! thread at a time; re-issuing `start` for the same entry span from another
//! thread moves the target. A shared timer thread walks all live sessions on
//! a fixed cadence, and the start/stop paths take extra samples inline so a
//! session always yields at least one sample no matter how short the span
//! was.

use crate::ids::{SpanContext, TraceId};
use crate::error::SnapshotError;
use crate::stack_trace::StackTrace;
use crate::staging::StagingArea;
use crate::thread_info::{ThreadInfo, ThreadInfoCollector};
use crate::threading::get_current_thread_id;
use crate::tracker::SpanTracker;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::debug;

/// Sampling lifecycle, driven by the span processor and the thread-change
/// detector.
pub trait StackTraceSampler: Send + Sync {
    /// Starts sampling `ctx.trace_id` on the calling thread, or moves an
    /// existing session here when `ctx` is the span that started it. Calls
    /// carrying a different span are ignored; the first entry span owns the
    /// session.
    fn start(&self, ctx: &SpanContext);

    /// Ends the session if `ctx` is its owner, taking one final sample.
    fn stop(&self, ctx: &SpanContext);

    /// The thread a live session for `trace_id` currently targets.
    fn target_thread(&self, trace_id: &TraceId) -> Option<i64>;

    /// Ends every session with a final sample and stops the timer thread.
    /// Idempotent.
    fn close(&self);
}

struct SamplingSession {
    trace_id: TraceId,
    owner: crate::ids::SpanId,
    thread_id: AtomicI64,
    /// Nanoseconds since the sampler's epoch at the last recorded sample.
    last_sample_nanos: AtomicU64,
    /// Serializes sample reporting for this session between the timer
    /// thread and the inline start/stop paths.
    reporting: Mutex<()>,
}

struct Shared {
    sessions: RwLock<HashMap<TraceId, Arc<SamplingSession>>>,
    staging: Arc<dyn StagingArea>,
    tracker: Arc<dyn SpanTracker>,
    collector: Arc<dyn ThreadInfoCollector>,
    max_depth: usize,
    epoch: Instant,
}

impl Shared {
    fn now_nanos(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    /// One timer tick: sample every live session, batching collection by
    /// target thread.
    fn sample_all(&self) {
        let sessions: Vec<Arc<SamplingSession>> =
            self.sessions.read().values().cloned().collect();
        if sessions.is_empty() {
            return;
        }

        let mut by_thread: HashMap<i64, Vec<Arc<SamplingSession>>> = HashMap::new();
        for session in sessions {
            by_thread
                .entry(session.thread_id.load(Ordering::Acquire))
                .or_default()
                .push(session);
        }

        let thread_ids: Vec<i64> = by_thread.keys().copied().collect();
        let now = self.now_nanos();
        let infos = self.collector.collect_many(&thread_ids, self.max_depth);

        let mut batch = Vec::with_capacity(infos.len());
        for info in infos {
            let Some(sessions) = by_thread.get(&info.thread_id) else {
                continue;
            };
            for session in sessions {
                if let Some(sample) = self.record_sample(session, info.clone(), now, true) {
                    batch.push(sample);
                }
            }
        }
        if !batch.is_empty() {
            self.staging.stage_batch(batch);
        }
    }

    /// Samples one session inline, outside the timer cadence. Used for the
    /// first sample of a new session and the final sample at stop/close,
    /// after the session has already left the map.
    fn sample_now(&self, session: &Arc<SamplingSession>, require_live: bool) {
        let thread_id = session.thread_id.load(Ordering::Acquire);
        let now = self.now_nanos();
        let Some(info) = self.collector.collect(thread_id, self.max_depth) else {
            return;
        };
        if let Some(sample) = self.record_sample(session, info, now, require_live) {
            self.staging.stage(sample);
        }
    }

    fn record_sample(
        &self,
        session: &SamplingSession,
        info: ThreadInfo,
        now_nanos: u64,
        require_live: bool,
    ) -> Option<StackTrace> {
        // Someone else is reporting this session right now; skip rather
        // than double-count the interval.
        let _guard = session.reporting.try_lock()?;
        if require_live && !self.sessions.read().contains_key(&session.trace_id) {
            return None;
        }

        let elapsed = now_nanos as i64 - session.last_sample_nanos.load(Ordering::Acquire) as i64;
        if elapsed < 0 {
            // A competing sample already covered a window that ends after
            // this one started.
            return None;
        }
        session.last_sample_nanos.store(now_nanos, Ordering::Release);

        let span_id = self
            .tracker
            .active_span(info.thread_id)
            .map(|active| active.span_id);
        Some(StackTrace::from_thread_info(
            Utc::now(),
            Duration::from_nanos(elapsed as u64),
            info,
            session.trace_id,
            span_id,
        ))
    }
}

/// Sampler backed by a single timer thread shared across all sessions.
pub struct PeriodicStackTraceSampler {
    shared: Arc<Shared>,
    closed: AtomicBool,
    shutdown: Sender<()>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicStackTraceSampler {
    pub fn new(
        staging: Arc<dyn StagingArea>,
        tracker: Arc<dyn SpanTracker>,
        collector: Arc<dyn ThreadInfoCollector>,
        sampling_period: Duration,
        max_depth: usize,
    ) -> Result<Self, SnapshotError> {
        let shared = Arc::new(Shared {
            sessions: RwLock::new(HashMap::new()),
            staging,
            tracker,
            collector,
            max_depth,
            epoch: Instant::now(),
        });

        let (shutdown, receiver) = mpsc::channel();
        let timer_shared = Arc::clone(&shared);
        let timer = std::thread::Builder::new()
            .name("snapshot-stack-sampler".to_string())
            .spawn(move || loop {
                match receiver.recv_timeout(sampling_period) {
                    Err(RecvTimeoutError::Timeout) => timer_shared.sample_all(),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                }
            })?;

        Ok(PeriodicStackTraceSampler {
            shared,
            closed: AtomicBool::new(false),
            shutdown,
            timer: Mutex::new(Some(timer)),
        })
    }
}

impl StackTraceSampler for PeriodicStackTraceSampler {
    fn start(&self, ctx: &SpanContext) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let thread_id = get_current_thread_id();

        let created = {
            let mut sessions = self.shared.sessions.write();
            match sessions.entry(ctx.trace_id) {
                Entry::Occupied(existing) => {
                    if existing.get().owner == ctx.span_id {
                        existing.get().thread_id.store(thread_id, Ordering::Release);
                    }
                    None
                }
                Entry::Vacant(slot) => {
                    let session = Arc::new(SamplingSession {
                        trace_id: ctx.trace_id,
                        owner: ctx.span_id,
                        thread_id: AtomicI64::new(thread_id),
                        last_sample_nanos: AtomicU64::new(self.shared.now_nanos()),
                        reporting: Mutex::new(()),
                    });
                    Some(Arc::clone(slot.insert(session)))
                }
            }
        };

        if let Some(session) = created {
            debug!(trace_id = %ctx.trace_id, thread_id, "started sampling session");
            self.shared.sample_now(&session, true);
        }
    }

    fn stop(&self, ctx: &SpanContext) {
        let removed = {
            let mut sessions = self.shared.sessions.write();
            let owner_matches = sessions
                .get(&ctx.trace_id)
                .map(|session| session.owner == ctx.span_id);
            match owner_matches {
                Some(true) => sessions.remove(&ctx.trace_id),
                Some(false) => {
                    debug!(trace_id = %ctx.trace_id, "ignoring stop from a span that does not own the session");
                    None
                }
                None => None,
            }
        };

        if let Some(session) = removed {
            debug!(trace_id = %ctx.trace_id, "stopped sampling session");
            self.shared.sample_now(&session, false);
        }
    }

    fn target_thread(&self, trace_id: &TraceId) -> Option<i64> {
        self.shared
            .sessions
            .read()
            .get(trace_id)
            .map(|session| session.thread_id.load(Ordering::Acquire))
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(timer) = self.timer.lock().take() {
            let _ = self.shutdown.send(());
            let _ = timer.join();
        }
        let sessions: Vec<Arc<SamplingSession>> = self
            .shared
            .sessions
            .write()
            .drain()
            .map(|(_, session)| session)
            .collect();
        for session in sessions {
            self.shared.sample_now(&session, false);
        }
    }
}
