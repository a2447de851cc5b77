// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Tracking which span is active on which thread.
//!
//! The tracing library calls [`ActiveSpanTracker::attach`] on every context
//! activation; the returned scope restores the previous record when dropped,
//! so nested activations behave like a per-thread stack. The sampler asks
//! the tracker, from its own thread, what span is active on the thread it is
//! about to sample.

use crate::ids::SpanContext;
use crate::registry::TraceRegistry;
use crate::sampler::StackTraceSampler;
use crate::threading::get_current_thread_id;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Read side of the tracker, consumed by the sampler.
pub trait SpanTracker: Send + Sync {
    fn active_span(&self, thread_id: i64) -> Option<SpanContext>;
}

/// Activations on unrelated threads land on different shards, so one busy
/// request thread never serializes the others.
const ACTIVE_SHARDS: usize = 16;

pub struct ActiveSpanTracker {
    registry: Arc<dyn TraceRegistry>,
    active: [RwLock<HashMap<i64, SpanContext>>; ACTIVE_SHARDS],
}

impl ActiveSpanTracker {
    pub fn new(registry: Arc<dyn TraceRegistry>) -> Self {
        ActiveSpanTracker {
            registry,
            active: std::array::from_fn(|_| RwLock::new(HashMap::new())),
        }
    }

    fn shard(&self, thread_id: i64) -> &RwLock<HashMap<i64, SpanContext>> {
        &self.active[thread_id.unsigned_abs() as usize % ACTIVE_SHARDS]
    }

    /// Records `ctx` as active on the current thread for spans of registered,
    /// recording traces. The shard lock is held only for the map update,
    /// never across user code.
    pub fn attach(self: &Arc<Self>, ctx: &SpanContext) -> ActiveScope {
        if !ctx.sampled || !self.registry.is_registered(ctx) {
            return ActiveScope::inert();
        }

        let thread_id = get_current_thread_id();
        let mut active = self.shard(thread_id).write();
        let previous = active.get(&thread_id).copied();
        if previous == Some(*ctx) {
            return ActiveScope::inert();
        }
        active.insert(thread_id, *ctx);
        ActiveScope {
            tracker: Some(Arc::clone(self)),
            thread_id,
            previous,
        }
    }
}

impl SpanTracker for ActiveSpanTracker {
    fn active_span(&self, thread_id: i64) -> Option<SpanContext> {
        self.shard(thread_id).read().get(&thread_id).copied()
    }
}

/// Restores the previously active span on drop. Must be dropped on the
/// thread that attached, in LIFO order, which the tracing library's scope
/// discipline already guarantees.
#[must_use = "the previous active span is restored when the scope is dropped"]
pub struct ActiveScope {
    tracker: Option<Arc<ActiveSpanTracker>>,
    thread_id: i64,
    previous: Option<SpanContext>,
}

impl ActiveScope {
    fn inert() -> Self {
        ActiveScope {
            tracker: None,
            thread_id: 0,
            previous: None,
        }
    }
}

impl Drop for ActiveScope {
    fn drop(&mut self) {
        if let Some(tracker) = self.tracker.take() {
            let mut active = tracker.shard(self.thread_id).write();
            match self.previous {
                Some(previous) => {
                    active.insert(self.thread_id, previous);
                }
                None => {
                    active.remove(&self.thread_id);
                }
            }
        }
    }
}

/// Context-activation decorator that migrates a sampling session when the
/// thread executing a trace's work changes.
///
/// After recording the activation it compares the thread the sampler is
/// currently targeting for the trace with the activating thread; on a
/// mismatch it re-issues `start`, which moves the session to this thread
/// without resetting the session owner. No explicit stop is needed: the
/// sampler only ever samples the most recently declared thread per trace.
pub struct TraceThreadChangeDetector {
    tracker: Arc<ActiveSpanTracker>,
    registry: Arc<dyn TraceRegistry>,
    sampler: Arc<dyn StackTraceSampler>,
}

impl TraceThreadChangeDetector {
    pub fn new(
        tracker: Arc<ActiveSpanTracker>,
        registry: Arc<dyn TraceRegistry>,
        sampler: Arc<dyn StackTraceSampler>,
    ) -> Self {
        TraceThreadChangeDetector {
            tracker,
            registry,
            sampler,
        }
    }

    pub fn attach(&self, ctx: &SpanContext) -> ActiveScope {
        let scope = self.tracker.attach(ctx);
        if ctx.sampled && self.registry.is_registered(ctx) {
            if let Some(target) = self.sampler.target_thread(&ctx.trace_id) {
                if target != get_current_thread_id() {
                    self.sampler.start(ctx);
                }
            }
        }
        scope
    }
}
