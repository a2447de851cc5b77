// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Orphaned-trace detection.
//!
//! A trace is orphaned when the span object that registered it goes away
//! without the end-of-span path ever running (application bug, abandoned
//! future, crashed worker). Registration hands the caller a liveness token;
//! the token's drop, unless defused by a normal `unregister`, lands the span
//! context on an internal queue. A background reaper drains the queue,
//! unregisters the trace and stops its sampling session, so an abandoned
//! trace never keeps a sampler session alive.

use crate::error::SnapshotError;
use crate::ids::{SpanContext, TraceId};
use crate::registry::{Registration, TraceRegistry};
use crate::sampler::StackTraceSampler;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use tracing::debug;

enum ReaperMessage {
    Orphaned(SpanContext),
    Shutdown,
}

#[derive(Debug)]
struct GuardInner {
    ctx: SpanContext,
    defused: AtomicBool,
    reporter: Sender<ReaperMessage>,
}

impl Drop for GuardInner {
    fn drop(&mut self) {
        if !self.defused.load(Ordering::Acquire) {
            // Reaper may already be gone on shutdown; nothing left to clean
            // up in that case.
            let _ = self.reporter.send(ReaperMessage::Orphaned(self.ctx));
        }
    }
}

/// Arc-backed liveness token; the ReferenceQueue analogue.
#[derive(Debug)]
pub struct TraceGuard {
    inner: Arc<GuardInner>,
}

impl TraceGuard {
    pub(crate) fn defuse(&self) {
        self.inner.defused.store(true, Ordering::Release);
    }
}

struct Shared {
    delegate: Arc<dyn TraceRegistry>,
    sampler: Arc<dyn StackTraceSampler>,
    tokens: RwLock<HashMap<TraceId, Weak<GuardInner>>>,
}

/// Registry decorator that unregisters traces whose liveness token was
/// dropped without an explicit unregister.
pub struct OrphanDetectingRegistry {
    shared: Arc<Shared>,
    sender: Sender<ReaperMessage>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl OrphanDetectingRegistry {
    pub fn new(
        delegate: Arc<dyn TraceRegistry>,
        sampler: Arc<dyn StackTraceSampler>,
    ) -> Result<Self, SnapshotError> {
        let shared = Arc::new(Shared {
            delegate,
            sampler,
            tokens: RwLock::new(HashMap::new()),
        });

        let (sender, receiver) = mpsc::channel();
        let reaper_shared = Arc::clone(&shared);
        let reaper = std::thread::Builder::new()
            .name("orphaned-trace-detector".to_string())
            .spawn(move || {
                while let Ok(message) = receiver.recv() {
                    match message {
                        ReaperMessage::Orphaned(ctx) => reaper_shared.reap(&ctx),
                        ReaperMessage::Shutdown => break,
                    }
                }
            })?;

        Ok(OrphanDetectingRegistry {
            shared,
            sender,
            reaper: Mutex::new(Some(reaper)),
        })
    }
}

impl Shared {
    fn reap(&self, ctx: &SpanContext) {
        {
            let mut tokens = self.tokens.write();
            let still_live = tokens
                .get(&ctx.trace_id)
                .map(|weak| weak.upgrade().is_some());
            match still_live {
                // A newer registration took over this trace id; the dropped
                // token no longer speaks for it.
                Some(true) | None => return,
                Some(false) => {
                    tokens.remove(&ctx.trace_id);
                }
            }
        }
        debug!(trace_id = %ctx.trace_id, "unregistering orphaned trace");
        self.delegate.unregister(ctx);
        self.sampler.stop(ctx);
    }
}

impl TraceRegistry for OrphanDetectingRegistry {
    fn register(&self, ctx: &SpanContext) -> Registration {
        self.shared.delegate.register(ctx);
        let inner = Arc::new(GuardInner {
            ctx: *ctx,
            defused: AtomicBool::new(false),
            reporter: self.sender.clone(),
        });
        self.shared
            .tokens
            .write()
            .insert(ctx.trace_id, Arc::downgrade(&inner));
        Registration::from_guard(TraceGuard { inner })
    }

    fn is_registered(&self, ctx: &SpanContext) -> bool {
        self.shared.delegate.is_registered(ctx)
    }

    fn unregister(&self, ctx: &SpanContext) {
        if let Some(weak) = self.shared.tokens.write().remove(&ctx.trace_id) {
            if let Some(inner) = weak.upgrade() {
                inner.defused.store(true, Ordering::Release);
            }
        }
        self.shared.delegate.unregister(ctx);
    }

    fn close(&self) {
        self.shared.delegate.close();
        if let Some(reaper) = self.reaper.lock().take() {
            let _ = self.sender.send(ReaperMessage::Shutdown);
            let _ = reaper.join();
        }
    }
}
