// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The set of traces currently selected for snapshot profiling.

use crate::ids::SpanContext;
use crate::orphan::TraceGuard;
use parking_lot::RwLock;
use std::collections::HashSet;

/// Liveness token handed back by [`TraceRegistry::register`].
///
/// The caller is expected to attach it to whatever object represents the
/// entry span. When an orphan-detecting registry is in the composition,
/// dropping the token without a prior `unregister` reports the trace as
/// orphaned and cleanup runs in the background. Registries without orphan
/// detection return an inert token.
#[derive(Debug, Default)]
#[must_use = "dropping the registration without unregistering reports the trace as orphaned"]
pub struct Registration {
    guard: Option<TraceGuard>,
}

impl Registration {
    pub fn none() -> Self {
        Registration { guard: None }
    }

    pub(crate) fn from_guard(guard: TraceGuard) -> Self {
        Registration { guard: Some(guard) }
    }

    /// True when an orphan detector is watching this registration.
    pub fn is_watched(&self) -> bool {
        self.guard.is_some()
    }

    /// Gives up orphan tracking for this registration without unregistering
    /// the trace. Used for registrations that have no owning span object
    /// (e.g. a trace registered at extract time, before any span exists);
    /// the stall sweep remains the safety net for those.
    pub fn detach(mut self) {
        if let Some(guard) = self.guard.take() {
            guard.defuse();
        }
    }
}

/// Concurrent set of trace ids with register/unregister/is-registered.
///
/// Decorators add asynchronous cleanup but must not change what these three
/// operations observe synchronously.
pub trait TraceRegistry: Send + Sync {
    fn register(&self, ctx: &SpanContext) -> Registration;
    fn is_registered(&self, ctx: &SpanContext) -> bool;
    fn unregister(&self, ctx: &SpanContext);

    /// Stops any background cleanup. Idempotent.
    fn close(&self) {}
}

/// Base registry: a plain concurrent set, no cleanup of its own.
#[derive(Default)]
pub struct InMemoryTraceRegistry {
    traces: RwLock<HashSet<crate::ids::TraceId>>,
}

impl InMemoryTraceRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TraceRegistry for InMemoryTraceRegistry {
    fn register(&self, ctx: &SpanContext) -> Registration {
        self.traces.write().insert(ctx.trace_id);
        Registration::none()
    }

    fn is_registered(&self, ctx: &SpanContext) -> bool {
        self.traces.read().contains(&ctx.trace_id)
    }

    fn unregister(&self, ctx: &SpanContext) {
        self.traces.write().remove(&ctx.trace_id);
    }
}
