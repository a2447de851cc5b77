// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Deciding which traces get stack snapshots.

use crate::ids::SpanContext;
use crate::volume::Volume;

/// Everything a selector may look at when deciding on a trace.
#[derive(Clone, Copy, Debug)]
pub struct TraceContext {
    pub span: SpanContext,
    pub volume: Volume,
}

/// Pure decision function: should this trace be snapshot-profiled?
pub trait SnapshotSelector: Send + Sync {
    fn select(&self, ctx: &TraceContext) -> bool;
}

/// Deterministic per-trace-id selection at a configured rate.
///
/// The trailing 64 bits of the trace id are read as a signed integer and
/// normalized into [0, 1); a trace is selected when the normalized value
/// falls below the rate. Because the normalization matches the convention of
/// fraction-based trace samplers, the set of snapshot-selected traces nests
/// inside the set a ratio sampler with the same or larger fraction keeps.
pub struct ProbabilisticSnapshotSelector {
    rate: f64,
}

impl ProbabilisticSnapshotSelector {
    /// `rate` is expected to be pre-validated by the configuration layer
    /// (clamped into (0, 0.10]).
    pub fn new(rate: f64) -> Self {
        ProbabilisticSnapshotSelector { rate }
    }
}

impl SnapshotSelector for ProbabilisticSnapshotSelector {
    fn select(&self, ctx: &TraceContext) -> bool {
        // A root context with no concrete trace id yet is "not decided",
        // never "selected".
        if !ctx.span.trace_id.is_valid() {
            return false;
        }
        let hash = ctx.span.trace_id.lower_long().unsigned_abs();
        (hash as f64 / i64::MAX as f64) < self.rate
    }
}

/// Passthrough for a decision already made upstream.
pub struct VolumeSnapshotSelector;

impl SnapshotSelector for VolumeSnapshotSelector {
    fn select(&self, ctx: &TraceContext) -> bool {
        ctx.volume == Volume::Highest
    }
}

/// Logical OR over selectors; first true wins, short-circuit.
#[derive(Default)]
pub struct CompositeSnapshotSelector {
    selectors: Vec<Box<dyn SnapshotSelector>>,
}

impl CompositeSnapshotSelector {
    pub fn new(selectors: Vec<Box<dyn SnapshotSelector>>) -> Self {
        CompositeSnapshotSelector { selectors }
    }

    pub fn with(mut self, selector: impl SnapshotSelector + 'static) -> Self {
        self.selectors.push(Box::new(selector));
        self
    }
}

impl SnapshotSelector for CompositeSnapshotSelector {
    fn select(&self, ctx: &TraceContext) -> bool {
        self.selectors.iter().any(|s| s.select(ctx))
    }
}
