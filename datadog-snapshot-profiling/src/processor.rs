// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Entry-span lifecycle hooks.
//!
//! The tracing library notifies this processor when an entry span (the local
//! root handling an incoming request) starts and ends; everything between
//! those two calls is driven by the sampler's own threads.

use crate::ids::SpanContext;
use crate::registry::{Registration, TraceRegistry};
use crate::sampler::StackTraceSampler;
use crate::select::{SnapshotSelector, TraceContext};
use crate::volume::Volume;
use std::sync::Arc;
use tracing::debug;

pub struct SnapshotSpanProcessor {
    registry: Arc<dyn TraceRegistry>,
    sampler: Arc<dyn StackTraceSampler>,
    selector: Arc<dyn SnapshotSelector>,
}

impl SnapshotSpanProcessor {
    pub fn new(
        registry: Arc<dyn TraceRegistry>,
        sampler: Arc<dyn StackTraceSampler>,
        selector: Arc<dyn SnapshotSelector>,
    ) -> Self {
        SnapshotSpanProcessor {
            registry,
            sampler,
            selector,
        }
    }

    /// Decides whether to profile the trace and, if so, registers it and
    /// starts sampling on the calling thread. The returned registration must
    /// be kept alive by the entry span for orphan detection to work.
    pub fn entry_span_started(&self, ctx: &SpanContext, volume: Volume) -> Registration {
        if !ctx.sampled || !ctx.is_valid() {
            return Registration::none();
        }
        let profile = match volume {
            // The upstream decision wins in either direction.
            Volume::Highest => true,
            Volume::Off => false,
            Volume::Unspecified => self.selector.select(&TraceContext {
                span: *ctx,
                volume,
            }),
        };
        if !profile {
            return Registration::none();
        }

        debug!(trace_id = %ctx.trace_id, "profiling trace");
        let registration = self.registry.register(ctx);
        self.sampler.start(ctx);
        registration
    }

    /// Ends sampling for the trace if this process registered it. Stop runs
    /// before unregister so the final sample is taken while the trace is
    /// still considered live.
    pub fn entry_span_ended(&self, ctx: &SpanContext) {
        if self.registry.is_registered(ctx) {
            self.sampler.stop(ctx);
            self.registry.unregister(ctx);
        }
    }
}
