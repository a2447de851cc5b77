// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Trace-triggered stack snapshot profiling.
//!
//! A small fraction of distributed traces is selected at their entry point;
//! while a selected trace runs, the thread executing it is stack-sampled on
//! a fixed cadence and the samples are exported in trace-keyed batches. The
//! selection decision travels across process boundaries so every service a
//! selected trace touches contributes samples.
//!
//! [`SnapshotProfiler`] wires the pieces together. The host tracing library
//! drives it through four hooks: [`SnapshotProfiler::entry_span_started`] and
//! [`SnapshotProfiler::entry_span_ended`] around each locally rooted request,
//! [`SnapshotProfiler::attach_context`] on every context activation, and the
//! [`SnapshotVolumePropagator`] on inject/extract.

pub mod config;
pub mod error;
pub mod exporter;
pub mod ids;
pub mod orphan;
pub mod processor;
pub mod propagator;
pub mod registry;
pub mod sampler;
pub mod select;
pub mod stack_trace;
pub mod staging;
pub mod stall;
pub mod thread_info;
pub mod threading;
pub mod tracker;
pub mod volume;

pub use config::SnapshotProfilingConfig;
pub use error::SnapshotError;
pub use exporter::StackTraceExporter;
pub use ids::{SpanContext, SpanId, TraceId};
pub use registry::Registration;
pub use stack_trace::{Frame, StackTrace, ThreadState};
pub use thread_info::{ThreadInfo, ThreadInfoCollector};
pub use tracker::ActiveScope;
pub use volume::Volume;

use crate::exporter::AsyncStackTraceExporter;
use crate::processor::SnapshotSpanProcessor;
use crate::propagator::SnapshotVolumePropagator;
use crate::registry::{InMemoryTraceRegistry, TraceRegistry};
use crate::sampler::{PeriodicStackTraceSampler, StackTraceSampler};
use crate::select::{ProbabilisticSnapshotSelector, SnapshotSelector};
use crate::staging::{PeriodicallyExportingStagingArea, StagingArea};
use crate::stall::StallDetectingRegistry;
use crate::tracker::{ActiveSpanTracker, TraceThreadChangeDetector};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The assembled profiling pipeline.
pub struct SnapshotProfiler {
    config: SnapshotProfilingConfig,
    registry: Arc<dyn TraceRegistry>,
    sampler: Arc<dyn StackTraceSampler>,
    staging: Arc<PeriodicallyExportingStagingArea>,
    exporter: Arc<AsyncStackTraceExporter>,
    propagator: SnapshotVolumePropagator,
    processor: SnapshotSpanProcessor,
    detector: TraceThreadChangeDetector,
    closed: AtomicBool,
}

impl SnapshotProfiler {
    pub fn builder() -> SnapshotProfilerBuilder {
        SnapshotProfilerBuilder::default()
    }

    pub fn config(&self) -> &SnapshotProfilingConfig {
        &self.config
    }

    /// The propagator carrying the snapshot volume across processes.
    pub fn propagator(&self) -> &SnapshotVolumePropagator {
        &self.propagator
    }

    /// Hook for the start of a locally rooted span. `volume` is whatever
    /// [`SnapshotVolumePropagator::extract`] produced for the incoming
    /// request, or [`Volume::Unspecified`] when there was no incoming
    /// context. The entry span should hold the returned registration for
    /// its lifetime. Inert while disabled or after shutdown.
    pub fn entry_span_started(&self, ctx: &SpanContext, volume: Volume) -> Registration {
        if !self.config.enabled || self.closed.load(Ordering::Acquire) {
            return Registration::none();
        }
        self.processor.entry_span_started(ctx, volume)
    }

    /// Hook for the end of a locally rooted span.
    pub fn entry_span_ended(&self, ctx: &SpanContext) {
        self.processor.entry_span_ended(ctx);
    }

    /// Hook for context activation on the current thread. Keeps per-thread
    /// span attribution current and migrates the sampling session when a
    /// profiled trace resumes on a different thread.
    pub fn attach_context(&self, ctx: &SpanContext) -> ActiveScope {
        self.detector.attach(ctx)
    }

    /// Tears the pipeline down in dependency order, flushing staged samples
    /// through the exporter on the way. Idempotent; hooks called afterwards
    /// are no-ops.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Background cleanup first so nothing restarts sampling, then the
        // sampler's final samples, then the flush path they land in.
        self.registry.close();
        self.sampler.close();
        self.staging.close();
        self.exporter.close();
    }
}

#[derive(Default)]
pub struct SnapshotProfilerBuilder {
    config: SnapshotProfilingConfig,
    exporter: Option<Arc<dyn StackTraceExporter>>,
    collector: Option<Arc<dyn ThreadInfoCollector>>,
    selector: Option<Arc<dyn SnapshotSelector>>,
}

impl SnapshotProfilerBuilder {
    pub fn with_config(mut self, config: SnapshotProfilingConfig) -> Self {
        self.config = config;
        self
    }

    /// Required. Receives every exported batch; wrapped so a slow backend
    /// never blocks sampling or staging.
    pub fn with_exporter(mut self, exporter: Arc<dyn StackTraceExporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// Required. Captures stacks of the host runtime's threads.
    pub fn with_collector(mut self, collector: Arc<dyn ThreadInfoCollector>) -> Self {
        self.collector = Some(collector);
        self
    }

    /// Replaces the default probabilistic selector.
    pub fn with_selector(mut self, selector: Arc<dyn SnapshotSelector>) -> Self {
        self.selector = Some(selector);
        self
    }

    pub fn build(self) -> Result<SnapshotProfiler, SnapshotError> {
        let config = self.config.normalized();
        let exporter = self.exporter.ok_or_else(|| {
            SnapshotError::InvalidConfig("a stack trace exporter is required".to_string())
        })?;
        let collector = self.collector.ok_or_else(|| {
            SnapshotError::InvalidConfig("a thread info collector is required".to_string())
        })?;
        let selector = self.selector.unwrap_or_else(|| {
            Arc::new(ProbabilisticSnapshotSelector::new(config.selection_rate))
        });

        let exporter = Arc::new(AsyncStackTraceExporter::new(exporter)?);
        let staging = Arc::new(PeriodicallyExportingStagingArea::new(
            Arc::clone(&exporter) as Arc<dyn StackTraceExporter>,
            config.export_interval,
            config.staging_capacity,
        )?);

        // The tracker consults the base registry directly; the decorators
        // only add asynchronous cleanup on top of it.
        let base = Arc::new(InMemoryTraceRegistry::new());
        let tracker = Arc::new(ActiveSpanTracker::new(
            Arc::clone(&base) as Arc<dyn TraceRegistry>
        ));
        let sampler: Arc<dyn StackTraceSampler> = Arc::new(PeriodicStackTraceSampler::new(
            Arc::clone(&staging) as Arc<dyn StagingArea>,
            Arc::clone(&tracker) as Arc<dyn tracker::SpanTracker>,
            collector,
            config.sampling_interval,
            config.max_stack_depth,
        )?);

        let orphan_detecting = Arc::new(orphan::OrphanDetectingRegistry::new(
            base as Arc<dyn TraceRegistry>,
            Arc::clone(&sampler),
        )?);
        let registry: Arc<dyn TraceRegistry> = Arc::new(StallDetectingRegistry::new(
            orphan_detecting as Arc<dyn TraceRegistry>,
            Arc::clone(&sampler),
            config.stalled_trace_limit,
        )?);

        let propagator = SnapshotVolumePropagator::new(Arc::clone(&registry), config.enabled);
        let processor = SnapshotSpanProcessor::new(
            Arc::clone(&registry),
            Arc::clone(&sampler),
            selector,
        );
        let detector = TraceThreadChangeDetector::new(
            tracker,
            Arc::clone(&registry),
            Arc::clone(&sampler),
        );

        Ok(SnapshotProfiler {
            config,
            registry,
            sampler,
            staging,
            exporter,
            propagator,
            processor,
            detector,
            closed: AtomicBool::new(false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopExporter;
    impl StackTraceExporter for NoopExporter {
        fn export(&self, _stack_traces: Vec<StackTrace>) {}
    }

    struct NoopCollector;
    impl ThreadInfoCollector for NoopCollector {
        fn collect(&self, _thread_id: i64, _max_depth: usize) -> Option<ThreadInfo> {
            None
        }
    }

    #[test]
    fn build_requires_an_exporter_and_a_collector() {
        assert!(matches!(
            SnapshotProfiler::builder().build(),
            Err(SnapshotError::InvalidConfig(_))
        ));
        assert!(matches!(
            SnapshotProfiler::builder()
                .with_exporter(Arc::new(NoopExporter))
                .build(),
            Err(SnapshotError::InvalidConfig(_))
        ));
    }

    #[test]
    fn build_normalizes_the_configuration() {
        let profiler = SnapshotProfiler::builder()
            .with_config(SnapshotProfilingConfig {
                selection_rate: 0.75,
                ..Default::default()
            })
            .with_exporter(Arc::new(NoopExporter))
            .with_collector(Arc::new(NoopCollector))
            .build()
            .unwrap();
        assert_eq!(profiler.config().selection_rate, config::MAX_SELECTION_RATE);
        profiler.shutdown();
    }

    #[test]
    fn shutdown_is_idempotent_and_seals_the_hooks() {
        let profiler = SnapshotProfiler::builder()
            .with_config(SnapshotProfilingConfig {
                enabled: true,
                ..Default::default()
            })
            .with_exporter(Arc::new(NoopExporter))
            .with_collector(Arc::new(NoopCollector))
            .build()
            .unwrap();

        profiler.shutdown();
        profiler.shutdown();

        let ctx = SpanContext::new(TraceId::from_u128(7), SpanId::from_u64(1), true);
        let registration = profiler.entry_span_started(&ctx, Volume::Highest);
        assert!(!registration.is_watched());
    }

    #[test]
    fn hooks_stay_inert_while_profiling_is_disabled() {
        // Default configuration leaves profiling off.
        let profiler = SnapshotProfiler::builder()
            .with_exporter(Arc::new(NoopExporter))
            .with_collector(Arc::new(NoopCollector))
            .build()
            .unwrap();

        let ctx = SpanContext::new(TraceId::from_u128(7), SpanId::from_u64(1), true);
        let registration = profiler.entry_span_started(&ctx, Volume::Highest);
        assert!(!registration.is_watched());
        profiler.shutdown();
    }
}
