// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! End-to-end exercises of the assembled profiling pipeline.

use datadog_snapshot_profiling::propagator::VOLUME_FIELD;
use datadog_snapshot_profiling::select::{SnapshotSelector, TraceContext};
use datadog_snapshot_profiling::threading::get_current_thread_id;
use datadog_snapshot_profiling::{
    Frame, SnapshotProfiler, SnapshotProfilingConfig, SpanContext, SpanId, StackTrace,
    StackTraceExporter, ThreadInfo, ThreadInfoCollector, ThreadState, TraceId, Volume,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Default)]
struct RecordingExporter {
    batches: Mutex<Vec<Vec<StackTrace>>>,
}

impl RecordingExporter {
    fn samples(&self) -> Vec<StackTrace> {
        self.batches.lock().iter().flatten().cloned().collect()
    }

    fn sample_count(&self) -> usize {
        self.batches.lock().iter().map(Vec::len).sum()
    }
}

impl StackTraceExporter for RecordingExporter {
    fn export(&self, stack_traces: Vec<StackTrace>) {
        self.batches.lock().push(stack_traces);
    }
}

/// Fabricates a plausible one-frame stack for whatever thread is asked for.
struct StubCollector;

impl ThreadInfoCollector for StubCollector {
    fn collect(&self, thread_id: i64, _max_depth: usize) -> Option<ThreadInfo> {
        Some(ThreadInfo {
            thread_id,
            thread_name: format!("worker-{thread_id}"),
            state: ThreadState::Runnable,
            frames: vec![Frame::new("handle_request"), Frame::new("run")],
        })
    }
}

struct FixedSelector(bool);

impl SnapshotSelector for FixedSelector {
    fn select(&self, _ctx: &TraceContext) -> bool {
        self.0
    }
}

fn profiler_with_exporter(
    select: bool,
    sampling_interval: Duration,
    export_interval: Duration,
) -> (SnapshotProfiler, Arc<RecordingExporter>) {
    let exporter = Arc::new(RecordingExporter::default());
    let profiler = SnapshotProfiler::builder()
        .with_config(SnapshotProfilingConfig {
            enabled: true,
            sampling_interval,
            export_interval,
            ..Default::default()
        })
        .with_exporter(Arc::clone(&exporter) as Arc<dyn StackTraceExporter>)
        .with_collector(Arc::new(StubCollector))
        .with_selector(Arc::new(FixedSelector(select)))
        .build()
        .unwrap();
    (profiler, exporter)
}

fn ctx(trace: u128, span: u64) -> SpanContext {
    SpanContext::new(TraceId::from_u128(trace), SpanId::from_u64(span), true)
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn selected_trace_is_sampled_from_entry_to_exit() {
    let (profiler, exporter) = profiler_with_exporter(
        true,
        Duration::from_millis(5),
        Duration::from_millis(25),
    );
    let entry = ctx(0x0cafe, 1);

    let registration = profiler.entry_span_started(&entry, Volume::Unspecified);
    assert!(registration.is_watched());

    let scope = profiler.attach_context(&entry);
    assert!(wait_until(|| exporter.sample_count() >= 3));
    drop(scope);

    profiler.entry_span_ended(&entry);
    drop(registration);
    profiler.shutdown();

    let samples = exporter.samples();
    let this_thread = get_current_thread_id();
    for sample in &samples {
        assert_eq!(sample.trace_id(), entry.trace_id);
        assert_eq!(sample.thread_id(), this_thread);
        assert_eq!(sample.frames().len(), 2);
        assert!(sample.duration() < Duration::from_secs(10));
    }
    // Samples taken while the entry span was the active context carry it.
    assert!(samples
        .iter()
        .any(|sample| sample.span_id() == Some(entry.span_id)));
}

#[test]
fn unselected_trace_produces_no_samples() {
    let (profiler, exporter) = profiler_with_exporter(
        false,
        Duration::from_millis(5),
        Duration::from_millis(25),
    );
    let entry = ctx(0x0cafe, 1);

    let registration = profiler.entry_span_started(&entry, Volume::Unspecified);
    assert!(!registration.is_watched());
    let _scope = profiler.attach_context(&entry);

    std::thread::sleep(Duration::from_millis(100));
    profiler.entry_span_ended(&entry);
    profiler.shutdown();
    assert_eq!(exporter.sample_count(), 0);
}

#[test]
fn samples_follow_the_trace_across_a_thread_handoff() {
    let (profiler, exporter) = profiler_with_exporter(
        true,
        Duration::from_millis(5),
        Duration::from_millis(25),
    );
    let entry = ctx(0x0cafe, 1);
    let registration = profiler.entry_span_started(&entry, Volume::Unspecified);
    let first_thread = get_current_thread_id();

    let profiler_ref = &profiler;
    let exporter_ref = &exporter;
    let second_thread = std::thread::scope(|scope| {
        scope
            .spawn(move || {
                let thread_id = get_current_thread_id();
                let _scope = profiler_ref.attach_context(&entry);
                // Hold the context until samples attributed to this thread
                // have made it all the way through export.
                assert!(wait_until(|| exporter_ref
                    .samples()
                    .iter()
                    .any(|sample| sample.thread_id() == thread_id)));
                thread_id
            })
            .join()
            .unwrap()
    });
    assert_ne!(second_thread, first_thread);

    profiler.entry_span_ended(&entry);
    drop(registration);
    profiler.shutdown();

    let samples = exporter.samples();
    assert!(samples
        .iter()
        .filter(|sample| sample.thread_id() == second_thread)
        .all(|sample| sample.trace_id() == entry.trace_id));
}

#[test]
fn upstream_decision_travels_across_process_boundaries() {
    let (upstream, upstream_exporter) = profiler_with_exporter(
        true,
        Duration::from_millis(5),
        Duration::from_millis(25),
    );
    // Downstream would never pick this trace on its own.
    let (downstream, downstream_exporter) = profiler_with_exporter(
        false,
        Duration::from_millis(5),
        Duration::from_millis(25),
    );

    let upstream_entry = ctx(0x0cafe, 1);
    let registration = upstream.entry_span_started(&upstream_entry, Volume::Unspecified);

    let mut carrier: HashMap<String, String> = HashMap::new();
    upstream
        .propagator()
        .inject(&upstream_entry, &mut carrier);
    assert_eq!(
        carrier.get(VOLUME_FIELD).map(String::as_str),
        Some("highest")
    );

    let downstream_entry = ctx(0x0cafe, 2);
    let volume = downstream
        .propagator()
        .extract(&downstream_entry, &carrier);
    assert_eq!(volume, Volume::Highest);

    let downstream_registration = downstream.entry_span_started(&downstream_entry, volume);
    let _scope = downstream.attach_context(&downstream_entry);
    assert!(wait_until(|| downstream_exporter.sample_count() >= 2));

    downstream.entry_span_ended(&downstream_entry);
    drop(downstream_registration);
    upstream.entry_span_ended(&upstream_entry);
    drop(registration);
    downstream.shutdown();
    upstream.shutdown();

    assert!(downstream_exporter
        .samples()
        .iter()
        .all(|sample| sample.trace_id() == downstream_entry.trace_id));
    assert!(upstream_exporter.sample_count() >= 1);
}

#[test]
fn propagated_off_suppresses_an_otherwise_selected_trace() {
    let (profiler, exporter) = profiler_with_exporter(
        true,
        Duration::from_millis(5),
        Duration::from_millis(25),
    );
    let entry = ctx(0x0cafe, 1);

    let mut carrier: HashMap<String, String> = HashMap::new();
    carrier.insert(VOLUME_FIELD.to_string(), "off".to_string());
    let volume = profiler.propagator().extract(&entry, &carrier);
    assert_eq!(volume, Volume::Off);

    let _registration = profiler.entry_span_started(&entry, volume);
    std::thread::sleep(Duration::from_millis(50));
    profiler.shutdown();
    assert_eq!(exporter.sample_count(), 0);
}

#[test]
fn disabled_profiler_stages_nothing() {
    let exporter = Arc::new(RecordingExporter::default());
    let profiler = SnapshotProfiler::builder()
        .with_config(SnapshotProfilingConfig {
            sampling_interval: Duration::from_millis(5),
            export_interval: Duration::from_millis(25),
            ..Default::default()
        })
        .with_exporter(Arc::clone(&exporter) as Arc<dyn StackTraceExporter>)
        .with_collector(Arc::new(StubCollector))
        .with_selector(Arc::new(FixedSelector(true)))
        .build()
        .unwrap();
    let entry = ctx(0x0cafe, 1);

    // Even an upstream "highest" decision must not start sampling.
    let mut carrier: HashMap<String, String> = HashMap::new();
    carrier.insert(VOLUME_FIELD.to_string(), "highest".to_string());
    let volume = profiler.propagator().extract(&entry, &carrier);
    assert_eq!(volume, Volume::Highest);

    let registration = profiler.entry_span_started(&entry, volume);
    assert!(!registration.is_watched());
    let _scope = profiler.attach_context(&entry);

    std::thread::sleep(Duration::from_millis(100));
    profiler.entry_span_ended(&entry);
    profiler.shutdown();
    assert_eq!(exporter.sample_count(), 0);
}

#[test]
fn shutdown_flushes_staged_samples_exactly_once() {
    // Export interval long enough that nothing leaves staging on its own.
    let (profiler, exporter) = profiler_with_exporter(
        true,
        Duration::from_millis(5),
        Duration::from_secs(3600),
    );
    let entry = ctx(0x0cafe, 1);

    let registration = profiler.entry_span_started(&entry, Volume::Unspecified);
    std::thread::sleep(Duration::from_millis(50));
    profiler.entry_span_ended(&entry);
    drop(registration);
    assert_eq!(exporter.sample_count(), 0);

    profiler.shutdown();
    let flushed = exporter.sample_count();
    assert!(flushed >= 2, "expected entry and exit samples, got {flushed}");

    profiler.shutdown();
    assert_eq!(exporter.sample_count(), flushed);
}

#[test]
fn short_lived_spans_still_produce_a_sample() {
    let (profiler, exporter) = profiler_with_exporter(
        true,
        Duration::from_secs(3600),
        Duration::from_millis(25),
    );
    let entry = ctx(0x0cafe, 1);

    // Start and end with no timer tick in between.
    let registration = profiler.entry_span_started(&entry, Volume::Unspecified);
    profiler.entry_span_ended(&entry);
    drop(registration);
    profiler.shutdown();

    assert!(exporter.sample_count() >= 1);
}
