// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded, trace-keyed accumulation of samples between capture and export.

use crate::exporter::StackTraceExporter;
use crate::error::SnapshotError;
use crate::ids::TraceId;
use crate::stack_trace::StackTrace;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, trace};

/// Where samplers put samples. Staging must never block on I/O; export
/// happens on a background path.
pub trait StagingArea: Send + Sync {
    fn stage(&self, stack_trace: StackTrace);

    fn stage_batch(&self, stack_traces: Vec<StackTrace>) {
        for stack_trace in stack_traces {
            self.stage(stack_trace);
        }
    }

    /// Takes and exports everything staged for one trace.
    fn empty(&self, trace_id: &TraceId);

    /// Takes and exports everything staged, one exporter call per trace.
    fn empty_all(&self);

    /// Stops the export loop and flushes synchronously. Idempotent; staging
    /// after close is a no-op.
    fn close(&self);
}

struct Buffers {
    inner: RwLock<HashMap<TraceId, Mutex<Vec<StackTrace>>>>,
    staged: AtomicUsize,
    dropped: AtomicU64,
    capacity: usize,
    exporter: Arc<dyn StackTraceExporter>,
    closed: AtomicBool,
}

impl Buffers {
    fn stage(&self, stack_trace: StackTrace) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        // Reserve a slot before touching the buffers; staging keeps working
        // under load by shedding samples rather than growing unbounded.
        if self.staged.fetch_add(1, Ordering::AcqRel) >= self.capacity {
            self.staged.fetch_sub(1, Ordering::AcqRel);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            trace!(trace_id = %stack_trace.trace_id(), "staging area full, dropping sample");
            return;
        }

        let trace_id = stack_trace.trace_id();
        {
            let buffers = self.inner.read();
            if let Some(buffer) = buffers.get(&trace_id) {
                buffer.lock().push(stack_trace);
                return;
            }
        }
        let mut buffers = self.inner.write();
        buffers
            .entry(trace_id)
            .or_insert_with(|| Mutex::new(Vec::new()))
            .lock()
            .push(stack_trace);
    }

    fn empty(&self, trace_id: &TraceId) {
        let batch = match self.inner.write().remove(trace_id) {
            Some(buffer) => buffer.into_inner(),
            None => return,
        };
        if batch.is_empty() {
            return;
        }
        self.staged.fetch_sub(batch.len(), Ordering::AcqRel);
        self.exporter.export(batch);
    }

    fn empty_all(&self) {
        let trace_ids: Vec<TraceId> = self.inner.read().keys().copied().collect();
        for trace_id in trace_ids {
            self.empty(&trace_id);
        }
    }
}

/// Staging area that drains itself to the exporter on a fixed interval.
pub struct PeriodicallyExportingStagingArea {
    buffers: Arc<Buffers>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicallyExportingStagingArea {
    pub fn new(
        exporter: Arc<dyn StackTraceExporter>,
        export_interval: Duration,
        capacity: usize,
    ) -> Result<Self, SnapshotError> {
        let buffers = Arc::new(Buffers {
            inner: RwLock::new(HashMap::new()),
            staged: AtomicUsize::new(0),
            dropped: AtomicU64::new(0),
            capacity,
            exporter,
            closed: AtomicBool::new(false),
        });

        let cancel = CancellationToken::new();
        let worker_buffers = Arc::clone(&buffers);
        let worker_cancel = cancel.clone();
        let worker = std::thread::Builder::new()
            .name("snapshot-staging-exporter".to_string())
            .spawn(move || match tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
            {
                Ok(runtime) => runtime.block_on(async move {
                    let mut interval = tokio::time::interval(export_interval);
                    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                    // The first tick of a tokio interval fires immediately.
                    interval.tick().await;
                    loop {
                        tokio::select! {
                            _ = worker_cancel.cancelled() => return,
                            _ = interval.tick() => worker_buffers.empty_all(),
                        }
                    }
                }),
                Err(e) => error!("failed to start staging export runtime: {e}"),
            })?;

        Ok(PeriodicallyExportingStagingArea {
            buffers,
            cancel,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Samples shed because the staging area was at capacity.
    pub fn dropped_samples(&self) -> u64 {
        self.buffers.dropped.load(Ordering::Relaxed)
    }
}

impl StagingArea for PeriodicallyExportingStagingArea {
    fn stage(&self, stack_trace: StackTrace) {
        self.buffers.stage(stack_trace);
    }

    fn empty(&self, trace_id: &TraceId) {
        self.buffers.empty(trace_id);
    }

    fn empty_all(&self) {
        self.buffers.empty_all();
    }

    fn close(&self) {
        self.buffers.closed.store(true, Ordering::Release);
        if let Some(worker) = self.worker.lock().take() {
            self.cancel.cancel();
            let _ = worker.join();
            // Whatever was staged before close still goes out, exactly once.
            self.buffers.empty_all();
        }
    }
}
