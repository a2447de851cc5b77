// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Handing sample batches off to the backend-facing sink.

use crate::error::SnapshotError;
use crate::stack_trace::StackTrace;
use parking_lot::Mutex;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::warn;

/// Sink for captured samples. Implementations own the encoding and the
/// transport; callers only promise that every batch is non-empty and
/// single-trace.
pub trait StackTraceExporter: Send + Sync {
    fn export(&self, stack_traces: Vec<StackTrace>);

    /// Finishes in-flight work. Idempotent; exports after close are dropped.
    fn close(&self) {}
}

enum Message {
    Export(Vec<StackTrace>),
    Shutdown,
}

/// Decorator that moves a blocking exporter's work off the caller's thread.
///
/// The staging area drains on its own schedule but must never stall behind a
/// slow backend; batches queue here and a dedicated thread feeds the
/// delegate in order.
pub struct AsyncStackTraceExporter {
    sender: Sender<Message>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncStackTraceExporter {
    pub fn new(delegate: Arc<dyn StackTraceExporter>) -> Result<Self, SnapshotError> {
        let (sender, receiver) = mpsc::channel();
        let worker = std::thread::Builder::new()
            .name("snapshot-stack-trace-exporter".to_string())
            .spawn(move || {
                while let Ok(message) = receiver.recv() {
                    match message {
                        Message::Export(batch) => delegate.export(batch),
                        Message::Shutdown => break,
                    }
                }
                delegate.close();
            })?;

        Ok(AsyncStackTraceExporter {
            sender,
            worker: Mutex::new(Some(worker)),
        })
    }
}

impl StackTraceExporter for AsyncStackTraceExporter {
    fn export(&self, stack_traces: Vec<StackTrace>) {
        if self.sender.send(Message::Export(stack_traces)).is_err() {
            warn!("stack trace exporter is closed, dropping batch");
        }
    }

    fn close(&self) {
        if let Some(worker) = self.worker.lock().take() {
            // Already-queued batches drain before the worker sees Shutdown.
            let _ = self.sender.send(Message::Shutdown);
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{SpanId, TraceId};
    use crate::stack_trace::{Frame, ThreadState};
    use crate::thread_info::ThreadInfo;
    use chrono::Utc;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingExporter {
        batches: Mutex<Vec<Vec<StackTrace>>>,
        closed: Mutex<bool>,
    }

    impl StackTraceExporter for RecordingExporter {
        fn export(&self, stack_traces: Vec<StackTrace>) {
            self.batches.lock().push(stack_traces);
        }
        fn close(&self) {
            *self.closed.lock() = true;
        }
    }

    fn sample(trace: u128) -> StackTrace {
        let info = ThreadInfo {
            thread_id: 1,
            thread_name: "t".to_string(),
            state: ThreadState::Runnable,
            frames: vec![Frame::new("f")],
        };
        StackTrace::from_thread_info(
            Utc::now(),
            Duration::from_millis(10),
            info,
            TraceId::from_u128(trace),
            Some(SpanId::from_u64(1)),
        )
    }

    #[test]
    fn batches_reach_the_delegate_in_order() {
        let delegate = Arc::new(RecordingExporter::default());
        let exporter =
            AsyncStackTraceExporter::new(Arc::clone(&delegate) as Arc<dyn StackTraceExporter>)
                .unwrap();

        exporter.export(vec![sample(1)]);
        exporter.export(vec![sample(2), sample(2)]);
        exporter.close();

        let batches = delegate.batches.lock();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0][0].trace_id(), TraceId::from_u128(1));
        assert_eq!(batches[1].len(), 2);
    }

    #[test]
    fn close_drains_the_queue_and_closes_the_delegate() {
        let delegate = Arc::new(RecordingExporter::default());
        let exporter =
            AsyncStackTraceExporter::new(Arc::clone(&delegate) as Arc<dyn StackTraceExporter>)
                .unwrap();

        for i in 0..50 {
            exporter.export(vec![sample(i)]);
        }
        exporter.close();

        assert_eq!(delegate.batches.lock().len(), 50);
        assert!(*delegate.closed.lock());
    }

    #[test]
    fn export_after_close_is_dropped() {
        let delegate = Arc::new(RecordingExporter::default());
        let exporter =
            AsyncStackTraceExporter::new(Arc::clone(&delegate) as Arc<dyn StackTraceExporter>)
                .unwrap();

        exporter.close();
        exporter.export(vec![sample(1)]);
        exporter.close();
        assert!(delegate.batches.lock().is_empty());
    }
}
