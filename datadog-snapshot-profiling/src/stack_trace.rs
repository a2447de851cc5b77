// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Immutable snapshot of one thread at one instant.

use crate::ids::{SpanId, TraceId};
use crate::thread_info::ThreadInfo;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Portable rendition of an OS/runtime thread state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadState {
    New,
    Runnable,
    Blocked,
    Waiting,
    TimedWaiting,
    Terminated,
}

/// One captured stack frame. Symbolization into richer names is the
/// exporter's concern; frames carry whatever the platform collector had.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub function: String,
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl Frame {
    pub fn new(function: impl Into<String>) -> Self {
        Frame {
            function: function.into(),
            file: None,
            line: None,
        }
    }
}

/// A single stack sample attributed to a trace.
///
/// `duration` is the elapsed time since the previous sample of this session,
/// or since sampling started for the first sample. `span_id` is the span the
/// tracker saw active on the thread when the sample was taken; `None` when
/// no span was active. Frames are ordered outermost last.
#[derive(Clone, Debug)]
pub struct StackTrace {
    timestamp: DateTime<Utc>,
    duration: Duration,
    thread_id: i64,
    thread_name: String,
    thread_state: ThreadState,
    trace_id: TraceId,
    span_id: Option<SpanId>,
    frames: Vec<Frame>,
}

impl StackTrace {
    pub fn from_thread_info(
        timestamp: DateTime<Utc>,
        duration: Duration,
        thread_info: ThreadInfo,
        trace_id: TraceId,
        span_id: Option<SpanId>,
    ) -> Self {
        StackTrace {
            timestamp,
            duration,
            thread_id: thread_info.thread_id,
            thread_name: thread_info.thread_name,
            thread_state: thread_info.state,
            trace_id,
            span_id,
            frames: thread_info.frames,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn thread_id(&self) -> i64 {
        self.thread_id
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    pub fn thread_state(&self) -> ThreadState {
        self.thread_state
    }

    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    pub fn span_id(&self) -> Option<SpanId> {
        self.span_id
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carries_thread_info_fields() {
        let info = ThreadInfo {
            thread_id: 42,
            thread_name: "worker-1".to_string(),
            state: ThreadState::Runnable,
            frames: vec![Frame::new("handle_request"), Frame::new("main")],
        };
        let trace_id = TraceId::from_u128(7);
        let sample = StackTrace::from_thread_info(
            Utc::now(),
            Duration::from_millis(10),
            info,
            trace_id,
            Some(SpanId::from_u64(9)),
        );

        assert_eq!(sample.thread_id(), 42);
        assert_eq!(sample.thread_name(), "worker-1");
        assert_eq!(sample.thread_state(), ThreadState::Runnable);
        assert_eq!(sample.trace_id(), trace_id);
        assert_eq!(sample.span_id(), Some(SpanId::from_u64(9)));
        assert_eq!(sample.frames().len(), 2);
        assert_eq!(sample.duration(), Duration::from_millis(10));
    }
}
