// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::stack_trace::{Frame, ThreadState};

/// What the platform hands back for one thread: identity, state, and the
/// captured frames, already truncated to the requested depth.
#[derive(Clone, Debug)]
pub struct ThreadInfo {
    pub thread_id: i64,
    pub thread_name: String,
    pub state: ThreadState,
    pub frames: Vec<Frame>,
}

/// Platform seam for thread introspection.
///
/// The profiler only ever needs "stack plus state for this thread id"; how
/// that is obtained (ptrace, runtime APIs, a signal handler) is the
/// embedder's business. A thread that no longer exists yields `None` and the
/// sampler simply produces no sample for it on that tick.
pub trait ThreadInfoCollector: Send + Sync {
    fn collect(&self, thread_id: i64, max_depth: usize) -> Option<ThreadInfo>;

    /// Batch form used by the periodic tick; one introspection call for the
    /// whole set where the platform supports it.
    fn collect_many(&self, thread_ids: &[i64], max_depth: usize) -> Vec<ThreadInfo> {
        thread_ids
            .iter()
            .filter_map(|id| self.collect(*id, max_depth))
            .collect()
    }
}
