// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Stalled-trace detection.
//!
//! A registration older than the configured limit cannot belong to a real
//! in-flight request anymore; a background sweep unregisters it and stops
//! its sampling session. This is the wall-clock safety net that bounds
//! resource usage even when neither the normal end-of-span path nor orphan
//! detection fires.

use crate::error::SnapshotError;
use crate::ids::{SpanContext, TraceId};
use crate::registry::{Registration, TraceRegistry};
use crate::sampler::StackTraceSampler;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::warn;

struct Shared {
    delegate: Arc<dyn TraceRegistry>,
    sampler: Arc<dyn StackTraceSampler>,
    registrations: RwLock<HashMap<TraceId, (Instant, SpanContext)>>,
    limit: Duration,
}

/// Registry decorator that unregisters traces registered for longer than a
/// configured maximum lifetime.
pub struct StallDetectingRegistry {
    shared: Arc<Shared>,
    shutdown: Sender<()>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl StallDetectingRegistry {
    pub fn new(
        delegate: Arc<dyn TraceRegistry>,
        sampler: Arc<dyn StackTraceSampler>,
        limit: Duration,
    ) -> Result<Self, SnapshotError> {
        let shared = Arc::new(Shared {
            delegate,
            sampler,
            registrations: RwLock::new(HashMap::new()),
            limit,
        });

        let (shutdown, receiver) = mpsc::channel();
        let sweep_interval = limit / 2;
        let sweeper_shared = Arc::clone(&shared);
        let sweeper = std::thread::Builder::new()
            .name("stalled-trace-detector".to_string())
            .spawn(move || loop {
                match receiver.recv_timeout(sweep_interval) {
                    Err(RecvTimeoutError::Timeout) => sweeper_shared.sweep(),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                }
            })?;

        Ok(StallDetectingRegistry {
            shared,
            shutdown,
            sweeper: Mutex::new(Some(sweeper)),
        })
    }
}

impl Shared {
    fn sweep(&self) {
        let stalled: Vec<SpanContext> = {
            let registrations = self.registrations.read();
            registrations
                .values()
                .filter(|(registered_at, _)| registered_at.elapsed() > self.limit)
                .map(|(_, ctx)| *ctx)
                .collect()
        };

        for ctx in stalled {
            warn!(trace_id = %ctx.trace_id, limit = ?self.limit, "unregistering stalled trace");
            self.registrations.write().remove(&ctx.trace_id);
            self.delegate.unregister(&ctx);
            self.sampler.stop(&ctx);
        }
    }
}

impl TraceRegistry for StallDetectingRegistry {
    fn register(&self, ctx: &SpanContext) -> Registration {
        let registration = self.shared.delegate.register(ctx);
        self.shared
            .registrations
            .write()
            .insert(ctx.trace_id, (Instant::now(), *ctx));
        registration
    }

    fn is_registered(&self, ctx: &SpanContext) -> bool {
        self.shared.delegate.is_registered(ctx)
    }

    fn unregister(&self, ctx: &SpanContext) {
        self.shared.registrations.write().remove(&ctx.trace_id);
        self.shared.delegate.unregister(ctx);
    }

    fn close(&self) {
        self.shared.delegate.close();
        if let Some(sweeper) = self.sweeper.lock().take() {
            let _ = self.shutdown.send(());
            let _ = sweeper.join();
        }
    }
}
