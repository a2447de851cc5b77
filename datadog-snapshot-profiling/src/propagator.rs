// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Cross-process propagation of the snapshot volume.
//!
//! The upstream decision to profile a trace travels with the trace so that
//! every service touched by it contributes samples, whether or not its own
//! selector would have picked the trace.

use crate::ids::SpanContext;
use crate::registry::TraceRegistry;
use crate::volume::Volume;
use std::collections::HashMap;
use std::sync::Arc;

/// Wire field carrying the snapshot volume, typically as a baggage entry.
pub const VOLUME_FIELD: &str = "splunk.trace.snapshot.volume";

/// Write side of a propagation carrier.
pub trait Injector {
    fn set(&mut self, key: &str, value: &str);
}

/// Read side of a propagation carrier.
pub trait Extractor {
    fn get(&self, key: &str) -> Option<&str>;
}

impl Injector for HashMap<String, String> {
    fn set(&mut self, key: &str, value: &str) {
        self.insert(key.to_string(), value.to_string());
    }
}

impl Extractor for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<&str> {
        HashMap::get(self, key).map(String::as_str)
    }
}

pub struct SnapshotVolumePropagator {
    registry: Arc<dyn TraceRegistry>,
    enabled: bool,
}

impl SnapshotVolumePropagator {
    pub fn new(registry: Arc<dyn TraceRegistry>, enabled: bool) -> Self {
        SnapshotVolumePropagator { registry, enabled }
    }

    pub fn fields(&self) -> &'static [&'static str] {
        &[VOLUME_FIELD]
    }

    /// Writes the volume for `ctx` into an outgoing carrier. Traces this
    /// process is profiling advertise `highest`; everything else is left
    /// unmarked so downstream selectors decide for themselves.
    pub fn inject(&self, ctx: &SpanContext, carrier: &mut dyn Injector) {
        if self.registry.is_registered(ctx) {
            if let Some(value) = Volume::Highest.wire_value() {
                carrier.set(VOLUME_FIELD, value);
            }
        }
    }

    /// Reads the volume from an incoming carrier. A `highest` volume
    /// registers the trace immediately so sampling can begin before any
    /// local span exists; the registration is detached because no span
    /// object owns it yet, leaving stall detection as its safety net.
    /// When profiling is disabled the volume still round-trips through
    /// this process, but nothing is registered locally.
    pub fn extract(&self, ctx: &SpanContext, carrier: &dyn Extractor) -> Volume {
        let volume = Volume::from_wire(carrier.get(VOLUME_FIELD));
        if self.enabled && volume == Volume::Highest && ctx.is_valid() {
            self.registry.register(ctx).detach();
        }
        volume
    }
}
