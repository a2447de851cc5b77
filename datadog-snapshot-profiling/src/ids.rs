// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fixed-width trace and span identifiers.
//!
//! Identifiers are opaque beyond equality and a total order on their numeric
//! value. The order matters to the probabilistic selector, which buckets
//! traces by the trailing 64 bits of the trace id.

use crate::error::SnapshotError;
use std::fmt;
use std::str::FromStr;

/// `from_str_radix` tolerates a leading `+` and uppercase digits, which would
/// parse to ids that re-format differently. Only canonical lowercase hex is
/// accepted on the wire.
fn is_lower_hex(s: &str) -> bool {
    s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// 128-bit trace identifier, formatted as 32 lowercase hex characters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraceId(u128);

impl TraceId {
    pub const INVALID: TraceId = TraceId(0);

    pub const fn from_u128(value: u128) -> Self {
        TraceId(value)
    }

    pub const fn to_u128(self) -> u128 {
        self.0
    }

    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }

    /// The trailing 64 bits of the id reinterpreted as a signed integer.
    ///
    /// This is the hashing convention shared with fraction-based trace
    /// samplers, so a trace selected here lands in the same bucket a
    /// trace-id-ratio sampler would compute for it.
    pub const fn lower_long(&self) -> i64 {
        self.0 as u64 as i64
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl FromStr for TraceId {
    type Err = SnapshotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 32 || !is_lower_hex(s) {
            return Err(SnapshotError::InvalidTraceId(s.to_string()));
        }
        u128::from_str_radix(s, 16)
            .map(TraceId)
            .map_err(|_| SnapshotError::InvalidTraceId(s.to_string()))
    }
}

/// 64-bit span identifier, formatted as 16 lowercase hex characters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpanId(u64);

impl SpanId {
    pub const INVALID: SpanId = SpanId(0);

    pub const fn from_u64(value: u64) -> Self {
        SpanId(value)
    }

    pub const fn to_u64(self) -> u64 {
        self.0
    }

    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for SpanId {
    type Err = SnapshotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 16 || !is_lower_hex(s) {
            return Err(SnapshotError::InvalidSpanId(s.to_string()));
        }
        u64::from_str_radix(s, 16)
            .map(SpanId)
            .map_err(|_| SnapshotError::InvalidSpanId(s.to_string()))
    }
}

/// The identifying portion of a span as seen by the tracing library.
///
/// `sampled` reflects the trace-level recording decision and is independent
/// of the snapshot selection decision; both must hold for a span to be
/// tracked and sampled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SpanContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub sampled: bool,
}

impl SpanContext {
    pub const INVALID: SpanContext = SpanContext {
        trace_id: TraceId::INVALID,
        span_id: SpanId::INVALID,
        sampled: false,
    };

    pub const fn new(trace_id: TraceId, span_id: SpanId, sampled: bool) -> Self {
        SpanContext {
            trace_id,
            span_id,
            sampled,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.trace_id.is_valid() && self.span_id.is_valid()
    }
}
