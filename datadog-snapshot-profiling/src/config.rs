// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Profiler configuration and its environment bindings.

use std::time::Duration;
use tracing::warn;

/// Highest trace selection rate the profiler will run at. Snapshot
/// profiling rides along on production request handling, so the probability
/// is capped regardless of configuration.
pub const MAX_SELECTION_RATE: f64 = 0.10;

const DEFAULT_SELECTION_RATE: f64 = 0.01;
const DEFAULT_STACK_DEPTH: usize = 1024;
const DEFAULT_SAMPLING_INTERVAL: Duration = Duration::from_millis(10);
const DEFAULT_EXPORT_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_STAGING_CAPACITY: usize = 2000;
const DEFAULT_STALLED_TRACE_LIMIT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotProfilingConfig {
    /// Master switch; everything else is ignored when false.
    pub enabled: bool,
    /// Probability that a locally rooted trace is selected for profiling.
    pub selection_rate: f64,
    /// Deepest stack recorded per sample; deeper frames are cut off.
    pub max_stack_depth: usize,
    /// Cadence of the shared sampling timer.
    pub sampling_interval: Duration,
    /// Cadence of the staging area's export sweep.
    pub export_interval: Duration,
    /// Samples held in staging before new ones are shed.
    pub staging_capacity: usize,
    /// Age at which a still-registered trace is declared stalled.
    pub stalled_trace_limit: Duration,
}

impl Default for SnapshotProfilingConfig {
    fn default() -> Self {
        SnapshotProfilingConfig {
            enabled: false,
            selection_rate: DEFAULT_SELECTION_RATE,
            max_stack_depth: DEFAULT_STACK_DEPTH,
            sampling_interval: DEFAULT_SAMPLING_INTERVAL,
            export_interval: DEFAULT_EXPORT_INTERVAL,
            staging_capacity: DEFAULT_STAGING_CAPACITY,
            stalled_trace_limit: DEFAULT_STALLED_TRACE_LIMIT,
        }
    }
}

impl SnapshotProfilingConfig {
    /// Reads overrides from `SPLUNK_SNAPSHOT_*` environment variables.
    /// Unparseable values fall back to the default for that setting.
    pub fn from_env() -> Self {
        let mut config = SnapshotProfilingConfig::default();
        if let Some(enabled) = env_parse("SPLUNK_SNAPSHOT_PROFILER_ENABLED") {
            config.enabled = enabled;
        }
        if let Some(rate) = env_parse("SPLUNK_SNAPSHOT_SELECTION_RATE") {
            config.selection_rate = rate;
        }
        if let Some(depth) = env_parse("SPLUNK_SNAPSHOT_PROFILER_STACK_DEPTH") {
            config.max_stack_depth = depth;
        }
        if let Some(interval) = env_duration("SPLUNK_SNAPSHOT_SAMPLING_INTERVAL") {
            config.sampling_interval = interval;
        }
        if let Some(interval) = env_duration("SPLUNK_SNAPSHOT_EXPORT_INTERVAL") {
            config.export_interval = interval;
        }
        if let Some(capacity) = env_parse("SPLUNK_SNAPSHOT_STAGING_CAPACITY") {
            config.staging_capacity = capacity;
        }
        if let Some(limit) = env_duration("SPLUNK_SNAPSHOT_STALLED_TRACE_LIMIT") {
            config.stalled_trace_limit = limit;
        }
        config.normalized()
    }

    /// Clamps out-of-range settings to usable values, logging each
    /// adjustment once.
    pub fn normalized(mut self) -> Self {
        if !self.selection_rate.is_finite() || self.selection_rate <= 0.0 {
            warn!(
                rate = self.selection_rate,
                "selection rate is not usable, falling back to {DEFAULT_SELECTION_RATE}"
            );
            self.selection_rate = DEFAULT_SELECTION_RATE;
        } else if self.selection_rate > MAX_SELECTION_RATE {
            warn!(
                rate = self.selection_rate,
                "selection rate exceeds the maximum, clamping to {MAX_SELECTION_RATE}"
            );
            self.selection_rate = MAX_SELECTION_RATE;
        }
        if self.max_stack_depth == 0 {
            warn!("stack depth of zero is not usable, falling back to {DEFAULT_STACK_DEPTH}");
            self.max_stack_depth = DEFAULT_STACK_DEPTH;
        }
        if self.sampling_interval.is_zero() {
            self.sampling_interval = DEFAULT_SAMPLING_INTERVAL;
        }
        if self.export_interval.is_zero() {
            self.export_interval = DEFAULT_EXPORT_INTERVAL;
        }
        if self.staging_capacity == 0 {
            self.staging_capacity = DEFAULT_STAGING_CAPACITY;
        }
        if self.stalled_trace_limit.is_zero() {
            self.stalled_trace_limit = DEFAULT_STALLED_TRACE_LIMIT;
        }
        self
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("ignoring unparseable value {raw:?} for {name}");
            None
        }
    }
}

fn env_duration(name: &str) -> Option<Duration> {
    let raw = std::env::var(name).ok()?;
    match parse_duration(raw.trim()) {
        Some(value) => Some(value),
        None => {
            warn!("ignoring unparseable duration {raw:?} for {name}");
            None
        }
    }
}

/// Parses durations of the form `250ms`, `5s` or `10m`. A bare number is
/// taken as milliseconds.
fn parse_duration(raw: &str) -> Option<Duration> {
    let (digits, unit) = match raw.find(|c: char| !c.is_ascii_digit()) {
        Some(split) => raw.split_at(split),
        None => (raw, "ms"),
    };
    let value: u64 = digits.parse().ok()?;
    match unit {
        "ms" => Some(Duration::from_millis(value)),
        "s" => Some(Duration::from_secs(value)),
        "m" => Some(Duration::from_secs(value * 60)),
        _ => None,
    }
}
