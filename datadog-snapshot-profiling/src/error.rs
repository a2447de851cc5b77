// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors surfaced while constructing or configuring the snapshot profiler.
///
/// Runtime sampling failures never show up here. Per the degradation policy,
/// a failed sample means fewer samples for that trace, not a broken request,
/// so the hot paths log and move on instead of returning errors.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// A trace id string was not 32 lowercase hex characters, or was all
    /// zeroes where a valid id was required.
    #[error("invalid trace id: {0}")]
    InvalidTraceId(String),
    /// A span id string was not 16 lowercase hex characters.
    #[error("invalid span id: {0}")]
    InvalidSpanId(String),
    /// A configuration value could not be used and had no usable fallback.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A background thread could not be spawned.
    #[error(transparent)]
    Spawn(#[from] std::io::Error),
}
