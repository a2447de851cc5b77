// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

/// The propagated snapshot decision for a trace.
///
/// `Unspecified` means no upstream service has decided yet; the local
/// selector gets to make the call. Only `Off` actively suppresses
/// snapshotting downstream, which is why an absent wire value maps to
/// `Unspecified` rather than `Off`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Volume {
    #[default]
    Unspecified,
    Off,
    Highest,
}

impl Volume {
    const OFF: &'static str = "off";
    const HIGHEST: &'static str = "highest";

    /// Decodes the wire representation. Absent or unrecognized values are
    /// treated as undecided, never as a suppression.
    pub fn from_wire(value: Option<&str>) -> Volume {
        match value {
            Some(v) if v.eq_ignore_ascii_case(Self::OFF) => Volume::Off,
            Some(v) if v.eq_ignore_ascii_case(Self::HIGHEST) => Volume::Highest,
            _ => Volume::Unspecified,
        }
    }

    /// The wire representation, if this value has one. `Unspecified` is
    /// expressed on the wire by writing nothing.
    pub fn wire_value(&self) -> Option<&'static str> {
        match self {
            Volume::Unspecified => None,
            Volume::Off => Some(Self::OFF),
            Volume::Highest => Some(Self::HIGHEST),
        }
    }
}

impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_value().unwrap_or("unspecified"))
    }
}
