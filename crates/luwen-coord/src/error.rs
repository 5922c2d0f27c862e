// SPDX-FileCopyrightText: © 2023 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

use luwen_def::{Arch, CoordSystem, CoreCoord, CoreType};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinateError {
    #[error("{count} {core_type} units harvested but {arch} only has {available}")]
    TooManyHarvested {
        arch: Arch,
        core_type: CoreType,
        count: u32,
        available: usize,
    },

    #[error("Unsupported harvesting on {arch}: {reason}")]
    UnsupportedHarvesting { arch: Arch, reason: String },

    #[error("No core coordinate found for system {system} at location: {coord}")]
    CoordinateNotFound {
        coord: CoreCoord,
        system: CoordSystem,
    },

    #[error("No core type found for system {system} at location: ({x}, {y})")]
    NoCoreAt { x: u32, y: u32, system: CoordSystem },

    #[error("Coordinate is ambiguous for logical system")]
    AmbiguousLogical,

    #[error("Core type {0} is not supported for this query")]
    UnsupportedCoreType(CoreType),

    #[error("{coord} maps to noc0 ({}, {}) but does not map back", noc0.0, noc0.1)]
    NotBijective { coord: CoreCoord, noc0: (u32, u32) },
}
