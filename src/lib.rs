// SPDX-FileCopyrightText: © 2023 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

//! Topology discovery and coordinate translation for Tenstorrent clusters.
//!
//! ```no_run
//! use luwen_cluster::{TopologyDiscovery, TopologyDiscoveryOptions};
//!
//! # fn devices() -> Vec<luwen_cluster::api::ChipHandle> { Vec::new() }
//! let descriptor = TopologyDiscovery::discover(devices(), TopologyDiscoveryOptions::default())?;
//! for chip in descriptor.chips() {
//!     println!("{chip}: gateway {:?}", descriptor.closest_mmio_capable_chip(*chip));
//! }
//! descriptor.save(None)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub use luwen_api as api;
pub use luwen_coord as coord;
pub use luwen_def as def;

pub use luwen_api::{
    ClusterDescriptor, ClusterDescriptorError, DiscoveryError, TopologyDiscovery,
    TopologyDiscoveryOptions,
};
pub use luwen_coord::{CoordinateError, CoordinateManager};
pub use luwen_def::{Arch, BoardType, ChipId, CoordSystem, CoreCoord, CoreType, EthChannel, HarvestingMasks};
