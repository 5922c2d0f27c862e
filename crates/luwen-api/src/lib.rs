// SPDX-FileCopyrightText: © 2023 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

pub mod chip;
pub mod cluster_descriptor;
pub mod error;
pub mod soc;
pub mod topology;

pub use chip::{ChipHandle, ChipInterface, DeviceInfo, RemoteChip};
pub use cluster_descriptor::{ChipRecord, ClusterDescriptor, ClusterDescriptorBuilder, IoDeviceType};
pub use error::{ClusterDescriptorError, DiscoveryError, PlatformError};
pub use soc::SocDescriptor;
pub use topology::{TopologyDiscovery, TopologyDiscoveryOptions};
