// SPDX-FileCopyrightText: © 2023 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use luwen_cluster::api::chip::mock::{MockChipConfig, MockCluster, MockFabric};
use luwen_cluster::{
    Arch, ChipId, ClusterDescriptor, ClusterDescriptorError, CoordinateError, DiscoveryError,
    TopologyDiscovery, TopologyDiscoveryOptions,
};

const N300_UPI: u64 = 0x14;

#[derive(thiserror::Error, Debug)]
pub enum MapError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Descriptor(#[from] ClusterDescriptorError),

    #[error(transparent)]
    Coordinate(#[from] CoordinateError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Where the cluster description comes from.
#[derive(Clone, Debug)]
pub enum MapSource {
    /// A previously written cluster descriptor.
    Snapshot(PathBuf),
    /// A simulated chain of n300 boards.
    Mock { boards: usize },
}

/// Simulated chain of `boards` n300 boards. Neighbouring boards are cabled
/// between their host attached chips on channels 0 and 1.
pub fn mock_n300_chain(boards: usize) -> Result<MockCluster, CoordinateError> {
    let mut fabric = MockFabric::new(Arch::Wormhole);
    let mut previous: Option<usize> = None;
    for board in 0..boards {
        let board_id = (N300_UPI << 36) | (0x100 * (board as u64 + 1));
        let left = fabric.add_chip(MockChipConfig::new(board_id).local(board as u32));
        let right = fabric.add_chip(MockChipConfig::new(board_id).asic_location(1));
        fabric.connect((left, 8), (right, 0)).connect((left, 9), (right, 1));
        if let Some(previous) = previous {
            fabric.connect((previous, 1), (left, 0));
        }
        previous = Some(left);
    }
    fabric.build()
}

pub fn load(
    source: &MapSource,
    options: TopologyDiscoveryOptions,
) -> Result<ClusterDescriptor, MapError> {
    let descriptor = match source {
        MapSource::Snapshot(path) => ClusterDescriptor::from_yaml_file(path)?,
        MapSource::Mock { boards } => {
            let cluster = mock_n300_chain(*boards)?;
            TopologyDiscovery::discover(cluster.local_devices(), options)?
        }
    };
    tracing::info!(chips = descriptor.number_of_chips(), "Loaded cluster");
    Ok(descriptor)
}

/// Short machine readable summary of the cluster.
pub fn summary(descriptor: &ClusterDescriptor) -> serde_json::Value {
    let chips = descriptor
        .chips()
        .iter()
        .map(|chip| {
            serde_json::json!({
                "chip": chip,
                "arch": descriptor.arch(*chip).ok().map(|arch| arch.to_string()),
                "board_type": descriptor.board_type(*chip).ok().map(|ty| ty.to_string()),
                "unique_id": descriptor.unique_id(*chip),
                "mmio": descriptor.chips_with_mmio().get(chip),
                "pci_bdf": descriptor.pci_bdf(*chip),
                "gateway": descriptor.closest_mmio_capable_chip(*chip),
                "active_channels": descriptor.active_eth_channels(*chip),
                "idle_channels": descriptor.idle_eth_channels(*chip),
            })
        })
        .collect::<Vec<_>>();

    let links = descriptor
        .ethernet_connections()
        .iter()
        .flat_map(|(chip, links)| {
            links
                .iter()
                .filter(move |(channel, remote)| (*chip, **channel) < **remote)
                .map(move |(channel, (remote, remote_channel))| {
                    serde_json::json!([[chip, channel], [remote, remote_channel]])
                })
        })
        .collect::<Vec<_>>();

    serde_json::json!({
        "chips": chips,
        "ethernet_connections": links,
        "eth_fw_version": descriptor.eth_fw_version().map(|v| v.to_string()),
    })
}

/// Write the (optionally constrained) cluster descriptor to `file`, or to
/// the default location when no file is given.
pub fn generate_map(
    source: &MapSource,
    options: TopologyDiscoveryOptions,
    constrain: Option<&BTreeSet<ChipId>>,
    file: Option<&Path>,
) -> Result<(ClusterDescriptor, PathBuf), MapError> {
    let mut descriptor = load(source, options)?;
    if let Some(target) = constrain {
        descriptor = descriptor.constrained(target)?;
    }
    if !descriptor.verify()? {
        tracing::warn!("Cluster descriptor is not fully consistent");
    }
    let path = descriptor.save(file)?;
    Ok((descriptor, path))
}
