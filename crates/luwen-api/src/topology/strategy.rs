// SPDX-FileCopyrightText: © 2023 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeSet;

use luwen_def::{Arch, CoreCoord, EthChannel, EthCoord};

use super::blackhole;
use super::firmware::FwVersion;
use super::wormhole::{self, WormholeDiscovery};
use super::{PortStatus, SocCache};
use crate::chip::{ChipHandle, ChipInterface, DeviceInfo};
use crate::error::{BtWrapper, PlatformError};
use crate::soc::SocDescriptor;

/// Generation specific half of topology discovery.
///
/// Grayskull has no ethernet, so its only job is naming the lone chip.
#[derive(Clone, Debug)]
pub enum DiscoveryStrategy {
    Grayskull,
    Wormhole(WormholeDiscovery),
    Blackhole,
}

fn no_ethernet() -> PlatformError {
    PlatformError::Unsupported {
        arch: Arch::Grayskull,
        reason: "chip has no ethernet cores".to_string(),
        backtrace: BtWrapper::capture(),
    }
}

impl DiscoveryStrategy {
    /// Pick the strategy for `arch`, reading whatever the first local chip
    /// has to say about its firmware.
    pub fn new(
        arch: Arch,
        first: &dyn ChipInterface,
        soc: &SocDescriptor,
    ) -> Result<Self, PlatformError> {
        Ok(match arch {
            Arch::Grayskull => Self::Grayskull,
            Arch::Wormhole => Self::Wormhole(WormholeDiscovery::init(first, soc)?),
            Arch::Blackhole => Self::Blackhole,
        })
    }

    pub fn arch(&self) -> Arch {
        match self {
            Self::Grayskull => Arch::Grayskull,
            Self::Wormhole(_) => Arch::Wormhole,
            Self::Blackhole => Arch::Blackhole,
        }
    }

    pub fn min_eth_fw_version(&self) -> FwVersion {
        match self {
            Self::Grayskull => FwVersion::default(),
            Self::Wormhole(_) => wormhole::MIN_ETH_FW_VERSION,
            Self::Blackhole => blackhole::MIN_ETH_FW_VERSION,
        }
    }

    /// Id for a chip whose ethernet never came up.
    pub fn unconnected_chip_id(&self, info: &DeviceInfo) -> u64 {
        match self {
            Self::Blackhole => blackhole::asic_id(info.board_id, info.asic_location),
            Self::Grayskull | Self::Wormhole(_) => info.board_id,
        }
    }

    pub fn is_board_id_included(
        &self,
        board_ids: &BTreeSet<u64>,
        board_id: u64,
        board_type: u32,
    ) -> bool {
        match self {
            Self::Wormhole(wh) => wh.is_board_id_included(board_ids, board_id, board_type),
            Self::Grayskull | Self::Blackhole => board_ids.contains(&board_id),
        }
    }

    pub fn is_using_eth_coords(&self) -> bool {
        match self {
            Self::Wormhole(wh) => wh.is_using_eth_coords(),
            Self::Grayskull | Self::Blackhole => false,
        }
    }

    pub fn local_board_id(
        &self,
        chip: &dyn ChipInterface,
        soc: &SocDescriptor,
        eth_core: CoreCoord,
    ) -> Result<u64, PlatformError> {
        match self {
            Self::Grayskull => Err(no_ethernet()),
            Self::Wormhole(wh) => wh.local_board_id(chip, eth_core),
            Self::Blackhole => blackhole::local_board_id(chip, soc, eth_core),
        }
    }

    pub fn remote_board_id(
        &self,
        chip: &dyn ChipInterface,
        soc: &SocDescriptor,
        eth_core: CoreCoord,
    ) -> Result<u64, PlatformError> {
        match self {
            Self::Grayskull => Err(no_ethernet()),
            Self::Wormhole(wh) => wh.remote_board_id(chip, eth_core),
            Self::Blackhole => blackhole::remote_board_id(chip, soc, eth_core),
        }
    }

    pub fn remote_board_type(
        &self,
        chip: &dyn ChipInterface,
        eth_core: CoreCoord,
    ) -> Result<u32, PlatformError> {
        match self {
            Self::Grayskull => Err(no_ethernet()),
            Self::Wormhole(wh) => wh.remote_board_type(chip, eth_core),
            Self::Blackhole => Ok(0),
        }
    }

    pub fn local_asic_id(
        &self,
        chip: &dyn ChipInterface,
        soc: &SocDescriptor,
        eth_core: CoreCoord,
    ) -> Result<u64, PlatformError> {
        match self {
            Self::Grayskull => Err(no_ethernet()),
            Self::Wormhole(wh) => wh.local_asic_id(chip, eth_core),
            Self::Blackhole => blackhole::local_asic_id(chip, soc, eth_core),
        }
    }

    pub fn remote_asic_id(
        &self,
        chip: &dyn ChipInterface,
        soc: &SocDescriptor,
        eth_core: CoreCoord,
    ) -> Result<u64, PlatformError> {
        match self {
            Self::Grayskull => Err(no_ethernet()),
            Self::Wormhole(wh) => wh.remote_asic_id(chip, eth_core),
            Self::Blackhole => blackhole::remote_asic_id(chip, soc, eth_core),
        }
    }

    pub fn local_eth_coord(
        &self,
        chip: &dyn ChipInterface,
        soc: &SocDescriptor,
    ) -> Result<Option<EthCoord>, PlatformError> {
        match self {
            Self::Wormhole(wh) if wh.is_using_eth_coords() => wh.local_eth_coord(chip, soc),
            _ => Ok(None),
        }
    }

    pub fn remote_eth_coord(
        &self,
        chip: &dyn ChipInterface,
        eth_core: CoreCoord,
    ) -> Result<Option<EthCoord>, PlatformError> {
        match self {
            Self::Wormhole(wh) if wh.is_using_eth_coords() => {
                wh.remote_eth_coord(chip, eth_core).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Channel recorded for an internal link; Blackhole reports a physical
    /// channel here which is fixed up by [`Self::patch_eth_connections`].
    pub fn remote_eth_channel(
        &self,
        chip: &dyn ChipInterface,
        soc: &SocDescriptor,
        eth_core: CoreCoord,
    ) -> Result<EthChannel, PlatformError> {
        match self {
            Self::Grayskull => Err(no_ethernet()),
            Self::Wormhole(wh) => wh.remote_eth_channel(chip, soc, eth_core),
            Self::Blackhole => blackhole::remote_eth_channel(chip, soc, eth_core),
        }
    }

    /// Channel recorded for a link leaving the cluster.
    pub fn logical_remote_eth_channel(
        &self,
        chip: &dyn ChipInterface,
        soc: &SocDescriptor,
        eth_core: CoreCoord,
    ) -> Result<EthChannel, PlatformError> {
        match self {
            Self::Grayskull => Err(no_ethernet()),
            Self::Wormhole(wh) => wh.remote_eth_channel(chip, soc, eth_core),
            Self::Blackhole => blackhole::logical_remote_eth_channel(chip, soc, eth_core),
        }
    }

    pub fn is_eth_trained(
        &self,
        chip: &dyn ChipInterface,
        soc: &SocDescriptor,
        eth_core: CoreCoord,
    ) -> Result<bool, PlatformError> {
        match self {
            Self::Grayskull => Err(no_ethernet()),
            Self::Wormhole(wh) => wh.is_eth_trained(chip, soc, eth_core),
            Self::Blackhole => blackhole::is_eth_trained(chip, soc, eth_core),
        }
    }

    pub fn port_status(
        &self,
        chip: &dyn ChipInterface,
        soc: &SocDescriptor,
        eth_core: CoreCoord,
    ) -> Result<PortStatus, PlatformError> {
        match self {
            Self::Grayskull => Err(no_ethernet()),
            Self::Wormhole(wh) => wh.port_status(chip, soc, eth_core),
            Self::Blackhole => blackhole::port_status(chip, soc, eth_core),
        }
    }

    pub fn eth_fw_version(
        &self,
        chip: &dyn ChipInterface,
        soc: &SocDescriptor,
        eth_core: CoreCoord,
    ) -> Result<FwVersion, PlatformError> {
        match self {
            Self::Grayskull => Err(no_ethernet()),
            Self::Wormhole(wh) => wh.eth_fw_version(chip, eth_core),
            Self::Blackhole => blackhole::eth_fw_version(chip, soc, eth_core),
        }
    }

    /// Handle for a chip reached through `gateway`, `None` when the
    /// generation cannot route to it.
    pub fn create_remote_chip(
        &self,
        gateway: &ChipHandle,
        eth_coord: Option<EthCoord>,
        channels: BTreeSet<EthChannel>,
    ) -> Option<ChipHandle> {
        match (self, eth_coord) {
            (Self::Wormhole(wh), Some(eth_coord)) => {
                wh.create_remote_chip(gateway, eth_coord, channels)
            }
            _ => None,
        }
    }

    pub fn patch_eth_connections(
        &self,
        connections: Vec<blackhole::Link>,
        socs: &SocCache,
    ) -> Vec<blackhole::Link> {
        match self {
            Self::Blackhole => blackhole::patch_eth_connections(connections, socs),
            Self::Grayskull | Self::Wormhole(_) => connections,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unconnected_chip_id() {
        let info = DeviceInfo {
            board_id: 0x100,
            asic_location: 1,
            ..Default::default()
        };
        assert_eq!(DiscoveryStrategy::Blackhole.unconnected_chip_id(&info), 0x201);
        assert_eq!(DiscoveryStrategy::Grayskull.unconnected_chip_id(&info), 0x100);
        assert_eq!(
            DiscoveryStrategy::Wormhole(WormholeDiscovery::default()).unconnected_chip_id(&info),
            0x100
        );
    }

    #[test]
    fn test_grayskull_has_no_links() {
        let strategy = DiscoveryStrategy::Grayskull;
        assert_eq!(strategy.arch(), Arch::Grayskull);
        assert!(!strategy.is_using_eth_coords());
        assert_eq!(strategy.min_eth_fw_version(), FwVersion::default());
        assert!(strategy.is_board_id_included(&BTreeSet::from([1]), 1, 0));
        assert!(!strategy.is_board_id_included(&BTreeSet::from([1]), 2, 0));
    }
}
