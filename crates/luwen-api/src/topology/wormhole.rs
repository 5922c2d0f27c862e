// SPDX-FileCopyrightText: © 2023 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

//! Wormhole ERISC routing firmware layout.
//!
//! Every ethernet core runs the same routing firmware, which publishes the
//! identity of both ends of its link into L1 once training completes.

use std::collections::BTreeSet;
use std::sync::Arc;

use luwen_def::{BoardType, CoreCoord, CoreType, CoordSystem, EthChannel, EthCoord};

use super::firmware::FwVersion;
use super::PortStatus;
use crate::chip::{ChipHandle, ChipInterface, RemoteChip};
use crate::error::PlatformError;
use crate::soc::{core_xy, SocDescriptor};

pub const ETH_FW_VERSION_ADDR: u64 = 0x210;
pub const NODE_INFO_ADDR: u64 = 0x1100;
pub const ETH_CONN_INFO_ADDR: u64 = 0x1200;
pub const RESULTS_BUF_ADDR: u64 = 0x1ec0;

pub const ETH_UNKNOWN: u32 = 0;
pub const ETH_UNCONNECTED: u32 = 1;
/// Any value past `ETH_UNCONNECTED` is a trained link, this is what the firmware writes.
pub const ETH_CONNECTED: u32 = 2;

pub const MIN_ETH_FW_VERSION: FwVersion = FwVersion::new(6, 0, 0);

/// Word offsets into `results_buf` changed with ETH firmware 6.12.0.
const RESULTS_LAYOUT_CHANGE: FwVersion = FwVersion::new(6, 12, 0);

/// `node_info + 8`: this chip's routing coordinate.
#[bitfield_struct::bitfield(u32)]
pub struct LocalCoordWord {
    pub rack: u8,
    pub shelf: u8,
    pub x: u8,
    pub y: u8,
}

/// `node_info + 4 * 9`: where the far end of the link lives.
#[bitfield_struct::bitfield(u32)]
pub struct RemoteShelfWord {
    #[bits(4)]
    __padding: u8,
    #[bits(6)]
    pub noc_x: u8,
    #[bits(6)]
    pub noc_y: u8,
    #[bits(6)]
    pub shelf_x: u8,
    #[bits(6)]
    pub shelf_y: u8,
    #[bits(4)]
    __reserved: u8,
}

/// `node_info + 4 * 10`
#[bitfield_struct::bitfield(u32)]
pub struct RemoteRackWord {
    pub rack: u8,
    pub shelf: u8,
    #[bits(16)]
    __reserved: u16,
}

/// Word offsets inside `results_buf` for one ETH firmware release.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EthAddresses {
    pub version: FwVersion,
    pub node_info: u64,
    pub eth_conn_info: u64,
    pub results_buf: u64,

    pub remote_board_type_offset: u64,
    pub local_board_type_offset: u64,
    pub remote_board_id_lo_offset: u64,
    pub local_board_id_lo_offset: u64,
    pub remote_eth_id_offset: u64,
}

impl EthAddresses {
    pub fn new(version: FwVersion) -> Self {
        let (remote_board_type, local_board_type, remote_lo, local_lo, remote_eth_id) =
            if version >= RESULTS_LAYOUT_CHANGE {
                (77, 69, 72, 64, 76)
            } else {
                (72, 64, 73, 65, 77)
            };

        Self {
            version,
            node_info: NODE_INFO_ADDR,
            eth_conn_info: ETH_CONN_INFO_ADDR,
            results_buf: RESULTS_BUF_ADDR,
            remote_board_type_offset: remote_board_type,
            local_board_type_offset: local_board_type,
            remote_board_id_lo_offset: remote_lo,
            local_board_id_lo_offset: local_lo,
            remote_eth_id_offset: remote_eth_id,
        }
    }

    fn result(&self, offset: u64) -> u64 {
        self.results_buf + 4 * offset
    }

    pub fn remote_board_type(&self) -> u64 {
        self.result(self.remote_board_type_offset)
    }

    pub fn local_board_type(&self) -> u64 {
        self.result(self.local_board_type_offset)
    }

    pub fn remote_board_id_lo(&self) -> u64 {
        self.result(self.remote_board_id_lo_offset)
    }

    pub fn local_board_id_lo(&self) -> u64 {
        self.result(self.local_board_id_lo_offset)
    }

    pub fn remote_eth_id(&self) -> u64 {
        self.result(self.remote_eth_id_offset)
    }

    pub fn port_status(&self, channel: EthChannel) -> u64 {
        self.eth_conn_info + 4 * channel as u64
    }

    pub fn local_coord(&self) -> u64 {
        self.node_info + 8
    }

    pub fn remote_shelf(&self) -> u64 {
        self.node_info + 4 * 9
    }

    pub fn remote_rack(&self) -> u64 {
        self.node_info + 4 * 10
    }
}

impl Default for EthAddresses {
    fn default() -> Self {
        Self::new(RESULTS_LAYOUT_CHANGE)
    }
}

/// Link probing for Wormhole clusters.
///
/// The register layout is fixed by the ETH firmware of the first local
/// chip; every other chip is checked against that version while probing.
#[derive(Clone, Debug, Default)]
pub struct WormholeDiscovery {
    pub eth_addresses: EthAddresses,
    /// 6U galaxy trays: every chip is host attached and routing coordinates are unused.
    pub is_ubb: bool,
}

impl WormholeDiscovery {
    pub fn init(chip: &dyn ChipInterface, soc: &SocDescriptor) -> Result<Self, PlatformError> {
        let Some(eth_core) = soc.eth_cores()?.first().copied() else {
            return Ok(Self::default());
        };
        let core = core_xy(eth_core);

        let version = FwVersion::from_wormhole_eth(chip.read32(core, ETH_FW_VERSION_ADDR)?);
        let eth_addresses = EthAddresses::new(version);

        let local_board_type = chip.read32(core, eth_addresses.local_board_type())?;
        let is_ubb = BoardType::from_board_id((local_board_type as u64) << 36)
            == BoardType::UbbWormhole;

        tracing::debug!(%version, is_ubb, "Selected wormhole ETH address map");

        Ok(Self {
            eth_addresses,
            is_ubb,
        })
    }

    fn read_board_id(
        &self,
        chip: &dyn ChipInterface,
        eth_core: CoreCoord,
        lo_addr: u64,
    ) -> Result<u64, PlatformError> {
        let core = core_xy(eth_core);
        let lo = chip.read32(core, lo_addr)? as u64;
        let hi = chip.read32(core, lo_addr + 4)? as u64;
        Ok(lo | (hi << 32))
    }

    pub fn local_asic_id(
        &self,
        chip: &dyn ChipInterface,
        eth_core: CoreCoord,
    ) -> Result<u64, PlatformError> {
        self.read_board_id(chip, eth_core, self.eth_addresses.local_board_id_lo())
    }

    pub fn remote_asic_id(
        &self,
        chip: &dyn ChipInterface,
        eth_core: CoreCoord,
    ) -> Result<u64, PlatformError> {
        self.read_board_id(chip, eth_core, self.eth_addresses.remote_board_id_lo())
    }

    pub fn local_board_id(
        &self,
        chip: &dyn ChipInterface,
        eth_core: CoreCoord,
    ) -> Result<u64, PlatformError> {
        if self.is_ubb {
            return self.local_asic_id(chip, eth_core);
        }
        Ok(chip.read32(core_xy(eth_core), self.eth_addresses.local_board_id_lo())? as u64)
    }

    pub fn remote_board_id(
        &self,
        chip: &dyn ChipInterface,
        eth_core: CoreCoord,
    ) -> Result<u64, PlatformError> {
        if self.is_ubb {
            return self.remote_asic_id(chip, eth_core);
        }
        Ok(chip.read32(core_xy(eth_core), self.eth_addresses.remote_board_id_lo())? as u64)
    }

    pub fn remote_board_type(
        &self,
        chip: &dyn ChipInterface,
        eth_core: CoreCoord,
    ) -> Result<u32, PlatformError> {
        Ok(chip.read32(core_xy(eth_core), self.eth_addresses.remote_board_type())?)
    }

    pub fn port_status(
        &self,
        chip: &dyn ChipInterface,
        soc: &SocDescriptor,
        eth_core: CoreCoord,
    ) -> Result<PortStatus, PlatformError> {
        let channel = soc.eth_channel(eth_core)?;
        let status = chip.read32(core_xy(eth_core), self.eth_addresses.port_status(channel))?;
        Ok(match status {
            ETH_UNKNOWN => PortStatus::Unknown,
            ETH_UNCONNECTED => PortStatus::Unconnected,
            _ => PortStatus::Up,
        })
    }

    /// Training is over once the firmware has settled on a port status.
    pub fn is_eth_trained(
        &self,
        chip: &dyn ChipInterface,
        soc: &SocDescriptor,
        eth_core: CoreCoord,
    ) -> Result<bool, PlatformError> {
        Ok(self.port_status(chip, soc, eth_core)? != PortStatus::Unknown)
    }

    /// NOC0 location of the ethernet core on the far end of the link.
    pub fn remote_eth_core(
        &self,
        chip: &dyn ChipInterface,
        eth_core: CoreCoord,
    ) -> Result<CoreCoord, PlatformError> {
        let word =
            RemoteShelfWord::from(chip.read32(core_xy(eth_core), self.eth_addresses.remote_shelf())?);
        Ok(CoreCoord::new(
            word.noc_x() as u32,
            word.noc_y() as u32,
            CoreType::Eth,
            CoordSystem::Noc0,
        ))
    }

    /// Logical channel on the far end of the link.
    ///
    /// Both ends of a link share a layout and eth cores are never harvested,
    /// so the local soc resolves the remote core.
    pub fn remote_eth_channel(
        &self,
        chip: &dyn ChipInterface,
        soc: &SocDescriptor,
        eth_core: CoreCoord,
    ) -> Result<EthChannel, PlatformError> {
        if self.is_ubb {
            return Ok(chip.read32(core_xy(eth_core), self.eth_addresses.remote_eth_id())?);
        }
        let remote = self.remote_eth_core(chip, eth_core)?;
        Ok(soc.eth_channel(remote)?)
    }

    pub fn local_eth_coord(
        &self,
        chip: &dyn ChipInterface,
        soc: &SocDescriptor,
    ) -> Result<Option<EthCoord>, PlatformError> {
        let Some(eth_core) = soc.eth_cores()?.first().copied() else {
            return Ok(None);
        };
        let word =
            LocalCoordWord::from(chip.read32(core_xy(eth_core), self.eth_addresses.local_coord())?);
        Ok(Some(EthCoord::new(
            word.x() as u32,
            word.y() as u32,
            word.rack() as u32,
            word.shelf() as u32,
        )))
    }

    pub fn remote_eth_coord(
        &self,
        chip: &dyn ChipInterface,
        eth_core: CoreCoord,
    ) -> Result<EthCoord, PlatformError> {
        let core = core_xy(eth_core);
        let shelf = RemoteShelfWord::from(chip.read32(core, self.eth_addresses.remote_shelf())?);
        let rack = RemoteRackWord::from(chip.read32(core, self.eth_addresses.remote_rack())?);
        Ok(EthCoord::new(
            shelf.shelf_x() as u32,
            shelf.shelf_y() as u32,
            rack.rack() as u32,
            rack.shelf() as u32,
        ))
    }

    pub fn eth_fw_version(
        &self,
        chip: &dyn ChipInterface,
        eth_core: CoreCoord,
    ) -> Result<FwVersion, PlatformError> {
        Ok(FwVersion::from_wormhole_eth(
            chip.read32(core_xy(eth_core), ETH_FW_VERSION_ADDR)?,
        ))
    }

    /// Boards without a programmed board type still belong to the cluster,
    /// except on 6U trays where the allow list is authoritative.
    pub fn is_board_id_included(
        &self,
        board_ids: &BTreeSet<u64>,
        board_id: u64,
        board_type: u32,
    ) -> bool {
        if self.is_ubb {
            return board_ids.contains(&board_id);
        }
        board_type == 0 || board_ids.contains(&board_id)
    }

    pub fn is_using_eth_coords(&self) -> bool {
        !self.is_ubb
    }

    pub fn create_remote_chip(
        &self,
        gateway: &ChipHandle,
        eth_coord: EthCoord,
        channels: BTreeSet<EthChannel>,
    ) -> Option<ChipHandle> {
        if self.is_ubb {
            return None;
        }
        Some(Arc::new(RemoteChip::new(gateway.clone(), eth_coord, channels)))
    }
}
