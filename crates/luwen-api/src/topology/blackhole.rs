// SPDX-FileCopyrightText: © 2023 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

//! Blackhole ethernet boot results.
//!
//! The ETH firmware reports link state and both chip identities in a fixed
//! block of L1. Reads always go through the translated eth core.

use std::collections::BTreeSet;

use luwen_def::{CoordSystem, CoreCoord, EthChannel};

use super::firmware::FwVersion;
use super::{PortStatus, SocCache};
use crate::chip::ChipInterface;
use crate::error::PlatformError;
use crate::soc::{core_xy, SocDescriptor};

pub const BOOT_RESULTS_ADDR: u64 = 0x7CC00;
pub const PORT_STATUS_ADDR: u64 = BOOT_RESULTS_ADDR + 4;
pub const TRAIN_STATUS_ADDR: u64 = BOOT_RESULTS_ADDR + 8;
pub const ETH_FW_VERSION_ADDR: u64 = 0x7CFBC;
pub const LOCAL_INFO_ADDR: u64 = 0x7CFC0;
pub const REMOTE_INFO_ADDR: u64 = 0x7CFE0;

/// Offsets inside the local and remote info blocks.
pub const ASIC_LOCATION_OFFSET: u64 = 1;
pub const ETH_ID_OFFSET: u64 = 2;
pub const LOGICAL_ETH_ID_OFFSET: u64 = 3;
pub const BOARD_ID_HI_OFFSET: u64 = 4;
pub const BOARD_ID_LO_OFFSET: u64 = 8;

pub const PORT_UNKNOWN: u8 = 0;
pub const PORT_UP: u8 = 1;
pub const PORT_DOWN: u8 = 2;
pub const PORT_UNUSED: u8 = 3;

pub const LINK_TRAIN_TRAINING: u32 = 0;
pub const LINK_TRAIN_SKIP: u32 = 1;
pub const LINK_TRAIN_PASS: u32 = 2;

pub const MIN_ETH_FW_VERSION: FwVersion = FwVersion::new(1, 0, 0);

/// Both dies of a p300 share a board id, the asic location keeps them apart.
pub fn asic_id(board_id: u64, asic_location: u8) -> u64 {
    (board_id << 1) | (asic_location & 1) as u64
}

fn translated(soc: &SocDescriptor, eth_core: CoreCoord) -> Result<(u8, u8), PlatformError> {
    Ok(core_xy(soc.translate(eth_core, CoordSystem::Translated)?))
}

fn read_board_id(
    chip: &dyn ChipInterface,
    core: (u8, u8),
    info_addr: u64,
) -> Result<u64, PlatformError> {
    let hi = chip.read32(core, info_addr + BOARD_ID_HI_OFFSET)? as u64;
    let lo = chip.read32(core, info_addr + BOARD_ID_LO_OFFSET)? as u64;
    Ok((hi << 32) | lo)
}

pub fn local_board_id(
    chip: &dyn ChipInterface,
    soc: &SocDescriptor,
    eth_core: CoreCoord,
) -> Result<u64, PlatformError> {
    read_board_id(chip, translated(soc, eth_core)?, LOCAL_INFO_ADDR)
}

pub fn remote_board_id(
    chip: &dyn ChipInterface,
    soc: &SocDescriptor,
    eth_core: CoreCoord,
) -> Result<u64, PlatformError> {
    read_board_id(chip, translated(soc, eth_core)?, REMOTE_INFO_ADDR)
}

pub fn local_asic_id(
    chip: &dyn ChipInterface,
    soc: &SocDescriptor,
    eth_core: CoreCoord,
) -> Result<u64, PlatformError> {
    let core = translated(soc, eth_core)?;
    let board_id = read_board_id(chip, core, LOCAL_INFO_ADDR)?;
    let location = chip.read8(core, LOCAL_INFO_ADDR + ASIC_LOCATION_OFFSET)?;
    Ok(asic_id(board_id, location))
}

pub fn remote_asic_id(
    chip: &dyn ChipInterface,
    soc: &SocDescriptor,
    eth_core: CoreCoord,
) -> Result<u64, PlatformError> {
    let core = translated(soc, eth_core)?;
    let board_id = read_board_id(chip, core, REMOTE_INFO_ADDR)?;
    let location = chip.read8(core, REMOTE_INFO_ADDR + ASIC_LOCATION_OFFSET)?;
    Ok(asic_id(board_id, location))
}

pub fn port_status(
    chip: &dyn ChipInterface,
    soc: &SocDescriptor,
    eth_core: CoreCoord,
) -> Result<PortStatus, PlatformError> {
    let status = chip.read8(translated(soc, eth_core)?, PORT_STATUS_ADDR)?;
    Ok(match status {
        PORT_UP => PortStatus::Up,
        PORT_UNUSED => PortStatus::Unconnected,
        PORT_UNKNOWN | PORT_DOWN => PortStatus::Unknown,
        other => {
            tracing::warn!(status = other, %eth_core, "Unexpected blackhole port status");
            PortStatus::Unknown
        }
    })
}

pub fn is_eth_trained(
    chip: &dyn ChipInterface,
    soc: &SocDescriptor,
    eth_core: CoreCoord,
) -> Result<bool, PlatformError> {
    let status = chip.read32(translated(soc, eth_core)?, TRAIN_STATUS_ADDR)?;
    Ok(status != LINK_TRAIN_TRAINING)
}

/// Physical channel on the far end of the link; [`patch_eth_connections`]
/// turns it into a logical channel once the remote harvesting is known.
pub fn remote_eth_channel(
    chip: &dyn ChipInterface,
    soc: &SocDescriptor,
    eth_core: CoreCoord,
) -> Result<EthChannel, PlatformError> {
    let core = translated(soc, eth_core)?;
    Ok(chip.read8(core, REMOTE_INFO_ADDR + ETH_ID_OFFSET)? as EthChannel)
}

pub fn logical_remote_eth_channel(
    chip: &dyn ChipInterface,
    soc: &SocDescriptor,
    eth_core: CoreCoord,
) -> Result<EthChannel, PlatformError> {
    let core = translated(soc, eth_core)?;
    Ok(chip.read8(core, REMOTE_INFO_ADDR + LOGICAL_ETH_ID_OFFSET)? as EthChannel)
}

pub fn eth_fw_version(
    chip: &dyn ChipInterface,
    soc: &SocDescriptor,
    eth_core: CoreCoord,
) -> Result<FwVersion, PlatformError> {
    let raw = chip.read32(translated(soc, eth_core)?, ETH_FW_VERSION_ADDR)?;
    Ok(FwVersion::from_packed(raw))
}

pub type Link = ((u64, EthChannel), (u64, EthChannel));

/// Rewrite the physical remote channel of each link into the logical channel
/// of the remote chip, dropping links that collapse onto an existing one.
pub fn patch_eth_connections(connections: Vec<Link>, socs: &SocCache) -> Vec<Link> {
    let mut seen = BTreeSet::new();
    let mut patched = Vec::with_capacity(connections.len());

    for (local, (remote_asic, physical_channel)) in connections {
        let Some(soc) = socs.get(remote_asic) else {
            tracing::warn!(remote_asic, "No soc descriptor for remote chip, dropping link");
            continue;
        };
        let channel = match soc
            .physical_eth_core(physical_channel)
            .map(|core| soc.eth_channel(core))
        {
            Some(Ok(channel)) => channel,
            Some(Err(err)) => {
                tracing::warn!(
                    remote_asic,
                    physical_channel,
                    %err,
                    "Remote eth channel is harvested, dropping link"
                );
                continue;
            }
            None => {
                tracing::warn!(
                    remote_asic,
                    physical_channel,
                    "Remote eth channel out of range, dropping link"
                );
                continue;
            }
        };

        let link = (local, (remote_asic, channel));
        if seen.insert(link) {
            patched.push(link);
        }
    }

    patched
}
