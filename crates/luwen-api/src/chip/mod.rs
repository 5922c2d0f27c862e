// SPDX-FileCopyrightText: © 2023 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeSet;
use std::sync::Arc;

use luwen_def::{Arch, EthChannel, EthCoord, HarvestingMasks};

pub mod mock;
mod remote;

pub use remote::RemoteChip;

/// Identity and configuration of one chip as reported by its management firmware.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub board_id: u64,
    pub asic_location: u8,
    pub harvesting_masks: HarvestingMasks,
    pub noc_translation_enabled: bool,
    /// Packed `major.minor.patch.build`, one byte each.
    pub fw_bundle_version: Option<u32>,
    /// Host interface (pci device) number, `None` for chips behind a gateway.
    pub interface_id: Option<u32>,
    pub bus_id: Option<u16>,
    /// `domain:bus:device.function` of the host interface.
    pub pci_bdf: Option<String>,
}

/// The lowest level access to one chip.
///
/// Cores are addressed by their NOC0 `(x, y)` location unless the
/// architecture routes through translated coordinates. Implementors are
/// responsible for serialising concurrent access to the hardware.
pub trait ChipInterface: 'static {
    fn arch(&self) -> Arch;

    /// True when the chip is only reachable through another chip's ethernet links.
    fn is_remote(&self) -> bool;

    fn get_device_info(&self) -> Result<DeviceInfo, Box<dyn std::error::Error>>;

    fn read(
        &self,
        core: (u8, u8),
        addr: u64,
        data: &mut [u8],
    ) -> Result<(), Box<dyn std::error::Error>>;
    fn write(
        &self,
        core: (u8, u8),
        addr: u64,
        data: &[u8],
    ) -> Result<(), Box<dyn std::error::Error>>;

    /// Read from a chip reached over ethernet, using one of `channels` on this chip.
    fn eth_read(
        &self,
        channels: &BTreeSet<EthChannel>,
        target: EthCoord,
        core: (u8, u8),
        addr: u64,
        data: &mut [u8],
    ) -> Result<(), Box<dyn std::error::Error>>;
    fn eth_write(
        &self,
        channels: &BTreeSet<EthChannel>,
        target: EthCoord,
        core: (u8, u8),
        addr: u64,
        data: &[u8],
    ) -> Result<(), Box<dyn std::error::Error>>;

    /// Query the management firmware of a chip reached over ethernet.
    fn eth_device_info(
        &self,
        channels: &BTreeSet<EthChannel>,
        target: EthCoord,
    ) -> Result<DeviceInfo, Box<dyn std::error::Error>>;

    fn as_any(&self) -> &dyn std::any::Any;

    fn read32(&self, core: (u8, u8), addr: u64) -> Result<u32, Box<dyn std::error::Error>> {
        let mut data = [0u8; 4];
        self.read(core, addr, &mut data)?;
        Ok(u32::from_le_bytes(data))
    }

    fn read8(&self, core: (u8, u8), addr: u64) -> Result<u8, Box<dyn std::error::Error>> {
        let mut data = [0u8; 1];
        self.read(core, addr, &mut data)?;
        Ok(data[0])
    }

    fn write32(
        &self,
        core: (u8, u8),
        addr: u64,
        value: u32,
    ) -> Result<(), Box<dyn std::error::Error>> {
        self.write(core, addr, &value.to_le_bytes())
    }

    fn board_id(&self) -> Result<u64, Box<dyn std::error::Error>> {
        Ok(self.get_device_info()?.board_id)
    }

    fn harvesting_masks(&self) -> Result<HarvestingMasks, Box<dyn std::error::Error>> {
        Ok(self.get_device_info()?.harvesting_masks)
    }

    fn noc_translation_enabled(&self) -> Result<bool, Box<dyn std::error::Error>> {
        Ok(self.get_device_info()?.noc_translation_enabled)
    }

    fn fw_bundle_version(&self) -> Result<Option<u32>, Box<dyn std::error::Error>> {
        Ok(self.get_device_info()?.fw_bundle_version)
    }

    fn interface_id(&self) -> Result<Option<u32>, Box<dyn std::error::Error>> {
        Ok(self.get_device_info()?.interface_id)
    }

    fn bus_id(&self) -> Result<Option<u16>, Box<dyn std::error::Error>> {
        Ok(self.get_device_info()?.bus_id)
    }
}

/// Shared handle to a chip, as handed to discovery.
pub type ChipHandle = Arc<dyn ChipInterface + Send + Sync>;

impl ChipInterface for Arc<dyn ChipInterface + Send + Sync> {
    fn arch(&self) -> Arch {
        self.as_ref().arch()
    }

    fn is_remote(&self) -> bool {
        self.as_ref().is_remote()
    }

    fn get_device_info(&self) -> Result<DeviceInfo, Box<dyn std::error::Error>> {
        self.as_ref().get_device_info()
    }

    fn read(
        &self,
        core: (u8, u8),
        addr: u64,
        data: &mut [u8],
    ) -> Result<(), Box<dyn std::error::Error>> {
        self.as_ref().read(core, addr, data)
    }

    fn write(
        &self,
        core: (u8, u8),
        addr: u64,
        data: &[u8],
    ) -> Result<(), Box<dyn std::error::Error>> {
        self.as_ref().write(core, addr, data)
    }

    fn eth_read(
        &self,
        channels: &BTreeSet<EthChannel>,
        target: EthCoord,
        core: (u8, u8),
        addr: u64,
        data: &mut [u8],
    ) -> Result<(), Box<dyn std::error::Error>> {
        self.as_ref().eth_read(channels, target, core, addr, data)
    }

    fn eth_write(
        &self,
        channels: &BTreeSet<EthChannel>,
        target: EthCoord,
        core: (u8, u8),
        addr: u64,
        data: &[u8],
    ) -> Result<(), Box<dyn std::error::Error>> {
        self.as_ref().eth_write(channels, target, core, addr, data)
    }

    fn eth_device_info(
        &self,
        channels: &BTreeSet<EthChannel>,
        target: EthCoord,
    ) -> Result<DeviceInfo, Box<dyn std::error::Error>> {
        self.as_ref().eth_device_info(channels, target)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self.as_ref().as_any()
    }
}
