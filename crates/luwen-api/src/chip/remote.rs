// SPDX-FileCopyrightText: © 2023 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeSet;

use luwen_def::{Arch, EthChannel, EthCoord};

use super::{ChipHandle, ChipInterface, DeviceInfo};

/// A chip with no host attachment, reached through a gateway chip's ethernet links.
///
/// Every access is forwarded to the gateway, which routes it to `eth_coord`
/// over one of `channels`.
pub struct RemoteChip {
    gateway: ChipHandle,
    eth_coord: EthCoord,
    channels: BTreeSet<EthChannel>,
}

impl RemoteChip {
    pub fn new(gateway: ChipHandle, eth_coord: EthCoord, channels: BTreeSet<EthChannel>) -> Self {
        Self {
            gateway,
            eth_coord,
            channels,
        }
    }

    pub fn gateway(&self) -> &ChipHandle {
        &self.gateway
    }

    pub fn eth_coord(&self) -> EthCoord {
        self.eth_coord
    }

    pub fn channels(&self) -> &BTreeSet<EthChannel> {
        &self.channels
    }
}

impl ChipInterface for RemoteChip {
    fn arch(&self) -> Arch {
        self.gateway.arch()
    }

    fn is_remote(&self) -> bool {
        true
    }

    fn get_device_info(&self) -> Result<DeviceInfo, Box<dyn std::error::Error>> {
        let mut info = self
            .gateway
            .eth_device_info(&self.channels, self.eth_coord)?;
        info.interface_id = None;
        info.bus_id = None;
        info.pci_bdf = None;
        Ok(info)
    }

    fn read(
        &self,
        core: (u8, u8),
        addr: u64,
        data: &mut [u8],
    ) -> Result<(), Box<dyn std::error::Error>> {
        self.gateway
            .eth_read(&self.channels, self.eth_coord, core, addr, data)
    }

    fn write(
        &self,
        core: (u8, u8),
        addr: u64,
        data: &[u8],
    ) -> Result<(), Box<dyn std::error::Error>> {
        self.gateway
            .eth_write(&self.channels, self.eth_coord, core, addr, data)
    }

    // Multi hop routing is resolved by the gateway, a remote chip never forwards.
    fn eth_read(
        &self,
        _channels: &BTreeSet<EthChannel>,
        target: EthCoord,
        core: (u8, u8),
        addr: u64,
        data: &mut [u8],
    ) -> Result<(), Box<dyn std::error::Error>> {
        self.gateway
            .eth_read(&self.channels, target, core, addr, data)
    }

    fn eth_write(
        &self,
        _channels: &BTreeSet<EthChannel>,
        target: EthCoord,
        core: (u8, u8),
        addr: u64,
        data: &[u8],
    ) -> Result<(), Box<dyn std::error::Error>> {
        self.gateway
            .eth_write(&self.channels, target, core, addr, data)
    }

    fn eth_device_info(
        &self,
        _channels: &BTreeSet<EthChannel>,
        target: EthCoord,
    ) -> Result<DeviceInfo, Box<dyn std::error::Error>> {
        self.gateway.eth_device_info(&self.channels, target)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
