// SPDX-FileCopyrightText: © 2023 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

//! An in-memory ethernet fabric.
//!
//! Every chip is a sparse byte-addressed L1 image. [`MockFabric::build`]
//! lays out the ETH firmware registers the way trained links would leave
//! them, so discovery runs against it exactly as it would against hardware.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use luwen_coord::CoordinateError;
use luwen_def::{Arch, BoardType, CoordSystem, EthChannel, EthCoord, HarvestingMasks};

use super::{ChipHandle, ChipInterface, DeviceInfo};
use crate::soc::{core_xy, SocDescriptor};
use crate::topology::blackhole;
use crate::topology::wormhole::{self, EthAddresses, LocalCoordWord, RemoteRackWord, RemoteShelfWord};
use crate::topology::FwVersion;

/// Blackhole refuses any other count of harvested eth cores.
const DEFAULT_BLACKHOLE_ETH_HARVESTING: u32 = 0x120;

#[derive(Clone, Debug, Default)]
pub struct MockChipConfig {
    pub board_id: u64,
    pub asic_location: u8,
    /// Upper word of the Wormhole asic id, defaults to the asic location.
    pub asic_id_hi: Option<u32>,
    pub harvesting_masks: HarvestingMasks,
    pub noc_translation_enabled: bool,
    /// `None` makes the chip reachable only over ethernet.
    pub interface_id: Option<u32>,
    pub bus_id: Option<u16>,
    /// Defaults to `(index, 0, 0, 0)`.
    pub eth_coord: Option<EthCoord>,
    pub fw_bundle_version: Option<u32>,
    /// Raw ETH firmware version word in the generation's own encoding.
    pub eth_fw_version: Option<u32>,
    /// Board type the Wormhole firmware reports, defaults to the board id's upi.
    pub eth_board_type: Option<u32>,
}

impl MockChipConfig {
    pub fn new(board_id: u64) -> Self {
        Self {
            board_id,
            ..Default::default()
        }
    }

    pub fn asic_location(mut self, value: u8) -> Self {
        self.asic_location = value;
        self
    }

    pub fn asic_id_hi(mut self, value: u32) -> Self {
        self.asic_id_hi = Some(value);
        self
    }

    pub fn harvesting_masks(mut self, value: HarvestingMasks) -> Self {
        self.harvesting_masks = value;
        self
    }

    pub fn noc_translation_enabled(mut self, value: bool) -> Self {
        self.noc_translation_enabled = value;
        self
    }

    pub fn local(mut self, interface_id: u32) -> Self {
        self.interface_id = Some(interface_id);
        self
    }

    pub fn bus_id(mut self, value: u16) -> Self {
        self.bus_id = Some(value);
        self
    }

    pub fn eth_coord(mut self, value: EthCoord) -> Self {
        self.eth_coord = Some(value);
        self
    }

    pub fn fw_bundle_version(mut self, value: FwVersion) -> Self {
        self.fw_bundle_version = Some(value.to_bundle());
        self
    }

    pub fn eth_fw_version(mut self, value: u32) -> Self {
        self.eth_fw_version = Some(value);
        self
    }

    pub fn eth_board_type(mut self, value: u32) -> Self {
        self.eth_board_type = Some(value);
        self
    }

    fn device_info(&self, arch: Arch) -> DeviceInfo {
        let mut harvesting_masks = self.harvesting_masks;
        if arch == Arch::Blackhole && harvesting_masks.eth == 0 {
            harvesting_masks.eth = DEFAULT_BLACKHOLE_ETH_HARVESTING;
        }
        DeviceInfo {
            board_id: self.board_id,
            asic_location: self.asic_location,
            harvesting_masks,
            noc_translation_enabled: self.noc_translation_enabled,
            fw_bundle_version: self.fw_bundle_version,
            interface_id: self.interface_id,
            bus_id: self.bus_id,
            pci_bdf: self
                .interface_id
                .and(self.bus_id)
                .map(|bus| format!("0000:{bus:02x}:00.0")),
        }
    }

    fn raw_eth_fw_version(&self, arch: Arch) -> u32 {
        self.eth_fw_version.unwrap_or(match arch {
            Arch::Blackhole => FwVersion::new(1, 6, 0).to_packed(),
            _ => FwVersion::new(6, 14, 0).to_wormhole_eth(),
        })
    }

    fn wormhole_board_type(&self) -> u32 {
        self.eth_board_type
            .unwrap_or(((self.board_id >> 36) & 0xFFFFF) as u32)
    }

    fn wormhole_asic_hi(&self) -> u32 {
        self.asic_id_hi.unwrap_or(self.asic_location as u32)
    }
}

type Endpoint = (usize, EthChannel);

/// Chips and cabling of a mock cluster. Channels are logical.
pub struct MockFabric {
    arch: Arch,
    chips: Vec<MockChipConfig>,
    links: BTreeMap<Endpoint, Endpoint>,
    untrained: BTreeSet<Endpoint>,
    failing: BTreeSet<Endpoint>,
    failing_device_info: BTreeSet<usize>,
}

impl MockFabric {
    pub fn new(arch: Arch) -> Self {
        Self {
            arch,
            chips: Vec::new(),
            links: BTreeMap::new(),
            untrained: BTreeSet::new(),
            failing: BTreeSet::new(),
            failing_device_info: BTreeSet::new(),
        }
    }

    pub fn add_chip(&mut self, config: MockChipConfig) -> usize {
        self.chips.push(config);
        self.chips.len() - 1
    }

    pub fn connect(&mut self, a: Endpoint, b: Endpoint) -> &mut Self {
        self.links.insert(a, b);
        self.links.insert(b, a);
        self
    }

    /// Leave a port that never finishes training.
    pub fn set_untrained(&mut self, chip: usize, channel: EthChannel) -> &mut Self {
        self.untrained.insert((chip, channel));
        self
    }

    /// Every read of this eth core fails.
    pub fn set_failing(&mut self, chip: usize, channel: EthChannel) -> &mut Self {
        self.failing.insert((chip, channel));
        self
    }

    pub fn set_failing_device_info(&mut self, chip: usize) -> &mut Self {
        self.failing_device_info.insert(chip);
        self
    }

    pub fn build(&self) -> Result<MockCluster, CoordinateError> {
        let arch = self.arch;
        let mut chips = Vec::with_capacity(self.chips.len());
        for (index, config) in self.chips.iter().enumerate() {
            let info = config.device_info(arch);
            let soc = SocDescriptor::from_device_info(arch, &info, config.interface_id.is_none())?;
            chips.push(MockChipState {
                eth_coord: config
                    .eth_coord
                    .unwrap_or(EthCoord::new(index as u32, 0, 0, 0)),
                info,
                soc,
                memory: RwLock::new(BTreeMap::new()),
                failing_cores: BTreeSet::new(),
                fail_device_info: self.failing_device_info.contains(&index),
            });
        }

        for (index, config) in self.chips.iter().enumerate() {
            let image = match arch {
                Arch::Wormhole => self.wormhole_image(index, config, &chips)?,
                Arch::Blackhole => self.blackhole_image(index, config, &chips)?,
                Arch::Grayskull => BTreeMap::new(),
            };
            let failing_cores = self
                .failing
                .iter()
                .filter(|(chip, _)| *chip == index)
                .map(|(_, channel)| self.failing_core(&chips[index], *channel))
                .collect::<Result<BTreeSet<_>, _>>()?;

            let state = &mut chips[index];
            state.failing_cores = failing_cores.into_iter().flatten().collect();
            if let Ok(memory) = state.memory.get_mut() {
                *memory = image;
            }
        }

        Ok(MockCluster {
            configs: self.chips.clone(),
            fabric: Arc::new(FabricState { arch, chips }),
        })
    }

    fn failing_core(
        &self,
        chip: &MockChipState,
        channel: EthChannel,
    ) -> Result<Vec<(u8, u8)>, CoordinateError> {
        let mut cores = vec![core_xy(chip.soc.eth_core(channel, CoordSystem::Noc0)?)];
        cores.push(core_xy(chip.soc.eth_core(channel, CoordSystem::Translated)?));
        Ok(cores)
    }

    fn wormhole_image(
        &self,
        index: usize,
        config: &MockChipConfig,
        chips: &[MockChipState],
    ) -> Result<Memory, CoordinateError> {
        let mut image = Memory::new();
        let state = &chips[index];
        let raw_fw = config.raw_eth_fw_version(Arch::Wormhole);
        let addresses = EthAddresses::new(FwVersion::from_wormhole_eth(raw_fw));
        let local_coord = LocalCoordWord::new()
            .with_rack(state.eth_coord.rack as u8)
            .with_shelf(state.eth_coord.shelf as u8)
            .with_x(state.eth_coord.x as u8)
            .with_y(state.eth_coord.y as u8);

        for channel in 0..state.soc.num_eth_channels() as EthChannel {
            let core = core_xy(state.soc.eth_core(channel, CoordSystem::Noc0)?);

            write32(&mut image, core, wormhole::ETH_FW_VERSION_ADDR, raw_fw);
            write32(&mut image, core, addresses.local_coord(), local_coord.into());
            write32(
                &mut image,
                core,
                addresses.local_board_type(),
                config.wormhole_board_type(),
            );
            write32(
                &mut image,
                core,
                addresses.local_board_id_lo(),
                config.board_id as u32,
            );
            write32(
                &mut image,
                core,
                addresses.local_board_id_lo() + 4,
                config.wormhole_asic_hi(),
            );

            let status = if self.untrained.contains(&(index, channel)) {
                wormhole::ETH_UNKNOWN
            } else if self.links.contains_key(&(index, channel)) {
                wormhole::ETH_CONNECTED
            } else {
                wormhole::ETH_UNCONNECTED
            };
            write32(&mut image, core, addresses.port_status(channel), status);

            let Some((remote, remote_channel)) = self.links.get(&(index, channel)).copied() else {
                continue;
            };
            let remote_config = &self.chips[remote];
            let remote_state = &chips[remote];
            let remote_core = remote_state.soc.eth_core(remote_channel, CoordSystem::Noc0)?;

            write32(
                &mut image,
                core,
                addresses.remote_board_type(),
                remote_config.wormhole_board_type(),
            );
            write32(
                &mut image,
                core,
                addresses.remote_board_id_lo(),
                remote_config.board_id as u32,
            );
            write32(
                &mut image,
                core,
                addresses.remote_board_id_lo() + 4,
                remote_config.wormhole_asic_hi(),
            );
            write32(&mut image, core, addresses.remote_eth_id(), remote_channel);

            let shelf = RemoteShelfWord::new()
                .with_noc_x(remote_core.x as u8)
                .with_noc_y(remote_core.y as u8)
                .with_shelf_x(remote_state.eth_coord.x as u8)
                .with_shelf_y(remote_state.eth_coord.y as u8);
            let rack = RemoteRackWord::new()
                .with_rack(remote_state.eth_coord.rack as u8)
                .with_shelf(remote_state.eth_coord.shelf as u8);
            write32(&mut image, core, addresses.remote_shelf(), shelf.into());
            write32(&mut image, core, addresses.remote_rack(), rack.into());
        }

        Ok(image)
    }

    fn blackhole_image(
        &self,
        index: usize,
        config: &MockChipConfig,
        chips: &[MockChipState],
    ) -> Result<Memory, CoordinateError> {
        let mut image = Memory::new();
        let state = &chips[index];
        let raw_fw = config.raw_eth_fw_version(Arch::Blackhole);

        for channel in 0..state.soc.num_eth_channels() as EthChannel {
            let core = core_xy(state.soc.eth_core(channel, CoordSystem::Translated)?);
            let untrained = self.untrained.contains(&(index, channel));
            let link = self.links.get(&(index, channel)).copied();

            let (port, train) = match (untrained, link) {
                (true, _) => (blackhole::PORT_UNKNOWN, blackhole::LINK_TRAIN_TRAINING),
                (false, Some(_)) => (blackhole::PORT_UP, blackhole::LINK_TRAIN_PASS),
                (false, None) => (blackhole::PORT_UNUSED, blackhole::LINK_TRAIN_SKIP),
            };
            write8(&mut image, core, blackhole::PORT_STATUS_ADDR, port);
            write32(&mut image, core, blackhole::TRAIN_STATUS_ADDR, train);
            write32(&mut image, core, blackhole::ETH_FW_VERSION_ADDR, raw_fw);
            write_blackhole_identity(&mut image, core, blackhole::LOCAL_INFO_ADDR, config);

            let Some((remote, remote_channel)) = link else {
                continue;
            };
            let remote_soc = &chips[remote].soc;
            let remote_core = remote_soc.eth_core(remote_channel, CoordSystem::Noc0)?;
            let physical = remote_soc
                .physical_eth_channel(remote_core)
                .ok_or(CoordinateError::CoordinateNotFound {
                    coord: remote_core,
                    system: CoordSystem::Noc0,
                })?;

            let remote_info = blackhole::REMOTE_INFO_ADDR;
            write_blackhole_identity(&mut image, core, remote_info, &self.chips[remote]);
            write8(
                &mut image,
                core,
                remote_info + blackhole::ETH_ID_OFFSET,
                physical as u8,
            );
            write8(
                &mut image,
                core,
                remote_info + blackhole::LOGICAL_ETH_ID_OFFSET,
                remote_channel as u8,
            );
        }

        Ok(image)
    }
}

type Memory = BTreeMap<((u8, u8), u64), u8>;

fn write8(image: &mut Memory, core: (u8, u8), addr: u64, value: u8) {
    image.insert((core, addr), value);
}

fn write32(image: &mut Memory, core: (u8, u8), addr: u64, value: u32) {
    for (offset, byte) in value.to_le_bytes().into_iter().enumerate() {
        image.insert((core, addr + offset as u64), byte);
    }
}

fn write_blackhole_identity(image: &mut Memory, core: (u8, u8), base: u64, config: &MockChipConfig) {
    write8(
        image,
        core,
        base + blackhole::ASIC_LOCATION_OFFSET,
        config.asic_location,
    );
    write32(
        image,
        core,
        base + blackhole::BOARD_ID_HI_OFFSET,
        (config.board_id >> 32) as u32,
    );
    write32(
        image,
        core,
        base + blackhole::BOARD_ID_LO_OFFSET,
        config.board_id as u32,
    );
}

struct MockChipState {
    info: DeviceInfo,
    soc: SocDescriptor,
    eth_coord: EthCoord,
    memory: RwLock<Memory>,
    failing_cores: BTreeSet<(u8, u8)>,
    fail_device_info: bool,
}

impl MockChipState {
    fn device_info(&self) -> Result<DeviceInfo, Box<dyn std::error::Error>> {
        if self.fail_device_info {
            return Err("mock device info is unavailable".into());
        }
        Ok(self.info.clone())
    }

    fn read(&self, core: (u8, u8), addr: u64, data: &mut [u8]) -> Result<(), Box<dyn std::error::Error>> {
        if self.failing_cores.contains(&core) {
            return Err(format!("mock read of core {core:?} failed").into());
        }
        let memory = self
            .memory
            .read()
            .map_err(|_| "mock memory lock poisoned")?;
        for (offset, byte) in data.iter_mut().enumerate() {
            *byte = memory
                .get(&(core, addr + offset as u64))
                .copied()
                .unwrap_or_default();
        }
        Ok(())
    }

    fn write(&self, core: (u8, u8), addr: u64, data: &[u8]) -> Result<(), Box<dyn std::error::Error>> {
        let mut memory = self
            .memory
            .write()
            .map_err(|_| "mock memory lock poisoned")?;
        for (offset, byte) in data.iter().enumerate() {
            memory.insert((core, addr + offset as u64), *byte);
        }
        Ok(())
    }
}

struct FabricState {
    arch: Arch,
    chips: Vec<MockChipState>,
}

impl FabricState {
    fn route(
        &self,
        channels: &BTreeSet<EthChannel>,
        target: EthCoord,
    ) -> Result<&MockChipState, Box<dyn std::error::Error>> {
        if channels.is_empty() {
            return Err("no active ethernet channel to route through".into());
        }
        self.chips
            .iter()
            .find(|chip| chip.eth_coord == target)
            .ok_or_else(|| format!("no chip at {target}").into())
    }
}

/// A host attached chip of a [`MockCluster`].
pub struct MockChip {
    fabric: Arc<FabricState>,
    index: usize,
}

impl MockChip {
    fn state(&self) -> &MockChipState {
        &self.fabric.chips[self.index]
    }
}

impl ChipInterface for MockChip {
    fn arch(&self) -> Arch {
        self.fabric.arch
    }

    fn is_remote(&self) -> bool {
        false
    }

    fn get_device_info(&self) -> Result<DeviceInfo, Box<dyn std::error::Error>> {
        self.state().device_info()
    }

    fn read(
        &self,
        core: (u8, u8),
        addr: u64,
        data: &mut [u8],
    ) -> Result<(), Box<dyn std::error::Error>> {
        self.state().read(core, addr, data)
    }

    fn write(
        &self,
        core: (u8, u8),
        addr: u64,
        data: &[u8],
    ) -> Result<(), Box<dyn std::error::Error>> {
        self.state().write(core, addr, data)
    }

    fn eth_read(
        &self,
        channels: &BTreeSet<EthChannel>,
        target: EthCoord,
        core: (u8, u8),
        addr: u64,
        data: &mut [u8],
    ) -> Result<(), Box<dyn std::error::Error>> {
        self.fabric.route(channels, target)?.read(core, addr, data)
    }

    fn eth_write(
        &self,
        channels: &BTreeSet<EthChannel>,
        target: EthCoord,
        core: (u8, u8),
        addr: u64,
        data: &[u8],
    ) -> Result<(), Box<dyn std::error::Error>> {
        self.fabric.route(channels, target)?.write(core, addr, data)
    }

    fn eth_device_info(
        &self,
        channels: &BTreeSet<EthChannel>,
        target: EthCoord,
    ) -> Result<DeviceInfo, Box<dyn std::error::Error>> {
        self.fabric.route(channels, target)?.device_info()
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// A built [`MockFabric`].
pub struct MockCluster {
    configs: Vec<MockChipConfig>,
    fabric: Arc<FabricState>,
}

impl MockCluster {
    /// Handles for the host attached chips, in interface order.
    pub fn local_devices(&self) -> Vec<ChipHandle> {
        let mut local = self
            .configs
            .iter()
            .enumerate()
            .filter_map(|(index, config)| config.interface_id.map(|id| (id, index)))
            .collect::<Vec<_>>();
        local.sort();
        local
            .into_iter()
            .map(|(_, index)| self.device(index))
            .collect()
    }

    /// Direct handle to any chip of the fabric, bypassing ethernet routing.
    pub fn device(&self, index: usize) -> ChipHandle {
        Arc::new(MockChip {
            fabric: self.fabric.clone(),
            index,
        })
    }

    /// Unique id discovery assigns to the chip once one of its links is up.
    pub fn asic_id(&self, index: usize) -> u64 {
        let config = &self.configs[index];
        match self.fabric.arch {
            Arch::Blackhole => blackhole::asic_id(config.board_id, config.asic_location),
            _ => ((config.wormhole_asic_hi() as u64) << 32) | (config.board_id & 0xFFFF_FFFF),
        }
    }

    pub fn soc(&self, index: usize) -> &SocDescriptor {
        &self.fabric.chips[index].soc
    }

    pub fn board_type(&self, index: usize) -> BoardType {
        BoardType::from_board_id(self.configs[index].board_id)
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}
