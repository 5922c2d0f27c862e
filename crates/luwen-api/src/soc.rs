// SPDX-FileCopyrightText: © 2023 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

use luwen_coord::{CoordinateError, CoordinateManager, SocLayout};
use luwen_def::{Arch, BoardType, CoordSystem, CoreCoord, CoreType, EthChannel, HarvestingMasks};

use crate::chip::DeviceInfo;

/// Per chip view of the SoC: the fixed layout of its generation plus the
/// coordinate maps produced by its harvesting.
#[derive(Debug, Clone)]
pub struct SocDescriptor {
    manager: CoordinateManager,
}

impl SocDescriptor {
    pub fn new(
        arch: Arch,
        noc_translation_enabled: bool,
        masks: HarvestingMasks,
        board_type: BoardType,
        is_remote: bool,
    ) -> Result<Self, CoordinateError> {
        Ok(Self {
            manager: CoordinateManager::create(
                arch,
                noc_translation_enabled,
                masks,
                board_type,
                is_remote,
            )?,
        })
    }

    pub fn from_device_info(
        arch: Arch,
        info: &DeviceInfo,
        is_remote: bool,
    ) -> Result<Self, CoordinateError> {
        Self::new(
            arch,
            info.noc_translation_enabled,
            info.harvesting_masks,
            BoardType::from_board_id(info.board_id),
            is_remote,
        )
    }

    pub fn arch(&self) -> Arch {
        self.manager.arch()
    }

    pub fn board_type(&self) -> BoardType {
        self.manager.board_type()
    }

    pub fn harvesting_masks(&self) -> HarvestingMasks {
        self.manager.harvesting_masks()
    }

    pub fn coordinate_manager(&self) -> &CoordinateManager {
        &self.manager
    }

    pub fn layout(&self) -> &'static SocLayout {
        self.manager.layout()
    }

    pub fn translate(
        &self,
        coord: CoreCoord,
        system: CoordSystem,
    ) -> Result<CoreCoord, CoordinateError> {
        self.manager.translate(coord, system)
    }

    pub fn get_cores(
        &self,
        core_type: CoreType,
        system: CoordSystem,
    ) -> Result<Vec<CoreCoord>, CoordinateError> {
        self.manager.get_cores(core_type, system)
    }

    pub fn get_grid_size(&self, core_type: CoreType) -> Result<(usize, usize), CoordinateError> {
        self.manager.get_grid_size(core_type)
    }

    /// Unharvested ethernet cores in NOC0, indexed by logical channel.
    pub fn eth_cores(&self) -> Result<Vec<CoreCoord>, CoordinateError> {
        self.manager.get_cores(CoreType::Eth, CoordSystem::Noc0)
    }

    pub fn num_eth_channels(&self) -> usize {
        self.manager.num_eth_channels()
    }

    /// Logical channel of an ethernet core given in any physical system.
    pub fn eth_channel(&self, core: CoreCoord) -> Result<EthChannel, CoordinateError> {
        Ok(self.manager.translate(core, CoordSystem::Logical)?.y)
    }

    /// Logical channel of the ethernet core at NOC0 `(x, y)`.
    pub fn eth_channel_at_noc0(&self, x: u32, y: u32) -> Result<EthChannel, CoordinateError> {
        let core = CoreCoord::new(x, y, CoreType::Eth, CoordSystem::Noc0);
        self.eth_channel(core)
    }

    pub fn eth_core(
        &self,
        channel: EthChannel,
        system: CoordSystem,
    ) -> Result<CoreCoord, CoordinateError> {
        let logical = CoreCoord::new(0, channel, CoreType::Eth, CoordSystem::Logical);
        self.manager.translate(logical, system)
    }

    /// NOC0 core of a physical (unharvested numbering) ethernet channel.
    pub fn physical_eth_core(&self, physical_channel: u32) -> Option<CoreCoord> {
        self.layout()
            .eth_cores
            .get(physical_channel as usize)
            .map(|(x, y)| CoreCoord::new(*x, *y, CoreType::Eth, CoordSystem::Noc0))
    }

    pub fn physical_eth_channel(&self, core: CoreCoord) -> Option<u32> {
        let noc0 = self.manager.translate(core, CoordSystem::Noc0).ok()?;
        self.layout()
            .eth_cores
            .iter()
            .position(|xy| *xy == noc0.xy())
            .map(|channel| channel as u32)
    }
}

/// NOC `(x, y)` in the form the device transport expects.
pub(crate) fn core_xy(coord: CoreCoord) -> (u8, u8) {
    (coord.x as u8, coord.y as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wormhole_eth_channels() {
        let soc = SocDescriptor::new(
            Arch::Wormhole,
            false,
            HarvestingMasks::default(),
            BoardType::N300,
            false,
        )
        .unwrap();

        assert_eq!(soc.num_eth_channels(), 16);
        let cores = soc.eth_cores().unwrap();
        assert_eq!(cores.len(), 16);
        assert_eq!(cores[0].xy(), (9, 0));
        assert_eq!(soc.eth_channel_at_noc0(1, 6).unwrap(), 9);
        assert_eq!(soc.eth_core(3, CoordSystem::Noc0).unwrap().xy(), (2, 0));
        assert!(soc.eth_channel_at_noc0(5, 0).is_err());
    }

    #[test]
    fn test_blackhole_harvested_channels() {
        let soc = SocDescriptor::new(
            Arch::Blackhole,
            true,
            HarvestingMasks::default().with_eth(0x120),
            BoardType::P150,
            false,
        )
        .unwrap();

        assert_eq!(soc.num_eth_channels(), 12);

        // Physical channel 6 comes after harvested channel 5.
        let core = soc.physical_eth_core(6).unwrap();
        assert_eq!(soc.eth_channel(core).unwrap(), 5);
        assert_eq!(soc.physical_eth_channel(core), Some(6));

        // Harvested cores have no logical channel.
        let harvested = soc.physical_eth_core(5).unwrap();
        assert!(soc.eth_channel(harvested).is_err());
        assert!(soc.physical_eth_core(14).is_none());
    }
}
