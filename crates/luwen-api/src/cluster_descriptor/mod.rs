// SPDX-FileCopyrightText: © 2023 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

//! The authoritative description of a multi-chip cluster.
//!
//! A [`ClusterDescriptor`] is produced once, by topology discovery, by
//! loading a snapshot or by [`ClusterDescriptor::mock`], and is immutable
//! afterwards. It never holds a device handle.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use luwen_def::{Arch, BoardType, ChipId, EthChannel, EthCoord, HarvestingMasks};
use serde::{Deserialize, Serialize};

use crate::error::ClusterDescriptorError;
use crate::topology::FwVersion;

mod snapshot;

pub use snapshot::{default_snapshot_path, SNAPSHOT_VERSION};

/// How the host reaches its MMIO capable chips.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IoDeviceType {
    #[default]
    #[serde(rename = "PCIe")]
    Pcie,
    #[serde(rename = "JTAG")]
    Jtag,
}

/// Everything recorded about one chip when it is added to a descriptor.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChipRecord {
    pub arch: Arch,
    pub board_type: BoardType,
    pub harvesting_masks: HarvestingMasks,
    pub noc_translation_enabled: bool,
    pub unique_id: u64,
    pub asic_location: u8,
    pub bus_id: Option<u16>,
    pub eth_coord: Option<EthCoord>,
    /// Host interface id of a chip with its own MMIO path.
    pub mmio_interface: Option<u32>,
    pub board_id: Option<u64>,
    pub num_eth_channels: usize,
    /// Only MMIO capable chips have one.
    pub pci_bdf: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClusterDescriptor {
    all_chips: BTreeSet<ChipId>,
    arch: BTreeMap<ChipId, Arch>,
    board_type: BTreeMap<ChipId, BoardType>,
    harvesting: BTreeMap<ChipId, HarvestingMasks>,
    noc_translation: BTreeMap<ChipId, bool>,
    unique_ids: BTreeMap<ChipId, u64>,
    asic_locations: BTreeMap<ChipId, u8>,
    chip_locations: BTreeMap<ChipId, EthCoord>,
    bus_ids: BTreeMap<ChipId, u16>,
    chips_with_mmio: BTreeMap<ChipId, u32>,
    chip_pci_bdfs: BTreeMap<ChipId, String>,

    board_to_chips: BTreeMap<u64, BTreeSet<ChipId>>,
    chip_to_board: BTreeMap<ChipId, u64>,

    ethernet_connections: BTreeMap<ChipId, BTreeMap<EthChannel, (ChipId, EthChannel)>>,
    ethernet_connections_to_remote_devices:
        BTreeMap<ChipId, BTreeMap<EthChannel, (u64, EthChannel)>>,
    active_eth_channels: BTreeMap<ChipId, BTreeSet<EthChannel>>,
    idle_eth_channels: BTreeMap<ChipId, BTreeSet<EthChannel>>,

    closest_mmio_chip: BTreeMap<ChipId, ChipId>,
    chips_grouped_by_closest_mmio: BTreeMap<ChipId, BTreeSet<ChipId>>,

    io_device_type: IoDeviceType,
    eth_fw_version: Option<FwVersion>,
    fw_bundle_version: Option<FwVersion>,
}

/// Mock bus ids, cycled by chip id.
const MOCK_BUS_IDS: [u16; 4] = [0xb1, 0xca, 0x31, 0x4b];
const MOCK_UNIQUE_ID_BASE: u64 = 0x5AA5_0000_0000_0000;
const MOCK_BLACKHOLE_ETH_HARVESTING: u32 = 0x120;

impl ClusterDescriptor {
    pub fn builder() -> ClusterDescriptorBuilder {
        ClusterDescriptorBuilder::default()
    }

    /// A cluster of unconnected, host attached chips.
    pub fn mock(
        chip_ids: impl IntoIterator<Item = ChipId>,
        arch: Arch,
        noc_translation_enabled: bool,
    ) -> Result<Self, ClusterDescriptorError> {
        let (board_type, harvesting_masks) = match arch {
            Arch::Wormhole => (BoardType::N150, HarvestingMasks::default()),
            Arch::Blackhole => (
                BoardType::Unknown,
                HarvestingMasks::default().with_eth(MOCK_BLACKHOLE_ETH_HARVESTING),
            ),
            Arch::Grayskull => (BoardType::Unknown, HarvestingMasks::default()),
        };
        let num_eth_channels = num_eth_channels(arch, &harvesting_masks);

        let mut builder = Self::builder();
        for chip in chip_ids {
            let bus_id = MOCK_BUS_IDS[chip as usize % MOCK_BUS_IDS.len()];
            builder.add_chip(
                chip,
                ChipRecord {
                    arch,
                    board_type,
                    harvesting_masks,
                    noc_translation_enabled,
                    unique_id: MOCK_UNIQUE_ID_BASE + chip as u64,
                    asic_location: 0,
                    bus_id: Some(bus_id),
                    eth_coord: Some(EthCoord::new(chip, 0, 0, 0)),
                    mmio_interface: Some(chip),
                    board_id: None,
                    num_eth_channels,
                    pci_bdf: Some(format!("0000:{bus_id:02x}:00.0")),
                },
            )?;
        }
        builder.build()
    }

    /// Project onto `target`: links are kept only when both ends survive,
    /// channel activity is carried over unchanged and gateways are
    /// recomputed on the smaller graph.
    pub fn constrained(&self, target: &BTreeSet<ChipId>) -> Result<Self, ClusterDescriptorError> {
        if let Some(missing) = target.iter().find(|chip| !self.all_chips.contains(chip)) {
            return Err(ClusterDescriptorError::UnknownChip(*missing));
        }

        fn keep<V: Clone>(
            map: &BTreeMap<ChipId, V>,
            target: &BTreeSet<ChipId>,
        ) -> BTreeMap<ChipId, V> {
            map.iter()
                .filter(|(chip, _)| target.contains(chip))
                .map(|(chip, value)| (*chip, value.clone()))
                .collect()
        }

        let ethernet_connections = self
            .ethernet_connections
            .iter()
            .filter(|(chip, _)| target.contains(chip))
            .map(|(chip, links)| {
                let links = links
                    .iter()
                    .filter(|(_, (remote, _))| target.contains(remote))
                    .map(|(channel, remote)| (*channel, *remote))
                    .collect::<BTreeMap<_, _>>();
                (*chip, links)
            })
            .filter(|(_, links)| !links.is_empty())
            .collect();

        let board_to_chips = self
            .board_to_chips
            .iter()
            .map(|(board, chips)| (*board, chips & target))
            .filter(|(_, chips)| !chips.is_empty())
            .collect();

        let constrained = Self {
            all_chips: target.clone(),
            arch: keep(&self.arch, target),
            board_type: keep(&self.board_type, target),
            harvesting: keep(&self.harvesting, target),
            noc_translation: keep(&self.noc_translation, target),
            unique_ids: keep(&self.unique_ids, target),
            asic_locations: keep(&self.asic_locations, target),
            chip_locations: keep(&self.chip_locations, target),
            bus_ids: keep(&self.bus_ids, target),
            chips_with_mmio: keep(&self.chips_with_mmio, target),
            chip_pci_bdfs: keep(&self.chip_pci_bdfs, target),
            board_to_chips,
            chip_to_board: keep(&self.chip_to_board, target),
            ethernet_connections,
            ethernet_connections_to_remote_devices: keep(
                &self.ethernet_connections_to_remote_devices,
                target,
            ),
            active_eth_channels: keep(&self.active_eth_channels, target),
            idle_eth_channels: keep(&self.idle_eth_channels, target),
            closest_mmio_chip: BTreeMap::new(),
            chips_grouped_by_closest_mmio: BTreeMap::new(),
            io_device_type: self.io_device_type,
            eth_fw_version: self.eth_fw_version,
            fw_bundle_version: self.fw_bundle_version,
        };

        constrained.finish()
    }

    fn finish(mut self) -> Result<Self, ClusterDescriptorError> {
        self.compute_derived();
        self.verify()?;
        Ok(self)
    }

    fn compute_derived(&mut self) {
        self.closest_mmio_chip.clear();
        self.chips_grouped_by_closest_mmio.clear();

        for chip in &self.all_chips {
            if let Some(gateway) = self.find_closest_mmio(*chip) {
                self.closest_mmio_chip.insert(*chip, gateway);
                self.chips_grouped_by_closest_mmio
                    .entry(gateway)
                    .or_default()
                    .insert(*chip);
            }
        }
    }

    /// Breadth first over the link graph; neighbours are expanded in
    /// `(chip, channel)` order so ties always resolve the same way.
    fn find_closest_mmio(&self, start: ChipId) -> Option<ChipId> {
        let mut visited = BTreeSet::from([start]);
        let mut queue = VecDeque::from([start]);

        while let Some(chip) = queue.pop_front() {
            if self.chips_with_mmio.contains_key(&chip) {
                return Some(chip);
            }

            let mut neighbours: Vec<(ChipId, EthChannel)> = self
                .ethernet_connections
                .get(&chip)
                .map(|links| links.values().copied().collect())
                .unwrap_or_default();
            neighbours.sort_unstable();

            for (neighbour, _) in neighbours {
                if visited.insert(neighbour) {
                    queue.push_back(neighbour);
                }
            }
        }

        None
    }

    /// Check the structural invariants.
    ///
    /// Mixing architectures is an error. Everything else only produces
    /// warnings and a `false` result.
    pub fn verify(&self) -> Result<bool, ClusterDescriptorError> {
        let mut archs = self.arch.values();
        if let Some(first) = archs.next() {
            if let Some(second) = archs.find(|arch| *arch != first) {
                return Err(ClusterDescriptorError::MixedArchitectures {
                    first: *first,
                    second: *second,
                });
            }
        }

        let mut consistent = true;

        for (board_id, chips) in &self.board_to_chips {
            let board_type = chips
                .first()
                .and_then(|chip| self.board_type.get(chip))
                .copied()
                .unwrap_or_default();
            if let Some(expected) = board_type.chips_per_board() {
                if chips.len() != expected {
                    tracing::warn!(
                        board_id = %format!("{board_id:#x}"),
                        %board_type,
                        expected,
                        found = chips.len(),
                        "Unexpected number of chips on board"
                    );
                    consistent = false;
                }
            }
        }

        if !self.board_to_chips.is_empty() {
            for chip in self.all_chips.iter().filter(|c| !self.chip_to_board.contains_key(c)) {
                tracing::warn!(chip, "Chip is not assigned to any board");
                consistent = false;
            }
        }

        for chip in self.all_chips.iter().filter(|c| !self.closest_mmio_chip.contains_key(c)) {
            tracing::warn!(chip, "Chip has no path to an MMIO capable chip");
            consistent = false;
        }

        Ok(consistent)
    }

    pub fn chips(&self) -> &BTreeSet<ChipId> {
        &self.all_chips
    }

    pub fn number_of_chips(&self) -> usize {
        self.all_chips.len()
    }

    /// MMIO capable chips and their host interface ids.
    pub fn chips_with_mmio(&self) -> &BTreeMap<ChipId, u32> {
        &self.chips_with_mmio
    }

    pub fn is_chip_mmio_capable(&self, chip: ChipId) -> bool {
        self.chips_with_mmio.contains_key(&chip)
    }

    pub fn is_chip_remote(&self, chip: ChipId) -> bool {
        !self.is_chip_mmio_capable(chip)
    }

    pub fn arch(&self, chip: ChipId) -> Result<Arch, ClusterDescriptorError> {
        self.arch
            .get(&chip)
            .copied()
            .ok_or(ClusterDescriptorError::UnknownChip(chip))
    }

    pub fn arch_of_cluster(&self) -> Result<Arch, ClusterDescriptorError> {
        self.arch
            .values()
            .next()
            .copied()
            .ok_or(ClusterDescriptorError::Empty)
    }

    pub fn board_type(&self, chip: ChipId) -> Result<BoardType, ClusterDescriptorError> {
        self.board_type
            .get(&chip)
            .copied()
            .ok_or(ClusterDescriptorError::UnknownChip(chip))
    }

    /// All zero for chips without harvesting information.
    pub fn harvesting_masks(&self, chip: ChipId) -> HarvestingMasks {
        self.harvesting.get(&chip).copied().unwrap_or_default()
    }

    pub fn noc_translation_enabled(&self, chip: ChipId) -> bool {
        self.noc_translation.get(&chip).copied().unwrap_or(false)
    }

    pub fn unique_id(&self, chip: ChipId) -> Option<u64> {
        self.unique_ids.get(&chip).copied()
    }

    pub fn unique_ids(&self) -> &BTreeMap<ChipId, u64> {
        &self.unique_ids
    }

    pub fn asic_location(&self, chip: ChipId) -> u8 {
        self.asic_locations.get(&chip).copied().unwrap_or(0)
    }

    pub fn bus_id(&self, chip: ChipId) -> Option<u16> {
        self.bus_ids.get(&chip).copied()
    }

    pub fn pci_bdf(&self, chip: ChipId) -> Option<&str> {
        self.chip_pci_bdfs.get(&chip).map(String::as_str)
    }

    pub fn chip_pci_bdfs(&self) -> &BTreeMap<ChipId, String> {
        &self.chip_pci_bdfs
    }

    /// ETH firmware version every chip of the cluster runs.
    pub fn eth_fw_version(&self) -> Option<FwVersion> {
        self.eth_fw_version
    }

    pub fn fw_bundle_version(&self) -> Option<FwVersion> {
        self.fw_bundle_version
    }

    pub fn chip_location(&self, chip: ChipId) -> Option<EthCoord> {
        self.chip_locations.get(&chip).copied()
    }

    pub fn chip_locations(&self) -> &BTreeMap<ChipId, EthCoord> {
        &self.chip_locations
    }

    pub fn io_device_type(&self) -> IoDeviceType {
        self.io_device_type
    }

    pub fn ethernet_connections(
        &self,
    ) -> &BTreeMap<ChipId, BTreeMap<EthChannel, (ChipId, EthChannel)>> {
        &self.ethernet_connections
    }

    pub fn ethernet_connections_to_remote_devices(
        &self,
    ) -> &BTreeMap<ChipId, BTreeMap<EthChannel, (u64, EthChannel)>> {
        &self.ethernet_connections_to_remote_devices
    }

    pub fn ethernet_core_has_active_link(&self, chip: ChipId, channel: EthChannel) -> bool {
        self.ethernet_connections
            .get(&chip)
            .is_some_and(|links| links.contains_key(&channel))
            || self
                .ethernet_connections_to_remote_devices
                .get(&chip)
                .is_some_and(|links| links.contains_key(&channel))
    }

    pub fn remote_chip_and_channel(
        &self,
        chip: ChipId,
        channel: EthChannel,
    ) -> Option<(ChipId, EthChannel)> {
        self.ethernet_connections
            .get(&chip)?
            .get(&channel)
            .copied()
    }

    /// `(channel on a, channel on b)` for every link between the two chips.
    pub fn directly_connected_channels(
        &self,
        a: ChipId,
        b: ChipId,
    ) -> Vec<(EthChannel, EthChannel)> {
        self.ethernet_connections
            .get(&a)
            .map(|links| {
                links
                    .iter()
                    .filter(|(_, (remote, _))| *remote == b)
                    .map(|(channel, (_, remote_channel))| (*channel, *remote_channel))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn active_eth_channels(&self, chip: ChipId) -> BTreeSet<EthChannel> {
        self.active_eth_channels
            .get(&chip)
            .cloned()
            .unwrap_or_default()
    }

    pub fn idle_eth_channels(&self, chip: ChipId) -> BTreeSet<EthChannel> {
        self.idle_eth_channels
            .get(&chip)
            .cloned()
            .unwrap_or_default()
    }

    pub fn closest_mmio_capable_chip(&self, chip: ChipId) -> Option<ChipId> {
        self.closest_mmio_chip.get(&chip).copied()
    }

    pub fn chips_grouped_by_closest_mmio(&self) -> &BTreeMap<ChipId, BTreeSet<ChipId>> {
        &self.chips_grouped_by_closest_mmio
    }

    /// `chips` reordered so MMIO capable chips come first, each half in id order.
    pub fn chips_local_first(
        &self,
        chips: impl IntoIterator<Item = ChipId>,
    ) -> Result<Vec<ChipId>, ClusterDescriptorError> {
        let chips = chips.into_iter().collect::<BTreeSet<_>>();
        if let Some(unknown) = chips.iter().find(|chip| !self.all_chips.contains(chip)) {
            return Err(ClusterDescriptorError::UnknownChip(*unknown));
        }

        let (mut local, remote): (Vec<_>, Vec<_>) = chips
            .into_iter()
            .partition(|chip| self.is_chip_mmio_capable(*chip));
        local.extend(remote);
        Ok(local)
    }

    pub fn board_id_for_chip(&self, chip: ChipId) -> Result<u64, ClusterDescriptorError> {
        self.chip_to_board
            .get(&chip)
            .copied()
            .ok_or(ClusterDescriptorError::UnknownChip(chip))
    }

    pub fn board_chips(&self, board_id: u64) -> Result<&BTreeSet<ChipId>, ClusterDescriptorError> {
        self.board_to_chips
            .get(&board_id)
            .ok_or(ClusterDescriptorError::UnknownBoard(board_id))
    }

    pub fn boards(&self) -> &BTreeMap<u64, BTreeSet<ChipId>> {
        &self.board_to_chips
    }
}

/// Ethernet channels left on a chip of `arch` after harvesting.
pub(crate) fn num_eth_channels(arch: Arch, masks: &HarvestingMasks) -> usize {
    let total = luwen_coord::SocLayout::get(arch).eth_cores.len();
    total.saturating_sub(masks.eth.count_ones() as usize)
}

/// Accumulates chips and links, then derives everything else in
/// [`ClusterDescriptorBuilder::build`].
#[derive(Debug, Default)]
pub struct ClusterDescriptorBuilder {
    descriptor: ClusterDescriptor,
    num_eth_channels: BTreeMap<ChipId, usize>,
}

impl ClusterDescriptorBuilder {
    pub fn io_device_type(&mut self, io_device_type: IoDeviceType) -> &mut Self {
        self.descriptor.io_device_type = io_device_type;
        self
    }

    pub fn eth_fw_version(&mut self, version: Option<FwVersion>) -> &mut Self {
        self.descriptor.eth_fw_version = version;
        self
    }

    pub fn fw_bundle_version(&mut self, version: Option<FwVersion>) -> &mut Self {
        self.descriptor.fw_bundle_version = version;
        self
    }

    pub fn add_chip(
        &mut self,
        chip: ChipId,
        record: ChipRecord,
    ) -> Result<&mut Self, ClusterDescriptorError> {
        let d = &mut self.descriptor;
        if record.pci_bdf.is_some() && record.mmio_interface.is_none() {
            return Err(ClusterDescriptorError::Invalid(format!(
                "chip {chip} has a PCI BDF but is not MMIO mapped"
            )));
        }
        if !d.all_chips.insert(chip) {
            return Err(ClusterDescriptorError::Invalid(format!(
                "chip {chip} added twice"
            )));
        }

        d.arch.insert(chip, record.arch);
        d.board_type.insert(chip, record.board_type);
        d.harvesting.insert(chip, record.harvesting_masks);
        d.noc_translation.insert(chip, record.noc_translation_enabled);
        d.unique_ids.insert(chip, record.unique_id);
        d.asic_locations.insert(chip, record.asic_location);
        if let Some(bus_id) = record.bus_id {
            d.bus_ids.insert(chip, bus_id);
        }
        if let Some(eth_coord) = record.eth_coord {
            d.chip_locations.insert(chip, eth_coord);
        }
        if let Some(interface) = record.mmio_interface {
            d.chips_with_mmio.insert(chip, interface);
        }
        if let Some(bdf) = record.pci_bdf {
            d.chip_pci_bdfs.insert(chip, bdf);
        }
        if let Some(board_id) = record.board_id {
            d.chip_to_board.insert(chip, board_id);
            d.board_to_chips.entry(board_id).or_default().insert(chip);
        }
        self.num_eth_channels.insert(chip, record.num_eth_channels);

        Ok(self)
    }

    fn check_known(&self, chip: ChipId) -> Result<(), ClusterDescriptorError> {
        if self.descriptor.all_chips.contains(&chip) {
            Ok(())
        } else {
            Err(ClusterDescriptorError::UnknownChip(chip))
        }
    }

    fn insert_directed(
        &mut self,
        (chip, channel): (ChipId, EthChannel),
        remote: (ChipId, EthChannel),
    ) -> Result<(), ClusterDescriptorError> {
        let links = self
            .descriptor
            .ethernet_connections
            .entry(chip)
            .or_default();
        match links.get(&channel) {
            Some(existing) if *existing != remote => Err(ClusterDescriptorError::AsymmetricLink {
                chip,
                channel,
                first: *existing,
                second: remote,
            }),
            _ => {
                links.insert(channel, remote);
                self.mark_active(chip, channel);
                Ok(())
            }
        }
    }

    /// Record a link between two chips of the cluster, in both directions.
    ///
    /// Adding the same link again is a no-op; reusing a channel for a
    /// different peer is an error.
    pub fn add_link(
        &mut self,
        a: (ChipId, EthChannel),
        b: (ChipId, EthChannel),
    ) -> Result<&mut Self, ClusterDescriptorError> {
        self.check_known(a.0)?;
        self.check_known(b.0)?;
        self.insert_directed(a, b)?;
        self.insert_directed(b, a)?;
        Ok(self)
    }

    /// Record a link to a chip outside the cluster, identified by its unique id.
    pub fn add_external_link(
        &mut self,
        (chip, channel): (ChipId, EthChannel),
        remote: (u64, EthChannel),
    ) -> Result<&mut Self, ClusterDescriptorError> {
        self.check_known(chip)?;
        self.descriptor
            .ethernet_connections_to_remote_devices
            .entry(chip)
            .or_default()
            .insert(channel, remote);
        self.mark_active(chip, channel);
        Ok(self)
    }

    pub fn mark_active(&mut self, chip: ChipId, channel: EthChannel) -> &mut Self {
        self.descriptor
            .active_eth_channels
            .entry(chip)
            .or_default()
            .insert(channel);
        self
    }

    pub fn build(mut self) -> Result<ClusterDescriptor, ClusterDescriptorError> {
        for (chip, count) in &self.num_eth_channels {
            let active = self.descriptor.active_eth_channels.entry(*chip).or_default();
            let idle = (0..*count as EthChannel)
                .filter(|channel| !active.contains(channel))
                .collect();
            self.descriptor.idle_eth_channels.insert(*chip, idle);
        }

        self.descriptor.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(arch: Arch, mmio: Option<u32>) -> ChipRecord {
        ChipRecord {
            arch,
            board_type: BoardType::N300,
            unique_id: 0x100 + mmio.unwrap_or(0x10) as u64,
            mmio_interface: mmio,
            num_eth_channels: 16,
            ..Default::default()
        }
    }

    /// 0 and 2 are host attached; 1 hangs off 0 and 3 hangs off 1.
    fn chain() -> ClusterDescriptor {
        let mut builder = ClusterDescriptor::builder();
        builder.add_chip(0, record(Arch::Wormhole, Some(0))).unwrap();
        builder.add_chip(1, record(Arch::Wormhole, None)).unwrap();
        builder.add_chip(2, record(Arch::Wormhole, Some(1))).unwrap();
        builder.add_chip(3, record(Arch::Wormhole, None)).unwrap();
        builder.add_link((0, 8), (1, 0)).unwrap();
        builder.add_link((0, 9), (1, 1)).unwrap();
        builder.add_link((1, 6), (3, 7)).unwrap();
        builder.add_external_link((2, 4), (0xdead, 5)).unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn test_links_are_symmetric() {
        let desc = chain();
        assert_eq!(desc.remote_chip_and_channel(0, 8), Some((1, 0)));
        assert_eq!(desc.remote_chip_and_channel(1, 0), Some((0, 8)));
        assert_eq!(desc.directly_connected_channels(0, 1), vec![(8, 0), (9, 1)]);
        assert_eq!(desc.directly_connected_channels(1, 0), vec![(0, 8), (1, 9)]);
        assert!(desc.directly_connected_channels(0, 3).is_empty());
    }

    #[test]
    fn test_active_and_idle_partition_channels() {
        let desc = chain();
        assert_eq!(desc.active_eth_channels(1), BTreeSet::from([0, 1, 6]));
        assert!(desc.ethernet_core_has_active_link(2, 4));
        assert!(!desc.ethernet_core_has_active_link(2, 5));

        for chip in desc.chips() {
            let active = desc.active_eth_channels(*chip);
            let idle = desc.idle_eth_channels(*chip);
            assert!(active.is_disjoint(&idle));
            assert_eq!(active.len() + idle.len(), 16);
        }
    }

    #[test]
    fn test_closest_mmio() {
        let desc = chain();
        assert_eq!(desc.closest_mmio_capable_chip(0), Some(0));
        assert_eq!(desc.closest_mmio_capable_chip(1), Some(0));
        assert_eq!(desc.closest_mmio_capable_chip(3), Some(0));
        assert_eq!(desc.closest_mmio_capable_chip(2), Some(2));
        assert_eq!(
            desc.chips_grouped_by_closest_mmio(),
            &BTreeMap::from([(0, BTreeSet::from([0, 1, 3])), (2, BTreeSet::from([2]))])
        );
        assert_eq!(desc.chips_local_first([3, 2, 1, 0]).unwrap(), vec![0, 2, 1, 3]);
        assert!(matches!(
            desc.chips_local_first([7]),
            Err(ClusterDescriptorError::UnknownChip(7))
        ));
    }

    #[test]
    fn test_closest_mmio_tie_breaks_on_chip_id() {
        let mut builder = ClusterDescriptor::builder();
        builder.add_chip(0, record(Arch::Wormhole, Some(0))).unwrap();
        builder.add_chip(1, record(Arch::Wormhole, Some(1))).unwrap();
        builder.add_chip(2, record(Arch::Wormhole, None)).unwrap();
        builder.add_link((2, 0), (1, 0)).unwrap();
        builder.add_link((2, 1), (0, 0)).unwrap();
        let desc = builder.build().unwrap();

        assert_eq!(desc.closest_mmio_capable_chip(2), Some(0));
    }

    #[test]
    fn test_conflicting_link_rejected() {
        let mut builder = ClusterDescriptor::builder();
        builder.add_chip(0, record(Arch::Wormhole, Some(0))).unwrap();
        builder.add_chip(1, record(Arch::Wormhole, None)).unwrap();
        builder.add_link((0, 0), (1, 0)).unwrap();
        builder.add_link((0, 0), (1, 0)).unwrap();

        assert!(matches!(
            builder.add_link((0, 0), (1, 1)),
            Err(ClusterDescriptorError::AsymmetricLink { chip: 0, channel: 0, .. })
        ));
        assert!(matches!(
            builder.add_link((0, 2), (5, 0)),
            Err(ClusterDescriptorError::UnknownChip(5))
        ));
    }

    #[test]
    fn test_mixed_architectures_rejected() {
        let mut builder = ClusterDescriptor::builder();
        builder.add_chip(0, record(Arch::Wormhole, Some(0))).unwrap();
        builder.add_chip(1, record(Arch::Blackhole, Some(1))).unwrap();
        assert!(matches!(
            builder.build(),
            Err(ClusterDescriptorError::MixedArchitectures { .. })
        ));
    }

    #[test]
    fn test_verify_warnings() {
        let desc = chain();
        // No board information at all is fine.
        assert!(desc.verify().unwrap());

        let mut builder = ClusterDescriptor::builder();
        let mut lonely = record(Arch::Wormhole, None);
        lonely.board_id = Some(0x14 << 36);
        builder.add_chip(0, lonely).unwrap();
        let desc = builder.build().unwrap();

        // Half an n300 with no gateway.
        assert!(!desc.verify().unwrap());
        assert_eq!(desc.closest_mmio_capable_chip(0), None);
        assert_eq!(desc.board_chips(0x14 << 36).unwrap(), &BTreeSet::from([0]));
        assert!(matches!(
            desc.board_chips(1),
            Err(ClusterDescriptorError::UnknownBoard(1))
        ));
    }

    #[test]
    fn test_mock() {
        let desc = ClusterDescriptor::mock([0, 1, 2, 3, 4], Arch::Wormhole, false).unwrap();
        assert_eq!(desc.number_of_chips(), 5);
        for chip in desc.chips() {
            assert!(desc.is_chip_mmio_capable(*chip));
            assert_eq!(desc.closest_mmio_capable_chip(*chip), Some(*chip));
            assert_eq!(desc.board_type(*chip).unwrap(), BoardType::N150);
            assert_eq!(desc.unique_id(*chip), Some(0x5AA5000000000000 + *chip as u64));
            assert_eq!(desc.idle_eth_channels(*chip).len(), 16);
        }
        assert_eq!(desc.bus_id(4), Some(0xb1));
        assert_eq!(desc.bus_id(2), Some(0x31));
        assert_eq!(desc.chips_with_mmio().get(&3), Some(&3));
        assert_eq!(desc.pci_bdf(1), Some("0000:ca:00.0"));

        let bh = ClusterDescriptor::mock([0], Arch::Blackhole, true).unwrap();
        assert_eq!(bh.harvesting_masks(0).eth, 0x120);
        assert_eq!(bh.idle_eth_channels(0).len(), 12);
        assert!(bh.noc_translation_enabled(0));
        assert_eq!(bh.arch_of_cluster().unwrap(), Arch::Blackhole);
    }

    #[test]
    fn test_constrained() {
        let desc = chain();
        let small = desc.constrained(&BTreeSet::from([1, 3])).unwrap();

        assert_eq!(small.chips(), &BTreeSet::from([1, 3]));
        assert_eq!(small.remote_chip_and_channel(1, 6), Some((3, 7)));
        assert_eq!(small.remote_chip_and_channel(1, 0), None);
        // Links into dropped chips stay marked active.
        assert_eq!(small.active_eth_channels(1), desc.active_eth_channels(1));
        assert_eq!(small.idle_eth_channels(1), desc.idle_eth_channels(1));
        assert_eq!(small.closest_mmio_capable_chip(3), None);
        assert!(small.chips_grouped_by_closest_mmio().is_empty());

        assert!(matches!(
            desc.constrained(&BTreeSet::from([9])),
            Err(ClusterDescriptorError::UnknownChip(9))
        ));
    }

    #[test]
    fn test_pci_bdfs_and_firmware_versions() {
        let mut builder = ClusterDescriptor::builder();
        for (chip, mmio) in [(0, Some(0)), (1, None), (2, Some(1))] {
            let mut chip_record = record(Arch::Wormhole, mmio);
            chip_record.pci_bdf = mmio.map(|iface| format!("0000:{:02x}:00.0", 0xb1 + iface));
            builder.add_chip(chip, chip_record).unwrap();
        }
        builder.add_link((0, 8), (1, 0)).unwrap();
        builder
            .eth_fw_version(Some(FwVersion::new(6, 14, 0)))
            .fw_bundle_version(Some(FwVersion::new(18, 3, 0)));
        let desc = builder.build().unwrap();

        assert_eq!(desc.pci_bdf(0), Some("0000:b1:00.0"));
        assert_eq!(desc.pci_bdf(1), None);
        assert_eq!(desc.pci_bdf(2), Some("0000:b2:00.0"));

        let small = desc.constrained(&BTreeSet::from([0, 1])).unwrap();
        assert_eq!(
            small.chip_pci_bdfs(),
            &BTreeMap::from([(0, "0000:b1:00.0".to_string())])
        );
        assert_eq!(small.eth_fw_version(), Some(FwVersion::new(6, 14, 0)));
        assert_eq!(small.fw_bundle_version(), Some(FwVersion::new(18, 3, 0)));

        let mut builder = ClusterDescriptor::builder();
        let mut remote = record(Arch::Wormhole, None);
        remote.pci_bdf = Some("0000:b1:00.0".to_string());
        assert!(matches!(
            builder.add_chip(0, remote),
            Err(ClusterDescriptorError::Invalid(_))
        ));
    }

    #[test]
    fn test_empty_cluster() {
        let desc = ClusterDescriptor::builder().build().unwrap();
        assert_eq!(desc.number_of_chips(), 0);
        assert!(matches!(
            desc.arch_of_cluster(),
            Err(ClusterDescriptorError::Empty)
        ));
    }
}
