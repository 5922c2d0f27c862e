// SPDX-FileCopyrightText: © 2023 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use luwen_def::{Arch, BoardType, ChipId, EthChannel, EthCoord, HarvestingMasks};
use serde::{Deserialize, Serialize};

use super::{num_eth_channels, ChipRecord, ClusterDescriptor, IoDeviceType};
use crate::error::ClusterDescriptorError;
use crate::topology::FwVersion;

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct Endpoint {
    chip: ChipId,
    chan: EthChannel,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct RemoteEndpoint {
    remote_chip_id: u64,
    chan: EthChannel,
}

/// Older files carry link attributes such as `{routing_enabled: true}`
/// after the two endpoints.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum LinkEntry {
    Endpoint(Endpoint),
    Attributes(serde_yaml::Value),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum MmioEntry {
    Mapped(BTreeMap<ChipId, u32>),
    Plain(ChipId),
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
struct HarvestingEntry {
    #[serde(default)]
    noc_translation: bool,
    #[serde(default)]
    harvest_mask: u32,
    #[serde(default)]
    dram_harvesting_mask: u32,
    #[serde(default)]
    eth_harvesting_mask: u32,
    #[serde(default)]
    pcie_harvesting_mask: u32,
    #[serde(default)]
    l2cpu_harvesting_mask: u32,
}

impl HarvestingEntry {
    fn masks(&self) -> HarvestingMasks {
        HarvestingMasks {
            tensix: self.harvest_mask,
            dram: self.dram_harvesting_mask,
            eth: self.eth_harvesting_mask,
            pcie: self.pcie_harvesting_mask,
            l2cpu: self.l2cpu_harvesting_mask,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum BoardField {
    Id { board_id: u64 },
    Type { board_type: String },
    Chips { chips: Vec<ChipId> },
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<u32>,
    arch: BTreeMap<ChipId, String>,
    #[serde(default)]
    chips: BTreeMap<ChipId, Vec<u32>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    chip_unique_ids: BTreeMap<ChipId, u64>,
    #[serde(default)]
    ethernet_connections: Vec<Vec<LinkEntry>>,
    #[serde(default)]
    ethernet_connections_to_remote_devices: Vec<(Endpoint, RemoteEndpoint)>,
    #[serde(default)]
    chips_with_mmio: Vec<MmioEntry>,
    #[serde(default)]
    io_device_type: IoDeviceType,
    #[serde(default)]
    harvesting: BTreeMap<ChipId, HarvestingEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    chip_to_boardtype: Option<BTreeMap<ChipId, String>>,
    /// Unversioned files name the board type map `boardtype`.
    #[serde(default, skip_serializing)]
    boardtype: Option<BTreeMap<ChipId, Option<String>>>,
    #[serde(default)]
    chip_to_bus_id: BTreeMap<ChipId, String>,
    #[serde(default)]
    boards: Vec<Vec<BoardField>>,
    #[serde(default)]
    asic_locations: BTreeMap<ChipId, u8>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    chip_pci_bdfs: BTreeMap<ChipId, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    eth_fw_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fw_bundle_version: Option<String>,
}

fn invalid(msg: impl Into<String>) -> ClusterDescriptorError {
    ClusterDescriptorError::Invalid(msg.into())
}

fn parse_board_type(chip: ChipId, name: Option<&str>) -> BoardType {
    let Some(name) = name else {
        return BoardType::Unknown;
    };
    name.parse().unwrap_or_else(|err| {
        tracing::warn!(chip, %err, "Treating board type as unknown");
        BoardType::Unknown
    })
}

fn parse_bus_id(chip: ChipId, value: &str) -> Result<u16, ClusterDescriptorError> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| invalid(format!("bus id {value:?} of chip {chip} is missing 0x")))?;
    u16::from_str_radix(digits, 16)
        .map_err(|err| invalid(format!("bus id {value:?} of chip {chip}: {err}")))
}

fn parse_version(key: &str, value: Option<&str>) -> Result<Option<FwVersion>, ClusterDescriptorError> {
    value
        .map(|value| {
            value
                .parse()
                .map_err(|err| invalid(format!("{key}: {err}")))
        })
        .transpose()
}

struct Board {
    id: u64,
    board_type: Option<String>,
    chips: Vec<ChipId>,
}

fn parse_board(fields: Vec<BoardField>) -> Result<Board, ClusterDescriptorError> {
    let mut id = None;
    let mut board_type = None;
    let mut chips = Vec::new();
    for field in fields {
        match field {
            BoardField::Id { board_id } => id = Some(board_id),
            BoardField::Type { board_type: name } => board_type = Some(name),
            BoardField::Chips { chips: ids } => chips = ids,
        }
    }
    Ok(Board {
        id: id.ok_or_else(|| invalid("board entry without a board_id"))?,
        board_type,
        chips,
    })
}

impl Snapshot {
    fn into_descriptor(self) -> Result<ClusterDescriptor, ClusterDescriptorError> {
        if let Some(version) = self.version {
            if version > SNAPSHOT_VERSION {
                return Err(invalid(format!(
                    "snapshot version {version} is newer than supported version {SNAPSHOT_VERSION}"
                )));
            }
        }

        let mut arch = BTreeMap::new();
        for (chip, name) in &self.arch {
            let parsed = name
                .parse::<Arch>()
                .map_err(|err| invalid(format!("unknown arch {err:?} for chip {chip}")))?;
            arch.insert(*chip, parsed);
        }

        let mut locations = BTreeMap::new();
        for (chip, coord) in &self.chips {
            let [x, y, rack, shelf] = coord[..] else {
                return Err(invalid(format!(
                    "chip {chip} location must be [x, y, rack, shelf], got {coord:?}"
                )));
            };
            locations.insert(*chip, EthCoord::new(x, y, rack, shelf));
        }

        let mut mmio = BTreeMap::new();
        for entry in &self.chips_with_mmio {
            match entry {
                MmioEntry::Mapped(map) => mmio.extend(map.iter().map(|(c, i)| (*c, *i))),
                MmioEntry::Plain(chip) => {
                    mmio.insert(*chip, *chip);
                }
            }
        }

        let mut chip_board = BTreeMap::new();
        let mut board_types = BTreeMap::new();
        for fields in self.boards {
            let board = parse_board(fields)?;
            for chip in board.chips {
                chip_board.insert(chip, board.id);
                if let Some(name) = &board.board_type {
                    board_types.insert(chip, parse_board_type(chip, Some(name)));
                }
            }
        }

        // Per chip entries win over the board level type.
        if let Some(types) = &self.chip_to_boardtype {
            for (chip, name) in types {
                board_types.insert(*chip, parse_board_type(*chip, Some(name)));
            }
        } else if let Some(types) = &self.boardtype {
            for (chip, name) in types {
                board_types.insert(*chip, parse_board_type(*chip, name.as_deref()));
            }
        }

        let mut bus_ids = BTreeMap::new();
        for (chip, value) in &self.chip_to_bus_id {
            bus_ids.insert(*chip, parse_bus_id(*chip, value)?);
        }

        let eth_fw_version = parse_version("eth_fw_version", self.eth_fw_version.as_deref())?;
        let fw_bundle_version =
            parse_version("fw_bundle_version", self.fw_bundle_version.as_deref())?;

        let known = arch.keys().copied().collect::<BTreeSet<_>>();
        let referenced = mmio
            .keys()
            .chain(chip_board.keys())
            .chain(locations.keys())
            .chain(self.harvesting.keys())
            .chain(self.chip_pci_bdfs.keys());
        for chip in referenced {
            if !known.contains(chip) {
                return Err(ClusterDescriptorError::UnknownChip(*chip));
            }
        }

        let mut builder = ClusterDescriptor::builder();
        builder
            .io_device_type(self.io_device_type)
            .eth_fw_version(eth_fw_version)
            .fw_bundle_version(fw_bundle_version);

        for (chip, chip_arch) in &arch {
            let harvesting = self.harvesting.get(chip).copied().unwrap_or_default();
            let masks = harvesting.masks();
            builder.add_chip(
                *chip,
                ChipRecord {
                    arch: *chip_arch,
                    board_type: board_types.get(chip).copied().unwrap_or_default(),
                    harvesting_masks: masks,
                    noc_translation_enabled: harvesting.noc_translation,
                    // Files without unique ids still need distinct ones.
                    unique_id: self
                        .chip_unique_ids
                        .get(chip)
                        .copied()
                        .unwrap_or((*chip as u64) << 32),
                    asic_location: self.asic_locations.get(chip).copied().unwrap_or(0),
                    bus_id: bus_ids.get(chip).copied(),
                    eth_coord: locations.get(chip).copied(),
                    mmio_interface: mmio.get(chip).copied(),
                    board_id: chip_board.get(chip).copied(),
                    num_eth_channels: num_eth_channels(*chip_arch, &masks),
                    pci_bdf: self.chip_pci_bdfs.get(chip).cloned(),
                },
            )?;
        }

        for entry in self.ethernet_connections {
            let endpoints = entry
                .iter()
                .filter_map(|e| match e {
                    LinkEntry::Endpoint(endpoint) => Some(*endpoint),
                    LinkEntry::Attributes(_) => None,
                })
                .collect::<Vec<_>>();
            let [a, b] = endpoints[..] else {
                return Err(invalid(format!(
                    "ethernet connection must have two endpoints, got {}",
                    endpoints.len()
                )));
            };
            builder.add_link((a.chip, a.chan), (b.chip, b.chan))?;
        }

        for (local, remote) in self.ethernet_connections_to_remote_devices {
            builder.add_external_link(
                (local.chip, local.chan),
                (remote.remote_chip_id, remote.chan),
            )?;
        }

        builder.build()
    }

    fn from_descriptor(desc: &ClusterDescriptor) -> Self {
        let mut ethernet_connections = Vec::new();
        let mut serialized = BTreeSet::new();
        for (chip, links) in &desc.ethernet_connections {
            for (channel, (remote, remote_channel)) in links {
                if serialized.contains(&(*chip, *channel)) {
                    continue;
                }
                serialized.insert((*remote, *remote_channel));
                ethernet_connections.push(vec![
                    LinkEntry::Endpoint(Endpoint {
                        chip: *chip,
                        chan: *channel,
                    }),
                    LinkEntry::Endpoint(Endpoint {
                        chip: *remote,
                        chan: *remote_channel,
                    }),
                ]);
            }
        }

        let ethernet_connections_to_remote_devices = desc
            .ethernet_connections_to_remote_devices
            .iter()
            .flat_map(|(chip, links)| {
                links.iter().map(move |(channel, (remote, remote_channel))| {
                    (
                        Endpoint {
                            chip: *chip,
                            chan: *channel,
                        },
                        RemoteEndpoint {
                            remote_chip_id: *remote,
                            chan: *remote_channel,
                        },
                    )
                })
            })
            .collect();

        let harvesting = desc
            .harvesting
            .iter()
            .map(|(chip, masks)| {
                let entry = HarvestingEntry {
                    noc_translation: desc.noc_translation_enabled(*chip),
                    harvest_mask: masks.tensix,
                    dram_harvesting_mask: masks.dram,
                    eth_harvesting_mask: masks.eth,
                    pcie_harvesting_mask: masks.pcie,
                    l2cpu_harvesting_mask: masks.l2cpu,
                };
                (*chip, entry)
            })
            .collect();

        let boards = desc
            .board_to_chips
            .iter()
            .map(|(board_id, chips)| {
                let board_type = chips
                    .first()
                    .and_then(|chip| desc.board_type.get(chip))
                    .copied()
                    .unwrap_or_default();
                vec![
                    BoardField::Id {
                        board_id: *board_id,
                    },
                    BoardField::Type {
                        board_type: board_type.to_string(),
                    },
                    BoardField::Chips {
                        chips: chips.iter().copied().collect(),
                    },
                ]
            })
            .collect();

        Self {
            version: Some(SNAPSHOT_VERSION),
            arch: desc
                .arch
                .iter()
                .map(|(chip, arch)| (*chip, arch.as_str().to_string()))
                .collect(),
            chips: desc
                .chip_locations
                .iter()
                .map(|(chip, c)| (*chip, vec![c.x, c.y, c.rack, c.shelf]))
                .collect(),
            chip_unique_ids: desc.unique_ids.clone(),
            ethernet_connections,
            ethernet_connections_to_remote_devices,
            chips_with_mmio: desc
                .chips_with_mmio
                .iter()
                .map(|(chip, iface)| MmioEntry::Mapped(BTreeMap::from([(*chip, *iface)])))
                .collect(),
            io_device_type: desc.io_device_type,
            harvesting,
            chip_to_boardtype: Some(
                desc.board_type
                    .iter()
                    .map(|(chip, board_type)| (*chip, board_type.to_string()))
                    .collect(),
            ),
            boardtype: None,
            chip_to_bus_id: desc
                .bus_ids
                .iter()
                .map(|(chip, bus)| (*chip, format!("{bus:#06x}")))
                .collect(),
            boards,
            asic_locations: desc.asic_locations.clone(),
            chip_pci_bdfs: desc.chip_pci_bdfs.clone(),
            eth_fw_version: desc.eth_fw_version.map(|v| v.to_string()),
            fw_bundle_version: desc.fw_bundle_version.map(|v| v.to_string()),
        }
    }
}

/// Where [`ClusterDescriptor::save`] writes when no path is given.
pub fn default_snapshot_path() -> PathBuf {
    std::env::temp_dir()
        .join("luwen")
        .join("cluster_descriptor.yaml")
}

impl ClusterDescriptor {
    pub fn from_yaml(yaml: &str) -> Result<Self, ClusterDescriptorError> {
        let snapshot: Snapshot = serde_yaml::from_str(yaml)?;
        snapshot.into_descriptor()
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ClusterDescriptorError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ClusterDescriptorError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&yaml)
    }

    pub fn to_yaml(&self) -> Result<String, ClusterDescriptorError> {
        Ok(serde_yaml::to_string(&Snapshot::from_descriptor(self))?)
    }

    /// Write a snapshot to `path`, or to [`default_snapshot_path`] when no
    /// path is given. Returns the path written.
    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf, ClusterDescriptorError> {
        let path = match path {
            Some(path) if !path.as_os_str().is_empty() => path.to_path_buf(),
            _ => default_snapshot_path(),
        };
        let io_err = |source| ClusterDescriptorError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        std::fs::write(&path, self.to_yaml()?).map_err(io_err)?;

        tracing::info!(path = %path.display(), "Saved cluster descriptor");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    const LEGACY_N300: &str = r#"
arch: {
   0: Wormhole,
   1: Wormhole
}

chips: {
   0: [0,0,0,0],
   1: [1,0,0,0]
}

ethernet_connections: [
   [{chip: 0, chan: 8}, {chip: 1, chan: 0}],
   [{chip: 0, chan: 9}, {chip: 1, chan: 1}, {routing_enabled: true}]
]

chips_with_mmio:
   - 0: 0

harvesting: {
   0: {noc_translation: true, harvest_mask: 65},
   1: {noc_translation: true, harvest_mask: 5}
}

boardtype: {
   0: n300,
   1: null
}
"#;

    #[test]
    fn test_legacy_layout() {
        let desc = ClusterDescriptor::from_yaml(LEGACY_N300).unwrap();

        assert_eq!(desc.chips(), &BTreeSet::from([0, 1]));
        assert_eq!(desc.arch(1).unwrap(), Arch::Wormhole);
        assert_eq!(desc.remote_chip_and_channel(0, 9), Some((1, 1)));
        assert_eq!(desc.remote_chip_and_channel(1, 0), Some((0, 8)));
        assert!(desc.is_chip_mmio_capable(0));
        assert!(desc.is_chip_remote(1));
        assert_eq!(desc.closest_mmio_capable_chip(1), Some(0));
        assert_eq!(desc.harvesting_masks(0).tensix, 65);
        assert!(desc.noc_translation_enabled(1));
        assert_eq!(desc.board_type(0).unwrap(), BoardType::N300);
        assert_eq!(desc.board_type(1).unwrap(), BoardType::Unknown);
        assert_eq!(desc.chip_location(1), Some(EthCoord::new(1, 0, 0, 0)));

        // Synthesized so the two chips stay distinguishable.
        assert_eq!(desc.unique_id(0), Some(0));
        assert_eq!(desc.unique_id(1), Some(1 << 32));

        assert_eq!(desc.active_eth_channels(0), BTreeSet::from([8, 9]));
        assert_eq!(desc.idle_eth_channels(0).len(), 14);
    }

    #[test]
    fn test_plain_mmio_ids_and_bus_ids() {
        let yaml = r#"
arch: {0: blackhole}
chips_with_mmio: [0]
chip_to_bus_id: {0: "0x00ca"}
harvesting: {0: {noc_translation: true, harvest_mask: 0, eth_harvesting_mask: 288}}
"#;
        let desc = ClusterDescriptor::from_yaml(yaml).unwrap();
        assert_eq!(desc.chips_with_mmio().get(&0), Some(&0));
        assert_eq!(desc.bus_id(0), Some(0xca));
        assert_eq!(desc.idle_eth_channels(0).len(), 12);

        let missing_prefix = yaml.replace("0x00ca", "00ca");
        assert!(matches!(
            ClusterDescriptor::from_yaml(&missing_prefix),
            Err(ClusterDescriptorError::Invalid(_))
        ));
    }

    #[test]
    fn test_rejects_bad_snapshots() {
        let unknown_arch = "arch: {0: quasar}";
        assert!(matches!(
            ClusterDescriptor::from_yaml(unknown_arch),
            Err(ClusterDescriptorError::Invalid(_))
        ));

        let dangling = r#"
arch: {0: wormhole_b0}
ethernet_connections: [[{chip: 0, chan: 0}, {chip: 4, chan: 0}]]
"#;
        assert!(matches!(
            ClusterDescriptor::from_yaml(dangling),
            Err(ClusterDescriptorError::UnknownChip(4))
        ));

        let future = "version: 9\narch: {0: wormhole_b0}";
        assert!(matches!(
            ClusterDescriptor::from_yaml(future),
            Err(ClusterDescriptorError::Invalid(_))
        ));

        assert!(matches!(
            ClusterDescriptor::from_yaml("arch: [1, 2"),
            Err(ClusterDescriptorError::Parse(_))
        ));
    }

    #[test]
    fn test_links_written_once() {
        let desc = ClusterDescriptor::from_yaml(LEGACY_N300).unwrap();
        let snapshot = Snapshot::from_descriptor(&desc);

        assert_eq!(snapshot.ethernet_connections.len(), 2);
        let first = &snapshot.ethernet_connections[0];
        assert!(matches!(first[0], LinkEntry::Endpoint(Endpoint { chip: 0, chan: 8 })));
        assert!(matches!(first[1], LinkEntry::Endpoint(Endpoint { chip: 1, chan: 0 })));
    }

    #[test]
    fn test_save_and_load_file() {
        let desc = ClusterDescriptor::from_yaml(LEGACY_N300).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cluster.yaml");

        let written = desc.save(Some(path.as_path())).unwrap();
        assert_eq!(written, path);

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("version: 1"));
        assert!(text.contains("wormhole_b0"));
        assert!(text.contains("chip_to_boardtype"));

        let loaded = ClusterDescriptor::from_yaml_file(&path).unwrap();
        assert_eq!(loaded, desc);
    }

    #[test]
    fn test_pci_bdfs_and_firmware_versions() {
        let yaml = r#"
version: 1
arch: {0: wormhole_b0, 1: wormhole_b0}
chips_with_mmio: [{0: 0}]
ethernet_connections: [[{chip: 0, chan: 8}, {chip: 1, chan: 0}]]
chip_pci_bdfs: {0: "0000:b1:00.0"}
eth_fw_version: 6.14.0
fw_bundle_version: 18.3.0
"#;
        let desc = ClusterDescriptor::from_yaml(yaml).unwrap();
        assert_eq!(desc.pci_bdf(0), Some("0000:b1:00.0"));
        assert_eq!(desc.eth_fw_version(), Some(FwVersion::new(6, 14, 0)));
        assert_eq!(desc.fw_bundle_version(), Some(FwVersion::new(18, 3, 0)));

        let text = desc.to_yaml().unwrap();
        assert!(text.contains("chip_pci_bdfs"));
        assert_eq!(ClusterDescriptor::from_yaml(&text).unwrap(), desc);

        let remote_bdf = yaml.replace(r#"{0: "0000:b1:00.0"}"#, r#"{1: "0000:b1:00.0"}"#);
        assert!(matches!(
            ClusterDescriptor::from_yaml(&remote_bdf),
            Err(ClusterDescriptorError::Invalid(_))
        ));

        let bad_version = yaml.replace("eth_fw_version: 6.14.0", "eth_fw_version: six");
        assert!(matches!(
            ClusterDescriptor::from_yaml(&bad_version),
            Err(ClusterDescriptorError::Invalid(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            ClusterDescriptor::from_yaml_file("/nonexistent/luwen/cluster.yaml"),
            Err(ClusterDescriptorError::Io { .. })
        ));
    }

    #[test]
    #[serial]
    fn test_save_default_path() {
        let desc = ClusterDescriptor::mock([0, 1], Arch::Blackhole, true).unwrap();
        let path = desc.save(None).unwrap();
        assert_eq!(path, default_snapshot_path());

        let loaded = ClusterDescriptor::from_yaml_file(&path).unwrap();
        assert_eq!(loaded, desc);
        assert_eq!(loaded.bus_id(1), Some(0xca));
        assert_eq!(loaded.pci_bdf(1), Some("0000:ca:00.0"));
    }
}
