// SPDX-FileCopyrightText: © 2023 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

//! Walks the ethernet fabric outwards from the host attached chips and
//! compiles what it finds into a [`ClusterDescriptor`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use luwen_def::{Arch, ChipId, CoreCoord, EthChannel, EthCoord};
use tracing::{debug, info, trace, warn};

use crate::chip::{ChipHandle, ChipInterface, DeviceInfo};
use crate::cluster_descriptor::{ChipRecord, ClusterDescriptor, IoDeviceType};
use crate::error::{DiscoveryError, PlatformError};
use crate::soc::{core_xy, SocDescriptor};

pub mod blackhole;
pub mod firmware;
mod strategy;
pub mod wormhole;

pub use firmware::{EthFwHash, FwVersion};
pub use strategy::DiscoveryStrategy;

/// Link state of one ethernet port as reported by its firmware.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortStatus {
    /// Not trained yet, or training failed.
    Unknown,
    /// Nothing on the other end.
    Unconnected,
    Up,
}

/// Soc descriptors of every chip seen during one discovery run, by asic id.
#[derive(Debug, Default)]
pub struct SocCache {
    socs: HashMap<u64, Arc<SocDescriptor>>,
}

impl SocCache {
    pub fn insert(&mut self, asic_id: u64, soc: SocDescriptor) -> Arc<SocDescriptor> {
        let soc = Arc::new(soc);
        self.socs.insert(asic_id, soc.clone());
        soc
    }

    pub fn get(&self, asic_id: u64) -> Option<&Arc<SocDescriptor>> {
        self.socs.get(&asic_id)
    }

    pub fn len(&self) -> usize {
        self.socs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.socs.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct TopologyDiscoveryOptions {
    /// Only describe the host attached chips; links to anything else are
    /// recorded as leaving the cluster.
    pub no_remote_discovery: bool,
    pub no_wait_for_eth_training: bool,
    /// Downgrade unsupported or mismatched ETH firmware to warnings.
    pub no_eth_firmware_strictness: bool,
    /// Take the expected ETH firmware from the firmware bundle instead of
    /// the first chip probed.
    pub predict_eth_fw_version: bool,
    pub verify_eth_fw_hash: bool,
    /// Known ETH firmware images, checked when `verify_eth_fw_hash` is set.
    pub eth_fw_hashes: BTreeMap<FwVersion, EthFwHash>,
    pub preferred_arch: Option<Arch>,
    /// Upper bound on the training poll of each chip.
    pub eth_training_timeout: Duration,
    pub io_device_type: IoDeviceType,
}

impl Default for TopologyDiscoveryOptions {
    fn default() -> Self {
        Self {
            no_remote_discovery: false,
            no_wait_for_eth_training: false,
            no_eth_firmware_strictness: false,
            predict_eth_fw_version: false,
            verify_eth_fw_hash: false,
            eth_fw_hashes: BTreeMap::new(),
            preferred_arch: None,
            eth_training_timeout: Duration::from_secs(5),
            io_device_type: IoDeviceType::Pcie,
        }
    }
}

impl TopologyDiscoveryOptions {
    pub fn no_remote_discovery(mut self, value: bool) -> Self {
        self.no_remote_discovery = value;
        self
    }

    pub fn no_wait_for_eth_training(mut self, value: bool) -> Self {
        self.no_wait_for_eth_training = value;
        self
    }

    pub fn no_eth_firmware_strictness(mut self, value: bool) -> Self {
        self.no_eth_firmware_strictness = value;
        self
    }

    pub fn predict_eth_fw_version(mut self, value: bool) -> Self {
        self.predict_eth_fw_version = value;
        self
    }

    pub fn verify_eth_fw_hash(mut self, value: bool) -> Self {
        self.verify_eth_fw_hash = value;
        self
    }

    pub fn eth_fw_hash(mut self, version: FwVersion, hash: EthFwHash) -> Self {
        self.eth_fw_hashes.insert(version, hash);
        self
    }

    pub fn preferred_arch(mut self, arch: Option<Arch>) -> Self {
        self.preferred_arch = arch;
        self
    }

    pub fn eth_training_timeout(mut self, timeout: Duration) -> Self {
        self.eth_training_timeout = timeout;
        self
    }

    pub fn io_device_type(mut self, io_device_type: IoDeviceType) -> Self {
        self.io_device_type = io_device_type;
        self
    }

    fn strict(&self) -> bool {
        !self.no_eth_firmware_strictness
    }
}

enum DiscoveryState {
    Init,
    EnumerateLocal,
    ProbeLinks,
    ExpandRemote,
    Finalize,
    Completed(ClusterDescriptor),
    Failed(DiscoveryError),
}

impl DiscoveryState {
    fn name(&self) -> &'static str {
        match self {
            DiscoveryState::Init => "init",
            DiscoveryState::EnumerateLocal => "enumerate_local",
            DiscoveryState::ProbeLinks => "probe_links",
            DiscoveryState::ExpandRemote => "expand_remote",
            DiscoveryState::Finalize => "finalize",
            DiscoveryState::Completed(_) => "completed",
            DiscoveryState::Failed(_) => "failed",
        }
    }
}

struct DiscoveredChip {
    handle: ChipHandle,
    info: DeviceInfo,
    soc: Arc<SocDescriptor>,
}

/// A chip seen across a link but not yet reachable.
struct PendingRemote {
    asic_id: u64,
    gateway: u64,
    eth_coord: Option<EthCoord>,
}

type Link = ((u64, EthChannel), (u64, EthChannel));

/// One discovery run. Everything in here lives only as long as the run.
pub struct TopologyDiscovery {
    options: TopologyDiscoveryOptions,
    local_devices: Vec<ChipHandle>,
    strategy: DiscoveryStrategy,

    socs: SocCache,
    chips: BTreeMap<u64, DiscoveredChip>,
    chips_to_discover: BTreeMap<u64, DiscoveredChip>,
    discovered: BTreeSet<u64>,
    /// Seen across a link but never reachable.
    unreachable: BTreeSet<u64>,
    pending: Vec<PendingRemote>,

    board_ids: BTreeSet<u64>,
    gateways: BTreeMap<u64, u64>,
    eth_coords: BTreeMap<u64, EthCoord>,
    active_eth_channels: BTreeMap<u64, BTreeSet<EthChannel>>,
    ethernet_connections: Vec<Link>,
    external_connections: Vec<Link>,

    expected_fw_bundle: Option<FwVersion>,
    expected_eth_fw: Option<FwVersion>,
}

impl TopologyDiscovery {
    fn new(devices: Vec<ChipHandle>, options: TopologyDiscoveryOptions) -> Self {
        Self {
            options,
            local_devices: devices,
            strategy: DiscoveryStrategy::Grayskull,
            socs: SocCache::default(),
            chips: BTreeMap::new(),
            chips_to_discover: BTreeMap::new(),
            discovered: BTreeSet::new(),
            unreachable: BTreeSet::new(),
            pending: Vec::new(),
            board_ids: BTreeSet::new(),
            gateways: BTreeMap::new(),
            eth_coords: BTreeMap::new(),
            active_eth_channels: BTreeMap::new(),
            ethernet_connections: Vec::new(),
            external_connections: Vec::new(),
            expected_fw_bundle: None,
            expected_eth_fw: None,
        }
    }

    /// Discover every chip reachable from `devices`, the host attached chips.
    ///
    /// Transport failures never abort the run, the affected channel is
    /// treated as idle. Firmware and consistency problems do.
    pub fn discover(
        devices: Vec<ChipHandle>,
        options: TopologyDiscoveryOptions,
    ) -> Result<ClusterDescriptor, DiscoveryError> {
        let mut discovery = Self::new(devices, options);
        let mut state = DiscoveryState::Init;

        loop {
            let next = match state {
                DiscoveryState::Init => discovery.init(),
                DiscoveryState::EnumerateLocal => discovery.enumerate_local(),
                DiscoveryState::ProbeLinks => discovery.probe_links(),
                DiscoveryState::ExpandRemote => discovery.expand_remote(),
                DiscoveryState::Finalize => discovery.finalize(),
                DiscoveryState::Completed(descriptor) => {
                    info!(chips = descriptor.number_of_chips(), "Topology discovery complete");
                    return Ok(descriptor);
                }
                DiscoveryState::Failed(err) => {
                    warn!(%err, "Topology discovery failed");
                    return Err(err);
                }
            };

            state = next.unwrap_or_else(DiscoveryState::Failed);
            debug!(state = state.name(), "Topology discovery transition");
        }
    }

    fn init(&mut self) -> Result<DiscoveryState, DiscoveryError> {
        let Some(first) = self.local_devices.first() else {
            info!("No devices to discover");
            return Ok(DiscoveryState::Finalize);
        };

        let arch = self.options.preferred_arch.unwrap_or(first.arch());
        if self.options.preferred_arch.is_none() && self.options.strict() {
            if let Some(other) = self.local_devices.iter().find(|d| d.arch() != arch) {
                return Err(DiscoveryError::UnsupportedArch {
                    arch: other.arch(),
                    reason: format!("found alongside {arch}, pick one with preferred_arch"),
                });
            }
        }

        self.local_devices.retain(|device| {
            let keep = device.arch() == arch;
            if !keep {
                warn!(arch = %device.arch(), preferred = %arch, "Skipping device");
            }
            keep
        });

        let Some(first) = self.local_devices.first().cloned() else {
            info!(%arch, "No devices of the preferred architecture");
            return Ok(DiscoveryState::Finalize);
        };

        // The firmware layout is read from the first chip that answers.
        let mut readable = None;
        for device in &self.local_devices {
            let strategy = device
                .get_device_info()
                .map_err(PlatformError::from)
                .and_then(|info| {
                    let soc = SocDescriptor::from_device_info(arch, &info, false)?;
                    DiscoveryStrategy::new(arch, device, &soc)
                });
            match strategy {
                Ok(strategy) => {
                    readable = Some((device.clone(), strategy));
                    break;
                }
                Err(err) => warn!(%err, "Could not query local chip"),
            }
        }
        let (reference, strategy) = readable.unwrap_or_else(|| {
            warn!("No local chip could be queried, assuming default ETH firmware");
            let strategy = match arch {
                Arch::Grayskull => DiscoveryStrategy::Grayskull,
                Arch::Wormhole => DiscoveryStrategy::Wormhole(Default::default()),
                Arch::Blackhole => DiscoveryStrategy::Blackhole,
            };
            (first, strategy)
        });
        self.strategy = strategy;

        if self.options.predict_eth_fw_version {
            let bundle = reference.fw_bundle_version().ok().flatten();
            match bundle.map(FwVersion::from_bundle) {
                Some(bundle) => {
                    self.expected_eth_fw = firmware::expected_eth_fw_version(bundle, arch);
                    match self.expected_eth_fw {
                        Some(eth) => info!(%bundle, %eth, "Predicted ETH firmware version"),
                        None => warn!(%bundle, "No known ETH firmware for bundle"),
                    }
                }
                None => warn!("No firmware bundle version to predict ETH firmware from"),
            }
        }

        Ok(DiscoveryState::EnumerateLocal)
    }

    fn check_fw_bundle(&mut self, asic_id: u64, info: &DeviceInfo) -> Result<(), DiscoveryError> {
        let Some(actual) = info.fw_bundle_version.map(FwVersion::from_bundle) else {
            return Ok(());
        };
        match self.expected_fw_bundle {
            None => {
                self.expected_fw_bundle = Some(actual);
                Ok(())
            }
            Some(expected) if expected != actual => Err(DiscoveryError::FwBundleMismatch {
                asic_id,
                expected,
                actual,
            }),
            Some(_) => Ok(()),
        }
    }

    /// Poll every ethernet core of `chip` until training settles or the
    /// timeout passes. Cores that never settle are probed anyway.
    fn wait_for_eth_training(&self, chip: &ChipHandle, soc: &SocDescriptor, cores: &[CoreCoord]) {
        if self.options.no_wait_for_eth_training || cores.is_empty() {
            return;
        }

        let start = Instant::now();
        loop {
            let untrained = cores
                .iter()
                .enumerate()
                // A core that cannot be read will not train either.
                .filter(|(_, core)| {
                    matches!(self.strategy.is_eth_trained(chip, soc, **core), Ok(false))
                })
                .map(|(channel, _)| channel)
                .collect::<Vec<_>>();

            if untrained.is_empty() {
                return;
            }
            if start.elapsed() > self.options.eth_training_timeout {
                warn!(?untrained, "ETH training did not complete before timeout");
                return;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn local_asic_id(
        &self,
        chip: &ChipHandle,
        soc: &SocDescriptor,
        info: &DeviceInfo,
        cores: &[CoreCoord],
    ) -> u64 {
        for core in cores {
            match self.strategy.port_status(chip, soc, *core) {
                Ok(PortStatus::Up) => match self.strategy.local_asic_id(chip, soc, *core) {
                    Ok(asic_id) => return asic_id,
                    Err(err) => warn!(%err, %core, "Failed to read local asic id"),
                },
                Ok(_) => {}
                Err(err) => trace!(%err, %core, "Failed to read port status"),
            }
        }
        self.strategy.unconnected_chip_id(info)
    }

    fn enumerate_local(&mut self) -> Result<DiscoveryState, DiscoveryError> {
        let arch = self.strategy.arch();
        for device in self.local_devices.clone() {
            let info = match device.get_device_info() {
                Ok(info) => info,
                Err(err) => {
                    warn!(%err, "Skipping device, could not read device info");
                    continue;
                }
            };
            let soc = SocDescriptor::from_device_info(arch, &info, false)?;
            let cores = soc.eth_cores()?;

            self.wait_for_eth_training(&device, &soc, &cores);
            let asic_id = self.local_asic_id(&device, &soc, &info, &cores);

            if self.discovered.contains(&asic_id) {
                warn!(asic_id = format!("{asic_id:#x}"), "Device listed twice, skipping");
                continue;
            }
            self.check_fw_bundle(asic_id, &info)?;

            let board_id = cores
                .iter()
                .filter_map(|core| self.strategy.local_board_id(&device, &soc, *core).ok())
                .find(|board_id| *board_id != 0);
            if let Some(board_id) = board_id {
                self.board_ids.insert(board_id);
            }

            if self.strategy.is_using_eth_coords() {
                match self.strategy.local_eth_coord(&device, &soc) {
                    Ok(Some(coord)) => {
                        self.eth_coords.insert(asic_id, coord);
                    }
                    Ok(None) => {}
                    Err(err) => warn!(%err, "Failed to read local eth coordinate"),
                }
            }

            debug!(
                asic_id = format!("{asic_id:#x}"),
                interface = ?info.interface_id,
                "Found local chip"
            );

            let soc = self.socs.insert(asic_id, soc);
            self.discovered.insert(asic_id);
            self.gateways.insert(asic_id, asic_id);
            self.chips_to_discover.insert(
                asic_id,
                DiscoveredChip {
                    handle: device,
                    info,
                    soc,
                },
            );
        }

        Ok(self.next_probe_state())
    }

    fn next_probe_state(&self) -> DiscoveryState {
        if !self.pending.is_empty() {
            DiscoveryState::ExpandRemote
        } else if !self.chips_to_discover.is_empty() {
            DiscoveryState::ProbeLinks
        } else {
            DiscoveryState::Finalize
        }
    }

    fn verify_eth_fw_version(
        &mut self,
        asic_id: u64,
        channel: EthChannel,
        version: FwVersion,
    ) -> Result<(), DiscoveryError> {
        let strict = self.options.strict();

        let required = self.strategy.min_eth_fw_version();
        if version < required {
            if strict {
                return Err(DiscoveryError::UnsupportedEthFw {
                    asic_id,
                    channel,
                    version,
                    required,
                });
            }
            warn!(%version, %required, channel, "Unsupported ETH firmware");
        }

        match self.expected_eth_fw {
            None => {
                debug!(%version, "Using first ETH firmware seen as the expected version");
                self.expected_eth_fw = Some(version);
            }
            Some(expected) if expected != version => {
                if strict {
                    return Err(DiscoveryError::EthFwMismatch {
                        asic_id,
                        channel,
                        expected,
                        actual: version,
                    });
                }
                warn!(%expected, actual = %version, channel, "ETH firmware mismatch");
            }
            Some(_) => {}
        }

        Ok(())
    }

    fn verify_eth_fw_hash(
        &self,
        asic_id: u64,
        channel: EthChannel,
        chip: &ChipHandle,
        core: CoreCoord,
        version: FwVersion,
    ) -> Result<(), DiscoveryError> {
        let failure = |reason: String| DiscoveryError::EthFwHash {
            asic_id,
            channel,
            version,
            reason,
        };

        let Some(known) = self.options.eth_fw_hashes.get(&version) else {
            if self.options.strict() {
                return Err(failure("no known hash for this version".to_string()));
            }
            warn!(%version, channel, "No known hash for ETH firmware");
            return Ok(());
        };

        let mut image = vec![0u8; known.size];
        chip.read(core_xy(core), known.addr, &mut image)
            .map_err(PlatformError::from)?;
        let hash = firmware::fnv1a64(&image);
        if hash != known.hash {
            let reason = format!("hash {hash:#x} does not match {:#x}", known.hash);
            if self.options.strict() {
                return Err(failure(reason));
            }
            warn!(%version, channel, %reason, "ETH firmware hash mismatch");
        }
        Ok(())
    }

    fn probe_links(&mut self) -> Result<DiscoveryState, DiscoveryError> {
        let Some((asic_id, chip)) = self.chips_to_discover.pop_first() else {
            return Ok(DiscoveryState::Finalize);
        };
        let handle = chip.handle.clone();
        let soc = chip.soc.clone();
        self.chips.insert(asic_id, chip);

        let cores = soc.eth_cores()?;
        if handle.is_remote() {
            self.wait_for_eth_training(&handle, &soc, &cores);
        }

        for (channel, core) in cores.iter().enumerate() {
            let channel = channel as EthChannel;
            match self.probe_channel(asic_id, &handle, &soc, channel, *core) {
                Ok(()) => {}
                Err(DiscoveryError::Platform(err)) => {
                    warn!(
                        asic_id = format!("{asic_id:#x}"),
                        channel,
                        %err,
                        "Failed to probe ethernet channel, skipping"
                    );
                }
                Err(err) => return Err(err),
            }
        }

        Ok(self.next_probe_state())
    }

    fn probe_channel(
        &mut self,
        asic_id: u64,
        chip: &ChipHandle,
        soc: &SocDescriptor,
        channel: EthChannel,
        core: CoreCoord,
    ) -> Result<(), DiscoveryError> {
        let version = self.strategy.eth_fw_version(chip, soc, core)?;
        self.verify_eth_fw_version(asic_id, channel, version)?;
        if self.options.verify_eth_fw_hash {
            self.verify_eth_fw_hash(asic_id, channel, chip, core, version)?;
        }

        let strategy = &self.strategy;
        match strategy.port_status(chip, soc, core)? {
            PortStatus::Up => {}
            status => {
                trace!(channel, ?status, "Skipping ethernet channel");
                return Ok(());
            }
        }

        let remote_board_id = strategy.remote_board_id(chip, soc, core)?;
        let remote_board_type = strategy.remote_board_type(chip, core)?;
        let remote_asic_id = strategy.remote_asic_id(chip, soc, core)?;
        let included =
            strategy.is_board_id_included(&self.board_ids, remote_board_id, remote_board_type);

        let known = self.discovered.contains(&remote_asic_id);
        // Remote chips are only routable through eth coordinates.
        let expandable = !self.options.no_remote_discovery && strategy.is_using_eth_coords();
        if !included || self.unreachable.contains(&remote_asic_id) || (!known && !expandable) {
            let remote_channel = strategy.logical_remote_eth_channel(chip, soc, core)?;
            debug!(
                asic_id = format!("{asic_id:#x}"),
                channel,
                remote_asic_id = format!("{remote_asic_id:#x}"),
                remote_channel,
                "Link leaves the cluster"
            );
            self.mark_active(asic_id, channel);
            self.external_connections
                .push(((asic_id, channel), (remote_asic_id, remote_channel)));
            return Ok(());
        }

        let remote_channel = strategy.remote_eth_channel(chip, soc, core)?;
        if known {
            self.mark_active(asic_id, channel);
            self.ethernet_connections
                .push(((asic_id, channel), (remote_asic_id, remote_channel)));
            return Ok(());
        }

        let eth_coord = strategy.remote_eth_coord(chip, core)?;
        self.mark_active(asic_id, channel);
        // Held as external until the new chip is reached.
        self.discovered.insert(remote_asic_id);
        self.pending.push(PendingRemote {
            asic_id: remote_asic_id,
            gateway: self.gateways.get(&asic_id).copied().unwrap_or(asic_id),
            eth_coord,
        });
        self.external_connections
            .push(((asic_id, channel), (remote_asic_id, remote_channel)));

        Ok(())
    }

    fn mark_active(&mut self, asic_id: u64, channel: EthChannel) {
        self.active_eth_channels
            .entry(asic_id)
            .or_default()
            .insert(channel);
    }

    /// Stop treating `asic_id` as part of the cluster; every link recorded
    /// towards it becomes a link leaving the cluster.
    fn abandon_remote(&mut self, asic_id: u64) {
        self.unreachable.insert(asic_id);
        let (external, internal): (Vec<_>, Vec<_>) = self
            .ethernet_connections
            .drain(..)
            .partition(|(_, (remote, _))| *remote == asic_id);
        self.ethernet_connections = internal;
        self.external_connections.extend(external);
    }

    fn expand_remote(&mut self) -> Result<DiscoveryState, DiscoveryError> {
        let arch = self.strategy.arch();
        for pending in std::mem::take(&mut self.pending) {
            let asic_id = pending.asic_id;
            let gateway = self
                .chips
                .get(&pending.gateway)
                .or_else(|| self.chips_to_discover.get(&pending.gateway))
                .map(|chip| chip.handle.clone());
            let channels = self
                .active_eth_channels
                .get(&pending.gateway)
                .cloned()
                .unwrap_or_default();

            let handle = gateway.and_then(|gateway| {
                self.strategy
                    .create_remote_chip(&gateway, pending.eth_coord, channels)
            });
            let Some(handle) = handle else {
                warn!(
                    asic_id = format!("{asic_id:#x}"),
                    %arch,
                    "Cannot reach remote chip, recording its links as external"
                );
                self.abandon_remote(asic_id);
                continue;
            };

            let info = match handle.get_device_info() {
                Ok(info) => info,
                Err(err) => {
                    warn!(asic_id = format!("{asic_id:#x}"), %err, "Failed to query remote chip");
                    self.abandon_remote(asic_id);
                    continue;
                }
            };
            self.check_fw_bundle(asic_id, &info)?;

            let soc = SocDescriptor::from_device_info(arch, &info, true)?;
            let soc = self.socs.insert(asic_id, soc);

            debug!(
                asic_id = format!("{asic_id:#x}"),
                gateway = format!("{:#x}", pending.gateway),
                eth_coord = ?pending.eth_coord,
                "Found remote chip"
            );

            // Now reachable, the links that found it are internal after all.
            // The chip reading the link back records it again, which the builder ignores.
            let (found_by, external): (Vec<_>, Vec<_>) = self
                .external_connections
                .drain(..)
                .partition(|(_, (remote, _))| *remote == asic_id);
            self.external_connections = external;
            self.ethernet_connections.extend(found_by);

            self.gateways.insert(asic_id, pending.gateway);
            if let Some(coord) = pending.eth_coord {
                self.eth_coords.insert(asic_id, coord);
            }
            self.chips_to_discover.insert(
                asic_id,
                DiscoveredChip {
                    handle,
                    info,
                    soc,
                },
            );
        }

        Ok(self.next_probe_state())
    }

    fn finalize(&mut self) -> Result<DiscoveryState, DiscoveryError> {
        let arch = self.strategy.arch();

        let (local, remote): (Vec<_>, Vec<_>) = self
            .chips
            .iter()
            .partition(|(_, chip)| !chip.handle.is_remote());
        let chip_ids = local
            .into_iter()
            .chain(remote)
            .map(|(asic_id, _)| *asic_id)
            .enumerate()
            .map(|(id, asic_id)| (asic_id, id as ChipId))
            .collect::<BTreeMap<u64, ChipId>>();

        let chip_id = |asic_id: u64| {
            chip_ids.get(&asic_id).copied().ok_or_else(|| {
                DiscoveryError::InvariantViolation(format!(
                    "link references undiscovered chip {asic_id:#x}"
                ))
            })
        };

        let mut builder = ClusterDescriptor::builder();
        builder
            .io_device_type(self.options.io_device_type)
            .eth_fw_version(self.expected_eth_fw)
            .fw_bundle_version(self.expected_fw_bundle);

        for (asic_id, chip) in &self.chips {
            let info = &chip.info;
            builder.add_chip(
                chip_id(*asic_id)?,
                ChipRecord {
                    arch,
                    board_type: chip.soc.board_type(),
                    harvesting_masks: info.harvesting_masks,
                    noc_translation_enabled: info.noc_translation_enabled,
                    unique_id: *asic_id,
                    asic_location: info.asic_location,
                    bus_id: info.bus_id,
                    pci_bdf: if chip.handle.is_remote() { None } else { info.pci_bdf.clone() },
                    eth_coord: self.eth_coords.get(asic_id).copied(),
                    mmio_interface: if chip.handle.is_remote() {
                        None
                    } else {
                        Some(info.interface_id.unwrap_or(chip_id(*asic_id)?))
                    },
                    board_id: Some(info.board_id),
                    num_eth_channels: chip.soc.num_eth_channels(),
                },
            )?;
        }

        let connections = self
            .strategy
            .patch_eth_connections(std::mem::take(&mut self.ethernet_connections), &self.socs);
        for ((a, a_channel), (b, b_channel)) in connections {
            builder.add_link((chip_id(a)?, a_channel), (chip_id(b)?, b_channel))?;
        }

        for ((a, a_channel), remote) in &self.external_connections {
            builder.add_external_link((chip_id(*a)?, *a_channel), *remote)?;
        }

        for (asic_id, channels) in &self.active_eth_channels {
            let chip = chip_id(*asic_id)?;
            for channel in channels {
                builder.mark_active(chip, *channel);
            }
        }

        let descriptor = builder.build()?;
        debug!(
            chips = descriptor.number_of_chips(),
            socs = self.socs.len(),
            "Compiled cluster descriptor"
        );
        Ok(DiscoveryState::Completed(descriptor))
    }
}

#[cfg(test)]
mod tests {
    use luwen_def::{CoordSystem, HarvestingMasks};

    use super::*;
    use crate::chip::mock::{MockChipConfig, MockCluster, MockFabric};

    const N150_A: u64 = (0x18 << 36) | 0x1001;
    const N150_B: u64 = (0x18 << 36) | 0x1002;

    fn discover(
        cluster: &MockCluster,
        options: TopologyDiscoveryOptions,
    ) -> Result<ClusterDescriptor, DiscoveryError> {
        TopologyDiscovery::discover(cluster.local_devices(), options)
    }

    fn linked_n150s(a: MockChipConfig, b: MockChipConfig) -> MockCluster {
        let mut fabric = MockFabric::new(Arch::Wormhole);
        let a = fabric.add_chip(a.local(0));
        let b = fabric.add_chip(b.local(1));
        fabric.connect((a, 0), (b, 0));
        fabric.build().unwrap()
    }

    #[test]
    fn test_options_default() {
        let options = TopologyDiscoveryOptions::default();
        assert!(!options.no_remote_discovery);
        assert!(options.strict());
        assert_eq!(options.eth_training_timeout, Duration::from_secs(5));
        assert_eq!(options.io_device_type, IoDeviceType::Pcie);

        let options = options
            .no_eth_firmware_strictness(true)
            .preferred_arch(Some(Arch::Blackhole))
            .eth_training_timeout(Duration::from_millis(10));
        assert!(!options.strict());
        assert_eq!(options.preferred_arch, Some(Arch::Blackhole));
    }

    #[test]
    fn test_soc_cache() {
        let mut socs = SocCache::default();
        assert!(socs.is_empty());
        let soc = SocDescriptor::new(
            Arch::Wormhole,
            false,
            HarvestingMasks::default(),
            Default::default(),
            false,
        )
        .unwrap();
        socs.insert(0x10, soc);
        assert_eq!(socs.len(), 1);
        assert!(socs.get(0x10).is_some());
        assert!(socs.get(0x11).is_none());
    }

    #[test]
    fn test_no_devices() {
        let descriptor =
            TopologyDiscovery::discover(Vec::new(), TopologyDiscoveryOptions::default()).unwrap();
        assert_eq!(descriptor.number_of_chips(), 0);
        assert!(descriptor.chips_with_mmio().is_empty());
    }

    #[test]
    fn test_unconnected_chip_is_idle() {
        let mut fabric = MockFabric::new(Arch::Wormhole);
        fabric.add_chip(MockChipConfig::new(N150_A).local(0).bus_id(0xb1));
        let cluster = fabric.build().unwrap();

        let descriptor = discover(&cluster, Default::default()).unwrap();
        assert_eq!(descriptor.number_of_chips(), 1);
        // No trained link, so the id falls back to the board id.
        assert_eq!(descriptor.unique_id(0), Some(N150_A));
        assert_eq!(descriptor.bus_id(0), Some(0xb1));
        assert!(descriptor.active_eth_channels(0).is_empty());
        assert_eq!(descriptor.idle_eth_channels(0).len(), 16);
        assert_eq!(descriptor.closest_mmio_capable_chip(0), Some(0));
    }

    #[test]
    fn test_unsupported_eth_fw() {
        let old = FwVersion::new(5, 9, 0).to_wormhole_eth();
        let mut fabric = MockFabric::new(Arch::Wormhole);
        fabric.add_chip(MockChipConfig::new(N150_A).local(0).eth_fw_version(old));
        let cluster = fabric.build().unwrap();

        let err = discover(&cluster, Default::default()).unwrap_err();
        assert!(matches!(
            err,
            DiscoveryError::UnsupportedEthFw { channel: 0, required, .. } if required == wormhole::MIN_ETH_FW_VERSION
        ));

        let lenient = TopologyDiscoveryOptions::default().no_eth_firmware_strictness(true);
        assert_eq!(discover(&cluster, lenient).unwrap().number_of_chips(), 1);
    }

    #[test]
    fn test_eth_fw_mismatch() {
        let newer = FwVersion::new(6, 15, 0).to_wormhole_eth();
        let cluster = linked_n150s(
            MockChipConfig::new(N150_A),
            MockChipConfig::new(N150_B).eth_fw_version(newer),
        );

        let err = discover(&cluster, Default::default()).unwrap_err();
        assert!(matches!(
            err,
            DiscoveryError::EthFwMismatch { expected, actual, .. }
                if expected == FwVersion::new(6, 14, 0) && actual == FwVersion::new(6, 15, 0)
        ));

        let lenient = TopologyDiscoveryOptions::default().no_eth_firmware_strictness(true);
        let descriptor = discover(&cluster, lenient).unwrap();
        assert_eq!(descriptor.number_of_chips(), 2);
        assert_eq!(descriptor.remote_chip_and_channel(0, 0), Some((1, 0)));
    }

    #[test]
    fn test_predicted_eth_fw() {
        let bundle = FwVersion::new(18, 4, 0);
        let mut fabric = MockFabric::new(Arch::Wormhole);
        fabric.add_chip(MockChipConfig::new(N150_A).local(0).fw_bundle_version(bundle));
        let cluster = fabric.build().unwrap();

        // The chip runs 6.14.0 but bundle 18.4.0 ships 6.15.0.
        assert!(discover(&cluster, Default::default()).is_ok());
        let predicted = TopologyDiscoveryOptions::default().predict_eth_fw_version(true);
        assert!(matches!(
            discover(&cluster, predicted).unwrap_err(),
            DiscoveryError::EthFwMismatch { .. }
        ));
    }

    #[test]
    fn test_descriptor_records_pci_and_firmware() {
        let bundle = FwVersion::new(18, 3, 0);
        let cluster = linked_n150s(
            MockChipConfig::new(N150_A).bus_id(0xb1).fw_bundle_version(bundle),
            MockChipConfig::new(N150_B).fw_bundle_version(bundle),
        );

        let descriptor = discover(&cluster, Default::default()).unwrap();
        assert_eq!(descriptor.pci_bdf(0), Some("0000:b1:00.0"));
        assert_eq!(descriptor.pci_bdf(1), None);
        assert_eq!(descriptor.chip_pci_bdfs().len(), 1);
        assert_eq!(descriptor.eth_fw_version(), Some(FwVersion::new(6, 14, 0)));
        assert_eq!(descriptor.fw_bundle_version(), Some(bundle));

        let reloaded = ClusterDescriptor::from_yaml(&descriptor.to_yaml().unwrap()).unwrap();
        assert_eq!(reloaded, descriptor);
    }

    #[test]
    fn test_fw_bundle_mismatch() {
        let cluster = linked_n150s(
            MockChipConfig::new(N150_A).fw_bundle_version(FwVersion::new(18, 4, 0)),
            MockChipConfig::new(N150_B).fw_bundle_version(FwVersion::new(18, 6, 0)),
        );
        assert!(matches!(
            discover(&cluster, Default::default()).unwrap_err(),
            DiscoveryError::FwBundleMismatch { .. }
        ));
    }

    #[test]
    fn test_eth_fw_hash() {
        const IMAGE_ADDR: u64 = 0x9000;
        let image = b"erisc routing fw".to_vec();

        let mut fabric = MockFabric::new(Arch::Wormhole);
        let a = fabric.add_chip(MockChipConfig::new(N150_A).local(0));
        let cluster = fabric.build().unwrap();
        let chip = cluster.device(a);
        for core in cluster.soc(a).eth_cores().unwrap() {
            chip.write(core_xy(core), IMAGE_ADDR, &image).unwrap();
        }

        let hash = |value| EthFwHash {
            addr: IMAGE_ADDR,
            size: image.len(),
            hash: value,
        };
        let version = FwVersion::new(6, 14, 0);

        let good = TopologyDiscoveryOptions::default()
            .verify_eth_fw_hash(true)
            .eth_fw_hash(version, hash(firmware::fnv1a64(&image)));
        assert!(discover(&cluster, good).is_ok());

        let bad = TopologyDiscoveryOptions::default()
            .verify_eth_fw_hash(true)
            .eth_fw_hash(version, hash(0x1234));
        assert!(matches!(
            discover(&cluster, bad).unwrap_err(),
            DiscoveryError::EthFwHash { channel: 0, .. }
        ));

        let unknown = TopologyDiscoveryOptions::default().verify_eth_fw_hash(true);
        assert!(discover(&cluster, unknown.clone()).is_err());
        assert!(discover(&cluster, unknown.no_eth_firmware_strictness(true)).is_ok());
    }

    #[test]
    fn test_mixed_architectures() {
        let mut wormhole = MockFabric::new(Arch::Wormhole);
        wormhole.add_chip(MockChipConfig::new(N150_A).local(0));
        let wormhole = wormhole.build().unwrap();

        let mut blackhole = MockFabric::new(Arch::Blackhole);
        blackhole.add_chip(MockChipConfig::new((0x40 << 36) | 0x3000).local(1));
        let blackhole = blackhole.build().unwrap();

        let devices = || {
            let mut devices = wormhole.local_devices();
            devices.extend(blackhole.local_devices());
            devices
        };

        assert!(matches!(
            TopologyDiscovery::discover(devices(), Default::default()).unwrap_err(),
            DiscoveryError::UnsupportedArch {
                arch: Arch::Blackhole,
                ..
            }
        ));

        let options = TopologyDiscoveryOptions::default().preferred_arch(Some(Arch::Blackhole));
        let descriptor = TopologyDiscovery::discover(devices(), options).unwrap();
        assert_eq!(descriptor.number_of_chips(), 1);
        assert_eq!(descriptor.arch_of_cluster().unwrap(), Arch::Blackhole);
    }

    #[test]
    fn test_unreadable_devices_and_channels() {
        let mut fabric = MockFabric::new(Arch::Wormhole);
        let a = fabric.add_chip(MockChipConfig::new(N150_A).local(0));
        let b = fabric.add_chip(MockChipConfig::new(N150_B).local(1));
        let c = fabric.add_chip(MockChipConfig::new(N150_B + 1).local(2));
        fabric
            .connect((a, 0), (b, 0))
            .connect((a, 1), (b, 1))
            .set_failing(a, 1)
            .set_failing_device_info(c);
        let cluster = fabric.build().unwrap();

        let descriptor = discover(&cluster, Default::default()).unwrap();
        assert_eq!(descriptor.number_of_chips(), 2);
        assert_eq!(descriptor.remote_chip_and_channel(0, 0), Some((1, 0)));
        // Chip b still sees the link on its side.
        assert_eq!(descriptor.remote_chip_and_channel(1, 1), Some((0, 1)));
    }

    #[test]
    fn test_strategy_from_first_readable_device() {
        // Older firmware keeps the results buffer in its previous layout.
        let old = FwVersion::new(6, 10, 0).to_wormhole_eth();
        let mut fabric = MockFabric::new(Arch::Wormhole);
        let a = fabric.add_chip(MockChipConfig::new(N150_A).local(0).eth_fw_version(old));
        let b = fabric.add_chip(MockChipConfig::new(N150_B).local(1).eth_fw_version(old));
        let c = fabric.add_chip(MockChipConfig::new(N150_B + 1).local(2).eth_fw_version(old));
        fabric.connect((b, 0), (c, 0)).set_failing_device_info(a);
        let cluster = fabric.build().unwrap();

        let descriptor = discover(&cluster, Default::default()).unwrap();
        assert_eq!(descriptor.number_of_chips(), 2);
        assert_eq!(descriptor.unique_id(0), Some(N150_B));
        assert_eq!(descriptor.unique_id(1), Some(N150_B + 1));
        assert_eq!(descriptor.remote_chip_and_channel(0, 0), Some((1, 0)));
        assert_eq!(descriptor.eth_fw_version(), Some(FwVersion::new(6, 10, 0)));
        assert!(descriptor.ethernet_connections_to_remote_devices().is_empty());
    }

    #[test]
    fn test_untrained_port_is_skipped() {
        let mut fabric = MockFabric::new(Arch::Wormhole);
        let a = fabric.add_chip(MockChipConfig::new(N150_A).local(0));
        let b = fabric.add_chip(MockChipConfig::new(N150_B).local(1));
        fabric.connect((a, 0), (b, 0)).connect((a, 5), (b, 5));
        fabric.set_untrained(a, 5).set_untrained(b, 5);
        let cluster = fabric.build().unwrap();

        let options = TopologyDiscoveryOptions::default()
            .eth_training_timeout(Duration::from_millis(20));
        let descriptor = discover(&cluster, options).unwrap();
        assert_eq!(descriptor.active_eth_channels(0), BTreeSet::from([0]));
        assert!(descriptor.idle_eth_channels(0).contains(&5));

        let options = TopologyDiscoveryOptions::default().no_wait_for_eth_training(true);
        assert_eq!(discover(&cluster, options).unwrap().number_of_chips(), 2);
    }

    #[test]
    fn test_blackhole_links_use_remote_logical_channel() {
        let mut fabric = MockFabric::new(Arch::Blackhole);
        let a = fabric.add_chip(MockChipConfig::new((0x40 << 36) | 0x10).local(0));
        let b = fabric.add_chip(MockChipConfig::new((0x40 << 36) | 0x20).local(1));
        fabric.connect((a, 0), (b, 5));
        let cluster = fabric.build().unwrap();

        let descriptor = discover(&cluster, Default::default()).unwrap();
        assert_eq!(descriptor.number_of_chips(), 2);
        assert_eq!(descriptor.remote_chip_and_channel(0, 0), Some((1, 5)));
        assert_eq!(descriptor.remote_chip_and_channel(1, 5), Some((0, 0)));
        assert_eq!(descriptor.unique_id(1), Some(cluster.asic_id(b)));
        assert_eq!(
            cluster.soc(b).physical_eth_channel(
                cluster.soc(b).eth_core(5, CoordSystem::Noc0).unwrap()
            ),
            Some(6)
        );
    }
}
