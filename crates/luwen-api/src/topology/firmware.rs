// SPDX-FileCopyrightText: © 2023 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

use luwen_def::Arch;

/// Ethernet firmware version word as reported by Wormhole ERISC cores.
#[bitfield_struct::bitfield(u32)]
pub struct WormholeEthFwVersion {
    #[bits(12)]
    patch: u16,
    #[bits(4)]
    minor: u8,
    major: u8,
    __reserved: u8,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FwVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u16,
}

impl FwVersion {
    pub const fn new(major: u8, minor: u8, patch: u16) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Decode the `major:8 minor:4 patch:12` layout used by Wormhole ERISC firmware.
    pub fn from_wormhole_eth(raw: u32) -> Self {
        let word = WormholeEthFwVersion::from(raw);
        Self::new(word.major(), word.minor(), word.patch())
    }

    pub fn to_wormhole_eth(self) -> u32 {
        WormholeEthFwVersion::new()
            .with_major(self.major)
            .with_minor(self.minor & 0xF)
            .with_patch(self.patch & 0xFFF)
            .into()
    }

    /// Decode a one byte per field `major.minor.patch` word.
    pub fn from_packed(raw: u32) -> Self {
        Self::new(
            ((raw >> 16) & 0xFF) as u8,
            ((raw >> 8) & 0xFF) as u8,
            (raw & 0xFF) as u16,
        )
    }

    pub fn to_packed(self) -> u32 {
        ((self.major as u32) << 16) | ((self.minor as u32) << 8) | (self.patch as u32 & 0xFF)
    }

    /// Decode a firmware bundle version, `major.minor.patch.build` from the top byte down.
    pub fn from_bundle(raw: u32) -> Self {
        Self::new(
            ((raw >> 24) & 0xFF) as u8,
            ((raw >> 16) & 0xFF) as u8,
            ((raw >> 8) & 0xFF) as u16,
        )
    }

    pub fn to_bundle(self) -> u32 {
        ((self.major as u32) << 24) | ((self.minor as u32) << 16) | ((self.patch as u32 & 0xFF) << 8)
    }
}

impl std::fmt::Display for FwVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl std::str::FromStr for FwVersion {
    type Err = String;

    /// Parses `major.minor.patch`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split('.');
        let (Some(major), Some(minor), Some(patch), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(format!("{s:?} is not major.minor.patch"));
        };
        let field = |part: &str| format!("{part:?} in version {s:?}");
        Ok(Self::new(
            major.parse().map_err(|_| field(major))?,
            minor.parse().map_err(|_| field(minor))?,
            patch.parse().map_err(|_| field(patch))?,
        ))
    }
}

/// Bundle version that first shipped each ETH firmware, in ascending order.
const WH_ETH_FW_VERSION_MAP: &[(FwVersion, FwVersion)] = &[
    (FwVersion::new(18, 0, 0), FwVersion::new(6, 14, 0)),
    (FwVersion::new(18, 4, 0), FwVersion::new(6, 15, 0)),
    (FwVersion::new(18, 6, 0), FwVersion::new(7, 0, 0)),
];

/// Bundles from the old 80.x numbering scheme.
const WH_LEGACY_ETH_FW_VERSION_MAP: &[(FwVersion, FwVersion)] =
    &[(FwVersion::new(80, 17, 0), FwVersion::new(6, 14, 0))];

const BH_ETH_FW_VERSION_MAP: &[(FwVersion, FwVersion)] =
    &[(FwVersion::new(18, 11, 0), FwVersion::new(1, 6, 0))];

/// ETH firmware version shipped with a firmware bundle, if the bundle is known.
pub fn expected_eth_fw_version(bundle: FwVersion, arch: Arch) -> Option<FwVersion> {
    let legacy = bundle.major >= 80;
    let table = match (arch, legacy) {
        (Arch::Wormhole, false) => WH_ETH_FW_VERSION_MAP,
        (Arch::Wormhole, true) => WH_LEGACY_ETH_FW_VERSION_MAP,
        (Arch::Blackhole, false) => BH_ETH_FW_VERSION_MAP,
        _ => &[],
    };

    table
        .iter()
        .rev()
        .find(|(first_bundle, _)| *first_bundle <= bundle)
        .map(|(_, eth)| *eth)
}

/// Address range of an ERISC firmware image and its expected FNV-1a hash.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EthFwHash {
    pub addr: u64,
    pub size: usize,
    pub hash: u64,
}

pub fn fnv1a64(data: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    data.iter()
        .fold(OFFSET, |hash, byte| (hash ^ *byte as u64).wrapping_mul(PRIME))
}
