// SPDX-FileCopyrightText: © 2023 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

use std::fmt::Display;

use luwen_coord::CoordinateError;
use luwen_def::{Arch, ChipId};
use thiserror::Error;

use crate::topology::FwVersion;

#[derive(Debug)]
pub struct BtWrapper(pub std::backtrace::Backtrace);

impl BtWrapper {
    #[inline(always)]
    pub fn capture() -> Self {
        Self(std::backtrace::Backtrace::capture())
    }
}

impl Display for BtWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let std::backtrace::BacktraceStatus::Captured = self.0.status() {
            self.0.fmt(f)?;
        }
        Ok(())
    }
}

/// Failures of the underlying device transport.
///
/// Discovery never surfaces these to its caller, a channel whose registers
/// cannot be read is treated as having no usable link.
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Tried to access chip with the wrong architecture, expected {expected:?} but got {actual:?}\n{backtrace}")]
    WrongChipArch {
        actual: Arch,
        expected: Arch,
        backtrace: BtWrapper,
    },

    #[error("Operation is not supported on {arch}: {reason}\n{backtrace}")]
    Unsupported {
        arch: Arch,
        reason: String,
        backtrace: BtWrapper,
    },

    #[error("{0}\n{1}")]
    Generic(String, BtWrapper),

    #[error("{0}\n{1}")]
    GenericError(Box<dyn std::error::Error>, BtWrapper),

    #[error(transparent)]
    Coordinate(#[from] CoordinateError),
}

impl From<Box<dyn std::error::Error>> for PlatformError {
    #[inline]
    fn from(e: Box<dyn std::error::Error>) -> Self {
        Self::GenericError(e, BtWrapper::capture())
    }
}

impl From<String> for PlatformError {
    #[inline]
    fn from(e: String) -> Self {
        Self::Generic(e, BtWrapper::capture())
    }
}

#[derive(Error, Debug)]
pub enum ClusterDescriptorError {
    #[error("Failed to access cluster descriptor at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse cluster descriptor: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid cluster descriptor: {0}")]
    Invalid(String),

    #[error("Chip {0} is not part of the cluster")]
    UnknownChip(ChipId),

    #[error("Board {0:#x} is not part of the cluster")]
    UnknownBoard(u64),

    #[error("Chips with differing architectures detected, found {first} and {second}")]
    MixedArchitectures { first: Arch, second: Arch },

    #[error("Link ({chip}, {channel}) is recorded as going to both {first:?} and {second:?}")]
    AsymmetricLink {
        chip: ChipId,
        channel: u32,
        first: (ChipId, u32),
        second: (ChipId, u32),
    },

    #[error("Cluster is empty")]
    Empty,
}

/// Reasons a discovery run gives up.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Unsupported architecture {arch}: {reason}")]
    UnsupportedArch { arch: Arch, reason: String },

    #[error("Firmware bundle mismatch on chip {asic_id:#x}, expected {expected} but found {actual}")]
    FwBundleMismatch {
        asic_id: u64,
        expected: FwVersion,
        actual: FwVersion,
    },

    #[error("Unsupported ETH firmware {version} on chip {asic_id:#x} channel {channel}, at least {required} is required")]
    UnsupportedEthFw {
        asic_id: u64,
        channel: u32,
        version: FwVersion,
        required: FwVersion,
    },

    #[error("ETH firmware mismatch on chip {asic_id:#x} channel {channel}, expected {expected} but found {actual}")]
    EthFwMismatch {
        asic_id: u64,
        channel: u32,
        expected: FwVersion,
        actual: FwVersion,
    },

    #[error("ETH firmware {version} on chip {asic_id:#x} channel {channel} failed verification: {reason}")]
    EthFwHash {
        asic_id: u64,
        channel: u32,
        version: FwVersion,
        reason: String,
    },

    #[error("Discovery produced an inconsistent topology: {0}")]
    InvariantViolation(String),

    #[error(transparent)]
    Coordinate(#[from] CoordinateError),

    #[error(transparent)]
    ClusterDescriptor(#[from] ClusterDescriptorError),

    #[error(transparent)]
    Platform(#[from] PlatformError),
}
