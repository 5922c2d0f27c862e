// SPDX-FileCopyrightText: © 2023 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

//! Core coordinate translation for Grayskull, Wormhole and Blackhole.
//!
//! A [`CoordinateManager`] is built for one chip from its architecture and
//! harvesting masks and answers which core sits where in each of the NOC0,
//! NOC1, logical and translated coordinate systems.

pub mod blackhole;
mod error;
mod grayskull;
pub mod layout;
mod manager;
pub mod wormhole;

pub use error::CoordinateError;
pub use layout::SocLayout;
pub use manager::CoordinateManager;
