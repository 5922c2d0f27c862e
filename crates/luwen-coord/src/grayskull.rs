// SPDX-FileCopyrightText: © 2023 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

use luwen_def::CoreType;

use crate::error::CoordinateError;
use crate::manager::MapBuilder;

/// Grayskull has no routing indirection, translated is always noc0.
pub(crate) fn fill_translated(builder: &mut MapBuilder) -> Result<(), CoordinateError> {
    for core_type in [
        CoreType::Tensix,
        CoreType::Dram,
        CoreType::Eth,
        CoreType::Arc,
        CoreType::Pcie,
    ] {
        builder.identity_translated(core_type);
    }
    Ok(())
}
