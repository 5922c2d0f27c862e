// SPDX-FileCopyrightText: © 2023 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

use luwen_def::CoreType;

use crate::error::CoordinateError;
use crate::manager::{is_harvested, MapBuilder};

pub const TENSIX_TRANSLATED_START: (u32, u32) = (18, 18);
pub const ETH_TRANSLATED_START: (u32, u32) = (18, 16);

const DRAM_TRANSLATED_X: [(u32, u32); 2] = [(0, 16), (5, 17)];
/// Indexed by noc0 y.
const DRAM_TRANSLATED_Y: [u32; 12] = [16, 18, 19, 20, 27, 21, 17, 22, 23, 24, 25, 26];

fn dram_translated(noc0: (u32, u32)) -> Option<(u32, u32)> {
    let x = DRAM_TRANSLATED_X
        .iter()
        .find(|(noc_x, _)| *noc_x == noc0.0)
        .map(|(_, x)| *x)?;
    let y = DRAM_TRANSLATED_Y.get(noc0.1 as usize)?;
    Some((x, *y))
}

/// Eth columns skip x=5 and rows are 0 and 6; both collapse to a dense block.
fn eth_translated(noc0: (u32, u32)) -> (u32, u32) {
    let (mut x, mut y) = noc0;
    if x > 5 {
        x -= 1;
    }
    x = x - 1 + ETH_TRANSLATED_START.0;
    if y == 6 {
        y = 1;
    }
    (x, y + ETH_TRANSLATED_START.1)
}

pub(crate) fn fill_translated(builder: &mut MapBuilder) -> Result<(), CoordinateError> {
    if !builder.translation_enabled {
        for core_type in [
            CoreType::Tensix,
            CoreType::Dram,
            CoreType::Eth,
            CoreType::Arc,
            CoreType::Pcie,
        ] {
            builder.identity_translated(core_type);
        }
        return Ok(());
    }

    let layout = builder.layout;
    let tensix_mask = builder.masks.tensix;
    let (grid_x, grid_y) = layout.tensix_grid_size();
    let num_harvested = tensix_mask.count_ones() as usize;

    for y in 0..grid_y - num_harvested {
        for x in 0..grid_x {
            let noc0 = builder.logical_noc0(x, y, CoreType::Tensix)?;
            let translated = (
                x as u32 + TENSIX_TRANSLATED_START.0,
                y as u32 + TENSIX_TRANSLATED_START.1,
            );
            builder.add_translated(translated, CoreType::Tensix, noc0);
        }
    }

    // Harvested rows are folded below the last good row, in noc order.
    let mut translated_y = TENSIX_TRANSLATED_START.1 + (grid_y - num_harvested) as u32;
    for y in (0..grid_y).filter(|y| is_harvested(tensix_mask, *y)) {
        for x in 0..grid_x {
            let translated = (x as u32 + TENSIX_TRANSLATED_START.0, translated_y);
            builder.add_translated(translated, CoreType::Tensix, layout.tensix_core(x, y));
        }
        translated_y += 1;
    }

    for noc0 in layout.dram_cores {
        let translated = dram_translated(*noc0).ok_or(CoordinateError::UnsupportedHarvesting {
            arch: layout.arch,
            reason: format!("no translated location for dram core {noc0:?}"),
        })?;
        builder.add_translated(translated, CoreType::Dram, *noc0);
    }

    for noc0 in layout.eth_cores {
        builder.add_translated(eth_translated(*noc0), CoreType::Eth, *noc0);
    }

    builder.identity_translated(CoreType::Arc);
    builder.identity_translated(CoreType::Pcie);

    Ok(())
}
