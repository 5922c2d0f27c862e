// SPDX-FileCopyrightText: © 2023 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

use luwen_def::{CoreType, HarvestingMasks};

use crate::error::CoordinateError;
use crate::layout::SocLayout;
use crate::manager::{is_harvested, MapBuilder};

pub const ETH_TRANSLATED_START: (u32, u32) = (20, 25);
pub const PCIE_TRANSLATED_START: (u32, u32) = (19, 24);
pub const DRAM_TRANSLATED_START: (u32, u32) = (17, 12);

pub const NUM_DRAM_BANKS: usize = 8;
pub const NUM_NOC_PORTS_PER_DRAM_BANK: usize = 3;
pub const NUM_ETH_CHANNELS: usize = 14;

pub(crate) fn validate(layout: &SocLayout, masks: &HarvestingMasks) -> Result<(), CoordinateError> {
    if masks.dram.count_ones() > 1 {
        return Err(CoordinateError::UnsupportedHarvesting {
            arch: layout.arch,
            reason: "at most one dram bank can be harvested".to_string(),
        });
    }

    let eth_harvested = masks.eth.count_ones() as usize;
    if layout.eth_cores.len() == NUM_ETH_CHANNELS
        && eth_harvested != 2
        && eth_harvested != NUM_ETH_CHANNELS
    {
        return Err(CoordinateError::UnsupportedHarvesting {
            arch: layout.arch,
            reason: format!(
                "exactly 2 or {NUM_ETH_CHANNELS} eth cores must be harvested, got {eth_harvested}"
            ),
        });
    }

    Ok(())
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

    fill_tensix(builder);
    fill_dram(builder)?;
    fill_eth(builder)?;
    fill_pcie(builder)?;
    builder.identity_translated(CoreType::Arc);

    Ok(())
}

/// Good columns keep their left-packed position, harvested columns take the
/// right edge ordered by where they sit on the die.
fn fill_tensix(builder: &mut MapBuilder) {
    let layout = builder.layout;
    let mask = builder.masks.tensix;
    let (grid_x, grid_y) = layout.tensix_grid_size();

    let mut logical_x = 0;
    let mut harvested_columns = Vec::new();
    for x in 0..grid_x {
        if is_harvested(mask, x) {
            let noc0_x = layout.tensix_x[x];
            let die_index = layout
                .harvesting_noc_locations
                .iter()
                .position(|location| *location == noc0_x)
                .unwrap_or(usize::MAX);
            harvested_columns.push((die_index, x));
        } else {
            for y in 0..grid_y {
                builder.add_translated(
                    layout.tensix_core(logical_x, y),
                    CoreType::Tensix,
                    layout.tensix_core(x, y),
                );
            }
            logical_x += 1;
        }
    }

    harvested_columns.sort();
    for (x_index, (_, x)) in (0..grid_x).rev().zip(harvested_columns) {
        for y in 0..grid_y {
            builder.add_translated(
                layout.tensix_core(x_index, y),
                CoreType::Tensix,
                layout.tensix_core(x, y),
            );
        }
    }
}

/// Map logical banks `start..end` onto consecutive translated rows of column `x`.
fn map_dram_banks(
    builder: &mut MapBuilder,
    banks: std::ops::Range<usize>,
    x: u32,
    y: u32,
) -> Result<(), CoordinateError> {
    let mut translated_y = y;
    for bank in banks {
        for port in 0..NUM_NOC_PORTS_PER_DRAM_BANK {
            let noc0 = builder.logical_noc0(bank, port, CoreType::Dram)?;
            builder.add_translated((x, translated_y), CoreType::Dram, noc0);
            translated_y += 1;
        }
    }
    Ok(())
}

/// With one bank harvested its physical twin on the other side of the die is
/// moved into the harvested bank's slot, so both columns keep three good banks.
fn fill_dram(builder: &mut MapBuilder) -> Result<(), CoordinateError> {
    let layout = builder.layout;
    let (banks, ports) = layout.dram_grid_size;
    if banks < NUM_DRAM_BANKS {
        builder.identity_translated(CoreType::Dram);
        return Ok(());
    }

    let (west_x, start_y) = DRAM_TRANSLATED_START;
    let east_x = west_x + 1;
    let half = NUM_DRAM_BANKS / 2;
    let port_rows = NUM_NOC_PORTS_PER_DRAM_BANK as u32;
    let last_slot_y = start_y + (half as u32 - 1) * port_rows;

    let Some(harvested_bank) = (0..banks).find(|bank| is_harvested(builder.masks.dram, *bank))
    else {
        map_dram_banks(builder, 0..half, west_x, start_y)?;
        map_dram_banks(builder, half..NUM_DRAM_BANKS, east_x, start_y)?;
        return Ok(());
    };

    if harvested_bank < half {
        let mirror_east = harvested_bank + half - 1;
        map_dram_banks(builder, 0..half - 1, east_x, start_y)?;
        map_dram_banks(builder, half - 1..mirror_east, west_x, start_y)?;
        map_dram_banks(
            builder,
            mirror_east + 1..NUM_DRAM_BANKS - 1,
            west_x,
            start_y + (mirror_east - (half - 1)) as u32 * port_rows,
        )?;
        map_dram_banks(builder, mirror_east..mirror_east + 1, west_x, last_slot_y)?;
    } else {
        let mirror_west = harvested_bank - half;
        map_dram_banks(builder, 0..mirror_west, west_x, start_y)?;
        map_dram_banks(
            builder,
            mirror_west + 1..half,
            west_x,
            start_y + mirror_west as u32 * port_rows,
        )?;
        map_dram_banks(builder, mirror_west..mirror_west + 1, west_x, last_slot_y)?;
        map_dram_banks(builder, half..NUM_DRAM_BANKS - 1, east_x, start_y)?;
    }

    for port in 0..ports {
        let noc0 = layout.dram_cores[harvested_bank * ports + port];
        builder.add_translated((east_x, last_slot_y + port as u32), CoreType::Dram, noc0);
    }

    Ok(())
}

fn fill_eth(builder: &mut MapBuilder) -> Result<(), CoordinateError> {
    let layout = builder.layout;
    let mask = builder.masks.eth;
    let good = layout.eth_cores.len() - mask.count_ones() as usize;

    for channel in 0..good {
        let noc0 = builder.logical_noc0(0, channel, CoreType::Eth)?;
        let translated = (
            ETH_TRANSLATED_START.0 + channel as u32,
            ETH_TRANSLATED_START.1,
        );
        builder.add_translated(translated, CoreType::Eth, noc0);
    }

    for (channel, noc0) in layout.eth_cores.iter().enumerate() {
        if is_harvested(mask, channel) {
            builder.add_translated(*noc0, CoreType::Eth, *noc0);
        }
    }

    Ok(())
}

/// Only the first good pcie core gets a fixed translated location.
fn fill_pcie(builder: &mut MapBuilder) -> Result<(), CoordinateError> {
    let layout = builder.layout;
    let mask = builder.masks.pcie;
    let good = layout.pcie_grid_size.0 - mask.count_ones() as usize;

    for x in 0..good {
        let noc0 = builder.logical_noc0(x, 0, CoreType::Pcie)?;
        let translated = if x == 0 { PCIE_TRANSLATED_START } else { noc0 };
        builder.add_translated(translated, CoreType::Pcie, noc0);
    }

    for (x, noc0) in layout.pcie_cores.iter().enumerate() {
        if is_harvested(mask, x) {
            builder.add_translated(*noc0, CoreType::Pcie, *noc0);
        }
    }

    Ok(())
}
