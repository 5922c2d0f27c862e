// SPDX-FileCopyrightText: © 2023 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

//! Scenario tests for topology discovery
//!
//! Every test builds a mock ethernet fabric, discovers it from its host
//! attached chips and checks the compiled cluster descriptor.

#![cfg(test)]

use std::collections::{BTreeMap, BTreeSet};

use luwen_cluster::api::chip::mock::{MockChipConfig, MockFabric};
use luwen_cluster::def::EthCoord;
use luwen_cluster::{
    Arch, BoardType, ClusterDescriptor, DiscoveryError, TopologyDiscovery,
    TopologyDiscoveryOptions,
};

use serial_test::serial;


use test_utils::{add_n300, board_id, two_n300s, N150_UPI, P150_UPI, P300_UPI, UBB_WORMHOLE_UPI};

fn discover(
    fabric: &MockFabric,
    options: TopologyDiscoveryOptions,
) -> Result<ClusterDescriptor, DiscoveryError> {
    let cluster = fabric.build().unwrap();
    TopologyDiscovery::discover(cluster.local_devices(), options)
}

#[test]
#[serial]
fn n300_remote_chip() {
    let mut fabric = MockFabric::new(Arch::Wormhole);
    add_n300(&mut fabric, 0x100, 0);
    let descriptor = discover(&fabric, Default::default()).unwrap();

    assert_eq!(descriptor.number_of_chips(), 2);
    assert_eq!(descriptor.chips_with_mmio(), &BTreeMap::from([(0, 0)]));
    assert!(descriptor.is_chip_remote(1));
    assert_eq!(descriptor.closest_mmio_capable_chip(1), Some(0));
    assert_eq!(descriptor.directly_connected_channels(0, 1), vec![(8, 0), (9, 1)]);
    assert_eq!(descriptor.directly_connected_channels(1, 0), vec![(0, 8), (1, 9)]);
    assert_eq!(descriptor.active_eth_channels(1), BTreeSet::from([0, 1]));
    assert_eq!(descriptor.idle_eth_channels(0).len(), 14);

    assert_eq!(descriptor.chip_location(0), Some(EthCoord::new(0, 0, 0, 0)));
    assert_eq!(descriptor.chip_location(1), Some(EthCoord::new(1, 0, 0, 0)));
    assert_eq!(descriptor.unique_id(1), Some((1 << 32) | 0x100));
    assert_eq!(descriptor.asic_location(1), 1);

    let board = board_id(0x14, 0x100);
    assert_eq!(descriptor.board_type(1).unwrap(), BoardType::N300);
    assert_eq!(descriptor.board_id_for_chip(1).unwrap(), board);
    assert_eq!(descriptor.board_chips(board).unwrap(), &BTreeSet::from([0, 1]));
    assert!(descriptor.verify().unwrap());
}

#[test]
#[serial]
fn two_boards_assign_mmio_ids_first() {
    let (fabric, _) = two_n300s();
    let descriptor = discover(&fabric, Default::default()).unwrap();

    assert_eq!(descriptor.number_of_chips(), 4);
    assert_eq!(descriptor.chips_with_mmio(), &BTreeMap::from([(0, 0), (1, 1)]));
    assert_eq!(descriptor.remote_chip_and_channel(0, 0), Some((1, 0)));
    assert_eq!(descriptor.remote_chip_and_channel(0, 8), Some((2, 0)));
    assert_eq!(descriptor.remote_chip_and_channel(1, 9), Some((3, 1)));
    assert_eq!(descriptor.remote_chip_and_channel(2, 6), Some((3, 6)));
    assert_eq!(descriptor.remote_chip_and_channel(3, 6), Some((2, 6)));

    assert_eq!(descriptor.closest_mmio_capable_chip(2), Some(0));
    assert_eq!(descriptor.closest_mmio_capable_chip(3), Some(1));
    assert_eq!(
        descriptor.chips_grouped_by_closest_mmio(),
        &BTreeMap::from([(0, BTreeSet::from([0, 2])), (1, BTreeSet::from([1, 3]))])
    );
    assert_eq!(descriptor.chips_local_first([3, 0, 2, 1]).unwrap(), vec![0, 1, 2, 3]);
    assert_eq!(descriptor.boards().len(), 2);
    assert!(descriptor.verify().unwrap());
}

#[test]
#[serial]
fn discovery_is_repeatable() {
    let (fabric, _) = two_n300s();
    let first = discover(&fabric, Default::default()).unwrap();
    let second = discover(&fabric, Default::default()).unwrap();
    assert_eq!(first, second);
}

#[test]
#[serial]
fn remote_chip_behind_remote_chip() {
    let mut fabric = MockFabric::new(Arch::Wormhole);
    let (_, right) = add_n300(&mut fabric, 0x100, 0);
    // No programmed board type, so it is accepted although its board is not local.
    let far = fabric.add_chip(MockChipConfig::new(board_id(N150_UPI, 0x300)).eth_board_type(0));
    fabric.connect((right, 6), (far, 6));

    let descriptor = discover(&fabric, Default::default()).unwrap();
    assert_eq!(descriptor.number_of_chips(), 3);
    // Remote ids follow asic id order: the n150 has no upper asic word.
    assert_eq!(descriptor.unique_id(1), Some(0x300));
    assert_eq!(descriptor.remote_chip_and_channel(1, 6), Some((2, 6)));
    assert_eq!(descriptor.closest_mmio_capable_chip(1), Some(0));
    assert_eq!(descriptor.chip_location(1), Some(EthCoord::new(2, 0, 0, 0)));
    assert_eq!(descriptor.board_type(1).unwrap(), BoardType::N150);
}

#[test]
#[serial]
fn foreign_board_is_external() {
    let mut fabric = MockFabric::new(Arch::Wormhole);
    let local = fabric.add_chip(MockChipConfig::new(board_id(N150_UPI, 0x10)).local(0));
    let foreign = fabric.add_chip(MockChipConfig::new(board_id(N150_UPI, 0x400)));
    fabric.connect((local, 0), (foreign, 3));

    let descriptor = discover(&fabric, Default::default()).unwrap();
    assert_eq!(descriptor.number_of_chips(), 1);
    assert!(descriptor.ethernet_connections().is_empty());
    assert_eq!(
        descriptor.ethernet_connections_to_remote_devices(),
        &BTreeMap::from([(0, BTreeMap::from([(0, (0x400, 3))]))])
    );
    assert!(descriptor.ethernet_core_has_active_link(0, 0));
    assert!(!descriptor.idle_eth_channels(0).contains(&0));
}

#[test]
#[serial]
fn no_remote_discovery_keeps_local_chips() {
    let mut fabric = MockFabric::new(Arch::Wormhole);
    add_n300(&mut fabric, 0x100, 0);
    let options = TopologyDiscoveryOptions::default().no_remote_discovery(true);
    let descriptor = discover(&fabric, options).unwrap();

    let right = (1 << 32) | 0x100;
    assert_eq!(descriptor.number_of_chips(), 1);
    assert_eq!(
        descriptor.ethernet_connections_to_remote_devices()[&0],
        BTreeMap::from([(8, (right, 0)), (9, (right, 1))])
    );
    assert_eq!(descriptor.active_eth_channels(0), BTreeSet::from([8, 9]));
}

#[test]
#[serial]
fn unreachable_remote_chip_is_external() {
    let mut fabric = MockFabric::new(Arch::Wormhole);
    let (_, right) = add_n300(&mut fabric, 0x100, 0);
    fabric.set_failing_device_info(right);

    let descriptor = discover(&fabric, Default::default()).unwrap();
    let right = (1 << 32) | 0x100;
    assert_eq!(descriptor.number_of_chips(), 1);
    assert_eq!(
        descriptor.ethernet_connections_to_remote_devices()[&0],
        BTreeMap::from([(8, (right, 0)), (9, (right, 1))])
    );
}

#[test]
#[serial]
fn link_survives_failed_read_back() {
    let mut fabric = MockFabric::new(Arch::Wormhole);
    let (_, right) = add_n300(&mut fabric, 0x100, 0);
    // The remote chip cannot read its side of the link on channel 0.
    fabric.set_failing(right, 0);

    let descriptor = discover(&fabric, Default::default()).unwrap();
    assert_eq!(descriptor.number_of_chips(), 2);
    assert_eq!(descriptor.remote_chip_and_channel(0, 8), Some((1, 0)));
    assert_eq!(descriptor.remote_chip_and_channel(1, 0), Some((0, 8)));
    assert_eq!(descriptor.remote_chip_and_channel(0, 9), Some((1, 1)));
    assert!(descriptor.ethernet_core_has_active_link(0, 8));
    assert!(descriptor.ethernet_connections_to_remote_devices().is_empty());
    for chip in descriptor.chips() {
        for channel in descriptor.active_eth_channels(*chip) {
            assert!(descriptor.ethernet_core_has_active_link(*chip, channel));
        }
    }

    let reloaded = ClusterDescriptor::from_yaml(&descriptor.to_yaml().unwrap()).unwrap();
    assert_eq!(reloaded.ethernet_connections(), descriptor.ethernet_connections());
    assert_eq!(reloaded.active_eth_channels(0), descriptor.active_eth_channels(0));
    assert_eq!(reloaded.active_eth_channels(1), descriptor.active_eth_channels(1));
}

#[test]
#[serial]
fn blackhole_p300_with_foreign_link() {
    let board = board_id(P300_UPI, 0x10);
    let mut fabric = MockFabric::new(Arch::Blackhole);
    let left = fabric.add_chip(MockChipConfig::new(board).local(0));
    let right = fabric.add_chip(MockChipConfig::new(board).asic_location(1).local(1));
    let foreign = fabric.add_chip(MockChipConfig::new(board_id(P150_UPI, 0x20)));
    fabric
        .connect((left, 4), (right, 4))
        .connect((left, 5), (right, 6))
        .connect((left, 7), (foreign, 9));
    let cluster = fabric.build().unwrap();

    let descriptor =
        TopologyDiscovery::discover(cluster.local_devices(), Default::default()).unwrap();
    assert_eq!(descriptor.number_of_chips(), 2);
    assert_eq!(descriptor.unique_id(0), Some(cluster.asic_id(left)));
    assert_eq!(descriptor.unique_id(1), Some(cluster.asic_id(right)));
    assert_eq!(descriptor.remote_chip_and_channel(0, 4), Some((1, 4)));
    assert_eq!(descriptor.remote_chip_and_channel(0, 5), Some((1, 6)));
    assert_eq!(descriptor.remote_chip_and_channel(1, 6), Some((0, 5)));
    assert_eq!(
        descriptor.ethernet_connections_to_remote_devices()[&0],
        BTreeMap::from([(7, (cluster.asic_id(foreign), 9))])
    );
    assert_eq!(descriptor.harvesting_masks(0).eth, 0x120);
    assert_eq!(descriptor.idle_eth_channels(0).len(), 9);
    assert_eq!(descriptor.chip_location(0), None);
    assert_eq!(descriptor.board_chips(board).unwrap().len(), 2);
    assert!(descriptor.verify().unwrap());
}

#[test]
#[serial]
fn wormhole_6u_tray() {
    let board = board_id(UBB_WORMHOLE_UPI, 0x500);
    let mut fabric = MockFabric::new(Arch::Wormhole);
    let chips = (0..4)
        .map(|i| fabric.add_chip(MockChipConfig::new(board).asic_location(i).local(i as u32)))
        .collect::<Vec<_>>();
    let other_tray = fabric.add_chip(MockChipConfig::new(board_id(UBB_WORMHOLE_UPI, 0x600)));
    fabric
        .connect((chips[0], 0), (chips[1], 1))
        .connect((chips[1], 2), (chips[2], 3))
        .connect((chips[2], 4), (chips[3], 5))
        .connect((chips[3], 6), (chips[0], 7))
        .connect((chips[0], 10), (other_tray, 10));

    let descriptor = discover(&fabric, Default::default()).unwrap();
    assert_eq!(descriptor.number_of_chips(), 4);
    assert_eq!(descriptor.chips_with_mmio().len(), 4);
    for chip in 0..4 {
        assert_eq!(descriptor.unique_id(chip), Some(((chip as u64) << 32) | 0x500));
        assert_eq!(descriptor.chip_location(chip), None);
        assert_eq!(descriptor.closest_mmio_capable_chip(chip), Some(chip));
    }
    assert_eq!(descriptor.remote_chip_and_channel(0, 0), Some((1, 1)));
    assert_eq!(descriptor.remote_chip_and_channel(2, 4), Some((3, 5)));
    assert_eq!(descriptor.remote_chip_and_channel(0, 7), Some((3, 6)));
    assert_eq!(
        descriptor.ethernet_connections_to_remote_devices()[&0],
        BTreeMap::from([(10, (0x600, 10))])
    );
}

#[test]
#[serial]
fn constrained_view_of_discovered_cluster() {
    let (fabric, _) = two_n300s();
    let full = discover(&fabric, Default::default()).unwrap();
    let constrained = full.constrained(&BTreeSet::from([0, 2])).unwrap();

    assert_eq!(constrained.chips(), &BTreeSet::from([0, 2]));
    assert_eq!(constrained.remote_chip_and_channel(0, 8), Some((2, 0)));
    assert_eq!(constrained.directly_connected_channels(0, 2), vec![(8, 0), (9, 1)]);
    assert_eq!(constrained.directly_connected_channels(2, 0), vec![(0, 8), (1, 9)]);
    assert_eq!(
        constrained.directly_connected_channels(0, 2),
        full.directly_connected_channels(0, 2)
    );
    assert_eq!(constrained.remote_chip_and_channel(0, 0), None);
    assert_eq!(constrained.remote_chip_and_channel(2, 6), None);
    assert_eq!(constrained.closest_mmio_capable_chip(2), Some(0));
    assert_eq!(constrained.active_eth_channels(0), full.active_eth_channels(0));
    assert!(full.constrained(&BTreeSet::from([0, 7])).is_err());
}

#[test]
#[serial]
fn snapshot_preserves_discovered_cluster() {
    let (fabric, _) = two_n300s();
    let descriptor = discover(&fabric, Default::default()).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = descriptor
        .save(Some(dir.path().join("cluster_descriptor.yaml").as_path()))
        .unwrap();
    let loaded = ClusterDescriptor::from_yaml_file(&path).unwrap();

    assert_eq!(loaded.chips(), descriptor.chips());
    assert_eq!(loaded.chips_with_mmio(), descriptor.chips_with_mmio());
    assert_eq!(loaded.ethernet_connections(), descriptor.ethernet_connections());
    assert_eq!(loaded.unique_ids(), descriptor.unique_ids());
    assert_eq!(loaded.chip_locations(), descriptor.chip_locations());
    assert_eq!(loaded.boards(), descriptor.boards());
    assert_eq!(
        loaded.chips_grouped_by_closest_mmio(),
        descriptor.chips_grouped_by_closest_mmio()
    );
    for chip in descriptor.chips() {
        assert_eq!(loaded.board_type(*chip).unwrap(), descriptor.board_type(*chip).unwrap());
        assert_eq!(loaded.harvesting_masks(*chip), descriptor.harvesting_masks(*chip));
        assert_eq!(loaded.idle_eth_channels(*chip), descriptor.idle_eth_channels(*chip));
    }

    let yaml = descriptor.to_yaml().unwrap();
    let value: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
    assert_eq!(value["arch"][0], serde_yaml::Value::from("wormhole_b0"));
    // Each undirected link is written once.
    assert_eq!(value["ethernet_connections"].as_sequence().unwrap().len(), 6);
}

/// Reads back the snapshot a previous discovery left at the default location.
#[test]
#[serial]
#[cfg_attr(
    not(all(feature = "test_hardware", feature = "test_wormhole")),
    ignore = "Requires a discovered Wormhole cluster"
)]
fn default_snapshot_matches_hardware() {
    if !test_utils::hardware_available() {
        return;
    }

    let path = luwen_cluster::api::cluster_descriptor::default_snapshot_path();
    let descriptor = ClusterDescriptor::from_yaml_file(&path).unwrap();
    assert!(descriptor.number_of_chips() > 0);
    assert_eq!(descriptor.arch_of_cluster().unwrap(), Arch::Wormhole);

    let devices = std::fs::read_dir("/dev/tenstorrent").unwrap().count();
    assert_eq!(descriptor.chips_with_mmio().len(), devices);
    for chip in descriptor.chips() {
        assert!(descriptor.closest_mmio_capable_chip(*chip).is_some());
    }
}
