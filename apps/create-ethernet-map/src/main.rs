// SPDX-FileCopyrightText: © 2023 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeSet;
use std::path::PathBuf;

use clap::Parser;
use create_ethernet_map::{generate_map, summary, MapError, MapSource};
use luwen_cluster::{ChipId, TopologyDiscoveryOptions};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Write a cluster descriptor describing every chip and ethernet link.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CmdArgs {
    /// Output file, defaults to the shared descriptor location
    file: Option<PathBuf>,

    /// Read an existing descriptor instead of discovering
    #[arg(long, conflicts_with = "mock")]
    from: Option<PathBuf>,

    /// Discover a simulated chain of this many n300 boards
    #[arg(long)]
    mock: Option<usize>,

    /// Only keep these chip ids
    #[arg(long, value_delimiter = ',')]
    constrain: Vec<ChipId>,

    /// Do not follow ethernet links to chips without a host interface
    #[arg(long, default_value_t = false)]
    no_remote_discovery: bool,

    /// Print a json summary to stdout
    #[arg(long, default_value_t = false)]
    json: bool,
}

fn main() -> Result<(), MapError> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let args = CmdArgs::parse();

    let source = match (args.mock, args.from) {
        (Some(boards), _) => MapSource::Mock { boards },
        (None, Some(path)) => MapSource::Snapshot(path),
        (None, None) => MapSource::Snapshot(luwen_cluster::api::cluster_descriptor::default_snapshot_path()),
    };
    let options = TopologyDiscoveryOptions::default().no_remote_discovery(args.no_remote_discovery);
    let constrain = (!args.constrain.is_empty())
        .then(|| args.constrain.iter().copied().collect::<BTreeSet<_>>());

    let (descriptor, path) =
        generate_map(&source, options, constrain.as_ref(), args.file.as_deref())?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary(&descriptor))?);
    } else {
        println!(
            "Wrote {} chips ({} with mmio) to {}",
            descriptor.number_of_chips(),
            descriptor.chips_with_mmio().len(),
            path.display()
        );
    }

    Ok(())
}
