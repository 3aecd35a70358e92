// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::sync::Arc;

use anyhow::Context;
use prost::Message;
use slog::info;
use structopt::StructOpt;

use p4hal::config::{ChassisConfig, Config};
use p4hal::sde::Sde;
use p4hal::{Node, PipelineConfig};
use p4rt::config::v1::P4Info;

#[derive(Debug, Default, StructOpt)]
#[structopt(
    name = "p4hal",
    about = "P4Runtime translation and table programming for Tofino"
)]
struct Opt {
    #[structopt(long, help = "TOML file with the run-time configuration")]
    config: Option<String>,

    #[structopt(
        long,
        help = "send log data to the named file rather than stdout"
    )]
    log_file: Option<String>,

    #[structopt(
        long,
        short = "l",
        help = "format logs for 'human' or 'json' consumption"
    )]
    log_format: Option<common::logging::LogFormat>,

    #[structopt(long, help = "SDK device to program")]
    device: Option<u32>,

    #[structopt(long, help = "bfrt.json describing the loaded pipeline")]
    bfrt: Option<String>,

    #[structopt(long, help = "binary-encoded P4Info to push at startup")]
    p4info: Option<String>,

    #[structopt(long, help = "compiler context.json for the pipeline")]
    context: Option<String>,

    #[structopt(long, help = "TOML file listing the chassis' ports")]
    chassis_config: Option<String>,

    #[structopt(long, help = "counter and register sync timeout in ms")]
    sync_timeout_ms: Option<u64>,

    #[structopt(
        long,
        help = "report ports padded to their SDN width in read responses"
    )]
    legacy_bytestring_responses: bool,

    #[cfg(feature = "chaos")]
    #[structopt(long, help = "path to the chaos testing configuration")]
    chaos_config: Option<String>,
}

// Use the command-line arguments to update the run-time config.
fn update_from_cli(opts: &Opt, config: &mut Config) -> anyhow::Result<()> {
    if let Some(log_file) = &opts.log_file {
        config.log_file = Some(log_file.to_string());
    }
    if let Some(log_format) = opts.log_format {
        config.log_format = log_format;
    }
    if let Some(device) = opts.device {
        config.device = device;
    }
    if let Some(bfrt) = &opts.bfrt {
        config.bfrt = bfrt.to_string();
    }
    if let Some(p4info) = &opts.p4info {
        config.p4info = Some(p4info.to_string());
    }
    if let Some(context) = &opts.context {
        config.context = Some(context.to_string());
    }
    if let Some(chassis) = &opts.chassis_config {
        config.chassis_config = Some(chassis.to_string());
    }
    if let Some(ms) = opts.sync_timeout_ms {
        config.sync_timeout_ms = ms;
    }
    if opts.legacy_bytestring_responses {
        config.legacy_bytestring_responses = true;
    }

    #[cfg(feature = "chaos")]
    {
        if let Some(path) = &opts.chaos_config {
            let txt = std::fs::read_to_string(path)
                .with_context(|| format!("reading {path}"))?;
            config.asic = toml::from_str(&txt)
                .with_context(|| format!("parsing {path}"))?;
        }
    }

    Ok(())
}

fn build_config(opts: &Opt) -> anyhow::Result<Config> {
    let mut config = match &opts.config {
        Some(path) => {
            let txt = std::fs::read_to_string(path)
                .with_context(|| format!("reading {path}"))?;
            Config::from_toml(&txt)?
        }
        None => Config::default(),
    };
    update_from_cli(opts, &mut config)?;
    Ok(config)
}

fn read_pipeline(config: &Config) -> anyhow::Result<Option<PipelineConfig>> {
    let Some(path) = &config.p4info else {
        return Ok(None);
    };
    let raw =
        std::fs::read(path).with_context(|| format!("reading {path}"))?;
    let p4info = P4Info::decode(raw.as_slice())
        .with_context(|| format!("decoding P4Info from {path}"))?;
    let context = match &config.context {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading {path}"))?,
        None => String::from("{}"),
    };
    Ok(Some(PipelineConfig { p4info, context }))
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let opt = Opt::from_args();
    let config = build_config(&opt)?;

    let log =
        common::logging::init("p4hal", &config.log_file, config.log_format)?;
    info!(log, "p4hal config: {config:#?}");

    let hdl = asic::Handle::new(&log, &config.bfrt, &config.asic)
        .with_context(|| format!("loading {}", config.bfrt))?;
    let sde = Arc::new(Sde::new(&log, Arc::new(hdl), config.device));
    let node = Node::new(&log, sde, &config);

    if let Some(path) = &config.chassis_config {
        let txt = std::fs::read_to_string(path)
            .with_context(|| format!("reading {path}"))?;
        node.push_chassis_config(&ChassisConfig::from_toml(&txt)?)?;
    }
    if let Some(pipeline) = read_pipeline(&config)? {
        node.push_forwarding_pipeline_config(&pipeline)?;
    }

    info!(log, "p4hal ready");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!(log, "shutting down");
    Ok(())
}
