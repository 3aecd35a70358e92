// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Configuration for `p4hal`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use aal::PortKey;
use asic::AsicConfig;
use common::logging::LogFormat;

use crate::hal_err;
use crate::types::HalResult;

fn default_sync_timeout_ms() -> u64 {
    1000
}

/// The Config structure captures all of the run-time settings, read from a
/// TOML file and then overridden by any command-line options.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// If set, where the log should be written.  If not set, the log goes to
    /// stdout.
    pub log_file: Option<String>,
    /// Output log info in unstructured text or json?
    pub log_format: LogFormat,
    /// The SDK device being programmed
    pub device: u32,
    /// Path to the `bfrt.json` describing the loaded pipeline
    pub bfrt: String,
    /// Path to the binary-encoded P4Info to push at startup
    pub p4info: Option<String>,
    /// Path to the compiler's `context.json` for the pipeline
    pub context: Option<String>,
    /// Path to a TOML file listing the singleton ports of the chassis
    pub chassis_config: Option<String>,
    /// How long a counter or register sync may take before the read fails
    #[serde(default = "default_sync_timeout_ms")]
    pub sync_timeout_ms: u64,
    /// Report port ids in read responses padded to their SDN width rather
    /// than in canonical form.
    pub legacy_bytestring_responses: bool,
    /// Asic/platform-specific config settings.
    pub asic: AsicConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_file: None,
            log_format: LogFormat::Json,
            device: 0,
            bfrt: String::from("bfrt.json"),
            p4info: None,
            context: None,
            chassis_config: None,
            sync_timeout_ms: default_sync_timeout_ms(),
            legacy_bytestring_responses: false,
            asic: AsicConfig::default(),
        }
    }
}

impl Config {
    pub fn from_toml(txt: &str) -> HalResult<Self> {
        toml::from_str(txt)
            .map_err(|e| hal_err!(InvalidParam, "bad config: {e}"))
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }
}

/// A front-panel port the controller refers to by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SingletonPort {
    pub id: u32,
    pub slot: i32,
    pub port: i32,
    pub channel: Option<i32>,
}

impl SingletonPort {
    pub fn port_key(&self) -> PortKey {
        PortKey {
            slot: self.slot,
            port: self.port,
            channel: self.channel,
        }
    }
}

/// The subset of the chassis configuration this layer consumes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ChassisConfig {
    #[serde(default)]
    pub singleton_ports: Vec<SingletonPort>,
}

impl ChassisConfig {
    pub fn from_toml(txt: &str) -> HalResult<Self> {
        toml::from_str(txt)
            .map_err(|e| hal_err!(InvalidParam, "bad chassis config: {e}"))
    }
}
