// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Translates P4Runtime requests into table operations on a Tofino SDK.

pub mod action_profile_manager;
pub mod config;
pub mod counter_manager;
pub mod helpers;
pub mod id_mapper;
pub mod meter_manager;
pub mod node;
pub mod pipeline;
pub mod pre_manager;
pub mod sde;
pub mod table_manager;
pub mod translator;
pub mod types;
pub mod writer;

#[cfg(test)]
pub(crate) mod fixtures;

pub use node::{Node, PipelineConfig};
pub use types::{ErrorKind, HalError, HalResult};
