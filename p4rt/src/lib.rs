// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! P4Runtime and P4Info messages.
//!
//! These are maintained by hand rather than generated at build time, and only
//! carry the fields consumed by the translation and programming layers.  Tags
//! match `p4runtime.proto`, `p4info.proto` and `p4types.proto`, so messages
//! remain wire-compatible with any P4Runtime peer: unknown fields are skipped
//! on decode.

pub mod config;
pub mod v1;
