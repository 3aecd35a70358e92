// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

#[cfg(not(any(feature = "tofino_stub", feature = "chaos")))]
compile_error! {"must set tofino_stub or chaos feature"}

pub mod tofino_common;

#[cfg(feature = "tofino_stub")]
pub mod tofino_stub;
#[cfg(all(feature = "tofino_stub", not(feature = "chaos")))]
mod plat {
    pub use super::tofino_stub::AsicConfig;
    pub use super::tofino_stub::StubHandle as Handle;
}

#[cfg(feature = "chaos")]
pub mod chaos;
#[cfg(feature = "chaos")]
mod plat {
    pub use super::chaos::AsicConfig;
    pub use super::chaos::Handle;
}

pub use plat::AsicConfig;
pub use plat::Handle;
