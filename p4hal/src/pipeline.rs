// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Id-indexed access to the low-level P4Info of the running pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use p4rt::config::v1 as p4info;
use p4rt::config::v1::{P4Info, Preamble};

use crate::hal_err;
use crate::types::HalResult;

fn id_of(preamble: &Option<Preamble>) -> u32 {
    preamble.as_ref().map(|p| p.id).unwrap_or(0)
}

pub(crate) fn name_of(preamble: &Option<Preamble>) -> &str {
    preamble.as_ref().map(|p| p.name.as_str()).unwrap_or("")
}

// Position of every object in its P4Info list, keyed by id
fn index<T>(
    objs: &[T],
    preamble: impl Fn(&T) -> &Option<Preamble>,
) -> HashMap<u32, usize> {
    objs.iter()
        .enumerate()
        .map(|(i, o)| (id_of(preamble(o)), i))
        .collect()
}

#[derive(Debug, Default)]
pub struct PipelineInfo {
    p4info: Arc<P4Info>,
    tables: HashMap<u32, usize>,
    actions: HashMap<u32, usize>,
    action_profiles: HashMap<u32, usize>,
    counters: HashMap<u32, usize>,
    direct_counters: HashMap<u32, usize>,
    meters: HashMap<u32, usize>,
    registers: HashMap<u32, usize>,
}

macro_rules! lookup {
    ($fn:ident, $field:ident, $ty:ty, $what:literal) => {
        pub fn $fn(&self, id: u32) -> HalResult<&$ty> {
            self.$field
                .get(&id)
                .map(|i| &self.p4info.$field[*i])
                .ok_or_else(|| {
                    hal_err!(NotFound, "Could not find {} {id}.", $what)
                })
        }
    };
}

impl PipelineInfo {
    pub fn new(p4info: Arc<P4Info>) -> Self {
        PipelineInfo {
            tables: index(&p4info.tables, |t| &t.preamble),
            actions: index(&p4info.actions, |a| &a.preamble),
            action_profiles: index(&p4info.action_profiles, |a| {
                &a.preamble
            }),
            counters: index(&p4info.counters, |c| &c.preamble),
            direct_counters: index(&p4info.direct_counters, |c| {
                &c.preamble
            }),
            meters: index(&p4info.meters, |m| &m.preamble),
            registers: index(&p4info.registers, |r| &r.preamble),
            p4info,
        }
    }

    pub fn p4info(&self) -> &P4Info {
        &self.p4info
    }

    lookup!(table, tables, p4info::Table, "table");
    lookup!(action, actions, p4info::Action, "action");
    lookup!(
        action_profile,
        action_profiles,
        p4info::ActionProfile,
        "action profile"
    );
    lookup!(counter, counters, p4info::Counter, "counter");
    lookup!(
        direct_counter,
        direct_counters,
        p4info::DirectCounter,
        "direct counter"
    );
    lookup!(meter, meters, p4info::Meter, "meter");
    lookup!(register, registers, p4info::Register, "register");

    pub fn table_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.p4info.tables.iter().map(|t| id_of(&t.preamble))
    }

    /// Whether any direct counter is attached to `table_id`.
    pub fn has_direct_counter(&self, table_id: u32) -> bool {
        self.p4info
            .direct_counters
            .iter()
            .any(|c| c.direct_table_id == table_id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::fixtures;
    use crate::types::ErrorKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_lookups() -> anyhow::Result<()> {
        let info = PipelineInfo::new(Arc::new(fixtures::p4info()));
        let fwd = info.table(fixtures::P4_FWD)?;
        assert_eq!(name_of(&fwd.preamble), "Ingress.ipv4_lpm");
        assert_eq!(info.action(fixtures::ACT_FWD)?.params.len(), 1);
        assert_eq!(info.register(fixtures::P4_REG)?.size, 4);
        assert!(info.has_direct_counter(fixtures::P4_ACL));
        assert!(!info.has_direct_counter(fixtures::P4_FWD));
        assert_eq!(info.table_ids().count(), 4);

        let err = info.meter(fixtures::P4_REG).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        Ok(())
    }
}
