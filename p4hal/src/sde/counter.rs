// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::time::Duration;

use slog::debug;

use aal::{SdeOps, TableOperation};

use super::Sde;
use crate::types::HalResult;

pub(crate) const COUNTER_INDEX: &str = "$COUNTER_INDEX";

/// The value of one indirect counter cell.  Counts the counter doesn't keep
/// are `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterValue {
    pub index: u32,
    pub bytes: Option<u64>,
    pub packets: Option<u64>,
}

impl<S: SdeOps> Sde<S> {
    /// Sets one cell of an indirect counter.  Zeroing both counts resets
    /// every cell of the counter.
    pub fn write_indirect_counter(
        &self,
        table_id: u32,
        index: u32,
        bytes: Option<u64>,
        packets: Option<u64>,
    ) -> HalResult<()> {
        let bytes = bytes.unwrap_or(0);
        let packets = packets.unwrap_or(0);
        if bytes == 0 && packets == 0 {
            debug!(self.log, "resetting counter"; "table" => table_id);
            return self.clear_table(table_id);
        }

        let mut key = self.create_table_key(table_id)?;
        key.set_index(COUNTER_INDEX, index)?;
        let mut data = self.create_table_data(table_id, None)?;
        data.set_counter_data(bytes, packets)?;
        self.modify_table_entry(table_id, &key, &data)
    }

    /// Reads one cell of an indirect counter, or all of them if `index` is
    /// `None`.  The SDK's copy is synced from the hardware first.
    pub fn read_indirect_counter(
        &self,
        table_id: u32,
        index: Option<u32>,
        timeout: Duration,
    ) -> HalResult<Vec<CounterValue>> {
        self.synchronize(table_id, TableOperation::CounterSync, timeout)?;

        let entries = match index {
            Some(i) => {
                let mut key = self.create_table_key(table_id)?;
                key.set_index(COUNTER_INDEX, i)?;
                let data = self.get_table_entry(table_id, &key)?;
                vec![(key, data)]
            }
            None => self.get_all_entries(table_id)?,
        };

        entries
            .into_iter()
            .map(|(key, data)| {
                let (bytes, packets) = data.get_counter_data()?;
                Ok(CounterValue {
                    index: key.get_index(COUNTER_INDEX)?,
                    bytes,
                    packets,
                })
            })
            .collect()
    }
}
