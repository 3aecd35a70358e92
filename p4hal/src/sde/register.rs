// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::time::Duration;

use slog::debug;

use aal::{DataFieldInfo, DataValue, SdeOps, TableInfo, TableOperation};
use common::bytestring::{num_bits_to_num_bytes, to_padded_byte_string};

use super::{cell_range, Sde};
use crate::hal_err;
use crate::types::HalResult;

const REGISTER_INDEX: &str = "$REGISTER_INDEX";

// The compiler names a register's value field after the register itself,
// with an `.f1` suffix.
fn value_field(info: &TableInfo) -> HalResult<&DataFieldInfo> {
    info.data
        .iter()
        .find(|f| f.name.ends_with(".f1"))
        .ok_or_else(|| {
            hal_err!(NotFound, "Register {} has no value field.", info.name)
        })
}

impl<S: SdeOps> Sde<S> {
    /// Writes one register cell, or every cell if `index` is `None`.
    pub fn write_indirect_register(
        &self,
        table_id: u32,
        index: Option<u32>,
        value: &[u8],
    ) -> HalResult<()> {
        let info = self.table_info(table_id)?;
        let field = value_field(&info)?;
        let n = num_bits_to_num_bytes(field.width as usize);
        let value = DataValue::Bytes(to_padded_byte_string(value, n));

        let mut data = self.create_table_data(table_id, None)?;
        data.set_named(&field.name, value)?;
        let indices = cell_range(&info, index)?;
        debug!(self.log, "writing register"; "table" => table_id,
            "cells" => indices.len());
        for i in indices {
            let mut key = self.create_table_key(table_id)?;
            key.set_index(REGISTER_INDEX, i)?;
            self.modify_table_entry(table_id, &key, &data)?;
        }
        Ok(())
    }

    /// Reads one register cell, or every cell if `index` is `None`.  The
    /// SDK reports a value per pipe; the first pipe's value is returned.
    pub fn read_indirect_registers(
        &self,
        table_id: u32,
        index: Option<u32>,
        timeout: Duration,
    ) -> HalResult<Vec<(u32, u64)>> {
        self.synchronize(table_id, TableOperation::RegisterSync, timeout)?;
        let info = self.table_info(table_id)?;
        let field = value_field(&info)?;

        let entries = match index {
            Some(i) => {
                let mut key = self.create_table_key(table_id)?;
                key.set_index(REGISTER_INDEX, i)?;
                let data = self.get_table_entry(table_id, &key)?;
                vec![(key, data)]
            }
            None => self.get_all_entries(table_id)?,
        };

        let mut values = Vec::with_capacity(entries.len());
        for (key, data) in entries {
            let v = match data.get_named(&field.name)? {
                DataValue::UintArray(per_pipe) => {
                    per_pipe.first().copied().ok_or_else(|| {
                        hal_err!(
                            Internal,
                            "Register {} has no pipes.",
                            info.name
                        )
                    })?
                }
                v => v.as_u64()?,
            };
            values.push((key.get_index(REGISTER_INDEX)?, v));
        }
        Ok(values)
    }
}
