// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use slog::debug;

use aal::SdeOps;

use super::{with_objects, Sde, TableData, TableKey};
use crate::hal_err;
use crate::types::{HalError, HalResult};

pub(crate) type Entries<S> =
    Vec<(TableKey<<S as SdeOps>::Key>, TableData<<S as SdeOps>::Data>)>;

impl<S: SdeOps> Sde<S> {
    pub fn insert_table_entry(
        &self,
        table_id: u32,
        key: &TableKey<S::Key>,
        data: &TableData<S::Data>,
    ) -> HalResult<()> {
        debug!(self.log, "insert entry"; "table" => table_id);
        self.hdl
            .entry_add(&self.target(), &key.key, &data.data)
            .map_err(HalError::from)
            .map_err(with_objects(table_id, Some(key), Some(data)))
    }

    pub fn modify_table_entry(
        &self,
        table_id: u32,
        key: &TableKey<S::Key>,
        data: &TableData<S::Data>,
    ) -> HalResult<()> {
        debug!(self.log, "modify entry"; "table" => table_id);
        self.hdl
            .entry_mod(&self.target(), &key.key, &data.data)
            .map_err(HalError::from)
            .map_err(with_objects(table_id, Some(key), Some(data)))
    }

    pub fn delete_table_entry(
        &self,
        table_id: u32,
        key: &TableKey<S::Key>,
    ) -> HalResult<()> {
        debug!(self.log, "delete entry"; "table" => table_id);
        self.hdl
            .entry_del(&self.target(), &key.key)
            .map_err(HalError::from)
            .map_err(with_objects::<_, S::Data>(table_id, Some(key), None))
    }

    pub fn get_table_entry(
        &self,
        table_id: u32,
        key: &TableKey<S::Key>,
    ) -> HalResult<TableData<S::Data>> {
        let data = self
            .hdl
            .entry_get(&self.target(), &key.key)
            .map_err(HalError::from)
            .map_err(with_objects::<_, S::Data>(table_id, Some(key), None))?;
        Ok(TableData::new(key.info.clone(), data))
    }

    /// Reads every entry of a table.  Tables whose entries are preallocated
    /// report all of their indices.
    pub fn get_all_entries(&self, table_id: u32) -> HalResult<Entries<S>> {
        let info = self.table_info(table_id)?;
        let target = self.target();
        let count = match info.is_preallocated() {
            true => self.hdl.table_size(&target, table_id)?,
            false => self.hdl.table_usage(&target, table_id)?,
        };
        if count == 0 {
            return Ok(Vec::new());
        }

        let (first_key, first_data) =
            self.hdl.entry_get_first(&target, table_id)?;
        let rest = match count {
            1 => Vec::new(),
            n => self.hdl.entry_get_next_n(&target, &first_key, n - 1)?,
        };
        if rest.len() != count - 1 {
            return Err(hal_err!(
                Internal,
                "Table {} returned {} entries, expected {count}.",
                info.name,
                rest.len() + 1
            ));
        }

        let mut entries = Vec::with_capacity(count);
        entries.push((
            TableKey::new(info.clone(), first_key),
            TableData::new(info.clone(), first_data),
        ));
        for (k, d) in rest {
            entries.push((
                TableKey::new(info.clone(), k),
                TableData::new(info.clone(), d),
            ));
        }
        Ok(entries)
    }

    pub fn set_default_table_entry(
        &self,
        table_id: u32,
        data: &TableData<S::Data>,
    ) -> HalResult<()> {
        debug!(self.log, "set default entry"; "table" => table_id);
        self.hdl
            .default_entry_set(&self.target(), table_id, &data.data)
            .map_err(HalError::from)
            .map_err(with_objects::<S::Key, _>(table_id, None, Some(data)))
    }

    pub fn reset_default_table_entry(&self, table_id: u32) -> HalResult<()> {
        debug!(self.log, "reset default entry"; "table" => table_id);
        Ok(self.hdl.default_entry_reset(&self.target(), table_id)?)
    }

    pub fn get_default_table_entry(
        &self,
        table_id: u32,
    ) -> HalResult<TableData<S::Data>> {
        let info = self.table_info(table_id)?;
        let data = self.hdl.default_entry_get(&self.target(), table_id)?;
        Ok(TableData::new(info, data))
    }

    pub(crate) fn clear_table(&self, table_id: u32) -> HalResult<()> {
        debug!(self.log, "clear table"; "table" => table_id);
        Ok(self.hdl.table_clear(&self.target(), table_id)?)
    }
}
