// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::sync::Arc;

use aal::{DataValue, SdeData, TableInfo};
use common::bytestring::{
    num_bits_to_num_bytes, to_padded_byte_string, uint64_to_byte_stream,
};

use crate::hal_err;
use crate::types::HalResult;

pub const ACTION_MEMBER_ID: &str = "$ACTION_MEMBER_ID";
pub const SELECTOR_GROUP_ID: &str = "$SELECTOR_GROUP_ID";
pub const COUNTER_SPEC_BYTES: &str = "$COUNTER_SPEC_BYTES";
pub const COUNTER_SPEC_PKTS: &str = "$COUNTER_SPEC_PKTS";

/// An SDK data object, along with the metadata of the table it belongs to.
pub struct TableData<D> {
    pub(crate) info: Arc<TableInfo>,
    pub(crate) data: D,
}

impl<D: SdeData> TableData<D> {
    pub(crate) fn new(info: Arc<TableInfo>, data: D) -> Self {
        TableData { info, data }
    }

    /// The backend's own data object
    pub fn backend(&self) -> &D {
        &self.data
    }

    pub fn table_id(&self) -> u32 {
        self.info.id
    }

    /// Drop every field and rebind the data to `action_id`.
    pub fn reset(&mut self, action_id: Option<u32>) -> HalResult<()> {
        if let Some(id) = action_id {
            self.info.action_by_id(id)?;
        }
        self.data.reset(action_id);
        Ok(())
    }

    pub fn action_id(&self) -> Option<u32> {
        self.data.action_id()
    }

    /// Sets an action parameter, padded to the parameter's width.
    pub fn set_param(&mut self, param_id: u32, value: &[u8]) -> HalResult<()> {
        let field = self.info.data_field_by_id(param_id, self.action_id())?;
        let n = num_bits_to_num_bytes(field.width as usize);
        let value = to_padded_byte_string(value, n);
        Ok(self.data.set_value(param_id, DataValue::Bytes(value))?)
    }

    /// Returns an action parameter at the parameter's width.
    pub fn get_param(&self, param_id: u32) -> HalResult<Vec<u8>> {
        let field = self.info.data_field_by_id(param_id, self.action_id())?;
        let n = num_bits_to_num_bytes(field.width as usize);
        match self.data.get_value(param_id)? {
            DataValue::Bytes(b) => Ok(to_padded_byte_string(&b, n)),
            DataValue::Uint(v) => {
                Ok(to_padded_byte_string(&uint64_to_byte_stream(v), n))
            }
            x => Err(hal_err!(Internal, "unexpected parameter value {x:?}")),
        }
    }

    fn field_id(&self, name: &str) -> HalResult<u32> {
        Ok(self.info.data_field(name, self.action_id())?.id)
    }

    fn has_field(&self, name: &str) -> bool {
        self.info.data_field(name, self.action_id()).is_ok()
    }

    pub(crate) fn set_named(
        &mut self,
        name: &str,
        value: DataValue,
    ) -> HalResult<()> {
        let id = self.field_id(name)?;
        Ok(self.data.set_value(id, value)?)
    }

    pub(crate) fn get_named(&self, name: &str) -> HalResult<DataValue> {
        let id = self.field_id(name)?;
        Ok(self.data.get_value(id)?)
    }

    // Member and group references only live in data that isn't bound to an
    // action.
    fn get_reference(&self, name: &str) -> HalResult<u32> {
        if self.action_id().is_some() {
            return Err(hal_err!(NotFound, "{name} is not set"));
        }
        let v = self.get_named(name)?.as_u64()?;
        u32::try_from(v).map_err(|_| hal_err!(Internal, "bad {name}: {v}"))
    }

    pub fn set_action_member_id(&mut self, member_id: u32) -> HalResult<()> {
        self.set_named(ACTION_MEMBER_ID, DataValue::Uint(member_id.into()))
    }

    pub fn get_action_member_id(&self) -> HalResult<u32> {
        self.get_reference(ACTION_MEMBER_ID)
    }

    pub fn set_selector_group_id(&mut self, group_id: u32) -> HalResult<()> {
        self.set_named(SELECTOR_GROUP_ID, DataValue::Uint(group_id.into()))
    }

    pub fn get_selector_group_id(&self) -> HalResult<u32> {
        self.get_reference(SELECTOR_GROUP_ID)
    }

    /// Sets whichever of the byte and packet counts the table carries.
    pub fn set_counter_data(
        &mut self,
        bytes: u64,
        packets: u64,
    ) -> HalResult<()> {
        if self.has_field(COUNTER_SPEC_BYTES) {
            self.set_named(COUNTER_SPEC_BYTES, DataValue::Uint(bytes))?;
        }
        if self.has_field(COUNTER_SPEC_PKTS) {
            self.set_named(COUNTER_SPEC_PKTS, DataValue::Uint(packets))?;
        }
        Ok(())
    }

    /// Returns the byte and packet counts, for those the table carries.
    pub fn get_counter_data(&self) -> HalResult<(Option<u64>, Option<u64>)> {
        let get = |name| -> HalResult<Option<u64>> {
            if !self.has_field(name) {
                return Ok(None);
            }
            // Counters of an entry written without counter data are zero.
            match self.get_named(name) {
                Ok(v) => Ok(Some(v.as_u64()?)),
                Err(_) => Ok(Some(0)),
            }
        };
        Ok((get(COUNTER_SPEC_BYTES)?, get(COUNTER_SPEC_PKTS)?))
    }

    /// All fields that carry a value, for error reporting.
    pub fn fields(&self) -> Vec<(u32, DataValue)> {
        self.data
            .field_ids()
            .into_iter()
            .filter_map(|id| self.data.get_value(id).ok().map(|v| (id, v)))
            .collect()
    }
}
