// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::sync::Arc;

use aal::{KeyFieldValue, SdeKey, TableInfo};
use common::bytestring::{
    byte_stream_to_uint, num_bits_to_num_bytes, to_padded_byte_string,
    uint32_to_byte_stream,
};

use crate::hal_err;
use crate::types::HalResult;

pub const MATCH_PRIORITY: &str = "$MATCH_PRIORITY";

/// An SDK key object, along with the metadata of the table it belongs to.
/// Byte strings are padded to the width of their field on the way in and
/// come back out at that width.
pub struct TableKey<K> {
    pub(crate) info: Arc<TableInfo>,
    pub(crate) key: K,
}

impl<K: SdeKey> TableKey<K> {
    pub(crate) fn new(info: Arc<TableInfo>, key: K) -> Self {
        TableKey { info, key }
    }

    /// The backend's own key object
    pub fn backend(&self) -> &K {
        &self.key
    }

    pub fn table_id(&self) -> u32 {
        self.info.id
    }

    fn width(&self, field_id: u32) -> HalResult<usize> {
        let field = self.info.key_field_by_id(field_id)?;
        Ok(num_bits_to_num_bytes(field.width as usize))
    }

    fn pad(&self, field_id: u32, bytes: &[u8]) -> HalResult<Vec<u8>> {
        Ok(to_padded_byte_string(bytes, self.width(field_id)?))
    }

    pub fn set_exact(&mut self, field_id: u32, value: &[u8]) -> HalResult<()> {
        let value = self.pad(field_id, value)?;
        Ok(self.key.set_value(field_id, KeyFieldValue::Exact(value))?)
    }

    pub fn set_ternary(
        &mut self,
        field_id: u32,
        value: &[u8],
        mask: &[u8],
    ) -> HalResult<()> {
        let v = KeyFieldValue::Ternary {
            value: self.pad(field_id, value)?,
            mask: self.pad(field_id, mask)?,
        };
        Ok(self.key.set_value(field_id, v)?)
    }

    pub fn set_lpm(
        &mut self,
        field_id: u32,
        prefix: &[u8],
        prefix_len: u16,
    ) -> HalResult<()> {
        let v = KeyFieldValue::Lpm {
            value: self.pad(field_id, prefix)?,
            prefix_len,
        };
        Ok(self.key.set_value(field_id, v)?)
    }

    pub fn set_range(
        &mut self,
        field_id: u32,
        low: &[u8],
        high: &[u8],
    ) -> HalResult<()> {
        let v = KeyFieldValue::Range {
            low: self.pad(field_id, low)?,
            high: self.pad(field_id, high)?,
        };
        Ok(self.key.set_value(field_id, v)?)
    }

    pub fn set_optional(
        &mut self,
        field_id: u32,
        value: &[u8],
    ) -> HalResult<()> {
        let v = KeyFieldValue::Optional {
            value: self.pad(field_id, value)?,
            is_valid: true,
        };
        Ok(self.key.set_value(field_id, v)?)
    }

    /// Sets the SDK priority of the entry.  The value is already in the
    /// SDK's priority space.
    pub fn set_priority(&mut self, priority: u32) -> HalResult<()> {
        let field = self.info.key_field(MATCH_PRIORITY)?.id;
        self.set_exact(field, &uint32_to_byte_stream(priority))
    }

    pub fn get_priority(&self) -> HalResult<u64> {
        let field = self.info.key_field(MATCH_PRIORITY)?.id;
        match self.key.get_value(field)? {
            KeyFieldValue::Exact(v) => Ok(byte_stream_to_uint::<u64>(&v)),
            x => Err(hal_err!(Internal, "unexpected priority value {x:?}")),
        }
    }

    /// Returns a key field, with every byte string at the field's width.
    pub fn get(&self, field_id: u32) -> HalResult<KeyFieldValue> {
        let n = self.width(field_id)?;
        let pad = |b: Vec<u8>| to_padded_byte_string(&b, n);
        Ok(match self.key.get_value(field_id)? {
            KeyFieldValue::Exact(v) => KeyFieldValue::Exact(pad(v)),
            KeyFieldValue::Ternary { value, mask } => KeyFieldValue::Ternary {
                value: pad(value),
                mask: pad(mask),
            },
            KeyFieldValue::Lpm { value, prefix_len } => KeyFieldValue::Lpm {
                value: pad(value),
                prefix_len,
            },
            KeyFieldValue::Range { low, high } => KeyFieldValue::Range {
                low: pad(low),
                high: pad(high),
            },
            KeyFieldValue::Optional { value, is_valid } => {
                KeyFieldValue::Optional {
                    value: pad(value),
                    is_valid,
                }
            }
        })
    }

    /// Reads a single exact-match index, such as `$COUNTER_INDEX`.
    pub(crate) fn get_index(&self, name: &str) -> HalResult<u32> {
        let field = self.info.key_field(name)?.id;
        match self.key.get_value(field)? {
            KeyFieldValue::Exact(v) => Ok(byte_stream_to_uint::<u32>(&v)),
            x => Err(hal_err!(Internal, "unexpected {name} value {x:?}")),
        }
    }

    pub(crate) fn set_index(
        &mut self,
        name: &str,
        index: u32,
    ) -> HalResult<()> {
        let field = self.info.key_field(name)?.id;
        self.set_exact(field, &uint32_to_byte_stream(index))
    }

    /// All fields that carry a value, for error reporting.
    pub fn fields(&self) -> Vec<(u32, KeyFieldValue)> {
        self.info
            .keys
            .iter()
            .filter_map(|k| self.key.get_value(k.id).ok().map(|v| (k.id, v)))
            .collect()
    }
}
