// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::collections::BTreeMap;
use std::sync::Arc;

use aal::status::*;
use aal::{
    AsicError, AsicResult, DataFieldInfo, DataValue, KeyFieldValue, SdeData,
    SdeKey, TableInfo,
};
use common::bytestring::{num_bits_to_num_bytes, to_padded_byte_string};

pub(crate) type KeyFields = BTreeMap<u32, KeyFieldValue>;
pub(crate) type DataFields = BTreeMap<u32, DataValue>;

fn pad(bytes: &[u8], width: u32) -> Vec<u8> {
    to_padded_byte_string(bytes, num_bits_to_num_bytes(width as usize))
}

// Byte strings are stored at the exact width of their field, so two keys for
// the same entry always compare equal.
fn normalize_key(value: KeyFieldValue, width: u32) -> KeyFieldValue {
    match value {
        KeyFieldValue::Exact(v) => KeyFieldValue::Exact(pad(&v, width)),
        KeyFieldValue::Ternary { value, mask } => KeyFieldValue::Ternary {
            value: pad(&value, width),
            mask: pad(&mask, width),
        },
        KeyFieldValue::Lpm { value, prefix_len } => KeyFieldValue::Lpm {
            value: pad(&value, width),
            prefix_len,
        },
        KeyFieldValue::Range { low, high } => KeyFieldValue::Range {
            low: pad(&low, width),
            high: pad(&high, width),
        },
        KeyFieldValue::Optional { value, is_valid } => {
            KeyFieldValue::Optional {
                value: pad(&value, width),
                is_valid,
            }
        }
    }
}

pub struct StubKey {
    pub(crate) info: Arc<TableInfo>,
    pub(crate) fields: KeyFields,
}

impl StubKey {
    pub(crate) fn new(info: Arc<TableInfo>) -> Self {
        StubKey {
            info,
            fields: BTreeMap::new(),
        }
    }
}

impl SdeKey for StubKey {
    fn table_id(&self) -> u32 {
        self.info.id
    }

    fn set_value(
        &mut self,
        field_id: u32,
        value: KeyFieldValue,
    ) -> AsicResult<()> {
        let field = self.info.key_field_by_id(field_id)?;
        if field.match_type != value.match_type() {
            return Err(AsicError::InvalidArg(format!(
                "key field {} is {}, not {}",
                field.name,
                field.match_type,
                value.match_type()
            )));
        }
        self.fields.insert(field_id, normalize_key(value, field.width));
        Ok(())
    }

    fn get_value(&self, field_id: u32) -> AsicResult<KeyFieldValue> {
        self.fields
            .get(&field_id)
            .cloned()
            .ok_or_else(|| AsicError::Missing(format!("key field {field_id}")))
    }
}

pub struct StubData {
    pub(crate) info: Arc<TableInfo>,
    pub(crate) action_id: Option<u32>,
    pub(crate) fields: DataFields,
}

impl StubData {
    pub(crate) fn new(info: Arc<TableInfo>, action_id: Option<u32>) -> Self {
        StubData {
            info,
            action_id,
            fields: BTreeMap::new(),
        }
    }
}

// Only types the SDK would accept for a field of this type are stored.
fn check_type(field: &DataFieldInfo, value: &DataValue) -> AsicResult<()> {
    let ok = match (field.dtype.as_str(), value) {
        ("bytes", DataValue::Bytes(_)) => true,
        ("bytes", DataValue::UintArray(_)) => true,
        ("uint64" | "uint32" | "uint16" | "uint8", DataValue::Uint(_)) => true,
        ("uint32" | "uint16" | "uint8", DataValue::UintArray(_)) => true,
        ("bool", DataValue::Bool(_)) => true,
        ("bool", DataValue::BoolArray(_)) => true,
        ("string", DataValue::Str(_)) => true,
        _ => false,
    };
    match ok {
        true => Ok(()),
        false => Err(sde_error(
            format!("setting {} to {value:?}", field.name),
            BF_INVALID_ARG,
        )),
    }
}

impl SdeData for StubData {
    fn table_id(&self) -> u32 {
        self.info.id
    }

    fn action_id(&self) -> Option<u32> {
        self.action_id
    }

    fn reset(&mut self, action_id: Option<u32>) {
        self.action_id = action_id;
        self.fields.clear();
    }

    fn set_value(&mut self, field_id: u32, value: DataValue) -> AsicResult<()> {
        let field = self.info.data_field_by_id(field_id, self.action_id)?;
        check_type(field, &value)?;
        let value = match value {
            DataValue::Bytes(b) => DataValue::Bytes(pad(&b, field.width)),
            v => v,
        };
        self.fields.insert(field_id, value);
        Ok(())
    }

    fn get_value(&self, field_id: u32) -> AsicResult<DataValue> {
        self.fields
            .get(&field_id)
            .cloned()
            .ok_or_else(|| AsicError::Missing(format!("data field {field_id}")))
    }

    fn field_ids(&self) -> Vec<u32> {
        self.fields.keys().copied().collect()
    }
}

/// A programmed entry: the bound action and its data fields.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct Entry {
    pub action_id: Option<u32>,
    pub fields: DataFields,
}

/// The software copy of a single table.
#[derive(Debug, Default)]
pub(crate) struct TableState {
    pub entries: BTreeMap<KeyFields, Entry>,
    pub default: Option<Entry>,
}

// The reset value of a data field in a preallocated table.
fn zero_value(field: &DataFieldInfo) -> DataValue {
    match field.dtype.as_str() {
        "bytes" => DataValue::Bytes(pad(&[], field.width)),
        "bool" => DataValue::Bool(false),
        "string" => DataValue::Str(String::new()),
        _ => DataValue::Uint(0),
    }
}

impl TableState {
    /// Build the initial state of a table.  Preallocated tables start out
    /// holding a zeroed entry for every index.
    pub fn new(info: &TableInfo) -> AsicResult<Self> {
        let mut state = TableState::default();
        if info.is_preallocated() {
            state.fill_preallocated(info)?;
        }
        Ok(state)
    }

    pub fn fill_preallocated(&mut self, info: &TableInfo) -> AsicResult<()> {
        let index = info.keys.first().ok_or_else(|| {
            AsicError::Internal(format!("table {} has no index", info.name))
        })?;
        let zero = Entry {
            action_id: None,
            fields: info
                .data
                .iter()
                .map(|f| (f.id, zero_value(f)))
                .collect(),
        };
        self.entries.clear();
        for i in 0..info.size {
            let key = KeyFieldValue::Exact(pad(
                &(i as u64).to_be_bytes(),
                index.width,
            ));
            self.entries
                .insert(BTreeMap::from([(index.id, key)]), zero.clone());
        }
        Ok(())
    }
}
