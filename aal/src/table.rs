// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Table metadata and the typed values carried by SDK key and data objects.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::AsicError;
use crate::AsicResult;

/// The kind of table, as reported by the SDK's pipeline description.
#[derive(Debug, Clone, PartialEq, Eq, Display, EnumString)]
pub enum TableType {
    #[strum(serialize = "MatchAction_Direct")]
    MatchDirect,
    #[strum(serialize = "MatchAction_Indirect")]
    MatchIndirect,
    #[strum(serialize = "MatchAction_Indirect_Selector")]
    MatchIndirectSelector,
    #[strum(serialize = "Action")]
    ActionProfile,
    #[strum(serialize = "Selector")]
    Selector,
    #[strum(serialize = "Counter")]
    Counter,
    #[strum(serialize = "Meter")]
    Meter,
    #[strum(serialize = "Register")]
    Register,
    #[strum(serialize = "PreMgid")]
    PreMgid,
    #[strum(serialize = "PreNode")]
    PreNode,
    #[strum(serialize = "MirrorCfg")]
    MirrorCfg,
    /// Any table type this layer doesn't program directly
    #[strum(default)]
    Other(String),
}

/// How a key field is matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum KeyMatchType {
    Exact,
    Ternary,
    #[strum(serialize = "LPM")]
    Lpm,
    Range,
    Optional,
}

/// Asynchronous operations a table may advertise.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize,
    Deserialize,
)]
pub enum TableOperation {
    /// Pull counter values from hardware into the SDK's shadow copy
    #[strum(serialize = "SyncCounters")]
    CounterSync,
    /// Pull register values from hardware into the SDK's shadow copy
    #[strum(serialize = "SyncRegisters")]
    RegisterSync,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFieldInfo {
    pub id: u32,
    pub name: String,
    pub match_type: KeyMatchType,
    /// Width of the field in bits
    pub width: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFieldInfo {
    pub id: u32,
    pub name: String,
    /// Width of the field in bits.  Zero for fields that aren't bit strings.
    pub width: u32,
    /// The SDK's name for the field's type: "bytes", "uint64", "bool", ...
    pub dtype: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionInfo {
    pub id: u32,
    pub name: String,
    pub fields: Vec<DataFieldInfo>,
}

/// Everything the programming layer needs to know about one SDK table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub id: u32,
    pub name: String,
    pub table_type: TableType,
    pub size: usize,
    pub keys: Vec<KeyFieldInfo>,
    pub actions: Vec<ActionInfo>,
    /// Data fields that don't belong to any action
    pub data: Vec<DataFieldInfo>,
    pub operations: Vec<TableOperation>,
}

fn missing(
    table: &str,
    what: &str,
    which: impl std::fmt::Display,
) -> AsicError {
    AsicError::InvalidArg(format!("table {table} has no {what} {which}"))
}

impl TableInfo {
    /// Counter, meter and register tables hold one entry per index for their
    /// entire lifetime.  They can be modified but never added to.
    pub fn is_preallocated(&self) -> bool {
        matches!(
            self.table_type,
            TableType::Counter | TableType::Meter | TableType::Register
        )
    }

    pub fn key_field(&self, name: &str) -> AsicResult<&KeyFieldInfo> {
        self.keys
            .iter()
            .find(|k| k.name == name)
            .ok_or_else(|| missing(&self.name, "key field", name))
    }

    pub fn key_field_by_id(&self, id: u32) -> AsicResult<&KeyFieldInfo> {
        self.keys
            .iter()
            .find(|k| k.id == id)
            .ok_or_else(|| missing(&self.name, "key field", id))
    }

    pub fn action(&self, name: &str) -> AsicResult<&ActionInfo> {
        self.actions
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| missing(&self.name, "action", name))
    }

    pub fn action_by_id(&self, id: u32) -> AsicResult<&ActionInfo> {
        self.actions
            .iter()
            .find(|a| a.id == id)
            .ok_or_else(|| missing(&self.name, "action", id))
    }

    /// All data fields visible to `action_id`: the action's own parameters
    /// followed by the table's common data fields.
    pub fn data_fields(
        &self,
        action_id: Option<u32>,
    ) -> AsicResult<Vec<&DataFieldInfo>> {
        let mut fields = Vec::new();
        if let Some(id) = action_id {
            fields.extend(self.action_by_id(id)?.fields.iter());
        }
        fields.extend(self.data.iter());
        Ok(fields)
    }

    pub fn data_field(
        &self,
        name: &str,
        action_id: Option<u32>,
    ) -> AsicResult<&DataFieldInfo> {
        self.data_fields(action_id)?
            .into_iter()
            .find(|d| d.name == name)
            .ok_or_else(|| missing(&self.name, "data field", name))
    }

    pub fn data_field_by_id(
        &self,
        id: u32,
        action_id: Option<u32>,
    ) -> AsicResult<&DataFieldInfo> {
        self.data_fields(action_id)?
            .into_iter()
            .find(|d| d.id == id)
            .ok_or_else(|| missing(&self.name, "data field", id))
    }

    pub fn supports(&self, op: TableOperation) -> bool {
        self.operations.contains(&op)
    }
}

/// The value of a single key field.  Byte strings are big-endian and padded
/// to the width of the field.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyFieldValue {
    Exact(Vec<u8>),
    Ternary { value: Vec<u8>, mask: Vec<u8> },
    Lpm { value: Vec<u8>, prefix_len: u16 },
    Range { low: Vec<u8>, high: Vec<u8> },
    Optional { value: Vec<u8>, is_valid: bool },
}

impl KeyFieldValue {
    pub fn match_type(&self) -> KeyMatchType {
        match self {
            KeyFieldValue::Exact(_) => KeyMatchType::Exact,
            KeyFieldValue::Ternary { .. } => KeyMatchType::Ternary,
            KeyFieldValue::Lpm { .. } => KeyMatchType::Lpm,
            KeyFieldValue::Range { .. } => KeyMatchType::Range,
            KeyFieldValue::Optional { .. } => KeyMatchType::Optional,
        }
    }
}

/// The value of a single data field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataValue {
    Uint(u64),
    Bytes(Vec<u8>),
    Bool(bool),
    Str(String),
    /// One value per pipe, or one value per member for selector groups
    UintArray(Vec<u64>),
    BoolArray(Vec<bool>),
}

impl DataValue {
    pub fn as_u64(&self) -> AsicResult<u64> {
        match self {
            DataValue::Uint(v) => Ok(*v),
            DataValue::Bytes(b) if b.len() <= 8 => {
                Ok(b.iter().fold(0u64, |acc, x| (acc << 8) | u64::from(*x)))
            }
            x => Err(AsicError::InvalidArg(format!("{x:?} is not a u64"))),
        }
    }

    pub fn as_bool(&self) -> AsicResult<bool> {
        match self {
            DataValue::Bool(b) => Ok(*b),
            x => Err(AsicError::InvalidArg(format!("{x:?} is not a bool"))),
        }
    }
}

/// Selects the device and pipes an operation applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub device: u32,
    /// `None` addresses every pipe
    pub pipe: Option<u32>,
}

impl Target {
    pub fn all_pipes(device: u32) -> Self {
        Target { device, pipe: None }
    }
}

/// Identifies a front-panel port by its physical location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct PortKey {
    pub slot: i32,
    pub port: i32,
    pub channel: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn counter_table() -> TableInfo {
        TableInfo {
            id: 0x1200_0001,
            name: "pipe.Ingress.pkt_counter".into(),
            table_type: TableType::from_str("Counter").unwrap(),
            size: 16,
            keys: vec![KeyFieldInfo {
                id: 65556,
                name: "$COUNTER_INDEX".into(),
                match_type: KeyMatchType::Exact,
                width: 32,
            }],
            actions: vec![],
            data: vec![DataFieldInfo {
                id: 65553,
                name: "$COUNTER_SPEC_BYTES".into(),
                width: 64,
                dtype: "uint64".into(),
            }],
            operations: vec![TableOperation::CounterSync],
        }
    }

    #[test]
    fn test_parse_names() {
        assert_eq!(
            TableType::from_str("MatchAction_Indirect_Selector").unwrap(),
            TableType::MatchIndirectSelector
        );
        assert_eq!(
            TableType::from_str("SnapshotCfg").unwrap(),
            TableType::Other("SnapshotCfg".into())
        );
        assert_eq!(KeyMatchType::from_str("LPM").unwrap(), KeyMatchType::Lpm);
        assert_eq!(
            TableOperation::from_str("SyncRegisters").unwrap(),
            TableOperation::RegisterSync
        );
        assert_eq!(TableOperation::CounterSync.to_string(), "SyncCounters");
    }

    #[test]
    fn test_lookups() {
        let t = counter_table();
        assert!(t.is_preallocated());
        assert!(t.supports(TableOperation::CounterSync));
        assert!(!t.supports(TableOperation::RegisterSync));
        assert_eq!(t.key_field("$COUNTER_INDEX").unwrap().id, 65556);
        let bytes = t.data_field("$COUNTER_SPEC_BYTES", None).unwrap();
        assert_eq!(bytes.id, 65553);
        assert!(t.data_field("$COUNTER_SPEC_PKTS", None).is_err());
        assert!(t.data_fields(Some(7)).is_err());
    }

    #[test]
    fn test_data_value() {
        assert_eq!(DataValue::Bytes(vec![0x01, 0x04]).as_u64().unwrap(), 260);
        assert_eq!(DataValue::Uint(7).as_u64().unwrap(), 7);
        assert!(DataValue::Bytes(vec![0; 9]).as_u64().is_err());
        assert!(DataValue::Str("BOTH".into()).as_bool().is_err());
    }
}
