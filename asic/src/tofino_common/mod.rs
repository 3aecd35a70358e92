// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Parsing of the `bfrt.json` pipeline description emitted by the P4
//! compiler.

use std::str::FromStr;

use serde::Deserialize;

use aal::AsicError;
use aal::AsicResult;
use aal::{
    ActionInfo, DataFieldInfo, KeyFieldInfo, KeyMatchType, TableInfo,
    TableOperation, TableType,
};

#[derive(Debug, Deserialize)]
pub struct BfRt {
    tables: Vec<BfRtTable>,
}

#[derive(Debug, Deserialize)]
struct BfRtTable {
    name: String,
    id: u32,
    table_type: String,
    size: u32,
    #[serde(rename = "key")]
    keys: Option<Vec<Key>>,
    #[serde(rename = "action_specs")]
    actions: Option<Vec<ActionSpec>>,
    data: Option<Vec<DataNode>>,
    supported_operations: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct KeyType {
    #[serde(rename = "type")]
    ktype: String,
    width: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct Key {
    name: String,
    id: u32,
    match_type: String,
    #[serde(rename = "type")]
    ktype: KeyType,
}

#[derive(Debug, Deserialize)]
struct ActionSpec {
    name: String,
    id: u32,
    data: Option<Vec<Data>>,
}

#[derive(Debug, Deserialize)]
struct DataType {
    #[serde(rename = "type")]
    dtype: String,
    width: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct Data {
    name: String,
    id: u32,
    #[serde(rename = "type")]
    dtype: DataType,
}

#[derive(Debug, Deserialize)]
struct Singleton {
    name: String,
    id: u32,
    #[serde(rename = "type")]
    dtype: Option<DataType>,
}

#[derive(Debug, Deserialize)]
struct DataNode {
    // Container nodes carry nested data this layer never touches.
    singleton: Option<Singleton>,
}

// For multi-segment names (e.g., aaaa.bbb.ccc.dddd) return the last segment
pub fn get_short(full: &str) -> String {
    let s = match full.rfind('.') {
        Some(p) => p + 1,
        None => 0,
    };

    full[s..].to_string()
}

fn bad_table(table: &str, msg: String) -> AsicError {
    AsicError::Internal(format!("bad bf-rt table {table}: {msg}"))
}

// Width in bits of a field, from either its explicit width or its type.
fn field_width(
    table: &str,
    field: &str,
    t: &str,
    w: Option<u32>,
) -> AsicResult<u32> {
    match (w, t) {
        (Some(0), _) => {
            Err(bad_table(table, format!("0-length field {field}")))
        }
        (Some(w), _) => Ok(w),
        (None, "uint64") => Ok(64),
        (None, "uint32") => Ok(32),
        (None, "uint16") => Ok(16),
        (None, "uint8") => Ok(8),
        (None, "bool") | (None, "string") | (None, "float") => Ok(0),
        (None, x) => {
            Err(bad_table(table, format!("unknown type {x} in {field}")))
        }
    }
}

impl BfRt {
    pub fn from_json(json: &str) -> AsicResult<Self> {
        serde_json::from_str::<BfRt>(json).map_err(|e| {
            AsicError::Internal(format!("failed to parse json: {e:?}"))
        })
    }

    pub fn from_file(name: &str) -> AsicResult<Self> {
        match std::fs::read_to_string(name) {
            Ok(json) => BfRt::from_json(&json),
            Err(e) => Err(AsicError::Io {
                ctx: format!("reading bf_rt file {name}"),
                err: e,
            }),
        }
    }

    pub fn init(path: &str) -> AsicResult<Self> {
        if !std::path::Path::new(path).is_file() {
            return Err(AsicError::P4Missing(format!("no bf-rt file: {path}")));
        }

        BfRt::from_file(path)
    }

    /// Convert the imported-from-json tables into the metadata used at
    /// run-time.
    pub fn tables(&self) -> AsicResult<Vec<TableInfo>> {
        self.tables.iter().map(Self::convert).collect()
    }

    fn convert(t: &BfRtTable) -> AsicResult<TableInfo> {
        let name = t.name.as_str();
        let mut keys = Vec::new();
        for k in t.keys.iter().flatten() {
            keys.push(KeyFieldInfo {
                id: k.id,
                name: k.name.clone(),
                match_type: KeyMatchType::from_str(&k.match_type).map_err(
                    |_| {
                        bad_table(
                            name,
                            format!(
                                "unrecognized match type: {}",
                                k.match_type
                            ),
                        )
                    },
                )?,
                width: field_width(
                    name,
                    &k.name,
                    &k.ktype.ktype,
                    k.ktype.width,
                )?,
            });
        }

        let mut actions = Vec::new();
        for a in t.actions.iter().flatten() {
            let mut fields = Vec::new();
            for d in a.data.iter().flatten() {
                fields.push(DataFieldInfo {
                    id: d.id,
                    name: d.name.clone(),
                    width: field_width(
                        name,
                        &d.name,
                        &d.dtype.dtype,
                        d.dtype.width,
                    )?,
                    dtype: d.dtype.dtype.clone(),
                });
            }
            actions.push(ActionInfo {
                id: a.id,
                name: a.name.clone(),
                fields,
            });
        }

        let mut data = Vec::new();
        for s in t.data.iter().flatten().filter_map(|d| d.singleton.as_ref()) {
            let Some(dtype) = &s.dtype else { continue };
            data.push(DataFieldInfo {
                id: s.id,
                name: s.name.clone(),
                width: field_width(name, &s.name, &dtype.dtype, dtype.width)?,
                dtype: dtype.dtype.clone(),
            });
        }

        // Operations we don't drive, like idle-time updates, are ignored.
        let operations = t
            .supported_operations
            .iter()
            .flatten()
            .filter_map(|op| TableOperation::from_str(op).ok())
            .collect();

        let table_type = TableType::from_str(&t.table_type)
            .unwrap_or_else(|_| TableType::Other(t.table_type.clone()));

        Ok(TableInfo {
            id: t.id,
            name: t.name.clone(),
            table_type,
            size: t.size as usize,
            keys,
            actions,
            data,
            operations,
        })
    }
}
