// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! An in-memory implementation of the SDE, built from the same `bfrt.json`
//! the real SDE would load.  Every table is a sorted map from key to data.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use slog::{debug, info, o};

use crate::tofino_common::BfRt;
use aal::status::*;
use aal::{
    AsicError, AsicResult, DataValue, OperationDone, PortKey, SdeData, SdeOps,
    TableInfo, TableOperation, TableType, Target,
};

pub mod table;
pub use table::{StubData, StubKey};
use table::{Entry, TableState};

/// Port id the stub reports for the PCIe CPU port
pub const CPU_PORT: u32 = 320;

fn default_num_pipes() -> u32 {
    4
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AsicConfig {
    /// Number of pipes reported in per-pipe register reads
    #[serde(default = "default_num_pipes")]
    pub num_pipes: u32,
    /// When false, no table advertises counter or register sync.
    #[serde(default = "default_true")]
    pub sync_supported: bool,
    /// When false, syncs start but their completion callbacks never run.
    #[serde(default = "default_true")]
    pub sync_completes: bool,
}

impl Default for AsicConfig {
    fn default() -> Self {
        AsicConfig {
            num_pipes: default_num_pipes(),
            sync_supported: true,
            sync_completes: true,
        }
    }
}

pub struct StubHandle {
    log: slog::Logger,
    config: AsicConfig,
    tables: BTreeMap<u32, Arc<TableInfo>>,
    state: Mutex<BTreeMap<u32, TableState>>,
    /// Completion callbacks of syncs that are never finished
    stalled: Mutex<Vec<OperationDone>>,
}

fn not_found(ctx: impl ToString) -> AsicError {
    sde_error(ctx, BF_OBJECT_NOT_FOUND)
}

impl StubHandle {
    /// Create a stub SDE serving the tables described by the bf-rt file at
    /// `bfrt`.
    pub fn new(
        log: &slog::Logger,
        bfrt: &str,
        config: &AsicConfig,
    ) -> AsicResult<Self> {
        let rt = BfRt::init(bfrt)?;
        Self::from_bfrt(log, &rt, config)
    }

    pub fn from_bfrt(
        log: &slog::Logger,
        rt: &BfRt,
        config: &AsicConfig,
    ) -> AsicResult<Self> {
        let log = log.new(o!("unit" => "tofino_stub"));
        let mut tables = BTreeMap::new();
        let mut state = BTreeMap::new();
        for t in rt.tables()? {
            state.insert(t.id, TableState::new(&t)?);
            tables.insert(t.id, Arc::new(t));
        }
        info!(log, "loaded {} tables", tables.len());

        Ok(StubHandle {
            log,
            config: config.clone(),
            tables,
            state: Mutex::new(state),
            stalled: Mutex::new(Vec::new()),
        })
    }

    pub fn is_model(&self) -> bool {
        true
    }

    // Run `f` against the software copy of a table.
    fn with_table<T>(
        &self,
        table_id: u32,
        f: impl FnOnce(&TableInfo, &mut TableState) -> AsicResult<T>,
    ) -> AsicResult<T> {
        let info = self.table_info(table_id)?;
        let mut state = self.state.lock();
        let table = state
            .get_mut(&table_id)
            .ok_or_else(|| sde_error(table_id, BF_TABLE_NOT_FOUND))?;
        f(&info, table)
    }

    fn to_data(&self, info: &Arc<TableInfo>, entry: &Entry) -> StubData {
        let mut data = StubData::new(info.clone(), entry.action_id);
        data.fields = entry.fields.clone();
        // The SDE reports registers with one value per pipe.
        if info.table_type == TableType::Register {
            let pipes = self.config.num_pipes as usize;
            for v in data.fields.values_mut() {
                if let Ok(x) = v.as_u64() {
                    *v = DataValue::UintArray(vec![x; pipes]);
                }
            }
        }
        data
    }

    fn check_data(data: &StubData, table_id: u32) -> AsicResult<()> {
        match data.table_id() == table_id {
            true => Ok(()),
            false => Err(sde_error(
                format!(
                    "data for table {} used on {table_id}",
                    data.table_id()
                ),
                BF_INVALID_ARG,
            )),
        }
    }
}

impl SdeOps for StubHandle {
    type Key = StubKey;
    type Data = StubData;

    fn tables(&self) -> Vec<Arc<TableInfo>> {
        self.tables.values().cloned().collect()
    }

    fn table_info(&self, table_id: u32) -> AsicResult<Arc<TableInfo>> {
        self.tables
            .get(&table_id)
            .cloned()
            .ok_or_else(|| sde_error(table_id, BF_TABLE_NOT_FOUND))
    }

    fn key_allocate(&self, table_id: u32) -> AsicResult<StubKey> {
        Ok(StubKey::new(self.table_info(table_id)?))
    }

    fn data_allocate(
        &self,
        table_id: u32,
        action_id: Option<u32>,
    ) -> AsicResult<StubData> {
        let info = self.table_info(table_id)?;
        if let Some(id) = action_id {
            info.action_by_id(id)?;
        }
        Ok(StubData::new(info, action_id))
    }

    fn entry_add(
        &self,
        _target: &Target,
        key: &StubKey,
        data: &StubData,
    ) -> AsicResult<()> {
        debug!(self.log, "entry_add"; "table" => &key.info.name);
        Self::check_data(data, key.info.id)?;
        self.with_table(key.info.id, |info, table| {
            if info.is_preallocated() {
                return Err(sde_error(&info.name, BF_NOT_SUPPORTED));
            }
            if table.entries.contains_key(&key.fields) {
                return Err(sde_error(&info.name, BF_ALREADY_EXISTS));
            }
            if table.entries.len() >= info.size {
                return Err(sde_error(&info.name, BF_NO_SPACE));
            }
            table.entries.insert(
                key.fields.clone(),
                Entry {
                    action_id: data.action_id,
                    fields: data.fields.clone(),
                },
            );
            Ok(())
        })
    }

    fn entry_mod(
        &self,
        _target: &Target,
        key: &StubKey,
        data: &StubData,
    ) -> AsicResult<()> {
        debug!(self.log, "entry_mod"; "table" => &key.info.name);
        Self::check_data(data, key.info.id)?;
        self.with_table(key.info.id, |info, table| {
            let entry = table
                .entries
                .get_mut(&key.fields)
                .ok_or_else(|| not_found(&info.name))?;
            if info.is_preallocated() {
                // Fields left unset keep their current value.
                entry.fields.extend(data.fields.clone());
            } else {
                *entry = Entry {
                    action_id: data.action_id,
                    fields: data.fields.clone(),
                };
            }
            Ok(())
        })
    }

    fn entry_del(&self, _target: &Target, key: &StubKey) -> AsicResult<()> {
        debug!(self.log, "entry_del"; "table" => &key.info.name);
        self.with_table(key.info.id, |info, table| {
            if info.is_preallocated() {
                return Err(sde_error(&info.name, BF_NOT_SUPPORTED));
            }
            table
                .entries
                .remove(&key.fields)
                .map(|_| ())
                .ok_or_else(|| not_found(&info.name))
        })
    }

    fn entry_get(
        &self,
        _target: &Target,
        key: &StubKey,
    ) -> AsicResult<StubData> {
        let entry = self.with_table(key.info.id, |info, table| {
            table
                .entries
                .get(&key.fields)
                .cloned()
                .ok_or_else(|| not_found(&info.name))
        })?;
        Ok(self.to_data(&key.info, &entry))
    }

    fn entry_get_first(
        &self,
        _target: &Target,
        table_id: u32,
    ) -> AsicResult<(StubKey, StubData)> {
        let info = self.table_info(table_id)?;
        let (fields, entry) = self.with_table(table_id, |info, table| {
            table
                .entries
                .iter()
                .next()
                .map(|(k, e)| (k.clone(), e.clone()))
                .ok_or_else(|| not_found(&info.name))
        })?;
        let mut key = StubKey::new(info.clone());
        key.fields = fields;
        Ok((key, self.to_data(&info, &entry)))
    }

    fn entry_get_next_n(
        &self,
        _target: &Target,
        key: &StubKey,
        n: usize,
    ) -> AsicResult<Vec<(StubKey, StubData)>> {
        let info = key.info.clone();
        let entries = self.with_table(info.id, |_, table| {
            use std::ops::Bound::{Excluded, Unbounded};
            Ok(table
                .entries
                .range((Excluded(&key.fields), Unbounded))
                .take(n)
                .map(|(k, e)| (k.clone(), e.clone()))
                .collect::<Vec<_>>())
        })?;
        Ok(entries
            .into_iter()
            .map(|(fields, entry)| {
                let mut k = StubKey::new(info.clone());
                k.fields = fields;
                (k, self.to_data(&info, &entry))
            })
            .collect())
    }

    fn table_clear(&self, _target: &Target, table_id: u32) -> AsicResult<()> {
        info!(self.log, "clearing table {table_id}");
        self.with_table(table_id, |info, table| {
            if info.is_preallocated() {
                table.fill_preallocated(info)
            } else {
                table.entries.clear();
                Ok(())
            }
        })
    }

    fn table_usage(
        &self,
        _target: &Target,
        table_id: u32,
    ) -> AsicResult<usize> {
        self.with_table(table_id, |_, table| Ok(table.entries.len()))
    }

    fn table_size(&self, _target: &Target, table_id: u32) -> AsicResult<usize> {
        Ok(self.table_info(table_id)?.size)
    }

    fn default_entry_set(
        &self,
        _target: &Target,
        table_id: u32,
        data: &StubData,
    ) -> AsicResult<()> {
        Self::check_data(data, table_id)?;
        self.with_table(table_id, |_, table| {
            table.default = Some(Entry {
                action_id: data.action_id,
                fields: data.fields.clone(),
            });
            Ok(())
        })
    }

    fn default_entry_reset(
        &self,
        _target: &Target,
        table_id: u32,
    ) -> AsicResult<()> {
        self.with_table(table_id, |_, table| {
            table.default = None;
            Ok(())
        })
    }

    fn default_entry_get(
        &self,
        _target: &Target,
        table_id: u32,
    ) -> AsicResult<StubData> {
        let info = self.table_info(table_id)?;
        let entry = self.with_table(table_id, |_, table| {
            Ok(table.default.clone().unwrap_or_default())
        })?;
        Ok(self.to_data(&info, &entry))
    }

    fn operations_supported(
        &self,
        table_id: u32,
    ) -> AsicResult<Vec<TableOperation>> {
        let info = self.table_info(table_id)?;
        match self.config.sync_supported {
            true => Ok(info.operations.clone()),
            false => Ok(Vec::new()),
        }
    }

    fn operation_execute(
        &self,
        _target: &Target,
        table_id: u32,
        op: TableOperation,
        done: OperationDone,
    ) -> AsicResult<()> {
        if !self.operations_supported(table_id)?.contains(&op) {
            return Err(sde_error(
                format!("{op} on {table_id}"),
                BF_NOT_SUPPORTED,
            ));
        }
        if !self.config.sync_completes {
            debug!(self.log, "stalling {op}"; "table" => table_id);
            self.stalled.lock().push(done);
            return Ok(());
        }
        // The software copy is always current, so the sync is complete as
        // soon as it starts.
        done();
        Ok(())
    }

    fn cpu_port(&self, _device: u32) -> AsicResult<u32> {
        Ok(CPU_PORT)
    }

    fn port_id_from_port_key(
        &self,
        _device: u32,
        key: &PortKey,
    ) -> AsicResult<u32> {
        let channel = key.channel.unwrap_or(0);
        if key.port < 1 || !(0..4).contains(&channel) {
            return Err(AsicError::InvalidArg(format!(
                "no such port: {}/{}/{channel}",
                key.slot, key.port
            )));
        }
        Ok(((key.port - 1) * 4 + channel) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aal::{KeyFieldValue, SdeKey};
    use pretty_assertions::assert_eq;

    const BFRT: &str = r#"{
        "tables": [
            {
                "name": "pipe.Ingress.fwd", "id": 100,
                "table_type": "MatchAction_Direct", "size": 2,
                "key": [
                    { "id": 1, "name": "hdr.port", "match_type": "Exact",
                      "type": { "type": "bytes", "width": 16 } }
                ],
                "action_specs": [
                    { "id": 10, "name": "Ingress.send",
                      "data": [ { "id": 1, "name": "port",
                                  "type": { "type": "bytes", "width": 9 } } ] }
                ],
                "data": []
            },
            {
                "name": "pipe.Ingress.reg", "id": 200,
                "table_type": "Register", "size": 3,
                "key": [
                    { "id": 1, "name": "$REGISTER_INDEX", "match_type": "Exact",
                      "type": { "type": "uint32" } }
                ],
                "data": [
                    { "singleton": { "id": 2, "name": "Ingress.reg.f1",
                      "type": { "type": "bytes", "width": 32 } } }
                ],
                "supported_operations": ["SyncRegisters"]
            }
        ]
    }"#;

    fn stub(config: &AsicConfig) -> anyhow::Result<StubHandle> {
        let log = common::logging::init(
            "test",
            &None,
            common::logging::LogFormat::Human,
        )?;
        Ok(StubHandle::from_bfrt(&log, &BfRt::from_json(BFRT)?, config)?)
    }

    fn fwd_entry(
        s: &StubHandle,
        port: u8,
    ) -> anyhow::Result<(StubKey, StubData)> {
        let mut key = s.key_allocate(100)?;
        key.set_value(1, KeyFieldValue::Exact(vec![port]))?;
        let mut data = s.data_allocate(100, Some(10))?;
        data.set_value(1, DataValue::Bytes(vec![port]))?;
        Ok((key, data))
    }

    #[test]
    fn test_entry_lifecycle() -> anyhow::Result<()> {
        let s = stub(&AsicConfig::default())?;
        let tgt = Target::all_pipes(0);
        let (key, data) = fwd_entry(&s, 1)?;
        s.entry_add(&tgt, &key, &data)?;
        match s.entry_add(&tgt, &key, &data) {
            Err(AsicError::SdeError { code, .. }) => {
                assert_eq!(code, BF_ALREADY_EXISTS)
            }
            x => panic!("expected duplicate error, got {:?}", x.err()),
        }
        let (key2, data2) = fwd_entry(&s, 2)?;
        s.entry_add(&tgt, &key2, &data2)?;
        let (key3, data3) = fwd_entry(&s, 3)?;
        match s.entry_add(&tgt, &key3, &data3) {
            Err(AsicError::SdeError { code, .. }) => {
                assert_eq!(code, BF_NO_SPACE)
            }
            x => panic!("expected full table, got {:?}", x.err()),
        }

        let (first, _) = s.entry_get_first(&tgt, 100)?;
        assert_eq!(first.get_value(1)?, KeyFieldValue::Exact(vec![0, 1]));
        let rest = s.entry_get_next_n(&tgt, &first, 5)?;
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].1.get_value(1)?, DataValue::Bytes(vec![0, 2]));

        s.entry_del(&tgt, &key)?;
        assert_eq!(s.table_usage(&tgt, 100)?, 1);
        assert!(s.entry_get(&tgt, &key).is_err());
        s.table_clear(&tgt, 100)?;
        assert_eq!(s.table_usage(&tgt, 100)?, 0);
        Ok(())
    }

    #[test]
    fn test_register_per_pipe() -> anyhow::Result<()> {
        let s = stub(&AsicConfig::default())?;
        let tgt = Target::all_pipes(0);
        assert_eq!(s.table_usage(&tgt, 200)?, 3);
        let mut key = s.key_allocate(200)?;
        key.set_value(1, KeyFieldValue::Exact(vec![2]))?;
        let mut data = s.data_allocate(200, None)?;
        data.set_value(2, DataValue::Bytes(vec![0x12, 0x34]))?;
        s.entry_mod(&tgt, &key, &data)?;
        let read = s.entry_get(&tgt, &key)?;
        assert_eq!(read.get_value(2)?, DataValue::UintArray(vec![0x1234; 4]));
        assert!(s.entry_del(&tgt, &key).is_err());
        Ok(())
    }

    #[test]
    fn test_sync() -> anyhow::Result<()> {
        let s = stub(&AsicConfig::default())?;
        let tgt = Target::all_pipes(0);
        let (tx, rx) = std::sync::mpsc::channel();
        s.operation_execute(
            &tgt,
            200,
            TableOperation::RegisterSync,
            Box::new(move || tx.send(()).unwrap()),
        )?;
        rx.recv()?;
        assert!(s
            .operation_execute(
                &tgt,
                100,
                TableOperation::CounterSync,
                Box::new(|| ())
            )
            .is_err());

        let s = stub(&AsicConfig {
            sync_supported: false,
            ..Default::default()
        })?;
        assert!(s.operations_supported(200)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_ports() -> anyhow::Result<()> {
        let s = stub(&AsicConfig::default())?;
        let key = PortKey {
            slot: 1,
            port: 2,
            channel: Some(3),
        };
        assert_eq!(s.port_id_from_port_key(0, &key)?, 7);
        let key = PortKey {
            slot: 1,
            port: 1,
            channel: None,
        };
        assert_eq!(s.port_id_from_port_key(0, &key)?, 0);
        assert_eq!(s.cpu_port(0)?, CPU_PORT);
        Ok(())
    }
}
