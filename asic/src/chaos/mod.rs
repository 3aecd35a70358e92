// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use rand::random;
use serde::{Deserialize, Serialize};
use slog::Logger;
use std::collections::HashMap;
use std::sync::Arc;

use aal::{
    AsicError, AsicResult, OperationDone, PortKey, SdeOps, TableInfo,
    TableOperation, Target,
};

use crate::tofino_stub::{self, StubData, StubHandle, StubKey};

/// Chaos that happens according to a probability.
#[derive(Default, Debug, Serialize, Deserialize, Copy, Clone)]
pub struct Chaos {
    /// A probability between 0.0 and 1.0
    pub value: f64,
}

impl Chaos {
    /// Create a new chaos value.
    pub fn new(value: f64) -> Self {
        let mut c = Self::default();
        c.set(value);
        c
    }
    /// Set the chaos value. Panics if value is outside the range [0.0, 1.0].
    pub fn set(&mut self, value: f64) {
        if !(0.0..=1.0).contains(&value) {
            panic!("probability out of range");
        }
        self.value = value;
    }

    /// Get the underlying chaos value.
    pub fn get(&self) -> f64 {
        self.value
    }

    /// Return a chaos error according to the underlying probability value.
    pub fn unfurled(&self, log: &Logger, message: &str) -> AsicResult<()> {
        if self.value >= random() {
            slog::error!(log, "chaos error: {}", message);
            return Err(AsicError::Synthetic(message.into()));
        }
        Ok(())
    }
}

/// A form of chaos that applies to tables.
#[derive(Default, Debug, Serialize, Deserialize, Clone)]
pub struct TableChaos {
    /// Track a set of chaos probabilities keyed by table name.
    #[serde(default)]
    pub values: HashMap<String, f64>,
    /// The probability used for tables without their own entry
    #[serde(default)]
    pub fallback: f64,
}

/// A convenience function for creating chaos tables.
#[macro_export]
macro_rules! table_chaos {
    ( $( ($entry:expr, $prob:expr) ),* ) => {
        TableChaos {
            values: HashMap::from([
                $( ($entry.into(), $prob) ),*
            ]),
            fallback: 0.0,
        }
    }
}

impl TableChaos {
    /// Create a chaos table that assigns every table the same chaos value.
    pub fn uniform(v: f64) -> Self {
        TableChaos {
            values: HashMap::new(),
            fallback: Chaos::new(v).get(),
        }
    }

    /// Return a chaos error according to the underlying probability value for
    /// the given table `id`.
    pub fn unfurled(
        &self,
        log: &Logger,
        id: &str,
        message: &str,
    ) -> AsicResult<()> {
        let value = self.values.get(id).unwrap_or(&self.fallback);
        if *value >= random() {
            slog::error!(log, "chaos table error: {}", message; "table" => id);
            return Err(AsicError::Synthetic(message.into()));
        }
        Ok(())
    }
}

/// The chaos ASIC config contains chaos values for each SDE operation, along
/// with the config of the stub it wraps.
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct AsicConfig {
    #[serde(default)]
    pub stub: tofino_stub::AsicConfig,
    #[serde(default)]
    pub cpu_port: Chaos,
    #[serde(default)]
    pub port_id_from_port_key: Chaos,
    #[serde(default)]
    pub table_entry_add: TableChaos,
    #[serde(default)]
    pub table_entry_mod: TableChaos,
    #[serde(default)]
    pub table_entry_del: TableChaos,
    #[serde(default)]
    pub table_entry_get: TableChaos,
    #[serde(default)]
    pub table_clear: TableChaos,
    #[serde(default)]
    pub table_default_set: TableChaos,
    #[serde(default)]
    pub table_operation_execute: TableChaos,
}

impl AsicConfig {
    /// The uniform chaos config applies a uniform underlying probability to
    /// each chaos value.
    pub fn uniform(v: f64) -> Self {
        Self {
            stub: tofino_stub::AsicConfig::default(),
            cpu_port: Chaos::new(v),
            port_id_from_port_key: Chaos::new(v),
            table_entry_add: TableChaos::uniform(v),
            table_entry_mod: TableChaos::uniform(v),
            table_entry_del: TableChaos::uniform(v),
            table_entry_get: TableChaos::uniform(v),
            table_clear: TableChaos::uniform(v),
            table_default_set: TableChaos::uniform(v),
            table_operation_execute: TableChaos::uniform(v),
        }
    }

    /// The uniform get chaos config applies a uniform underlying probability to
    /// each reading operation.  Writing operations are initialized with a
    /// default Chaos config that fails with probability zero.
    pub fn uniform_get(v: f64) -> Self {
        Self {
            cpu_port: Chaos::new(v),
            port_id_from_port_key: Chaos::new(v),
            table_entry_get: TableChaos::uniform(v),
            table_operation_execute: TableChaos::uniform(v),
            ..Default::default()
        }
    }
}

/// A handle for a chaos asic: a stub SDE whose operations fail at random.
pub struct Handle {
    stub: StubHandle,
    config: AsicConfig,
    log: Logger,
}

impl Handle {
    /// Create a new chaos ASIC with the provided logger and config.
    pub fn new(
        log: &Logger,
        bfrt: &str,
        config: &AsicConfig,
    ) -> AsicResult<Self> {
        Ok(Self::wrap(log, StubHandle::new(log, bfrt, &config.stub)?, config))
    }

    /// Inject chaos into an existing stub.
    pub fn wrap(log: &Logger, stub: StubHandle, config: &AsicConfig) -> Self {
        Handle {
            stub,
            config: config.clone(),
            log: log.new(slog::o!("unit" => "chaos")),
        }
    }

    /// Chaos ASICs always report as a model.
    pub fn is_model(&self) -> bool {
        true
    }

    fn table_name(&self, table_id: u32) -> String {
        self.stub
            .table_info(table_id)
            .map(|t| t.name.clone())
            .unwrap_or_default()
    }
}

/// A convenience macro for unfurling chaos. The $name should be a regular
/// `Chaos` member of [`AsicConfig`]. The `handle` is a [`Handle`] object.
macro_rules! unfurl {
    ($handle:ident, $name:ident) => {
        $handle
            .config
            .$name
            .unfurled(&$handle.log, stringify!($name))?
    };
}

/// A convenience macro for unfurling tabular chaos. The $name should be a
/// `TableChaos` member of [`AsicConfig`]. The `handle` is a [`Handle`] object.
macro_rules! table_unfurl {
    ($handle:ident, $id: expr, $name:ident) => {
        $handle
            .config
            .$name
            .unfurled(&$handle.log, $id, stringify!($name))?
    };
}

impl SdeOps for Handle {
    type Key = StubKey;
    type Data = StubData;

    fn tables(&self) -> Vec<Arc<TableInfo>> {
        self.stub.tables()
    }

    fn table_info(&self, table_id: u32) -> AsicResult<Arc<TableInfo>> {
        self.stub.table_info(table_id)
    }

    fn key_allocate(&self, table_id: u32) -> AsicResult<StubKey> {
        self.stub.key_allocate(table_id)
    }

    fn data_allocate(
        &self,
        table_id: u32,
        action_id: Option<u32>,
    ) -> AsicResult<StubData> {
        self.stub.data_allocate(table_id, action_id)
    }

    fn entry_add(
        &self,
        target: &Target,
        key: &StubKey,
        data: &StubData,
    ) -> AsicResult<()> {
        table_unfurl!(self, &key.info.name, table_entry_add);
        self.stub.entry_add(target, key, data)
    }

    fn entry_mod(
        &self,
        target: &Target,
        key: &StubKey,
        data: &StubData,
    ) -> AsicResult<()> {
        table_unfurl!(self, &key.info.name, table_entry_mod);
        self.stub.entry_mod(target, key, data)
    }

    fn entry_del(&self, target: &Target, key: &StubKey) -> AsicResult<()> {
        table_unfurl!(self, &key.info.name, table_entry_del);
        self.stub.entry_del(target, key)
    }

    fn entry_get(
        &self,
        target: &Target,
        key: &StubKey,
    ) -> AsicResult<StubData> {
        table_unfurl!(self, &key.info.name, table_entry_get);
        self.stub.entry_get(target, key)
    }

    fn entry_get_first(
        &self,
        target: &Target,
        table_id: u32,
    ) -> AsicResult<(StubKey, StubData)> {
        table_unfurl!(self, &self.table_name(table_id), table_entry_get);
        self.stub.entry_get_first(target, table_id)
    }

    fn entry_get_next_n(
        &self,
        target: &Target,
        key: &StubKey,
        n: usize,
    ) -> AsicResult<Vec<(StubKey, StubData)>> {
        table_unfurl!(self, &key.info.name, table_entry_get);
        self.stub.entry_get_next_n(target, key, n)
    }

    fn table_clear(&self, target: &Target, table_id: u32) -> AsicResult<()> {
        table_unfurl!(self, &self.table_name(table_id), table_clear);
        self.stub.table_clear(target, table_id)
    }

    fn table_usage(&self, target: &Target, table_id: u32) -> AsicResult<usize> {
        self.stub.table_usage(target, table_id)
    }

    fn table_size(&self, target: &Target, table_id: u32) -> AsicResult<usize> {
        self.stub.table_size(target, table_id)
    }

    fn default_entry_set(
        &self,
        target: &Target,
        table_id: u32,
        data: &StubData,
    ) -> AsicResult<()> {
        table_unfurl!(self, &self.table_name(table_id), table_default_set);
        self.stub.default_entry_set(target, table_id, data)
    }

    fn default_entry_reset(
        &self,
        target: &Target,
        table_id: u32,
    ) -> AsicResult<()> {
        table_unfurl!(self, &self.table_name(table_id), table_default_set);
        self.stub.default_entry_reset(target, table_id)
    }

    fn default_entry_get(
        &self,
        target: &Target,
        table_id: u32,
    ) -> AsicResult<StubData> {
        table_unfurl!(self, &self.table_name(table_id), table_entry_get);
        self.stub.default_entry_get(target, table_id)
    }

    fn operations_supported(
        &self,
        table_id: u32,
    ) -> AsicResult<Vec<TableOperation>> {
        self.stub.operations_supported(table_id)
    }

    fn operation_execute(
        &self,
        target: &Target,
        table_id: u32,
        op: TableOperation,
        done: OperationDone,
    ) -> AsicResult<()> {
        table_unfurl!(
            self,
            &self.table_name(table_id),
            table_operation_execute
        );
        self.stub.operation_execute(target, table_id, op, done)
    }

    fn cpu_port(&self, device: u32) -> AsicResult<u32> {
        unfurl!(self, cpu_port);
        self.stub.cpu_port(device)
    }

    fn port_id_from_port_key(
        &self,
        device: u32,
        key: &PortKey,
    ) -> AsicResult<u32> {
        unfurl!(self, port_id_from_port_key);
        self.stub.port_id_from_port_key(device, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tofino_common::BfRt;
    use aal::{DataValue, KeyFieldValue, SdeData, SdeKey};

    const BFRT: &str = r#"{
        "tables": [
            {
                "name": "pipe.Ingress.flaky", "id": 1,
                "table_type": "MatchAction_Direct", "size": 8,
                "key": [
                    { "id": 1, "name": "k", "match_type": "Exact",
                      "type": { "type": "bytes", "width": 8 } }
                ],
                "action_specs": [ { "id": 2, "name": "a", "data": [
                    { "id": 1, "name": "v",
                      "type": { "type": "bytes", "width": 8 } } ] } ]
            },
            {
                "name": "pipe.Ingress.solid", "id": 3,
                "table_type": "MatchAction_Direct", "size": 8,
                "key": [
                    { "id": 1, "name": "k", "match_type": "Exact",
                      "type": { "type": "bytes", "width": 8 } }
                ],
                "action_specs": [ { "id": 2, "name": "a", "data": [] } ]
            }
        ]
    }"#;

    fn handle(config: &AsicConfig) -> anyhow::Result<Handle> {
        let log = common::logging::init(
            "test",
            &None,
            common::logging::LogFormat::Human,
        )?;
        let stub = StubHandle::from_bfrt(
            &log,
            &BfRt::from_json(BFRT)?,
            &config.stub,
        )?;
        Ok(Handle::wrap(&log, stub, config))
    }

    #[test]
    fn test_table_chaos() -> anyhow::Result<()> {
        let config = AsicConfig {
            table_entry_add: table_chaos!(("pipe.Ingress.flaky", 1.0)),
            ..Default::default()
        };
        let h = handle(&config)?;
        let tgt = Target::all_pipes(0);

        let mut key = h.key_allocate(1)?;
        key.set_value(1, KeyFieldValue::Exact(vec![1]))?;
        let mut data = h.data_allocate(1, Some(2))?;
        data.set_value(1, DataValue::Bytes(vec![1]))?;
        assert!(matches!(
            h.entry_add(&tgt, &key, &data),
            Err(AsicError::Synthetic(_))
        ));

        let mut key = h.key_allocate(3)?;
        key.set_value(1, KeyFieldValue::Exact(vec![1]))?;
        let data = h.data_allocate(3, Some(2))?;
        h.entry_add(&tgt, &key, &data)?;
        Ok(())
    }

    #[test]
    fn test_uniform() -> anyhow::Result<()> {
        let h = handle(&AsicConfig::uniform(1.0))?;
        assert!(h.cpu_port(0).is_err());
        assert!(h.table_clear(&Target::all_pipes(0), 3).is_err());

        let h = handle(&AsicConfig::uniform_get(0.0))?;
        assert_eq!(h.cpu_port(0)?, tofino_stub::CPU_PORT);
        Ok(())
    }
}
