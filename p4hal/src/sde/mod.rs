// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The programming layer between P4Runtime objects and the SDK's tables.
//!
//! Every operation looks up the table by its SDK id, allocates fresh key and
//! data objects, fills them in, and issues a single SDK call against all pipes
//! of the device.  Key and data objects are never reused across calls.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use slog::{info, o};

use aal::{PortKey, SdeOps, TableInfo, TableOperation, TableType, Target};

use crate::{hal_err, hal_ensure};
use crate::types::{ErrorContext, HalError, HalResult};

mod action_profile;
mod clone_session;
mod counter;
mod data;
mod key;
mod meter;
mod multicast;
mod node_alloc;
mod register;
mod sync;
mod table;

pub use action_profile::SelectorGroup;
pub use clone_session::CloneSession;
pub use counter::CounterValue;
pub use data::TableData;
pub use key::TableKey;
pub use meter::MeterConfig;
pub use multicast::{MulticastGroup, MulticastNode};
pub use node_alloc::NodeAllocator;
pub use sync::SyncOutcome;

pub struct Sde<S: SdeOps> {
    log: slog::Logger,
    hdl: Arc<S>,
    device: u32,
    /// Asynchronous operations each table supports, recorded at pipeline push
    sync_ops: RwLock<Arc<HashMap<u32, Vec<TableOperation>>>>,
    node_ids: Mutex<NodeAllocator>,
}

impl<S: SdeOps> Sde<S> {
    pub fn new(log: &slog::Logger, hdl: Arc<S>, device: u32) -> Self {
        let log = log.new(o!("unit" => "sde", "device" => device));
        let node_ids = Mutex::new(NodeAllocator::new(&log));
        Sde {
            log,
            hdl,
            device,
            sync_ops: RwLock::new(Arc::new(HashMap::new())),
            node_ids,
        }
    }

    /// The backend this layer programs
    pub fn backend(&self) -> &Arc<S> {
        &self.hdl
    }

    pub fn device(&self) -> u32 {
        self.device
    }

    pub(crate) fn target(&self) -> Target {
        Target::all_pipes(self.device)
    }

    pub fn tables(&self) -> Vec<Arc<TableInfo>> {
        self.hdl.tables()
    }

    pub fn table_info(&self, table_id: u32) -> HalResult<Arc<TableInfo>> {
        Ok(self.hdl.table_info(table_id)?)
    }

    /// Finds a fixed-function table, such as `$pre.node`, by name.
    pub(crate) fn table_by_name(
        &self,
        name: &str,
    ) -> HalResult<Arc<TableInfo>> {
        self.hdl
            .tables()
            .into_iter()
            .find(|t| t.name == name)
            .ok_or_else(|| hal_err!(NotFound, "no table named {name}"))
    }

    /// Prepare the layer for a newly pushed pipeline: learn which tables
    /// support counter and register syncs, and seed the multicast node
    /// allocator from what is already installed.
    pub fn push_forwarding_pipeline_config(&self) -> HalResult<()> {
        self.negotiate_sync()?;

        let node_table = self
            .tables()
            .into_iter()
            .find(|t| t.table_type == TableType::PreNode);
        let mut alloc = self.node_ids.lock();
        match node_table {
            Some(t) => {
                alloc.reset(t.size as u32);
                for (key, _) in self.get_all_entries(t.id)? {
                    alloc.reserve(key.get_index(multicast::NODE_ID)?)?;
                }
            }
            None => alloc.reset(0),
        }
        info!(self.log, "pipeline ready";
            "multicast_nodes" => alloc.size());
        Ok(())
    }

    pub fn create_table_key(
        &self,
        table_id: u32,
    ) -> HalResult<TableKey<S::Key>> {
        let info = self.table_info(table_id)?;
        let key = self.hdl.key_allocate(table_id)?;
        Ok(TableKey::new(info, key))
    }

    pub fn create_table_data(
        &self,
        table_id: u32,
        action_id: Option<u32>,
    ) -> HalResult<TableData<S::Data>> {
        let info = self.table_info(table_id)?;
        let data = self.hdl.data_allocate(table_id, action_id)?;
        Ok(TableData::new(info, data))
    }

    /// The device port id of the PCIe CPU port
    pub fn get_pcie_cpu_port(&self) -> HalResult<u32> {
        Ok(self.hdl.cpu_port(self.device)?)
    }

    pub fn get_port_id_from_port_key(&self, key: &PortKey) -> HalResult<u32> {
        Ok(self.hdl.port_id_from_port_key(self.device, key)?)
    }
}

/// The cells of an indexed table touched by a write: the one at `index`, or
/// all of them.
pub(crate) fn cell_range(
    info: &TableInfo,
    index: Option<u32>,
) -> HalResult<Range<u32>> {
    let size = u32::try_from(info.size).unwrap_or(u32::MAX);
    match index {
        Some(i) => {
            hal_ensure!(
                i < size,
                InvalidParam,
                "Index {i} is out of range for {} of size {size}.",
                info.name
            );
            Ok(i..i + 1)
        }
        None => Ok(0..size),
    }
}

/// Attach the SDK objects of a failed table operation to its error.
pub(crate) fn with_objects<'a, K, D>(
    table_id: u32,
    key: Option<&'a TableKey<K>>,
    data: Option<&'a TableData<D>>,
) -> impl FnOnce(HalError) -> HalError + 'a
where
    K: aal::SdeKey + 'a,
    D: aal::SdeData + 'a,
{
    move |e| {
        e.with_context(ErrorContext {
            table_id: Some(table_id),
            key: key.map(|k| k.fields()).unwrap_or_default(),
            data: data.map(|d| d.fields()).unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::fixtures;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_ports() -> anyhow::Result<()> {
        let (_log, sde) = fixtures::sde()?;
        assert_eq!(sde.get_pcie_cpu_port()?, asic::tofino_stub::CPU_PORT);
        let key = aal::PortKey {
            slot: 1,
            port: 66,
            channel: None,
        };
        assert_eq!(sde.get_port_id_from_port_key(&key)?, 260);
        Ok(())
    }

    #[test]
    fn test_table_by_name() -> anyhow::Result<()> {
        let (_log, sde) = fixtures::sde()?;
        assert_eq!(sde.table_by_name("$pre.node")?.id, fixtures::SDK_PRE_NODE);
        assert!(sde.table_by_name("$pre.lag").is_err());
        Ok(())
    }
}
