// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Multicast groups live in two fixed-function tables of the packet
//! replication engine.  `$pre.node` holds the replication nodes, each a
//! replication id and a set of egress ports.  `$pre.mgid` maps a multicast
//! group id to the list of nodes it replicates to.

use slog::{debug, warn};

use aal::{DataValue, SdeOps};

use super::Sde;
use crate::hal_err;
use crate::types::HalResult;

const PRE_MGID: &str = "$pre.mgid";
const PRE_NODE: &str = "$pre.node";

const MGID: &str = "$MGID";
pub(crate) const NODE_ID: &str = "$MULTICAST_NODE_ID";
const NODE_L1_XID_VALID: &str = "$MULTICAST_NODE_L1_XID_VALID";
const NODE_L1_XID: &str = "$MULTICAST_NODE_L1_XID";
const RID: &str = "$MULTICAST_RID";
const LAG_ID: &str = "$MULTICAST_LAG_ID";
const DEV_PORT: &str = "$DEV_PORT";

/// A multicast group and the replication nodes it points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MulticastGroup {
    pub group_id: u32,
    pub node_ids: Vec<u32>,
}

/// One replication node of the packet replication engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MulticastNode {
    pub rid: u32,
    pub lag_ids: Vec<u32>,
    pub ports: Vec<u32>,
}

fn uints(v: &[u32]) -> DataValue {
    DataValue::UintArray(v.iter().map(|x| u64::from(*x)).collect())
}

fn to_u32(name: &str, v: u64) -> HalResult<u32> {
    u32::try_from(v).map_err(|_| hal_err!(Internal, "bad {name} value {v}"))
}

fn uint_list(name: &str, v: DataValue) -> HalResult<Vec<u32>> {
    match v {
        DataValue::UintArray(a) => {
            a.into_iter().map(|x| to_u32(name, x)).collect()
        }
        x => Err(hal_err!(Internal, "unexpected {name} value {x:?}")),
    }
}

impl<S: SdeOps> Sde<S> {
    fn pre_table(&self, name: &str) -> HalResult<u32> {
        Ok(self.table_by_name(name)?.id)
    }

    /// Creates a replication node, returning the id it was assigned.
    pub fn create_multicast_node(
        &self,
        rid: u32,
        lag_ids: &[u32],
        ports: &[u32],
    ) -> HalResult<u32> {
        let table = self.pre_table(PRE_NODE)?;
        let node_id = self.node_ids.lock().alloc()?;

        let mut key = self.create_table_key(table)?;
        key.set_index(NODE_ID, node_id)?;
        let mut data = self.create_table_data(table, None)?;
        data.set_named(RID, DataValue::Uint(rid.into()))?;
        data.set_named(LAG_ID, uints(lag_ids))?;
        data.set_named(DEV_PORT, uints(ports))?;
        if let Err(e) = self.insert_table_entry(table, &key, &data) {
            self.node_ids.lock().free(node_id);
            return Err(e);
        }
        debug!(self.log, "created multicast node {node_id}";
            "rid" => rid, "ports" => ?ports);
        Ok(node_id)
    }

    pub fn get_multicast_node(
        &self,
        node_id: u32,
    ) -> HalResult<MulticastNode> {
        let table = self.pre_table(PRE_NODE)?;
        let mut key = self.create_table_key(table)?;
        key.set_index(NODE_ID, node_id)?;
        let data = self.get_table_entry(table, &key)?;
        Ok(MulticastNode {
            rid: to_u32(RID, data.get_named(RID)?.as_u64()?)?,
            lag_ids: uint_list(LAG_ID, data.get_named(LAG_ID)?)?,
            ports: uint_list(DEV_PORT, data.get_named(DEV_PORT)?)?,
        })
    }

    /// Deletes replication nodes and returns their ids to the allocator.
    /// Stops at the first node that can't be deleted.
    pub fn delete_multicast_nodes(&self, node_ids: &[u32]) -> HalResult<()> {
        let table = self.pre_table(PRE_NODE)?;
        for id in node_ids {
            let mut key = self.create_table_key(table)?;
            key.set_index(NODE_ID, *id)?;
            self.delete_table_entry(table, &key).inspect_err(|e| {
                warn!(self.log, "failed to delete multicast node {id}: {e}")
            })?;
            self.node_ids.lock().free(*id);
        }
        Ok(())
    }

    pub fn get_nodes_in_multicast_group(
        &self,
        group_id: u32,
    ) -> HalResult<Vec<u32>> {
        let table = self.pre_table(PRE_MGID)?;
        let mut key = self.create_table_key(table)?;
        key.set_index(MGID, group_id)?;
        let data = self.get_table_entry(table, &key)?;
        uint_list(NODE_ID, data.get_named(NODE_ID)?)
    }

    fn write_multicast_group(
        &self,
        group_id: u32,
        node_ids: &[u32],
        insert: bool,
    ) -> HalResult<()> {
        let table = self.pre_table(PRE_MGID)?;
        let mut key = self.create_table_key(table)?;
        key.set_index(MGID, group_id)?;
        let mut data = self.create_table_data(table, None)?;
        data.set_named(NODE_ID, uints(node_ids))?;
        // L1 exclusion ids aren't expressible in P4Runtime.
        data.set_named(
            NODE_L1_XID_VALID,
            DataValue::BoolArray(vec![false; node_ids.len()]),
        )?;
        data.set_named(NODE_L1_XID, uints(&vec![0; node_ids.len()]))?;
        match insert {
            true => self.insert_table_entry(table, &key, &data),
            false => self.modify_table_entry(table, &key, &data),
        }
    }

    pub fn insert_multicast_group(
        &self,
        group_id: u32,
        node_ids: &[u32],
    ) -> HalResult<()> {
        self.write_multicast_group(group_id, node_ids, true)
    }

    pub fn modify_multicast_group(
        &self,
        group_id: u32,
        node_ids: &[u32],
    ) -> HalResult<()> {
        self.write_multicast_group(group_id, node_ids, false)
    }

    pub fn delete_multicast_group(&self, group_id: u32) -> HalResult<()> {
        let table = self.pre_table(PRE_MGID)?;
        let mut key = self.create_table_key(table)?;
        key.set_index(MGID, group_id)?;
        self.delete_table_entry(table, &key)
    }

    /// Reads one multicast group, or all of them if `group_id` is 0.
    pub fn get_multicast_groups(
        &self,
        group_id: u32,
    ) -> HalResult<Vec<MulticastGroup>> {
        let table = self.pre_table(PRE_MGID)?;
        let entries = match group_id {
            0 => self.get_all_entries(table)?,
            id => {
                let mut key = self.create_table_key(table)?;
                key.set_index(MGID, id)?;
                let data = self.get_table_entry(table, &key)?;
                vec![(key, data)]
            }
        };
        entries
            .into_iter()
            .map(|(key, data)| {
                Ok(MulticastGroup {
                    group_id: key.get_index(MGID)?,
                    node_ids: uint_list(NODE_ID, data.get_named(NODE_ID)?)?,
                })
            })
            .collect()
    }
}
