// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Packet replication engine entries: multicast groups and clone sessions.
//!
//! A multicast group is programmed as one replication node per distinct
//! replica instance, with the instance used as the node's replication id.
//! The group itself is a list of those nodes.

use std::collections::BTreeMap;
use std::sync::Arc;

use slog::{debug, o, warn};

use aal::SdeOps;
use p4rt::v1::packet_replication_engine_entry::Type as PreType;
use p4rt::v1::update::Type as UpdateType;
use p4rt::v1::{
    CloneSessionEntry, MulticastGroupEntry, PacketReplicationEngineEntry,
    Replica,
};

use crate::sde::{CloneSession, Sde};
use crate::types::HalResult;
use crate::{hal_ensure, hal_err};

const MAX_MULTICAST_GROUP_ID: u32 = 0xffff;
const MAX_REPLICA_INSTANCE: u32 = 0xffff;
const MAX_CLONE_SESSION_ID: u32 = 1015;
const MAX_PACKET_LENGTH: i32 = 0xffff;
const MAX_CLASS_OF_SERVICE: u32 = 7;

pub struct PreManager<S: SdeOps> {
    log: slog::Logger,
    sde: Arc<Sde<S>>,
}

impl<S: SdeOps> PreManager<S> {
    pub fn new(log: &slog::Logger, sde: Arc<Sde<S>>) -> Self {
        PreManager {
            log: log.new(o!("unit" => "pre_manager")),
            sde,
        }
    }

    pub fn write_pre_entry(
        &self,
        update: UpdateType,
        entry: &PacketReplicationEngineEntry,
    ) -> HalResult<()> {
        match &entry.r#type {
            Some(PreType::MulticastGroupEntry(m)) => {
                self.write_multicast_group(update, m)
            }
            Some(PreType::CloneSessionEntry(c)) => {
                self.write_clone_session(update, c)
            }
            None => Err(hal_err!(
                InvalidParam,
                "PacketReplicationEngineEntry has no type."
            )),
        }
    }

    pub fn read_pre_entry(
        &self,
        entry: &PacketReplicationEngineEntry,
    ) -> HalResult<Vec<PacketReplicationEngineEntry>> {
        let wrap = |t| PacketReplicationEngineEntry { r#type: Some(t) };
        match &entry.r#type {
            Some(PreType::MulticastGroupEntry(m)) => Ok(self
                .read_multicast_groups(m)?
                .into_iter()
                .map(|m| wrap(PreType::MulticastGroupEntry(m)))
                .collect()),
            Some(PreType::CloneSessionEntry(c)) => Ok(self
                .read_clone_sessions(c)?
                .into_iter()
                .map(|c| wrap(PreType::CloneSessionEntry(c)))
                .collect()),
            None => Err(hal_err!(
                InvalidParam,
                "PacketReplicationEngineEntry has no type."
            )),
        }
    }

    // Creates one replication node per replica instance.  Nothing is left
    // behind on failure.
    fn create_nodes(&self, replicas: &[Replica]) -> HalResult<Vec<u32>> {
        let mut by_instance: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
        for r in replicas {
            hal_ensure!(
                r.instance <= MAX_REPLICA_INSTANCE,
                InvalidParam,
                "Replica instance {} is out of range.",
                r.instance
            );
            by_instance.entry(r.instance).or_default().push(r.egress_port);
        }

        let mut nodes = Vec::with_capacity(by_instance.len());
        for (rid, ports) in by_instance {
            match self.sde.create_multicast_node(rid, &[], &ports) {
                Ok(id) => nodes.push(id),
                Err(e) => {
                    self.cleanup_nodes(&nodes);
                    return Err(e);
                }
            }
        }
        Ok(nodes)
    }

    fn cleanup_nodes(&self, nodes: &[u32]) {
        if let Err(e) = self.sde.delete_multicast_nodes(nodes) {
            warn!(self.log, "failed to clean up multicast nodes";
                "nodes" => ?nodes, "error" => %e);
        }
    }

    pub fn write_multicast_group(
        &self,
        update: UpdateType,
        entry: &MulticastGroupEntry,
    ) -> HalResult<()> {
        let group_id = entry.multicast_group_id;
        hal_ensure!(
            group_id <= MAX_MULTICAST_GROUP_ID,
            InvalidParam,
            "Multicast group id {group_id} is out of range."
        );
        debug!(self.log, "writing multicast group";
            "group" => group_id, "update" => ?update,
            "replicas" => entry.replicas.len());

        match update {
            UpdateType::Insert => {
                let nodes = self.create_nodes(&entry.replicas)?;
                let res = self.sde.insert_multicast_group(group_id, &nodes);
                if let Err(e) = res {
                    self.cleanup_nodes(&nodes);
                    return Err(e);
                }
                Ok(())
            }
            UpdateType::Modify => {
                let old = self.sde.get_nodes_in_multicast_group(group_id)?;
                let nodes = self.create_nodes(&entry.replicas)?;
                let res = self.sde.modify_multicast_group(group_id, &nodes);
                if let Err(e) = res {
                    self.cleanup_nodes(&nodes);
                    return Err(e);
                }
                self.sde.delete_multicast_nodes(&old)
            }
            UpdateType::Delete => {
                let old = self.sde.get_nodes_in_multicast_group(group_id)?;
                self.sde.delete_multicast_group(group_id)?;
                self.sde.delete_multicast_nodes(&old)
            }
            UpdateType::Unspecified => {
                Err(hal_err!(InvalidParam, "Invalid update type {update:?}."))
            }
        }
    }

    /// Reads one multicast group, or all of them if the id is zero.
    pub fn read_multicast_groups(
        &self,
        entry: &MulticastGroupEntry,
    ) -> HalResult<Vec<MulticastGroupEntry>> {
        let mut entries = Vec::new();
        for group in self.sde.get_multicast_groups(entry.multicast_group_id)? {
            let mut replicas = Vec::new();
            for node_id in group.node_ids {
                let node = self.sde.get_multicast_node(node_id)?;
                replicas.extend(node.ports.iter().map(|&egress_port| {
                    Replica {
                        egress_port,
                        instance: node.rid,
                    }
                }));
            }
            replicas.sort_by_key(|r| (r.instance, r.egress_port));
            entries.push(MulticastGroupEntry {
                multicast_group_id: group.group_id,
                replicas,
                metadata: Vec::new(),
            });
        }
        Ok(entries)
    }

    pub fn write_clone_session(
        &self,
        update: UpdateType,
        entry: &CloneSessionEntry,
    ) -> HalResult<()> {
        let session_id = entry.session_id;
        hal_ensure!(
            (1..=MAX_CLONE_SESSION_ID).contains(&session_id),
            InvalidParam,
            "Clone session id {session_id} is out of range."
        );
        hal_ensure!(
            (0..=MAX_PACKET_LENGTH).contains(&entry.packet_length_bytes),
            InvalidParam,
            "Packet length {} of clone session {session_id} is out of range.",
            entry.packet_length_bytes
        );
        debug!(self.log, "writing clone session";
            "session" => session_id, "update" => ?update);
        if update == UpdateType::Delete {
            return self.sde.delete_clone_session(session_id);
        }

        let [replica] = entry.replicas.as_slice() else {
            return Err(hal_err!(
                InvalidParam,
                "Clone session {session_id} must have exactly one replica."
            ));
        };
        hal_ensure!(
            replica.egress_port != 0 && replica.instance == 0,
            InvalidParam,
            "Clone session {session_id} needs a replica with a port and \
             instance 0."
        );
        let session = CloneSession {
            session_id,
            egress_port: replica.egress_port,
            cos: entry.class_of_service,
            max_pkt_len: entry.packet_length_bytes as u32,
        };
        match update {
            UpdateType::Insert => {
                hal_ensure!(
                    entry.class_of_service <= MAX_CLASS_OF_SERVICE,
                    InvalidParam,
                    "Class of service {} is out of range.",
                    entry.class_of_service
                );
                self.sde.insert_clone_session(&session)
            }
            UpdateType::Modify => self.sde.modify_clone_session(&session),
            _ => Err(hal_err!(InvalidParam, "Invalid update type {update:?}.")),
        }
    }

    /// Reads one clone session, or all of them if the id is zero.
    pub fn read_clone_sessions(
        &self,
        entry: &CloneSessionEntry,
    ) -> HalResult<Vec<CloneSessionEntry>> {
        Ok(self
            .sde
            .get_clone_sessions(entry.session_id)?
            .into_iter()
            .map(|s| CloneSessionEntry {
                session_id: s.session_id,
                replicas: vec![Replica {
                    egress_port: s.egress_port,
                    instance: 0,
                }],
                class_of_service: s.cos,
                packet_length_bytes: s.max_pkt_len as i32,
            })
            .collect())
    }
}
