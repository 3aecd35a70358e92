// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use slog::debug;

use aal::{DataValue, SdeOps};

use super::{Sde, TableData};
use crate::hal_err;
use crate::hal_ensure;
use crate::types::HalResult;

const MIRROR_CFG: &str = "$mirror.cfg";
const NORMAL: &str = "$normal";

const SID: &str = "$sid";
const DIRECTION: &str = "$direction";
const SESSION_ENABLE: &str = "$session_enable";
const UCAST_EGRESS_PORT: &str = "$ucast_egress_port";
const UCAST_EGRESS_PORT_VALID: &str = "$ucast_egress_port_valid";
const INGRESS_COS: &str = "$ingress_cos";
const MAX_PKT_LEN: &str = "$max_pkt_len";

/// A mirror session cloning packets to a single egress port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloneSession {
    pub session_id: u32,
    pub egress_port: u32,
    pub cos: u32,
    pub max_pkt_len: u32,
}

fn field<D: aal::SdeData>(data: &TableData<D>, name: &str) -> HalResult<u32> {
    let v = data.get_named(name)?.as_u64()?;
    u32::try_from(v).map_err(|_| hal_err!(Internal, "bad {name} value {v}"))
}

impl<S: SdeOps> Sde<S> {
    // The mirror table and the id of its `$normal` action
    fn mirror_table(&self) -> HalResult<(u32, u32)> {
        let info = self.table_by_name(MIRROR_CFG)?;
        let action = info.action(NORMAL)?.id;
        Ok((info.id, action))
    }

    fn write_clone_session(
        &self,
        session: &CloneSession,
        insert: bool,
    ) -> HalResult<()> {
        let (table, action) = self.mirror_table()?;
        let mut key = self.create_table_key(table)?;
        key.set_index(SID, session.session_id)?;
        let mut data = self.create_table_data(table, Some(action))?;
        data.set_named(DIRECTION, DataValue::Str("BOTH".to_string()))?;
        data.set_named(SESSION_ENABLE, DataValue::Bool(true))?;
        data.set_named(
            UCAST_EGRESS_PORT,
            DataValue::Uint(session.egress_port.into()),
        )?;
        data.set_named(UCAST_EGRESS_PORT_VALID, DataValue::Bool(true))?;
        data.set_named(INGRESS_COS, DataValue::Uint(session.cos.into()))?;
        data.set_named(
            MAX_PKT_LEN,
            DataValue::Uint(session.max_pkt_len.into()),
        )?;
        debug!(self.log, "writing clone session"; "session" => ?session,
            "insert" => insert);
        match insert {
            true => self.insert_table_entry(table, &key, &data),
            false => self.modify_table_entry(table, &key, &data),
        }
    }

    pub fn insert_clone_session(
        &self,
        session: &CloneSession,
    ) -> HalResult<()> {
        self.write_clone_session(session, true)
    }

    pub fn modify_clone_session(
        &self,
        session: &CloneSession,
    ) -> HalResult<()> {
        self.write_clone_session(session, false)
    }

    pub fn delete_clone_session(&self, session_id: u32) -> HalResult<()> {
        let (table, _) = self.mirror_table()?;
        let mut key = self.create_table_key(table)?;
        key.set_index(SID, session_id)?;
        self.delete_table_entry(table, &key)
    }

    /// Reads one clone session, or all of them if `session_id` is 0.
    /// Sessions this layer didn't write, disabled or without a unicast
    /// egress port, are an internal error.
    pub fn get_clone_sessions(
        &self,
        session_id: u32,
    ) -> HalResult<Vec<CloneSession>> {
        let (table, _) = self.mirror_table()?;
        let entries = match session_id {
            0 => self.get_all_entries(table)?,
            id => {
                let mut key = self.create_table_key(table)?;
                key.set_index(SID, id)?;
                let data = self.get_table_entry(table, &key)?;
                vec![(key, data)]
            }
        };

        let mut sessions = Vec::with_capacity(entries.len());
        for (key, data) in entries {
            let session_id = key.get_index(SID)?;
            hal_ensure!(
                data.get_named(SESSION_ENABLE)?.as_bool()?,
                Internal,
                "Found a session that is not enabled: {session_id}."
            );
            hal_ensure!(
                data.get_named(UCAST_EGRESS_PORT_VALID)?.as_bool()?,
                Internal,
                "Found a unicast egress port that is not set valid: \
                 {session_id}."
            );
            sessions.push(CloneSession {
                session_id,
                egress_port: field(&data, UCAST_EGRESS_PORT)?,
                cos: field(&data, INGRESS_COS)?,
                max_pkt_len: field(&data, MAX_PKT_LEN)?,
            });
        }
        Ok(sessions)
    }
}
