// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use slog::debug;

use aal::{DataValue, SdeOps};

use super::data::ACTION_MEMBER_ID;
use super::data::SELECTOR_GROUP_ID;
use super::{Sde, TableData};
use crate::hal_err;
use crate::hal_ensure;
use crate::types::HalResult;

const ACTION_MEMBER_STATUS: &str = "$ACTION_MEMBER_STATUS";
const MAX_GROUP_SIZE: &str = "$MAX_GROUP_SIZE";

/// A group of an action selector.  `member_ids` and `member_status` are
/// parallel arrays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorGroup {
    pub group_id: u32,
    pub max_group_size: u32,
    pub member_ids: Vec<u32>,
    pub member_status: Vec<bool>,
}

fn to_u32(name: &str, v: u64) -> HalResult<u32> {
    u32::try_from(v).map_err(|_| hal_err!(Internal, "bad {name} value {v}"))
}

impl<S: SdeOps> Sde<S> {
    fn write_action_profile_member(
        &self,
        table_id: u32,
        member_id: u32,
        data: &TableData<S::Data>,
        insert: bool,
    ) -> HalResult<()> {
        let mut key = self.create_table_key(table_id)?;
        key.set_index(ACTION_MEMBER_ID, member_id)?;
        debug!(self.log, "writing action profile member";
            "table" => table_id, "member" => member_id);
        match insert {
            true => self.insert_table_entry(table_id, &key, data),
            false => self.modify_table_entry(table_id, &key, data),
        }
    }

    /// Adds a member to an action profile.  `data` carries the member's
    /// action and its parameters.
    pub fn insert_action_profile_member(
        &self,
        table_id: u32,
        member_id: u32,
        data: &TableData<S::Data>,
    ) -> HalResult<()> {
        self.write_action_profile_member(table_id, member_id, data, true)
    }

    pub fn modify_action_profile_member(
        &self,
        table_id: u32,
        member_id: u32,
        data: &TableData<S::Data>,
    ) -> HalResult<()> {
        self.write_action_profile_member(table_id, member_id, data, false)
    }

    pub fn delete_action_profile_member(
        &self,
        table_id: u32,
        member_id: u32,
    ) -> HalResult<()> {
        let mut key = self.create_table_key(table_id)?;
        key.set_index(ACTION_MEMBER_ID, member_id)?;
        self.delete_table_entry(table_id, &key)
    }

    /// Reads one member, or all of them if `member_id` is 0.
    pub fn get_action_profile_members(
        &self,
        table_id: u32,
        member_id: u32,
    ) -> HalResult<Vec<(u32, TableData<S::Data>)>> {
        let entries = match member_id {
            0 => self.get_all_entries(table_id)?,
            id => {
                let mut key = self.create_table_key(table_id)?;
                key.set_index(ACTION_MEMBER_ID, id)?;
                let data = self.get_table_entry(table_id, &key)?;
                vec![(key, data)]
            }
        };
        entries
            .into_iter()
            .map(|(key, data)| Ok((key.get_index(ACTION_MEMBER_ID)?, data)))
            .collect()
    }

    fn write_action_profile_group(
        &self,
        table_id: u32,
        group: &SelectorGroup,
        insert: bool,
    ) -> HalResult<()> {
        hal_ensure!(
            group.member_ids.len() == group.member_status.len(),
            InvalidParam,
            "Group {} has {} members but {} member states.",
            group.group_id,
            group.member_ids.len(),
            group.member_status.len()
        );
        let mut key = self.create_table_key(table_id)?;
        key.set_index(SELECTOR_GROUP_ID, group.group_id)?;
        let mut data = self.create_table_data(table_id, None)?;
        data.set_named(
            ACTION_MEMBER_ID,
            DataValue::UintArray(
                group.member_ids.iter().map(|m| u64::from(*m)).collect(),
            ),
        )?;
        data.set_named(
            ACTION_MEMBER_STATUS,
            DataValue::BoolArray(group.member_status.clone()),
        )?;
        data.set_named(
            MAX_GROUP_SIZE,
            DataValue::Uint(group.max_group_size.into()),
        )?;
        debug!(self.log, "writing selector group";
            "table" => table_id, "group" => group.group_id,
            "members" => group.member_ids.len());
        match insert {
            true => self.insert_table_entry(table_id, &key, &data),
            false => self.modify_table_entry(table_id, &key, &data),
        }
    }

    pub fn insert_action_profile_group(
        &self,
        table_id: u32,
        group: &SelectorGroup,
    ) -> HalResult<()> {
        self.write_action_profile_group(table_id, group, true)
    }

    pub fn modify_action_profile_group(
        &self,
        table_id: u32,
        group: &SelectorGroup,
    ) -> HalResult<()> {
        self.write_action_profile_group(table_id, group, false)
    }

    pub fn delete_action_profile_group(
        &self,
        table_id: u32,
        group_id: u32,
    ) -> HalResult<()> {
        let mut key = self.create_table_key(table_id)?;
        key.set_index(SELECTOR_GROUP_ID, group_id)?;
        self.delete_table_entry(table_id, &key)
    }

    /// Reads one selector group, or all of them if `group_id` is 0.
    pub fn get_action_profile_groups(
        &self,
        table_id: u32,
        group_id: u32,
    ) -> HalResult<Vec<SelectorGroup>> {
        let entries = match group_id {
            0 => self.get_all_entries(table_id)?,
            id => {
                let mut key = self.create_table_key(table_id)?;
                key.set_index(SELECTOR_GROUP_ID, id)?;
                let data = self.get_table_entry(table_id, &key)?;
                vec![(key, data)]
            }
        };

        let mut groups = Vec::with_capacity(entries.len());
        for (key, data) in entries {
            let member_ids = match data.get_named(ACTION_MEMBER_ID)? {
                DataValue::UintArray(m) => m
                    .into_iter()
                    .map(|v| to_u32(ACTION_MEMBER_ID, v))
                    .collect::<HalResult<Vec<_>>>()?,
                x => {
                    return Err(hal_err!(Internal, "bad member list {x:?}"))
                }
            };
            let member_status = match data.get_named(ACTION_MEMBER_STATUS)? {
                DataValue::BoolArray(s) => s,
                x => {
                    return Err(hal_err!(Internal, "bad member status {x:?}"))
                }
            };
            let max = data.get_named(MAX_GROUP_SIZE)?.as_u64()?;
            groups.push(SelectorGroup {
                group_id: key.get_index(SELECTOR_GROUP_ID)?,
                max_group_size: to_u32(MAX_GROUP_SIZE, max)?,
                member_ids,
                member_status,
            });
        }
        Ok(groups)
    }
}
