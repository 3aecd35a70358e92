// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Action profile members and action selector groups, reached either
//! directly or through TNA `ExternEntry` wrappers.

use std::sync::Arc;

use parking_lot::RwLock;
use prost::Message;
use slog::{debug, info, o};

use aal::SdeOps;
use p4rt::v1::action_profile_group::Member;
use p4rt::v1::update::Type as UpdateType;
use p4rt::v1::{ActionProfileGroup, ActionProfileMember, ExternEntry};

use crate::id_mapper::IdMapper;
use crate::id_mapper::{
    TNA_EXTERN_ACTION_PROFILE_ID, TNA_EXTERN_ACTION_SELECTOR_ID,
};
use crate::pipeline::PipelineInfo;
use crate::sde::{SelectorGroup, Sde};
use crate::table_manager::{build_action, set_action};
use crate::types::HalResult;
use crate::{hal_ensure, hal_err};

const MEMBER_TYPE_URL: &str = "type.googleapis.com/p4.v1.ActionProfileMember";
const GROUP_TYPE_URL: &str = "type.googleapis.com/p4.v1.ActionProfileGroup";

fn pack<M: Message>(type_url: &str, msg: &M) -> prost_types::Any {
    prost_types::Any {
        type_url: type_url.to_string(),
        value: msg.encode_to_vec(),
    }
}

// The embedded message of an extern entry, or an empty filter if there is
// none.
fn unpack<M: Message + Default>(entry: &ExternEntry) -> HalResult<M> {
    match &entry.entry {
        Some(any) => Ok(M::decode(any.value.as_slice())?),
        None => Ok(M::default()),
    }
}

pub struct ActionProfileManager<S: SdeOps> {
    log: slog::Logger,
    sde: Arc<Sde<S>>,
    ids: Arc<IdMapper>,
    pipeline: RwLock<Arc<PipelineInfo>>,
}

impl<S: SdeOps> ActionProfileManager<S> {
    pub fn new(
        log: &slog::Logger,
        sde: Arc<Sde<S>>,
        ids: Arc<IdMapper>,
    ) -> Self {
        ActionProfileManager {
            log: log.new(o!("unit" => "action_profile_manager")),
            sde,
            ids,
            pipeline: RwLock::new(Arc::new(PipelineInfo::default())),
        }
    }

    pub fn push_forwarding_pipeline_config(
        &self,
        pipeline: Arc<PipelineInfo>,
    ) -> HalResult<()> {
        info!(self.log, "pushed pipeline";
            "profiles" => pipeline.p4info().action_profiles.len());
        *self.pipeline.write() = pipeline;
        Ok(())
    }

    fn pipeline(&self) -> Arc<PipelineInfo> {
        self.pipeline.read().clone()
    }

    // SDK id of the action profile table
    fn profile_table(&self, profile_id: u32) -> HalResult<u32> {
        self.pipeline().action_profile(profile_id)?;
        self.ids.get_sdk_id(profile_id)
    }

    pub fn write_action_profile_member(
        &self,
        update: UpdateType,
        member: &ActionProfileMember,
    ) -> HalResult<()> {
        let table_id = self.profile_table(member.action_profile_id)?;
        let id = member.member_id;
        debug!(self.log, "writing member";
            "profile" => member.action_profile_id, "member" => id,
            "update" => ?update);
        if update == UpdateType::Delete {
            return self.sde.delete_action_profile_member(table_id, id);
        }

        let action = member.action.as_ref().ok_or_else(|| {
            hal_err!(InvalidParam, "Action profile member {id} has no action.")
        })?;
        let mut data =
            self.sde.create_table_data(table_id, Some(action.action_id))?;
        set_action(action, &mut data)?;
        match update {
            UpdateType::Insert => {
                self.sde.insert_action_profile_member(table_id, id, &data)
            }
            UpdateType::Modify => {
                self.sde.modify_action_profile_member(table_id, id, &data)
            }
            _ => Err(hal_err!(InvalidParam, "Invalid update type {update:?}.")),
        }
    }

    /// Reads one member, or every member of the profile if `member_id` is
    /// zero.
    pub fn read_action_profile_member(
        &self,
        member: &ActionProfileMember,
    ) -> HalResult<Vec<ActionProfileMember>> {
        hal_ensure!(
            member.action_profile_id != 0,
            InvalidParam,
            "Reading all action profiles is not supported."
        );
        let pipeline = self.pipeline();
        let table_id = self.profile_table(member.action_profile_id)?;
        self.sde
            .get_action_profile_members(table_id, member.member_id)?
            .into_iter()
            .map(|(member_id, data)| {
                let action_id = data.action_id().ok_or_else(|| {
                    hal_err!(Internal, "Member {member_id} has no action.")
                })?;
                Ok(ActionProfileMember {
                    action_profile_id: member.action_profile_id,
                    member_id,
                    action: Some(build_action(&pipeline, action_id, &data)?),
                })
            })
            .collect()
    }

    pub fn write_action_profile_group(
        &self,
        update: UpdateType,
        group: &ActionProfileGroup,
    ) -> HalResult<()> {
        let profile_table = self.profile_table(group.action_profile_id)?;
        let table_id = self.ids.get_action_selector_id(profile_table)?;
        debug!(self.log, "writing group";
            "profile" => group.action_profile_id, "group" => group.group_id,
            "update" => ?update);
        if update == UpdateType::Delete {
            return self
                .sde
                .delete_action_profile_group(table_id, group.group_id);
        }

        let max_group_size = match group.max_size {
            0 => {
                let pipeline = self.pipeline();
                let profile =
                    pipeline.action_profile(group.action_profile_id)?;
                profile.max_group_size
            }
            n => n,
        };
        let max_group_size = u32::try_from(max_group_size).map_err(|_| {
            hal_err!(InvalidParam, "Invalid max group size {max_group_size}.")
        })?;
        let member_ids: Vec<u32> =
            group.members.iter().map(|m| m.member_id).collect();
        let sel = SelectorGroup {
            group_id: group.group_id,
            max_group_size,
            member_status: vec![true; member_ids.len()],
            member_ids,
        };
        match update {
            UpdateType::Insert => {
                self.sde.insert_action_profile_group(table_id, &sel)
            }
            UpdateType::Modify => {
                self.sde.modify_action_profile_group(table_id, &sel)
            }
            _ => Err(hal_err!(InvalidParam, "Invalid update type {update:?}.")),
        }
    }

    /// Reads one group, or every group of the profile if `group_id` is zero.
    pub fn read_action_profile_group(
        &self,
        group: &ActionProfileGroup,
    ) -> HalResult<Vec<ActionProfileGroup>> {
        hal_ensure!(
            group.action_profile_id != 0,
            InvalidParam,
            "Reading all action profiles is not supported."
        );
        let profile_table = self.profile_table(group.action_profile_id)?;
        let table_id = self.ids.get_action_selector_id(profile_table)?;
        Ok(self
            .sde
            .get_action_profile_groups(table_id, group.group_id)?
            .into_iter()
            .map(|g| ActionProfileGroup {
                action_profile_id: group.action_profile_id,
                group_id: g.group_id,
                members: g
                    .member_ids
                    .into_iter()
                    .map(|member_id| Member {
                        member_id,
                        weight: 1,
                        ..Default::default()
                    })
                    .collect(),
                max_size: g.max_group_size as i32,
            })
            .collect())
    }

    pub fn write_extern_entry(
        &self,
        update: UpdateType,
        entry: &ExternEntry,
    ) -> HalResult<()> {
        match entry.extern_type_id {
            TNA_EXTERN_ACTION_PROFILE_ID => self
                .write_action_profile_member(update, &unpack(entry)?),
            TNA_EXTERN_ACTION_SELECTOR_ID => self
                .write_action_profile_group(update, &unpack(entry)?),
            x => Err(hal_err!(InvalidParam, "Unsupported extern type {x}.")),
        }
    }

    pub fn read_extern_entry(
        &self,
        entry: &ExternEntry,
    ) -> HalResult<Vec<ExternEntry>> {
        let wrap = |any: prost_types::Any| ExternEntry {
            extern_type_id: entry.extern_type_id,
            extern_id: entry.extern_id,
            entry: Some(any),
        };
        match entry.extern_type_id {
            TNA_EXTERN_ACTION_PROFILE_ID => {
                let mut filter: ActionProfileMember = unpack(entry)?;
                if filter.action_profile_id == 0 {
                    filter.action_profile_id = entry.extern_id;
                }
                Ok(self
                    .read_action_profile_member(&filter)?
                    .iter()
                    .map(|m| wrap(pack(MEMBER_TYPE_URL, m)))
                    .collect())
            }
            TNA_EXTERN_ACTION_SELECTOR_ID => {
                let mut filter: ActionProfileGroup = unpack(entry)?;
                if filter.action_profile_id == 0 {
                    filter.action_profile_id = entry.extern_id;
                }
                Ok(self
                    .read_action_profile_group(&filter)?
                    .iter()
                    .map(|g| wrap(pack(GROUP_TYPE_URL, g)))
                    .collect())
            }
            x => Err(hal_err!(Unimplemented, "Unsupported extern type {x}.")),
        }
    }
}
