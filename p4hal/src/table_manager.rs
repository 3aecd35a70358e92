// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Programs P4Runtime table entries, along with the direct resources and
//! registers that hang off of the pipeline's tables.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use slog::{debug, info, o, warn};

use aal::{KeyFieldValue, SdeOps, TableOperation};
use common::bytestring::uint64_to_byte_stream;
use p4rt::config::v1 as p4info;
use p4rt::config::v1::match_field::MatchType;
use p4rt::v1::field_match::{
    Exact, FieldMatchType, Lpm, Optional, Range, Ternary,
};
use p4rt::v1::table_action::Type as ActionType;
use p4rt::v1::update::Type as UpdateType;
use p4rt::v1::{
    action, p4_data, Action, CounterData, DirectCounterEntry,
    DirectMeterEntry, FieldMatch, Index, P4Data, RegisterEntry, TableAction,
    TableEntry,
};

use crate::helpers::{
    field_match_name, is_dont_care_match, match_kind_fits, needs_priority,
    p4rt_priority_to_sdk, range_default_high, range_default_low,
    sdk_priority_to_p4rt,
};
use crate::id_mapper::IdMapper;
use crate::pipeline::{name_of, PipelineInfo};
use crate::sde::{Sde, TableData, TableKey};
use crate::types::{ErrorKind, HalResult};
use crate::{hal_ensure, hal_err};

pub struct TableManager<S: SdeOps> {
    log: slog::Logger,
    sde: Arc<Sde<S>>,
    ids: Arc<IdMapper>,
    sync_timeout: Duration,
    pipeline: RwLock<Arc<PipelineInfo>>,
}

/// Reads an optional field, treating "not set" and "no such field" alike.
fn optional<T>(r: HalResult<T>) -> HalResult<Option<T>> {
    match r {
        Ok(v) => Ok(Some(v)),
        Err(e) if matches!(e.kind, ErrorKind::NotFound) => Ok(None),
        Err(e) if matches!(e.kind, ErrorKind::InvalidParam) => Ok(None),
        Err(e) => Err(e),
    }
}

fn to_count(name: &str, v: i64) -> HalResult<u64> {
    u64::try_from(v)
        .map_err(|_| hal_err!(InvalidParam, "Invalid {name} count {v}."))
}

pub(crate) fn counter_data(
    bytes: Option<u64>,
    packets: Option<u64>,
) -> CounterData {
    CounterData {
        byte_count: bytes.unwrap_or(0) as i64,
        packet_count: packets.unwrap_or(0) as i64,
    }
}

pub(crate) fn to_index(index: &Option<Index>) -> HalResult<Option<u32>> {
    match index {
        Some(i) => u32::try_from(i.index).map(Some).map_err(|_| {
            hal_err!(InvalidParam, "Invalid index {}.", i.index)
        }),
        None => Ok(None),
    }
}

pub(crate) fn ensure_modify(update: UpdateType, what: &str) -> HalResult<()> {
    hal_ensure!(
        update == UpdateType::Modify,
        InvalidParam,
        "Update type of {what} must be MODIFY."
    );
    Ok(())
}

/// Assembles a P4Runtime action from SDK data bound to `action_id`.
pub(crate) fn build_action<D: aal::SdeData>(
    pipeline: &PipelineInfo,
    action_id: u32,
    data: &TableData<D>,
) -> HalResult<Action> {
    let action = pipeline.action(action_id)?;
    let params = action
        .params
        .iter()
        .map(|p| {
            Ok(action::Param {
                param_id: p.id,
                value: data.get_param(p.id)?,
            })
        })
        .collect::<HalResult<Vec<_>>>()?;
    Ok(Action { action_id, params })
}

/// Binds `data` to `action` and fills in its parameters.
pub(crate) fn set_action<D: aal::SdeData>(
    action: &Action,
    data: &mut TableData<D>,
) -> HalResult<()> {
    data.reset(Some(action.action_id))?;
    for p in &action.params {
        data.set_param(p.param_id, &p.value)?;
    }
    Ok(())
}

impl<S: SdeOps> TableManager<S> {
    pub fn new(
        log: &slog::Logger,
        sde: Arc<Sde<S>>,
        ids: Arc<IdMapper>,
        sync_timeout: Duration,
    ) -> Self {
        TableManager {
            log: log.new(o!("unit" => "table_manager")),
            sde,
            ids,
            sync_timeout,
            pipeline: RwLock::new(Arc::new(PipelineInfo::default())),
        }
    }

    pub fn push_forwarding_pipeline_config(
        &self,
        pipeline: Arc<PipelineInfo>,
    ) -> HalResult<()> {
        info!(self.log, "pushed pipeline";
            "tables" => pipeline.p4info().tables.len());
        *self.pipeline.write() = pipeline;
        Ok(())
    }

    fn pipeline(&self) -> Arc<PipelineInfo> {
        self.pipeline.read().clone()
    }

    /// Fills in `key` from the match fields and priority of `entry`.
    pub fn build_table_key(
        &self,
        table: &p4info::Table,
        entry: &TableEntry,
        key: &mut TableKey<S::Key>,
    ) -> HalResult<()> {
        let table_name = name_of(&table.preamble);
        let mut seen = HashSet::new();
        for m in &entry.r#match {
            hal_ensure!(
                table.match_fields.iter().any(|f| f.id == m.field_id),
                InvalidParam,
                "Unknown match field {} in table {table_name}.",
                m.field_id
            );
            hal_ensure!(
                seen.insert(m.field_id),
                InvalidParam,
                "Duplicate match field {} in table {table_name}.",
                m.field_id
            );
        }

        for field in &table.match_fields {
            let bitwidth = field.bitwidth as usize;
            let requested = entry
                .r#match
                .iter()
                .find(|m| m.field_id == field.id)
                .map(|m| m.field_match_type.as_ref());
            let kind = match requested {
                Some(Some(kind)) => kind,
                Some(None) => {
                    return Err(hal_err!(
                        InvalidParam,
                        "Match field {} has no value.",
                        field.name
                    ))
                }
                None => {
                    if field.match_type() == Some(MatchType::Range) {
                        key.set_range(
                            field.id,
                            &range_default_low(bitwidth),
                            &range_default_high(bitwidth),
                        )?;
                    }
                    continue;
                }
            };

            hal_ensure!(
                field.match_type().is_some_and(|d| match_kind_fits(kind, d)),
                InvalidParam,
                "Found match field of type {} does not fit match field {} \
                 in table {table_name}.",
                field_match_name(kind),
                field.name
            );
            hal_ensure!(
                !is_dont_care_match(kind, bitwidth),
                InvalidParam,
                "Don't care match field found: {}.",
                field.name
            );

            match kind {
                FieldMatchType::Exact(e) => key.set_exact(field.id, &e.value)?,
                FieldMatchType::Ternary(t) => {
                    key.set_ternary(field.id, &t.value, &t.mask)?
                }
                FieldMatchType::Lpm(l) => {
                    let len = u16::try_from(l.prefix_len)
                        .ok()
                        .filter(|len| usize::from(*len) <= bitwidth)
                        .ok_or_else(|| {
                            hal_err!(
                                InvalidParam,
                                "Invalid prefix length {} for {}.",
                                l.prefix_len,
                                field.name
                            )
                        })?;
                    key.set_lpm(field.id, &l.value, len)?
                }
                FieldMatchType::Range(r) => {
                    key.set_range(field.id, &r.low, &r.high)?
                }
                FieldMatchType::Optional(o) => {
                    key.set_optional(field.id, &o.value)?
                }
                FieldMatchType::Other(_) => {
                    return Err(hal_err!(
                        Unimplemented,
                        "Unsupported match kind on {}.",
                        field.name
                    ))
                }
            }
        }

        if needs_priority(table) {
            hal_ensure!(
                entry.priority != 0,
                InvalidParam,
                "Non-zero priority is required for ternary, range or \
                 optional matches in table {table_name}."
            );
            key.set_priority(p4rt_priority_to_sdk(entry.priority)?)?;
        } else {
            hal_ensure!(
                entry.priority == 0,
                InvalidParam,
                "Priority must be zero for exact and LPM matches in table \
                 {table_name}."
            );
        }
        Ok(())
    }

    /// Fills in `data` from the action and counter data of `entry`.
    pub fn build_table_data(
        &self,
        entry: &TableEntry,
        data: &mut TableData<S::Data>,
    ) -> HalResult<()> {
        match entry.action.as_ref().and_then(|a| a.r#type.as_ref()) {
            Some(ActionType::Action(a)) => set_action(a, data)?,
            Some(ActionType::ActionProfileMemberId(id)) => {
                data.reset(None)?;
                data.set_action_member_id(*id)?;
            }
            Some(ActionType::ActionProfileGroupId(id)) => {
                data.reset(None)?;
                data.set_selector_group_id(*id)?;
            }
            Some(ActionType::ActionProfileActionSet(_)) => {
                return Err(hal_err!(
                    Unimplemented,
                    "Action profile action sets are not supported."
                ))
            }
            None => {
                return Err(hal_err!(
                    InvalidParam,
                    "Table entry for table {} has no action.",
                    entry.table_id
                ))
            }
        }

        if let Some(c) = &entry.counter_data {
            data.set_counter_data(
                to_count("byte", c.byte_count)?,
                to_count("packet", c.packet_count)?,
            )?;
        }
        Ok(())
    }

    /// Reconstructs a P4Runtime table entry from SDK objects.  Fields the
    /// SDK holds as don't-care values are left out.
    pub fn build_p4_table_entry(
        &self,
        pipeline: &PipelineInfo,
        table: &p4info::Table,
        key: Option<&TableKey<S::Key>>,
        data: &TableData<S::Data>,
        with_counters: bool,
    ) -> HalResult<TableEntry> {
        let mut entry = TableEntry {
            table_id: table.preamble.as_ref().map(|p| p.id).unwrap_or(0),
            is_default_action: key.is_none(),
            ..Default::default()
        };

        if let Some(key) = key {
            for field in &table.match_fields {
                let Some(value) = optional(key.get(field.id))? else {
                    continue;
                };
                let m = match value {
                    KeyFieldValue::Exact(value) => {
                        FieldMatchType::Exact(Exact { value })
                    }
                    KeyFieldValue::Ternary { value, mask } => {
                        FieldMatchType::Ternary(Ternary { value, mask })
                    }
                    KeyFieldValue::Lpm { value, prefix_len } => {
                        FieldMatchType::Lpm(Lpm {
                            value,
                            prefix_len: prefix_len.into(),
                        })
                    }
                    KeyFieldValue::Range { low, high } => {
                        FieldMatchType::Range(Range { low, high })
                    }
                    KeyFieldValue::Optional { value, is_valid } => {
                        if !is_valid {
                            continue;
                        }
                        FieldMatchType::Optional(Optional { value })
                    }
                };
                if is_dont_care_match(&m, field.bitwidth as usize) {
                    continue;
                }
                entry.r#match.push(FieldMatch {
                    field_id: field.id,
                    field_match_type: Some(m),
                });
            }
            if needs_priority(table) {
                entry.priority = sdk_priority_to_p4rt(key.get_priority()?)?;
            }
        }

        let action = match data.action_id() {
            Some(id) => {
                Some(ActionType::Action(build_action(pipeline, id, data)?))
            }
            None => match optional(data.get_action_member_id())? {
                Some(m) => Some(ActionType::ActionProfileMemberId(m)),
                None => optional(data.get_selector_group_id())?
                    .map(ActionType::ActionProfileGroupId),
            },
        };
        entry.action = action.map(|t| TableAction { r#type: Some(t) });

        if with_counters {
            let (bytes, packets) = data.get_counter_data()?;
            entry.counter_data = Some(counter_data(bytes, packets));
        }
        Ok(entry)
    }

    pub fn write_table_entry(
        &self,
        update: UpdateType,
        entry: &TableEntry,
    ) -> HalResult<()> {
        let pipeline = self.pipeline();
        let table = pipeline.table(entry.table_id)?;
        let table_id = self.ids.get_sdk_id(entry.table_id)?;

        if entry.is_default_action {
            ensure_modify(update, "the default table entry")?;
            hal_ensure!(
                entry.r#match.is_empty(),
                InvalidParam,
                "Default action must not contain match fields."
            );
            hal_ensure!(
                entry.priority == 0,
                InvalidParam,
                "Default action must not contain a priority."
            );
            return match entry.action {
                Some(_) => {
                    let mut data = self.sde.create_table_data(table_id, None)?;
                    self.build_table_data(entry, &mut data)?;
                    self.sde.set_default_table_entry(table_id, &data)
                }
                None => self.sde.reset_default_table_entry(table_id),
            };
        }

        hal_ensure!(
            !table.is_const_table,
            PermissionDenied,
            "Can't write to table {} because it has const entries.",
            name_of(&table.preamble)
        );

        let mut key = self.sde.create_table_key(table_id)?;
        self.build_table_key(table, entry, &mut key)?;
        debug!(self.log, "writing table entry";
            "table" => name_of(&table.preamble), "update" => ?update);
        match update {
            UpdateType::Insert | UpdateType::Modify => {
                let mut data = self.sde.create_table_data(table_id, None)?;
                self.build_table_data(entry, &mut data)?;
                match update {
                    UpdateType::Insert => {
                        self.sde.insert_table_entry(table_id, &key, &data)
                    }
                    _ => self.sde.modify_table_entry(table_id, &key, &data),
                }
            }
            UpdateType::Delete => self.sde.delete_table_entry(table_id, &key),
            UpdateType::Unspecified => Err(hal_err!(
                InvalidParam,
                "Unsupported update type {update:?}."
            )),
        }
    }

    fn ensure_wildcard(entry: &TableEntry) -> HalResult<()> {
        hal_ensure!(
            entry.r#match.is_empty()
                && entry.priority == 0
                && entry.action.is_none()
                && entry.controller_metadata == 0
                && entry.metadata.is_empty()
                && !entry.is_default_action,
            InvalidParam,
            "Wildcard reads of table {} must not filter on match fields, \
             priority, action, metadata or the default action.",
            entry.table_id
        );
        Ok(())
    }

    fn sync_counters(
        &self,
        pipeline: &PipelineInfo,
        table_id: u32,
    ) -> HalResult<()> {
        if pipeline.has_direct_counter(table_id) {
            let sdk_id = self.ids.get_sdk_id(table_id)?;
            self.sde.synchronize(
                sdk_id,
                TableOperation::CounterSync,
                self.sync_timeout,
            )?;
        }
        Ok(())
    }

    fn read_all_entries(
        &self,
        pipeline: &PipelineInfo,
        table_id: u32,
        with_counters: bool,
    ) -> HalResult<Vec<TableEntry>> {
        let table = pipeline.table(table_id)?;
        let sdk_id = self.ids.get_sdk_id(table_id)?;
        if with_counters {
            self.sync_counters(pipeline, table_id)?;
        }
        self.sde
            .get_all_entries(sdk_id)?
            .iter()
            .map(|(key, data)| {
                self.build_p4_table_entry(
                    pipeline,
                    table,
                    Some(key),
                    data,
                    with_counters,
                )
            })
            .collect()
    }

    /// Reads the entries `entry` selects: every entry of every table if it
    /// has no table id, every entry of one table if it has no match fields,
    /// the default entry, or a single keyed entry.
    pub fn read_table_entry(
        &self,
        entry: &TableEntry,
    ) -> HalResult<Vec<TableEntry>> {
        let pipeline = self.pipeline();
        let with_counters = entry.counter_data.is_some();

        if entry.table_id == 0 {
            Self::ensure_wildcard(entry)?;
            let mut entries = Vec::new();
            for id in pipeline.table_ids() {
                entries.extend(self.read_all_entries(
                    &pipeline,
                    id,
                    with_counters,
                )?);
            }
            return Ok(entries);
        }

        let table = pipeline.table(entry.table_id)?;
        let sdk_id = self.ids.get_sdk_id(entry.table_id)?;

        if entry.is_default_action {
            hal_ensure!(
                entry.r#match.is_empty(),
                InvalidParam,
                "Default entry reads must not contain match fields."
            );
            if with_counters {
                self.sync_counters(&pipeline, entry.table_id)?;
            }
            let data = self.sde.get_default_table_entry(sdk_id)?;
            let entry = self.build_p4_table_entry(
                &pipeline,
                table,
                None,
                &data,
                with_counters,
            )?;
            return Ok(vec![entry]);
        }

        if entry.r#match.is_empty() && entry.priority == 0 {
            Self::ensure_wildcard(entry)?;
            return self.read_all_entries(
                &pipeline,
                entry.table_id,
                with_counters,
            );
        }

        let mut key = self.sde.create_table_key(sdk_id)?;
        self.build_table_key(table, entry, &mut key)?;
        if with_counters {
            self.sync_counters(&pipeline, entry.table_id)?;
        }
        let data = self.sde.get_table_entry(sdk_id, &key)?;
        let entry = self.build_p4_table_entry(
            &pipeline,
            table,
            Some(&key),
            &data,
            with_counters,
        )?;
        Ok(vec![entry])
    }

    /// Overwrites the counters of an existing entry.  The entry is read and
    /// written back, so the update is not atomic.
    pub fn write_direct_counter_entry(
        &self,
        update: UpdateType,
        counter: &DirectCounterEntry,
    ) -> HalResult<()> {
        ensure_modify(update, "a DirectCounterEntry")?;
        let entry = counter.table_entry.as_ref().ok_or_else(|| {
            hal_err!(InvalidParam, "DirectCounterEntry has no table entry.")
        })?;
        hal_ensure!(
            entry.action.is_none(),
            InvalidParam,
            "Found action on DirectCounterEntry."
        );
        let c = counter.data.as_ref().ok_or_else(|| {
            hal_err!(InvalidParam, "DirectCounterEntry has no counter data.")
        })?;

        let pipeline = self.pipeline();
        let table = pipeline.table(entry.table_id)?;
        let sdk_id = self.ids.get_sdk_id(entry.table_id)?;
        let mut key = self.sde.create_table_key(sdk_id)?;
        self.build_table_key(table, entry, &mut key)?;
        let mut data = self.sde.get_table_entry(sdk_id, &key)?;
        data.set_counter_data(
            to_count("byte", c.byte_count)?,
            to_count("packet", c.packet_count)?,
        )?;
        self.sde.modify_table_entry(sdk_id, &key, &data)
    }

    pub fn read_direct_counter_entry(
        &self,
        counter: &DirectCounterEntry,
    ) -> HalResult<DirectCounterEntry> {
        let entry = counter.table_entry.as_ref().ok_or_else(|| {
            hal_err!(InvalidParam, "DirectCounterEntry has no table entry.")
        })?;
        let pipeline = self.pipeline();
        let table = pipeline.table(entry.table_id)?;
        let sdk_id = self.ids.get_sdk_id(entry.table_id)?;
        let mut key = self.sde.create_table_key(sdk_id)?;
        self.build_table_key(table, entry, &mut key)?;

        self.sde.synchronize(
            sdk_id,
            TableOperation::CounterSync,
            self.sync_timeout,
        )?;
        let data = self.sde.get_table_entry(sdk_id, &key)?;
        let (bytes, packets) = data.get_counter_data()?;
        Ok(DirectCounterEntry {
            table_entry: Some(entry.clone()),
            data: Some(counter_data(bytes, packets)),
        })
    }

    pub fn write_direct_meter_entry(
        &self,
        _update: UpdateType,
        _meter: &DirectMeterEntry,
    ) -> HalResult<()> {
        Err(hal_err!(Unimplemented, "Direct meters are not supported."))
    }

    pub fn read_direct_meter_entry(
        &self,
        _meter: &DirectMeterEntry,
    ) -> HalResult<DirectMeterEntry> {
        Err(hal_err!(Unimplemented, "Direct meters are not supported."))
    }

    pub fn write_register_entry(
        &self,
        update: UpdateType,
        register: &RegisterEntry,
    ) -> HalResult<()> {
        ensure_modify(update, "a RegisterEntry")?;
        self.pipeline().register(register.register_id)?;
        let sdk_id = self.ids.get_sdk_id(register.register_id)?;
        let index = to_index(&register.index)?;
        let value = match register.data.as_ref().and_then(|d| d.data.as_ref())
        {
            Some(p4_data::Data::Bitstring(b)) => b,
            _ => {
                return Err(hal_err!(
                    InvalidParam,
                    "Register data must be a bitstring."
                ))
            }
        };
        debug!(self.log, "writing register";
            "register" => register.register_id, "index" => ?index);
        self.sde.write_indirect_register(sdk_id, index, value)
    }

    pub fn read_register_entry(
        &self,
        register: &RegisterEntry,
    ) -> HalResult<Vec<RegisterEntry>> {
        hal_ensure!(
            register.register_id != 0,
            InvalidParam,
            "Reading registers without a register id is not supported."
        );
        self.pipeline().register(register.register_id)?;
        let sdk_id = self.ids.get_sdk_id(register.register_id)?;
        let index = to_index(&register.index)?;
        let values = self
            .sde
            .read_indirect_registers(sdk_id, index, self.sync_timeout)
            .inspect_err(|e| {
                warn!(self.log, "register read failed";
                    "register" => register.register_id, "error" => %e)
            })?;
        Ok(values
            .into_iter()
            .map(|(index, value)| RegisterEntry {
                register_id: register.register_id,
                index: Some(Index {
                    index: index.into(),
                }),
                data: Some(P4Data {
                    data: Some(p4_data::Data::Bitstring(
                        uint64_to_byte_stream(value),
                    )),
                }),
            })
            .collect())
    }
}
