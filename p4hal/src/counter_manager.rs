// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Indirect counters.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use slog::{debug, info, o};

use aal::SdeOps;
use p4rt::config::v1::counter_spec::Unit;
use p4rt::v1::update::Type as UpdateType;
use p4rt::v1::{CounterData, CounterEntry, Index};

use crate::id_mapper::IdMapper;
use crate::pipeline::PipelineInfo;
use crate::sde::Sde;
use crate::table_manager::{counter_data, ensure_modify};
use crate::types::HalResult;
use crate::{hal_ensure, hal_err};

pub struct CounterManager<S: SdeOps> {
    log: slog::Logger,
    sde: Arc<Sde<S>>,
    ids: Arc<IdMapper>,
    sync_timeout: Duration,
    pipeline: RwLock<Arc<PipelineInfo>>,
}

fn counter_unit(pipeline: &PipelineInfo, counter_id: u32) -> HalResult<Unit> {
    let counter = pipeline.counter(counter_id)?;
    let unit = counter
        .spec
        .as_ref()
        .and_then(|s| Unit::try_from(s.unit).ok())
        .unwrap_or(Unit::Unspecified);
    hal_ensure!(
        unit != Unit::Unspecified,
        InvalidParam,
        "Counter {counter_id} has no unit."
    );
    Ok(unit)
}

// The counts a counter of `unit` keeps
fn counts(
    unit: Unit,
    data: &CounterData,
) -> HalResult<(Option<u64>, Option<u64>)> {
    let count = |v: i64| {
        u64::try_from(v)
            .map_err(|_| hal_err!(InvalidParam, "Invalid counter value {v}."))
    };
    let bytes = count(data.byte_count)?;
    let packets = count(data.packet_count)?;
    Ok(match unit {
        Unit::Bytes => (Some(bytes), None),
        Unit::Packets => (None, Some(packets)),
        _ => (Some(bytes), Some(packets)),
    })
}

impl<S: SdeOps> CounterManager<S> {
    pub fn new(
        log: &slog::Logger,
        sde: Arc<Sde<S>>,
        ids: Arc<IdMapper>,
        sync_timeout: Duration,
    ) -> Self {
        CounterManager {
            log: log.new(o!("unit" => "counter_manager")),
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
            "counters" => pipeline.p4info().counters.len());
        *self.pipeline.write() = pipeline;
        Ok(())
    }

    /// Sets one cell of a counter.  Zeroing both counts resets the whole
    /// counter.
    pub fn write_counter_entry(
        &self,
        update: UpdateType,
        entry: &CounterEntry,
    ) -> HalResult<()> {
        ensure_modify(update, "a CounterEntry")?;
        hal_ensure!(
            entry.counter_id != 0,
            InvalidParam,
            "Modifying an indirect counter without counter id is not \
             supported."
        );
        let index = entry.index.as_ref().map(|i| i.index).ok_or_else(|| {
            hal_err!(InvalidParam, "Counter index is missing.")
        })?;
        let index = u32::try_from(index).map_err(|_| {
            hal_err!(
                InvalidParam,
                "Counter index must be greater than or equal to zero."
            )
        })?;
        let data = entry.data.as_ref().ok_or_else(|| {
            hal_err!(InvalidParam, "Counter data is missing.")
        })?;

        let unit = counter_unit(&self.pipeline.read(), entry.counter_id)?;
        let (bytes, packets) = counts(unit, data)?;
        let sdk_id = self.ids.get_sdk_id(entry.counter_id)?;
        debug!(self.log, "writing counter";
            "counter" => entry.counter_id, "index" => index);
        self.sde.write_indirect_counter(sdk_id, index, bytes, packets)
    }

    /// Reads one cell of a counter, or every cell if no index is given.
    pub fn read_counter_entry(
        &self,
        entry: &CounterEntry,
    ) -> HalResult<Vec<CounterEntry>> {
        hal_ensure!(
            entry.counter_id != 0,
            InvalidParam,
            "Querying an indirect counter without counter id is not \
             supported."
        );
        let index = match &entry.index {
            Some(i) => Some(u32::try_from(i.index).map_err(|_| {
                hal_err!(
                    InvalidParam,
                    "Counter index must be greater than or equal to zero."
                )
            })?),
            None => None,
        };

        let unit = counter_unit(&self.pipeline.read(), entry.counter_id)?;
        let sdk_id = self.ids.get_sdk_id(entry.counter_id)?;
        let values =
            self.sde
                .read_indirect_counter(sdk_id, index, self.sync_timeout)?;
        Ok(values
            .into_iter()
            .map(|v| {
                let (bytes, packets) = match unit {
                    Unit::Bytes => (v.bytes, None),
                    Unit::Packets => (None, v.packets),
                    _ => (v.bytes, v.packets),
                };
                CounterEntry {
                    counter_id: entry.counter_id,
                    index: Some(Index {
                        index: v.index.into(),
                    }),
                    data: Some(counter_data(bytes, packets)),
                }
            })
            .collect())
    }
}
