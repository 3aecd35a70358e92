// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Indirect meters.  Byte meters take rates in bytes/s and bursts in bytes,
//! packet meters in packets/s and packets.

use std::sync::Arc;

use parking_lot::RwLock;
use slog::{debug, info, o};

use aal::SdeOps;
use p4rt::config::v1::meter_spec::Unit;
use p4rt::v1::update::Type as UpdateType;
use p4rt::v1::{Index, MeterConfig, MeterEntry};

use crate::id_mapper::IdMapper;
use crate::pipeline::PipelineInfo;
use crate::sde;
use crate::sde::Sde;
use crate::table_manager::{ensure_modify, to_index};
use crate::types::HalResult;
use crate::{hal_ensure, hal_err};

pub struct MeterManager<S: SdeOps> {
    log: slog::Logger,
    sde: Arc<Sde<S>>,
    ids: Arc<IdMapper>,
    pipeline: RwLock<Arc<PipelineInfo>>,
}

impl<S: SdeOps> MeterManager<S> {
    pub fn new(
        log: &slog::Logger,
        sde: Arc<Sde<S>>,
        ids: Arc<IdMapper>,
    ) -> Self {
        MeterManager {
            log: log.new(o!("unit" => "meter_manager")),
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
            "meters" => pipeline.p4info().meters.len());
        *self.pipeline.write() = pipeline;
        Ok(())
    }

    // Whether the meter counts packets rather than bytes
    fn in_pps(&self, meter_id: u32) -> HalResult<bool> {
        let pipeline = self.pipeline.read().clone();
        let meter = pipeline.meter(meter_id)?;
        let unit = meter
            .spec
            .as_ref()
            .and_then(|s| Unit::try_from(s.unit).ok())
            .unwrap_or(Unit::Unspecified);
        match unit {
            Unit::Bytes => Ok(false),
            Unit::Packets => Ok(true),
            Unit::Unspecified => Err(hal_err!(
                InvalidParam,
                "Unsupported meter spec on meter {meter_id}."
            )),
        }
    }

    /// Configures one cell of a meter, or every cell if no index is given.
    pub fn write_meter_entry(
        &self,
        update: UpdateType,
        entry: &MeterEntry,
    ) -> HalResult<()> {
        ensure_modify(update, "a MeterEntry")?;
        let in_pps = self.in_pps(entry.meter_id)?;
        let config = entry.config.as_ref().ok_or_else(|| {
            hal_err!(InvalidParam, "Meter entry has no config.")
        })?;
        let rate = |name: &str, v: i64| {
            u64::try_from(v).map_err(|_| {
                hal_err!(InvalidParam, "Invalid meter {name} {v}.")
            })
        };
        let config = sde::MeterConfig {
            in_pps,
            cir: rate("cir", config.cir)?,
            cburst: rate("cburst", config.cburst)?,
            pir: rate("pir", config.pir)?,
            pburst: rate("pburst", config.pburst)?,
        };
        let index = to_index(&entry.index)?;
        let sdk_id = self.ids.get_sdk_id(entry.meter_id)?;
        debug!(self.log, "writing meter";
            "meter" => entry.meter_id, "index" => ?index);
        self.sde.write_indirect_meter(sdk_id, index, &config)
    }

    pub fn read_meter_entry(
        &self,
        entry: &MeterEntry,
    ) -> HalResult<Vec<MeterEntry>> {
        hal_ensure!(
            entry.meter_id != 0,
            InvalidParam,
            "Querying a meter without meter id is not supported."
        );
        self.in_pps(entry.meter_id)?;
        let index = to_index(&entry.index)?;
        let sdk_id = self.ids.get_sdk_id(entry.meter_id)?;
        Ok(self
            .sde
            .read_indirect_meters(sdk_id, index)?
            .into_iter()
            .map(|(index, c)| MeterEntry {
                meter_id: entry.meter_id,
                index: Some(Index {
                    index: index.into(),
                }),
                config: Some(MeterConfig {
                    cir: c.cir as i64,
                    cburst: c.cburst as i64,
                    pir: c.pir as i64,
                    pburst: c.pburst as i64,
                }),
            })
            .collect())
    }
}
