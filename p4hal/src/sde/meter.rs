// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use slog::debug;

use aal::{DataValue, SdeOps};

use super::{cell_range, Sde};
use crate::hal_err;
use crate::types::HalResult;

const METER_INDEX: &str = "$METER_INDEX";

const CIR_KBPS: &str = "$METER_SPEC_CIR_KBPS";
const PIR_KBPS: &str = "$METER_SPEC_PIR_KBPS";
const CBS_KBITS: &str = "$METER_SPEC_CBS_KBITS";
const PBS_KBITS: &str = "$METER_SPEC_PBS_KBITS";
const CIR_PPS: &str = "$METER_SPEC_CIR_PPS";
const PIR_PPS: &str = "$METER_SPEC_PIR_PPS";
const CBS_PKTS: &str = "$METER_SPEC_CBS_PKTS";
const PBS_PKTS: &str = "$METER_SPEC_PBS_PKTS";

// P4Runtime expresses byte rates in bytes/s, the SDK in kbit/s.
const BYTES_PER_KBIT: u64 = 125;

/// The rates and bursts of one meter cell.  Byte meters are in bytes and
/// bytes/s, packet meters in packets and packets/s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MeterConfig {
    pub in_pps: bool,
    pub cir: u64,
    pub cburst: u64,
    pub pir: u64,
    pub pburst: u64,
}

impl<S: SdeOps> Sde<S> {
    /// Configures one meter cell, or every cell if `index` is `None`.
    pub fn write_indirect_meter(
        &self,
        table_id: u32,
        index: Option<u32>,
        config: &MeterConfig,
    ) -> HalResult<()> {
        let mut data = self.create_table_data(table_id, None)?;
        if config.in_pps {
            data.set_named(CIR_PPS, DataValue::Uint(config.cir))?;
            data.set_named(CBS_PKTS, DataValue::Uint(config.cburst))?;
            data.set_named(PIR_PPS, DataValue::Uint(config.pir))?;
            data.set_named(PBS_PKTS, DataValue::Uint(config.pburst))?;
        } else {
            let kbits = |v: u64| DataValue::Uint(v / BYTES_PER_KBIT);
            data.set_named(CIR_KBPS, kbits(config.cir))?;
            data.set_named(CBS_KBITS, kbits(config.cburst))?;
            data.set_named(PIR_KBPS, kbits(config.pir))?;
            data.set_named(PBS_KBITS, kbits(config.pburst))?;
        }

        let indices = cell_range(&*self.table_info(table_id)?, index)?;
        debug!(self.log, "writing meter"; "table" => table_id,
            "cells" => indices.len());
        for i in indices {
            let mut key = self.create_table_key(table_id)?;
            key.set_index(METER_INDEX, i)?;
            self.modify_table_entry(table_id, &key, &data)?;
        }
        Ok(())
    }

    /// Reads one meter cell, or every cell if `index` is `None`.
    pub fn read_indirect_meters(
        &self,
        table_id: u32,
        index: Option<u32>,
    ) -> HalResult<Vec<(u32, MeterConfig)>> {
        let entries = match index {
            Some(i) => {
                let mut key = self.create_table_key(table_id)?;
                key.set_index(METER_INDEX, i)?;
                let data = self.get_table_entry(table_id, &key)?;
                vec![(key, data)]
            }
            None => self.get_all_entries(table_id)?,
        };

        let mut meters = Vec::with_capacity(entries.len());
        for (key, data) in entries {
            let mut config = MeterConfig::default();
            for field in data.info.data_fields(None)? {
                let v = data.get_named(&field.name)?.as_u64()?;
                match field.name.as_str() {
                    CIR_KBPS => config.cir = v * BYTES_PER_KBIT,
                    CBS_KBITS => config.cburst = v * BYTES_PER_KBIT,
                    PIR_KBPS => config.pir = v * BYTES_PER_KBIT,
                    PBS_KBITS => config.pburst = v * BYTES_PER_KBIT,
                    CIR_PPS => {
                        config.cir = v;
                        config.in_pps = true;
                    }
                    CBS_PKTS => config.cburst = v,
                    PIR_PPS => config.pir = v,
                    PBS_PKTS => config.pburst = v,
                    x => {
                        return Err(hal_err!(
                            InvalidParam,
                            "Unknown meter field {x} in table {table_id}."
                        ))
                    }
                }
            }
            meters.push((key.get_index(METER_INDEX)?, config));
        }
        Ok(meters)
    }
}

#[cfg(test)]
mod tests {
    use super::MeterConfig;
    use crate::fixtures;
    use crate::types::ErrorKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_byte_meter() -> anyhow::Result<()> {
        let (_log, sde) = fixtures::sde()?;
        let config = MeterConfig {
            in_pps: false,
            cir: 125_000,
            cburst: 12_500,
            pir: 250_000,
            pburst: 25_000,
        };
        sde.write_indirect_meter(fixtures::SDK_METER, Some(1), &config)?;
        let read = sde.read_indirect_meters(fixtures::SDK_METER, Some(1))?;
        assert_eq!(read, vec![(1, config)]);

        // Rates below a kbit/s are lost in the conversion.
        let config = MeterConfig {
            cir: 100,
            ..config
        };
        sde.write_indirect_meter(fixtures::SDK_METER, None, &config)?;
        let read = sde.read_indirect_meters(fixtures::SDK_METER, None)?;
        assert_eq!(read.len(), 4);
        assert!(read.iter().all(|(_, c)| c.cir == 0 && c.pir == 250_000));
        Ok(())
    }

    #[test]
    fn test_packet_meter() -> anyhow::Result<()> {
        let (_log, sde) = fixtures::sde()?;
        let config = MeterConfig {
            in_pps: true,
            cir: 10,
            cburst: 1,
            pir: 20,
            pburst: 2,
        };
        sde.write_indirect_meter(fixtures::SDK_PKT_METER, Some(0), &config)?;
        let read = sde.read_indirect_meters(fixtures::SDK_PKT_METER, Some(0))?;
        assert_eq!(read, vec![(0, config)]);
        // A packet meter has no byte-rate fields.
        let bytes = MeterConfig {
            in_pps: false,
            ..config
        };
        assert!(sde
            .write_indirect_meter(fixtures::SDK_PKT_METER, Some(0), &bytes)
            .is_err());
        Ok(())
    }

    #[test]
    fn test_meter_index_range() -> anyhow::Result<()> {
        let (_log, sde) = fixtures::sde()?;
        let config = MeterConfig {
            cir: 125,
            ..Default::default()
        };
        for index in [4, u32::MAX] {
            let err = sde
                .write_indirect_meter(fixtures::SDK_METER, Some(index), &config)
                .unwrap_err();
            assert_eq!(err.kind, ErrorKind::InvalidParam);
        }
        sde.write_indirect_meter(fixtures::SDK_METER, Some(3), &config)?;
        Ok(())
    }
}
