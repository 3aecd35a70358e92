// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Match-field and priority rules shared by the table and resource managers.

use common::bytestring::{
    all_ones_byte_string, num_bits_to_num_bytes, to_padded_byte_string,
};
use p4rt::config::v1 as p4info;
use p4rt::config::v1::match_field::MatchType;
use p4rt::v1::field_match::FieldMatchType;

use crate::hal_err;
use crate::types::HalResult;

/// The largest priority either side can express.
pub const MAX_PRIORITY: u32 = 0xff_ffff;

/// The low bound of a range field the request left out.
pub fn range_default_low(bitwidth: usize) -> Vec<u8> {
    vec![0u8; num_bits_to_num_bytes(bitwidth)]
}

/// The high bound of a range field the request left out.
pub fn range_default_high(bitwidth: usize) -> Vec<u8> {
    all_ones_byte_string(bitwidth)
}

fn all_zero(bytes: &[u8]) -> bool {
    bytes.iter().all(|b| *b == 0)
}

/// A don't-care match covers every value of the field.  P4Runtime requires
/// that such fields be omitted from the entry rather than sent explicitly.
pub fn is_dont_care_match(m: &FieldMatchType, bitwidth: usize) -> bool {
    match m {
        FieldMatchType::Exact(_) | FieldMatchType::Optional(_) => false,
        FieldMatchType::Lpm(lpm) => lpm.prefix_len == 0,
        FieldMatchType::Ternary(t) => all_zero(&t.mask),
        FieldMatchType::Range(r) => {
            !r.low.is_empty()
                && !r.high.is_empty()
                && all_zero(&r.low)
                && to_padded_byte_string(
                    &r.high,
                    num_bits_to_num_bytes(bitwidth),
                ) == range_default_high(bitwidth)
        }
        FieldMatchType::Other(_) => false,
    }
}

/// The name of a request field's match kind, as used in error messages.
pub fn field_match_name(m: &FieldMatchType) -> &'static str {
    match m {
        FieldMatchType::Exact(_) => "EXACT",
        FieldMatchType::Ternary(_) => "TERNARY",
        FieldMatchType::Lpm(_) => "LPM",
        FieldMatchType::Range(_) => "RANGE",
        FieldMatchType::Optional(_) => "OPTIONAL",
        FieldMatchType::Other(_) => "OTHER",
    }
}

/// Whether a request field's match kind is the one P4Info declares.
pub fn match_kind_fits(m: &FieldMatchType, declared: MatchType) -> bool {
    matches!(
        (m, declared),
        (FieldMatchType::Exact(_), MatchType::Exact)
            | (FieldMatchType::Ternary(_), MatchType::Ternary)
            | (FieldMatchType::Lpm(_), MatchType::Lpm)
            | (FieldMatchType::Range(_), MatchType::Range)
            | (FieldMatchType::Optional(_), MatchType::Optional)
    )
}

/// Tables with any ternary, range or optional field order their entries by
/// priority.
pub fn needs_priority(table: &p4info::Table) -> bool {
    table.match_fields.iter().any(|f| {
        matches!(
            f.match_type(),
            Some(MatchType::Ternary | MatchType::Range | MatchType::Optional)
        )
    })
}

/// P4Runtime treats larger priorities as more important, while the SDK
/// favors smaller ones.
pub fn p4rt_priority_to_sdk(priority: i32) -> HalResult<u32> {
    match u32::try_from(priority) {
        Ok(p) if p <= MAX_PRIORITY => Ok(MAX_PRIORITY - p),
        _ => Err(hal_err!(InvalidParam, "Invalid priority {priority}.")),
    }
}

pub fn sdk_priority_to_p4rt(priority: u64) -> HalResult<i32> {
    match u32::try_from(priority) {
        Ok(p) if p <= MAX_PRIORITY => Ok((MAX_PRIORITY - p) as i32),
        _ => Err(hal_err!(InvalidParam, "Invalid SDK priority {priority}.")),
    }
}
