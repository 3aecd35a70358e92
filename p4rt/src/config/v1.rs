// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Messages from `p4/config/v1/p4info.proto` and `p4types.proto`.

use std::collections::HashMap;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct P4Info {
    #[prost(message, repeated, tag = "2")]
    pub tables: Vec<Table>,
    #[prost(message, repeated, tag = "3")]
    pub actions: Vec<Action>,
    #[prost(message, repeated, tag = "4")]
    pub action_profiles: Vec<ActionProfile>,
    #[prost(message, repeated, tag = "5")]
    pub counters: Vec<Counter>,
    #[prost(message, repeated, tag = "6")]
    pub direct_counters: Vec<DirectCounter>,
    #[prost(message, repeated, tag = "7")]
    pub meters: Vec<Meter>,
    #[prost(message, repeated, tag = "8")]
    pub direct_meters: Vec<DirectMeter>,
    #[prost(message, repeated, tag = "9")]
    pub controller_packet_metadata: Vec<ControllerPacketMetadata>,
    #[prost(message, repeated, tag = "11")]
    pub registers: Vec<Register>,
    #[prost(message, repeated, tag = "100")]
    pub externs: Vec<Extern>,
    #[prost(message, optional, tag = "200")]
    pub type_info: Option<P4TypeInfo>,
}

/// Identity shared by every P4 object.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Preamble {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub alias: String,
    #[prost(string, repeated, tag = "4")]
    pub annotations: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct P4NamedType {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MatchField {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(int32, tag = "4")]
    pub bitwidth: i32,
    #[prost(oneof = "match_field::Match", tags = "5, 7")]
    pub r#match: Option<match_field::Match>,
    #[prost(message, optional, tag = "8")]
    pub type_name: Option<P4NamedType>,
}

pub mod match_field {
    #[derive(
        Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration,
    )]
    #[repr(i32)]
    pub enum MatchType {
        Unspecified = 0,
        Exact = 2,
        Lpm = 3,
        Ternary = 4,
        Range = 5,
        Optional = 6,
    }

    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Match {
        #[prost(enumeration = "MatchType", tag = "5")]
        MatchType(i32),
        #[prost(string, tag = "7")]
        OtherMatchType(String),
    }
}

impl MatchField {
    /// The standard match kind of this field, if it has one.
    pub fn match_type(&self) -> Option<match_field::MatchType> {
        match &self.r#match {
            Some(match_field::Match::MatchType(t)) => {
                match_field::MatchType::try_from(*t).ok()
            }
            _ => None,
        }
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ActionRef {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(string, repeated, tag = "3")]
    pub annotations: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Table {
    #[prost(message, optional, tag = "1")]
    pub preamble: Option<Preamble>,
    #[prost(message, repeated, tag = "2")]
    pub match_fields: Vec<MatchField>,
    #[prost(message, repeated, tag = "3")]
    pub action_refs: Vec<ActionRef>,
    #[prost(uint32, tag = "4")]
    pub const_default_action_id: u32,
    #[prost(uint32, tag = "6")]
    pub implementation_id: u32,
    #[prost(uint32, repeated, tag = "7")]
    pub direct_resource_ids: Vec<u32>,
    #[prost(int64, tag = "8")]
    pub size: i64,
    #[prost(bool, tag = "10")]
    pub is_const_table: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Action {
    #[prost(message, optional, tag = "1")]
    pub preamble: Option<Preamble>,
    #[prost(message, repeated, tag = "2")]
    pub params: Vec<action::Param>,
}

pub mod action {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Param {
        #[prost(uint32, tag = "1")]
        pub id: u32,
        #[prost(string, tag = "2")]
        pub name: String,
        #[prost(int32, tag = "4")]
        pub bitwidth: i32,
        #[prost(message, optional, tag = "6")]
        pub type_name: Option<super::P4NamedType>,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ActionProfile {
    #[prost(message, optional, tag = "1")]
    pub preamble: Option<Preamble>,
    #[prost(uint32, repeated, tag = "2")]
    pub table_ids: Vec<u32>,
    #[prost(bool, tag = "3")]
    pub with_selector: bool,
    #[prost(int64, tag = "4")]
    pub size: i64,
    #[prost(int32, tag = "5")]
    pub max_group_size: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CounterSpec {
    #[prost(enumeration = "counter_spec::Unit", tag = "1")]
    pub unit: i32,
}

pub mod counter_spec {
    #[derive(
        Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration,
    )]
    #[repr(i32)]
    pub enum Unit {
        Unspecified = 0,
        Bytes = 1,
        Packets = 2,
        Both = 3,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Counter {
    #[prost(message, optional, tag = "1")]
    pub preamble: Option<Preamble>,
    #[prost(message, optional, tag = "2")]
    pub spec: Option<CounterSpec>,
    #[prost(int64, tag = "3")]
    pub size: i64,
    #[prost(message, optional, tag = "4")]
    pub index_type_name: Option<P4NamedType>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DirectCounter {
    #[prost(message, optional, tag = "1")]
    pub preamble: Option<Preamble>,
    #[prost(message, optional, tag = "2")]
    pub spec: Option<CounterSpec>,
    #[prost(uint32, tag = "3")]
    pub direct_table_id: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MeterSpec {
    #[prost(enumeration = "meter_spec::Unit", tag = "1")]
    pub unit: i32,
}

pub mod meter_spec {
    #[derive(
        Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration,
    )]
    #[repr(i32)]
    pub enum Unit {
        Unspecified = 0,
        Bytes = 1,
        Packets = 2,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Meter {
    #[prost(message, optional, tag = "1")]
    pub preamble: Option<Preamble>,
    #[prost(message, optional, tag = "2")]
    pub spec: Option<MeterSpec>,
    #[prost(int64, tag = "3")]
    pub size: i64,
    #[prost(message, optional, tag = "4")]
    pub index_type_name: Option<P4NamedType>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DirectMeter {
    #[prost(message, optional, tag = "1")]
    pub preamble: Option<Preamble>,
    #[prost(message, optional, tag = "2")]
    pub spec: Option<MeterSpec>,
    #[prost(uint32, tag = "3")]
    pub direct_table_id: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ControllerPacketMetadata {
    #[prost(message, optional, tag = "1")]
    pub preamble: Option<Preamble>,
    #[prost(message, repeated, tag = "2")]
    pub metadata: Vec<controller_packet_metadata::Metadata>,
}

pub mod controller_packet_metadata {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Metadata {
        #[prost(uint32, tag = "1")]
        pub id: u32,
        #[prost(string, tag = "2")]
        pub name: String,
        #[prost(int32, tag = "4")]
        pub bitwidth: i32,
        #[prost(message, optional, tag = "5")]
        pub type_name: Option<super::P4NamedType>,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Register {
    #[prost(message, optional, tag = "1")]
    pub preamble: Option<Preamble>,
    #[prost(int32, tag = "3")]
    pub size: i32,
    #[prost(message, optional, tag = "4")]
    pub index_type_name: Option<P4NamedType>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Extern {
    #[prost(uint32, tag = "1")]
    pub extern_type_id: u32,
    #[prost(string, tag = "2")]
    pub extern_type_name: String,
    #[prost(message, repeated, tag = "3")]
    pub instances: Vec<ExternInstance>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExternInstance {
    #[prost(message, optional, tag = "1")]
    pub preamble: Option<Preamble>,
    #[prost(message, optional, tag = "2")]
    pub info: Option<::prost_types::Any>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct P4TypeInfo {
    #[prost(map = "string, message", tag = "7")]
    pub new_types: HashMap<String, P4NewTypeSpec>,
}

/// The placeholder carried by `original_type`.  Only its presence matters
/// here; the bitstring details are never inspected.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct P4DataTypeSpec {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct P4NewTypeTranslation {
    #[prost(string, tag = "1")]
    pub uri: String,
    #[prost(oneof = "p4_new_type_translation::SdnType", tags = "2, 3")]
    pub sdn_type: Option<p4_new_type_translation::SdnType>,
}

pub mod p4_new_type_translation {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct SdnString {}

    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum SdnType {
        #[prost(int32, tag = "2")]
        SdnBitwidth(i32),
        #[prost(message, tag = "3")]
        SdnString(SdnString),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct P4NewTypeSpec {
    #[prost(oneof = "p4_new_type_spec::Representation", tags = "1, 2")]
    pub representation: Option<p4_new_type_spec::Representation>,
}

pub mod p4_new_type_spec {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Representation {
        #[prost(message, tag = "1")]
        OriginalType(super::P4DataTypeSpec),
        #[prost(message, tag = "2")]
        TranslatedType(super::P4NewTypeTranslation),
    }
}

impl P4NewTypeSpec {
    /// Returns the translation URI and SDN bitwidth, if this type is
    /// translated to a fixed-width SDN representation.
    pub fn sdn_translation(&self) -> Option<(&str, i32)> {
        match &self.representation {
            Some(p4_new_type_spec::Representation::TranslatedType(t)) => {
                match t.sdn_type {
                    Some(p4_new_type_translation::SdnType::SdnBitwidth(w)) => {
                        Some((t.uri.as_str(), w))
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_match_type() {
        let field = MatchField {
            id: 1,
            name: "hdr.ipv4.dst_addr".into(),
            bitwidth: 32,
            r#match: Some(match_field::Match::MatchType(
                match_field::MatchType::Lpm as i32,
            )),
            type_name: None,
        };
        assert_eq!(field.match_type(), Some(match_field::MatchType::Lpm));

        let other = MatchField {
            r#match: Some(match_field::Match::OtherMatchType("fancy".into())),
            ..field
        };
        assert_eq!(other.match_type(), None);
    }

    #[test]
    fn test_type_info_wire() -> anyhow::Result<()> {
        let mut info = P4TypeInfo::default();
        info.new_types.insert(
            "port_id_t".into(),
            P4NewTypeSpec {
                representation: Some(
                    p4_new_type_spec::Representation::TranslatedType(
                        P4NewTypeTranslation {
                            uri: "tna/PortId_t".into(),
                            sdn_type: Some(
                                p4_new_type_translation::SdnType::SdnBitwidth(
                                    32,
                                ),
                            ),
                        },
                    ),
                ),
            },
        );
        let decoded = P4TypeInfo::decode(info.encode_to_vec().as_slice())?;
        assert_eq!(
            decoded.new_types["port_id_t"].sdn_translation(),
            Some(("tna/PortId_t", 32))
        );
        Ok(())
    }
}
