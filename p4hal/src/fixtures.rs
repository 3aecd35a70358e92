// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! A small TNA pipeline shared by the unit tests.  Apart from the ACL, every
//! SDK table id differs from its P4Info id, so tests notice a missed mapping.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;

use asic::tofino_common::BfRt;
use asic::tofino_stub::{AsicConfig, StubHandle};
use common::logging::{self, LogFormat};
use p4rt::config::v1 as p4info;
use p4rt::config::v1::match_field::{Match, MatchType};

use crate::config::{ChassisConfig, SingletonPort};
use crate::id_mapper::IdMapper;
use crate::pipeline::PipelineInfo;
use crate::sde::Sde;
use crate::translator::Translator;

pub const P4_ACL: u32 = 0x0200_0001;
pub const P4_EXACT: u32 = 0x0200_0002;
pub const P4_FWD: u32 = 0x0200_0003;
pub const P4_ECMP: u32 = 0x0200_0004;
pub const P4_AP: u32 = 0x1100_0001;
pub const P4_COUNTER: u32 = 0x1200_0001;
pub const P4_DIRECT_COUNTER: u32 = 0x1300_0001;
pub const P4_METER: u32 = 0x1500_0001;
pub const P4_PKT_METER: u32 = 0x1500_0002;
pub const P4_REG: u32 = 0x1600_0001;
pub const P4_PACKET_IN: u32 = 0x0700_0001;
pub const P4_PACKET_OUT: u32 = 0x0700_0002;

pub const SDK_EXACT: u32 = 0x0300_0002;
pub const SDK_FWD: u32 = 0x0300_0003;
pub const SDK_ECMP: u32 = 0x0300_0004;
pub const SDK_AP: u32 = 0x0300_0011;
pub const SDK_SEL: u32 = 0x0300_0012;
pub const SDK_COUNTER: u32 = 0x0300_0021;
pub const SDK_METER: u32 = 0x0300_0031;
pub const SDK_PKT_METER: u32 = 0x0300_0032;
pub const SDK_REG: u32 = 0x0300_0041;
pub const SDK_PRE_MGID: u32 = 0x0400_0001;
pub const SDK_PRE_NODE: u32 = 0x0400_0002;
pub const SDK_MIRROR: u32 = 0x0400_0003;

pub const ACT_FWD: u32 = 0x0100_0001;
pub const ACT_DROP: u32 = 0x0100_0002;

/// Singleton port 5 sits at slot 1, port 66: SDK port 260.
pub const PORT: u32 = 5;
pub const SDK_PORT: u32 = 260;

pub const CONTEXT: &str = r#"{
    "tables": [
        {
            "name": "Ingress.ecmp",
            "action_profile": "Ingress.ap",
            "selection_table_refs": [ { "name": "Ingress.sel" } ]
        },
        { "name": "Ingress.dmac" }
    ]
}"#;

fn bytes(id: u32, name: &str, width: u32) -> serde_json::Value {
    json!({
        "id": id, "name": name,
        "type": { "type": "bytes", "width": width },
    })
}

fn typed(id: u32, name: &str, t: &str) -> serde_json::Value {
    json!({ "id": id, "name": name, "type": { "type": t } })
}

fn key(mut field: serde_json::Value, match_type: &str) -> serde_json::Value {
    field["match_type"] = json!(match_type);
    field
}

fn singletons(fields: Vec<serde_json::Value>) -> serde_json::Value {
    fields
        .into_iter()
        .map(|f| json!({ "singleton": f }))
        .collect()
}

fn actions() -> serde_json::Value {
    json!([
        { "id": ACT_FWD, "name": "Ingress.fwd",
          "data": [ bytes(1, "port", 9) ] },
        { "id": ACT_DROP, "name": "Ingress.drop", "data": [] }
    ])
}

fn index_table(
    id: u32,
    name: &str,
    table_type: &str,
    size: u32,
    index: &str,
    data: Vec<serde_json::Value>,
    ops: &[&str],
) -> serde_json::Value {
    json!({
        "id": id, "name": name, "table_type": table_type, "size": size,
        "key": [ key(typed(1, index, "uint32"), "Exact") ],
        "data": singletons(data),
        "supported_operations": ops,
    })
}

fn counter_fields() -> Vec<serde_json::Value> {
    vec![
        typed(65553, "$COUNTER_SPEC_BYTES", "uint64"),
        typed(65554, "$COUNTER_SPEC_PKTS", "uint64"),
    ]
}

fn meter_fields(names: [&str; 4]) -> Vec<serde_json::Value> {
    names
        .iter()
        .zip(1u32..)
        .map(|(n, i)| typed(i, n, "uint64"))
        .collect()
}

/// The `bfrt.json` of the test pipeline
pub fn bfrt() -> String {
    let tables = json!([
        {
            "id": P4_ACL, "name": "pipe.Ingress.acl",
            "table_type": "MatchAction_Direct", "size": 16,
            "key": [
                key(bytes(1, "hdr.ipv4.dst_addr", 32), "Ternary"),
                key(bytes(2, "hdr.tcp.dport", 16), "Range"),
                key(bytes(3, "hdr.vlan.vid", 12), "Optional"),
                key(bytes(4, "meta.ingress_port", 9), "Ternary"),
                key(typed(65537, "$MATCH_PRIORITY", "uint32"), "Exact"),
            ],
            "action_specs": actions(),
            "data": singletons(counter_fields()),
            "supported_operations": [ "SyncCounters" ],
        },
        {
            "id": SDK_EXACT, "name": "pipe.Ingress.dmac",
            "table_type": "MatchAction_Direct", "size": 4,
            "key": [ key(bytes(1, "hdr.ethernet.dst_addr", 48), "Exact") ],
            "action_specs": actions(),
        },
        {
            "id": SDK_FWD, "name": "pipe.Ingress.ipv4_lpm",
            "table_type": "MatchAction_Direct", "size": 16,
            "key": [
                key(bytes(1, "hdr.ipv4.dst_addr", 32), "LPM"),
                key(bytes(2, "meta.port", 9), "Exact"),
            ],
            "action_specs": actions(),
        },
        {
            "id": SDK_ECMP, "name": "pipe.Ingress.ecmp",
            "table_type": "MatchAction_Indirect_Selector", "size": 16,
            "key": [ key(bytes(1, "hdr.ipv4.dst_addr", 32), "Exact") ],
            "data": singletons(vec![
                typed(65555, "$ACTION_MEMBER_ID", "uint32"),
                typed(65556, "$SELECTOR_GROUP_ID", "uint32"),
            ]),
        },
        {
            "id": SDK_AP, "name": "pipe.Ingress.ap",
            "table_type": "Action", "size": 16,
            "key": [ key(typed(1, "$ACTION_MEMBER_ID", "uint32"), "Exact") ],
            "action_specs": actions(),
        },
        index_table(
            SDK_SEL, "pipe.Ingress.sel", "Selector", 16,
            "$SELECTOR_GROUP_ID",
            vec![
                typed(2, "$ACTION_MEMBER_ID", "uint32"),
                typed(3, "$ACTION_MEMBER_STATUS", "bool"),
                typed(4, "$MAX_GROUP_SIZE", "uint16"),
            ],
            &[],
        ),
        index_table(
            SDK_COUNTER, "pipe.Ingress.pkt_counter", "Counter", 8,
            "$COUNTER_INDEX", counter_fields(), &["SyncCounters"],
        ),
        index_table(
            SDK_METER, "pipe.Ingress.meter", "Meter", 4, "$METER_INDEX",
            meter_fields([
                "$METER_SPEC_CIR_KBPS",
                "$METER_SPEC_PIR_KBPS",
                "$METER_SPEC_CBS_KBITS",
                "$METER_SPEC_PBS_KBITS",
            ]),
            &[],
        ),
        index_table(
            SDK_PKT_METER, "pipe.Ingress.pkt_meter", "Meter", 4,
            "$METER_INDEX",
            meter_fields([
                "$METER_SPEC_CIR_PPS",
                "$METER_SPEC_PIR_PPS",
                "$METER_SPEC_CBS_PKTS",
                "$METER_SPEC_PBS_PKTS",
            ]),
            &[],
        ),
        index_table(
            SDK_REG, "pipe.Ingress.reg", "Register", 4, "$REGISTER_INDEX",
            vec![bytes(2, "Ingress.reg.f1", 32)],
            &["SyncRegisters"],
        ),
        {
            "id": SDK_PRE_MGID, "name": "$pre.mgid",
            "table_type": "PreMgid", "size": 64,
            "key": [ key(typed(1, "$MGID", "uint16"), "Exact") ],
            "data": singletons(vec![
                typed(2, "$MULTICAST_NODE_ID", "uint32"),
                typed(3, "$MULTICAST_NODE_L1_XID_VALID", "bool"),
                typed(4, "$MULTICAST_NODE_L1_XID", "uint16"),
            ]),
        },
        {
            "id": SDK_PRE_NODE, "name": "$pre.node",
            "table_type": "PreNode", "size": 16,
            "key": [
                key(typed(1, "$MULTICAST_NODE_ID", "uint32"), "Exact"),
            ],
            "data": singletons(vec![
                typed(2, "$MULTICAST_RID", "uint16"),
                typed(3, "$MULTICAST_LAG_ID", "uint8"),
                typed(4, "$DEV_PORT", "uint32"),
            ]),
        },
        {
            "id": SDK_MIRROR, "name": "$mirror.cfg",
            "table_type": "MirrorCfg", "size": 1024,
            "key": [ key(typed(1, "$sid", "uint16"), "Exact") ],
            "action_specs": [
                { "id": 1, "name": "$normal", "data": [
                    typed(2, "$direction", "string"),
                    typed(3, "$session_enable", "bool"),
                    typed(4, "$ucast_egress_port", "uint32"),
                    typed(5, "$ucast_egress_port_valid", "bool"),
                    typed(6, "$ingress_cos", "uint8"),
                    typed(7, "$max_pkt_len", "uint16"),
                ] }
            ],
        },
    ]);
    json!({ "schema_version": "1.0.0", "tables": tables }).to_string()
}

pub fn log() -> anyhow::Result<slog::Logger> {
    logging::init("test", &None, LogFormat::Human)
}

pub fn stub_with(
    config: AsicConfig,
) -> anyhow::Result<(slog::Logger, Arc<StubHandle>)> {
    let log = log()?;
    let rt = BfRt::from_json(&bfrt())?;
    let stub = StubHandle::from_bfrt(&log, &rt, &config)?;
    Ok((log, Arc::new(stub)))
}

pub fn stub() -> anyhow::Result<(slog::Logger, Arc<StubHandle>)> {
    stub_with(AsicConfig::default())
}

/// An SDK programming layer over a fresh stub, ready for use.
pub fn sde_with(
    config: AsicConfig,
) -> anyhow::Result<(slog::Logger, Arc<Sde<StubHandle>>)> {
    let (log, stub) = stub_with(config)?;
    let sde = Sde::new(&log, stub, 0);
    sde.push_forwarding_pipeline_config()?;
    Ok((log, Arc::new(sde)))
}

pub fn sde() -> anyhow::Result<(slog::Logger, Arc<Sde<StubHandle>>)> {
    sde_with(AsicConfig::default())
}

fn preamble(id: u32, name: &str) -> Option<p4info::Preamble> {
    Some(p4info::Preamble {
        id,
        name: name.to_string(),
        alias: name.rsplit('.').next().unwrap_or(name).to_string(),
        annotations: vec![],
    })
}

fn port_type() -> Option<p4info::P4NamedType> {
    Some(p4info::P4NamedType {
        name: "PortId_t".to_string(),
    })
}

fn field(
    id: u32,
    name: &str,
    bitwidth: i32,
    kind: MatchType,
) -> p4info::MatchField {
    p4info::MatchField {
        id,
        name: name.to_string(),
        bitwidth,
        r#match: Some(Match::MatchType(kind as i32)),
        type_name: None,
    }
}

fn port_field(id: u32, name: &str, kind: MatchType) -> p4info::MatchField {
    p4info::MatchField {
        type_name: port_type(),
        ..field(id, name, 32, kind)
    }
}

fn action_refs() -> Vec<p4info::ActionRef> {
    [ACT_FWD, ACT_DROP]
        .into_iter()
        .map(|id| p4info::ActionRef {
            id,
            annotations: vec![],
        })
        .collect()
}

fn table(
    id: u32,
    name: &str,
    match_fields: Vec<p4info::MatchField>,
) -> p4info::Table {
    p4info::Table {
        preamble: preamble(id, name),
        match_fields,
        action_refs: action_refs(),
        size: 16,
        ..Default::default()
    }
}

fn metadata(
    id: u32,
    header: &str,
    field: &str,
) -> p4info::ControllerPacketMetadata {
    p4info::ControllerPacketMetadata {
        preamble: preamble(id, header),
        metadata: vec![p4info::controller_packet_metadata::Metadata {
            id: 1,
            name: field.to_string(),
            bitwidth: 32,
            type_name: port_type(),
        }],
    }
}

/// The P4Info of the test pipeline.  Port-typed fields are 32 bits wide
/// on the SDN side and 9 bits wide in the SDK.
pub fn p4info() -> p4info::P4Info {
    use p4info::counter_spec::Unit as CounterUnit;
    use p4info::meter_spec::Unit as MeterUnit;
    use p4info::p4_new_type_spec::Representation;
    use p4info::p4_new_type_translation::SdnType;

    let acl = p4info::Table {
        direct_resource_ids: vec![P4_DIRECT_COUNTER],
        ..table(
            P4_ACL,
            "Ingress.acl",
            vec![
                field(1, "hdr.ipv4.dst_addr", 32, MatchType::Ternary),
                field(2, "hdr.tcp.dport", 16, MatchType::Range),
                field(3, "hdr.vlan.vid", 12, MatchType::Optional),
                port_field(4, "meta.ingress_port", MatchType::Ternary),
            ],
        )
    };
    let dmac = p4info::Table {
        size: 4,
        ..table(
            P4_EXACT,
            "pipe.Ingress.dmac",
            vec![field(1, "hdr.ethernet.dst_addr", 48, MatchType::Exact)],
        )
    };
    let fwd = table(
        P4_FWD,
        "Ingress.ipv4_lpm",
        vec![
            field(1, "hdr.ipv4.dst_addr", 32, MatchType::Lpm),
            port_field(2, "meta.port", MatchType::Exact),
        ],
    );
    let ecmp = p4info::Table {
        implementation_id: P4_AP,
        ..table(
            P4_ECMP,
            "Ingress.ecmp",
            vec![field(1, "hdr.ipv4.dst_addr", 32, MatchType::Exact)],
        )
    };

    let fwd_action = p4info::Action {
        preamble: preamble(ACT_FWD, "Ingress.fwd"),
        params: vec![p4info::action::Param {
            id: 1,
            name: "port".to_string(),
            bitwidth: 32,
            type_name: port_type(),
        }],
    };
    let drop_action = p4info::Action {
        preamble: preamble(ACT_DROP, "Ingress.drop"),
        params: vec![],
    };

    let counter_spec = |unit: CounterUnit| {
        Some(p4info::CounterSpec { unit: unit as i32 })
    };
    let meter = |id, name: &str, unit: MeterUnit| p4info::Meter {
        preamble: preamble(id, name),
        spec: Some(p4info::MeterSpec { unit: unit as i32 }),
        size: 4,
        index_type_name: None,
    };

    let mut new_types = HashMap::new();
    new_types.insert(
        "PortId_t".to_string(),
        p4info::P4NewTypeSpec {
            representation: Some(Representation::TranslatedType(
                p4info::P4NewTypeTranslation {
                    uri: "tna/PortId_t".to_string(),
                    sdn_type: Some(SdnType::SdnBitwidth(32)),
                },
            )),
        },
    );

    p4info::P4Info {
        tables: vec![acl, dmac, fwd, ecmp],
        actions: vec![fwd_action, drop_action],
        action_profiles: vec![p4info::ActionProfile {
            preamble: preamble(P4_AP, "Ingress.ap"),
            table_ids: vec![P4_ECMP],
            with_selector: true,
            size: 16,
            max_group_size: 8,
        }],
        counters: vec![p4info::Counter {
            preamble: preamble(P4_COUNTER, "Ingress.pkt_counter"),
            spec: counter_spec(CounterUnit::Both),
            size: 8,
            index_type_name: None,
        }],
        direct_counters: vec![p4info::DirectCounter {
            preamble: preamble(P4_DIRECT_COUNTER, "Ingress.acl_counter"),
            spec: counter_spec(CounterUnit::Both),
            direct_table_id: P4_ACL,
        }],
        meters: vec![
            meter(P4_METER, "Ingress.meter", MeterUnit::Bytes),
            meter(P4_PKT_METER, "Ingress.pkt_meter", MeterUnit::Packets),
        ],
        controller_packet_metadata: vec![
            metadata(P4_PACKET_IN, "packet_in", "ingress_port"),
            metadata(P4_PACKET_OUT, "packet_out", "egress_port"),
        ],
        registers: vec![p4info::Register {
            preamble: preamble(P4_REG, "Ingress.reg"),
            size: 4,
            index_type_name: None,
        }],
        type_info: Some(p4info::P4TypeInfo { new_types }),
        ..Default::default()
    }
}

/// A chassis with a single front-panel port.
pub fn chassis() -> ChassisConfig {
    ChassisConfig {
        singleton_ports: vec![SingletonPort {
            id: PORT,
            slot: 1,
            port: 66,
            channel: None,
        }],
    }
}

/// The id mappings and low-level P4Info index the managers run against.
pub fn pipeline(
    log: &slog::Logger,
    sde: &Arc<Sde<StubHandle>>,
) -> anyhow::Result<(Arc<IdMapper>, Arc<PipelineInfo>)> {
    let translator = Translator::new(log, sde.clone(), false);
    translator.push_forwarding_pipeline_config(&p4info())?;
    let low = translator.low_level_p4info();

    let ids = IdMapper::new(log);
    ids.push_forwarding_pipeline_config(&low, CONTEXT, &sde.tables())?;
    Ok((Arc::new(ids), Arc::new(PipelineInfo::new(low))))
}
