// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Rewrites P4Runtime entities between the values a controller uses and the
//! values the SDK uses.
//!
//! The only translated type is the TNA port id.  A controller names ports by
//! their singleton port id from the chassis config, as a 32-bit value, while
//! the SDK names them by their 9-bit device port.  Which fields carry port
//! ids is learned from the `p4runtime_translation` annotations of the pushed
//! P4Info.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use slog::{debug, info, o};

use aal::SdeOps;
use common::bytestring::{
    all_ones_byte_string, byte_stream_to_uint, num_bits_to_num_bytes,
    to_canonical_byte_string, to_padded_byte_string,
};
use p4rt::config::v1 as p4info;
use p4rt::config::v1::p4_new_type_spec::Representation;
use p4rt::config::v1::p4_new_type_translation::SdnType;
use p4rt::config::v1::P4Info;
use p4rt::v1::entity::Entity as EntityKind;
use p4rt::v1::field_match::FieldMatchType;
use p4rt::v1::packet_replication_engine_entry::Type as PreType;
use p4rt::v1::table_action::Type as ActionType;
use p4rt::v1::{
    stream_message_request, stream_message_response, Action, Entity, Index,
    PacketIn, PacketMetadata, PacketOut, ReadRequest, ReadResponse, Replica,
    StreamMessageRequest, StreamMessageResponse, TableEntry, Update,
    WriteRequest,
};

use crate::config::ChassisConfig;
use crate::sde::Sde;
use crate::types::HalResult;
use crate::{hal_ensure, hal_err};

pub const URI_TNA_PORT_ID: &str = "tna/PortId_t";

/// The controller's id for the PCIe CPU port
pub const SDN_CPU_PORT: u32 = 0xffff_fffd;
/// The controller's id for the recirculation port of pipe 0
pub const SDN_RECIRCULATION_PORT: u32 = 0xffff_ff00;
/// The device port for recirculation on pipe 0
pub const SDK_RECIRCULATION_PORT: u32 = 0x44;
const NUM_PIPES: u32 = 4;
const SDK_PORT_BITWIDTH: usize = 9;

// The SDK's width for each translated type it understands
fn sdk_bitwidth(uri: &str) -> Option<i32> {
    match uri {
        URI_TNA_PORT_ID => Some(SDK_PORT_BITWIDTH as i32),
        _ => None,
    }
}

/// How one field is translated: its type's URI and its width on either side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    pub uri: String,
    pub sdn_bitwidth: i32,
    pub sdk_bitwidth: i32,
}

impl Translation {
    // (from, to) widths of a translation in the given direction
    fn widths(&self, to_sdk: bool) -> (usize, usize) {
        let sdn = self.sdn_bitwidth as usize;
        let sdk = self.sdk_bitwidth as usize;
        match to_sdk {
            true => (sdn, sdk),
            false => (sdk, sdn),
        }
    }
}

/// The two directions of the port mapping.  `sdk_to_sdn` is the exact
/// inverse of `sdn_to_sdk`, less the unspecified port.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PortMaps {
    pub sdn_to_sdk: HashMap<u32, u32>,
    pub sdk_to_sdn: HashMap<u32, u32>,
}

impl PortMaps {
    fn insert(&mut self, sdn: u32, sdk: u32) -> HalResult<()> {
        if let Some(old) = self.sdn_to_sdk.insert(sdn, sdk) {
            hal_ensure!(
                old == sdk,
                InvalidParam,
                "Singleton port {sdn} maps to both SDK ports {old} and {sdk}."
            );
        }
        if let Some(old) = self.sdk_to_sdn.insert(sdk, sdn) {
            hal_ensure!(
                old == sdn,
                InvalidParam,
                "SDK port {sdk} is claimed by singleton ports {old} and {sdn}."
            );
        }
        Ok(())
    }
}

/// Everything learned from one pipeline push.
#[derive(Debug, Default)]
struct Pipeline {
    required: bool,
    // Keyed by (table id, match field id)
    match_fields: HashMap<(u32, u32), Translation>,
    // Keyed by (action id, param id)
    params: HashMap<(u32, u32), Translation>,
    packet_in: HashMap<u32, Translation>,
    packet_out: HashMap<u32, Translation>,
    counter_index: HashMap<u32, String>,
    low_level: Arc<P4Info>,
}

/// A consistent view of the port maps and the pipeline's type metadata.
/// Every translation runs against a single snapshot.
#[derive(Debug, Clone)]
pub struct TranslationState {
    ports: Arc<PortMaps>,
    pipeline: Arc<Pipeline>,
    legacy_bytestring_responses: bool,
}

fn named_type(name: &Option<p4info::P4NamedType>) -> Option<&str> {
    name.as_ref().map(|n| n.name.as_str())
}

// The URIs of all translated types, keyed by type name
fn translated_types(
    info: &Option<p4info::P4TypeInfo>,
) -> HalResult<HashMap<String, (String, i32)>> {
    let mut types = HashMap::new();
    let Some(info) = info else {
        return Ok(types);
    };
    for (name, spec) in &info.new_types {
        let Some(Representation::TranslatedType(t)) = &spec.representation
        else {
            continue;
        };
        match t.sdn_type {
            Some(SdnType::SdnBitwidth(w)) => {
                types.insert(name.clone(), (t.uri.clone(), w));
            }
            Some(SdnType::SdnString(_)) => {
                return Err(hal_err!(
                    Unimplemented,
                    "Translating {name} to an SDN string is not supported."
                ))
            }
            None => {
                return Err(hal_err!(
                    InvalidParam,
                    "Translated type {name} has no SDN representation."
                ))
            }
        }
    }
    Ok(types)
}

struct PipelineBuilder {
    types: HashMap<String, (String, i32)>,
}

impl PipelineBuilder {
    // The translation for a field of type `type_name`, if it has one
    fn lookup(
        &self,
        type_name: Option<&str>,
    ) -> HalResult<Option<Translation>> {
        let Some((uri, sdn_bitwidth)) =
            type_name.and_then(|n| self.types.get(n))
        else {
            return Ok(None);
        };
        let sdk_bitwidth = sdk_bitwidth(uri).ok_or_else(|| {
            hal_err!(InvalidParam, "Unknown translated type URI {uri}.")
        })?;
        Ok(Some(Translation {
            uri: uri.clone(),
            sdn_bitwidth: *sdn_bitwidth,
            sdk_bitwidth,
        }))
    }

    fn index_uri(
        &self,
        name: &Option<p4info::P4NamedType>,
    ) -> HalResult<Option<String>> {
        Ok(self.lookup(named_type(name))?.map(|t| t.uri))
    }

    fn build(&self, p4info: &P4Info) -> HalResult<Pipeline> {
        let mut pipeline = Pipeline::default();
        let mut low = p4info.clone();

        for table in &mut low.tables {
            let id = table.preamble.as_ref().map(|p| p.id).unwrap_or(0);
            for field in &mut table.match_fields {
                let t = self.lookup(named_type(&field.type_name))?;
                if let Some(t) = t {
                    field.bitwidth = t.sdk_bitwidth;
                    field.type_name = None;
                    pipeline.match_fields.insert((id, field.id), t);
                }
            }
        }

        for action in &mut low.actions {
            let id = action.preamble.as_ref().map(|p| p.id).unwrap_or(0);
            for param in &mut action.params {
                let t = self.lookup(named_type(&param.type_name))?;
                if let Some(t) = t {
                    param.bitwidth = t.sdk_bitwidth;
                    param.type_name = None;
                    pipeline.params.insert((id, param.id), t);
                }
            }
        }

        for header in &mut low.controller_packet_metadata {
            let name = header
                .preamble
                .as_ref()
                .map(|p| p.name.clone())
                .unwrap_or_default();
            let cache = match name.as_str() {
                "packet_in" => &mut pipeline.packet_in,
                "packet_out" => &mut pipeline.packet_out,
                x => {
                    return Err(hal_err!(
                        Unimplemented,
                        "Unsupported controller header {x}."
                    ))
                }
            };
            for md in &mut header.metadata {
                if let Some(t) = self.lookup(named_type(&md.type_name))? {
                    md.bitwidth = t.sdk_bitwidth;
                    md.type_name = None;
                    cache.insert(md.id, t);
                }
            }
        }

        for counter in &mut low.counters {
            if let Some(uri) = self.index_uri(&counter.index_type_name)? {
                let id = counter.preamble.as_ref().map(|p| p.id).unwrap_or(0);
                pipeline.counter_index.insert(id, uri);
            }
            counter.index_type_name = None;
        }
        // Meter and register entries are passed through untouched, so their
        // index types only need to be valid.
        for meter in &mut low.meters {
            self.index_uri(&meter.index_type_name)?;
            meter.index_type_name = None;
        }
        for register in &mut low.registers {
            self.index_uri(&register.index_type_name)?;
            register.index_type_name = None;
        }
        low.type_info = None;

        pipeline.required = !self.types.is_empty();
        pipeline.low_level = match pipeline.required {
            true => Arc::new(low),
            false => Arc::new(p4info.clone()),
        };
        Ok(pipeline)
    }
}

impl TranslationState {
    pub fn translation_required(&self) -> bool {
        self.pipeline.required
    }

    pub fn port_maps(&self) -> &PortMaps {
        &self.ports
    }

    /// Translates a TNA port id.  SDN values are singleton port ids of
    /// `sdn_bitwidth` bits; SDK values are always two bytes wide.
    pub fn translate_tna_port_id(
        &self,
        value: &[u8],
        to_sdk: bool,
        sdn_bitwidth: i32,
    ) -> HalResult<Vec<u8>> {
        if to_sdk {
            let port = byte_stream_to_uint::<u32>(value);
            let sdk = self.ports.sdn_to_sdk.get(&port).ok_or_else(|| {
                hal_err!(
                    InvalidParam,
                    "Could not find SDK port for singleton port {port}."
                )
            })?;
            let n = num_bits_to_num_bytes(SDK_PORT_BITWIDTH);
            Ok(to_padded_byte_string(&sdk.to_be_bytes(), n))
        } else {
            hal_ensure!(
                value.len() == 2,
                InvalidParam,
                "SDK port value {value:?} is not 2 bytes long."
            );
            let port = byte_stream_to_uint::<u32>(value);
            let sdn = self.ports.sdk_to_sdn.get(&port).ok_or_else(|| {
                hal_err!(
                    InvalidParam,
                    "Could not find singleton port for SDK port {port}."
                )
            })?;
            let n = num_bits_to_num_bytes(sdn_bitwidth as usize);
            let padded = to_padded_byte_string(&sdn.to_be_bytes(), n);
            Ok(match self.legacy_bytestring_responses {
                true => padded,
                false => to_canonical_byte_string(&padded),
            })
        }
    }

    pub fn translate_value(
        &self,
        value: &[u8],
        uri: &str,
        to_sdk: bool,
        sdn_bitwidth: i32,
    ) -> HalResult<Vec<u8>> {
        match uri {
            URI_TNA_PORT_ID => {
                self.translate_tna_port_id(value, to_sdk, sdn_bitwidth)
            }
            x => Err(hal_err!(Unimplemented, "Unknown URI: {x}.")),
        }
    }

    fn translate_port_number(
        &self,
        port: u32,
        to_sdk: bool,
    ) -> HalResult<u32> {
        let (map, what) = match to_sdk {
            true => (&self.ports.sdn_to_sdk, "singleton"),
            false => (&self.ports.sdk_to_sdn, "SDK"),
        };
        map.get(&port).copied().ok_or_else(|| {
            hal_err!(InvalidParam, "No mapping for {what} port {port}.")
        })
    }

    /// Translates a table entry's port-typed match fields and its action
    /// parameters.
    pub fn translate_table_entry(
        &self,
        entry: &mut TableEntry,
        to_sdk: bool,
    ) -> HalResult<()> {
        let table_id = entry.table_id;
        for m in &mut entry.r#match {
            let key = (table_id, m.field_id);
            let Some(t) = self.pipeline.match_fields.get(&key) else {
                continue;
            };
            let (from, to) = t.widths(to_sdk);
            let value = |v: &[u8]| {
                self.translate_value(v, &t.uri, to_sdk, t.sdn_bitwidth)
            };
            match &mut m.field_match_type {
                Some(FieldMatchType::Exact(e)) => e.value = value(&e.value)?,
                Some(FieldMatchType::Ternary(tm)) => {
                    let mask = to_padded_byte_string(
                        &tm.mask,
                        num_bits_to_num_bytes(from),
                    );
                    hal_ensure!(
                        mask == all_ones_byte_string(from),
                        InvalidParam,
                        "Translated field {} of table {table_id} must have \
                         an all-ones ternary mask.",
                        m.field_id
                    );
                    tm.value = value(&tm.value)?;
                    tm.mask = all_ones_byte_string(to);
                }
                Some(FieldMatchType::Lpm(lpm)) => {
                    hal_ensure!(
                        lpm.prefix_len as usize == from,
                        InvalidParam,
                        "Translated field {} of table {table_id} must have \
                         a full-length prefix.",
                        m.field_id
                    );
                    lpm.value = value(&lpm.value)?;
                    lpm.prefix_len = to as i32;
                }
                Some(FieldMatchType::Range(r)) => {
                    hal_ensure!(
                        r.low == r.high,
                        InvalidParam,
                        "Translated field {} of table {table_id} must match \
                         a single value.",
                        m.field_id
                    );
                    r.low = value(&r.low)?;
                    r.high = r.low.clone();
                }
                Some(FieldMatchType::Optional(o)) => {
                    o.value = value(&o.value)?
                }
                _ => {
                    return Err(hal_err!(
                        Unimplemented,
                        "Unsupported match kind on translated field {} of \
                         table {table_id}.",
                        m.field_id
                    ))
                }
            }
        }

        match entry.action.as_mut().and_then(|a| a.r#type.as_mut()) {
            Some(ActionType::Action(action)) => {
                self.translate_action(action, to_sdk)?
            }
            Some(ActionType::ActionProfileActionSet(set)) => {
                for a in &mut set.action_profile_actions {
                    if let Some(action) = a.action.as_mut() {
                        self.translate_action(action, to_sdk)?;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Translates the parameters of `action` that carry a translated type.
    /// Other parameters are left untouched.
    pub fn translate_action(
        &self,
        action: &mut Action,
        to_sdk: bool,
    ) -> HalResult<()> {
        for param in &mut action.params {
            let key = (action.action_id, param.param_id);
            if let Some(t) = self.pipeline.params.get(&key) {
                param.value = self.translate_value(
                    &param.value,
                    &t.uri,
                    to_sdk,
                    t.sdn_bitwidth,
                )?;
            }
        }
        Ok(())
    }

    pub fn translate_index(
        &self,
        index: &mut Index,
        uri: &str,
        to_sdk: bool,
    ) -> HalResult<()> {
        hal_ensure!(
            uri == URI_TNA_PORT_ID,
            Unimplemented,
            "Unsupported index type {uri}."
        );
        let port = u32::try_from(index.index).map_err(|_| {
            hal_err!(InvalidParam, "Invalid port index {}.", index.index)
        })?;
        index.index = self.translate_port_number(port, to_sdk)?.into();
        Ok(())
    }

    pub fn translate_replica(
        &self,
        replica: &mut Replica,
        to_sdk: bool,
    ) -> HalResult<()> {
        replica.egress_port =
            self.translate_port_number(replica.egress_port, to_sdk)?;
        Ok(())
    }

    fn translate_metadata(
        &self,
        metadata: &mut [PacketMetadata],
        cache: &HashMap<u32, Translation>,
        to_sdk: bool,
    ) -> HalResult<()> {
        for md in metadata {
            if let Some(t) = cache.get(&md.metadata_id) {
                md.value = self.translate_value(
                    &md.value,
                    &t.uri,
                    to_sdk,
                    t.sdn_bitwidth,
                )?;
            }
        }
        Ok(())
    }

    /// Packet-in metadata comes from the SDK.
    pub fn translate_packet_in(&self, packet: &mut PacketIn) -> HalResult<()> {
        let cache = &self.pipeline.packet_in;
        self.translate_metadata(&mut packet.metadata, cache, false)
    }

    /// Packet-out metadata goes to the SDK.
    pub fn translate_packet_out(
        &self,
        packet: &mut PacketOut,
    ) -> HalResult<()> {
        let cache = &self.pipeline.packet_out;
        self.translate_metadata(&mut packet.metadata, cache, true)
    }

    /// Translates one entity in place.  Meter, direct meter, register and
    /// extern entries carry no translated values.
    pub fn translate_entity(
        &self,
        entity: &mut Entity,
        to_sdk: bool,
    ) -> HalResult<()> {
        match entity.entity.as_mut() {
            Some(EntityKind::TableEntry(e)) => {
                self.translate_table_entry(e, to_sdk)
            }
            Some(EntityKind::ActionProfileMember(m)) => match &mut m.action {
                Some(a) => self.translate_action(a, to_sdk),
                None => Ok(()),
            },
            Some(EntityKind::CounterEntry(c)) => {
                let uri = self.pipeline.counter_index.get(&c.counter_id);
                match (uri, &mut c.index) {
                    (Some(uri), Some(index)) => {
                        self.translate_index(index, uri, to_sdk)
                    }
                    _ => Ok(()),
                }
            }
            Some(EntityKind::DirectCounterEntry(c)) => {
                match &mut c.table_entry {
                    Some(e) => self.translate_table_entry(e, to_sdk),
                    None => Ok(()),
                }
            }
            Some(EntityKind::PacketReplicationEngineEntry(pre)) => {
                let replicas = match pre.r#type.as_mut() {
                    Some(PreType::MulticastGroupEntry(g)) => &mut g.replicas,
                    Some(PreType::CloneSessionEntry(s)) => &mut s.replicas,
                    None => return Ok(()),
                };
                replicas
                    .iter_mut()
                    .try_for_each(|r| self.translate_replica(r, to_sdk))
            }
            Some(EntityKind::ExternEntry(_))
            | Some(EntityKind::ActionProfileGroup(_))
            | Some(EntityKind::MeterEntry(_))
            | Some(EntityKind::DirectMeterEntry(_))
            | Some(EntityKind::RegisterEntry(_))
            | None => Ok(()),
        }
    }
}

pub struct Translator<S: SdeOps> {
    log: slog::Logger,
    sde: Arc<Sde<S>>,
    state: RwLock<Arc<TranslationState>>,
}

impl<S: SdeOps> Translator<S> {
    pub fn new(
        log: &slog::Logger,
        sde: Arc<Sde<S>>,
        legacy_bytestring_responses: bool,
    ) -> Self {
        let state = TranslationState {
            ports: Arc::new(PortMaps::default()),
            pipeline: Arc::new(Pipeline::default()),
            legacy_bytestring_responses,
        };
        Translator {
            log: log.new(o!("unit" => "translator")),
            sde,
            state: RwLock::new(Arc::new(state)),
        }
    }

    /// The current translation state.  It stays consistent even if a new
    /// config is pushed while it is held.
    pub fn state(&self) -> Arc<TranslationState> {
        self.state.read().clone()
    }

    pub fn translation_required(&self) -> bool {
        self.state().translation_required()
    }

    /// The P4Info as the SDK sees it: translated fields at their SDK width
    /// and all translation annotations removed.
    pub fn low_level_p4info(&self) -> Arc<P4Info> {
        self.state().pipeline.low_level.clone()
    }

    /// Rebuilds the port maps from the chassis config.  The CPU, unspecified
    /// and recirculation ports are always mapped.
    pub fn push_chassis_config(&self, config: &ChassisConfig) -> HalResult<()> {
        let mut ports = PortMaps::default();
        ports.sdn_to_sdk.insert(0, 0);
        ports.insert(SDN_CPU_PORT, self.sde.get_pcie_cpu_port()?)?;
        for pipe in 0..NUM_PIPES {
            ports.insert(
                SDN_RECIRCULATION_PORT + pipe,
                SDK_RECIRCULATION_PORT | (pipe << 7),
            )?;
        }
        for port in &config.singleton_ports {
            let sdk = self.sde.get_port_id_from_port_key(&port.port_key())?;
            debug!(self.log, "mapped singleton port";
                "sdn" => port.id, "sdk" => sdk);
            ports.insert(port.id, sdk)?;
        }
        info!(self.log, "pushed chassis config";
            "ports" => config.singleton_ports.len());

        let mut state = self.state.write();
        let mut next = TranslationState::clone(&state);
        next.ports = Arc::new(ports);
        *state = Arc::new(next);
        Ok(())
    }

    /// Learns which fields carry translated types and derives the
    /// low-level P4Info.  Nothing changes unless the whole P4Info is valid.
    pub fn push_forwarding_pipeline_config(
        &self,
        p4info: &P4Info,
    ) -> HalResult<()> {
        let builder = PipelineBuilder {
            types: translated_types(&p4info.type_info)?,
        };
        let pipeline = builder.build(p4info)?;
        info!(self.log, "pushed pipeline";
            "translation_required" => pipeline.required,
            "match_fields" => pipeline.match_fields.len(),
            "params" => pipeline.params.len());

        let mut state = self.state.write();
        let mut next = TranslationState::clone(&state);
        next.pipeline = Arc::new(pipeline);
        *state = Arc::new(next);
        Ok(())
    }

    pub fn translate_entity(
        &self,
        entity: &Entity,
        to_sdk: bool,
    ) -> HalResult<Entity> {
        let state = self.state();
        let mut entity = entity.clone();
        if state.translation_required() {
            state.translate_entity(&mut entity, to_sdk)?;
        }
        Ok(entity)
    }

    /// Translates a single update of a write request to the SDK.
    pub fn translate_update(&self, update: &Update) -> HalResult<Update> {
        let entity = match &update.entity {
            Some(e) => Some(self.translate_entity(e, true)?),
            None => None,
        };
        Ok(Update {
            r#type: update.r#type,
            entity,
        })
    }

    pub fn translate_write_request(
        &self,
        req: &WriteRequest,
    ) -> HalResult<WriteRequest> {
        let updates = req
            .updates
            .iter()
            .map(|u| self.translate_update(u))
            .collect::<HalResult<Vec<_>>>()?;
        Ok(WriteRequest {
            updates,
            ..req.clone()
        })
    }

    pub fn translate_read_request(
        &self,
        req: &ReadRequest,
    ) -> HalResult<ReadRequest> {
        let entities = req
            .entities
            .iter()
            .map(|e| self.translate_entity(e, true))
            .collect::<HalResult<Vec<_>>>()?;
        Ok(ReadRequest {
            entities,
            ..req.clone()
        })
    }

    pub fn translate_read_response(
        &self,
        resp: &ReadResponse,
    ) -> HalResult<ReadResponse> {
        let entities = resp
            .entities
            .iter()
            .map(|e| self.translate_entity(e, false))
            .collect::<HalResult<Vec<_>>>()?;
        Ok(ReadResponse { entities })
    }

    /// Translates the metadata of an outbound packet.
    pub fn translate_stream_message_request(
        &self,
        req: &StreamMessageRequest,
    ) -> HalResult<StreamMessageRequest> {
        let state = self.state();
        let mut req = req.clone();
        if let Some(stream_message_request::Update::Packet(p)) = &mut req.update
        {
            if state.translation_required() {
                state.translate_packet_out(p)?;
            }
        }
        Ok(req)
    }

    /// Translates the metadata of a packet punted to the controller.
    pub fn translate_stream_message_response(
        &self,
        resp: &StreamMessageResponse,
    ) -> HalResult<StreamMessageResponse> {
        let state = self.state();
        let mut resp = resp.clone();
        if let Some(stream_message_response::Update::Packet(p)) =
            &mut resp.update
        {
            if state.translation_required() {
                state.translate_packet_in(p)?;
            }
        }
        Ok(resp)
    }
}

#[cfg(test)]
mod tests {
    use p4rt::config::v1::P4NamedType;
    use p4rt::v1::entity::Entity as EntityKind;
    use p4rt::v1::field_match::{Exact, FieldMatchType, Lpm, Ternary};
    use p4rt::v1::packet_replication_engine_entry::Type as PreType;
    use p4rt::v1::{
        action, stream_message_request, stream_message_response,
        table_action, Action, CounterEntry, Entity, FieldMatch, Index,
        MulticastGroupEntry, PacketIn, PacketMetadata, PacketOut,
        PacketReplicationEngineEntry, Replica, StreamMessageRequest,
        StreamMessageResponse, TableAction, TableEntry,
    };

    use super::*;
    use crate::config::SingletonPort;
    use crate::fixtures;
    use crate::types::ErrorKind;
    use asic::tofino_stub::StubHandle;
    use pretty_assertions::assert_eq;

    fn translator(legacy: bool) -> anyhow::Result<Translator<StubHandle>> {
        let (log, sde) = fixtures::sde()?;
        let t = Translator::new(&log, sde, legacy);
        t.push_chassis_config(&fixtures::chassis())?;
        t.push_forwarding_pipeline_config(&fixtures::p4info())?;
        Ok(t)
    }

    fn exact(field_id: u32, value: &[u8]) -> FieldMatch {
        FieldMatch {
            field_id,
            field_match_type: Some(FieldMatchType::Exact(Exact {
                value: value.to_vec(),
            })),
        }
    }

    fn fwd_action(port: &[u8]) -> Action {
        Action {
            action_id: fixtures::ACT_FWD,
            params: vec![action::Param {
                param_id: 1,
                value: port.to_vec(),
            }],
        }
    }

    fn table_entry(table_id: u32, m: Vec<FieldMatch>) -> Entity {
        Entity {
            entity: Some(EntityKind::TableEntry(TableEntry {
                table_id,
                r#match: m,
                ..Default::default()
            })),
        }
    }

    fn first_match(entity: &Entity) -> Option<FieldMatchType> {
        match &entity.entity {
            Some(EntityKind::TableEntry(e)) => {
                e.r#match.first().and_then(|m| m.field_match_type.clone())
            }
            _ => None,
        }
    }

    #[test]
    fn test_port_maps() -> anyhow::Result<()> {
        let t = translator(false)?;
        let state = t.state();
        let ports = state.port_maps();
        assert_eq!(ports.sdn_to_sdk.get(&fixtures::PORT), Some(&260));
        assert_eq!(ports.sdn_to_sdk.get(&0), Some(&0));
        assert_eq!(
            ports.sdn_to_sdk.get(&SDN_CPU_PORT),
            Some(&asic::tofino_stub::CPU_PORT)
        );
        assert_eq!(ports.sdn_to_sdk.get(&0xffff_ff01), Some(&0xc4));
        assert_eq!(ports.sdk_to_sdn.get(&0), None);

        // Every mapping except the unspecified port has its inverse.
        for (sdn, sdk) in ports.sdn_to_sdk.iter().filter(|(s, _)| **s != 0) {
            assert_eq!(ports.sdk_to_sdn.get(sdk), Some(sdn));
        }
        assert_eq!(ports.sdk_to_sdn.len(), ports.sdn_to_sdk.len() - 1);
        Ok(())
    }

    #[test]
    fn test_conflicting_ports() -> anyhow::Result<()> {
        let t = translator(false)?;
        let mut chassis = fixtures::chassis();
        chassis.singleton_ports.push(SingletonPort {
            id: 6,
            slot: 1,
            port: 66,
            channel: None,
        });
        let err = t.push_chassis_config(&chassis).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidParam);

        // The old maps survive a failed push.
        let state = t.state();
        assert_eq!(state.port_maps().sdn_to_sdk.get(&6), None);
        assert_eq!(state.port_maps().sdn_to_sdk.get(&5), Some(&260));
        Ok(())
    }

    #[test]
    fn test_exact_port() -> anyhow::Result<()> {
        let t = translator(false)?;
        let entity =
            table_entry(fixtures::P4_FWD, vec![exact(2, &[0, 0, 0, 5])]);
        let sdk = t.translate_entity(&entity, true)?;
        assert_eq!(
            first_match(&sdk),
            Some(FieldMatchType::Exact(Exact {
                value: vec![0x01, 0x04]
            }))
        );

        let sdn = t.translate_entity(&sdk, false)?;
        assert_eq!(
            first_match(&sdn),
            Some(FieldMatchType::Exact(Exact { value: vec![0x05] }))
        );

        let legacy = translator(true)?;
        let sdn = legacy.translate_entity(&sdk, false)?;
        assert_eq!(sdn, entity);
        Ok(())
    }

    #[test]
    fn test_unknown_port() -> anyhow::Result<()> {
        let t = translator(false)?;
        let entity = table_entry(fixtures::P4_FWD, vec![exact(2, &[7])]);
        let err = t.translate_entity(&entity, true).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidParam);

        // SDK values must be exactly two bytes wide.
        let entity = table_entry(fixtures::P4_FWD, vec![exact(2, &[4])]);
        let err = t.translate_entity(&entity, false).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidParam);
        Ok(())
    }

    #[test]
    fn test_ternary_mask() -> anyhow::Result<()> {
        let t = translator(false)?;
        let ternary = |mask: &[u8]| FieldMatch {
            field_id: 4,
            field_match_type: Some(FieldMatchType::Ternary(Ternary {
                value: vec![0, 0, 0, 5],
                mask: mask.to_vec(),
            })),
        };

        let entity = table_entry(fixtures::P4_ACL, vec![ternary(&[0xff, 0])]);
        let err = t.translate_entity(&entity, true).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidParam);

        let entity =
            table_entry(fixtures::P4_ACL, vec![ternary(&[0xff; 4])]);
        let sdk = t.translate_entity(&entity, true)?;
        assert_eq!(
            first_match(&sdk),
            Some(FieldMatchType::Ternary(Ternary {
                value: vec![0x01, 0x04],
                mask: vec![0x01, 0xff],
            }))
        );
        Ok(())
    }

    #[test]
    fn test_untranslated_fields() -> anyhow::Result<()> {
        let t = translator(false)?;
        let lpm = FieldMatch {
            field_id: 1,
            field_match_type: Some(FieldMatchType::Lpm(Lpm {
                value: vec![10, 0, 0, 0],
                prefix_len: 8,
            })),
        };
        let entity = table_entry(fixtures::P4_FWD, vec![lpm]);
        assert_eq!(t.translate_entity(&entity, true)?, entity);
        Ok(())
    }

    #[test]
    fn test_actions() -> anyhow::Result<()> {
        let t = translator(false)?;
        let entity = Entity {
            entity: Some(EntityKind::TableEntry(TableEntry {
                table_id: fixtures::P4_FWD,
                action: Some(TableAction {
                    r#type: Some(table_action::Type::Action(fwd_action(&[
                        0, 0, 0, 5,
                    ]))),
                }),
                ..Default::default()
            })),
        };
        let sdk = t.translate_entity(&entity, true)?;
        let Some(EntityKind::TableEntry(e)) = sdk.entity else {
            anyhow::bail!("not a table entry");
        };
        assert_eq!(
            e.action.and_then(|a| a.r#type),
            Some(table_action::Type::Action(fwd_action(&[0x01, 0x04])))
        );

        let member = Entity {
            entity: Some(EntityKind::ActionProfileMember(
                p4rt::v1::ActionProfileMember {
                    action_profile_id: fixtures::P4_AP,
                    member_id: 1,
                    action: Some(fwd_action(&[0x01, 0x04])),
                },
            )),
        };
        let sdn = t.translate_entity(&member, false)?;
        let Some(EntityKind::ActionProfileMember(m)) = sdn.entity else {
            anyhow::bail!("not a member");
        };
        assert_eq!(m.action, Some(fwd_action(&[0x05])));
        Ok(())
    }

    #[test]
    fn test_low_level_p4info() -> anyhow::Result<()> {
        let t = translator(false)?;
        assert!(t.translation_required());
        let low = t.low_level_p4info();
        assert_eq!(low.type_info, None);
        let acl = &low.tables[0].match_fields;
        assert_eq!(acl[3].bitwidth, 9);
        assert_eq!(acl[3].type_name, None);
        assert_eq!(acl[0].bitwidth, 32);
        assert_eq!(low.actions[0].params[0].bitwidth, 9);
        assert_eq!(low.controller_packet_metadata[0].metadata[0].bitwidth, 9);
        Ok(())
    }

    #[test]
    fn test_no_translation() -> anyhow::Result<()> {
        let t = translator(false)?;
        let mut p4info = fixtures::p4info();
        p4info.type_info = None;
        t.push_forwarding_pipeline_config(&p4info)?;
        assert!(!t.translation_required());
        assert_eq!(*t.low_level_p4info(), p4info);

        let entity = table_entry(fixtures::P4_FWD, vec![exact(2, &[9])]);
        assert_eq!(t.translate_entity(&entity, true)?, entity);
        Ok(())
    }

    #[test]
    fn test_sdn_string() -> anyhow::Result<()> {
        use p4rt::config::v1::p4_new_type_spec::Representation;
        use p4rt::config::v1::p4_new_type_translation::{SdnString, SdnType};

        let t = translator(false)?;
        let mut p4info = fixtures::p4info();
        let types = &mut p4info.type_info.as_mut().unwrap().new_types;
        let spec = types.get_mut("PortId_t").unwrap();
        if let Some(Representation::TranslatedType(tt)) =
            spec.representation.as_mut()
        {
            tt.sdn_type = Some(SdnType::SdnString(SdnString {}));
        }
        let err = t.push_forwarding_pipeline_config(&p4info).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unimplemented);
        assert!(t.translation_required());
        Ok(())
    }

    #[test]
    fn test_counter_index() -> anyhow::Result<()> {
        let t = translator(false)?;
        let mut p4info = fixtures::p4info();
        p4info.counters[0].index_type_name = Some(P4NamedType {
            name: "PortId_t".to_string(),
        });
        t.push_forwarding_pipeline_config(&p4info)?;
        assert_eq!(t.low_level_p4info().counters[0].index_type_name, None);

        let entity = Entity {
            entity: Some(EntityKind::CounterEntry(CounterEntry {
                counter_id: fixtures::P4_COUNTER,
                index: Some(Index { index: 5 }),
                data: None,
            })),
        };
        let sdk = t.translate_entity(&entity, true)?;
        let Some(EntityKind::CounterEntry(c)) = &sdk.entity else {
            anyhow::bail!("not a counter entry");
        };
        assert_eq!(c.index, Some(Index { index: 260 }));
        assert_eq!(t.translate_entity(&sdk, false)?, entity);
        Ok(())
    }

    #[test]
    fn test_replicas() -> anyhow::Result<()> {
        let t = translator(false)?;
        let group = |ports: &[u32]| Entity {
            entity: Some(EntityKind::PacketReplicationEngineEntry(
                PacketReplicationEngineEntry {
                    r#type: Some(PreType::MulticastGroupEntry(
                        MulticastGroupEntry {
                            multicast_group_id: 1,
                            replicas: ports
                                .iter()
                                .map(|p| Replica {
                                    egress_port: *p,
                                    instance: 1,
                                })
                                .collect(),
                            metadata: vec![],
                        },
                    )),
                },
            )),
        };
        let sdk = t.translate_entity(&group(&[5, SDN_CPU_PORT]), true)?;
        assert_eq!(sdk, group(&[260, asic::tofino_stub::CPU_PORT]));

        let err = t.translate_entity(&group(&[7]), true).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidParam);
        Ok(())
    }

    #[test]
    fn test_packets() -> anyhow::Result<()> {
        let t = translator(false)?;
        let md = |v: &[u8]| {
            vec![PacketMetadata {
                metadata_id: 1,
                value: v.to_vec(),
            }]
        };

        let out = StreamMessageRequest {
            update: Some(stream_message_request::Update::Packet(PacketOut {
                payload: vec![1, 2, 3],
                metadata: md(&[5]),
            })),
        };
        let out = t.translate_stream_message_request(&out)?;
        let Some(stream_message_request::Update::Packet(p)) = out.update
        else {
            anyhow::bail!("not a packet");
        };
        assert_eq!(p.metadata, md(&[0x01, 0x04]));

        let punted = StreamMessageResponse {
            update: Some(stream_message_response::Update::Packet(PacketIn {
                payload: vec![1, 2, 3],
                metadata: md(&[0x01, 0x04]),
            })),
        };
        let punted = t.translate_stream_message_response(&punted)?;
        let Some(stream_message_response::Update::Packet(p)) = punted.update
        else {
            anyhow::bail!("not a packet");
        };
        assert_eq!(p.metadata, md(&[0x05]));
        Ok(())
    }

    #[test]
    fn test_write_request() -> anyhow::Result<()> {
        let t = translator(false)?;
        let update = |port: &[u8]| p4rt::v1::Update {
            r#type: p4rt::v1::update::Type::Insert as i32,
            entity: Some(table_entry(fixtures::P4_FWD, vec![exact(2, port)])),
        };
        let req = WriteRequest {
            device_id: 1,
            updates: vec![update(&[5])],
            ..Default::default()
        };
        let sdk = t.translate_write_request(&req)?;
        assert_eq!(sdk.device_id, 1);
        assert_eq!(sdk.updates, vec![update(&[0x01, 0x04])]);

        let bad = WriteRequest {
            updates: vec![update(&[5]), update(&[8])],
            ..Default::default()
        };
        assert!(t.translate_write_request(&bad).is_err());
        Ok(())
    }
}
