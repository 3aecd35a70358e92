// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The request-level entry points.  A `Node` owns the translator, the id
//! mapper and one instance of each manager, and routes every entity of a
//! request to the manager responsible for it.

use std::sync::Arc;

use slog::{debug, info, o, warn};

use aal::SdeOps;
use p4rt::config::v1::P4Info;
use p4rt::v1::entity::Entity as EntityKind;
use p4rt::v1::update::Type as UpdateType;
use p4rt::v1::{
    Entity, ReadRequest, ReadResponse, StreamMessageRequest,
    StreamMessageResponse, Update, WriteRequest,
};

use crate::action_profile_manager::ActionProfileManager;
use crate::config::{ChassisConfig, Config};
use crate::counter_manager::CounterManager;
use crate::hal_err;
use crate::id_mapper::IdMapper;
use crate::meter_manager::MeterManager;
use crate::pipeline::PipelineInfo;
use crate::pre_manager::PreManager;
use crate::sde::Sde;
use crate::table_manager::TableManager;
use crate::translator::Translator;
use crate::types::HalResult;
use crate::writer::{ResponseWriter, TranslatingWriter};

/// A forwarding pipeline as pushed by the controller.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub p4info: P4Info,
    /// The compiler's `context.json` for the pipeline
    pub context: String,
}

pub struct Node<S: SdeOps> {
    log: slog::Logger,
    sde: Arc<Sde<S>>,
    translator: Translator<S>,
    ids: Arc<IdMapper>,
    tables: TableManager<S>,
    counters: CounterManager<S>,
    meters: MeterManager<S>,
    profiles: ActionProfileManager<S>,
    pre: PreManager<S>,
}

fn wrap<T>(entries: Vec<T>, kind: fn(T) -> EntityKind) -> Vec<Entity> {
    entries
        .into_iter()
        .map(|e| Entity {
            entity: Some(kind(e)),
        })
        .collect()
}

impl<S: SdeOps> Node<S> {
    pub fn new(log: &slog::Logger, sde: Arc<Sde<S>>, config: &Config) -> Self {
        let log = log.new(o!("unit" => "node"));
        let ids = Arc::new(IdMapper::new(&log));
        let timeout = config.sync_timeout();
        Node {
            translator: Translator::new(
                &log,
                sde.clone(),
                config.legacy_bytestring_responses,
            ),
            tables: TableManager::new(&log, sde.clone(), ids.clone(), timeout),
            counters: CounterManager::new(
                &log,
                sde.clone(),
                ids.clone(),
                timeout,
            ),
            meters: MeterManager::new(&log, sde.clone(), ids.clone()),
            profiles: ActionProfileManager::new(&log, sde.clone(), ids.clone()),
            pre: PreManager::new(&log, sde.clone()),
            ids,
            sde,
            log,
        }
    }

    pub fn push_chassis_config(&self, config: &ChassisConfig) -> HalResult<()> {
        self.translator.push_chassis_config(config)
    }

    /// Installs a new pipeline.  The translator goes first, since everything
    /// below it works on the low-level P4Info it derives.
    pub fn push_forwarding_pipeline_config(
        &self,
        config: &PipelineConfig,
    ) -> HalResult<()> {
        self.translator
            .push_forwarding_pipeline_config(&config.p4info)?;
        let low = self.translator.low_level_p4info();
        self.ids.push_forwarding_pipeline_config(
            &low,
            &config.context,
            &self.sde.tables(),
        )?;

        let pipeline = Arc::new(PipelineInfo::new(low));
        self.tables.push_forwarding_pipeline_config(pipeline.clone())?;
        self.counters
            .push_forwarding_pipeline_config(pipeline.clone())?;
        self.meters.push_forwarding_pipeline_config(pipeline.clone())?;
        self.profiles
            .push_forwarding_pipeline_config(pipeline.clone())?;
        self.sde.push_forwarding_pipeline_config()?;
        info!(self.log, "pipeline pushed";
            "tables" => pipeline.p4info().tables.len());
        Ok(())
    }

    /// Applies every update of `req`, reporting a result per update.
    pub fn write_forwarding_entries(
        &self,
        req: &WriteRequest,
    ) -> Vec<HalResult<()>> {
        debug!(self.log, "write request"; "updates" => req.updates.len());
        req.updates
            .iter()
            .map(|u| {
                self.write_update(u).inspect_err(|e| {
                    warn!(self.log, "update rejected"; "error" => %e);
                })
            })
            .collect()
    }

    fn write_update(&self, update: &Update) -> HalResult<()> {
        let kind = UpdateType::try_from(update.r#type).map_err(|_| {
            hal_err!(InvalidParam, "Invalid update type {}.", update.r#type)
        })?;
        let update = self.translator.translate_update(update)?;
        let entity = update
            .entity
            .ok_or_else(|| hal_err!(InvalidParam, "Update has no entity."))?;
        match entity.entity {
            Some(EntityKind::TableEntry(e)) => {
                self.tables.write_table_entry(kind, &e)
            }
            Some(EntityKind::ExternEntry(e)) => {
                self.profiles.write_extern_entry(kind, &e)
            }
            Some(EntityKind::ActionProfileMember(m)) => {
                self.profiles.write_action_profile_member(kind, &m)
            }
            Some(EntityKind::ActionProfileGroup(g)) => {
                self.profiles.write_action_profile_group(kind, &g)
            }
            Some(EntityKind::MeterEntry(m)) => {
                self.meters.write_meter_entry(kind, &m)
            }
            Some(EntityKind::DirectMeterEntry(m)) => {
                self.tables.write_direct_meter_entry(kind, &m)
            }
            Some(EntityKind::CounterEntry(c)) => {
                self.counters.write_counter_entry(kind, &c)
            }
            Some(EntityKind::DirectCounterEntry(c)) => {
                self.tables.write_direct_counter_entry(kind, &c)
            }
            Some(EntityKind::PacketReplicationEngineEntry(p)) => {
                self.pre.write_pre_entry(kind, &p)
            }
            Some(EntityKind::RegisterEntry(r)) => {
                self.tables.write_register_entry(kind, &r)
            }
            None => Err(hal_err!(Unimplemented, "Unsupported entity type.")),
        }
    }

    fn read_entity(&self, entity: &Entity) -> HalResult<Vec<Entity>> {
        let entity = self.translator.translate_entity(entity, true)?;
        Ok(match entity.entity {
            Some(EntityKind::TableEntry(e)) => wrap(
                self.tables.read_table_entry(&e)?,
                EntityKind::TableEntry,
            ),
            Some(EntityKind::ExternEntry(e)) => wrap(
                self.profiles.read_extern_entry(&e)?,
                EntityKind::ExternEntry,
            ),
            Some(EntityKind::ActionProfileMember(m)) => wrap(
                self.profiles.read_action_profile_member(&m)?,
                EntityKind::ActionProfileMember,
            ),
            Some(EntityKind::ActionProfileGroup(g)) => wrap(
                self.profiles.read_action_profile_group(&g)?,
                EntityKind::ActionProfileGroup,
            ),
            Some(EntityKind::MeterEntry(m)) => wrap(
                self.meters.read_meter_entry(&m)?,
                EntityKind::MeterEntry,
            ),
            Some(EntityKind::DirectMeterEntry(m)) => wrap(
                vec![self.tables.read_direct_meter_entry(&m)?],
                EntityKind::DirectMeterEntry,
            ),
            Some(EntityKind::CounterEntry(c)) => wrap(
                self.counters.read_counter_entry(&c)?,
                EntityKind::CounterEntry,
            ),
            Some(EntityKind::DirectCounterEntry(c)) => wrap(
                vec![self.tables.read_direct_counter_entry(&c)?],
                EntityKind::DirectCounterEntry,
            ),
            Some(EntityKind::PacketReplicationEngineEntry(p)) => wrap(
                self.pre.read_pre_entry(&p)?,
                EntityKind::PacketReplicationEngineEntry,
            ),
            Some(EntityKind::RegisterEntry(r)) => wrap(
                self.tables.read_register_entry(&r)?,
                EntityKind::RegisterEntry,
            ),
            None => {
                return Err(hal_err!(Unimplemented, "Unsupported entity type."))
            }
        })
    }

    /// Reads every entity of `req`, handing the results for each one to
    /// `writer` as a separate response.
    pub fn read_forwarding_entries<W: ResponseWriter + ?Sized>(
        &self,
        req: &ReadRequest,
        writer: &W,
    ) -> Vec<HalResult<()>> {
        debug!(self.log, "read request"; "entities" => req.entities.len());
        let writer =
            TranslatingWriter::new(&self.log, &self.translator, writer);
        req.entities
            .iter()
            .map(|e| {
                let entities = self.read_entity(e).inspect_err(|e| {
                    warn!(self.log, "read rejected"; "error" => %e);
                })?;
                match writer.write(&ReadResponse { entities }) {
                    true => Ok(()),
                    false => Err(hal_err!(
                        Internal,
                        "Write to stream channel failed."
                    )),
                }
            })
            .collect()
    }

    pub fn translate_stream_message_request(
        &self,
        req: &StreamMessageRequest,
    ) -> HalResult<StreamMessageRequest> {
        self.translator.translate_stream_message_request(req)
    }

    pub fn translate_stream_message_response(
        &self,
        resp: &StreamMessageResponse,
    ) -> HalResult<StreamMessageResponse> {
        self.translator.translate_stream_message_response(resp)
    }
}

#[cfg(test)]
mod tests {
    use asic::tofino_stub::StubHandle;
    use p4rt::v1::entity::Entity as EntityKind;
    use p4rt::v1::field_match::{Exact, FieldMatchType, Lpm};
    use p4rt::v1::packet_replication_engine_entry::Type as PreType;
    use p4rt::v1::update::Type as UpdateType;
    use p4rt::v1::{
        action, stream_message_request, table_action, Action, CounterEntry,
        Entity, FieldMatch, Index, MulticastGroupEntry, PacketMetadata,
        PacketOut, PacketReplicationEngineEntry, ReadRequest, ReadResponse,
        Replica, StreamMessageRequest, TableAction, TableEntry, Update,
        WriteRequest,
    };

    use super::{Node, PipelineConfig};
    use crate::config::Config;
    use crate::fixtures;
    use crate::types::ErrorKind;
    use crate::writer::MockResponseWriter;
    use pretty_assertions::assert_eq;

    fn node() -> anyhow::Result<Node<StubHandle>> {
        let (log, sde) = fixtures::sde()?;
        let node = Node::new(&log, sde, &Config::default());
        node.push_chassis_config(&fixtures::chassis())?;
        node.push_forwarding_pipeline_config(&PipelineConfig {
            p4info: fixtures::p4info(),
            context: fixtures::CONTEXT.to_string(),
        })?;
        Ok(node)
    }

    fn fwd_entry(port: &[u8]) -> Entity {
        Entity {
            entity: Some(EntityKind::TableEntry(TableEntry {
                table_id: fixtures::P4_FWD,
                r#match: vec![
                    FieldMatch {
                        field_id: 1,
                        field_match_type: Some(FieldMatchType::Lpm(Lpm {
                            value: vec![10, 1, 0, 0],
                            prefix_len: 16,
                        })),
                    },
                    FieldMatch {
                        field_id: 2,
                        field_match_type: Some(FieldMatchType::Exact(Exact {
                            value: port.to_vec(),
                        })),
                    },
                ],
                action: Some(TableAction {
                    r#type: Some(table_action::Type::Action(Action {
                        action_id: fixtures::ACT_FWD,
                        params: vec![action::Param {
                            param_id: 1,
                            value: port.to_vec(),
                        }],
                    })),
                }),
                ..Default::default()
            })),
        }
    }

    fn update(kind: UpdateType, entity: Entity) -> Update {
        Update {
            r#type: kind as i32,
            entity: Some(entity),
        }
    }

    fn read_all(table_id: u32) -> ReadRequest {
        ReadRequest {
            entities: vec![Entity {
                entity: Some(EntityKind::TableEntry(TableEntry {
                    table_id,
                    ..Default::default()
                })),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_round_trip() -> anyhow::Result<()> {
        let node = node()?;
        let req = WriteRequest {
            updates: vec![update(UpdateType::Insert, fwd_entry(&[5]))],
            ..Default::default()
        };
        assert_eq!(node.write_forwarding_entries(&req), vec![Ok(())]);

        // The entry reads back in SDN space.
        let mut writer = MockResponseWriter::new();
        writer
            .expect_write()
            .withf(|resp| {
                *resp
                    == ReadResponse {
                        entities: vec![fwd_entry(&[5])],
                    }
            })
            .times(1)
            .return_const(true);
        let results =
            node.read_forwarding_entries(&read_all(fixtures::P4_FWD), &writer);
        assert_eq!(results, vec![Ok(())]);
        Ok(())
    }

    #[test]
    fn test_per_update_results() -> anyhow::Result<()> {
        let node = node()?;
        let counter = Entity {
            entity: Some(EntityKind::CounterEntry(CounterEntry {
                counter_id: fixtures::P4_COUNTER,
                index: Some(Index { index: 1 }),
                data: None,
            })),
        };
        let req = WriteRequest {
            updates: vec![
                // Port 7 isn't in the chassis config.
                update(UpdateType::Insert, fwd_entry(&[7])),
                update(UpdateType::Insert, fwd_entry(&[5])),
                update(UpdateType::Insert, fwd_entry(&[5])),
                update(UpdateType::Modify, counter),
                update(UpdateType::Insert, Entity { entity: None }),
                Update {
                    r#type: 9,
                    entity: Some(fwd_entry(&[5])),
                },
            ],
            ..Default::default()
        };
        let kinds: Vec<_> = node
            .write_forwarding_entries(&req)
            .into_iter()
            .map(|r| r.map_err(|e| e.kind))
            .collect();
        assert_eq!(
            kinds,
            vec![
                Err(ErrorKind::InvalidParam),
                Ok(()),
                Err(ErrorKind::AlreadyExists),
                Err(ErrorKind::InvalidParam),
                Err(ErrorKind::Unimplemented),
                Err(ErrorKind::InvalidParam),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_read_failures() -> anyhow::Result<()> {
        let node = node()?;
        let group = Entity {
            entity: Some(EntityKind::PacketReplicationEngineEntry(
                PacketReplicationEngineEntry {
                    r#type: Some(PreType::MulticastGroupEntry(
                        MulticastGroupEntry {
                            multicast_group_id: 2,
                            replicas: vec![Replica {
                                egress_port: 5,
                                instance: 1,
                            }],
                            metadata: vec![],
                        },
                    )),
                },
            )),
        };
        let req = WriteRequest {
            updates: vec![update(UpdateType::Insert, group.clone())],
            ..Default::default()
        };
        assert_eq!(node.write_forwarding_entries(&req), vec![Ok(())]);

        // A consumer that went away fails the entity, the unknown table
        // fails on its own and never reaches the writer.
        let mut writer = MockResponseWriter::new();
        writer
            .expect_write()
            .withf(move |resp| resp.entities == vec![group.clone()])
            .times(1)
            .return_const(false);
        let req = ReadRequest {
            entities: vec![
                read_all(12345).entities[0].clone(),
                Entity {
                    entity: Some(EntityKind::PacketReplicationEngineEntry(
                        PacketReplicationEngineEntry {
                            r#type: Some(PreType::MulticastGroupEntry(
                                MulticastGroupEntry::default(),
                            )),
                        },
                    )),
                },
            ],
            ..Default::default()
        };
        let kinds: Vec<_> = node
            .read_forwarding_entries(&req, &writer)
            .into_iter()
            .map(|r| r.map_err(|e| e.kind))
            .collect();
        assert_eq!(
            kinds,
            vec![Err(ErrorKind::NotFound), Err(ErrorKind::Internal)]
        );
        Ok(())
    }

    #[test]
    fn test_stream_translation() -> anyhow::Result<()> {
        let node = node()?;
        let packet = |port: &[u8]| StreamMessageRequest {
            update: Some(stream_message_request::Update::Packet(PacketOut {
                payload: vec![0xde, 0xad],
                metadata: vec![PacketMetadata {
                    metadata_id: 1,
                    value: port.to_vec(),
                }],
            })),
        };
        let sdk = node.translate_stream_message_request(&packet(&[5]))?;
        assert_eq!(sdk, packet(&[0x01, 0x04]));
        Ok(())
    }

    #[cfg(feature = "chaos")]
    #[test]
    fn test_chaos() -> anyhow::Result<()> {
        use std::sync::Arc;

        use asic::chaos::{AsicConfig, Handle, TableChaos};
        use asic::tofino_common::BfRt;

        use crate::sde::Sde;

        let log = fixtures::log()?;
        let rt = BfRt::from_json(&fixtures::bfrt())?;
        let config = AsicConfig {
            table_entry_add: TableChaos::uniform(1.0),
            ..Default::default()
        };
        let stub = StubHandle::from_bfrt(&log, &rt, &config.stub)?;
        let hdl = Handle::wrap(&log, stub, &config);
        let sde = Arc::new(Sde::new(&log, Arc::new(hdl), 0));
        let node = Node::new(&log, sde, &Config::default());
        node.push_forwarding_pipeline_config(&PipelineConfig {
            p4info: fixtures::p4info(),
            context: fixtures::CONTEXT.to_string(),
        })?;

        // Every SDK write fails, and each failure is reported on its own.
        let entity = Entity {
            entity: Some(EntityKind::TableEntry(TableEntry {
                table_id: fixtures::P4_EXACT,
                r#match: vec![FieldMatch {
                    field_id: 1,
                    field_match_type: Some(FieldMatchType::Exact(Exact {
                        value: vec![0, 1, 2, 3, 4, 5],
                    })),
                }],
                action: Some(TableAction {
                    r#type: Some(table_action::Type::Action(Action {
                        action_id: fixtures::ACT_DROP,
                        params: vec![],
                    })),
                }),
                ..Default::default()
            })),
        };
        let req = WriteRequest {
            updates: vec![
                update(UpdateType::Insert, entity.clone()),
                update(UpdateType::Insert, entity),
            ],
            ..Default::default()
        };
        let results = node.write_forwarding_entries(&req);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.is_err()));
        Ok(())
    }
}
