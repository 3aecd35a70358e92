// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Reconciles the ids the P4 compiler assigned in P4Info with the ids the SDK
//! assigned to the same objects in `bfrt.json`.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;
use slog::{debug, info, o, warn};

use aal::{TableInfo, TableType};
use p4rt::config::v1::{P4Info, Preamble};

use crate::types::HalResult;
use crate::{hal_ensure, hal_err};

/// `extern_type_id` of a TNA ActionProfile extern
pub const TNA_EXTERN_ACTION_PROFILE_ID: u32 = 129;
/// `extern_type_id` of a TNA ActionSelector extern
pub const TNA_EXTERN_ACTION_SELECTOR_ID: u32 = 130;

/// One consistent set of mappings, built by a single pipeline push.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IdMaps {
    pub p4info_to_sdk: HashMap<u32, u32>,
    pub sdk_to_p4info: HashMap<u32, u32>,
    pub profile_to_selector: HashMap<u32, u32>,
    pub selector_to_profile: HashMap<u32, u32>,
}

#[derive(Debug, Deserialize)]
struct Context {
    #[serde(default)]
    tables: Vec<ContextTable>,
}

#[derive(Debug, Deserialize)]
struct ContextTable {
    #[serde(default)]
    action_profile: Option<String>,
    #[serde(default)]
    selection_table_refs: Vec<TableRef>,
}

#[derive(Debug, Deserialize)]
struct TableRef {
    #[serde(default)]
    name: Option<String>,
}

pub struct IdMapper {
    log: slog::Logger,
    maps: RwLock<Arc<IdMaps>>,
}

impl IdMapper {
    pub fn new(log: &slog::Logger) -> Self {
        IdMapper {
            log: log.new(o!("unit" => "id_mapper")),
            maps: RwLock::new(Arc::new(IdMaps::default())),
        }
    }

    /// Rebuild every mapping for a new pipeline.  Nothing is replaced unless
    /// all of the P4Info objects resolve.
    pub fn push_forwarding_pipeline_config(
        &self,
        p4info: &P4Info,
        context_json: &str,
        tables: &[Arc<TableInfo>],
    ) -> HalResult<()> {
        // Ascending SDK id, so substring matches are stable across pushes.
        let by_id: BTreeMap<u32, &TableInfo> =
            tables.iter().map(|t| (t.id, t.as_ref())).collect();
        let mut maps = IdMaps::default();

        let preambles = p4info
            .tables
            .iter()
            .map(|t| &t.preamble)
            .chain(p4info.action_profiles.iter().map(|p| &p.preamble))
            .chain(
                p4info
                    .externs
                    .iter()
                    .filter(|e| {
                        e.extern_type_id == TNA_EXTERN_ACTION_PROFILE_ID
                            || e.extern_type_id == TNA_EXTERN_ACTION_SELECTOR_ID
                    })
                    .flat_map(|e| e.instances.iter().map(|i| &i.preamble)),
            )
            .chain(p4info.counters.iter().map(|c| &c.preamble))
            .chain(p4info.registers.iter().map(|r| &r.preamble))
            .chain(p4info.meters.iter().map(|m| &m.preamble));
        for preamble in preambles.flatten() {
            self.build_mapping(&mut maps, preamble, &by_id)?;
        }

        self.build_action_profile_mapping(&mut maps, context_json, &by_id)?;

        info!(self.log, "built id mappings";
            "entities" => maps.p4info_to_sdk.len(),
            "selectors" => maps.profile_to_selector.len());
        *self.maps.write() = Arc::new(maps);
        Ok(())
    }

    fn build_mapping(
        &self,
        maps: &mut IdMaps,
        preamble: &Preamble,
        tables: &BTreeMap<u32, &TableInfo>,
    ) -> HalResult<()> {
        let id = preamble.id;
        let name = preamble.name.as_str();
        let sdk_id = if tables.contains_key(&id) {
            id
        } else if let Some(t) = tables.values().find(|t| t.name == name) {
            t.id
        } else {
            // The SDK prefixes names with the pipeline, as in "pipe.".
            let mut found = tables.values().filter(|t| t.name.contains(name));
            let first = found.next().ok_or_else(|| {
                hal_err!(
                    Internal,
                    "Unable to find SDK id for P4Info entity {name} with ID \
                     {id}."
                )
            })?;
            let others: Vec<&str> = found.map(|t| t.name.as_str()).collect();
            if !others.is_empty() {
                warn!(self.log, "ambiguous SDK name match";
                    "p4info" => name, "chosen" => &first.name,
                    "ignored" => others.join(","));
            }
            first.id
        };
        if let Some(&other) = maps.sdk_to_p4info.get(&sdk_id) {
            hal_ensure!(
                other == id,
                Internal,
                "SDK id {sdk_id} is claimed by P4Info entities {other} and \
                 {id} ({name})."
            );
        }
        debug!(self.log, "mapped {name}"; "p4info" => id, "sdk" => sdk_id);
        maps.p4info_to_sdk.insert(id, sdk_id);
        maps.sdk_to_p4info.insert(sdk_id, id);
        Ok(())
    }

    fn build_action_profile_mapping(
        &self,
        maps: &mut IdMaps,
        context_json: &str,
        tables: &BTreeMap<u32, &TableInfo>,
    ) -> HalResult<()> {
        let context: Context =
            serde_json::from_str(context_json).map_err(|e| {
                hal_err!(Internal, "Failed to parse context.json: {e}")
            })?;

        let mut prof_to_sel = BTreeMap::new();
        for table in context.tables {
            let Some(profile) = table.action_profile.filter(|p| !p.is_empty())
            else {
                continue;
            };
            let Some(selector) = table.selection_table_refs.first() else {
                continue;
            };
            let selector = selector.name.clone().unwrap_or_default();
            hal_ensure!(
                !selector.is_empty(),
                Internal,
                "ActionSelector for ActionProfile {profile} has no name."
            );
            hal_ensure!(
                !prof_to_sel.contains_key(&profile),
                Internal,
                "Action profile with name {profile} already exists."
            );
            prof_to_sel.insert(profile, selector);
        }

        let find = |ttype: TableType, name: &str| {
            tables
                .values()
                .find(|t| t.table_type == ttype && t.name.contains(name))
                .map(|t| t.id)
        };
        for (prof, sel) in prof_to_sel {
            let prof_id =
                find(TableType::ActionProfile, &prof).ok_or_else(|| {
                    hal_err!(
                        Internal,
                        "Unable to find ID for action profile {prof}"
                    )
                })?;
            let sel_id = find(TableType::Selector, &sel).ok_or_else(|| {
                hal_err!(
                    Internal,
                    "Unable to find ID for action selector {sel}"
                )
            })?;
            maps.profile_to_selector.insert(prof_id, sel_id);
            maps.selector_to_profile.insert(sel_id, prof_id);
        }
        Ok(())
    }

    /// The current mappings.  The snapshot stays consistent even if another
    /// pipeline is pushed while it is held.
    pub fn snapshot(&self) -> Arc<IdMaps> {
        self.maps.read().clone()
    }

    pub fn get_sdk_id(&self, p4info_id: u32) -> HalResult<u32> {
        self.maps
            .read()
            .p4info_to_sdk
            .get(&p4info_id)
            .copied()
            .ok_or_else(|| {
                hal_err!(
                    NotFound,
                    "Unable to find SDK id from p4info id: {p4info_id}"
                )
            })
    }

    pub fn get_p4info_id(&self, sdk_id: u32) -> HalResult<u32> {
        self.maps
            .read()
            .sdk_to_p4info
            .get(&sdk_id)
            .copied()
            .ok_or_else(|| {
                hal_err!(
                    NotFound,
                    "Unable to find p4info id from SDK id: {sdk_id}"
                )
            })
    }

    pub fn get_action_selector_id(&self, profile_id: u32) -> HalResult<u32> {
        self.maps
            .read()
            .profile_to_selector
            .get(&profile_id)
            .copied()
            .ok_or_else(|| {
                hal_err!(
                    NotFound,
                    "Unable to find action selector of an action profile: \
                     {profile_id}"
                )
            })
    }

    pub fn get_action_profile_id(&self, selector_id: u32) -> HalResult<u32> {
        self.maps
            .read()
            .selector_to_profile
            .get(&selector_id)
            .copied()
            .ok_or_else(|| {
                hal_err!(
                    NotFound,
                    "Unable to find action profile of an action selector: \
                     {selector_id}"
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::types::ErrorKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_mapping() -> anyhow::Result<()> {
        let (log, sdk) = fixtures::stub()?;
        let mapper = IdMapper::new(&log);
        mapper.push_forwarding_pipeline_config(
            &fixtures::p4info(),
            fixtures::CONTEXT,
            &aal::SdeOps::tables(sdk.as_ref()),
        )?;

        // Same id on both sides
        assert_eq!(mapper.get_sdk_id(fixtures::P4_ACL)?, fixtures::P4_ACL);
        // Exact name
        assert_eq!(mapper.get_sdk_id(fixtures::P4_EXACT)?, fixtures::SDK_EXACT);
        // Pipeline-prefixed name
        assert_eq!(mapper.get_sdk_id(fixtures::P4_FWD)?, fixtures::SDK_FWD);
        assert_eq!(mapper.get_sdk_id(fixtures::P4_AP)?, fixtures::SDK_AP);
        assert_eq!(
            mapper.get_action_selector_id(fixtures::SDK_AP)?,
            fixtures::SDK_SEL
        );
        assert_eq!(
            mapper.get_action_profile_id(fixtures::SDK_SEL)?,
            fixtures::SDK_AP
        );

        let err = mapper.get_sdk_id(12345).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_eq!(
            err.msg,
            "Unable to find SDK id from p4info id: 12345".to_string()
        );
        Ok(())
    }

    #[test]
    fn test_bijection() -> anyhow::Result<()> {
        let (log, sdk) = fixtures::stub()?;
        let mapper = IdMapper::new(&log);
        mapper.push_forwarding_pipeline_config(
            &fixtures::p4info(),
            fixtures::CONTEXT,
            &aal::SdeOps::tables(sdk.as_ref()),
        )?;
        let maps = mapper.snapshot();
        assert_eq!(maps.p4info_to_sdk.len(), maps.sdk_to_p4info.len());
        for (p4, sdk) in &maps.p4info_to_sdk {
            assert_eq!(maps.sdk_to_p4info[sdk], *p4);
        }
        for (prof, sel) in &maps.profile_to_selector {
            assert_eq!(maps.selector_to_profile[sel], *prof);
        }
        Ok(())
    }

    #[test]
    fn test_shared_sdk_id() -> anyhow::Result<()> {
        let (log, sdk) = fixtures::stub()?;
        let tables = aal::SdeOps::tables(sdk.as_ref());
        let mapper = IdMapper::new(&log);

        // "Ingress.pkt" only resolves by substring, onto the same SDK
        // counter as "Ingress.pkt_counter".
        let mut p4info = fixtures::p4info();
        let mut counter = p4info.counters[0].clone();
        counter.preamble = Some(Preamble {
            id: 0x1200_0002,
            name: "Ingress.pkt".into(),
            ..Default::default()
        });
        p4info.counters.push(counter);
        let err = mapper
            .push_forwarding_pipeline_config(
                &p4info,
                fixtures::CONTEXT,
                &tables,
            )
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
        assert!(mapper.get_sdk_id(fixtures::P4_COUNTER).is_err());
        Ok(())
    }

    #[test]
    fn test_failed_push_keeps_old_maps() -> anyhow::Result<()> {
        let (log, sdk) = fixtures::stub()?;
        let tables = aal::SdeOps::tables(sdk.as_ref());
        let mapper = IdMapper::new(&log);
        mapper.push_forwarding_pipeline_config(
            &fixtures::p4info(),
            fixtures::CONTEXT,
            &tables,
        )?;
        let before = mapper.snapshot();

        let mut p4info = fixtures::p4info();
        if let Some(p) = p4info.tables[0].preamble.as_mut() {
            p.id = 1;
            p.name = "Ingress.nonexistent".into();
        }
        let context = fixtures::CONTEXT;
        let err = mapper
            .push_forwarding_pipeline_config(&p4info, context, &tables)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
        assert_eq!(*mapper.snapshot(), *before);

        let err = mapper
            .push_forwarding_pipeline_config(
                &fixtures::p4info(),
                "not json",
                &tables,
            )
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
        Ok(())
    }

    #[test]
    fn test_bad_context() -> anyhow::Result<()> {
        let (log, sdk) = fixtures::stub()?;
        let tables = aal::SdeOps::tables(sdk.as_ref());
        let mapper = IdMapper::new(&log);
        let dup = r#"{ "tables": [
            { "action_profile": "ap",
              "selection_table_refs": [ { "name": "sel" } ] },
            { "action_profile": "ap",
              "selection_table_refs": [ { "name": "sel" } ] }
        ] }"#;
        assert!(mapper
            .push_forwarding_pipeline_config(&fixtures::p4info(), dup, &tables)
            .is_err());
        let unnamed = r#"{ "tables": [
            { "action_profile": "ap", "selection_table_refs": [ {} ] }
        ] }"#;
        assert!(mapper
            .push_forwarding_pipeline_config(
                &fixtures::p4info(),
                unnamed,
                &tables
            )
            .is_err());
        let missing = r#"{ "tables": [
            { "action_profile": "nope",
              "selection_table_refs": [ { "name": "sel" } ] }
        ] }"#;
        assert!(mapper
            .push_forwarding_pipeline_config(
                &fixtures::p4info(),
                missing,
                &tables
            )
            .is_err());
        Ok(())
    }
}
