// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use slog::error;

use aal::SdeOps;
use p4rt::v1::ReadResponse;

use crate::translator::Translator;

/// The sink for read responses.  `write` returns false once the consumer
/// is gone.
#[cfg_attr(test, mockall::automock)]
pub trait ResponseWriter: Send + Sync {
    fn write(&self, resp: &ReadResponse) -> bool;
}

/// Translates responses back to SDN space before passing them on.
pub struct TranslatingWriter<'a, S: SdeOps, W: ResponseWriter + ?Sized> {
    log: &'a slog::Logger,
    translator: &'a Translator<S>,
    inner: &'a W,
}

impl<'a, S: SdeOps, W: ResponseWriter + ?Sized> TranslatingWriter<'a, S, W> {
    pub fn new(
        log: &'a slog::Logger,
        translator: &'a Translator<S>,
        inner: &'a W,
    ) -> Self {
        TranslatingWriter {
            log,
            translator,
            inner,
        }
    }
}

impl<S: SdeOps, W: ResponseWriter + ?Sized> ResponseWriter
    for TranslatingWriter<'_, S, W>
{
    fn write(&self, resp: &ReadResponse) -> bool {
        match self.translator.translate_read_response(resp) {
            Ok(resp) => self.inner.write(&resp),
            Err(e) => {
                error!(self.log, "failed to translate read response";
                    "error" => %e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use p4rt::v1::field_match::{Exact, FieldMatchType};
    use p4rt::v1::{entity, Entity, FieldMatch, ReadResponse, TableEntry};

    use super::{MockResponseWriter, ResponseWriter, TranslatingWriter};
    use crate::fixtures;
    use crate::translator::Translator;

    fn response(port: &[u8]) -> ReadResponse {
        ReadResponse {
            entities: vec![Entity {
                entity: Some(entity::Entity::TableEntry(TableEntry {
                    table_id: fixtures::P4_FWD,
                    r#match: vec![FieldMatch {
                        field_id: 2,
                        field_match_type: Some(FieldMatchType::Exact(Exact {
                            value: port.to_vec(),
                        })),
                    }],
                    ..Default::default()
                })),
            }],
        }
    }

    #[test]
    fn test_translating_writer() -> anyhow::Result<()> {
        let (log, sde) = fixtures::sde()?;
        let t = Translator::new(&log, Arc::clone(&sde), false);
        t.push_chassis_config(&fixtures::chassis())?;
        t.push_forwarding_pipeline_config(&fixtures::p4info())?;

        let mut inner = MockResponseWriter::new();
        inner
            .expect_write()
            .withf(|resp| *resp == response(&[5]))
            .times(1)
            .return_const(true);
        let w = TranslatingWriter::new(&log, &t, &inner);
        assert!(w.write(&response(&[0x01, 0x04])));

        // An unmapped port never reaches the inner writer.
        assert!(!w.write(&response(&[0x01, 0xff])));
        Ok(())
    }
}
