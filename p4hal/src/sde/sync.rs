// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use slog::{debug, info};

use aal::{SdeOps, TableOperation};

use super::Sde;
use crate::hal_err;
use crate::types::HalResult;

/// What a synchronize request actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The SDK's shadow copy now matches the hardware.
    Synced,
    /// The table has no such operation.  Reads return the SDK's current
    /// shadow values.
    Unsupported,
}

fn describe(op: TableOperation) -> &'static str {
    match op {
        TableOperation::CounterSync => "counters",
        TableOperation::RegisterSync => "registers",
    }
}

impl<S: SdeOps> Sde<S> {
    /// Record the asynchronous operations every table of the pipeline
    /// supports.
    pub(crate) fn negotiate_sync(&self) -> HalResult<()> {
        let mut ops = HashMap::new();
        for t in self.hdl.tables() {
            let supported = self.hdl.operations_supported(t.id)?;
            if !supported.is_empty() {
                ops.insert(t.id, supported);
            }
        }
        info!(self.log, "negotiated table operations";
            "tables" => ops.len());
        *self.sync_ops.write() = Arc::new(ops);
        Ok(())
    }

    pub fn supports(&self, table_id: u32, op: TableOperation) -> bool {
        self.sync_ops
            .read()
            .get(&table_id)
            .is_some_and(|ops| ops.contains(&op))
    }

    /// Pull counter or register values from the hardware, waiting at most
    /// `timeout` for the SDK to finish.
    pub fn synchronize(
        &self,
        table_id: u32,
        op: TableOperation,
        timeout: Duration,
    ) -> HalResult<SyncOutcome> {
        if !self.supports(table_id, op) {
            debug!(self.log, "{op} unsupported"; "table" => table_id);
            return Ok(SyncOutcome::Unsupported);
        }

        let (tx, rx) = mpsc::sync_channel(1);
        self.hdl.operation_execute(
            &self.target(),
            table_id,
            op,
            Box::new(move || {
                let _ = tx.send(());
            }),
        )?;
        rx.recv_timeout(timeout).map_err(|_| {
            hal_err!(
                OperationTimeout,
                "Timeout while syncing table {} of table {table_id}.",
                describe(op)
            )
        })?;
        Ok(SyncOutcome::Synced)
    }
}
