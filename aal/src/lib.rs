// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::sync::Arc;

use thiserror::Error;

pub mod status;
mod table;
pub use table::*;

/// A specialized Result type for ASIC operations
pub type AsicResult<T> = Result<T, AsicError>;

/// Error type conveying additional information about ASIC errors
#[derive(Error, Debug)]
pub enum AsicError {
    /// Error reported by the SDE.  This will report both the location in the
    /// ASIC layer that detected the error, the raw SDE status code, and the
    /// detailed error message from the SDE.
    #[error("SDE error at {ctx}: {err} ({code})")]
    SdeError { ctx: String, code: i32, err: String },
    /// An argument passed to the ASIC layer is invalid or inappropriate.  This
    /// indicates misbehavior from the caller.
    #[error("Invalid argument: {}", .0)]
    InvalidArg(String),
    /// This operation is unsupported by the ASIC model being used
    #[error("Operation unsupported by the ASIC")]
    OperationUnsupported,
    /// The table does not advertise the requested table operation
    #[error("Table {} does not support {}", .0, .1)]
    SyncUnsupported(u32, TableOperation),
    /// An asynchronous table operation did not complete before its deadline
    #[error("Timed out waiting for {}", .0)]
    Timeout(String),
    /// The ASIC layer detected some internal inconsistency
    #[error("Internal error: {}",.0)]
    Internal(String),
    /// The ASIC encountered an error when interacting with the local file
    /// system.
    #[error("IO error: {ctx}: {err}")]
    Io { ctx: String, err: std::io::Error },
    /// Failed to find the P4 artifacts
    #[error("Failed to find P4 artifacts: {}", .0)]
    P4Missing(String),
    /// An error derived from a purposely triggered synthetic fault for testing
    /// purposes.
    #[error("Synthetic ASIC error: {}", .0)]
    Synthetic(String),
    /// A general indication that a caller is trying to create something that
    /// already exists.
    #[error("Already exists")]
    Exists,
    /// A general indication that a caller is trying to modify something that
    /// is not present.
    #[error("Missing: {}", .0)]
    Missing(String),
}

/// A key object for a single table.  Fields are addressed by the SDK field
/// ids found in the table's [`TableInfo`].
pub trait SdeKey: Send {
    /// The id of the table this key was allocated for
    fn table_id(&self) -> u32;
    fn set_value(&mut self, field_id: u32, value: KeyFieldValue)
        -> AsicResult<()>;
    /// Returns the value of a key field.  Fields that were never set report
    /// [`AsicError::Missing`].
    fn get_value(&self, field_id: u32) -> AsicResult<KeyFieldValue>;
}

/// A data object for a single table, optionally bound to an action.
pub trait SdeData: Send {
    fn table_id(&self) -> u32;
    fn action_id(&self) -> Option<u32>;
    /// Drop every field and rebind the object to `action_id`.
    fn reset(&mut self, action_id: Option<u32>);
    fn set_value(&mut self, field_id: u32, value: DataValue) -> AsicResult<()>;
    fn get_value(&self, field_id: u32) -> AsicResult<DataValue>;
    /// The ids of all fields currently carrying a value, in ascending order.
    fn field_ids(&self) -> Vec<u32>;
}

/// Invoked by the SDK when an asynchronous table operation has finished.
pub type OperationDone = Box<dyn FnOnce() + Send>;

/// The `SdeOps` trait is the whole of the contract between the table
/// programming layer and the vendor SDK.  Every table is identified by the id
/// the SDK assigned to it.  Sessions are not exposed: each call is its own
/// transaction, and an implementation that needs a session handle manages one
/// internally.
pub trait SdeOps: Send + Sync {
    type Key: SdeKey;
    type Data: SdeData;

    /// Metadata for every table in the loaded pipeline
    fn tables(&self) -> Vec<Arc<TableInfo>>;
    /// Metadata for one table
    fn table_info(&self, table_id: u32) -> AsicResult<Arc<TableInfo>>;

    fn key_allocate(&self, table_id: u32) -> AsicResult<Self::Key>;
    fn data_allocate(
        &self,
        table_id: u32,
        action_id: Option<u32>,
    ) -> AsicResult<Self::Data>;

    fn entry_add(
        &self,
        target: &Target,
        key: &Self::Key,
        data: &Self::Data,
    ) -> AsicResult<()>;
    fn entry_mod(
        &self,
        target: &Target,
        key: &Self::Key,
        data: &Self::Data,
    ) -> AsicResult<()>;
    fn entry_del(&self, target: &Target, key: &Self::Key) -> AsicResult<()>;
    fn entry_get(
        &self,
        target: &Target,
        key: &Self::Key,
    ) -> AsicResult<Self::Data>;
    /// Returns the first entry of the table in the SDK's iteration order.
    fn entry_get_first(
        &self,
        target: &Target,
        table_id: u32,
    ) -> AsicResult<(Self::Key, Self::Data)>;
    /// Returns up to `n` entries following `key`.
    fn entry_get_next_n(
        &self,
        target: &Target,
        key: &Self::Key,
        n: usize,
    ) -> AsicResult<Vec<(Self::Key, Self::Data)>>;

    fn table_clear(&self, target: &Target, table_id: u32) -> AsicResult<()>;
    /// The number of entries currently installed
    fn table_usage(&self, target: &Target, table_id: u32) -> AsicResult<usize>;
    /// The capacity of the table
    fn table_size(&self, target: &Target, table_id: u32) -> AsicResult<usize>;

    fn default_entry_set(
        &self,
        target: &Target,
        table_id: u32,
        data: &Self::Data,
    ) -> AsicResult<()>;
    fn default_entry_reset(
        &self,
        target: &Target,
        table_id: u32,
    ) -> AsicResult<()>;
    fn default_entry_get(
        &self,
        target: &Target,
        table_id: u32,
    ) -> AsicResult<Self::Data>;

    fn operations_supported(
        &self,
        table_id: u32,
    ) -> AsicResult<Vec<TableOperation>>;
    /// Start an asynchronous table operation.  `done` is called exactly once
    /// when the operation completes, possibly before this call returns.
    fn operation_execute(
        &self,
        target: &Target,
        table_id: u32,
        op: TableOperation,
        done: OperationDone,
    ) -> AsicResult<()>;

    /// The device port id of the PCIe CPU port
    fn cpu_port(&self, device: u32) -> AsicResult<u32>;
    /// Map a front-panel port to its device port id
    fn port_id_from_port_key(
        &self,
        device: u32,
        key: &PortKey,
    ) -> AsicResult<u32>;
}
