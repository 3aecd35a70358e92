// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! General types used throughout p4hal.

use std::convert;
use std::fmt;

use aal::status::*;
use aal::{AsicError, DataValue, KeyFieldValue};
use strum::Display;

pub type HalResult<T> = Result<T, HalError>;

/// The broad class of a failure, as reported back to the P4Runtime client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ErrorKind {
    #[strum(serialize = "invalid parameter")]
    InvalidParam,
    #[strum(serialize = "not found")]
    NotFound,
    #[strum(serialize = "already exists")]
    AlreadyExists,
    #[strum(serialize = "unimplemented")]
    Unimplemented,
    #[strum(serialize = "internal error")]
    Internal,
    #[strum(serialize = "permission denied")]
    PermissionDenied,
    #[strum(serialize = "table full")]
    TableFull,
    #[strum(serialize = "operation timeout")]
    OperationTimeout,
    #[strum(serialize = "failed precondition")]
    FailedPrecondition,
}

/// The SDK objects involved in a failed table operation.  These are only
/// rendered when the error itself is displayed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    pub table_id: Option<u32>,
    pub key: Vec<(u32, KeyFieldValue)>,
    pub data: Vec<(u32, DataValue)>,
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(id) = self.table_id {
            write!(f, " table: {id}")?;
        }
        if !self.key.is_empty() {
            write!(f, " key: {{")?;
            for (id, v) in &self.key {
                write!(f, " {id}: {v:?}")?;
            }
            write!(f, " }}")?;
        }
        if !self.data.is_empty() {
            write!(f, " data: {{")?;
            for (id, v) in &self.data {
                write!(f, " {id}: {v:?}")?;
            }
            write!(f, " }}")?;
        }
        Ok(())
    }
}

fn describe(ctx: &Option<Box<ErrorContext>>) -> String {
    match ctx {
        Some(c) => format!(" ({})", c.to_string().trim_start()),
        None => String::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {msg}{}", describe(.ctx))]
pub struct HalError {
    pub kind: ErrorKind,
    pub msg: String,
    pub ctx: Option<Box<ErrorContext>>,
}

impl HalError {
    pub fn new(kind: ErrorKind, msg: impl ToString) -> Self {
        HalError {
            kind,
            msg: msg.to_string(),
            ctx: None,
        }
    }

    /// Attach the SDK objects of the failed operation.
    pub fn with_context(mut self, ctx: ErrorContext) -> Self {
        self.ctx = Some(Box::new(ctx));
        self
    }

    /// Prefix the message with the operation that was being attempted.
    pub fn during(mut self, what: impl fmt::Display) -> Self {
        self.msg = format!("{what}: {}", self.msg);
        self
    }
}

/// Build a [`HalError`] of the given kind from a format string.
#[macro_export]
macro_rules! hal_err {
    ($kind:ident, $($arg:tt)+) => {
        $crate::types::HalError::new(
            $crate::types::ErrorKind::$kind,
            format!($($arg)+),
        )
    };
}

/// Return early with a [`HalError`] unless `cond` holds.
#[macro_export]
macro_rules! hal_ensure {
    ($cond:expr, $kind:ident, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::hal_err!($kind, $($arg)+));
        }
    };
}

// The fixed mapping from SDE status codes onto the P4Runtime error space
fn status_kind(code: bf_status_t) -> ErrorKind {
    match code {
        BF_ALREADY_EXISTS => ErrorKind::AlreadyExists,
        BF_INVALID_ARG => ErrorKind::InvalidParam,
        BF_OBJECT_NOT_FOUND | BF_TABLE_NOT_FOUND => ErrorKind::NotFound,
        BF_NO_SYS_RESOURCES | BF_NO_SPACE => ErrorKind::TableFull,
        BF_NOT_SUPPORTED | BF_NOT_IMPLEMENTED => ErrorKind::Unimplemented,
        BF_NOT_READY | BF_IN_USE | BF_TABLE_LOCKED | BF_DEVICE_LOCKED => {
            ErrorKind::FailedPrecondition
        }
        _ => ErrorKind::Internal,
    }
}

impl convert::From<AsicError> for HalError {
    fn from(err: AsicError) -> Self {
        let kind = match &err {
            AsicError::SdeError { code, .. } => status_kind(*code),
            AsicError::InvalidArg(_) => ErrorKind::InvalidParam,
            AsicError::Missing(_) => ErrorKind::NotFound,
            AsicError::Exists => ErrorKind::AlreadyExists,
            AsicError::Timeout(_) => ErrorKind::OperationTimeout,
            AsicError::SyncUnsupported(..)
            | AsicError::OperationUnsupported => ErrorKind::Unimplemented,
            AsicError::Synthetic(_)
            | AsicError::Io { .. }
            | AsicError::P4Missing(_)
            | AsicError::Internal(_) => ErrorKind::Internal,
        };
        HalError::new(kind, err)
    }
}

impl convert::From<prost::DecodeError> for HalError {
    fn from(err: prost::DecodeError) -> Self {
        HalError::new(ErrorKind::InvalidParam, err)
    }
}
