// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Status codes returned by the SDE.

use crate::AsicError;
use crate::AsicResult;

#[allow(non_camel_case_types)]
pub type bf_status_t = i32;

pub const BF_SUCCESS: bf_status_t = 0;
pub const BF_NOT_READY: bf_status_t = 1;
pub const BF_NO_SYS_RESOURCES: bf_status_t = 2;
pub const BF_INVALID_ARG: bf_status_t = 3;
pub const BF_ALREADY_EXISTS: bf_status_t = 4;
pub const BF_HW_COMM_FAIL: bf_status_t = 5;
pub const BF_OBJECT_NOT_FOUND: bf_status_t = 6;
pub const BF_MAX_SESSIONS_EXCEEDED: bf_status_t = 7;
pub const BF_SESSION_NOT_FOUND: bf_status_t = 8;
pub const BF_NO_SPACE: bf_status_t = 9;
pub const BF_EAGAIN: bf_status_t = 10;
pub const BF_INIT_ERROR: bf_status_t = 11;
pub const BF_TXN_NOT_SUPPORTED: bf_status_t = 12;
pub const BF_TABLE_LOCKED: bf_status_t = 13;
pub const BF_IO: bf_status_t = 14;
pub const BF_UNEXPECTED: bf_status_t = 15;
pub const BF_ENTRY_REFERENCES_EXIST: bf_status_t = 16;
pub const BF_NOT_SUPPORTED: bf_status_t = 17;
pub const BF_HW_UPDATE_FAILED: bf_status_t = 18;
pub const BF_NO_LEARN_CLIENTS: bf_status_t = 19;
pub const BF_IDLE_UPDATE_IN_PROGRESS: bf_status_t = 20;
pub const BF_DEVICE_LOCKED: bf_status_t = 21;
pub const BF_INTERNAL_ERROR: bf_status_t = 22;
pub const BF_TABLE_NOT_FOUND: bf_status_t = 23;
pub const BF_IN_USE: bf_status_t = 24;
pub const BF_NOT_IMPLEMENTED: bf_status_t = 25;

pub fn bf_error_str(err: bf_status_t) -> String {
    match err {
        BF_SUCCESS => "Success".to_string(),
        BF_NOT_READY => "Not ready".to_string(),
        BF_NO_SYS_RESOURCES => "No system resources".to_string(),
        BF_INVALID_ARG => "Invalid arguments".to_string(),
        BF_ALREADY_EXISTS => "Already exists".to_string(),
        BF_HW_COMM_FAIL => "HW access fails".to_string(),
        BF_OBJECT_NOT_FOUND => "Object not found".to_string(),
        BF_MAX_SESSIONS_EXCEEDED => "Max sessions exceeded".to_string(),
        BF_SESSION_NOT_FOUND => "Session not found".to_string(),
        BF_NO_SPACE => "Not enough space".to_string(),
        BF_EAGAIN => {
            "Resource temporarily not available, try again later".to_string()
        }
        BF_INIT_ERROR => "Initialization error".to_string(),
        BF_TXN_NOT_SUPPORTED => "Not supported in transaction".to_string(),
        BF_TABLE_LOCKED => "Resource held by another session".to_string(),
        BF_IO => "IO error".to_string(),
        BF_UNEXPECTED => "Unexpected error".to_string(),
        BF_ENTRY_REFERENCES_EXIST => {
            "Action data entry is being referenced by match entries".to_string()
        }
        BF_NOT_SUPPORTED => "Operation not supported".to_string(),
        BF_HW_UPDATE_FAILED => "Updating hardware failed".to_string(),
        BF_NO_LEARN_CLIENTS => "No learning clients registered".to_string(),
        BF_IDLE_UPDATE_IN_PROGRESS => {
            "Idle time update state already in progress".to_string()
        }
        BF_DEVICE_LOCKED => "Device locked".to_string(),
        BF_INTERNAL_ERROR => "Internal error".to_string(),
        BF_TABLE_NOT_FOUND => "Table not found".to_string(),
        BF_IN_USE => "In use".to_string(),
        BF_NOT_IMPLEMENTED => "Object not implemented".to_string(),
        x => format!("unknown error: {x}"),
    }
}

/// Wrap a failed SDE status in an [`AsicError`].  The raw code is kept so
/// callers can map it onto their own error space.
pub fn sde_error(ctx: impl ToString, err: bf_status_t) -> AsicError {
    AsicError::SdeError {
        ctx: ctx.to_string(),
        code: err,
        err: bf_error_str(err),
    }
}

pub trait CheckError {
    fn check_error(&self, context: &str) -> AsicResult<()>;
}

impl CheckError for bf_status_t {
    fn check_error(&self, context: &str) -> AsicResult<()> {
        match *self {
            BF_SUCCESS => Ok(()),
            err => Err(sde_error(context, err)),
        }
    }
}
