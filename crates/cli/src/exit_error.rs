// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Custom error type that carries a process exit code.
//!
//! Commands return `ExitError` instead of calling `std::process::exit()`
//! directly, letting `main()` decide process termination in one place.

use std::fmt;

#[derive(Debug)]
pub struct ExitError {
    pub code: i32,
    pub message: String,
}

impl ExitError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    /// Maps a fast-plane `RpcError.code` string to a process exit code,
    /// mirroring the spec's HTTP-status mapping (`spec.md` §9) without a
    /// literal HTTP layer: not-found and validation failures are a
    /// different exit code than a deadline or a lost connection, so
    /// scripts can branch on `$?`.
    pub fn from_rpc(code: &str, message: impl Into<String>) -> Self {
        let exit_code = match code {
            "NOT_FOUND" => 2,
            "VALIDATION_ERROR" => 3,
            "TIMEOUT" => 4,
            "NOT_READY" | "DEPENDENCY_MISSING" => 5,
            "RATE_LIMITED" => 6,
            _ => 1,
        };
        Self::new(exit_code, message)
    }
}

impl fmt::Display for ExitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ExitError {}
