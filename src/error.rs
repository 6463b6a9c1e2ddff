// SPDX-License-Identifier: MPL-2.0

//! Error taxonomy for the registry engine.

use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// Domain error kinds. These map onto a host's error codes at the syscall
/// boundary; the engine itself never depends on any particular numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Path does not resolve, or the sentinel `debug` always returns.
    NotFound,
    /// Path attempts to descend into a leaf.
    NotDir,
    /// Path terminates at an interior node with no handler.
    IsDir,
    /// Write to read-only, to a constant-backed int, or insufficient
    /// privilege.
    Perm,
    /// Bad arguments: unwritable constant, size mismatch, null context.
    Invalid,
    /// Textual name larger than the max path buffer.
    NameTooLong,
    /// Old-output buffer exhausted during a partial write.
    NoMemory,
    /// Context teardown aborted because some node could not be removed.
    Busy,
    /// Attempt to remove a non-empty interior node without `recurse`.
    NotEmpty,
    /// Handler requests dispatcher-level retry. Never escapes `root()`.
    Retry,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::NotFound => "no such registry entry",
            Error::NotDir => "path descends into a leaf",
            Error::IsDir => "path terminates at a handler-less interior node",
            Error::Perm => "permission denied",
            Error::Invalid => "invalid argument",
            Error::NameTooLong => "name exceeds the maximum path length",
            Error::NoMemory => "destination buffer exhausted",
            Error::Busy => "context teardown aborted: an entry could not be removed",
            Error::NotEmpty => "interior node has children and recurse was not requested",
            Error::Retry => "dispatcher retry requested",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for Error {}
