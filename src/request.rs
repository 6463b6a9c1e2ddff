// SPDX-License-Identifier: MPL-2.0

//! Request: the per-call I/O cursor that mediates one access across the
//! trust boundary.
//!
//! Buffers are owned by the `Request` rather than borrowed through raw
//! pointers with a threaded lifetime. `new_input` is copied in once at
//! construction and `old_store` accumulates engine-side output as handlers
//! call `out`; the caller-facing truncation and cursor semantics are a pure
//! function of the total bytes written versus the buffer's declared
//! capacity, so this reproduces the expected observable behavior without
//! needing incremental writes into caller memory on every `out` call.

use std::sync::Arc;

use crate::error::{Error, Result};

/// Where a Request's envelope interaction currently stands. Distinct from
/// the per-call `pin_enabled` flag a `NO_LOCK` node traversal clears.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    None,
    Wanted,
    UserPinned,
}

/// Abstract capability validating and copying between engine memory and a
/// caller-owned buffer in untrusted user address space. An external
/// collaborator implements this; the engine only needs the contract.
pub trait UserSpaceAccess: Send + Sync {
    /// Makes the destination resident for the duration of a transfer.
    fn pin(&self) -> Result<()>;
    fn unpin(&self);
    /// Upfront check that `old` is writable and `new` is readable for the
    /// caller. Only the untrusted entry point calls this; `kernel-call`'s
    /// buffers are already engine memory.
    fn validate(&self, want_old: bool, want_new: bool) -> Result<()>;
}

/// Abstract capability for privilege checks: an external credentials
/// subsystem implements this.
pub trait CallerIdentity: Send + Sync {
    fn is_superuser(&self) -> bool;
    fn is_jailed(&self) -> bool;
    /// True when the process's security level forbids `SECURE` writes.
    fn security_level_elevated(&self) -> bool;
}

/// Caller-facing report of the old-output buffer after a top-level call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OldOutput {
    /// No old-output buffer was supplied for this call.
    None,
    /// Bytes reported to the caller: `old_len` on truncation, else the
    /// exact cursor.
    Sized(usize),
}

pub struct FinishResult {
    pub output: OldOutput,
    pub truncated: bool,
}

pub struct Request {
    pub caller: Arc<dyn CallerIdentity>,
    user_access: Option<Arc<dyn UserSpaceAccess>>,
    old_cap: Option<usize>,
    old_store: Vec<u8>,
    old_cursor: usize,
    new_input: Vec<u8>,
    new_cursor: usize,
    pub lock_state: LockState,
    /// Cleared by the resolver when it traverses a `NO_LOCK` node;
    /// suppresses the user-pin transition only, never the global envelope.
    pub pin_enabled: bool,
}

impl Request {
    pub fn new(
        caller: Arc<dyn CallerIdentity>,
        user_access: Option<Arc<dyn UserSpaceAccess>>,
        old_cap: Option<usize>,
        new_input: Vec<u8>,
    ) -> Request {
        let wants_pin = old_cap.is_some() && user_access.is_some();
        Request {
            caller,
            user_access,
            old_cap,
            old_store: Vec::new(),
            old_cursor: 0,
            new_input,
            new_cursor: 0,
            lock_state: if wants_pin {
                LockState::Wanted
            } else {
                LockState::None
            },
            pin_enabled: true,
        }
    }

    pub fn has_old_buffer(&self) -> bool {
        self.old_cap.is_some()
    }

    pub fn has_new_input(&self) -> bool {
        !self.new_input.is_empty()
    }

    pub fn new_remaining(&self) -> usize {
        self.new_input.len() - self.new_cursor
    }

    /// Appends `bytes` to the old-output buffer and advances `old_cursor` by
    /// the full length regardless of whether the declared capacity would be
    /// exceeded — the cursor must always reveal the required size.
    pub fn out(&mut self, bytes: &[u8]) -> Result<()> {
        if self.lock_state == LockState::Wanted && self.pin_enabled {
            if let Some(access) = &self.user_access {
                access.pin()?;
            }
            self.lock_state = LockState::UserPinned;
        }
        self.old_store.extend_from_slice(bytes);
        self.old_cursor += bytes.len();
        Ok(())
    }

    /// Consumes `dst.len()` bytes from the new-input buffer. Fails
    /// `INVALID` if insufficient input remains.
    pub fn in_(&mut self, dst: &mut [u8]) -> Result<()> {
        if self.new_remaining() < dst.len() {
            return Err(Error::Invalid);
        }
        let start = self.new_cursor;
        dst.copy_from_slice(&self.new_input[start..start + dst.len()]);
        self.new_cursor += dst.len();
        Ok(())
    }

    /// Bytes of new-input not yet consumed by `in_`.
    pub fn new_input_remaining(&self) -> &[u8] {
        &self.new_input[self.new_cursor..]
    }

    /// The bytes actually produced so far, truncated to the declared old
    /// capacity if one was given — what a boundary function copies into the
    /// caller's buffer.
    pub fn old_bytes(&self) -> &[u8] {
        match self.old_cap {
            Some(cap) if self.old_store.len() > cap => &self.old_store[..cap],
            _ => &self.old_store,
        }
    }

    /// The raw count of bytes handlers have written via `out` so far,
    /// independent of `old_cap` — the "old-cursor", distinct from the
    /// capacity-truncated report `finish` computes for the caller.
    pub fn old_cursor(&self) -> usize {
        self.old_cursor
    }

    pub fn unpin_if_needed(&mut self) {
        if self.lock_state == LockState::UserPinned {
            if let Some(access) = &self.user_access {
                access.unpin();
            }
            self.lock_state = LockState::None;
        }
    }

    /// Computes the caller-facing cursor report.
    pub fn finish(&self) -> FinishResult {
        match self.old_cap {
            None => FinishResult {
                output: OldOutput::None,
                truncated: false,
            },
            Some(cap) => {
                if self.old_cursor > cap {
                    FinishResult {
                        output: OldOutput::Sized(cap),
                        truncated: true,
                    }
                } else {
                    FinishResult {
                        output: OldOutput::Sized(self.old_cursor),
                        truncated: false,
                    }
                }
            }
        }
    }
}
