// SPDX-License-Identifier: MPL-2.0

//! Concurrency envelope: global per-process serialization of requests;
//! user-buffer pinning lifecycle.
//!
//! Built on a standard mutex and condition variable, with the `NO_LOCK`
//! opt-out living on the `Request` as a flag that suppresses only the
//! user-buffer pinning transition, never the mutex itself.

use std::sync::{Condvar, Mutex};

use crate::error::Result;
use crate::request::Request;

struct EnvelopeState {
    locked: bool,
    waiters: bool,
    wait_count: u64,
}

/// The process-wide serialization object gating one Request at a time.
pub struct Envelope {
    state: Mutex<EnvelopeState>,
    condvar: Condvar,
}

impl Envelope {
    pub fn new() -> Envelope {
        Envelope {
            state: Mutex::new(EnvelopeState {
                locked: false,
                waiters: false,
                wait_count: 0,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Runs `f` (the dispatcher's `root` call) inside the envelope's
    /// critical section, then unpins any user buffer the call pinned and
    /// wakes one waiter.
    pub fn run<T>(&self, req: &mut Request, f: impl FnOnce(&mut Request) -> Result<T>) -> Result<T> {
        {
            let mut state = self.state.lock().unwrap();
            while state.locked {
                state.waiters = true;
                state = self.condvar.wait(state).unwrap();
                state.wait_count += 1;
            }
            state.locked = true;
        }

        let result = f(req);
        req.unpin_if_needed();

        {
            let mut state = self.state.lock().unwrap();
            state.locked = false;
            if state.waiters {
                state.waiters = false;
                self.condvar.notify_one();
            }
        }

        result
    }
}

impl Default for Envelope {
    fn default() -> Self {
        Envelope::new()
    }
}
