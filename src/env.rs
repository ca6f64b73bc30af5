//! Environment handle abstraction
//!
//! `Env` wraps the host's [`Boundary`] for the duration of one registration or
//! one invocation. It carries the pending-exception flag explicitly: once the
//! host reports a pending exception (or native code throws), every further
//! boundary call through this `Env` fails fast with
//! [`BridgeError::PendingException`] instead of reaching the host.

use tracing::trace;

use crate::boundary::{Boundary, BoundaryResult, Status};
use crate::error::{BridgeError, BridgeResult};
use crate::value::EnvId;

pub struct Env<'a> {
    raw: &'a mut dyn Boundary,
    pending_exception: bool,
}

impl<'a> Env<'a> {
    /// Wrap the boundary handed to a registrar or callback
    pub fn new(raw: &'a mut dyn Boundary) -> Self {
        let pending_exception = raw.is_exception_pending();
        Env {
            raw,
            pending_exception,
        }
    }

    #[inline]
    pub fn id(&self) -> EnvId {
        self.raw.env_id()
    }

    /// Contract version implemented by the host
    #[inline]
    pub fn version(&self) -> u32 {
        self.raw.version()
    }

    /// Whether a host exception is in flight
    #[inline]
    pub fn is_exception_pending(&self) -> bool {
        self.pending_exception
    }

    /// Escape hatch to the unchecked boundary
    pub fn raw(&mut self) -> &mut dyn Boundary {
        &mut *self.raw
    }

    /// Run one boundary operation, guarding the pending-exception flag
    pub(crate) fn call<T, F>(&mut self, op: F) -> BridgeResult<T>
    where
        F: FnOnce(&mut (dyn Boundary + 'a)) -> BoundaryResult<T>,
    {
        if self.pending_exception {
            return Err(BridgeError::PendingException);
        }
        op(&mut *self.raw).map_err(|status| self.lift(status))
    }

    /// Same as [`Env::call`] for read-only operations
    pub(crate) fn read<T, F>(&mut self, op: F) -> BridgeResult<T>
    where
        F: FnOnce(&(dyn Boundary + 'a)) -> BoundaryResult<T>,
    {
        if self.pending_exception {
            return Err(BridgeError::PendingException);
        }
        op(&*self.raw).map_err(|status| self.lift(status))
    }

    /// Record that an exception is now pending
    pub(crate) fn mark_pending(&mut self) {
        self.pending_exception = true;
    }

    fn lift(&mut self, status: Status) -> BridgeError {
        if status == Status::PendingException {
            trace!(env = %self.id(), "boundary reported a pending exception");
            self.pending_exception = true;
        }
        BridgeError::from(status)
    }
}

impl std::fmt::Debug for Env<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Env")
            .field("id", &self.id())
            .field("pending_exception", &self.pending_exception)
            .finish()
    }
}
