//! Opaque handles exchanged across the boundary
//!
//! A `Value` names one host-runtime value. It is a single machine word that
//! native code never looks inside: every read or write goes through a
//! [`Boundary`](crate::boundary::Boundary) operation.
//!
//! # Handle encoding (64-bit)
//! - Bits 0-31: slot index inside the owning environment's handle table
//! - Bits 32-63: id of the owning environment
//!
//! The encoding is only meaningful to the boundary implementation that minted
//! the handle. The bridge itself only compares handles and passes them back.

use std::ffi::c_void;
use std::fmt;

/// Identifier of one loaded-module execution context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct EnvId(pub u32);

impl fmt::Display for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "env#{}", self.0)
    }
}

/// Opaque handle to one host-runtime value
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Value(u64);

impl Value {
    /// Number of bits used for the slot index
    const SLOT_BITS: u32 = 32;

    /// Build a handle from an environment id and a slot index
    #[inline]
    pub const fn from_parts(env: EnvId, slot: u32) -> Self {
        Value(((env.0 as u64) << Self::SLOT_BITS) | slot as u64)
    }

    /// Rebuild a handle from its raw word
    ///
    /// Intended for boundary implementations that store handles outside of
    /// this type.
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Value(raw)
    }

    /// Get the raw word
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Environment that minted this handle
    #[inline]
    pub const fn env(self) -> EnvId {
        EnvId((self.0 >> Self::SLOT_BITS) as u32)
    }

    /// Slot index inside the owning environment
    #[inline]
    pub const fn slot(self) -> u32 {
        self.0 as u32
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value({}:{})", self.env().0, self.slot())
    }
}

/// Runtime-observed type of a value
///
/// This is the only dispatch point native code gets: switch on the tag
/// instead of assuming a shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Undefined,
    Null,
    Boolean,
    Number,
    String,
    Object,
    Function,
    External,
}

impl ValueType {
    /// Name as reported by the host's `typeof`-style introspection
    pub const fn name(self) -> &'static str {
        match self {
            ValueType::Undefined => "undefined",
            ValueType::Null => "null",
            ValueType::Boolean => "boolean",
            ValueType::Number => "number",
            ValueType::String => "string",
            ValueType::Object => "object",
            ValueType::Function => "function",
            ValueType::External => "external",
        }
    }

    /// Check if this is null or undefined
    #[inline]
    pub const fn is_nullish(self) -> bool {
        matches!(self, ValueType::Null | ValueType::Undefined)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Opaque bundle handed to a native callback for one invocation
///
/// Only valid until the callback returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackInfo {
    env: EnvId,
    frame: u64,
}

impl CallbackInfo {
    /// Create a callback info token (boundary implementations only)
    #[inline]
    pub const fn new(env: EnvId, frame: u64) -> Self {
        CallbackInfo { env, frame }
    }

    /// Environment the invocation belongs to
    #[inline]
    pub const fn env(self) -> EnvId {
        self.env
    }

    /// Frame id assigned by the boundary
    #[inline]
    pub const fn frame(self) -> u64 {
        self.frame
    }
}

/// Native context pointer attached to a callable
///
/// The bridge stores and returns it but never dereferences or frees it;
/// its lifetime belongs to the native module.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct CallbackData(*mut c_void);

impl CallbackData {
    /// No context
    #[inline]
    pub const fn null() -> Self {
        CallbackData(std::ptr::null_mut())
    }

    /// Wrap a raw pointer
    #[inline]
    pub const fn from_ptr(ptr: *mut c_void) -> Self {
        CallbackData(ptr)
    }

    /// Get the raw pointer
    #[inline]
    pub const fn as_ptr(self) -> *mut c_void {
        self.0
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self.0.is_null()
    }
}

impl Default for CallbackData {
    fn default() -> Self {
        CallbackData::null()
    }
}

impl fmt::Debug for CallbackData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CallbackData({:p})", self.0)
    }
}
