//! The boundary contract
//!
//! This is the fixed set of operations native code may use to talk to the
//! host runtime. The host implements it; the bridge only consumes it.
//!
//! Operations are grouped the way the host exposes them:
//! - Singletons and primitive constructors
//! - Readers (type tag, number, boolean, string copy)
//! - Object and array access
//! - Function calls and callback-info extraction
//! - Error signalling
//! - Resource lifetime extension (contract version 5 and later)

use std::fmt;

use crate::value::{CallbackData, CallbackInfo, EnvId, Value, ValueType};

/// Native function body invoked by the host
///
/// The host passes itself and an invocation token. Returning `None` yields
/// undefined (or propagates a pending exception).
pub type Callback = fn(env: &mut dyn Boundary, info: CallbackInfo) -> Option<Value>;

/// Called once when the host reclaims an object carrying a native pointer
pub type Finalize = fn(data: CallbackData, hint: CallbackData);

/// Result of a boundary operation
pub type BoundaryResult<T> = Result<T, Status>;

/// First contract version that supports finalizers
pub const FINALIZER_MIN_VERSION: u32 = 5;

/// Status codes reported by boundary operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum Status {
    #[error("invalid argument")]
    InvalidArg,
    #[error("an object was expected")]
    ObjectExpected,
    #[error("a string was expected")]
    StringExpected,
    #[error("a string key was expected")]
    NameExpected,
    #[error("a function was expected")]
    FunctionExpected,
    #[error("a number was expected")]
    NumberExpected,
    #[error("a boolean was expected")]
    BooleanExpected,
    #[error("an array was expected")]
    ArrayExpected,
    #[error("generic failure")]
    GenericFailure,
    #[error("an exception is pending")]
    PendingException,
    #[error("the environment is closed")]
    EnvironmentClosed,
    #[error("operation not supported by this contract version")]
    Unsupported,
}

impl Status {
    /// Stable error code surfaced to host scripts
    pub const fn code(self) -> &'static str {
        match self {
            Status::InvalidArg => "E_INVALID_ARG",
            Status::ObjectExpected => "E_OBJECT_EXPECTED",
            Status::StringExpected => "E_STRING_EXPECTED",
            Status::NameExpected => "E_NAME_EXPECTED",
            Status::FunctionExpected => "E_FUNCTION_EXPECTED",
            Status::NumberExpected => "E_NUMBER_EXPECTED",
            Status::BooleanExpected => "E_BOOLEAN_EXPECTED",
            Status::ArrayExpected => "E_ARRAY_EXPECTED",
            Status::GenericFailure => "E_GENERIC_FAILURE",
            Status::PendingException => "E_PENDING_EXCEPTION",
            Status::EnvironmentClosed => "E_ENVIRONMENT_CLOSED",
            Status::Unsupported => "E_UNSUPPORTED",
        }
    }
}

/// Error severities the host can construct and throw
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Error,
    TypeError,
    RangeError,
}

impl ErrorKind {
    /// Constructor name as seen by host scripts
    pub const fn name(self) -> &'static str {
        match self {
            ErrorKind::Error => "Error",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::RangeError => "RangeError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Property attribute bits
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct PropertyAttributes(u8);

impl PropertyAttributes {
    /// Read-only, hidden from enumeration, not reconfigurable
    pub const NONE: PropertyAttributes = PropertyAttributes(0);
    pub const WRITABLE: PropertyAttributes = PropertyAttributes(1 << 0);
    pub const ENUMERABLE: PropertyAttributes = PropertyAttributes(1 << 1);
    pub const CONFIGURABLE: PropertyAttributes = PropertyAttributes(1 << 2);
    /// What a plain assignment creates
    pub const DEFAULT: PropertyAttributes = PropertyAttributes(0b111);

    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn from_bits(bits: u8) -> Self {
        PropertyAttributes(bits & 0b111)
    }

    #[inline]
    pub const fn contains(self, other: PropertyAttributes) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn union(self, other: PropertyAttributes) -> Self {
        PropertyAttributes(self.0 | other.0)
    }

    #[inline]
    pub const fn is_writable(self) -> bool {
        self.contains(Self::WRITABLE)
    }

    #[inline]
    pub const fn is_enumerable(self) -> bool {
        self.contains(Self::ENUMERABLE)
    }
}

impl Default for PropertyAttributes {
    fn default() -> Self {
        PropertyAttributes::DEFAULT
    }
}

impl fmt::Debug for PropertyAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |set: bool, c: char| if set { c } else { '-' };
        write!(
            f,
            "PropertyAttributes({}{}{})",
            flag(self.is_writable(), 'w'),
            flag(self.is_enumerable(), 'e'),
            flag(self.contains(Self::CONFIGURABLE), 'c')
        )
    }
}

/// One entry of a batched property definition
#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
    pub name: String,
    pub value: Value,
    pub attributes: PropertyAttributes,
}

impl PropertyDescriptor {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        PropertyDescriptor {
            name: name.into(),
            value,
            attributes: PropertyAttributes::DEFAULT,
        }
    }

    pub fn with_attributes(mut self, attributes: PropertyAttributes) -> Self {
        self.attributes = attributes;
        self
    }
}

/// Outcome of copying a string into a caller buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringCopy {
    /// Bytes actually written
    pub written: usize,
    /// Bytes the full string needs
    pub required: usize,
}

impl StringCopy {
    #[inline]
    pub const fn is_truncated(self) -> bool {
        self.written < self.required
    }
}

/// Unpacked invocation data returned by [`Boundary::get_cb_info`]
#[derive(Debug, Clone, Copy)]
pub struct CallbackFrame {
    /// True number of arguments the caller supplied
    pub argc: usize,
    /// Call receiver
    pub this: Value,
    /// Context pointer registered with the callable
    pub data: CallbackData,
}

/// Operations the host runtime exposes to native code
///
/// All handles passed in must come from the same implementation instance.
/// Calls are synchronous and happen on the host's own thread.
pub trait Boundary {
    /// Contract version implemented by the host
    fn version(&self) -> u32;

    /// Environment this boundary serves
    fn env_id(&self) -> EnvId;

    // Singletons

    fn get_undefined(&mut self) -> BoundaryResult<Value>;
    fn get_null(&mut self) -> BoundaryResult<Value>;
    fn get_boolean(&mut self, value: bool) -> BoundaryResult<Value>;
    fn get_global(&mut self) -> BoundaryResult<Value>;

    // Constructors

    fn create_object(&mut self) -> BoundaryResult<Value>;
    fn create_array_with_length(&mut self, length: usize) -> BoundaryResult<Value>;
    fn create_double(&mut self, value: f64) -> BoundaryResult<Value>;
    /// Create a string from UTF-8 bytes of an explicit length
    fn create_string_utf8(&mut self, bytes: &[u8]) -> BoundaryResult<Value>;
    fn create_function(
        &mut self,
        name: &str,
        callback: Callback,
        data: CallbackData,
    ) -> BoundaryResult<Value>;
    /// Wrap a native pointer in an opaque host value
    fn create_external(&mut self, data: CallbackData) -> BoundaryResult<Value>;
    /// Create an error object; `code` must be a string handle if present
    fn create_error(
        &mut self,
        kind: ErrorKind,
        code: Option<Value>,
        message: Value,
    ) -> BoundaryResult<Value>;

    // Readers

    fn type_of(&self, value: Value) -> BoundaryResult<ValueType>;
    fn get_value_double(&self, value: Value) -> BoundaryResult<f64>;
    fn get_value_bool(&self, value: Value) -> BoundaryResult<bool>;
    fn get_value_external(&self, value: Value) -> BoundaryResult<CallbackData>;
    /// Copy up to `buf.len()` bytes of a string; a zero-size buffer probes the length
    fn get_value_string_utf8(&self, value: Value, buf: &mut [u8]) -> BoundaryResult<StringCopy>;

    // Object and array access

    fn set_property(&mut self, object: Value, key: Value, value: Value) -> BoundaryResult<()>;
    fn get_property(&mut self, object: Value, key: Value) -> BoundaryResult<Value>;
    fn has_property(&self, object: Value, key: Value) -> BoundaryResult<bool>;
    fn set_element(&mut self, object: Value, index: u32, value: Value) -> BoundaryResult<()>;
    fn get_element(&mut self, object: Value, index: u32) -> BoundaryResult<Value>;
    /// Array of the enumerable own keys of `object`
    fn get_property_names(&mut self, object: Value) -> BoundaryResult<Value>;
    fn define_properties(
        &mut self,
        object: Value,
        properties: &[PropertyDescriptor],
    ) -> BoundaryResult<()>;
    fn is_array(&self, value: Value) -> BoundaryResult<bool>;
    fn get_array_length(&self, value: Value) -> BoundaryResult<u32>;

    // Calls

    /// Invoke a callable synchronously; fails with `PendingException` if it threw
    fn call_function(
        &mut self,
        receiver: Value,
        function: Value,
        args: &[Value],
    ) -> BoundaryResult<Value>;

    /// Unpack an invocation; fills `argv` up to its length (padding with
    /// undefined) and reports the true argument count
    fn get_cb_info(&self, info: CallbackInfo, argv: &mut [Value]) -> BoundaryResult<CallbackFrame>;

    // Errors

    fn throw(&mut self, error: Value) -> BoundaryResult<()>;
    fn throw_error(&mut self, kind: ErrorKind, code: Option<&str>, message: &str)
    -> BoundaryResult<()>;
    fn is_error(&self, value: Value) -> BoundaryResult<bool>;
    fn is_exception_pending(&self) -> bool;
    /// Take the pending exception, or undefined if there is none
    fn get_and_clear_last_exception(&mut self) -> BoundaryResult<Value>;

    // Lifetime

    /// Run `finalize(data, hint)` when the host reclaims `object`
    ///
    /// Requires contract version [`FINALIZER_MIN_VERSION`] or later.
    fn add_finalizer(
        &mut self,
        object: Value,
        data: CallbackData,
        finalize: Finalize,
        hint: CallbackData,
    ) -> BoundaryResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attributes() {
        let attrs = PropertyAttributes::WRITABLE.union(PropertyAttributes::ENUMERABLE);
        assert!(attrs.is_writable());
        assert!(attrs.is_enumerable());
        assert!(!attrs.contains(PropertyAttributes::CONFIGURABLE));
        assert_eq!(PropertyAttributes::from_bits(0xff), PropertyAttributes::DEFAULT);
        assert_eq!(format!("{:?}", PropertyAttributes::NONE), "PropertyAttributes(---)");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(Status::InvalidArg.code(), "E_INVALID_ARG");
        assert_eq!(Status::PendingException.to_string(), "an exception is pending");
    }

    #[test]
    fn test_string_copy() {
        let copy = StringCopy { written: 3, required: 5 };
        assert!(copy.is_truncated());
        let copy = StringCopy { written: 5, required: 5 };
        assert!(!copy.is_truncated());
    }

    #[test]
    fn test_descriptor_defaults() {
        let desc = PropertyDescriptor::new("x", Value::from_raw(1));
        assert_eq!(desc.attributes, PropertyAttributes::DEFAULT);
        let desc = desc.with_attributes(PropertyAttributes::ENUMERABLE);
        assert!(!desc.attributes.is_writable());
    }
}
