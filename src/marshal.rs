//! Value Marshaller
//!
//! Converts native scalars and aggregates to and from host handles. The
//! primitive conversions are thin wrappers over boundary operations; the
//! `ToHost`/`FromHost` traits add the type checks native code relies on.
//!
//! Strings follow copy-into-buffer semantics: a copy into a fixed buffer
//! truncates at the buffer size and reports bytes written and bytes required.
//! Callers that need the whole string probe first with an empty buffer.

use crate::boundary::{PropertyDescriptor, Status, StringCopy};
use crate::env::Env;
use crate::error::{BridgeError, BridgeResult};
use crate::value::{CallbackData, Value, ValueType};

/// Length of a string passed to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrLen {
    /// Use exactly this many bytes
    Bytes(usize),
    /// Stop at the first NUL byte, or at the end of the slice
    NulTerminated,
}

/// Native values that can be turned into a host handle
pub trait ToHost {
    fn to_host(&self, env: &mut Env<'_>) -> BridgeResult<Value>;
}

/// Native values that can be read back from a host handle
pub trait FromHost: Sized {
    fn from_host(env: &mut Env<'_>, value: Value) -> BridgeResult<Self>;
}

impl<'a> Env<'a> {
    /// Convert a native value into a new handle
    pub fn to_host<T: ToHost + ?Sized>(&mut self, value: &T) -> BridgeResult<Value> {
        value.to_host(self)
    }

    /// Read a handle as a native value
    pub fn from_host<T: FromHost>(&mut self, value: Value) -> BridgeResult<T> {
        T::from_host(self, value)
    }

    pub fn get_undefined(&mut self) -> BridgeResult<Value> {
        self.call(|b| b.get_undefined())
    }

    pub fn get_null(&mut self) -> BridgeResult<Value> {
        self.call(|b| b.get_null())
    }

    pub fn get_global(&mut self) -> BridgeResult<Value> {
        self.call(|b| b.get_global())
    }

    /// Create a string from UTF-8 bytes
    ///
    /// Ill-formed UTF-8 is replaced, not rejected. An explicit length past the
    /// end of `bytes` is an invalid argument.
    pub fn create_string(&mut self, bytes: &[u8], len: StrLen) -> BridgeResult<Value> {
        let bytes = match len {
            StrLen::Bytes(n) => bytes.get(..n).ok_or(BridgeError::Boundary(Status::InvalidArg))?,
            StrLen::NulTerminated => {
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                &bytes[..end]
            }
        };
        self.call(|b| b.create_string_utf8(bytes))
    }

    /// Copy a string into `buf`, truncating at its size
    pub fn copy_string(&mut self, value: Value, buf: &mut [u8]) -> BridgeResult<StringCopy> {
        self.expect_type(value, ValueType::String)?;
        self.read(|b| b.get_value_string_utf8(value, buf))
    }

    /// Byte length of a string (zero-size probe)
    pub fn string_length(&mut self, value: Value) -> BridgeResult<usize> {
        Ok(self.copy_string(value, &mut [])?.required)
    }

    /// Copy a string that must fit in `buf`
    ///
    /// The copy still happens when it does not fit; the error reports how
    /// much was written and how much is needed.
    pub fn copy_string_exact(&mut self, value: Value, buf: &mut [u8]) -> BridgeResult<usize> {
        let copy = self.copy_string(value, buf)?;
        if copy.is_truncated() {
            return Err(BridgeError::BufferTooSmall {
                required: copy.required,
                written: copy.written,
            });
        }
        Ok(copy.written)
    }

    pub fn make_object(&mut self) -> BridgeResult<Value> {
        self.call(|b| b.create_object())
    }

    /// Create an array; `length` is a starting size, not a bound
    pub fn make_array(&mut self, length: usize) -> BridgeResult<Value> {
        self.call(|b| b.create_array_with_length(length))
    }

    pub fn set_property(&mut self, object: Value, key: Value, value: Value) -> BridgeResult<()> {
        self.call(|b| b.set_property(object, key, value))
    }

    pub fn get_property(&mut self, object: Value, key: Value) -> BridgeResult<Value> {
        self.call(|b| b.get_property(object, key))
    }

    pub fn has_property(&mut self, object: Value, key: Value) -> BridgeResult<bool> {
        self.read(|b| b.has_property(object, key))
    }

    pub fn set_named_property(&mut self, object: Value, name: &str, value: Value) -> BridgeResult<()> {
        let key = self.to_host(name)?;
        self.set_property(object, key, value)
    }

    pub fn get_named_property(&mut self, object: Value, name: &str) -> BridgeResult<Value> {
        let key = self.to_host(name)?;
        self.get_property(object, key)
    }

    pub fn set_element(&mut self, object: Value, index: u32, value: Value) -> BridgeResult<()> {
        self.call(|b| b.set_element(object, index, value))
    }

    pub fn get_element(&mut self, object: Value, index: u32) -> BridgeResult<Value> {
        self.call(|b| b.get_element(object, index))
    }

    /// Array of the enumerable own keys of `object`
    pub fn enumerate_keys(&mut self, object: Value) -> BridgeResult<Value> {
        self.call(|b| b.get_property_names(object))
    }

    /// Keys of `object` as native strings
    pub fn keys(&mut self, object: Value) -> BridgeResult<Vec<String>> {
        let names = self.enumerate_keys(object)?;
        self.from_host(names)
    }

    pub fn define_properties(
        &mut self,
        object: Value,
        properties: &[PropertyDescriptor],
    ) -> BridgeResult<()> {
        self.call(|b| b.define_properties(object, properties))
    }

    pub fn type_of(&mut self, value: Value) -> BridgeResult<ValueType> {
        self.read(|b| b.type_of(value))
    }

    pub fn is_array(&mut self, value: Value) -> BridgeResult<bool> {
        self.read(|b| b.is_array(value))
    }

    pub fn get_array_length(&mut self, value: Value) -> BridgeResult<u32> {
        if !self.is_array(value)? {
            let found = self.type_of(value)?;
            if found == ValueType::Object {
                return Err(BridgeError::Boundary(Status::ArrayExpected));
            }
            return Err(BridgeError::TypeMismatch {
                expected: ValueType::Object,
                found,
            });
        }
        self.read(|b| b.get_array_length(value))
    }

    /// Wrap a native pointer in an opaque host value
    pub fn make_external(&mut self, data: CallbackData) -> BridgeResult<Value> {
        self.call(|b| b.create_external(data))
    }

    /// Pointer stored in an external value
    pub fn external_data(&mut self, value: Value) -> BridgeResult<CallbackData> {
        self.expect_type(value, ValueType::External)?;
        self.read(|b| b.get_value_external(value))
    }

    /// Fail with `TypeMismatch` unless `value` has type `expected`
    pub fn expect_type(&mut self, value: Value, expected: ValueType) -> BridgeResult<()> {
        let found = self.type_of(value)?;
        if found != expected {
            return Err(BridgeError::TypeMismatch { expected, found });
        }
        Ok(())
    }
}

impl ToHost for Value {
    fn to_host(&self, _env: &mut Env<'_>) -> BridgeResult<Value> {
        Ok(*self)
    }
}

impl FromHost for Value {
    fn from_host(_env: &mut Env<'_>, value: Value) -> BridgeResult<Self> {
        Ok(value)
    }
}

impl ToHost for () {
    fn to_host(&self, env: &mut Env<'_>) -> BridgeResult<Value> {
        env.get_undefined()
    }
}

impl ToHost for bool {
    fn to_host(&self, env: &mut Env<'_>) -> BridgeResult<Value> {
        let value = *self;
        env.call(|b| b.get_boolean(value))
    }
}

impl FromHost for bool {
    fn from_host(env: &mut Env<'_>, value: Value) -> BridgeResult<Self> {
        env.expect_type(value, ValueType::Boolean)?;
        env.read(|b| b.get_value_bool(value))
    }
}

impl ToHost for f64 {
    fn to_host(&self, env: &mut Env<'_>) -> BridgeResult<Value> {
        let value = *self;
        env.call(|b| b.create_double(value))
    }
}

impl FromHost for f64 {
    fn from_host(env: &mut Env<'_>, value: Value) -> BridgeResult<Self> {
        env.expect_type(value, ValueType::Number)?;
        env.read(|b| b.get_value_double(value))
    }
}

impl ToHost for i32 {
    fn to_host(&self, env: &mut Env<'_>) -> BridgeResult<Value> {
        f64::from(*self).to_host(env)
    }
}

impl ToHost for u32 {
    fn to_host(&self, env: &mut Env<'_>) -> BridgeResult<Value> {
        f64::from(*self).to_host(env)
    }
}

impl ToHost for str {
    fn to_host(&self, env: &mut Env<'_>) -> BridgeResult<Value> {
        env.create_string(self.as_bytes(), StrLen::Bytes(self.len()))
    }
}

impl ToHost for String {
    fn to_host(&self, env: &mut Env<'_>) -> BridgeResult<Value> {
        self.as_str().to_host(env)
    }
}

impl FromHost for String {
    fn from_host(env: &mut Env<'_>, value: Value) -> BridgeResult<Self> {
        let len = env.string_length(value)?;
        let mut buf = vec![0u8; len];
        env.copy_string_exact(value, &mut buf)?;
        // The host only stores valid UTF-8 and `buf` holds the whole string.
        String::from_utf8(buf).map_err(|_| BridgeError::Boundary(Status::StringExpected))
    }
}

impl<T: ToHost + ?Sized> ToHost for &T {
    fn to_host(&self, env: &mut Env<'_>) -> BridgeResult<Value> {
        (**self).to_host(env)
    }
}

impl<T: ToHost> ToHost for Option<T> {
    fn to_host(&self, env: &mut Env<'_>) -> BridgeResult<Value> {
        match self {
            Some(value) => value.to_host(env),
            None => env.get_null(),
        }
    }
}

impl<T: FromHost> FromHost for Option<T> {
    fn from_host(env: &mut Env<'_>, value: Value) -> BridgeResult<Self> {
        if env.type_of(value)?.is_nullish() {
            return Ok(None);
        }
        T::from_host(env, value).map(Some)
    }
}

impl<T: ToHost> ToHost for [T] {
    fn to_host(&self, env: &mut Env<'_>) -> BridgeResult<Value> {
        let array = env.make_array(self.len())?;
        for (index, item) in self.iter().enumerate() {
            let item = item.to_host(env)?;
            env.set_element(array, index as u32, item)?;
        }
        Ok(array)
    }
}

impl<T: ToHost> ToHost for Vec<T> {
    fn to_host(&self, env: &mut Env<'_>) -> BridgeResult<Value> {
        self.as_slice().to_host(env)
    }
}

impl<T: FromHost> FromHost for Vec<T> {
    fn from_host(env: &mut Env<'_>, value: Value) -> BridgeResult<Self> {
        let len = env.get_array_length(value)?;
        let mut items = Vec::with_capacity(len as usize);
        for index in 0..len {
            let item = env.get_element(value, index)?;
            items.push(T::from_host(env, item)?);
        }
        Ok(items)
    }
}

/// Marshal a struct as a host object, one property per field
///
/// Each field maps to a property of the same name, or to the name given
/// after `=`. Fields convert with their own `ToHost`/`FromHost`, so a
/// missing property fails with `TypeMismatch` unless the field is an
/// `Option`.
///
/// ```ignore
/// struct DisplayMode {
///     width: f64,
///     refresh_rate: Option<f64>,
/// }
///
/// napi_bridge::host_object!(DisplayMode { width, refresh_rate = "refreshRate" });
/// ```
#[macro_export]
macro_rules! host_object {
    (@key $field:ident) => {
        stringify!($field)
    };
    (@key $field:ident $key:literal) => {
        $key
    };
    ($ty:ident { $($field:ident $(= $key:literal)?),+ $(,)? }) => {
        impl $crate::marshal::ToHost for $ty {
            fn to_host(
                &self,
                env: &mut $crate::env::Env<'_>,
            ) -> $crate::error::BridgeResult<$crate::value::Value> {
                let object = env.make_object()?;
                $(
                    let value = env.to_host(&self.$field)?;
                    env.set_named_property(object, $crate::host_object!(@key $field $($key)?), value)?;
                )+
                Ok(object)
            }
        }

        impl $crate::marshal::FromHost for $ty {
            fn from_host(
                env: &mut $crate::env::Env<'_>,
                value: $crate::value::Value,
            ) -> $crate::error::BridgeResult<Self> {
                env.expect_type(value, $crate::value::ValueType::Object)?;
                Ok($ty {
                    $(
                        $field: {
                            let field = env.get_named_property(value, $crate::host_object!(@key $field $($key)?))?;
                            env.from_host(field)?
                        },
                    )+
                })
            }
        }
    };
}
