//! Host object representation

use std::fmt;
use std::rc::Rc;

use crate::boundary::{Callback, ErrorKind};
use crate::value::{CallbackData, Value};

use super::array::DenseArray;
use super::environment::Environment;
use super::property::PropertyTable;

/// Host-implemented function body
///
/// Receives the receiver and arguments; `Err` carries the thrown value.
pub type ScriptFn = dyn Fn(&mut Environment, Value, &[Value]) -> Result<Value, Value>;

/// Object class
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassId {
    Object = 0,
    Array = 1,
    /// Native function registered through the boundary
    NativeFunction = 2,
    /// Function implemented by the host itself
    ScriptFunction = 3,
    Error = 4,
    TypeError = 5,
    RangeError = 6,
}

impl ClassId {
    #[inline]
    pub fn is_error(self) -> bool {
        matches!(self, ClassId::Error | ClassId::TypeError | ClassId::RangeError)
    }

    #[inline]
    pub fn is_function(self) -> bool {
        matches!(self, ClassId::NativeFunction | ClassId::ScriptFunction)
    }

    pub fn for_error(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Error => ClassId::Error,
            ErrorKind::TypeError => ClassId::TypeError,
            ErrorKind::RangeError => ClassId::RangeError,
        }
    }
}

/// Class-specific payload
pub enum ObjectData {
    Plain,
    Array(DenseArray),
    Native {
        name: Box<str>,
        callback: Callback,
        data: CallbackData,
    },
    Script {
        name: Box<str>,
        body: Rc<ScriptFn>,
    },
    Error(ErrorKind),
}

impl fmt::Debug for ObjectData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectData::Plain => f.write_str("Plain"),
            ObjectData::Array(array) => write!(f, "Array(len={})", array.len()),
            ObjectData::Native { name, data, .. } => write!(f, "Native({name}, {data:?})"),
            ObjectData::Script { name, .. } => write!(f, "Script({name})"),
            ObjectData::Error(kind) => write!(f, "Error({kind})"),
        }
    }
}

#[derive(Debug)]
pub struct HostObject {
    pub properties: PropertyTable,
    pub data: ObjectData,
}

impl HostObject {
    pub fn new(data: ObjectData) -> Self {
        HostObject {
            properties: PropertyTable::new(),
            data,
        }
    }

    pub fn class_id(&self) -> ClassId {
        match &self.data {
            ObjectData::Plain => ClassId::Object,
            ObjectData::Array(_) => ClassId::Array,
            ObjectData::Native { .. } => ClassId::NativeFunction,
            ObjectData::Script { .. } => ClassId::ScriptFunction,
            ObjectData::Error(kind) => ClassId::for_error(*kind),
        }
    }

    #[inline]
    pub fn as_array(&self) -> Option<&DenseArray> {
        match &self.data {
            ObjectData::Array(array) => Some(array),
            _ => None,
        }
    }

    #[inline]
    pub fn as_array_mut(&mut self) -> Option<&mut DenseArray> {
        match &mut self.data {
            ObjectData::Array(array) => Some(array),
            _ => None,
        }
    }

    /// Function name, if this is callable
    pub fn function_name(&self) -> Option<&str> {
        match &self.data {
            ObjectData::Native { name, .. } | ObjectData::Script { name, .. } => Some(name),
            _ => None,
        }
    }
}
