//! In-process host environment
//!
//! `Environment` is a small host runtime that implements [`Boundary`]: it owns
//! a handle table, interns property names, runs native callables on its own
//! call stack and keeps at most one pending exception. One environment
//! serves one loaded module instance.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};

use tracing::{debug, trace, warn};

use crate::boundary::{
    Boundary, BoundaryResult, Callback, CallbackFrame, ErrorKind, FINALIZER_MIN_VERSION, Finalize,
    PropertyAttributes, PropertyDescriptor, Status, StringCopy,
};
use crate::config::HostConfig;
use crate::value::{CallbackData, CallbackInfo, EnvId, Value, ValueType};

use super::array::{DenseArray, MAX_ARRAY_LENGTH};
use super::atom::{AtomTable, array_index};
use super::heap::{Cell, Heap, SLOT_FALSE, SLOT_GLOBAL, SLOT_NULL, SLOT_TRUE, SLOT_UNDEFINED};
use super::object::{HostObject, ObjectData, ScriptFn};

static NEXT_ENV_ID: AtomicU32 = AtomicU32::new(1);

/// Nesting limit when rendering values
const DESCRIBE_DEPTH: usize = 2;

/// Live native invocation
#[derive(Debug)]
struct Frame {
    id: u64,
    this: Value,
    args: Vec<Value>,
    data: CallbackData,
}

struct FinalizerEntry {
    data: CallbackData,
    finalize: Finalize,
    hint: CallbackData,
}

enum Target {
    Native {
        name: Box<str>,
        callback: Callback,
        data: CallbackData,
    },
    Script {
        name: Box<str>,
        body: Rc<ScriptFn>,
    },
}

pub struct Environment {
    id: EnvId,
    config: HostConfig,
    heap: Heap,
    atoms: AtomTable,
    frames: Vec<Frame>,
    next_frame: u64,
    depth: usize,
    pending: Option<Value>,
    finalizers: Vec<FinalizerEntry>,
    closed: bool,
}

impl Environment {
    pub fn new(config: HostConfig) -> Self {
        let id = EnvId(NEXT_ENV_ID.fetch_add(1, Ordering::Relaxed));
        debug!(env = %id, version = config.boundary_version, "creating environment");
        Environment {
            id,
            config,
            heap: Heap::new(config.initial_heap_capacity, HostObject::new(ObjectData::Plain)),
            atoms: AtomTable::new(),
            frames: Vec::new(),
            next_frame: 1,
            depth: 0,
            pending: None,
            finalizers: Vec::new(),
            closed: false,
        }
    }

    #[inline]
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The undefined singleton
    #[inline]
    pub fn undefined(&self) -> Value {
        self.handle(SLOT_UNDEFINED)
    }

    /// Number of handles minted so far
    #[inline]
    pub fn handle_count(&self) -> usize {
        self.heap.len()
    }

    /// Register a host-implemented function
    pub fn create_script_function<F>(&mut self, name: &str, body: F) -> Value
    where
        F: Fn(&mut Environment, Value, &[Value]) -> Result<Value, Value> + 'static,
    {
        let data = ObjectData::Script {
            name: name.into(),
            body: Rc::new(body),
        };
        self.new_function(data, name)
    }

    /// Build an error object without throwing it
    pub fn new_error(&mut self, kind: ErrorKind, code: Option<&str>, message: &str) -> Value {
        let code = code.map(|code| self.alloc(Cell::String(code.into())));
        let message = self.alloc(Cell::String(message.into()));
        self.new_error_object(kind, code, message)
    }

    /// Release everything the environment owns
    ///
    /// Finalizers run in reverse attachment order, once. Every boundary
    /// operation fails with `EnvironmentClosed` afterwards.
    pub fn teardown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        debug!(env = %self.id, finalizers = self.finalizers.len(), "tearing down environment");

        while let Some(entry) = self.finalizers.pop() {
            let ran = catch_unwind(AssertUnwindSafe(|| (entry.finalize)(entry.data, entry.hint)));
            if let Err(payload) = ran {
                warn!(env = %self.id, panic = %panic_message(&*payload), "finalizer panicked");
            }
        }
        self.frames.clear();
        self.pending = None;
        self.heap.clear();
    }

    /// Render a value for display
    pub fn describe(&self, value: Value) -> String {
        let mut out = String::new();
        self.render(value, 0, &mut out);
        out
    }

    #[inline]
    fn handle(&self, slot: u32) -> Value {
        Value::from_parts(self.id, slot)
    }

    #[inline]
    fn ensure_open(&self) -> BoundaryResult<()> {
        if self.closed {
            return Err(Status::EnvironmentClosed);
        }
        Ok(())
    }

    fn cell(&self, value: Value) -> BoundaryResult<&Cell> {
        self.ensure_open()?;
        if value.env() != self.id {
            return Err(Status::InvalidArg);
        }
        self.heap.get(value.slot()).ok_or(Status::InvalidArg)
    }

    #[inline]
    fn check(&self, value: Value) -> BoundaryResult<()> {
        self.cell(value).map(|_| ())
    }

    fn object(&self, value: Value) -> BoundaryResult<&HostObject> {
        self.cell(value)?.as_object().ok_or(Status::ObjectExpected)
    }

    fn object_mut(&mut self, value: Value) -> BoundaryResult<&mut HostObject> {
        self.check(value)?;
        match self.heap.get_mut(value.slot()) {
            Some(Cell::Object(obj)) => Ok(obj),
            _ => Err(Status::ObjectExpected),
        }
    }

    fn key_name(&self, key: Value) -> BoundaryResult<String> {
        self.cell(key)?
            .as_str()
            .map(str::to_owned)
            .ok_or(Status::NameExpected)
    }

    #[inline]
    fn alloc(&mut self, cell: Cell) -> Value {
        let slot = self.heap.alloc(cell);
        self.handle(slot)
    }

    fn alloc_object(&mut self, object: HostObject) -> Value {
        self.alloc(Cell::Object(Box::new(object)))
    }

    /// Throw a fresh error and report the pending exception
    fn fail<T>(&mut self, kind: ErrorKind, message: &str) -> BoundaryResult<T> {
        let error = self.new_error(kind, None, message);
        self.pending = Some(error);
        Err(Status::PendingException)
    }

    fn new_function(&mut self, data: ObjectData, name: &str) -> Value {
        let name_value = self.alloc(Cell::String(name.into()));
        let key = self.atoms.intern("name");
        let mut function = HostObject::new(data);
        // A fresh table accepts any definition.
        let _ = function
            .properties
            .define(key, name_value, PropertyAttributes::CONFIGURABLE);
        self.alloc_object(function)
    }

    fn new_error_object(&mut self, kind: ErrorKind, code: Option<Value>, message: Value) -> Value {
        let hidden = PropertyAttributes::WRITABLE.union(PropertyAttributes::CONFIGURABLE);
        let name = self.alloc(Cell::String(kind.name().into()));
        let mut error = HostObject::new(ObjectData::Error(kind));
        let mut entries = vec![("name", name, hidden), ("message", message, hidden)];
        if let Some(code) = code {
            entries.push(("code", code, PropertyAttributes::DEFAULT));
        }
        for (key, value, attributes) in entries {
            let key = self.atoms.intern(key);
            let _ = error.properties.define(key, value, attributes);
        }
        self.alloc_object(error)
    }

    fn read_property(&mut self, object: Value, name: &str) -> BoundaryResult<Value> {
        let obj = self.object(object)?;
        if let Some(array) = obj.as_array() {
            if let Some(index) = array_index(name) {
                return Ok(array.get(index).unwrap_or(self.undefined()));
            }
            if name == "length" {
                let len = array.len();
                return Ok(self.alloc(Cell::Number(len as f64)));
            }
        }
        let value = self
            .atoms
            .find(name)
            .and_then(|key| obj.properties.get(key))
            .map(|prop| prop.value);
        Ok(value.unwrap_or(self.undefined()))
    }

    fn write_property(&mut self, object: Value, name: &str, value: Value) -> BoundaryResult<()> {
        self.check(value)?;
        if self.object(object)?.as_array().is_some() {
            if let Some(index) = array_index(name) {
                return self.write_element(object, index, value);
            }
            if name == "length" {
                return self.write_array_length(object, value);
            }
        }

        let key = self.atoms.intern(name);
        let written = self.object_mut(object)?.properties.set(key, value);
        if written.is_err() {
            return self.fail(
                ErrorKind::TypeError,
                &format!("Cannot assign to read only property '{name}'"),
            );
        }
        Ok(())
    }

    fn write_element(&mut self, object: Value, index: u32, value: Value) -> BoundaryResult<()> {
        if self.object(object)?.as_array().is_none() {
            return self.write_property(object, &index.to_string(), value);
        }
        let stored = self
            .object_mut(object)?
            .as_array_mut()
            .is_some_and(|array| array.set(index, value));
        if !stored {
            return self.fail(ErrorKind::RangeError, "Invalid array length");
        }
        Ok(())
    }

    fn write_array_length(&mut self, object: Value, value: Value) -> BoundaryResult<()> {
        let length = self.get_value_double(value)?;
        if length < 0.0 || length.fract() != 0.0 || length > MAX_ARRAY_LENGTH as f64 {
            return self.fail(ErrorKind::RangeError, "Invalid array length");
        }
        if let Some(array) = self.object_mut(object)?.as_array_mut() {
            array.set_length(length as u32);
        }
        Ok(())
    }

    fn invoke(&mut self, target: Target, receiver: Value, args: &[Value]) -> BoundaryResult<Value> {
        let frame = match &target {
            Target::Native { data, .. } => {
                let id = self.next_frame;
                self.next_frame += 1;
                self.frames.push(Frame {
                    id,
                    this: receiver,
                    args: args.to_vec(),
                    data: *data,
                });
                Some(id)
            }
            Target::Script { .. } => None,
        };
        let name = match &target {
            Target::Native { name, .. } | Target::Script { name, .. } => name.clone(),
        };
        trace!(env = %self.id, function = %name, argc = args.len(), depth = self.depth, "calling function");

        let outcome = catch_unwind(AssertUnwindSafe(|| match &target {
            Target::Native { callback, .. } => {
                let info = CallbackInfo::new(self.id, frame.unwrap_or_default());
                Ok((*callback)(self, info))
            }
            Target::Script { body, .. } => (**body)(self, receiver, args).map(Some),
        }));

        if let Some(id) = frame {
            if let Some(pos) = self.frames.iter().rposition(|f| f.id == id) {
                self.frames.truncate(pos);
            }
        }
        self.ensure_open()?;

        match outcome {
            Err(payload) => {
                let message = panic_message(&*payload);
                warn!(env = %self.id, function = %name, panic = %message, "native function panicked");
                if self.pending.is_none() {
                    let message = format!("native function '{name}' panicked: {message}");
                    let error = self.new_error(ErrorKind::Error, Some("E_PANIC"), &message);
                    self.pending = Some(error);
                }
                Err(Status::PendingException)
            }
            Ok(Err(thrown)) => {
                // An exception already unwinding wins over the value thrown with it.
                if self.pending.is_none() {
                    self.pending = Some(thrown);
                }
                Err(Status::PendingException)
            }
            Ok(Ok(_)) if self.pending.is_some() => Err(Status::PendingException),
            Ok(Ok(Some(result))) => {
                self.check(result)?;
                Ok(result)
            }
            Ok(Ok(None)) => Ok(self.undefined()),
        }
    }

    fn render(&self, value: Value, depth: usize, out: &mut String) {
        let Ok(cell) = self.cell(value) else {
            out.push_str("<invalid>");
            return;
        };
        match cell {
            Cell::Undefined => out.push_str("undefined"),
            Cell::Null => out.push_str("null"),
            Cell::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Cell::Number(n) => out.push_str(&format_number(*n)),
            Cell::String(s) => out.push_str(&format!("{s:?}")),
            Cell::External(data) => out.push_str(&format!("[External: {:p}]", data.as_ptr())),
            Cell::Object(obj) => self.render_object(obj, depth, out),
        }
    }

    fn render_object(&self, obj: &HostObject, depth: usize, out: &mut String) {
        let own = |name: &str| {
            self.atoms
                .find(name)
                .and_then(|key| obj.properties.get(key))
                .and_then(|prop| self.heap.get(prop.value.slot()))
                .and_then(Cell::as_str)
        };
        match &obj.data {
            ObjectData::Native { name, .. } | ObjectData::Script { name, .. } => {
                out.push_str(&format!("[Function: {name}]"));
            }
            ObjectData::Error(kind) => {
                out.push_str(&format!("{kind}: {}", own("message").unwrap_or_default()));
                if let Some(code) = own("code") {
                    out.push_str(&format!(" [{code}]"));
                }
            }
            ObjectData::Array(_) if depth > DESCRIBE_DEPTH => out.push_str("[Array]"),
            ObjectData::Array(array) => {
                out.push('[');
                for (i, item) in array.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.render(item, depth + 1, out);
                }
                out.push(']');
            }
            ObjectData::Plain if depth > DESCRIBE_DEPTH => out.push_str("[Object]"),
            ObjectData::Plain => {
                let mut first = true;
                out.push('{');
                for prop in obj.properties.iter().filter(|p| p.attributes().is_enumerable()) {
                    out.push_str(if first { " " } else { ", " });
                    first = false;
                    out.push_str(self.atoms.name(prop.key));
                    out.push_str(": ");
                    self.render(prop.value, depth + 1, out);
                }
                out.push_str(if first { "}" } else { " }" });
            }
        }
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("id", &self.id)
            .field("handles", &self.heap.len())
            .field("frames", &self.frames.len())
            .field("pending", &self.pending)
            .field("closed", &self.closed)
            .finish()
    }
}

impl Boundary for Environment {
    fn version(&self) -> u32 {
        self.config.boundary_version
    }

    fn env_id(&self) -> EnvId {
        self.id
    }

    fn get_undefined(&mut self) -> BoundaryResult<Value> {
        self.ensure_open()?;
        Ok(self.handle(SLOT_UNDEFINED))
    }

    fn get_null(&mut self) -> BoundaryResult<Value> {
        self.ensure_open()?;
        Ok(self.handle(SLOT_NULL))
    }

    fn get_boolean(&mut self, value: bool) -> BoundaryResult<Value> {
        self.ensure_open()?;
        Ok(self.handle(if value { SLOT_TRUE } else { SLOT_FALSE }))
    }

    fn get_global(&mut self) -> BoundaryResult<Value> {
        self.ensure_open()?;
        Ok(self.handle(SLOT_GLOBAL))
    }

    fn create_object(&mut self) -> BoundaryResult<Value> {
        self.ensure_open()?;
        Ok(self.alloc_object(HostObject::new(ObjectData::Plain)))
    }

    fn create_array_with_length(&mut self, length: usize) -> BoundaryResult<Value> {
        self.ensure_open()?;
        let length = u32::try_from(length)
            .ok()
            .filter(|&n| n <= MAX_ARRAY_LENGTH)
            .ok_or(Status::InvalidArg)?;
        let array = DenseArray::with_length(length, self.undefined());
        Ok(self.alloc_object(HostObject::new(ObjectData::Array(array))))
    }

    fn create_double(&mut self, value: f64) -> BoundaryResult<Value> {
        self.ensure_open()?;
        Ok(self.alloc(Cell::Number(value)))
    }

    fn create_string_utf8(&mut self, bytes: &[u8]) -> BoundaryResult<Value> {
        self.ensure_open()?;
        // Ill-formed sequences become U+FFFD.
        let s = String::from_utf8_lossy(bytes);
        Ok(self.alloc(Cell::String(s.into())))
    }

    fn create_function(&mut self, name: &str, callback: Callback, data: CallbackData) -> BoundaryResult<Value> {
        self.ensure_open()?;
        let payload = ObjectData::Native {
            name: name.into(),
            callback,
            data,
        };
        Ok(self.new_function(payload, name))
    }

    fn create_external(&mut self, data: CallbackData) -> BoundaryResult<Value> {
        self.ensure_open()?;
        Ok(self.alloc(Cell::External(data)))
    }

    fn create_error(&mut self, kind: ErrorKind, code: Option<Value>, message: Value) -> BoundaryResult<Value> {
        if self.cell(message)?.as_str().is_none() {
            return Err(Status::StringExpected);
        }
        if let Some(code) = code {
            if self.cell(code)?.as_str().is_none() {
                return Err(Status::StringExpected);
            }
        }
        Ok(self.new_error_object(kind, code, message))
    }

    fn type_of(&self, value: Value) -> BoundaryResult<ValueType> {
        Ok(self.cell(value)?.type_of())
    }

    fn get_value_double(&self, value: Value) -> BoundaryResult<f64> {
        match self.cell(value)? {
            Cell::Number(n) => Ok(*n),
            _ => Err(Status::NumberExpected),
        }
    }

    fn get_value_bool(&self, value: Value) -> BoundaryResult<bool> {
        match self.cell(value)? {
            Cell::Bool(b) => Ok(*b),
            _ => Err(Status::BooleanExpected),
        }
    }

    fn get_value_external(&self, value: Value) -> BoundaryResult<CallbackData> {
        match self.cell(value)? {
            Cell::External(data) => Ok(*data),
            _ => Err(Status::InvalidArg),
        }
    }

    fn get_value_string_utf8(&self, value: Value, buf: &mut [u8]) -> BoundaryResult<StringCopy> {
        let bytes = self.cell(value)?.as_str().ok_or(Status::StringExpected)?.as_bytes();
        let written = buf.len().min(bytes.len());
        buf[..written].copy_from_slice(&bytes[..written]);
        Ok(StringCopy {
            written,
            required: bytes.len(),
        })
    }

    fn set_property(&mut self, object: Value, key: Value, value: Value) -> BoundaryResult<()> {
        self.object(object)?;
        let name = self.key_name(key)?;
        self.write_property(object, &name, value)
    }

    fn get_property(&mut self, object: Value, key: Value) -> BoundaryResult<Value> {
        self.object(object)?;
        let name = self.key_name(key)?;
        self.read_property(object, &name)
    }

    fn has_property(&self, object: Value, key: Value) -> BoundaryResult<bool> {
        let obj = self.object(object)?;
        let name = self.key_name(key)?;
        if let Some(array) = obj.as_array() {
            if let Some(index) = array_index(&name) {
                return Ok(index < array.len());
            }
            if name == "length" {
                return Ok(true);
            }
        }
        Ok(self
            .atoms
            .find(&name)
            .is_some_and(|key| obj.properties.has(key)))
    }

    fn set_element(&mut self, object: Value, index: u32, value: Value) -> BoundaryResult<()> {
        self.check(value)?;
        self.object(object)?;
        self.write_element(object, index, value)
    }

    fn get_element(&mut self, object: Value, index: u32) -> BoundaryResult<Value> {
        if let Some(array) = self.object(object)?.as_array() {
            return Ok(array.get(index).unwrap_or(self.undefined()));
        }
        self.read_property(object, &index.to_string())
    }

    fn get_property_names(&mut self, object: Value) -> BoundaryResult<Value> {
        let obj = self.object(object)?;
        let mut names: Vec<String> = Vec::with_capacity(obj.properties.len());
        if let Some(array) = obj.as_array() {
            names.extend((0..array.len()).map(|i| i.to_string()));
        }
        names.extend(
            obj.properties
                .enumerable_keys()
                .map(|key| self.atoms.name(key).to_owned()),
        );

        let mut keys = DenseArray::with_length(0, self.undefined());
        for name in names {
            let name = self.alloc(Cell::String(name.into()));
            keys.push(name);
        }
        Ok(self.alloc_object(HostObject::new(ObjectData::Array(keys))))
    }

    fn define_properties(&mut self, object: Value, properties: &[PropertyDescriptor]) -> BoundaryResult<()> {
        self.object(object)?;
        for desc in properties {
            self.check(desc.value)?;
        }
        for desc in properties {
            let key = self.atoms.intern(&desc.name);
            let defined = self
                .object_mut(object)?
                .properties
                .define(key, desc.value, desc.attributes);
            if defined.is_err() {
                return self.fail(
                    ErrorKind::TypeError,
                    &format!("Cannot redefine property: {}", desc.name),
                );
            }
        }
        Ok(())
    }

    fn is_array(&self, value: Value) -> BoundaryResult<bool> {
        Ok(self
            .cell(value)?
            .as_object()
            .is_some_and(|obj| obj.as_array().is_some()))
    }

    fn get_array_length(&self, value: Value) -> BoundaryResult<u32> {
        self.cell(value)?
            .as_object()
            .and_then(HostObject::as_array)
            .map(DenseArray::len)
            .ok_or(Status::ArrayExpected)
    }

    fn call_function(&mut self, receiver: Value, function: Value, args: &[Value]) -> BoundaryResult<Value> {
        self.ensure_open()?;
        if self.pending.is_some() {
            return Err(Status::PendingException);
        }
        self.check(receiver)?;
        for arg in args {
            self.check(*arg)?;
        }
        let target = match self.cell(function)?.as_object().map(|obj| &obj.data) {
            Some(ObjectData::Native { name, callback, data }) => Target::Native {
                name: name.clone(),
                callback: *callback,
                data: *data,
            },
            Some(ObjectData::Script { name, body }) => Target::Script {
                name: name.clone(),
                body: Rc::clone(body),
            },
            _ => return Err(Status::FunctionExpected),
        };

        if self.depth >= self.config.max_call_depth {
            return self.fail(ErrorKind::RangeError, "Maximum call stack size exceeded");
        }
        self.depth += 1;
        let result = self.invoke(target, receiver, args);
        self.depth -= 1;
        result
    }

    fn get_cb_info(&self, info: CallbackInfo, argv: &mut [Value]) -> BoundaryResult<CallbackFrame> {
        self.ensure_open()?;
        if info.env() != self.id {
            return Err(Status::InvalidArg);
        }
        let frame = self
            .frames
            .iter()
            .rev()
            .find(|f| f.id == info.frame())
            .ok_or(Status::InvalidArg)?;
        let undefined = self.undefined();
        for (i, slot) in argv.iter_mut().enumerate() {
            *slot = frame.args.get(i).copied().unwrap_or(undefined);
        }
        Ok(CallbackFrame {
            argc: frame.args.len(),
            this: frame.this,
            data: frame.data,
        })
    }

    fn throw(&mut self, error: Value) -> BoundaryResult<()> {
        self.check(error)?;
        self.pending = Some(error);
        Ok(())
    }

    fn throw_error(&mut self, kind: ErrorKind, code: Option<&str>, message: &str) -> BoundaryResult<()> {
        self.ensure_open()?;
        let error = self.new_error(kind, code, message);
        self.pending = Some(error);
        Ok(())
    }

    fn is_error(&self, value: Value) -> BoundaryResult<bool> {
        Ok(self.cell(value)?.class_id().is_some_and(|class| class.is_error()))
    }

    fn is_exception_pending(&self) -> bool {
        self.pending.is_some()
    }

    fn get_and_clear_last_exception(&mut self) -> BoundaryResult<Value> {
        self.ensure_open()?;
        Ok(self.pending.take().unwrap_or(self.handle(SLOT_UNDEFINED)))
    }

    fn add_finalizer(
        &mut self,
        object: Value,
        data: CallbackData,
        finalize: Finalize,
        hint: CallbackData,
    ) -> BoundaryResult<()> {
        if self.version() < FINALIZER_MIN_VERSION {
            return Err(Status::Unsupported);
        }
        self.object(object)?;
        self.finalizers.push(FinalizerEntry { data, finalize, hint });
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Number formatting as host scripts print it
pub(crate) fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else {
        n.to_string()
    }
}
