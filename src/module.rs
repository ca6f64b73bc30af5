//! Module Registrar
//!
//! A native module is described by a static [`ModuleRecord`] submitted once to
//! the process-wide registry with [`register_module`]. When the host loads the
//! module it calls the record's `init` function exactly once per environment;
//! `init` builds a [`ModuleTable`] and hands it to [`register_exports`], which
//! installs every entry on the exports object.
//!
//! ```ignore
//! fn init(env: &mut dyn Boundary, exports: Value) -> Option<Value> {
//!     let table = ModuleTable::new()
//!         .method(Method::new("add", |(a, b): (f64, f64)| Ok(a + b)))
//!         .constant("version", "1.0.0");
//!     register_exports(env, exports, table)
//! }
//!
//! static MATH: ModuleRecord = ModuleRecord::new("math", init);
//! register_module(&MATH)?;
//! ```
//!
//! State created during `init` is owned by a module instance attached to the
//! exports object, so it lives exactly as long as the environment.

use std::borrow::Cow;
use std::collections::HashSet;
use std::ffi::c_void;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::boundary::{Boundary, FINALIZER_MIN_VERSION, PropertyAttributes, PropertyDescriptor};
use crate::callback::FunctionDescriptor;
use crate::env::Env;
use crate::error::{BridgeError, BridgeResult};
use crate::marshal::ToHost;
use crate::method::Method;
use crate::value::{CallbackData, Value, ValueType};

/// Format version of [`ModuleRecord`]
pub const MODULE_FORMAT_VERSION: u32 = 1;

/// Module initialization entry point
///
/// Receives the initial exports object and returns the exports to publish,
/// or `None` with an exception pending.
pub type InitFn = fn(env: &mut dyn Boundary, exports: Value) -> Option<Value>;

/// Static registration record of one native module
#[derive(Debug)]
pub struct ModuleRecord {
    pub version: u32,
    pub flags: u32,
    pub name: &'static str,
    pub init: InitFn,
}

impl ModuleRecord {
    pub const fn new(name: &'static str, init: InitFn) -> Self {
        ModuleRecord {
            version: MODULE_FORMAT_VERSION,
            flags: 0,
            name,
            init,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("module `{0}` is already registered")]
    Duplicate(&'static str),

    #[error("module `{name}` uses record format {found}, expected {expected}")]
    VersionMismatch {
        name: &'static str,
        found: u32,
        expected: u32,
    },
}

static REGISTRY: Mutex<Vec<&'static ModuleRecord>> = parking_lot::const_mutex(Vec::new());

/// Submit a module record to the process-wide registry
pub fn register_module(record: &'static ModuleRecord) -> Result<(), RegistryError> {
    if record.version != MODULE_FORMAT_VERSION {
        return Err(RegistryError::VersionMismatch {
            name: record.name,
            found: record.version,
            expected: MODULE_FORMAT_VERSION,
        });
    }

    let mut registry = REGISTRY.lock();
    if registry.iter().any(|r| r.name == record.name) {
        return Err(RegistryError::Duplicate(record.name));
    }
    debug!(module = record.name, flags = record.flags, "registered module");
    registry.push(record);
    Ok(())
}

/// Look up a registered module by name
pub fn registered_module(name: &str) -> Option<&'static ModuleRecord> {
    REGISTRY.lock().iter().find(|r| r.name == name).copied()
}

/// Names of all registered modules, in registration order
pub fn registered_modules() -> Vec<&'static str> {
    REGISTRY.lock().iter().map(|r| r.name).collect()
}

/// A constant export
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Null,
    Bool(bool),
    Number(f64),
    String(Cow<'static, str>),
}

impl ToHost for Constant {
    fn to_host(&self, env: &mut Env<'_>) -> BridgeResult<Value> {
        match self {
            Constant::Null => env.get_null(),
            Constant::Bool(b) => b.to_host(env),
            Constant::Number(n) => n.to_host(env),
            Constant::String(s) => s.as_ref().to_host(env),
        }
    }
}

impl From<bool> for Constant {
    fn from(b: bool) -> Self {
        Constant::Bool(b)
    }
}

impl From<f64> for Constant {
    fn from(n: f64) -> Self {
        Constant::Number(n)
    }
}

impl From<&'static str> for Constant {
    fn from(s: &'static str) -> Self {
        Constant::String(Cow::Borrowed(s))
    }
}

impl From<String> for Constant {
    fn from(s: String) -> Self {
        Constant::String(Cow::Owned(s))
    }
}

#[derive(Debug)]
enum Entry {
    Function(FunctionDescriptor),
    Method(Method),
    Constant {
        name: String,
        value: Constant,
        attributes: PropertyAttributes,
    },
}

impl Entry {
    fn name(&self) -> &str {
        match self {
            Entry::Function(desc) => &desc.name,
            Entry::Method(method) => method.name(),
            Entry::Constant { name, .. } => name,
        }
    }
}

/// Everything a module exports
#[derive(Debug, Default)]
pub struct ModuleTable {
    entries: Vec<Entry>,
}

impl ModuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Export a raw native function
    pub fn function(mut self, descriptor: FunctionDescriptor) -> Self {
        self.entries.push(Entry::Function(descriptor));
        self
    }

    /// Export a typed method
    pub fn method(mut self, method: Method) -> Self {
        self.entries.push(Entry::Method(method));
        self
    }

    /// Export a read-only, enumerable constant
    pub fn constant(self, name: impl Into<String>, value: impl Into<Constant>) -> Self {
        self.constant_with(name, value, PropertyAttributes::ENUMERABLE)
    }

    pub fn constant_with(
        mut self,
        name: impl Into<String>,
        value: impl Into<Constant>,
        attributes: PropertyAttributes,
    ) -> Self {
        self.entries.push(Entry::Constant {
            name: name.into(),
            value: value.into(),
            attributes,
        });
        self
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Export names in table order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(Entry::name)
    }

    fn check_names(&self) -> BridgeResult<()> {
        let mut seen = HashSet::with_capacity(self.entries.len());
        for name in self.names() {
            if !seen.insert(name) {
                return Err(BridgeError::DuplicateExport(name.to_string()));
            }
        }
        Ok(())
    }
}

/// State owned by one loaded module instance
#[derive(Debug)]
struct ModuleInstance {
    methods: Vec<Box<Method>>,
}

fn release_instance(data: CallbackData, _hint: CallbackData) {
    // SAFETY: `data` came from `Box::into_raw` in `attach_instance` and the
    // host runs each finalizer once.
    drop(unsafe { Box::from_raw(data.as_ptr() as *mut ModuleInstance) });
}

enum Planned {
    Callable(FunctionDescriptor),
    Constant {
        name: String,
        value: Constant,
        attributes: PropertyAttributes,
    },
}

impl<'a> Env<'a> {
    /// Install every entry of `table` on `exports`
    ///
    /// Entries with default attributes are assigned one by one; the others are
    /// defined together in one batch at the end.
    pub fn init_exports(&mut self, exports: Value, table: ModuleTable) -> BridgeResult<Value> {
        self.expect_type(exports, ValueType::Object)?;
        table.check_names()?;

        let mut instance = ModuleInstance {
            methods: Vec::new(),
        };
        let mut planned = Vec::with_capacity(table.len());
        for entry in table.entries {
            match entry {
                Entry::Function(desc) => planned.push(Planned::Callable(desc)),
                Entry::Method(method) => {
                    let method = Box::new(method);
                    planned.push(Planned::Callable(method.descriptor()));
                    instance.methods.push(method);
                }
                Entry::Constant {
                    name,
                    value,
                    attributes,
                } => planned.push(Planned::Constant {
                    name,
                    value,
                    attributes,
                }),
            }
        }
        self.attach_instance(exports, instance)?;

        let count = planned.len();
        let mut batch = Vec::new();
        for entry in planned {
            let (name, value, attributes) = match entry {
                Planned::Callable(desc) => {
                    let value = self.make_callable(&desc)?;
                    (desc.name, value, desc.attributes)
                }
                Planned::Constant {
                    name,
                    value,
                    attributes,
                } => (name, self.to_host(&value)?, attributes),
            };
            if attributes == PropertyAttributes::DEFAULT {
                self.set_named_property(exports, &name, value)?;
            } else {
                batch.push(PropertyDescriptor::new(name, value).with_attributes(attributes));
            }
        }
        if !batch.is_empty() {
            self.define_properties(exports, &batch)?;
        }

        debug!(env = %self.id(), exports = count, "module exports installed");
        Ok(exports)
    }

    /// Tie instance state to the lifetime of `exports`
    fn attach_instance(&mut self, exports: Value, instance: ModuleInstance) -> BridgeResult<()> {
        if instance.methods.is_empty() {
            return Ok(());
        }
        let data = CallbackData::from_ptr(Box::into_raw(Box::new(instance)) as *mut c_void);
        if self.version() < FINALIZER_MIN_VERSION {
            warn!(
                env = %self.id(),
                version = self.version(),
                "contract has no finalizers, module instance state is leaked"
            );
            return Ok(());
        }
        if let Err(err) =
            self.call(|b| b.add_finalizer(exports, data, release_instance, CallbackData::null()))
        {
            // No callable refers to the instance yet.
            release_instance(data, CallbackData::null());
            return Err(err);
        }
        Ok(())
    }
}

/// Registrar entry point for a module's `init`
///
/// On failure an error is thrown on the host and `None` is returned, so the
/// host never sees a partially populated exports object.
pub fn register_exports(env: &mut dyn Boundary, exports: Value, table: ModuleTable) -> Option<Value> {
    let mut env = Env::new(env);
    match env.init_exports(exports, table) {
        Ok(exports) => Some(exports),
        Err(err) => {
            warn!(env = %env.id(), error = %err, "module registration failed");
            env.raise(&err);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::boundary::ErrorKind;
    use crate::config::HostConfig;
    use crate::host::Environment;
    use crate::value::CallbackInfo;

    fn answer(raw: &mut dyn Boundary, _info: CallbackInfo) -> Option<Value> {
        raw.create_double(42.0).ok()
    }

    fn sample_table() -> ModuleTable {
        ModuleTable::new()
            .function(FunctionDescriptor::new("answer", answer))
            .method(Method::new("add", |(a, b): (f64, f64)| Ok(a + b)))
            .method(Method::new("greet", |(name,): (String,)| Ok(format!("hi {name}"))))
            .constant("version", "1.2.3")
            .constant("pi", std::f64::consts::PI)
    }

    fn init(host: &mut Environment, table: ModuleTable) -> Option<Value> {
        let exports = host.create_object().unwrap();
        register_exports(host, exports, table)
    }

    #[test]
    fn test_registration_completeness() {
        let mut host = Environment::new(HostConfig::default());
        let table = sample_table();
        let names: Vec<String> = table.names().map(str::to_string).collect();
        let exports = init(&mut host, table).unwrap();

        let mut env = Env::new(&mut host);
        assert_eq!(env.keys(exports).unwrap(), names);
        for name in ["answer", "add", "greet"] {
            let value = env.get_named_property(exports, name).unwrap();
            assert_eq!(env.type_of(value).unwrap(), ValueType::Function);
        }
        let version = env.get_named_property(exports, "version").unwrap();
        assert_eq!(env.from_host::<String>(version).unwrap(), "1.2.3");
    }

    #[test]
    fn test_exported_methods_are_callable() {
        let mut host = Environment::new(HostConfig::default());
        let exports = init(&mut host, sample_table()).unwrap();
        let (add, args) = {
            let mut env = Env::new(&mut host);
            let add = env.get_named_property(exports, "add").unwrap();
            let args = [env.to_host(&20.0).unwrap(), env.to_host(&22.0).unwrap()];
            (add, args)
        };
        let result = host.call_function(exports, add, &args).unwrap();
        assert_eq!(host.get_value_double(result).unwrap(), 42.0);
    }

    #[test]
    fn test_constants_are_read_only() {
        let mut host = Environment::new(HostConfig::default());
        let exports = init(&mut host, sample_table()).unwrap();
        let mut env = Env::new(&mut host);
        let two = env.to_host(&2.0).unwrap();
        assert_eq!(
            env.set_named_property(exports, "pi", two),
            Err(BridgeError::PendingException)
        );
        host.get_and_clear_last_exception().unwrap();

        let mut env = Env::new(&mut host);
        let pi = env.get_named_property(exports, "pi").unwrap();
        assert_eq!(env.from_host::<f64>(pi).unwrap(), std::f64::consts::PI);
    }

    #[test]
    fn test_hidden_export() {
        let mut host = Environment::new(HostConfig::default());
        let table = ModuleTable::new()
            .method(Method::new("visible", |()| Ok(1.0)))
            .method(Method::new("internal", |()| Ok(2.0)).with_attributes(PropertyAttributes::WRITABLE));
        let exports = init(&mut host, table).unwrap();

        let mut env = Env::new(&mut host);
        assert_eq!(env.keys(exports).unwrap(), vec!["visible".to_string()]);
        let internal = env.get_named_property(exports, "internal").unwrap();
        assert_eq!(env.type_of(internal).unwrap(), ValueType::Function);
    }

    #[test]
    fn test_duplicate_export_fails_registration() {
        let mut host = Environment::new(HostConfig::default());
        let table = ModuleTable::new()
            .method(Method::new("twice", |()| Ok(1.0)))
            .constant("twice", 2.0);
        assert!(init(&mut host, table).is_none());
        assert!(host.is_exception_pending());

        let error = host.get_and_clear_last_exception().unwrap();
        assert_eq!(
            host.describe(error),
            "Error: export `twice` is defined more than once [E_DUPLICATE_EXPORT]"
        );
    }

    #[test]
    fn test_non_object_exports_fail_registration() {
        let mut host = Environment::new(HostConfig::default());
        let exports = host.create_double(1.0).unwrap();
        assert!(register_exports(&mut host, exports, sample_table()).is_none());
        let error = host.get_and_clear_last_exception().unwrap();
        assert!(host.describe(error).starts_with("TypeError: type mismatch"));
    }

    #[test]
    fn test_failure_leaves_exception_from_host() {
        fn failing(raw: &mut dyn Boundary, _info: CallbackInfo) -> Option<Value> {
            raw.throw_error(ErrorKind::Error, None, "unused").ok()?;
            None
        }

        let mut host = Environment::new(HostConfig::default());
        let exports = host.create_object().unwrap();
        host.throw_error(ErrorKind::Error, Some("E_EARLY"), "already failing")
            .unwrap();
        let table = ModuleTable::new().function(FunctionDescriptor::new("f", failing));
        assert!(register_exports(&mut host, exports, table).is_none());

        // The earlier exception is not replaced.
        let error = host.get_and_clear_last_exception().unwrap();
        assert_eq!(host.describe(error), "Error: already failing [E_EARLY]");
    }

    #[test]
    fn test_instance_released_on_teardown() {
        let dropped = Rc::new(RefCell::new(false));
        struct Guard(Rc<RefCell<bool>>);
        impl Drop for Guard {
            fn drop(&mut self) {
                *self.0.borrow_mut() = true;
            }
        }

        let guard = Guard(dropped.clone());
        let mut host = Environment::new(HostConfig::default());
        let table = ModuleTable::new().method(Method::new("keep", move |()| {
            let _ = &guard;
            Ok(())
        }));
        init(&mut host, table).unwrap();
        assert!(!*dropped.borrow());

        host.teardown();
        assert!(*dropped.borrow());
    }

    #[test]
    fn test_old_contract_still_registers() {
        let mut host = Environment::new(HostConfig::new().with_boundary_version(4));
        let exports = init(&mut host, sample_table()).unwrap();
        let mut env = Env::new(&mut host);
        let add = env.get_named_property(exports, "add").unwrap();
        assert_eq!(env.type_of(add).unwrap(), ValueType::Function);
    }

    #[test]
    fn test_registry() {
        fn noop(_env: &mut dyn Boundary, exports: Value) -> Option<Value> {
            Some(exports)
        }
        static FIRST: ModuleRecord = ModuleRecord::new("registry_test_first", noop);
        static STALE: ModuleRecord = ModuleRecord {
            version: MODULE_FORMAT_VERSION + 1,
            flags: 0,
            name: "registry_test_stale",
            init: noop,
        };

        register_module(&FIRST).unwrap();
        assert_eq!(
            register_module(&FIRST),
            Err(RegistryError::Duplicate("registry_test_first"))
        );
        assert!(matches!(
            register_module(&STALE),
            Err(RegistryError::VersionMismatch { found: 2, .. })
        ));

        let found = registered_module("registry_test_first").unwrap();
        assert!(std::ptr::eq(found, &FIRST));
        assert!(registered_module("registry_test_stale").is_none());
        assert!(registered_modules().contains(&"registry_test_first"));
    }
}
