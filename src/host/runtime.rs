//! Module loader
//!
//! A `Runtime` loads registered modules on demand. Each load gets its own
//! [`Environment`] and runs the module's `init` exactly once; later loads of
//! the same name return the cached instance until it is unloaded.

use tracing::debug;

use crate::boundary::{Boundary, ErrorKind, Status};
use crate::config::HostConfig;
use crate::env::Env;
use crate::module::registered_module;
use crate::value::{Value, ValueType};

use super::environment::Environment;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("no module named `{0}` is registered")]
    UnknownModule(String),

    #[error("module `{module}` failed to initialize: {message}")]
    InitFailed { module: String, message: String },

    #[error("module `{0}` returned no exports object or function")]
    NoExports(String),

    #[error("boundary call failed while loading: {0}")]
    Boundary(#[from] Status),
}

/// One initialized module instance
#[derive(Debug)]
pub struct LoadedModule {
    name: &'static str,
    env: Environment,
    exports: Value,
}

impl LoadedModule {
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn exports(&self) -> Value {
        self.exports
    }

    #[inline]
    pub fn environment(&mut self) -> &mut Environment {
        &mut self.env
    }

    /// Bridge view of this module's environment
    pub fn env(&mut self) -> Env<'_> {
        Env::new(&mut self.env)
    }

    /// Enumerable export names
    pub fn export_names(&mut self) -> Vec<String> {
        let exports = self.exports;
        self.env().keys(exports).unwrap_or_default()
    }

    /// Call an exported function with the exports object as receiver
    ///
    /// `Err` carries the exception the call threw.
    pub fn call(&mut self, name: &str, args: &[Value]) -> Result<Value, Value> {
        let exports = self.exports;
        let function = self.env().get_named_property(exports, name);
        let function = match function {
            Ok(f) if self.env.type_of(f) == Ok(ValueType::Function) => f,
            _ => {
                let message = format!("{name} is not a function");
                return Err(self.env.new_error(ErrorKind::TypeError, None, &message));
            }
        };
        match self.env.call_function(exports, function, args) {
            Ok(result) => Ok(result),
            Err(_) => {
                let thrown = self.env.get_and_clear_last_exception();
                Err(thrown.unwrap_or_else(|_| self.env.undefined()))
            }
        }
    }

    /// Render a value of this module's environment
    pub fn describe(&self, value: Value) -> String {
        self.env.describe(value)
    }
}

/// Loads modules from the process-wide registry
#[derive(Debug)]
pub struct Runtime {
    config: HostConfig,
    loaded: Vec<LoadedModule>,
}

impl Runtime {
    pub fn new(config: HostConfig) -> Self {
        Runtime {
            config,
            loaded: Vec::new(),
        }
    }

    /// Load a registered module, reusing an already loaded instance
    pub fn load(&mut self, name: &str) -> Result<&mut LoadedModule, LoadError> {
        if let Some(idx) = self.loaded.iter().position(|m| m.name == name) {
            return Ok(&mut self.loaded[idx]);
        }

        let record = registered_module(name).ok_or_else(|| LoadError::UnknownModule(name.to_string()))?;
        let mut env = Environment::new(self.config);
        let exports = env.create_object()?;

        debug!(module = record.name, env = %env.env_id(), "initializing module");
        let returned = (record.init)(&mut env, exports);
        if env.is_exception_pending() {
            let error = env.get_and_clear_last_exception()?;
            return Err(LoadError::InitFailed {
                module: record.name.to_string(),
                message: env.describe(error),
            });
        }
        let exports = match returned {
            Some(exports) if matches!(env.type_of(exports), Ok(ValueType::Object | ValueType::Function)) => exports,
            _ => return Err(LoadError::NoExports(record.name.to_string())),
        };

        let idx = self.loaded.len();
        self.loaded.push(LoadedModule {
            name: record.name,
            env,
            exports,
        });
        Ok(&mut self.loaded[idx])
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.iter().any(|m| m.name == name)
    }

    /// Tear down a loaded module; returns false if it was not loaded
    pub fn unload(&mut self, name: &str) -> bool {
        match self.loaded.iter().position(|m| m.name == name) {
            Some(idx) => {
                let mut module = self.loaded.remove(idx);
                debug!(module = module.name, "unloading module");
                module.env.teardown();
                true
            }
            None => false,
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(HostConfig::default())
    }
}
