//! napi-bridge - native extension bridge for a scripting host
//!
//! Native code talks to a dynamically-typed host runtime only through a fixed
//! set of boundary operations ([`Boundary`]). This crate sits on the native
//! side of that boundary and provides three pieces:
//! - Value marshalling between native scalars/aggregates and opaque host handles
//! - Callback adaptation: native functions become host callables, invocations
//!   are unpacked, exceptions are propagated
//! - Module registration: a table of exports is installed on the host's
//!   exports object exactly once
//!
//! A small reference host ([`host`]) implements the contract in-process so the
//! bridge can be exercised without a real embedding.
//!
//! # Example
//! ```ignore
//! use napi_bridge::{Method, ModuleRecord, ModuleTable, Runtime, register_exports, register_module};
//!
//! fn init(env: &mut dyn napi_bridge::Boundary, exports: napi_bridge::Value) -> Option<napi_bridge::Value> {
//!     let table = ModuleTable::new().method(Method::new("add", |(a, b): (f64, f64)| Ok(a + b)));
//!     register_exports(env, exports, table)
//! }
//!
//! static MATH: ModuleRecord = ModuleRecord::new("math", init);
//!
//! register_module(&MATH).unwrap();
//! let mut runtime = Runtime::default();
//! let module = runtime.load("math").unwrap();
//! ```

// Handles and the boundary contract
pub mod boundary;
pub mod value;

// Errors and the environment wrapper
pub mod env;
pub mod error;

// Bridge components
pub mod callback;
pub mod marshal;
pub mod method;
pub mod module;

// Host configuration and the reference host
pub mod config;
pub mod host;

pub use boundary::{
    Boundary, BoundaryResult, Callback, ErrorKind, Finalize, PropertyAttributes, PropertyDescriptor, Status,
    StringCopy,
};
pub use callback::{FunctionDescriptor, HostFunction, Invocation};
pub use config::HostConfig;
pub use env::Env;
pub use error::{BridgeError, BridgeResult, JsError};
pub use host::{Environment, LoadError, LoadedModule, Runtime};
pub use marshal::{FromHost, StrLen, ToHost};
pub use method::Method;
pub use module::{Constant, ModuleRecord, ModuleTable, RegistryError, register_exports, register_module};
pub use value::{CallbackData, CallbackInfo, EnvId, Value, ValueType};
