//! Reference host runtime
//!
//! A small in-process implementation of the boundary contract. It backs the
//! test suite and the `nbshell` binary, and shows what a host embedding this
//! bridge has to provide:
//! - Handle table per environment (heap)
//! - Interned property names (atom) and per-object property tables (property)
//! - Dense arrays (array)
//! - Objects, functions and errors (object)
//! - The `Boundary` implementation itself (environment)
//! - Loading registered modules into environments (runtime)

pub mod array;
pub mod atom;
pub mod environment;
pub mod heap;
pub mod object;
pub mod property;
pub mod runtime;

pub use environment::Environment;
pub use runtime::{LoadError, LoadedModule, Runtime};
