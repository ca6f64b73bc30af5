//! Typed native methods
//!
//! A [`Method`] wraps a Rust closure with up to three typed parameters. One
//! shared trampoline serves every method: it unpacks the invocation, checks
//! the argument count, converts the arguments with [`FromHost`], runs the
//! closure and turns the result (or the error) into something the host sees.
//!
//! The `Method` itself travels as the callable's context pointer, so it must
//! outlive every callable made from it. The module registrar guarantees this
//! by moving methods into the module instance before creating callables.

use std::ffi::c_void;
use std::fmt;

use tracing::{trace, warn};

use crate::boundary::{Boundary, PropertyAttributes, Status};
use crate::callback::{FunctionDescriptor, Invocation};
use crate::env::Env;
use crate::error::{BridgeError, BridgeResult, JsError};
use crate::marshal::{FromHost, ToHost};
use crate::value::{CallbackData, CallbackInfo, Value};

/// Most arguments a typed method can declare
pub const MAX_METHOD_ARGS: usize = 3;

type MethodBody = dyn Fn(&mut Env<'_>, &Invocation) -> BridgeResult<Option<Value>>;

/// Parameter lists a method closure can take
pub trait FromArgs: Sized {
    /// Number of required arguments
    const ARITY: usize;

    fn from_args(env: &mut Env<'_>, args: &[Value]) -> BridgeResult<Self>;
}

impl FromArgs for () {
    const ARITY: usize = 0;

    fn from_args(_env: &mut Env<'_>, _args: &[Value]) -> BridgeResult<Self> {
        Ok(())
    }
}

macro_rules! impl_from_args {
    ($arity:expr; $($ty:ident => $idx:tt),+) => {
        impl<$($ty: FromHost),+> FromArgs for ($($ty,)+) {
            const ARITY: usize = $arity;

            fn from_args(env: &mut Env<'_>, args: &[Value]) -> BridgeResult<Self> {
                Ok(($($ty::from_host(env, args[$idx])?,)+))
            }
        }
    };
}

impl_from_args!(1; A => 0);
impl_from_args!(2; A => 0, B => 1);
impl_from_args!(3; A => 0, B => 1, C => 2);

/// A native method with typed parameters
pub struct Method {
    name: String,
    arity: usize,
    attributes: PropertyAttributes,
    body: Box<MethodBody>,
}

impl Method {
    /// Wrap a closure over plain values
    pub fn new<Args, R, F>(name: impl Into<String>, f: F) -> Self
    where
        Args: FromArgs + 'static,
        R: ToHost + 'static,
        F: Fn(Args) -> Result<R, JsError> + 'static,
    {
        Self::with_env(name, move |_env: &mut Env<'_>, args: Args| f(args).map_err(BridgeError::from))
    }

    /// Wrap a closure that also needs the environment
    pub fn with_env<Args, R, F>(name: impl Into<String>, f: F) -> Self
    where
        Args: FromArgs + 'static,
        R: ToHost + 'static,
        F: Fn(&mut Env<'_>, Args) -> BridgeResult<R> + 'static,
    {
        let body = move |env: &mut Env<'_>, call: &Invocation| -> BridgeResult<Option<Value>> {
            let args = Args::from_args(env, &call.args)?;
            let result = f(env, args)?;
            result.to_host(env).map(Some)
        };
        Method {
            name: name.into(),
            arity: Args::ARITY,
            attributes: PropertyAttributes::DEFAULT,
            body: Box::new(body),
        }
    }

    pub fn with_attributes(mut self, attributes: PropertyAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn arity(&self) -> usize {
        self.arity
    }

    #[inline]
    pub fn attributes(&self) -> PropertyAttributes {
        self.attributes
    }

    /// Descriptor whose context pointer is this method
    ///
    /// `self` must stay at the same address while the callable exists.
    pub(crate) fn descriptor(&self) -> FunctionDescriptor {
        let data = CallbackData::from_ptr(self as *const Method as *mut c_void);
        FunctionDescriptor::new(self.name.clone(), method_trampoline)
            .with_data(data)
            .with_attributes(self.attributes)
    }

    fn invoke(&self, env: &mut Env<'_>, call: &Invocation) -> BridgeResult<Option<Value>> {
        if call.argc < self.arity {
            return Err(BridgeError::ArgumentCount {
                expected: self.arity,
                received: call.argc,
            });
        }
        if call.argc > self.arity {
            warn!(method = %self.name, argc = call.argc, arity = self.arity, "ignoring surplus arguments");
        }
        (self.body)(env, call)
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("attributes", &self.attributes)
            .finish()
    }
}

/// Entry point shared by every typed method
fn method_trampoline(raw: &mut dyn Boundary, info: CallbackInfo) -> Option<Value> {
    let mut env = Env::new(raw);
    let result = env
        .unpack_invocation(info, MAX_METHOD_ARGS)
        .and_then(|call| {
            if call.data.is_null() {
                return Err(BridgeError::Boundary(Status::InvalidArg));
            }
            // SAFETY: the pointer was produced by `Method::descriptor`, and the
            // module instance owning the method outlives its callables.
            let method = unsafe { &*(call.data.as_ptr() as *const Method) };
            trace!(method = %method.name, argc = call.argc, "invoking method");
            method.invoke(&mut env, &call)
        });

    match result {
        Ok(value) => value,
        Err(err) => {
            env.raise(&err);
            None
        }
    }
}
