//! Callback Adapter
//!
//! Turns a native function descriptor into a callable the host can store and
//! invoke, and rebuilds the call context (arguments, receiver, context
//! pointer) inside the native body.
//!
//! Every native body starts with [`Env::unpack_invocation`]. The host owns
//! scheduling: a callable runs on the host's own call stack, nested calls
//! included, and this module adds no threads of its own.

use tracing::{debug, trace};

use crate::boundary::{Callback, ErrorKind, PropertyAttributes};
use crate::env::Env;
use crate::error::{BridgeError, BridgeResult, JsError};
use crate::marshal::{FromHost, ToHost};
use crate::value::{CallbackData, CallbackInfo, Value, ValueType};

/// Slots `unpack_invocation` fills with undefined when arguments are missing
pub const MAX_PADDED_ARGS: usize = 8;

/// One native entry point before it is adapted into a callable
#[derive(Debug, Clone)]
pub struct FunctionDescriptor {
    pub name: String,
    pub callback: Callback,
    pub data: CallbackData,
    pub attributes: PropertyAttributes,
}

impl FunctionDescriptor {
    pub fn new(name: impl Into<String>, callback: Callback) -> Self {
        FunctionDescriptor {
            name: name.into(),
            callback,
            data: CallbackData::null(),
            attributes: PropertyAttributes::DEFAULT,
        }
    }

    /// Attach a context pointer returned on every invocation
    pub fn with_data(mut self, data: CallbackData) -> Self {
        self.data = data;
        self
    }

    pub fn with_attributes(mut self, attributes: PropertyAttributes) -> Self {
        self.attributes = attributes;
        self
    }
}

/// The call context of one invocation
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Number of arguments the caller actually passed
    pub argc: usize,
    /// Up to `max_args` arguments; missing ones are undefined
    pub args: Vec<Value>,
    /// Call receiver
    pub this: Value,
    /// Context pointer registered at creation time
    pub data: CallbackData,
}

impl Invocation {
    /// Argument at `index`, if the caller supplied it and it fit
    #[inline]
    pub fn arg(&self, index: usize) -> Option<Value> {
        if index < self.argc {
            self.args.get(index).copied()
        } else {
            None
        }
    }

    /// Whether arguments were dropped because they did not fit
    #[inline]
    pub fn is_truncated(&self) -> bool {
        self.argc > self.args.len()
    }
}

impl<'a> Env<'a> {
    /// Register a native function with the host
    pub fn make_callable(&mut self, descriptor: &FunctionDescriptor) -> BridgeResult<Value> {
        let FunctionDescriptor {
            name,
            callback,
            data,
            ..
        } = descriptor;
        debug!(env = %self.id(), name = %name, "creating callable");
        self.call(|b| b.create_function(name, *callback, *data))
    }

    /// Unpack the invocation handed to a native body
    ///
    /// At most `max_args` arguments are returned. Extra arguments are dropped
    /// but still counted in `argc`; probe with `max_args = 0` to size a
    /// buffer for all of them. Missing arguments are padded with undefined,
    /// up to [`MAX_PADDED_ARGS`] slots.
    pub fn unpack_invocation(&mut self, info: CallbackInfo, max_args: usize) -> BridgeResult<Invocation> {
        let probe = self.read(|b| b.get_cb_info(info, &mut []))?;
        let len = max_args.min(probe.argc.max(MAX_PADDED_ARGS));
        let undefined = self.get_undefined()?;
        let mut args = vec![undefined; len];
        let frame = self.read(|b| b.get_cb_info(info, &mut args))?;
        trace!(env = %self.id(), argc = frame.argc, max_args, "unpacked invocation");
        Ok(Invocation {
            argc: frame.argc,
            args,
            this: frame.this,
            data: frame.data,
        })
    }

    /// Unpack every argument, whatever the count
    pub fn unpack_all(&mut self, info: CallbackInfo) -> BridgeResult<Invocation> {
        let probe = self.unpack_invocation(info, 0)?;
        self.unpack_invocation(info, probe.argc)
    }

    /// Call a host callable synchronously
    ///
    /// Re-enters the host on the current stack. If the callee throws, the
    /// exception stays pending and this returns `PendingException`.
    pub fn call_function(&mut self, receiver: Value, function: Value, args: &[Value]) -> BridgeResult<Value> {
        self.expect_type(function, ValueType::Function)?;
        self.call(|b| b.call_function(receiver, function, args))
    }

    /// Build an error handle without throwing it
    pub fn make_error(&mut self, kind: ErrorKind, code: Option<Value>, message: Value) -> BridgeResult<Value> {
        self.call(|b| b.create_error(kind, code, message))
    }

    /// Whether `value` is an error object
    pub fn is_error(&mut self, value: Value) -> BridgeResult<bool> {
        self.read(|b| b.is_error(value))
    }

    /// Throw a prebuilt error; no further boundary calls may follow
    pub fn throw(&mut self, error: Value) -> BridgeResult<()> {
        self.call(|b| b.throw(error))?;
        self.mark_pending();
        Ok(())
    }

    /// Build and throw an error from a code and message
    pub fn throw_error(&mut self, kind: ErrorKind, code: Option<&str>, message: &str) -> BridgeResult<()> {
        self.call(|b| b.throw_error(kind, code, message))?;
        self.mark_pending();
        Ok(())
    }

    /// Raise a native error on the host
    pub fn throw_js_error(&mut self, error: &JsError) -> BridgeResult<()> {
        self.throw_error(error.kind, error.code.as_deref(), &error.message)
    }

    /// Surface a bridge failure to the host
    ///
    /// Local failures become host errors. Pending exceptions and fatal
    /// environment errors are left alone: they already unwind the call.
    pub fn raise(&mut self, error: &BridgeError) {
        if let Some(js) = error.to_js_error() {
            if self.is_exception_pending() {
                return;
            }
            // Throwing can only fail if the environment itself is gone.
            let _ = self.throw_js_error(&js);
        }
    }
}

/// A host function received as an argument
///
/// Calls it with the global object as receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostFunction(pub Value);

impl HostFunction {
    pub fn call(&self, env: &mut Env<'_>, args: &[Value]) -> BridgeResult<Value> {
        let global = env.get_global()?;
        env.call_function(global, self.0, args)
    }
}

impl FromHost for HostFunction {
    fn from_host(env: &mut Env<'_>, value: Value) -> BridgeResult<Self> {
        env.expect_type(value, ValueType::Function)?;
        Ok(HostFunction(value))
    }
}

impl ToHost for HostFunction {
    fn to_host(&self, _env: &mut Env<'_>) -> BridgeResult<Value> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::c_void;

    use super::*;
    use crate::boundary::Boundary;
    use crate::config::HostConfig;
    use crate::host::Environment;

    fn echo_args(raw: &mut dyn Boundary, info: CallbackInfo) -> Option<Value> {
        let mut env = Env::new(raw);
        let call = env.unpack_invocation(info, 3).ok()?;
        let result = env.make_object().ok()?;
        let argc = env.to_host(&(call.argc as u32)).ok()?;
        env.set_named_property(result, "argc", argc).ok()?;
        let args = env.to_host(&call.args).ok()?;
        env.set_named_property(result, "args", args).ok()?;
        env.set_named_property(result, "this", call.this).ok()?;
        let data = env.to_host(&(call.data.as_ptr() as usize as f64)).ok()?;
        env.set_named_property(result, "data", data).ok()?;
        Some(result)
    }

    fn throw_range(raw: &mut dyn Boundary, _info: CallbackInfo) -> Option<Value> {
        let mut env = Env::new(raw);
        let code = env.to_host("E_RANGE").ok()?;
        let message = env.to_host("out of bounds").ok()?;
        let error = env.make_error(ErrorKind::RangeError, Some(code), message).ok()?;
        env.throw(error).ok()?;
        None
    }

    fn call_first_arg(raw: &mut dyn Boundary, info: CallbackInfo) -> Option<Value> {
        let mut env = Env::new(raw);
        let call = env.unpack_invocation(info, 2).ok()?;
        let function: HostFunction = match env.from_host(call.args[0]) {
            Ok(f) => f,
            Err(err) => {
                env.raise(&err);
                return None;
            }
        };
        match function.call(&mut env, &call.args[1..]) {
            Ok(value) => Some(value),
            Err(err) => {
                assert!(err.is_unwinding());
                // Nothing may follow a pending exception.
                assert_eq!(env.make_object(), Err(BridgeError::PendingException));
                None
            }
        }
    }

    fn count_args(raw: &mut dyn Boundary, info: CallbackInfo) -> Option<Value> {
        let mut env = Env::new(raw);
        let call = env.unpack_all(info).ok()?;
        assert!(!call.is_truncated());
        env.to_host(&(call.args.len() as u32)).ok()
    }

    fn unpack_unbounded(raw: &mut dyn Boundary, info: CallbackInfo) -> Option<Value> {
        let mut env = Env::new(raw);
        let call = env.unpack_invocation(info, usize::MAX).ok()?;
        assert_eq!(call.argc, 2);
        assert_eq!(call.args.len(), MAX_PADDED_ARGS);
        assert!(!call.is_truncated());
        assert_eq!(call.arg(2), None);
        let first: f64 = env.from_host(call.args[0]).ok()?;
        let second: f64 = env.from_host(call.args[1]).ok()?;
        env.to_host(&(first + second)).ok()
    }

    fn read_number(env: &mut Environment, object: Value, name: &str) -> f64 {
        let mut env = Env::new(env);
        let value = env.get_named_property(object, name).unwrap();
        env.from_host(value).unwrap()
    }

    #[test]
    fn test_invocation_round_trip() {
        let mut host = Environment::new(HostConfig::default());
        let mut context = 99u64;
        let data = CallbackData::from_ptr(&mut context as *mut u64 as *mut c_void);

        let (function, args, receiver) = {
            let mut env = Env::new(&mut host);
            let descriptor = FunctionDescriptor::new("echo", echo_args).with_data(data);
            let function = env.make_callable(&descriptor).unwrap();
            assert_eq!(env.type_of(function).unwrap(), ValueType::Function);
            let args = vec![
                env.to_host(&1.0).unwrap(),
                env.to_host("x").unwrap(),
                env.to_host(&true).unwrap(),
            ];
            let receiver = env.make_object().unwrap();
            (function, args, receiver)
        };

        let result = host.call_function(receiver, function, &args).unwrap();
        assert_eq!(read_number(&mut host, result, "argc"), 3.0);
        assert_eq!(read_number(&mut host, result, "data"), data.as_ptr() as usize as f64);

        let mut env = Env::new(&mut host);
        let this = env.get_named_property(result, "this").unwrap();
        assert_eq!(this, receiver);
        let echoed = env.get_named_property(result, "args").unwrap();
        let echoed: Vec<Value> = env.from_host(echoed).unwrap();
        assert_eq!(env.from_host::<f64>(echoed[0]).unwrap(), 1.0);
        assert_eq!(env.from_host::<String>(echoed[1]).unwrap(), "x");
        assert!(env.from_host::<bool>(echoed[2]).unwrap());
    }

    #[test]
    fn test_surplus_arguments_are_counted_not_returned() {
        let mut host = Environment::new(HostConfig::default());
        let (function, args) = {
            let mut env = Env::new(&mut host);
            let function = env
                .make_callable(&FunctionDescriptor::new("echo", echo_args))
                .unwrap();
            let args: Vec<Value> = (0..5).map(|i| env.to_host(&(i as f64)).unwrap()).collect();
            (function, args)
        };
        let undefined = host.get_undefined().unwrap();
        let result = host.call_function(undefined, function, &args).unwrap();
        assert_eq!(read_number(&mut host, result, "argc"), 5.0);

        let mut env = Env::new(&mut host);
        let echoed = env.get_named_property(result, "args").unwrap();
        assert_eq!(env.get_array_length(echoed).unwrap(), 3);
    }

    #[test]
    fn test_missing_arguments_are_undefined() {
        let mut host = Environment::new(HostConfig::default());
        let function = {
            let mut env = Env::new(&mut host);
            env.make_callable(&FunctionDescriptor::new("echo", echo_args)).unwrap()
        };
        let undefined = host.get_undefined().unwrap();
        let result = host.call_function(undefined, function, &[]).unwrap();
        assert_eq!(read_number(&mut host, result, "argc"), 0.0);

        let mut env = Env::new(&mut host);
        let echoed = env.get_named_property(result, "args").unwrap();
        let first = env.get_element(echoed, 0).unwrap();
        assert_eq!(env.type_of(first).unwrap(), ValueType::Undefined);
    }

    #[test]
    fn test_unbounded_capacity_is_sized_by_argc() {
        let mut host = Environment::new(HostConfig::default());
        let (function, args) = {
            let mut env = Env::new(&mut host);
            let function = env
                .make_callable(&FunctionDescriptor::new("sum", unpack_unbounded))
                .unwrap();
            let args = [env.to_host(&1.5).unwrap(), env.to_host(&2.0).unwrap()];
            (function, args)
        };
        let undefined = host.get_undefined().unwrap();
        let result = host.call_function(undefined, function, &args).unwrap();
        assert_eq!(host.get_value_double(result).unwrap(), 3.5);
    }

    #[test]
    fn test_is_error() {
        let mut host = Environment::new(HostConfig::default());
        let mut env = Env::new(&mut host);
        let message = env.to_host("bad").unwrap();
        let error = env.make_error(ErrorKind::TypeError, None, message).unwrap();
        assert!(env.is_error(error).unwrap());
        let object = env.make_object().unwrap();
        assert!(!env.is_error(object).unwrap());
        assert!(!env.is_error(message).unwrap());
    }

    #[test]
    fn test_unpack_all_probes_count() {
        let mut host = Environment::new(HostConfig::default());
        let (function, args) = {
            let mut env = Env::new(&mut host);
            let function = env
                .make_callable(&FunctionDescriptor::new("count", count_args))
                .unwrap();
            let args: Vec<Value> = (0..9).map(|_| env.get_null().unwrap()).collect();
            (function, args)
        };
        let undefined = host.get_undefined().unwrap();
        let result = host.call_function(undefined, function, &args).unwrap();
        assert_eq!(host.get_value_double(result).unwrap(), 9.0);
    }

    #[test]
    fn test_exception_propagation() {
        let mut host = Environment::new(HostConfig::default());
        let function = {
            let mut env = Env::new(&mut host);
            env.make_callable(&FunctionDescriptor::new("fail", throw_range))
                .unwrap()
        };
        let undefined = host.get_undefined().unwrap();
        assert_eq!(
            host.call_function(undefined, function, &[]),
            Err(crate::boundary::Status::PendingException)
        );

        let error = host.get_and_clear_last_exception().unwrap();
        assert!(host.is_error(error).unwrap());
        assert!(!host.is_exception_pending());

        let mut env = Env::new(&mut host);
        let code = env.get_named_property(error, "code").unwrap();
        let message = env.get_named_property(error, "message").unwrap();
        assert_eq!(env.from_host::<String>(code).unwrap(), "E_RANGE");
        assert_eq!(env.from_host::<String>(message).unwrap(), "out of bounds");
        let name = env.get_named_property(error, "name").unwrap();
        assert_eq!(env.from_host::<String>(name).unwrap(), "RangeError");
    }

    #[test]
    fn test_native_calls_host_function() {
        let mut host = Environment::new(HostConfig::default());
        let double = host.create_script_function("double", |env, _this, args| {
            let n = env.get_value_double(args[0]).map_err(|_| env.undefined())?;
            Ok(env.create_double(n * 2.0).map_err(|_| env.undefined())?)
        });
        let function = {
            let mut env = Env::new(&mut host);
            env.make_callable(&FunctionDescriptor::new("apply", call_first_arg))
                .unwrap()
        };
        let twenty_one = host.create_double(21.0).unwrap();
        let undefined = host.get_undefined().unwrap();
        let result = host
            .call_function(undefined, function, &[double, twenty_one])
            .unwrap();
        assert_eq!(host.get_value_double(result).unwrap(), 42.0);
    }

    #[test]
    fn test_host_function_exception_unwinds_native() {
        let mut host = Environment::new(HostConfig::default());
        let failing = host.create_script_function("failing", |env, _this, _args| {
            Err(env.new_error(ErrorKind::Error, Some("E_SCRIPT"), "script failed"))
        });
        let function = {
            let mut env = Env::new(&mut host);
            env.make_callable(&FunctionDescriptor::new("apply", call_first_arg))
                .unwrap()
        };
        let undefined = host.get_undefined().unwrap();
        assert!(host.call_function(undefined, function, &[failing]).is_err());

        let error = host.get_and_clear_last_exception().unwrap();
        let mut env = Env::new(&mut host);
        let code = env.get_named_property(error, "code").unwrap();
        assert_eq!(env.from_host::<String>(code).unwrap(), "E_SCRIPT");
    }

    #[test]
    fn test_non_function_argument_raises_type_error() {
        let mut host = Environment::new(HostConfig::default());
        let function = {
            let mut env = Env::new(&mut host);
            env.make_callable(&FunctionDescriptor::new("apply", call_first_arg))
                .unwrap()
        };
        let not_callable = host.create_double(1.0).unwrap();
        let undefined = host.get_undefined().unwrap();
        assert!(host.call_function(undefined, function, &[not_callable]).is_err());

        let error = host.get_and_clear_last_exception().unwrap();
        let mut env = Env::new(&mut host);
        let name = env.get_named_property(error, "name").unwrap();
        assert_eq!(env.from_host::<String>(name).unwrap(), "TypeError");
        let code = env.get_named_property(error, "code").unwrap();
        assert_eq!(env.from_host::<String>(code).unwrap(), "E_TYPE_MISMATCH");
    }

    #[test]
    fn test_stale_callback_info_is_rejected() {
        fn keep_info(raw: &mut dyn Boundary, info: CallbackInfo) -> Option<Value> {
            let mut env = Env::new(raw);
            env.to_host(&(info.frame() as f64)).ok()
        }

        let mut host = Environment::new(HostConfig::default());
        let function = {
            let mut env = Env::new(&mut host);
            env.make_callable(&FunctionDescriptor::new("keep", keep_info)).unwrap()
        };
        let undefined = host.get_undefined().unwrap();
        let frame = host.call_function(undefined, function, &[]).unwrap();
        let frame = host.get_value_double(frame).unwrap() as u64;

        let stale = CallbackInfo::new(host.env_id(), frame);
        let mut env = Env::new(&mut host);
        assert_eq!(
            env.unpack_invocation(stale, 1).unwrap_err(),
            BridgeError::Boundary(crate::boundary::Status::InvalidArg)
        );
    }
}
