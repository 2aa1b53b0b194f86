//! Calling native functions and exposing host closures to native code.

pub(crate) mod callback;
mod marshal;

pub use callback::{HostFunction, registered_callbacks};

use crate::{
    abi::{ByteArray, ObjectHandle},
    error::FfiError,
    native,
    object::Function,
    value::Value,
};

impl Function {
    /// Calls the function synchronously on this thread.
    ///
    /// Host arrays are passed as borrowed views; when the result is one of
    /// them, the caller's own array comes back.
    pub fn call(&self, args: &[Value]) -> Result<Value, FfiError> {
        marshal::invoke(self, args)
    }

    /// Looks up a function in the native global registry.
    pub fn get_global(name: &str) -> Result<Option<Function>, FfiError> {
        let name = ByteArray::from_slice(name.as_bytes());
        let mut raw: ObjectHandle = std::ptr::null_mut();
        // SAFETY: `name` borrows a live string; `raw` is a valid out slot.
        native::check(unsafe { native::api().function_get_global(&name, &mut raw) })?;
        if raw.is_null() {
            return Ok(None);
        }
        Function::from_owned_raw(raw).map(Some)
    }

    /// An unnamed native function backed by `f`.
    ///
    /// Host arrays passed to `f` by raw pointer are lent for the call only:
    /// once `f` returns, reading a kept clone fails with `InvalidArgument`.
    /// Use [`HostArray::to_owned_copy`](crate::HostArray::to_owned_copy) to
    /// keep the data. Returned views of lent memory are copied.
    pub fn from_closure<F>(f: F) -> Result<Function, FfiError>
    where
        F: Fn(&[Value]) -> Result<Value, FfiError> + Send + Sync + 'static,
    {
        callback::create_function("<closure>", Box::new(f))
    }

    /// Installs this function under `name` in the native global registry.
    pub fn register_global(&self, name: &str, can_override: bool) -> Result<(), FfiError> {
        let key = ByteArray::from_slice(name.as_bytes());
        // SAFETY: the registry takes its own reference to the function.
        native::check(unsafe {
            native::api().function_set_global(&key, self.as_raw(), can_override as i32)
        })
    }
}

pub fn get_global_function(name: &str) -> Result<Option<Function>, FfiError> {
    Function::get_global(name)
}

/// Registers `f` as the global function `name`.
///
/// Fails with the native `RuntimeError` when `name` is taken and
/// `can_override` is false; the closure is dropped in that case. Array
/// arguments are valid only for the duration of each call, as for
/// [`Function::from_closure`].
pub fn register_global_function<F>(name: &str, f: F, can_override: bool) -> Result<(), FfiError>
where
    F: Fn(&[Value]) -> Result<Value, FfiError> + Send + Sync + 'static,
{
    let func = callback::create_function(name, Box::new(f))?;
    func.register_global(name, can_override)
}

#[cfg(test)]
mod function_test;
