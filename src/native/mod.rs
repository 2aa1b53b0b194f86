//! The native runtime as this crate consumes it.
//!
//! [`NativeApi`] mirrors the fixed C entry points one-for-one: raw pointers
//! in, status code out, nonzero status meaning "an error is waiting in the
//! thread-local raised slot". The process uses exactly one implementation,
//! chosen at first use; [`local::LocalRuntime`] is the default.

pub mod local;

use std::{os::raw::c_void, sync::OnceLock};

use crate::{
    abi::{
        ByteArray, ContextDeleter, DLManagedTensor, ObjectHandle, RawAny, SafeCallFn, TypeInfo,
    },
    error::{FfiError, NativeError},
    object::ErrorRef,
};

pub use local::LocalRuntime;

/// Entry points exported by the native runtime.
///
/// # Safety
/// Every method forwards raw pointers across the boundary. Callers must pass
/// pointers that are valid for the access the method performs, and handles
/// that point to live objects.
pub trait NativeApi: Send + Sync {
    unsafe fn object_inc_ref(&self, handle: ObjectHandle) -> i32;

    unsafe fn object_dec_ref(&self, handle: ObjectHandle) -> i32;

    /// Converts a borrowed view into an owned value, taking a new reference
    /// for object payloads.
    unsafe fn any_view_to_owned(&self, view: *const RawAny, out: *mut RawAny) -> i32;

    unsafe fn function_call(
        &self,
        func: ObjectHandle,
        args: *const RawAny,
        num_args: i32,
        result: *mut RawAny,
    ) -> i32;

    unsafe fn function_create(
        &self,
        context: *mut c_void,
        safe_call: SafeCallFn,
        context_deleter: Option<ContextDeleter>,
        out: *mut ObjectHandle,
    ) -> i32;

    /// Writes a new reference, or null when no function has that name.
    unsafe fn function_get_global(&self, name: *const ByteArray, out: *mut ObjectHandle) -> i32;

    unsafe fn function_set_global(
        &self,
        name: *const ByteArray,
        func: ObjectHandle,
        can_override: i32,
    ) -> i32;

    unsafe fn string_create(&self, data: *const ByteArray, out: *mut RawAny) -> i32;

    unsafe fn bytes_create(&self, data: *const ByteArray, out: *mut RawAny) -> i32;

    unsafe fn shape_create(&self, dims: *const i64, ndim: usize, out: *mut RawAny) -> i32;

    unsafe fn error_create(
        &self,
        kind: *const ByteArray,
        message: *const ByteArray,
        backtrace: *const ByteArray,
        out: *mut ObjectHandle,
    ) -> i32;

    /// Moves the raised error out of the thread-local slot; writes null if
    /// nothing was raised.
    unsafe fn error_move_from_raised(&self, out: *mut ObjectHandle);

    /// Installs `error` as the raised error, retaining it.
    unsafe fn error_set_raised(&self, error: ObjectHandle);

    unsafe fn type_key_to_index(&self, key: *const ByteArray, out: *mut i32) -> i32;

    unsafe fn type_get_or_alloc_index(
        &self,
        key: *const ByteArray,
        static_index: i32,
        depth: i32,
        num_child_slots: i32,
        child_slots_can_overflow: i32,
        parent_index: i32,
    ) -> i32;

    /// Null for an unknown index.
    unsafe fn get_type_info(&self, type_index: i32) -> *const TypeInfo;

    /// Wraps an external buffer as a refcounted tensor. On success the
    /// tensor owns `managed` and will run its deleter; on failure the
    /// caller still owns it.
    unsafe fn tensor_from_dlpack(
        &self,
        managed: *mut DLManagedTensor,
        require_alignment: i32,
        require_contiguous: i32,
        out: *mut ObjectHandle,
    ) -> i32;

    unsafe fn tensor_to_dlpack(&self, tensor: ObjectHandle, out: *mut *mut DLManagedTensor)
    -> i32;
}

static API: OnceLock<Box<dyn NativeApi>> = OnceLock::new();

/// The process-wide native runtime.
pub fn api() -> &'static dyn NativeApi {
    API.get_or_init(|| Box::new(LocalRuntime::new())).as_ref()
}

/// Installs `runtime` as the process-wide native runtime.
///
/// Must run before the first call that touches the boundary.
pub fn install(runtime: Box<dyn NativeApi>) -> Result<(), FfiError> {
    API.set(runtime)
        .map_err(|_| FfiError::invalid("a native runtime is already installed"))
}

pub(crate) fn check(status: i32) -> Result<(), FfiError> {
    if status == 0 {
        Ok(())
    } else {
        Err(FfiError::Native(take_raised_error()))
    }
}

pub(crate) fn inc_ref(handle: ObjectHandle) -> Result<(), FfiError> {
    if handle.is_null() {
        return Err(FfiError::NullHandle);
    }
    // SAFETY: non-null handles reaching here come from live wrappers.
    check(unsafe { api().object_inc_ref(handle) })
}

pub(crate) fn dec_ref(handle: ObjectHandle) -> Result<(), FfiError> {
    if handle.is_null() {
        return Err(FfiError::NullHandle);
    }
    // SAFETY: as for `inc_ref`; the caller gives up one reference.
    check(unsafe { api().object_dec_ref(handle) })
}

/// Moves the pending native error out of the raised slot.
pub(crate) fn take_raised_error() -> NativeError {
    let mut raw: ObjectHandle = std::ptr::null_mut();
    // SAFETY: `raw` is a valid out slot.
    unsafe { api().error_move_from_raised(&mut raw) };
    if raw.is_null() {
        return NativeError::new("RuntimeError", "native call failed without raising an error");
    }
    match ErrorRef::from_owned_raw(raw) {
        Ok(err) => err.to_native_error(),
        Err(err) => NativeError::new("RuntimeError", err.to_string()),
    }
}

/// Raises `kind: message` as the current native error.
pub(crate) fn raise(kind: &str, message: &str) {
    let kind = ByteArray::from_slice(kind.as_bytes());
    let message = ByteArray::from_slice(message.as_bytes());
    let backtrace = ByteArray::empty();
    let mut raw: ObjectHandle = std::ptr::null_mut();
    // SAFETY: the byte arrays borrow live strings for the duration of the call.
    let status = unsafe { api().error_create(&kind, &message, &backtrace, &mut raw) };
    if status != 0 || raw.is_null() {
        log::error!("failed to allocate native error object");
        return;
    }
    // SAFETY: `raw` is a fresh error holding one reference, which the raised
    // slot retains separately before we release ours.
    unsafe {
        api().error_set_raised(raw);
        api().object_dec_ref(raw);
    }
}
