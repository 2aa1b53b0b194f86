//! In-process native runtime.
//!
//! Objects are heap boxes carrying the real header layout, so handles it
//! hands out are indistinguishable from those of an external runtime. Every
//! increment and decrement goes through a per-handle ledger that tests read
//! back with [`ledger`].

mod builtins;
mod objects;
mod types;

use std::{
    collections::HashMap,
    ffi::CStr,
    os::raw::{c_char, c_void},
    sync::{Mutex, PoisonError},
};

use crate::{
    abi::{
        ByteArray, ContextDeleter, DLManagedTensor, ObjectHandle, RawAny, SafeCallFn, TypeInfo,
        cell_ptr, type_index,
    },
    native::NativeApi,
};

use objects::{FunctionCell, raise};
pub use objects::{RefLedger, ledger, live_objects};
use types::TypeTable;

struct GlobalSlot(ObjectHandle);

// SAFETY: the slot owns one reference; refcounts are atomic.
unsafe impl Send for GlobalSlot {}

pub struct LocalRuntime {
    globals: Mutex<HashMap<String, GlobalSlot>>,
    types: Mutex<TypeTable>,
}

impl Default for LocalRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalRuntime {
    pub fn new() -> Self {
        let runtime = Self {
            globals: Mutex::new(HashMap::new()),
            types: Mutex::new(TypeTable::new()),
        };
        {
            let mut globals = runtime.globals.lock().unwrap_or_else(PoisonError::into_inner);
            for (name, handle) in builtins::install() {
                globals.insert(name.to_string(), GlobalSlot(handle));
            }
        }
        runtime
    }

    fn key(array: *const ByteArray) -> Option<String> {
        if array.is_null() {
            return None;
        }
        // SAFETY: callers pass a live byte array.
        let bytes = unsafe { (*array).as_slice() };
        std::str::from_utf8(bytes).ok().map(str::to_string)
    }
}

impl NativeApi for LocalRuntime {
    unsafe fn object_inc_ref(&self, handle: ObjectHandle) -> i32 {
        if handle.is_null() {
            return raise("ValueError", "IncRef on a null handle");
        }
        unsafe { objects::inc_ref(handle) };
        0
    }

    unsafe fn object_dec_ref(&self, handle: ObjectHandle) -> i32 {
        if handle.is_null() {
            return raise("ValueError", "DecRef on a null handle");
        }
        unsafe { objects::dec_ref(handle) };
        0
    }

    unsafe fn any_view_to_owned(&self, view: *const RawAny, out: *mut RawAny) -> i32 {
        // SAFETY: both slots are valid per the trait contract.
        let view = unsafe { *view };
        let owned = match view.type_index {
            type_index::RAW_STR => {
                let ptr: *mut c_char = view.as_ptr();
                if ptr.is_null() {
                    return raise("ValueError", "null raw string");
                }
                let bytes = unsafe { CStr::from_ptr(ptr) }.to_bytes();
                match std::str::from_utf8(bytes) {
                    Ok(text) => RawAny::small_str(text).unwrap_or_else(|| {
                        RawAny::object(type_index::STR, objects::new_bytes(type_index::STR, bytes))
                    }),
                    Err(_) => return raise("ValueError", "raw string is not valid UTF-8"),
                }
            }
            type_index::BYTE_ARRAY_PTR => {
                let array: *mut ByteArray = view.as_ptr();
                if array.is_null() {
                    return raise("ValueError", "null byte array");
                }
                let bytes = unsafe { (*array).as_slice() };
                RawAny::small_bytes(bytes).unwrap_or_else(|| {
                    RawAny::object(
                        type_index::BYTES,
                        objects::new_bytes(type_index::BYTES, bytes),
                    )
                })
            }
            type_index::OBJECT_RVALUE_REF => {
                let slot: *mut ObjectHandle = view.as_ptr();
                if slot.is_null() {
                    return raise("ValueError", "null rvalue reference");
                }
                let handle = unsafe { std::mem::replace(&mut *slot, std::ptr::null_mut()) };
                if handle.is_null() {
                    RawAny::none()
                } else {
                    RawAny::object(unsafe { (*handle).type_index }, handle)
                }
            }
            index if index >= type_index::STATIC_OBJECT_BEGIN => {
                let handle = view.as_object();
                if !handle.is_null() {
                    unsafe { objects::inc_ref(handle) };
                }
                view
            }
            _ => view,
        };
        unsafe { *out = owned };
        0
    }

    unsafe fn function_call(
        &self,
        func: ObjectHandle,
        args: *const RawAny,
        num_args: i32,
        result: *mut RawAny,
    ) -> i32 {
        if func.is_null() {
            return raise("ValueError", "call through a null function handle");
        }
        // SAFETY: `func` is a live object.
        let index = unsafe { (*func).type_index };
        if index != type_index::FUNCTION {
            return raise(
                "TypeError",
                &format!("object of type index {} is not callable", index),
            );
        }
        let cell = unsafe { &*cell_ptr::<FunctionCell>(func) };
        unsafe { (cell.safe_call)(cell.context, args, num_args, result) }
    }

    unsafe fn function_create(
        &self,
        context: *mut c_void,
        safe_call: SafeCallFn,
        context_deleter: Option<ContextDeleter>,
        out: *mut ObjectHandle,
    ) -> i32 {
        let handle = objects::new_function(safe_call, context, context_deleter);
        unsafe { *out = handle };
        0
    }

    unsafe fn function_get_global(&self, name: *const ByteArray, out: *mut ObjectHandle) -> i32 {
        let Some(name) = Self::key(name) else {
            return raise("ValueError", "function name is not valid UTF-8");
        };
        let globals = self.globals.lock().unwrap_or_else(PoisonError::into_inner);
        let handle = match globals.get(&name) {
            Some(slot) => {
                unsafe { objects::inc_ref(slot.0) };
                slot.0
            }
            None => std::ptr::null_mut(),
        };
        unsafe { *out = handle };
        0
    }

    unsafe fn function_set_global(
        &self,
        name: *const ByteArray,
        func: ObjectHandle,
        can_override: i32,
    ) -> i32 {
        let Some(name) = Self::key(name) else {
            return raise("ValueError", "function name is not valid UTF-8");
        };
        if func.is_null() {
            return raise("ValueError", "cannot register a null function");
        }
        let previous = {
            let mut globals = self.globals.lock().unwrap_or_else(PoisonError::into_inner);
            if globals.contains_key(&name) && can_override == 0 {
                drop(globals);
                return raise(
                    "RuntimeError",
                    &format!("Global Function `{}` is already registered", name),
                );
            }
            unsafe { objects::inc_ref(func) };
            globals.insert(name, GlobalSlot(func))
        };
        // Released outside the lock: the deleter may call back into the host.
        if let Some(GlobalSlot(old)) = previous {
            unsafe { objects::dec_ref(old) };
        }
        0
    }

    unsafe fn string_create(&self, data: *const ByteArray, out: *mut RawAny) -> i32 {
        let bytes = unsafe { (*data).as_slice() };
        if std::str::from_utf8(bytes).is_err() {
            return raise("ValueError", "string payload is not valid UTF-8");
        }
        let handle = objects::new_bytes(type_index::STR, bytes);
        unsafe { *out = RawAny::object(type_index::STR, handle) };
        0
    }

    unsafe fn bytes_create(&self, data: *const ByteArray, out: *mut RawAny) -> i32 {
        let bytes = unsafe { (*data).as_slice() };
        let handle = objects::new_bytes(type_index::BYTES, bytes);
        unsafe { *out = RawAny::object(type_index::BYTES, handle) };
        0
    }

    unsafe fn shape_create(&self, dims: *const i64, ndim: usize, out: *mut RawAny) -> i32 {
        let dims = if ndim == 0 || dims.is_null() {
            &[][..]
        } else {
            unsafe { std::slice::from_raw_parts(dims, ndim) }
        };
        if dims.iter().any(|d| *d < 0) {
            return raise("ValueError", "shape extents must be non-negative");
        }
        unsafe { *out = RawAny::object(type_index::SHAPE, objects::new_shape(dims)) };
        0
    }

    unsafe fn error_create(
        &self,
        kind: *const ByteArray,
        message: *const ByteArray,
        backtrace: *const ByteArray,
        out: *mut ObjectHandle,
    ) -> i32 {
        let (kind, message, backtrace) =
            unsafe { ((*kind).as_slice(), (*message).as_slice(), (*backtrace).as_slice()) };
        unsafe { *out = objects::new_error(kind, message, backtrace) };
        0
    }

    unsafe fn error_move_from_raised(&self, out: *mut ObjectHandle) {
        unsafe { *out = objects::take_raised() };
    }

    unsafe fn error_set_raised(&self, error: ObjectHandle) {
        if error.is_null() {
            return;
        }
        unsafe { objects::inc_ref(error) };
        objects::store_raised(error);
    }

    unsafe fn type_key_to_index(&self, key: *const ByteArray, out: *mut i32) -> i32 {
        let Some(key) = Self::key(key) else {
            return raise("ValueError", "type key is not valid UTF-8");
        };
        let found = self
            .types
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .key_to_index(&key);
        match found {
            Some(index) => {
                unsafe { *out = index };
                0
            }
            None => raise("KeyError", &format!("Cannot find type `{}`", key)),
        }
    }

    unsafe fn type_get_or_alloc_index(
        &self,
        key: *const ByteArray,
        static_index: i32,
        depth: i32,
        _num_child_slots: i32,
        _child_slots_can_overflow: i32,
        parent_index: i32,
    ) -> i32 {
        let Some(key) = Self::key(key) else {
            return -1;
        };
        let mut types = self.types.lock().unwrap_or_else(PoisonError::into_inner);
        types.get_or_alloc(&key, static_index, depth, parent_index)
    }

    unsafe fn get_type_info(&self, type_index: i32) -> *const TypeInfo {
        let types = self.types.lock().unwrap_or_else(PoisonError::into_inner);
        types.info(type_index)
    }

    unsafe fn tensor_from_dlpack(
        &self,
        managed: *mut DLManagedTensor,
        require_alignment: i32,
        require_contiguous: i32,
        out: *mut ObjectHandle,
    ) -> i32 {
        if managed.is_null() {
            return raise("ValueError", "null managed tensor");
        }
        let dl = unsafe { (*managed).dl_tensor };
        if dl.ndim < 0 {
            return raise("ValueError", "negative ndim");
        }
        let address = dl.data as usize + dl.byte_offset as usize;
        if require_alignment > 0 && address % require_alignment as usize != 0 {
            return raise(
                "ValueError",
                &format!("data is not aligned to {} bytes", require_alignment),
            );
        }
        if require_contiguous != 0 {
            let shape = unsafe { dl.shape_slice() };
            if let Some(strides) = unsafe { dl.strides_slice() } {
                let expected = objects::row_major(shape);
                let contiguous = shape
                    .iter()
                    .zip(strides.iter().zip(&expected))
                    .all(|(extent, (actual, want))| *extent == 1 || actual == want);
                if !contiguous {
                    return raise("ValueError", "tensor is not contiguous");
                }
            }
        }
        unsafe { *out = objects::new_tensor(managed) };
        0
    }

    unsafe fn tensor_to_dlpack(
        &self,
        tensor: ObjectHandle,
        out: *mut *mut DLManagedTensor,
    ) -> i32 {
        if tensor.is_null() {
            return raise("ValueError", "null tensor handle");
        }
        if unsafe { (*tensor).type_index } != type_index::TENSOR {
            return raise("TypeError", "object is not a tensor");
        }
        unsafe { *out = builtins::export_tensor(tensor) };
        0
    }
}
