use std::{
    cell::Cell,
    collections::HashMap,
    os::raw::c_void,
    sync::{
        LazyLock, Mutex, PoisonError,
        atomic::{Ordering, fence},
    },
};

use crate::abi::{
    ByteArray, ContextDeleter, DLManagedTensor, DLTensor, ErrorCell, ObjectHandle, ObjectHeader,
    SafeCallFn, ShapeCell, object::{DELETER_FLAG_BOTH, DELETER_FLAG_STRONG, STRONG_COUNT_MASK},
    type_index,
};

/// Header and cell allocated together; the cell lands at `CELL_OFFSET`.
#[repr(C)]
struct ObjBox<T> {
    header: ObjectHeader,
    cell: T,
}

unsafe extern "C" fn delete_box<T>(object: *mut c_void, flags: i32) {
    if flags & DELETER_FLAG_STRONG != 0 {
        // SAFETY: `object` was produced by `alloc::<T>` and the strong count
        // just reached zero.
        drop(unsafe { Box::from_raw(object as *mut ObjBox<T>) });
    }
}

pub(crate) fn alloc<T>(type_index: i32, cell: T) -> ObjectHandle {
    let boxed = Box::new(ObjBox {
        header: ObjectHeader::new(type_index, Some(delete_box::<T>)),
        cell,
    });
    let handle = Box::into_raw(boxed) as ObjectHandle;
    ledger_touch(handle);
    handle
}

/// Increments and decrements observed for one live handle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefLedger {
    pub increments: u64,
    pub decrements: u64,
}

impl RefLedger {
    pub fn is_balanced(&self) -> bool {
        self.increments == self.decrements
    }
}

static LEDGER: LazyLock<Mutex<HashMap<usize, RefLedger>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn with_ledger<R>(f: impl FnOnce(&mut HashMap<usize, RefLedger>) -> R) -> R {
    let mut ledger = LEDGER.lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut ledger)
}

fn ledger_touch(handle: ObjectHandle) {
    with_ledger(|ledger| {
        ledger.insert(handle as usize, RefLedger::default());
    });
}

/// Ledger of a live handle allocated by the local runtime.
pub fn ledger(handle: ObjectHandle) -> RefLedger {
    with_ledger(|ledger| ledger.get(&(handle as usize)).copied().unwrap_or_default())
}

/// Number of local objects not yet freed.
pub fn live_objects() -> usize {
    with_ledger(|ledger| ledger.len())
}

pub(crate) unsafe fn inc_ref(handle: ObjectHandle) {
    // SAFETY: caller passes a live object.
    let header = unsafe { &*handle };
    header.combined_ref_count.fetch_add(1, Ordering::Relaxed);
    with_ledger(|ledger| {
        if let Some(entry) = ledger.get_mut(&(handle as usize)) {
            entry.increments += 1;
        }
    });
}

pub(crate) unsafe fn dec_ref(handle: ObjectHandle) {
    with_ledger(|ledger| {
        if let Some(entry) = ledger.get_mut(&(handle as usize)) {
            entry.decrements += 1;
        }
    });
    // SAFETY: caller passes a live object and gives up one reference.
    let header = unsafe { &*handle };
    let previous = header.combined_ref_count.fetch_sub(1, Ordering::Release);
    if previous & STRONG_COUNT_MASK == 1 {
        fence(Ordering::Acquire);
        with_ledger(|ledger| {
            ledger.remove(&(handle as usize));
        });
        if let Some(deleter) = header.deleter {
            // SAFETY: last strong reference; nobody else can observe the object.
            unsafe { deleter(handle as *mut c_void, DELETER_FLAG_BOTH) };
        }
    }
}

/// Owned bytes exposed through a leading `ByteArray`, the cell layout of
/// `ffi.Str` and `ffi.Bytes`.
#[repr(C)]
#[allow(dead_code)] // read through cell pointers
pub(crate) struct ByteCell {
    array: ByteArray,
    storage: Box<[u8]>,
}

pub(crate) fn new_bytes(type_index: i32, bytes: &[u8]) -> ObjectHandle {
    let storage: Box<[u8]> = bytes.into();
    let array = ByteArray::from_slice(&storage);
    alloc(type_index, ByteCell { array, storage })
}

#[repr(C)]
#[allow(dead_code)] // read through cell pointers
pub(crate) struct ErrorStorage {
    cell: ErrorCell,
    kind: Box<[u8]>,
    message: Box<[u8]>,
    backtrace: Box<[u8]>,
}

pub(crate) fn new_error(kind: &[u8], message: &[u8], backtrace: &[u8]) -> ObjectHandle {
    let kind: Box<[u8]> = kind.into();
    let message: Box<[u8]> = message.into();
    let backtrace: Box<[u8]> = backtrace.into();
    let cell = ErrorCell {
        kind: ByteArray::from_slice(&kind),
        message: ByteArray::from_slice(&message),
        backtrace: ByteArray::from_slice(&backtrace),
    };
    alloc(
        type_index::ERROR,
        ErrorStorage {
            cell,
            kind,
            message,
            backtrace,
        },
    )
}

#[repr(C)]
#[allow(dead_code)] // read through cell pointers
pub(crate) struct ShapeStorage {
    cell: ShapeCell,
    dims: Box<[i64]>,
}

pub(crate) fn new_shape(dims: &[i64]) -> ObjectHandle {
    let dims: Box<[i64]> = dims.into();
    let cell = ShapeCell {
        data: dims.as_ptr(),
        size: dims.len(),
    };
    alloc(type_index::SHAPE, ShapeStorage { cell, dims })
}

#[repr(C)]
pub(crate) struct FunctionCell {
    pub(crate) safe_call: SafeCallFn,
    pub(crate) context: *mut c_void,
    context_deleter: Option<ContextDeleter>,
}

impl Drop for FunctionCell {
    fn drop(&mut self) {
        if let Some(deleter) = self.context_deleter {
            // SAFETY: the context was handed over at creation together with
            // this deleter, and the function object is going away.
            unsafe { deleter(self.context) };
        }
    }
}

pub(crate) fn new_function(
    safe_call: SafeCallFn,
    context: *mut c_void,
    context_deleter: Option<ContextDeleter>,
) -> ObjectHandle {
    alloc(
        type_index::FUNCTION,
        FunctionCell {
            safe_call,
            context,
            context_deleter,
        },
    )
}

/// Cell of `ffi.Tensor`: a `DLTensor` with filled-in strides, followed by
/// the producer's managed tensor.
#[repr(C)]
pub(crate) struct TensorStorage {
    dl: DLTensor,
    shape: Box<[i64]>,
    strides: Box<[i64]>,
    managed: *mut DLManagedTensor,
}

impl Drop for TensorStorage {
    fn drop(&mut self) {
        if self.managed.is_null() {
            return;
        }
        // SAFETY: the tensor took ownership of `managed` on creation.
        unsafe {
            if let Some(deleter) = (*self.managed).deleter {
                deleter(self.managed);
            }
        }
    }
}

/// Wraps `managed` without validation; the tensor takes ownership.
///
/// # Safety
/// `managed` must be a valid managed tensor whose shape/strides arrays have
/// `ndim` entries.
pub(crate) unsafe fn new_tensor(managed: *mut DLManagedTensor) -> ObjectHandle {
    // SAFETY: guaranteed by the caller.
    let source = unsafe { (*managed).dl_tensor };
    let shape: Box<[i64]> = unsafe { source.shape_slice() }.into();
    let strides: Box<[i64]> = match unsafe { source.strides_slice() } {
        Some(strides) => strides.into(),
        None => row_major(&shape).into_boxed_slice(),
    };
    let mut storage = TensorStorage {
        dl: source,
        shape,
        strides,
        managed,
    };
    storage.dl.shape = storage.shape.as_mut_ptr();
    storage.dl.strides = storage.strides.as_mut_ptr();
    alloc(type_index::TENSOR, storage)
}

pub(crate) fn row_major(shape: &[i64]) -> Vec<i64> {
    let mut strides = vec![1i64; shape.len()];
    for axis in (0..shape.len().saturating_sub(1)).rev() {
        strides[axis] = strides[axis + 1] * shape[axis + 1].max(1);
    }
    strides
}

#[repr(C)]
#[allow(dead_code)] // read through cell pointers
pub(crate) struct ModuleStorage {
    name: ByteArray,
    storage: Box<[u8]>,
}

pub(crate) fn new_module(name: &str) -> ObjectHandle {
    let storage: Box<[u8]> = name.as_bytes().into();
    let name = ByteArray::from_slice(&storage);
    alloc(type_index::MODULE, ModuleStorage { name, storage })
}

thread_local! {
    static RAISED: Cell<ObjectHandle> = const { Cell::new(std::ptr::null_mut()) };
}

/// Stores `error` in the raised slot, consuming one reference to it.
pub(crate) fn store_raised(error: ObjectHandle) {
    let previous = RAISED.with(|slot| slot.replace(error));
    if !previous.is_null() {
        // SAFETY: the slot owned one reference to the previous error.
        unsafe { dec_ref(previous) };
    }
}

pub(crate) fn take_raised() -> ObjectHandle {
    RAISED.with(|slot| slot.replace(std::ptr::null_mut()))
}

/// Raises a freshly created `kind: message` error on this thread.
pub(crate) fn raise(kind: &str, message: &str) -> i32 {
    store_raised(new_error(kind.as_bytes(), message.as_bytes(), b""));
    -1
}
