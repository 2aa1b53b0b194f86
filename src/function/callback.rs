//! Host closures callable from the native side.
//!
//! Each closure is pinned in a process-wide table under an integer token.
//! The token is the context pointer of the native function object, so it
//! never moves; the native deleter removes the entry when the last
//! reference to the function goes away.

use std::{
    collections::BTreeMap,
    os::raw::c_void,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, LazyLock, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

use crate::{
    abi::{ObjectHandle, RawAny, type_index},
    any::{Any, AnyView},
    error::FfiError,
    leak_detector, native,
    object::Function,
    shutdown,
    tensor::Lease,
    value::Value,
};

/// Signature of a host function exposed to native code.
pub type HostFunction = dyn Fn(&[Value]) -> Result<Value, FfiError> + Send + Sync;

struct CallbackEntry {
    name: String,
    func: Box<HostFunction>,
}

static REGISTRY: LazyLock<Mutex<BTreeMap<usize, Arc<CallbackEntry>>>> =
    LazyLock::new(|| Mutex::new(BTreeMap::new()));

static NEXT_TOKEN: AtomicUsize = AtomicUsize::new(1);

fn lookup(token: usize) -> Option<Arc<CallbackEntry>> {
    REGISTRY
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&token)
        .cloned()
}

fn release(token: usize) {
    let entry = REGISTRY
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&token);
    // Dropped outside the lock: the closure may own handles whose release
    // re-enters this table.
    match entry {
        Some(entry) => {
            leak_detector::record_callback_released();
            log::debug!("callback #{} (`{}`) unregistered", token, entry.name);
        }
        None => log::warn!("callback #{} released twice", token),
    }
}

/// Callbacks currently pinned.
pub fn registered_callbacks() -> usize {
    REGISTRY.lock().unwrap_or_else(PoisonError::into_inner).len()
}

/// Wraps `func` in a new native function object.
pub(crate) fn create_function(name: &str, func: Box<HostFunction>) -> Result<Function, FfiError> {
    let token = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
    REGISTRY
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(
            token,
            Arc::new(CallbackEntry {
                name: name.to_string(),
                func,
            }),
        );
    leak_detector::record_callback_registered();
    log::debug!("callback #{} registered for `{}`", token, name);

    let mut raw: ObjectHandle = std::ptr::null_mut();
    // SAFETY: the trampoline and deleter accept exactly this token.
    let status = unsafe {
        native::api().function_create(
            token as *mut c_void,
            callback_trampoline,
            Some(callback_deleter),
            &mut raw,
        )
    };
    if status != 0 {
        // The native side never took the token.
        let err = native::take_raised_error();
        release(token);
        return Err(FfiError::Native(err));
    }
    Function::from_owned_raw(raw)
}

/// Safe-call entry shared by every registered closure.
pub(crate) unsafe extern "C" fn callback_trampoline(
    context: *mut c_void,
    args: *const RawAny,
    num_args: i32,
    result: *mut RawAny,
) -> i32 {
    let token = context as usize;
    let Some(entry) = lookup(token) else {
        log::error!("native side invoked unknown callback #{}", token);
        native::raise(
            "RuntimeError",
            &format!("callback #{} is not registered", token),
        );
        return -1;
    };
    let args = if args.is_null() || num_args <= 0 {
        &[][..]
    } else {
        // SAFETY: the caller passes `num_args` readable slots.
        unsafe { std::slice::from_raw_parts(args, num_args as usize) }
    };
    let outcome = catch_unwind(AssertUnwindSafe(|| dispatch(&entry, args)));
    let message = match outcome {
        Ok(Ok(raw)) => {
            // SAFETY: `result` is the caller's writable out slot.
            unsafe { *result = raw };
            return 0;
        }
        Ok(Err(err)) => err.to_string(),
        Err(panic) => panic_message(panic.as_ref()),
    };
    log::debug!("callback `{}` failed: {}", entry.name, message);
    native::raise("RuntimeError", &message);
    -1
}

/// Ends a loan when dispatch leaves, unwinding included.
struct LoanScope(Lease);

impl Drop for LoanScope {
    fn drop(&mut self) {
        self.0.revoke();
    }
}

/// Runs the closure over borrowed arguments and returns an owned result.
///
/// Host arrays the closure receives are lent for this call only. A lent
/// array returned as is goes back as the caller's own slot; any other view
/// of lent memory is copied before it is encoded.
fn dispatch(entry: &CallbackEntry, args: &[RawAny]) -> Result<RawAny, FfiError> {
    let loan = LoanScope(Lease::new());
    // SAFETY: the caller keeps the slots' targets alive until we return, and
    // the loan is revoked before that.
    let values = args
        .iter()
        .map(|raw| unsafe { AnyView::from_raw(*raw).decode_lent(&loan.0) })
        .collect::<Result<Vec<_>, _>>()?;
    let ret = (entry.func)(&values)?;

    if let Value::Array(array) = &ret
        && let Some(pos) = values
            .iter()
            .position(|value| value.as_array().is_some_and(|arg| arg.ptr_eq(array)))
    {
        let raw = args[pos];
        match raw.type_index {
            // Never owned, so re-emitted as is.
            type_index::DLTENSOR_PTR => return Ok(raw),
            // The slot was borrowed; the result must own a reference.
            type_index::TENSOR => {
                native::inc_ref(raw.as_object())?;
                return Ok(raw);
            }
            _ => {}
        }
    }
    let ret = match ret {
        Value::Array(array) if array.is_lent() => Value::Array(array.to_owned_copy()?),
        other => other,
    };
    Ok(Any::from_value(&ret)?.transfer_ownership())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "host callback panicked".to_string()
    }
}

unsafe extern "C" fn callback_deleter(context: *mut c_void) {
    // Past shutdown the table is already gone.
    if shutdown::is_exiting() {
        return;
    }
    release(context as usize);
}

/// Empties the table without running any native release; returns how many
/// entries were dropped.
pub(crate) fn drain() -> usize {
    let entries = std::mem::take(&mut *REGISTRY.lock().unwrap_or_else(PoisonError::into_inner));
    let count = entries.len();
    drop(entries);
    count
}
