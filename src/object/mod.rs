//! Owning handles to native heap objects.
//!
//! [`Handle`] is the one place a native reference is held on the host side:
//! it takes the reference on construction, releases it exactly once on drop,
//! and stops calling into the native runtime once shutdown has begun.
//! Functions, tensors, modules and errors are specializations picked by a
//! zero-sized kind parameter.

mod error_ref;
pub mod types;

use std::{fmt, marker::PhantomData, ptr::NonNull};

pub use error_ref::ErrorRef;

use crate::{
    abi::{ObjectHandle, ObjectHeader, cell_ptr, type_index},
    error::FfiError,
    leak_detector, native, shutdown,
};

/// Selects which type indices a [`Handle`] accepts.
pub trait ObjectKind: 'static {
    const NAME: &'static str;

    fn accepts(type_index: i32) -> bool;
}

#[derive(Debug)]
pub enum AnyKind {}

impl ObjectKind for AnyKind {
    const NAME: &'static str = "Object";

    fn accepts(index: i32) -> bool {
        index >= type_index::STATIC_OBJECT_BEGIN
    }
}

macro_rules! exact_kind {
    ($kind:ident, $name:literal, $index:expr) => {
        #[derive(Debug)]
        pub enum $kind {}

        impl ObjectKind for $kind {
            const NAME: &'static str = $name;

            fn accepts(index: i32) -> bool {
                index == $index
            }
        }
    };
}

exact_kind!(FunctionKind, "Function", type_index::FUNCTION);
exact_kind!(TensorKind, "Tensor", type_index::TENSOR);
exact_kind!(ModuleKind, "Module", type_index::MODULE);
exact_kind!(ErrorKind, "Error", type_index::ERROR);

pub type ObjectRef = Handle<AnyKind>;
pub type Function = Handle<FunctionKind>;
pub type Tensor = Handle<TensorKind>;
pub type Module = Handle<ModuleKind>;

/// One strong reference to a native object of kind `K`.
pub struct Handle<K: ObjectKind> {
    ptr: NonNull<ObjectHeader>,
    _kind: PhantomData<K>,
}

// SAFETY: the native refcount is atomic and handles never expose `&mut` to
// the object.
unsafe impl<K: ObjectKind> Send for Handle<K> {}
unsafe impl<K: ObjectKind> Sync for Handle<K> {}

impl<K: ObjectKind> Handle<K> {
    /// Adopts a reference the producer already transferred; no increment.
    ///
    /// A handle of the wrong type is released before the error is returned.
    pub fn from_owned_raw(raw: ObjectHandle) -> Result<Self, FfiError> {
        let ptr = NonNull::new(raw).ok_or(FfiError::NullHandle)?;
        // SAFETY: non-null handles from the native side point at a header.
        let index = unsafe { ptr.as_ref().type_index };
        if !K::accepts(index) {
            native::dec_ref(raw)?;
            return Err(mismatch::<K>(index));
        }
        leak_detector::record_handle_retained();
        Ok(Self {
            ptr,
            _kind: PhantomData,
        })
    }

    /// Takes a new reference to a borrowed handle.
    pub fn from_borrowed_raw(raw: ObjectHandle) -> Result<Self, FfiError> {
        let ptr = NonNull::new(raw).ok_or(FfiError::NullHandle)?;
        // SAFETY: as above.
        let index = unsafe { ptr.as_ref().type_index };
        if !K::accepts(index) {
            return Err(mismatch::<K>(index));
        }
        native::inc_ref(raw)?;
        leak_detector::record_handle_retained();
        Ok(Self {
            ptr,
            _kind: PhantomData,
        })
    }

    pub fn as_raw(&self) -> ObjectHandle {
        self.ptr.as_ptr()
    }

    /// Gives the reference back to the caller without releasing it.
    pub fn into_raw(self) -> ObjectHandle {
        let raw = self.as_raw();
        std::mem::forget(self);
        leak_detector::record_handle_released();
        raw
    }

    fn header(&self) -> &ObjectHeader {
        // SAFETY: we hold a strong reference, so the header is live.
        unsafe { self.ptr.as_ref() }
    }

    pub fn type_index(&self) -> i32 {
        self.header().type_index
    }

    pub fn strong_count(&self) -> u32 {
        self.header().strong_count()
    }

    /// Type-specific cell following the header.
    ///
    /// # Safety
    /// `T` must be the cell layout of this object's type.
    pub unsafe fn cell<T>(&self) -> &T {
        unsafe { &*cell_ptr::<T>(self.as_raw()) }
    }

    pub fn ptr_eq<L: ObjectKind>(&self, other: &Handle<L>) -> bool {
        self.as_raw() == other.as_raw()
    }

    pub fn upcast(self) -> ObjectRef {
        Handle {
            ptr: self.forget_ptr(),
            _kind: PhantomData,
        }
    }

    /// Registered key of this object's type, e.g. `"ffi.Tensor"`.
    pub fn type_key(&self) -> Result<String, FfiError> {
        types::type_key_of(self.type_index())
    }

    fn forget_ptr(self) -> NonNull<ObjectHeader> {
        let ptr = self.ptr;
        std::mem::forget(self);
        ptr
    }
}

impl ObjectRef {
    /// Narrows to a specific kind, or hands the generic handle back.
    pub fn downcast<K: ObjectKind>(self) -> Result<Handle<K>, ObjectRef> {
        if K::accepts(self.type_index()) {
            Ok(Handle {
                ptr: self.forget_ptr(),
                _kind: PhantomData,
            })
        } else {
            Err(self)
        }
    }
}

fn mismatch<K: ObjectKind>(index: i32) -> FfiError {
    FfiError::invalid(format!(
        "expected {} object, got type index {}",
        K::NAME,
        index
    ))
}

impl<K: ObjectKind> Clone for Handle<K> {
    fn clone(&self) -> Self {
        if let Err(err) = native::inc_ref(self.as_raw()) {
            log::error!("retaining {} handle failed: {}", K::NAME, err);
        }
        leak_detector::record_handle_retained();
        Self {
            ptr: self.ptr,
            _kind: PhantomData,
        }
    }
}

impl<K: ObjectKind> Drop for Handle<K> {
    fn drop(&mut self) {
        leak_detector::record_handle_released();
        if shutdown::is_exiting() {
            return;
        }
        if let Err(err) = native::dec_ref(self.as_raw()) {
            log::warn!("releasing {} handle failed: {}", K::NAME, err);
        }
    }
}

impl<K: ObjectKind> fmt::Debug for Handle<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({:p}, type_index={})",
            K::NAME,
            self.as_raw(),
            self.type_index()
        )
    }
}
