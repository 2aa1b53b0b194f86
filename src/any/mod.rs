//! The ownership split over [`RawAny`].
//!
//! An [`AnyView`] is a borrowed slot: reading it never touches a refcount,
//! and anything kept past the borrow is either copied out or promoted. An
//! [`Any`] owns the one reference its slot carries and gives it up exactly
//! once: by dropping, by [`Any::take`], or by
//! [`Any::transfer_ownership`].

mod decode;
mod encode;

use std::{fmt, marker::PhantomData};

pub(crate) use decode::RawTensor;

use crate::{
    abi::{AnyTag, RawAny},
    error::FfiError,
    native, shutdown,
    tensor::Lease,
    value::Value,
};

/// Whether a decoded handle adopts the slot's reference or takes its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    Borrowed,
    Owned,
}

/// Read-only view of a slot owned by someone else for `'a`.
#[derive(Clone, Copy)]
pub struct AnyView<'a> {
    raw: RawAny,
    _borrow: PhantomData<&'a RawAny>,
}

impl<'a> AnyView<'a> {
    /// # Safety
    /// Any pointer or handle in `slot` must stay valid for `'a`.
    pub unsafe fn new(slot: &'a RawAny) -> Self {
        Self {
            raw: *slot,
            _borrow: PhantomData,
        }
    }

    /// # Safety
    /// Any pointer in `raw` must stay valid for `'a`.
    pub unsafe fn from_raw(raw: RawAny) -> Self {
        Self {
            raw,
            _borrow: PhantomData,
        }
    }

    pub fn raw(&self) -> RawAny {
        self.raw
    }

    pub fn tag(&self) -> Result<AnyTag, FfiError> {
        self.raw.tag()
    }

    /// Decodes into a host value that may outlive the view.
    ///
    /// Heap handles take a reference of their own; a raw tensor pointer is
    /// copied into a fresh host array.
    pub fn decode(&self) -> Result<Value, FfiError> {
        // SAFETY: the view's payload is valid for 'a, which covers this call.
        unsafe { decode::decode(self.raw, Ownership::Borrowed, RawTensor::Copy) }
    }

    /// Like [`decode`](Self::decode), but a host raw tensor pointer is
    /// wrapped in place rather than copied.
    ///
    /// # Safety
    /// Arrays produced from raw tensor pointers borrow the producer's
    /// memory and must be dropped before `'a` ends.
    pub unsafe fn decode_in_place(&self) -> Result<Value, FfiError> {
        unsafe { decode::decode(self.raw, Ownership::Borrowed, RawTensor::Wrap(None)) }
    }

    /// Like [`decode_in_place`](Self::decode_in_place), but wrapped host
    /// arrays stop reading once `lease` is revoked.
    ///
    /// # Safety
    /// The producer's memory must stay valid until `lease` is revoked.
    pub(crate) unsafe fn decode_lent(&self, lease: &Lease) -> Result<Value, FfiError> {
        unsafe { decode::decode(self.raw, Ownership::Borrowed, RawTensor::Wrap(Some(lease))) }
    }

    /// Owned copy of the slot, made by the native view-to-owned primitive.
    pub fn promote(&self) -> Result<Any, FfiError> {
        let mut out = RawAny::none();
        // SAFETY: both slots are valid for the duration of the call.
        let status = unsafe { native::api().any_view_to_owned(&self.raw, &mut out) };
        if status != 0 {
            let raised = native::take_raised_error();
            return Err(FfiError::Conversion {
                status,
                context: raised.to_string(),
            });
        }
        Ok(Any { raw: out })
    }
}

impl fmt::Debug for AnyView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AnyView({:?})", self.raw)
    }
}

/// Owning slot. Releases its heap reference on drop.
pub struct Any {
    raw: RawAny,
}

// SAFETY: the slot holds either POD bits or one atomic native reference.
unsafe impl Send for Any {}

impl Default for Any {
    fn default() -> Self {
        Self::none()
    }
}

impl Any {
    pub const fn none() -> Self {
        Self {
            raw: RawAny::none(),
        }
    }

    /// Adopts a slot whose producer already transferred one reference.
    ///
    /// # Safety
    /// An object payload must be a live handle whose reference now belongs
    /// to the result.
    pub unsafe fn from_raw_owned(raw: RawAny) -> Self {
        Self { raw }
    }

    /// Encodes `value`, taking a fresh reference for any heap payload.
    pub fn from_value(value: &Value) -> Result<Self, FfiError> {
        encode::encode_owned(value).map(|raw| Self { raw })
    }

    pub fn raw(&self) -> &RawAny {
        &self.raw
    }

    pub fn view(&self) -> AnyView<'_> {
        // SAFETY: this slot owns a reference for as long as it is borrowed.
        unsafe { AnyView::new(&self.raw) }
    }

    pub fn is_none(&self) -> bool {
        self.raw.type_index == crate::abi::type_index::NONE
    }

    /// Moves the payload out and decodes it; the decoded value becomes the
    /// sole owner of the reference.
    ///
    /// The slot is cleared to None first, so a second `take` yields
    /// `Value::None` and never releases twice.
    pub fn take(&mut self) -> Result<Value, FfiError> {
        let raw = std::mem::replace(&mut self.raw, RawAny::none());
        // SAFETY: `raw` carried our one reference, which decode consumes.
        unsafe { decode::decode(raw, Ownership::Owned, RawTensor::Copy) }
    }

    pub fn into_value(mut self) -> Result<Value, FfiError> {
        self.take()
    }

    /// Hands the slot, reference included, to a new owner.
    pub fn transfer_ownership(mut self) -> RawAny {
        std::mem::replace(&mut self.raw, RawAny::none())
    }
}

impl Drop for Any {
    fn drop(&mut self) {
        if !self.raw.is_object() || self.raw.as_object().is_null() {
            return;
        }
        if shutdown::is_exiting() {
            return;
        }
        if let Err(err) = native::dec_ref(self.raw.as_object()) {
            log::warn!("releasing owned slot failed: {}", err);
        }
    }
}

impl fmt::Debug for Any {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Any({:?})", self.raw)
    }
}
