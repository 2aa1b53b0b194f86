//! Array exchange.
//!
//! [`HostArray`] is the host's own strided array. [`TensorView`] describes
//! one for the length of a single call without allocating on the native
//! side; a refcounted [`Tensor`](crate::object::Tensor) is used when the
//! array has to outlive the call.

mod array;
pub mod keepalive;
pub mod layout;
mod owned;
mod view;

pub use array::{Element, HostArray, KeepAlive};
pub(crate) use array::Lease;
pub(crate) use owned::tensor_on_device;
pub use layout::Layout;
pub use owned::{DlpackCapsule, tensor_from_host_array};
pub use view::{TensorOwnership, TensorView};

#[cfg(test)]
mod layout_test;
#[cfg(test)]
mod owned_test;
