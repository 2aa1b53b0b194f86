//! Value exchange between Rust and a TVM-FFI style native runtime.
//!
//! Values cross the boundary as 16-byte tagged slots ([`abi::RawAny`]).
//! Heap objects carry a refcounted header; [`any::Any`] and
//! [`any::AnyView`] decide who owns the reference a slot carries.
//! Arrays cross as borrowed tensor views for the length of a call, or as
//! refcounted tensors when they must outlive it. Host closures are exposed
//! to native code through one trampoline and a pinned callback table.

pub mod abi;
pub mod any;
pub mod backend;
pub mod config;
pub mod error;
pub mod function;
pub mod leak_detector;
pub mod native;
pub mod object;
pub mod shutdown;
pub mod tensor;
pub mod value;

pub use any::{Any, AnyView, Ownership};
pub use config::Config;
pub use error::{FfiError, NativeError};
pub use function::{get_global_function, register_global_function};
pub use object::{ErrorRef, Function, Module, ObjectRef, Tensor};
pub use tensor::{HostArray, Layout, TensorOwnership, TensorView};
pub use value::{DataType, Device, DeviceKind, Value};
