//! Host → native calls.
//!
//! Arguments are encoded as borrowed slots into one frame that lives for
//! the whole call: host arrays become stack-built tensor views, device
//! arrays become refcounted tensors, long strings become temporary heap
//! strings. Nothing the slots point at is released before the result has
//! been decoded.

use crate::{
    abi::{ByteArray, DLTensor, RawAny, cell_ptr, type_index},
    any::Any,
    config,
    error::FfiError,
    native,
    object::{Function, Tensor},
    tensor::{HostArray, TensorView, tensor_on_device},
    value::{DataType, Value},
};

/// How an array argument crossed the boundary; results are only matched
/// against arguments that crossed the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Passing {
    RawView,
    Refcounted,
}

#[derive(Debug)]
struct Alias {
    arg: usize,
    passing: Passing,
}

enum Slot {
    Ready(RawAny),
    View(usize),
    Bytes(usize),
}

/// Everything the argument slots of one call point into.
struct Frame<'a> {
    views: Vec<TensorView<'a>>,
    descriptors: Vec<DLTensor>,
    byte_arrays: Vec<ByteArray>,
    temporaries: Vec<Any>,
    tensors: Vec<Tensor>,
    aliases: Vec<Alias>,
    slots: Vec<RawAny>,
}

impl<'a> Frame<'a> {
    fn build(args: &'a [Value]) -> Result<Self, FfiError> {
        let mut frame = Frame {
            views: Vec::new(),
            descriptors: Vec::new(),
            byte_arrays: Vec::new(),
            temporaries: Vec::new(),
            tensors: Vec::new(),
            aliases: Vec::new(),
            slots: Vec::with_capacity(args.len()),
        };
        let pending = args
            .iter()
            .enumerate()
            .map(|(index, arg)| frame.encode(index, arg))
            .collect::<Result<Vec<_>, _>>()?;
        // Descriptors point into the views and slots point into both, so
        // each vector is complete before anything takes its addresses.
        frame.descriptors = frame.views.iter().map(TensorView::as_dltensor).collect();
        for slot in pending {
            let raw = match slot {
                Slot::Ready(raw) => raw,
                Slot::View(i) => RawAny::dltensor_ptr(&frame.descriptors[i]),
                Slot::Bytes(i) => RawAny::byte_array_ptr(&frame.byte_arrays[i]),
            };
            frame.slots.push(raw);
        }
        Ok(frame)
    }

    fn encode(&mut self, index: usize, arg: &'a Value) -> Result<Slot, FfiError> {
        let slot = match arg {
            Value::Str(text) => match RawAny::small_str(text) {
                Some(raw) => Slot::Ready(raw),
                None => self.temporary(arg)?,
            },
            Value::Bytes(bytes) => match RawAny::small_bytes(bytes) {
                Some(raw) => Slot::Ready(raw),
                None => {
                    self.byte_arrays.push(ByteArray::from_slice(bytes));
                    Slot::Bytes(self.byte_arrays.len() - 1)
                }
            },
            Value::Shape(_) => self.temporary(arg)?,
            Value::Array(array) => self.array(index, array)?,
            Value::Function(f) => Slot::Ready(RawAny::object(type_index::FUNCTION, f.as_raw())),
            Value::Module(m) => Slot::Ready(RawAny::object(type_index::MODULE, m.as_raw())),
            Value::Error(e) => Slot::Ready(RawAny::object(type_index::ERROR, e.handle().as_raw())),
            Value::Object(o) => Slot::Ready(RawAny::object(o.type_index(), o.as_raw())),
            // Plain data: the owned and borrowed encodings coincide.
            _ => Slot::Ready(*Any::from_value(arg)?.raw()),
        };
        Ok(slot)
    }

    /// A heap object that lives only for this call.
    fn temporary(&mut self, arg: &Value) -> Result<Slot, FfiError> {
        let owned = Any::from_value(arg)?;
        let raw = *owned.raw();
        self.temporaries.push(owned);
        Ok(Slot::Ready(raw))
    }

    fn array(&mut self, index: usize, array: &'a HostArray) -> Result<Slot, FfiError> {
        // Callback arguments are only passed on while their loan lasts.
        array.check_lease()?;
        let view = TensorView::from_host_array(array);
        if view.device().is_host() {
            self.views.push(view);
            self.aliases.push(Alias {
                arg: index,
                passing: Passing::RawView,
            });
            return Ok(Slot::View(self.views.len() - 1));
        }
        // Device buffers need a refcounted tensor the callee can hold on to.
        let tensor = tensor_on_device(array, view.device())?;
        let raw = RawAny::object(type_index::TENSOR, tensor.as_raw());
        self.tensors.push(tensor);
        self.aliases.push(Alias {
            arg: index,
            passing: Passing::Refcounted,
        });
        Ok(Slot::Ready(raw))
    }

    /// The caller's own argument when `result` denotes the same memory as
    /// an array passed the same way.
    fn alias_of(&self, args: &[Value], result: &RawAny) -> Option<Value> {
        let (descriptor, passing) = match result.type_index {
            type_index::DLTENSOR_PTR => {
                let ptr: *mut DLTensor = result.as_ptr();
                if ptr.is_null() {
                    return None;
                }
                // SAFETY: a raw tensor result is only readable while the
                // frame lives, which it does here.
                (unsafe { &*ptr }, Passing::RawView)
            }
            type_index::TENSOR if !result.as_object().is_null() => {
                // SAFETY: tensor objects start their cell with a DLTensor.
                (unsafe { &*cell_ptr::<DLTensor>(result.as_object()) }, Passing::Refcounted)
            }
            _ => return None,
        };
        self.aliases
            .iter()
            .filter(|alias| alias.passing == passing)
            .find(|alias| {
                args[alias.arg]
                    .as_array()
                    .is_some_and(|array| same_memory(array, descriptor))
            })
            .map(|alias| args[alias.arg].clone())
    }
}

fn same_memory(array: &HostArray, descriptor: &DLTensor) -> bool {
    descriptor.data == array.data_ptr()
        && descriptor.byte_offset == array.byte_offset() as u64
        && DataType::from_dl(descriptor.dtype) == array.dtype()
        // SAFETY: the descriptor's shape array has `ndim` entries.
        && unsafe { descriptor.shape_slice() } == array.shape()
}

/// Calls `func` with `args` and decodes the owned result.
pub(crate) fn invoke(func: &Function, args: &[Value]) -> Result<Value, FfiError> {
    let config = config::current();
    let frame = Frame::build(args)?;
    let num_args = i32::try_from(frame.slots.len())
        .map_err(|_| FfiError::invalid(format!("too many arguments: {}", frame.slots.len())))?;
    if config.trace_calls {
        log::trace!(
            "call {:p}: {} argument(s), {} view(s), {} temporary object(s)",
            func.as_raw(),
            num_args,
            frame.views.len(),
            frame.temporaries.len() + frame.tensors.len(),
        );
    }
    let mut result = RawAny::none();
    // SAFETY: every slot points into `frame` or `args`, both alive until
    // this function returns; `result` is a valid out slot.
    let status = unsafe {
        native::api().function_call(func.as_raw(), frame.slots.as_ptr(), num_args, &mut result)
    };
    if status != 0 {
        let err = native::take_raised_error();
        if config.trace_calls {
            log::trace!("call {:p} raised {}", func.as_raw(), err.kind);
        }
        return Err(FfiError::Native(err));
    }
    // SAFETY: the call primitive transfers ownership of the result.
    let mut owned = unsafe { Any::from_raw_owned(result) };
    if config.identity_fast_path
        && let Some(original) = frame.alias_of(args, owned.raw())
    {
        if config.trace_calls {
            log::trace!("call {:p} returned an argument", func.as_raw());
        }
        return Ok(original);
    }
    owned.take()
}
