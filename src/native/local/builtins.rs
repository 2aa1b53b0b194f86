//! `testing.*` global functions shipped with the local runtime.

use std::os::raw::c_void;

use crate::abi::{
    ByteArray, DLDataType, DLDevice, DLManagedTensor, DLTensor, ObjectHandle, RawAny, cell_ptr,
    type_index,
};

use super::objects::{self, FunctionCell};

struct Raise {
    kind: &'static str,
    message: String,
}

impl Raise {
    fn type_error(message: impl Into<String>) -> Self {
        Self {
            kind: "TypeError",
            message: message.into(),
        }
    }

    fn value_error(message: impl Into<String>) -> Self {
        Self {
            kind: "ValueError",
            message: message.into(),
        }
    }
}

type Builtin = fn(&[RawAny], &mut RawAny) -> Result<(), Raise>;

const BUILTINS: &[(&str, Builtin)] = &[
    ("testing.echo", echo),
    ("testing.add_one", add_one),
    ("testing.raise", raise_value_error),
    ("testing.concat", concat),
    ("testing.make_shape", make_shape),
    ("testing.arange", arange),
    ("testing.make_module", make_module),
];

unsafe extern "C" fn builtin_safe_call(
    context: *mut c_void,
    args: *const RawAny,
    num_args: i32,
    result: *mut RawAny,
) -> i32 {
    // SAFETY: `context` is the boxed builtin installed below; the caller
    // passes `num_args` readable slots and a writable result.
    let builtin = unsafe { &*(context as *const Builtin) };
    let args = unsafe { args_slice(args, num_args) };
    let mut out = RawAny::none();
    match builtin(args, &mut out) {
        Ok(()) => {
            unsafe { *result = out };
            0
        }
        Err(raise) => objects::raise(raise.kind, &raise.message),
    }
}

unsafe extern "C" fn delete_builtin(context: *mut c_void) {
    // SAFETY: produced by `Box::into_raw` in `install`.
    drop(unsafe { Box::from_raw(context as *mut Builtin) });
}

/// Reentrant call: invokes its first argument with the remaining ones.
unsafe extern "C" fn call_safe_call(
    _context: *mut c_void,
    args: *const RawAny,
    num_args: i32,
    result: *mut RawAny,
) -> i32 {
    let args = unsafe { args_slice(args, num_args) };
    let Some((callee, rest)) = args.split_first() else {
        return objects::raise("TypeError", "testing.call expects a function");
    };
    if callee.type_index != type_index::FUNCTION || callee.as_object().is_null() {
        return objects::raise("TypeError", "testing.call expects a function");
    }
    // SAFETY: checked above that the payload is a live function object.
    let cell = unsafe { &*cell_ptr::<FunctionCell>(callee.as_object()) };
    unsafe { (cell.safe_call)(cell.context, rest.as_ptr(), rest.len() as i32, result) }
}

unsafe fn args_slice<'a>(args: *const RawAny, num_args: i32) -> &'a [RawAny] {
    if args.is_null() || num_args <= 0 {
        return &[];
    }
    unsafe { std::slice::from_raw_parts(args, num_args as usize) }
}

pub(crate) fn install() -> Vec<(&'static str, ObjectHandle)> {
    let mut installed: Vec<(&'static str, ObjectHandle)> = BUILTINS
        .iter()
        .map(|(name, builtin)| {
            let context = Box::into_raw(Box::new(*builtin)) as *mut c_void;
            let handle = objects::new_function(builtin_safe_call, context, Some(delete_builtin));
            (*name, handle)
        })
        .collect();
    installed.push((
        "testing.call",
        objects::new_function(call_safe_call, std::ptr::null_mut(), None),
    ));
    installed
}

fn expect_args(name: &str, args: &[RawAny], count: usize) -> Result<(), Raise> {
    if args.len() != count {
        return Err(Raise::type_error(format!(
            "{} expects {} argument(s), got {}",
            name,
            count,
            args.len()
        )));
    }
    Ok(())
}

fn read_str(value: &RawAny) -> Option<String> {
    let bytes = match value.type_index {
        type_index::SMALL_STR => value.inline_bytes().to_vec(),
        type_index::STR if !value.as_object().is_null() => {
            // SAFETY: Str objects carry a leading byte array cell.
            unsafe { (*cell_ptr::<ByteArray>(value.as_object())).as_slice().to_vec() }
        }
        _ => return None,
    };
    String::from_utf8(bytes).ok()
}

/// DLTensor behind a raw tensor pointer or a tensor object.
fn read_tensor(value: &RawAny) -> Option<DLTensor> {
    match value.type_index {
        type_index::DLTENSOR_PTR => {
            let ptr: *mut DLTensor = value.as_ptr();
            // SAFETY: the caller keeps the described tensor alive for the call.
            (!ptr.is_null()).then(|| unsafe { *ptr })
        }
        type_index::TENSOR if !value.as_object().is_null() => {
            // SAFETY: tensor objects start their cell with a DLTensor.
            Some(unsafe { *cell_ptr::<DLTensor>(value.as_object()) })
        }
        _ => None,
    }
}

fn echo(args: &[RawAny], out: &mut RawAny) -> Result<(), Raise> {
    expect_args("testing.echo", args, 1)?;
    let value = args[0];
    if value.is_object() && !value.as_object().is_null() {
        // SAFETY: the argument is a live object borrowed for the call.
        unsafe { objects::inc_ref(value.as_object()) };
    }
    *out = value;
    Ok(())
}

const FLOAT32: DLDataType = DLDataType {
    code: 2,
    bits: 32,
    lanes: 1,
};

const CPU: i32 = 1;

/// `y = x + 1` over float32 tensors of any rank and layout.
fn add_one(args: &[RawAny], _out: &mut RawAny) -> Result<(), Raise> {
    expect_args("testing.add_one", args, 2)?;
    let x = read_tensor(&args[0]).ok_or_else(|| Raise::type_error("x must be a tensor"))?;
    let y = read_tensor(&args[1]).ok_or_else(|| Raise::type_error("y must be a tensor"))?;
    for t in [&x, &y] {
        if t.dtype != FLOAT32 {
            return Err(Raise::type_error("testing.add_one only supports float32"));
        }
        if t.device.device_type != CPU {
            return Err(Raise::value_error("testing.add_one only supports CPU tensors"));
        }
    }
    // SAFETY: both descriptors come from live arguments.
    let (x_shape, y_shape) = unsafe { (x.shape_slice(), y.shape_slice()) };
    if x_shape != y_shape {
        return Err(Raise::value_error(format!(
            "shape mismatch: {:?} vs {:?}",
            x_shape, y_shape
        )));
    }
    let x_strides = unsafe { x.strides_slice() }
        .map(<[i64]>::to_vec)
        .unwrap_or_else(|| objects::row_major(x_shape));
    let y_strides = unsafe { y.strides_slice() }
        .map(<[i64]>::to_vec)
        .unwrap_or_else(|| objects::row_major(y_shape));
    let numel: i64 = x_shape.iter().product();
    if numel == 0 {
        return Ok(());
    }
    let x_base = unsafe { (x.data as *const u8).add(x.byte_offset as usize) } as *const f32;
    let y_base = unsafe { (y.data as *mut u8).add(y.byte_offset as usize) } as *mut f32;
    let mut index = vec![0i64; x_shape.len()];
    for _ in 0..numel {
        let x_off: i64 = index.iter().zip(&x_strides).map(|(i, s)| i * s).sum();
        let y_off: i64 = index.iter().zip(&y_strides).map(|(i, s)| i * s).sum();
        // SAFETY: offsets stay within the extents described by shape/strides.
        unsafe { *y_base.offset(y_off as isize) = *x_base.offset(x_off as isize) + 1.0 };
        for axis in (0..index.len()).rev() {
            index[axis] += 1;
            if index[axis] < x_shape[axis] {
                break;
            }
            index[axis] = 0;
        }
    }
    Ok(())
}

fn raise_value_error(args: &[RawAny], _out: &mut RawAny) -> Result<(), Raise> {
    expect_args("testing.raise", args, 1)?;
    let message = read_str(&args[0]).ok_or_else(|| Raise::type_error("message must be a str"))?;
    Err(Raise::value_error(message))
}

fn concat(args: &[RawAny], out: &mut RawAny) -> Result<(), Raise> {
    expect_args("testing.concat", args, 2)?;
    let a = read_str(&args[0]).ok_or_else(|| Raise::type_error("expected str arguments"))?;
    let b = read_str(&args[1]).ok_or_else(|| Raise::type_error("expected str arguments"))?;
    let joined = a + &b;
    *out = RawAny::object(
        type_index::STR,
        objects::new_bytes(type_index::STR, joined.as_bytes()),
    );
    Ok(())
}

fn make_shape(args: &[RawAny], out: &mut RawAny) -> Result<(), Raise> {
    let mut dims = Vec::with_capacity(args.len());
    for arg in args {
        if arg.type_index != type_index::INT || arg.as_i64() < 0 {
            return Err(Raise::value_error("dimensions must be non-negative ints"));
        }
        dims.push(arg.as_i64());
    }
    *out = RawAny::object(type_index::SHAPE, objects::new_shape(&dims));
    Ok(())
}

#[repr(C)]
struct ArangeBuffer {
    managed: DLManagedTensor,
    data: Vec<f32>,
    shape: [i64; 1],
}

unsafe extern "C" fn release_arange(managed: *mut DLManagedTensor) {
    // SAFETY: `manager_ctx` is the box that owns `managed`.
    let ctx = unsafe { (*managed).manager_ctx };
    drop(unsafe { Box::from_raw(ctx as *mut ArangeBuffer) });
}

/// Natively owned float32 tensor `[0, 1, .., n-1]`.
fn arange(args: &[RawAny], out: &mut RawAny) -> Result<(), Raise> {
    expect_args("testing.arange", args, 1)?;
    if args[0].type_index != type_index::INT || args[0].as_i64() < 0 {
        return Err(Raise::value_error("length must be a non-negative int"));
    }
    let n = args[0].as_i64();
    let mut buffer = Box::new(ArangeBuffer {
        managed: DLManagedTensor {
            dl_tensor: DLTensor {
                data: std::ptr::null_mut(),
                device: DLDevice {
                    device_type: CPU,
                    device_id: 0,
                },
                ndim: 1,
                dtype: FLOAT32,
                shape: std::ptr::null_mut(),
                strides: std::ptr::null_mut(),
                byte_offset: 0,
            },
            manager_ctx: std::ptr::null_mut(),
            deleter: Some(release_arange),
        },
        data: (0..n).map(|i| i as f32).collect(),
        shape: [n],
    });
    buffer.managed.dl_tensor.data = buffer.data.as_mut_ptr() as *mut c_void;
    buffer.managed.dl_tensor.shape = buffer.shape.as_mut_ptr();
    let raw = Box::into_raw(buffer);
    // SAFETY: `raw` is a fresh box; the tensor takes ownership of it.
    unsafe {
        (*raw).managed.manager_ctx = raw as *mut c_void;
        let managed = std::ptr::addr_of_mut!((*raw).managed);
        *out = RawAny::object(type_index::TENSOR, objects::new_tensor(managed));
    }
    Ok(())
}

fn make_module(args: &[RawAny], out: &mut RawAny) -> Result<(), Raise> {
    expect_args("testing.make_module", args, 1)?;
    let name = read_str(&args[0]).ok_or_else(|| Raise::type_error("name must be a str"))?;
    *out = RawAny::object(type_index::MODULE, objects::new_module(&name));
    Ok(())
}

unsafe extern "C" fn release_exported(managed: *mut DLManagedTensor) {
    // SAFETY: produced by `export_tensor`, which retained the tensor.
    let managed = unsafe { Box::from_raw(managed) };
    unsafe { objects::dec_ref(managed.manager_ctx as ObjectHandle) };
}

/// Managed view of a tensor object; holds one reference until released.
pub(crate) fn export_tensor(tensor: ObjectHandle) -> *mut DLManagedTensor {
    // SAFETY: the caller checked that `tensor` is a live tensor object.
    unsafe { objects::inc_ref(tensor) };
    let dl_tensor = unsafe { *cell_ptr::<DLTensor>(tensor) };
    Box::into_raw(Box::new(DLManagedTensor {
        dl_tensor,
        manager_ctx: tensor as *mut c_void,
        deleter: Some(release_exported),
    }))
}
