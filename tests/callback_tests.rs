use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use ffi_bridge::{FfiError, Function, HostArray, Tensor, Value, register_global_function};

fn global(name: &str) -> Function {
    Function::get_global(name)
        .unwrap()
        .unwrap_or_else(|| panic!("global `{}` is not registered", name))
}

fn array_arg(args: &[Value], index: usize) -> Result<&HostArray, FfiError> {
    args.get(index)
        .and_then(Value::as_array)
        .ok_or_else(|| FfiError::invalid(format!("argument {} must be an array", index)))
}

fn int_arg(args: &[Value], index: usize) -> Result<i64, FfiError> {
    args.get(index)
        .and_then(Value::as_int)
        .ok_or_else(|| FfiError::invalid(format!("argument {} must be an int", index)))
}

#[test]
fn registered_closures_are_callable_and_guard_overrides() {
    register_global_function(
        "test.add",
        |args| Ok(Value::Int(int_arg(args, 0)? + int_arg(args, 1)?)),
        false,
    )
    .unwrap();
    let add = global("test.add");
    assert_eq!(
        add.call(&[Value::Int(10), Value::Int(20)]).unwrap(),
        Value::Int(30)
    );

    let err = register_global_function("test.add", |_| Ok(Value::None), false).unwrap_err();
    assert_eq!(err.native_kind(), Some("RuntimeError"));
    assert!(err.to_string().contains("already registered"));
    // The earlier lookup still points at the first closure.
    assert_eq!(
        add.call(&[Value::Int(1), Value::Int(2)]).unwrap(),
        Value::Int(3)
    );

    register_global_function(
        "test.add",
        |args| Ok(Value::Int(int_arg(args, 0)? * int_arg(args, 1)?)),
        true,
    )
    .unwrap();
    assert_eq!(
        global("test.add")
            .call(&[Value::Int(10), Value::Int(20)])
            .unwrap(),
        Value::Int(200)
    );
}

#[test]
fn closure_errors_become_runtime_errors() {
    register_global_function(
        "test.fails",
        |_| Err(FfiError::invalid("boom")),
        false,
    )
    .unwrap();
    let err = global("test.fails").call(&[]).unwrap_err();
    assert_eq!(err.native_kind(), Some("RuntimeError"));
    assert!(err.to_string().contains("boom"));

    register_global_function("test.panics", |_| panic!("boom"), false).unwrap();
    let err = global("test.panics").call(&[Value::Int(1)]).unwrap_err();
    assert_eq!(err.native_kind(), Some("RuntimeError"));
    assert!(err.to_string().contains("boom"));
}

#[test]
fn registered_closures_outlive_their_host_handles() {
    let calls = Arc::new(AtomicUsize::new(0));
    for i in 0..50i64 {
        let calls = Arc::clone(&calls);
        register_global_function(
            &format!("test.many.{}", i),
            move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Int(i))
            },
            false,
        )
        .unwrap();
        // Each lookup's handle is dropped before the next registration.
        drop(global(&format!("test.many.{}", i)));
    }
    for i in 0..50i64 {
        let result = global(&format!("test.many.{}", i)).call(&[]).unwrap();
        assert_eq!(result, Value::Int(i));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 50);
}

#[test]
fn arrays_returned_by_callbacks_keep_their_identity() {
    let passthrough = Function::from_closure(|args| Ok(args[0].clone())).unwrap();
    let x = HostArray::from_vec(vec![1.0f64, 2.0, 3.0], &[3]).unwrap();
    let result = global("testing.call")
        .call(&[Value::Function(passthrough), Value::Array(x.clone())])
        .unwrap();
    assert!(result.as_array().expect("array result").ptr_eq(&x));
}

#[test]
fn fresh_arrays_from_callbacks_come_back_as_native_tensors() {
    let make = Function::from_closure(|args| {
        let n = int_arg(args, 0)?;
        let data = (0..n).map(|v| v as i32 * 10).collect();
        Ok(Value::Array(HostArray::from_vec(data, &[n])?))
    })
    .unwrap();
    let result = global("testing.call")
        .call(&[Value::Function(make), Value::Int(4)])
        .unwrap();
    let array = result.as_array().expect("array result");
    assert!(array.native_tensor().is_some());
    assert_eq!(array.to_vec::<i32>().unwrap(), vec![0, 10, 20, 30]);
}

#[test]
fn callbacks_can_call_back_into_native_code() {
    let greet = Function::from_closure(|args| {
        let name = args
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| FfiError::invalid("expected a name"))?;
        global("testing.concat").call(&[Value::from("hello, "), Value::from(name)])
    })
    .unwrap();
    let result = global("testing.call")
        .call(&[Value::Function(greet), Value::from("a rather long visitor name")])
        .unwrap();
    assert_eq!(result.as_str(), Some("hello, a rather long visitor name"));
}

#[test]
fn callbacks_receive_every_plain_kind() {
    let describe = Function::from_closure(|args| {
        let names: Vec<&str> = args.iter().map(Value::type_name).collect();
        Ok(Value::Str(names.join(",")))
    })
    .unwrap();
    let result = describe
        .call(&[
            Value::from("short"),
            Value::from("a string too long to be stored inline"),
            Value::Bytes(vec![1, 2, 3]),
            Value::Shape(vec![2, 2]),
            Value::Float(0.5),
        ])
        .unwrap();
    let expected: Vec<&str> = [
        Value::from("short"),
        Value::from("a string too long to be stored inline"),
        Value::Bytes(vec![1, 2, 3]),
        Value::Shape(vec![2, 2]),
        Value::Float(0.5),
    ]
    .iter()
    .map(Value::type_name)
    .collect();
    assert_eq!(result.as_str(), Some(expected.join(",").as_str()));
}

#[test]
fn equal_views_from_callbacks_are_not_the_callers_array() {
    // Same buffer, offset, dtype and shape, but a new array object.
    let rewrap = Function::from_closure(|args| {
        let array = array_arg(args, 0)?;
        Ok(Value::Array(array.strided_view(array.shape(), array.strides(), 0)?))
    })
    .unwrap();
    let x = HostArray::from_vec(vec![1.0f64, 2.0, 3.0], &[3]).unwrap();
    let result = global("testing.call")
        .call(&[Value::Function(rewrap), Value::Array(x.clone())])
        .unwrap();
    let array = result.as_array().expect("array result");
    assert!(!array.ptr_eq(&x));
    assert_eq!(array.to_vec::<f64>().unwrap(), vec![1.0, 2.0, 3.0]);
}

#[test]
fn offset_views_returned_from_callbacks_are_copied_out() {
    let tail = Function::from_closure(|args| {
        let array = array_arg(args, 0)?;
        assert!(array.is_lent());
        Ok(Value::Array(array.strided_view(&[2], &[1], 1)?))
    })
    .unwrap();
    let x = HostArray::from_vec(vec![1.0f32, 2.0, 3.0], &[3]).unwrap();
    let result = global("testing.call")
        .call(&[Value::Function(tail), Value::Array(x.clone())])
        .unwrap();
    let array = result.as_array().expect("array result");
    assert!(!array.is_lent());
    assert_ne!(array.data_ptr(), x.data_ptr());
    assert_eq!(array.to_vec::<f32>().unwrap(), vec![2.0, 3.0]);
}

#[test]
fn arrays_kept_past_their_callback_refuse_reads() {
    let kept: Arc<Mutex<Option<(HostArray, HostArray)>>> = Arc::new(Mutex::new(None));
    let stash = {
        let kept = Arc::clone(&kept);
        Function::from_closure(move |args| {
            let array = array_arg(args, 0)?;
            let copy = array.to_owned_copy()?;
            *kept.lock().unwrap() = Some((array.clone(), copy));
            Ok(Value::None)
        })
        .unwrap()
    };
    let x = HostArray::from_vec(vec![1.0f32, 2.0, 3.0], &[3]).unwrap();
    global("testing.call")
        .call(&[Value::Function(stash), Value::Array(x)])
        .unwrap();

    let (lent, copy) = kept.lock().unwrap().take().expect("callback ran");
    let err = lent.to_vec::<f32>().unwrap_err();
    assert!(matches!(err, FfiError::InvalidArgument(_)));
    assert!(err.to_string().contains("after the callback returned"));
    assert!(lent.to_owned_copy().is_err());
    assert!(Tensor::from_host_array(&lent).is_err());
    assert!(global("testing.echo").call(&[Value::Array(lent)]).is_err());
    assert_eq!(copy.to_vec::<f32>().unwrap(), vec![1.0, 2.0, 3.0]);
}
