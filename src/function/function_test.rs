use std::{os::raw::c_void, sync::Arc};

use super::*;
use crate::{
    abi::{RawAny, type_index},
    tensor::HostArray,
};

fn global(name: &str) -> Function {
    Function::get_global(name).unwrap().unwrap()
}

#[test]
fn missing_globals_are_none() {
    assert!(Function::get_global("testing.no_such_function").unwrap().is_none());
}

#[test]
fn echo_returns_plain_values() {
    let echo = global("testing.echo");
    for value in [
        Value::Int(42),
        Value::Float(2.5),
        Value::Bool(false),
        Value::from("tiny"),
        Value::from("a string well past the inline limit"),
        Value::Bytes(vec![7; 3]),
        Value::Bytes(vec![9; 64]),
        Value::Shape(vec![4, 5]),
    ] {
        assert_eq!(echo.call(&[value.clone()]).unwrap(), value);
    }
}

#[test]
fn native_errors_keep_their_kind() {
    let raise = global("testing.raise");
    let err = raise.call(&[Value::from("bad input")]).unwrap_err();
    assert_eq!(err.native_kind(), Some("ValueError"));
    let FfiError::Native(native) = err else {
        panic!("expected a native error");
    };
    assert_eq!(native.message, "bad input");

    let err = global("testing.echo").call(&[]).unwrap_err();
    assert_eq!(err.native_kind(), Some("TypeError"));
}

#[test]
fn heap_results_are_owned_once() {
    let concat = global("testing.concat");
    let joined = concat
        .call(&[Value::from("left half, "), Value::from("right half")])
        .unwrap();
    assert_eq!(joined, Value::from("left half, right half"));
}

#[test]
fn function_handles_survive_a_round_trip() {
    let echo = global("testing.echo");
    let func = Function::from_closure(|_| Ok(Value::None)).unwrap();
    let before = func.strong_count();
    let back = echo.call(&[Value::Function(func.clone())]).unwrap();
    assert!(matches!(&back, Value::Function(f) if f.ptr_eq(&func)));
    assert_eq!(func.strong_count(), before + 1);
    drop(back);
    assert_eq!(func.strong_count(), before);
}

#[test]
fn closures_are_reachable_through_native_calls() {
    let double = Function::from_closure(|args| {
        let n = args[0]
            .as_int()
            .ok_or_else(|| FfiError::invalid("expected an int"))?;
        Ok(Value::Int(n * 2))
    })
    .unwrap();
    let call = global("testing.call");
    let result = call
        .call(&[Value::Function(double.clone()), Value::Int(21)])
        .unwrap();
    assert_eq!(result, Value::Int(42));
    assert_eq!(double.call(&[Value::Int(5)]).unwrap(), Value::Int(10));
}

#[test]
fn dropping_the_last_handle_unpins_the_closure() {
    let sentinel = Arc::new(());
    let captured = Arc::clone(&sentinel);
    let func =
        Function::from_closure(move |_| Ok(Value::Int(Arc::strong_count(&captured) as i64)))
            .unwrap();
    assert_eq!(Arc::strong_count(&sentinel), 2);
    drop(func);
    assert_eq!(Arc::strong_count(&sentinel), 1);
}

#[test]
fn panics_become_runtime_errors() {
    let func = Function::from_closure(|_| panic!("kaboom")).unwrap();
    let err = func.call(&[]).unwrap_err();
    assert_eq!(err.native_kind(), Some("RuntimeError"));
    assert!(err.to_string().contains("kaboom"));
}

#[test]
fn unknown_tokens_raise_instead_of_dispatching() {
    let mut out = RawAny::none();
    let status = unsafe {
        callback::callback_trampoline(
            usize::MAX as *mut c_void,
            std::ptr::null(),
            0,
            &mut out,
        )
    };
    assert_eq!(status, -1);
    let err = crate::native::take_raised_error();
    assert_eq!(err.kind, "RuntimeError");
    assert!(err.message.contains("not registered"));
    assert_eq!(out.type_index, type_index::NONE);
}

#[test]
fn callbacks_see_borrowed_arrays_in_place() {
    let array = HostArray::from_vec(vec![1i64, 2, 3], &[3]).unwrap();
    let expected = array.data_ptr() as usize;
    let probe = Function::from_closure(move |args| {
        let seen = args[0].as_array().ok_or_else(|| FfiError::invalid("no array"))?;
        Ok(Value::Bool(seen.data_ptr() as usize == expected && seen.is_borrowed()))
    })
    .unwrap();
    let result = probe.call(&[Value::Array(array.clone())]).unwrap();
    assert_eq!(result, Value::Bool(true));
}
