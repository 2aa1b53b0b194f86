use std::sync::Arc;

use ffi_bridge::{
    AnyView, DataType, Device, DeviceKind, FfiError, Function, HostArray, Layout, Tensor, Value,
    abi::{DLTensor, RawAny},
    backend::{self, DeviceBackend, ForeignBuffer},
};

/// Metal stand-in: "device" memory is ordinary host memory.
struct FakeMetal;

impl DeviceBackend for FakeMetal {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Metal
    }

    fn wrap(&self, buffer: ForeignBuffer<'_>) -> Result<HostArray, FfiError> {
        buffer.into_host_array()
    }
}

/// Vulkan stand-in that recognizes its host-mapped allocations; here,
/// every `int16` array.
struct MappedVulkan;

impl DeviceBackend for MappedVulkan {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Vulkan
    }

    fn detect(&self, array: &HostArray) -> Option<Device> {
        (array.dtype() == DataType::I16).then_some(Device::new(DeviceKind::Vulkan, 1))
    }

    fn wrap(&self, buffer: ForeignBuffer<'_>) -> Result<HostArray, FfiError> {
        buffer.into_host_array()
    }
}

fn install_metal() {
    backend::register_backend(Arc::new(FakeMetal));
}

fn metal_array(values: Vec<f32>, shape: &[i64], strides: &[i64]) -> HostArray {
    let len = values.len() as i64;
    let storage = HostArray::from_vec(values, &[len]).unwrap();
    let data = storage.data_ptr();
    unsafe {
        HostArray::from_raw_parts(
            data,
            DataType::F32,
            Device::metal(0),
            shape,
            strides,
            0,
            Some(Arc::new(storage)),
        )
    }
    .unwrap()
}

fn global(name: &str) -> Function {
    Function::get_global(name).unwrap().unwrap()
}

fn descriptor(data: &mut [f32], device: Device, shape: &mut [i64], strides: &mut [i64]) -> DLTensor {
    DLTensor {
        data: data.as_mut_ptr().cast(),
        device: device.to_dl(),
        ndim: shape.len() as i32,
        dtype: DataType::F32.to_dl(),
        shape: shape.as_mut_ptr(),
        strides: strides.as_mut_ptr(),
        byte_offset: 0,
    }
}

#[test]
fn raw_pointers_decode_in_logical_order() {
    let mut row_major = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
    let (mut shape, mut strides) = ([2i64, 3], [3i64, 1]);
    let dl = descriptor(&mut row_major, Device::cpu(), &mut shape, &mut strides);
    let slot = RawAny::dltensor_ptr(&dl);
    let value = unsafe { AnyView::new(&slot) }.decode().unwrap();
    let array = value.as_array().unwrap();
    assert_eq!(array.layout(), Layout::RowMajor);
    assert_eq!(array.to_vec::<f32>().unwrap(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

    let mut column_major = [1.0f32, 4.0, 2.0, 5.0, 3.0, 6.0];
    let (mut shape, mut strides) = ([2i64, 3], [1i64, 2]);
    let dl = descriptor(&mut column_major, Device::cpu(), &mut shape, &mut strides);
    let slot = RawAny::dltensor_ptr(&dl);
    let value = unsafe { AnyView::new(&slot) }.decode().unwrap();
    let array = value.as_array().unwrap();
    assert_eq!(array.get::<f32>(&[1, 0]).unwrap(), 4.0);
    assert_eq!(array.to_vec::<f32>().unwrap(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
}

#[test]
fn layouts_are_classified_from_strides() {
    let column = HostArray::from_vec_with_strides((0..12).collect::<Vec<i32>>(), &[3, 4], &[1, 3])
        .unwrap();
    assert_eq!(column.layout(), Layout::ColumnMajor);
    assert!(column.is_contiguous());

    let base = HostArray::from_vec((0..8).collect::<Vec<i32>>(), &[8]).unwrap();
    let every_other = base.strided_view(&[4], &[2], 0).unwrap();
    assert_eq!(every_other.layout(), Layout::Strided);
    assert!(!every_other.is_contiguous());
    assert_eq!(every_other.to_vec::<i32>().unwrap(), vec![0, 2, 4, 6]);
}

#[test]
fn raw_device_pointers_are_refused() {
    let mut data = [0.0f32; 4];
    let (mut shape, mut strides) = ([4i64], [1i64]);
    let dl = descriptor(&mut data, Device::cuda(0), &mut shape, &mut strides);
    let slot = RawAny::dltensor_ptr(&dl);

    let err = unsafe { AnyView::new(&slot) }.decode().unwrap_err();
    assert!(matches!(err, FfiError::UnsupportedDevice { device, .. } if device == Device::cuda(0)));

    let err = unsafe { AnyView::new(&slot).decode_in_place() }.unwrap_err();
    let FfiError::UnsupportedDevice { reason, .. } = err else {
        panic!("expected UnsupportedDevice, got {}", err);
    };
    assert!(reason.contains("no backend registered"));
}

#[test]
fn device_arrays_cross_as_refcounted_tensors() {
    install_metal();
    let x = metal_array(vec![1.0, 2.0, 3.0, 4.0, 0.0, 0.0, 0.0, 0.0], &[4], &[1]);
    let before = x.ref_count();

    let result = global("testing.echo").call(&[Value::Array(x.clone())]).unwrap();
    assert!(result.as_array().expect("array result").ptr_eq(&x));
    drop(result);
    // The temporary tensor released its pin once the call returned.
    assert_eq!(x.ref_count(), before);
}

#[test]
fn device_tensors_wrap_through_their_backend() {
    install_metal();
    let x = metal_array(vec![5.0, 6.0, 7.0, 8.0, 0.0, 0.0, 0.0, 0.0], &[2, 2], &[2, 1]);
    let tensor = Tensor::from_host_array(&x).unwrap();
    assert_eq!(tensor.device(), Device::metal(0));

    let wrapped = tensor.to_host_array().unwrap();
    assert_eq!(wrapped.device(), Device::metal(0));
    assert_eq!(wrapped.data_ptr(), x.data_ptr());
    assert!(wrapped.native_tensor().is_some_and(|t| t.ptr_eq(&tensor)));
}

#[test]
fn strided_device_tensors_cannot_be_wrapped() {
    install_metal();
    let x = metal_array(vec![1.0; 8], &[2], &[2]);
    let tensor = Tensor::from_host_array(&x).unwrap();
    let err = tensor.to_host_array().unwrap_err();
    assert!(matches!(err, FfiError::UnsupportedDevice { .. }));
}

#[test]
fn dlpack_round_trip_shares_memory_and_releases_the_pin() {
    let array = HostArray::from_vec(vec![1u8, 2, 3, 4, 5, 6], &[2, 3]).unwrap();
    let before = array.ref_count();

    let tensor = Tensor::from_host_array(&array).unwrap();
    let capsule = tensor.export_dlpack().unwrap();
    assert_eq!(capsule.dltensor().data, array.data_ptr());
    let imported = Tensor::from_dlpack(capsule).unwrap();
    let shared = imported.to_host_array().unwrap();
    assert_eq!(shared.data_ptr(), array.data_ptr());
    assert_eq!(shared.to_vec::<u8>().unwrap(), vec![1, 2, 3, 4, 5, 6]);

    drop(shared);
    drop(imported);
    drop(tensor);
    assert_eq!(array.ref_count(), before);
}

#[test]
fn detected_devices_reach_the_native_side() {
    backend::register_backend(Arc::new(MappedVulkan));
    let mapped = Device::new(DeviceKind::Vulkan, 1);
    let x = HostArray::from_vec(vec![1i16, 2, 3], &[3]).unwrap();
    assert_eq!(x.device(), Device::cpu());

    let tensor = Tensor::from_host_array(&x).unwrap();
    assert_eq!(tensor.device(), mapped);
    drop(tensor);

    let device_of = Function::from_closure(|args| {
        let array = args
            .first()
            .and_then(Value::as_array)
            .ok_or_else(|| FfiError::invalid("expected an array"))?;
        Ok(Value::Device(array.device()))
    })
    .unwrap();
    let seen = global("testing.call")
        .call(&[Value::Function(device_of), Value::Array(x.clone())])
        .unwrap();
    assert_eq!(seen, Value::Device(mapped));

    let echoed = global("testing.echo").call(&[Value::Array(x.clone())]).unwrap();
    assert!(echoed.as_array().expect("array result").ptr_eq(&x));
}
