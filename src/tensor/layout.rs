//! Shape and stride arithmetic. Strides count elements, never bytes.

use rayon::prelude::*;

use crate::error::FfiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    RowMajor,
    ColumnMajor,
    Strided,
}

/// Element count; saturates at `usize::MAX` for shapes that
/// [`checked_numel`] rejects.
pub fn numel(shape: &[i64]) -> usize {
    checked_numel(shape).unwrap_or(usize::MAX)
}

/// Element count, or `None` when it does not fit in a `usize`. Negative
/// extents count as empty.
pub fn checked_numel(shape: &[i64]) -> Option<usize> {
    if shape.iter().any(|&d| d <= 0) {
        return Some(0);
    }
    shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(usize::try_from(d).ok()?))
}

pub fn row_major_strides(shape: &[i64]) -> Vec<i64> {
    let mut strides = vec![1i64; shape.len()];
    let mut running = 1i64;
    for axis in (0..shape.len()).rev() {
        strides[axis] = running;
        running = running.saturating_mul(shape[axis].max(1));
    }
    strides
}

pub fn column_major_strides(shape: &[i64]) -> Vec<i64> {
    let mut strides = vec![1i64; shape.len()];
    let mut running = 1i64;
    for axis in 0..shape.len() {
        strides[axis] = running;
        running = running.saturating_mul(shape[axis].max(1));
    }
    strides
}

/// Dense packing check over `axes` (innermost first). Singleton dimensions
/// match any stride.
fn packed(shape: &[i64], strides: &[i64], axes: impl Iterator<Item = usize>) -> bool {
    if shape.len() != strides.len() {
        return false;
    }
    if numel(shape) == 0 {
        return true;
    }
    let mut expected = 1i64;
    for axis in axes {
        if shape[axis] == 1 {
            continue;
        }
        if strides[axis] != expected {
            return false;
        }
        expected = expected.saturating_mul(shape[axis]);
    }
    true
}

pub fn is_row_major(shape: &[i64], strides: &[i64]) -> bool {
    packed(shape, strides, (0..shape.len()).rev())
}

pub fn is_column_major(shape: &[i64], strides: &[i64]) -> bool {
    packed(shape, strides, 0..shape.len())
}

/// Row-major wins when both hold (vectors, singleton-padded shapes).
pub fn classify(shape: &[i64], strides: &[i64]) -> Layout {
    if is_row_major(shape, strides) {
        Layout::RowMajor
    } else if is_column_major(shape, strides) {
        Layout::ColumnMajor
    } else {
        Layout::Strided
    }
}

/// Smallest and largest element offsets a view touches, or `None` when the
/// view is empty. Offsets that do not fit in an `i64` are an error.
pub fn offset_bounds(shape: &[i64], strides: &[i64]) -> Result<Option<(i64, i64)>, FfiError> {
    if numel(shape) == 0 {
        return Ok(None);
    }
    let overflow = || {
        FfiError::invalid(format!(
            "strides {:?} over shape {:?} overflow the offset range",
            strides, shape
        ))
    };
    let mut low = 0i64;
    let mut high = 0i64;
    for (&extent, &stride) in shape.iter().zip(strides) {
        let span = (extent - 1).checked_mul(stride).ok_or_else(overflow)?;
        if span < 0 {
            low = low.checked_add(span).ok_or_else(overflow)?;
        } else {
            high = high.checked_add(span).ok_or_else(overflow)?;
        }
    }
    Ok(Some((low, high)))
}

/// Gathers a strided view into `dst` in logical row-major order.
///
/// Copies at or above `parallel_threshold` bytes are split across the
/// outermost dimension.
///
/// # Safety
/// Every offset described by `shape`/`strides` from `src` must be readable,
/// and `dst` must hold exactly `numel(shape) * elem_size` bytes.
pub unsafe fn strided_copy(
    src: *const u8,
    shape: &[i64],
    strides: &[i64],
    elem_size: usize,
    dst: &mut [u8],
    parallel_threshold: usize,
) {
    debug_assert_eq!(dst.len(), numel(shape) * elem_size);
    if dst.is_empty() {
        return;
    }
    if dst.len() >= parallel_threshold && shape.len() > 1 && shape[0] > 1 {
        let chunk = dst.len() / shape[0] as usize;
        let outer_step = strides[0] as isize * elem_size as isize;
        // Raw pointers are not Send; the address is.
        let base = src as usize;
        dst.par_chunks_mut(chunk).enumerate().for_each(|(i, out)| {
            let row = (base as *const u8).wrapping_offset(i as isize * outer_step);
            // SAFETY: each chunk reads one disjoint outer slice of the view.
            unsafe { copy_serial(row, &shape[1..], &strides[1..], elem_size, out) };
        });
        return;
    }
    unsafe { copy_serial(src, shape, strides, elem_size, dst) };
}

unsafe fn copy_serial(
    src: *const u8,
    shape: &[i64],
    strides: &[i64],
    elem_size: usize,
    dst: &mut [u8],
) {
    let Some((&inner, outer_shape)) = shape.split_last() else {
        // Zero-dimensional: one element.
        unsafe { std::ptr::copy_nonoverlapping(src, dst.as_mut_ptr(), elem_size) };
        return;
    };
    let inner = inner as usize;
    let inner_stride = strides[shape.len() - 1] as isize * elem_size as isize;
    let run_bytes = inner * elem_size;
    let runs = numel(outer_shape);
    let mut index = vec![0i64; outer_shape.len()];
    for run in 0..runs {
        let offset: i64 = index.iter().zip(strides).map(|(i, s)| i * s).sum();
        let row = src.wrapping_offset(offset as isize * elem_size as isize);
        let out = &mut dst[run * run_bytes..(run + 1) * run_bytes];
        if inner_stride == elem_size as isize {
            // SAFETY: a unit-stride row is `run_bytes` contiguous bytes.
            unsafe { std::ptr::copy_nonoverlapping(row, out.as_mut_ptr(), run_bytes) };
        } else {
            for j in 0..inner {
                // SAFETY: guaranteed by the caller's bounds contract.
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        row.wrapping_offset(j as isize * inner_stride),
                        out.as_mut_ptr().add(j * elem_size),
                        elem_size,
                    )
                };
            }
        }
        for axis in (0..index.len()).rev() {
            index[axis] += 1;
            if index[axis] < outer_shape[axis] {
                break;
            }
            index[axis] = 0;
        }
    }
}
