//! Dense typed arrays backing the fields of an episode batch.
use crate::scheme::Dtype;
use ndarray::{ArrayD, Axis, IxDyn, Slice};
use std::ops::Range;

/// Mismatch between the dtype of a storage block and the value written
/// into it. Mapped to [`StoreError::Dtype`] by the caller, which knows
/// the field name.
///
/// [`StoreError::Dtype`]: crate::error::StoreError::Dtype
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DtypeMismatch {
    /// Dtype of the storage block.
    pub expected: Dtype,
    /// Dtype of the value.
    pub actual: Dtype,
}

/// A dense n-dimensional array of one of the supported dtypes.
///
/// One `Value` backs each field of an episode batch (the whole
/// `(batch, time, ...)` block); smaller `Value`s carry the data written
/// into or read out of it.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// 32-bit float data.
    F32(ArrayD<f32>),
    /// 64-bit integer data.
    I64(ArrayD<i64>),
    /// 32-bit integer data.
    I32(ArrayD<i32>),
    /// Unsigned byte data.
    U8(ArrayD<u8>),
    /// Boolean data.
    Bool(ArrayD<bool>),
}

impl Value {
    /// Zero-initialized array of the given dtype and shape.
    pub fn zeros(dtype: Dtype, shape: &[usize]) -> Self {
        let dim = IxDyn(shape);
        match dtype {
            Dtype::F32 => Value::F32(ArrayD::zeros(dim)),
            Dtype::I64 => Value::I64(ArrayD::zeros(dim)),
            Dtype::I32 => Value::I32(ArrayD::zeros(dim)),
            Dtype::U8 => Value::U8(ArrayD::zeros(dim)),
            Dtype::Bool => Value::Bool(ArrayD::from_elem(dim, false)),
        }
    }

    /// Dtype of the array.
    pub fn dtype(&self) -> Dtype {
        match self {
            Value::F32(_) => Dtype::F32,
            Value::I64(_) => Dtype::I64,
            Value::I32(_) => Dtype::I32,
            Value::U8(_) => Dtype::U8,
            Value::Bool(_) => Dtype::Bool,
        }
    }

    /// Shape of the array.
    pub fn shape(&self) -> &[usize] {
        match self {
            Value::F32(a) => a.shape(),
            Value::I64(a) => a.shape(),
            Value::I32(a) => a.shape(),
            Value::U8(a) => a.shape(),
            Value::Bool(a) => a.shape(),
        }
    }

    /// Number of axes.
    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Prepends a batch axis of length one.
    pub fn insert_batch_axis(self) -> Self {
        match self {
            Value::F32(a) => Value::F32(a.insert_axis(Axis(0))),
            Value::I64(a) => Value::I64(a.insert_axis(Axis(0))),
            Value::I32(a) => Value::I32(a.insert_axis(Axis(0))),
            Value::U8(a) => Value::U8(a.insert_axis(Axis(0))),
            Value::Bool(a) => Value::Bool(a.insert_axis(Axis(0))),
        }
    }

    /// Writes `src` into the region addressed by a range on the batch axis
    /// and, when the block has a time axis, a single timestep.
    ///
    /// `src` must have shape `(batch.len(), ...)` matching the addressed
    /// region; shape agreement is the caller's responsibility and is
    /// enforced there against the compiled scheme.
    pub(crate) fn assign_at(
        &mut self,
        batch: Range<usize>,
        ts: Option<usize>,
        src: &Value,
    ) -> Result<(), DtypeMismatch> {
        match (self, src) {
            (Value::F32(dst), Value::F32(s)) => Self::write_rows(dst, batch, ts, s),
            (Value::I64(dst), Value::I64(s)) => Self::write_rows(dst, batch, ts, s),
            (Value::I32(dst), Value::I32(s)) => Self::write_rows(dst, batch, ts, s),
            (Value::U8(dst), Value::U8(s)) => Self::write_rows(dst, batch, ts, s),
            (Value::Bool(dst), Value::Bool(s)) => Self::write_rows(dst, batch, ts, s),
            (dst, s) => {
                return Err(DtypeMismatch {
                    expected: dst.dtype(),
                    actual: s.dtype(),
                });
            }
        }
        Ok(())
    }

    fn write_rows<A: Clone>(
        dst: &mut ArrayD<A>,
        batch: Range<usize>,
        ts: Option<usize>,
        src: &ArrayD<A>,
    ) {
        let mut rows = dst.slice_axis_mut(Axis(0), Slice::from(batch));
        match ts {
            Some(t) => rows.index_axis_move(Axis(1), t).assign(src),
            None => rows.assign(src),
        }
    }

    /// Copies whole batch rows from `src[src_range]` into `self[dst]`.
    pub(crate) fn copy_rows_from(
        &mut self,
        dst: Range<usize>,
        src: &Value,
        src_range: Range<usize>,
    ) -> Result<(), DtypeMismatch> {
        fn copy<A: Clone>(
            dst_arr: &mut ArrayD<A>,
            dst: Range<usize>,
            src_arr: &ArrayD<A>,
            src: Range<usize>,
        ) {
            dst_arr
                .slice_axis_mut(Axis(0), Slice::from(dst))
                .assign(&src_arr.slice_axis(Axis(0), Slice::from(src)));
        }
        match (self, src) {
            (Value::F32(d), Value::F32(s)) => copy(d, dst, s, src_range),
            (Value::I64(d), Value::I64(s)) => copy(d, dst, s, src_range),
            (Value::I32(d), Value::I32(s)) => copy(d, dst, s, src_range),
            (Value::U8(d), Value::U8(s)) => copy(d, dst, s, src_range),
            (Value::Bool(d), Value::Bool(s)) => copy(d, dst, s, src_range),
            (d, s) => {
                return Err(DtypeMismatch {
                    expected: d.dtype(),
                    actual: s.dtype(),
                })
            }
        }
        Ok(())
    }

    /// Owned copy of the region addressed by a batch range and, for blocks
    /// with a time axis, a time range.
    pub(crate) fn slice_region(&self, batch: Range<usize>, time: Option<Range<usize>>) -> Value {
        fn region<A: Clone>(
            a: &ArrayD<A>,
            batch: Range<usize>,
            time: Option<Range<usize>>,
        ) -> ArrayD<A> {
            let rows = a.slice_axis(Axis(0), Slice::from(batch));
            match time {
                Some(t) => rows.slice_axis(Axis(1), Slice::from(t)).to_owned(),
                None => rows.to_owned(),
            }
        }
        match self {
            Value::F32(a) => Value::F32(region(a, batch, time)),
            Value::I64(a) => Value::I64(region(a, batch, time)),
            Value::I32(a) => Value::I32(region(a, batch, time)),
            Value::U8(a) => Value::U8(region(a, batch, time)),
            Value::Bool(a) => Value::Bool(region(a, batch, time)),
        }
    }

    /// Copies the given rows of the batch axis, in order.
    pub(crate) fn select_rows(&self, ixs: &[usize]) -> Value {
        match self {
            Value::F32(a) => Value::F32(a.select(Axis(0), ixs)),
            Value::I64(a) => Value::I64(a.select(Axis(0), ixs)),
            Value::I32(a) => Value::I32(a.select(Axis(0), ixs)),
            Value::U8(a) => Value::U8(a.select(Axis(0), ixs)),
            Value::Bool(a) => Value::Bool(a.select(Axis(0), ixs)),
        }
    }

    /// Borrows the underlying array if this is `F32` data.
    pub fn as_f32(&self) -> Option<&ArrayD<f32>> {
        match self {
            Value::F32(a) => Some(a),
            _ => None,
        }
    }

    /// Borrows the underlying array if this is `I64` data.
    pub fn as_i64(&self) -> Option<&ArrayD<i64>> {
        match self {
            Value::I64(a) => Some(a),
            _ => None,
        }
    }

    /// Borrows the underlying array if this is `I32` data.
    pub fn as_i32(&self) -> Option<&ArrayD<i32>> {
        match self {
            Value::I32(a) => Some(a),
            _ => None,
        }
    }

    /// Borrows the underlying array if this is `U8` data.
    pub fn as_u8(&self) -> Option<&ArrayD<u8>> {
        match self {
            Value::U8(a) => Some(a),
            _ => None,
        }
    }

    /// Borrows the underlying array if this is `Bool` data.
    pub fn as_bool(&self) -> Option<&ArrayD<bool>> {
        match self {
            Value::Bool(a) => Some(a),
            _ => None,
        }
    }
}

impl From<ArrayD<f32>> for Value {
    fn from(a: ArrayD<f32>) -> Self {
        Value::F32(a)
    }
}

impl From<ArrayD<i64>> for Value {
    fn from(a: ArrayD<i64>) -> Self {
        Value::I64(a)
    }
}

impl From<ArrayD<i32>> for Value {
    fn from(a: ArrayD<i32>) -> Self {
        Value::I32(a)
    }
}

impl From<ArrayD<u8>> for Value {
    fn from(a: ArrayD<u8>) -> Self {
        Value::U8(a)
    }
}

impl From<ArrayD<bool>> for Value {
    fn from(a: ArrayD<bool>) -> Self {
        Value::Bool(a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn zeros_have_requested_shape_and_dtype() {
        let v = Value::zeros(Dtype::I64, &[2, 3, 4]);
        assert_eq!(v.shape(), &[2, 3, 4]);
        assert_eq!(v.dtype(), Dtype::I64);
    }

    #[test]
    fn assign_rejects_dtype_mismatch() {
        let mut block = Value::zeros(Dtype::F32, &[2, 4, 3]);
        let wrong = Value::zeros(Dtype::I64, &[2, 3]);
        let err = block.assign_at(0..2, Some(0), &wrong).unwrap_err();
        assert_eq!(err.expected, Dtype::F32);
        assert_eq!(err.actual, Dtype::I64);
    }

    #[test]
    fn select_rows_copies_in_order() {
        let v = Value::F32(arr2(&[[1.0], [2.0], [3.0]]).into_dyn());
        let picked = v.select_rows(&[2, 0]);
        assert_eq!(
            picked.as_f32().unwrap(),
            &arr2(&[[3.0], [1.0]]).into_dyn()
        );
    }
}
