//! Per-field transforms applied at write time to derive secondary fields.
use crate::error::StoreError;
use crate::scheme::Dtype;
use crate::value::Value;
use ndarray::{ArrayD, IxDyn};

/// A pure per-field transform.
///
/// Transforms are registered explicitly through [`Preprocess`] records
/// handed to [`compile`]; there is no open registry. `infer_output` is
/// invoked once at compile time to size the derived field, `apply` on
/// every write of the source field.
///
/// [`compile`]: crate::scheme::compile
pub trait Transform {
    /// Output shape and dtype for the given input shape and dtype.
    ///
    /// Shapes here are value shapes, before group expansion.
    fn infer_output(&self, in_shape: &[usize], in_dtype: Dtype)
        -> Result<(Vec<usize>, Dtype), StoreError>;

    /// Applies the transform to a written value.
    fn apply(&self, input: &Value) -> Result<Value, StoreError>;
}

/// Registration record binding a source field to a derived field through
/// an ordered transform chain.
pub struct Preprocess {
    /// Raw field the chain reads.
    pub source: String,
    /// Derived field the chain writes.
    pub derived: String,
    /// Transforms applied in order.
    pub transforms: Vec<Box<dyn Transform>>,
}

impl Preprocess {
    /// Binds `source` to `derived` through a single transform.
    pub fn new(
        source: impl Into<String>,
        derived: impl Into<String>,
        transform: Box<dyn Transform>,
    ) -> Self {
        Self {
            source: source.into(),
            derived: derived.into(),
            transforms: vec![transform],
        }
    }

    /// Runs the chain over a written value.
    pub(crate) fn apply_chain(&self, input: &Value) -> Result<Value, StoreError> {
        let mut out = input.clone();
        for t in &self.transforms {
            out = t.apply(&out)?;
        }
        Ok(out)
    }
}

/// Categorical one-hot encoding.
///
/// Input is an integer class-index array of shape `(..., 1)`; output is an
/// `F32` array of shape `(..., out_dim)` that is zero everywhere except a
/// `1.0` at the position named by each index. Out-of-range indices are a
/// caller error, not clipped.
pub struct OneHot {
    out_dim: usize,
}

impl OneHot {
    /// One-hot encoding over `out_dim` classes.
    pub fn new(out_dim: usize) -> Self {
        Self { out_dim }
    }
}

impl Transform for OneHot {
    fn infer_output(
        &self,
        in_shape: &[usize],
        in_dtype: Dtype,
    ) -> Result<(Vec<usize>, Dtype), StoreError> {
        match in_dtype {
            Dtype::I64 | Dtype::I32 | Dtype::U8 => {}
            other => {
                return Err(StoreError::Scheme(format!(
                    "one-hot input must be an integer dtype, got {:?}",
                    other
                )))
            }
        }
        if in_shape.last() != Some(&1) {
            return Err(StoreError::Scheme(format!(
                "one-hot input must have a trailing index dimension of 1, got {:?}",
                in_shape
            )));
        }
        let mut out = in_shape.to_vec();
        let last = out.len() - 1;
        out[last] = self.out_dim;
        Ok((out, Dtype::F32))
    }

    fn apply(&self, input: &Value) -> Result<Value, StoreError> {
        let in_shape = input.shape();
        if in_shape.last() != Some(&1) {
            return Err(StoreError::Shape {
                field: "one-hot input".into(),
                expected: vec![1],
                actual: in_shape.to_vec(),
            });
        }
        let indices: Vec<i64> = match input {
            Value::I64(a) => a.iter().copied().collect(),
            Value::I32(a) => a.iter().map(|&x| i64::from(x)).collect(),
            Value::U8(a) => a.iter().map(|&x| i64::from(x)).collect(),
            other => {
                return Err(StoreError::Dtype {
                    field: "one-hot input".into(),
                    expected: Dtype::I64,
                    actual: other.dtype(),
                })
            }
        };

        let k = self.out_dim;
        let mut out_shape = in_shape.to_vec();
        let last = out_shape.len() - 1;
        out_shape[last] = k;
        let mut data = vec![0.0f32; indices.len() * k];
        for (row, &ix) in indices.iter().enumerate() {
            if ix < 0 || ix >= k as i64 {
                return Err(StoreError::Shape {
                    field: "one-hot input".into(),
                    expected: vec![k],
                    actual: vec![ix.max(0) as usize],
                });
            }
            data[row * k + ix as usize] = 1.0;
        }
        let out = ArrayD::from_shape_vec(IxDyn(&out_shape), data)
            .map_err(|e| StoreError::Scheme(format!("one-hot output shape: {}", e)))?;
        Ok(Value::F32(out))
    }
}
