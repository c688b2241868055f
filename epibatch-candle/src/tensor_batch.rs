//! Episode batches as device-resident tensors.
use anyhow::{anyhow, Result};
use candle_core::{Device, Tensor};
use epibatch_core::{EpisodeBatch, Value};
use log::trace;
use std::collections::HashMap;

/// A device-resident mirror of an [`EpisodeBatch`].
///
/// Every field, plus the filled mask, becomes one [`Tensor`] on the
/// target [`Device`]. Construction and [`to`](TensorBatch::to) are the
/// only copying operations; once resident, tensors are handed to the
/// learner as-is.
///
/// Candle has no 32-bit integer or boolean dtypes, so `I32` fields widen
/// to `I64` and `Bool` fields (including the filled mask) become `U8`.
#[derive(Clone)]
pub struct TensorBatch {
    fields: HashMap<String, Tensor>,
    filled: Tensor,
    device: Device,
    max_t_filled: usize,
}

impl TensorBatch {
    /// Copies every field of `batch` onto `device`.
    pub fn from_episode_batch(batch: &EpisodeBatch, device: &Device) -> Result<Self> {
        let mut fields = HashMap::with_capacity(batch.scheme().fields().len());
        for field in batch.scheme().fields() {
            let value = batch
                .raw(&field.name)
                .ok_or_else(|| anyhow!("field '{}' missing from batch storage", field.name))?;
            fields.insert(field.name.clone(), value_to_tensor(value, device)?);
        }

        let filled = batch.filled();
        let (b, t) = filled.dim();
        let mask: Vec<u8> = filled.iter().map(|&f| f as u8).collect();
        let filled = Tensor::from_vec(mask, (b, t), device)?;

        trace!("placed {} field tensors on {:?}", fields.len(), device);
        Ok(Self {
            fields,
            filled,
            device: device.clone(),
            max_t_filled: batch.max_t_filled(),
        })
    }

    /// Copies every tensor to `device`; a cheap clone when the batch is
    /// already resident there.
    pub fn to(&self, device: &Device) -> Result<Self> {
        if self.device.same_device(device) {
            return Ok(self.clone());
        }
        let mut fields = HashMap::with_capacity(self.fields.len());
        for (name, tensor) in &self.fields {
            fields.insert(name.clone(), tensor.to_device(device)?);
        }
        Ok(Self {
            fields,
            filled: self.filled.to_device(device)?,
            device: device.clone(),
            max_t_filled: self.max_t_filled,
        })
    }

    /// The tensor backing a field.
    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.fields.get(name)
    }

    /// The filled mask as a `U8` tensor of shape `(batch, horizon)`.
    pub fn filled(&self) -> &Tensor {
        &self.filled
    }

    /// Device the batch is resident on.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Longest filled sequence length, carried over from the source
    /// batch so the learner can truncate without another host round trip.
    pub fn max_t_filled(&self) -> usize {
        self.max_t_filled
    }
}

fn value_to_tensor(value: &Value, device: &Device) -> Result<Tensor> {
    let shape = value.shape().to_vec();
    let t = match value {
        Value::F32(a) => {
            Tensor::from_vec(a.iter().copied().collect::<Vec<f32>>(), shape, device)?
        }
        Value::I64(a) => {
            Tensor::from_vec(a.iter().copied().collect::<Vec<i64>>(), shape, device)?
        }
        Value::I32(a) => Tensor::from_vec(
            a.iter().map(|&x| i64::from(x)).collect::<Vec<i64>>(),
            shape,
            device,
        )?,
        Value::U8(a) => {
            Tensor::from_vec(a.iter().copied().collect::<Vec<u8>>(), shape, device)?
        }
        Value::Bool(a) => Tensor::from_vec(
            a.iter().map(|&x| x as u8).collect::<Vec<u8>>(),
            shape,
            device,
        )?,
    };
    Ok(t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use epibatch_core::{compile, Dtype, FieldSpec};
    use ndarray::{arr1, arr2};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn batch() -> EpisodeBatch {
        let fields = vec![
            FieldSpec::new("state", &[3]),
            FieldSpec::new("actions", &[1]).group("agents").dtype(Dtype::I64),
            FieldSpec::new("terminated", &[1]).dtype(Dtype::Bool),
        ];
        let mut groups = BTreeMap::new();
        groups.insert("agents".to_string(), 2);
        let scheme = Arc::new(compile(&fields, &groups, vec![]).unwrap());
        let mut batch = EpisodeBatch::new(scheme, 1, 4);
        batch
            .update(
                &[
                    ("state", Value::F32(arr1(&[1.0, 2.0, 3.0]).into_dyn())),
                    ("actions", Value::I64(arr2(&[[0], [1]]).into_dyn())),
                    (
                        "terminated",
                        Value::Bool(arr1(&[false]).into_dyn()),
                    ),
                ],
                0,
            )
            .unwrap();
        batch
    }

    #[test]
    fn fields_keep_shape_and_values_on_cpu() {
        let tb = TensorBatch::from_episode_batch(&batch(), &Device::Cpu).unwrap();

        let state = tb.get("state").unwrap();
        assert_eq!(state.dims(), &[1, 4, 3]);
        assert_eq!(state.dtype(), DType::F32);
        let row: Vec<f32> = state
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        assert_eq!(&row[..3], &[1.0, 2.0, 3.0]);

        let actions = tb.get("actions").unwrap();
        assert_eq!(actions.dims(), &[1, 4, 2, 1]);
        assert_eq!(actions.dtype(), DType::I64);
    }

    #[test]
    fn bool_fields_widen_to_u8() {
        let tb = TensorBatch::from_episode_batch(&batch(), &Device::Cpu).unwrap();
        assert_eq!(tb.get("terminated").unwrap().dtype(), DType::U8);
        assert_eq!(tb.filled().dtype(), DType::U8);
        let mask: Vec<u8> = tb
            .filled()
            .flatten_all()
            .unwrap()
            .to_vec1::<u8>()
            .unwrap();
        assert_eq!(mask, vec![1, 0, 0, 0]);
    }

    #[test]
    fn to_same_device_is_a_noop_copy() {
        let tb = TensorBatch::from_episode_batch(&batch(), &Device::Cpu).unwrap();
        let moved = tb.to(&Device::Cpu).unwrap();
        assert_eq!(moved.max_t_filled(), tb.max_t_filled());
        assert!(moved.device().same_device(&Device::Cpu));
    }
}
