//! Fixed-capacity, fixed-horizon batched episode storage.
use crate::error::StoreError;
use crate::scheme::CompiledScheme;
use crate::value::Value;
use log::trace;
use ndarray::{s, Array2, Axis};
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

/// A dense block of storage for one or more episodes.
///
/// For every time-indexed field the block holds an array of shape
/// `(batch_size, horizon, *effective_shape)`; episode-constant fields
/// drop the time axis. A boolean filled mask of shape
/// `(batch_size, horizon)` records which timesteps have been written and
/// is the sole source of truth for episode lengths. `batch_size` and
/// `horizon` are fixed at construction; all addressing is bounds-checked
/// against them.
///
/// Storage is zero-initialized, so reading an unfilled timestep returns
/// the field's zero value. That is deliberate padding, not an error.
pub struct EpisodeBatch {
    scheme: Arc<CompiledScheme>,
    data: HashMap<String, Value>,
    filled: Array2<bool>,
    batch_size: usize,
    horizon: usize,
}

impl EpisodeBatch {
    /// Allocates zeroed storage for every raw and derived field of the
    /// scheme, plus the filled mask.
    ///
    /// `horizon` is typically the environment's episode-length limit plus
    /// one, leaving room for the terminal observation.
    pub fn new(scheme: Arc<CompiledScheme>, batch_size: usize, horizon: usize) -> Self {
        let mut data = HashMap::with_capacity(scheme.fields().len());
        for field in scheme.fields() {
            let mut shape = Vec::with_capacity(field.shape.len() + 2);
            shape.push(batch_size);
            if field.has_time_axis() {
                shape.push(horizon);
            }
            shape.extend_from_slice(&field.shape);
            data.insert(field.name.clone(), Value::zeros(field.dtype, &shape));
        }
        trace!(
            "allocated episode batch: {} fields, batch_size={}, horizon={}",
            data.len(),
            batch_size,
            horizon
        );
        Self {
            scheme,
            data,
            filled: Array2::from_elem((batch_size, horizon), false),
            batch_size,
            horizon,
        }
    }

    /// Number of batch slots.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Maximum number of timesteps per episode.
    pub fn horizon(&self) -> usize {
        self.horizon
    }

    /// The compiled scheme this batch was allocated from.
    pub fn scheme(&self) -> &Arc<CompiledScheme> {
        &self.scheme
    }

    /// The filled mask.
    pub fn filled(&self) -> &Array2<bool> {
        &self.filled
    }

    /// Writes field values at `ts` for every batch slot and marks the
    /// timestep filled.
    pub fn update(&mut self, values: &[(&str, Value)], ts: usize) -> Result<(), StoreError> {
        let slots = 0..self.batch_size;
        self.update_slots(values, ts, slots, true)
    }

    /// Writes field values at `ts` for a range of batch slots.
    ///
    /// Each value must have shape `(slots.len(), *effective_shape)`; the
    /// bare effective shape is accepted when the range addresses a single
    /// slot. `ts` is ignored for episode-constant fields. Every
    /// preprocessor keyed on a written source field recomputes its
    /// derived field at the same address. With `mark_filled`, writing any
    /// time-indexed field sets `filled[slots, ts]`.
    pub fn update_slots(
        &mut self,
        values: &[(&str, Value)],
        ts: usize,
        slots: Range<usize>,
        mark_filled: bool,
    ) -> Result<(), StoreError> {
        if slots.start > slots.end || slots.end > self.batch_size {
            return Err(StoreError::Bounds(format!(
                "batch slots {:?} exceed batch size {}",
                slots, self.batch_size
            )));
        }
        if ts >= self.horizon {
            return Err(StoreError::Bounds(format!(
                "timestep {} exceeds horizon {}",
                ts, self.horizon
            )));
        }

        let scheme = Arc::clone(&self.scheme);
        let mut wrote_time_field = false;

        for (name, value) in values {
            let field = scheme.field(name).ok_or_else(|| {
                StoreError::Scheme(format!("unknown field '{}'", name))
            })?;
            let normalized = Self::normalize(name, value, &field.shape, slots.len())?;
            let v = normalized.as_ref().unwrap_or(value);

            if v.dtype() != field.dtype {
                return Err(StoreError::Dtype {
                    field: field.name.clone(),
                    expected: field.dtype,
                    actual: v.dtype(),
                });
            }

            let ts_addr = if field.episode_const { None } else { Some(ts) };
            self.write(&field.name, slots.clone(), ts_addr, v)?;
            if field.has_time_axis() {
                wrote_time_field = true;
            }

            // Derived fields are recomputed from the written region, never
            // merged with previous contents.
            for p in scheme.preprocessors_for(name) {
                let derived = p.apply_chain(v)?;
                let dfield = scheme.field(&p.derived).ok_or_else(|| {
                    StoreError::Scheme(format!("unknown derived field '{}'", p.derived))
                })?;
                let mut expected = Vec::with_capacity(dfield.shape.len() + 1);
                expected.push(slots.len());
                expected.extend_from_slice(&dfield.shape);
                if derived.shape() != expected.as_slice() {
                    return Err(StoreError::Shape {
                        field: dfield.name.clone(),
                        expected,
                        actual: derived.shape().to_vec(),
                    });
                }
                let dts = if dfield.episode_const { None } else { Some(ts) };
                self.write(&dfield.name, slots.clone(), dts, &derived)?;
            }
        }

        if mark_filled && wrote_time_field {
            for b in slots {
                self.filled[[b, ts]] = true;
            }
        }
        Ok(())
    }

    /// For each batch slot, the highest filled index plus one; the
    /// maximum over slots. Zero for an untouched store. Samples are
    /// truncated to this length to skip always-empty tail timesteps.
    pub fn max_t_filled(&self) -> usize {
        self.filled
            .outer_iter()
            .map(|row| row.iter().rposition(|&f| f).map_or(0, |i| i + 1))
            .max()
            .unwrap_or(0)
    }

    /// Owned copy of a field over the given batch and time ranges.
    ///
    /// The time range is ignored for episode-constant fields, whose
    /// result carries no time axis.
    pub fn read(
        &self,
        field: &str,
        batch: Range<usize>,
        time: Range<usize>,
    ) -> Result<Value, StoreError> {
        let f = self.scheme.field(field).ok_or_else(|| {
            StoreError::Scheme(format!("unknown field '{}'", field))
        })?;
        if batch.start > batch.end || batch.end > self.batch_size {
            return Err(StoreError::Bounds(format!(
                "batch range {:?} exceeds batch size {}",
                batch, self.batch_size
            )));
        }
        if time.start > time.end || time.end > self.horizon {
            return Err(StoreError::Bounds(format!(
                "time range {:?} exceeds horizon {}",
                time, self.horizon
            )));
        }
        let storage = self.storage(field)?;
        let time = if f.episode_const { None } else { Some(time) };
        Ok(storage.slice_region(batch, time))
    }

    /// Zero-copy access to a whole field's storage block.
    pub fn raw(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    /// Copies the chosen batch slots, in order, into a fresh batch with
    /// `batch_size = indices.len()`. Fields and the filled mask come
    /// along; the scheme and horizon are shared.
    pub fn select(&self, indices: &[usize]) -> Result<EpisodeBatch, StoreError> {
        if let Some(&bad) = indices.iter().find(|&&ix| ix >= self.batch_size) {
            return Err(StoreError::Bounds(format!(
                "slot index {} exceeds batch size {}",
                bad, self.batch_size
            )));
        }
        let mut data = HashMap::with_capacity(self.data.len());
        for (name, value) in &self.data {
            data.insert(name.clone(), value.select_rows(indices));
        }
        Ok(EpisodeBatch {
            scheme: Arc::clone(&self.scheme),
            data,
            filled: self.filled.select(Axis(0), indices),
            batch_size: indices.len(),
            horizon: self.horizon,
        })
    }

    /// Borrowing read-only window over the given batch and time ranges.
    pub fn slice(
        &self,
        slots: Range<usize>,
        window: Range<usize>,
    ) -> Result<EpisodeSlice<'_>, StoreError> {
        self.check_window(&slots, &window)?;
        Ok(EpisodeSlice {
            batch: self,
            slots,
            window,
        })
    }

    /// Borrowing writable window over the given batch and time ranges.
    pub fn slice_mut(
        &mut self,
        slots: Range<usize>,
        window: Range<usize>,
    ) -> Result<EpisodeSliceMut<'_>, StoreError> {
        self.check_window(&slots, &window)?;
        Ok(EpisodeSliceMut {
            batch: self,
            slots,
            window,
        })
    }

    fn check_window(&self, slots: &Range<usize>, window: &Range<usize>) -> Result<(), StoreError> {
        if slots.start > slots.end || slots.end > self.batch_size {
            return Err(StoreError::Bounds(format!(
                "batch range {:?} exceeds batch size {}",
                slots, self.batch_size
            )));
        }
        if window.start > window.end || window.end > self.horizon {
            return Err(StoreError::Bounds(format!(
                "time range {:?} exceeds horizon {}",
                window, self.horizon
            )));
        }
        Ok(())
    }

    /// Copies whole episodes from `src[src_range]` into `self[dst]`.
    /// Requires identical storage layout; used by the replay buffer.
    pub(crate) fn copy_slots_from(
        &mut self,
        dst: Range<usize>,
        src: &EpisodeBatch,
        src_range: Range<usize>,
    ) -> Result<(), StoreError> {
        let scheme = Arc::clone(&self.scheme);
        for field in scheme.fields() {
            let src_value = src.storage(&field.name)?;
            let dst_value = self.data.get_mut(&field.name).ok_or_else(|| {
                StoreError::Scheme(format!("unknown field '{}'", field.name))
            })?;
            dst_value
                .copy_rows_from(dst.clone(), src_value, src_range.clone())
                .map_err(|m| StoreError::Dtype {
                    field: field.name.clone(),
                    expected: m.expected,
                    actual: m.actual,
                })?;
        }
        self.filled
            .slice_mut(s![dst, ..])
            .assign(&src.filled.slice(s![src_range, ..]));
        Ok(())
    }

    fn storage(&self, field: &str) -> Result<&Value, StoreError> {
        self.data
            .get(field)
            .ok_or_else(|| StoreError::Scheme(format!("unknown field '{}'", field)))
    }

    fn write(
        &mut self,
        field: &str,
        slots: Range<usize>,
        ts: Option<usize>,
        v: &Value,
    ) -> Result<(), StoreError> {
        let storage = self.data.get_mut(field).ok_or_else(|| {
            StoreError::Scheme(format!("unknown field '{}'", field))
        })?;
        storage
            .assign_at(slots, ts, v)
            .map_err(|m| StoreError::Dtype {
                field: field.to_string(),
                expected: m.expected,
                actual: m.actual,
            })
    }

    /// Checks a value against the field's effective shape for the
    /// addressed slots, expanding a bare per-slot value when exactly one
    /// slot is addressed. Returns the expanded value, or `None` when the
    /// input already matches.
    fn normalize(
        field: &str,
        value: &Value,
        effective: &[usize],
        n_slots: usize,
    ) -> Result<Option<Value>, StoreError> {
        let mut expected = Vec::with_capacity(effective.len() + 1);
        expected.push(n_slots);
        expected.extend_from_slice(effective);

        if value.shape() == expected.as_slice() {
            return Ok(None);
        }
        if n_slots == 1 && value.shape() == effective {
            return Ok(Some(value.clone().insert_batch_axis()));
        }
        Err(StoreError::Shape {
            field: field.to_string(),
            expected,
            actual: value.shape().to_vec(),
        })
    }
}

/// Read-only borrowing window into an [`EpisodeBatch`].
///
/// Addresses are relative to the window; anything outside it is rejected
/// with [`StoreError::Bounds`].
pub struct EpisodeSlice<'a> {
    batch: &'a EpisodeBatch,
    slots: Range<usize>,
    window: Range<usize>,
}

impl<'a> EpisodeSlice<'a> {
    /// Number of batch slots in the window.
    pub fn batch_size(&self) -> usize {
        self.slots.len()
    }

    /// Number of timesteps in the window.
    pub fn horizon(&self) -> usize {
        self.window.len()
    }

    /// Owned copy of a field over window-relative batch and time ranges.
    pub fn read(
        &self,
        field: &str,
        batch: Range<usize>,
        time: Range<usize>,
    ) -> Result<Value, StoreError> {
        let (batch, time) = rebase(&self.slots, &self.window, batch, time)?;
        self.batch.read(field, batch, time)
    }

    /// Highest filled index within the window plus one, relative to the
    /// window start; the maximum over the window's slots.
    pub fn max_t_filled(&self) -> usize {
        self.batch
            .filled
            .slice(s![self.slots.clone(), self.window.clone()])
            .outer_iter()
            .map(|row| row.iter().rposition(|&f| f).map_or(0, |i| i + 1))
            .max()
            .unwrap_or(0)
    }
}

/// Writable borrowing window into an [`EpisodeBatch`].
pub struct EpisodeSliceMut<'a> {
    batch: &'a mut EpisodeBatch,
    slots: Range<usize>,
    window: Range<usize>,
}

impl<'a> EpisodeSliceMut<'a> {
    /// Number of batch slots in the window.
    pub fn batch_size(&self) -> usize {
        self.slots.len()
    }

    /// Number of timesteps in the window.
    pub fn horizon(&self) -> usize {
        self.window.len()
    }

    /// Writes field values at a window-relative timestep for
    /// window-relative batch slots.
    pub fn update_slots(
        &mut self,
        values: &[(&str, Value)],
        ts: usize,
        slots: Range<usize>,
        mark_filled: bool,
    ) -> Result<(), StoreError> {
        if ts >= self.window.len() {
            return Err(StoreError::Bounds(format!(
                "timestep {} exceeds window length {}",
                ts,
                self.window.len()
            )));
        }
        if slots.start > slots.end || slots.end > self.slots.len() {
            return Err(StoreError::Bounds(format!(
                "batch slots {:?} exceed window width {}",
                slots,
                self.slots.len()
            )));
        }
        let abs_slots = self.slots.start + slots.start..self.slots.start + slots.end;
        self.batch
            .update_slots(values, self.window.start + ts, abs_slots, mark_filled)
    }

    /// Writes field values at a window-relative timestep for every slot
    /// in the window and marks it filled.
    pub fn update(&mut self, values: &[(&str, Value)], ts: usize) -> Result<(), StoreError> {
        let slots = 0..self.slots.len();
        self.update_slots(values, ts, slots, true)
    }

    /// Owned copy of a field over window-relative batch and time ranges.
    pub fn read(
        &self,
        field: &str,
        batch: Range<usize>,
        time: Range<usize>,
    ) -> Result<Value, StoreError> {
        let (batch, time) = rebase(&self.slots, &self.window, batch, time)?;
        self.batch.read(field, batch, time)
    }
}

fn rebase(
    slots: &Range<usize>,
    window: &Range<usize>,
    batch: Range<usize>,
    time: Range<usize>,
) -> Result<(Range<usize>, Range<usize>), StoreError> {
    if batch.start > batch.end || batch.end > slots.len() {
        return Err(StoreError::Bounds(format!(
            "batch range {:?} exceeds window width {}",
            batch,
            slots.len()
        )));
    }
    if time.start > time.end || time.end > window.len() {
        return Err(StoreError::Bounds(format!(
            "time range {:?} exceeds window length {}",
            time,
            window.len()
        )));
    }
    Ok((
        slots.start + batch.start..slots.start + batch.end,
        window.start + time.start..window.start + time.end,
    ))
}
