//! Errors in the library.
use crate::scheme::Dtype;
use thiserror::Error;

/// Errors raised by the storage core.
///
/// All failures surface synchronously to the caller of the offending
/// operation; nothing is retried or recovered internally.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Invalid field or group configuration, detected when a scheme is compiled.
    #[error("scheme error: {0}")]
    Scheme(String),

    /// A written value's shape does not match the field's effective shape,
    /// or a categorical index exceeds the transform's cardinality.
    #[error("shape mismatch for field '{field}': expected {expected:?}, got {actual:?}")]
    Shape {
        /// Field being written.
        field: String,
        /// Shape the scheme requires.
        expected: Vec<usize>,
        /// Shape of the offending value.
        actual: Vec<usize>,
    },

    /// A written value's dtype does not match the field's dtype.
    #[error("dtype mismatch for field '{field}': expected {expected:?}, got {actual:?}")]
    Dtype {
        /// Field being written.
        field: String,
        /// Dtype the scheme requires.
        expected: Dtype,
        /// Dtype of the offending value.
        actual: Dtype,
    },

    /// A timestep or batch index outside the store's fixed dimensions.
    #[error("index out of bounds: {0}")]
    Bounds(String),

    /// A request exceeding the buffer's capacity, either an episode batch
    /// too large to insert or a sample larger than the valid episode count.
    #[error("capacity exceeded: requested {requested}, available {capacity}")]
    Capacity {
        /// Number of episodes requested.
        requested: usize,
        /// Number of episodes the buffer can satisfy.
        capacity: usize,
    },
}
