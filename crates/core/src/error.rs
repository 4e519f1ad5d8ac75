use thiserror::Error;

use crate::attributes::AttributeType;

/// Errors raised synchronously by point and surface operations before any
/// parallel work starts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PointsError {
    #[error("failed to find attribute \"{name}\"")]
    MissingAttribute { name: String },
    #[error("attribute \"{name}\" already exists")]
    DuplicateAttribute { name: String },
    #[error("transfer of attribute {name} not supported since it is strided")]
    StridedAttribute { name: String },
    #[error("attribute \"{name}\" has type {actual:?}, expected {expected:?}")]
    AttributeType {
        name: String,
        expected: AttributeType,
        actual: AttributeType,
    },
    #[error("attribute \"{name}\" has {actual} values, expected {expected}")]
    LengthMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("no leafs in cache, perhaps CachedDeformer has not been evaluated?")]
    EmptyCache,
    #[error("leaf index {index} is out-of-range of {len} cache leafs")]
    CacheIndexOutOfRange { index: usize, len: usize },
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
}

pub type PointsResult<T> = Result<T, PointsError>;
