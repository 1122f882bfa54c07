use thiserror::Error;

use crate::{DType, Dims, Shape, TensorId, ValueId};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TensorError {
    #[error("tensor byte length mismatch: expected {expected}, got {got}")]
    ByteLength { expected: usize, got: usize },

    #[error("dtype mismatch: expected {expected:?}, got {got:?}")]
    DType { expected: DType, got: DType },

    #[error("invalid permutation {order:?} for rank {rank}")]
    Permutation { order: Vec<usize>, rank: usize },

    #[error("cannot reshape {from} into {to}: element counts differ")]
    ElementCount { from: Shape, to: Shape },

    #[error("tensor of shape {0} does not fit in memory")]
    TooLarge(Shape),
}

/// Structural problems in a source graph, found before any node is converted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("value {0} is not defined in this graph")]
    UnknownValue(ValueId),

    #[error("value {value} consumed by `{node}` has no producer")]
    Undefined { value: ValueId, node: String },

    #[error("value {0} is produced by more than one node")]
    MultipleProducers(ValueId),

    #[error("value {0} is declared as a graph input but is not an input value")]
    NotAnInput(ValueId),

    #[error("graph contains a cycle through {0} node(s)")]
    Cycle(usize),
}

/// The target graph rejected a layer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NetworkError {
    #[error("unknown network tensor {0:?}")]
    UnknownTensor(TensorId),

    #[error("tensor name `{0}` is already used")]
    DuplicateName(String),

    #[error("invalid permutation {order:?} for tensor of rank {rank}")]
    Permutation { order: Vec<usize>, rank: usize },

    #[error("cannot reshape {input} to {target}: {reason}")]
    Reshape {
        input: Dims,
        target: Dims,
        reason: &'static str,
    },

    #[error("matrix multiply operands are incompatible: {lhs} x {rhs}")]
    MatrixMultiply { lhs: Dims, rhs: Dims },

    #[error("operands cannot be broadcast together: {lhs} and {rhs}")]
    Broadcast { lhs: Dims, rhs: Dims },

    #[error("operand dtypes differ: {lhs:?} and {rhs:?}")]
    DTypeMismatch { lhs: DType, rhs: DType },

    #[error("tensor `{0}` is already a network input or output")]
    AlreadyMarked(String),
}

/// The target compiler rejected a finished network.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuildError {
    #[error("network has no outputs")]
    EmptyNetwork,

    #[error("layer `{layer}` uses unsupported dtype {dtype:?}")]
    UnsupportedDType { layer: String, dtype: DType },

    #[error("unsupported network feature: {0}")]
    Unsupported(String),

    #[error("engine needs {required} bytes of workspace, limit is {limit}")]
    ResourceExhausted { required: usize, limit: usize },

    #[error(transparent)]
    Binding(#[from] MalformedBindingName),

    #[error("failed to serialize engine: {0}")]
    Serialize(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("binding name `{name}` does not end in `_<index>`")]
pub struct MalformedBindingName {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("device record must be exactly {expected} bytes, got {len}")]
pub struct MalformedDeviceRecord {
    pub expected: usize,
    pub len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("device {0} was never enumerated")]
    NotFound(i32),

    #[error("device driver call `{call}` failed for device {device_id}: {message}")]
    Driver {
        call: &'static str,
        device_id: i32,
        message: String,
    },
}

/// Failure reported by an acceleration runtime (deserialization, context
/// creation, execution).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("failed to deserialize engine: {0}")]
    Deserialize(String),

    #[error("failed to create execution context: {0}")]
    Context(String),

    #[error("execution failed: {0}")]
    Execution(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("engine payload truncated at byte {offset}: need {needed} more bytes")]
    Truncated { offset: usize, needed: usize },
}
