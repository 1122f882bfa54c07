use engineport_core::{BuildError, GraphError, NetworkError, TensorError};
use thiserror::Error;

/// Failure inside a single converter; the driver adds node context.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConverterError {
    #[error("{0}")]
    Invalid(String),

    #[error("{0}")]
    DynamicShape(String),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Tensor(#[from] TensorError),
}

impl ConverterError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }

    pub fn dynamic_shape(message: impl Into<String>) -> Self {
        Self::DynamicShape(message.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("a converter is already registered for `{signature}`")]
pub struct RegistrationConflict {
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConversionError {
    #[error("unsupported operation: no converter registered for `{signature}`")]
    UnsupportedOperation { signature: String },

    #[error("unable to convert node `{node}` ({signature}): {message}")]
    Converter {
        signature: String,
        node: String,
        message: String,
    },

    #[error("node `{node}` ({signature}) is not supported with dynamic input shapes: {message}")]
    UnsupportedDynamicShape {
        signature: String,
        node: String,
        message: String,
    },

    #[error("invalid source graph: {0}")]
    Graph(#[from] GraphError),

    #[error("invalid network: {0}")]
    Network(#[from] NetworkError),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error("engine build failed: {0}")]
    Build(#[from] BuildError),
}
