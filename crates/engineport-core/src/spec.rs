use serde::{Deserialize, Serialize};

use crate::{DType, Dims, MalformedBindingName};

/// Engine I/O binding name, `<label>_<index>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BindingName(pub String);

impl BindingName {
    pub fn input(index: usize) -> Self {
        Self(format!("input_{index}"))
    }

    pub fn output(index: usize) -> Self {
        Self(format!("output_{index}"))
    }

    /// Logical index: the decimal suffix after the last underscore.
    pub fn logical_index(&self) -> Result<usize, MalformedBindingName> {
        let malformed = || MalformedBindingName {
            name: self.0.clone(),
        };
        let (_, suffix) = self.0.rsplit_once('_').ok_or_else(malformed)?;
        if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        suffix.parse().map_err(|_| malformed())
    }
}

/// One physical binding slot of a compiled engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BindingSpec {
    pub name: BindingName,
    pub is_input: bool,
    pub dtype: DType,
    pub dims: Dims, // -1 = dynamic
}
