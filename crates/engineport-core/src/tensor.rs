use bytes::Bytes;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::TensorError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    F32,
    F16,
    I64,
    I32,
    U8,
}

impl DType {
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F16 => 2,
            DType::I64 => 8,
            DType::I32 => 4,
            DType::U8 => 1,
        }
    }

    pub fn is_floating_point(self) -> bool {
        matches!(self, DType::F32 | DType::F16)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape(pub SmallVec<[usize; 6]>);

impl Shape {
    pub fn from_slice(d: &[usize]) -> Self {
        Self(d.iter().copied().collect())
    }
    pub fn rank(&self) -> usize {
        self.0.len()
    }
    pub fn numel(&self) -> usize {
        self.0.iter().product::<usize>()
    }
    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Row-major element strides.
    pub fn strides(&self) -> SmallVec<[usize; 6]> {
        let mut strides: SmallVec<[usize; 6]> = SmallVec::from_elem(1, self.rank());
        for i in (0..self.rank().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * self.0[i + 1];
        }
        strides
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.0.as_slice())
    }
}

/// Host tensor. Element data is stored little-endian.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTensor")]
pub struct Tensor {
    pub dtype: DType,
    pub shape: Shape,
    pub data: Bytes,
}

/// Unchecked wire form; deserialized tensors go through `from_cpu_bytes`.
#[derive(Deserialize)]
struct RawTensor {
    dtype: DType,
    shape: Shape,
    data: Bytes,
}

impl TryFrom<RawTensor> for Tensor {
    type Error = TensorError;

    fn try_from(raw: RawTensor) -> Result<Self, Self::Error> {
        Tensor::from_cpu_bytes(raw.dtype, raw.shape, raw.data)
    }
}

impl Tensor {
    pub fn from_cpu_bytes(dtype: DType, shape: Shape, data: Bytes) -> Result<Self, TensorError> {
        let expected = shape
            .0
            .iter()
            .try_fold(dtype.size_in_bytes(), |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| TensorError::TooLarge(shape.clone()))?;
        if data.len() != expected {
            return Err(TensorError::ByteLength {
                expected,
                got: data.len(),
            });
        }
        Ok(Self { dtype, shape, data })
    }

    pub fn from_f32(shape: &[usize], values: &[f32]) -> Result<Self, TensorError> {
        let data: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::from_cpu_bytes(DType::F32, Shape::from_slice(shape), Bytes::from(data))
    }

    pub fn from_i64(shape: &[usize], values: &[i64]) -> Result<Self, TensorError> {
        let data: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::from_cpu_bytes(DType::I64, Shape::from_slice(shape), Bytes::from(data))
    }

    pub fn numel(&self) -> usize {
        self.shape.numel()
    }

    pub fn to_f32_vec(&self) -> Result<Vec<f32>, TensorError> {
        if self.dtype != DType::F32 {
            return Err(TensorError::DType {
                expected: DType::F32,
                got: self.dtype,
            });
        }
        Ok(self
            .data
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }

    pub fn to_i64_vec(&self) -> Result<Vec<i64>, TensorError> {
        if self.dtype != DType::I64 {
            return Err(TensorError::DType {
                expected: DType::I64,
                got: self.dtype,
            });
        }
        Ok(self
            .data
            .chunks_exact(8)
            .map(|b| i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
            .collect())
    }

    /// Same data under a new shape; element counts must agree.
    pub fn reshape(&self, shape: Shape) -> Result<Self, TensorError> {
        if shape.numel() != self.numel() {
            return Err(TensorError::ElementCount {
                from: self.shape.clone(),
                to: shape,
            });
        }
        Ok(Self {
            dtype: self.dtype,
            shape,
            data: self.data.clone(),
        })
    }

    /// Reorders dimensions so that output dim `k` is input dim `order[k]`.
    /// Works on raw elements, so any dtype is accepted.
    pub fn permute(&self, order: &[usize]) -> Result<Self, TensorError> {
        let rank = self.shape.rank();
        if !is_permutation(order, rank) {
            return Err(TensorError::Permutation {
                order: order.to_vec(),
                rank,
            });
        }

        let elem = self.dtype.size_in_bytes();
        let in_strides = self.shape.strides();
        let out_dims: SmallVec<[usize; 6]> = order.iter().map(|&d| self.shape.0[d]).collect();
        let numel = self.numel();

        let mut out = Vec::with_capacity(numel * elem);
        let mut index: SmallVec<[usize; 6]> = SmallVec::from_elem(0, rank);
        for _ in 0..numel {
            let src: usize = (0..rank).map(|k| index[k] * in_strides[order[k]]).sum();
            out.extend_from_slice(&self.data[src * elem..(src + 1) * elem]);
            for k in (0..rank).rev() {
                index[k] += 1;
                if index[k] < out_dims[k] {
                    break;
                }
                index[k] = 0;
            }
        }

        Ok(Self {
            dtype: self.dtype,
            shape: Shape(out_dims),
            data: Bytes::from(out),
        })
    }
}

/// True when `order` names every axis in `0..rank` exactly once.
pub fn is_permutation(order: &[usize], rank: usize) -> bool {
    if order.len() != rank {
        return false;
    }
    let mut seen: SmallVec<[bool; 6]> = SmallVec::from_elem(false, rank);
    for &axis in order {
        if axis >= rank || seen[axis] {
            return false;
        }
        seen[axis] = true;
    }
    true
}
