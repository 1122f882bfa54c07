//! Target graph built by the converters and consumed by an engine builder.
//!
//! Every `add_*` call runs shape inference, so a layer that cannot exist is
//! rejected where it is created rather than at build time. Dims use `-1` for
//! sizes that are only known at run time.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{is_permutation, DType, NetworkError, Shape, Tensor};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TensorId(pub usize);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Dims(pub SmallVec<[i64; 6]>);

impl Dims {
    pub fn from_slice(d: &[i64]) -> Self {
        Self(d.iter().copied().collect())
    }

    pub fn from_shape(shape: &Shape) -> Self {
        Self(shape.0.iter().map(|&d| d as i64).collect())
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[i64] {
        &self.0
    }

    pub fn is_static(&self) -> bool {
        self.0.iter().all(|&d| d >= 0)
    }

    pub fn to_shape(&self) -> Option<Shape> {
        if !self.is_static() {
            return None;
        }
        Some(Shape(self.0.iter().map(|&d| d as usize).collect()))
    }

    /// Element count, when every dim is known and the count fits in an `i64`.
    pub fn volume(&self) -> Option<i64> {
        if !self.is_static() {
            return None;
        }
        self.0.iter().try_fold(1i64, |acc, &d| acc.checked_mul(d))
    }
}

impl fmt::Display for Dims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0.as_slice())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NetworkTensor {
    pub name: String,
    pub dtype: DType,
    pub dims: Dims,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatrixOp {
    None,
    Transpose,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementWiseOp {
    Sum,
    Sub,
    Prod,
}

/// Transpose, reshape, transpose. Reshape entries: `0` copies the input dim
/// at the same index, `-1` is inferred from the remaining dims.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShuffleSpec {
    pub first_transpose: Option<Vec<usize>>,
    pub reshape: Option<Dims>,
    pub second_transpose: Option<Vec<usize>>,
}

impl ShuffleSpec {
    pub fn reshape(dims: Dims) -> Self {
        Self {
            reshape: Some(dims),
            ..Self::default()
        }
    }

    pub fn transpose(order: Vec<usize>) -> Self {
        Self {
            second_transpose: Some(order),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum LayerKind {
    Constant { weights: Tensor },
    Shuffle(ShuffleSpec),
    MatrixMultiply { op0: MatrixOp, op1: MatrixOp },
    ElementWise(ElementWiseOp),
}

impl LayerKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            LayerKind::Constant { .. } => "constant",
            LayerKind::Shuffle(_) => "shuffle",
            LayerKind::MatrixMultiply { .. } => "matrix_multiply",
            LayerKind::ElementWise(_) => "elementwise",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub name: String,
    pub kind: LayerKind,
    pub inputs: Vec<TensorId>,
    pub output: TensorId,
}

/// Layers are stored in creation order, which is always a valid execution
/// order because a layer can only consume tensors that already exist.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Network {
    tensors: Vec<NetworkTensor>,
    layers: Vec<Layer>,
    inputs: Vec<TensorId>,
    outputs: Vec<TensorId>,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tensors(&self) -> &[NetworkTensor] {
        &self.tensors
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn inputs(&self) -> &[TensorId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TensorId] {
        &self.outputs
    }

    pub fn tensor(&self, id: TensorId) -> Result<&NetworkTensor, NetworkError> {
        self.tensors.get(id.0).ok_or(NetworkError::UnknownTensor(id))
    }

    pub fn dims(&self, id: TensorId) -> Result<&Dims, NetworkError> {
        Ok(&self.tensor(id)?.dims)
    }

    pub fn find_tensor(&self, name: &str) -> Option<TensorId> {
        self.tensors
            .iter()
            .position(|t| t.name == name)
            .map(TensorId)
    }

    pub fn is_marked(&self, id: TensorId) -> bool {
        self.inputs.contains(&id) || self.outputs.contains(&id)
    }

    fn push_tensor(&mut self, name: String, dtype: DType, dims: Dims) -> TensorId {
        let id = TensorId(self.tensors.len());
        self.tensors.push(NetworkTensor { name, dtype, dims });
        id
    }

    fn push_layer(
        &mut self,
        name: &str,
        kind: LayerKind,
        inputs: Vec<TensorId>,
        dtype: DType,
        dims: Dims,
    ) -> TensorId {
        let output = self.push_tensor(format!("{name}:out"), dtype, dims);
        self.layers.push(Layer {
            name: name.to_string(),
            kind,
            inputs,
            output,
        });
        output
    }

    pub fn add_input(&mut self, name: &str, dtype: DType, dims: Dims) -> Result<TensorId, NetworkError> {
        if self.find_tensor(name).is_some() {
            return Err(NetworkError::DuplicateName(name.to_string()));
        }
        let id = self.push_tensor(name.to_string(), dtype, dims);
        self.inputs.push(id);
        Ok(id)
    }

    pub fn add_constant(&mut self, name: &str, weights: Tensor) -> TensorId {
        let dims = Dims::from_shape(&weights.shape);
        let dtype = weights.dtype;
        self.push_layer(name, LayerKind::Constant { weights }, Vec::new(), dtype, dims)
    }

    pub fn add_shuffle(
        &mut self,
        name: &str,
        input: TensorId,
        spec: ShuffleSpec,
    ) -> Result<TensorId, NetworkError> {
        let source = self.tensor(input)?;
        let dims = infer_shuffle(&source.dims, &spec)?;
        let dtype = source.dtype;
        Ok(self.push_layer(name, LayerKind::Shuffle(spec), vec![input], dtype, dims))
    }

    pub fn add_matrix_multiply(
        &mut self,
        name: &str,
        lhs: TensorId,
        op0: MatrixOp,
        rhs: TensorId,
        op1: MatrixOp,
    ) -> Result<TensorId, NetworkError> {
        let (a, b) = (self.tensor(lhs)?, self.tensor(rhs)?);
        if a.dtype != b.dtype {
            return Err(NetworkError::DTypeMismatch {
                lhs: a.dtype,
                rhs: b.dtype,
            });
        }
        let dims = infer_matrix_multiply(&a.dims, op0, &b.dims, op1)?;
        let dtype = a.dtype;
        Ok(self.push_layer(
            name,
            LayerKind::MatrixMultiply { op0, op1 },
            vec![lhs, rhs],
            dtype,
            dims,
        ))
    }

    pub fn add_elementwise(
        &mut self,
        name: &str,
        lhs: TensorId,
        rhs: TensorId,
        op: ElementWiseOp,
    ) -> Result<TensorId, NetworkError> {
        let (a, b) = (self.tensor(lhs)?, self.tensor(rhs)?);
        if a.dtype != b.dtype {
            return Err(NetworkError::DTypeMismatch {
                lhs: a.dtype,
                rhs: b.dtype,
            });
        }
        let dims = infer_broadcast(&a.dims, &b.dims)?;
        let dtype = a.dtype;
        Ok(self.push_layer(name, LayerKind::ElementWise(op), vec![lhs, rhs], dtype, dims))
    }

    /// Names `tensor` and marks it as a network output.
    pub fn mark_output(&mut self, tensor: TensorId, name: &str) -> Result<(), NetworkError> {
        let existing = &self.tensor(tensor)?.name;
        if self.is_marked(tensor) {
            return Err(NetworkError::AlreadyMarked(existing.clone()));
        }
        if self.find_tensor(name).is_some() {
            return Err(NetworkError::DuplicateName(name.to_string()));
        }
        self.tensors[tensor.0].name = name.to_string();
        self.outputs.push(tensor);
        Ok(())
    }
}

fn permute_dims(dims: &Dims, order: &[usize]) -> Result<Dims, NetworkError> {
    if !is_permutation(order, dims.rank()) {
        return Err(NetworkError::Permutation {
            order: order.to_vec(),
            rank: dims.rank(),
        });
    }
    Ok(Dims(order.iter().map(|&axis| dims.0[axis]).collect()))
}

/// Output dims of a shuffle. With concrete input dims the result is concrete.
pub fn infer_shuffle(input: &Dims, spec: &ShuffleSpec) -> Result<Dims, NetworkError> {
    let mut dims = input.clone();
    if let Some(order) = &spec.first_transpose {
        dims = permute_dims(&dims, order)?;
    }

    if let Some(target) = &spec.reshape {
        let reject = |reason| NetworkError::Reshape {
            input: input.clone(),
            target: target.clone(),
            reason,
        };

        let mut out: SmallVec<[i64; 6]> = SmallVec::with_capacity(target.rank());
        let mut infer_at = None;
        for (i, &d) in target.0.iter().enumerate() {
            match d {
                0 => out.push(*dims.0.get(i).ok_or_else(|| reject("copied dim is out of range"))?),
                -1 if infer_at.is_some() => return Err(reject("more than one inferred dim")),
                -1 => {
                    infer_at = Some(i);
                    out.push(-1);
                }
                d if d > 0 => out.push(d),
                _ => return Err(reject("negative dim")),
            }
        }

        let total = dims.volume();
        if dims.is_static() && total.is_none() {
            return Err(reject("element count overflows"));
        }
        match infer_at {
            Some(at) => {
                let others_known = out.iter().enumerate().all(|(i, &d)| i == at || d >= 0);
                if let (Some(total), true) = (total, others_known) {
                    let known = out
                        .iter()
                        .enumerate()
                        .filter(|&(i, _)| i != at)
                        .try_fold(1i64, |acc, (_, &d)| acc.checked_mul(d))
                        .ok_or_else(|| reject("element count overflows"))?;
                    if known == 0 || total % known != 0 {
                        return Err(reject("element count is not divisible"));
                    }
                    out[at] = total / known;
                }
            }
            None => {
                let reshaped = Dims(out.clone());
                if let (Some(total), true) = (total, reshaped.is_static()) {
                    if reshaped.volume() != Some(total) {
                        return Err(reject("element counts differ"));
                    }
                }
            }
        }
        dims = Dims(out);
    }

    if let Some(order) = &spec.second_transpose {
        dims = permute_dims(&dims, order)?;
    }
    Ok(dims)
}

fn broadcast_dim(a: i64, b: i64) -> Option<i64> {
    match (a, b) {
        _ if a == b => Some(a),
        (1, _) => Some(b),
        (_, 1) => Some(a),
        (-1, _) => Some(b),
        (_, -1) => Some(a),
        _ => None,
    }
}

/// Same-rank broadcast: each dim pair must match or one side must be 1.
pub fn infer_broadcast(lhs: &Dims, rhs: &Dims) -> Result<Dims, NetworkError> {
    let reject = || NetworkError::Broadcast {
        lhs: lhs.clone(),
        rhs: rhs.clone(),
    };
    if lhs.rank() != rhs.rank() {
        return Err(reject());
    }
    lhs.0
        .iter()
        .zip(rhs.0.iter())
        .map(|(&a, &b)| broadcast_dim(a, b).ok_or_else(reject))
        .collect::<Result<SmallVec<_>, _>>()
        .map(Dims)
}

/// `[batch.., M, K] x [batch.., K, N] -> [batch.., M, N]`; operands must share
/// rank (>= 2) and batch dims broadcast.
pub fn infer_matrix_multiply(
    lhs: &Dims,
    op0: MatrixOp,
    rhs: &Dims,
    op1: MatrixOp,
) -> Result<Dims, NetworkError> {
    let reject = || NetworkError::MatrixMultiply {
        lhs: lhs.clone(),
        rhs: rhs.clone(),
    };
    let rank = lhs.rank();
    if rank < 2 || rhs.rank() != rank {
        return Err(reject());
    }

    let (m, k0) = match op0 {
        MatrixOp::None => (lhs.0[rank - 2], lhs.0[rank - 1]),
        MatrixOp::Transpose => (lhs.0[rank - 1], lhs.0[rank - 2]),
    };
    let (k1, n) = match op1 {
        MatrixOp::None => (rhs.0[rank - 2], rhs.0[rank - 1]),
        MatrixOp::Transpose => (rhs.0[rank - 1], rhs.0[rank - 2]),
    };
    if k0 >= 0 && k1 >= 0 && k0 != k1 {
        return Err(reject());
    }

    let mut out: SmallVec<[i64; 6]> = SmallVec::with_capacity(rank);
    for (&a, &b) in lhs.0[..rank - 2].iter().zip(rhs.0[..rank - 2].iter()) {
        out.push(broadcast_dim(a, b).ok_or_else(reject)?);
    }
    out.push(m);
    out.push(n);
    Ok(Dims(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims(d: &[i64]) -> Dims {
        Dims::from_slice(d)
    }

    #[test]
    fn reshape_infers_and_copies() {
        let spec = ShuffleSpec::reshape(dims(&[0, -1]));
        assert_eq!(infer_shuffle(&dims(&[2, 3, 4]), &spec).unwrap(), dims(&[2, 12]));
        assert_eq!(infer_shuffle(&dims(&[-1, 3, 4]), &spec).unwrap(), dims(&[-1, -1]));
    }

    #[test]
    fn reshape_rejects_count_mismatch() {
        let spec = ShuffleSpec::reshape(dims(&[5, 5]));
        assert!(matches!(
            infer_shuffle(&dims(&[2, 3]), &spec),
            Err(NetworkError::Reshape { .. })
        ));
        let spec = ShuffleSpec::reshape(dims(&[-1, -1]));
        assert!(infer_shuffle(&dims(&[2, 3]), &spec).is_err());
    }

    #[test]
    fn volume_overflow_is_not_a_count() {
        assert_eq!(dims(&[2, 3, 4]).volume(), Some(24));
        assert_eq!(dims(&[i64::MAX, 2]).volume(), None);

        let spec = ShuffleSpec::reshape(dims(&[2, i64::MAX / 2 + 1]));
        assert!(matches!(
            infer_shuffle(&dims(&[4]), &spec),
            Err(NetworkError::Reshape { .. })
        ));
        let spec = ShuffleSpec::reshape(dims(&[-1]));
        assert!(infer_shuffle(&dims(&[i64::MAX, 4]), &spec).is_err());
    }

    #[test]
    fn transpose_then_reshape_order() {
        let spec = ShuffleSpec {
            first_transpose: Some(vec![1, 0]),
            reshape: Some(dims(&[0, 0, 1])),
            second_transpose: Some(vec![2, 0, 1]),
        };
        assert_eq!(infer_shuffle(&dims(&[2, 5]), &spec).unwrap(), dims(&[1, 5, 2]));
    }

    #[test]
    fn matrix_multiply_broadcasts_batch() {
        let out = infer_matrix_multiply(&dims(&[1, 2, 3]), MatrixOp::None, &dims(&[4, 3, 5]), MatrixOp::None)
            .unwrap();
        assert_eq!(out, dims(&[4, 2, 5]));
        assert!(infer_matrix_multiply(&dims(&[2, 3]), MatrixOp::None, &dims(&[4, 5]), MatrixOp::None).is_err());
        let out = infer_matrix_multiply(&dims(&[2, 3]), MatrixOp::None, &dims(&[5, 3]), MatrixOp::Transpose)
            .unwrap();
        assert_eq!(out, dims(&[2, 5]));
    }

    #[test]
    fn mark_output_renames_once() {
        let mut net = Network::new();
        let x = net.add_input("input_0", DType::F32, dims(&[2, 2])).unwrap();
        let y = net.add_shuffle("t", x, ShuffleSpec::transpose(vec![1, 0])).unwrap();
        net.mark_output(y, "output_0").unwrap();
        assert_eq!(net.tensor(y).unwrap().name, "output_0");
        assert!(matches!(net.mark_output(y, "output_1"), Err(NetworkError::AlreadyMarked(_))));
        assert!(matches!(net.mark_output(x, "output_1"), Err(NetworkError::AlreadyMarked(_))));
    }
}
