//! CPU execution of a planned network. Compute layers run on F32 data.

use std::fmt::Display;

use engineport_core::{
    infer_broadcast, infer_matrix_multiply, infer_shuffle, BackendError, DType, Dims,
    ElementWiseOp, Layer, LayerKind, MatrixOp, Shape, ShuffleSpec, Tensor,
};
use smallvec::SmallVec;

use crate::EnginePlan;

fn exec_err(e: impl Display) -> BackendError {
    BackendError::Execution(e.to_string())
}

/// Runs `plan` over physical binding `slots`: inputs are taken out, outputs
/// are filled in.
pub fn execute(plan: &EnginePlan, slots: &mut [Option<Tensor>]) -> Result<(), BackendError> {
    if slots.len() != plan.bindings.len() {
        return Err(exec_err(format!(
            "expected {} binding slots, got {}",
            plan.bindings.len(),
            slots.len()
        )));
    }

    let network = &plan.network;
    let mut values: Vec<Option<Tensor>> = vec![None; network.tensors().len()];
    for (slot, binding) in plan.bindings.iter().enumerate() {
        if !binding.spec.is_input {
            continue;
        }
        let tensor = slots[slot]
            .take()
            .ok_or_else(|| exec_err(format!("input `{}` was not provided", binding.spec.name.0)))?;
        if tensor.dtype != binding.spec.dtype || !dims_match(&binding.spec.dims, &tensor.shape) {
            return Err(exec_err(format!(
                "input `{}` expects {:?} {}, got {:?} {}",
                binding.spec.name.0, binding.spec.dtype, binding.spec.dims, tensor.dtype, tensor.shape
            )));
        }
        *value_slot(&mut values, binding.tensor.0)? = Some(tensor);
    }

    for layer in network.layers() {
        let out = run_layer(layer, &values)?;
        *value_slot(&mut values, layer.output.0)? = Some(out);
    }

    for (slot, binding) in plan.bindings.iter().enumerate() {
        if binding.spec.is_input {
            continue;
        }
        let value = values
            .get(binding.tensor.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| exec_err(format!("output `{}` was never computed", binding.spec.name.0)))?;
        slots[slot] = Some(value.clone());
    }
    Ok(())
}

fn value_slot(values: &mut [Option<Tensor>], index: usize) -> Result<&mut Option<Tensor>, BackendError> {
    values
        .get_mut(index)
        .ok_or_else(|| exec_err(format!("plan references unknown tensor {index}")))
}

fn dims_match(expected: &Dims, shape: &Shape) -> bool {
    expected.rank() == shape.rank()
        && expected
            .as_slice()
            .iter()
            .zip(shape.dims())
            .all(|(&e, &s)| e < 0 || e as usize == s)
}

fn layer_input<'v>(
    layer: &Layer,
    values: &'v [Option<Tensor>],
    i: usize,
) -> Result<&'v Tensor, BackendError> {
    layer
        .inputs
        .get(i)
        .and_then(|id| values.get(id.0))
        .and_then(Option::as_ref)
        .ok_or_else(|| exec_err(format!("missing input {i}")))
}

fn run_layer(layer: &Layer, values: &[Option<Tensor>]) -> Result<Tensor, BackendError> {
    let input = |i| layer_input(layer, values, i);
    let result = match &layer.kind {
        LayerKind::Constant { weights } => Ok(weights.clone()),
        LayerKind::Shuffle(spec) => input(0).and_then(|t| shuffle(t, spec)),
        LayerKind::MatrixMultiply { op0, op1 } => {
            input(0).and_then(|a| matrix_multiply(a, *op0, input(1)?, *op1))
        }
        LayerKind::ElementWise(op) => input(0).and_then(|a| elementwise(a, input(1)?, *op)),
    };
    result.map_err(|e| match e {
        BackendError::Execution(message) => exec_err(format!("layer `{}`: {message}", layer.name)),
        other => other,
    })
}

fn shuffle(input: &Tensor, spec: &ShuffleSpec) -> Result<Tensor, BackendError> {
    let mut t = match &spec.first_transpose {
        Some(order) => input.permute(order).map_err(exec_err)?,
        None => input.clone(),
    };
    if let Some(target) = &spec.reshape {
        let dims = infer_shuffle(&Dims::from_shape(&t.shape), &ShuffleSpec::reshape(target.clone()))
            .map_err(exec_err)?;
        let shape = dims
            .to_shape()
            .ok_or_else(|| exec_err(format!("reshape target {dims} is not concrete")))?;
        t = t.reshape(shape).map_err(exec_err)?;
    }
    if let Some(order) = &spec.second_transpose {
        t = t.permute(order).map_err(exec_err)?;
    }
    Ok(t)
}

fn require_f32(t: &Tensor) -> Result<Vec<f32>, BackendError> {
    if t.dtype != DType::F32 {
        return Err(exec_err(format!("{:?} compute is not supported", t.dtype)));
    }
    t.to_f32_vec().map_err(exec_err)
}

/// Offset into a tensor of shape `in_dims` for the element at `linear` in
/// the broadcast shape `out_dims`. Both have the same rank.
fn broadcast_offset(mut linear: usize, out_dims: &[usize], in_dims: &[usize]) -> usize {
    let mut offset = 0;
    let mut stride = 1;
    for axis in (0..out_dims.len()).rev() {
        let idx = linear % out_dims[axis];
        linear /= out_dims[axis];
        if in_dims[axis] != 1 {
            offset += idx * stride;
        }
        stride *= in_dims[axis];
    }
    offset
}

fn concrete(dims: Dims) -> Result<Shape, BackendError> {
    dims.to_shape()
        .ok_or_else(|| exec_err(format!("output dims {dims} are not concrete")))
}

fn swap_last_two(t: &Tensor, op: MatrixOp) -> Result<Tensor, BackendError> {
    let rank = t.shape.rank();
    match op {
        MatrixOp::None => Ok(t.clone()),
        MatrixOp::Transpose => {
            let mut order: SmallVec<[usize; 6]> = (0..rank).collect();
            order.swap(rank - 2, rank - 1);
            t.permute(&order).map_err(exec_err)
        }
    }
}

fn matrix_multiply(a: &Tensor, op0: MatrixOp, b: &Tensor, op1: MatrixOp) -> Result<Tensor, BackendError> {
    let out = concrete(
        infer_matrix_multiply(&Dims::from_shape(&a.shape), op0, &Dims::from_shape(&b.shape), op1)
            .map_err(exec_err)?,
    )?;
    let a = swap_last_two(a, op0)?;
    let b = swap_last_two(b, op1)?;
    let (av, bv) = (require_f32(&a)?, require_f32(&b)?);

    let rank = out.rank();
    let (m, n) = (out.0[rank - 2], out.0[rank - 1]);
    let k = a.shape.0[rank - 1];
    let batch_dims = &out.0[..rank - 2];
    let batch: usize = batch_dims.iter().product();

    let mut result = vec![0f32; out.numel()];
    for bi in 0..batch {
        let a_off = broadcast_offset(bi, batch_dims, &a.shape.0[..rank - 2]) * m * k;
        let b_off = broadcast_offset(bi, batch_dims, &b.shape.0[..rank - 2]) * k * n;
        let dst = &mut result[bi * m * n..(bi + 1) * m * n];
        for i in 0..m {
            for p in 0..k {
                let x = av[a_off + i * k + p];
                for j in 0..n {
                    dst[i * n + j] += x * bv[b_off + p * n + j];
                }
            }
        }
    }
    Tensor::from_f32(&out.0, &result).map_err(exec_err)
}

fn elementwise(a: &Tensor, b: &Tensor, op: ElementWiseOp) -> Result<Tensor, BackendError> {
    let out = concrete(
        infer_broadcast(&Dims::from_shape(&a.shape), &Dims::from_shape(&b.shape)).map_err(exec_err)?,
    )?;
    let (av, bv) = (require_f32(a)?, require_f32(b)?);
    let f: fn(f32, f32) -> f32 = match op {
        ElementWiseOp::Sum => |x: f32, y: f32| x + y,
        ElementWiseOp::Sub => |x: f32, y: f32| x - y,
        ElementWiseOp::Prod => |x: f32, y: f32| x * y,
    };

    let result: Vec<f32> = (0..out.numel())
        .map(|i| {
            let x = av[broadcast_offset(i, &out.0, &a.shape.0)];
            let y = bv[broadcast_offset(i, &out.0, &b.shape.0)];
            f(x, y)
        })
        .collect();
    Tensor::from_f32(&out.0, &result).map_err(exec_err)
}
