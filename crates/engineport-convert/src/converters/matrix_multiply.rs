use engineport_core::{Dims, MatrixOp, Node, TensorId};
use smallvec::SmallVec;
use tracing::debug;

use super::{arg, bind_output, expand_rank, layer_name, require_static, reshape};
use crate::{Arg, ConversionCtx, ConverterError, ConverterRegistry, RegistrationConflict};

pub(super) fn register(registry: &mut ConverterRegistry) -> Result<(), RegistrationConflict> {
    registry
        .pattern("aten::matmul(Tensor self, Tensor other) -> (Tensor)", matmul)?
        .pattern("aten::mm(Tensor self, Tensor mat2) -> (Tensor)", mm)?
        .pattern("aten::bmm(Tensor self, Tensor mat2) -> (Tensor)", bmm)?;
    Ok(())
}

fn operands(
    ctx: &mut ConversionCtx,
    args: &[Arg<'_>],
) -> Result<(TensorId, TensorId), ConverterError> {
    let lhs = arg(args, 0)?.tensor_or_freeze(ctx)?;
    let rhs = arg(args, 1)?.tensor_or_freeze(ctx)?;
    for tensor in [lhs, rhs] {
        let dtype = ctx.network().tensor(tensor)?.dtype;
        if !dtype.is_floating_point() {
            return Err(ConverterError::invalid(format!(
                "matrix multiply needs floating point operands, got {dtype:?}"
            )));
        }
    }
    let (lhs_dims, rhs_dims) = (ctx.dims(lhs)?, ctx.dims(rhs)?);
    debug!(self_dims = %lhs_dims, other_dims = %rhs_dims, "matrix multiply operands");
    Ok((lhs, rhs))
}

fn multiply(
    ctx: &mut ConversionCtx,
    node: &Node,
    lhs: TensorId,
    rhs: TensorId,
    part: &str,
) -> Result<TensorId, ConverterError> {
    Ok(ctx.network_mut().add_matrix_multiply(
        &layer_name(node, part),
        lhs,
        MatrixOp::None,
        rhs,
        MatrixOp::None,
    )?)
}

fn matmul(ctx: &mut ConversionCtx, node: &Node, args: &[Arg<'_>]) -> Result<(), ConverterError> {
    let (mut lhs, mut rhs) = operands(ctx, args)?;
    let (lhs_dims, rhs_dims) = (ctx.dims(lhs)?, ctx.dims(rhs)?);
    if lhs_dims.rank() == 0 || rhs_dims.rank() == 0 {
        return Err(ConverterError::invalid("matmul operands must have at least one dimension"));
    }

    // Vectors become single-row / single-column matrices; the unit dim is
    // dropped from the product afterwards.
    let lift_lhs = lhs_dims.rank() == 1;
    let lift_rhs = rhs_dims.rank() == 1;
    if lift_lhs {
        require_static(ctx, &lhs_dims, "lifting a vector operand")?;
        lhs = reshape(ctx, node, lhs, &[1, -1], "lift self")?;
    }
    if lift_rhs {
        require_static(ctx, &rhs_dims, "lifting a vector operand")?;
        rhs = reshape(ctx, node, rhs, &[-1, 1], "lift other")?;
    }

    let (lhs_dims, rhs_dims) = (ctx.dims(lhs)?, ctx.dims(rhs)?);
    let out = if lhs_dims.rank() > 2 && rhs_dims.rank() == 2 {
        fold_batch(ctx, node, lhs, &lhs_dims, rhs)?
    } else {
        let rank = lhs_dims.rank().max(rhs_dims.rank());
        let lhs = expand_rank(ctx, node, lhs, rank, "expand self")?;
        let rhs = expand_rank(ctx, node, rhs, rank, "expand other")?;
        multiply(ctx, node, lhs, rhs, "")?
    };

    let out = if lift_lhs || lift_rhs {
        let dims = ctx.dims(out)?;
        require_static(ctx, &dims, "squeezing a lifted vector")?;
        let rank = dims.rank();
        let target: SmallVec<[i64; 6]> = dims
            .as_slice()
            .iter()
            .enumerate()
            .filter(|&(i, _)| !(lift_lhs && i == rank - 2) && !(lift_rhs && i == rank - 1))
            .map(|(_, &d)| d)
            .collect();
        reshape(ctx, node, out, &target, "squeeze")?
    } else {
        out
    };

    bind_output(ctx, node, out)
}

/// `[batch.., M, K] x [K, N]`: collapse the batch into the rows, multiply as
/// plain matrices, then restore the batch dims.
fn fold_batch(
    ctx: &mut ConversionCtx,
    node: &Node,
    lhs: TensorId,
    lhs_dims: &Dims,
    rhs: TensorId,
) -> Result<TensorId, ConverterError> {
    require_static(ctx, lhs_dims, "folding batch dimensions")?;
    let dims = lhs_dims.as_slice();
    let rank = dims.len();
    let rows = dims[..rank - 1]
        .iter()
        .try_fold(1i64, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| ConverterError::invalid(format!("folding the batch of {lhs_dims} overflows")))?;
    let folded = reshape(ctx, node, lhs, &[rows, dims[rank - 1]], "fold self")?;
    let product = multiply(ctx, node, folded, rhs, "")?;

    let mut target: SmallVec<[i64; 6]> = SmallVec::from_slice(&dims[..rank - 1]);
    target.push(-1);
    reshape(ctx, node, product, &target, "unfold")
}

fn expect_rank(ctx: &ConversionCtx, tensor: TensorId, rank: usize, op: &str) -> Result<(), ConverterError> {
    let dims = ctx.dims(tensor)?;
    if dims.rank() != rank {
        return Err(ConverterError::invalid(format!(
            "{op} expects rank {rank} operands, got {dims}"
        )));
    }
    Ok(())
}

fn mm(ctx: &mut ConversionCtx, node: &Node, args: &[Arg<'_>]) -> Result<(), ConverterError> {
    let (lhs, rhs) = operands(ctx, args)?;
    expect_rank(ctx, lhs, 2, "mm")?;
    expect_rank(ctx, rhs, 2, "mm")?;
    let out = multiply(ctx, node, lhs, rhs, "")?;
    bind_output(ctx, node, out)
}

fn bmm(ctx: &mut ConversionCtx, node: &Node, args: &[Arg<'_>]) -> Result<(), ConverterError> {
    let (lhs, rhs) = operands(ctx, args)?;
    expect_rank(ctx, lhs, 3, "bmm")?;
    expect_rank(ctx, rhs, 3, "bmm")?;
    let out = multiply(ctx, node, lhs, rhs, "")?;
    bind_output(ctx, node, out)
}
