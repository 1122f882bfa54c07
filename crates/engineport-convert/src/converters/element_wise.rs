use engineport_core::{DType, ElementWiseOp, Node, Tensor, TensorId};
use tracing::debug;

use super::{arg, bind_output, expand_rank, layer_name};
use crate::{Arg, ConversionCtx, ConverterError, ConverterRegistry, RegistrationConflict};

pub(super) fn register(registry: &mut ConverterRegistry) -> Result<(), RegistrationConflict> {
    registry
        .pattern(
            "aten::add.Tensor(Tensor self, Tensor other, *, Scalar alpha=1) -> (Tensor)",
            |ctx, node, args| scaled(ctx, node, args, ElementWiseOp::Sum),
        )?
        .pattern(
            "aten::add_.Tensor(Tensor(a!) self, Tensor other, *, Scalar alpha=1) -> (Tensor(a!))",
            |ctx, node, args| scaled(ctx, node, args, ElementWiseOp::Sum),
        )?
        .pattern(
            "aten::sub.Tensor(Tensor self, Tensor other, *, Scalar alpha=1) -> (Tensor)",
            |ctx, node, args| scaled(ctx, node, args, ElementWiseOp::Sub),
        )?
        .pattern(
            "aten::mul.Tensor(Tensor self, Tensor other) -> (Tensor)",
            |ctx, node, args| {
                let (lhs, rhs) = broadcast_operands(ctx, node, args)?;
                let out = add_elementwise(ctx, node, lhs, rhs, ElementWiseOp::Prod, "")?;
                bind_output(ctx, node, out)
            },
        )?;
    Ok(())
}

/// Both operands as network tensors of equal rank.
fn broadcast_operands(
    ctx: &mut ConversionCtx,
    node: &Node,
    args: &[Arg<'_>],
) -> Result<(TensorId, TensorId), ConverterError> {
    let lhs = arg(args, 0)?.tensor_or_freeze(ctx)?;
    let rhs = arg(args, 1)?.tensor_or_freeze(ctx)?;
    let rank = ctx.dims(lhs)?.rank().max(ctx.dims(rhs)?.rank());
    let lhs = expand_rank(ctx, node, lhs, rank, "broadcast self")?;
    let rhs = expand_rank(ctx, node, rhs, rank, "broadcast other")?;
    Ok((lhs, rhs))
}

fn add_elementwise(
    ctx: &mut ConversionCtx,
    node: &Node,
    lhs: TensorId,
    rhs: TensorId,
    op: ElementWiseOp,
    part: &str,
) -> Result<TensorId, ConverterError> {
    Ok(ctx
        .network_mut()
        .add_elementwise(&layer_name(node, part), lhs, rhs, op)?)
}

/// `self op alpha * other`.
fn scaled(
    ctx: &mut ConversionCtx,
    node: &Node,
    args: &[Arg<'_>],
    op: ElementWiseOp,
) -> Result<(), ConverterError> {
    let (lhs, mut rhs) = broadcast_operands(ctx, node, args)?;
    let alpha = match args.get(2) {
        Some(a) if !a.is_none() => a.unwrap_scalar()?,
        _ => 1.0,
    };

    if alpha != 1.0 {
        let other = ctx.network().tensor(rhs)?;
        if other.dtype != DType::F32 {
            return Err(ConverterError::invalid(format!(
                "alpha scaling is only supported for F32 operands, got {:?}",
                other.dtype
            )));
        }
        let unit = vec![1usize; other.dims.rank()];
        debug!(alpha, "scaling other operand");
        let factor = ctx.network_mut().add_constant(
            &layer_name(node, "alpha"),
            Tensor::from_f32(&unit, &[alpha as f32])?,
        );
        rhs = add_elementwise(ctx, node, rhs, factor, ElementWiseOp::Prod, "scale other")?;
    }

    let out = add_elementwise(ctx, node, lhs, rhs, op, "")?;
    bind_output(ctx, node, out)
}
