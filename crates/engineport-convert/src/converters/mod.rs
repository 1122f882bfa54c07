//! Built-in node converters, grouped by the kind of layer they emit.

mod constant;
mod element_wise;
mod matrix_multiply;
mod shuffle;

use engineport_core::{Dims, Node, ShuffleSpec, TensorId};
use smallvec::SmallVec;

use crate::{Arg, ConversionCtx, ConverterError, ConverterRegistry, RegistrationConflict};

pub fn register_all(registry: &mut ConverterRegistry) -> Result<(), RegistrationConflict> {
    matrix_multiply::register(registry)?;
    shuffle::register(registry)?;
    element_wise::register(registry)?;
    constant::register(registry)?;
    Ok(())
}

fn arg<'g>(args: &[Arg<'g>], index: usize) -> Result<Arg<'g>, ConverterError> {
    args.get(index).copied().ok_or_else(|| {
        ConverterError::invalid(format!(
            "expected at least {} arguments, got {}",
            index + 1,
            args.len()
        ))
    })
}

/// Layer names are derived from the node so a failing layer can be traced
/// back to its source.
fn layer_name(node: &Node, part: &str) -> String {
    if part.is_empty() {
        node.describe()
    } else {
        format!("{} [{part}]", node.describe())
    }
}

fn bind_output(ctx: &mut ConversionCtx, node: &Node, tensor: TensorId) -> Result<(), ConverterError> {
    let value = *node
        .outputs
        .first()
        .ok_or_else(|| ConverterError::invalid("node has no outputs"))?;
    ctx.associate(value, tensor)?;
    Ok(())
}

/// Wraps a negative axis into `0..rank`.
fn normalize_dim(dim: i64, rank: usize) -> Result<usize, ConverterError> {
    let rank_i = rank as i64;
    let wrapped = if dim < 0 { dim + rank_i } else { dim };
    if (0..rank_i).contains(&wrapped) {
        Ok(wrapped as usize)
    } else {
        Err(ConverterError::invalid(format!(
            "dimension {dim} is out of range for rank {rank}"
        )))
    }
}

/// Fails unless every dim of `dims` is known. The error kind depends on
/// whether the compilation allows dynamic shapes.
fn require_static(ctx: &ConversionCtx, dims: &Dims, what: &str) -> Result<(), ConverterError> {
    if dims.is_static() {
        return Ok(());
    }
    let message = format!("{what} needs static dimensions, got {dims}");
    if ctx.is_dynamic() {
        Err(ConverterError::dynamic_shape(message))
    } else {
        Err(ConverterError::invalid(message))
    }
}

fn reshape(
    ctx: &mut ConversionCtx,
    node: &Node,
    tensor: TensorId,
    target: &[i64],
    part: &str,
) -> Result<TensorId, ConverterError> {
    let spec = ShuffleSpec::reshape(Dims::from_slice(target));
    Ok(ctx
        .network_mut()
        .add_shuffle(&layer_name(node, part), tensor, spec)?)
}

/// Prepends unit dims until `tensor` has `rank` dims.
fn expand_rank(
    ctx: &mut ConversionCtx,
    node: &Node,
    tensor: TensorId,
    rank: usize,
    part: &str,
) -> Result<TensorId, ConverterError> {
    let dims = ctx.dims(tensor)?;
    if dims.rank() >= rank {
        return Ok(tensor);
    }
    require_static(ctx, &dims, "rank expansion")?;
    let mut target: SmallVec<[i64; 6]> = SmallVec::from_elem(1, rank - dims.rank());
    target.extend_from_slice(dims.as_slice());
    tracing::debug!(from = %dims, to = ?target.as_slice(), "expanding rank");
    reshape(ctx, node, tensor, &target, part)
}
