use engineport_core::{is_permutation, Dims, Node, ShuffleSpec};
use smallvec::SmallVec;
use tracing::debug;

use super::{arg, bind_output, layer_name, normalize_dim, require_static, reshape};
use crate::{Arg, ConversionCtx, ConverterError, ConverterRegistry, RegistrationConflict};

pub(super) fn register(registry: &mut ConverterRegistry) -> Result<(), RegistrationConflict> {
    registry
        .pattern(
            "aten::flatten.using_ints(Tensor self, int start_dim=0, int end_dim=-1) -> (Tensor)",
            flatten,
        )?
        .pattern("aten::reshape(Tensor self, int[] shape) -> (Tensor)", reshape_to)?
        .pattern("aten::view(Tensor(a) self, int[] size) -> (Tensor(a))", reshape_to)?
        .pattern("aten::permute(Tensor(a) self, int[] dims) -> (Tensor(a))", permute)?
        .pattern("aten::t(Tensor self) -> (Tensor)", transpose)?;
    Ok(())
}

fn flatten(ctx: &mut ConversionCtx, node: &Node, args: &[Arg<'_>]) -> Result<(), ConverterError> {
    let input = arg(args, 0)?.tensor_or_freeze(ctx)?;
    let dims = ctx.dims(input)?;
    if dims.rank() == 0 {
        let out = reshape(ctx, node, input, &[1], "")?;
        return bind_output(ctx, node, out);
    }

    let start = normalize_dim(arg(args, 1)?.unwrap_int()?, dims.rank())?;
    let end = normalize_dim(arg(args, 2)?.unwrap_int()?, dims.rank())?;
    if start > end {
        return Err(ConverterError::invalid(format!(
            "flatten start_dim {start} is after end_dim {end}"
        )));
    }

    let target = if ctx.is_dynamic() || !dims.is_static() {
        flatten_dynamic(&dims, start, end)?
    } else {
        let d = dims.as_slice();
        let mut target: SmallVec<[i64; 6]> = SmallVec::from_slice(&d[..start]);
        target.push(collapsed_size(&dims, start, end)?);
        target.extend_from_slice(&d[end + 1..]);
        target
    };
    debug!(input = %dims, target = ?target.as_slice(), "flatten");

    let out = reshape(ctx, node, input, &target, "")?;
    bind_output(ctx, node, out)
}

/// Leading dims are copied (`0`), the collapsed run becomes the inferred dim.
/// Trailing dims shift position, so they must be known, except that a single
/// unknown trailing dim can be inferred when the collapsed run is known.
fn flatten_dynamic(
    dims: &Dims,
    start: usize,
    end: usize,
) -> Result<SmallVec<[i64; 6]>, ConverterError> {
    let d = dims.as_slice();
    let trailing = &d[end + 1..];
    let unknown_trailing = trailing.iter().filter(|&&x| x < 0).count();

    let mut target: SmallVec<[i64; 6]> = SmallVec::from_elem(0, start);
    if unknown_trailing == 0 {
        target.push(-1);
        target.extend_from_slice(trailing);
    } else if unknown_trailing == 1 && d[start..=end].iter().all(|&x| x >= 0) {
        target.push(collapsed_size(dims, start, end)?);
        target.extend_from_slice(trailing);
    } else {
        return Err(ConverterError::dynamic_shape(format!(
            "cannot flatten dims {start}..={end} of {dims} with unknown trailing dims"
        )));
    }
    Ok(target)
}

fn collapsed_size(dims: &Dims, start: usize, end: usize) -> Result<i64, ConverterError> {
    dims.as_slice()[start..=end]
        .iter()
        .try_fold(1i64, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| {
            ConverterError::invalid(format!("flattening dims {start}..={end} of {dims} overflows"))
        })
}

/// Concrete reshape target; `-1` is resolved against the element count.
fn resolve_shape(dims: &Dims, requested: &[i64]) -> Result<SmallVec<[i64; 6]>, ConverterError> {
    let reject = |reason: &str| {
        ConverterError::invalid(format!("cannot reshape {dims} to {requested:?}: {reason}"))
    };
    if !dims.is_static() {
        return Err(reject("input dims are not known"));
    }
    let total = dims.volume().ok_or_else(|| reject("element count overflows"))?;

    let mut infer_at = None;
    let mut known: i64 = 1;
    for (i, &d) in requested.iter().enumerate() {
        match d {
            -1 if infer_at.is_some() => return Err(reject("only one dimension can be inferred")),
            -1 => infer_at = Some(i),
            d if d > 0 => {
                known = known
                    .checked_mul(d)
                    .ok_or_else(|| reject("element count overflows"))?;
            }
            0 => return Err(reject("zero-sized dimensions are not supported")),
            _ => return Err(reject("negative size")),
        }
    }

    let mut target: SmallVec<[i64; 6]> = SmallVec::from_slice(requested);
    match infer_at {
        Some(at) => {
            if total == 0 || total % known != 0 {
                return Err(reject("element count is not divisible"));
            }
            target[at] = total / known;
        }
        None if known != total => return Err(reject("element counts differ")),
        None => {}
    }
    Ok(target)
}

/// `aten::reshape` and `aten::view`.
fn reshape_to(ctx: &mut ConversionCtx, node: &Node, args: &[Arg<'_>]) -> Result<(), ConverterError> {
    let input = arg(args, 0)?.tensor_or_freeze(ctx)?;
    let requested = arg(args, 1)?.unwrap_int_list()?;
    if ctx.is_dynamic() {
        return Err(ConverterError::dynamic_shape(
            "reshape is not supported when input shapes are dynamic",
        ));
    }
    let dims = ctx.dims(input)?;
    require_static(ctx, &dims, "reshape")?;
    let target = resolve_shape(&dims, requested)?;
    debug!(input = %dims, target = ?target.as_slice(), "reshape");

    let out = reshape(ctx, node, input, &target, "")?;
    bind_output(ctx, node, out)
}

fn permute(ctx: &mut ConversionCtx, node: &Node, args: &[Arg<'_>]) -> Result<(), ConverterError> {
    let input = arg(args, 0)?.tensor_or_freeze(ctx)?;
    let rank = ctx.dims(input)?.rank();
    let order = arg(args, 1)?
        .unwrap_int_list()?
        .iter()
        .map(|&d| normalize_dim(d, rank))
        .collect::<Result<Vec<_>, _>>()?;
    if !is_permutation(&order, rank) {
        return Err(ConverterError::invalid(format!(
            "{order:?} is not a permutation of {rank} dims"
        )));
    }
    debug!(order = ?order, "shuffle to");

    let out = ctx
        .network_mut()
        .add_shuffle(&layer_name(node, ""), input, ShuffleSpec::transpose(order))?;
    bind_output(ctx, node, out)
}

/// `aten::t`: reverses the dimension order. Constant operands are transposed
/// at compile time.
fn transpose(ctx: &mut ConversionCtx, node: &Node, args: &[Arg<'_>]) -> Result<(), ConverterError> {
    let input = arg(args, 0)?;
    let out = match input {
        Arg::Constant(_) => {
            let weights = input.unwrap_tensor()?;
            let order: Vec<usize> = (0..weights.shape.rank()).rev().collect();
            let transposed = weights.permute(&order)?;
            debug!(input = %weights.shape, output = %transposed.shape, "transposed constant");
            ctx.network_mut().add_constant(&layer_name(node, ""), transposed)
        }
        Arg::Tensor(tensor) => {
            let rank = ctx.dims(tensor)?.rank();
            let order: Vec<usize> = (0..rank).rev().collect();
            ctx.network_mut()
                .add_shuffle(&layer_name(node, ""), tensor, ShuffleSpec::transpose(order))?
        }
    };
    bind_output(ctx, node, out)
}
