use engineport_core::Node;

use super::{arg, bind_output, layer_name};
use crate::{Arg, ConversionCtx, ConverterError, ConverterRegistry, RegistrationConflict};

pub(super) fn register(registry: &mut ConverterRegistry) -> Result<(), RegistrationConflict> {
    registry.register("trt::const(Tensor val) -> (Tensor)", freeze)
}

/// Materializes a compile-time tensor as a constant layer.
fn freeze(ctx: &mut ConversionCtx, node: &Node, args: &[Arg<'_>]) -> Result<(), ConverterError> {
    let weights = arg(args, 0)?.unwrap_tensor()?;
    let out = ctx
        .network_mut()
        .add_constant(&layer_name(node, ""), weights.clone());
    bind_output(ctx, node, out)
}
