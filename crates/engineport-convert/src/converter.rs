use std::collections::BTreeSet;

use engineport_core::{
    BindingName, BuildConfig, BuildError, EngineArtifact, EngineBuilder, Network, Node,
    ShuffleSpec, SourceGraph, ValueKind,
};
use tracing::{debug, debug_span, info};

use crate::{
    Arg, BindingTable, CompileError, ConversionCtx, ConversionError, ConversionSettings,
    ConverterError, ConverterRegistry,
};

#[derive(Debug)]
pub struct ConvertedGraph {
    pub network: Network,
    pub bindings: BindingTable,
}

/// Signatures in `graph` that `registry` has no converter for, sorted.
pub fn check_operator_support(registry: &ConverterRegistry, graph: &SourceGraph) -> Vec<String> {
    graph
        .nodes()
        .iter()
        .filter(|node| !registry.contains(&node.signature))
        .map(|node| node.signature.as_str().to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn wrap(node: &Node, err: ConverterError) -> ConversionError {
    let signature = node.signature.as_str().to_string();
    let node = node.describe();
    match err {
        ConverterError::DynamicShape(message) => ConversionError::UnsupportedDynamicShape {
            signature,
            node,
            message,
        },
        other => ConversionError::Converter {
            signature,
            node,
            message: other.to_string(),
        },
    }
}

/// Lowers `graph` onto a fresh network. Any failure aborts the whole
/// conversion.
pub fn convert_graph(
    registry: &ConverterRegistry,
    graph: &SourceGraph,
    settings: &ConversionSettings,
) -> Result<ConvertedGraph, ConversionError> {
    let order = graph.topological_order()?;
    let mut ctx = ConversionCtx::new(settings);

    for (i, &input) in graph.inputs().iter().enumerate() {
        let value = graph.value(input)?;
        if let ValueKind::Input { dtype, dims } = &value.kind {
            let name = BindingName::input(i);
            let tensor = ctx.network_mut().add_input(&name.0, *dtype, dims.clone())?;
            debug!(value = %input, name = %name.0, dims = %dims, "bound graph input");
            ctx.associate(input, tensor)
                .map_err(|e| ConversionError::Converter {
                    signature: String::new(),
                    node: format!("graph input {}", value.debug_name),
                    message: e.to_string(),
                })?;
        }
    }

    for idx in order {
        let node = &graph.nodes()[idx];
        let description = node.describe();
        let _span = debug_span!("convert", node = %description).entered();

        let converter = registry
            .lookup(&node.signature)
            .ok_or_else(|| ConversionError::UnsupportedOperation {
                signature: node.signature.as_str().to_string(),
            })?;

        let mut args = Vec::with_capacity(node.inputs.len());
        for &input in &node.inputs {
            let value = graph.value(input)?;
            let arg = match value.constant() {
                Some(constant) => Arg::Constant(constant),
                None => Arg::Tensor(ctx.bindings().get(input).ok_or_else(|| {
                    wrap(
                        node,
                        ConverterError::invalid(format!("input {input} has no network tensor")),
                    )
                })?),
            };
            args.push(arg);
        }

        converter
            .convert(&mut ctx, node, &args)
            .map_err(|e| wrap(node, e))?;

        for &out in &node.outputs {
            let tensor = ctx.bindings().get(out).ok_or_else(|| {
                wrap(node, ConverterError::invalid(format!("output {out} was not bound")))
            })?;
            let dims = ctx.network().dims(tensor)?;
            debug!(value = %out, dims = %dims, "bound output");
        }
    }

    let outputs_error = |message: String| ConversionError::Converter {
        signature: String::new(),
        node: "graph outputs".to_string(),
        message,
    };
    for (i, &output) in graph.outputs().iter().enumerate() {
        let name = BindingName::output(i);
        let tensor = match (ctx.bindings().get(output), graph.value(output)?.constant()) {
            (Some(tensor), _) => tensor,
            (None, Some(constant)) => Arg::Constant(constant)
                .tensor_or_freeze(&mut ctx)
                .and_then(|t| ctx.associate(output, t))
                .map_err(|e| outputs_error(e.to_string()))?,
            (None, None) => {
                return Err(outputs_error(format!("output {output} has no network tensor")));
            }
        };

        // A tensor carries one name, so re-exports go through an identity shuffle.
        let tensor = if ctx.network().is_marked(tensor) {
            let label = format!("[Identity {}]", name.0);
            ctx.network_mut()
                .add_shuffle(&label, tensor, ShuffleSpec::default())?
        } else {
            tensor
        };
        ctx.network_mut().mark_output(tensor, &name.0)?;
    }

    let (network, bindings) = ctx.into_parts();
    info!(
        layers = network.layers().len(),
        inputs = network.inputs().len(),
        outputs = network.outputs().len(),
        "converted graph"
    );
    Ok(ConvertedGraph { network, bindings })
}

/// Converts `graph` and hands the network to `builder`. Networks the builder
/// declares it cannot handle are rejected before it is called.
pub fn convert_graph_to_engine(
    registry: &ConverterRegistry,
    graph: &SourceGraph,
    settings: &ConversionSettings,
    builder: &dyn EngineBuilder,
    config: &BuildConfig,
) -> Result<EngineArtifact, CompileError> {
    let capabilities = builder.capabilities();
    if settings.dynamic_shape && !capabilities.supports_dynamic_shapes {
        return Err(BuildError::Unsupported(format!(
            "backend `{}` does not support dynamic input shapes",
            builder.name()
        ))
        .into());
    }

    let converted = convert_graph(registry, graph, settings)?;
    if let Some(t) = converted
        .network
        .tensors()
        .iter()
        .find(|t| t.dims.rank() > capabilities.max_rank)
    {
        return Err(BuildError::Unsupported(format!(
            "tensor `{}` has rank {}, backend `{}` supports up to {}",
            t.name,
            t.dims.rank(),
            builder.name(),
            capabilities.max_rank
        ))
        .into());
    }
    let artifact = builder.build(&converted.network, config, &settings.device)?;
    info!(
        backend = builder.name(),
        engine_bytes = artifact.engine.len(),
        device = %artifact.device,
        "built engine"
    );
    Ok(artifact)
}
