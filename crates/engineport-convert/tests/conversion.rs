use anyhow::Result;
use engineport_convert::{
    check_operator_support, convert_graph, ConversionError, ConversionSettings, ConverterRegistry,
};
use engineport_core::{
    Constant, DType, Dims, ElementWiseOp, GraphError, LayerKind, Network, SourceGraph, Tensor,
};

const MATMUL: &str = "aten::matmul(Tensor self, Tensor other) -> (Tensor)";
const MM: &str = "aten::mm(Tensor self, Tensor mat2) -> (Tensor)";
const ADD: &str = "aten::add.Tensor(Tensor self, Tensor other, *, Scalar alpha=1) -> (Tensor)";
const MUL: &str = "aten::mul.Tensor(Tensor self, Tensor other) -> (Tensor)";
const CONST: &str = "trt::const(Tensor val) -> (Tensor)";

fn dims(d: &[i64]) -> Dims {
    Dims::from_slice(d)
}

fn output_dims(network: &Network, index: usize) -> Result<Dims> {
    Ok(network.dims(network.outputs()[index])?.clone())
}

fn kinds(network: &Network) -> Vec<&'static str> {
    network.layers().iter().map(|l| l.kind.kind_name()).collect()
}

fn binary(sig: &str, a: &[i64], b: &[i64]) -> SourceGraph {
    let mut graph = SourceGraph::new();
    let x = graph.add_input("x", DType::F32, dims(a));
    let y = graph.add_input("y", DType::F32, dims(b));
    let out = graph.add_op(sig, &[x, y], 1);
    graph.mark_output(out[0]);
    graph
}

fn static_settings() -> ConversionSettings {
    ConversionSettings::default()
}

fn dynamic_settings() -> ConversionSettings {
    ConversionSettings {
        dynamic_shape: true,
        ..ConversionSettings::default()
    }
}

#[test]
fn unsupported_operation_fails_closed() -> Result<()> {
    let registry = ConverterRegistry::with_default_converters()?;
    let mut graph = SourceGraph::new();
    let x = graph.add_input("x", DType::F32, dims(&[2, 2]));
    let a = graph.add_op("aten::relu(Tensor self) -> (Tensor)", &[x], 1);
    let b = graph.add_op("aten::relu(Tensor self) -> (Tensor)", &a, 1);
    let c = graph.add_op("aten::gelu(Tensor self) -> (Tensor)", &b, 1);
    graph.mark_output(c[0]);

    assert_eq!(
        check_operator_support(&registry, &graph),
        vec![
            "aten::gelu(Tensor self) -> (Tensor)".to_string(),
            "aten::relu(Tensor self) -> (Tensor)".to_string(),
        ]
    );

    let err = convert_graph(&registry, &graph, &static_settings()).unwrap_err();
    assert_eq!(
        err,
        ConversionError::UnsupportedOperation {
            signature: "aten::relu(Tensor self) -> (Tensor)".to_string()
        }
    );
    Ok(())
}

#[test]
fn inputs_and_outputs_follow_binding_names() -> Result<()> {
    let registry = ConverterRegistry::with_default_converters()?;
    let graph = binary(MM, &[2, 3], &[3, 4]);
    let converted = convert_graph(&registry, &graph, &static_settings())?;
    let network = &converted.network;

    let names: Vec<&str> = network
        .inputs()
        .iter()
        .map(|&id| network.tensors()[id.0].name.as_str())
        .collect();
    assert_eq!(names, ["input_0", "input_1"]);
    assert_eq!(network.tensor(network.outputs()[0])?.name, "output_0");
    assert_eq!(output_dims(network, 0)?, dims(&[2, 4]));
    // two inputs plus the product
    assert_eq!(converted.bindings.len(), 3);
    Ok(())
}

#[test]
fn matmul_folds_batch_into_rows() -> Result<()> {
    let registry = ConverterRegistry::with_default_converters()?;
    let graph = binary(MATMUL, &[2, 3, 4], &[4, 5]);
    let converted = convert_graph(&registry, &graph, &static_settings())?;
    let network = &converted.network;

    assert_eq!(kinds(network), ["shuffle", "matrix_multiply", "shuffle"]);
    let folded = network.layers()[0].output;
    assert_eq!(network.dims(folded)?, &dims(&[6, 4]));
    assert_eq!(output_dims(network, 0)?, dims(&[2, 3, 5]));
    Ok(())
}

#[test]
fn matmul_expands_lower_rank_operand() -> Result<()> {
    let registry = ConverterRegistry::with_default_converters()?;
    let graph = binary(MATMUL, &[3, 4], &[2, 4, 5]);
    let converted = convert_graph(&registry, &graph, &static_settings())?;
    assert_eq!(kinds(&converted.network), ["shuffle", "matrix_multiply"]);
    assert_eq!(output_dims(&converted.network, 0)?, dims(&[2, 3, 5]));
    Ok(())
}

#[test]
fn matmul_lifts_vectors() -> Result<()> {
    let registry = ConverterRegistry::with_default_converters()?;

    let graph = binary(MATMUL, &[4], &[4, 5]);
    let converted = convert_graph(&registry, &graph, &static_settings())?;
    assert_eq!(output_dims(&converted.network, 0)?, dims(&[5]));

    let graph = binary(MATMUL, &[2, 3, 4], &[4]);
    let converted = convert_graph(&registry, &graph, &static_settings())?;
    assert_eq!(output_dims(&converted.network, 0)?, dims(&[2, 3]));

    let graph = binary(MATMUL, &[4], &[4]);
    let converted = convert_graph(&registry, &graph, &static_settings())?;
    assert_eq!(output_dims(&converted.network, 0)?, dims(&[]));
    Ok(())
}

#[test]
fn matmul_rank_mismatch_with_unknown_dims_is_dynamic_error() -> Result<()> {
    let registry = ConverterRegistry::with_default_converters()?;
    let graph = binary(MATMUL, &[-1, 3, 4], &[4, 5]);
    let err = convert_graph(&registry, &graph, &dynamic_settings()).unwrap_err();
    assert!(
        matches!(&err, ConversionError::UnsupportedDynamicShape { signature, .. } if signature == MATMUL),
        "{err}"
    );

    // Same-rank operands need no adaptation.
    let graph = binary(MATMUL, &[-1, 3, 4], &[-1, 4, 5]);
    let converted = convert_graph(&registry, &graph, &dynamic_settings())?;
    assert_eq!(output_dims(&converted.network, 0)?, dims(&[-1, 3, 5]));
    Ok(())
}

#[test]
fn matmul_rejects_integer_operands() -> Result<()> {
    let registry = ConverterRegistry::with_default_converters()?;
    let mut graph = SourceGraph::new();
    let x = graph.add_input("x", DType::I32, dims(&[2, 2]));
    let y = graph.add_input("y", DType::I32, dims(&[2, 2]));
    let out = graph.add_op(MATMUL, &[x, y], 1);
    graph.mark_output(out[0]);

    let err = convert_graph(&registry, &graph, &static_settings()).unwrap_err();
    match err {
        ConversionError::Converter { signature, node, .. } => {
            assert_eq!(signature, MATMUL);
            assert!(node.contains("aten::matmul"), "{node}");
        }
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}

#[test]
fn mm_requires_matrices() -> Result<()> {
    let registry = ConverterRegistry::with_default_converters()?;
    let graph = binary(MM, &[2, 3, 4], &[4, 5]);
    assert!(matches!(
        convert_graph(&registry, &graph, &static_settings()),
        Err(ConversionError::Converter { .. })
    ));
    Ok(())
}

#[test]
fn constant_operands_are_frozen() -> Result<()> {
    let registry = ConverterRegistry::with_default_converters()?;
    let mut graph = SourceGraph::new();
    let x = graph.add_input("x", DType::F32, dims(&[2, 3]));
    let w = graph.add_constant(Constant::Tensor(Tensor::from_f32(&[3, 1], &[1.0, 2.0, 3.0])?));
    let out = graph.add_op(MATMUL, &[x, w], 1);
    graph.mark_output(out[0]);

    let converted = convert_graph(&registry, &graph, &static_settings())?;
    assert_eq!(kinds(&converted.network), ["constant", "matrix_multiply"]);
    assert_eq!(output_dims(&converted.network, 0)?, dims(&[2, 1]));
    Ok(())
}

#[test]
fn elementwise_broadcasts_and_scales() -> Result<()> {
    let registry = ConverterRegistry::with_default_converters()?;
    let mut graph = SourceGraph::new();
    let x = graph.add_input("x", DType::F32, dims(&[2, 3]));
    let y = graph.add_input("y", DType::F32, dims(&[3]));
    let alpha = graph.add_constant(Constant::Int(2));
    let out = graph.add_op(ADD, &[x, y, alpha], 1);
    graph.mark_output(out[0]);

    let converted = convert_graph(&registry, &graph, &static_settings())?;
    let network = &converted.network;
    assert_eq!(kinds(network), ["shuffle", "constant", "elementwise", "elementwise"]);
    let ops: Vec<ElementWiseOp> = network
        .layers()
        .iter()
        .filter_map(|l| match l.kind {
            LayerKind::ElementWise(op) => Some(op),
            _ => None,
        })
        .collect();
    assert_eq!(ops, [ElementWiseOp::Prod, ElementWiseOp::Sum]);
    assert_eq!(output_dims(network, 0)?, dims(&[2, 3]));
    Ok(())
}

#[test]
fn elementwise_rejects_incompatible_dims() -> Result<()> {
    let registry = ConverterRegistry::with_default_converters()?;
    let graph = binary(MUL, &[2, 3], &[4]);
    assert!(convert_graph(&registry, &graph, &static_settings()).is_err());
    Ok(())
}

#[test]
fn const_node_and_constant_output() -> Result<()> {
    let registry = ConverterRegistry::with_default_converters()?;
    let mut graph = SourceGraph::new();
    let w = graph.add_constant(Constant::Tensor(Tensor::from_f32(&[2], &[1.0, 2.0])?));
    let frozen = graph.add_op(CONST, &[w], 1);
    graph.mark_output(frozen[0]);
    graph.mark_output(w);

    let converted = convert_graph(&registry, &graph, &static_settings())?;
    assert_eq!(kinds(&converted.network), ["constant", "constant"]);
    assert_eq!(converted.network.outputs().len(), 2);
    Ok(())
}

#[test]
fn repeated_outputs_get_identity_layers() -> Result<()> {
    let registry = ConverterRegistry::with_default_converters()?;
    let mut graph = SourceGraph::new();
    let x = graph.add_input("x", DType::F32, dims(&[2, 3]));
    let out = graph.add_op("aten::t(Tensor self) -> (Tensor)", &[x], 1);
    graph.mark_output(out[0]);
    graph.mark_output(out[0]);
    graph.mark_output(x);

    let converted = convert_graph(&registry, &graph, &static_settings())?;
    let network = &converted.network;
    assert_eq!(network.outputs().len(), 3);
    assert_eq!(kinds(network), ["shuffle", "shuffle", "shuffle"]);
    assert_eq!(output_dims(network, 1)?, dims(&[3, 2]));
    assert_eq!(output_dims(network, 2)?, dims(&[2, 3]));
    Ok(())
}

#[test]
fn graph_errors_surface_before_conversion() -> Result<()> {
    let registry = ConverterRegistry::with_default_converters()?;
    let mut graph = SourceGraph::new();
    let a = graph.declare_value();
    let b = graph.declare_value();
    graph.add_node("aten::t(Tensor self) -> (Tensor)", &[b], &[a]);
    graph.add_node("aten::t(Tensor self) -> (Tensor)", &[a], &[b]);

    assert_eq!(
        convert_graph(&registry, &graph, &static_settings()).unwrap_err(),
        ConversionError::Graph(GraphError::Cycle(2))
    );
    Ok(())
}

#[test]
fn converters_must_bind_outputs_once() -> Result<()> {
    let mut registry = ConverterRegistry::new();
    registry.register("test::forget(Tensor self) -> (Tensor)", |_, _, _| Ok(()))?;
    registry.register("test::twice(Tensor self) -> (Tensor)", |ctx, node, args| {
        let input = args[0].tensor()?;
        ctx.associate(node.outputs[0], input)?;
        ctx.associate(node.outputs[0], input)?;
        Ok(())
    })?;

    for sig in [
        "test::forget(Tensor self) -> (Tensor)",
        "test::twice(Tensor self) -> (Tensor)",
    ] {
        let mut graph = SourceGraph::new();
        let x = graph.add_input("x", DType::F32, dims(&[2]));
        let out = graph.add_op(sig, &[x], 1);
        graph.mark_output(out[0]);
        let err = convert_graph(&registry, &graph, &static_settings()).unwrap_err();
        assert!(matches!(err, ConversionError::Converter { .. }), "{sig}: {err}");
    }
    Ok(())
}
