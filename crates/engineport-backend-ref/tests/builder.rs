use anyhow::Result;
use engineport_backend_ref::{EnginePlan, RefBuilder};
use engineport_core::{
    BuildConfig, BuildError, DType, DeviceDescriptor, Dims, EngineBuilder, Network,
    ShuffleSpec, Tensor,
};

fn device() -> DeviceDescriptor {
    DeviceDescriptor::new(0, 8, 6)
}

fn transpose_network(dtype: DType) -> Result<Network> {
    let mut net = Network::new();
    let x = net.add_input("input_0", dtype, Dims::from_slice(&[2, 3]))?;
    let y = net.add_shuffle("t", x, ShuffleSpec::transpose(vec![1, 0]))?;
    net.mark_output(y, "output_0")?;
    Ok(net)
}

#[test]
fn plan_records_device_and_bindings() -> Result<()> {
    let config = BuildConfig {
        engine_name: "transpose".to_string(),
        ..BuildConfig::default()
    };
    let artifact = RefBuilder::new().build(&transpose_network(DType::F32)?, &config, &device())?;
    assert_eq!(artifact.device, device());

    let plan = EnginePlan::from_json(&artifact.engine)?;
    assert_eq!(plan.engine_name, "transpose");
    assert_eq!(plan.built_for, device().capability());
    let names: Vec<&str> = plan.bindings.iter().map(|b| b.spec.name.0.as_str()).collect();
    assert_eq!(names, ["input_0", "output_0"]);
    assert_eq!(plan.bindings[1].spec.dims, Dims::from_slice(&[3, 2]));
    Ok(())
}

#[test]
fn network_without_outputs_is_rejected() {
    let mut net = Network::new();
    let _ = net.add_input("input_0", DType::F32, Dims::from_slice(&[2]));
    let err = RefBuilder::new()
        .build(&net, &BuildConfig::default(), &device())
        .unwrap_err();
    assert_eq!(err, BuildError::EmptyNetwork);
}

#[test]
fn integer_compute_is_rejected() -> Result<()> {
    let err = RefBuilder::new()
        .build(&transpose_network(DType::I32)?, &BuildConfig::default(), &device())
        .unwrap_err();
    assert_eq!(
        err,
        BuildError::UnsupportedDType {
            layer: "t".to_string(),
            dtype: DType::I32
        }
    );
    Ok(())
}

#[test]
fn half_precision_needs_opt_in() -> Result<()> {
    let net = transpose_network(DType::F16)?;
    assert!(RefBuilder::new().build(&net, &BuildConfig::default(), &device()).is_err());
    let config = BuildConfig {
        allow_fp16: true,
        ..BuildConfig::default()
    };
    RefBuilder::new().build(&net, &config, &device())?;
    Ok(())
}

#[test]
fn constants_must_fit_workspace() -> Result<()> {
    let mut net = Network::new();
    let w = net.add_constant("w", Tensor::from_f32(&[4], &[0.0; 4])?);
    net.mark_output(w, "output_0")?;
    let config = BuildConfig {
        max_workspace_bytes: 8,
        ..BuildConfig::default()
    };
    let err = RefBuilder::new().build(&net, &config, &device()).unwrap_err();
    assert_eq!(err, BuildError::ResourceExhausted { required: 16, limit: 8 });
    Ok(())
}

#[test]
fn binding_names_need_an_index() -> Result<()> {
    let mut net = Network::new();
    let x = net.add_input("features", DType::F32, Dims::from_slice(&[2]))?;
    let y = net.add_shuffle("copy", x, ShuffleSpec::default())?;
    net.mark_output(y, "output_0")?;
    let err = RefBuilder::new()
        .build(&net, &BuildConfig::default(), &device())
        .unwrap_err();
    assert!(matches!(err, BuildError::Binding(_)), "{err}");
    Ok(())
}
