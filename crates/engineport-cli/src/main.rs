mod cli;
mod graph_file;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use cli::{Cli, Command};
use engineport_backend_ref::{RefBuilder, RefRuntime, SimulatedDriver};
use engineport_convert::{convert_graph_to_engine, ConversionSettings, ConverterRegistry};
use engineport_core::{BuildConfig, DeviceDescriptor, DeviceDriver, EnginePayload};
use engineport_runtime::{DeviceContext, DeviceList, EngineWorker, ExecutionEngine};
use graph_file::{GraphFile, TensorJson};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    std::env::set_var("RUST_LOG", &cli.log);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let driver = Arc::new(simulated_driver(&cli.devices)?);

    match cli.command {
        Command::Devices => devices(driver.as_ref()),
        Command::Compile {
            graph,
            output,
            config,
            target,
            dynamic_shape,
        } => compile(
            driver.as_ref(),
            &graph,
            &output,
            config.as_deref(),
            target,
            dynamic_shape,
        ),
        Command::Inspect { engine } => inspect(driver, &engine),
        Command::Run { engine, inputs } => run(driver, &engine, &inputs).await,
    }
}

fn simulated_driver(devices: &[String]) -> Result<SimulatedDriver> {
    let capabilities = devices
        .iter()
        .map(|raw| parse_capability(raw))
        .collect::<Result<Vec<_>>>()?;
    Ok(SimulatedDriver::new(&capabilities))
}

fn parse_capability(raw: &str) -> Result<(i32, i32)> {
    let raw = raw.strip_prefix("sm_").unwrap_or(raw);
    let (major, minor) = raw
        .split_once('.')
        .with_context(|| format!("invalid device capability: {raw} (expected MAJOR.MINOR)"))?;
    let major = major.parse().context("invalid capability major")?;
    let minor = minor.parse().context("invalid capability minor")?;
    Ok((major, minor))
}

fn devices(driver: &dyn DeviceDriver) -> Result<()> {
    let list = DeviceList::enumerate(driver);
    println!("{} device(s), active: {}", list.len(), driver.current_device()?);
    print!("{}", list.dump_list());
    Ok(())
}

fn compile(
    driver: &dyn DeviceDriver,
    graph_path: &Path,
    output: &Path,
    config_path: Option<&Path>,
    target: i32,
    dynamic_shape: bool,
) -> Result<()> {
    let registry =
        ConverterRegistry::with_default_converters().context("failed to build converter registry")?;

    let text = std::fs::read_to_string(graph_path)
        .with_context(|| format!("failed to read {}", graph_path.display()))?;
    let graph = GraphFile::parse(&text)?.into_graph()?;

    let config = match config_path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str::<BuildConfig>(&text).context("invalid build config")?
        }
        None => BuildConfig::default(),
    };
    let settings = ConversionSettings {
        dynamic_shape,
        device: driver.properties(target)?,
    };

    let artifact = convert_graph_to_engine(&registry, &graph, &settings, &RefBuilder::new(), &config)?;
    artifact
        .to_payload()
        .write_to(output)
        .with_context(|| format!("failed to write {}", output.display()))?;
    tracing::info!(
        output = %output.display(),
        device = %artifact.device,
        bytes = artifact.engine.len(),
        "wrote engine"
    );
    Ok(())
}

fn load_payload(path: &Path) -> Result<EnginePayload> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(EnginePayload::from_file_bytes(Bytes::from(bytes))?)
}

fn module_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "engine".to_string())
}

fn inspect(driver: Arc<SimulatedDriver>, path: &Path) -> Result<()> {
    let payload = load_payload(path)?;
    if payload.device_info.is_empty() {
        println!("device: none recorded (legacy form)");
    } else {
        println!("device: {}", DeviceDescriptor::decode(&payload.device_info)?);
    }

    let devices = DeviceContext::new(driver);
    let engine = ExecutionEngine::from_payload(&devices, &RefRuntime::new(), &module_name(path), &payload)?;
    let (inputs, outputs) = engine.num_io();
    println!("engine: {} ({inputs} inputs, {outputs} outputs)", engine.name());
    if let Some(built_for) = engine.engine().built_for() {
        println!("built for: {built_for}");
    }
    for slot in 0..engine.engine().num_bindings() {
        if let Some(spec) = engine.engine().binding(slot) {
            let kind = if spec.is_input { "input" } else { "output" };
            println!(
                "  slot {slot}: {kind} {} {:?} {}",
                spec.name.0, spec.dtype, spec.dims
            );
        }
    }
    Ok(())
}

async fn run(driver: Arc<SimulatedDriver>, path: &Path, inputs_path: &Path) -> Result<()> {
    let payload = load_payload(path)?;
    let text = std::fs::read_to_string(inputs_path)
        .with_context(|| format!("failed to read {}", inputs_path.display()))?;
    let inputs = serde_json::from_str::<Vec<TensorJson>>(&text)
        .context("invalid inputs file")?
        .iter()
        .map(TensorJson::to_tensor)
        .collect::<Result<Vec<_>>>()?;

    let devices = DeviceContext::new(driver);
    let engine = ExecutionEngine::from_payload(&devices, &RefRuntime::new(), &module_name(path), &payload)?;
    let (handle, task) = EngineWorker::spawn(engine, 16);

    let response = handle.execute(inputs).await?;
    let outputs = response
        .outputs
        .iter()
        .map(TensorJson::from_tensor)
        .collect::<Result<Vec<_>>>()?;
    let report = serde_json::json!({
        "outputs": outputs,
        "timings": {
            "queued_us": response.timings.queued_us,
            "backend_us": response.timings.backend_us,
        },
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    drop(handle);
    task.await?;
    Ok(())
}
