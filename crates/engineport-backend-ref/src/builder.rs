use bytes::Bytes;
use engineport_core::{
    BackendCapabilities, BindingName, BindingSpec, BuildConfig, BuildError, DType,
    DeviceDescriptor, EngineArtifact, EngineBuilder, LayerKind, Network, TensorId,
};
use tracing::{debug, info};

use crate::{EnginePlan, PlanBinding, PLAN_FORMAT_VERSION};

pub const MAX_RANK: usize = 8;

#[derive(Clone, Copy, Debug, Default)]
pub struct RefBuilder;

impl RefBuilder {
    pub fn new() -> Self {
        Self
    }

    fn check_layers(network: &Network, config: &BuildConfig) -> Result<(), BuildError> {
        let mut constant_bytes = 0usize;
        for layer in network.layers() {
            let output = network
                .tensor(layer.output)
                .map_err(|e| BuildError::Unsupported(e.to_string()))?;
            if output.dims.rank() > MAX_RANK {
                return Err(BuildError::Unsupported(format!(
                    "layer `{}` has rank {}, limit is {MAX_RANK}",
                    layer.name,
                    output.dims.rank()
                )));
            }

            match &layer.kind {
                LayerKind::Constant { weights } => constant_bytes += weights.data.len(),
                _ => {
                    let accepted = output.dtype == DType::F32
                        || (config.allow_fp16 && output.dtype == DType::F16);
                    if !accepted {
                        return Err(BuildError::UnsupportedDType {
                            layer: layer.name.clone(),
                            dtype: output.dtype,
                        });
                    }
                }
            }
            debug!(layer = %layer.name, kind = layer.kind.kind_name(), dims = %output.dims, "planned layer");
        }

        if constant_bytes > config.max_workspace_bytes {
            return Err(BuildError::ResourceExhausted {
                required: constant_bytes,
                limit: config.max_workspace_bytes,
            });
        }
        Ok(())
    }

    fn binding(network: &Network, tensor: TensorId, is_input: bool) -> Result<PlanBinding, BuildError> {
        let t = network
            .tensor(tensor)
            .map_err(|e| BuildError::Unsupported(e.to_string()))?;
        let name = BindingName(t.name.clone());
        name.logical_index()?;
        Ok(PlanBinding {
            spec: BindingSpec {
                name,
                is_input,
                dtype: t.dtype,
                dims: t.dims.clone(),
            },
            tensor,
        })
    }
}

impl EngineBuilder for RefBuilder {
    fn name(&self) -> &'static str {
        "reference"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            supports_dynamic_shapes: true,
            max_rank: MAX_RANK,
        }
    }

    fn build(
        &self,
        network: &Network,
        config: &BuildConfig,
        device: &DeviceDescriptor,
    ) -> Result<EngineArtifact, BuildError> {
        if network.outputs().is_empty() {
            return Err(BuildError::EmptyNetwork);
        }
        Self::check_layers(network, config)?;

        let mut bindings = Vec::with_capacity(network.inputs().len() + network.outputs().len());
        for &t in network.inputs() {
            bindings.push(Self::binding(network, t, true)?);
        }
        for &t in network.outputs() {
            bindings.push(Self::binding(network, t, false)?);
        }
        bindings.sort_by(|a, b| a.spec.name.0.cmp(&b.spec.name.0));

        let plan = EnginePlan {
            format_version: PLAN_FORMAT_VERSION,
            engine_name: config.engine_name.clone(),
            built_for: device.capability(),
            network: network.clone(),
            bindings,
        };
        let blob = plan
            .to_json()
            .map_err(|e| BuildError::Serialize(e.to_string()))?;
        info!(
            engine = %plan.engine_name,
            built_for = %plan.built_for,
            layers = network.layers().len(),
            bytes = blob.len(),
            "built reference engine"
        );
        Ok(EngineArtifact::new(*device, Bytes::from(blob)))
    }
}
