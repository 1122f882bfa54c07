use engineport_core::{BackendError, BindingSpec, Capability, LayerKind, Network, TensorId};
use serde::{Deserialize, Serialize};

pub const PLAN_FORMAT_VERSION: u32 = 1;

/// Serialized engine of the reference backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnginePlan {
    pub format_version: u32,
    pub engine_name: String,
    pub built_for: Capability,
    pub network: Network,
    /// Physical slot order.
    pub bindings: Vec<PlanBinding>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanBinding {
    pub spec: BindingSpec,
    pub tensor: TensorId,
}

impl EnginePlan {
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_json(blob: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(blob)
    }
}

impl EnginePlan {
    /// Structural checks run at load time: bindings and layer operands refer
    /// to existing tensors, and every layer only reads tensors that are
    /// available before it runs.
    pub fn validate(&self) -> Result<(), BackendError> {
        let corrupt = |message: String| BackendError::Deserialize(message);
        let tensors = self.network.tensors().len();
        if let Some(b) = self.bindings.iter().find(|b| b.tensor.0 >= tensors) {
            return Err(corrupt(format!(
                "binding `{}` refers to a missing tensor",
                b.spec.name.0
            )));
        }

        let mut ready = vec![false; tensors];
        for b in self.bindings.iter().filter(|b| b.spec.is_input) {
            ready[b.tensor.0] = true;
        }
        for layer in self.network.layers() {
            let arity = match layer.kind {
                LayerKind::Constant { .. } => 0,
                LayerKind::Shuffle(_) => 1,
                LayerKind::MatrixMultiply { .. } | LayerKind::ElementWise(_) => 2,
            };
            if layer.inputs.len() != arity {
                return Err(corrupt(format!(
                    "layer `{}` has {} inputs, expected {arity}",
                    layer.name,
                    layer.inputs.len()
                )));
            }
            if let Some(input) = layer.inputs.iter().find(|t| !ready.get(t.0).copied().unwrap_or(false)) {
                return Err(corrupt(format!(
                    "layer `{}` reads tensor {} before it is produced",
                    layer.name, input.0
                )));
            }
            let output = ready
                .get_mut(layer.output.0)
                .ok_or_else(|| corrupt(format!("layer `{}` writes a missing tensor", layer.name)))?;
            *output = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use engineport_core::{DType, Dims, DeviceDescriptor, ShuffleSpec};

    use super::*;

    fn plan() -> EnginePlan {
        let mut network = Network::new();
        let x = network.add_input("input_0", DType::F32, Dims::from_slice(&[2, 2])).unwrap();
        let y = network.add_shuffle("t", x, ShuffleSpec::transpose(vec![1, 0])).unwrap();
        network.mark_output(y, "output_0").unwrap();
        let binding = |tensor: TensorId, is_input| {
            let t = network.tensor(tensor).unwrap();
            PlanBinding {
                spec: BindingSpec {
                    name: engineport_core::BindingName(t.name.clone()),
                    is_input,
                    dtype: t.dtype,
                    dims: t.dims.clone(),
                },
                tensor,
            }
        };
        let bindings = vec![binding(x, true), binding(y, false)];
        EnginePlan {
            format_version: PLAN_FORMAT_VERSION,
            engine_name: "t".to_string(),
            built_for: DeviceDescriptor::new(0, 8, 6).capability(),
            network,
            bindings,
        }
    }

    #[test]
    fn well_formed_plan_validates() {
        plan().validate().unwrap();
    }

    #[test]
    fn rejects_dangling_layer_input() {
        let mut json: serde_json::Value = serde_json::from_slice(&plan().to_json().unwrap()).unwrap();
        json["network"]["layers"][0]["inputs"][0] = serde_json::json!(7);
        let plan: EnginePlan = serde_json::from_value(json).unwrap();
        assert!(matches!(plan.validate(), Err(BackendError::Deserialize(_))));
    }

    #[test]
    fn rejects_wrong_arity() {
        let mut json: serde_json::Value = serde_json::from_slice(&plan().to_json().unwrap()).unwrap();
        json["network"]["layers"][0]["inputs"] = serde_json::json!([0, 0]);
        let plan: EnginePlan = serde_json::from_value(json).unwrap();
        let err = plan.validate().unwrap_err();
        assert!(err.to_string().contains("expected 1"), "{err}");
    }
}
