//! JSON description of a source graph. Values are referred to by name;
//! nodes may appear in any order.

use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use engineport_core::{Constant, DType, Dims, SourceGraph, Tensor, ValueId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct GraphFile {
    pub inputs: Vec<InputEntry>,
    #[serde(default)]
    pub constants: Vec<ConstantEntry>,
    pub nodes: Vec<NodeEntry>,
    pub outputs: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct InputEntry {
    pub name: String,
    #[serde(default = "default_dtype")]
    pub dtype: DType,
    pub dims: Vec<i64>,
}

fn default_dtype() -> DType {
    DType::F32
}

#[derive(Debug, Deserialize)]
pub struct ConstantEntry {
    pub name: String,
    pub value: ConstantValue,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ConstantValue {
    None,
    Bool(bool),
    Int(i64),
    Double(f64),
    IntList(Vec<i64>),
    Tensor(TensorJson),
}

#[derive(Debug, Deserialize)]
pub struct NodeEntry {
    /// Full operator schema, e.g. `aten::t(Tensor self) -> (Tensor)`.
    pub op: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

/// F32 host tensor as it appears in input and output files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorJson {
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

impl TensorJson {
    pub fn to_tensor(&self) -> Result<Tensor> {
        Ok(Tensor::from_f32(&self.shape, &self.values)?)
    }

    pub fn from_tensor(tensor: &Tensor) -> Result<Self> {
        Ok(Self {
            shape: tensor.shape.dims().to_vec(),
            values: tensor.to_f32_vec()?,
        })
    }
}

fn define(names: &mut HashMap<String, ValueId>, name: &str, id: ValueId) -> Result<()> {
    if names.insert(name.to_string(), id).is_some() {
        bail!("value `{name}` is defined twice");
    }
    Ok(())
}

impl GraphFile {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn into_graph(self) -> Result<SourceGraph> {
        let mut graph = SourceGraph::new();
        let mut names: HashMap<String, ValueId> = HashMap::new();
        for input in &self.inputs {
            let id = graph.add_input(&input.name, input.dtype, Dims::from_slice(&input.dims));
            define(&mut names, &input.name, id)?;
        }
        for entry in self.constants {
            let constant = match entry.value {
                ConstantValue::None => Constant::None,
                ConstantValue::Bool(v) => Constant::Bool(v),
                ConstantValue::Int(v) => Constant::Int(v),
                ConstantValue::Double(v) => Constant::Double(v),
                ConstantValue::IntList(v) => Constant::IntList(v),
                ConstantValue::Tensor(t) => Constant::Tensor(
                    t.to_tensor()
                        .with_context(|| format!("constant `{}`", entry.name))?,
                ),
            };
            let id = graph.add_constant(constant);
            define(&mut names, &entry.name, id)?;
        }

        // Declare every node output first so nodes can reference values
        // produced later in the file.
        for node in &self.nodes {
            for out in &node.outputs {
                let id = graph.declare_value();
                define(&mut names, out, id)?;
            }
        }

        let lookup = |names: &HashMap<String, ValueId>, name: &str| {
            names
                .get(name)
                .copied()
                .with_context(|| format!("unknown value `{name}`"))
        };
        for node in &self.nodes {
            let inputs = node
                .inputs
                .iter()
                .map(|n| lookup(&names, n))
                .collect::<Result<Vec<_>>>()?;
            let outputs = node
                .outputs
                .iter()
                .map(|n| lookup(&names, n))
                .collect::<Result<Vec<_>>>()?;
            graph.add_node(node.op.as_str(), &inputs, &outputs);
        }
        for out in &self.outputs {
            let id = lookup(&names, out)?;
            graph.mark_output(id);
        }
        Ok(graph)
    }
}
