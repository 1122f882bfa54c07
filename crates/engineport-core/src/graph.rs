//! Source graph: the traced computation handed to the converter.
//!
//! Values are typed edges. A value is either a graph input, the result of a
//! node, or a compile-time constant. Nodes reference values by id and carry
//! the operation signature used to pick a converter.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use crate::{DType, Dims, GraphError, Tensor};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub usize);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Operation schema, e.g. `aten::reshape(Tensor self, int[] shape) -> (Tensor)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Signature(String);

impl Signature {
    pub fn new(schema: impl Into<String>) -> Self {
        Self(schema.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `aten::reshape` for `aten::reshape(Tensor self, ...) -> (Tensor)`.
    pub fn op_name(&self) -> &str {
        self.0.split('(').next().unwrap_or_default().trim()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Signature {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Signature {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Constant {
    None,
    Bool(bool),
    Int(i64),
    Double(f64),
    IntList(Vec<i64>),
    Tensor(Tensor),
}

impl Constant {
    pub fn kind(&self) -> &'static str {
        match self {
            Constant::None => "None",
            Constant::Bool(_) => "bool",
            Constant::Int(_) => "int",
            Constant::Double(_) => "float",
            Constant::IntList(_) => "int[]",
            Constant::Tensor(_) => "Tensor",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ValueKind {
    /// Graph input with its declared type; `-1` dims are only known at run time.
    Input { dtype: DType, dims: Dims },
    /// Tensor computed by a node.
    Tensor,
    Constant(Constant),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Value {
    pub id: ValueId,
    pub debug_name: String,
    pub kind: ValueKind,
}

impl Value {
    pub fn constant(&self) -> Option<&Constant> {
        match &self.kind {
            ValueKind::Constant(c) => Some(c),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub signature: Signature,
    pub inputs: Vec<ValueId>,
    pub outputs: Vec<ValueId>,
}

impl Node {
    /// `%3 = aten::t(%1)`
    pub fn describe(&self) -> String {
        let outs = self
            .outputs
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        let ins = self
            .inputs
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        format!("{outs} = {}({ins})", self.signature.op_name())
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

#[derive(Clone, Debug, Default)]
pub struct SourceGraph {
    values: Vec<Value>,
    nodes: Vec<Node>,
    inputs: Vec<ValueId>,
    outputs: Vec<ValueId>,
}

impl SourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_value(&mut self, debug_name: Option<String>, kind: ValueKind) -> ValueId {
        let id = ValueId(self.values.len());
        self.values.push(Value {
            id,
            debug_name: debug_name.unwrap_or_else(|| id.to_string()),
            kind,
        });
        id
    }

    pub fn add_input(&mut self, name: &str, dtype: DType, dims: Dims) -> ValueId {
        let id = self.push_value(Some(name.to_string()), ValueKind::Input { dtype, dims });
        self.inputs.push(id);
        id
    }

    pub fn add_constant(&mut self, constant: Constant) -> ValueId {
        self.push_value(None, ValueKind::Constant(constant))
    }

    /// Declares a tensor value whose producer is added later with [`Self::add_node`].
    pub fn declare_value(&mut self) -> ValueId {
        self.push_value(None, ValueKind::Tensor)
    }

    /// Appends a node over already-declared values. Nodes may be added in any
    /// order; [`Self::topological_order`] sorts them.
    pub fn add_node(
        &mut self,
        signature: impl Into<Signature>,
        inputs: &[ValueId],
        outputs: &[ValueId],
    ) -> &Node {
        self.nodes.push(Node {
            signature: signature.into(),
            inputs: inputs.to_vec(),
            outputs: outputs.to_vec(),
        });
        &self.nodes[self.nodes.len() - 1]
    }

    /// Declares `num_outputs` fresh values and adds the node producing them.
    pub fn add_op(
        &mut self,
        signature: impl Into<Signature>,
        inputs: &[ValueId],
        num_outputs: usize,
    ) -> Vec<ValueId> {
        let outputs: Vec<ValueId> = (0..num_outputs).map(|_| self.declare_value()).collect();
        self.add_node(signature, inputs, &outputs);
        outputs
    }

    pub fn mark_output(&mut self, value: ValueId) {
        self.outputs.push(value);
    }

    pub fn value(&self, id: ValueId) -> Result<&Value, GraphError> {
        self.values.get(id.0).ok_or(GraphError::UnknownValue(id))
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn inputs(&self) -> &[ValueId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[ValueId] {
        &self.outputs
    }

    /// Node indices in dependency order (Kahn's algorithm; ties keep insertion
    /// order). Also checks that every consumed value is defined exactly once.
    pub fn topological_order(&self) -> Result<Vec<usize>, GraphError> {
        let mut producer: HashMap<ValueId, usize> = HashMap::new();
        for (idx, node) in self.nodes.iter().enumerate() {
            for &out in &node.outputs {
                self.value(out)?;
                if producer.insert(out, idx).is_some() {
                    return Err(GraphError::MultipleProducers(out));
                }
            }
        }

        for &input in &self.inputs {
            if !matches!(self.value(input)?.kind, ValueKind::Input { .. }) {
                return Err(GraphError::NotAnInput(input));
            }
        }

        let n = self.nodes.len();
        let mut in_degree = vec![0usize; n];
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (idx, node) in self.nodes.iter().enumerate() {
            for &input in &node.inputs {
                let value = self.value(input)?;
                match (&value.kind, producer.get(&input)) {
                    (_, Some(&src)) => {
                        successors[src].push(idx);
                        in_degree[idx] += 1;
                    }
                    (ValueKind::Tensor, None) => {
                        return Err(GraphError::Undefined {
                            value: input,
                            node: node.describe(),
                        });
                    }
                    _ => {}
                }
            }
        }

        for &out in &self.outputs {
            if matches!(self.value(out)?.kind, ValueKind::Tensor) && !producer.contains_key(&out) {
                return Err(GraphError::Undefined {
                    value: out,
                    node: "graph outputs".to_string(),
                });
            }
        }

        let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(idx) = queue.pop_front() {
            order.push(idx);
            for &succ in &successors[idx] {
                in_degree[succ] -= 1;
                if in_degree[succ] == 0 {
                    queue.push_back(succ);
                }
            }
        }

        if order.len() != n {
            return Err(GraphError::Cycle(n - order.len()));
        }
        Ok(order)
    }
}
