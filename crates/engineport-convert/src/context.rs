use std::collections::HashMap;

use engineport_core::{Constant, DeviceDescriptor, Dims, Network, Tensor, TensorId, ValueId};

use crate::ConverterError;

#[derive(Clone, Debug, Default)]
pub struct ConversionSettings {
    /// Some input dims are unknown until run time.
    pub dynamic_shape: bool,
    pub device: DeviceDescriptor,
}

/// Source value -> network tensor. Each value is bound at most once.
#[derive(Clone, Debug, Default)]
pub struct BindingTable {
    entries: HashMap<ValueId, TensorId>,
}

impl BindingTable {
    pub fn get(&self, value: ValueId) -> Option<TensorId> {
        self.entries.get(&value).copied()
    }

    pub fn contains(&self, value: ValueId) -> bool {
        self.entries.contains_key(&value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ValueId, TensorId)> + '_ {
        self.entries.iter().map(|(v, t)| (*v, *t))
    }

    fn insert(&mut self, value: ValueId, tensor: TensorId) -> Result<(), ConverterError> {
        if self.entries.contains_key(&value) {
            return Err(ConverterError::invalid(format!(
                "value {value} is already bound to a network tensor"
            )));
        }
        self.entries.insert(value, tensor);
        Ok(())
    }
}

/// A resolved node input.
#[derive(Clone, Copy, Debug)]
pub enum Arg<'g> {
    Tensor(TensorId),
    Constant(&'g Constant),
}

impl<'g> Arg<'g> {
    pub fn is_constant(&self) -> bool {
        matches!(self, Arg::Constant(_))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Arg::Constant(Constant::None))
    }

    fn unexpected(&self, wanted: &str) -> ConverterError {
        let got = match self {
            Arg::Tensor(_) => "a network tensor",
            Arg::Constant(c) => c.kind(),
        };
        ConverterError::invalid(format!("expected {wanted} argument, got {got}"))
    }

    /// Network tensor for this argument; constant tensors are frozen into a
    /// constant layer.
    pub fn tensor_or_freeze(&self, ctx: &mut ConversionCtx) -> Result<TensorId, ConverterError> {
        match self {
            Arg::Tensor(id) => Ok(*id),
            Arg::Constant(Constant::Tensor(t)) => Ok(ctx.freeze(t)),
            Arg::Constant(_) => Err(self.unexpected("Tensor")),
        }
    }

    pub fn tensor(&self) -> Result<TensorId, ConverterError> {
        match self {
            Arg::Tensor(id) => Ok(*id),
            _ => Err(self.unexpected("network tensor")),
        }
    }

    pub fn unwrap_int(&self) -> Result<i64, ConverterError> {
        match self {
            Arg::Constant(Constant::Int(v)) => Ok(*v),
            _ => Err(self.unexpected("int")),
        }
    }

    pub fn unwrap_int_list(&self) -> Result<&'g [i64], ConverterError> {
        match self {
            Arg::Constant(Constant::IntList(v)) => Ok(v.as_slice()),
            _ => Err(self.unexpected("int[]")),
        }
    }

    pub fn unwrap_scalar(&self) -> Result<f64, ConverterError> {
        match self {
            Arg::Constant(Constant::Int(v)) => Ok(*v as f64),
            Arg::Constant(Constant::Double(v)) => Ok(*v),
            _ => Err(self.unexpected("Scalar")),
        }
    }

    pub fn unwrap_tensor(&self) -> Result<&'g Tensor, ConverterError> {
        match self {
            Arg::Constant(Constant::Tensor(t)) => Ok(t),
            _ => Err(self.unexpected("constant Tensor")),
        }
    }
}

/// Per-compilation state. Owned by one `convert_graph` call.
pub struct ConversionCtx {
    network: Network,
    bindings: BindingTable,
    dynamic_shape: bool,
    device: DeviceDescriptor,
    frozen: usize,
}

impl ConversionCtx {
    pub fn new(settings: &ConversionSettings) -> Self {
        Self {
            network: Network::new(),
            bindings: BindingTable::default(),
            dynamic_shape: settings.dynamic_shape,
            device: settings.device,
            frozen: 0,
        }
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut Network {
        &mut self.network
    }

    pub fn bindings(&self) -> &BindingTable {
        &self.bindings
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic_shape
    }

    pub fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    pub fn dims(&self, tensor: TensorId) -> Result<Dims, ConverterError> {
        Ok(self.network.dims(tensor)?.clone())
    }

    /// Commits `tensor` as the network value of `value`.
    pub fn associate(&mut self, value: ValueId, tensor: TensorId) -> Result<TensorId, ConverterError> {
        self.network.tensor(tensor)?;
        self.bindings.insert(value, tensor)?;
        Ok(tensor)
    }

    pub fn freeze(&mut self, weights: &Tensor) -> TensorId {
        let name = format!("[Freeze Tensor {}]", self.frozen);
        self.frozen += 1;
        self.network.add_constant(&name, weights.clone())
    }

    pub(crate) fn into_parts(self) -> (Network, BindingTable) {
        (self.network, self.bindings)
    }
}
