use std::collections::HashMap;

use engineport_core::{Node, Signature};

use crate::{converters, Arg, ConversionCtx, ConverterError, RegistrationConflict};

/// Converts one source node into target-graph layers and binds its outputs.
pub trait NodeConverter: Send + Sync {
    fn convert(
        &self,
        ctx: &mut ConversionCtx,
        node: &Node,
        args: &[Arg<'_>],
    ) -> Result<(), ConverterError>;
}

impl<F> NodeConverter for F
where
    F: Fn(&mut ConversionCtx, &Node, &[Arg<'_>]) -> Result<(), ConverterError> + Send + Sync,
{
    fn convert(
        &self,
        ctx: &mut ConversionCtx,
        node: &Node,
        args: &[Arg<'_>],
    ) -> Result<(), ConverterError> {
        self(ctx, node, args)
    }
}

/// Signature-keyed converter table. Filled once at startup and only read
/// during compilation, so one registry can serve concurrent compilations.
#[derive(Default)]
pub struct ConverterRegistry {
    converters: HashMap<Signature, Box<dyn NodeConverter>>,
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self {
            converters: HashMap::new(),
        }
    }

    /// Registry with every built-in converter.
    pub fn with_default_converters() -> Result<Self, RegistrationConflict> {
        let mut registry = Self::new();
        converters::register_all(&mut registry)?;
        Ok(registry)
    }

    pub fn register<F>(
        &mut self,
        signature: impl Into<Signature>,
        converter: F,
    ) -> Result<(), RegistrationConflict>
    where
        F: Fn(&mut ConversionCtx, &Node, &[Arg<'_>]) -> Result<(), ConverterError>
            + Send
            + Sync
            + 'static,
    {
        self.register_converter(signature, Box::new(converter))
    }

    /// A duplicate signature is an authoring bug: the first converter stays.
    pub fn register_converter(
        &mut self,
        signature: impl Into<Signature>,
        converter: Box<dyn NodeConverter>,
    ) -> Result<(), RegistrationConflict> {
        let signature = signature.into();
        if self.converters.contains_key(&signature) {
            return Err(RegistrationConflict {
                signature: signature.as_str().to_string(),
            });
        }
        tracing::trace!(signature = %signature, "registered converter");
        self.converters.insert(signature, converter);
        Ok(())
    }

    /// Chaining form of [`Self::register`].
    pub fn pattern<F>(
        &mut self,
        signature: &str,
        converter: F,
    ) -> Result<&mut Self, RegistrationConflict>
    where
        F: Fn(&mut ConversionCtx, &Node, &[Arg<'_>]) -> Result<(), ConverterError>
            + Send
            + Sync
            + 'static,
    {
        self.register(signature, converter)?;
        Ok(self)
    }

    pub fn lookup(&self, signature: &Signature) -> Option<&dyn NodeConverter> {
        self.converters.get(signature).map(|c| c.as_ref())
    }

    pub fn contains(&self, signature: &Signature) -> bool {
        self.converters.contains_key(signature)
    }

    pub fn signatures(&self) -> Vec<&Signature> {
        let mut signatures: Vec<&Signature> = self.converters.keys().collect();
        signatures.sort();
        signatures
    }

    pub fn len(&self) -> usize {
        self.converters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }
}
