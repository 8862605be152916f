//! The top-level façade: [`Codec`] ties a registry (and its policy) to the
//! `write`/`read`/`copy` entry points.

use std::{io, sync::Arc};

use celeris_graph::Value;

use crate::{
    context::{CopyContext, Limits, ReadContext, WriteContext},
    error::Error,
    registry::TypeRegistry,
};

/// An object-graph codec over a type registry.
///
/// Every call creates its own per-call context and reference table; a codec
/// is cheap to clone and safe to share, the registry and its policy being
/// the only state that outlives a call.
#[derive(Debug, Clone)]
pub struct Codec {
    registry: Arc<TypeRegistry>,
    limits: Limits,
}

impl Codec {
    /// Creates a codec over `registry` with default [`Limits`].
    #[must_use]
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self { registry, limits: Limits::default() }
    }

    /// Replaces the hardening limits.
    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// The registry this codec resolves classes against.
    #[must_use]
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// The hardening limits in effect.
    #[must_use]
    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// Encodes `value` into `writer`.
    ///
    /// On failure the writer may hold a partial prefix; the caller is
    /// responsible for discarding it.
    pub fn write<W: io::Write>(&self, writer: &mut W, value: &Value) -> Result<(), Error> {
        let mut cx = WriteContext::new(writer, &self.registry, self.limits);
        cx.write_value(value)
    }

    /// Encodes `value` into a fresh byte vector.
    pub fn to_bytes(&self, value: &Value) -> Result<Vec<u8>, Error> {
        let mut bytes = Vec::new();
        self.write(&mut bytes, value)?;
        Ok(bytes)
    }

    /// Decodes one value from `reader`.
    pub fn read<R: io::Read>(&self, reader: &mut R) -> Result<Value, Error> {
        let mut cx = ReadContext::new(reader, &self.registry, self.limits);
        let value = cx.read_value()?;
        Ok(value.resolved())
    }

    /// Decodes one value from a byte slice.
    pub fn from_bytes(&self, bytes: &[u8]) -> Result<Value, Error> {
        let mut cursor = bytes;
        self.read(&mut cursor)
    }

    /// Produces a structurally independent copy of `value`, preserving
    /// aliasing and cycles among its object nodes, with no bytes produced.
    pub fn copy(&self, value: &Value) -> Result<Value, Error> {
        let mut cx = CopyContext::new(&self.registry, self.limits);
        Ok(cx.copy_value(value)?.resolved())
    }
}

#[cfg(test)]
mod test;
