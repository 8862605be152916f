//! Per-call engine state: one context per top-level serialize, deserialize,
//! or copy call, owning that call's reference tables, class dictionary, and
//! substitution cache.
//!
//! Contexts are single-threaded and die with their call. Bound serializers
//! recurse through [`WriteContext::write_value`],
//! [`ReadContext::read_value`], and [`CopyContext::copy_value`] for nested
//! values; the contexts route object nodes through the security policy, the
//! registry, and the substitution/resolution protocol.

use std::{collections::HashMap, fmt, io};

use celeris_graph::{ObjectId, ObjectRef, Value};
use celeris_io::{BinaryReader, BinaryWriter};

use crate::{
    error::Error,
    refs::{CopyTable, RefReader, RefWriter},
    registry::TypeRegistry,
    wire::{ClassReaderTable, ClassWriterTable, Tag},
};

/// Hardening limits for a single call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Cap on any single declared length (string, byte run, or collection
    /// count) while decoding.
    pub max_len: u64,
    /// Cap on value nesting, in every direction.
    pub max_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self { max_len: celeris_io::DEFAULT_MAX_LEN, max_depth: 128 }
    }
}

/// The state of one top-level write call.
pub struct WriteContext<'a> {
    out: BinaryWriter<&'a mut dyn io::Write>,
    registry: &'a TypeRegistry,
    refs: RefWriter,
    classes: ClassWriterTable,
    // keyed by source identity; the source node rides along so its address
    // cannot be recycled under the cache mid-call
    substitutions: HashMap<ObjectId, (ObjectRef, Value)>,
    limits: Limits,
    depth: usize,
}

impl<'a> WriteContext<'a> {
    pub(crate) fn new(
        writer: &'a mut dyn io::Write,
        registry: &'a TypeRegistry,
        limits: Limits,
    ) -> Self {
        Self {
            out: BinaryWriter::new(writer),
            registry,
            refs: RefWriter::new(),
            classes: ClassWriterTable::default(),
            substitutions: HashMap::new(),
            limits,
            depth: 0,
        }
    }

    /// The output buffer.
    pub fn out(&mut self) -> &mut BinaryWriter<&'a mut dyn io::Write> {
        &mut self.out
    }

    /// The registry this call resolves classes against.
    #[must_use]
    pub fn registry(&self) -> &TypeRegistry {
        self.registry
    }

    /// This call's table of already-emitted objects.
    #[must_use]
    pub fn refs(&self) -> &RefWriter {
        &self.refs
    }

    /// Appends the encoding of `value`, routing object nodes through the
    /// policy, the substitution protocol, and their bound serializer.
    pub fn write_value(&mut self, value: &Value) -> Result<(), Error> {
        self.enter()?;
        let result = self.write_resolved(&value.resolved());
        self.leave();
        result
    }

    fn write_resolved(&mut self, value: &Value) -> Result<(), Error> {
        match value {
            Value::Null => self.out.write_u8(Tag::Null.byte())?,
            Value::Bool(true) => self.out.write_u8(Tag::True.byte())?,
            Value::Bool(false) => self.out.write_u8(Tag::False.byte())?,
            Value::Int(value) => {
                self.out.write_u8(Tag::Int.byte())?;
                self.out.write_zigzag(*value)?;
            }
            Value::Float(value) => {
                self.out.write_u8(Tag::Float.byte())?;
                self.out.write_f64(*value)?;
            }
            Value::Str(value) => {
                self.out.write_u8(Tag::Str.byte())?;
                self.out.write_str(value)?;
            }
            Value::Bytes(value) => {
                self.out.write_u8(Tag::Bytes.byte())?;
                self.out.write_bytes(value)?;
            }
            Value::List(items) => {
                self.out.write_u8(Tag::List.byte())?;
                self.out.write_varint(items.len() as u64)?;
                for item in items {
                    self.write_value(item)?;
                }
            }
            Value::Object(reference) => self.write_object(reference)?,
        }
        Ok(())
    }

    fn write_object(&mut self, reference: &ObjectRef) -> Result<(), Error> {
        match self.substitute(reference)? {
            Value::Object(object) => self.encode_object(&object),
            // the substitution hook replaced the object with a plain value
            other => self.write_resolved(&other),
        }
    }

    /// Runs the substitution protocol for `reference`: each hook in a chain
    /// of substitutions fires at most once per physical object per call,
    /// outcomes are cached, and a chain that loops back on itself settles
    /// on the node it returned to.
    fn substitute(&mut self, reference: &ObjectRef) -> Result<Value, Error> {
        let mut current = reference.clone();
        let mut chain: Vec<ObjectRef> = Vec::new();

        let outcome = loop {
            if let Some((_, cached)) = self.substitutions.get(&current.id()) {
                break cached.clone();
            }
            let Some(class) = current.class() else {
                return Err(Error::UnresolvedObject);
            };
            let binding = self.registry.resolve(class.as_str())?;
            let Some(hook) = binding.hooks().substitute else {
                break Value::Object(current);
            };

            chain.push(current.clone());
            let replaced = hook(&current)
                .map_err(|source| Error::Hook {
                    class,
                    stage: "substitution",
                    source,
                })?
                .resolved();

            match replaced {
                Value::Object(next) if next.same_as(&current) => {
                    break Value::Object(current);
                }
                Value::Object(next) => {
                    if chain.iter().any(|seen| seen.id() == next.id()) {
                        break Value::Object(next);
                    }
                    current = next;
                }
                other => break other,
            }
        };

        for source in chain {
            self.substitutions.insert(source.id(), (source, outcome.clone()));
        }
        Ok(outcome)
    }

    fn encode_object(&mut self, reference: &ObjectRef) -> Result<(), Error> {
        if let Some(handle) = self.refs.lookup(reference) {
            self.out.write_u8(Tag::Ref.byte())?;
            self.out.write_varint(u64::from(handle.index()))?;
            return Ok(());
        }

        let Some(class) = reference.class() else {
            return Err(Error::UnresolvedObject);
        };
        let binding = self.registry.resolve(class.as_str())?;

        // intern strictly before the fields are written: a cycle back to
        // this node must find the handle
        self.refs.intern(reference);
        self.out.write_u8(Tag::Object.byte())?;
        self.classes.encode(&mut self.out, &class)?;
        binding.serializer().write(self, reference)
    }

    fn enter(&mut self) -> Result<(), Error> {
        if self.depth >= self.limits.max_depth {
            return Err(Error::DepthLimitExceeded(self.limits.max_depth));
        }
        self.depth += 1;
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }
}

impl fmt::Debug for WriteContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteContext")
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}

/// The state of one top-level read call.
pub struct ReadContext<'a> {
    input: BinaryReader<&'a mut dyn io::Read>,
    registry: &'a TypeRegistry,
    refs: RefReader,
    classes: ClassReaderTable,
    limits: Limits,
    depth: usize,
}

impl<'a> ReadContext<'a> {
    pub(crate) fn new(
        reader: &'a mut dyn io::Read,
        registry: &'a TypeRegistry,
        limits: Limits,
    ) -> Self {
        Self {
            input: BinaryReader::with_max_len(reader, limits.max_len),
            registry,
            refs: RefReader::new(),
            classes: ClassReaderTable::default(),
            limits,
            depth: 0,
        }
    }

    /// The input buffer.
    pub fn input(&mut self) -> &mut BinaryReader<&'a mut dyn io::Read> {
        &mut self.input
    }

    /// The registry this call resolves classes against.
    #[must_use]
    pub fn registry(&self) -> &TypeRegistry {
        self.registry
    }

    /// This call's table of reserved and decoded objects.
    #[must_use]
    pub fn refs(&self) -> &RefReader {
        &self.refs
    }

    /// Decodes the next value, routing object definitions through the
    /// policy, their bound serializer, and the resolution protocol.
    pub fn read_value(&mut self) -> Result<Value, Error> {
        self.enter()?;
        let result = self.read_tagged();
        self.leave();
        result
    }

    fn read_tagged(&mut self) -> Result<Value, Error> {
        match Tag::from_byte(self.input.read_u8()?)? {
            Tag::Null => Ok(Value::Null),
            Tag::False => Ok(Value::Bool(false)),
            Tag::True => Ok(Value::Bool(true)),
            Tag::Int => Ok(Value::Int(self.input.read_zigzag()?)),
            Tag::Float => Ok(Value::Float(self.input.read_f64()?)),
            Tag::Str => Ok(Value::Str(self.input.read_str()?)),
            Tag::Bytes => Ok(Value::Bytes(self.input.read_bytes()?)),
            Tag::List => {
                let count = self.input.read_len()?;
                let mut items = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    items.push(self.read_value()?);
                }
                Ok(Value::List(items))
            }
            Tag::Ref => {
                let index = self.input.read_varint()?;
                Ok(Value::Object(self.refs.get_by_index(index)?))
            }
            Tag::Object => self.read_object(),
        }
    }

    fn read_object(&mut self) -> Result<Value, Error> {
        let class = self.classes.decode(&mut self.input)?;
        let binding = self.registry.resolve(class.as_str())?;
        // reserve in stream order: this mirrors the writer's interning
        // order exactly
        let handle = self.refs.reserve();
        binding.serializer().read(self, class, handle)
    }

    fn enter(&mut self) -> Result<(), Error> {
        if self.depth >= self.limits.max_depth {
            return Err(Error::DepthLimitExceeded(self.limits.max_depth));
        }
        self.depth += 1;
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }
}

impl fmt::Debug for ReadContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadContext")
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}

/// The state of one top-level copy call.
pub struct CopyContext<'a> {
    registry: &'a TypeRegistry,
    table: CopyTable,
    limits: Limits,
    depth: usize,
}

impl<'a> CopyContext<'a> {
    pub(crate) fn new(registry: &'a TypeRegistry, limits: Limits) -> Self {
        Self { registry, table: CopyTable::new(), limits, depth: 0 }
    }

    /// The registry this call resolves classes against.
    #[must_use]
    pub fn registry(&self) -> &TypeRegistry {
        self.registry
    }

    /// This call's source-to-copy table.
    pub fn table_mut(&mut self) -> &mut CopyTable {
        &mut self.table
    }

    /// Copies `value` structurally, preserving aliasing and cycles among
    /// object nodes within this call.
    pub fn copy_value(&mut self, value: &Value) -> Result<Value, Error> {
        self.enter()?;
        let result = self.copy_resolved(&value.resolved());
        self.leave();
        result
    }

    fn copy_resolved(&mut self, value: &Value) -> Result<Value, Error> {
        match value {
            Value::List(items) => items
                .iter()
                .map(|item| self.copy_value(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            Value::Object(reference) => {
                if let Some(copy) = self.table.lookup(reference) {
                    return Ok(Value::Object(copy));
                }
                let Some(class) = reference.class() else {
                    return Err(Error::UnresolvedObject);
                };
                let binding = self.registry.resolve(class.as_str())?;
                binding.serializer().copy(self, reference)
            }
            other => Ok(other.clone()),
        }
    }

    fn enter(&mut self) -> Result<(), Error> {
        if self.depth >= self.limits.max_depth {
            return Err(Error::DepthLimitExceeded(self.limits.max_depth));
        }
        self.depth += 1;
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }
}

impl fmt::Debug for CopyContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CopyContext")
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}
