//! Wire-level framing: value tags and the per-stream class dictionary.

use std::collections::HashMap;

use celeris_graph::ClassName;
use celeris_io::{BinaryReader, BinaryWriter};

use crate::error::Error;

/// One-byte tag ahead of every encoded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tag {
    Null,
    False,
    True,
    Int,
    Float,
    Str,
    Bytes,
    List,
    /// A back-reference: varint handle of an already-decoded object.
    Ref,
    /// An inline object definition: class dictionary entry, then the bound
    /// serializer's payload.
    Object,
}

impl Tag {
    pub(crate) fn byte(self) -> u8 {
        match self {
            Self::Null => 0,
            Self::False => 1,
            Self::True => 2,
            Self::Int => 3,
            Self::Float => 4,
            Self::Str => 5,
            Self::Bytes => 6,
            Self::List => 7,
            Self::Ref => 8,
            Self::Object => 9,
        }
    }

    pub(crate) fn from_byte(byte: u8) -> Result<Self, Error> {
        match byte {
            0 => Ok(Self::Null),
            1 => Ok(Self::False),
            2 => Ok(Self::True),
            3 => Ok(Self::Int),
            4 => Ok(Self::Float),
            5 => Ok(Self::Str),
            6 => Ok(Self::Bytes),
            7 => Ok(Self::List),
            8 => Ok(Self::Ref),
            9 => Ok(Self::Object),
            other => Err(Error::UnknownTag(other)),
        }
    }
}

/// Write side of the per-stream class dictionary: the first use of a class
/// writes `0` plus its name, later uses write `index + 1`.
#[derive(Debug, Default)]
pub(crate) struct ClassWriterTable {
    indexes: HashMap<ClassName, u64>,
}

impl ClassWriterTable {
    pub(crate) fn encode<W: std::io::Write>(
        &mut self,
        out: &mut BinaryWriter<W>,
        class: &ClassName,
    ) -> Result<(), celeris_io::Error> {
        if let Some(index) = self.indexes.get(class) {
            return out.write_varint(index + 1);
        }
        let index = self.indexes.len() as u64;
        self.indexes.insert(class.clone(), index);
        out.write_varint(0)?;
        out.write_str(class.as_str())
    }
}

/// Read side of the per-stream class dictionary, in the writer's first-use
/// order.
#[derive(Debug, Default)]
pub(crate) struct ClassReaderTable {
    names: Vec<ClassName>,
}

impl ClassReaderTable {
    pub(crate) fn decode<R: std::io::Read>(
        &mut self,
        input: &mut BinaryReader<R>,
    ) -> Result<ClassName, Error> {
        let key = input.read_varint()?;
        if key == 0 {
            let class = ClassName::from(input.read_str()?);
            self.names.push(class.clone());
            return Ok(class);
        }

        let index = key - 1;
        usize::try_from(index)
            .ok()
            .and_then(|position| self.names.get(position))
            .cloned()
            .ok_or(Error::BadClassRef(index))
    }
}
