//! The dynamic value model the celeris engine serializes: [`Value`] trees
//! whose [`Object`](crate::Object) nodes carry a class name, named fields,
//! and (through [`ObjectRef`]) reference identity, so graphs may alias and
//! cycle freely.
//!
//! Identity lives on object nodes only: every other [`Value`] variant is a
//! plain value with Rust ownership semantics. Two fields alias the same node
//! exactly when they hold clones of the same [`ObjectRef`].

use std::{borrow::Borrow, sync::Arc};

use enum_as_inner::EnumAsInner;

pub mod object;

pub use object::{Object, ObjectId, ObjectRef};

/// An immutable fully-qualified class name; the unit the security policy and
/// type registry key on.
///
/// Comparison and hashing use the string contents, so a `ClassName` can look
/// up entries in maps keyed by `&str` and vice versa.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    derive_more::Display,
)]
pub struct ClassName(Arc<str>);

impl ClassName {
    /// The class name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ClassName {
    fn from(name: &str) -> Self {
        Self(Arc::from(name))
    }
}

impl From<String> for ClassName {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

impl Borrow<str> for ClassName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ClassName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A single value in an object graph.
///
/// Everything except [`Value::Object`] is a plain owned value; object nodes
/// are shared references with identity (see [`ObjectRef`]).
///
/// Equality is structural and follows patched forwards on both sides first.
/// Comparing two cyclic graphs structurally does not terminate; compare
/// node identities with [`ObjectRef::same_as`] instead.
#[derive(Debug, Clone, EnumAsInner)]
pub enum Value {
    /// The absent value.
    Null,
    /// A boolean.
    Bool(bool),
    /// A signed integer, zigzag-varint encoded on the wire.
    Int(i64),
    /// A double-precision float.
    Float(f64),
    /// A UTF-8 string.
    Str(String),
    /// An opaque byte run.
    Bytes(Vec<u8>),
    /// An ordered sequence of values, owned inline (no identity).
    List(Vec<Value>),
    /// A shared reference to an object node.
    Object(ObjectRef),
}

impl Value {
    /// Follows any patched forwards on a top-level object reference and
    /// returns the value it finally denotes. Non-object values return
    /// themselves.
    #[must_use]
    pub fn resolved(&self) -> Self {
        match self {
            Self::Object(reference) => reference.resolved_value(),
            other => other.clone(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self.resolved(), other.resolved()) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a.structural_eq(&b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Self::List(value)
    }
}

impl From<ObjectRef> for Value {
    fn from(value: ObjectRef) -> Self {
        Self::Object(value)
    }
}
