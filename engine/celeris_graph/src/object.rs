//! Object nodes and the shared cells that give them reference identity.
//!
//! An [`ObjectRef`] is an `Arc` around a lock-guarded cell. The cell starts
//! out either holding an [`Object`] or *vacant* (reserved during decoding,
//! before its fields exist), and may later be *forwarded* to another value
//! when a resolution hook replaces the decoded raw instance. Every holder of
//! the reference dereferences through the cell, never through a cached
//! value, so a forward installed late is observed by references handed out
//! early. This is what keeps aliasing and cycles intact across
//! substitution.

use std::{fmt, sync::Arc};

use parking_lot::RwLock;

use crate::{ClassName, Value};

/// A class-tagged record: the payload of an object node.
#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    class: ClassName,
    fields: Vec<(String, Value)>,
}

impl Object {
    /// Creates an empty object of the given class.
    pub fn new(class: impl Into<ClassName>) -> Self {
        Self { class: class.into(), fields: Vec::new() }
    }

    /// Adds or replaces a field, builder style.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// The object's class.
    #[must_use]
    pub fn class(&self) -> &ClassName {
        &self.class
    }

    /// Looks up a field by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    /// Adds or replaces a field by name, preserving insertion order.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(field, _)| *field == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    /// The fields in insertion order.
    #[must_use]
    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }
}

/// The per-call identity of an object node: the address of its cell.
///
/// Only meaningful while the node is alive; reference tables hold the node's
/// `Arc` alongside the id so an address is never reused under them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(usize);

enum CellState {
    /// Reserved: a handle exists but the value has not been recorded yet.
    Vacant,
    /// A materialized object.
    Ready(Object),
    /// Patched: this cell now denotes another value entirely.
    Forwarded(Value),
}

/// A shared, identity-bearing reference to an object node.
///
/// Clones alias the same node; [`ObjectRef::same_as`] tells whether two
/// references denote one node. Field access goes through any forwards
/// installed by [`ObjectRef::forward_to`], so a reference obtained before a
/// patch behaves exactly like one obtained after it.
#[derive(Clone)]
pub struct ObjectRef {
    cell: Arc<RwLock<CellState>>,
}

impl ObjectRef {
    /// Creates a node holding `object`.
    pub fn new(object: Object) -> Self {
        Self { cell: Arc::new(RwLock::new(CellState::Ready(object))) }
    }

    /// Creates a reserved node with no value yet; see [`ObjectRef::fill`].
    #[must_use]
    pub fn reserved() -> Self {
        Self { cell: Arc::new(RwLock::new(CellState::Vacant)) }
    }

    /// This node's identity. Forwards are *not* followed: a patched cell
    /// keeps its own identity distinct from its target's.
    #[must_use]
    pub fn id(&self) -> ObjectId {
        ObjectId(Arc::as_ptr(&self.cell) as *const () as usize)
    }

    /// Whether the node is still reserved and holds no value.
    #[must_use]
    pub fn is_vacant(&self) -> bool {
        matches!(&*self.cell.read(), CellState::Vacant)
    }

    /// Records the value of a reserved node.
    ///
    /// # Panics
    ///
    /// Panics if the node already holds a value; a reservation is filled at
    /// most once.
    pub fn fill(&self, object: Object) {
        let mut state = self.cell.write();
        assert!(
            matches!(&*state, CellState::Vacant),
            "an object reservation can only be filled once"
        );
        *state = CellState::Ready(object);
    }

    /// Patches this node to denote `value` from now on, for every holder of
    /// the reference, past or future.
    ///
    /// Returns `false` (and leaves the node untouched) if the forward would
    /// close a forwarding cycle; a chain of forwards must always terminate.
    pub fn forward_to(&self, value: Value) -> bool {
        if let Value::Object(target) = &value {
            let mut current = target.clone();
            loop {
                if Arc::ptr_eq(&current.cell, &self.cell) {
                    return false;
                }
                let next = match &*current.cell.read() {
                    CellState::Forwarded(Value::Object(next)) => next.clone(),
                    _ => break,
                };
                current = next;
            }
        }
        *self.cell.write() = CellState::Forwarded(value);
        true
    }

    /// Follows forwards and returns the value this reference finally
    /// denotes: the terminal object node, or the non-object value a forward
    /// chain ends in.
    #[must_use]
    pub fn resolved_value(&self) -> Value {
        let mut current = self.clone();
        loop {
            let next = match &*current.cell.read() {
                CellState::Forwarded(Value::Object(next)) => next.clone(),
                CellState::Forwarded(other) => return other.clone(),
                _ => break,
            };
            current = next;
        }
        Value::Object(current)
    }

    /// Whether two references denote the same node once forwards are
    /// followed on both sides.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        match (self.resolved_value(), other.resolved_value()) {
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(&a.cell, &b.cell),
            _ => false,
        }
    }

    /// The class of the denoted object, if it is a materialized object.
    #[must_use]
    pub fn class(&self) -> Option<ClassName> {
        self.with_object(|object| object.class().clone())
    }

    /// Looks up a field on the denoted object.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        self.with_object(|object| object.get(name).cloned()).flatten()
    }

    /// Adds or replaces a field on the denoted object.
    ///
    /// # Panics
    ///
    /// Panics if the reference does not denote a materialized object (it is
    /// still vacant, or forwarded to a non-object value).
    pub fn set(&self, name: impl Into<String>, value: impl Into<Value>) {
        let Value::Object(target) = self.resolved_value() else {
            panic!("cannot set a field through a non-object reference");
        };
        let mut state = target.cell.write();
        match &mut *state {
            CellState::Ready(object) => object.set(name, value),
            _ => panic!("cannot set a field on a vacant object"),
        }
    }

    /// A snapshot of the denoted object, if it is a materialized object.
    #[must_use]
    pub fn snapshot(&self) -> Option<Object> {
        self.with_object(Object::clone)
    }

    /// Structural equality: same class and pairwise-equal fields, following
    /// forwards first. Two references to one node are trivially equal. Does
    /// not terminate on cyclic graphs.
    #[must_use]
    pub fn structural_eq(&self, other: &Self) -> bool {
        if self.same_as(other) {
            return true;
        }
        match (self.snapshot(), other.snapshot()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    fn with_object<T>(&self, f: impl FnOnce(&Object) -> T) -> Option<T> {
        let Value::Object(target) = self.resolved_value() else {
            return None;
        };
        let state = target.cell.read();
        match &*state {
            CellState::Ready(object) => Some(f(object)),
            _ => None,
        }
    }
}

impl fmt::Debug for ObjectRef {
    // deliberately shallow: a cyclic graph must be printable
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.cell.read();
        match &*state {
            CellState::Vacant => write!(f, "ObjectRef(<vacant>@{:#x})", self.id().0),
            CellState::Ready(object) => {
                write!(f, "ObjectRef({}@{:#x})", object.class(), self.id().0)
            }
            CellState::Forwarded(_) => {
                write!(f, "ObjectRef(<forwarded>@{:#x})", self.id().0)
            }
        }
    }
}
