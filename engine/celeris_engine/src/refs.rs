//! Per-operation reference tables.
//!
//! Each top-level serialize, deserialize, or copy call owns exactly one of
//! these; they are discarded when the call returns and need no locking of
//! their own. Handles are indices into an append-only slot vector and are
//! never reused within a call. The tables hold the node `Arc`s they have
//! seen, so a node address can never be recycled under an identity map
//! mid-call.

use std::collections::HashMap;

use celeris_graph::{Object, ObjectId, ObjectRef, Value};

use crate::error::Error;

/// A handle into a reference table: the position of an object in emission
/// (or reservation) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RefHandle(u32);

impl RefHandle {
    /// The handle's slot index.
    #[must_use]
    pub fn index(&self) -> u32 {
        self.0
    }
}

/// The write side: identity-deduplicates objects already emitted.
///
/// The first emission of a node interns it, strictly before its fields are
/// written, so a cycle back to it lands on the handle; every later emission
/// writes only the handle.
#[derive(Debug, Default)]
pub struct RefWriter {
    written: Vec<ObjectRef>,
    by_identity: HashMap<ObjectId, RefHandle>,
}

impl RefWriter {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The handle under which `object` was already emitted, if any.
    #[must_use]
    pub fn lookup(&self, object: &ObjectRef) -> Option<RefHandle> {
        self.by_identity.get(&object.id()).copied()
    }

    /// Assigns the next handle to `object`.
    pub fn intern(&mut self, object: &ObjectRef) -> RefHandle {
        let handle = RefHandle(self.written.len() as u32);
        self.written.push(object.clone());
        self.by_identity.insert(object.id(), handle);
        handle
    }
}

/// The read side: reserved slots in the writer's emission order.
///
/// `reserve` runs when an object definition is encountered, before any of
/// its fields are decoded; back-references during field decoding resolve
/// through `get` to the reserved node, vacant or not. That is the whole
/// cycle story.
#[derive(Debug, Default)]
pub struct RefReader {
    slots: Vec<ObjectRef>,
}

impl RefReader {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the next handle with no value yet.
    pub fn reserve(&mut self) -> RefHandle {
        let handle = RefHandle(self.slots.len() as u32);
        self.slots.push(ObjectRef::reserved());
        handle
    }

    /// The node reserved under `handle`; possibly still vacant.
    pub fn get(&self, handle: RefHandle) -> Result<ObjectRef, Error> {
        self.slots
            .get(handle.0 as usize)
            .cloned()
            .ok_or(Error::BadHandle(u64::from(handle.0)))
    }

    /// Resolves a raw handle index read off the wire.
    pub fn get_by_index(&self, index: u64) -> Result<ObjectRef, Error> {
        u32::try_from(index)
            .ok()
            .map(RefHandle)
            .filter(|handle| (handle.0 as usize) < self.slots.len())
            .map_or(Err(Error::BadHandle(index)), |handle| self.get(handle))
    }

    /// Records the decoded raw instance of a reserved slot. Runs before the
    /// instance's fields are decoded.
    pub fn record(&self, handle: RefHandle, object: Object) -> Result<(), Error> {
        self.get(handle)?.fill(object);
        Ok(())
    }

    /// Patches the slot so every holder of `handle`, past or future,
    /// observes `value` on next dereference.
    ///
    /// A patch that would close a forwarding cycle is refused and logged;
    /// the slot keeps its current value.
    pub fn patch(&self, handle: RefHandle, value: Value) -> Result<(), Error> {
        let slot = self.get(handle)?;
        if !slot.forward_to(value) {
            log::debug!(
                "refused a forwarding cycle while patching handle {}",
                handle.0
            );
        }
        Ok(())
    }
}

/// The copy side: maps source node identities to their copies.
#[derive(Debug, Default)]
pub struct CopyTable {
    // the source node rides along with its copy so its address cannot be
    // recycled under the identity map mid-call
    copies: HashMap<ObjectId, (ObjectRef, ObjectRef)>,
}

impl CopyTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The copy already made for `source`, if any.
    #[must_use]
    pub fn lookup(&self, source: &ObjectRef) -> Option<ObjectRef> {
        self.copies.get(&source.id()).map(|(_, copy)| copy.clone())
    }

    /// Records `copy` as the one copy of `source`. Runs before the copy's
    /// fields are populated, so cycles land back on it.
    pub fn record(&mut self, source: &ObjectRef, copy: ObjectRef) {
        self.copies.insert(source.id(), (source.clone(), copy));
    }
}
