//! The serializer contract and the stock serializer kinds.
//!
//! One serializer is bound per class (see
//! [`TypeRegistry`](crate::registry::TypeRegistry)); the engine dispatches
//! to it after the security policy has admitted the class and, on the
//! write path, after any substitution hook has already run, so a
//! serializer always encodes the object it is handed.

use celeris_graph::{ClassName, Object, ObjectRef, Value};

use crate::{
    context::{CopyContext, ReadContext, WriteContext},
    error::{Error, InsecureError},
    refs::RefHandle,
    registry::ReplaceHooks,
};

/// Uniform write/read/copy operations for one class.
pub trait Serializer: Send + Sync {
    /// Appends the encoding of `object` to the context's buffer. The handle
    /// for `object` is already interned; nested values recurse through
    /// [`WriteContext::write_value`].
    fn write(&self, cx: &mut WriteContext<'_>, object: &ObjectRef) -> Result<(), Error>;

    /// Decodes one object of `class` into the slot reserved under `handle`.
    ///
    /// Implementations must record a raw instance under `handle` *before*
    /// decoding any field, so back-references inside the fields resolve to
    /// it.
    fn read(
        &self,
        cx: &mut ReadContext<'_>,
        class: ClassName,
        handle: RefHandle,
    ) -> Result<Value, Error>;

    /// Produces a structurally independent copy of `object`, preserving
    /// aliasing within the current copy call.
    fn copy(&self, cx: &mut CopyContext<'_>, object: &ObjectRef) -> Result<Value, Error>;
}

/// The default serializer: a field count followed by name/value pairs.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldSerializer;

impl Serializer for FieldSerializer {
    fn write(&self, cx: &mut WriteContext<'_>, object: &ObjectRef) -> Result<(), Error> {
        let snapshot = object.snapshot().ok_or(Error::UnresolvedObject)?;
        cx.out().write_varint(snapshot.fields().len() as u64)?;
        for (name, value) in snapshot.fields() {
            cx.out().write_str(name)?;
            cx.write_value(value)?;
        }
        Ok(())
    }

    fn read(
        &self,
        cx: &mut ReadContext<'_>,
        class: ClassName,
        handle: RefHandle,
    ) -> Result<Value, Error> {
        // record the raw instance first: cyclic back-references decoded
        // below must land on it
        cx.refs().record(handle, Object::new(class))?;
        let node = cx.refs().get(handle)?;

        let count = cx.input().read_len()?;
        for _ in 0..count {
            let name = cx.input().read_str()?;
            let value = cx.read_value()?;
            node.set(name, value);
        }
        Ok(Value::Object(node))
    }

    fn copy(&self, cx: &mut CopyContext<'_>, object: &ObjectRef) -> Result<Value, Error> {
        let snapshot = object.snapshot().ok_or(Error::UnresolvedObject)?;
        let copy = ObjectRef::new(Object::new(snapshot.class().clone()));
        cx.table_mut().record(object, copy.clone());

        for (name, value) in snapshot.fields() {
            let copied = cx.copy_value(value)?;
            copy.set(name.as_str(), copied);
        }
        Ok(Value::Object(copy))
    }
}

/// The substitution/resolution protocol around the field-wise encoding.
///
/// The write-side substitution hook runs in the engine before dispatch (the
/// replacement may not be an object at all); this serializer contributes
/// the read side: decode the raw instance, run the resolution hook once,
/// and patch the reference table when the hook changes identity, so every
/// back-reference issued while the raw instance was current retroactively
/// observes the final object.
///
/// Copying does not run the hooks; a copy reproduces the graph as it is.
#[derive(Debug, Clone, Copy)]
pub struct ReplaceResolveSerializer {
    hooks: ReplaceHooks,
}

impl ReplaceResolveSerializer {
    /// Creates the protocol serializer for a class with the given hooks.
    #[must_use]
    pub fn new(hooks: ReplaceHooks) -> Self {
        Self { hooks }
    }
}

impl Serializer for ReplaceResolveSerializer {
    fn write(&self, cx: &mut WriteContext<'_>, object: &ObjectRef) -> Result<(), Error> {
        FieldSerializer.write(cx, object)
    }

    fn read(
        &self,
        cx: &mut ReadContext<'_>,
        class: ClassName,
        handle: RefHandle,
    ) -> Result<Value, Error> {
        let value = FieldSerializer.read(cx, class.clone(), handle)?;

        let Some(resolve) = self.hooks.resolve else {
            return Ok(value);
        };
        let Value::Object(node) = &value else {
            return Ok(value);
        };

        let resolved = resolve(node)
            .map_err(|source| Error::Hook { class, stage: "resolution", source })?
            .resolved();

        let unchanged =
            matches!(&resolved, Value::Object(target) if target.same_as(node));
        if !unchanged {
            cx.refs().patch(handle, resolved)?;
        }
        Ok(value)
    }

    fn copy(&self, cx: &mut CopyContext<'_>, object: &ObjectRef) -> Result<Value, Error> {
        FieldSerializer.copy(cx, object)
    }
}

/// The serializer the policy installs for disallowed classes: every
/// operation fails with a security error naming the class, never partially
/// succeeding.
#[derive(Debug, Clone)]
pub struct RejectingSerializer {
    class: ClassName,
}

impl RejectingSerializer {
    /// Creates a rejecting serializer for `class`.
    #[must_use]
    pub fn new(class: ClassName) -> Self {
        Self { class }
    }
}

impl Serializer for RejectingSerializer {
    fn write(&self, _: &mut WriteContext<'_>, _: &ObjectRef) -> Result<(), Error> {
        Err(InsecureError::Rejected(self.class.clone()).into())
    }

    fn read(
        &self,
        _: &mut ReadContext<'_>,
        _: ClassName,
        _: RefHandle,
    ) -> Result<Value, Error> {
        Err(InsecureError::Rejected(self.class.clone()).into())
    }

    fn copy(&self, _: &mut CopyContext<'_>, _: &ObjectRef) -> Result<Value, Error> {
        Err(InsecureError::Rejected(self.class.clone()).into())
    }
}
