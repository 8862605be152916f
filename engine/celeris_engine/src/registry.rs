//! The type registry: class identity to serializer bindings, type ids, and
//! the generation lock that keeps binding construction and policy-driven
//! revocation mutually exclusive.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

use celeris_graph::{ClassName, ObjectRef, Value};
use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::{
    error::{Error, HookError, InsecureError},
    policy::ClassChecker,
    serializer::{
        FieldSerializer, RejectingSerializer, ReplaceResolveSerializer, Serializer,
    },
};

/// A write-side substitution hook: invoked at most once per physical object
/// per top-level call, it may replace the object with any value before
/// encoding.
pub type SubstituteFn = fn(&ObjectRef) -> Result<Value, HookError>;

/// A read-side resolution hook: invoked once on a fully-decoded raw
/// instance, it may replace it with the final value.
pub type ResolveFn = fn(&ObjectRef) -> Result<Value, HookError>;

/// The optional substitution/resolution capability of a class.
///
/// Absence of a hook means identity. Whether a class has a hook at all is
/// decided here, at registration time, once per class. The engine never
/// re-probes per call, and there is no implicit inheritance: a class
/// registered without hooks uses none, whatever other classes do.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplaceHooks {
    /// The write-side substitution hook, if any.
    pub substitute: Option<SubstituteFn>,
    /// The read-side resolution hook, if any.
    pub resolve: Option<ResolveFn>,
}

impl ReplaceHooks {
    /// Whether neither hook is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.substitute.is_none() && self.resolve.is_none()
    }
}

/// Registration-time metadata for a class: its hooks and, optionally, a
/// custom serializer overriding the default field-wise one.
#[derive(Clone, Default)]
pub struct TypeMeta {
    hooks: ReplaceHooks,
    serializer: Option<Arc<dyn Serializer>>,
}

impl TypeMeta {
    /// Creates empty metadata: no hooks, default serializer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches substitution/resolution hooks.
    #[must_use]
    pub fn with_hooks(mut self, hooks: ReplaceHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Overrides the serializer bound for the class.
    #[must_use]
    pub fn with_serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.serializer = Some(serializer);
        self
    }
}

impl fmt::Debug for TypeMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeMeta")
            .field("hooks", &self.hooks)
            .field("serializer", &self.serializer.as_ref().map(|_| "<custom>"))
            .finish()
    }
}

/// The serializer to bind when rebinding a class explicitly.
#[derive(Clone)]
pub enum SerializerKind {
    /// The default field-wise serializer.
    Field,
    /// The substitution/resolution protocol around the field-wise
    /// serializer, using the class's registered hooks.
    ReplaceResolve,
    /// A serializer that fails every operation with a security error; the
    /// policy installs this when a class is disallowed.
    Rejecting,
    /// A caller-supplied serializer.
    Custom(Arc<dyn Serializer>),
}

impl fmt::Debug for SerializerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field => f.write_str("Field"),
            Self::ReplaceResolve => f.write_str("ReplaceResolve"),
            Self::Rejecting => f.write_str("Rejecting"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// One class's live binding: its serializer, numeric type id, and hooks.
#[derive(Clone)]
pub struct Binding {
    class: ClassName,
    type_id: u32,
    serializer: Arc<dyn Serializer>,
    hooks: ReplaceHooks,
}

impl Binding {
    /// The bound class.
    #[must_use]
    pub fn class(&self) -> &ClassName {
        &self.class
    }

    /// The numeric type id assigned at first bind; stable across rebinds
    /// for the registry's lifetime.
    #[must_use]
    pub fn type_id(&self) -> u32 {
        self.type_id
    }

    /// The serializer currently bound for the class.
    #[must_use]
    pub fn serializer(&self) -> &Arc<dyn Serializer> {
        &self.serializer
    }

    /// The class's substitution/resolution hooks, empty unless the binding
    /// runs the replace/resolve protocol.
    #[must_use]
    pub fn hooks(&self) -> &ReplaceHooks {
        &self.hooks
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("class", &self.class)
            .field("type_id", &self.type_id)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

/// Maps class identities to serializer bindings.
///
/// The security policy is consulted on every [`TypeRegistry::resolve`]
/// before any binding is touched; the policy object is passed in explicitly
/// at construction, never reached through ambient state. Binding
/// construction is serialized by the [generation
/// lock](TypeRegistry::generation_lock), which the policy also holds while
/// it swaps bindings of freshly-disallowed classes, so a binding can never
/// be built for a class in the middle of being revoked.
pub struct TypeRegistry {
    checker: Arc<dyn ClassChecker>,
    metas: RwLock<HashMap<ClassName, TypeMeta>>,
    bindings: RwLock<HashMap<ClassName, Binding>>,
    type_ids: RwLock<HashMap<ClassName, u32>>,
    next_type_id: AtomicU32,
    generation: Mutex<()>,
}

impl TypeRegistry {
    /// Creates a registry gated by the given policy.
    #[must_use]
    pub fn new(checker: Arc<dyn ClassChecker>) -> Self {
        Self {
            checker,
            metas: RwLock::new(HashMap::new()),
            bindings: RwLock::new(HashMap::new()),
            type_ids: RwLock::new(HashMap::new()),
            next_type_id: AtomicU32::new(0),
            generation: Mutex::new(()),
        }
    }

    /// The policy gating this registry.
    #[must_use]
    pub fn checker(&self) -> &Arc<dyn ClassChecker> {
        &self.checker
    }

    /// Registers a class. Replaces any earlier registration and drops the
    /// class's current binding so the next resolve rebuilds it from the new
    /// metadata.
    pub fn register(&self, class: impl Into<ClassName>, meta: TypeMeta) {
        let class = class.into();
        self.metas.write().insert(class.clone(), meta);
        self.bindings.write().remove(&class);
    }

    /// Resolves a class to its binding, consulting the security policy
    /// first and lazily building the binding under the generation lock on
    /// first use.
    pub fn resolve(&self, class_name: &str) -> Result<Binding, Error> {
        if !self.checker.check_class(self, class_name)? {
            return Err(InsecureError::Forbidden(class_name.into()).into());
        }

        if let Some(binding) = self.bindings.read().get(class_name) {
            return Ok(binding.clone());
        }

        let _generation = self.generation.lock();
        if let Some(binding) = self.bindings.read().get(class_name) {
            return Ok(binding.clone());
        }

        let meta = self
            .metas
            .read()
            .get(class_name)
            .cloned()
            .ok_or_else(|| Error::UnknownClass(class_name.into()))?;

        let class = ClassName::from(class_name);
        let kind = match &meta.serializer {
            Some(custom) => SerializerKind::Custom(custom.clone()),
            None if meta.hooks.is_empty() => SerializerKind::Field,
            None => SerializerKind::ReplaceResolve,
        };
        let binding = self.make_binding(&class, &kind, meta.hooks);
        self.bindings.write().insert(class, binding.clone());
        Ok(binding)
    }

    /// Rebinds one class to the given serializer kind. Classes unknown to
    /// the registry are ignored: rebinding targets what is already known,
    /// future lookups go through [`TypeRegistry::resolve`] and the policy.
    pub fn set_serializer(&self, class_name: &str, kind: &SerializerKind) {
        let known = self.bindings.read().contains_key(class_name)
            || self.metas.read().contains_key(class_name);
        if !known {
            return;
        }

        let class = ClassName::from(class_name);
        let hooks = match kind {
            SerializerKind::ReplaceResolve => self
                .metas
                .read()
                .get(class_name)
                .map(|meta| meta.hooks)
                .unwrap_or_default(),
            _ => ReplaceHooks::default(),
        };
        let binding = self.make_binding(&class, kind, hooks);
        log::debug!("rebinding class `{class}` to {kind:?} serializer");
        self.bindings.write().insert(class, binding);
    }

    /// Rebinds every currently-known class matching `prefix`.
    pub fn set_serializers(&self, prefix: &str, kind: &SerializerKind) {
        let mut matching: Vec<ClassName> = self
            .metas
            .read()
            .keys()
            .chain(self.bindings.read().keys())
            .filter(|class| class.as_str().starts_with(prefix))
            .cloned()
            .collect();
        matching.sort_unstable();
        matching.dedup();

        for class in matching {
            self.set_serializer(class.as_str(), kind);
        }
    }

    /// The lock serializing binding construction; held by the policy while
    /// it revokes bindings so generation and revocation cannot race.
    pub fn generation_lock(&self) -> MutexGuard<'_, ()> {
        self.generation.lock()
    }

    fn make_binding(
        &self,
        class: &ClassName,
        kind: &SerializerKind,
        hooks: ReplaceHooks,
    ) -> Binding {
        let (serializer, hooks): (Arc<dyn Serializer>, ReplaceHooks) = match kind {
            SerializerKind::Field => {
                (Arc::new(FieldSerializer), ReplaceHooks::default())
            }
            SerializerKind::ReplaceResolve => {
                (Arc::new(ReplaceResolveSerializer::new(hooks)), hooks)
            }
            SerializerKind::Rejecting => (
                Arc::new(RejectingSerializer::new(class.clone())),
                ReplaceHooks::default(),
            ),
            SerializerKind::Custom(custom) => {
                (custom.clone(), ReplaceHooks::default())
            }
        };

        Binding {
            class: class.clone(),
            type_id: self.type_id_for(class),
            serializer,
            hooks,
        }
    }

    fn type_id_for(&self, class: &ClassName) -> u32 {
        if let Some(id) = self.type_ids.read().get(class) {
            return *id;
        }
        let mut ids = self.type_ids.write();
        *ids.entry(class.clone()).or_insert_with(|| {
            self.next_type_id.fetch_add(1, Ordering::Relaxed)
        })
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("classes", &self.metas.read().len())
            .field("bindings", &self.bindings.read().len())
            .finish_non_exhaustive()
    }
}
