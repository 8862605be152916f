//! The class security policy: allow/disallow lists with live invalidation
//! of already-bound serializers.
//!
//! Accepting attacker-controlled class names is the classic remote-code-
//! execution vector for graph deserializers, so every resolve of a class
//! goes through a [`ClassChecker`] first. The stock implementation,
//! [`AllowListChecker`], keeps exact-match and prefix rule sets for both an
//! allow and a disallow list, and pushes a tightened disallow list into
//! every registered [`TypeRegistry`] immediately, swapping the serializers
//! of already-bound matching classes for rejecting ones so no stale
//! permissive binding survives.

use std::{
    collections::HashSet,
    sync::{Arc, Weak},
};

use parking_lot::RwLock;

use crate::{
    error::InsecureError,
    registry::{SerializerKind, TypeRegistry},
};

/// How strictly a policy treats classes it has no explicit rule for.
///
/// Fixed at construction; the rule sets themselves stay mutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum CheckLevel {
    /// Every class is allowed; no lookup is performed.
    Disable,
    /// Disallowed classes fail; classes missing from the allow list are
    /// permitted with a logged warning.
    #[default]
    Warn,
    /// Disallowed classes fail; so does anything missing from the allow
    /// list.
    Strict,
}

/// Decides whether a class may be serialized or deserialized at all.
///
/// A checker shared by several registries must be thread safe; `check_class`
/// runs concurrently with other checks.
pub trait ClassChecker: Send + Sync {
    /// Checks whether `class_name` may be serialized.
    ///
    /// Returns `Ok(true)` to admit the class. A rejection that should carry
    /// a reason is reported as an [`InsecureError`]; `Ok(false)` is a bare
    /// refusal.
    fn check_class(
        &self,
        registry: &TypeRegistry,
        class_name: &str,
    ) -> Result<bool, InsecureError>;
}

/// The wildcard marker a pattern may end with to become a prefix rule.
const WILDCARD: char = '*';

#[derive(Debug, Default)]
struct State {
    allow: HashSet<String>,
    allow_prefixes: HashSet<String>,
    disallow: HashSet<String>,
    disallow_prefixes: HashSet<String>,
    listeners: Vec<Weak<TypeRegistry>>,
}

impl State {
    fn matches(exact: &HashSet<String>, prefixes: &HashSet<String>, class_name: &str) -> bool {
        if exact.contains(class_name) {
            return true;
        }
        prefixes.iter().any(|prefix| class_name.starts_with(prefix.as_str()))
    }
}

/// Allow/disallow-list based [`ClassChecker`].
///
/// Patterns are exact class names, or prefixes when they end with `*`
/// (`"com.acme.*"` matches `"com.acme.Order"` and `"com.acme.sub.Item"`).
/// Rule mutation takes the write lock; checks run concurrently under the
/// read lock.
#[derive(Debug)]
pub struct AllowListChecker {
    check_level: CheckLevel,
    state: RwLock<State>,
}

impl Default for AllowListChecker {
    fn default() -> Self {
        Self::new(CheckLevel::default())
    }
}

impl AllowListChecker {
    /// Creates a checker with the given strictness.
    #[must_use]
    pub fn new(check_level: CheckLevel) -> Self {
        Self { check_level, state: RwLock::new(State::default()) }
    }

    /// The strictness this checker was built with.
    #[must_use]
    pub fn check_level(&self) -> CheckLevel {
        self.check_level
    }

    /// Adds a class name or `*`-terminated prefix to the allow list.
    pub fn allow_class(&self, pattern: &str) {
        let mut state = self.state.write();
        match pattern.strip_suffix(WILDCARD) {
            Some(prefix) => {
                state.allow_prefixes.insert(prefix.to_owned());
            }
            None => {
                state.allow.insert(pattern.to_owned());
            }
        }
    }

    /// Adds a class name or `*`-terminated prefix to the disallow list, then
    /// rebinds every already-known matching class on every registered
    /// listener to a rejecting serializer.
    ///
    /// The rebinding runs under each registry's generation lock, so a
    /// serializer being built for a matching class concurrently cannot slip
    /// past the tightened policy.
    pub fn disallow_class(&self, pattern: &str) {
        let mut state = self.state.write();

        // drop listeners whose registry is gone; membership must not keep a
        // registry alive
        state.listeners.retain(|listener| listener.strong_count() > 0);

        match pattern.strip_suffix(WILDCARD) {
            Some(prefix) => {
                state.disallow_prefixes.insert(prefix.to_owned());
                for listener in &state.listeners {
                    let Some(registry) = listener.upgrade() else {
                        continue;
                    };
                    let _generation = registry.generation_lock();
                    registry.set_serializers(prefix, &SerializerKind::Rejecting);
                }
            }
            None => {
                state.disallow.insert(pattern.to_owned());
                for listener in &state.listeners {
                    let Some(registry) = listener.upgrade() else {
                        continue;
                    };
                    let _generation = registry.generation_lock();
                    registry.set_serializer(pattern, &SerializerKind::Rejecting);
                }
            }
        }
    }

    /// Registers a registry to receive future [`disallow_class`] propagation.
    ///
    /// Only a weak reference is kept; a dropped registry is pruned on the
    /// next disallow.
    ///
    /// [`disallow_class`]: AllowListChecker::disallow_class
    pub fn add_listener(&self, registry: &Arc<TypeRegistry>) {
        self.state.write().listeners.push(Arc::downgrade(registry));
    }

    fn in_disallow_list(&self, class_name: &str) -> bool {
        let state = self.state.read();
        State::matches(&state.disallow, &state.disallow_prefixes, class_name)
    }

    fn in_allow_list(&self, class_name: &str) -> bool {
        let state = self.state.read();
        State::matches(&state.allow, &state.allow_prefixes, class_name)
    }
}

impl ClassChecker for AllowListChecker {
    fn check_class(
        &self,
        _registry: &TypeRegistry,
        class_name: &str,
    ) -> Result<bool, InsecureError> {
        match self.check_level {
            CheckLevel::Disable => Ok(true),
            CheckLevel::Warn => {
                if self.in_disallow_list(class_name) {
                    return Err(InsecureError::Forbidden(class_name.into()));
                }
                if !self.in_allow_list(class_name) {
                    log::warn!(
                        "class `{class_name}` is not in the allow list; check whether \
                         objects of this class are allowed for serialization"
                    );
                }
                Ok(true)
            }
            CheckLevel::Strict => {
                if self.in_disallow_list(class_name) {
                    return Err(InsecureError::Forbidden(class_name.into()));
                }
                if !self.in_allow_list(class_name) {
                    return Err(InsecureError::NotAllowed(class_name.into()));
                }
                Ok(true)
            }
        }
    }
}
