//! Error types for the engine.

use celeris_graph::ClassName;

/// A security rejection: the policy refuses to let a class anywhere near the
/// serializer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InsecureError {
    /// The class matches the disallow list.
    #[error("class `{0}` is forbidden for serialization")]
    Forbidden(ClassName),

    /// The class is absent from the allow list under a strict policy.
    #[error(
        "class `{0}` is not in the allow list for serialization; add it with \
         `AllowListChecker::allow_class` if it is trusted"
    )]
    NotAllowed(ClassName),

    /// The class was disallowed after being bound; its serializer now
    /// rejects every operation.
    #[error("class `{0}` is not allowed for serialization")]
    Rejected(ClassName),
}

/// An error raised by a user-supplied substitution or resolution hook.
///
/// Hooks abort the whole top-level operation; the engine wraps this in
/// [`Error::Hook`] together with the class and hook stage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct HookError(String);

impl HookError {
    /// Creates a hook error from any displayable message.
    pub fn new(message: impl std::fmt::Display) -> Self {
        Self(message.to_string())
    }
}

/// Any failure of a top-level serialize, deserialize, or copy call.
///
/// All of these abort the call synchronously; nothing is retried and no
/// reference-table entry is ever left half-patched.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The underlying buffer failed or the input was undersized.
    #[error(transparent)]
    Io(#[from] celeris_io::Error),

    /// The security policy rejected a class.
    #[error(transparent)]
    Insecure(#[from] InsecureError),

    /// A class with no registration was encountered.
    #[error("class `{0}` has no registration in the type registry")]
    UnknownClass(ClassName),

    /// The input carried a value tag the engine does not know.
    #[error("unknown value tag {0:#04x} in input")]
    UnknownTag(u8),

    /// The input back-referenced a handle that was never issued.
    #[error("back-reference to unknown handle {0}")]
    BadHandle(u64),

    /// The input referenced a class-dictionary slot that was never filled.
    #[error("class-dictionary index {0} out of range")]
    BadClassRef(u64),

    /// A reserved object that was never given a value reached the writer.
    #[error("cannot serialize a reserved object that was never given a value")]
    UnresolvedObject,

    /// Value nesting outran the configured depth limit.
    #[error("value nesting exceeds the configured depth limit {0}")]
    DepthLimitExceeded(usize),

    /// A substitution or resolution hook failed.
    #[error("{stage} hook of class `{class}` failed: {source}")]
    Hook {
        /// The class whose hook was running.
        class: ClassName,
        /// Which hook failed: `"substitution"` or `"resolution"`.
        stage: &'static str,
        /// The hook's own error.
        #[source]
        source: HookError,
    },
}
