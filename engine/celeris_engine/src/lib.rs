//! The celeris engine: a cycle-safe binary object-graph codec with a
//! per-class substitution/resolution protocol and an allow/disallow-list
//! security policy gating every class it touches.
//!
//! The three entry points live on [`Codec`]: `write` encodes a [`Value`]
//! graph (self-references, mutual cycles, and aliasing included) to a
//! compact binary form, `read` decodes it back with reference identity
//! intact, and `copy` duplicates a graph in memory under the same identity
//! guarantees. Classes registered with hooks may substitute a
//! different value for themselves on write and reconstruct the final object
//! on read; the engine reconciles the reference table so aliasing survives
//! even when a hook changes an object's identity mid-graph.
//!
//! ```
//! use std::sync::Arc;
//!
//! use celeris_engine::{
//!     AllowListChecker, CheckLevel, Codec, Object, ObjectRef, TypeMeta,
//!     TypeRegistry, Value,
//! };
//!
//! let checker = Arc::new(AllowListChecker::new(CheckLevel::Disable));
//! let registry = Arc::new(TypeRegistry::new(checker));
//! registry.register("demo.Node", TypeMeta::new());
//!
//! let codec = Codec::new(registry);
//!
//! // a self-referential node survives the round trip with its cycle intact
//! let node = ObjectRef::new(Object::new("demo.Node").with("name", "root"));
//! node.set("next", node.clone());
//!
//! let bytes = codec.to_bytes(&Value::Object(node)).unwrap();
//! let decoded = codec.from_bytes(&bytes).unwrap();
//!
//! let root = decoded.as_object().unwrap();
//! let Some(Value::Object(next)) = root.get("next") else { panic!() };
//! assert!(next.same_as(root));
//! ```

pub mod codec;
pub mod context;
pub mod error;
pub mod policy;
pub mod refs;
pub mod registry;
pub mod serializer;

mod wire;

pub use celeris_graph::{ClassName, Object, ObjectId, ObjectRef, Value};

pub use crate::{
    codec::Codec,
    context::{CopyContext, Limits, ReadContext, WriteContext},
    error::{Error, HookError, InsecureError},
    policy::{AllowListChecker, CheckLevel, ClassChecker},
    refs::{CopyTable, RefHandle, RefReader, RefWriter},
    registry::{
        Binding, ReplaceHooks, ResolveFn, SerializerKind, SubstituteFn, TypeMeta,
        TypeRegistry,
    },
    serializer::{
        FieldSerializer, RejectingSerializer, ReplaceResolveSerializer, Serializer,
    },
};
