//! End-to-end tests for the codec: round trips, cycles, aliasing, the
//! substitution/resolution protocol, and the security policy.

use std::sync::Arc;

use celeris_graph::{Object, ObjectRef, Value};
use proptest::{
    collection, prop_assert_eq, prop_oneof, proptest,
    strategy::{Just, Strategy},
};

use super::Codec;
use crate::{
    context::Limits,
    error::{Error, HookError, InsecureError},
    policy::{AllowListChecker, CheckLevel},
    registry::{ReplaceHooks, TypeMeta, TypeRegistry},
};

/// A codec whose policy admits everything; each test registers the classes
/// it needs on the returned registry.
fn open_codec() -> (Codec, Arc<TypeRegistry>) {
    let checker = Arc::new(AllowListChecker::new(CheckLevel::Disable));
    let registry = Arc::new(TypeRegistry::new(checker));
    (Codec::new(registry.clone()), registry)
}

fn round_trip(codec: &Codec, value: &Value) -> Value {
    let bytes = codec.to_bytes(value).unwrap();
    codec.from_bytes(&bytes).unwrap()
}

fn object(value: &Value) -> &ObjectRef {
    value.as_object().expect("expected an object")
}

fn field_object(value: &Value, name: &str) -> ObjectRef {
    object(value)
        .get(name)
        .and_then(|field| field.into_object().ok())
        .expect("expected an object field")
}

#[test]
fn primitives_round_trip_without_any_registration() {
    let (codec, _) = open_codec();

    for value in [
        Value::Null,
        Value::Bool(true),
        Value::Bool(false),
        Value::Int(0),
        Value::Int(-1),
        Value::Int(i64::MAX),
        Value::Int(i64::MIN),
        Value::Float(2.5),
        Value::Str("crab 🦀".to_owned()),
        Value::Bytes(vec![0, 255, 3]),
        Value::List(vec![Value::Int(1), Value::Null, Value::Str(String::new())]),
    ] {
        assert_eq!(round_trip(&codec, &value), value);
    }
}

#[test]
fn flat_objects_round_trip_structurally() {
    let (codec, registry) = open_codec();
    registry.register("acme.Order", TypeMeta::new());

    let order = Value::Object(ObjectRef::new(
        Object::new("acme.Order")
            .with("id", 42i64)
            .with("open", true)
            .with("note", "rush"),
    ));

    let decoded = round_trip(&codec, &order);
    assert_eq!(decoded, order);
    assert_eq!(object(&decoded).class(), Some("acme.Order".into()));
    // a fresh graph, not the input one
    assert!(!object(&decoded).same_as(object(&order)));
}

#[test]
fn writing_an_unregistered_class_fails() {
    let (codec, _) = open_codec();
    let stray = Value::Object(ObjectRef::new(Object::new("nowhere.Missing")));
    assert!(matches!(
        codec.to_bytes(&stray),
        Err(Error::UnknownClass(class)) if class.as_str() == "nowhere.Missing"
    ));
}

#[test]
fn self_reference_survives_the_round_trip() {
    let (codec, registry) = open_codec();
    registry.register("graph.Node", TypeMeta::new());

    let node = ObjectRef::new(Object::new("graph.Node").with("name", "root"));
    node.set("next", node.clone());

    let decoded = round_trip(&codec, &Value::Object(node));
    let next = field_object(&decoded, "next");
    assert!(next.same_as(object(&decoded)));
    assert_eq!(object(&decoded).get("name"), Some(Value::Str("root".into())));
}

#[test]
fn two_cycles_keep_their_shape() {
    let (codec, registry) = open_codec();
    registry.register("graph.Node", TypeMeta::new());

    let a = ObjectRef::new(Object::new("graph.Node").with("name", "a"));
    let b = ObjectRef::new(Object::new("graph.Node").with("name", "b"));
    a.set("next", b.clone());
    b.set("next", a.clone());

    let decoded = round_trip(&codec, &Value::Object(a));
    let decoded_a = object(&decoded);
    let decoded_b = field_object(&decoded, "next");

    assert!(!decoded_b.same_as(decoded_a));
    assert!(decoded_b
        .get("next")
        .and_then(|v| v.into_object().ok())
        .unwrap()
        .same_as(decoded_a));
    assert_eq!(decoded_a.get("name"), Some(Value::Str("a".into())));
    assert_eq!(decoded_b.get("name"), Some(Value::Str("b".into())));
}

fn four_cycle(class: &str) -> Vec<ObjectRef> {
    let nodes: Vec<ObjectRef> = (0..4)
        .map(|index| {
            ObjectRef::new(Object::new(class).with("index", index as i64))
        })
        .collect();
    for (index, node) in nodes.iter().enumerate() {
        node.set("next", nodes[(index + 1) % 4].clone());
    }
    nodes
}

fn walk(start: &ObjectRef, steps: usize) -> ObjectRef {
    let mut current = start.clone();
    for _ in 0..steps {
        current = current
            .get("next")
            .and_then(|v| v.into_object().ok())
            .expect("cycle is broken");
    }
    current
}

#[test]
fn four_cycles_keep_their_shape_and_order() {
    let (codec, registry) = open_codec();
    registry.register("graph.Node", TypeMeta::new());

    let nodes = four_cycle("graph.Node");
    let decoded = round_trip(&codec, &Value::Object(nodes[0].clone()));
    let start = object(&decoded);

    for steps in 1..4 {
        let reached = walk(start, steps);
        assert!(!reached.same_as(start));
        assert_eq!(reached.get("index"), Some(Value::Int(steps as i64)));
    }
    assert!(walk(start, 4).same_as(start));
}

#[test]
fn aliased_sub_objects_stay_aliased_after_the_round_trip() {
    let (codec, registry) = open_codec();
    registry.register("acme.Order", TypeMeta::new());
    registry.register("acme.Customer", TypeMeta::new());

    let customer =
        ObjectRef::new(Object::new("acme.Customer").with("name", "ada"));
    let order = Object::new("acme.Order")
        .with("buyer", customer.clone())
        .with("payer", customer);

    let decoded = round_trip(&codec, &Value::Object(ObjectRef::new(order)));
    let buyer = field_object(&decoded, "buyer");
    let payer = field_object(&decoded, "payer");

    assert!(buyer.same_as(&payer));
    // one shared node, not two equal ones: mutating through one alias shows
    // through the other
    buyer.set("name", "grace");
    assert_eq!(payer.get("name"), Some(Value::Str("grace".into())));
}

#[test]
fn copies_are_independent_but_preserve_aliasing() {
    let (codec, registry) = open_codec();
    registry.register("acme.Order", TypeMeta::new());
    registry.register("acme.Customer", TypeMeta::new());

    let customer =
        ObjectRef::new(Object::new("acme.Customer").with("name", "ada"));
    let order = Value::Object(ObjectRef::new(
        Object::new("acme.Order")
            .with("buyer", customer.clone())
            .with("payer", customer.clone()),
    ));

    let copy = codec.copy(&order).unwrap();
    assert_eq!(copy, order);
    assert!(!object(&copy).same_as(object(&order)));

    let buyer = field_object(&copy, "buyer");
    let payer = field_object(&copy, "payer");
    assert!(buyer.same_as(&payer));
    // the shared node was itself copied, not borrowed from the source
    assert!(!buyer.same_as(&customer));
}

#[test]
fn copying_preserves_self_references_and_cycles() {
    let (codec, registry) = open_codec();
    registry.register("graph.Node", TypeMeta::new());

    let node = ObjectRef::new(Object::new("graph.Node"));
    node.set("next", node.clone());
    let copy = codec.copy(&Value::Object(node.clone())).unwrap();
    assert!(!object(&copy).same_as(&node));
    assert!(field_object(&copy, "next").same_as(object(&copy)));

    let nodes = four_cycle("graph.Node");
    let copy = codec.copy(&Value::Object(nodes[0].clone())).unwrap();
    let start = object(&copy);
    assert!(!start.same_as(&nodes[0]));
    for steps in 1..4 {
        assert!(!walk(start, steps).same_as(start));
        assert!(!walk(start, steps).same_as(&nodes[steps]));
    }
    assert!(walk(start, 4).same_as(start));
}

fn identity_substitute(node: &ObjectRef) -> Result<Value, HookError> {
    Ok(Value::Object(node.clone()))
}

fn identity_resolve(node: &ObjectRef) -> Result<Value, HookError> {
    Ok(Value::Object(node.clone()))
}

#[test]
fn identity_hooks_change_nothing() {
    let (codec, registry) = open_codec();
    registry.register(
        "acme.Order",
        TypeMeta::new().with_hooks(ReplaceHooks {
            substitute: Some(identity_substitute),
            resolve: Some(identity_resolve),
        }),
    );

    let order = Value::Object(ObjectRef::new(
        Object::new("acme.Order").with("id", 7i64),
    ));
    assert_eq!(round_trip(&codec, &order), order);
}

// the write side replaces a credential with an opaque proxy; the read side
// reconstructs the credential from the proxy
fn credential_substitute(node: &ObjectRef) -> Result<Value, HookError> {
    let secret = node.get("secret").ok_or_else(|| HookError::new("no secret"))?;
    Ok(Value::Object(ObjectRef::new(
        Object::new("vault.Sealed").with("payload", secret),
    )))
}

fn sealed_resolve(node: &ObjectRef) -> Result<Value, HookError> {
    let payload =
        node.get("payload").ok_or_else(|| HookError::new("no payload"))?;
    Ok(Value::Object(ObjectRef::new(
        Object::new("vault.Credential").with("secret", payload),
    )))
}

fn register_vault(registry: &TypeRegistry) {
    registry.register(
        "vault.Credential",
        TypeMeta::new().with_hooks(ReplaceHooks {
            substitute: Some(credential_substitute),
            resolve: None,
        }),
    );
    registry.register(
        "vault.Sealed",
        TypeMeta::new().with_hooks(ReplaceHooks {
            substitute: None,
            resolve: Some(sealed_resolve),
        }),
    );
}

#[test]
fn substitution_writes_the_proxy_and_resolution_restores_the_original() {
    let (codec, registry) = open_codec();
    register_vault(&registry);

    let credential = Value::Object(ObjectRef::new(
        Object::new("vault.Credential").with("secret", "hunter2"),
    ));

    let bytes = codec.to_bytes(&credential).unwrap();
    // the encoded form names the proxy class, not the original
    let encoded = String::from_utf8_lossy(&bytes).into_owned();
    assert!(encoded.contains("vault.Sealed"));
    assert!(!encoded.contains("vault.Credential"));

    let decoded = codec.from_bytes(&bytes).unwrap();
    assert_eq!(object(&decoded).class(), Some("vault.Credential".into()));
    assert_eq!(
        object(&decoded).get("secret"),
        Some(Value::Str("hunter2".into()))
    );
}

#[test]
fn a_substituted_object_keeps_one_handle_across_repeated_references() {
    let (codec, registry) = open_codec();
    register_vault(&registry);
    registry.register("acme.Config", TypeMeta::new());

    let credential = ObjectRef::new(
        Object::new("vault.Credential").with("secret", "hunter2"),
    );
    let config = Value::Object(ObjectRef::new(
        Object::new("acme.Config")
            .with("primary", credential.clone())
            .with("backup", credential),
    ));

    let decoded = round_trip(&codec, &config);
    let primary = field_object(&decoded, "primary");
    let backup = field_object(&decoded, "backup");
    // aliasing survives substitution-and-resolution: both fields point at
    // one reconstructed credential
    assert!(primary.same_as(&backup));
    assert_eq!(primary.class(), Some("vault.Credential".into()));
}

fn collapse_substitute(node: &ObjectRef) -> Result<Value, HookError> {
    node.get("target").ok_or_else(|| HookError::new("no target field"))
}

#[test]
fn substitution_may_return_another_node_of_the_graph() {
    let (codec, registry) = open_codec();
    registry.register(
        "graph.Indirect",
        TypeMeta::new().with_hooks(ReplaceHooks {
            substitute: Some(collapse_substitute),
            resolve: None,
        }),
    );

    // the node substitutes itself with the node it points at
    let node = ObjectRef::new(Object::new("graph.Indirect"));
    node.set("target", node.clone());

    let decoded = round_trip(&codec, &Value::Object(node));
    let target = field_object(&decoded, "target");
    assert!(target.same_as(object(&decoded)));
}

#[test]
fn a_mutual_substitution_chain_settles_instead_of_spinning() {
    let (codec, registry) = open_codec();
    registry.register(
        "graph.Indirect",
        TypeMeta::new().with_hooks(ReplaceHooks {
            substitute: Some(collapse_substitute),
            resolve: None,
        }),
    );

    // a and b each substitute themselves with the other
    let a = ObjectRef::new(Object::new("graph.Indirect").with("name", "a"));
    let b = ObjectRef::new(Object::new("graph.Indirect").with("name", "b"));
    a.set("target", b.clone());
    b.set("target", a.clone());

    let decoded = round_trip(&codec, &Value::Object(a));
    // the collapsed result is a node whose target is itself
    let target = field_object(&decoded, "target");
    assert!(target.same_as(object(&decoded)));
}

fn int_substitute(_: &ObjectRef) -> Result<Value, HookError> {
    Ok(Value::Int(1))
}

#[test]
fn substitution_may_replace_an_object_with_a_plain_value() {
    let (codec, registry) = open_codec();
    registry.register(
        "odd.One",
        TypeMeta::new().with_hooks(ReplaceHooks {
            substitute: Some(int_substitute),
            resolve: None,
        }),
    );

    let node = Value::Object(ObjectRef::new(Object::new("odd.One")));
    assert_eq!(round_trip(&codec, &node), Value::Int(1));
}

fn failing_substitute(_: &ObjectRef) -> Result<Value, HookError> {
    Err(HookError::new("refusing to be written"))
}

fn failing_resolve(_: &ObjectRef) -> Result<Value, HookError> {
    Err(HookError::new("refusing to come back"))
}

#[test]
fn hook_failures_abort_the_whole_call() {
    let (codec, registry) = open_codec();
    registry.register(
        "sour.Write",
        TypeMeta::new().with_hooks(ReplaceHooks {
            substitute: Some(failing_substitute),
            resolve: None,
        }),
    );
    registry.register(
        "sour.Read",
        TypeMeta::new().with_hooks(ReplaceHooks {
            substitute: None,
            resolve: Some(failing_resolve),
        }),
    );

    let unwritable = Value::Object(ObjectRef::new(Object::new("sour.Write")));
    assert!(matches!(
        codec.to_bytes(&unwritable),
        Err(Error::Hook { stage: "substitution", .. })
    ));

    let unreadable = Value::Object(ObjectRef::new(
        Object::new("sour.Read").with("v", 1i64),
    ));
    let bytes = codec.to_bytes(&unreadable).unwrap();
    assert!(matches!(
        codec.from_bytes(&bytes),
        Err(Error::Hook { stage: "resolution", .. })
    ));
}

#[test]
fn hooks_apply_only_to_the_class_they_were_registered_for() {
    let (codec, registry) = open_codec();
    registry.register(
        "sour.Write",
        TypeMeta::new().with_hooks(ReplaceHooks {
            substitute: Some(failing_substitute),
            resolve: None,
        }),
    );
    // same name prefix, no hooks of its own: nothing is inherited
    registry.register("sour.WriteChild", TypeMeta::new());

    let child = Value::Object(ObjectRef::new(
        Object::new("sour.WriteChild").with("v", 2i64),
    ));
    assert_eq!(round_trip(&codec, &child), child);
}

#[test]
fn copying_does_not_run_the_hooks() {
    let (codec, registry) = open_codec();
    registry.register(
        "sour.Write",
        TypeMeta::new().with_hooks(ReplaceHooks {
            substitute: Some(failing_substitute),
            resolve: Some(failing_resolve),
        }),
    );

    let node = Value::Object(ObjectRef::new(
        Object::new("sour.Write").with("v", 3i64),
    ));
    let copy = codec.copy(&node).unwrap();
    assert_eq!(copy, node);
    assert!(!object(&copy).same_as(object(&node)));
}

#[test]
fn tightening_the_policy_revokes_a_class_already_in_use() {
    let checker = Arc::new(AllowListChecker::new(CheckLevel::Disable));
    let registry = Arc::new(TypeRegistry::new(checker.clone()));
    checker.add_listener(&registry);
    let codec = Codec::new(registry.clone());

    registry.register("danger.Exec", TypeMeta::new());
    let node = Value::Object(ObjectRef::new(
        Object::new("danger.Exec").with("cmd", "rm"),
    ));
    let bytes = codec.to_bytes(&node).unwrap();

    checker.disallow_class("danger.*");

    assert!(matches!(
        codec.to_bytes(&node),
        Err(Error::Insecure(InsecureError::Rejected(_)))
    ));
    assert!(matches!(
        codec.from_bytes(&bytes),
        Err(Error::Insecure(InsecureError::Rejected(_)))
    ));
}

#[test]
fn a_strict_policy_gates_both_directions_until_allowed() {
    let checker = Arc::new(AllowListChecker::new(CheckLevel::Strict));
    let registry = Arc::new(TypeRegistry::new(checker.clone()));
    let codec = Codec::new(registry.clone());

    registry.register("acme.Order", TypeMeta::new());
    let order = Value::Object(ObjectRef::new(
        Object::new("acme.Order").with("id", 1i64),
    ));

    assert!(matches!(
        codec.to_bytes(&order),
        Err(Error::Insecure(InsecureError::NotAllowed(_)))
    ));

    checker.allow_class("acme.*");
    let bytes = codec.to_bytes(&order).unwrap();
    assert_eq!(codec.from_bytes(&bytes).unwrap(), order);
}

#[test]
fn malformed_input_fails_fast() {
    let (codec, registry) = open_codec();
    registry.register("acme.Order", TypeMeta::new());

    // unknown tag
    assert!(matches!(
        codec.from_bytes(&[0xEE]),
        Err(Error::UnknownTag(0xEE))
    ));
    // truncated input
    assert!(matches!(
        codec.from_bytes(&[]),
        Err(Error::Io(celeris_io::Error::UnexpectedEof))
    ));
    // a back-reference to a handle that was never issued
    assert!(matches!(
        codec.from_bytes(&[8, 5]),
        Err(Error::BadHandle(5))
    ));
    // a class-dictionary slot that was never filled
    assert!(matches!(
        codec.from_bytes(&[9, 7]),
        Err(Error::BadClassRef(6))
    ));
}

#[test]
fn nesting_depth_is_bounded_in_every_direction() {
    let (codec, registry) = open_codec();
    registry.register("acme.Order", TypeMeta::new());
    let codec = codec.with_limits(Limits { max_depth: 16, ..Limits::default() });

    let mut deep = Value::Int(0);
    for _ in 0..64 {
        deep = Value::List(vec![deep]);
    }
    assert!(matches!(
        codec.to_bytes(&deep),
        Err(Error::DepthLimitExceeded(16))
    ));
    assert!(matches!(
        codec.copy(&deep),
        Err(Error::DepthLimitExceeded(16))
    ));

    // hand-rolled input: 64 nested single-element lists around a null
    let mut bytes = Vec::new();
    for _ in 0..64 {
        bytes.extend_from_slice(&[7, 1]);
    }
    bytes.push(0);
    assert!(matches!(
        codec.from_bytes(&bytes),
        Err(Error::DepthLimitExceeded(16))
    ));
}

#[test]
fn the_class_dictionary_writes_each_name_once() {
    let (codec, registry) = open_codec();
    registry.register("acme.Customer", TypeMeta::new());

    let list = Value::List(
        (0..4)
            .map(|index| {
                Value::Object(ObjectRef::new(
                    Object::new("acme.Customer").with("id", index as i64),
                ))
            })
            .collect(),
    );

    let bytes = codec.to_bytes(&list).unwrap();
    let name_occurrences = bytes
        .windows("acme.Customer".len())
        .filter(|window| *window == "acme.Customer".as_bytes())
        .count();
    assert_eq!(name_occurrences, 1);

    assert_eq!(codec.from_bytes(&bytes).unwrap(), list);
}

fn primitive_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        proptest::bool::ANY.prop_map(Value::Bool),
        proptest::num::i64::ANY.prop_map(Value::Int),
        "[a-z0-9 🦀]{0,12}".prop_map(Value::Str),
        collection::vec(proptest::num::u8::ANY, 0..16).prop_map(Value::Bytes),
    ];
    leaf.prop_recursive(3, 32, 4, |inner| {
        collection::vec(inner, 0..4).prop_map(Value::List)
    })
}

proptest! {
    #[test]
    fn arbitrary_primitive_values_round_trip(value in primitive_value()) {
        let (codec, _) = open_codec();
        let bytes = codec.to_bytes(&value).unwrap();
        prop_assert_eq!(codec.from_bytes(&bytes).unwrap(), value);
    }
}
