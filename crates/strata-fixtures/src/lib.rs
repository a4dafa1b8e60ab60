// SPDX-License-Identifier: Apache-2.0
//! Shared fixtures for the strata workspace tests.
//!
//! One small, stable dataset: a chain of economists reachable from the
//! root record. Every integration test builds on the same shape so
//! assertions stay easy to cross-check.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]

use std::sync::Arc;

use strata_core::selection::{
    linked, linked_with_args, response_key, scalar, Argument, ArgumentValue, SelectionSet,
    Variables,
};
use strata_core::{
    Engine, EngineConfig, FieldValue, LayerId, LayeredStore, Link, ReaderNode, ResponseObject,
    ResponseValue, ScalarValue, TypeName, UpdateFn,
};

/// The root type every fixture store uses.
pub const ROOT_TYPENAME: &str = "Query";

/// Link to the fixture root record.
#[must_use]
pub fn root() -> Link {
    Link::root(ROOT_TYPENAME)
}

/// Link to the economist with the given index.
#[must_use]
pub fn economist(index: usize) -> Link {
    Link::new("Economist", index.to_string())
}

/// Selection tree for the economists query:
/// `{ me { id name successor { id name } } you { id name } }`.
#[must_use]
pub fn economists_selection() -> SelectionSet {
    vec![
        linked(
            "me",
            vec![
                scalar("id"),
                scalar("name"),
                linked("successor", vec![scalar("id"), scalar("name")]),
            ],
        ),
        linked("you", vec![scalar("id"), scalar("name")]),
    ]
}

/// Selection for `{ node(id: $id) { id name } }`.
#[must_use]
pub fn node_selection() -> SelectionSet {
    vec![linked_with_args(
        "node",
        vec![Argument::new("id", ArgumentValue::Variable("id".into()))],
        vec![scalar("id"), scalar("name")],
    )]
}

fn economist_object(id: &str, name: &str) -> ResponseObject {
    ResponseObject::new()
        .with("__typename", ResponseValue::Scalar(ScalarValue::from("Economist")))
        .with("id", ResponseValue::Scalar(ScalarValue::from(id)))
        .with("name", ResponseValue::Scalar(ScalarValue::from(name)))
}

/// Network response matching [`economists_selection`]: Jeremy Bentham
/// (me, succeeded by John Stuart Mill) and John Stuart Mill (you).
#[must_use]
pub fn economists_response() -> ResponseObject {
    ResponseObject::new()
        .with(
            "me",
            ResponseValue::Object(economist_object("0", "Jeremy Bentham").with(
                "successor",
                ResponseValue::Object(economist_object("1", "John Stuart Mill")),
            )),
        )
        .with(
            "you",
            ResponseValue::Object(economist_object("1", "John Stuart Mill")),
        )
}

/// Response for [`node_selection`] resolving to the given economist,
/// keyed under the field's alias-encoded response key.
#[must_use]
pub fn node_response(id: &str, name: &str) -> ResponseObject {
    let key = response_key(
        "node",
        &[Argument::new("id", ArgumentValue::Variable("id".into()))],
    );
    ResponseObject::new().with(key, ResponseValue::Object(economist_object(id, name)))
}

/// A store whose base holds the full three-economist chain plus `me`
/// and `you` links from the root. Henry Sidgwick (index 2) is only
/// reachable through Mill's `successor` field.
#[must_use]
pub fn economists_store() -> LayeredStore {
    let mut store = LayeredStore::new(&TypeName::new(ROOT_TYPENAME));
    let base = store.base();
    let names = ["Jeremy Bentham", "John Stuart Mill", "Henry Sidgwick"];
    for (index, name) in names.iter().enumerate() {
        let link = economist(index);
        let _ = store.write_field(
            base,
            &link,
            "__typename",
            FieldValue::Scalar(ScalarValue::from("Economist")),
        );
        let _ = store.write_field(
            base,
            &link,
            "id",
            FieldValue::Scalar(ScalarValue::from(index.to_string())),
        );
        let _ = store.write_field(
            base,
            &link,
            "name",
            FieldValue::Scalar(ScalarValue::from(*name)),
        );
        if index > 0 {
            let _ = store.write_field(
                base,
                &link,
                "predecessor",
                FieldValue::Link(economist(index - 1)),
            );
        }
        if index + 1 < names.len() {
            let _ = store.write_field(
                base,
                &link,
                "successor",
                FieldValue::Link(economist(index + 1)),
            );
        }
    }
    let _ = store.write_field(base, &root(), "me", FieldValue::Link(economist(0)));
    let _ = store.write_field(base, &root(), "you", FieldValue::Link(economist(1)));
    store
}

/// An engine seeded by normalizing [`economists_response`].
#[must_use]
pub fn economists_engine() -> Engine {
    let mut engine = Engine::new(EngineConfig::default());
    let _ = engine.normalize_response(
        &economists_selection(),
        &economists_response(),
        &[],
        &Variables::new(),
    );
    engine
}

/// Reader tree mirroring [`economists_selection`].
#[must_use]
pub fn economists_reader() -> Vec<ReaderNode> {
    vec![
        ReaderNode::linked(
            "me",
            vec![
                ReaderNode::scalar("name"),
                ReaderNode::linked("successor", vec![ReaderNode::scalar("name")]),
            ],
        ),
        ReaderNode::linked("you", vec![ReaderNode::scalar("name")]),
    ]
}

/// The `count` field on the root record, read through the chain
/// anchored at `layer`. Missing reads as zero.
#[must_use]
pub fn read_count(store: &LayeredStore, layer: LayerId) -> i64 {
    match store.field(layer, &root(), "count").ok().flatten() {
        Some(FieldValue::Scalar(ScalarValue::Int(i))) => *i,
        _ => 0,
    }
}

/// An update that maps the root `count` field through `f`, treating a
/// missing value as zero.
pub fn count_update(f: impl Fn(i64) -> i64 + 'static) -> UpdateFn {
    Arc::new(move |store, layer| {
        let next = f(read_count(store, layer));
        let _ = store.write_field(
            layer,
            &root(),
            "count",
            FieldValue::Scalar(ScalarValue::Int(next)),
        );
        [root()].into_iter().collect()
    })
}

/// An update that writes a fixed root `count`.
#[must_use]
pub fn set_count(value: i64) -> UpdateFn {
    count_update(move |_| value)
}
