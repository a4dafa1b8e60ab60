// SPDX-License-Identifier: Apache-2.0

#![allow(missing_docs)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use strata_core::selection::Variables;
use strata_core::{DataValue, ReadOutcome, ReaderNode, ResponseError, ScalarValue, PathSegment};
use strata_fixtures::{
    count_update, economist, economists_engine, economists_response, economists_selection, root,
};

fn me_name_ast() -> Arc<Vec<ReaderNode>> {
    Arc::new(vec![ReaderNode::linked(
        "me",
        vec![ReaderNode::scalar("name")],
    )])
}

fn renamed_response(name: &str) -> strata_core::ResponseObject {
    use strata_core::{ResponseObject, ResponseValue};
    ResponseObject::new().with(
        "me",
        ResponseValue::Object(
            ResponseObject::new()
                .with("__typename", "Economist")
                .with("id", "0")
                .with("name", name)
                .with(
                    "successor",
                    ResponseValue::Object(
                        ResponseObject::new()
                            .with("__typename", "Economist")
                            .with("id", "1")
                            .with("name", "John Stuart Mill"),
                    ),
                ),
        ),
    )
}

#[test]
fn the_initial_read_is_returned_on_subscribe() {
    let mut engine = economists_engine();
    let subscribed = engine.subscribe_fragment(
        me_name_ast(),
        engine.root_link(),
        Variables::new(),
        Box::new(|_| {}),
    );
    let initial = subscribed
        .ok()
        .and_then(|(_, outcome)| outcome.into_success());
    let name = initial
        .and_then(|read| {
            read.item
                .as_object()
                .and_then(|o| o.get("me"))
                .and_then(DataValue::as_object)
                .and_then(|o| o.get("name"))
                .and_then(DataValue::as_scalar)
                .and_then(ScalarValue::as_str)
                .map(str::to_owned)
        })
        .unwrap_or_default();
    assert_eq!(name, "Jeremy Bentham");
}

#[test]
fn fragments_wake_only_for_data_they_read() {
    let mut engine = economists_engine();
    let seen: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    let subscribed = engine.subscribe_fragment(
        me_name_ast(),
        engine.root_link(),
        Variables::new(),
        Box::new(move |read| {
            let name = read
                .item
                .as_object()
                .and_then(|o| o.get("me"))
                .and_then(DataValue::as_object)
                .and_then(|o| o.get("name"))
                .and_then(DataValue::as_scalar)
                .and_then(ScalarValue::as_str)
                .unwrap_or_default()
                .to_owned();
            sink.borrow_mut().push(name);
        }),
    );
    assert!(subscribed.is_ok());

    // A change to a record the fragment never read: no wake-up.
    let mill = economist(1);
    engine
        .start_update(Arc::new(move |store, layer| {
            let _ = store.write_field(
                layer,
                &mill,
                "name",
                strata_core::FieldValue::Scalar(ScalarValue::from("J. S. Mill")),
            );
            [economist(1)].into_iter().collect()
        }))
        .ok();
    assert!(seen.borrow().is_empty());

    // Renaming Bentham reaches the fragment.
    engine
        .normalize_response(
            &economists_selection(),
            &renamed_response("Jeremiah Bentham"),
            &[],
            &Variables::new(),
        )
        .ok();
    assert_eq!(seen.borrow().as_slice(), ["Jeremiah Bentham".to_owned()]);
}

#[test]
fn unsubscribing_stops_wakeups() {
    let mut engine = economists_engine();
    let fired = Rc::new(Cell::new(0));
    let counter = Rc::clone(&fired);
    let id = engine
        .subscribe_fragment(
            me_name_ast(),
            engine.root_link(),
            Variables::new(),
            Box::new(move |_| counter.set(counter.get() + 1)),
        )
        .map(|(id, _)| id);
    assert!(id.is_ok());
    let Ok(id) = id else {
        return;
    };
    assert!(engine.unsubscribe(id));
    engine
        .normalize_response(
            &economists_selection(),
            &renamed_response("Someone Else"),
            &[],
            &Variables::new(),
        )
        .ok();
    assert_eq!(fired.get(), 0);
}

#[test]
fn fragments_with_errors_wake_until_the_errors_clear() {
    let mut engine = economists_engine();
    let fired = Rc::new(Cell::new(0));
    let counter = Rc::clone(&fired);
    let subscribed = engine.subscribe_fragment(
        me_name_ast(),
        engine.root_link(),
        Variables::new(),
        Box::new(move |_| counter.set(counter.get() + 1)),
    );
    assert!(subscribed.is_ok());

    let broken = {
        use strata_core::{ResponseObject, ResponseValue};
        ResponseObject::new().with(
            "me",
            ResponseValue::Object(
                ResponseObject::new()
                    .with("__typename", "Economist")
                    .with("id", "0")
                    .with("name", ResponseValue::Null),
            ),
        )
    };
    let errors = vec![ResponseError::new(
        "name service unavailable",
        vec![PathSegment::key("me"), PathSegment::key("name")],
    )];
    engine
        .normalize_response(
            &[strata_core::selection::linked(
                "me",
                vec![
                    strata_core::selection::scalar("id"),
                    strata_core::selection::scalar("name"),
                ],
            )],
            &broken,
            &errors,
            &Variables::new(),
        )
        .ok();
    assert_eq!(fired.get(), 1);

    // Recovery fires once more, with the errors gone.
    engine
        .normalize_response(
            &economists_selection(),
            &economists_response(),
            &[],
            &Variables::new(),
        )
        .ok();
    assert_eq!(fired.get(), 2);
}

#[test]
fn unchanged_errored_fragments_stay_quiet() {
    use strata_core::selection::{linked, scalar};
    use strata_core::{ResponseObject, ResponseValue};

    let mut engine = economists_engine();
    let broken = ResponseObject::new().with(
        "me",
        ResponseValue::Object(
            ResponseObject::new()
                .with("__typename", "Economist")
                .with("id", "0")
                .with("name", ResponseValue::Null),
        ),
    );
    let errors = vec![ResponseError::new(
        "name service unavailable",
        vec![PathSegment::key("me"), PathSegment::key("name")],
    )];
    engine
        .normalize_response(
            &[linked("me", vec![scalar("id"), scalar("name")])],
            &broken,
            &errors,
            &Variables::new(),
        )
        .ok();

    let fired = Rc::new(Cell::new(0));
    let counter = Rc::clone(&fired);
    let subscribed = engine.subscribe_fragment(
        me_name_ast(),
        engine.root_link(),
        Variables::new(),
        Box::new(move |_| counter.set(counter.get() + 1)),
    );
    assert!(subscribed.is_ok());

    // A write to a field the fragment never reads re-reads it, but the
    // value and the error list both come back unchanged.
    engine
        .start_update(Arc::new(|store, layer| {
            let _ = store.write_field(
                layer,
                &economist(0),
                "nickname",
                strata_core::FieldValue::Scalar(ScalarValue::from("JB")),
            );
            [economist(0)].into_iter().collect()
        }))
        .ok();
    assert_eq!(fired.get(), 0);
}

#[test]
fn record_waiters_fire_once_for_local_updates_too() {
    let mut engine = economists_engine();
    let fired = Rc::new(Cell::new(0));
    let counter = Rc::clone(&fired);
    engine.on_next_change_to_record(root(), Box::new(move || counter.set(counter.get() + 1)));

    engine.start_update(count_update(|n| n + 1)).ok();
    engine.start_update(count_update(|n| n + 1)).ok();
    assert_eq!(fired.get(), 1);
}

#[test]
fn record_subscriptions_follow_membership_not_values() {
    let mut engine = economists_engine();
    let fired = Rc::new(Cell::new(0));
    let counter = Rc::clone(&fired);
    engine.subscribe_record(economist(0), Box::new(move || counter.set(counter.get() + 1)));

    // The renamed response changes economist 0.
    engine
        .normalize_response(
            &economists_selection(),
            &renamed_response("Jeremiah Bentham"),
            &[],
            &Variables::new(),
        )
        .ok();
    assert_eq!(fired.get(), 1);

    // An identical response changes nothing, so membership is empty.
    engine
        .normalize_response(
            &economists_selection(),
            &renamed_response("Jeremiah Bentham"),
            &[],
            &Variables::new(),
        )
        .ok();
    assert_eq!(fired.get(), 1);
}

#[test]
fn read_outcome_reports_missing_before_any_subscription_exists() {
    let engine = strata_core::Engine::default();
    let outcome = engine.read(&me_name_ast(), &Variables::new());
    assert!(matches!(outcome, Ok(ReadOutcome::MissingData { .. })));
}
