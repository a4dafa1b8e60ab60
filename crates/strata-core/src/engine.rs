// SPDX-License-Identifier: Apache-2.0
//! The engine: one store, its subscribers, and its retained queries.
//!
//! Everything callers do goes through here. The engine owns dispatch:
//! every mutation ends with exactly one notification pass over the
//! change set it produced, so subscribers observe each operation as one
//! atomic step.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::debug;

use crate::changeset::EncounteredIds;
use crate::check::{check, CheckResult, ShouldFetch};
use crate::error::StoreError;
use crate::gc::{collect_garbage, RetainedQuery};
use crate::ident::{Link, TypeName};
use crate::normalize::normalize_into_layer;
use crate::optimistic::{
    push_network_response_layer, push_optimistic, revert_optimistic, start_update,
};
use crate::read::{read_fragment, ReadOutcome};
use crate::reader::ReaderNode;
use crate::response::{ResponseError, ResponseObject};
use crate::selection::{SelectionNode, SelectionSet, Variables};
use crate::store::{LayerId, LayeredStore, UpdateFn, VisibleData};
use crate::subscribe::{
    ChangeWaiter, FragmentCallback, RecordCallback, SubscriptionId, Subscriptions,
};

/// Engine construction parameters.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Type of the singleton root record.
    pub root_typename: TypeName,
    /// How many released queries stay collectible-but-marked before
    /// their data becomes eligible for collection.
    pub gc_buffer_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root_typename: TypeName::new("Query"),
            gc_buffer_capacity: 10,
        }
    }
}

/// A normalized cache with layering, subscriptions, and collection.
pub struct Engine {
    store: LayeredStore,
    subscriptions: Subscriptions,
    retained: Vec<Arc<RetainedQuery>>,
    gc_buffer: VecDeque<Arc<RetainedQuery>>,
    gc_capacity: usize,
    root_typename: TypeName,
}

impl Engine {
    /// Creates an engine with an empty store.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            store: LayeredStore::new(&config.root_typename),
            subscriptions: Subscriptions::new(),
            retained: Vec::new(),
            gc_buffer: VecDeque::new(),
            gc_capacity: config.gc_buffer_capacity,
            root_typename: config.root_typename,
        }
    }

    /// The singleton root record's link.
    #[must_use]
    pub fn root_link(&self) -> Link {
        Link::root(self.root_typename.clone())
    }

    /// Read access to the underlying store.
    #[must_use]
    pub fn store(&self) -> &LayeredStore {
        &self.store
    }

    fn notify(&mut self, changed: &EncounteredIds) {
        self.subscriptions
            .dispatch(&self.store, self.store.current(), changed);
    }

    /// Normalizes a network response into the store and notifies
    /// subscribers of the records whose visible data changed.
    ///
    /// The response lands in the base layer while no overlay exists;
    /// with local updates stacked it lands in (or on top of) the
    /// current network-response layer, preserving the updates.
    pub fn normalize_response(
        &mut self,
        selections: &[SelectionNode],
        response: &ResponseObject,
        errors: &[ResponseError],
        variables: &Variables,
    ) -> Result<EncounteredIds, StoreError> {
        let layer = push_network_response_layer(&mut self.store);
        let mut encountered = EncounteredIds::new();
        let root = self.root_link();
        let root_typename = self.root_typename.clone();
        normalize_into_layer(
            &mut self.store,
            layer,
            selections,
            response,
            errors,
            variables,
            &root,
            &root_typename,
            &mut encountered,
        )?;
        self.notify(&encountered);
        Ok(encountered)
    }

    /// Checks whether the store can serve a selection tree from the
    /// root record.
    pub fn check(
        &self,
        selections: &[SelectionNode],
        variables: &Variables,
    ) -> Result<CheckResult, StoreError> {
        Ok(check(
            &self.store,
            self.store.current(),
            selections,
            variables,
            &self.root_link(),
        )?)
    }

    /// Resolves a fetch policy: does serving this selection require
    /// going to the network?
    pub fn requires_fetch(
        &self,
        policy: ShouldFetch,
        selections: &[SelectionNode],
        variables: &Variables,
    ) -> Result<bool, StoreError> {
        Ok(policy.requires_fetch(&self.check(selections, variables)?))
    }

    /// Materializes a reader tree from the root record.
    pub fn read(
        &self,
        ast: &[ReaderNode],
        variables: &Variables,
    ) -> Result<ReadOutcome, StoreError> {
        self.read_from(ast, &self.root_link(), variables)
    }

    /// Materializes a reader tree from an arbitrary record.
    pub fn read_from(
        &self,
        ast: &[ReaderNode],
        root: &Link,
        variables: &Variables,
    ) -> Result<ReadOutcome, StoreError> {
        Ok(read_fragment(
            &self.store,
            self.store.current(),
            ast,
            root,
            variables,
        )?)
    }

    /// Applies a replayable local update and notifies subscribers.
    pub fn start_update(&mut self, update: UpdateFn) -> Result<EncounteredIds, StoreError> {
        let changed = start_update(&mut self.store, update)?;
        self.notify(&changed);
        Ok(changed)
    }

    /// Pushes an optimistic update and notifies subscribers. The
    /// returned layer id is the token for the eventual revert.
    pub fn push_optimistic(&mut self, update: UpdateFn) -> (LayerId, EncounteredIds) {
        let (layer, changed) = push_optimistic(&mut self.store, update);
        self.notify(&changed);
        (layer, changed)
    }

    /// Reverts an optimistic update, optionally settling replacement
    /// data in its place. Subscribers are notified even when the
    /// visible data ends up unchanged, so any-record listeners observe
    /// the revert itself.
    pub fn revert_optimistic(
        &mut self,
        layer: LayerId,
        replacement: Option<UpdateFn>,
    ) -> Result<EncounteredIds, StoreError> {
        let changed = revert_optimistic(&mut self.store, layer, replacement)?;
        self.notify(&changed);
        Ok(changed)
    }

    /// Retains a query: its reachable records survive collection until
    /// the returned handle is released.
    pub fn retain(&mut self, selections: SelectionSet, variables: Variables) -> Arc<RetainedQuery> {
        let query = Arc::new(RetainedQuery {
            selections,
            variables,
            root: self.root_link(),
        });
        self.retained.push(Arc::clone(&query));
        query
    }

    /// Releases a retained query. The query moves into a bounded
    /// buffer of recently released queries, whose data stays
    /// collectible-but-marked until newer releases push it out.
    /// Returns `false` if the query was not retained.
    pub fn release(&mut self, query: &Arc<RetainedQuery>) -> bool {
        let Some(position) = self
            .retained
            .iter()
            .position(|candidate| Arc::ptr_eq(candidate, query))
        else {
            return false;
        };
        let released = self.retained.swap_remove(position);
        self.gc_buffer.push_back(released);
        while self.gc_buffer.len() > self.gc_capacity {
            self.gc_buffer.pop_front();
        }
        true
    }

    /// Collects every base record unreachable from the retained
    /// queries and the recently-released buffer. Returns the number of
    /// records removed.
    pub fn collect(&mut self) -> usize {
        let mut roots = self.retained.clone();
        roots.extend(self.gc_buffer.iter().cloned());
        let removed = collect_garbage(&mut self.store, &roots);
        debug!(removed, "garbage collection pass");
        removed
    }

    /// Subscribes to a fragment rooted at `root`. Returns the initial
    /// read alongside the subscription id.
    pub fn subscribe_fragment(
        &mut self,
        ast: Arc<Vec<ReaderNode>>,
        root: Link,
        variables: Variables,
        callback: FragmentCallback,
    ) -> Result<(SubscriptionId, ReadOutcome), StoreError> {
        Ok(self.subscriptions.subscribe_fragment(
            &self.store,
            self.store.current(),
            ast,
            root,
            variables,
            callback,
        )?)
    }

    /// Subscribes to changes of one record.
    pub fn subscribe_record(&mut self, link: Link, callback: RecordCallback) -> SubscriptionId {
        self.subscriptions.subscribe_record(link, callback)
    }

    /// Subscribes to every store mutation.
    pub fn subscribe_any_records(&mut self, callback: RecordCallback) -> SubscriptionId {
        self.subscriptions.subscribe_any_records(callback)
    }

    /// Removes a subscription. Returns `false` for a stale id.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.subscriptions.unsubscribe(id)
    }

    /// Registers a one-shot waiter for the next change to `link`.
    pub fn on_next_change_to_record(&mut self, link: Link, waiter: ChangeWaiter) {
        self.subscriptions.on_next_change_to_record(link, waiter);
    }

    /// Snapshot of the settled (base-layer) data.
    pub fn base_data(&self) -> Result<VisibleData, StoreError> {
        Ok(self.store.visible_data(self.store.base())?)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read::DataValue;
    use crate::response::ResponseValue;
    use crate::selection::{linked, scalar};
    use crate::value::{FieldValue, ScalarValue};
    use std::cell::Cell;
    use std::rc::Rc;

    fn me_selection() -> SelectionSet {
        vec![linked("me", vec![scalar("id"), scalar("name")])]
    }

    fn me_response(name: &str) -> ResponseObject {
        ResponseObject::new().with(
            "me",
            ResponseValue::Object(
                ResponseObject::new()
                    .with("__typename", ResponseValue::Scalar(ScalarValue::from("Economist")))
                    .with("id", ResponseValue::Scalar(ScalarValue::from("0")))
                    .with("name", ResponseValue::Scalar(ScalarValue::from(name))),
            ),
        )
    }

    #[test]
    fn normalize_then_read_round_trips() {
        let mut engine = Engine::default();
        let normalized = engine.normalize_response(
            &me_selection(),
            &me_response("Jeremy Bentham"),
            &[],
            &Variables::new(),
        );
        assert!(normalized.is_ok_and(|ids| ids.contains(&Link::new("Economist", "0"))));

        let ast = vec![ReaderNode::linked("me", vec![ReaderNode::scalar("name")])];
        let read = engine
            .read(&ast, &Variables::new())
            .ok()
            .and_then(ReadOutcome::into_success);
        let name = read
            .and_then(|r| {
                r.item
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
    fn fragment_subscribers_observe_new_responses() {
        let mut engine = Engine::default();
        engine
            .normalize_response(
                &me_selection(),
                &me_response("Jeremy Bentham"),
                &[],
                &Variables::new(),
            )
            .ok();

        let fired = Rc::new(Cell::new(0));
        let counter = Rc::clone(&fired);
        let ast = Arc::new(vec![ReaderNode::linked(
            "me",
            vec![ReaderNode::scalar("name")],
        )]);
        let subscribed = engine.subscribe_fragment(
            ast,
            engine.root_link(),
            Variables::new(),
            Box::new(move |_| counter.set(counter.get() + 1)),
        );
        assert!(subscribed.is_ok());

        // Identical data changes nothing and stays quiet.
        engine
            .normalize_response(
                &me_selection(),
                &me_response("Jeremy Bentham"),
                &[],
                &Variables::new(),
            )
            .ok();
        assert_eq!(fired.get(), 0);

        engine
            .normalize_response(
                &me_selection(),
                &me_response("John Stuart Mill"),
                &[],
                &Variables::new(),
            )
            .ok();
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn optimistic_round_trip_through_the_engine() {
        let mut engine = Engine::default();
        engine
            .normalize_response(
                &me_selection(),
                &me_response("Jeremy Bentham"),
                &[],
                &Variables::new(),
            )
            .ok();

        let me = Link::new("Economist", "0");
        let renamed = me.clone();
        let (layer, _) = engine.push_optimistic(Arc::new(move |store, layer| {
            store
                .write_field(
                    layer,
                    &renamed,
                    "name",
                    FieldValue::Scalar(ScalarValue::from("J. B. (saving)")),
                )
                .ok();
            [renamed.clone()].into_iter().collect()
        }));

        let ast = vec![ReaderNode::scalar("name")];
        let read_name = |engine: &Engine| {
            engine
                .read_from(&ast, &me, &Variables::new())
                .ok()
                .and_then(ReadOutcome::into_success)
                .and_then(|r| {
                    r.item
                        .as_object()
                        .and_then(|o| o.get("name"))
                        .and_then(DataValue::as_scalar)
                        .and_then(ScalarValue::as_str)
                        .map(str::to_owned)
                })
                .unwrap_or_default()
        };
        assert_eq!(read_name(&engine), "J. B. (saving)");

        let changed = engine.revert_optimistic(layer, None);
        assert!(changed.is_ok_and(|ids| ids.contains(&me)));
        assert_eq!(read_name(&engine), "Jeremy Bentham");
    }

    #[test]
    fn release_buffers_queries_until_capacity_pushes_them_out() {
        let mut engine = Engine::new(EngineConfig {
            root_typename: TypeName::new("Query"),
            gc_buffer_capacity: 1,
        });
        engine
            .normalize_response(
                &me_selection(),
                &me_response("Jeremy Bentham"),
                &[],
                &Variables::new(),
            )
            .ok();

        let query = engine.retain(me_selection(), Variables::new());
        assert!(engine.release(&query));
        assert!(!engine.release(&query));

        // Still inside the recently-released buffer: nothing collected.
        assert_eq!(engine.collect(), 0);

        // A newer release evicts it, making its records collectible.
        let other = engine.retain(vec![scalar("ignored")], Variables::new());
        engine.release(&other);
        assert!(engine.collect() > 0);
        let base = engine.base_data().unwrap_or_default();
        assert!(!base.contains_key(&TypeName::new("Economist")));
    }
}
