// SPDX-License-Identifier: Apache-2.0
//! Subscriptions: who gets told when records change.
//!
//! Dispatch is change-set driven. A fragment subscriber only re-reads
//! when the change set intersects the records its last read touched,
//! and only fires when the recycled result differs from the last one
//! in value or in its error list. A
//! panicking subscriber is isolated: its panic is caught and logged,
//! and the remaining subscribers still run.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::changeset::EncounteredIds;
use crate::error::InvariantError;
use crate::ident::Link;
use crate::merge::{identical, recycle};
use crate::read::{read_fragment, DataValue, ReadOutcome, WithEncounteredRecords};
use crate::reader::ReaderNode;
use crate::selection::Variables;
use crate::store::{LayerId, LayeredStore};

/// Called with the new value when a fragment's data changes.
pub type FragmentCallback = Box<dyn FnMut(&WithEncounteredRecords)>;
/// Called when a watched record (or any record) changes.
pub type RecordCallback = Box<dyn FnMut()>;
/// One-shot waiter for the next change to a specific record.
pub type ChangeWaiter = Box<dyn FnOnce()>;

/// Generation-stamped handle to a subscription slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct SubscriptionId {
    index: u32,
    generation: u32,
}

/// A live fragment subscription and the last value it saw.
struct FragmentSubscription {
    ast: Arc<Vec<ReaderNode>>,
    root: Link,
    variables: Variables,
    last: WithEncounteredRecords,
    callback: FragmentCallback,
}

enum Subscriber {
    Fragment(FragmentSubscription),
    AnyChangesToRecord { link: Link, callback: RecordCallback },
    AnyRecords { callback: RecordCallback },
}

/// Registry of subscribers plus one-shot record waiters.
#[derive(Default)]
pub struct Subscriptions {
    slots: Vec<Option<Subscriber>>,
    generations: Vec<u32>,
    free: Vec<u32>,
    waiters: FxHashMap<Link, Vec<ChangeWaiter>>,
}

impl Subscriptions {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Returns `true` if no subscription is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&mut self, subscriber: Subscriber) -> SubscriptionId {
        if let Some(index) = self.free.pop() {
            let id = SubscriptionId {
                index,
                generation: self.generations[index as usize],
            };
            self.slots[index as usize] = Some(subscriber);
            id
        } else {
            let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
            self.slots.push(Some(subscriber));
            self.generations.push(0);
            SubscriptionId {
                index,
                generation: 0,
            }
        }
    }

    /// Subscribes to a fragment. The fragment is read immediately to
    /// seat the baseline; the initial read is returned so the caller
    /// can render from it.
    pub fn subscribe_fragment(
        &mut self,
        store: &LayeredStore,
        layer: LayerId,
        ast: Arc<Vec<ReaderNode>>,
        root: Link,
        variables: Variables,
        callback: FragmentCallback,
    ) -> Result<(SubscriptionId, ReadOutcome), InvariantError> {
        let outcome = read_fragment(store, layer, &ast, &root, &variables)?;
        let last = match &outcome {
            ReadOutcome::Success(read) => read.clone(),
            // Seat a baseline that retriggers once the missing record
            // (or the root) shows up.
            ReadOutcome::MissingData { record, .. } => WithEncounteredRecords {
                encountered: [root.clone(), record.clone()].into_iter().collect(),
                item: DataValue::Null,
                errors: Vec::new(),
            },
        };
        let id = self.insert(Subscriber::Fragment(FragmentSubscription {
            ast,
            root,
            variables,
            last,
            callback,
        }));
        Ok((id, outcome))
    }

    /// Subscribes to changes of one record.
    pub fn subscribe_record(&mut self, link: Link, callback: RecordCallback) -> SubscriptionId {
        self.insert(Subscriber::AnyChangesToRecord { link, callback })
    }

    /// Subscribes to every dispatch, regardless of what changed.
    pub fn subscribe_any_records(&mut self, callback: RecordCallback) -> SubscriptionId {
        self.insert(Subscriber::AnyRecords { callback })
    }

    /// Registers a one-shot waiter for the next change to `link`.
    pub fn on_next_change_to_record(&mut self, link: Link, waiter: ChangeWaiter) {
        self.waiters.entry(link).or_default().push(waiter);
    }

    /// Removes a subscription. Returns `false` for a stale id.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let index = id.index as usize;
        if index < self.slots.len()
            && self.generations[index] == id.generation
            && self.slots[index].is_some()
        {
            self.slots[index] = None;
            self.generations[index] = self.generations[index].wrapping_add(1);
            self.free.push(id.index);
            true
        } else {
            false
        }
    }

    /// Notifies subscribers about a change set, re-reading affected
    /// fragments from the chain anchored at `layer`.
    pub fn dispatch(&mut self, store: &LayeredStore, layer: LayerId, changed: &EncounteredIds) {
        tracing::trace!(
            subscribers = self.len(),
            changed = changed.len(),
            "dispatching change set"
        );
        for slot in &mut self.slots {
            match slot {
                Some(Subscriber::Fragment(sub)) => {
                    if changed.intersects(&sub.last.encountered) {
                        Self::refresh_fragment(store, layer, sub);
                    }
                }
                Some(Subscriber::AnyChangesToRecord { link, callback }) => {
                    if changed.contains(link) {
                        guarded(&mut **callback);
                    }
                }
                Some(Subscriber::AnyRecords { callback }) => {
                    guarded(&mut **callback);
                }
                None => {}
            }
        }
        for link in changed.iter() {
            if let Some(waiters) = self.waiters.remove(&link) {
                for waiter in waiters {
                    guarded(waiter);
                }
            }
        }
    }

    fn refresh_fragment(store: &LayeredStore, layer: LayerId, sub: &mut FragmentSubscription) {
        let outcome = match read_fragment(store, layer, &sub.ast, &sub.root, &sub.variables) {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::error!(%error, root = %sub.root, "fragment re-read failed");
                return;
            }
        };
        let Some(read) = outcome.into_success() else {
            // Data went missing underneath the fragment; keep the last
            // value and wait for the next change.
            return;
        };
        let merged = recycle(&sub.last.item, read.item);
        let value_changed = !identical(&merged, &sub.last.item);
        let errors_changed = read.errors != sub.last.errors;
        sub.last = WithEncounteredRecords {
            encountered: read.encountered,
            item: merged,
            errors: read.errors,
        };
        if value_changed || errors_changed {
            let last = &sub.last;
            let callback = &mut sub.callback;
            guarded(|| callback(last));
        }
    }
}

fn guarded(callback: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(callback)).is_err() {
        tracing::error!("subscriber panicked during dispatch");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::TypeName;
    use crate::value::{FieldValue, ScalarValue};
    use std::cell::Cell;
    use std::rc::Rc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn root() -> Link {
        Link::root("Query")
    }

    fn store_with_count(count: i64) -> LayeredStore {
        let mut store = LayeredStore::new(&TypeName::new("Query"));
        let base = store.base();
        store
            .write_field(
                base,
                &root(),
                "count",
                FieldValue::Scalar(ScalarValue::Int(count)),
            )
            .ok();
        store
    }

    fn set_count(store: &mut LayeredStore, count: i64) {
        let base = store.base();
        store
            .write_field(
                base,
                &root(),
                "count",
                FieldValue::Scalar(ScalarValue::Int(count)),
            )
            .ok();
    }

    fn root_changed() -> EncounteredIds {
        [root()].into_iter().collect()
    }

    #[test]
    fn fragment_fires_only_when_the_value_changes() {
        let mut store = store_with_count(1);
        let mut subs = Subscriptions::new();
        let fired = Rc::new(Cell::new(0));
        let counter = Rc::clone(&fired);
        let ast = Arc::new(vec![ReaderNode::scalar("count")]);
        let result = subs.subscribe_fragment(
            &store,
            store.current(),
            ast,
            root(),
            Variables::new(),
            Box::new(move |_| counter.set(counter.get() + 1)),
        );
        assert!(result.is_ok());

        // A dispatch with no underlying change re-reads but stays quiet.
        subs.dispatch(&store, store.current(), &root_changed());
        assert_eq!(fired.get(), 0);

        set_count(&mut store, 2);
        subs.dispatch(&store, store.current(), &root_changed());
        assert_eq!(fired.get(), 1);

        // Unrelated change sets do not even trigger a re-read.
        set_count(&mut store, 3);
        let unrelated: EncounteredIds = [Link::new("Economist", "0")].into_iter().collect();
        subs.dispatch(&store, store.current(), &unrelated);
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn record_subscription_fires_on_membership() {
        let store = store_with_count(1);
        let mut subs = Subscriptions::new();
        let fired = Rc::new(Cell::new(0));
        let counter = Rc::clone(&fired);
        subs.subscribe_record(root(), Box::new(move || counter.set(counter.get() + 1)));

        subs.dispatch(&store, store.current(), &root_changed());
        let unrelated: EncounteredIds = [Link::new("Economist", "0")].into_iter().collect();
        subs.dispatch(&store, store.current(), &unrelated);
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn any_records_fires_on_every_dispatch() {
        let store = store_with_count(1);
        let mut subs = Subscriptions::new();
        let fired = Rc::new(Cell::new(0));
        let counter = Rc::clone(&fired);
        subs.subscribe_any_records(Box::new(move || counter.set(counter.get() + 1)));

        subs.dispatch(&store, store.current(), &EncounteredIds::new());
        subs.dispatch(&store, store.current(), &root_changed());
        assert_eq!(fired.get(), 2);
    }

    #[test]
    fn one_shot_waiters_drain_on_first_matching_change() {
        let store = store_with_count(1);
        let mut subs = Subscriptions::new();
        let fired = Rc::new(Cell::new(0));
        let counter = Rc::clone(&fired);
        subs.on_next_change_to_record(root(), Box::new(move || counter.set(counter.get() + 1)));

        subs.dispatch(&store, store.current(), &root_changed());
        subs.dispatch(&store, store.current(), &root_changed());
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn unsubscribed_ids_go_stale() {
        let store = store_with_count(1);
        let mut subs = Subscriptions::new();
        let id = subs.subscribe_record(root(), Box::new(|| {}));
        assert!(subs.unsubscribe(id));
        assert!(!subs.unsubscribe(id));
        subs.dispatch(&store, store.current(), &root_changed());
        assert!(subs.is_empty());
    }

    #[test]
    fn a_panicking_subscriber_does_not_starve_the_rest() {
        let store = store_with_count(1);
        let mut subs = Subscriptions::new();
        let fired = Arc::new(AtomicUsize::new(0));
        subs.subscribe_any_records(Box::new(|| {
            // Deliberate panic, must be contained by dispatch.
            unreachable!("subscriber failure");
        }));
        let counter = Arc::clone(&fired);
        subs.subscribe_any_records(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        subs.dispatch(&store, store.current(), &EncounteredIds::new());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
