// SPDX-License-Identifier: Apache-2.0
//! Mark-and-sweep collection of unreferenced base records.
//!
//! Retained queries are the GC roots: a record survives only if some
//! retained query's selection tree can reach it from that query's root
//! record. Nothing is retained implicitly, so collecting with no
//! retained queries empties the base layer entirely. Only the base is
//! swept; overlay layers are short-lived and not collected.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::ident::{DataId, Link, TypeName};
use crate::selection::{storage_key, SelectionNode, SelectionSet, Variables};
use crate::store::LayeredStore;
use crate::value::FieldValue;

/// A query whose data must survive collection.
///
/// Held behind `Arc` by callers; retain/release pair up by pointer
/// identity, so the same query object can be retained from several
/// places without string-keyed bookkeeping.
#[derive(Clone, Debug)]
pub struct RetainedQuery {
    /// Selection tree the query normalized with.
    pub selections: SelectionSet,
    /// Variables the query ran with.
    pub variables: Variables,
    /// Record the selection tree starts from.
    pub root: Link,
}

type MarkSet = FxHashMap<TypeName, FxHashSet<DataId>>;

/// Sweeps the base layer, keeping only records reachable from the
/// retained queries. Returns the number of records collected.
pub fn collect_garbage(store: &mut LayeredStore, retained: &[Arc<RetainedQuery>]) -> usize {
    let mut marked = MarkSet::default();
    for query in retained {
        mark_link(&mut marked, &query.root);
        mark_selections(store, &mut marked, &query.selections, &query.variables, &query.root);
    }
    let removed = store.sweep_base(|typename, id| {
        marked.get(typename).is_some_and(|ids| ids.contains(id))
    });
    tracing::debug!(
        retained = retained.len(),
        removed,
        "collected unreferenced records"
    );
    removed
}

fn mark_link(marked: &mut MarkSet, link: &Link) {
    marked
        .entry(link.typename.clone())
        .or_default()
        .insert(link.id.clone());
}

fn mark_selections(
    store: &LayeredStore,
    marked: &mut MarkSet,
    selections: &[SelectionNode],
    variables: &Variables,
    record: &Link,
) {
    for node in selections {
        match node {
            SelectionNode::Scalar(_) => {}
            SelectionNode::Linked(linked) => {
                let key = storage_key(&linked.field_name, &linked.arguments, variables);
                let value = store.field(store.base(), record, &key).ok().flatten();
                let targets: Vec<Link> = match value {
                    Some(FieldValue::Link(link)) => vec![link.clone()],
                    Some(FieldValue::LinkList(links)) => {
                        links.iter().flatten().cloned().collect()
                    }
                    _ => continue,
                };
                for target in targets {
                    mark_link(marked, &target);
                    mark_selections(store, marked, &linked.selections, variables, &target);
                }
            }
            // Conservative: fragments mark regardless of the stored
            // typename.
            SelectionNode::InlineFragment(fragment) => {
                mark_selections(store, marked, &fragment.selections, variables, record);
            }
        }
    }
}
