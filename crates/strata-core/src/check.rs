// SPDX-License-Identifier: Apache-2.0
//! Presence checking: can a selection tree be served from the store?
//!
//! The checker mirrors the normalizer's key derivation exactly, but
//! reads instead of writing and short-circuits on the first miss. It
//! never materializes data; use the reader for that.

use crate::error::InvariantError;
use crate::ident::Link;
use crate::selection::{storage_key, SelectionNode, Variables, TYPENAME_KEY};
use crate::store::{LayerId, LayeredStore, RecordView};
use crate::value::{FieldValue, StoreRecord};

/// Result of a presence check.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum CheckResult {
    /// Every selected slot is present.
    EnoughData,
    /// At least one slot is missing; `record` is the first record the
    /// walk could not fully serve.
    MissingData {
        /// The record to wait on before retrying.
        record: Link,
    },
}

impl CheckResult {
    /// Returns `true` if the store can serve the selection.
    #[must_use]
    pub fn is_enough(&self) -> bool {
        matches!(self, Self::EnoughData)
    }
}

/// Fetch policy for operations backed by a presence check.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum ShouldFetch {
    /// Always go to the network.
    Yes,
    /// Never go to the network; serve whatever the store has.
    No,
    /// Fetch only when the store cannot serve the selection.
    #[default]
    IfNecessary,
}

impl ShouldFetch {
    /// Resolves the policy against a check result.
    #[must_use]
    pub fn requires_fetch(self, check: &CheckResult) -> bool {
        match self {
            Self::Yes => true,
            Self::No => false,
            Self::IfNecessary => !check.is_enough(),
        }
    }
}

/// Checks whether the chain anchored at `layer` holds every slot the
/// selection tree names, starting from `root`.
///
/// A stored `Null` is confirmed absence and counts as present; a stored
/// error value also counts as present (the outcome of the fetch is
/// known). A missing record, missing slot, or missing `__typename`
/// under an inline fragment is a miss.
pub fn check(
    store: &LayeredStore,
    layer: LayerId,
    selections: &[SelectionNode],
    variables: &Variables,
    root: &Link,
) -> Result<CheckResult, InvariantError> {
    let record = match store.record(layer, root)? {
        RecordView::Record(record) => record,
        RecordView::Missing | RecordView::Absent => {
            return Ok(CheckResult::MissingData {
                record: root.clone(),
            });
        }
    };
    check_record(store, layer, selections, variables, &record, root)
}

fn check_record(
    store: &LayeredStore,
    layer: LayerId,
    selections: &[SelectionNode],
    variables: &Variables,
    record: &StoreRecord,
    record_link: &Link,
) -> Result<CheckResult, InvariantError> {
    for node in selections {
        match node {
            SelectionNode::Scalar(scalar) => {
                let key = storage_key(&scalar.field_name, &scalar.arguments, variables);
                if record.get(&key).is_none() {
                    return Ok(CheckResult::MissingData {
                        record: record_link.clone(),
                    });
                }
            }
            SelectionNode::Linked(linked) => {
                let key = storage_key(&linked.field_name, &linked.arguments, variables);
                let value = match record.get(&key) {
                    None => {
                        return Ok(CheckResult::MissingData {
                            record: record_link.clone(),
                        });
                    }
                    Some(value) => value,
                };
                let links: Vec<&Link> = match value {
                    // Confirmed absent or errored: the outcome is known.
                    FieldValue::Null | FieldValue::Errors(_) => continue,
                    FieldValue::Link(link) => vec![link],
                    FieldValue::LinkList(items) => items.iter().flatten().collect(),
                    FieldValue::Scalar(_) | FieldValue::ScalarList(_) => {
                        return Err(InvariantError::NonLinkValue {
                            record: record_link.clone(),
                            key,
                        });
                    }
                };
                for link in links {
                    let linked_record = match store.record(layer, link)? {
                        RecordView::Record(record) => record,
                        RecordView::Absent => continue,
                        RecordView::Missing => {
                            return Ok(CheckResult::MissingData {
                                record: link.clone(),
                            });
                        }
                    };
                    let result = check_record(
                        store,
                        layer,
                        &linked.selections,
                        variables,
                        &linked_record,
                        link,
                    )?;
                    if !result.is_enough() {
                        return Ok(result);
                    }
                }
            }
            SelectionNode::InlineFragment(fragment) => {
                let typename = match record.get(TYPENAME_KEY) {
                    Some(FieldValue::Scalar(s)) => s.as_str(),
                    _ => None,
                };
                let Some(typename) = typename else {
                    return Ok(CheckResult::MissingData {
                        record: record_link.clone(),
                    });
                };
                if typename == fragment.type_condition.as_str() {
                    let result = check_record(
                        store,
                        layer,
                        &fragment.selections,
                        variables,
                        record,
                        record_link,
                    )?;
                    if !result.is_enough() {
                        return Ok(result);
                    }
                }
            }
        }
    }
    Ok(CheckResult::EnoughData)
}
