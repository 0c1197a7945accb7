//! Set reconciliation and tag helpers.
//!
//! Used for every collection the provider syncs incrementally: tags,
//! security groups and user groups.

use std::collections::{BTreeMap, BTreeSet};

/// Tag key Cartel manages on its own; never sent, never diffed.
pub const BILLING_TAG: &str = "billing";

/// Security group every host is implicitly a member of.
pub const BASE_SECURITY_GROUP: &str = "base";

/// Elements of `a` that are not in `b`, in `a`'s order.
pub fn difference<T>(a: &[T], b: &[T]) -> Vec<T>
where
    T: Ord + Clone,
{
    let exclude: BTreeSet<&T> = b.iter().collect();
    a.iter().filter(|x| !exclude.contains(x)).cloned().collect()
}

/// Additions and removals needed to turn one set into another.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SetChange<T> {
    /// Present in new, absent in old.
    pub additions: Vec<T>,
    /// Present in old, absent in new.
    pub removals: Vec<T>,
}

impl<T> SetChange<T> {
    /// Whether nothing needs to change.
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.removals.is_empty()
    }
}

/// Compute the additions and removals between `old` and `new`.
pub fn reconcile<T>(old: &[T], new: &[T]) -> SetChange<T>
where
    T: Ord + Clone,
{
    SetChange {
        additions: difference(new, old),
        removals: difference(old, new),
    }
}

/// Drop the managed billing tag and empty values.
pub fn normalize_tags(tags: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    tags.iter()
        .filter(|(k, v)| k.as_str() != BILLING_TAG && !v.is_empty())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Build the tag update for Cartel's add-tags call.
///
/// Keys dropped or emptied in `new` map to an empty value, which Cartel
/// treats as a removal. The billing tag is never sent.
pub fn tag_change(
    old: &BTreeMap<String, String>,
    new: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut change = BTreeMap::new();
    for key in old.keys() {
        if !matches!(new.get(key), Some(v) if !v.is_empty()) {
            change.insert(key.clone(), String::new());
        }
    }
    for (key, value) in new {
        if key == BILLING_TAG {
            continue;
        }
        change.insert(key.clone(), value.clone());
    }
    change.remove(BILLING_TAG);
    change
}

/// Security groups as the user declared them, without the implicit base group.
pub fn without_base_group(groups: &[String]) -> Vec<String> {
    difference(groups, &[BASE_SECURITY_GROUP.to_string()])
}
