//! Set reconciliation
//!
//! Pure set arithmetic used to turn a desired and an observed id set into the
//! additions and removals that converge them. Nothing here talks to the
//! directory.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::hash::Hash;

/// Changes needed to move an observed set to a desired set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetDelta<T> {
    /// In desired, not observed. Order follows desired.
    pub to_add: Vec<T>,
    /// In observed, not desired. Order follows observed.
    pub to_remove: Vec<T>,
}

impl<T> Default for SetDelta<T> {
    fn default() -> Self {
        Self {
            to_add: Vec::new(),
            to_remove: Vec::new(),
        }
    }
}

impl<T> SetDelta<T> {
    /// Check if no change is needed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    /// Total number of changes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.to_add.len() + self.to_remove.len()
    }
}

/// Elements of `a` not in `b`, in the order of `a`, duplicates kept.
pub fn difference<T>(a: &[T], b: &[T]) -> Vec<T>
where
    T: Eq + Hash + Clone,
{
    let exclude: HashSet<&T> = b.iter().collect();
    a.iter().filter(|x| !exclude.contains(x)).cloned().collect()
}

/// Compute the additions and removals that turn `observed` into `desired`.
///
/// Inputs are treated as sets: duplicates collapse, first occurrence order is
/// kept. Elements compare exactly.
pub fn diff<T>(desired: &[T], observed: &[T]) -> SetDelta<T>
where
    T: Eq + Hash + Clone,
{
    diff_by_key(desired, observed, |x| x.clone())
}

/// Like [`diff`], comparing elements by a derived key.
pub fn diff_by_key<T, K, F>(desired: &[T], observed: &[T], key: F) -> SetDelta<T>
where
    T: Clone,
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let desired_keys: HashSet<K> = desired.iter().map(&key).collect();
    let observed_keys: HashSet<K> = observed.iter().map(&key).collect();

    let mut seen = HashSet::new();
    let to_add = desired
        .iter()
        .filter(|x| {
            let k = key(*x);
            !observed_keys.contains(&k) && seen.insert(k)
        })
        .cloned()
        .collect();

    let mut seen = HashSet::new();
    let to_remove = observed
        .iter()
        .filter(|x| {
            let k = key(*x);
            !desired_keys.contains(&k) && seen.insert(k)
        })
        .cloned()
        .collect();

    SetDelta { to_add, to_remove }
}

/// Check if two string lists hold the same elements, ignoring order and
/// ASCII case. Multiplicity counts.
pub fn set_equal<S: AsRef<str>>(a: &[S], b: &[S]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let normalize = |items: &[S]| {
        let mut v: Vec<String> = items.iter().map(|s| s.as_ref().to_ascii_uppercase()).collect();
        v.sort_unstable();
        v
    };
    normalize(a) == normalize(b)
}
