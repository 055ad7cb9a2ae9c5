use crate::model::{Candidate, PropertyIdentifier, SearchQuery};
use std::collections::{BTreeMap, BTreeSet};

/// Global candidate map keyed by normalized identifier.
///
/// Folding is a set union per key, so the resulting map does not depend on
/// the order queries were folded in, and it never shrinks.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Aggregator {
    candidates: BTreeMap<String, Candidate>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one query's extraction result. Returns how many identifiers
    /// were new.
    pub fn fold<I>(&mut self, query: &SearchQuery, ids: I) -> usize
    where
        I: IntoIterator<Item = PropertyIdentifier>,
    {
        let mut added = 0;
        for id in ids {
            let entry = self.candidates.entry(id.key.clone()).or_insert_with(|| {
                added += 1;
                Candidate {
                    identifier: id.clone(),
                    discovered_via: BTreeSet::new(),
                    direct_check: false,
                }
            });
            entry.discovered_via.insert(query.clone());
            prefer_primary(&mut entry.identifier, id);
        }
        added
    }

    /// Identifiers supplied by configuration rather than by a search.
    pub fn fold_direct<I>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = PropertyIdentifier>,
    {
        let mut added = 0;
        for id in ids {
            let entry = self.candidates.entry(id.key.clone()).or_insert_with(|| {
                added += 1;
                Candidate {
                    identifier: id.clone(),
                    discovered_via: BTreeSet::new(),
                    direct_check: true,
                }
            });
            entry.direct_check = true;
            prefer_primary(&mut entry.identifier, id);
        }
        added
    }

    /// Union of two aggregators.
    pub fn merge(&mut self, other: Aggregator) {
        for (key, theirs) in other.candidates {
            match self.candidates.get_mut(&key) {
                Some(ours) => {
                    ours.discovered_via.extend(theirs.discovered_via);
                    ours.direct_check |= theirs.direct_check;
                    prefer_primary(&mut ours.identifier, theirs.identifier);
                }
                None => {
                    self.candidates.insert(key, theirs);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Candidate> {
        self.candidates.get(key)
    }

    pub fn into_candidates(self) -> Vec<Candidate> {
        self.candidates.into_values().collect()
    }
}

/// Keep one deterministic representative when the same property was seen
/// under both fields or with different reference strings: the smallest
/// (field, value, reference) wins, whatever order sightings arrive in.
fn prefer_primary(current: &mut PropertyIdentifier, seen: PropertyIdentifier) {
    let rank = |i: &PropertyIdentifier| (i.field, i.value.clone(), i.reference.clone());
    if rank(&seen) < rank(current) {
        *current = seen;
    }
}
