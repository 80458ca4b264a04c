use std::collections::hash_map::Entry;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::parser::{Candidate, Endpoint};

/// Names must be longer than this to be kept.
pub const MIN_NAME_LEN: usize = 3;
/// Hashes must be longer than this to be kept.
pub const MIN_HASH_LEN: usize = 10;

/// The canonical output of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSet {
    pub generated: DateTime<Utc>,
    pub count: usize,
    pub endpoints: Vec<Endpoint>,
}

impl ResultSet {
    /// Endpoints carrying at least one feature switch.
    pub fn with_features(&self) -> usize {
        self.endpoints.iter().filter(|e| !e.features.is_empty()).count()
    }
}

/// Lengths count `char`s, not UTF-16 units, so names outside the BMP
/// measure shorter here than a JavaScript `.length` would.
pub fn is_valid(candidate: &Candidate) -> bool {
    candidate.name.chars().count() > MIN_NAME_LEN && candidate.hash.chars().count() > MIN_HASH_LEN
}

/// Filter, merge by name and sort.
///
/// The first record seen for a name is kept unless a later one has strictly
/// more features, so rich matches replace minimal ones in any order.
///
/// Sorting is plain byte order, not a locale collation: every uppercase
/// initial sorts before every lowercase one (`Zeta` < `alpha`).
pub fn merge<I>(candidates: I) -> Vec<Endpoint>
where
    I: IntoIterator<Item = Candidate>,
{
    let mut by_name: HashMap<String, Endpoint> = HashMap::new();

    for candidate in candidates.into_iter().filter(is_valid) {
        match by_name.entry(candidate.name.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(candidate);
            }
            Entry::Occupied(mut slot) => {
                if candidate.features.len() > slot.get().features.len() {
                    slot.insert(candidate);
                }
            }
        }
    }

    let mut endpoints: Vec<Endpoint> = by_name.into_values().collect();
    endpoints.sort_by(|a, b| a.name.cmp(&b.name));
    endpoints
}

pub fn reduce<I>(candidates: I, generated: DateTime<Utc>) -> ResultSet
where
    I: IntoIterator<Item = Candidate>,
{
    let endpoints = merge(candidates);
    ResultSet {
        generated,
        count: endpoints.len(),
        endpoints,
    }
}
