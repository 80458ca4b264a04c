pub mod descriptor;
pub mod manifest;

use serde::{Deserialize, Serialize};

/// One GraphQL operation descriptor: name, query hash and feature switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub name: String,
    pub hash: String,
    pub features: Vec<String>,
}

/// An endpoint straight out of the extractor, not yet filtered or merged.
pub type Candidate = Endpoint;

impl Endpoint {
    pub fn new(name: impl Into<String>, hash: impl Into<String>, features: Vec<String>) -> Self {
        Self {
            name: name.into(),
            hash: hash.into(),
            features,
        }
    }
}
