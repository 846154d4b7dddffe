//! Switches: a DPID and the set of ports links are known on.

use std::collections::BTreeSet;

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Switch {
    pub id: String,
    pub ports: BTreeSet<i32>,
}

impl Switch {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ports: BTreeSet::new(),
        }
    }
}
