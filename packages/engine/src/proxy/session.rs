// packages/engine/src/proxy/session.rs
//! Session identity

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one authenticated session: region plus numeric user id
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub region: String,
    pub uid: u64,
}

impl SessionKey {
    pub fn new(region: impl Into<String>, uid: u64) -> Self {
        Self {
            region: region.into(),
            uid,
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.region, self.uid)
    }
}
