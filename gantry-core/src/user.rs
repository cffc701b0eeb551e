//! Caller identity as handed in by the authentication middleware.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An authenticated caller.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
}

impl UserInfo {
    #[must_use]
    pub fn new(name: &str) -> Self {
        UserInfo {
            name: name.to_string(),
            groups: Vec::new(),
        }
    }
}

impl fmt::Display for UserInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
