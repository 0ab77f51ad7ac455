//! Configuration scopes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the three configuration namespaces, ordered most to least specific.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    #[default]
    Node,
    Workflow,
    Project,
}

impl Scope {
    /// Fallback search order for unscoped lookups.
    pub const SEARCH_ORDER: [Scope; 3] = [Scope::Node, Scope::Workflow, Scope::Project];

    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Node => "node",
            Scope::Workflow => "workflow",
            Scope::Project => "project",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_order_is_most_specific_first() {
        let mut sorted = Scope::SEARCH_ORDER;
        sorted.sort();
        assert_eq!(sorted, Scope::SEARCH_ORDER);
        assert_eq!(Scope::default(), Scope::Node);
    }
}
