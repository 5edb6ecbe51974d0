//! Routing-name alias rules.

use serde::{Deserialize, Serialize};

/// One prefix-substitution rule.
///
/// A routing name starting with `alias` is rewritten by replacing that
/// prefix with `target` before command lookup. At most one rule applies per
/// call; rules are tried in declaration order and never chained.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct AliasRule {
    /// Prefix to match against incoming routing names.
    pub alias: String,
    /// Replacement for the matched prefix.
    pub target: String,
}

impl AliasRule {
    /// Builds a rule from owned or borrowed strings.
    pub fn new(alias: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            target: target.into(),
        }
    }
}

/// Ordered collection of alias rules.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RoutingSettings {
    /// Alias rules in application order.
    #[serde(default = "default_aliases")]
    pub aliases: Vec<AliasRule>,
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
            aliases: default_aliases(),
        }
    }
}

fn default_aliases() -> Vec<AliasRule> {
    vec![AliasRule::new("@", "gangway.")]
}
