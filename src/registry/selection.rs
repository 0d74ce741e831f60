//! Node selection order.
//!
//! Candidates are the account's nodes that are neither disabled nor failed,
//! ordered by weight ascending, then creation time ascending, then node ID.
//! A node without a creation time sorts before every timestamped node.

use std::cmp::Ordering;

use crate::registry::account::Account;
use crate::registry::node::Node;

/// Picks the promotion target among an account's nodes.
pub trait NodeSelector: Send + Sync + std::fmt::Debug {
    fn select<'a>(&self, account: &'a Account) -> Option<&'a Node>;
}

/// Lowest weight wins; see the module docs for tie-breaks.
#[derive(Debug, Default, Clone, Copy)]
pub struct WeightedPriority;

impl NodeSelector for WeightedPriority {
    fn select<'a>(&self, account: &'a Account) -> Option<&'a Node> {
        account
            .nodes
            .values()
            .filter(|n| n.is_candidate())
            .min_by(|a, b| compare_priority(a, b))
    }
}

/// Total order used by selection and by dashboard listings.
pub fn compare_priority(a: &Node, b: &Node) -> Ordering {
    a.weight
        .cmp(&b.weight)
        // Option orders None first, which is the zero-time rule.
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// All nodes of an account in priority order, candidates or not.
pub fn ordered_nodes(account: &Account) -> Vec<&Node> {
    let mut nodes: Vec<&Node> = account.nodes.values().collect();
    nodes.sort_by(|a, b| compare_priority(a, b));
    nodes
}
