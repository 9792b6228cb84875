//! Interaction module - append-only interaction records
//!
//! Interactions are immutable once recorded. Tables only ever grow through
//! [`InteractionTables::union`], which keeps existing rows in place and drops
//! rows that are already present.

use crate::{NodeCounts, NodeType};
use std::collections::HashSet;

/// Kind of an interaction between a user and an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InteractionKind {
    /// Both sides accepted
    Success,

    /// Only the user accepted
    UserOnly,

    /// Only the item accepted
    ItemOnly,
}

impl InteractionKind {
    /// All kinds in table order
    pub const ALL: [InteractionKind; 3] = [
        InteractionKind::Success,
        InteractionKind::UserOnly,
        InteractionKind::ItemOnly,
    ];

    /// Get the kind name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionKind::Success => "success",
            InteractionKind::UserOnly => "user_only",
            InteractionKind::ItemOnly => "item_only",
        }
    }

    /// Parse a kind from a string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "success" => Some(InteractionKind::Success),
            "user_only" => Some(InteractionKind::UserOnly),
            "item_only" => Some(InteractionKind::ItemOnly),
            _ => None,
        }
    }
}

/// A single `(user, item, kind)` record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interaction {
    /// User index
    pub user: usize,

    /// Item index
    pub item: usize,

    /// Interaction kind
    pub kind: InteractionKind,
}

/// The three sparse interaction tables over users x items
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InteractionTables {
    /// Mutual accepts
    pub success: Vec<(usize, usize)>,

    /// One-sided accepts by the user
    pub user_only: Vec<(usize, usize)>,

    /// One-sided accepts by the item
    pub item_only: Vec<(usize, usize)>,
}

impl InteractionTables {
    /// Create tables from the three row lists
    pub fn new(
        success: Vec<(usize, usize)>,
        user_only: Vec<(usize, usize)>,
        item_only: Vec<(usize, usize)>,
    ) -> Self {
        Self {
            success,
            user_only,
            item_only,
        }
    }

    /// Rows of one kind
    pub fn table(&self, kind: InteractionKind) -> &[(usize, usize)] {
        match kind {
            InteractionKind::Success => &self.success,
            InteractionKind::UserOnly => &self.user_only,
            InteractionKind::ItemOnly => &self.item_only,
        }
    }

    fn table_mut(&mut self, kind: InteractionKind) -> &mut Vec<(usize, usize)> {
        match kind {
            InteractionKind::Success => &mut self.success,
            InteractionKind::UserOnly => &mut self.user_only,
            InteractionKind::ItemOnly => &mut self.item_only,
        }
    }

    /// Append one record
    pub fn push(&mut self, interaction: Interaction) {
        self.table_mut(interaction.kind)
            .push((interaction.user, interaction.item));
    }

    /// Total number of rows across all kinds
    pub fn len(&self) -> usize {
        self.success.len() + self.user_only.len() + self.item_only.len()
    }

    /// True when no rows are recorded
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over every record, success rows first
    pub fn interactions(&self) -> impl Iterator<Item = Interaction> + '_ {
        InteractionKind::ALL.into_iter().flat_map(move |kind| {
            self.table(kind)
                .iter()
                .map(move |&(user, item)| Interaction { user, item, kind })
        })
    }

    /// Largest referenced index + 1 for a population (0 when empty)
    pub fn count_hint(&self, node_type: NodeType) -> usize {
        self.interactions()
            .map(|i| match node_type {
                NodeType::User => i.user,
                NodeType::Item => i.item,
            })
            .max()
            .map_or(0, |m| m + 1)
    }

    /// Largest referenced user index plus one
    pub fn n_users_hint(&self) -> usize {
        self.count_hint(NodeType::User)
    }

    /// Largest referenced item index plus one
    pub fn n_items_hint(&self) -> usize {
        self.count_hint(NodeType::Item)
    }

    /// Node counts implied by the referenced indices
    pub fn counts_hint(&self) -> NodeCounts {
        NodeCounts::new(self.n_users_hint(), self.n_items_hint())
    }

    /// Copy with duplicate rows removed (first occurrence kept)
    pub fn deduplicated(&self) -> Self {
        InteractionTables::default().union(self)
    }

    /// Append-only union: existing rows keep their positions, rows of `other`
    /// not already present are appended in order
    pub fn union(&self, other: &InteractionTables) -> Self {
        let mut merged = InteractionTables::default();
        for kind in InteractionKind::ALL {
            let mut seen = HashSet::new();
            let out = merged.table_mut(kind);
            for &pair in self.table(kind).iter().chain(other.table(kind)) {
                if seen.insert(pair) {
                    out.push(pair);
                }
            }
        }
        merged
    }

    /// True when every row of `other` is already present
    pub fn contains_all(&self, other: &InteractionTables) -> bool {
        InteractionKind::ALL.into_iter().all(|kind| {
            let present: HashSet<_> = self.table(kind).iter().collect();
            other.table(kind).iter().all(|pair| present.contains(pair))
        })
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn pairs() -> impl Strategy<Value = Vec<(usize, usize)>> {
        prop::collection::vec((0usize..8, 0usize..8), 0..20)
    }

    proptest! {
        /// Property: the union never loses or reorders existing rows
        #[test]
        fn test_union_preserves_prefix(a in pairs(), b in pairs()) {
            let base = InteractionTables::new(a, vec![], vec![]).deduplicated();
            let delta = InteractionTables::new(b, vec![], vec![]);
            let merged = base.union(&delta);

            prop_assert!(merged.success.len() >= base.success.len());
            prop_assert_eq!(&merged.success[..base.success.len()], &base.success[..]);
            prop_assert!(merged.contains_all(&delta));
        }
    }
}
