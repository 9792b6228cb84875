//! Direction module - which population queries and which is ranked

use crate::NodeType;
use std::fmt;

/// Query direction over the bipartite graph
///
/// Passed explicitly to every stage (sampling, scoring, evaluation) instead of
/// flipping shared state, so there is never a "swap back" step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Users query, items are ranked
    UserToItem,

    /// Items query, users are ranked
    ItemToUser,
}

impl Direction {
    /// Both directions in training order
    pub const BOTH: [Direction; 2] = [Direction::UserToItem, Direction::ItemToUser];

    /// Population issuing queries
    pub fn query_type(&self) -> NodeType {
        match self {
            Direction::UserToItem => NodeType::User,
            Direction::ItemToUser => NodeType::Item,
        }
    }

    /// Population being ranked
    pub fn candidate_type(&self) -> NodeType {
        self.query_type().other()
    }

    /// The opposite direction
    pub fn swapped(&self) -> Self {
        match self {
            Direction::UserToItem => Direction::ItemToUser,
            Direction::ItemToUser => Direction::UserToItem,
        }
    }

    /// Map a `(query, candidate)` pair to `(user, item)`
    pub fn orient(&self, query: usize, candidate: usize) -> (usize, usize) {
        match self {
            Direction::UserToItem => (query, candidate),
            Direction::ItemToUser => (candidate, query),
        }
    }

    /// Map a `(user, item)` pair to `(query, candidate)`
    pub fn from_pair(&self, user: usize, item: usize) -> (usize, usize) {
        // orient is its own inverse
        self.orient(user, item)
    }

    /// Direction used for the given epoch (even epochs user-to-item)
    pub fn for_epoch(epoch: usize) -> Self {
        if epoch % 2 == 0 {
            Direction::UserToItem
        } else {
            Direction::ItemToUser
        }
    }

    /// Get the direction label as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::UserToItem => "user-item",
            Direction::ItemToUser => "item-user",
        }
    }

    /// Parse a direction label
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "user-item" | "user_item" | "a" => Some(Direction::UserToItem),
            "item-user" | "item_user" | "b" => Some(Direction::ItemToUser),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("Invalid direction: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_types() {
        assert_eq!(Direction::UserToItem.query_type(), NodeType::User);
        assert_eq!(Direction::UserToItem.candidate_type(), NodeType::Item);
        assert_eq!(Direction::ItemToUser.query_type(), NodeType::Item);
        assert_eq!(Direction::ItemToUser.candidate_type(), NodeType::User);
    }

    #[test]
    fn test_orient_roundtrip() {
        for direction in Direction::BOTH {
            let (q, c) = direction.from_pair(4, 9);
            assert_eq!(direction.orient(q, c), (4, 9));
        }
        assert_eq!(Direction::ItemToUser.from_pair(4, 9), (9, 4));
    }

    #[test]
    fn test_epoch_alternation() {
        assert_eq!(Direction::for_epoch(0), Direction::UserToItem);
        assert_eq!(Direction::for_epoch(1), Direction::ItemToUser);
        assert_eq!(Direction::for_epoch(2), Direction::UserToItem);
        assert_eq!(Direction::for_epoch(3).swapped(), Direction::UserToItem);
    }

    #[test]
    fn test_parse() {
        assert_eq!("item-user".parse::<Direction>(), Ok(Direction::ItemToUser));
        assert_eq!(Direction::parse("USER-ITEM"), Some(Direction::UserToItem));
        assert!(Direction::parse("sideways").is_none());
    }
}
