//! Node module - node types, roles and the role-partitioned block layout

use std::fmt;

/// One of the two populations matched by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeType {
    /// Job seekers
    User,

    /// Job postings
    Item,
}

impl NodeType {
    /// Get the node type name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::User => "user",
            NodeType::Item => "item",
        }
    }

    /// Parse a node type from a string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "user" | "users" => Some(NodeType::User),
            "item" | "items" => Some(NodeType::Item),
            _ => None,
        }
    }

    /// The opposite population
    pub fn other(&self) -> Self {
        match self {
            NodeType::User => NodeType::Item,
            NodeType::Item => NodeType::User,
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("Invalid node type: {}", s))
    }
}

/// The role a node copy plays in the propagation graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The node as the initiator of a preference
    Active,

    /// The node as the target being evaluated
    Passive,
}

impl Role {
    /// The other role of the same node
    pub fn other(&self) -> Self {
        match self {
            Role::Active => Role::Passive,
            Role::Passive => Role::Active,
        }
    }
}

/// One of the four contiguous index blocks of node-role copies
///
/// The declaration order is the layout order in the propagation graph:
/// `[0, nU)` user-active, `[nU, nU+nI)` item-passive,
/// `[nU+nI, 2nU+nI)` user-passive, `[2nU+nI, 2nU+2nI)` item-active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Block {
    /// Users as initiators
    UserActive,

    /// Items as evaluated targets
    ItemPassive,

    /// Users as evaluated targets
    UserPassive,

    /// Items as initiators
    ItemActive,
}

impl Block {
    /// All blocks in layout order
    pub const ALL: [Block; 4] = [
        Block::UserActive,
        Block::ItemPassive,
        Block::UserPassive,
        Block::ItemActive,
    ];

    /// The block holding copies of `node_type` in `role`
    pub fn of(node_type: NodeType, role: Role) -> Self {
        match (node_type, role) {
            (NodeType::User, Role::Active) => Block::UserActive,
            (NodeType::Item, Role::Passive) => Block::ItemPassive,
            (NodeType::User, Role::Passive) => Block::UserPassive,
            (NodeType::Item, Role::Active) => Block::ItemActive,
        }
    }

    /// Node type of the copies in this block
    pub fn node_type(&self) -> NodeType {
        match self {
            Block::UserActive | Block::UserPassive => NodeType::User,
            Block::ItemPassive | Block::ItemActive => NodeType::Item,
        }
    }

    /// Role of the copies in this block
    pub fn role(&self) -> Role {
        match self {
            Block::UserActive | Block::ItemActive => Role::Active,
            Block::ItemPassive | Block::UserPassive => Role::Passive,
        }
    }

    /// The block holding the same nodes in the other role
    pub fn counterpart(&self) -> Self {
        Block::of(self.node_type(), self.role().other())
    }

    /// Stable table name used for checkpoints and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Block::UserActive => "user_active",
            Block::ItemPassive => "item_passive",
            Block::UserPassive => "user_passive",
            Block::ItemActive => "item_active",
        }
    }

    /// Parse a block from its table name
    pub fn parse(s: &str) -> Option<Self> {
        Block::ALL.into_iter().find(|b| b.as_str() == s)
    }

    /// First flat id of this block for the given node counts
    pub fn offset(&self, counts: NodeCounts) -> usize {
        let (u, i) = (counts.users, counts.items);
        match self {
            Block::UserActive => 0,
            Block::ItemPassive => u,
            Block::UserPassive => u + i,
            Block::ItemActive => 2 * u + i,
        }
    }

    /// Number of copies in this block for the given node counts
    pub fn len(&self, counts: NodeCounts) -> usize {
        counts.of(self.node_type())
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node counts per population
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NodeCounts {
    /// Number of users
    pub users: usize,

    /// Number of items
    pub items: usize,
}

impl NodeCounts {
    /// Create node counts
    pub fn new(users: usize, items: usize) -> Self {
        Self { users, items }
    }

    /// Count for one population
    pub fn of(&self, node_type: NodeType) -> usize {
        match node_type {
            NodeType::User => self.users,
            NodeType::Item => self.items,
        }
    }

    /// Total number of node-role copies in the propagation graph
    pub fn total_copies(&self) -> usize {
        2 * self.users + 2 * self.items
    }

    /// True when every count is at most the matching count in `other`
    pub fn fits_within(&self, other: NodeCounts) -> bool {
        self.users <= other.users && self.items <= other.items
    }

    /// Element-wise maximum
    pub fn max(&self, other: NodeCounts) -> NodeCounts {
        NodeCounts::new(self.users.max(other.users), self.items.max(other.items))
    }
}

impl fmt::Display for NodeCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} users / {} items", self.users, self.items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_layout_is_contiguous() {
        let counts = NodeCounts::new(3, 5);
        let mut next = 0;
        for block in Block::ALL {
            assert_eq!(block.offset(counts), next);
            next += block.len(counts);
        }
        assert_eq!(next, counts.total_copies());
    }

    #[test]
    fn test_block_roles() {
        for block in Block::ALL {
            assert_eq!(Block::of(block.node_type(), block.role()), block);
            assert_ne!(block.counterpart(), block);
            assert_eq!(block.counterpart().counterpart(), block);
            assert_eq!(block.counterpart().node_type(), block.node_type());
        }
    }

    #[test]
    fn test_block_names() {
        for block in Block::ALL {
            assert_eq!(Block::parse(block.as_str()), Some(block));
        }
        assert_eq!(Block::parse("user"), None);
    }

    #[test]
    fn test_counts_fit() {
        assert!(NodeCounts::new(3, 3).fits_within(NodeCounts::new(4, 3)));
        assert!(!NodeCounts::new(5, 3).fits_within(NodeCounts::new(4, 3)));
        assert_eq!(
            NodeCounts::new(5, 1).max(NodeCounts::new(2, 4)),
            NodeCounts::new(5, 4)
        );
    }

    #[test]
    fn test_node_type_parse() {
        assert_eq!("User".parse::<NodeType>(), Ok(NodeType::User));
        assert_eq!(NodeType::parse("items"), Some(NodeType::Item));
        assert!("course".parse::<NodeType>().is_err());
    }
}
