//! Stable ID newtypes for IR entities.
//!
//! Distinct newtype wrappers over `u32` so a `BlockId` cannot be used
//! where a `ValueId` is expected. `BlockId` bridges to petgraph's
//! `NodeIndex<u32>`.

use std::fmt;

use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};

/// Stable basic-block identifier. Maps to a petgraph `NodeIndex<u32>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(pub u32);

/// SSA value identifier within a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValueId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

impl From<NodeIndex<u32>> for BlockId {
    fn from(idx: NodeIndex<u32>) -> Self {
        BlockId(idx.index() as u32)
    }
}

impl From<BlockId> for NodeIndex<u32> {
    fn from(id: BlockId) -> Self {
        NodeIndex::new(id.0 as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_id_node_index_roundtrip() {
        let idx = NodeIndex::<u32>::new(17);
        let id = BlockId::from(idx);
        assert_eq!(id.0, 17);
        let back: NodeIndex<u32> = id.into();
        assert_eq!(back.index(), 17);
    }

    #[test]
    fn display_forms() {
        assert_eq!(format!("{}", BlockId(2)), "bb2");
        assert_eq!(format!("{}", ValueId(5)), "%5");
    }

    #[test]
    fn serde_roundtrip() {
        let id = ValueId(9);
        let json = serde_json::to_string(&id).unwrap();
        let back: ValueId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
