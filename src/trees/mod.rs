//! Immutable tree model materialized after growth.
//!
//! A [`TreeModel`] collapses the mutable [`LearningNode`] graph into owned
//! internal/leaf nodes, assigns each leaf a dense index (leaf node-ids
//! sorted ascending), and remembers the selected-column-to-original-column
//! reindex. Prediction is a plain tree walk over a bin vector; it is
//! deliberately unoptimized.

use std::collections::HashMap;

use crate::binning::BinId;
use crate::training::grower::LearningNode;
use crate::training::split::Split;

// ============================================================================
// TreeNode
// ============================================================================

/// One materialized node.
#[derive(Clone, Debug, PartialEq)]
pub enum TreeNode {
    Internal {
        split: Split,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
    Leaf {
        prediction: f64,
        /// Dense leaf index in ascending node-id order.
        leaf_id: u32,
    },
}

// ============================================================================
// TreeModel
// ============================================================================

/// Immutable fitted tree.
#[derive(Clone, Debug, PartialEq)]
pub struct TreeModel {
    root: TreeNode,
    /// Selected column index -> original column id.
    columns: Vec<u32>,
    num_leaves: u32,
    num_internal: u64,
    depth: u32,
}

impl TreeModel {
    /// Materialize from a grown learning-node graph.
    pub fn from_root(root: &LearningNode, columns: Vec<u32>) -> Self {
        let mut leaf_ids = Vec::new();
        collect_leaf_ids(root, &mut leaf_ids);
        leaf_ids.sort_unstable();
        let leaf_index: HashMap<u64, u32> = leaf_ids
            .into_iter()
            .enumerate()
            .map(|(idx, id)| (id, idx as u32))
            .collect();

        Self {
            root: convert(root, &leaf_index),
            columns,
            num_leaves: leaf_index.len() as u32,
            num_internal: root.num_internal(),
            depth: root.subtree_depth(),
        }
    }

    /// Root node.
    #[inline]
    pub fn root(&self) -> &TreeNode {
        &self.root
    }

    /// Selected column index -> original column id.
    #[inline]
    pub fn columns(&self) -> &[u32] {
        &self.columns
    }

    /// Number of leaves.
    #[inline]
    pub fn num_leaves(&self) -> u32 {
        self.num_leaves
    }

    /// Number of internal nodes.
    #[inline]
    pub fn num_internal(&self) -> u64 {
        self.num_internal
    }

    /// Tree depth in nodes (a lone root would be 1).
    #[inline]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Walk the tree over a bin vector indexed by selected column.
    fn leaf(&self, bins: &[BinId]) -> (&f64, &u32) {
        let mut node = &self.root;
        loop {
            match node {
                TreeNode::Internal { split, left, right } => {
                    let bin = bins[split.feature() as usize];
                    node = if split.goes_left(bin) { left } else { right };
                }
                TreeNode::Leaf { prediction, leaf_id } => return (prediction, leaf_id),
            }
        }
    }

    /// Predicted value for a bin vector.
    pub fn predict(&self, bins: &[BinId]) -> f64 {
        *self.leaf(bins).0
    }

    /// Dense leaf index reached by a bin vector.
    pub fn leaf_index(&self, bins: &[BinId]) -> u32 {
        *self.leaf(bins).1
    }
}

fn collect_leaf_ids(node: &LearningNode, out: &mut Vec<u64>) {
    if node.is_leaf {
        out.push(node.node_id);
        return;
    }
    if let Some(left) = node.left.as_deref() {
        collect_leaf_ids(left, out);
    }
    if let Some(right) = node.right.as_deref() {
        collect_leaf_ids(right, out);
    }
}

fn convert(node: &LearningNode, leaf_index: &HashMap<u64, u32>) -> TreeNode {
    if node.is_leaf {
        return TreeNode::Leaf {
            prediction: node.prediction,
            leaf_id: leaf_index[&node.node_id],
        };
    }
    TreeNode::Internal {
        split: node.split.clone().expect("internal node carries a split"),
        left: Box::new(convert(
            node.left.as_deref().expect("internal node has children"),
            leaf_index,
        )),
        right: Box::new(convert(
            node.right.as_deref().expect("internal node has children"),
            leaf_index,
        )),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn seq_split(feature: u32, threshold: BinId, lw: f64, rw: f64) -> Split {
        Split::Seq {
            feature,
            missing_go_left: true,
            threshold,
            gain: 1.0,
            stats: [lw, 0.0, 1.0, rw, 0.0, 1.0],
        }
    }

    fn sample_tree() -> TreeModel {
        // Root splits column 0 at bin 2; its right child splits column 1.
        let mut root = LearningNode::new_leaf(1, 0.0);
        root.apply_split(seq_split(0, 2, -1.0, 1.0));
        root.find_mut(3)
            .unwrap()
            .apply_split(seq_split(1, 1, 0.5, 1.5));
        TreeModel::from_root(&root, vec![4, 9])
    }

    #[test]
    fn test_shape_accessors() {
        let model = sample_tree();
        assert_eq!(model.num_leaves(), 3);
        assert_eq!(model.num_internal(), 2);
        assert_eq!(model.depth(), 3);
        assert_eq!(model.columns(), &[4, 9]);
    }

    #[test]
    fn test_predict_walk() {
        let model = sample_tree();
        assert_eq!(model.predict(&[1, 1]), -1.0);
        assert_eq!(model.predict(&[2, 2]), -1.0);
        assert_eq!(model.predict(&[3, 1]), 0.5);
        assert_eq!(model.predict(&[3, 2]), 1.5);
    }

    #[test]
    fn test_missing_routes_per_split() {
        let model = sample_tree();
        // Bin 0 follows missing_go_left = true at both splits.
        assert_eq!(model.predict(&[0, 0]), -1.0);
        assert_eq!(model.predict(&[3, 0]), 0.5);
    }

    #[test]
    fn test_leaf_ids_ascending_by_node_id() {
        let model = sample_tree();
        // Leaves are nodes 2, 6, 7 -> dense ids 0, 1, 2.
        assert_eq!(model.leaf_index(&[1, 1]), 0);
        assert_eq!(model.leaf_index(&[3, 1]), 1);
        assert_eq!(model.leaf_index(&[3, 2]), 2);
    }
}
