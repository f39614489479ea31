//! Frontier growth loop for one tree.
//!
//! The grower owns the mutable [`LearningNode`] graph between parallel
//! phases. Each round: recompute per-instance node ids from the previous
//! round's splits, build the level's histograms (root directly, deeper
//! levels as left children plus subtraction), find the best split per
//! frontier leaf, and apply the splits. Node ids encode structure: the root
//! is 1, children of `id` are `id << 1` and `id << 1 | 1`, so depth and
//! parenthood need no pointers.

use std::collections::HashMap;

use crate::config::{BoostConfig, TreeConfig};
use crate::data::{Checkpointer, ParallelDataset};
use crate::error::Result;
use crate::trees::TreeModel;

use super::histograms::{compute_hists, compute_parallelism, subtract_hists, HistKey, HistVal};
use super::split::Split;
use super::splitter::find_splits;
use super::Instance;

// ============================================================================
// LearningNode
// ============================================================================

/// A node of the tree being grown. Leaves carry a prediction; applying a
/// split turns a leaf into an internal node with two fresh leaf children.
#[derive(Clone, Debug)]
pub struct LearningNode {
    pub node_id: u64,
    pub is_leaf: bool,
    pub prediction: f64,
    pub split: Option<Split>,
    pub left: Option<Box<LearningNode>>,
    pub right: Option<Box<LearningNode>>,
}

impl LearningNode {
    /// Fresh leaf.
    pub fn new_leaf(node_id: u64, prediction: f64) -> Self {
        Self {
            node_id,
            is_leaf: true,
            prediction,
            split: None,
            left: None,
            right: None,
        }
    }

    /// Depth encoded by a node id: the root (id 1) has depth 1.
    #[inline]
    pub fn depth_of(node_id: u64) -> u32 {
        64 - node_id.leading_zeros()
    }

    /// Walk down to the node with the given id, following the id's bits
    /// below this node's depth.
    pub fn find_mut(&mut self, node_id: u64) -> Option<&mut LearningNode> {
        let here = Self::depth_of(self.node_id);
        let there = Self::depth_of(node_id);
        if there < here || node_id >> (there - here) != self.node_id {
            return None;
        }
        let mut node = self;
        for level in (0..there - here).rev() {
            node = if node_id >> level & 1 == 0 {
                node.left.as_deref_mut()?
            } else {
                node.right.as_deref_mut()?
            };
        }
        Some(node)
    }

    /// Turn this leaf into an internal node; the children start as leaves
    /// predicting the split's optimal child weights.
    pub fn apply_split(&mut self, split: Split) {
        debug_assert!(self.is_leaf, "only leaves can be split");
        let left = Self::new_leaf(self.node_id << 1, split.left_weight());
        let right = Self::new_leaf(self.node_id << 1 | 1, split.right_weight());
        self.is_leaf = false;
        self.split = Some(split);
        self.left = Some(Box::new(left));
        self.right = Some(Box::new(right));
    }

    /// Depth of the subtree rooted here, counted in nodes.
    pub fn subtree_depth(&self) -> u32 {
        let left = self.left.as_deref().map_or(0, LearningNode::subtree_depth);
        let right = self.right.as_deref().map_or(0, LearningNode::subtree_depth);
        1 + left.max(right)
    }

    /// Leaves in the subtree rooted here.
    pub fn num_leaves(&self) -> u64 {
        if self.is_leaf {
            return 1;
        }
        self.left.as_deref().map_or(0, LearningNode::num_leaves)
            + self.right.as_deref().map_or(0, LearningNode::num_leaves)
    }

    /// Internal nodes in the subtree rooted here.
    pub fn num_internal(&self) -> u64 {
        if self.is_leaf {
            return 0;
        }
        1 + self.left.as_deref().map_or(0, LearningNode::num_internal)
            + self.right.as_deref().map_or(0, LearningNode::num_internal)
    }
}

// ============================================================================
// TreeGrower
// ============================================================================

/// Grows one tree over a discretized dataset with per-instance gradients.
pub struct TreeGrower<'a> {
    boost: &'a BoostConfig,
    tree: &'a TreeConfig,
}

impl<'a> TreeGrower<'a> {
    pub fn new(boost: &'a BoostConfig, tree: &'a TreeConfig) -> Self {
        Self { boost, tree }
    }

    /// Grow a tree; `None` when the root never splits.
    ///
    /// The instance bins must be indexed by the tree's selected columns
    /// (`tree.columns` maps them back to original column ids in the
    /// materialized model).
    pub fn grow<H: HistVal>(
        &self,
        data: &ParallelDataset<Instance<H>>,
    ) -> Result<Option<TreeModel>> {
        self.boost.validate()?;

        let mut checkpointer = Checkpointer::new(
            self.boost.checkpoint_interval,
            self.boost.storage_level,
            self.boost.checkpoint_dir.clone(),
        );

        let mut root = LearningNode::new_leaf(1, 0.0);
        let mut node_ids: ParallelDataset<u64> = data.map(|_| 1u64);
        let mut prev_hists: Option<ParallelDataset<(HistKey, Vec<H>)>> = None;
        let mut last_splits: HashMap<u64, Split> = HashMap::new();
        let mut min_node_id = 1u64;
        let mut num_leaves = 1u64;
        let max_rounds = (self.boost.max_depth as u64).saturating_sub(1);
        let mut depth = 0u64;

        while depth < max_rounds && num_leaves < self.boost.max_leaves {
            let parallelism = compute_parallelism(
                num_leaves,
                self.tree.num_cols,
                self.boost.col_sample_by_level,
            );

            // Route every instance one level down through the previous
            // round's splits; instances at unsplit nodes keep their id.
            if min_node_id > 1 {
                let splits = &last_splits;
                node_ids = data
                    .zip(&node_ids)
                    .map(|(inst, nid)| route_instance(inst, *nid, splits));
            }
            checkpointer.update(&node_ids);

            let with_ids = data.zip(&node_ids);
            let hists = if min_node_id == 1 {
                compute_hists(&with_ids, parallelism)
            } else {
                let left_data =
                    with_ids.filter(|(_, nid)| *nid >= min_node_id && nid % 2 == 0);
                let left = compute_hists(&left_data, parallelism);
                subtract_hists(
                    prev_hists.as_ref().expect("histograms of previous level"),
                    &left,
                    self.boost.min_node_hess,
                    parallelism,
                )
            };
            checkpointer.update(&hists);

            let seed = self.boost.seed + self.tree.tree_index as i64 + depth as i64;
            let splits = find_splits(&hists, self.boost, self.tree, seed as u64);

            if splits.is_empty() {
                break;
            }
            if num_leaves + splits.len() as u64 > self.boost.max_leaves {
                break;
            }
            for (node_id, split) in &splits {
                let node = root
                    .find_mut(*node_id)
                    .expect("split target present in the growing tree");
                node.apply_split(split.clone());
            }
            num_leaves += splits.len() as u64;

            last_splits = splits;
            min_node_id <<= 1;
            prev_hists = Some(hists);
            depth += 1;
        }

        checkpointer.unpersist_all();
        checkpointer.delete_all_checkpoints();

        if root.is_leaf {
            return Ok(None);
        }
        Ok(Some(TreeModel::from_root(&root, self.tree.columns.clone())))
    }
}

/// One routing step: follow the node's split if it was split last round.
fn route_instance<H: HistVal>(
    inst: &Instance<H>,
    node_id: u64,
    splits: &HashMap<u64, Split>,
) -> u64 {
    match splits.get(&node_id) {
        Some(split) => {
            let bin = inst.bins[split.feature() as usize];
            if split.goes_left(bin) {
                node_id << 1
            } else {
                node_id << 1 | 1
            }
        }
        None => node_id,
    }
}

// ============================================================================
// Tests
// ============================================================================
