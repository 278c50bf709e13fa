//! Classifier adapter: wraps an opaque, pre-fitted decision tree and exposes a single
//! pure `predict()` function. The tree itself is trained entirely offline (out of
//! scope per SPEC_FULL.md §1) and embedded here as a small JSON node list.

use serde::Deserialize;

use crate::features::FeatureVector;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    Positive,
    Negative,
}

/// One node of the embedded decision tree. Leaves carry a `label`; internal nodes
/// carry a `feature` index (into `FeatureVector::as_row`'s column order), a `threshold`,
/// and the indices of their two children. Traversal goes left when the feature value
/// is less than or equal to the threshold, right otherwise — the same convention
/// scikit-learn's exported trees use, which is what this artifact was trained with.
#[derive(Debug, Clone, Deserialize)]
struct Node {
    feature: Option<usize>,
    threshold: Option<f64>,
    left: Option<usize>,
    right: Option<usize>,
    label: Option<u8>,
}

#[derive(Debug, Clone, Deserialize)]
struct TreeArtifact {
    nodes: Vec<Node>,
}

/// The embedded model artifact, compiled into the binary. There is no training
/// pipeline in this crate; the tree is an opaque, pre-fitted classifier.
const MODEL_JSON: &str = include_str!("../../models/aki_tree.json");

pub struct Classifier {
    tree: TreeArtifact,
}

impl Classifier {
    /// Loads and validates the embedded model artifact once at process start.
    pub fn load() -> Result<Self, serde_json::Error> {
        let tree: TreeArtifact = serde_json::from_str(MODEL_JSON)?;
        log::info!("loaded decision tree classifier with {} nodes", tree.nodes.len());
        Ok(Self { tree })
    }

    /// Walks the tree from the root, returning the reverse-mapped label at the leaf
    /// reached. Feature column order MUST match `FeatureVector::as_row` exactly.
    pub fn predict(&self, features: &FeatureVector) -> Label {
        let row = features.as_row();
        let mut idx = 0usize;
        loop {
            let node = &self.tree.nodes[idx];
            if let Some(raw_label) = node.label {
                return reverse_label_map(raw_label);
            }
            let feature = node.feature.expect("internal node missing feature index");
            let threshold = node.threshold.expect("internal node missing threshold");
            idx = if row[feature] <= threshold {
                node.left.expect("internal node missing left child")
            } else {
                node.right.expect("internal node missing right child")
            };
        }
    }
}

/// Maps the model's raw `{0, 1}` output to the label domain, the reverse of the
/// upstream `LABELS_MAP = {"n": 0, "y": 1}` training convention.
fn reverse_label_map(raw: u8) -> Label {
    match raw {
        1 => Label::Positive,
        _ => Label::Negative,
    }
}
