//! Additive per-feature attribution for tree ensembles.
//!
//! Exact tree-path attribution (Shapley values for trees): each feature
//! receives a signed contribution and the contributions reconstruct the
//! model output relative to the cover-weighted expected value,
//! `sum(attributions) = margin(x) - baseline`, in the ensemble's raw output
//! space. Missing-value routing during attribution is the same `route` used
//! for prediction, so explained and served paths never diverge.

use crate::model::native::{DecisionTree, GradientBoostedTrees};

/// Attribution engine over a tree ensemble.
pub struct TreeExplainer<'a> {
    model: &'a GradientBoostedTrees,
}

impl<'a> TreeExplainer<'a> {
    pub fn new(model: &'a GradientBoostedTrees) -> Self {
        Self { model }
    }

    /// Expected raw output with no feature information.
    pub fn baseline(&self) -> f64 {
        self.model.expected_value()
    }

    /// One signed contribution per feature for this row.
    pub fn attributions(&self, features: &[f64]) -> Vec<f64> {
        let mut phi = vec![0.0; self.model.num_features];
        for tree in &self.model.trees {
            tree_attributions(tree, features, &mut phi);
        }
        phi
    }
}

/// One element of the feature path maintained while descending a tree.
#[derive(Debug, Clone, Copy)]
struct PathElement {
    /// Split feature, -1 for the root placeholder.
    feature: i32,
    /// Fraction of paths that continue when the feature is unknown.
    zero_fraction: f64,
    /// 1.0 when the row's own value follows this branch, else 0.0.
    one_fraction: f64,
    /// Permutation weight accumulated for this path prefix.
    pweight: f64,
}

fn tree_attributions(tree: &DecisionTree, features: &[f64], phi: &mut [f64]) {
    recurse(tree, features, phi, 0, Vec::new(), 1.0, 1.0, -1);
}

#[allow(clippy::too_many_arguments)]
fn recurse(
    tree: &DecisionTree,
    features: &[f64],
    phi: &mut [f64],
    node: usize,
    mut path: Vec<PathElement>,
    parent_zero_fraction: f64,
    parent_one_fraction: f64,
    parent_feature: i32,
) {
    extend(&mut path, parent_zero_fraction, parent_one_fraction, parent_feature);

    if tree.is_leaf(node) {
        for i in 1..path.len() {
            let weight = unwound_sum(&path, i);
            let element = path[i];
            phi[element.feature as usize] +=
                weight * (element.one_fraction - element.zero_fraction) * tree.value[node];
        }
        return;
    }

    let feature = tree.split_feature[node];
    let left = tree.left_child[node] as usize;
    let right = tree.right_child[node] as usize;
    let hot = tree.route(node, features);
    let cold = if hot == left { right } else { left };

    let node_cover = tree.cover[node];
    let hot_zero_fraction = tree.cover[hot] / node_cover;
    let cold_zero_fraction = tree.cover[cold] / node_cover;

    // A feature already on the path is undone and its fractions folded into
    // the re-extension below.
    let mut incoming_zero_fraction = 1.0;
    let mut incoming_one_fraction = 1.0;
    if let Some(existing) = path.iter().position(|el| el.feature == feature) {
        incoming_zero_fraction = path[existing].zero_fraction;
        incoming_one_fraction = path[existing].one_fraction;
        unwind(&mut path, existing);
    }

    recurse(
        tree,
        features,
        phi,
        hot,
        path.clone(),
        hot_zero_fraction * incoming_zero_fraction,
        incoming_one_fraction,
        feature,
    );
    recurse(
        tree,
        features,
        phi,
        cold,
        path,
        cold_zero_fraction * incoming_zero_fraction,
        0.0,
        feature,
    );
}

fn extend(path: &mut Vec<PathElement>, zero_fraction: f64, one_fraction: f64, feature: i32) {
    let depth = path.len();
    path.push(PathElement {
        feature,
        zero_fraction,
        one_fraction,
        pweight: if depth == 0 { 1.0 } else { 0.0 },
    });
    let d = depth as f64;
    for i in (0..depth).rev() {
        path[i + 1].pweight += one_fraction * path[i].pweight * (i as f64 + 1.0) / (d + 1.0);
        path[i].pweight = zero_fraction * path[i].pweight * (d - i as f64) / (d + 1.0);
    }
}

fn unwind(path: &mut Vec<PathElement>, index: usize) {
    let depth = path.len() - 1;
    let one_fraction = path[index].one_fraction;
    let zero_fraction = path[index].zero_fraction;
    let d = depth as f64;

    let mut next_one_portion = path[depth].pweight;
    for i in (0..depth).rev() {
        if one_fraction != 0.0 {
            let tmp = path[i].pweight;
            path[i].pweight = next_one_portion * (d + 1.0) / ((i as f64 + 1.0) * one_fraction);
            next_one_portion = tmp - path[i].pweight * zero_fraction * (d - i as f64) / (d + 1.0);
        } else {
            path[i].pweight = path[i].pweight * (d + 1.0) / (zero_fraction * (d - i as f64));
        }
    }
    for i in index..depth {
        path[i].feature = path[i + 1].feature;
        path[i].zero_fraction = path[i + 1].zero_fraction;
        path[i].one_fraction = path[i + 1].one_fraction;
    }
    path.pop();
}

fn unwound_sum(path: &[PathElement], index: usize) -> f64 {
    let depth = path.len() - 1;
    let one_fraction = path[index].one_fraction;
    let zero_fraction = path[index].zero_fraction;
    let d = depth as f64;

    let mut next_one_portion = path[depth].pweight;
    let mut total = 0.0;
    for i in (0..depth).rev() {
        if one_fraction != 0.0 {
            let tmp = next_one_portion * (d + 1.0) / ((i as f64 + 1.0) * one_fraction);
            total += tmp;
            next_one_portion = path[i].pweight - tmp * zero_fraction * (d - i as f64) / (d + 1.0);
        } else if zero_fraction != 0.0 {
            total += path[i].pweight * (d + 1.0) / (zero_fraction * (d - i as f64));
        }
    }
    total
}
