//! Native serialized estimator: a gradient-boosted tree ensemble.
//!
//! This is the trained model in its full representation — per-node splits,
//! leaf values and sample covers — exported by the training pipeline as
//! JSON. It serves two roles: fallback scorer when the compiled graph is
//! absent or fails, and the only backend capable of per-feature attribution
//! (the tree walk needs the node covers that the compiled graph discards).
//!
//! The file is either a bare ensemble object or a pipeline wrapper with
//! named steps, mirroring how the training side persists its estimator.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Name of the pipeline step holding the classifier. Attribution is built
/// against this step, not the wrapper.
pub const SCORING_STEP: &str = "clf";

/// Output transformation applied to the summed tree margins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    /// Sigmoid link: probability = 1 / (1 + exp(-margin)).
    BinaryLogistic,
    /// Margins are already probabilities; clamped to [0, 1].
    Raw,
}

/// One regression tree in flat-array form.
///
/// `left_child[i] < 0` marks node `i` as a leaf; `value[i]` is only
/// meaningful on leaves. `cover[i]` is the training sample weight that
/// reached node `i`, used for expected values and attribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    pub split_feature: Vec<i32>,
    pub threshold: Vec<f64>,
    pub left_child: Vec<i32>,
    pub right_child: Vec<i32>,
    pub value: Vec<f64>,
    pub cover: Vec<f64>,
    /// Routing for missing values at each split; empty means "left".
    #[serde(default)]
    pub default_left: Vec<bool>,
}

impl DecisionTree {
    pub fn is_leaf(&self, node: usize) -> bool {
        self.left_child[node] < 0
    }

    /// Child index the row is routed to at an internal node. Missing values
    /// (NaN) follow the recorded default direction.
    pub fn route(&self, node: usize, features: &[f64]) -> usize {
        let feature = self.split_feature[node] as usize;
        let x = features.get(feature).copied().unwrap_or(f64::NAN);
        let go_left = if x.is_nan() {
            self.default_left.get(node).copied().unwrap_or(true)
        } else {
            x <= self.threshold[node]
        };
        if go_left {
            self.left_child[node] as usize
        } else {
            self.right_child[node] as usize
        }
    }

    /// Walk the tree and return the leaf value for this row.
    pub fn predict(&self, features: &[f64]) -> f64 {
        let mut node = 0usize;
        while !self.is_leaf(node) {
            node = self.route(node, features);
        }
        self.value[node]
    }

    /// Cover-weighted mean leaf value (the tree's output with no feature
    /// information).
    pub fn expected_value(&self) -> f64 {
        self.expected_from(0)
    }

    fn expected_from(&self, node: usize) -> f64 {
        if self.is_leaf(node) {
            return self.value[node];
        }
        let left = self.left_child[node] as usize;
        let right = self.right_child[node] as usize;
        let total = self.cover[node];
        if total <= 0.0 {
            return 0.0;
        }
        (self.cover[left] / total) * self.expected_from(left)
            + (self.cover[right] / total) * self.expected_from(right)
    }

    fn validate(&self, index: usize, num_features: usize) -> Result<()> {
        let n = self.left_child.len();
        if self.right_child.len() != n
            || self.split_feature.len() != n
            || self.threshold.len() != n
            || self.value.len() != n
            || self.cover.len() != n
        {
            anyhow::bail!("tree {}: node arrays have mismatched lengths", index);
        }
        if n == 0 {
            anyhow::bail!("tree {}: empty", index);
        }
        for node in 0..n {
            if self.is_leaf(node) {
                continue;
            }
            let left = self.left_child[node];
            let right = self.right_child[node];
            if left < 0 || right < 0 || left as usize >= n || right as usize >= n {
                anyhow::bail!("tree {}: node {} has out-of-range children", index, node);
            }
            let feature = self.split_feature[node];
            if feature < 0 || feature as usize >= num_features {
                anyhow::bail!(
                    "tree {}: node {} splits on unknown feature {}",
                    index,
                    node,
                    feature
                );
            }
            if self.cover[node] <= 0.0 {
                anyhow::bail!("tree {}: node {} has non-positive cover", index, node);
            }
        }
        Ok(())
    }
}

/// The boosted ensemble: summed tree outputs plus a base margin, pushed
/// through the objective's link function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoostedTrees {
    pub objective: Objective,
    pub num_features: usize,
    #[serde(default)]
    pub base_score: f64,
    #[serde(default)]
    pub feature_names: Vec<String>,
    pub trees: Vec<DecisionTree>,
}

impl GradientBoostedTrees {
    /// Raw ensemble output (pre-link).
    pub fn margin(&self, features: &[f64]) -> f64 {
        let sum: f64 = self.trees.iter().map(|t| t.predict(features)).sum();
        self.base_score + sum
    }

    /// Positive-class probability for one row; always within [0, 1].
    pub fn predict_probability(&self, features: &[f64]) -> f64 {
        let margin = self.margin(features);
        match self.objective {
            Objective::BinaryLogistic => 1.0 / (1.0 + (-margin).exp()),
            Objective::Raw => margin.clamp(0.0, 1.0),
        }
    }

    /// Expected raw output over the training distribution — the attribution
    /// baseline.
    pub fn expected_value(&self) -> f64 {
        let sum: f64 = self.trees.iter().map(|t| t.expected_value()).sum();
        self.base_score + sum
    }

    fn validate(&self) -> Result<()> {
        if self.num_features == 0 {
            anyhow::bail!("ensemble declares zero features");
        }
        if self.trees.is_empty() {
            anyhow::bail!("ensemble has no trees");
        }
        if !self.feature_names.is_empty() && self.feature_names.len() != self.num_features {
            anyhow::bail!(
                "feature_names length {} does not match num_features {}",
                self.feature_names.len(),
                self.num_features
            );
        }
        for (index, tree) in self.trees.iter().enumerate() {
            tree.validate(index, self.num_features)?;
        }
        Ok(())
    }
}

/// One named step of a persisted pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStep {
    pub name: String,
    pub estimator: GradientBoostedTrees,
}

/// On-disk shape: either the estimator itself or a pipeline wrapping it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum NativeArtifact {
    Pipeline { steps: Vec<PipelineStep> },
    Estimator(Box<GradientBoostedTrees>),
}

/// Loaded native estimator, pipeline-aware.
#[derive(Debug, Clone)]
pub struct NativeModel {
    artifact: NativeArtifact,
}

impl NativeModel {
    /// Load and validate the serialized estimator.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read native model file: {}", path.display()))?;
        let artifact: NativeArtifact = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse native model file: {}", path.display()))?;

        let model = Self { artifact };
        match &model.artifact {
            NativeArtifact::Pipeline { steps } if steps.is_empty() => {
                anyhow::bail!("pipeline wrapper has no steps");
            }
            NativeArtifact::Pipeline { steps } => {
                for step in steps {
                    step.estimator
                        .validate()
                        .with_context(|| format!("pipeline step '{}'", step.name))?;
                }
            }
            NativeArtifact::Estimator(estimator) => estimator.validate()?,
        }
        Ok(model)
    }

    #[cfg(test)]
    pub fn from_estimator(estimator: GradientBoostedTrees) -> Self {
        Self {
            artifact: NativeArtifact::Estimator(Box::new(estimator)),
        }
    }

    /// The estimator used for scoring: the bare object, or the final
    /// pipeline step.
    pub fn scoring_estimator(&self) -> &GradientBoostedTrees {
        match &self.artifact {
            NativeArtifact::Estimator(estimator) => estimator,
            NativeArtifact::Pipeline { steps } => {
                // Validated non-empty at load.
                &steps[steps.len() - 1].estimator
            }
        }
    }

    /// The estimator attribution is built against: the step named `clf`
    /// when the artifact is a pipeline, otherwise the estimator itself.
    pub fn attribution_estimator(&self) -> &GradientBoostedTrees {
        match &self.artifact {
            NativeArtifact::Estimator(estimator) => estimator,
            NativeArtifact::Pipeline { steps } => steps
                .iter()
                .find(|step| step.name == SCORING_STEP)
                .map(|step| &step.estimator)
                .unwrap_or(&steps[steps.len() - 1].estimator),
        }
    }

    pub fn num_features(&self) -> usize {
        self.scoring_estimator().num_features
    }

    /// Feature names recorded at training time, if any.
    pub fn feature_names(&self) -> &[String] {
        &self.scoring_estimator().feature_names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Single split on feature 0 at 0.5: left leaf 0.2 (cover 60), right
    /// leaf 0.8 (cover 40).
    fn stump() -> DecisionTree {
        DecisionTree {
            split_feature: vec![0, -1, -1],
            threshold: vec![0.5, 0.0, 0.0],
            left_child: vec![1, -1, -1],
            right_child: vec![2, -1, -1],
            value: vec![0.0, 0.2, 0.8],
            cover: vec![100.0, 60.0, 40.0],
            default_left: vec![],
        }
    }

    fn stump_ensemble() -> GradientBoostedTrees {
        GradientBoostedTrees {
            objective: Objective::Raw,
            num_features: 2,
            base_score: 0.0,
            feature_names: vec!["EXT_SOURCE_1".into(), "AMT_CREDIT".into()],
            trees: vec![stump()],
        }
    }

    #[test]
    fn test_predict_routes_on_threshold() {
        let tree = stump();
        assert_relative_eq!(tree.predict(&[0.3, 9.9]), 0.2);
        assert_relative_eq!(tree.predict(&[0.7, 9.9]), 0.8);
        // Boundary value goes left.
        assert_relative_eq!(tree.predict(&[0.5, 9.9]), 0.2);
    }

    #[test]
    fn test_missing_value_follows_default_direction() {
        let mut tree = stump();
        assert_relative_eq!(tree.predict(&[f64::NAN, 0.0]), 0.2);
        tree.default_left = vec![false, true, true];
        assert_relative_eq!(tree.predict(&[f64::NAN, 0.0]), 0.8);
    }

    #[test]
    fn test_expected_value_is_cover_weighted() {
        let tree = stump();
        // 0.6 * 0.2 + 0.4 * 0.8
        assert_relative_eq!(tree.expected_value(), 0.44, epsilon = 1e-12);
    }

    #[test]
    fn test_probability_is_clamped_for_raw_objective() {
        let mut ensemble = stump_ensemble();
        ensemble.base_score = 1.5;
        assert_relative_eq!(ensemble.predict_probability(&[0.7, 0.0]), 1.0);
    }

    #[test]
    fn test_logistic_objective_applies_sigmoid() {
        let mut ensemble = stump_ensemble();
        ensemble.objective = Objective::BinaryLogistic;
        let p = ensemble.predict_probability(&[0.7, 0.0]);
        assert_relative_eq!(p, 1.0 / (1.0 + (-0.8f64).exp()), epsilon = 1e-12);
    }

    #[test]
    fn test_parses_bare_estimator_json() {
        let json = serde_json::to_string(&stump_ensemble()).unwrap();
        let artifact: NativeArtifact = serde_json::from_str(&json).unwrap();
        let model = NativeModel { artifact };
        assert_eq!(model.num_features(), 2);
        assert_relative_eq!(model.scoring_estimator().predict_probability(&[0.7, 0.0]), 0.8);
    }

    #[test]
    fn test_pipeline_attribution_targets_named_step() {
        let mut other = stump_ensemble();
        other.base_score = 0.1;
        let json = serde_json::json!({
            "steps": [
                { "name": "calibrator", "estimator": other },
                { "name": "clf", "estimator": stump_ensemble() },
            ]
        })
        .to_string();
        let artifact: NativeArtifact = serde_json::from_str(&json).unwrap();
        let model = NativeModel { artifact };
        // Scoring uses the final step, attribution the step named "clf";
        // here they coincide.
        assert_relative_eq!(model.attribution_estimator().base_score, 0.0);
        assert_relative_eq!(model.scoring_estimator().base_score, 0.0);
    }

    #[test]
    fn test_validate_rejects_mismatched_arrays() {
        let mut ensemble = stump_ensemble();
        ensemble.trees[0].cover.pop();
        assert!(ensemble.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_feature() {
        let mut ensemble = stump_ensemble();
        ensemble.trees[0].split_feature[0] = 7;
        assert!(ensemble.validate().is_err());
    }
}
