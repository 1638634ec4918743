//! Per-client explanation engine.
//!
//! Computes the full additive attribution vector against the native
//! estimator's attribution sub-model and returns the strongest K signals.
//! Baseline, attributions and model output all live in the ensemble's raw
//! output space, so the attributions reconstruct `model_output - baseline`
//! exactly; the sigmoid link only transforms the separately served
//! probability.

use serde::Serialize;

use crate::error::{BackendError, ScoringError};
use crate::model::{NativeModel, TreeExplainer};
use crate::repository::ClientFeatures;

/// One signed feature contribution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureAttribution {
    pub feature: String,
    pub value: f64,
}

/// Attribution result for one client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Explanation {
    pub client_id: i64,
    /// Expected model output with no feature information.
    pub baseline: f64,
    /// Raw model output for this row; `baseline + sum(all attributions)`.
    pub model_output: f64,
    /// Top-K attributions by absolute magnitude, strongest first.
    pub attributions: Vec<FeatureAttribution>,
}

/// Explanation engine over the native estimator. No fallback exists for
/// explanation: the compiled graph cannot attribute.
pub struct ExplanationEngine<'a> {
    model: &'a NativeModel,
    top_k: usize,
}

impl<'a> ExplanationEngine<'a> {
    pub fn new(model: &'a NativeModel, top_k: usize) -> Self {
        Self { model, top_k }
    }

    pub fn explain(&self, features: &ClientFeatures) -> Result<Explanation, ScoringError> {
        let estimator = self.model.attribution_estimator();
        if features.len() != estimator.num_features {
            return Err(ScoringError::Compute(anyhow::Error::new(
                BackendError::Output(format!(
                    "row has {} features, attribution model expects {}",
                    features.len(),
                    estimator.num_features
                )),
            )));
        }

        let explainer = TreeExplainer::new(estimator);
        let baseline = explainer.baseline();
        let values = explainer.attributions(features.values());
        let model_output = estimator.margin(features.values());

        // Names recorded at training time win; the repository column order
        // is the fallback for older exports.
        let trained_names = estimator.feature_names.as_slice();
        let mut attributions: Vec<FeatureAttribution> = values
            .iter()
            .enumerate()
            .map(|(index, &value)| {
                let feature = trained_names
                    .get(index)
                    .cloned()
                    .or_else(|| features.names().get(index).cloned())
                    .unwrap_or_else(|| format!("feature_{index}"));
                FeatureAttribution { feature, value }
            })
            .collect();

        attributions.sort_by(|a, b| {
            b.value
                .abs()
                .partial_cmp(&a.value.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        attributions.truncate(self.top_k);

        Ok(Explanation {
            client_id: features.client_id(),
            baseline,
            model_output,
            attributions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::native::{DecisionTree, GradientBoostedTrees, Objective};
    use approx::assert_relative_eq;

    fn model() -> NativeModel {
        NativeModel::from_estimator(GradientBoostedTrees {
            objective: Objective::Raw,
            num_features: 3,
            base_score: 0.0,
            feature_names: vec![
                "EXT_SOURCE_1".into(),
                "PAYMENT_RATE".into(),
                "AMT_CREDIT".into(),
            ],
            trees: vec![
                DecisionTree {
                    split_feature: vec![0, -1, -1],
                    threshold: vec![0.5, 0.0, 0.0],
                    left_child: vec![1, -1, -1],
                    right_child: vec![2, -1, -1],
                    value: vec![0.0, 0.1, 0.6],
                    cover: vec![100.0, 50.0, 50.0],
                    default_left: vec![],
                },
                DecisionTree {
                    split_feature: vec![1, -1, -1],
                    threshold: vec![0.2, 0.0, 0.0],
                    left_child: vec![1, -1, -1],
                    right_child: vec![2, -1, -1],
                    value: vec![0.0, -0.05, 0.15],
                    cover: vec![100.0, 40.0, 60.0],
                    default_left: vec![],
                },
            ],
        })
    }

    fn row(values: Vec<f64>) -> ClientFeatures {
        ClientFeatures::for_tests(
            100004,
            vec![
                "EXT_SOURCE_1".into(),
                "PAYMENT_RATE".into(),
                "AMT_CREDIT".into(),
            ],
            values,
        )
    }

    #[test]
    fn test_attributions_reconstruct_output_minus_baseline() {
        let model = model();
        let engine = ExplanationEngine::new(&model, 10);
        let features = row(vec![0.7, 0.1, 5.0]);
        let explanation = engine.explain(&features).unwrap();

        let sum: f64 = explanation.attributions.iter().map(|a| a.value).sum();
        assert_relative_eq!(
            sum,
            explanation.model_output - explanation.baseline,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_attributions_are_ranked_by_magnitude_and_named() {
        let model = model();
        let engine = ExplanationEngine::new(&model, 10);
        let explanation = engine.explain(&row(vec![0.7, 0.1, 5.0])).unwrap();

        assert_eq!(explanation.attributions[0].feature, "EXT_SOURCE_1");
        let magnitudes: Vec<f64> = explanation
            .attributions
            .iter()
            .map(|a| a.value.abs())
            .collect();
        assert!(magnitudes.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_top_k_truncates() {
        let model = model();
        let engine = ExplanationEngine::new(&model, 1);
        let explanation = engine.explain(&row(vec![0.7, 0.1, 5.0])).unwrap();
        assert_eq!(explanation.attributions.len(), 1);
    }

    #[test]
    fn test_feature_count_mismatch_is_compute_failure() {
        let model = model();
        let engine = ExplanationEngine::new(&model, 10);
        let features = ClientFeatures::for_tests(1, vec!["a".into()], vec![0.5]);
        assert!(matches!(
            engine.explain(&features),
            Err(ScoringError::Compute(_))
        ));
    }
}
