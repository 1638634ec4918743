//! Scoring engine with ordered backend fallback.
//!
//! Both model forms implement one capability — score a feature row — behind
//! the `Scorer` trait. Selection is a fixed, documented tie-break: the
//! compiled graph is tried first, the native estimator second. A backend
//! failure is an inspected return value, not a caught unwind; on compiled
//! failure the engine logs and makes exactly one fallback attempt.

use serde::Serialize;

use crate::error::{BackendError, ScoringError};
use crate::model::{CompiledGraph, ModelArtifacts, NativeModel};

/// Which model form produced a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Compiled,
    Native,
}

/// One scoring capability per backend variant.
pub trait Scorer: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Positive-class probability for one feature row.
    fn score(&self, features: &[f64]) -> Result<f64, BackendError>;
}

impl Scorer for CompiledGraph {
    fn kind(&self) -> BackendKind {
        BackendKind::Compiled
    }

    fn score(&self, features: &[f64]) -> Result<f64, BackendError> {
        CompiledGraph::score(self, features)
    }
}

impl Scorer for NativeModel {
    fn kind(&self) -> BackendKind {
        BackendKind::Native
    }

    fn score(&self, features: &[f64]) -> Result<f64, BackendError> {
        let estimator = self.scoring_estimator();
        if features.len() != estimator.num_features {
            return Err(BackendError::Output(format!(
                "row has {} features, model expects {}",
                features.len(),
                estimator.num_features
            )));
        }
        Ok(estimator.predict_probability(features))
    }
}

/// Ordered fallback over the loaded backends.
pub struct InferenceEngine<'a> {
    compiled: Option<&'a dyn Scorer>,
    native: Option<&'a dyn Scorer>,
}

impl<'a> InferenceEngine<'a> {
    pub fn new(compiled: Option<&'a dyn Scorer>, native: Option<&'a dyn Scorer>) -> Self {
        Self { compiled, native }
    }

    pub fn from_artifacts(artifacts: &'a ModelArtifacts) -> Self {
        Self {
            compiled: artifacts.compiled.as_ref().map(|c| c as &dyn Scorer),
            native: artifacts.native.as_ref().map(|n| n as &dyn Scorer),
        }
    }

    /// At least one backend is loaded.
    pub fn available(&self) -> bool {
        self.compiled.is_some() || self.native.is_some()
    }

    /// Score a row: compiled first, native on compiled failure. The score
    /// is always within [0, 1] when produced.
    pub fn score(&self, features: &[f64]) -> Result<(f64, BackendKind), ScoringError> {
        if !self.available() {
            return Err(ScoringError::Unavailable);
        }

        let mut last_error: Option<BackendError> = None;
        for backend in [self.compiled, self.native].into_iter().flatten() {
            match backend.score(features) {
                Ok(probability) => {
                    return Ok((probability.clamp(0.0, 1.0), backend.kind()));
                }
                Err(e) => {
                    tracing::warn!("{:?} backend failed, falling back: {}", backend.kind(), e);
                    last_error = Some(e);
                }
            }
        }

        // At least one loaded backend ran and failed.
        Err(ScoringError::Compute(anyhow::Error::new(
            last_error.expect("at least one backend attempted"),
        )))
    }
}
