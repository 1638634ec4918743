//! Compiled inference graph backend.
//!
//! Loads the portable ONNX export of the trained classifier through tract
//! and runs it for single-row scoring. The graph's input tensor name is
//! discovered from the parsed model at load time — converter versions have
//! changed it before, so it is never assumed.

use anyhow::{Context, Result};
use std::path::Path;
use tract_onnx::prelude::*;

use crate::error::BackendError;

/// Optimized, runnable computation graph plus the discovered input name.
pub struct CompiledGraph {
    plan: TypedRunnableModel<TypedModel>,
    input_name: String,
}

impl CompiledGraph {
    /// Parse, optimize and plan the graph at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let inference = tract_onnx::onnx()
            .model_for_path(path)
            .with_context(|| format!("failed to parse compiled graph: {}", path.display()))?;

        let input_outlet = *inference
            .input_outlets()
            .context("compiled graph has no declared inputs")?
            .first()
            .context("compiled graph has no input tensor")?;
        let input_name = inference.node(input_outlet.node).name.clone();

        let plan = inference
            .into_optimized()
            .with_context(|| format!("failed to optimize compiled graph: {}", path.display()))?
            .into_runnable()
            .with_context(|| format!("failed to plan compiled graph: {}", path.display()))?;

        tracing::info!(
            input = %input_name,
            "compiled graph loaded from {}",
            path.display()
        );
        Ok(Self { plan, input_name })
    }

    pub fn input_name(&self) -> &str {
        &self.input_name
    }

    /// Score one row. Classifier graphs emit `[labels, probabilities]`; the
    /// positive-class probability sits at row 0, column 1 of the second
    /// output. Single-output graphs are treated as emitting probabilities
    /// directly.
    pub fn score(&self, features: &[f64]) -> Result<f64, BackendError> {
        let row: Vec<f32> = features.iter().map(|&v| v as f32).collect();
        let input = Tensor::from_shape(&[1, row.len()], &row)
            .map_err(BackendError::Runtime)?;

        let outputs = self
            .plan
            .run(tvec!(input.into()))
            .map_err(BackendError::Runtime)?;

        let probabilities = if outputs.len() > 1 {
            &outputs[1]
        } else {
            outputs
                .first()
                .ok_or_else(|| BackendError::Output("graph produced no outputs".into()))?
        };

        let view = probabilities
            .to_array_view::<f32>()
            .map_err(BackendError::Runtime)?;

        let probability = match view.ndim() {
            2 if view.shape()[0] >= 1 && view.shape()[1] >= 2 => f64::from(view[[0, 1]]),
            _ => match view.iter().last() {
                Some(&value) => f64::from(value),
                None => {
                    return Err(BackendError::Output(
                        "probability tensor is empty".into(),
                    ))
                }
            },
        };

        if !probability.is_finite() {
            return Err(BackendError::Output(format!(
                "non-finite probability {probability}"
            )));
        }
        Ok(probability.clamp(0.0, 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_file_fails() {
        let err = CompiledGraph::load(Path::new("/nonexistent/model.onnx"));
        assert!(err.is_err());
    }

    #[test]
    fn test_load_corrupt_file_fails_without_panicking() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.onnx");
        std::fs::write(&path, b"this is not a protobuf").unwrap();
        assert!(CompiledGraph::load(&path).is_err());
    }
}
