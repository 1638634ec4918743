//! Model artifact loading.
//!
//! The trained classifier is materialized in two mutually optional forms: a
//! compiled ONNX graph for fast scoring and the native tree ensemble for
//! fallback scoring and attribution. Either file may be missing or corrupt;
//! loading tolerates both and records what is actually usable. Only when
//! both are absent do callers see `Unavailable` — and at request time, not
//! as a load error.

pub mod compiled;
pub mod native;
pub mod shap;

pub use compiled::CompiledGraph;
pub use native::{GradientBoostedTrees, NativeModel};
pub use shap::TreeExplainer;

use std::path::Path;

/// Which backends came up after a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendAvailability {
    pub compiled: bool,
    pub native: bool,
}

/// Both executable forms of the model, loaded at most once per lifecycle
/// and immutable thereafter.
pub struct ModelArtifacts {
    pub compiled: Option<CompiledGraph>,
    pub native: Option<NativeModel>,
}

impl ModelArtifacts {
    /// Load whatever is present on disk. Missing or unreadable files
    /// degrade capability instead of failing the process.
    pub fn load(compiled_path: &Path, native_path: &Path) -> Self {
        let compiled = if compiled_path.exists() {
            match CompiledGraph::load(compiled_path) {
                Ok(graph) => Some(graph),
                Err(e) => {
                    tracing::warn!("failed to load compiled graph: {:#}", e);
                    None
                }
            }
        } else {
            tracing::warn!("compiled graph not found: {}", compiled_path.display());
            None
        };

        let native = if native_path.exists() {
            match NativeModel::load(native_path) {
                Ok(model) => Some(model),
                Err(e) => {
                    tracing::warn!("failed to load native model: {:#}", e);
                    None
                }
            }
        } else {
            tracing::warn!("native model not found: {}", native_path.display());
            None
        };

        Self { compiled, native }
    }

    pub fn availability(&self) -> BackendAvailability {
        BackendAvailability {
            compiled: self.compiled.is_some(),
            native: self.native.is_some(),
        }
    }

    /// At least one backend can score.
    pub fn is_usable(&self) -> bool {
        self.compiled.is_some() || self.native.is_some()
    }
}
