//! Service configuration.
//!
//! One explicit configuration object constructed at startup and handed to
//! `ScoringService::new`. Defaults mirror the repository layout the training
//! pipeline produces; `from_env` overlays deployment overrides.

use std::path::PathBuf;

/// Configuration for the scoring service.
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    /// Compiled inference graph (ONNX).
    pub compiled_model_path: PathBuf,
    /// Native serialized estimator (JSON tree ensemble, optionally a
    /// pipeline wrapper).
    pub native_model_path: PathBuf,
    /// Candidate SQLite files, probed in order at warmup.
    pub database_candidates: Vec<PathBuf>,
    /// Used when no candidate exists on disk.
    pub default_database_path: PathBuf,
    /// Capacity of the prediction cache (entries).
    pub prediction_cache_capacity: usize,
    /// Capacity of the explanation cache (entries).
    pub explanation_cache_capacity: usize,
    /// Number of attributions returned by `explain`, ranked by |value|.
    pub top_k_attributions: usize,
    /// Probability above which a request is refused.
    pub decision_threshold: f64,
    /// Maximum concurrently open read connections to the client store.
    pub pool_size: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            compiled_model_path: PathBuf::from("src/model/model.onnx"),
            native_model_path: PathBuf::from("src/model/model.json"),
            database_candidates: vec![
                PathBuf::from("data/database_lite.sqlite"),
                PathBuf::from("data/database.sqlite"),
            ],
            default_database_path: PathBuf::from("data/database.sqlite"),
            prediction_cache_capacity: 128,
            explanation_cache_capacity: 128,
            top_k_attributions: 12,
            decision_threshold: 0.5,
            pool_size: 4,
        }
    }
}

impl ScoringConfig {
    /// Defaults overlaid with environment variables, for deployments that
    /// relocate artifacts (systemd units set these).
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("COMPILED_MODEL_PATH") {
            config.compiled_model_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("NATIVE_MODEL_PATH") {
            config.native_model_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("DATABASE_PATH") {
            // An explicit path bypasses the candidate probe.
            config.database_candidates = vec![PathBuf::from(&path)];
            config.default_database_path = PathBuf::from(path);
        }
        if let Ok(cap) = std::env::var("CACHE_CAPACITY") {
            if let Ok(cap) = cap.parse() {
                config.prediction_cache_capacity = cap;
                config.explanation_cache_capacity = cap;
            }
        }
        if let Ok(k) = std::env::var("TOP_K") {
            if let Ok(k) = k.parse() {
                config.top_k_attributions = k;
            }
        }
        if let Ok(threshold) = std::env::var("DECISION_THRESHOLD") {
            if let Ok(threshold) = threshold.parse() {
                config.decision_threshold = threshold;
            }
        }

        config
    }
}
