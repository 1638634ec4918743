//! Credit Scorer Rust Implementation
//!
//! Inference core of the credit-risk scoring service: lazily materializes
//! the trained default-probability classifier in two executable forms
//! (compiled ONNX graph and native tree ensemble), serves per-client
//! predictions and explanations through bounded LRU caches, and falls back
//! between backends on failure.
//!
//! - `model/`: artifact loading, both backends, tree attribution
//! - `repository`: SQLite client-row lookups over a pooled connection set
//! - `engine` / `explain`: scoring fallback chain and top-K attribution
//! - `cache`: strict-LRU bounded memoization
//! - `service`: lifecycle owner (warmup, reset, caches, audit log)

pub mod audit;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod explain;
pub mod model;
pub mod repository;
pub mod service;

// Re-export commonly used types
pub use cache::LruCache;
pub use config::ScoringConfig;
pub use engine::{BackendKind, InferenceEngine, Scorer};
pub use error::{BackendError, ScoringError};
pub use explain::{Explanation, ExplanationEngine, FeatureAttribution};
pub use model::{ModelArtifacts, NativeModel};
pub use repository::{ClientFeatures, ClientRepository};
pub use service::{Decision, PredictionResult, ScoringService, ServiceStatus};
