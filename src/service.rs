//! Scoring service lifecycle.
//!
//! One explicitly constructed service object owns the loaded model
//! artifacts, the resolved client repository, the audit log handle and both
//! result caches; callers hold a shared reference (no module-level
//! singleton). Warmup is idempotent and guarded so the expensive artifact
//! load runs exactly once even under concurrent cold start; `reset` exists
//! for tests and benchmarks.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use crate::audit::PredictionLog;
use crate::cache::LruCache;
use crate::config::ScoringConfig;
use crate::engine::{BackendKind, InferenceEngine};
use crate::error::ScoringError;
use crate::explain::{Explanation, ExplanationEngine};
use crate::model::ModelArtifacts;
use crate::repository::{resolve_database_path, ClientRepository};

/// Decision at the configured refusal threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Refused,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approved => "approved",
            Decision::Refused => "refused",
        }
    }
}

/// One served prediction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub client_id: i64,
    /// Default probability, always within [0, 1].
    pub probability: f64,
    pub decision: Decision,
    /// Backend that produced the score.
    pub backend: BackendKind,
    /// Wall-clock computation time. Cache hits return the original value.
    pub latency_ms: f64,
}

/// Snapshot of what the service can currently do.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub compiled_loaded: bool,
    pub native_loaded: bool,
    pub database_path: PathBuf,
    pub prediction_cache_entries: usize,
    pub explanation_cache_entries: usize,
}

/// Everything warmup materializes: immutable for the lifecycle, replaced
/// wholesale by `reset` + the next warmup.
struct RuntimeState {
    artifacts: ModelArtifacts,
    repository: ClientRepository,
    audit: Option<PredictionLog>,
}

impl RuntimeState {
    fn load(config: &ScoringConfig) -> Self {
        let started = Instant::now();
        let database_path =
            resolve_database_path(&config.database_candidates, &config.default_database_path);

        let artifacts =
            ModelArtifacts::load(&config.compiled_model_path, &config.native_model_path);

        let repository = ClientRepository::new(database_path.clone(), config.pool_size);

        let audit = match PredictionLog::open(&database_path) {
            Ok(log) => Some(log),
            Err(e) => {
                tracing::warn!("prediction audit log disabled: {:#}", e);
                None
            }
        };

        let availability = artifacts.availability();
        tracing::info!(
            compiled = availability.compiled,
            native = availability.native,
            "warmup finished in {:.0}ms",
            started.elapsed().as_secs_f64() * 1000.0
        );

        Self {
            artifacts,
            repository,
            audit,
        }
    }
}

/// Process-wide scoring service. Construct once, share by reference.
pub struct ScoringService {
    config: ScoringConfig,
    state: RwLock<Option<Arc<RuntimeState>>>,
    /// Serializes the one-time load under concurrent cold start.
    warmup_mutex: Mutex<()>,
    prediction_cache: Mutex<LruCache<i64, PredictionResult>>,
    explanation_cache: Mutex<LruCache<i64, Explanation>>,
}

impl ScoringService {
    pub fn new(config: ScoringConfig) -> Self {
        let prediction_cache = LruCache::new(config.prediction_cache_capacity);
        let explanation_cache = LruCache::new(config.explanation_cache_capacity);
        Self {
            config,
            state: RwLock::new(None),
            warmup_mutex: Mutex::new(()),
            prediction_cache: Mutex::new(prediction_cache),
            explanation_cache: Mutex::new(explanation_cache),
        }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Idempotent one-time load of artifacts, database path and audit log.
    /// Concurrent first callers wait on the warmup mutex instead of
    /// repeating the load; later callers are no-ops. A backend whose file
    /// failed to load is retried here — never per request — once its file
    /// is present again.
    pub fn warmup(&self) {
        if !self.needs_load() {
            return;
        }
        let _guard = self
            .warmup_mutex
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Another cold-start caller may have finished while we waited.
        if !self.needs_load() {
            return;
        }
        let state = Arc::new(RuntimeState::load(&self.config));
        *self
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(state);
    }

    /// Nothing loaded yet, or a previously unloadable backend file has
    /// since appeared on disk.
    fn needs_load(&self) -> bool {
        match self.read_state() {
            None => true,
            Some(state) => {
                let availability = state.artifacts.availability();
                (!availability.compiled && self.config.compiled_model_path.exists())
                    || (!availability.native && self.config.native_model_path.exists())
            }
        }
    }

    /// Score one client: cache → availability → row fetch → ordered
    /// fallback inference → cache fill → audit append.
    pub fn score(&self, client_id: i64) -> Result<PredictionResult, ScoringError> {
        if let Some(hit) = self
            .prediction_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&client_id)
        {
            tracing::debug!(client_id, "prediction cache hit");
            return Ok(hit);
        }

        let state = self.runtime();
        let engine = InferenceEngine::from_artifacts(&state.artifacts);
        if !engine.available() {
            return Err(ScoringError::Unavailable);
        }

        let features = state
            .repository
            .fetch(client_id)
            .map_err(ScoringError::Compute)?
            .ok_or(ScoringError::NotFound(client_id))?;

        let started = Instant::now();
        let (probability, backend) = engine.score(features.values())?;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        let decision = if probability > self.config.decision_threshold {
            Decision::Refused
        } else {
            Decision::Approved
        };
        let result = PredictionResult {
            client_id,
            probability,
            decision,
            backend,
            latency_ms,
        };

        self.prediction_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(client_id, result.clone());

        if let Some(audit) = &state.audit {
            if let Err(e) = audit.record(&result, &features) {
                tracing::warn!("audit write failed: {:#}", e);
            }
        }

        Ok(result)
    }

    /// Explain one client against the native estimator's attribution
    /// sub-model. No fallback backend exists for explanation.
    pub fn explain(&self, client_id: i64) -> Result<Explanation, ScoringError> {
        if let Some(hit) = self
            .explanation_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&client_id)
        {
            tracing::debug!(client_id, "explanation cache hit");
            return Ok(hit);
        }

        let state = self.runtime();
        let native = match &state.artifacts.native {
            Some(native) => native,
            None => return Err(ScoringError::Unavailable),
        };

        let features = state
            .repository
            .fetch(client_id)
            .map_err(ScoringError::Compute)?
            .ok_or(ScoringError::NotFound(client_id))?;

        let engine = ExplanationEngine::new(native, self.config.top_k_attributions);
        let explanation = engine.explain(&features)?;

        self.explanation_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(client_id, explanation.clone());

        Ok(explanation)
    }

    /// Availability and cache occupancy, for the caller's health surface.
    pub fn status(&self) -> ServiceStatus {
        let state = self.runtime();
        let availability = state.artifacts.availability();
        ServiceStatus {
            compiled_loaded: availability.compiled,
            native_loaded: availability.native,
            database_path: state.repository.database_path().to_path_buf(),
            prediction_cache_entries: self
                .prediction_cache
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
            explanation_cache_entries: self
                .explanation_cache
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
        }
    }

    /// Drop both caches' entries. Loaded artifacts are untouched.
    pub fn clear_caches(&self) {
        self.prediction_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.explanation_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Test/benchmark hook: drop caches and all loaded state. The next
    /// call re-runs path resolution and the artifact load.
    pub fn reset(&self) {
        self.clear_caches();
        *self
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
        tracing::info!("service reset: caches cleared, artifacts dropped");
    }

    /// Number of entries currently memoized for predictions.
    pub fn prediction_cache_len(&self) -> usize {
        self.prediction_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// True when a prediction for this client is memoized.
    pub fn prediction_cached(&self, client_id: i64) -> bool {
        self.prediction_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&client_id)
    }

    fn read_state(&self) -> Option<Arc<RuntimeState>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Loaded state, warming up lazily on first use.
    fn runtime(&self) -> Arc<RuntimeState> {
        if let Some(state) = self.read_state() {
            return state;
        }
        self.warmup();
        self.read_state().expect("warmup populates service state")
    }
}
