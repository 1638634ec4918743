//! Error taxonomy for the scoring core.
//!
//! Three caller-visible outcomes: a missing client is expected traffic, a
//! missing backend is a configuration problem, and a backend that was loaded
//! but failed mid-computation is a compute failure. Cache layers never
//! produce errors of their own.

use thiserror::Error;

/// Caller-visible failure modes of `score` / `explain`.
#[derive(Debug, Error)]
pub enum ScoringError {
    /// The client id has no row in the `clients` table. Expected, never
    /// logged as an error and never cached.
    #[error("client {0} not found")]
    NotFound(i64),

    /// No usable model backend is loaded for the requested operation.
    /// Configuration-level: resolved by a later warmup, not by retrying the
    /// request. Never cached.
    #[error("no usable model backend is loaded")]
    Unavailable,

    /// A loaded backend (or the storage layer) failed during a live
    /// computation. For scoring this only surfaces after the one fallback
    /// attempt on the other backend.
    #[error("computation failed: {0}")]
    Compute(anyhow::Error),
}

impl From<anyhow::Error> for ScoringError {
    fn from(err: anyhow::Error) -> Self {
        ScoringError::Compute(err)
    }
}

impl From<rusqlite::Error> for ScoringError {
    fn from(err: rusqlite::Error) -> Self {
        ScoringError::Compute(err.into())
    }
}

/// Result kind returned by an individual backend attempt. The inference
/// engine inspects this value to decide whether to fall back, instead of
/// catching an unwound failure.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend runtime itself failed (graph execution, tree walk).
    #[error("backend runtime failure: {0}")]
    Runtime(anyhow::Error),

    /// The backend ran but produced an output the engine cannot interpret.
    #[error("unexpected backend output: {0}")]
    Output(String),
}
