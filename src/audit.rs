//! Prediction audit log.
//!
//! Every live computation is appended to the `prediction_logs` table —
//! entity id, score, decision, timestamp, latency and a fixed subset of raw
//! feature values — which the external drift analyzer reads as its
//! "current" dataset. Writes are fire-and-forget: the service logs a
//! warning on failure and still returns the prediction.

use anyhow::{Context, Result};
use rusqlite::types::Value;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use crate::repository::ClientFeatures;
use crate::service::PredictionResult;

/// Raw feature columns persisted with each prediction, chosen to match the
/// drift analyzer's watch list.
pub const LOG_FEATURES: [&str; 10] = [
    "EXT_SOURCE_1",
    "EXT_SOURCE_2",
    "EXT_SOURCE_3",
    "PAYMENT_RATE",
    "DAYS_BIRTH",
    "DAYS_EMPLOYED",
    "AMT_ANNUITY",
    "AMT_CREDIT",
    "AMT_INCOME_TOTAL",
    "DAYS_REGISTRATION",
];

/// Append-only writer over the `prediction_logs` table.
pub struct PredictionLog {
    conn: Mutex<Connection>,
}

impl PredictionLog {
    /// Open the log, creating the table and timestamp index when absent.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open audit database: {}", path.display()))?;

        let feature_columns = LOG_FEATURES
            .iter()
            .map(|name| format!("{name} REAL"))
            .collect::<Vec<_>>()
            .join(", ");
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS prediction_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                client_id INTEGER,
                score REAL,
                decision TEXT,
                timestamp DATETIME DEFAULT CURRENT_TIMESTAMP,
                latency_ms REAL,
                {feature_columns}
            );
            CREATE INDEX IF NOT EXISTS idx_timestamp ON prediction_logs (timestamp);"
        ))
        .context("failed to initialize prediction_logs table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Append one served prediction. Missing feature values land as NULL.
    pub fn record(&self, result: &PredictionResult, features: &ClientFeatures) -> Result<()> {
        let columns = LOG_FEATURES.join(", ");
        let placeholders = (0..LOG_FEATURES.len())
            .map(|i| format!("?{}", i + 6))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO prediction_logs
                (client_id, score, decision, timestamp, latency_ms, {columns})
             VALUES (?1, ?2, ?3, ?4, ?5, {placeholders})"
        );

        let timestamp = chrono::Utc::now().to_rfc3339();
        let mut params: Vec<Value> = vec![
            Value::Integer(result.client_id),
            Value::Real(result.probability),
            Value::Text(result.decision.as_str().to_string()),
            Value::Text(timestamp),
            Value::Real(result.latency_ms),
        ];
        for name in LOG_FEATURES {
            params.push(match features.get(name) {
                Some(value) => Value::Real(value),
                None => Value::Null,
            });
        }

        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(&sql, rusqlite::params_from_iter(params))
            .context("failed to append prediction log row")?;
        Ok(())
    }

    /// Number of rows in the log (drift tooling and tests).
    pub fn row_count(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let count = conn
            .query_row("SELECT COUNT(*) FROM prediction_logs", [], |row| row.get(0))
            .context("failed to count prediction log rows")?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::BackendKind;
    use crate::service::Decision;

    fn sample_result() -> PredictionResult {
        PredictionResult {
            client_id: 100001,
            probability: 0.42,
            decision: Decision::Approved,
            backend: BackendKind::Native,
            latency_ms: 3.5,
        }
    }

    #[test]
    fn test_record_appends_rows() {
        let dir = tempfile::tempdir().unwrap();
        let log = PredictionLog::open(&dir.path().join("audit.sqlite")).unwrap();

        let features = ClientFeatures::for_tests(
            100001,
            vec!["EXT_SOURCE_1".into(), "AMT_CREDIT".into()],
            vec![0.7, 250000.0],
        );

        log.record(&sample_result(), &features).unwrap();
        log.record(&sample_result(), &features).unwrap();
        assert_eq!(log.row_count().unwrap(), 2);
    }

    #[test]
    fn test_missing_log_features_stored_as_null() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.sqlite");
        let log = PredictionLog::open(&path).unwrap();

        // Row carries only one of the ten logged features.
        let features =
            ClientFeatures::for_tests(100001, vec!["EXT_SOURCE_1".into()], vec![0.7]);
        log.record(&sample_result(), &features).unwrap();

        let conn = Connection::open(&path).unwrap();
        let (ext1, credit): (Option<f64>, Option<f64>) = conn
            .query_row(
                "SELECT EXT_SOURCE_1, AMT_CREDIT FROM prediction_logs",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(ext1, Some(0.7));
        assert_eq!(credit, None);
    }
}
