use chrono::{DateTime, Utc};
use common::error::AppError;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::warn;

use super::{report::IngestionReport, IngestionCoordinator};
use crate::utils::document_source::DocumentSource;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Idle,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct JobSnapshot {
    pub status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_report: Option<IngestionReport>,
    pub last_error: Option<String>,
}

/// Allows one ingestion run at a time and remembers how the last one went.
#[derive(Default)]
pub struct IngestionJobTracker {
    running: Mutex<()>,
    snapshot: RwLock<JobSnapshot>,
}

impl IngestionJobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs an ingestion, refusing to start while another is in flight.
    pub async fn run(
        &self,
        coordinator: &IngestionCoordinator,
        source: &dyn DocumentSource,
    ) -> Result<IngestionReport, AppError> {
        let Ok(_guard) = self.running.try_lock() else {
            warn!("ingestion requested while another run is active");
            return Err(AppError::Validation("ingestion already running".into()));
        };

        {
            let mut snapshot = self.snapshot.write().await;
            snapshot.status = JobStatus::Running;
            snapshot.started_at = Some(Utc::now());
            snapshot.finished_at = None;
        }

        let result = coordinator.ingest(source).await;

        let mut snapshot = self.snapshot.write().await;
        snapshot.finished_at = Some(Utc::now());
        match &result {
            Ok(report) => {
                snapshot.status = JobStatus::Succeeded;
                snapshot.last_report = Some(report.clone());
                snapshot.last_error = None;
            }
            Err(err) => {
                snapshot.status = JobStatus::Failed;
                snapshot.last_error = Some(err.to_string());
            }
        }
        result
    }

    pub async fn snapshot(&self) -> JobSnapshot {
        self.snapshot.read().await.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }
}
