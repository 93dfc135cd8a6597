//! Bounded in-memory log of recent pipeline runs.
//!
//! Written by the pipeline runner, read by the status routes. Oldest entries
//! are evicted once the capacity is reached.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{PipelineError, RunState, Stage};

// ---

/// Default number of runs kept in memory.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Outcome of one triggered run, after all retries.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    // ---
    pub run_id: Uuid,
    pub triggered_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Most attempts any single stage needed.
    pub attempts: u32,
    pub status: RunState,
    pub failed_stage: Option<Stage>,
    pub error: Option<String>,
    pub row_id: Option<i32>,
    pub alert_flag: Option<bool>,
}

impl RunRecord {
    // ---
    pub fn succeeded(
        run_id: Uuid,
        triggered_at: DateTime<Utc>,
        attempts: u32,
        row_id: i32,
        alert_flag: bool,
    ) -> Self {
        Self {
            run_id,
            triggered_at,
            finished_at: Utc::now(),
            attempts,
            status: RunState::Succeeded,
            failed_stage: None,
            error: None,
            row_id: Some(row_id),
            alert_flag: Some(alert_flag),
        }
    }

    pub fn failed(
        run_id: Uuid,
        triggered_at: DateTime<Utc>,
        attempts: u32,
        error: &PipelineError,
    ) -> Self {
        Self {
            run_id,
            triggered_at,
            finished_at: Utc::now(),
            attempts,
            status: RunState::Failed,
            failed_stage: Some(error.stage()),
            error: Some(error.to_string()),
            row_id: None,
            alert_flag: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunState::Succeeded
    }
}

/// Shared, cloneable handle to the run log.
#[derive(Debug, Clone)]
pub struct RunHistory {
    inner: Arc<RwLock<VecDeque<RunRecord>>>,
    capacity: usize,
}

impl Default for RunHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl RunHistory {
    // ---
    /// A capacity of 0 is raised to 1 so the latest run is always visible.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn push(&self, record: RunRecord) {
        // ---
        let mut runs = self.inner.write().unwrap_or_else(|e| e.into_inner());
        while runs.len() >= self.capacity {
            runs.pop_front();
        }
        runs.push_back(record);
    }

    /// Up to `limit` runs, newest first.
    pub fn recent(&self, limit: usize) -> Vec<RunRecord> {
        let runs = self.inner.read().unwrap_or_else(|e| e.into_inner());
        runs.iter().rev().take(limit).cloned().collect()
    }

    pub fn latest(&self) -> Option<RunRecord> {
        let runs = self.inner.read().unwrap_or_else(|e| e.into_inner());
        runs.back().cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
