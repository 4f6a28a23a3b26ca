//! Batch outcome aggregation
//!
//! Every decoded row ends up in exactly one place: the successful list, the
//! failed list, or the skipped counter (entirely blank rows). Counts returned
//! by the patient service are merged into the summary only.

use crate::tabular::RawRow;
use crate::user::UserAccount;
use serde::{Deserialize, Serialize};

pub const IMPORT_COMPLETED: &str = "Import completed";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessfulRow {
    pub index: usize,
    pub patient: UserAccount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedRow {
    pub index: usize,
    /// The row as it was decoded, before normalization
    pub row: RawRow,
    pub error: String,
}

/// Per-row detail for one batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub successful: Vec<SuccessfulRow>,
    pub failed: Vec<FailedRow>,
    pub total: usize,
    #[serde(skip)]
    skipped: usize,
    #[serde(skip)]
    remote_accepted: usize,
    #[serde(skip)]
    remote_rejected: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Final result handed back to the HTTP layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportOutcome {
    pub message: String,
    pub summary: BatchSummary,
    pub results: BatchReport,
}

impl BatchReport {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    pub fn record_success(&mut self, index: usize, account: UserAccount) {
        self.successful.push(SuccessfulRow {
            index,
            patient: account,
        });
    }

    pub fn record_failure(&mut self, index: usize, row: RawRow, error: impl Into<String>) {
        self.failed.push(FailedRow {
            index,
            row,
            error: error.into(),
        });
    }

    pub fn record_skip(&mut self) {
        self.skipped += 1;
    }

    /// Add the counts reported by the patient service for forwarded rows.
    pub fn merge_remote(&mut self, accepted: usize, rejected: usize) {
        self.remote_accepted += accepted;
        self.remote_rejected += rejected;
    }

    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            total: self.total,
            successful: self.successful.len() + self.remote_accepted,
            failed: self.failed.len() + self.remote_rejected,
            skipped: self.skipped,
        }
    }

    /// Close the batch: restore input order in both lists and compute the summary.
    pub fn finish(mut self, message: impl Into<String>) -> ImportOutcome {
        self.successful.sort_by_key(|r| r.index);
        self.failed.sort_by_key(|r| r.index);
        ImportOutcome {
            message: message.into(),
            summary: self.summary(),
            results: self,
        }
    }
}
