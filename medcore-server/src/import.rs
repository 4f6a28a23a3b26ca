//! Bulk import pipeline
//!
//! Rows are handled strictly one after another in input order: normalize,
//! drop blank rows, reject in-batch duplicates, validate, then either
//! provision locally or hold back for the patients service. A failing row
//! never stops the rows after it. Held-back patients go out as one request
//! once every row has been seen.

use chrono::{NaiveDate, Utc};
use medcore_core::{
    decode, normalize_row, report::IMPORT_COMPLETED, validate_row, BatchEmailGuard, BatchReport,
    ImportError, ImportOutcome, RawRow, Role, UserAccount, ValidationError,
};
use thiserror::Error;

use crate::forwarder::{ForwardedPatient, PatientForwarder};
use crate::provision::{AccountProvisioner, ProvisionError};

/// Why a single row failed.
#[derive(Error, Debug)]
pub enum RowError {
    #[error("Duplicate email in batch: {0}")]
    DuplicateInBatch(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error("Patient forwarding failed: {0}")]
    Forward(String),
}

enum RowOutcome {
    Skipped,
    Created(UserAccount),
    Deferred(ForwardedPatient),
    Failed(RowError),
}

pub struct BulkImporter<'a> {
    provisioner: AccountProvisioner<'a>,
    forwarder: &'a dyn PatientForwarder,
    today: NaiveDate,
}

impl<'a> BulkImporter<'a> {
    pub fn new(provisioner: AccountProvisioner<'a>, forwarder: &'a dyn PatientForwarder) -> Self {
        Self {
            provisioner,
            forwarder,
            today: Utc::now().date_naive(),
        }
    }

    /// Reference date for age derivation.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// Decode an upload and run every row through the pipeline.
    ///
    /// Only decoding errors are returned; row problems end up in the outcome.
    pub async fn import(
        &self,
        buffer: &[u8],
        filename: &str,
        authorization: Option<&str>,
    ) -> Result<ImportOutcome, ImportError> {
        let rows = decode(buffer, filename)?;
        tracing::info!(filename = %filename, rows = rows.len(), "Bulk import started");
        Ok(self.process(rows, authorization).await)
    }

    pub async fn process(&self, rows: Vec<RawRow>, authorization: Option<&str>) -> ImportOutcome {
        let mut report = BatchReport::new(rows.len());
        let mut guard = BatchEmailGuard::new();
        let mut deferred: Vec<(usize, RawRow, ForwardedPatient)> = Vec::new();

        for (index, raw) in rows.into_iter().enumerate() {
            match self.process_row(&raw, &mut guard).await {
                RowOutcome::Skipped => {
                    tracing::debug!(row = index, "Blank row skipped");
                    report.record_skip();
                }
                RowOutcome::Created(account) => report.record_success(index, account),
                RowOutcome::Deferred(patient) => deferred.push((index, raw, patient)),
                RowOutcome::Failed(err) => {
                    tracing::warn!(row = index, error = %err, "Row rejected");
                    report.record_failure(index, raw, err.to_string());
                }
            }
        }

        self.forward_patients(deferred, authorization, &mut report).await;

        let outcome = report.finish(IMPORT_COMPLETED);
        tracing::info!(
            total = outcome.summary.total,
            successful = outcome.summary.successful,
            failed = outcome.summary.failed,
            skipped = outcome.summary.skipped,
            "Bulk import finished"
        );
        outcome
    }

    async fn process_row(&self, raw: &RawRow, guard: &mut BatchEmailGuard) -> RowOutcome {
        let row = normalize_row(raw);
        if row.is_blank() {
            return RowOutcome::Skipped;
        }

        if let Some(email) = row.text("email")
            && !guard.check_and_mark(&email)
        {
            return RowOutcome::Failed(RowError::DuplicateInBatch(email));
        }

        let record = match validate_row(&row, self.today) {
            Ok(record) => record,
            Err(err) => return RowOutcome::Failed(err.into()),
        };

        if record.role() == Role::Paciente {
            return RowOutcome::Deferred(ForwardedPatient::from_record(&record));
        }

        match self.provisioner.provision(&record).await {
            Ok(account) => RowOutcome::Created(account),
            Err(err) => RowOutcome::Failed(err.into()),
        }
    }

    /// One request for all patient rows. Remote counts are merged into the
    /// summary; if the call itself fails every forwarded row is reported failed.
    async fn forward_patients(
        &self,
        deferred: Vec<(usize, RawRow, ForwardedPatient)>,
        authorization: Option<&str>,
        report: &mut BatchReport,
    ) {
        if deferred.is_empty() {
            return;
        }
        let patients: Vec<ForwardedPatient> = deferred.iter().map(|(_, _, p)| p.clone()).collect();

        match self.forwarder.forward(&patients, authorization).await {
            Ok(summary) => {
                tracing::info!(
                    sent = patients.len(),
                    accepted = summary.accepted,
                    rejected = summary.rejected,
                    "Patients forwarded"
                );
                report.merge_remote(summary.accepted, summary.rejected);
            }
            Err(err) => {
                tracing::error!(sent = patients.len(), error = %err, "Patient forwarding failed");
                let message = RowError::Forward(err.to_string()).to_string();
                for (index, raw, _) in deferred {
                    report.record_failure(index, raw, message.clone());
                }
            }
        }
    }
}
