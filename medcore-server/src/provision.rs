//! Account provisioning
//!
//! An account is created in two phases. It is first persisted as PENDING
//! (`CreatedPendingEmail`); it only becomes `Verifiable` once the
//! verification e-mail went out. If delivery fails or times out, the row is
//! deleted again (`RolledBack`), so no stored account lacks a delivered code.

use chrono::{SubsecRound, Utc};
use medcore_core::{NewUser, Reference, RoleDetails, RoleProfile, UserAccount, ValidatedRecord};
use medcore_store::{SqliteStore, StoreError};
use rand::Rng;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::mailer::VerificationMailer;

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Specialty not found: {0}")]
    SpecialtyNotFound(String),

    #[error("Department not found: {0}")]
    DepartmentNotFound(String),

    #[error("Conflict: {field} already exists")]
    Conflict { field: String },

    #[error("Password hashing failed: {0}")]
    Hashing(String),

    #[error("Failed to send verification email: {0}")]
    EmailDelivery(String),

    #[error("Failed to send verification email: timed out after {0}s")]
    EmailTimeout(u64),

    #[error("Storage error: {0}")]
    Storage(StoreError),
}

impl From<StoreError> for ProvisionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { field } => ProvisionError::Conflict { field },
            other => ProvisionError::Storage(other),
        }
    }
}

/// Where a freshly created account stands with respect to its verification e-mail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionState {
    CreatedPendingEmail,
    Verifiable,
    RolledBack,
}

impl ProvisionState {
    /// Transition once the e-mail step has finished. Terminal states do not move.
    pub fn after_email(self, delivered: bool) -> Self {
        match (self, delivered) {
            (ProvisionState::CreatedPendingEmail, true) => ProvisionState::Verifiable,
            (ProvisionState::CreatedPendingEmail, false) => ProvisionState::RolledBack,
            (terminal, _) => terminal,
        }
    }
}

/// Knobs that differ per entry point (single create vs. bulk import).
#[derive(Debug, Clone, Copy)]
pub struct ProvisionPolicy {
    pub verification_ttl: chrono::Duration,
    pub email_timeout: Duration,
    pub bcrypt_cost: u32,
}

/// Six-digit code drawn uniformly from 100000..=999999.
pub fn generate_verification_code() -> String {
    rand::rng().random_range(100_000..=999_999).to_string()
}

async fn hash_password(password: String, cost: u32) -> Result<String, ProvisionError> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| ProvisionError::Hashing(e.to_string()))?
        .map_err(|e| ProvisionError::Hashing(e.to_string()))
}

pub struct AccountProvisioner<'a> {
    store: &'a SqliteStore,
    mailer: &'a dyn VerificationMailer,
    policy: ProvisionPolicy,
}

impl<'a> AccountProvisioner<'a> {
    pub fn new(store: &'a SqliteStore, mailer: &'a dyn VerificationMailer, policy: ProvisionPolicy) -> Self {
        Self {
            store,
            mailer,
            policy,
        }
    }

    /// Create the account for a validated record and deliver its verification code.
    pub async fn provision(&self, record: &ValidatedRecord) -> Result<UserAccount, ProvisionError> {
        self.check_conflicts(record)?;
        let profile = self.resolve_profile(&record.details)?;
        let password_hash = hash_password(record.password.clone(), self.policy.bcrypt_cost).await?;

        let code = generate_verification_code();
        // stored timestamps keep microseconds
        let now = Utc::now().trunc_subsecs(6);
        let user = NewUser::pending(
            Uuid::new_v4().to_string(),
            record,
            profile,
            password_hash,
            code.clone(),
            now + self.policy.verification_ttl,
            now,
        );
        let account = self.store.create_user(&user)?;
        let delivery = self.deliver(&account, &code).await;
        let state = ProvisionState::CreatedPendingEmail.after_email(delivery.is_ok());

        if state == ProvisionState::RolledBack {
            self.roll_back(&account)?;
        } else {
            tracing::info!(user_id = %account.id, role = %account.role, "Account provisioned");
        }
        delivery.map(|()| account)
    }

    fn check_conflicts(&self, record: &ValidatedRecord) -> Result<(), ProvisionError> {
        if self.store.find_by_email(&record.email)?.is_some() {
            return Err(ProvisionError::Conflict {
                field: "email".into(),
            });
        }
        if let Some(document) = &record.document_number
            && self.store.find_by_document_number(document)?.is_some()
        {
            return Err(ProvisionError::Conflict {
                field: "document_number".into(),
            });
        }
        Ok(())
    }

    /// Turn catalog references into ids. Names are matched ignoring case,
    /// accents and extra spaces; ids must exist.
    fn resolve_profile(&self, details: &RoleDetails) -> Result<RoleProfile, ProvisionError> {
        Ok(match details {
            RoleDetails::Medico {
                specialty,
                license_number,
            } => {
                let specialty_id = match specialty {
                    Reference::Id(id) if self.store.specialty_exists(id)? => id.clone(),
                    Reference::Id(id) => return Err(ProvisionError::SpecialtyNotFound(id.clone())),
                    Reference::Name(name) => self
                        .store
                        .find_specialty_by_name(name)?
                        .ok_or_else(|| ProvisionError::SpecialtyNotFound(name.clone()))?
                        .id,
                };
                RoleProfile::Medico {
                    specialty_id,
                    license_number: license_number.clone(),
                }
            }
            RoleDetails::Enfermera { department } => {
                let department_id = match department {
                    Reference::Id(id) if self.store.department_exists(id)? => id.clone(),
                    Reference::Id(id) => return Err(ProvisionError::DepartmentNotFound(id.clone())),
                    Reference::Name(name) => self
                        .store
                        .find_department_by_name(name)?
                        .ok_or_else(|| ProvisionError::DepartmentNotFound(name.clone()))?
                        .id,
                };
                RoleProfile::Enfermera { department_id }
            }
            RoleDetails::Paciente { address } => RoleProfile::Paciente {
                address: address.clone(),
            },
            RoleDetails::Administrador {
                access_level,
                assigned_department,
            } => RoleProfile::Administrador {
                access_level: access_level.clone(),
                assigned_department: assigned_department.clone(),
            },
        })
    }

    async fn deliver(&self, account: &UserAccount, code: &str) -> Result<(), ProvisionError> {
        let send = self.mailer.send_verification(
            &account.email,
            &account.fullname,
            code,
            self.policy.verification_ttl,
        );
        match tokio::time::timeout(self.policy.email_timeout, send).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                tracing::warn!(user_id = %account.id, error = %e, "Verification email failed");
                Err(ProvisionError::EmailDelivery(e.to_string()))
            }
            Err(_) => {
                tracing::warn!(user_id = %account.id, "Verification email timed out");
                Err(ProvisionError::EmailTimeout(self.policy.email_timeout.as_secs()))
            }
        }
    }

    fn roll_back(&self, account: &UserAccount) -> Result<(), ProvisionError> {
        match self.store.delete_user(&account.id) {
            Ok(_) => {
                tracing::info!(user_id = %account.id, "Account rolled back after email failure");
                Ok(())
            }
            Err(e) => {
                tracing::error!(user_id = %account.id, error = %e, "Failed to roll back account");
                Err(ProvisionError::Storage(e))
            }
        }
    }
}
