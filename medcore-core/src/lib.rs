//! medcore-core - user domain model and bulk-import row processing
//!
//! Everything in this crate is pure: decoding uploaded tables, normalizing
//! column vocabularies, validating rows and aggregating batch outcomes.
//! Persistence and outbound side effects live in `medcore-store` and
//! `medcore-server`.

pub mod age;
pub mod dedup;
pub mod error;
pub mod normalize;
pub mod report;
pub mod tabular;
pub mod user;
pub mod validation;

pub use dedup::BatchEmailGuard;
pub use error::{ImportError, IssueCode, Result, ValidationError, ValidationIssue};
pub use normalize::{fold_name, normalize_row, NormalizedRow};
pub use report::{BatchReport, BatchSummary, FailedRow, ImportOutcome, SuccessfulRow};
pub use tabular::{decode, RawRow};
pub use user::{
    NewUser, Reference, Role, RoleDetails, RoleProfile, UserAccount, UserStatus, ValidatedRecord,
};
pub use validation::validate_row;
