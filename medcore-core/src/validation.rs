//! Per-role schema validation of normalized rows
//!
//! Collects every problem in a row instead of stopping at the first one.
//! Uniqueness is not checked here.

use crate::age::{age_on, is_valid_age, parse_date, MAX_AGE, MIN_AGE};
use crate::error::{IssueCode, ValidationError};
use crate::normalize::NormalizedRow;
use crate::user::{Reference, Role, RoleDetails, UserStatus, ValidatedRecord};
use chrono::NaiveDate;
use regex::Regex;
use std::sync::LazyLock;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+'\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}$")
        .expect("email pattern compiles")
});

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-ZáéíóúÁÉÍÓÚñÑ\s]+$").expect("name pattern compiles")
});

pub const MIN_PASSWORD_LEN: usize = 6;

/// Check that a full name holds only letters (accented included) and spaces.
pub fn is_valid_name(name: &str) -> bool {
    NAME_RE.is_match(name)
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

fn check_password(password: &str, errors: &mut ValidationError) -> bool {
    let mut ok = true;
    if password.chars().count() < MIN_PASSWORD_LEN {
        errors.push(
            Some("current_password"),
            IssueCode::Value,
            format!("must be at least {} characters", MIN_PASSWORD_LEN),
        );
        ok = false;
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        errors.push(
            Some("current_password"),
            IssueCode::Value,
            "must contain at least one digit",
        );
        ok = false;
    }
    ok
}

/// Resolve `name`/`id` pair of a catalog reference; the id wins when both are given.
fn reference(id: Option<String>, name: Option<String>) -> Option<Reference> {
    id.map(Reference::Id).or(name.map(Reference::Name))
}

fn role_details(row: &NormalizedRow, role: Role, errors: &mut ValidationError) -> Option<RoleDetails> {
    match role {
        Role::Medico => {
            let license_number = row.group_text(role, "license_number");
            if license_number.is_none() {
                errors.push(Some("medico.license_number"), IssueCode::Required, "required");
            }
            let specialty = reference(
                row.group_text(role, "specialty_id"),
                row.group_text(role, "specialty"),
            );
            if specialty.is_none() {
                errors.push(None, IssueCode::Invariant, "must supply specialty or specialty_id");
            }
            Some(RoleDetails::Medico {
                specialty: specialty?,
                license_number: license_number?,
            })
        }
        Role::Enfermera => {
            let department = reference(
                row.group_text(role, "department_id"),
                row.group_text(role, "department"),
            );
            if department.is_none() {
                errors.push(None, IssueCode::Invariant, "must supply department or department_id");
            }
            Some(RoleDetails::Enfermera {
                department: department?,
            })
        }
        Role::Paciente => Some(RoleDetails::Paciente {
            address: row.group_text(role, "address"),
        }),
        Role::Administrador => Some(RoleDetails::Administrador {
            access_level: row.group_text(role, "access_level"),
            assigned_department: row.group_text(role, "assigned_department"),
        }),
    }
}

/// Validate a normalized row against the schema of its role.
///
/// `today` anchors the age derivation.
pub fn validate_row(row: &NormalizedRow, today: NaiveDate) -> Result<ValidatedRecord, ValidationError> {
    let mut errors = ValidationError::default();

    let email = match row.text("email") {
        None => {
            errors.push(Some("email"), IssueCode::Required, "required");
            None
        }
        Some(email) if !is_valid_email(&email) => {
            errors.push(Some("email"), IssueCode::Format, "invalid email address");
            None
        }
        Some(email) => Some(email),
    };

    let password = match row.text("current_password") {
        None => {
            errors.push(Some("current_password"), IssueCode::Required, "required");
            None
        }
        Some(password) => check_password(&password, &mut errors).then_some(password),
    };

    let fullname = match row.text("fullname") {
        None => {
            errors.push(Some("fullname"), IssueCode::Required, "required");
            None
        }
        Some(name) if !is_valid_name(&name) => {
            errors.push(
                Some("fullname"),
                IssueCode::Format,
                "invalid name (letters and spaces only)",
            );
            None
        }
        Some(name) => Some(name),
    };

    let birth = match row.text("date_of_birth") {
        None => {
            errors.push(Some("date_of_birth"), IssueCode::Required, "required");
            None
        }
        Some(raw) => match parse_date(&raw) {
            None => {
                errors.push(Some("date_of_birth"), IssueCode::Format, "invalid date");
                None
            }
            Some(date_of_birth) => {
                let age = age_on(date_of_birth, today);
                if is_valid_age(age) {
                    Some((date_of_birth, age as u32))
                } else {
                    errors.push(
                        Some("date_of_birth"),
                        IssueCode::InvalidAge,
                        format!("age must be between {} and {} (got {})", MIN_AGE, MAX_AGE, age),
                    );
                    None
                }
            }
        },
    };

    let status = match row.text("status") {
        None => UserStatus::Pending,
        Some(raw) => UserStatus::parse(&raw).unwrap_or_else(|| {
            errors.push(
                Some("status"),
                IssueCode::Value,
                format!("invalid status '{}'", raw),
            );
            UserStatus::Pending
        }),
    };

    let role = match row.text("role") {
        None => {
            errors.push(Some("role"), IssueCode::Required, "required");
            None
        }
        Some(raw) => {
            let role = Role::parse(&raw);
            if role.is_none() {
                errors.push(Some("role"), IssueCode::Value, format!("unknown role '{}'", raw));
            }
            role
        }
    };

    let mut gender = row.text("gender");
    if role == Some(Role::Paciente) {
        gender = gender.or_else(|| row.group_text(Role::Paciente, "gender"));
        if gender.is_none() {
            errors.push(Some("gender"), IssueCode::Required, "required");
        }
    }

    let details = role.and_then(|role| role_details(row, role, &mut errors));

    if !errors.is_empty() {
        return Err(errors);
    }
    let (Some(email), Some(password), Some(fullname), Some((date_of_birth, age)), Some(details)) =
        (email, password, fullname, birth, details)
    else {
        return Err(errors);
    };

    Ok(ValidatedRecord {
        email,
        password,
        fullname,
        document_number: row.text("document_number"),
        phone: row.text("phone"),
        gender,
        date_of_birth,
        age,
        status,
        details,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize_row;
    use serde_json::{json, Value};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    fn row(value: Value) -> NormalizedRow {
        normalize_row(value.as_object().unwrap())
    }

    fn base(role: &str) -> Value {
        json!({
            "email": "ana@clinic.test",
            "password": "secret1",
            "fullname": "Ana María Pérez",
            "dateOfBirth": "1990-05-01",
            "role": role
        })
    }

    fn with(mut value: Value, key: &str, field: Value) -> Value {
        value.as_object_mut().unwrap().insert(key.to_string(), field);
        value
    }

    #[test]
    fn test_valid_doctor_by_specialty_name() {
        let value = with(base("doctor"), "especialidad", json!("Cardiología"));
        let value = with(value, "licencia", json!("LIC-1"));
        let record = validate_row(&row(value), today()).unwrap();

        assert_eq!(record.role(), Role::Medico);
        assert_eq!(record.age, 34);
        assert_eq!(record.status, UserStatus::Pending);
        assert_eq!(
            record.details,
            RoleDetails::Medico {
                specialty: Reference::Name("Cardiología".to_string()),
                license_number: "LIC-1".to_string(),
            }
        );
    }

    #[test]
    fn test_specialty_id_wins_over_name() {
        let value = with(base("MEDICO"), "specialtyId", json!("spec-7"));
        let value = with(value, "especialidad", json!("Cardiología"));
        let value = with(value, "license_number", json!("L"));
        let record = validate_row(&row(value), today()).unwrap();
        assert!(matches!(
            record.details,
            RoleDetails::Medico { specialty: Reference::Id(ref id), .. } if id == "spec-7"
        ));
    }

    #[test]
    fn test_doctor_without_specialty_reports_record_constraint() {
        let value = with(base("MEDICO"), "licencia", json!("L"));
        let err = validate_row(&row(value), today()).unwrap_err();
        assert!(err.has_code(IssueCode::Invariant));
        assert!(err.to_string().contains("must supply specialty or specialty_id"));
    }

    #[test]
    fn test_nurse_requires_department() {
        let err = validate_row(&row(base("nurse")), today()).unwrap_err();
        assert!(err.to_string().contains("must supply department or department_id"));

        let value = with(base("nurse"), "departamento", json!("Urgencias"));
        let record = validate_row(&row(value), today()).unwrap();
        assert_eq!(
            record.details,
            RoleDetails::Enfermera {
                department: Reference::Name("Urgencias".to_string())
            }
        );
    }

    #[test]
    fn test_patient_requires_gender() {
        let err = validate_row(&row(base("patient")), today()).unwrap_err();
        assert_eq!(err.to_string(), "gender: required");

        let value = with(base("patient"), "genero", json!("F"));
        let value = with(value, "direccion", json!("Calle 1"));
        let record = validate_row(&row(value), today()).unwrap();
        assert_eq!(record.gender.as_deref(), Some("F"));
        assert_eq!(
            record.details,
            RoleDetails::Paciente {
                address: Some("Calle 1".to_string())
            }
        );
    }

    #[test]
    fn test_administrator_optional_fields() {
        let record = validate_row(&row(base("admin")), today()).unwrap();
        assert_eq!(
            record.details,
            RoleDetails::Administrador {
                access_level: None,
                assigned_department: None
            }
        );
    }

    #[test]
    fn test_all_errors_are_aggregated() {
        let value = json!({
            "email": "not-an-email",
            "password": "abc",
            "fullname": "R2-D2",
            "dateOfBirth": "yesterday",
            "role": "chef"
        });
        let err = validate_row(&row(value), today()).unwrap_err();
        let message = err.to_string();

        assert!(message.contains("email: invalid email address"));
        assert!(message.contains("current_password: must be at least 6 characters"));
        assert!(message.contains("current_password: must contain at least one digit"));
        assert!(message.contains("fullname: invalid name"));
        assert!(message.contains("date_of_birth: invalid date"));
        assert!(message.contains("role: unknown role 'CHEF'"));
        assert_eq!(err.issues.len(), 6);
    }

    #[test]
    fn test_age_out_of_range() {
        let value = with(base("admin"), "dateOfBirth", json!("2024-01-01"));
        let err = validate_row(&row(value), today()).unwrap_err();
        assert!(err.has_code(IssueCode::InvalidAge));

        let value = with(base("admin"), "dateOfBirth", json!("1900-01-01"));
        let err = validate_row(&row(value), today()).unwrap_err();
        assert!(err.has_code(IssueCode::InvalidAge));
    }

    #[test]
    fn test_invalid_status_rejected() {
        let value = with(base("admin"), "status", json!("archived"));
        let err = validate_row(&row(value), today()).unwrap_err();
        assert_eq!(err.to_string(), "status: invalid status 'ARCHIVED'");

        let value = with(base("admin"), "status", json!("activo"));
        let record = validate_row(&row(value), today()).unwrap();
        assert_eq!(record.status, UserStatus::Active);
    }

    #[test]
    fn test_missing_role() {
        let mut value = base("admin");
        value.as_object_mut().unwrap().remove("role");
        let err = validate_row(&row(value), today()).unwrap_err();
        assert_eq!(err.to_string(), "role: required");
    }
}
