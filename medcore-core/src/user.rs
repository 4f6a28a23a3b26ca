use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// The four account variants the platform knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Medico,
    Enfermera,
    Paciente,
    Administrador,
}

impl Role {
    pub const ALL: [Role; 4] = [
        Role::Medico,
        Role::Enfermera,
        Role::Paciente,
        Role::Administrador,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Medico => "MEDICO",
            Role::Enfermera => "ENFERMERA",
            Role::Paciente => "PACIENTE",
            Role::Administrador => "ADMINISTRADOR",
        }
    }

    /// Parse the canonical upper-case form only.
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.as_str() == value)
    }

    /// Key of the nested per-role group inside a row
    pub fn group_key(&self) -> &'static str {
        match self {
            Role::Medico => "medico",
            Role::Enfermera => "enfermera",
            Role::Paciente => "paciente",
            Role::Administrador => "administrador",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserStatus {
    #[default]
    Pending,
    Active,
    Inactive,
}

impl UserStatus {
    pub const ALL: [UserStatus; 3] = [UserStatus::Pending, UserStatus::Active, UserStatus::Inactive];

    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Pending => "PENDING",
            UserStatus::Active => "ACTIVE",
            UserStatus::Inactive => "INACTIVE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }
}

impl std::fmt::Display for UserStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A catalog entry given either by id or by display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Id(String),
    Name(String),
}

/// Role-specific fields of a validated row, before catalog references are resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleDetails {
    Medico {
        specialty: Reference,
        license_number: String,
    },
    Enfermera {
        department: Reference,
    },
    Paciente {
        address: Option<String>,
    },
    Administrador {
        access_level: Option<String>,
        assigned_department: Option<String>,
    },
}

impl RoleDetails {
    pub fn role(&self) -> Role {
        match self {
            RoleDetails::Medico { .. } => Role::Medico,
            RoleDetails::Enfermera { .. } => Role::Enfermera,
            RoleDetails::Paciente { .. } => Role::Paciente,
            RoleDetails::Administrador { .. } => Role::Administrador,
        }
    }
}

/// Role-specific sub-record as persisted with the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleProfile {
    Medico {
        specialty_id: String,
        license_number: String,
    },
    Enfermera {
        department_id: String,
    },
    Paciente {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        address: Option<String>,
    },
    Administrador {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        access_level: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        assigned_department: Option<String>,
    },
}

impl RoleProfile {
    pub fn role(&self) -> Role {
        match self {
            RoleProfile::Medico { .. } => Role::Medico,
            RoleProfile::Enfermera { .. } => Role::Enfermera,
            RoleProfile::Paciente { .. } => Role::Paciente,
            RoleProfile::Administrador { .. } => Role::Administrador,
        }
    }
}

/// A row that passed validation. Holds the plaintext credential until it is hashed.
#[derive(Clone, PartialEq, Eq)]
pub struct ValidatedRecord {
    pub email: String,
    pub password: String,
    pub fullname: String,
    pub document_number: Option<String>,
    pub phone: Option<String>,
    pub gender: Option<String>,
    pub date_of_birth: NaiveDate,
    pub age: u32,
    pub status: UserStatus,
    pub details: RoleDetails,
}

impl ValidatedRecord {
    pub fn role(&self) -> Role {
        self.details.role()
    }
}

impl std::fmt::Debug for ValidatedRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatedRecord")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("fullname", &self.fullname)
            .field("document_number", &self.document_number)
            .field("date_of_birth", &self.date_of_birth)
            .field("age", &self.age)
            .field("status", &self.status)
            .field("details", &self.details)
            .finish()
    }
}

/// Persisted account as exposed to callers (no credential or verification fields).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: String,
    pub email: String,
    pub fullname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    pub date_of_birth: NaiveDate,
    pub age: u32,
    pub role: Role,
    pub status: UserStatus,
    pub profile: RoleProfile,
    pub created_at: DateTime<Utc>,
}

/// Everything the store needs to insert an account.
#[derive(Clone)]
pub struct NewUser {
    pub account: UserAccount,
    pub password_hash: String,
    pub verification_code: String,
    pub verification_expires: DateTime<Utc>,
}

impl NewUser {
    /// Build a PENDING account from a validated record and its resolved profile.
    pub fn pending(
        id: String,
        record: &ValidatedRecord,
        profile: RoleProfile,
        password_hash: String,
        verification_code: String,
        verification_expires: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            account: UserAccount {
                id,
                email: record.email.clone(),
                fullname: record.fullname.clone(),
                document_number: record.document_number.clone(),
                phone: record.phone.clone(),
                gender: record.gender.clone(),
                date_of_birth: record.date_of_birth,
                age: record.age,
                role: profile.role(),
                status: UserStatus::Pending,
                profile,
                created_at: now,
            },
            password_hash,
            verification_code,
            verification_expires,
        }
    }
}

impl std::fmt::Debug for NewUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewUser")
            .field("account", &self.account)
            .field("verification_expires", &self.verification_expires)
            .finish_non_exhaustive()
    }
}
