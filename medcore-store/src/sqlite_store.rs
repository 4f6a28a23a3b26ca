//! SQLite-based account storage
//!
//! Schema:
//!   - users: one row per account (unique e-mail, unique optional document number)
//!   - specialties / departments: catalogs referenced by doctors and nurses

use crate::error::{Result, StoreError};
use crate::filter::{Page, UserFilter};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use medcore_core::{fold_name, NewUser, Role, RoleProfile, UserAccount, UserStatus};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const USER_COLUMNS: &str = "id, email, fullname, document_number, phone, gender, \
     date_of_birth, age, role, status, profile, created_at";

/// A specialty or department.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CatalogEntry {
    pub id: String,
    pub name: String,
}

/// Verification code issued to an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Copy)]
enum Catalog {
    Specialties,
    Departments,
}

impl Catalog {
    fn table(self) -> &'static str {
        match self {
            Catalog::Specialties => "specialties",
            Catalog::Departments => "departments",
        }
    }
}

/// Raw column values of a `users` row, converted outside the rusqlite closure.
struct UserRow {
    id: String,
    email: String,
    fullname: String,
    document_number: Option<String>,
    phone: Option<String>,
    gender: Option<String>,
    date_of_birth: String,
    age: i64,
    role: String,
    status: String,
    profile: String,
    created_at: String,
}

impl UserRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            email: row.get(1)?,
            fullname: row.get(2)?,
            document_number: row.get(3)?,
            phone: row.get(4)?,
            gender: row.get(5)?,
            date_of_birth: row.get(6)?,
            age: row.get(7)?,
            role: row.get(8)?,
            status: row.get(9)?,
            profile: row.get(10)?,
            created_at: row.get(11)?,
        })
    }

    fn into_account(self) -> Result<UserAccount> {
        let role = Role::parse(&self.role)
            .ok_or_else(|| StoreError::Other(format!("Unknown role in store: {}", self.role)))?;
        let status = UserStatus::parse(&self.status)
            .ok_or_else(|| StoreError::Other(format!("Unknown status in store: {}", self.status)))?;
        let date_of_birth = NaiveDate::parse_from_str(&self.date_of_birth, "%Y-%m-%d")
            .map_err(|e| StoreError::Other(format!("Invalid date_of_birth: {}", e)))?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| StoreError::Other(format!("Invalid created_at: {}", e)))?
            .with_timezone(&Utc);
        let profile: RoleProfile = serde_json::from_str(&self.profile)?;

        Ok(UserAccount {
            id: self.id,
            email: self.email,
            fullname: self.fullname,
            document_number: self.document_number,
            phone: self.phone,
            gender: self.gender,
            date_of_birth,
            age: u32::try_from(self.age).unwrap_or_default(),
            role,
            status,
            profile,
            created_at,
        })
    }
}

fn timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn date(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

/// SQLite-based account store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

#[allow(clippy::result_large_err)]
impl SqliteStore {
    /// Open the store (create if not exists). `":memory:"` gives a private in-memory database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Enable WAL mode for read-write concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE COLLATE NOCASE,
                fullname TEXT NOT NULL,
                document_number TEXT UNIQUE,
                phone TEXT,
                gender TEXT,
                date_of_birth TEXT NOT NULL,
                age INTEGER NOT NULL,
                role TEXT NOT NULL,
                status TEXT NOT NULL,
                profile TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                verification_code TEXT,
                verification_expires TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        for catalog in [Catalog::Specialties, Catalog::Departments] {
            conn.execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {} (
                        id TEXT PRIMARY KEY,
                        name TEXT NOT NULL,
                        folded_name TEXT NOT NULL UNIQUE
                    )",
                    catalog.table()
                ),
                [],
            )?;
        }

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_users_role_status ON users(role, status)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_users_created ON users(created_at)",
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Other("Store connection lock poisoned".into()))
    }

    // ---- users ----

    /// Insert a new account. Duplicate e-mail or document number yields `Conflict`.
    pub fn create_user(&self, user: &NewUser) -> Result<UserAccount> {
        let account = &user.account;
        let profile = serde_json::to_string(&account.profile)?;
        let created = timestamp(account.created_at);
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO users (id, email, fullname, document_number, phone, gender,
                date_of_birth, age, role, status, profile, password_hash,
                verification_code, verification_expires, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15)",
            params![
                account.id,
                account.email,
                account.fullname,
                account.document_number,
                account.phone,
                account.gender,
                date(account.date_of_birth),
                account.age,
                account.role.as_str(),
                account.status.as_str(),
                profile,
                user.password_hash,
                user.verification_code,
                timestamp(user.verification_expires),
                created,
            ],
        )
        .map_err(StoreError::from_write)?;

        Ok(account.clone())
    }

    /// Hard delete. Returns false when no such account existed.
    pub fn delete_user(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let rows = conn.execute("DELETE FROM users WHERE id = ?", params![id])?;
        Ok(rows > 0)
    }

    fn find_one(&self, column: &str, value: &str) -> Result<Option<UserAccount>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM users WHERE {} = ?", USER_COLUMNS, column),
                params![value],
                UserRow::read,
            )
            .optional()?;
        row.map(UserRow::into_account).transpose()
    }

    pub fn find_user(&self, id: &str) -> Result<Option<UserAccount>> {
        self.find_one("id", id)
    }

    /// Case-insensitive lookup by e-mail.
    pub fn find_by_email(&self, email: &str) -> Result<Option<UserAccount>> {
        self.find_one("email", email.trim())
    }

    pub fn find_by_document_number(&self, document_number: &str) -> Result<Option<UserAccount>> {
        self.find_one("document_number", document_number.trim())
    }

    pub fn find_verification(&self, id: &str) -> Result<Option<Verification>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT verification_code, verification_expires FROM users WHERE id = ?",
                params![id],
                |row| Ok((row.get::<_, Option<String>>(0)?, row.get::<_, Option<String>>(1)?)),
            )
            .optional()?;

        match row {
            Some((Some(code), Some(expires))) => {
                let expires_at = DateTime::parse_from_rfc3339(&expires)
                    .map_err(|e| StoreError::Other(format!("Invalid verification_expires: {}", e)))?
                    .with_timezone(&Utc);
                Ok(Some(Verification { code, expires_at }))
            }
            _ => Ok(None),
        }
    }

    /// Persist the mutable fields of an account. Role, credential and
    /// verification data are left untouched.
    pub fn update_user(&self, account: &UserAccount) -> Result<bool> {
        let profile = serde_json::to_string(&account.profile)?;
        let conn = self.conn()?;
        let rows = conn
            .execute(
                "UPDATE users SET fullname = ?2, document_number = ?3, phone = ?4, gender = ?5,
                    date_of_birth = ?6, age = ?7, status = ?8, profile = ?9, updated_at = ?10
                 WHERE id = ?1",
                params![
                    account.id,
                    account.fullname,
                    account.document_number,
                    account.phone,
                    account.gender,
                    date(account.date_of_birth),
                    account.age,
                    account.status.as_str(),
                    profile,
                    timestamp(Utc::now()),
                ],
            )
            .map_err(StoreError::from_write)?;
        Ok(rows > 0)
    }

    pub fn set_status(&self, id: &str, status: UserStatus) -> Result<bool> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "UPDATE users SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status.as_str(), timestamp(Utc::now())],
        )?;
        Ok(rows > 0)
    }

    /// Accounts matching `filter`, newest first.
    pub fn list_users(&self, filter: &UserFilter, page: Page) -> Result<Vec<UserAccount>> {
        let (clause, mut values) = filter.to_sql();
        values.push(page.limit.to_string());
        values.push(page.offset().to_string());
        let sql = format!(
            "SELECT {} FROM users{} ORDER BY created_at DESC, rowid DESC LIMIT CAST(? AS INTEGER) OFFSET CAST(? AS INTEGER)",
            USER_COLUMNS, clause
        );

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), UserRow::read)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?.into_account()?);
        }
        Ok(users)
    }

    pub fn count_users(&self, filter: &UserFilter) -> Result<u64> {
        let (clause, values) = filter.to_sql();
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM users{}", clause),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Account counts for every status (zero included).
    pub fn count_by_status(&self) -> Result<Vec<(UserStatus, u64)>> {
        UserStatus::ALL
            .iter()
            .map(|status| {
                let count = self.count_users(&UserFilter::new().status(*status))?;
                Ok((*status, count))
            })
            .collect()
    }

    /// Account counts grouped by role (only roles that have accounts).
    pub fn count_by_role(&self) -> Result<Vec<(Role, u64)>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT role, COUNT(*) FROM users GROUP BY role ORDER BY role")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = Vec::new();
        for row in rows {
            let (role, count) = row?;
            if let Some(role) = Role::parse(&role) {
                counts.push((role, count as u64));
            }
        }
        Ok(counts)
    }

    // ---- catalogs ----

    fn insert_catalog(&self, catalog: Catalog, id: &str, name: &str) -> Result<CatalogEntry> {
        let name = name.trim();
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT INTO {} (id, name, folded_name) VALUES (?, ?, ?)",
                catalog.table()
            ),
            params![id, name, fold_name(name)],
        )
        .map_err(|e| match StoreError::from_write(e) {
            StoreError::Conflict { .. } => StoreError::Conflict {
                field: "name".into(),
            },
            other => other,
        })?;

        Ok(CatalogEntry {
            id: id.to_string(),
            name: name.to_string(),
        })
    }

    /// Lookup ignoring case, diacritics and extra whitespace.
    fn find_catalog(&self, catalog: Catalog, name: &str) -> Result<Option<CatalogEntry>> {
        let conn = self.conn()?;
        let entry = conn
            .query_row(
                &format!(
                    "SELECT id, name FROM {} WHERE folded_name = ?",
                    catalog.table()
                ),
                params![fold_name(name)],
                |row| {
                    Ok(CatalogEntry {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(entry)
    }

    fn catalog_exists(&self, catalog: Catalog, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let found: Option<i64> = conn
            .query_row(
                &format!("SELECT 1 FROM {} WHERE id = ?", catalog.table()),
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn insert_specialty(&self, id: &str, name: &str) -> Result<CatalogEntry> {
        self.insert_catalog(Catalog::Specialties, id, name)
    }

    pub fn insert_department(&self, id: &str, name: &str) -> Result<CatalogEntry> {
        self.insert_catalog(Catalog::Departments, id, name)
    }

    pub fn find_specialty_by_name(&self, name: &str) -> Result<Option<CatalogEntry>> {
        self.find_catalog(Catalog::Specialties, name)
    }

    pub fn find_department_by_name(&self, name: &str) -> Result<Option<CatalogEntry>> {
        self.find_catalog(Catalog::Departments, name)
    }

    pub fn specialty_exists(&self, id: &str) -> Result<bool> {
        self.catalog_exists(Catalog::Specialties, id)
    }

    pub fn department_exists(&self, id: &str) -> Result<bool> {
        self.catalog_exists(Catalog::Departments, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, SubsecRound};

    fn store() -> SqliteStore {
        SqliteStore::open(":memory:").unwrap()
    }

    fn new_user(id: &str, email: &str, document: Option<&str>, role: Role) -> NewUser {
        let profile = match role {
            Role::Medico => RoleProfile::Medico {
                specialty_id: "spec-1".into(),
                license_number: "LIC".into(),
            },
            Role::Enfermera => RoleProfile::Enfermera {
                department_id: "dep-1".into(),
            },
            Role::Paciente => RoleProfile::Paciente { address: None },
            Role::Administrador => RoleProfile::Administrador {
                access_level: Some("full".into()),
                assigned_department: None,
            },
        };
        let now = Utc::now().trunc_subsecs(6);
        NewUser {
            account: UserAccount {
                id: id.into(),
                email: email.into(),
                fullname: "Ana Perez".into(),
                document_number: document.map(str::to_string),
                phone: Some("555-0100".into()),
                gender: None,
                date_of_birth: NaiveDate::from_ymd_opt(1990, 5, 1).unwrap(),
                age: 34,
                role,
                status: UserStatus::Pending,
                profile,
                created_at: now,
            },
            password_hash: "$2b$04$hash".into(),
            verification_code: "123456".into(),
            verification_expires: now + Duration::hours(24),
        }
    }

    #[test]
    fn test_create_and_find() {
        let store = store();
        let user = new_user("u1", "Ana@Clinic.test", Some("D-1"), Role::Medico);
        store.create_user(&user).unwrap();

        let found = store.find_user("u1").unwrap().unwrap();
        assert_eq!(found, user.account);
        assert_eq!(
            store.find_by_email("ana@clinic.test").unwrap().map(|u| u.id),
            Some("u1".to_string())
        );
        assert!(store.find_by_document_number("D-1").unwrap().is_some());
        assert!(store.find_user("missing").unwrap().is_none());

        let verification = store.find_verification("u1").unwrap().unwrap();
        assert_eq!(verification.code, "123456");
    }

    #[test]
    fn test_data_survives_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("users.sqlite");
        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .create_user(&new_user("u1", "a@x.com", None, Role::Paciente))
                .unwrap();
            store.insert_specialty("spec-1", "Cardiología").unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert!(store.find_user("u1").unwrap().is_some());
        assert!(store.specialty_exists("spec-1").unwrap());
    }

    #[test]
    fn test_unique_email_is_case_insensitive() {
        let store = store();
        store
            .create_user(&new_user("u1", "a@x.com", None, Role::Administrador))
            .unwrap();
        let err = store
            .create_user(&new_user("u2", "A@X.com", None, Role::Administrador))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { ref field } if field == "email"));
    }

    #[test]
    fn test_unique_document_number() {
        let store = store();
        store
            .create_user(&new_user("u1", "a@x.com", Some("D-1"), Role::Administrador))
            .unwrap();
        let err = store
            .create_user(&new_user("u2", "b@x.com", Some("D-1"), Role::Administrador))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { ref field } if field == "document_number"));

        // several accounts without a document number are fine
        store
            .create_user(&new_user("u3", "c@x.com", None, Role::Administrador))
            .unwrap();
        store
            .create_user(&new_user("u4", "d@x.com", None, Role::Administrador))
            .unwrap();
    }

    #[test]
    fn test_delete() {
        let store = store();
        store
            .create_user(&new_user("u1", "a@x.com", None, Role::Medico))
            .unwrap();
        assert!(store.delete_user("u1").unwrap());
        assert!(!store.delete_user("u1").unwrap());
        assert!(store.find_by_email("a@x.com").unwrap().is_none());
    }

    #[test]
    fn test_update_and_status() {
        let store = store();
        let user = new_user("u1", "a@x.com", None, Role::Medico);
        store.create_user(&user).unwrap();

        let mut account = user.account.clone();
        account.fullname = "Ana Maria Perez".into();
        account.document_number = Some("D-9".into());
        assert!(store.update_user(&account).unwrap());
        assert!(store.set_status("u1", UserStatus::Inactive).unwrap());
        assert!(!store.set_status("nope", UserStatus::Active).unwrap());

        let found = store.find_user("u1").unwrap().unwrap();
        assert_eq!(found.fullname, "Ana Maria Perez");
        assert_eq!(found.document_number.as_deref(), Some("D-9"));
        assert_eq!(found.status, UserStatus::Inactive);
    }

    #[test]
    fn test_list_filter_and_counts() {
        let store = store();
        store
            .create_user(&new_user("u1", "doc@x.com", None, Role::Medico))
            .unwrap();
        store
            .create_user(&new_user("u2", "nurse@x.com", None, Role::Enfermera))
            .unwrap();
        store
            .create_user(&new_user("u3", "other@x.com", None, Role::Medico))
            .unwrap();
        store.set_status("u3", UserStatus::Active).unwrap();

        let doctors = UserFilter::new().role(Role::Medico);
        assert_eq!(store.count_users(&doctors).unwrap(), 2);
        let listed = store.list_users(&doctors, Page::new(1, 10)).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, "u3");

        let page_two = store.list_users(&UserFilter::new(), Page::new(2, 2)).unwrap();
        assert_eq!(page_two.len(), 1);

        let search = UserFilter::new().search("NURSE");
        assert_eq!(store.count_users(&search).unwrap(), 1);

        let by_status = store.count_by_status().unwrap();
        assert!(by_status.contains(&(UserStatus::Pending, 2)));
        assert!(by_status.contains(&(UserStatus::Active, 1)));
        assert!(by_status.contains(&(UserStatus::Inactive, 0)));

        let by_role = store.count_by_role().unwrap();
        assert!(by_role.contains(&(Role::Medico, 2)));
        assert!(by_role.contains(&(Role::Enfermera, 1)));
        assert_eq!(by_role.len(), 2);
    }

    #[test]
    fn test_catalog_lookup_folds_names() {
        let store = store();
        store.insert_specialty("spec-1", "Cardiología").unwrap();
        store.insert_department("dep-1", "Cuidados  Intensivos").unwrap();

        let found = store.find_specialty_by_name("  CARDIOLOGIA ").unwrap().unwrap();
        assert_eq!(found.id, "spec-1");
        assert_eq!(found.name, "Cardiología");
        assert!(store
            .find_department_by_name("cuidados intensivos")
            .unwrap()
            .is_some());
        assert!(store.find_specialty_by_name("Pediatría").unwrap().is_none());

        assert!(store.specialty_exists("spec-1").unwrap());
        assert!(!store.specialty_exists("dep-1").unwrap());
        assert!(store.department_exists("dep-1").unwrap());

        let err = store.insert_specialty("spec-2", "cardiologia").unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }
}
