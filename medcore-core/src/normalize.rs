//! Row normalization onto the canonical column vocabulary
//!
//! Column aliases (English/Spanish, camelCase/snake_case) are folded onto
//! canonical keys, string values are trimmed, role and status values are
//! mapped onto their canonical upper-case forms, and the role-specific
//! columns of a flat row are gathered into the nested group of that role.
//! Normalization never fails; anything unrecognized passes through for the
//! validator to judge.

use crate::tabular::RawRow;
use crate::user::Role;
use serde_json::{Map, Value};
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

/// Source column name -> canonical key (source side is case-sensitive).
const COLUMN_ALIASES: &[(&str, &str)] = &[
    ("currentPassword", "current_password"),
    ("password", "current_password"),
    ("dateOfBirth", "date_of_birth"),
    ("birthDate", "date_of_birth"),
    ("fecha_nacimiento", "date_of_birth"),
    ("telefono", "phone"),
    ("licencia", "license_number"),
    ("licencia_medica", "license_number"),
    ("especialidad", "specialty"),
    ("departamento", "department"),
    ("fullName", "fullname"),
    ("full_name", "fullname"),
    ("nombre_completo", "fullname"),
    ("correo", "email"),
    ("rol", "role"),
    ("estado", "status"),
    ("documentNumber", "document_number"),
    ("numero_documento", "document_number"),
    ("licenseNumber", "license_number"),
    ("specialtyId", "specialty_id"),
    ("departmentId", "department_id"),
    ("genero", "gender"),
    ("direccion", "address"),
    ("nivelAcceso", "access_level"),
    ("departamentoAsignado", "assigned_department"),
    ("doctor", "medico"),
    ("nurse", "enfermera"),
    ("patient", "paciente"),
    ("admin", "administrador"),
];

const ROLE_SYNONYMS: &[(&str, &str)] = &[
    ("DOCTOR", "MEDICO"),
    ("MÉDICO", "MEDICO"),
    ("MEDICO", "MEDICO"),
    ("NURSE", "ENFERMERA"),
    ("ENFERMERA", "ENFERMERA"),
    ("PATIENT", "PACIENTE"),
    ("PACIENTE", "PACIENTE"),
    ("ADMIN", "ADMINISTRADOR"),
    ("ADMINISTRADOR", "ADMINISTRADOR"),
];

const STATUS_SYNONYMS: &[(&str, &str)] = &[
    ("ACTIVO", "ACTIVE"),
    ("INACTIVO", "INACTIVE"),
    ("PENDIENTE", "PENDING"),
];

/// Canonical keys that belong in each role's nested group.
fn group_fields(role: Role) -> &'static [&'static str] {
    match role {
        Role::Medico => &["specialty", "specialty_id", "license_number"],
        Role::Enfermera => &["department", "department_id"],
        Role::Paciente => &["address"],
        Role::Administrador => &["access_level", "assigned_department"],
    }
}

fn canonical_key(key: &str) -> String {
    let key = key.trim();
    COLUMN_ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or_else(|| key.to_string())
}

fn lookup(table: &[(&str, &'static str)], value: &str) -> Option<&'static str> {
    table.iter().find(|(from, _)| *from == value).map(|(_, to)| *to)
}

/// Upper-case a role value and map its synonyms; unknown values stay upper-cased.
pub fn canonical_role(value: &str) -> String {
    let upper = value.trim().to_uppercase();
    lookup(ROLE_SYNONYMS, &upper)
        .map(str::to_string)
        .unwrap_or(upper)
}

/// Upper-case a status value and map its Spanish forms.
pub fn canonical_status(value: &str) -> String {
    let upper = value.trim().to_uppercase();
    lookup(STATUS_SYNONYMS, &upper)
        .map(str::to_string)
        .unwrap_or(upper)
}

/// A row whose keys and enumerated values use the canonical vocabulary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedRow {
    fields: Map<String, Value>,
}

impl NormalizedRow {
    /// Text value of a top-level field; numbers and booleans are rendered,
    /// empty strings and nulls count as absent.
    pub fn text(&self, key: &str) -> Option<String> {
        self.fields.get(key).and_then(value_text)
    }

    /// Text value of a field inside the nested group of `role`.
    pub fn group_text(&self, role: Role, key: &str) -> Option<String> {
        self.fields
            .get(role.group_key())
            .and_then(Value::as_object)
            .and_then(|group| group.get(key))
            .and_then(value_text)
    }

    /// True when every value is empty after trimming (or the row has no fields).
    pub fn is_blank(&self) -> bool {
        self.fields.values().all(is_blank_value)
    }
}

impl From<Map<String, Value>> for NormalizedRow {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(match n.as_f64() {
            // Spreadsheet cells store whole numbers as floats
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        }),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn is_blank_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Object(map) => map.values().all(is_blank_value),
        _ => false,
    }
}

fn normalize_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.trim().to_string()),
        Value::Object(map) => Value::Object(normalize_fields(map)),
        other => other.clone(),
    }
}

/// Insert keeping an existing non-empty value over an empty duplicate and
/// merging nested objects.
fn insert_field(target: &mut Map<String, Value>, key: String, value: Value) {
    match target.get_mut(&key) {
        Some(Value::Object(existing)) if value.is_object() => {
            if let Value::Object(incoming) = value {
                for (k, v) in incoming {
                    insert_field(existing, k, v);
                }
            }
        }
        Some(existing) => {
            if is_blank_value(existing) || !is_blank_value(&value) {
                *existing = value;
            }
        }
        None => {
            target.insert(key, value);
        }
    }
}

fn normalize_fields(raw: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in raw {
        let value = normalize_value(value);
        // "medico.specialty" style headers address a nested group
        if let Some((group, field)) = key.trim().split_once('.')
            && !group.is_empty()
            && !field.is_empty()
        {
            let mut nested = Map::new();
            nested.insert(canonical_key(field), value);
            insert_field(&mut out, canonical_key(group), Value::Object(nested));
            continue;
        }
        insert_field(&mut out, canonical_key(key), value);
    }
    out
}

/// Rewrite a raw row onto the canonical vocabulary.
pub fn normalize_row(raw: &RawRow) -> NormalizedRow {
    let mut fields = normalize_fields(raw);

    if let Some(Value::String(role)) = fields.get("role") {
        let role = canonical_role(role);
        fields.insert("role".to_string(), Value::String(role));
    }
    if let Some(Value::String(status)) = fields.get("status") {
        let status = canonical_status(status);
        fields.insert("status".to_string(), Value::String(status));
    }

    let role = fields
        .get("role")
        .and_then(Value::as_str)
        .and_then(Role::parse);
    if let Some(role) = role {
        let mut group = Map::new();
        for key in group_fields(role) {
            if let Some(value) = fields.remove(*key) {
                group.insert(key.to_string(), value);
            }
        }
        if !group.is_empty() {
            insert_field(&mut fields, role.group_key().to_string(), Value::Object(group));
        }
    }

    NormalizedRow { fields }
}

/// Fold a catalog name for comparison: no diacritics, lower-case, single spaces.
pub fn fold_name(name: &str) -> String {
    let stripped: String = name.nfd().filter(|c| !is_combining_mark(*c)).collect();
    stripped
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> RawRow {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_role_and_status_aliases() {
        let row = normalize_row(&raw(json!({"role": "doctor", "status": "activo"})));
        assert_eq!(row.text("role").as_deref(), Some("MEDICO"));
        assert_eq!(row.text("status").as_deref(), Some("ACTIVE"));

        let row = normalize_row(&raw(json!({"role": " Médico ", "status": "pendiente"})));
        assert_eq!(row.text("role").as_deref(), Some("MEDICO"));
        assert_eq!(row.text("status").as_deref(), Some("PENDING"));

        let row = normalize_row(&raw(json!({"role": "nurse", "status": "INACTIVE"})));
        assert_eq!(row.text("role").as_deref(), Some("ENFERMERA"));
        assert_eq!(row.text("status").as_deref(), Some("INACTIVE"));
    }

    #[test]
    fn test_unknown_role_passes_through_uppercased() {
        let row = normalize_row(&raw(json!({"role": "chef"})));
        assert_eq!(row.text("role").as_deref(), Some("CHEF"));
    }

    #[test]
    fn test_column_aliases() {
        let row = normalize_row(&raw(json!({
            " password ": "abc123",
            "fecha_nacimiento": "1990-01-01",
            "telefono": "555",
            "unknownColumn": "kept"
        })));
        assert_eq!(row.text("current_password").as_deref(), Some("abc123"));
        assert_eq!(row.text("date_of_birth").as_deref(), Some("1990-01-01"));
        assert_eq!(row.text("phone").as_deref(), Some("555"));
        assert_eq!(row.text("unknownColumn").as_deref(), Some("kept"));
    }

    #[test]
    fn test_flat_role_fields_move_into_group() {
        let row = normalize_row(&raw(json!({
            "role": "MEDICO",
            "especialidad": " Cardiología ",
            "licencia": "L-1"
        })));
        assert_eq!(row.group_text(Role::Medico, "specialty").as_deref(), Some("Cardiología"));
        assert_eq!(row.group_text(Role::Medico, "license_number").as_deref(), Some("L-1"));
        assert!(row.text("specialty").is_none());
    }

    #[test]
    fn test_dotted_and_nested_groups() {
        let row = normalize_row(&raw(json!({
            "role": "enfermera",
            "enfermera.departamento": "Urgencias"
        })));
        assert_eq!(row.group_text(Role::Enfermera, "department").as_deref(), Some("Urgencias"));

        let row = normalize_row(&raw(json!({
            "role": "ENFERMERA",
            "nurse": {"departmentId": "dep-1"}
        })));
        assert_eq!(row.group_text(Role::Enfermera, "department_id").as_deref(), Some("dep-1"));
    }

    #[test]
    fn test_empty_duplicate_does_not_override() {
        // "currentPassword" and "password" collapse onto the same key
        let row = normalize_row(&raw(json!({"currentPassword": "", "password": "abc123"})));
        assert_eq!(row.text("current_password").as_deref(), Some("abc123"));
    }

    #[test]
    fn test_numeric_cells_render_as_text() {
        let row = normalize_row(&raw(json!({"phone": 3001234567.0, "document_number": 42})));
        assert_eq!(row.text("phone").as_deref(), Some("3001234567"));
        assert_eq!(row.text("document_number").as_deref(), Some("42"));
    }

    #[test]
    fn test_blank_rows() {
        assert!(normalize_row(&raw(json!({"email": "", "fullname": "   "}))).is_blank());
        assert!(normalize_row(&raw(json!({"email": null}))).is_blank());
        assert!(normalize_row(&raw(json!({}))).is_blank());
        assert!(!normalize_row(&raw(json!({"email": "", "age": 0}))).is_blank());
    }

    #[test]
    fn test_fold_name() {
        assert_eq!(fold_name("  Cardiología   Pediátrica "), "cardiologia pediatrica");
        assert_eq!(fold_name("URGENCIAS"), "urgencias");
        assert_eq!(fold_name("Neurologi\u{0301}a"), "neurologia");
        assert_eq!(fold_name("Ýpsilon Ÿ Çà"), "ypsilon y ca");
    }
}
