//! Query filters for account listings
//!
//! `UserFilter` only holds optional criteria; turning it into SQL is a pure
//! function producing a parameterized clause.

use medcore_core::{Role, UserStatus};

pub const DEFAULT_PAGE_LIMIT: u32 = 10;
pub const MAX_PAGE_LIMIT: u32 = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserFilter {
    pub role: Option<Role>,
    pub status: Option<UserStatus>,
    /// Case-insensitive substring of name, e-mail or document number
    pub search: Option<String>,
}

impl UserFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    pub fn status(mut self, status: UserStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn search(mut self, term: impl Into<String>) -> Self {
        let term = term.into();
        let term = term.trim();
        self.search = (!term.is_empty()).then(|| term.to_string());
        self
    }

    /// Build the `WHERE` clause (empty when no criteria are set) and its parameters.
    pub fn to_sql(&self) -> (String, Vec<String>) {
        let mut conditions = Vec::new();
        let mut params = Vec::new();

        if let Some(role) = self.role {
            conditions.push("role = ?".to_string());
            params.push(role.as_str().to_string());
        }
        if let Some(status) = self.status {
            conditions.push("status = ?".to_string());
            params.push(status.as_str().to_string());
        }
        if let Some(term) = &self.search {
            let pattern = format!("%{}%", escape_like(term));
            conditions.push(
                "(fullname LIKE ? ESCAPE '\\' OR email LIKE ? ESCAPE '\\' OR document_number LIKE ? ESCAPE '\\')"
                    .to_string(),
            );
            params.extend(std::iter::repeat_n(pattern, 3));
        }

        if conditions.is_empty() {
            (String::new(), params)
        } else {
            (format!(" WHERE {}", conditions.join(" AND ")), params)
        }
    }
}

fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// One-based page selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u32,
    pub limit: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl Page {
    /// Clamp to page >= 1 and 1..=100 items.
    pub fn new(page: u32, limit: u32) -> Self {
        Self {
            page: page.max(1),
            limit: limit.clamp(1, MAX_PAGE_LIMIT),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }

    pub fn total_pages(&self, total: u64) -> u64 {
        total.div_ceil(u64::from(self.limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter() {
        let (clause, params) = UserFilter::new().to_sql();
        assert_eq!(clause, "");
        assert!(params.is_empty());
    }

    #[test]
    fn test_combined_filter() {
        let (clause, params) = UserFilter::new()
            .role(Role::Medico)
            .status(UserStatus::Active)
            .search("ana")
            .to_sql();
        assert!(clause.starts_with(" WHERE role = ? AND status = ? AND (fullname LIKE ?"));
        assert_eq!(params, vec!["MEDICO", "ACTIVE", "%ana%", "%ana%", "%ana%"]);
    }

    #[test]
    fn test_search_escapes_wildcards() {
        let (_, params) = UserFilter::new().search("50%_off").to_sql();
        assert_eq!(params[0], "%50\\%\\_off%");
    }

    #[test]
    fn test_blank_search_ignored() {
        assert_eq!(UserFilter::new().search("   "), UserFilter::new());
    }

    #[test]
    fn test_page_clamping() {
        let page = Page::new(0, 500);
        assert_eq!(page, Page { page: 1, limit: 100 });
        assert_eq!(Page::new(3, 10).offset(), 20);
        assert_eq!(Page::new(1, 10).total_pages(21), 3);
        assert_eq!(Page::new(1, 10).total_pages(0), 0);
    }
}
