use std::collections::HashSet;

/// In-batch duplicate detection on e-mail addresses.
///
/// Scoped to a single import; accounts already persisted are the store's
/// concern (unique constraint), not this guard's.
#[derive(Debug, Default)]
pub struct BatchEmailGuard {
    seen: HashSet<String>,
}

fn key(email: &str) -> String {
    email.trim().to_lowercase()
}

impl BatchEmailGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `email` and report whether this is its first occurrence.
    pub fn check_and_mark(&mut self, email: &str) -> bool {
        self.seen.insert(key(email))
    }
}
