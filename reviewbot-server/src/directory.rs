//! Chat identity to email translation.

use std::collections::HashMap;

use reviewbot_core::email::normalize;

/// Looks up the email address behind a chat platform user id.
pub trait EmailDirectory: Send + Sync {
    fn email_for_platform_id(&self, id: &str) -> Option<String>;
}

/// A fixed id → email table.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    emails: HashMap<String, String>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, email: &str) {
        self.emails.insert(id.into(), normalize(email));
    }

    pub fn len(&self) -> usize {
        self.emails.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emails.is_empty()
    }
}

impl<K: Into<String>, V: AsRef<str>> FromIterator<(K, V)> for StaticDirectory {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut directory = Self::new();
        for (id, email) in iter {
            directory.insert(id, email.as_ref());
        }
        directory
    }
}

impl EmailDirectory for StaticDirectory {
    fn email_for_platform_id(&self, id: &str) -> Option<String> {
        self.emails.get(id).cloned()
    }
}
