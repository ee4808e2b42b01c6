//! Access codes and the per-chat session store.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;

use crate::config::AccessConfig;
use crate::events::ChatId;

/// Who an operator logged in as.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Role {
    /// Full menu: pipelines and reports.
    Admin,
    /// A named field technician.
    Technician(String),
    /// Call-center operator.
    CallCenter,
    /// Any other configured role.
    Other(String),
}

impl Role {
    /// Maps a configured role name to a role.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "admin" => Self::Admin,
            "calcentr" => Self::CallCenter,
            tech @ ("ruslan" | "dmutro" | "igor") => Self::Technician(tech.to_string()),
            other => Self::Other(other.to_string()),
        }
    }

    /// The configured role name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Admin => "admin",
            Self::CallCenter => "calcentr",
            Self::Technician(name) | Self::Other(name) => name,
        }
    }

    /// Only the admin menu is served by this dispatcher.
    #[must_use]
    pub fn has_menu(&self) -> bool {
        matches!(self, Self::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolves an access code to a role.
#[must_use]
pub fn authenticate(access: &AccessConfig, code: &str) -> Option<Role> {
    access
        .codes
        .get(code.trim())
        .map(String::as_str)
        .map(Role::from_name)
}

/// Logged-in chats.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<ChatId, Role>>,
}

impl SessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `chat` as logged in with `role`, replacing any earlier role.
    pub fn login(&self, chat: ChatId, role: Role) {
        self.sessions.write().insert(chat, role);
    }

    /// The role of `chat`, if logged in.
    #[must_use]
    pub fn role(&self, chat: ChatId) -> Option<Role> {
        self.sessions.read().get(&chat).cloned()
    }

    /// Ends the session and returns the role it had.
    pub fn logout(&self, chat: ChatId) -> Option<Role> {
        self.sessions.write().remove(&chat)
    }

    /// Number of open sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Returns true if nobody is logged in.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_role_from_name() {
        assert_eq!(Role::from_name("admin"), Role::Admin);
        assert_eq!(Role::from_name(" Igor "), Role::Technician("igor".to_string()));
        assert_eq!(Role::from_name("calcentr"), Role::CallCenter);
        assert_eq!(Role::from_name("finance"), Role::Other("finance".to_string()));
        assert!(Role::Admin.has_menu());
        assert!(!Role::CallCenter.has_menu());
    }

    #[test]
    fn test_default_access_authorizes_nobody() {
        let access = AccessConfig::default();
        for code in ["adiz", "admin", "", "rus1"] {
            assert_eq!(authenticate(&access, code), None, "{code}");
        }
    }

    #[test]
    fn test_authenticate_with_configured_codes() {
        let access = AccessConfig::default()
            .with_code("k-admin", "admin")
            .with_code("k-sup", "superv");
        assert_eq!(authenticate(&access, " k-admin "), Some(Role::Admin));
        assert_eq!(authenticate(&access, "k-sup"), Some(Role::Other("superv".to_string())));
        assert_eq!(authenticate(&access, "wrong"), None);
    }

    #[test]
    fn test_sessions_are_per_chat() {
        let store = SessionStore::new();
        store.login(1, Role::Admin);
        store.login(2, Role::CallCenter);

        assert_eq!(store.role(1), Some(Role::Admin));
        assert_eq!(store.logout(1), Some(Role::Admin));
        assert_eq!(store.role(1), None);
        assert_eq!(store.logout(1), None);
        assert_eq!(store.len(), 1);
    }
}
