//! PIN holders.

use dashmap::DashMap;
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;
use thiserror::Error;

static USERNAME_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.\-]{1,32}$").ok());
static PIN_RE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^[0-9]{4,8}$").ok());

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UserStoreError {
    #[error("invalid username")]
    InvalidUsername,
    #[error("invalid pin")]
    InvalidPin,
    #[error("user already exists")]
    AlreadyExists,
    #[error("user not found")]
    NotFound,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct User {
    pub name: String,
    #[serde(skip_serializing)]
    pub pin: String,
    pub active: bool,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_used_at: Option<i64>,
    pub times_used: u64,
}

/// PINs are 4 to 8 ASCII digits.
#[must_use]
pub fn valid_pin(pin: &str) -> bool {
    PIN_RE.as_ref().is_some_and(|re| re.is_match(pin))
}

/// Usernames are 1 to 32 characters of `[A-Za-z0-9_.-]`.
#[must_use]
pub fn valid_username(name: &str) -> bool {
    USERNAME_RE.as_ref().is_some_and(|re| re.is_match(name))
}

pub trait UserStore: Send + Sync {
    /// Name of the active user holding `pin`.
    fn find_by_pin(&self, pin: &str) -> Option<String>;

    /// Record a successful use.
    fn touch(&self, name: &str, now: i64);

    fn get(&self, name: &str) -> Option<User>;

    fn list(&self) -> Vec<User>;

    /// # Errors
    /// Returns an error if the name or PIN is invalid or the user exists.
    fn create(&self, name: &str, pin: &str, active: bool, now: i64) -> Result<(), UserStoreError>;

    /// # Errors
    /// Returns an error if the user does not exist or the new PIN is invalid.
    fn update(
        &self,
        name: &str,
        pin: Option<&str>,
        active: Option<bool>,
        now: i64,
    ) -> Result<(), UserStoreError>;

    /// # Errors
    /// Returns `NotFound` if the user does not exist.
    fn delete(&self, name: &str) -> Result<(), UserStoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryUserStore {
    users: DashMap<String, User>,
}

impl MemoryUserStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from `(name, pin)` pairs. Invalid entries are skipped.
    #[must_use]
    pub fn seeded<I, N, P>(entries: I, now: i64) -> Self
    where
        I: IntoIterator<Item = (N, P)>,
        N: AsRef<str>,
        P: AsRef<str>,
    {
        let store = Self::new();
        for (name, pin) in entries {
            if let Err(err) = store.create(name.as_ref(), pin.as_ref(), true, now) {
                tracing::warn!(user = name.as_ref(), "skipping seeded user: {err}");
            }
        }
        store
    }
}

impl UserStore for MemoryUserStore {
    fn find_by_pin(&self, pin: &str) -> Option<String> {
        // Scan every user so lookup time does not reveal which entry matched.
        let mut matched = None;
        for user in self.users.iter() {
            if user.active && user.pin == pin && matched.is_none() {
                matched = Some(user.name.clone());
            }
        }
        matched
    }

    fn touch(&self, name: &str, now: i64) {
        if let Some(mut user) = self.users.get_mut(name) {
            user.last_used_at = Some(now);
            user.times_used = user.times_used.saturating_add(1);
        }
    }

    fn get(&self, name: &str) -> Option<User> {
        self.users.get(name).map(|user| user.clone())
    }

    fn list(&self) -> Vec<User> {
        let mut users: Vec<User> = self.users.iter().map(|user| user.clone()).collect();
        users.sort_by(|a, b| a.name.cmp(&b.name));
        users
    }

    fn create(&self, name: &str, pin: &str, active: bool, now: i64) -> Result<(), UserStoreError> {
        if !valid_username(name) {
            return Err(UserStoreError::InvalidUsername);
        }
        if !valid_pin(pin) {
            return Err(UserStoreError::InvalidPin);
        }
        match self.users.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(UserStoreError::AlreadyExists),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(User {
                    name: name.to_string(),
                    pin: pin.to_string(),
                    active,
                    created_at: now,
                    updated_at: now,
                    last_used_at: None,
                    times_used: 0,
                });
                Ok(())
            }
        }
    }

    fn update(
        &self,
        name: &str,
        pin: Option<&str>,
        active: Option<bool>,
        now: i64,
    ) -> Result<(), UserStoreError> {
        if pin.is_some_and(|pin| !valid_pin(pin)) {
            return Err(UserStoreError::InvalidPin);
        }
        let mut user = self.users.get_mut(name).ok_or(UserStoreError::NotFound)?;
        if let Some(pin) = pin {
            user.pin = pin.to_string();
        }
        if let Some(active) = active {
            user.active = active;
        }
        user.updated_at = now;
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<(), UserStoreError> {
        self.users
            .remove(name)
            .map(|_| ())
            .ok_or(UserStoreError::NotFound)
    }
}

/// Capitalize the first character for greetings.
#[must_use]
pub fn display_name(name: &str) -> String {
    let mut chars = name.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    #[test]
    fn pin_format() {
        assert!(valid_pin("1234"));
        assert!(valid_pin("12345678"));
        assert!(!valid_pin("123"));
        assert!(!valid_pin("123456789"));
        assert!(!valid_pin("12a4"));
        assert!(!valid_pin(" 1234"));
        assert!(!valid_pin("١٢٣٤"));
    }

    #[test]
    fn username_format() {
        assert!(valid_username("alice"));
        assert!(valid_username("bob.smith-2_x"));
        assert!(!valid_username(""));
        assert!(!valid_username("has space"));
        assert!(!valid_username(&"a".repeat(33)));
    }

    #[test]
    fn seeded_store_finds_active_users_only() -> Result<(), UserStoreError> {
        let store = MemoryUserStore::seeded([("alice", "1234"), ("bob", "5678"), ("bad", "12")], NOW);
        assert_eq!(store.list().len(), 2);
        assert_eq!(store.find_by_pin("1234").as_deref(), Some("alice"));

        store.update("alice", None, Some(false), NOW + 1)?;
        assert_eq!(store.find_by_pin("1234"), None);
        assert_eq!(store.find_by_pin("5678").as_deref(), Some("bob"));
        Ok(())
    }

    #[test]
    fn touch_tracks_usage() {
        let store = MemoryUserStore::seeded([("alice", "1234")], NOW);
        store.touch("alice", NOW + 10);
        store.touch("alice", NOW + 20);
        let user = store.get("alice");
        assert_eq!(user.as_ref().map(|u| u.times_used), Some(2));
        assert_eq!(user.and_then(|u| u.last_used_at), Some(NOW + 20));
    }

    #[test]
    fn create_update_delete() {
        let store = MemoryUserStore::new();
        assert_eq!(store.create("carol", "4321", true, NOW), Ok(()));
        assert_eq!(
            store.create("carol", "4321", true, NOW),
            Err(UserStoreError::AlreadyExists)
        );
        assert_eq!(
            store.create("c d", "4321", true, NOW),
            Err(UserStoreError::InvalidUsername)
        );
        assert_eq!(
            store.update("carol", Some("12"), None, NOW),
            Err(UserStoreError::InvalidPin)
        );
        assert_eq!(store.update("carol", Some("9999"), None, NOW + 5), Ok(()));
        assert_eq!(store.get("carol").map(|u| u.updated_at), Some(NOW + 5));
        assert_eq!(store.delete("carol"), Ok(()));
        assert_eq!(store.delete("carol"), Err(UserStoreError::NotFound));
    }

    #[test]
    fn display_name_capitalizes() {
        assert_eq!(display_name("alice"), "Alice");
        assert_eq!(display_name("BOB"), "Bob");
        assert_eq!(display_name(""), "");
    }
}
