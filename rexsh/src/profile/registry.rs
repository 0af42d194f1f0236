//! Registry for looking up program profiles.

use std::sync::{Arc, LazyLock};

use indexmap::IndexMap;

use super::definition::ProgramProfile;
use super::programs;
use crate::error::{Error, Result};

/// Built-in profiles, shared and immutable.
static BUILTIN: LazyLock<ProfileRegistry> = LazyLock::new(ProfileRegistry::with_builtin);

/// Registry for program profiles.
///
/// Profiles are kept in registration order; command detection tries them in
/// that order.
#[derive(Debug, Default, Clone)]
pub struct ProfileRegistry {
    profiles: IndexMap<String, Arc<ProgramProfile>>,
}

impl ProfileRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in profiles.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for profile in programs::builtin() {
            registry
                .profiles
                .insert(profile.name.clone(), Arc::new(profile));
        }
        registry
    }

    /// The shared built-in registry.
    pub fn builtin() -> &'static ProfileRegistry {
        &BUILTIN
    }

    /// Register a profile.
    pub fn register(&mut self, profile: ProgramProfile) -> Result<()> {
        if self.profiles.contains_key(&profile.name) {
            return Err(Error::configuration(format!(
                "program profile '{}' is already registered",
                profile.name
            )));
        }
        self.profiles
            .insert(profile.name.clone(), Arc::new(profile));
        Ok(())
    }

    /// Get a profile by name.
    pub fn get(&self, name: &str) -> Option<&Arc<ProgramProfile>> {
        self.profiles.get(name)
    }

    /// Resolve a caller hint: a profile name or an executable alias.
    pub fn resolve(&self, hint: &str) -> Option<&Arc<ProgramProfile>> {
        let hint = hint.trim();
        self.get(hint)
            .or_else(|| self.profiles.values().find(|p| p.is_named(hint)))
    }

    /// The first profile whose detection policy claims `command`.
    pub fn detect(&self, command: &str) -> Option<&Arc<ProgramProfile>> {
        self.profiles
            .values()
            .find(|profile| profile.matches_command(command))
    }

    /// Check if a profile is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.profiles.contains_key(name)
    }

    /// List all registered profile names.
    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.profiles.keys()
    }
}
